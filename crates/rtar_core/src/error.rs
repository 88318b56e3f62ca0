use miette::Diagnostic;
use thiserror::Error;

#[derive(Error, Diagnostic, Debug)]
pub enum CoreError {
    #[error("Malformed stream frame")]
    #[diagnostic(
        code(rtar_core::frame_parse),
        help("The frame was dropped; the stream keeps running")
    )]
    FrameParse {
        frame_preview: String,
        #[source]
        cause: serde_json::Error,
    },

    #[error("Response generation failed ({provider}/{model})")]
    #[diagnostic(
        code(rtar_core::generation_failed),
        help("Check API credentials and rate limits for {provider}")
    )]
    GenerationFailed {
        provider: String,
        model: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Response generation timed out for message {message_id}")]
    #[diagnostic(
        code(rtar_core::generation_timeout),
        help("No reply within {timeout_secs}s; the message was dropped")
    )]
    GenerationTimeout { message_id: String, timeout_secs: f64 },

    #[error("Actuation bridge unavailable at {address}")]
    #[diagnostic(
        code(rtar_core::bridge_unavailable),
        help("Could not reach the device at {address}. Is it connected and authorised?")
    )]
    BridgeUnavailable { address: String },

    #[error("Delivery step '{step}' failed: {detail}")]
    #[diagnostic(
        code(rtar_core::delivery_step_failed),
        help("Step '{step}' against {address} failed: {detail}")
    )]
    DeliveryStepFailed {
        step: String,
        address: String,
        detail: String,
    },

    #[error("Nothing to deliver")]
    #[diagnostic(
        code(rtar_core::empty_payload),
        help("The reply was empty after trimming whitespace")
    )]
    EmptyPayload,

    #[error("Stream connection to {endpoint} failed")]
    #[diagnostic(
        code(rtar_core::connection_failed),
        help("Could not open the comment stream at {endpoint}")
    )]
    ConnectionFailed {
        endpoint: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Stream connection permanently failed: {reason}")]
    #[diagnostic(
        code(rtar_core::permanently_failed),
        help("Auto-reconnect is disabled. Use a manual reset once the room is open again")
    )]
    PermanentlyFailed { reason: String },

    #[error("Reconnect already in progress")]
    #[diagnostic(code(rtar_core::reconnect_in_progress))]
    ReconnectInProgress,

    #[error("Reconnect attempts exhausted after {max_attempts} tries")]
    #[diagnostic(
        code(rtar_core::reconnect_exhausted),
        help("Reached {max_attempts} reconnect attempts. Reset the reconnect state to try again")
    )]
    ReconnectExhausted { max_attempts: u32 },

    #[error("Blocklist file error at {path}")]
    #[diagnostic(
        code(rtar_core::blocklist_io),
        help("Check that {path} is readable and writable")
    )]
    BlocklistIo {
        path: String,
        #[source]
        cause: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("File access failed for {path}")]
    #[diagnostic(
        code(rtar_core::file_io),
        help("Check that {path} exists and is readable")
    )]
    FileIo {
        path: String,
        #[source]
        cause: std::io::Error,
    },

    #[error("Serialization error for {data_type}")]
    #[diagnostic(
        code(rtar_core::serialization_error),
        help("Failed to serialize/deserialize {data_type}")
    )]
    SerializationError {
        data_type: String,
        #[source]
        cause: serde_json::Error,
    },

    #[error("Configuration error in {config_path} ({field}): expected {expected}")]
    #[diagnostic(
        code(rtar_core::configuration_error),
        help("Check configuration file at {config_path}")
    )]
    ConfigurationError {
        config_path: String,
        field: String,
        expected: String,
        #[source]
        cause: ConfigError,
    },
}

/// Lower-level causes for configuration failures
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("TOML parse error: {0}")]
    TomlParse(String),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(String),

    #[error("Missing required value")]
    Missing,

    #[error("Invalid value: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[derive(Debug, Error)]
#[error("{0}")]
struct StringError(String);

// Helper functions for creating common errors with context
impl CoreError {
    pub fn generation_error(
        provider: impl Into<String>,
        model: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::GenerationFailed {
            provider: provider.into(),
            model: model.into(),
            cause: Box::new(cause),
        }
    }

    pub fn generation_msg(
        provider: impl Into<String>,
        model: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::GenerationFailed {
            provider: provider.into(),
            model: model.into(),
            cause: Box::new(StringError(message.into())),
        }
    }

    pub fn step_failed(
        step: impl Into<String>,
        address: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::DeliveryStepFailed {
            step: step.into(),
            address: address.into(),
            detail: detail.into(),
        }
    }

    pub fn connection_error(
        endpoint: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::ConnectionFailed {
            endpoint: endpoint.into(),
            cause: Box::new(cause),
        }
    }

    pub fn connection_msg(endpoint: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ConnectionFailed {
            endpoint: endpoint.into(),
            cause: Box::new(StringError(message.into())),
        }
    }

    pub fn blocklist_io(
        path: impl Into<String>,
        cause: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::BlocklistIo {
            path: path.into(),
            cause: Box::new(cause),
        }
    }

    pub fn file_io(path: impl Into<String>, cause: std::io::Error) -> Self {
        Self::FileIo {
            path: path.into(),
            cause,
        }
    }

    pub fn config_invalid(
        config_path: impl Into<String>,
        field: impl Into<String>,
        expected: impl Into<String>,
        cause: ConfigError,
    ) -> Self {
        Self::ConfigurationError {
            config_path: config_path.into(),
            field: field.into(),
            expected: expected.into(),
            cause,
        }
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use miette::Report;

    #[test]
    fn test_step_failed_report_names_step() {
        let error = CoreError::step_failed("tap_input", "127.0.0.1:5555", "exit status 1");
        let report = Report::new(error);
        let output = format!("{:?}", report);
        assert!(output.contains("delivery_step_failed"));
        assert!(output.contains("tap_input"));
    }

    #[test]
    fn test_reconnect_exhausted_help() {
        let error = CoreError::ReconnectExhausted { max_attempts: 5 };
        let report = Report::new(error);
        let output = format!("{:?}", report);
        assert!(output.contains("Reached 5 reconnect attempts"));
    }

    #[test]
    fn test_display_carries_details() {
        let error = CoreError::step_failed("tap_send", "127.0.0.1:5555", "device offline");
        assert_eq!(
            error.to_string(),
            "Delivery step 'tap_send' failed: device offline"
        );

        let error = CoreError::PermanentlyFailed {
            reason: "close code 4003".into(),
        };
        assert!(error.to_string().ends_with("close code 4003"));

        let error = CoreError::config_invalid(
            "rtar.toml",
            "bot.response_rate",
            "a value between 0 and 1",
            ConfigError::Invalid("1.5".into()),
        );
        assert!(error.to_string().contains("bot.response_rate"));
    }
}
