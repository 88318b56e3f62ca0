//! Configuration system for RTAR
//!
//! Settings are stored as TOML. Every section has defaults so a partial file
//! (or no file at all) still yields a runnable configuration; `validate`
//! reports the credentials that have no sensible default.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::connection::transport::ROOM_NOT_OPEN;
use crate::error::{ConfigError, CoreError, Result};

/// Resolve a path relative to a base directory
/// If the path is absolute, return it as-is
fn resolve_path(base_dir: &Path, path: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base_dir.join(path)
    }
}

/// Convert a seconds value from the file into a `Duration`.
///
/// Negative and NaN values become zero and values too large to represent
/// saturate, so an unvalidated config never panics here.
pub fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(if value > 0.0 {
        Duration::MAX
    } else {
        Duration::ZERO
    })
}

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RtarConfig {
    /// Verbose logging plus a debug log file
    #[serde(default)]
    pub debug: bool,

    #[serde(default)]
    pub bot: BotConfig,

    #[serde(default)]
    pub stream: StreamConfig,

    #[serde(default)]
    pub model: ModelConfig,

    #[serde(default)]
    pub adb: AdbConfig,

    #[serde(default)]
    pub performance: PerformanceConfig,

    #[serde(default)]
    pub health: HealthConfig,

    #[serde(default)]
    pub connection: ConnectionConfig,

    #[serde(default)]
    pub paths: PathsConfig,
}

/// Reply behaviour
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BotConfig {
    /// Display name the bot posts as
    pub nickname: String,
    /// Probability in [0, 1] of replying to an ordinary comment
    pub response_rate: f64,
    /// Number of recent comments kept as generation context
    pub context_length: usize,
    /// Comments stamped within this many seconds of connecting are backlog
    pub initial_history_cutoff_secs: f64,
    /// Add the bot's own sender id to the blocklist at startup
    pub block_self: bool,
}

/// Comment stream endpoint and viewer identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub endpoint: String,
    pub media_id: u64,
    pub v_live_id: String,
    pub gid: String,
    pub auth: String,
}

/// OpenAI-compatible text generation provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub api_base: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Markdown persona file, relative to the config file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub character_path: Option<PathBuf>,
}

/// Screen coordinate on the device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenPoint {
    pub x: i32,
    pub y: i32,
}

/// Device automation bridge and delivery pacing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AdbConfig {
    pub host: String,
    pub port: u16,
    pub input_box: ScreenPoint,
    pub send_button: ScreenPoint,
    pub auto_send: bool,
    pub send_delay_min: f64,
    pub send_delay_max: f64,
    pub chunk_jitter_min: f64,
    pub chunk_jitter_max: f64,
    /// Pause between the individual steps of one transmission
    pub step_pause: f64,
    pub chunk_max_length: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PerformanceConfig {
    pub max_workers: usize,
    pub response_timeout_secs: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub activity_timeout_secs: f64,
}

/// Reconnection policy for the comment stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub stable_threshold_secs: f64,
    pub max_reconnect_attempts: u32,
    pub reconnect_delays: Vec<f64>,
    /// Close codes after which reconnecting is pointless
    pub permanent_close_codes: Vec<u16>,
}

/// Files owned by the collaborators around the core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub blocklist: PathBuf,
    pub presets: PathBuf,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            nickname: "RTAR Assistant".to_string(),
            response_rate: 1.0,
            context_length: 20,
            initial_history_cutoff_secs: 5.0,
            block_self: true,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://comment.REALITY.app".to_string(),
            media_id: 0,
            v_live_id: String::new(),
            gid: String::new(),
            auth: String::new(),
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            api_base: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            max_tokens: 500,
            character_path: None,
        }
    }
}

impl Default for AdbConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5555,
            input_box: ScreenPoint::default(),
            send_button: ScreenPoint::default(),
            auto_send: true,
            send_delay_min: 1.0,
            send_delay_max: 3.0,
            chunk_jitter_min: 0.25,
            chunk_jitter_max: 0.5,
            step_pause: 0.3,
            chunk_max_length: 90,
        }
    }
}

impl Default for PerformanceConfig {
    fn default() -> Self {
        Self {
            max_workers: 4,
            response_timeout_secs: 30.0,
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            activity_timeout_secs: 10.0,
        }
    }
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            stable_threshold_secs: 10.0,
            max_reconnect_attempts: 5,
            reconnect_delays: vec![2.0, 4.0, 8.0, 16.0, 32.0],
            permanent_close_codes: vec![ROOM_NOT_OPEN],
        }
    }
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            blocklist: PathBuf::from("filter_list.json"),
            presets: PathBuf::from("presets.json"),
        }
    }
}

impl AdbConfig {
    /// `host:port` form used by every bridge command
    pub fn device_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl PerformanceConfig {
    pub fn response_timeout(&self) -> Duration {
        secs(self.response_timeout_secs)
    }
}

impl HealthConfig {
    pub fn activity_timeout(&self) -> Duration {
        secs(self.activity_timeout_secs)
    }
}

impl RtarConfig {
    /// Check the keys that have no usable default.
    ///
    /// Returns the dotted names of every missing key so they can all be
    /// reported at once.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.stream.media_id == 0 {
            missing.push("stream.media_id");
        }
        if self.stream.v_live_id.is_empty() {
            missing.push("stream.v_live_id");
        }
        if self.stream.gid.is_empty() {
            missing.push("stream.gid");
        }
        if self.stream.auth.is_empty() {
            missing.push("stream.auth");
        }
        if self.model.api_key.is_empty() {
            missing.push("model.api_key");
        }
        if self.model.api_base.is_empty() {
            missing.push("model.api_base");
        }
        if self.model.model.is_empty() {
            missing.push("model.model");
        }
        missing
    }

    /// Every setting that ends up as a `Duration`
    fn seconds_fields(&self) -> Vec<(&'static str, f64)> {
        let mut fields = vec![
            (
                "bot.initial_history_cutoff_secs",
                self.bot.initial_history_cutoff_secs,
            ),
            ("adb.send_delay_min", self.adb.send_delay_min),
            ("adb.send_delay_max", self.adb.send_delay_max),
            ("adb.chunk_jitter_min", self.adb.chunk_jitter_min),
            ("adb.chunk_jitter_max", self.adb.chunk_jitter_max),
            ("adb.step_pause", self.adb.step_pause),
            (
                "performance.response_timeout_secs",
                self.performance.response_timeout_secs,
            ),
            (
                "health.activity_timeout_secs",
                self.health.activity_timeout_secs,
            ),
            (
                "connection.stable_threshold_secs",
                self.connection.stable_threshold_secs,
            ),
        ];
        fields.extend(
            self.connection
                .reconnect_delays
                .iter()
                .map(|delay| ("connection.reconnect_delays", *delay)),
        );
        fields
    }

    /// Validate value ranges and required keys
    pub fn validate(&self) -> Result<()> {
        if let Some(field) = self.missing_required().first() {
            return Err(CoreError::config_invalid(
                "rtar.toml",
                *field,
                "a non-empty value",
                ConfigError::Missing,
            ));
        }

        if !(0.0..=1.0).contains(&self.bot.response_rate) {
            return Err(CoreError::config_invalid(
                "rtar.toml",
                "bot.response_rate",
                "a value between 0 and 1",
                ConfigError::Invalid(self.bot.response_rate.to_string()),
            ));
        }

        if let Some((field, value)) = self
            .seconds_fields()
            .into_iter()
            .find(|(_, value)| Duration::try_from_secs_f64(*value).is_err())
        {
            return Err(CoreError::config_invalid(
                "rtar.toml",
                field,
                "a finite, non-negative number of seconds",
                ConfigError::Invalid(value.to_string()),
            ));
        }

        if self.adb.send_delay_min > self.adb.send_delay_max
            || self.adb.chunk_jitter_min > self.adb.chunk_jitter_max
        {
            return Err(CoreError::config_invalid(
                "rtar.toml",
                "adb.send_delay_min",
                "min delays no larger than max delays",
                ConfigError::Invalid(format!(
                    "send {}..{}, jitter {}..{}",
                    self.adb.send_delay_min,
                    self.adb.send_delay_max,
                    self.adb.chunk_jitter_min,
                    self.adb.chunk_jitter_max
                )),
            ));
        }

        if self.connection.reconnect_delays.is_empty() {
            return Err(CoreError::config_invalid(
                "rtar.toml",
                "connection.reconnect_delays",
                "at least one delay",
                ConfigError::Missing,
            ));
        }

        if self.performance.max_workers == 0 || self.adb.chunk_max_length < 2 {
            return Err(CoreError::config_invalid(
                "rtar.toml",
                "performance.max_workers",
                "at least one worker and a chunk length of two or more",
                ConfigError::Invalid(format!(
                    "workers {}, chunk length {}",
                    self.performance.max_workers, self.adb.chunk_max_length
                )),
            ));
        }

        Ok(())
    }
}

/// Load configuration from a TOML file
pub async fn load_config(path: &Path) -> Result<RtarConfig> {
    let content = tokio::fs::read_to_string(path).await.map_err(|e| {
        CoreError::config_invalid(
            path.display().to_string(),
            "file",
            "readable TOML file",
            ConfigError::Io(e.to_string()),
        )
    })?;

    let mut config: RtarConfig = toml::from_str(&content).map_err(|e| {
        CoreError::config_invalid(
            path.display().to_string(),
            "content",
            "valid TOML configuration",
            ConfigError::TomlParse(e.to_string()),
        )
    })?;

    // Resolve paths relative to the config file's directory
    let base_dir = path.parent().unwrap_or(Path::new("."));
    config.paths.blocklist = resolve_path(base_dir, &config.paths.blocklist);
    config.paths.presets = resolve_path(base_dir, &config.paths.presets);
    if let Some(ref character_path) = config.model.character_path {
        config.model.character_path = Some(resolve_path(base_dir, character_path));
    }

    Ok(config)
}

/// Save configuration to a TOML file
pub async fn save_config(config: &RtarConfig, path: &Path) -> Result<()> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            CoreError::config_invalid(
                parent.display().to_string(),
                "directory",
                "writable directory",
                ConfigError::Io(e.to_string()),
            )
        })?;
    }

    let content = toml::to_string_pretty(config).map_err(|e| {
        CoreError::config_invalid(
            path.display().to_string(),
            "serialization",
            "serializable config structure",
            ConfigError::TomlSerialize(e.to_string()),
        )
    })?;

    tokio::fs::write(path, content).await.map_err(|e| {
        CoreError::config_invalid(
            path.display().to_string(),
            "file",
            "writable file location",
            ConfigError::Io(e.to_string()),
        )
    })?;

    Ok(())
}

/// Standard config file locations
pub fn config_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    // Project-specific config
    paths.push(PathBuf::from("rtar.toml"));

    // User config directory
    if let Some(config_dir) = dirs::config_dir() {
        paths.push(config_dir.join("rtar").join("config.toml"));
    }

    // Home directory fallback
    if let Some(home_dir) = dirs::home_dir() {
        paths.push(home_dir.join(".rtar").join("config.toml"));
    }

    paths
}

/// Load configuration from standard locations
pub async fn load_config_from_standard_locations() -> Result<RtarConfig> {
    for path in config_paths() {
        if path.exists() {
            return load_config(&path).await;
        }
    }

    // No config found, return default
    Ok(RtarConfig::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn complete_config() -> RtarConfig {
        let mut config = RtarConfig::default();
        config.stream.media_id = 101234567;
        config.stream.v_live_id = "v-self".to_string();
        config.stream.gid = "gid".to_string();
        config.stream.auth = "Bearer token".to_string();
        config.model.api_key = "sk-test".to_string();
        config
    }

    #[test]
    fn test_default_config() {
        let config = RtarConfig::default();
        assert_eq!(config.bot.context_length, 20);
        assert_eq!(config.adb.chunk_max_length, 90);
        assert_eq!(
            config.connection.reconnect_delays,
            vec![2.0, 4.0, 8.0, 16.0, 32.0]
        );
        assert_eq!(
            config.connection.permanent_close_codes,
            vec![ROOM_NOT_OPEN]
        );
        assert_eq!(ROOM_NOT_OPEN, 4003);
        assert_eq!(config.adb.device_address(), "127.0.0.1:5555");
    }

    #[test]
    fn test_config_serialization() {
        let config = RtarConfig::default();
        let toml = toml::to_string_pretty(&config).unwrap();
        assert!(toml.contains("[bot]"));
        assert!(toml.contains("[stream]"));
        assert!(toml.contains("[connection]"));
    }

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: RtarConfig = toml::from_str(
            r#"
            [bot]
            response_rate = 0.5

            [adb]
            port = 5556
            "#,
        )
        .unwrap();
        assert_eq!(config.bot.response_rate, 0.5);
        assert_eq!(config.bot.context_length, 20);
        assert_eq!(config.adb.device_address(), "127.0.0.1:5556");
        assert_eq!(config.performance.max_workers, 4);
    }

    #[test]
    fn test_missing_required_keys() {
        let config = RtarConfig::default();
        let missing = config.missing_required();
        assert!(missing.contains(&"stream.media_id"));
        assert!(missing.contains(&"model.api_key"));
        assert!(config.validate().is_err());

        assert!(complete_config().validate().is_ok());
    }

    #[test]
    fn test_response_rate_out_of_range() {
        let mut config = complete_config();
        config.bot.response_rate = 1.5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_non_finite_seconds_rejected() {
        let config: RtarConfig = toml::from_str(
            r#"
            [performance]
            response_timeout_secs = inf
            "#,
        )
        .unwrap();
        let mut config = RtarConfig {
            performance: config.performance,
            ..complete_config()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("performance.response_timeout_secs"));
        // Conversion saturates instead of panicking
        assert_eq!(config.performance.response_timeout(), Duration::MAX);

        config.performance.response_timeout_secs = 30.0;
        config.adb.send_delay_max = f64::NAN;
        assert!(config.validate().is_err());

        config.adb.send_delay_max = 3.0;
        config.adb.step_pause = -0.5;
        assert!(config.validate().is_err());

        config.adb.step_pause = 0.3;
        config.connection.reconnect_delays = vec![2.0, f64::INFINITY];
        assert!(config.validate().is_err());

        config.connection.reconnect_delays = vec![2.0];
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_secs_never_panics() {
        assert_eq!(secs(1.5), Duration::from_millis(1500));
        assert_eq!(secs(-1.0), Duration::ZERO);
        assert_eq!(secs(f64::NAN), Duration::ZERO);
        assert_eq!(secs(f64::INFINITY), Duration::MAX);
    }

    #[tokio::test]
    async fn test_save_and_load_resolves_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("rtar.toml");

        let config = complete_config();
        save_config(&config, &path).await.unwrap();

        let loaded = load_config(&path).await.unwrap();
        assert_eq!(loaded.stream.media_id, 101234567);
        assert_eq!(
            loaded.paths.blocklist,
            dir.path().join("nested").join("filter_list.json")
        );
    }
}
