//! Android Debug Bridge implementation of the actuation bridge.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use tokio::process::Command;

use super::ActuationBridge;
use crate::config::{AdbConfig, ScreenPoint};
use crate::error::{CoreError, Result};

/// Drives a device through the `adb` command-line tool
#[derive(Debug)]
pub struct AdbBridge {
    program: String,
    address: String,
    connected: AtomicBool,
}

impl AdbBridge {
    pub fn new(config: &AdbConfig) -> Self {
        Self {
            program: "adb".to_string(),
            address: config.device_address(),
            connected: AtomicBool::new(false),
        }
    }

    /// Use a different adb executable
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Run `adb <args>` and return trimmed stdout, failing on a non-zero exit
    async fn run(&self, step: &str, args: &[&str]) -> Result<String> {
        tracing::debug!("adb {}", args.join(" "));
        let output = Command::new(&self.program)
            .args(args)
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| CoreError::step_failed(step, &self.address, e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(CoreError::step_failed(
                step,
                &self.address,
                format!("{}: {}", output.status, stderr.trim()),
            ));
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a shell command on this device
    async fn shell(&self, step: &str, command: &[&str]) -> Result<String> {
        let mut args = vec!["-s", self.address.as_str(), "shell"];
        args.extend_from_slice(command);
        self.run(step, &args).await
    }
}

#[async_trait]
impl ActuationBridge for AdbBridge {
    fn address(&self) -> &str {
        &self.address
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn connect(&self) -> Result<()> {
        let output = self.run("connect", &["connect", &self.address]).await;
        let connected = output
            .as_deref()
            .map(|out| {
                let out = out.to_lowercase();
                out.contains("connected to") || out.contains("already connected")
            })
            .unwrap_or(false);
        self.connected.store(connected, Ordering::Relaxed);

        if connected {
            tracing::info!("Device bridge connected: {}", self.address);
            Ok(())
        } else {
            if let Err(e) = output {
                tracing::warn!("adb connect failed: {}", e);
            }
            Err(CoreError::BridgeUnavailable {
                address: self.address.clone(),
            })
        }
    }

    async fn disconnect(&self) -> Result<()> {
        self.connected.store(false, Ordering::Relaxed);
        self.run("disconnect", &["disconnect", &self.address])
            .await
            .map(|_| ())
    }

    async fn test(&self) -> Result<bool> {
        Ok(self.shell("test", &["echo", "test"]).await? == "test")
    }

    async fn device_info(&self) -> Result<String> {
        self.shell("device_info", &["getprop", "ro.product.model"])
            .await
    }

    async fn tap(&self, step: &str, point: ScreenPoint) -> Result<()> {
        let x = point.x.to_string();
        let y = point.y.to_string();
        self.shell(step, &["input", "tap", &x, &y]).await.map(|_| ())
    }

    async fn inject_text(&self, text: &str) -> Result<()> {
        let encoded = BASE64.encode(text.as_bytes());
        self.shell(
            "inject_text",
            &["am", "broadcast", "-a", "ADB_INPUT_B64", "--es", "msg", &encoded],
        )
        .await
        .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bridge(program: &str) -> AdbBridge {
        AdbBridge::new(&AdbConfig::default()).with_program(program)
    }

    #[test]
    fn test_address_from_config() {
        let config = AdbConfig {
            host: "10.0.0.2".to_string(),
            port: 5556,
            ..AdbConfig::default()
        };
        assert_eq!(AdbBridge::new(&config).address(), "10.0.0.2:5556");
    }

    #[tokio::test]
    async fn test_missing_program_fails_step() {
        let bridge = bridge("/nonexistent/adb-for-tests");
        let err = bridge
            .tap("tap_input", ScreenPoint { x: 1, y: 2 })
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::DeliveryStepFailed { ref step, .. } if step == "tap_input"
        ));
    }

    #[tokio::test]
    async fn test_connect_failure_marks_unavailable() {
        let bridge = bridge("/nonexistent/adb-for-tests");
        let err = bridge.connect().await.unwrap_err();
        assert!(matches!(err, CoreError::BridgeUnavailable { .. }));
        assert!(!bridge.is_connected());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_runs_program_with_device_args() {
        // `echo` stands in for adb and prints back its arguments
        let bridge = bridge("echo");
        let out = bridge.shell("test", &["echo", "test"]).await.unwrap();
        assert_eq!(out, "-s 127.0.0.1:5555 shell echo test");
    }
}
