//! Rate-limited, chunked reply delivery through the actuation bridge.

pub mod adb;
pub mod chunk;

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;

use crate::config::{AdbConfig, ScreenPoint, secs};
use crate::error::{CoreError, Result};

pub use adb::AdbBridge;
pub use chunk::split_chunks;

/// Device control channel used to physically post a reply
#[async_trait]
pub trait ActuationBridge: Send + Sync + Debug {
    /// `host:port` of the device
    fn address(&self) -> &str;

    fn is_connected(&self) -> bool;

    async fn connect(&self) -> Result<()>;

    async fn disconnect(&self) -> Result<()>;

    /// Round-trip check against the device
    async fn test(&self) -> Result<bool>;

    /// Device model name
    async fn device_info(&self) -> Result<String>;

    /// Tap a screen coordinate. `step` names the action in errors.
    async fn tap(&self, step: &str, point: ScreenPoint) -> Result<()>;

    /// Type `text` into the focused field
    async fn inject_text(&self, text: &str) -> Result<()>;
}

/// Pacing and layout for delivery, taken from `[adb]`
#[derive(Debug, Clone)]
pub struct DeliverySettings {
    pub input_box: ScreenPoint,
    pub send_button: ScreenPoint,
    pub send_delay: (f64, f64),
    pub chunk_jitter: (f64, f64),
    pub step_pause: Duration,
    pub chunk_max_length: usize,
}

impl DeliverySettings {
    pub fn from_config(config: &AdbConfig) -> Self {
        Self {
            input_box: config.input_box,
            send_button: config.send_button,
            send_delay: (config.send_delay_min, config.send_delay_max),
            chunk_jitter: (config.chunk_jitter_min, config.chunk_jitter_max),
            step_pause: secs(config.step_pause),
            chunk_max_length: config.chunk_max_length,
        }
    }
}

/// Uniform draw from `[min, max]` seconds
fn random_delay((min, max): (f64, f64)) -> Duration {
    let min = min.max(0.0);
    if max > min && max.is_finite() {
        secs(rand::rng().random_range(min..=max))
    } else {
        secs(min)
    }
}

#[derive(Debug)]
pub struct DeliveryChannel {
    bridge: Arc<dyn ActuationBridge>,
    settings: DeliverySettings,
    /// One transmission at a time; taps from two replies must not interleave
    sending: tokio::sync::Mutex<()>,
}

impl DeliveryChannel {
    pub fn new(bridge: Arc<dyn ActuationBridge>, settings: DeliverySettings) -> Self {
        Self {
            bridge,
            settings,
            sending: tokio::sync::Mutex::new(()),
        }
    }

    pub fn bridge(&self) -> &Arc<dyn ActuationBridge> {
        &self.bridge
    }

    /// Deliver `text` to the device.
    ///
    /// Reconnects the bridge once if needed, waits a random pre-send delay,
    /// then transmits, chunked when the text is longer than the chunk limit.
    /// The first failed step aborts the remaining parts.
    pub async fn send(&self, text: &str) -> Result<()> {
        let text = text.trim();
        if text.is_empty() {
            return Err(CoreError::EmptyPayload);
        }

        let _sending = self.sending.lock().await;

        if !self.bridge.is_connected() {
            tracing::info!("Device bridge not connected, reconnecting");
            self.bridge
                .connect()
                .await
                .map_err(|_| CoreError::BridgeUnavailable {
                    address: self.bridge.address().to_string(),
                })?;
        }

        tokio::time::sleep(random_delay(self.settings.send_delay)).await;

        if text.chars().count() <= self.settings.chunk_max_length {
            return self.transmit(text).await;
        }

        let parts = split_chunks(text, self.settings.chunk_max_length);
        let total = parts.len();
        for (index, part) in parts.iter().enumerate() {
            tokio::time::sleep(random_delay(self.settings.chunk_jitter)).await;
            if let Err(e) = self.transmit(part).await {
                tracing::error!("Part {}/{} failed, dropping the rest", index + 1, total);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Focus the input, inject the text, press send
    async fn transmit(&self, text: &str) -> Result<()> {
        self.bridge.tap("tap_input", self.settings.input_box).await?;
        tokio::time::sleep(self.settings.step_pause).await;
        self.bridge.inject_text(text).await?;
        tokio::time::sleep(self.settings.step_pause).await;
        self.bridge.tap("tap_send", self.settings.send_button).await
    }
}
