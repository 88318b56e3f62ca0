//! Reconnection state machine for the comment stream.
//!
//! Everything here is synchronous and takes the current time as an argument;
//! the async manager in the parent module owns the clock, the timers and the
//! transport.

use std::time::Duration;

use serde::Serialize;

use crate::config::{ConnectionConfig, secs};
use crate::error::{CoreError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    PermanentlyFailed,
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::PermanentlyFailed => "permanently failed",
        };
        f.write_str(name)
    }
}

/// Reconnect tuning, taken from `[connection]`
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    pub delays: Vec<Duration>,
    pub max_attempts: u32,
    pub stable_threshold: Duration,
    pub permanent_codes: Vec<u16>,
}

impl ReconnectPolicy {
    pub fn from_config(config: &ConnectionConfig) -> Self {
        Self {
            delays: config
                .reconnect_delays
                .iter()
                .map(|d| secs(*d))
                .collect(),
            max_attempts: config.max_reconnect_attempts,
            stable_threshold: secs(config.stable_threshold_secs),
            permanent_codes: config.permanent_close_codes.clone(),
        }
    }

    /// Delay for the given attempt count, clamped to the last entry
    pub fn delay_for(&self, attempts: u32) -> Duration {
        let Some(last) = self.delays.len().checked_sub(1) else {
            return Duration::ZERO;
        };
        self.delays[(attempts as usize).min(last)]
    }

    pub fn is_permanent(&self, code: Option<u16>) -> bool {
        code.is_some_and(|c| self.permanent_codes.contains(&c))
    }
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&ConnectionConfig::default())
    }
}

/// What the manager should do after a connection ended
#[derive(Debug, Clone, PartialEq)]
pub enum CloseAction {
    /// Sleep for `delay`, then try attempt number `attempt`
    Reconnect { delay: Duration, attempt: u32 },
    /// Auto-reconnect is off until a manual reset
    GiveUp { reason: String },
}

/// Snapshot for status displays
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconnectStatus {
    pub state: ConnectionStatus,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub auto_reconnect_enabled: bool,
    pub is_reconnecting: bool,
    pub is_connected: bool,
}

#[derive(Debug, Clone)]
pub struct ConnectionState {
    status: ConnectionStatus,
    connected_at: Option<f64>,
    last_activity: f64,
    reconnect_attempts: u32,
    auto_reconnect: bool,
    is_reconnecting: bool,
    /// Bumped on every connection attempt and explicit disconnect. Timers and
    /// sessions carry the epoch they were started under and are ignored once
    /// it moves on.
    epoch: u64,
    policy: ReconnectPolicy,
}

impl ConnectionState {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            status: ConnectionStatus::Disconnected,
            connected_at: None,
            last_activity: 0.0,
            reconnect_attempts: 0,
            auto_reconnect: true,
            is_reconnecting: false,
            epoch: 0,
            policy,
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn is_connected(&self) -> bool {
        self.status == ConnectionStatus::Connected
    }

    pub fn connected_at(&self) -> Option<f64> {
        self.connected_at
    }

    pub fn last_activity(&self) -> f64 {
        self.last_activity
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    pub fn auto_reconnect_enabled(&self) -> bool {
        self.auto_reconnect
    }

    pub fn is_reconnecting(&self) -> bool {
        self.is_reconnecting
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn policy(&self) -> &ReconnectPolicy {
        &self.policy
    }

    /// Start a connection attempt, returning its epoch
    pub fn begin_connect(&mut self) -> u64 {
        self.epoch += 1;
        self.status = ConnectionStatus::Connecting;
        self.epoch
    }

    /// Handshake succeeded for the attempt started under `epoch`
    pub fn on_open(&mut self, epoch: u64, now: f64) -> bool {
        if epoch != self.epoch {
            return false;
        }
        self.status = ConnectionStatus::Connected;
        self.connected_at = Some(now);
        self.last_activity = now;
        true
    }

    /// Any inbound frame, heartbeats included
    pub fn on_activity(&mut self, now: f64) {
        self.last_activity = now;
    }

    /// Stability timer fired. Resets the attempt budget if the connection it
    /// was armed for is still up. Returns the attempt count that was cleared.
    pub fn on_stable(&mut self, epoch: u64) -> Option<u32> {
        if epoch != self.epoch || !self.is_connected() {
            return None;
        }
        let previous = self.reconnect_attempts;
        self.reconnect_attempts = 0;
        self.auto_reconnect = true;
        Some(previous)
    }

    /// An established connection closed without us asking for it
    pub fn on_close(&mut self, code: Option<u16>, now: f64) -> CloseAction {
        if self.policy.is_permanent(code) {
            return self.give_up(format!("server closed with permanent code {}", code.unwrap_or(0)));
        }

        if let Some(connected_at) = self.connected_at {
            let lasted = now - connected_at;
            if lasted < self.policy.stable_threshold.as_secs_f64() {
                tracing::warn!(
                    "Connection lasted only {:.1}s, counting an extra reconnect attempt",
                    lasted
                );
                self.reconnect_attempts += 1;
            }
        }

        self.schedule_reconnect()
    }

    /// A connection attempt failed before the handshake completed
    pub fn on_connect_failed(&mut self) -> CloseAction {
        self.schedule_reconnect()
    }

    fn schedule_reconnect(&mut self) -> CloseAction {
        if !self.auto_reconnect {
            return self.give_up("auto-reconnect is disabled".to_string());
        }
        if self.reconnect_attempts >= self.policy.max_attempts {
            return self.give_up(format!(
                "reached {} reconnect attempts",
                self.policy.max_attempts
            ));
        }

        let delay = self.policy.delay_for(self.reconnect_attempts);
        self.reconnect_attempts += 1;
        self.status = ConnectionStatus::Reconnecting;
        self.is_reconnecting = true;
        CloseAction::Reconnect {
            delay,
            attempt: self.reconnect_attempts,
        }
    }

    fn give_up(&mut self, reason: String) -> CloseAction {
        self.status = ConnectionStatus::PermanentlyFailed;
        self.auto_reconnect = false;
        self.is_reconnecting = false;
        CloseAction::GiveUp { reason }
    }

    /// Manual reconnect request. Single-flight: fails fast if one is already
    /// running or the attempt budget is spent.
    pub fn begin_reconnect(&mut self) -> Result<u32> {
        if self.is_reconnecting {
            return Err(CoreError::ReconnectInProgress);
        }
        if self.reconnect_attempts >= self.policy.max_attempts {
            self.give_up(format!(
                "reached {} reconnect attempts",
                self.policy.max_attempts
            ));
            return Err(CoreError::ReconnectExhausted {
                max_attempts: self.policy.max_attempts,
            });
        }
        self.is_reconnecting = true;
        self.reconnect_attempts += 1;
        self.status = ConnectionStatus::Reconnecting;
        Ok(self.reconnect_attempts)
    }

    /// Clears the in-flight flag after an attempt finished either way
    pub fn end_reconnect(&mut self, succeeded: bool) {
        self.is_reconnecting = false;
        if !succeeded && self.reconnect_attempts >= self.policy.max_attempts {
            self.give_up(format!(
                "reached {} reconnect attempts",
                self.policy.max_attempts
            ));
        } else if !succeeded && self.status != ConnectionStatus::PermanentlyFailed {
            self.status = ConnectionStatus::Disconnected;
        }
    }

    /// Explicit disconnect. Invalidates the running session and timers.
    pub fn on_disconnect(&mut self) {
        self.epoch += 1;
        if self.status != ConnectionStatus::PermanentlyFailed {
            self.status = ConnectionStatus::Disconnected;
        }
        self.is_reconnecting = false;
    }

    /// Manual recovery, including from `PermanentlyFailed`
    pub fn reset_reconnect_state(&mut self) {
        self.reconnect_attempts = 0;
        self.auto_reconnect = true;
        self.is_reconnecting = false;
        if self.status == ConnectionStatus::PermanentlyFailed {
            self.status = ConnectionStatus::Disconnected;
        }
    }

    pub fn is_healthy(&self, now: f64, activity_timeout: Duration) -> bool {
        self.is_connected() && now - self.last_activity <= activity_timeout.as_secs_f64()
    }

    pub fn reconnect_status(&self) -> ReconnectStatus {
        ReconnectStatus {
            state: self.status,
            reconnect_attempts: self.reconnect_attempts,
            max_reconnect_attempts: self.policy.max_attempts,
            auto_reconnect_enabled: self.auto_reconnect,
            is_reconnecting: self.is_reconnecting,
            is_connected: self.is_connected(),
        }
    }
}
