//! Stream connection manager.
//!
//! Owns the long-lived comment stream: opens sessions through a
//! [`Connector`], pushes every normalized comment onto the processing queue,
//! and drives the staged reconnection policy in [`state`] when a session ends.

pub mod state;
pub mod transport;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{oneshot, watch};
use tokio::task::{AbortHandle, JoinHandle};

use crate::error::{CoreError, Result};
use crate::message::{self, now_secs};
use crate::processor::MessageQueue;

pub use state::{
    CloseAction, ConnectionState, ConnectionStatus, ReconnectPolicy, ReconnectStatus,
};
pub use transport::{Connector, Frame, FrameStream, WebSocketConnector, parse_media_id};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(15);
const SESSION_JOIN_TIMEOUT: Duration = Duration::from_secs(3);

struct Session {
    handle: JoinHandle<()>,
    stop: oneshot::Sender<()>,
}

struct ManagerInner {
    state: Mutex<ConnectionState>,
    connector: Arc<dyn Connector>,
    queue: MessageQueue,
    connected_at: watch::Sender<Option<f64>>,
    session: Mutex<Option<Session>>,
    stability_timer: Mutex<Option<AbortHandle>>,
    reconnect_task: Mutex<Option<AbortHandle>>,
    activity_timeout: Duration,
}

/// Handle to the comment stream. Cheap to clone.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<ManagerInner>,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.inner.connector.endpoint())
            .field("status", &self.status())
            .finish()
    }
}

impl ConnectionManager {
    pub fn new(
        connector: Arc<dyn Connector>,
        policy: ReconnectPolicy,
        queue: MessageQueue,
        activity_timeout: Duration,
    ) -> Self {
        let (connected_at, _) = watch::channel(None);
        Self {
            inner: Arc::new(ManagerInner {
                state: Mutex::new(ConnectionState::new(policy)),
                connector,
                queue,
                connected_at,
                session: Mutex::new(None),
                stability_timer: Mutex::new(None),
                reconnect_task: Mutex::new(None),
                activity_timeout,
            }),
        }
    }

    /// Receives the epoch time of every successful connect
    pub fn connected_at(&self) -> watch::Receiver<Option<f64>> {
        self.inner.connected_at.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.inner.state.lock().status()
    }

    pub fn is_connected(&self) -> bool {
        self.inner.state.lock().is_connected()
    }

    /// Connected and heard from within the activity timeout
    pub fn is_healthy(&self) -> bool {
        self.inner
            .state
            .lock()
            .is_healthy(now_secs(), self.inner.activity_timeout)
    }

    /// Seconds since the last inbound frame, if connected
    pub fn idle_secs(&self) -> Option<f64> {
        let state = self.inner.state.lock();
        state
            .is_connected()
            .then(|| now_secs() - state.last_activity())
    }

    pub fn reconnect_status(&self) -> ReconnectStatus {
        self.inner.state.lock().reconnect_status()
    }

    pub fn endpoint(&self) -> String {
        self.inner.connector.endpoint()
    }

    /// Open the stream. A no-op if already connected; refused while a
    /// reconnect owns the connection.
    pub async fn connect(&self) -> Result<()> {
        let epoch = {
            let mut state = self.inner.state.lock();
            if state.is_reconnecting() {
                return Err(CoreError::ReconnectInProgress);
            }
            match state.status() {
                ConnectionStatus::Connected => return Ok(()),
                ConnectionStatus::PermanentlyFailed => {
                    return Err(CoreError::PermanentlyFailed {
                        reason: "auto-reconnect was disabled".to_string(),
                    });
                }
                _ => {}
            }
            state.begin_connect()
        };

        let result = self.open_session(epoch).await;
        if result.is_err() {
            self.inner.state.lock().end_reconnect(false);
        }
        result
    }

    /// Close the stream without reconnecting. Returns false if there was no
    /// session to close.
    pub async fn disconnect(&self) -> bool {
        self.inner.state.lock().on_disconnect();
        if let Some(task) = self.inner.reconnect_task.lock().take() {
            task.abort();
        }
        if let Some(timer) = self.inner.stability_timer.lock().take() {
            timer.abort();
        }
        let closed = self.close_session().await;
        if closed {
            tracing::info!("Comment stream disconnected");
        }
        closed
    }

    /// Manual reconnect. Fails immediately if a reconnect (manual or
    /// automatic) is already running or the attempt budget is spent.
    pub async fn reconnect(&self) -> Result<()> {
        let (attempt, max, epoch) = {
            let mut state = self.inner.state.lock();
            let attempt = state.begin_reconnect()?;
            (attempt, state.policy().max_attempts, state.begin_connect())
        };
        tracing::info!("Attempting reconnect #{}/{}", attempt, max);

        self.close_session().await;
        let result = self.open_session(epoch).await;
        self.inner.state.lock().end_reconnect(result.is_ok());

        match &result {
            Ok(()) => tracing::info!("Reconnected"),
            Err(e) => tracing::warn!("Reconnect attempt #{} failed: {}", attempt, e),
        }
        result
    }

    /// Manual recovery: clears the attempt counter and re-enables auto-reconnect
    pub fn reset_reconnect_state(&self) {
        self.inner.state.lock().reset_reconnect_state();
        if let Some(task) = self.inner.reconnect_task.lock().take() {
            task.abort();
        }
        tracing::info!("Reconnect state reset, auto-reconnect re-enabled");
    }

    async fn open_session(&self, epoch: u64) -> Result<()> {
        let endpoint = self.inner.connector.endpoint();
        let mut stream = tokio::time::timeout(CONNECT_TIMEOUT, self.inner.connector.connect())
            .await
            .map_err(|_| CoreError::connection_msg(&endpoint, "handshake timed out"))??;

        let now = now_secs();
        if !self.inner.state.lock().on_open(epoch, now) {
            // Superseded by a disconnect while the handshake was running
            stream.close().await;
            return Err(CoreError::connection_msg(endpoint, "connection attempt superseded"));
        }

        self.inner.connected_at.send_replace(Some(now));
        tracing::info!("Comment stream connected: {}", endpoint);
        self.arm_stability_timer(epoch);

        let (stop, stopped) = oneshot::channel();
        let manager = self.clone();
        let handle = tokio::spawn(async move { manager.run_session(stream, epoch, stopped).await });

        let previous = self.inner.session.lock().replace(Session { handle, stop });
        if let Some(previous) = previous {
            previous.handle.abort();
        }
        Ok(())
    }

    async fn close_session(&self) -> bool {
        let Some(session) = self.inner.session.lock().take() else {
            return false;
        };
        let _ = session.stop.send(());
        let abort = session.handle.abort_handle();
        if tokio::time::timeout(SESSION_JOIN_TIMEOUT, session.handle)
            .await
            .is_err()
        {
            abort.abort();
        }
        true
    }

    fn arm_stability_timer(&self, epoch: u64) {
        let threshold = self.inner.state.lock().policy().stable_threshold;
        let manager = self.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(threshold).await;
            let cleared = manager.inner.state.lock().on_stable(epoch);
            if let Some(previous) = cleared.filter(|p| *p > 0) {
                tracing::info!(
                    "Connection stable for {:?}, reset reconnect attempts (was {})",
                    threshold,
                    previous
                );
            }
        });

        let previous = self
            .inner
            .stability_timer
            .lock()
            .replace(handle.abort_handle());
        if let Some(previous) = previous {
            previous.abort();
        }
    }

    async fn run_session(
        self,
        mut stream: Box<dyn FrameStream>,
        epoch: u64,
        mut stopped: oneshot::Receiver<()>,
    ) {
        let (code, reason) = loop {
            let frame = tokio::select! {
                frame = stream.next_frame() => Some(frame),
                _ = &mut stopped => None,
            };
            let Some(frame) = frame else {
                stream.close().await;
                return;
            };

            match frame {
                Some(Frame::Text(text)) => {
                    self.inner.state.lock().on_activity(now_secs());
                    self.handle_text(&text);
                }
                Some(Frame::Heartbeat) => self.inner.state.lock().on_activity(now_secs()),
                Some(Frame::Closed { code, reason }) => break (code, reason),
                None => break (None, "stream ended".to_string()),
            }
        };

        self.handle_close(epoch, code, reason);
    }

    fn handle_text(&self, text: &str) {
        match message::normalize(text) {
            Ok(msg) if msg.is_empty() => {
                tracing::debug!("Dropping empty comment {}", msg.id);
            }
            Ok(msg) => {
                tracing::debug!("Received comment {} from {}", msg.id, msg.sender_name);
                if !self.inner.queue.push(msg) {
                    tracing::debug!("Processing queue closed, comment dropped");
                }
            }
            Err(e) => {
                tracing::warn!("Dropping malformed frame: {}", e);
            }
        }
    }

    fn handle_close(&self, epoch: u64, code: Option<u16>, reason: String) {
        let action = {
            let mut state = self.inner.state.lock();
            if state.epoch() != epoch {
                return;
            }
            state.on_close(code, now_secs())
        };
        tracing::info!("Comment stream closed: {:?} {}", code, reason);
        self.follow(action);
    }

    fn follow(&self, action: CloseAction) {
        match action {
            CloseAction::Reconnect { delay, attempt } => {
                let manager = self.clone();
                let handle =
                    tokio::spawn(async move { manager.auto_reconnect(delay, attempt).await });
                let previous = self
                    .inner
                    .reconnect_task
                    .lock()
                    .replace(handle.abort_handle());
                if let Some(previous) = previous {
                    previous.abort();
                }
            }
            CloseAction::GiveUp { reason } => {
                tracing::warn!("Auto-reconnect stopped: {}", reason);
            }
        }
    }

    async fn auto_reconnect(self, mut delay: Duration, mut attempt: u32) {
        loop {
            tracing::info!(
                "Waiting {:?} before reconnect attempt #{}",
                delay,
                attempt
            );
            tokio::time::sleep(delay).await;

            let epoch = {
                let mut state = self.inner.state.lock();
                if !state.is_reconnecting() {
                    return;
                }
                state.begin_connect()
            };

            match self.open_session(epoch).await {
                Ok(()) => {
                    self.inner.state.lock().end_reconnect(true);
                    tracing::info!("Reconnected after {} attempt(s)", attempt);
                    return;
                }
                Err(e) => {
                    tracing::warn!("Reconnect attempt #{} failed: {}", attempt, e);
                    let action = {
                        let mut state = self.inner.state.lock();
                        if state.epoch() != epoch {
                            return;
                        }
                        state.on_connect_failed()
                    };
                    match action {
                        CloseAction::Reconnect {
                            delay: next_delay,
                            attempt: next_attempt,
                        } => {
                            delay = next_delay;
                            attempt = next_attempt;
                        }
                        CloseAction::GiveUp { reason } => {
                            tracing::warn!("Auto-reconnect stopped: {}", reason);
                            return;
                        }
                    }
                }
            }
        }
    }
}
