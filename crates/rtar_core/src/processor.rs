//! Single-consumer processing loop.
//!
//! Comments arrive on a FIFO queue from the connection manager. One task pops
//! them in order, updates the context window, runs the eligibility filter and
//! either delivers a preset inline or waits (bounded) for a generated reply
//! before pulling the next comment.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;

use crate::blocklist::BlockCheck;
use crate::config::RtarConfig;
use crate::context::ContextWindow;
use crate::delivery::DeliveryChannel;
use crate::dispatcher::Dispatcher;
use crate::eligibility::{Decision, EligibilityFilter, ResponseRate};
use crate::message::Message;
use crate::presets::PresetStore;

const QUEUE_POLL: Duration = Duration::from_secs(1);
const STOP_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Queue entry; `Shutdown` unblocks and ends the loop
#[derive(Debug)]
pub enum QueueItem {
    Message(Message),
    Shutdown,
}

/// Producer side of the processing queue
#[derive(Debug, Clone)]
pub struct MessageQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    depth: Arc<AtomicUsize>,
}

/// Consumer side, owned by the processing loop
#[derive(Debug)]
pub struct QueueReceiver {
    rx: mpsc::UnboundedReceiver<QueueItem>,
    depth: Arc<AtomicUsize>,
}

impl MessageQueue {
    pub fn channel() -> (Self, QueueReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tx,
                depth: depth.clone(),
            },
            QueueReceiver { rx, depth },
        )
    }

    /// Enqueue a comment. False if the loop is gone.
    pub fn push(&self, message: Message) -> bool {
        self.depth.fetch_add(1, Ordering::Relaxed);
        if self.tx.send(QueueItem::Message(message)).is_err() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            return false;
        }
        true
    }

    fn shutdown(&self) -> bool {
        self.tx.send(QueueItem::Shutdown).is_ok()
    }

    /// Comments waiting to be processed
    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

impl QueueReceiver {
    pub async fn recv(&mut self) -> Option<QueueItem> {
        let item = self.rx.recv().await;
        if let Some(QueueItem::Message(_)) = item {
            self.depth.fetch_sub(1, Ordering::Relaxed);
        }
        item
    }
}

/// Where a reply came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplySource {
    Preset,
    Generated,
}

impl std::fmt::Display for ReplySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Preset => f.write_str("Preset"),
            Self::Generated => f.write_str("AI"),
        }
    }
}

/// Things worth showing to whoever watches the bot
#[derive(Debug, Clone)]
pub enum ProcessorEvent {
    Received(Message),
    Replied {
        message_id: String,
        source: ReplySource,
        text: String,
        delivered: bool,
    },
    Failed {
        message_id: String,
        error: String,
    },
}

/// Tunables for the processing loop
#[derive(Debug, Clone)]
pub struct ProcessorSettings {
    pub response_rate: f64,
    pub context_length: usize,
    pub history_cutoff_secs: f64,
    pub auto_send: bool,
    pub bot_nickname: String,
}

impl ProcessorSettings {
    pub fn from_config(config: &RtarConfig) -> Self {
        Self {
            response_rate: config.bot.response_rate,
            context_length: config.bot.context_length,
            history_cutoff_secs: config.bot.initial_history_cutoff_secs,
            auto_send: config.adb.auto_send,
            bot_nickname: config.bot.nickname.clone(),
        }
    }
}

/// Collaborators the processor is wired to
pub struct ProcessorParts {
    pub queue: MessageQueue,
    pub receiver: QueueReceiver,
    /// Epoch time of the current stream connection
    pub connected_at: watch::Receiver<Option<f64>>,
    pub blocklist: Arc<dyn BlockCheck>,
    pub presets: Arc<PresetStore>,
    pub dispatcher: Dispatcher,
    pub delivery: Arc<DeliveryChannel>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessorStats {
    pub processed_messages: usize,
    pub context_length: usize,
    pub queue_size: usize,
    pub is_running: bool,
    pub busy_workers: usize,
    pub max_workers: usize,
    pub response_timeout_secs: f64,
    pub response_rate: f64,
    pub auto_send: bool,
}

struct ProcessorInner {
    queue: MessageQueue,
    connected_at: watch::Receiver<Option<f64>>,
    context: Mutex<ContextWindow>,
    filter: Mutex<EligibilityFilter>,
    presets: Arc<PresetStore>,
    response_rate: Arc<ResponseRate>,
    dispatcher: Dispatcher,
    delivery: Arc<DeliveryChannel>,
    auto_send: AtomicBool,
    running: AtomicBool,
    bot_nickname: String,
    events: broadcast::Sender<ProcessorEvent>,
}

pub struct Processor {
    inner: Arc<ProcessorInner>,
    receiver: Mutex<Option<QueueReceiver>>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl std::fmt::Debug for Processor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Processor")
            .field("stats", &self.stats())
            .finish()
    }
}

impl Processor {
    pub fn new(parts: ProcessorParts, settings: ProcessorSettings) -> Self {
        let response_rate = Arc::new(ResponseRate::new(settings.response_rate));
        let filter = EligibilityFilter::new(
            parts.blocklist,
            parts.presets.clone(),
            response_rate.clone(),
            settings.history_cutoff_secs,
        );
        let (events, _) = broadcast::channel(256);

        Self {
            inner: Arc::new(ProcessorInner {
                queue: parts.queue,
                connected_at: parts.connected_at,
                context: Mutex::new(ContextWindow::new(settings.context_length)),
                filter: Mutex::new(filter),
                presets: parts.presets,
                response_rate,
                dispatcher: parts.dispatcher,
                delivery: parts.delivery,
                auto_send: AtomicBool::new(settings.auto_send),
                running: AtomicBool::new(false),
                bot_nickname: settings.bot_nickname,
                events,
            }),
            receiver: Mutex::new(Some(parts.receiver)),
            handle: Mutex::new(None),
        }
    }

    /// Start the processing loop. Only the first call has an effect.
    pub fn start(&self) -> bool {
        let Some(receiver) = self.receiver.lock().take() else {
            return false;
        };
        self.inner.running.store(true, Ordering::SeqCst);
        let inner = self.inner.clone();
        let handle = tokio::spawn(async move { inner.run(receiver).await });
        *self.handle.lock() = Some(handle);
        tracing::info!("Message processor started");
        true
    }

    /// Stop the loop: enqueue the sentinel, wait briefly for the loop to
    /// exit, and close the worker pool without waiting for running jobs.
    pub async fn stop(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
        self.inner.queue.shutdown();

        let handle = self.handle.lock().take();
        if let Some(handle) = handle {
            let abort = handle.abort_handle();
            if tokio::time::timeout(STOP_JOIN_TIMEOUT, handle).await.is_err() {
                tracing::warn!("Processing loop did not stop in time, aborting it");
                abort.abort();
            }
        }

        self.inner.dispatcher.shutdown();
        tracing::info!("Message processor stopped");
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProcessorEvent> {
        self.inner.events.subscribe()
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    pub fn response_rate(&self) -> f64 {
        self.inner.response_rate.get()
    }

    /// Returns the stored (clamped) rate
    pub fn set_response_rate(&self, rate: f64) -> f64 {
        self.inner.response_rate.set(rate)
    }

    pub fn auto_send(&self) -> bool {
        self.inner.auto_send.load(Ordering::SeqCst)
    }

    pub fn set_auto_send(&self, enabled: bool) {
        self.inner.auto_send.store(enabled, Ordering::SeqCst);
    }

    /// Flip auto-send, returning the new value
    pub fn toggle_auto_send(&self) -> bool {
        !self.inner.auto_send.fetch_xor(true, Ordering::SeqCst)
    }

    pub fn presets(&self) -> &Arc<PresetStore> {
        &self.inner.presets
    }

    pub fn delivery(&self) -> &Arc<DeliveryChannel> {
        &self.inner.delivery
    }

    /// Forget processed ids and the context window
    pub fn clear_history(&self) {
        self.inner.context.lock().clear();
        self.inner.filter.lock().clear_history();
    }

    pub fn stats(&self) -> ProcessorStats {
        ProcessorStats {
            processed_messages: self.inner.filter.lock().processed_count(),
            context_length: self.inner.context.lock().len(),
            queue_size: self.inner.queue.depth(),
            is_running: self.is_running(),
            busy_workers: self.inner.dispatcher.busy_workers(),
            max_workers: self.inner.dispatcher.max_workers(),
            response_timeout_secs: self.inner.dispatcher.timeout().as_secs_f64(),
            response_rate: self.response_rate(),
            auto_send: self.auto_send(),
        }
    }
}

impl ProcessorInner {
    async fn run(self: Arc<Self>, mut receiver: QueueReceiver) {
        let mut connected_at = self.connected_at.clone();

        // Nothing is eligible before the first connection
        loop {
            tokio::select! {
                connected = connected_at.wait_for(Option::is_some) => {
                    if connected.is_err() {
                        self.running.store(false, Ordering::SeqCst);
                        return;
                    }
                    break;
                }
                item = receiver.recv() => match item {
                    Some(QueueItem::Message(message)) => {
                        tracing::debug!("Dropping comment {} received before connect", message.id);
                    }
                    Some(QueueItem::Shutdown) | None => {
                        self.running.store(false, Ordering::SeqCst);
                        return;
                    }
                },
            }
        }

        while self.running.load(Ordering::SeqCst) {
            let item = match tokio::time::timeout(QUEUE_POLL, receiver.recv()).await {
                Err(_) => continue,
                Ok(None) | Ok(Some(QueueItem::Shutdown)) => break,
                Ok(Some(QueueItem::Message(message))) => message,
            };

            // Re-read on every message so a reconnect moves the cutoff
            let since = (*connected_at.borrow()).unwrap_or_default();
            self.process(item, since).await;
        }

        self.running.store(false, Ordering::SeqCst);
        tracing::debug!("Processing loop exited");
    }

    async fn process(&self, message: Message, connected_at: f64) {
        if message.is_empty() {
            return;
        }
        tracing::debug!(
            "Processing {} ({}) {}: {}",
            message.id,
            message.class,
            message.sender_name,
            message.text
        );

        let (decision, context) = {
            let mut context = self.context.lock();
            context.push(message.sender_name.clone(), message.text.clone());
            let decision = self
                .filter
                .lock()
                .decide(&message, connected_at, &mut rand::rng());
            let snapshot = (decision == Decision::RespondGenerate).then(|| context.snapshot());
            (decision, snapshot)
        };
        let _ = self.events.send(ProcessorEvent::Received(message.clone()));

        match decision {
            Decision::Skip(reason) => {
                tracing::debug!("Skipping {}: {:?}", message.id, reason);
            }
            Decision::RespondPreset(class) => {
                let reply = class.preset_kind().and_then(|kind| {
                    self.presets
                        .render(kind, &message.sender_name, &mut rand::rng())
                });
                match reply {
                    Some(reply) => self.deliver(reply, &message, ReplySource::Preset).await,
                    None => tracing::debug!("No preset for {} class {}", message.id, class),
                }
            }
            Decision::RespondGenerate => {
                let generated = self
                    .dispatcher
                    .generate(message.clone(), context.unwrap_or_default())
                    .await;
                match generated {
                    Ok(reply) => self.deliver(reply, &message, ReplySource::Generated).await,
                    Err(e) => {
                        tracing::error!("Reply to {} dropped: {}", message.id, e);
                        let _ = self.events.send(ProcessorEvent::Failed {
                            message_id: message.id.clone(),
                            error: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    async fn deliver(&self, reply: String, message: &Message, source: ReplySource) {
        tracing::info!("[{}] {}: {}", source, self.bot_nickname, reply);

        let delivered = if self.auto_send.load(Ordering::SeqCst) {
            match self.delivery.send(&reply).await {
                Ok(()) => true,
                Err(e) => {
                    tracing::error!("Delivery of reply to {} failed: {}", message.id, e);
                    false
                }
            }
        } else {
            tracing::debug!("Auto-send is off, reply to {} not delivered", message.id);
            false
        };

        let _ = self.events.send(ProcessorEvent::Replied {
            message_id: message.id.clone(),
            source,
            text: reply,
            delivered,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageClass;

    fn message(id: &str) -> Message {
        Message {
            id: id.to_string(),
            sender_name: "Alice".to_string(),
            sender_id: None,
            text: "hi".to_string(),
            timestamp: 0.0,
            class: MessageClass::User,
            is_self: false,
        }
    }

    #[tokio::test]
    async fn test_queue_tracks_depth() {
        let (queue, mut receiver) = MessageQueue::channel();
        assert!(queue.push(message("1")));
        assert!(queue.push(message("2")));
        assert_eq!(queue.depth(), 2);

        assert!(matches!(receiver.recv().await, Some(QueueItem::Message(m)) if m.id == "1"));
        assert_eq!(queue.depth(), 1);
    }

    #[tokio::test]
    async fn test_queue_is_fifo_and_shutdown_follows_messages() {
        let (queue, mut receiver) = MessageQueue::channel();
        queue.push(message("a"));
        queue.push(message("b"));
        queue.shutdown();

        let mut seen = Vec::new();
        while let Some(item) = receiver.recv().await {
            match item {
                QueueItem::Message(m) => seen.push(m.id),
                QueueItem::Shutdown => break,
            }
        }
        assert_eq!(seen, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_push_after_receiver_dropped() {
        let (queue, receiver) = MessageQueue::channel();
        drop(receiver);
        assert!(!queue.push(message("1")));
        assert_eq!(queue.depth(), 0);
    }
}
