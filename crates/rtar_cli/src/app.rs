//! Wires the core components together from a loaded configuration.

use std::path::PathBuf;
use std::sync::Arc;

use miette::Result;
use rtar_core::generation::load_character;
use rtar_core::{
    ActuationBridge, AdbBridge, Blocklist, ConnectionManager, DeliveryChannel, DeliverySettings,
    Dispatcher, MessageQueue, OpenAiCompatGenerator, PresetStore, Processor, ProcessorParts,
    ProcessorSettings, ReconnectPolicy, RtarConfig, WebSocketConnector,
};
use tracing::{info, warn};

use crate::logging::LogControl;

/// Everything the console talks to
pub struct App {
    pub config: RtarConfig,
    pub config_path: Option<PathBuf>,
    pub stream: ConnectionManager,
    pub processor: Processor,
    pub blocklist: Arc<Blocklist>,
    pub bridge: Arc<dyn ActuationBridge>,
    pub logging: LogControl,
}

impl App {
    pub async fn build(
        config: RtarConfig,
        config_path: Option<PathBuf>,
        logging: LogControl,
    ) -> Result<Self> {
        let blocklist = Arc::new(Blocklist::open(&config.paths.blocklist)?);
        if config.bot.block_self
            && !config.stream.v_live_id.is_empty()
            && blocklist.block(&config.stream.v_live_id)?
        {
            info!("Added own id {} to the blocklist", config.stream.v_live_id);
        }

        let presets = Arc::new(PresetStore::load_or_create(&config.paths.presets).await?);
        let persona = load_character(config.model.character_path.as_deref()).await;
        let generator = Arc::new(OpenAiCompatGenerator::new(
            &config.model,
            &config.bot,
            persona,
        ));
        let dispatcher = Dispatcher::new(
            generator,
            config.performance.max_workers,
            config.performance.response_timeout(),
        );

        let bridge: Arc<dyn ActuationBridge> = Arc::new(AdbBridge::new(&config.adb));
        let delivery = Arc::new(DeliveryChannel::new(
            bridge.clone(),
            DeliverySettings::from_config(&config.adb),
        ));

        let (queue, receiver) = MessageQueue::channel();
        let stream = ConnectionManager::new(
            Arc::new(WebSocketConnector::new(&config.stream)),
            ReconnectPolicy::from_config(&config.connection),
            queue.clone(),
            config.health.activity_timeout(),
        );

        let processor = Processor::new(
            ProcessorParts {
                queue,
                receiver,
                connected_at: stream.connected_at(),
                blocklist: blocklist.clone(),
                presets,
                dispatcher,
                delivery,
            },
            ProcessorSettings::from_config(&config),
        );

        Ok(Self {
            config,
            config_path,
            stream,
            processor,
            blocklist,
            bridge,
            logging,
        })
    }

    /// Start processing, bring up the device bridge and open the stream.
    ///
    /// Bridge and stream failures are reported but leave the console usable
    /// so they can be retried with `/adbtest` and `/reconnect`.
    pub async fn start(&self) {
        self.processor.start();

        if self.processor.auto_send() {
            if let Err(e) = self.bridge.connect().await {
                warn!("Device bridge not ready: {}", e);
            }
        }

        match self.stream.connect().await {
            Ok(()) => info!("Listening on {}", self.stream.endpoint()),
            Err(e) => warn!("Could not open the comment stream: {}", e),
        }
    }

    /// Stop the processor, then close the stream and the bridge
    pub async fn shutdown(&self) {
        info!("Shutting down");
        self.processor.stop().await;
        self.stream.disconnect().await;
        if self.bridge.is_connected() {
            if let Err(e) = self.bridge.disconnect().await {
                warn!("Device bridge disconnect failed: {}", e);
            }
        }
    }
}
