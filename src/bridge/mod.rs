//! Bridge Orchestrator
//!
//! Wires the pipeline together: every uplink delivered by the upstream
//! session is decoded, given a downstream topic, encoded and published.
//!
//! # Lifecycle
//!
//! `Idle → Connected → Running → ShuttingDown → Terminated`
//!
//! - Startup failures (upstream connect, subscribe) go straight to
//!   `Terminated` and are returned as fatal errors.
//! - Per-message failures (decode, topic, encode, downstream connect,
//!   publish) are logged and drop that message only.
//! - At most `MaxInFlight` messages are handled at once. Uplinks arriving
//!   while every slot is taken are dropped, never queued.
//! - On shutdown, in-flight messages get `DrainTimeout` to finish before
//!   they are abandoned and the upstream session is released.

mod error;
mod stats;


use std::future::Future;
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::BridgeConfig;
use crate::republish::OutboundMessage;
use crate::session::{
    DownstreamSession, InboundMessage, MessageSource, Publisher, UpstreamSession,
};
use crate::topic::TopicResolver;
use crate::uplink::UplinkMessage;

pub use error::BridgeError;
pub use stats::{BridgeStats, StatsSnapshot};

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeState {
    /// Configuration loaded, no connections open
    Idle,
    /// Upstream connected and subscribed
    Connected,
    /// Forwarding messages
    Running,
    /// Shutdown signal observed, draining
    ShuttingDown,
    /// Upstream released
    Terminated,
}

/// Per-message pipeline, shared with every handler task
struct Pipeline {
    resolver: TopicResolver,
    publisher: Arc<dyn Publisher>,
    broker_url: String,
    client_id: String,
    stats: BridgeStats,
}

impl Pipeline {
    async fn process(&self, message: &InboundMessage) -> Result<OutboundMessage, BridgeError> {
        let uplink = UplinkMessage::decode(&message.payload)?;
        debug!(
            "Uplink from {}/{} (counter={}, port={}, gateways={})",
            uplink.app_id,
            uplink.dev_id,
            uplink.counter,
            uplink.port,
            uplink.metadata.gateways.len()
        );

        let topic = self.resolver.resolve(&uplink.app_id, &uplink.dev_id)?;
        let outbound = OutboundMessage::temperature(topic, &uplink)?;

        info!(
            "Forwarding {}/{}: broker={} client_id={} topic={} temperature={}",
            uplink.app_id,
            uplink.dev_id,
            self.broker_url,
            self.client_id,
            outbound.topic,
            uplink.temperature()
        );

        self.publisher
            .publish(&outbound)
            .await
            .map_err(BridgeError::from_publish)?;

        Ok(outbound)
    }

    async fn handle(&self, message: InboundMessage) {
        match self.process(&message).await {
            Ok(outbound) => {
                self.stats.record_published();
                info!("Published {} to '{}'", outbound.payload_str(), outbound.topic);
            }
            Err(e) => {
                self.stats.record_failed();
                warn!("Dropped message from '{}': {}", message.topic, e);
            }
        }
    }
}

/// The bridge between the TTN handler and the downstream broker
pub struct Bridge {
    config: Arc<BridgeConfig>,
    pipeline: Arc<Pipeline>,
    state: RwLock<BridgeState>,
}

impl Bridge {
    /// Create a bridge publishing through a per-message downstream session
    pub fn new(config: Arc<BridgeConfig>) -> Self {
        let publisher = Arc::new(DownstreamSession::new(config.broker.clone()));
        Self::with_publisher(config, publisher)
    }

    /// Create a bridge publishing through the given publisher
    pub fn with_publisher(config: Arc<BridgeConfig>, publisher: Arc<dyn Publisher>) -> Self {
        let pipeline = Pipeline {
            resolver: TopicResolver::from_config(&config.broker),
            publisher,
            broker_url: config.broker.broker_url(),
            client_id: config.broker.client_id.clone(),
            stats: BridgeStats::default(),
        };

        Self {
            config,
            pipeline: Arc::new(pipeline),
            state: RwLock::new(BridgeState::Idle),
        }
    }

    /// Current state
    pub fn state(&self) -> BridgeState {
        *self.state.read()
    }

    /// Message counters
    pub fn stats(&self) -> StatsSnapshot {
        self.pipeline.stats.snapshot()
    }

    fn set_state(&self, state: BridgeState) {
        let previous = std::mem::replace(&mut *self.state.write(), state);
        debug!("Bridge state: {:?} -> {:?}", previous, state);
    }

    /// Run one message through decode, topic, encode and publish.
    ///
    /// Failures are returned and never affect other messages.
    pub async fn handle_message(
        &self,
        message: &InboundMessage,
    ) -> Result<OutboundMessage, BridgeError> {
        self.pipeline.process(message).await
    }

    /// Connect upstream and forward messages until `shutdown` resolves.
    ///
    /// Returns an error only for fatal failures: the initial connect, the
    /// initial subscribe, or losing the subscription for good.
    pub async fn start<F>(&self, shutdown: F) -> Result<StatsSnapshot, BridgeError>
    where
        F: Future<Output = ()> + Send,
    {
        let source = match UpstreamSession::connect(&self.config.ttn).await {
            Ok(source) => source,
            Err(e) => {
                self.set_state(BridgeState::Terminated);
                return Err(BridgeError::from_upstream(e));
            }
        };
        self.set_state(BridgeState::Connected);

        self.run(source, shutdown).await
    }

    /// Forward messages from `source` until `shutdown` resolves or the
    /// source closes.
    pub async fn run<S, F>(&self, mut source: S, shutdown: F) -> Result<StatsSnapshot, BridgeError>
    where
        S: MessageSource,
        F: Future<Output = ()> + Send,
    {
        self.set_state(BridgeState::Running);
        info!("Bridge running");

        let mut handlers = JoinSet::new();
        let slots = Arc::new(Semaphore::new(self.config.max_in_flight));
        tokio::pin!(shutdown);

        let outcome = loop {
            // Reap finished handlers so the set does not grow unbounded
            while let Some(joined) = handlers.try_join_next() {
                log_join(joined);
            }

            tokio::select! {
                biased;

                _ = &mut shutdown => {
                    info!("Shutdown signal received");
                    break Ok(());
                }
                next = source.next_message() => match next {
                    Ok(Some(message)) => {
                        self.pipeline.stats.record_received();
                        match Arc::clone(&slots).try_acquire_owned() {
                            Ok(permit) => {
                                let pipeline = Arc::clone(&self.pipeline);
                                handlers.spawn(async move {
                                    pipeline.handle(message).await;
                                    drop(permit);
                                });
                            }
                            Err(_) => {
                                self.pipeline.stats.record_dropped();
                                warn!(
                                    "Dropped message from '{}': {} messages already in flight",
                                    message.topic, self.config.max_in_flight
                                );
                            }
                        }
                    }
                    Ok(None) => {
                        info!("Upstream closed");
                        break Ok(());
                    }
                    Err(e) => {
                        error!("Upstream subscription lost: {}", e);
                        break Err(BridgeError::from_upstream(e));
                    }
                }
            }
        };

        self.set_state(BridgeState::ShuttingDown);
        self.drain(&mut handlers).await;
        source.close().await;
        self.set_state(BridgeState::Terminated);

        let stats = self.stats();
        info!(
            "Bridge stopped: received={} published={} failed={} dropped={}",
            stats.received, stats.published, stats.failed, stats.dropped
        );

        outcome.map(|()| stats)
    }

    /// Wait up to `DrainTimeout` for in-flight handlers, then abort the rest
    async fn drain(&self, handlers: &mut JoinSet<()>) {
        if handlers.is_empty() {
            return;
        }

        debug!("Draining {} in-flight messages", handlers.len());
        let drained = timeout(self.config.drain_timeout, async {
            while let Some(joined) = handlers.join_next().await {
                log_join(joined);
            }
        })
        .await;

        if drained.is_err() {
            warn!(
                "Abandoning {} in-flight messages after {:?}",
                handlers.len(),
                self.config.drain_timeout
            );
            handlers.abort_all();
        }
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        if e.is_panic() {
            error!("Message handler panicked: {}", e);
        }
    }
}
