//! Upstream TTN Session
//!
//! Holds the subscription on the TTN handler for the lifetime of the bridge.

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS, SubAck,
    SubscribeReasonCode,
};
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use super::{InboundMessage, MessageSource, SessionError};
use crate::config::UpstreamBrokerConfig;

/// First delay after a lost connection
const INITIAL_BACKOFF: Duration = Duration::from_secs(1);

/// Time allowed to flush DISCONNECT on close
const CLOSE_GRACE: Duration = Duration::from_millis(250);

/// Largest uplink document accepted from the handler
const MAX_PACKET_SIZE: usize = 256 * 1024;

/// Request channel capacity between client and event loop
const REQUEST_CAPACITY: usize = 10;

/// Subscription on the TTN handler
pub struct UpstreamSession {
    config: UpstreamBrokerConfig,
    client: AsyncClient,
    eventloop: EventLoop,
    /// Messages delivered while the initial SUBACK was outstanding
    pending: VecDeque<InboundMessage>,
    backoff: Duration,
    closing: bool,
}

impl UpstreamSession {
    /// Connect to the handler and subscribe at QoS 0.
    ///
    /// Neither step is retried: a failure here is a startup failure.
    pub async fn connect(config: &UpstreamBrokerConfig) -> Result<Self, SessionError> {
        let (client, eventloop) = AsyncClient::new(Self::mqtt_options(config), REQUEST_CAPACITY);

        let mut session = Self {
            config: config.clone(),
            client,
            eventloop,
            pending: VecDeque::new(),
            backoff: INITIAL_BACKOFF,
            closing: false,
        };

        info!("Upstream: Opening {}", config.broker_url());

        timeout(config.connect_timeout, session.await_connack())
            .await
            .map_err(|_| {
                SessionError::Connect(format!("no CONNACK within {:?}", config.connect_timeout))
            })??;

        info!("Upstream: Connected to {}", config.broker_url());

        session.subscribe().await?;
        timeout(config.connect_timeout, session.await_suback())
            .await
            .map_err(|_| {
                SessionError::Subscribe(format!("no SUBACK within {:?}", config.connect_timeout))
            })??;

        info!("Upstream: Subscribed to '{}'", config.topic);

        Ok(session)
    }

    fn mqtt_options(config: &UpstreamBrokerConfig) -> MqttOptions {
        let mut options =
            MqttOptions::new(config.client_id.clone(), config.handler_host(), config.port);
        options.set_credentials(config.app_id.clone(), config.app_key.clone());
        options.set_clean_session(config.clean_session);
        options.set_keep_alive(config.keep_alive);
        options.set_max_packet_size(MAX_PACKET_SIZE, MAX_PACKET_SIZE);
        options
    }

    async fn await_connack(&mut self) -> Result<(), SessionError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    debug!(
                        "Upstream: CONNACK received (session_present={})",
                        connack.session_present
                    );
                    return Ok(());
                }
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(SessionError::Rejected(format!("{:?}", code)));
                }
                Err(e) => return Err(SessionError::Connect(e.to_string())),
            }
        }
    }

    async fn await_suback(&mut self) -> Result<(), SessionError> {
        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::SubAck(suback))) => return check_suback(&suback),
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    // A persistent session may deliver queued uplinks first
                    self.pending.push_back(InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                    });
                }
                Ok(_) => {}
                Err(e) => return Err(SessionError::Subscribe(e.to_string())),
            }
        }
    }

    async fn subscribe(&mut self) -> Result<(), SessionError> {
        self.client
            .subscribe(self.config.topic.clone(), QoS::AtMostOnce)
            .await
            .map_err(|e| SessionError::Subscribe(e.to_string()))
    }

    /// Queue a subscription from inside the event loop without waiting
    fn resubscribe(&self) -> Result<(), SessionError> {
        self.client
            .try_subscribe(self.config.topic.clone(), QoS::AtMostOnce)
            .map_err(|e| SessionError::Subscribe(e.to_string()))
    }
}

fn check_suback(suback: &SubAck) -> Result<(), SessionError> {
    if suback
        .return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
    {
        return Err(SessionError::Subscribe(format!(
            "SUBACK refused (pkid={})",
            suback.pkid
        )));
    }
    Ok(())
}

#[async_trait]
impl MessageSource for UpstreamSession {
    async fn next_message(&mut self) -> Result<Option<InboundMessage>, SessionError> {
        if let Some(message) = self.pending.pop_front() {
            return Ok(Some(message));
        }

        loop {
            match self.eventloop.poll().await {
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    debug!(
                        "Upstream: PUBLISH on '{}' ({} bytes)",
                        publish.topic,
                        publish.payload.len()
                    );
                    return Ok(Some(InboundMessage {
                        topic: publish.topic,
                        payload: publish.payload,
                    }));
                }
                Ok(Event::Incoming(Packet::ConnAck(connack))) => {
                    info!(
                        "Upstream: Reconnected to {} (session_present={})",
                        self.config.broker_url(),
                        connack.session_present
                    );
                    self.backoff = INITIAL_BACKOFF;
                    if !connack.session_present {
                        debug!("Upstream: Session lost, re-subscribing to '{}'", self.config.topic);
                        self.resubscribe()?;
                    }
                }
                Ok(Event::Incoming(Packet::SubAck(suback))) => {
                    check_suback(&suback)?;
                    info!("Upstream: Re-subscribed to '{}'", self.config.topic);
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) if self.closing => return Ok(None),
                Ok(_) => {}
                Err(e) => {
                    if self.closing {
                        return Ok(None);
                    }
                    match &e {
                        ConnectionError::ConnectionRefused(code) => {
                            error!("Upstream: Reconnect refused: {:?}", code)
                        }
                        _ => warn!("Upstream: Connection lost: {}", e),
                    }
                    debug!("Upstream: Reconnecting in {:?}", self.backoff);
                    tokio::time::sleep(self.backoff).await;
                    self.backoff = std::cmp::min(self.backoff * 2, self.config.max_reconnect_interval);
                }
            }
        }
    }

    async fn close(&mut self) {
        self.closing = true;
        if let Err(e) = self.client.disconnect().await {
            debug!("Upstream: Disconnect request failed: {}", e);
            return;
        }

        let flushed = timeout(CLOSE_GRACE, async {
            loop {
                match self.eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if flushed.is_err() {
            debug!("Upstream: DISCONNECT not flushed within {:?}", CLOSE_GRACE);
        }
        info!("Upstream: Disconnected from {}", self.config.broker_url());
    }
}
