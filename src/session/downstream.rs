//! Downstream Publishing Session
//!
//! Each message gets its own connection: connect, publish, wait for the
//! acknowledgement that matches the QoS, then disconnect with a short grace
//! period. Publishes are serialised, so two messages never hold a connection
//! with the same client ID at once. `PublishTimeout` covers the whole call,
//! including the wait for the writer lock.

use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{AsyncClient, ConnectionError, Event, EventLoop, MqttOptions, Outgoing, Packet, QoS};
use tokio::sync::Mutex;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, info, warn};

use super::{Publisher, SessionError};
use crate::config::DownstreamBrokerConfig;
use crate::republish::OutboundMessage;

/// Request channel capacity between client and event loop
const REQUEST_CAPACITY: usize = 10;

/// Per-message publisher for the downstream broker
pub struct DownstreamSession {
    config: DownstreamBrokerConfig,
    /// Single-writer lock: one connection per client ID at a time
    writer: Mutex<()>,
}

impl DownstreamSession {
    pub fn new(config: DownstreamBrokerConfig) -> Self {
        Self {
            config,
            writer: Mutex::new(()),
        }
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut options = MqttOptions::new(
            self.config.client_id.clone(),
            self.config.host.clone(),
            self.config.port,
        );
        options.set_clean_session(self.config.clean_session);
        options.set_keep_alive(self.config.keep_alive);
        options
    }

    async fn await_connack(eventloop: &mut EventLoop) -> Result<(), SessionError> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                Ok(_) => {}
                Err(ConnectionError::ConnectionRefused(code)) => {
                    return Err(SessionError::Rejected(format!("{:?}", code)));
                }
                Err(e) => return Err(SessionError::Connect(e.to_string())),
            }
        }
    }

    /// Wait until the publish is complete for its QoS: written (0),
    /// PUBACK (1) or PUBCOMP (2). A dropped connection is re-established
    /// after `ReconnectDelay`; the caller's deadline bounds the whole wait.
    async fn await_delivery(
        eventloop: &mut EventLoop,
        qos: QoS,
        reconnect_delay: Duration,
    ) -> Result<(), SessionError> {
        loop {
            match eventloop.poll().await {
                Ok(Event::Outgoing(Outgoing::Publish(pkid))) if qos == QoS::AtMostOnce => {
                    debug!("Downstream: PUBLISH written (pkid={})", pkid);
                    return Ok(());
                }
                Ok(Event::Incoming(Packet::PubAck(puback))) if qos == QoS::AtLeastOnce => {
                    debug!("Downstream: PUBACK received (pkid={})", puback.pkid);
                    return Ok(());
                }
                Ok(Event::Incoming(Packet::PubComp(pubcomp))) if qos == QoS::ExactlyOnce => {
                    debug!("Downstream: PUBCOMP received (pkid={})", pubcomp.pkid);
                    return Ok(());
                }
                Ok(Event::Incoming(Packet::ConnAck(_))) => {
                    info!("Downstream: Reconnected");
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(
                        "Downstream: Connection lost: {}, reconnecting in {:?}",
                        e, reconnect_delay
                    );
                    tokio::time::sleep(reconnect_delay).await;
                }
            }
        }
    }

    async fn disconnect(client: &AsyncClient, eventloop: &mut EventLoop, grace: Duration) {
        if let Err(e) = client.disconnect().await {
            debug!("Downstream: Disconnect request failed: {}", e);
            return;
        }

        let flushed = timeout(grace, async {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Outgoing(Outgoing::Disconnect)) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;

        if flushed.is_err() {
            debug!("Downstream: DISCONNECT not flushed within {:?}", grace);
        }
    }
}

#[async_trait]
impl Publisher for DownstreamSession {
    async fn publish(&self, message: &OutboundMessage) -> Result<(), SessionError> {
        let deadline = Instant::now() + self.config.publish_timeout;

        // Time spent queued behind other publishes counts against the deadline
        let _writer = timeout_at(deadline, self.writer.lock())
            .await
            .map_err(|_| SessionError::Timeout("downstream connection"))?;

        let (client, mut eventloop) = AsyncClient::new(self.mqtt_options(), REQUEST_CAPACITY);

        // Nothing to tear down when the connection never came up
        timeout_at(deadline, Self::await_connack(&mut eventloop))
            .await
            .map_err(|_| {
                SessionError::Connect(format!(
                    "no CONNACK within {:?}",
                    self.config.publish_timeout
                ))
            })??;

        info!("Downstream: Connected to {}", self.config.broker_url());

        let qos = self.config.qos();
        let result = match client
            .publish(
                message.topic.clone(),
                qos,
                self.config.retain(),
                message.payload.to_vec(),
            )
            .await
        {
            Ok(()) => timeout_at(
                deadline,
                Self::await_delivery(&mut eventloop, qos, self.config.reconnect_delay),
            )
            .await
            .unwrap_or(Err(SessionError::Timeout("publish acknowledgement"))),
            Err(e) => Err(SessionError::Publish(e.to_string())),
        };

        Self::disconnect(&client, &mut eventloop, self.config.disconnect_grace).await;
        debug!("Downstream: Disconnected from {}", self.config.broker_url());

        result
    }
}
