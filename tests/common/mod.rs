//! Minimal in-process MQTT 3.1.1 broker for integration tests.
//!
//! Understands just enough of the protocol to stand in for either side of
//! the bridge: CONNECT, SUBSCRIBE, PUBLISH (QoS 0-2), PINGREQ, DISCONNECT.
//! Publishes it receives are reported on a channel; uplinks are pushed to
//! subscribers with [`FakeBroker::deliver`]. [`FakeBroker::drop_connections`]
//! closes every open connection to force clients to reconnect.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::timeout;

/// CONNACK return code: accepted
pub const CONNACK_ACCEPTED: u8 = 0x00;
/// CONNACK return code: not authorized
pub const CONNACK_NOT_AUTHORIZED: u8 = 0x05;
/// SUBACK return code: granted QoS 0
pub const SUBACK_QOS0: u8 = 0x00;
/// SUBACK return code: failure
pub const SUBACK_FAILURE: u8 = 0x80;

/// A PUBLISH received from a client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedPublish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: u8,
    pub retain: bool,
}

impl ReceivedPublish {
    pub fn payload_str(&self) -> &str {
        std::str::from_utf8(&self.payload).unwrap()
    }
}

struct Shared {
    connack_code: u8,
    suback_code: u8,
    subscribers: Mutex<Vec<mpsc::UnboundedSender<Vec<u8>>>>,
    subscribed: Notify,
    subscribe_count: AtomicUsize,
    kick: broadcast::Sender<()>,
    published: mpsc::UnboundedSender<ReceivedPublish>,
}

pub struct FakeBroker {
    pub addr: SocketAddr,
    shared: Arc<Shared>,
    published: mpsc::UnboundedReceiver<ReceivedPublish>,
}

impl FakeBroker {
    /// Broker that accepts every connection and subscription
    pub async fn start() -> Self {
        Self::with_codes(CONNACK_ACCEPTED, SUBACK_QOS0).await
    }

    /// Broker answering with the given CONNACK and SUBACK return codes
    pub async fn with_codes(connack_code: u8, suback_code: u8) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (published_tx, published) = mpsc::unbounded_channel();

        let shared = Arc::new(Shared {
            connack_code,
            suback_code,
            subscribers: Mutex::new(Vec::new()),
            subscribed: Notify::new(),
            subscribe_count: AtomicUsize::new(0),
            kick: broadcast::channel(1).0,
            published: published_tx,
        });

        let accept_shared = shared.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, accept_shared.clone()));
            }
        });

        Self {
            addr,
            shared,
            published,
        }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    /// Wait until a client holds a granted subscription
    pub async fn wait_subscribed(&self) {
        timeout(Duration::from_secs(5), self.shared.subscribed.notified())
            .await
            .expect("no subscription within 5s");
    }

    /// Number of SUBSCRIBE packets received so far
    pub fn subscribe_count(&self) -> usize {
        self.shared.subscribe_count.load(Ordering::SeqCst)
    }

    /// Close every open client connection
    pub fn drop_connections(&self) {
        let _ = self.shared.kick.send(());
    }

    /// Send a QoS 0 PUBLISH to every subscriber
    pub fn deliver(&self, topic: &str, payload: &[u8]) {
        let frame = encode_publish(topic, payload);
        self.shared
            .subscribers
            .lock()
            .retain(|tx| tx.send(frame.clone()).is_ok());
    }

    /// Next PUBLISH received from a client
    pub async fn next_publish(&mut self) -> ReceivedPublish {
        timeout(Duration::from_secs(5), self.published.recv())
            .await
            .expect("no publish within 5s")
            .expect("broker stopped")
    }

    /// Assert nothing else is published within `wait`
    pub async fn assert_no_publish(&mut self, wait: Duration) {
        if let Ok(Some(publish)) = timeout(wait, self.published.recv()).await {
            panic!("unexpected publish: {:?}", publish);
        }
    }
}

/// Address nothing listens on
pub async fn unused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Listener that accepts connections and never answers
pub async fn silent_listener() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });
    port
}

async fn serve(stream: TcpStream, shared: Arc<Shared>) {
    let (mut reader, mut writer) = stream.into_split();
    let mut kick = shared.kick.subscribe();
    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();

    let write_task = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            if writer.write_all(&frame).await.is_err() {
                break;
            }
        }
    });

    loop {
        let (header, body) = tokio::select! {
            packet = read_packet(&mut reader) => match packet {
                Some(packet) => packet,
                None => break,
            },
            _ = kick.recv() => break,
        };

        match header >> 4 {
            // CONNECT
            1 => {
                let _ = tx.send(vec![0x20, 0x02, 0x00, shared.connack_code]);
                if shared.connack_code != CONNACK_ACCEPTED {
                    break;
                }
            }
            // PUBLISH
            3 => {
                let qos = (header >> 1) & 0x03;
                let retain = header & 0x01 == 1;
                let topic_len = u16::from_be_bytes([body[0], body[1]]) as usize;
                let topic = String::from_utf8(body[2..2 + topic_len].to_vec()).unwrap();
                let mut offset = 2 + topic_len;
                if qos > 0 {
                    let (hi, lo) = (body[offset], body[offset + 1]);
                    offset += 2;
                    match qos {
                        1 => {
                            let _ = tx.send(vec![0x40, 0x02, hi, lo]);
                        }
                        _ => {
                            let _ = tx.send(vec![0x50, 0x02, hi, lo]);
                        }
                    }
                }
                let _ = shared.published.send(ReceivedPublish {
                    topic,
                    payload: Bytes::copy_from_slice(&body[offset..]),
                    qos,
                    retain,
                });
            }
            // PUBREL
            6 => {
                let _ = tx.send(vec![0x70, 0x02, body[0], body[1]]);
            }
            // SUBSCRIBE
            8 => {
                shared.subscribe_count.fetch_add(1, Ordering::SeqCst);
                let _ = tx.send(vec![0x90, 0x03, body[0], body[1], shared.suback_code]);
                if shared.suback_code != SUBACK_FAILURE {
                    shared.subscribers.lock().push(tx.clone());
                    shared.subscribed.notify_one();
                }
            }
            // PINGREQ
            12 => {
                let _ = tx.send(vec![0xD0, 0x00]);
            }
            // DISCONNECT
            14 => break,
            _ => {}
        }
    }

    shared
        .subscribers
        .lock()
        .retain(|subscriber| !subscriber.same_channel(&tx));
    drop(tx);
    let _ = write_task.await;
}

async fn read_packet<R: AsyncRead + Unpin>(reader: &mut R) -> Option<(u8, Vec<u8>)> {
    let header = reader.read_u8().await.ok()?;

    let mut remaining = 0usize;
    let mut shift = 0;
    loop {
        let byte = reader.read_u8().await.ok()?;
        remaining |= ((byte & 0x7F) as usize) << shift;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }

    let mut body = vec![0u8; remaining];
    reader.read_exact(&mut body).await.ok()?;
    Some((header, body))
}

fn encode_publish(topic: &str, payload: &[u8]) -> Vec<u8> {
    let mut frame = vec![0x30];
    let mut remaining = 2 + topic.len() + payload.len();
    loop {
        let mut byte = (remaining % 128) as u8;
        remaining /= 128;
        if remaining > 0 {
            byte |= 0x80;
        }
        frame.push(byte);
        if remaining == 0 {
            break;
        }
    }
    frame.extend_from_slice(&(topic.len() as u16).to_be_bytes());
    frame.extend_from_slice(topic.as_bytes());
    frame.extend_from_slice(payload);
    frame
}
