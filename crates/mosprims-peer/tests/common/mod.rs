//! Loopback MOS peer for session tests.
//!
//! Speaks the real wire format (UTF-16BE XML via `MosCodec`) and answers each
//! received message with whatever the test script returns.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mosprims_frame::{MosCodec, XmlElement};
use mosprims_model::{Envelope, IncomingMessage, MosAck, MosMessage, PortType};
use mosprims_peer::{ClientConfig, MessageIdSequence};
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::codec::Framed;

type Script = Arc<dyn Fn(&IncomingMessage) -> Option<String> + Send + Sync>;

pub struct MockPeer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<IncomingMessage>>>,
    task: JoinHandle<()>,
}

impl MockPeer {
    pub async fn start(script: impl Fn(&IncomingMessage) -> Option<String> + Send + Sync + 'static) -> Self {
        Self::start_on("127.0.0.1:0".parse().unwrap(), script).await
    }

    pub async fn start_on(
        addr: SocketAddr,
        script: impl Fn(&IncomingMessage) -> Option<String> + Send + Sync + 'static,
    ) -> Self {
        let listener = TcpListener::bind(addr).await.expect("mock peer should bind");
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let script: Script = Arc::new(script);
        let log = received.clone();
        let task = tokio::spawn(async move {
            let mut sessions = JoinSet::new();
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                let script = script.clone();
                let log = log.clone();
                sessions.spawn(async move {
                    let mut framed = Framed::new(stream, MosCodec::new());
                    while let Some(Ok(unit)) = framed.next().await {
                        let Some(document) = unit.into_document() else {
                            continue;
                        };
                        let Ok(message) = IncomingMessage::decode(document) else {
                            continue;
                        };
                        let reply = script(&message);
                        log.lock().unwrap().push(message);
                        if let Some(reply) = reply {
                            if framed.send(reply).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });
        Self { addr, received, task }
    }

    pub fn port(&self) -> u16 {
        self.addr.port()
    }

    pub fn received(&self) -> Vec<IncomingMessage> {
        self.received.lock().unwrap().clone()
    }

    /// Received messages other than heartbeats.
    pub fn commands(&self) -> Vec<IncomingMessage> {
        self.received().into_iter().filter(|m| !m.is_heartbeat()).collect()
    }

    pub fn count(&self, kind: &str) -> usize {
        self.received().iter().filter(|m| m.kind() == Some(kind)).count()
    }

    /// Close the listener and every accepted connection.
    pub async fn stop(self) -> SocketAddr {
        self.task.abort();
        let _ = self.task.await;
        self.addr
    }
}

/// Reply document carrying `payload` with the same envelope as `message`.
pub fn reply_with(message: &IncomingMessage, payload: MosMessage) -> String {
    let envelope = Envelope {
        ncs_id: message.ncs_id.clone().unwrap_or_default(),
        mos_id: message.mos_id.clone().unwrap_or_default(),
        message_id: message.message_id.expect("commands carry a messageID"),
    };
    payload.to_xml(&envelope)
}

/// Heartbeats get a heartbeat, everything else an ACK.
pub fn answer_all(message: &IncomingMessage) -> Option<String> {
    Some(reply_with(message, default_reply(message)))
}

/// Answers heartbeats only.
pub fn heartbeats_only(message: &IncomingMessage) -> Option<String> {
    message
        .is_heartbeat()
        .then(|| reply_with(message, MosMessage::heartbeat(PortType::Lower)))
}

fn default_reply(message: &IncomingMessage) -> MosMessage {
    if message.is_heartbeat() {
        MosMessage::heartbeat(PortType::Lower)
    } else {
        MosMessage::Ack {
            port: PortType::Lower,
            ack: MosAck::ack(),
        }
    }
}

pub fn custom(port: PortType, name: &str) -> MosMessage {
    MosMessage::Custom {
        port,
        payload: XmlElement::new(name),
    }
}

pub fn fast_client() -> ClientConfig {
    ClientConfig {
        command_timeout: Duration::from_millis(300),
        reconnect_delay: Duration::from_millis(50),
        connect_timeout: Duration::from_millis(500),
        ..ClientConfig::default()
    }
}

pub fn sequence() -> MessageIdSequence {
    MessageIdSequence::new()
}

/// Poll `condition` until it holds or `timeout` passes.
pub async fn eventually(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
