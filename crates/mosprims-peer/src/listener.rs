//! Server role: accept NCS connections and answer them.
//!
//! [`respond`] decides the reply to one incoming document and is free of IO.
//! [`MosListener`] drives it over TCP, one task per accepted connection.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::{SinkExt, StreamExt};
use mosprims_frame::{FrameConfig, FramedUnit, MosCodec, XmlElement};
use mosprims_model::{Envelope, IncomingMessage, MosAck, MosMessage, PortType};
use mosprims_transport::{MosStream, MosTcpListener};
use tokio::task::JoinSet;
use tokio_util::codec::{FramedRead, FramedWrite};
use tracing::{debug, info, warn};

use crate::config::ListenerConfig;
use crate::error::Result;

/// Answers messages the listener does not handle itself.
///
/// Return the reply payload, or `None` to send a NACK.
pub trait MessageHandler: Send + Sync + 'static {
    fn handle(&self, message: &IncomingMessage) -> Option<XmlElement>;
}

impl<F> MessageHandler for F
where
    F: Fn(&IncomingMessage) -> Option<XmlElement> + Send + Sync + 'static,
{
    fn handle(&self, message: &IncomingMessage) -> Option<XmlElement> {
        self(message)
    }
}

/// Reply document for `message`, or `None` when nothing should be sent.
///
/// Messages addressed to another MOS id, or from an NCS not in
/// `config.ncs_ids`, get a NACK that echoes their envelope. Heartbeats and
/// machine info requests are answered here; everything else goes to
/// `handler`.
pub fn respond(
    config: &ListenerConfig,
    message: &IncomingMessage,
    handler: Option<&dyn MessageHandler>,
) -> Option<String> {
    let Some(message_id) = message.message_id else {
        warn!(kind = ?message.kind(), "message without messageID, not answering");
        return None;
    };
    let ncs_id = message.ncs_id.clone().unwrap_or_default();
    let mos_id = message.mos_id.clone().unwrap_or_default();

    let wrong_mos = mos_id != config.mos_id;
    let unknown_ncs = !config.ncs_ids.is_empty() && !config.ncs_ids.contains(&ncs_id);
    if wrong_mos || unknown_ncs {
        let envelope = Envelope {
            ncs_id,
            mos_id,
            message_id,
        };
        let reason = if wrong_mos { "Unknown mosID" } else { "Unknown ncsID" };
        warn!(mos_id = %envelope.mos_id, ncs_id = %envelope.ncs_id, "{reason}");
        return Some(nack(reason).to_xml(&envelope));
    }

    let envelope = Envelope {
        ncs_id,
        mos_id: config.mos_id.clone(),
        message_id,
    };
    let reply = match message.kind() {
        Some("heartbeat") => MosMessage::heartbeat(PortType::Lower),
        Some("reqMachInfo") => match &config.machine_info {
            Some(info) => MosMessage::ListMachInfo(info.clone()),
            None => nack("Machine info not available"),
        },
        Some(kind) => match handler.and_then(|h| h.handle(message)) {
            Some(payload) => MosMessage::Custom {
                port: PortType::Lower,
                payload,
            },
            None => {
                debug!(kind, "no handler reply");
                nack("Unsupported message")
            }
        },
        None => nack("Missing payload"),
    };
    Some(reply.to_xml(&envelope))
}

fn nack(description: &str) -> MosMessage {
    MosMessage::Ack {
        port: PortType::Lower,
        ack: MosAck::nack(description),
    }
}

/// TCP server answering NCS requests.
pub struct MosListener {
    listener: MosTcpListener,
    config: Arc<ListenerConfig>,
    handler: Option<Arc<dyn MessageHandler>>,
}

impl std::fmt::Debug for MosListener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MosListener")
            .field("local_addr", &self.listener.local_addr())
            .field("mos_id", &self.config.mos_id)
            .field("handler", &self.handler.is_some())
            .finish()
    }
}

impl MosListener {
    pub async fn bind(addr: &str, config: ListenerConfig) -> Result<Self> {
        let listener = MosTcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            config: Arc::new(config),
            handler: None,
        })
    }

    pub fn with_handler(mut self, handler: impl MessageHandler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.listener.local_addr()
    }

    /// Accept and serve connections until `shutdown` resolves.
    pub async fn run(self, shutdown: impl Future<Output = ()>) -> Result<()> {
        tokio::pin!(shutdown);
        let mut sessions = JoinSet::new();
        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => {
                        info!(%peer, "NCS connected");
                        sessions.spawn(serve(stream, peer, self.config.clone(), self.handler.clone()));
                    }
                    Err(err) => warn!(error = %err, "accept failed"),
                },
                Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            }
        }
        info!("listener shutting down");
        sessions.shutdown().await;
        Ok(())
    }
}

async fn serve(
    stream: MosStream,
    peer: SocketAddr,
    config: Arc<ListenerConfig>,
    handler: Option<Arc<dyn MessageHandler>>,
) {
    let frame = FrameConfig {
        max_document_chars: config.max_document_chars,
    };
    let (read, write) = stream.into_split();
    let mut reader = FramedRead::new(read, MosCodec::with_config(frame.clone()));
    let mut writer = FramedWrite::new(write, MosCodec::with_config(frame));

    while let Some(unit) = reader.next().await {
        let document = match unit {
            Ok(FramedUnit::Document(document)) => document,
            Ok(FramedUnit::Malformed { raw, error }) => {
                warn!(%peer, %error, raw = %raw, "dropping malformed document");
                continue;
            }
            Err(err) => {
                warn!(%peer, error = %err, "read failed");
                break;
            }
        };
        let message = match IncomingMessage::decode(document) {
            Ok(message) => message,
            Err(err) => {
                warn!(%peer, error = %err, "not a MOS message");
                continue;
            }
        };
        let Some(reply) = respond(&config, &message, handler.as_deref()) else {
            continue;
        };
        if let Err(err) = writer.send(reply).await {
            warn!(%peer, error = %err, "write failed");
            break;
        }
    }
    info!(%peer, "NCS disconnected");
}
