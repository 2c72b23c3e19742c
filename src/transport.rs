use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, Mutex};
use tracing::warn;

use crate::error::{EngineError, EngineResult};

pub const DECISION_PREFIX: &str = "pago";

/// Media payloads the gateway can attach to an inbound message. Stickers and
/// audio are carried so the dispatcher can ignore them explicitly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Image,
    Video,
    Document,
    Sticker,
    Audio,
}

impl MediaKind {
    pub fn is_proof_candidate(self) -> bool {
        matches!(self, MediaKind::Image | MediaKind::Video | MediaKind::Document)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum MessageKind {
    Text {
        body: String,
    },
    Media {
        media: MediaKind,
        /// Opaque handle the gateway resolves to raw bytes on request.
        media_ref: String,
        caption: Option<String>,
        file_name: Option<String>,
        mime_type: Option<String>,
    },
    /// A tapped decision button; `data` is the packed decision payload the
    /// approval request carried.
    Decision {
        data: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub sender: String,
    pub chat: String,
    #[serde(default)]
    pub is_group: bool,
    pub sender_name: Option<String>,
    #[serde(flatten)]
    pub kind: MessageKind,
}

impl InboundMessage {
    pub fn text(&self) -> Option<&str> {
        match &self.kind {
            MessageKind::Text { body } => Some(body.as_str()),
            _ => None,
        }
    }

    pub fn display_name(&self) -> &str {
        self.sender_name.as_deref().unwrap_or("Desconocido")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Reject,
}

/// One named decision action on an approval request. `correlation` is the
/// originating sender's identifier; it is the only durable link back to the
/// pending submission once the admin answers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DecisionButton {
    pub label: String,
    pub data: String,
}

pub fn decision_data(decision: Decision, correlation: &str, proof_ref: &str) -> String {
    let tag = match decision {
        Decision::Accept => "acc",
        Decision::Reject => "rej",
    };
    format!("{DECISION_PREFIX}:{tag}:{correlation}:{proof_ref}")
}

pub fn parse_decision_data(data: &str) -> Option<(Decision, String, String)> {
    let parts: Vec<&str> = data.splitn(4, ':').collect();
    if parts.len() != 4 || parts[0] != DECISION_PREFIX {
        return None;
    }
    let decision = match parts[1] {
        "acc" => Decision::Accept,
        "rej" => Decision::Reject,
        _ => return None,
    };
    Some((decision, parts[2].to_string(), parts[3].to_string()))
}

pub fn decision_buttons(correlation: &str, proof_ref: &str) -> Vec<DecisionButton> {
    vec![
        DecisionButton {
            label: "✅ Aceptar transferencia".to_string(),
            data: decision_data(Decision::Accept, correlation, proof_ref),
        },
        DecisionButton {
            label: "❌ Rechazar transferencia".to_string(),
            data: decision_data(Decision::Reject, correlation, proof_ref),
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundMedia {
    pub media: MediaKind,
    #[serde(with = "bytes_b64")]
    pub bytes: Vec<u8>,
    pub caption: String,
    pub file_name: Option<String>,
    pub mime_type: Option<String>,
    #[serde(default)]
    pub buttons: Vec<DecisionButton>,
}

mod bytes_b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(data: &[u8], ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&STANDARD.encode(data))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(de: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(de)?;
        STANDARD.decode(&s).map_err(serde::de::Error::custom)
    }
}

/// Narrow seam to the chat socket owned by an external gateway process.
/// Everything the engine emits or retrieves goes through here.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send_text(&self, to: &str, text: &str) -> EngineResult<()>;
    async fn send_media(&self, to: &str, media: OutboundMedia) -> EngineResult<()>;
    async fn fetch_media(&self, media_ref: &str) -> EngineResult<Vec<u8>>;
}

/// Log-and-continue send, mirroring how the event handlers treat transport
/// failures: the affected send is lost, the event keeps being handled.
pub async fn send_text_logged(transport: &dyn Transport, ctx: &str, to: &str, text: &str) -> bool {
    match transport.send_text(to, text).await {
        Ok(()) => true,
        Err(e) => {
            warn!("send_text failed ({ctx}) to {to}: {e}");
            false
        }
    }
}

pub async fn send_media_logged(
    transport: &dyn Transport,
    ctx: &str,
    to: &str,
    media: OutboundMedia,
) -> bool {
    match transport.send_media(to, media).await {
        Ok(()) => true,
        Err(e) => {
            warn!("send_media failed ({ctx}) to {to}: {e}");
            false
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "frame")]
enum OutboundFrame<'a> {
    Text { to: &'a str, body: &'a str },
    Media { to: &'a str, media: &'a OutboundMedia },
}

/// Reference transport: line-delimited JSON frames exchanged with the
/// gateway sidecar over stdio, media bytes over its local HTTP endpoint.
/// The socket protocol itself lives entirely in the sidecar.
pub struct JsonLineGateway {
    stdout: Mutex<tokio::io::Stdout>,
    http: reqwest::Client,
    base_url: String,
}

impl JsonLineGateway {
    pub fn new(base_url: String) -> Self {
        Self {
            stdout: Mutex::new(tokio::io::stdout()),
            http: reqwest::Client::new(),
            base_url,
        }
    }

    async fn write_frame(&self, frame: OutboundFrame<'_>) -> EngineResult<()> {
        let mut line = serde_json::to_vec(&frame)
            .map_err(|e| EngineError::Transport(format!("encode frame: {e}")))?;
        line.push(b'\n');
        let mut out = self.stdout.lock().await;
        out.write_all(&line)
            .await
            .map_err(|e| EngineError::Transport(format!("write frame: {e}")))?;
        out.flush()
            .await
            .map_err(|e| EngineError::Transport(format!("flush frame: {e}")))?;
        Ok(())
    }
}

#[async_trait]
impl Transport for JsonLineGateway {
    async fn send_text(&self, to: &str, text: &str) -> EngineResult<()> {
        self.write_frame(OutboundFrame::Text { to, body: text }).await
    }

    async fn send_media(&self, to: &str, media: OutboundMedia) -> EngineResult<()> {
        self.write_frame(OutboundFrame::Media { to, media: &media }).await
    }

    async fn fetch_media(&self, media_ref: &str) -> EngineResult<Vec<u8>> {
        let url = format!("{}/media/{}", self.base_url.trim_end_matches('/'), media_ref);
        let resp = self.http.get(&url).send().await?;
        if !resp.status().is_success() {
            return Err(EngineError::Transport(format!(
                "media fetch {url}: status {}",
                resp.status()
            )));
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Feed inbound frames from stdin into the dispatch loop. Unparseable lines
/// are logged and skipped; EOF ends intake.
pub async fn read_gateway_events(tx: mpsc::Sender<InboundMessage>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<InboundMessage>(line) {
                    Ok(msg) => {
                        if tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("unparseable gateway frame: {e}"),
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!("gateway stdin read failed: {e}");
                break;
            }
        }
    }
}
