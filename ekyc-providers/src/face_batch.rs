use anyhow::{Context, anyhow};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceBatchConfig {
    pub ws_url: Url,
    pub connect_timeout: Duration,
    pub reply_timeout: Duration,
}

impl FaceBatchConfig {
    pub fn new(ws_url: Url) -> Self {
        Self {
            ws_url,
            connect_timeout: Duration::from_secs(10),
            reply_timeout: Duration::from_secs(30),
        }
    }
}

/// One batch comparison outcome from the face-matching service.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchReply {
    pub same_person: Option<bool>,
    pub similarity: Option<f64>,
    pub confidence: Option<f64>,
    pub status: String,
    pub message: Option<String>,
    pub bbox: Option<Vec<f64>>,
}

impl MatchReply {
    /// Definitive success: the service must both agree on identity and
    /// clear the similarity floor.
    pub fn is_successful(&self) -> bool {
        self.status == "success"
            && self.same_person == Some(true)
            && self.similarity.map(|s| s > 0.5).unwrap_or(false)
    }
}

/// Performs one reference-vs-probe comparison over a short-lived websocket:
/// connect, send both images, read a single reply, close.
pub async fn compare_images(
    cfg: &FaceBatchConfig,
    id_card_b64: &str,
    probe_b64: &str,
) -> anyhow::Result<MatchReply> {
    let (ws, _resp) = tokio::time::timeout(
        cfg.connect_timeout,
        tokio_tungstenite::connect_async(cfg.ws_url.as_str()),
    )
    .await
    .map_err(|_| anyhow!("face match connect timed out"))?
    .context("connect face match websocket")?;

    let (mut write, mut read) = ws.split();

    let payload = json!({
        "id_card_image": id_card_b64,
        "selfie_image": probe_b64,
    });
    write
        .send(Message::Text(payload.to_string().into()))
        .await
        .context("send comparison payload")?;

    let reply = tokio::time::timeout(cfg.reply_timeout, async {
        while let Some(msg) = read.next().await {
            match msg.context("read face match reply")? {
                Message::Text(t) => return parse_match_reply(&t),
                Message::Binary(b) => {
                    return parse_match_reply(&String::from_utf8_lossy(&b));
                }
                Message::Close(_) => {
                    return Err(anyhow!("face match connection closed before reply"));
                }
                _ => continue,
            }
        }
        Err(anyhow!("face match connection ended without reply"))
    })
    .await
    .map_err(|_| anyhow!("face match reply timed out"))??;

    let _ = write.send(Message::Close(None)).await;
    Ok(reply)
}

pub fn encode_image_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn parse_match_reply(s: &str) -> anyhow::Result<MatchReply> {
    let v: Value = serde_json::from_str(s).context("decode face match JSON")?;

    let bbox = v.get("bbox").and_then(|b| b.as_array()).map(|items| {
        items.iter().filter_map(|i| i.as_f64()).collect::<Vec<f64>>()
    });

    Ok(MatchReply {
        same_person: v.get("same_person").and_then(|b| b.as_bool()),
        similarity: v.get("similarity").and_then(|f| f.as_f64()),
        confidence: v.get("confidence").and_then(|f| f.as_f64()),
        status: v
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("success")
            .to_string(),
        message: v
            .get("message")
            .or_else(|| v.get("msg"))
            .and_then(|m| m.as_str())
            .map(String::from),
        bbox,
    })
}
