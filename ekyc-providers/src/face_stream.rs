use anyhow::{Context, anyhow};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use url::Url;

const WS_SEND_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceStreamConfig {
    pub ws_url: Url,
    pub connect_timeout: Duration,
}

impl FaceStreamConfig {
    pub fn new(ws_url: Url) -> Self {
        Self {
            ws_url,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// One per-frame comparison outcome. Only replies carrying a bounding box
/// become a `FrameResult`; anything else is protocol chatter.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameResult {
    pub same_person: bool,
    pub similarity: f64,
    pub bbox: Vec<f64>,
}

/// Where the reader loop is in the connection lifecycle. The service
/// unconditionally replies to the baseline image with a self-comparison,
/// so the first inbound message is dropped no matter its shape.
enum ReaderPhase {
    AwaitingBaselineAck,
    Streaming,
}

struct StreamShared {
    connected: AtomicBool,
    last_result: Mutex<Option<FrameResult>>,
}

impl StreamShared {
    fn store_result(&self, result: FrameResult) {
        let mut slot = self
            .last_result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        // stop() drops the connected flag before clearing the slot, so
        // checking it under the same lock keeps an in-flight reply from
        // repopulating the slot after it has been cleared.
        if !self.connected.load(Ordering::SeqCst) {
            return;
        }
        *slot = Some(result);
    }

    fn read_result(&self) -> Option<FrameResult> {
        self.last_result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn clear(&self) {
        *self
            .last_result
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }
}

/// Client for one long-lived duplex verification connection.
///
/// Lifecycle is `disconnected -> connected -> disconnected`; there is no
/// reconnect. On transport failure the caller discards this instance and
/// starts a new one.
///
/// The inbound reader runs as a background task; `last_result` and the
/// connected flag are the shared state it writes and callers read, guarded
/// by a mutex and an atomic respectively.
pub struct FaceStreamClient {
    cfg: FaceStreamConfig,
    reference_b64: Option<String>,
    shared: Arc<StreamShared>,
    out_tx: Option<mpsc::Sender<Message>>,
}

impl FaceStreamClient {
    pub fn new(cfg: FaceStreamConfig) -> Self {
        Self {
            cfg,
            reference_b64: None,
            shared: Arc::new(StreamShared {
                connected: AtomicBool::new(false),
                last_result: Mutex::new(None),
            }),
            out_tx: None,
        }
    }

    /// Downloads and encodes the baseline ID photo.
    pub async fn load_reference(&mut self, reference_image_url: &str) -> anyhow::Result<()> {
        let bytes = crate::runtime::fetch_image(reference_image_url)
            .await
            .context("fetch reference image")?;
        self.reference_b64 = Some(base64::engine::general_purpose::STANDARD.encode(bytes));
        Ok(())
    }

    pub fn set_reference_base64(&mut self, reference_b64: impl Into<String>) {
        self.reference_b64 = Some(reference_b64.into());
    }

    /// Opens the connection and transmits the baseline as the first message.
    /// Returns once the connection is established (bounded by the connect
    /// timeout) with the reader and writer tasks running.
    pub async fn start(&mut self) -> anyhow::Result<()> {
        let reference = self
            .reference_b64
            .clone()
            .ok_or_else(|| anyhow!("no reference image loaded"))?;

        let (ws, _resp) = tokio::time::timeout(
            self.cfg.connect_timeout,
            tokio_tungstenite::connect_async(self.cfg.ws_url.as_str()),
        )
        .await
        .map_err(|_| anyhow!("face stream connect timed out"))?
        .context("connect face stream websocket")?;

        let (ws_write, mut ws_read) = ws.split();

        self.shared.clear();
        self.shared.connected.store(true, Ordering::SeqCst);

        let (out_tx, mut out_rx) = mpsc::channel::<Message>(64);

        // Baseline goes through the same channel as frames, so it is
        // guaranteed to be the first thing on the wire.
        out_tx
            .try_send(Message::Text(reference.into()))
            .map_err(|_| anyhow!("failed to queue baseline image"))?;

        // Writer task: callers never await socket writes directly.
        let writer_shared = self.shared.clone();
        tokio::spawn(async move {
            let mut ws_write = ws_write;
            while let Some(msg) = out_rx.recv().await {
                let res = tokio::time::timeout(WS_SEND_TIMEOUT, ws_write.send(msg)).await;
                if !matches!(res, Ok(Ok(()))) {
                    writer_shared.connected.store(false, Ordering::SeqCst);
                    break;
                }
            }
            let _ = ws_write.send(Message::Close(None)).await;
        });

        // Reader task: correlates replies into the shared last-result slot.
        let reader_shared = self.shared.clone();
        let pong_tx = out_tx.clone();
        tokio::spawn(async move {
            let mut phase = ReaderPhase::AwaitingBaselineAck;

            while let Some(msg) = ws_read.next().await {
                let msg = match msg {
                    Ok(m) => m,
                    Err(e) => {
                        log::warn!("face stream read failed: {e}");
                        break;
                    }
                };

                let text = match msg {
                    Message::Text(t) => t.to_string(),
                    Message::Binary(b) => String::from_utf8_lossy(&b).to_string(),
                    Message::Close(_) => break,
                    Message::Ping(p) => {
                        if pong_tx.try_send(Message::Pong(p)).is_err() {
                            break;
                        }
                        continue;
                    }
                    Message::Pong(_) => continue,
                    _ => continue,
                };

                if matches!(phase, ReaderPhase::AwaitingBaselineAck) {
                    // The baseline self-comparison is meaningless; drop it
                    // regardless of shape so it can't pose as a real result.
                    log::info!("face stream: discarded baseline self-comparison reply");
                    phase = ReaderPhase::Streaming;
                    continue;
                }

                match parse_stream_reply(&text) {
                    Ok(Some(result)) => reader_shared.store_result(result),
                    Ok(None) => {
                        log::info!("face stream: reply without bbox ignored");
                    }
                    Err(e) => {
                        // One bad message must not terminate the connection.
                        log::warn!("face stream: malformed reply skipped: {e}");
                    }
                }
            }

            reader_shared.connected.store(false, Ordering::SeqCst);
        });

        self.out_tx = Some(out_tx);
        Ok(())
    }

    /// Queues a live frame for comparison. Never blocks and never errors:
    /// returns `false` when the stream is down or congested.
    pub fn send_frame(&self, frame_b64: &str) -> bool {
        if !self.is_healthy() {
            return false;
        }

        let Some(tx) = self.out_tx.as_ref() else {
            return false;
        };

        let frame = strip_data_url_prefix(frame_b64);
        tx.try_send(Message::Text(frame.to_string().into())).is_ok()
    }

    /// Most recent result carrying a bounding box, if any. Correlation to a
    /// specific frame is best-effort: a fast producer can overwrite this
    /// before a slow consumer reads it.
    pub fn last_result(&self) -> Option<FrameResult> {
        self.shared.read_result()
    }

    pub fn is_healthy(&self) -> bool {
        self.shared.connected.load(Ordering::SeqCst)
            && self.out_tx.as_ref().map(|tx| !tx.is_closed()).unwrap_or(false)
    }

    /// Closes the connection and clears the result slot. Idempotent.
    pub fn stop(&mut self) {
        self.shared.connected.store(false, Ordering::SeqCst);
        // Dropping the sender ends the writer task, which sends Close.
        self.out_tx = None;
        self.shared.clear();
    }
}

impl Drop for FaceStreamClient {
    fn drop(&mut self) {
        self.stop();
    }
}

fn strip_data_url_prefix(frame_b64: &str) -> &str {
    if frame_b64.starts_with("data:") {
        match frame_b64.split_once(',') {
            Some((_, rest)) => rest,
            None => frame_b64,
        }
    } else {
        frame_b64
    }
}

/// Decodes one inbound reply. A message with a `bbox` array is a genuine
/// per-frame comparison; anything else is informational and yields `None`.
fn parse_stream_reply(s: &str) -> anyhow::Result<Option<FrameResult>> {
    let v: Value = serde_json::from_str(s).context("decode face stream JSON")?;

    let Some(bbox) = v.get("bbox").and_then(|b| b.as_array()) else {
        return Ok(None);
    };

    Ok(Some(FrameResult {
        same_person: v.get("same_person").and_then(|b| b.as_bool()).unwrap_or(false),
        similarity: v.get("similarity").and_then(|f| f.as_f64()).unwrap_or(0.0),
        bbox: bbox.iter().filter_map(|i| i.as_f64()).collect(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const SELF_COMPARISON: &str = r#"{"same_person":true,"similarity":1.0,"bbox":[0.0,0.0,5.0,5.0]}"#;
    const REAL_RESULT: &str = r#"{"same_person":false,"similarity":0.21,"bbox":[3.0,4.0,60.0,80.0]}"#;

    #[test]
    fn strips_data_url_prefix() {
        assert_eq!(strip_data_url_prefix("data:image/jpeg;base64,QUJD"), "QUJD");
        assert_eq!(strip_data_url_prefix("QUJD"), "QUJD");
        assert_eq!(strip_data_url_prefix("data:broken"), "data:broken");
    }

    #[test]
    fn reply_with_bbox_parses_to_result() {
        let r = parse_stream_reply(REAL_RESULT).unwrap().unwrap();
        assert!(!r.same_person);
        assert_eq!(r.similarity, 0.21);
        assert_eq!(r.bbox, vec![3.0, 4.0, 60.0, 80.0]);
    }

    #[test]
    fn reply_without_bbox_is_informational() {
        assert_eq!(parse_stream_reply(r#"{"msg":"frame received"}"#).unwrap(), None);
        assert_eq!(
            parse_stream_reply(r#"{"same_person":true,"similarity":0.9}"#).unwrap(),
            None
        );
    }

    #[test]
    fn malformed_reply_is_an_error() {
        assert!(parse_stream_reply("not json").is_err());
    }

    #[test]
    fn send_frame_before_start_returns_false() {
        let client = FaceStreamClient::new(FaceStreamConfig::new(
            Url::parse("ws://127.0.0.1:1/verify").unwrap(),
        ));
        assert!(!client.is_healthy());
        assert!(!client.send_frame("QUJD"));
        assert!(client.last_result().is_none());
    }

    async fn wait_until(mut cond: impl FnMut() -> bool) -> bool {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if cond() {
                    return;
                }
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .is_ok()
    }

    /// Test server: discards nothing itself; replies to the first inbound
    /// message (the baseline) with `first_reply`, then sends one entry from
    /// `frame_replies` per subsequent inbound message.
    async fn spawn_server(first_reply: &'static str, frame_replies: Vec<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();

            // Baseline.
            if ws.next().await.is_none() {
                return;
            }
            let _ = ws.send(Message::Text(first_reply.into())).await;

            let mut replies = frame_replies.into_iter();
            while let Some(Ok(msg)) = ws.next().await {
                if matches!(msg, Message::Close(_)) {
                    break;
                }
                if let Some(reply) = replies.next() {
                    let _ = ws.send(Message::Text(reply.into())).await;
                }
            }
        });

        format!("ws://{addr}/verify")
    }

    async fn started_client(url: &str) -> FaceStreamClient {
        let mut client =
            FaceStreamClient::new(FaceStreamConfig::new(Url::parse(url).unwrap()));
        client.set_reference_base64("UkVGRVJFTkNF");
        client.start().await.unwrap();
        client
    }

    #[tokio::test]
    async fn integration_discards_exactly_the_first_reply() {
        // The self-comparison carries a bbox and same_person=true; if the
        // discard ever failed it would look like an instant match.
        let url = spawn_server(SELF_COMPARISON, vec![REAL_RESULT]).await;
        let client = started_client(&url).await;

        // Give the reader time to (wrongly) accept the baseline reply.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(client.last_result().is_none());

        assert!(client.send_frame("RlJBTUUx"));
        assert!(wait_until(|| client.last_result().is_some()).await);

        let result = client.last_result().unwrap();
        assert!(!result.same_person);
        assert_eq!(result.similarity, 0.21);
    }

    #[tokio::test]
    async fn integration_bboxless_replies_never_overwrite_last_result() {
        let url = spawn_server(
            r#"{"msg":"baseline received"}"#,
            vec![REAL_RESULT, r#"{"msg":"processing"}"#, r#"{"msg":"still processing"}"#],
        )
        .await;
        let client = started_client(&url).await;

        assert!(client.send_frame("RlJBTUUx"));
        assert!(wait_until(|| client.last_result().is_some()).await);
        let first = client.last_result().unwrap();

        assert!(client.send_frame("RlJBTUUy"));
        assert!(client.send_frame("RlJBTUUz"));
        tokio::time::sleep(Duration::from_millis(150)).await;

        assert_eq!(client.last_result().unwrap(), first);
    }

    #[tokio::test]
    async fn integration_malformed_reply_does_not_kill_the_reader() {
        let url = spawn_server(
            r#"{"msg":"baseline received"}"#,
            vec!["%%% not json %%%", REAL_RESULT],
        )
        .await;
        let client = started_client(&url).await;

        assert!(client.send_frame("RlJBTUUx"));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(client.is_healthy());
        assert!(client.last_result().is_none());

        assert!(client.send_frame("RlJBTUUy"));
        assert!(wait_until(|| client.last_result().is_some()).await);
    }

    #[tokio::test]
    async fn integration_data_url_prefix_is_stripped_on_the_wire() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (seen_tx, mut seen_rx) = mpsc::channel::<String>(4);

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.next().await; // baseline
            let _ = ws.send(Message::Text(r#"{"msg":"ok"}"#.into())).await;
            while let Some(Ok(Message::Text(txt))) = ws.next().await {
                let _ = seen_tx.send(txt.to_string()).await;
            }
        });

        let client = started_client(&format!("ws://{addr}/verify")).await;
        assert!(client.send_frame("data:image/jpeg;base64,RlJBTUUx"));

        let seen = tokio::time::timeout(Duration::from_secs(2), seen_rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(seen, "RlJBTUUx");
    }

    #[tokio::test]
    async fn integration_server_close_flips_health() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.next().await; // baseline
            let _ = ws.send(Message::Close(None)).await;
        });

        let client = started_client(&format!("ws://{addr}/verify")).await;
        assert!(wait_until(|| !client.is_healthy()).await);
        assert!(!client.send_frame("RlJBTUUx"));
    }

    #[tokio::test]
    async fn integration_stop_is_idempotent_and_clears_state() {
        let url = spawn_server(r#"{"msg":"baseline received"}"#, vec![REAL_RESULT]).await;
        let mut client = started_client(&url).await;

        assert!(client.send_frame("RlJBTUUx"));
        assert!(wait_until(|| client.last_result().is_some()).await);

        client.stop();
        assert!(!client.is_healthy());
        assert!(client.last_result().is_none());
        assert!(!client.send_frame("RlJBTUUy"));

        client.stop();
        assert!(!client.is_healthy());
    }

    #[tokio::test]
    async fn integration_replies_arriving_after_stop_are_discarded() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        // Server answers the frame only after a delay, landing the reply
        // while the client is already stopped.
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            let _ = ws.next().await; // baseline
            let _ = ws.send(Message::Text(r#"{"msg":"baseline received"}"#.into())).await;
            let _ = ws.next().await; // frame
            tokio::time::sleep(Duration::from_millis(150)).await;
            let _ = ws.send(Message::Text(REAL_RESULT.into())).await;
            tokio::time::sleep(Duration::from_millis(300)).await;
        });

        let mut client = started_client(&format!("ws://{addr}/verify")).await;
        assert!(client.send_frame("RlJBTUUx"));
        client.stop();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(client.last_result().is_none());
        assert!(!client.is_healthy());
    }

    #[tokio::test]
    async fn load_reference_fetches_and_encodes() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/id.jpg"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"IDPHOTO".to_vec()))
            .mount(&server)
            .await;

        let mut client = FaceStreamClient::new(FaceStreamConfig::new(
            Url::parse("ws://127.0.0.1:1/verify").unwrap(),
        ));
        client.load_reference(&format!("{}/id.jpg", server.uri())).await.unwrap();
        assert_eq!(
            client.reference_b64.as_deref(),
            Some(base64::engine::general_purpose::STANDARD.encode(b"IDPHOTO").as_str())
        );
    }

    #[tokio::test]
    async fn load_reference_unreachable_image_is_a_fetch_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/gone.jpg"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let mut client = FaceStreamClient::new(FaceStreamConfig::new(
            Url::parse("ws://127.0.0.1:1/verify").unwrap(),
        ));
        let err = client
            .load_reference(&format!("{}/gone.jpg", server.uri()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("fetch reference image"));
    }

    #[tokio::test]
    async fn start_without_reference_fails() {
        let mut client = FaceStreamClient::new(FaceStreamConfig::new(
            Url::parse("ws://127.0.0.1:1/verify").unwrap(),
        ));
        let err = client.start().await.unwrap_err();
        assert!(err.to_string().contains("no reference image"));
    }
}
