use ekyc_engine::traits::{FaceMatchProvider, MatchOutcome};
use ekyc_providers::face_batch::{FaceBatchConfig, compare_images, encode_image_base64};

/// Batch face matching over the one-shot websocket contract. Both images
/// arrive as URLs and are downloaded here before comparison.
pub struct WsFaceMatchProvider {
    cfg: FaceBatchConfig,
}

impl WsFaceMatchProvider {
    pub fn new(cfg: FaceBatchConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait::async_trait]
impl FaceMatchProvider for WsFaceMatchProvider {
    async fn compare(&self, reference_url: &str, probe_url: &str) -> anyhow::Result<MatchOutcome> {
        let reference = ekyc_providers::runtime::fetch_image(reference_url).await?;
        let probe = ekyc_providers::runtime::fetch_image(probe_url).await?;

        let reply = compare_images(
            &self.cfg,
            &encode_image_base64(&reference),
            &encode_image_base64(&probe),
        )
        .await?;

        log::info!(
            "face match reply: status={} same_person={:?} similarity={:?}",
            reply.status,
            reply.same_person,
            reply.similarity
        );

        Ok(MatchOutcome {
            same_person: reply.is_successful(),
            similarity: reply.similarity.unwrap_or(0.0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::{SinkExt, StreamExt};
    use std::time::Duration;
    use tokio::net::TcpListener;
    use tokio_tungstenite::tungstenite::Message;
    use url::Url;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn spawn_match_server(reply: &'static str) -> Url {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
            // One payload in, one reply out.
            let _ = ws.next().await;
            ws.send(Message::Text(reply.into())).await.unwrap();
        });

        Url::parse(&format!("ws://{addr}")).unwrap()
    }

    async fn spawn_image_server() -> MockServer {
        let server = MockServer::start().await;
        for p in ["/id.jpg", "/selfie.jpg"] {
            Mock::given(method("GET"))
                .and(path(p))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(b"JPEG".to_vec()))
                .mount(&server)
                .await;
        }
        server
    }

    fn cfg(ws_url: Url) -> FaceBatchConfig {
        FaceBatchConfig {
            ws_url,
            connect_timeout: Duration::from_secs(2),
            reply_timeout: Duration::from_secs(2),
        }
    }

    #[tokio::test]
    async fn matching_faces_yield_a_positive_outcome() {
        let images = spawn_image_server().await;
        let ws = spawn_match_server(
            r#"{"status":"success","same_person":true,"similarity":0.91,"confidence":0.95}"#,
        )
        .await;

        let provider = WsFaceMatchProvider::new(cfg(ws));
        let outcome = provider
            .compare(
                &format!("{}/id.jpg", images.uri()),
                &format!("{}/selfie.jpg", images.uri()),
            )
            .await
            .unwrap();

        assert!(outcome.same_person);
        assert!((outcome.similarity - 0.91).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn low_similarity_is_not_a_match_even_if_flagged() {
        let images = spawn_image_server().await;
        let ws = spawn_match_server(
            r#"{"status":"success","same_person":true,"similarity":0.31}"#,
        )
        .await;

        let provider = WsFaceMatchProvider::new(cfg(ws));
        let outcome = provider
            .compare(
                &format!("{}/id.jpg", images.uri()),
                &format!("{}/selfie.jpg", images.uri()),
            )
            .await
            .unwrap();

        assert!(!outcome.same_person);
    }

    #[tokio::test]
    async fn unreachable_probe_image_is_an_error() {
        let images = spawn_image_server().await;
        let ws = spawn_match_server(r#"{"status":"success"}"#).await;

        let provider = WsFaceMatchProvider::new(cfg(ws));
        let err = provider
            .compare(
                &format!("{}/id.jpg", images.uri()),
                &format!("{}/missing.jpg", images.uri()),
            )
            .await
            .unwrap_err();

        assert!(err.to_string().contains("404"));
    }
}
