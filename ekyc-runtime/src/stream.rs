use ekyc_engine::traits::{LiveStreamVerifier, StreamVerifierFactory};
use ekyc_providers::face_stream::{FaceStreamClient, FaceStreamConfig, FrameResult};

/// Live stream verification backed by the duplex websocket client.
pub struct RealtimeStreamVerifier {
    client: FaceStreamClient,
}

impl RealtimeStreamVerifier {
    pub fn new(cfg: FaceStreamConfig) -> Self {
        Self {
            client: FaceStreamClient::new(cfg),
        }
    }
}

#[async_trait::async_trait]
impl LiveStreamVerifier for RealtimeStreamVerifier {
    async fn start(&mut self, reference_url: &str) -> anyhow::Result<()> {
        self.client.load_reference(reference_url).await?;
        self.client.start().await
    }

    fn send_frame(&self, frame_b64: &str) -> bool {
        self.client.send_frame(frame_b64)
    }

    fn last_result(&self) -> Option<FrameResult> {
        self.client.last_result()
    }

    fn is_healthy(&self) -> bool {
        self.client.is_healthy()
    }

    fn stop(&mut self) {
        self.client.stop();
    }
}

#[derive(Debug, Clone)]
pub struct RealtimeStreamFactory {
    cfg: FaceStreamConfig,
}

impl RealtimeStreamFactory {
    pub fn new(cfg: FaceStreamConfig) -> Self {
        Self { cfg }
    }
}

impl StreamVerifierFactory for RealtimeStreamFactory {
    fn new_stream(&self) -> Box<dyn LiveStreamVerifier> {
        Box::new(RealtimeStreamVerifier::new(self.cfg.clone()))
    }
}
