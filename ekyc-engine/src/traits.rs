use async_trait::async_trait;
use ekyc_core::conversation::ConversationSnapshot;
use ekyc_core::types::SessionKey;
use ekyc_providers::face_stream::FrameResult;
use ekyc_providers::ocr::ScanResult;

/// A processed ID document: where the uploaded image landed plus what OCR
/// extracted from it.
#[derive(Debug, Clone, PartialEq)]
pub struct DocumentScan {
    pub image_url: String,
    pub scan: ScanResult,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MatchOutcome {
    pub same_person: bool,
    pub similarity: f64,
}

#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Uploads the document image and extracts its fields in one step.
    async fn process(&self, image: &[u8], filename: &str) -> anyhow::Result<DocumentScan>;
}

#[async_trait]
pub trait FaceMatchProvider: Send + Sync {
    async fn compare(&self, reference_url: &str, probe_url: &str) -> anyhow::Result<MatchOutcome>;
}

/// One live duplex verification stream. Mirrors the stream client surface:
/// `send_frame`/`last_result` never block and never error; health is the
/// caller's signal to stop short-circuiting sends.
#[async_trait]
pub trait LiveStreamVerifier: Send + Sync {
    async fn start(&mut self, reference_url: &str) -> anyhow::Result<()>;
    fn send_frame(&self, frame_b64: &str) -> bool;
    fn last_result(&self) -> Option<FrameResult>;
    fn is_healthy(&self) -> bool;
    fn stop(&mut self);
}

/// Creates fresh stream instances. There is no reconnect: a failed stream
/// is discarded and a new one built here.
pub trait StreamVerifierFactory: Send + Sync {
    fn new_stream(&self) -> Box<dyn LiveStreamVerifier>;
}

/// Persistence seam for session hydration and saving. Implementations may
/// be file-backed, database-backed, or absent (a no-op).
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    async fn load(&self, key: &SessionKey) -> anyhow::Result<Option<ConversationSnapshot>>;
    async fn save(&self, key: &SessionKey, snapshot: &ConversationSnapshot) -> anyhow::Result<()>;
    async fn remove(&self, key: &SessionKey) -> anyhow::Result<()>;
}

/// Snapshot store that keeps nothing. Sessions always hydrate clean.
pub struct NoopSnapshotStore;

#[async_trait]
impl SnapshotStore for NoopSnapshotStore {
    async fn load(&self, _key: &SessionKey) -> anyhow::Result<Option<ConversationSnapshot>> {
        Ok(None)
    }

    async fn save(&self, _key: &SessionKey, _snapshot: &ConversationSnapshot) -> anyhow::Result<()> {
        Ok(())
    }

    async fn remove(&self, _key: &SessionKey) -> anyhow::Result<()> {
        Ok(())
    }
}
