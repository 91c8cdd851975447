use crate::traits::{
    DocumentScan, FaceMatchProvider, LiveStreamVerifier, MatchOutcome, OcrProvider,
    StreamVerifierFactory,
};
use ekyc_core::conversation::{
    CTX_ID_CARD_URL, CTX_SCAN_RESULT, CTX_VERIFICATION_SUCCESS, Conversation,
    ConversationSnapshot,
};
use ekyc_core::progress::{Progress, ProgressError};
use ekyc_providers::face_stream::FrameResult;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("document scan failed: {0}")]
    Ocr(String),

    #[error("verification collaborator failed: {0}")]
    Collaborator(String),

    #[error("no scanned ID document on file; upload one first")]
    MissingReference,

    #[error("no verification stream has been started")]
    StreamNotStarted,

    #[error("verification stream is not healthy; restart verification")]
    StreamUnhealthy,

    #[error(transparent)]
    Progress(#[from] ProgressError),
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub system_prompt: String,

    /// Best-effort window between a frame send and the result read.
    pub result_grace: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: "You are an eKYC assistant guiding a user through identity verification.".into(),
            result_grace: Duration::from_millis(50),
        }
    }
}

/// Sequences OCR ingestion and face verification for one session, applying
/// the rollback policy against the progress state machine.
///
/// Owns the session's `Conversation` and at most one live stream.
pub struct VerificationOrchestrator {
    cfg: OrchestratorConfig,
    conversation: Conversation,
    ocr: Arc<dyn OcrProvider>,
    matcher: Arc<dyn FaceMatchProvider>,
    streams: Arc<dyn StreamVerifierFactory>,
    stream: Option<Box<dyn LiveStreamVerifier>>,
}

impl VerificationOrchestrator {
    pub fn new(
        cfg: OrchestratorConfig,
        ocr: Arc<dyn OcrProvider>,
        matcher: Arc<dyn FaceMatchProvider>,
        streams: Arc<dyn StreamVerifierFactory>,
    ) -> Self {
        let conversation = Conversation::with_system(cfg.system_prompt.clone());
        Self {
            cfg,
            conversation,
            ocr,
            matcher,
            streams,
            stream: None,
        }
    }

    pub fn hydrate(&mut self, snapshot: ConversationSnapshot) {
        self.conversation = Conversation::from_snapshot(snapshot);
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn conversation_mut(&mut self) -> &mut Conversation {
        &mut self.conversation
    }

    pub fn progress(&self) -> Progress {
        self.conversation.progress()
    }

    /// Accepts an ID document, runs OCR, and on success stores the image
    /// locator and extracted fields into context before advancing to
    /// `id_scanned`. On failure progress is not advanced past the upload
    /// edge and a structured error is returned.
    pub async fn ingest_document(
        &mut self,
        image: &[u8],
        filename: &str,
    ) -> Result<DocumentScan, VerifyError> {
        if self.conversation.progress() == Progress::Idle {
            self.conversation.set_progress(Progress::IdUploading)?;
        }

        let doc = self
            .ocr
            .process(image, filename)
            .await
            .map_err(|e| VerifyError::Ocr(e.to_string()))?;

        if !doc.scan.is_successful() {
            let reason = doc
                .scan
                .message
                .clone()
                .unwrap_or_else(|| "no usable fields extracted".into());
            return Err(VerifyError::Ocr(reason));
        }

        self.conversation.set_context(CTX_ID_CARD_URL, json!(doc.image_url));
        let scan_value =
            serde_json::to_value(&doc.scan).map_err(|e| VerifyError::Ocr(e.to_string()))?;
        self.conversation.set_context(CTX_SCAN_RESULT, scan_value);
        self.conversation.set_progress(Progress::IdScanned)?;

        log::info!("document ingested, progress: {}", self.conversation.progress());
        Ok(doc)
    }

    /// One batch comparison of the reference ID photo against a probe image.
    ///
    /// Entering `face_verifying` arms the rollback: every non-success path,
    /// including a collaborator error, reverts to `id_scanned` exactly once
    /// so the user can retry without re-uploading the document.
    pub async fn verify_batch(
        &mut self,
        reference_url: &str,
        probe_url: &str,
    ) -> Result<MatchOutcome, VerifyError> {
        self.conversation.set_progress(Progress::FaceVerifying)?;

        match self.matcher.compare(reference_url, probe_url).await {
            Ok(outcome) if outcome.same_person => {
                self.complete_verification()?;
                Ok(outcome)
            }
            Ok(outcome) => {
                self.revert_to_scanned();
                Ok(outcome)
            }
            Err(e) => {
                self.revert_to_scanned();
                Err(VerifyError::Collaborator(e.to_string()))
            }
        }
    }

    /// Opens the live verification stream against the reference photo.
    /// Replaces (and stops) any previous stream; at most one is ever live.
    pub async fn start_stream(&mut self, reference_url: &str) -> Result<(), VerifyError> {
        self.conversation.set_progress(Progress::FaceVerifying)?;

        if let Some(mut old) = self.stream.take() {
            old.stop();
        }

        let mut stream = self.streams.new_stream();
        if let Err(e) = stream.start(reference_url).await {
            self.revert_to_scanned();
            return Err(VerifyError::Collaborator(e.to_string()));
        }

        self.stream = Some(stream);
        Ok(())
    }

    /// Forwards one camera frame into the live stream and reads back the
    /// most recent correlated result after a short grace wait. A definitive
    /// match runs the same success path as `verify_batch`; the caller is
    /// then expected to delete the session.
    pub async fn verify_stream_frame(
        &mut self,
        frame_b64: &str,
    ) -> Result<Option<FrameResult>, VerifyError> {
        let stream = self.stream.as_ref().ok_or(VerifyError::StreamNotStarted)?;

        if !stream.is_healthy() {
            return Err(VerifyError::StreamUnhealthy);
        }
        if !stream.send_frame(frame_b64) {
            return Err(VerifyError::StreamUnhealthy);
        }

        // Results are correlated as "most recent with a bounding box"; the
        // grace period makes it likely we see this frame's reply.
        tokio::time::sleep(self.cfg.result_grace).await;
        let result = stream.last_result();

        if result.as_ref().map(|r| r.same_person).unwrap_or(false) {
            self.complete_verification()?;
            self.stop_stream();
        }

        Ok(result)
    }

    pub fn stream_is_healthy(&self) -> bool {
        self.stream.as_ref().map(|s| s.is_healthy()).unwrap_or(false)
    }

    pub fn stop_stream(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            stream.stop();
        }
    }

    /// Clears the session back to `idle` with empty context, dropping any
    /// live stream.
    pub fn reset(&mut self) {
        self.stop_stream();
        self.conversation.reset(self.cfg.system_prompt.clone());
    }

    fn complete_verification(&mut self) -> Result<(), VerifyError> {
        self.conversation.set_progress(Progress::Completed)?;
        self.conversation.set_context(CTX_VERIFICATION_SUCCESS, json!(true));
        log::info!("verification completed");
        Ok(())
    }

    fn revert_to_scanned(&mut self) {
        // Best-effort: a failed revert must not mask the verification
        // outcome the caller is about to see.
        if let Err(e) = self.conversation.set_progress(Progress::IdScanned) {
            log::warn!("rollback to id_scanned failed: {e}");
        } else {
            log::info!("verification did not succeed, progress reverted to id_scanned");
        }
    }
}
