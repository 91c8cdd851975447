use crate::assistant::{Assistant, AssistantAction};
use crate::facematch::WsFaceMatchProvider;
use crate::ocr::HttpOcrProvider;
use crate::snapshots::FileSnapshotStore;
use crate::stream::RealtimeStreamFactory;
use anyhow::Context;
use ekyc_core::config::EkycConfig;
use ekyc_core::progress::Progress;
use ekyc_core::types::SessionKey;
use ekyc_engine::orchestrator::{OrchestratorConfig, VerificationOrchestrator, VerifyError};
use ekyc_engine::registry::{SessionDeps, SessionRegistry};
use ekyc_engine::traits::{DocumentScan, MatchOutcome, SnapshotStore};
use ekyc_providers::chat::ChatClientConfig;
use ekyc_providers::face_batch::FaceBatchConfig;
use ekyc_providers::face_stream::{FaceStreamConfig, FrameResult};
use ekyc_providers::ocr::OcrConfig;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

/// Top-level entry point: one instance serves all sessions. Each call
/// resolves the session, takes its lock, applies the operation, and
/// persists the resulting snapshot.
pub struct EkycService {
    registry: SessionRegistry,
    snapshots: Arc<dyn SnapshotStore>,
    assistant: Assistant,
}

impl EkycService {
    pub fn new(ttl: Duration, deps: SessionDeps, assistant: Assistant) -> Self {
        let snapshots = deps.snapshots.clone();
        Self {
            registry: SessionRegistry::new(ttl, deps),
            snapshots,
            assistant,
        }
    }

    /// Wires the real collaborators from configuration. `api_key` comes from
    /// the environment or a secret store, never from the config file.
    pub fn from_config(cfg: &EkycConfig, api_key: &str, data_dir: &Path) -> anyhow::Result<Self> {
        let face_ws_url: Url = cfg.face_ws_url.parse().context("parse face_ws_url")?;
        let connect_timeout = Duration::from_secs(cfg.connect_timeout_secs);

        let mut batch_cfg = FaceBatchConfig::new(face_ws_url.clone());
        batch_cfg.connect_timeout = connect_timeout;

        let mut stream_cfg = FaceStreamConfig::new(face_ws_url);
        stream_cfg.connect_timeout = connect_timeout;

        let deps = SessionDeps {
            ocr: Arc::new(HttpOcrProvider::new(OcrConfig {
                upload_url: cfg.ocr_upload_url.clone(),
                scan_url: cfg.ocr_scan_url.clone(),
            })),
            matcher: Arc::new(WsFaceMatchProvider::new(batch_cfg)),
            streams: Arc::new(RealtimeStreamFactory::new(stream_cfg)),
            snapshots: Arc::new(FileSnapshotStore::at_dir(data_dir)),
            orchestrator: OrchestratorConfig {
                result_grace: Duration::from_millis(cfg.result_grace_ms),
                ..Default::default()
            },
        };

        let assistant = Assistant::new(ChatClientConfig {
            base_url: cfg.chat.base_url.clone(),
            api_key: api_key.to_string(),
            model: cfg.chat.model.clone(),
        });

        Ok(Self::new(Duration::from_secs(cfg.session_ttl_secs), deps, assistant))
    }

    /// One conversational turn. The model may answer in text or decide to
    /// kick off the verification flow.
    pub async fn chat(&self, key: &SessionKey, user_text: &str) -> anyhow::Result<AssistantAction> {
        let orch = self.registry.resolve(key).await;
        let mut orch = orch.lock().await;

        let action = self.assistant.respond(orch.conversation_mut(), user_text).await?;

        if let AssistantAction::StartEkyc { .. } = &action {
            if orch.progress() == Progress::Idle {
                orch.conversation_mut().set_progress(Progress::IdUploading)?;
            }
        }

        self.persist(key, &orch).await;
        Ok(action)
    }

    pub async fn upload_document(
        &self,
        key: &SessionKey,
        image: &[u8],
        filename: &str,
    ) -> Result<DocumentScan, VerifyError> {
        let orch = self.registry.resolve(key).await;
        let mut orch = orch.lock().await;

        let result = orch.ingest_document(image, filename).await;
        self.persist(key, &orch).await;
        result
    }

    /// Batch verification against the scanned ID. A definitive match ends
    /// the session; anything else leaves it at `id_scanned` for a retry.
    pub async fn verify_batch(
        &self,
        key: &SessionKey,
        probe_url: &str,
    ) -> Result<MatchOutcome, VerifyError> {
        let orch = self.registry.resolve(key).await;
        let mut orch = orch.lock().await;

        let reference = orch
            .conversation()
            .id_card_url()
            .ok_or(VerifyError::MissingReference)?
            .to_string();

        let result = orch.verify_batch(&reference, probe_url).await;

        match &result {
            Ok(outcome) if outcome.same_person => self.finalize(key).await,
            _ => self.persist(key, &orch).await,
        }
        result
    }

    pub async fn start_stream_verification(&self, key: &SessionKey) -> Result<(), VerifyError> {
        let orch = self.registry.resolve(key).await;
        let mut orch = orch.lock().await;

        let reference = orch
            .conversation()
            .id_card_url()
            .ok_or(VerifyError::MissingReference)?
            .to_string();

        let result = orch.start_stream(&reference).await;
        self.persist(key, &orch).await;
        result
    }

    /// One camera frame. Intermediate results are not persisted; only a
    /// definitive match changes durable state (by ending the session).
    pub async fn send_stream_frame(
        &self,
        key: &SessionKey,
        frame_b64: &str,
    ) -> Result<Option<FrameResult>, VerifyError> {
        let orch = self.registry.resolve(key).await;
        let mut orch = orch.lock().await;

        let result = orch.verify_stream_frame(frame_b64).await;
        if orch.progress() == Progress::Completed {
            self.finalize(key).await;
        }
        result
    }

    pub async fn stream_is_healthy(&self, key: &SessionKey) -> bool {
        let orch = self.registry.resolve(key).await;
        let orch = orch.lock().await;
        orch.stream_is_healthy()
    }

    pub async fn stop_stream_verification(&self, key: &SessionKey) {
        let orch = self.registry.resolve(key).await;
        let mut orch = orch.lock().await;
        orch.stop_stream();
        self.persist(key, &orch).await;
    }

    /// Drops the session entirely: registry entry and stored snapshot. The
    /// next call under this key starts from `idle` with empty context.
    pub async fn reset_session(&self, key: &SessionKey) {
        self.registry.delete(key);
        if let Err(e) = self.snapshots.remove(key).await {
            log::warn!("session {key}: snapshot removal failed: {e}");
        }
    }

    pub async fn progress(&self, key: &SessionKey) -> Progress {
        let orch = self.registry.resolve(key).await;
        let orch = orch.lock().await;
        orch.progress()
    }

    /// Best-effort: persistence failure is logged, not returned, so a full
    /// disk never masks a verification outcome.
    async fn persist(&self, key: &SessionKey, orch: &VerificationOrchestrator) {
        let snapshot = orch.conversation().snapshot();
        if let Err(e) = self.snapshots.save(key, &snapshot).await {
            log::warn!("session {key}: snapshot save failed: {e}");
        }
    }

    async fn finalize(&self, key: &SessionKey) {
        log::info!("session {key}: verification complete, ending session");
        self.registry.delete(key);
        if let Err(e) = self.snapshots.remove(key).await {
            log::warn!("session {key}: snapshot removal failed: {e}");
        }
    }
}
