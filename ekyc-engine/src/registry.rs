use crate::orchestrator::{OrchestratorConfig, VerificationOrchestrator};
use crate::traits::{FaceMatchProvider, OcrProvider, SnapshotStore, StreamVerifierFactory};
use ekyc_core::types::SessionKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::sync::Mutex as TokioMutex;

/// Everything needed to build one per-session orchestrator.
#[derive(Clone)]
pub struct SessionDeps {
    pub ocr: Arc<dyn OcrProvider>,
    pub matcher: Arc<dyn FaceMatchProvider>,
    pub streams: Arc<dyn StreamVerifierFactory>,
    pub snapshots: Arc<dyn SnapshotStore>,
    pub orchestrator: OrchestratorConfig,
}

struct Entry {
    orchestrator: Arc<TokioMutex<VerificationOrchestrator>>,
    touched: Instant,
}

/// TTL-bounded cache of per-session orchestrators.
///
/// Every `resolve`/`delete` first sweeps expired entries, so eviction cost
/// is O(active sessions) per call. Fine for low/medium session counts.
///
/// The registry map is guarded by a plain mutex held only for map
/// operations; each session carries its own async mutex so concurrent
/// calls against the same key serialize instead of racing.
pub struct SessionRegistry {
    deps: SessionDeps,
    ttl: Duration,
    sessions: StdMutex<HashMap<SessionKey, Entry>>,
}

impl SessionRegistry {
    pub fn new(ttl: Duration, deps: SessionDeps) -> Self {
        Self {
            deps,
            ttl,
            sessions: StdMutex::new(HashMap::new()),
        }
    }

    /// Returns the cached orchestrator for `key`, refreshing its timestamp,
    /// or builds a fresh one (hydrated from the snapshot store when a
    /// snapshot exists). Never returns two different instances for the same
    /// key without an intervening `delete`.
    pub async fn resolve(&self, key: &SessionKey) -> Arc<TokioMutex<VerificationOrchestrator>> {
        {
            let mut sessions = self.lock_sessions();
            self.sweep(&mut sessions);

            if let Some(entry) = sessions.get_mut(key) {
                entry.touched = Instant::now();
                return entry.orchestrator.clone();
            }
        }

        // Hydration does I/O, so it happens outside the map lock.
        let mut orch = self.build_orchestrator();
        match self.deps.snapshots.load(key).await {
            Ok(Some(snapshot)) => orch.hydrate(snapshot),
            Ok(None) => {}
            Err(e) => {
                log::warn!("session {key}: hydration failed, starting clean: {e}");
            }
        }

        let mut sessions = self.lock_sessions();
        let entry = sessions.entry(key.clone()).or_insert_with(|| Entry {
            orchestrator: Arc::new(TokioMutex::new(orch)),
            touched: Instant::now(),
        });
        entry.touched = Instant::now();
        entry.orchestrator.clone()
    }

    /// Removes the session unconditionally. Used after a successful
    /// verification so the next interaction starts from `idle` with empty
    /// context. Returns whether a live entry existed.
    pub fn delete(&self, key: &SessionKey) -> bool {
        let mut sessions = self.lock_sessions();
        self.sweep(&mut sessions);
        sessions.remove(key).is_some()
    }

    pub fn contains(&self, key: &SessionKey) -> bool {
        let mut sessions = self.lock_sessions();
        self.sweep(&mut sessions);
        sessions.contains_key(key)
    }

    pub fn len(&self) -> usize {
        let mut sessions = self.lock_sessions();
        self.sweep(&mut sessions);
        sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn build_orchestrator(&self) -> VerificationOrchestrator {
        VerificationOrchestrator::new(
            self.deps.orchestrator.clone(),
            self.deps.ocr.clone(),
            self.deps.matcher.clone(),
            self.deps.streams.clone(),
        )
    }

    fn sweep(&self, sessions: &mut HashMap<SessionKey, Entry>) {
        let ttl = self.ttl;
        sessions.retain(|key, entry| {
            let keep = entry.touched.elapsed() <= ttl;
            if !keep {
                log::info!("evicting expired session: {key}");
            }
            keep
        });
    }

    fn lock_sessions(&self) -> std::sync::MutexGuard<'_, HashMap<SessionKey, Entry>> {
        self.sessions.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
