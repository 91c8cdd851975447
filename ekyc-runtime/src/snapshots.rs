use anyhow::Context;
use async_trait::async_trait;
use ekyc_core::conversation::ConversationSnapshot;
use ekyc_core::types::SessionKey;
use ekyc_engine::traits::SnapshotStore;
use std::fs;
use std::path::{Path, PathBuf};

/// One JSON file per session under a data directory. Session keys are
/// sanitized into filenames so an arbitrary client-supplied key can never
/// escape the directory.
#[derive(Debug, Clone)]
pub struct FileSnapshotStore {
    dir: PathBuf,
}

impl FileSnapshotStore {
    pub fn at_dir(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &SessionKey) -> PathBuf {
        let safe: String = key
            .as_str()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }
}

/// Writes through a sibling temp file and renames it into place, so a crash
/// mid-write never leaves a truncated JSON document behind. Snapshots and
/// config are regenerated wholesale on the next save, so there is no need
/// to keep the displaced file around.
pub(crate) fn write_json_atomic(path: &Path, json: &[u8]) -> anyhow::Result<()> {
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json).with_context(|| format!("write temp: {}", tmp.display()))?;

    if let Err(first) = fs::rename(&tmp, path) {
        // Windows refuses to rename over an existing file.
        if fs::remove_file(path).is_err() || fs::rename(&tmp, path).is_err() {
            let _ = fs::remove_file(&tmp);
            return Err(anyhow::Error::new(first)
                .context(format!("replace {}", path.display())));
        }
    }
    Ok(())
}

#[async_trait]
impl SnapshotStore for FileSnapshotStore {
    async fn load(&self, key: &SessionKey) -> anyhow::Result<Option<ConversationSnapshot>> {
        let path = self.path_for(key);
        if !path.exists() {
            return Ok(None);
        }

        let bytes = fs::read(&path)
            .with_context(|| format!("read session snapshot: {}", path.display()))?;
        let snapshot: ConversationSnapshot =
            serde_json::from_slice(&bytes).context("decode session snapshot JSON")?;
        Ok(Some(snapshot))
    }

    async fn save(&self, key: &SessionKey, snapshot: &ConversationSnapshot) -> anyhow::Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("create snapshot dir: {}", self.dir.display()))?;

        let path = self.path_for(key);
        let json = serde_json::to_vec_pretty(snapshot).context("encode session snapshot JSON")?;
        write_json_atomic(&path, &json)
            .with_context(|| format!("save snapshot: {}", path.display()))
    }

    async fn remove(&self, key: &SessionKey) -> anyhow::Result<()> {
        let path = self.path_for(key);
        if path.exists() {
            fs::remove_file(&path)
                .with_context(|| format!("remove snapshot: {}", path.display()))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ekyc_core::conversation::Conversation;
    use ekyc_core::progress::Progress;

    fn scanned_snapshot() -> ConversationSnapshot {
        let mut conv = Conversation::with_system("sys");
        conv.set_progress(Progress::IdUploading).unwrap();
        conv.set_progress(Progress::IdScanned).unwrap();
        conv.snapshot()
    }

    #[tokio::test]
    async fn round_trips_a_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::at_dir(dir.path());
        let key = SessionKey::new("user-42");

        let snapshot = scanned_snapshot();
        store.save(&key, &snapshot).await.unwrap();

        let loaded = store.load(&key).await.unwrap().unwrap();
        assert_eq!(loaded, snapshot);
        assert_eq!(loaded.progress, Progress::IdScanned);
    }

    #[tokio::test]
    async fn resaving_replaces_the_previous_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::at_dir(dir.path());
        let key = SessionKey::new("user-42");

        store.save(&key, &Conversation::with_system("sys").snapshot()).await.unwrap();
        store.save(&key, &scanned_snapshot()).await.unwrap();

        let loaded = store.load(&key).await.unwrap().unwrap();
        assert_eq!(loaded.progress, Progress::IdScanned);

        // Exactly the snapshot file, no temp leftovers.
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["user-42.json".to_string()]);
    }

    #[tokio::test]
    async fn missing_snapshot_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::at_dir(dir.path());
        assert!(store.load(&SessionKey::new("nobody")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remove_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::at_dir(dir.path());
        let key = SessionKey::new("user-42");

        store.save(&key, &scanned_snapshot()).await.unwrap();
        store.remove(&key).await.unwrap();
        store.remove(&key).await.unwrap();
        assert!(store.load(&key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn hostile_keys_stay_inside_the_directory() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileSnapshotStore::at_dir(dir.path());
        let key = SessionKey::new("../../etc/passwd");

        store.save(&key, &scanned_snapshot()).await.unwrap();
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
        assert!(store.load(&key).await.unwrap().is_some());
    }
}
