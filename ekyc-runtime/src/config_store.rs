use anyhow::Context;
use ekyc_core::config::EkycConfig;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn at_path(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> anyhow::Result<EkycConfig> {
        let bytes = std::fs::read(&self.path)
            .with_context(|| format!("read config: {}", self.path.display()))?;
        let cfg: EkycConfig = serde_json::from_slice(&bytes).context("decode config JSON")?;
        Ok(cfg)
    }

    /// Missing file yields defaults; a present but corrupt file is an error
    /// so a typo never silently reverts live endpoints.
    pub fn load_or_default(&self) -> anyhow::Result<EkycConfig> {
        if !self.path.exists() {
            return Ok(EkycConfig::default());
        }
        self.load()
    }

    pub fn save(&self, cfg: &EkycConfig) -> anyhow::Result<()> {
        let json = serde_json::to_vec_pretty(cfg).context("encode config JSON")?;
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("create config directory: {}", parent.display()))?;
        }

        crate::snapshots::write_json_atomic(&self.path, &json)
            .with_context(|| format!("save config: {}", self.path.display()))
    }
}
