use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EkycConfig {
    /// Idle sessions older than this are evicted from the registry.
    #[serde(default = "default_session_ttl_secs")]
    pub session_ttl_secs: u64,

    pub ocr_upload_url: String,
    pub ocr_scan_url: String,
    pub face_ws_url: String,

    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,

    /// Best-effort wait after a frame send before reading the last result.
    /// Correlation is "most recent result", not per-frame.
    #[serde(default = "default_result_grace_ms")]
    pub result_grace_ms: u64,

    pub chat: ChatConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatConfig {
    pub base_url: String,
    pub model: String,

    // The key itself is stored outside this struct at rest.
    #[serde(default)]
    pub api_key_present: bool,
}

fn default_session_ttl_secs() -> u64 {
    3600
}

fn default_connect_timeout_secs() -> u64 {
    10
}

fn default_result_grace_ms() -> u64 {
    50
}

impl Default for EkycConfig {
    fn default() -> Self {
        Self {
            session_ttl_secs: default_session_ttl_secs(),
            ocr_upload_url: "http://localhost:8000/api/v1/ocr/upload-image".into(),
            ocr_scan_url: "http://localhost:8000/api/v1/ocr/scan-url".into(),
            face_ws_url: "ws://localhost:8000/api/v1/ocr/ws/verify".into(),
            connect_timeout_secs: default_connect_timeout_secs(),
            result_grace_ms: default_result_grace_ms(),
            chat: ChatConfig {
                base_url: "https://openrouter.ai/api/v1".into(),
                model: "z-ai/glm-4.5".into(),
                api_key_present: false,
            },
        }
    }
}
