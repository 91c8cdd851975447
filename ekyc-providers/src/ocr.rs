use crate::request::{Body, HttpRequest, multipart_file_body};
use anyhow::{Context, anyhow};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OcrConfig {
    pub upload_url: String,
    pub scan_url: String,
}

/// Structured fields extracted from an ID document. This layer stores and
/// forwards them; it never interprets individual fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanResult {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub document_type: Option<String>,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default = "default_status")]
    pub status: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub fields: serde_json::Map<String, Value>,
}

fn default_status() -> String {
    "success".into()
}

impl Default for ScanResult {
    fn default() -> Self {
        Self {
            text: None,
            document_type: None,
            display_name: None,
            confidence: None,
            status: default_status(),
            message: None,
            fields: serde_json::Map::new(),
        }
    }
}

impl ScanResult {
    /// A scan is usable when the service reported success and we got either
    /// a recognized document type or at least one extracted field.
    pub fn is_successful(&self) -> bool {
        self.status == "success" && (self.document_type.is_some() || !self.fields.is_empty())
    }
}

pub fn build_upload_request(cfg: &OcrConfig, content: &[u8], filename: &str) -> HttpRequest {
    let (boundary, bytes) = multipart_file_body("file", filename, content);

    HttpRequest {
        method: "POST".into(),
        url: cfg.upload_url.clone(),
        headers: vec![(
            "Content-Type".into(),
            format!("multipart/form-data; boundary={boundary}"),
        )],
        body: Body::MultipartFormData { boundary, bytes },
    }
}

pub fn build_scan_request(cfg: &OcrConfig, image_url: &str) -> HttpRequest {
    HttpRequest {
        method: "POST".into(),
        url: cfg.scan_url.clone(),
        headers: vec![("Content-Type".into(), "application/json".into())],
        body: Body::Json(json!({ "url": image_url }).to_string()),
    }
}

/// The upload endpoint replies with either a bare URL string or an object
/// carrying a `url` field (and optionally `success: false` with an error).
pub fn parse_upload_response(body: &[u8]) -> anyhow::Result<String> {
    let v: Value = serde_json::from_slice(body).context("decode OCR upload JSON")?;

    if let Some(url) = v.as_str() {
        return Ok(url.to_string());
    }

    if v.get("success").and_then(|s| s.as_bool()) == Some(false) {
        let err = v.get("error").and_then(|e| e.as_str()).unwrap_or("unknown error");
        return Err(anyhow!("OCR upload rejected: {err}"));
    }

    v.get("url")
        .and_then(|u| u.as_str())
        .map(|u| u.to_string())
        .ok_or_else(|| anyhow!("no image URL in OCR upload response"))
}

/// Tolerant scan-response decoding: `text` and `display_name` arrive as
/// either a string or a list of lines, and the bulky `img_base64` echo is
/// dropped rather than carried around.
pub fn parse_scan_response(body: &[u8]) -> anyhow::Result<ScanResult> {
    let v: Value = serde_json::from_slice(body).context("decode OCR scan JSON")?;
    let obj = v.as_object().ok_or_else(|| anyhow!("OCR scan response is not an object"))?;

    let text = string_or_joined_list(obj.get("text"), "\n");
    let display_name = string_or_joined_list(obj.get("display_name"), " ");

    let fields = obj
        .get("fields")
        .and_then(|f| f.as_object())
        .cloned()
        .unwrap_or_default();

    Ok(ScanResult {
        text,
        document_type: obj.get("document_type").and_then(|d| d.as_str()).map(String::from),
        display_name,
        confidence: obj.get("confidence").and_then(|c| c.as_f64()),
        status: obj
            .get("status")
            .and_then(|s| s.as_str())
            .unwrap_or("success")
            .to_string(),
        message: obj.get("message").and_then(|m| m.as_str()).map(String::from),
        fields,
    })
}

fn string_or_joined_list(v: Option<&Value>, sep: &str) -> Option<String> {
    match v? {
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => Some(
            items
                .iter()
                .map(|i| match i {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                })
                .collect::<Vec<_>>()
                .join(sep),
        ),
        _ => None,
    }
}
