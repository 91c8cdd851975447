use anyhow::anyhow;
use ekyc_engine::traits::{DocumentScan, OcrProvider};
use ekyc_providers::ocr::{
    OcrConfig, build_scan_request, build_upload_request, parse_scan_response,
    parse_upload_response,
};

/// OCR over the two-step HTTP contract: upload the document image to get a
/// locator, then scan that locator for fields.
#[derive(Debug, Clone)]
pub struct HttpOcrProvider {
    cfg: OcrConfig,
}

impl HttpOcrProvider {
    pub fn new(cfg: OcrConfig) -> Self {
        Self { cfg }
    }
}

#[async_trait::async_trait]
impl OcrProvider for HttpOcrProvider {
    async fn process(&self, image: &[u8], filename: &str) -> anyhow::Result<DocumentScan> {
        let req = build_upload_request(&self.cfg, image, filename);
        let resp = ekyc_providers::runtime::execute(&req).await?;
        if !(200..=299).contains(&resp.status) {
            return Err(anyhow!(
                "document upload failed: status={} body={}",
                resp.status,
                String::from_utf8_lossy(&resp.body)
            ));
        }
        let image_url = parse_upload_response(&resp.body)?;
        log::debug!("document uploaded: {image_url}");

        let req = build_scan_request(&self.cfg, &image_url);
        let resp = ekyc_providers::runtime::execute(&req).await?;
        if !(200..=299).contains(&resp.status) {
            return Err(anyhow!(
                "document scan failed: status={} body={}",
                resp.status,
                String::from_utf8_lossy(&resp.body)
            ));
        }
        let scan = parse_scan_response(&resp.body)?;

        Ok(DocumentScan { image_url, scan })
    }
}
