use crate::request::{Body, HttpRequest};
use anyhow::{Context, anyhow};
use std::time::Duration;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(60);
const IMAGE_FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

fn client(total_timeout: Duration) -> anyhow::Result<reqwest::Client> {
    // An unbounded call would let a broken collaborator hang a verification
    // session indefinitely.
    reqwest::Client::builder()
        .connect_timeout(CONNECT_TIMEOUT)
        .timeout(total_timeout)
        .build()
        .context("build http client")
}

/// Sends one collaborator request (OCR upload/scan, chat completion). All
/// request builders in this crate produce POSTs; anything else is a bug in
/// the caller.
pub async fn execute(req: &HttpRequest) -> anyhow::Result<HttpResponse> {
    if req.method != "POST" {
        return Err(anyhow!("collaborator calls are POST-only, got {}", req.method));
    }

    let mut builder = client(COLLABORATOR_TIMEOUT)?.post(&req.url);
    for (name, value) in &req.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    let builder = match &req.body {
        Body::Empty => builder,
        Body::Json(json) => builder.body(json.clone()),
        Body::MultipartFormData { bytes, .. } => builder.body(bytes.clone()),
    };

    let resp = builder
        .send()
        .await
        .with_context(|| format!("POST {}", req.url))?;

    let status = resp.status().as_u16();
    let body = resp.bytes().await.context("read response body")?.to_vec();
    Ok(HttpResponse { status, body })
}

/// Downloads an image (reference or probe) for verification. Non-2xx is an
/// error so an unreachable image surfaces as a fetch failure, not bad data.
pub async fn fetch_image(url: &str) -> anyhow::Result<Vec<u8>> {
    let resp = client(IMAGE_FETCH_TIMEOUT)?
        .get(url)
        .send()
        .await
        .with_context(|| format!("fetch image: {url}"))?;

    let status = resp.status();
    if !status.is_success() {
        return Err(anyhow!("image fetch {url} returned {status}"));
    }

    Ok(resp.bytes().await.context("read image body")?.to_vec())
}
