//! Read-only HTTP(S) backend. Mirrors the teacher's `HttpPmTilesSource`
//! in spirit (a `reqwest::Client` fetching a remote resource) but reads
//! the whole document body rather than range-requesting tiles, since a
//! MosaicJSON document is small enough to hold in memory entirely.

use std::io::Read;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use once_cell::sync::Lazy;

use super::MosaicBackend;
use crate::error::{MosaicError, Result};
use crate::model::MosaicJson;

static CLIENT: Lazy<reqwest::Client> = Lazy::new(|| {
    reqwest::Client::builder()
        .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
        .build()
        .expect("reqwest client should always build with no custom TLS config")
});

pub struct HttpBackend {
    url: String,
}

impl HttpBackend {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    fn is_gzip(&self) -> bool {
        self.url.to_lowercase().ends_with(".gz")
    }
}

#[async_trait]
impl MosaicBackend for HttpBackend {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn canonical_uri(&self) -> String {
        self.url.clone()
    }

    async fn exists(&self) -> Result<bool> {
        let resp = CLIENT
            .head(&self.url)
            .send()
            .await
            .map_err(|e| MosaicError::backend_with_source("http", "HEAD request failed", e))?;
        Ok(resp.status().is_success())
    }

    async fn read(&self) -> Result<MosaicJson> {
        let resp = CLIENT
            .get(&self.url)
            .send()
            .await
            .map_err(|e| MosaicError::backend_with_source("http", "GET request failed", e))?;
        if resp.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(MosaicError::MosaicNotFound(self.url.clone()));
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| MosaicError::backend_with_source("http", "non-success status", e))?;
        let gzip_content_encoding = resp
            .headers()
            .get(reqwest::header::CONTENT_ENCODING)
            .map(|v| v.as_bytes() == b"gzip")
            .unwrap_or(false);
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| MosaicError::backend_with_source("http", "failed reading body", e))?;

        // reqwest transparently decodes Content-Encoding: gzip unless the
        // `gzip` feature is disabled, which it is here; decode ourselves
        // when the body is still compressed, whether signaled by header
        // or the URL's own `.gz` suffix.
        let body = if gzip_content_encoding || self.is_gzip() {
            let mut decoder = GzDecoder::new(bytes.as_ref());
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| MosaicError::backend_with_source("http", "gzip decode failed", e))?;
            out
        } else {
            bytes.to_vec()
        };
        Ok(serde_json::from_slice(&body)?)
    }

    async fn write(&self, _doc: &MosaicJson, _overwrite: bool) -> Result<()> {
        Err(MosaicError::NotImplemented("http backend is read-only"))
    }
}
