//! Storage backend abstraction and URI-scheme dispatch.
//!
//! A [`MosaicBackend`] owns the read/write/exists/delete contract for
//! one storage convention; [`open`] resolves a URI's scheme prefix to
//! the right implementation, the way the teacher's `SourceManager`
//! dispatches on `config.path`'s `http://`/`s3://` prefix rather than a
//! type tag in the config.

pub mod azure;
pub mod dynamodb;
pub mod file;
pub mod gcs;
pub mod http;
pub mod memory;
pub mod s3;
pub mod sqlite;
pub mod stac;

use std::sync::Arc;

use async_trait::async_trait;

use crate::cache::{DocumentCache, DocumentCacheKey};
use crate::error::{MosaicError, Result};
use crate::model::MosaicJson;

/// A storage backend for MosaicJSON documents.
///
/// Every method operates against the single document identified when
/// the backend was opened (file path, S3 key, SQLite mosaic name,
/// etc.) — a backend instance is scoped to one mosaic, not a whole
/// bucket or database.
#[async_trait]
pub trait MosaicBackend: Send + Sync {
    /// Short identifier used as the cache-key namespace and in error
    /// messages (`"file"`, `"s3"`, `"sqlite"`, ...).
    fn kind(&self) -> &'static str;

    /// A canonical form of this backend's URI, stable across
    /// equivalent spellings, used as the cache key.
    fn canonical_uri(&self) -> String;

    /// Whether a document currently exists at this location.
    async fn exists(&self) -> Result<bool>;

    /// Fetch and parse the document. Transparently gunzips payloads
    /// whose URI or declared encoding indicates gzip.
    async fn read(&self) -> Result<MosaicJson>;

    /// Persist `doc`, failing with [`MosaicError::MosaicExists`] if a
    /// document already exists here and `overwrite` is false.
    async fn write(&self, doc: &MosaicJson, overwrite: bool) -> Result<()>;

    /// Remove the document, if supported by this backend.
    async fn delete(&self) -> Result<()> {
        Err(MosaicError::NotImplemented("delete"))
    }
}

/// A backend plus the shared document cache, handing out parsed
/// documents without re-fetching/re-parsing on every query when the
/// cache is warm.
pub struct BackendHandle {
    backend: Arc<dyn MosaicBackend>,
    cache: DocumentCache,
}

impl BackendHandle {
    pub fn new(backend: Arc<dyn MosaicBackend>, cache: DocumentCache) -> Self {
        Self { backend, cache }
    }

    fn cache_key(&self) -> DocumentCacheKey {
        DocumentCacheKey::new(self.backend.kind(), self.backend.canonical_uri())
    }

    pub async fn read(&self) -> Result<Arc<MosaicJson>> {
        let key = self.cache_key();
        if let Some(doc) = self.cache.get(&key).await {
            return Ok(doc);
        }
        let doc = Arc::new(self.backend.read().await?);
        self.cache.insert(key, Arc::clone(&doc)).await;
        Ok(doc)
    }

    pub async fn write(&self, doc: &MosaicJson, overwrite: bool) -> Result<()> {
        self.backend.write(doc, overwrite).await?;
        self.cache.invalidate(&self.cache_key()).await;
        Ok(())
    }

    pub async fn delete(&self) -> Result<()> {
        self.backend.delete().await?;
        self.cache.invalidate(&self.cache_key()).await;
        Ok(())
    }

    pub async fn exists(&self) -> Result<bool> {
        self.backend.exists().await
    }
}

/// Resolve a mosaic URI to its backend, by scheme-exact dispatch:
///
/// - `file://...` or a bare path -> [`file::FileBackend`]
/// - `http://...` / `https://...` -> [`http::HttpBackend`]
/// - `stac+http://...` / `stac+https://...` -> [`stac::StacBackend`]
/// - `s3://bucket/key` -> [`s3::S3Backend`]
/// - `gs://bucket/key` -> [`gcs::GcsBackend`]
/// - `az://container/key` -> [`azure::AzureBackend`]
/// - `dynamodb://[region]/table:name` -> [`dynamodb::DynamoDbBackend`]
/// - `sqlite:///path.db:name` -> [`sqlite::SqliteBackend`]
/// - `memory://name` -> [`memory::MemoryBackend`]
pub async fn open(uri: &str) -> Result<Arc<dyn MosaicBackend>> {
    if let Some(rest) = uri.strip_prefix("stac+") {
        return Ok(Arc::new(stac::StacBackend::new(rest)?));
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        return Ok(Arc::new(http::HttpBackend::new(uri)));
    }
    if let Some(rest) = uri.strip_prefix("s3://") {
        return Ok(Arc::new(s3::S3Backend::new(rest).await?));
    }
    if let Some(rest) = uri.strip_prefix("gs://") {
        return Ok(Arc::new(gcs::GcsBackend::new(rest).await?));
    }
    if let Some(rest) = uri.strip_prefix("az://") {
        return Ok(Arc::new(azure::AzureBackend::new(rest).await?));
    }
    if let Some(rest) = uri.strip_prefix("dynamodb://") {
        return Ok(Arc::new(dynamodb::DynamoDbBackend::new(rest).await?));
    }
    if let Some(rest) = uri.strip_prefix("sqlite://") {
        return Ok(Arc::new(sqlite::SqliteBackend::new(rest)?));
    }
    if let Some(rest) = uri.strip_prefix("memory://") {
        return Ok(Arc::new(memory::MemoryBackend::named(rest)));
    }
    if let Some(rest) = uri.strip_prefix("file://") {
        return Ok(Arc::new(file::FileBackend::new(rest)));
    }
    Ok(Arc::new(file::FileBackend::new(uri)))
}
