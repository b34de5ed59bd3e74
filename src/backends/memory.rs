//! In-process backend: documents live only for the lifetime of the
//! process, keyed by an opaque name. Used for tests and for building a
//! mosaic purely for querying without ever persisting it.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::MosaicBackend;
use crate::error::{MosaicError, Result};
use crate::model::MosaicJson;

static REGISTRY: once_cell::sync::Lazy<RwLock<std::collections::HashMap<String, MosaicJson>>> =
    once_cell::sync::Lazy::new(|| RwLock::new(std::collections::HashMap::new()));

pub struct MemoryBackend {
    name: String,
}

impl MemoryBackend {
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Insert a document directly, bypassing `exists`/`overwrite`
    /// checks. Intended for test setup.
    pub async fn seed(name: impl Into<String>, doc: MosaicJson) {
        REGISTRY.write().await.insert(name.into(), doc);
    }
}

#[async_trait]
impl MosaicBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn canonical_uri(&self) -> String {
        format!("memory://{}", self.name)
    }

    async fn exists(&self) -> Result<bool> {
        Ok(REGISTRY.read().await.contains_key(&self.name))
    }

    async fn read(&self) -> Result<MosaicJson> {
        REGISTRY
            .read()
            .await
            .get(&self.name)
            .cloned()
            .ok_or_else(|| MosaicError::MosaicNotFound(self.canonical_uri()))
    }

    async fn write(&self, doc: &MosaicJson, overwrite: bool) -> Result<()> {
        let mut registry = REGISTRY.write().await;
        if !overwrite && registry.contains_key(&self.name) {
            return Err(MosaicError::MosaicExists(self.canonical_uri()));
        }
        registry.insert(self.name.clone(), doc.clone());
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        REGISTRY.write().await.remove(&self.name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SPEC_VERSION_0_0_2;
    use std::collections::BTreeMap;

    fn doc() -> MosaicJson {
        MosaicJson {
            mosaicjson: SPEC_VERSION_0_0_2.to_string(),
            name: None,
            description: None,
            attribution: None,
            version: "1.0.0".to_string(),
            minzoom: 0,
            maxzoom: 1,
            quadkey_zoom: None,
            bounds: [-180.0, -90.0, 180.0, 90.0],
            center: [0.0, 0.0, 0.0],
            tiles: BTreeMap::new(),
            tilematrixset: None,
            asset_type: None,
            asset_prefix: None,
            data_type: None,
            colormap: None,
            layers: None,
        }
    }

    #[tokio::test]
    async fn write_then_read_roundtrips() {
        let backend = MemoryBackend::named("test-roundtrip");
        backend.write(&doc(), true).await.unwrap();
        assert!(backend.exists().await.unwrap());
        let read_back = backend.read().await.unwrap();
        assert_eq!(read_back.version, "1.0.0");
    }

    #[tokio::test]
    async fn write_without_overwrite_rejects_existing() {
        let backend = MemoryBackend::named("test-no-overwrite");
        backend.write(&doc(), true).await.unwrap();
        let err = backend.write(&doc(), false).await.unwrap_err();
        assert!(matches!(err, MosaicError::MosaicExists(_)));
    }

    #[tokio::test]
    async fn read_missing_is_not_found() {
        let backend = MemoryBackend::named("test-missing-xyz");
        assert!(matches!(
            backend.read().await.unwrap_err(),
            MosaicError::MosaicNotFound(_)
        ));
    }
}
