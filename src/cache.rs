//! Process-wide cache of parsed [`MosaicJson`] documents.
//!
//! Grounded on the teacher's `TileCache` (`moka::future::Cache` keyed
//! by source identity), generalized from tile bytes to whole parsed
//! documents keyed by backend kind + canonicalized URI, since backends
//! here cache the document rather than per-tile output.

use std::sync::Arc;

use moka::future::Cache;

use crate::config::CacheConfig;
use crate::model::MosaicJson;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct DocumentCacheKey {
    pub backend_kind: &'static str,
    pub canonical_uri: String,
}

impl DocumentCacheKey {
    pub fn new(backend_kind: &'static str, canonical_uri: impl Into<String>) -> Self {
        Self {
            backend_kind,
            canonical_uri: canonical_uri.into(),
        }
    }
}

#[derive(Clone)]
pub struct DocumentCache {
    cache: Option<Cache<DocumentCacheKey, Arc<MosaicJson>>>,
}

impl DocumentCache {
    pub fn new(config: &CacheConfig) -> Self {
        if config.disabled {
            return Self { cache: None };
        }
        let cache = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();
        Self { cache: Some(cache) }
    }

    pub fn disabled() -> Self {
        Self { cache: None }
    }

    pub async fn get(&self, key: &DocumentCacheKey) -> Option<Arc<MosaicJson>> {
        match &self.cache {
            Some(cache) => cache.get(key).await,
            None => None,
        }
    }

    pub async fn insert(&self, key: DocumentCacheKey, value: Arc<MosaicJson>) {
        if let Some(cache) = &self.cache {
            cache.insert(key, value).await;
        }
    }

    pub async fn invalidate(&self, key: &DocumentCacheKey) {
        if let Some(cache) = &self.cache {
            cache.invalidate(key).await;
        }
    }

    pub fn entry_count(&self) -> u64 {
        self.cache.as_ref().map(|c| c.entry_count()).unwrap_or(0)
    }
}

impl Default for DocumentCache {
    fn default() -> Self {
        Self::new(&CacheConfig::default())
    }
}

impl std::fmt::Debug for DocumentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentCache")
            .field("entry_count", &self.entry_count())
            .field("enabled", &self.cache.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SPEC_VERSION_0_0_2;
    use std::collections::BTreeMap;

    fn doc() -> Arc<MosaicJson> {
        Arc::new(MosaicJson {
            mosaicjson: SPEC_VERSION_0_0_2.to_string(),
            name: None,
            description: None,
            attribution: None,
            version: "1.0.0".to_string(),
            minzoom: 0,
            maxzoom: 10,
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
        })
    }

    #[tokio::test]
    async fn insert_then_get_roundtrips() {
        let cache = DocumentCache::new(&CacheConfig::default());
        let key = DocumentCacheKey::new("file", "/tmp/x.json.gz");
        cache.insert(key.clone(), doc()).await;
        assert!(cache.get(&key).await.is_some());
    }

    #[tokio::test]
    async fn miss_on_unknown_key() {
        let cache = DocumentCache::new(&CacheConfig::default());
        let key = DocumentCacheKey::new("file", "/tmp/missing.json");
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn disabled_cache_never_retains() {
        let cache = DocumentCache::new(&CacheConfig {
            disabled: true,
            ..CacheConfig::default()
        });
        let key = DocumentCacheKey::new("file", "/tmp/x.json");
        cache.insert(key.clone(), doc()).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn invalidate_removes_entry() {
        let cache = DocumentCache::new(&CacheConfig::default());
        let key = DocumentCacheKey::new("file", "/tmp/x.json");
        cache.insert(key.clone(), doc()).await;
        cache.invalidate(&key).await;
        cache.cache.as_ref().unwrap().run_pending_tasks().await;
        assert!(cache.get(&key).await.is_none());
    }
}
