//! Environment-sourced configuration.
//!
//! The mosaic core enumerates its recognized options as structs rather
//! than accepting opaque maps (see the configuration-bag design note):
//! builder options, STAC backend options, and raster-reader options are
//! each their own type, all constructible with sane defaults and
//! overridable from environment variables the way the teacher's
//! `ServerConfig`/`TelemetryConfig` pick up `TILESERVER_*` env vars.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::query::PixelSelection;

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key)
        .ok()
        .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"))
        .unwrap_or(default)
}

/// Process-wide document cache configuration, read from
/// `MOSAIC_CACHE_TTL`, `MOSAIC_CACHE_SIZE`, `MOSAIC_DISABLE_CACHE`.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub ttl: Duration,
    pub max_entries: u64,
    pub disabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(300),
            max_entries: 512,
            disabled: false,
        }
    }
}

impl CacheConfig {
    pub fn from_env() -> Self {
        Self {
            ttl: Duration::from_secs(env_u64("MOSAIC_CACHE_TTL", 300)),
            max_entries: env_u64("MOSAIC_CACHE_SIZE", 512),
            disabled: env_bool("MOSAIC_DISABLE_CACHE", false),
        }
    }
}

/// Worker-pool sizing for per-asset I/O fan-out, read from `MAX_THREADS`.
#[derive(Debug, Clone, Copy)]
pub struct ReaderConfig {
    pub threads: usize,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self { threads: 10 }
    }
}

impl ReaderConfig {
    pub fn from_env() -> Self {
        Self {
            threads: env_usize("MAX_THREADS", 10),
        }
    }
}

/// Default AWS region for the DynamoDB backend when a URI omits one,
/// read from `AWS_REGION`.
pub fn default_aws_region() -> Option<String> {
    std::env::var("AWS_REGION").ok()
}

/// Options accepted by the index builder (`from_features`/`from_urls`).
#[derive(Debug, Clone)]
pub struct BuilderOptions {
    pub minzoom: u8,
    pub maxzoom: u8,
    pub quadkey_zoom: Option<u8>,
    pub tms_id: String,
    pub min_tile_cover: Option<f64>,
    pub tile_cover_sort: bool,
    pub quiet: bool,
}

impl Default for BuilderOptions {
    fn default() -> Self {
        Self {
            minzoom: 0,
            maxzoom: 22,
            quadkey_zoom: None,
            tms_id: "WebMercatorQuad".to_string(),
            min_tile_cover: None,
            tile_cover_sort: false,
            quiet: false,
        }
    }
}

/// Options accepted by the dynamic STAC backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StacOptions {
    #[serde(default)]
    pub query: serde_json::Value,
    pub max_items: Option<usize>,
    #[serde(default = "default_stac_query_limit")]
    pub stac_query_limit: usize,
    #[serde(default = "default_stac_next_link_key")]
    pub stac_next_link_key: String,
}

fn default_stac_query_limit() -> usize {
    100
}

fn default_stac_next_link_key() -> String {
    "next".to_string()
}

impl Default for StacOptions {
    fn default() -> Self {
        Self {
            query: serde_json::Value::Object(Default::default()),
            max_items: None,
            stac_query_limit: default_stac_query_limit(),
            stac_next_link_key: default_stac_next_link_key(),
        }
    }
}

/// Options accepted by the raster-reader delegation in the query layer.
#[derive(Debug, Clone)]
pub struct ReaderOptions {
    pub threads: usize,
    pub pixel_selection: PixelSelection,
    pub reverse: bool,
}

impl Default for ReaderOptions {
    fn default() -> Self {
        Self {
            threads: ReaderConfig::default().threads,
            pixel_selection: PixelSelection::First,
            reverse: false,
        }
    }
}
