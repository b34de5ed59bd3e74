//! STAC dynamic backend, `stac+https://api.example.com/search` convention.
//!
//! Unlike the other backends this does not store a MosaicJSON document
//! at all: `read()` runs a STAC item search (optionally merging the
//! document's own `tiles`-building geometry into the caller's query)
//! and builds the mosaic on the fly from the result pages. Writes are
//! not supported — a STAC API is a read-only index of someone else's
//! catalog.

use async_trait::async_trait;
use serde_json::{json, Value};

use super::MosaicBackend;
use crate::builder::{from_features, AssetFeature, KeepAll, PathAccessor};
use crate::config::{BuilderOptions, StacOptions};
use crate::error::{MosaicError, Result};
use crate::model::MosaicJson;

pub struct StacBackend {
    search_url: String,
    options: StacOptions,
    builder_options: BuilderOptions,
    asset_key: String,
}

impl StacBackend {
    pub fn new(url: &str) -> Result<Self> {
        if url.is_empty() {
            return Err(MosaicError::Validation(
                "stac backend requires a search URL: stac+https://host/search".to_string(),
            ));
        }
        Ok(Self {
            search_url: url.to_string(),
            options: StacOptions::default(),
            builder_options: BuilderOptions::default(),
            asset_key: "visual".to_string(),
        })
    }

    pub fn with_options(mut self, options: StacOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_builder_options(mut self, options: BuilderOptions) -> Self {
        self.builder_options = options;
        self
    }

    /// Which STAC asset key's `href` becomes the mosaic asset URL.
    pub fn with_asset_key(mut self, key: impl Into<String>) -> Self {
        self.asset_key = key.into();
        self
    }

    async fn search_all(&self, geometry_filter: Option<&Value>) -> Result<Vec<AssetFeature>> {
        let client = reqwest::Client::new();
        let mut body = match &self.options.query {
            Value::Object(map) => map.clone(),
            _ => serde_json::Map::new(),
        };
        if let Some(geom) = geometry_filter {
            body.insert("intersects".to_string(), geom.clone());
        }
        body.insert(
            "limit".to_string(),
            json!(self.options.stac_query_limit),
        );

        let mut features = Vec::new();
        let mut next_url = Some(self.search_url.clone());
        let mut next_body = Some(Value::Object(body));

        while let Some(url) = next_url.take() {
            let Some(req_body) = next_body.take() else {
                break;
            };
            let resp = client
                .post(&url)
                .json(&req_body)
                .send()
                .await
                .map_err(|e| MosaicError::backend_with_source("stac", "search request failed", e))?
                .error_for_status()
                .map_err(|e| MosaicError::backend_with_source("stac", "search returned error status", e))?;
            let page: Value = resp
                .json()
                .await
                .map_err(|e| MosaicError::backend_with_source("stac", "invalid search response", e))?;

            for item in page
                .get("features")
                .and_then(|v| v.as_array())
                .cloned()
                .unwrap_or_default()
            {
                if let Some(feature) = self.item_to_feature(&item) {
                    features.push(feature);
                }
                if let Some(max) = self.options.max_items {
                    if features.len() >= max {
                        return Ok(features);
                    }
                }
            }

            next_url = page
                .get("links")
                .and_then(|v| v.as_array())
                .and_then(|links| {
                    links.iter().find(|l| {
                        l.get("rel").and_then(|r| r.as_str()) == Some(self.options.stac_next_link_key.as_str())
                    })
                })
                .and_then(|l| l.get("href"))
                .and_then(|h| h.as_str())
                .map(str::to_string);
            next_body = next_url.as_ref().map(|_| json!({}));
        }

        Ok(features)
    }

    fn item_to_feature(&self, item: &Value) -> Option<AssetFeature> {
        let href = item
            .get("assets")
            .and_then(|a| a.get(&self.asset_key))
            .and_then(|a| a.get("href"))
            .and_then(|h| h.as_str())?;
        let geometry_value = item.get("geometry")?.clone();
        let geometry = geojson::Geometry::new(serde_json::from_value(geometry_value).ok()?);
        Some(AssetFeature::new(href.to_string(), geometry))
    }
}

#[async_trait]
impl MosaicBackend for StacBackend {
    fn kind(&self) -> &'static str {
        "stac"
    }

    fn canonical_uri(&self) -> String {
        format!("stac+{}", self.search_url)
    }

    async fn exists(&self) -> Result<bool> {
        Ok(true)
    }

    async fn read(&self) -> Result<MosaicJson> {
        let features = self.search_all(None).await?;
        if features.is_empty() {
            return Err(MosaicError::MosaicNotFound(self.canonical_uri()));
        }
        from_features(&features, &self.builder_options, &PathAccessor, &KeepAll)
    }

    async fn write(&self, _doc: &MosaicJson, _overwrite: bool) -> Result<()> {
        Err(MosaicError::NotImplemented(
            "stac backend is a read-only dynamic search, writes are not supported",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn item(id: &str) -> serde_json::Value {
        serde_json::json!({
            "id": id,
            "geometry": {
                "type": "Polygon",
                "coordinates": [[[-10.0, -10.0], [10.0, -10.0], [10.0, 10.0], [-10.0, 10.0], [-10.0, -10.0]]],
            },
            "assets": {"visual": {"href": format!("https://example.com/{id}.tif")}},
        })
    }

    #[tokio::test]
    async fn follows_next_links_until_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "features": [item("a"), item("b")],
                "links": [{"rel": "next", "href": format!("{}/search/page2", server.uri())}],
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/search/page2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "features": [item("c")],
                "links": [],
            })))
            .mount(&server)
            .await;

        let backend = StacBackend::new(&format!("{}/search", server.uri())).unwrap();
        let features = backend.search_all(None).await.unwrap();
        assert_eq!(features.len(), 3);
    }

    #[tokio::test]
    async fn max_items_caps_pagination() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "features": [item("a"), item("b"), item("c")],
                "links": [{"rel": "next", "href": format!("{}/search/page2", server.uri())}],
            })))
            .mount(&server)
            .await;

        let backend = StacBackend::new(&format!("{}/search", server.uri()))
            .unwrap()
            .with_options(StacOptions {
                max_items: Some(2),
                ..StacOptions::default()
            });
        let features = backend.search_all(None).await.unwrap();
        assert_eq!(features.len(), 2);
    }

    #[tokio::test]
    async fn read_builds_a_mosaic_from_search_results() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "features": [item("a")],
                "links": [],
            })))
            .mount(&server)
            .await;

        let backend = StacBackend::new(&format!("{}/search", server.uri())).unwrap();
        let doc = backend.read().await.unwrap();
        assert!(doc.tiles.values().any(|v| v.contains(&"https://example.com/a.tif".to_string())));
    }

    #[tokio::test]
    async fn write_is_not_implemented() {
        let backend = StacBackend::new("https://example.com/search").unwrap();
        let doc = MosaicJson {
            mosaicjson: "0.0.2".to_string(),
            name: None,
            description: None,
            attribution: None,
            version: "1.0.0".to_string(),
            minzoom: 0,
            maxzoom: 1,
            quadkey_zoom: None,
            bounds: [-180.0, -90.0, 180.0, 90.0],
            center: [0.0, 0.0, 0.0],
            tiles: Default::default(),
            tilematrixset: None,
            asset_type: None,
            asset_prefix: None,
            data_type: None,
            colormap: None,
            layers: None,
        };
        assert!(matches!(
            backend.write(&doc, true).await.unwrap_err(),
            MosaicError::NotImplemented(_)
        ));
    }
}
