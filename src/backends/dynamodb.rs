//! DynamoDB backend, `dynamodb://[region]/table:mosaic_name` convention.
//!
//! One DynamoDB table can hold many mosaics, partitioned by
//! `mosaicId`. Within a mosaic's partition, metadata (everything but
//! `tiles`) is stored under the sentinel sort key `quadkey = "-1"`;
//! every other item is one quadkey's asset list.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue;

use super::MosaicBackend;
use crate::error::{MosaicError, Result};
use crate::model::MosaicJson;

const METADATA_SORT_KEY: &str = "-1";

pub struct DynamoDbBackend {
    client: aws_sdk_dynamodb::Client,
    table: String,
    mosaic_name: String,
}

impl DynamoDbBackend {
    pub async fn new(rest: &str) -> Result<Self> {
        // rest is either "region/table:name" or "table:name" (region from env/profile).
        let (region, table_and_name) = match rest.split_once('/') {
            Some((region, remainder)) => (Some(region.to_string()), remainder),
            None => (crate::config::default_aws_region(), rest),
        };
        let (table, mosaic_name) = table_and_name.split_once(':').ok_or_else(|| {
            MosaicError::Validation(format!(
                "dynamodb uri must be dynamodb://[region]/table:name, got dynamodb://{rest}"
            ))
        })?;
        if table.is_empty() || mosaic_name.is_empty() {
            return Err(MosaicError::Validation(format!(
                "dynamodb uri must be dynamodb://[region]/table:name, got dynamodb://{rest}"
            )));
        }

        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_sdk_dynamodb::config::Region::new(region));
        }
        let config = loader.load().await;
        Ok(Self {
            client: aws_sdk_dynamodb::Client::new(&config),
            table: table.to_string(),
            mosaic_name: mosaic_name.to_string(),
        })
    }
}

#[async_trait]
impl MosaicBackend for DynamoDbBackend {
    fn kind(&self) -> &'static str {
        "dynamodb"
    }

    fn canonical_uri(&self) -> String {
        format!("dynamodb://{}:{}", self.table, self.mosaic_name)
    }

    async fn exists(&self) -> Result<bool> {
        let resp = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("mosaicId", AttributeValue::S(self.mosaic_name.clone()))
            .key("quadkey", AttributeValue::S(METADATA_SORT_KEY.to_string()))
            .send()
            .await
            .map_err(|e| MosaicError::backend_with_source("dynamodb", "get_item failed", e))?;
        Ok(resp.item.is_some())
    }

    async fn read(&self) -> Result<MosaicJson> {
        let metadata_resp = self
            .client
            .get_item()
            .table_name(&self.table)
            .key("mosaicId", AttributeValue::S(self.mosaic_name.clone()))
            .key("quadkey", AttributeValue::S(METADATA_SORT_KEY.to_string()))
            .send()
            .await
            .map_err(|e| MosaicError::backend_with_source("dynamodb", "get_item failed", e))?;
        let metadata_item = metadata_resp
            .item
            .ok_or_else(|| MosaicError::MosaicNotFound(self.canonical_uri()))?;
        let metadata_json = attribute_value_to_json(&AttributeValue::M(metadata_item))?;
        let mut doc: MosaicJson = serde_json::from_value(metadata_json)?;

        let mut tiles = BTreeMap::new();
        let mut last_key = None;
        loop {
            let mut query = self
                .client
                .query()
                .table_name(&self.table)
                .key_condition_expression("mosaicId = :id AND quadkey <> :meta")
                .expression_attribute_values(":id", AttributeValue::S(self.mosaic_name.clone()))
                .expression_attribute_values(
                    ":meta",
                    AttributeValue::S(METADATA_SORT_KEY.to_string()),
                );
            if let Some(key) = last_key.take() {
                query = query.set_exclusive_start_key(Some(key));
            }
            let resp = query
                .send()
                .await
                .map_err(|e| MosaicError::backend_with_source("dynamodb", "query failed", e))?;
            for item in resp.items() {
                let quadkey = item
                    .get("quadkey")
                    .and_then(|v| v.as_s().ok())
                    .cloned()
                    .unwrap_or_default();
                let assets = item
                    .get("assets")
                    .map(|v| attribute_value_to_json(v))
                    .transpose()?
                    .map(|v| serde_json::from_value::<Vec<String>>(v))
                    .transpose()?
                    .unwrap_or_default();
                tiles.insert(quadkey, assets);
            }
            last_key = resp.last_evaluated_key().cloned();
            if last_key.is_none() {
                break;
            }
        }
        doc.tiles = tiles;
        Ok(doc)
    }

    async fn write(&self, doc: &MosaicJson, overwrite: bool) -> Result<()> {
        if !overwrite && self.exists().await? {
            return Err(MosaicError::MosaicExists(self.canonical_uri()));
        }

        let mut metadata = serde_json::to_value(doc)?;
        if let serde_json::Value::Object(ref mut map) = metadata {
            map.remove("tiles");
        }
        let mut metadata_item = json_to_attribute_map(&metadata)?;
        metadata_item.insert("mosaicId".to_string(), AttributeValue::S(self.mosaic_name.clone()));
        metadata_item.insert(
            "quadkey".to_string(),
            AttributeValue::S(METADATA_SORT_KEY.to_string()),
        );
        self.client
            .put_item()
            .table_name(&self.table)
            .set_item(Some(metadata_item))
            .send()
            .await
            .map_err(|e| MosaicError::backend_with_source("dynamodb", "put_item (metadata) failed", e))?;

        for (quadkey, assets) in &doc.tiles {
            let assets_av = AttributeValue::L(
                assets.iter().cloned().map(AttributeValue::S).collect(),
            );
            self.client
                .put_item()
                .table_name(&self.table)
                .item("mosaicId", AttributeValue::S(self.mosaic_name.clone()))
                .item("quadkey", AttributeValue::S(quadkey.clone()))
                .item("assets", assets_av)
                .send()
                .await
                .map_err(|e| {
                    MosaicError::backend_with_source("dynamodb", "put_item (tile) failed", e)
                })?;
        }
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        Err(MosaicError::NotImplemented(
            "dynamodb backend delete requires enumerating every quadkey item; not supported",
        ))
    }
}

fn attribute_value_to_json(value: &AttributeValue) -> Result<serde_json::Value> {
    Ok(match value {
        AttributeValue::S(s) => serde_json::Value::String(s.clone()),
        AttributeValue::N(n) => serde_json::Number::from_f64(n.parse().unwrap_or(0.0))
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null),
        AttributeValue::Bool(b) => serde_json::Value::Bool(*b),
        AttributeValue::Null(_) => serde_json::Value::Null,
        AttributeValue::L(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(attribute_value_to_json(item)?);
            }
            serde_json::Value::Array(out)
        }
        AttributeValue::M(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), attribute_value_to_json(v)?);
            }
            serde_json::Value::Object(out)
        }
        other => {
            return Err(MosaicError::backend(
                "dynamodb",
                format!("unsupported attribute value variant: {other:?}"),
            ))
        }
    })
}

fn json_to_attribute_map(value: &serde_json::Value) -> Result<HashMap<String, AttributeValue>> {
    match value {
        serde_json::Value::Object(map) => {
            let mut out = HashMap::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), json_to_attribute_value(v)?);
            }
            Ok(out)
        }
        _ => Err(MosaicError::Validation(
            "mosaic metadata must serialize to a JSON object".to_string(),
        )),
    }
}

fn json_to_attribute_value(value: &serde_json::Value) -> Result<AttributeValue> {
    Ok(match value {
        serde_json::Value::Null => AttributeValue::Null(true),
        serde_json::Value::Bool(b) => AttributeValue::Bool(*b),
        serde_json::Value::Number(n) => AttributeValue::N(n.to_string()),
        serde_json::Value::String(s) => AttributeValue::S(s.clone()),
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(json_to_attribute_value(item)?);
            }
            AttributeValue::L(out)
        }
        serde_json::Value::Object(_) => AttributeValue::M(json_to_attribute_map(value)?),
    })
}
