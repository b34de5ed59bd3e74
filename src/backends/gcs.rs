//! Google Cloud Storage backend, `gs://bucket/key` convention.
//!
//! No repo in the retrieval pack touches GCS; this is a standard
//! ecosystem choice (the `google-cloud-storage` crate is the
//! conventional GCS client for async Rust) rather than something
//! grounded on teacher code.

use std::io::Read;

use async_trait::async_trait;
use flate2::read::GzDecoder;
use google_cloud_storage::client::{Client, ClientConfig};
use google_cloud_storage::http::objects::delete::DeleteObjectRequest;
use google_cloud_storage::http::objects::download::Range;
use google_cloud_storage::http::objects::get::GetObjectRequest;
use google_cloud_storage::http::objects::upload::{Media, UploadObjectRequest, UploadType};

use super::MosaicBackend;
use crate::error::{MosaicError, Result};
use crate::model::MosaicJson;

pub struct GcsBackend {
    client: Client,
    bucket: String,
    object: String,
}

impl GcsBackend {
    pub async fn new(rest: &str) -> Result<Self> {
        let (bucket, object) = rest.split_once('/').ok_or_else(|| {
            MosaicError::Validation(format!("gcs uri must be gs://bucket/key, got gs://{rest}"))
        })?;
        if bucket.is_empty() || object.is_empty() {
            return Err(MosaicError::Validation(format!(
                "gcs uri must be gs://bucket/key, got gs://{rest}"
            )));
        }
        let config = ClientConfig::default()
            .with_auth()
            .await
            .map_err(|e| MosaicError::backend_with_source("gcs", "auth failed", e))?;
        Ok(Self {
            client: Client::new(config),
            bucket: bucket.to_string(),
            object: object.to_string(),
        })
    }

    fn is_gzip(&self) -> bool {
        self.object.to_lowercase().ends_with(".gz")
    }
}

#[async_trait]
impl MosaicBackend for GcsBackend {
    fn kind(&self) -> &'static str {
        "gcs"
    }

    fn canonical_uri(&self) -> String {
        format!("gs://{}/{}", self.bucket, self.object)
    }

    async fn exists(&self) -> Result<bool> {
        let req = GetObjectRequest {
            bucket: self.bucket.clone(),
            object: self.object.clone(),
            ..Default::default()
        };
        match self.client.get_object(&req).await {
            Ok(_) => Ok(true),
            Err(google_cloud_storage::http::Error::Response(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(MosaicError::backend_with_source("gcs", "get_object failed", e)),
        }
    }

    async fn read(&self) -> Result<MosaicJson> {
        let req = GetObjectRequest {
            bucket: self.bucket.clone(),
            object: self.object.clone(),
            ..Default::default()
        };
        let bytes = self
            .client
            .download_object(&req, &Range::default())
            .await
            .map_err(|e| match e {
                google_cloud_storage::http::Error::Response(r) if r.code == 404 => {
                    MosaicError::MosaicNotFound(self.canonical_uri())
                }
                other => MosaicError::backend_with_source("gcs", "download_object failed", other),
            })?;
        let body = if self.is_gzip() {
            let mut decoder = GzDecoder::new(bytes.as_slice());
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| MosaicError::backend_with_source("gcs", "gzip decode failed", e))?;
            out
        } else {
            bytes
        };
        Ok(serde_json::from_slice(&body)?)
    }

    async fn write(&self, doc: &MosaicJson, overwrite: bool) -> Result<()> {
        if !overwrite && self.exists().await? {
            return Err(MosaicError::MosaicExists(self.canonical_uri()));
        }
        let raw = serde_json::to_vec(doc)?;
        let body = if self.is_gzip() {
            use flate2::write::GzEncoder;
            use flate2::Compression;
            use std::io::Write;
            let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
            encoder
                .write_all(&raw)
                .map_err(|e| MosaicError::backend_with_source("gcs", "gzip encode failed", e))?;
            encoder
                .finish()
                .map_err(|e| MosaicError::backend_with_source("gcs", "gzip encode failed", e))?
        } else {
            raw
        };
        let upload_type = UploadType::Simple(Media::new(self.object.clone()));
        self.client
            .upload_object(
                &UploadObjectRequest {
                    bucket: self.bucket.clone(),
                    ..Default::default()
                },
                body,
                &upload_type,
            )
            .await
            .map_err(|e| MosaicError::backend_with_source("gcs", "upload_object failed", e))?;
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.client
            .delete_object(&DeleteObjectRequest {
                bucket: self.bucket.clone(),
                object: self.object.clone(),
                ..Default::default()
            })
            .await
            .map_err(|e| MosaicError::backend_with_source("gcs", "delete_object failed", e))?;
        Ok(())
    }
}
