//! Azure Blob Storage backend, `az://container/blob` convention.
//!
//! Like GCS, this has no precedent in the retrieval pack; `azure_core`
//! + `azure_storage` + `azure_storage_blobs` is simply the standard
//! Rust SDK split for blob storage.

use std::io::Read;

use async_trait::async_trait;
use azure_storage::prelude::*;
use azure_storage_blobs::prelude::*;
use flate2::read::GzDecoder;
use futures::StreamExt;

use super::MosaicBackend;
use crate::error::{MosaicError, Result};
use crate::model::MosaicJson;

pub struct AzureBackend {
    client: ContainerClient,
    container: String,
    blob: String,
}

impl AzureBackend {
    pub async fn new(rest: &str) -> Result<Self> {
        let (container, blob) = rest.split_once('/').ok_or_else(|| {
            MosaicError::Validation(format!(
                "azure uri must be az://container/blob, got az://{rest}"
            ))
        })?;
        if container.is_empty() || blob.is_empty() {
            return Err(MosaicError::Validation(format!(
                "azure uri must be az://container/blob, got az://{rest}"
            )));
        }
        let account = std::env::var("AZURE_STORAGE_ACCOUNT").map_err(|_| {
            MosaicError::Validation("AZURE_STORAGE_ACCOUNT must be set for az:// uris".to_string())
        })?;
        let access_key = std::env::var("AZURE_STORAGE_ACCESS_KEY").map_err(|_| {
            MosaicError::Validation(
                "AZURE_STORAGE_ACCESS_KEY must be set for az:// uris".to_string(),
            )
        })?;
        let credentials = StorageCredentials::access_key(account.clone(), access_key);
        let service = BlobServiceClient::new(account, credentials);
        let client = service.container_client(container);
        Ok(Self {
            client,
            container: container.to_string(),
            blob: blob.to_string(),
        })
    }

    fn is_gzip(&self) -> bool {
        self.blob.to_lowercase().ends_with(".gz")
    }

    fn blob_client(&self) -> BlobClient {
        self.client.blob_client(&self.blob)
    }
}

#[async_trait]
impl MosaicBackend for AzureBackend {
    fn kind(&self) -> &'static str {
        "azure"
    }

    fn canonical_uri(&self) -> String {
        format!("az://{}/{}", self.container, self.blob)
    }

    async fn exists(&self) -> Result<bool> {
        self.blob_client()
            .exists()
            .await
            .map_err(|e| MosaicError::backend_with_source("azure", "exists check failed", e))
    }

    async fn read(&self) -> Result<MosaicJson> {
        if !self.exists().await? {
            return Err(MosaicError::MosaicNotFound(self.canonical_uri()));
        }
        let mut stream = self.blob_client().get().into_stream();
        let mut bytes = Vec::new();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| MosaicError::backend_with_source("azure", "get blob failed", e))?;
            let data = chunk
                .data
                .collect()
                .await
                .map_err(|e| MosaicError::backend_with_source("azure", "collect body failed", e))?;
            bytes.extend_from_slice(&data);
        }
        let body = if self.is_gzip() {
            let mut decoder = GzDecoder::new(bytes.as_slice());
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| MosaicError::backend_with_source("azure", "gzip decode failed", e))?;
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
                .map_err(|e| MosaicError::backend_with_source("azure", "gzip encode failed", e))?;
            encoder
                .finish()
                .map_err(|e| MosaicError::backend_with_source("azure", "gzip encode failed", e))?
        } else {
            raw
        };
        self.blob_client()
            .put_block_blob(body)
            .await
            .map_err(|e| MosaicError::backend_with_source("azure", "put_block_blob failed", e))?;
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.blob_client()
            .delete()
            .await
            .map_err(|e| MosaicError::backend_with_source("azure", "delete failed", e))?;
        Ok(())
    }
}
