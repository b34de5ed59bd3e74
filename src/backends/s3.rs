//! Amazon S3 backend, `s3://bucket/key` convention. Gzip toggled by a
//! `.gz` key suffix, same as the file backend.

use std::io::Read;

use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use flate2::read::GzDecoder;

use super::MosaicBackend;
use crate::error::{MosaicError, Result};
use crate::model::MosaicJson;

pub struct S3Backend {
    client: aws_sdk_s3::Client,
    bucket: String,
    key: String,
}

impl S3Backend {
    pub async fn new(rest: &str) -> Result<Self> {
        let (bucket, key) = rest.split_once('/').ok_or_else(|| {
            MosaicError::Validation(format!("s3 uri must be s3://bucket/key, got s3://{rest}"))
        })?;
        if bucket.is_empty() || key.is_empty() {
            return Err(MosaicError::Validation(format!(
                "s3 uri must be s3://bucket/key, got s3://{rest}"
            )));
        }
        let config = aws_config::load_defaults(aws_config::BehaviorVersion::latest()).await;
        let client = aws_sdk_s3::Client::new(&config);
        Ok(Self {
            client,
            bucket: bucket.to_string(),
            key: key.to_string(),
        })
    }

    fn is_gzip(&self) -> bool {
        self.key.to_lowercase().ends_with(".gz")
    }
}

#[async_trait]
impl MosaicBackend for S3Backend {
    fn kind(&self) -> &'static str {
        "s3"
    }

    fn canonical_uri(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.key)
    }

    async fn exists(&self) -> Result<bool> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(aws_sdk_s3::error::SdkError::ServiceError(e)) if e.err().is_not_found() => {
                Ok(false)
            }
            Err(e) => Err(MosaicError::backend_with_source("s3", "head_object failed", e)),
        }
    }

    async fn read(&self) -> Result<MosaicJson> {
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| {
                if let aws_sdk_s3::error::SdkError::ServiceError(se) = &e {
                    if se.err().is_no_such_key() {
                        return MosaicError::MosaicNotFound(self.canonical_uri());
                    }
                }
                MosaicError::backend_with_source("s3", "get_object failed", e)
            })?;
        let bytes = resp
            .body
            .collect()
            .await
            .map_err(|e| MosaicError::backend_with_source("s3", "failed reading body", e))?
            .into_bytes();
        let body = if self.is_gzip() {
            let mut decoder = GzDecoder::new(bytes.as_ref());
            let mut out = Vec::new();
            decoder
                .read_to_end(&mut out)
                .map_err(|e| MosaicError::backend_with_source("s3", "gzip decode failed", e))?;
            out
        } else {
            bytes.to_vec()
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
                .map_err(|e| MosaicError::backend_with_source("s3", "gzip encode failed", e))?;
            encoder
                .finish()
                .map_err(|e| MosaicError::backend_with_source("s3", "gzip encode failed", e))?
        } else {
            raw
        };
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| MosaicError::backend_with_source("s3", "put_object failed", e))?;
        Ok(())
    }

    async fn delete(&self) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .send()
            .await
            .map_err(|e| MosaicError::backend_with_source("s3", "delete_object failed", e))?;
        Ok(())
    }
}
