//! Local-filesystem backend. The canonical convention for construction
//! output and the simplest read path: a `.json` or `.json.gz` file,
//! gzip toggled purely by the `.gz` suffix.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;

use super::MosaicBackend;
use crate::error::{MosaicError, Result};
use crate::model::MosaicJson;

pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn is_gzip(&self) -> bool {
        self.path
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case("gz"))
            .unwrap_or(false)
    }
}

#[async_trait]
impl MosaicBackend for FileBackend {
    fn kind(&self) -> &'static str {
        "file"
    }

    fn canonical_uri(&self) -> String {
        self.path
            .canonicalize()
            .unwrap_or_else(|_| self.path.clone())
            .to_string_lossy()
            .into_owned()
    }

    async fn exists(&self) -> Result<bool> {
        Ok(self.path.exists())
    }

    async fn read(&self) -> Result<MosaicJson> {
        let path = self.path.clone();
        let gzip = self.is_gzip();
        tokio::task::spawn_blocking(move || read_sync(&path, gzip))
            .await
            .map_err(|e| MosaicError::backend_with_source("file", "join error", e))?
    }

    async fn write(&self, doc: &MosaicJson, overwrite: bool) -> Result<()> {
        if !overwrite && self.path.exists() {
            return Err(MosaicError::MosaicExists(self.canonical_uri()));
        }
        let path = self.path.clone();
        let gzip = self.is_gzip();
        let body = serde_json::to_vec(doc)?;
        tokio::task::spawn_blocking(move || write_sync(&path, &body, gzip))
            .await
            .map_err(|e| MosaicError::backend_with_source("file", "join error", e))?
    }

    async fn delete(&self) -> Result<()> {
        if self.path.exists() {
            std::fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

fn read_sync(path: &Path, gzip: bool) -> Result<MosaicJson> {
    if !path.exists() {
        return Err(MosaicError::MosaicNotFound(path.to_string_lossy().into_owned()));
    }
    let raw = std::fs::read(path)?;
    let body = if gzip {
        let mut decoder = GzDecoder::new(raw.as_slice());
        let mut out = Vec::new();
        decoder.read_to_end(&mut out)?;
        out
    } else {
        raw
    };
    Ok(serde_json::from_slice(&body)?)
}

fn write_sync(path: &Path, body: &[u8], gzip: bool) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    if gzip {
        let file = std::fs::File::create(path)?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(body)?;
        encoder.finish()?;
    } else {
        std::fs::write(path, body)?;
    }
    Ok(())
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
            tiles: BTreeMap::from([("0".to_string(), vec!["a.tif".to_string()])]),
            tilematrixset: None,
            asset_type: None,
            asset_prefix: None,
            data_type: None,
            colormap: None,
            layers: None,
        }
    }

    #[tokio::test]
    async fn plain_json_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaic.json");
        let backend = FileBackend::new(&path);
        backend.write(&doc(), true).await.unwrap();
        let read_back = backend.read().await.unwrap();
        assert_eq!(read_back.tiles.len(), 1);
    }

    #[tokio::test]
    async fn gzip_suffix_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaic.json.gz");
        let backend = FileBackend::new(&path);
        backend.write(&doc(), true).await.unwrap();
        let raw = std::fs::read(&path).unwrap();
        assert_eq!(&raw[..2], &[0x1f, 0x8b]); // gzip magic bytes
        let read_back = backend.read().await.unwrap();
        assert_eq!(read_back.tiles.len(), 1);
    }

    #[tokio::test]
    async fn write_without_overwrite_rejects_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaic.json");
        let backend = FileBackend::new(&path);
        backend.write(&doc(), true).await.unwrap();
        let err = backend.write(&doc(), false).await.unwrap_err();
        assert!(matches!(err, MosaicError::MosaicExists(_)));
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() {
        let backend = FileBackend::new("/nonexistent/path/mosaic.json");
        assert!(matches!(
            backend.read().await.unwrap_err(),
            MosaicError::MosaicNotFound(_)
        ));
    }
}
