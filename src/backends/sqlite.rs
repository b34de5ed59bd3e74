//! SQLite backend, `sqlite:///path.db:mosaic_name` convention.
//!
//! One file holds many mosaics in a `mosaicjson` table keyed by name;
//! `write` enforces name-uniqueness transactionally rather than
//! relying on a prior `exists` check racing another writer.

use std::path::PathBuf;

use async_trait::async_trait;
use rusqlite::{params, Connection};

use super::MosaicBackend;
use crate::error::{MosaicError, Result};
use crate::model::MosaicJson;

pub struct SqliteBackend {
    path: PathBuf,
    mosaic_name: String,
}

impl SqliteBackend {
    pub fn new(rest: &str) -> Result<Self> {
        let (path, mosaic_name) = rest.rsplit_once(':').ok_or_else(|| {
            MosaicError::Validation(format!(
                "sqlite uri must be sqlite:///path.db:name, got sqlite://{rest}"
            ))
        })?;
        if path.is_empty() || mosaic_name.is_empty() {
            return Err(MosaicError::Validation(format!(
                "sqlite uri must be sqlite:///path.db:name, got sqlite://{rest}"
            )));
        }
        Ok(Self {
            path: PathBuf::from(path),
            mosaic_name: mosaic_name.to_string(),
        })
    }

    fn open_connection(path: &std::path::Path) -> Result<Connection> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)
            .map_err(|e| MosaicError::backend_with_source("sqlite", "open failed", e))?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS mosaicjson (
                name TEXT PRIMARY KEY,
                document TEXT NOT NULL
            )",
            [],
        )
        .map_err(|e| MosaicError::backend_with_source("sqlite", "schema init failed", e))?;
        Ok(conn)
    }

    async fn with_connection<T: Send + 'static>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T> + Send + 'static,
    ) -> Result<T> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || {
            let conn = Self::open_connection(&path)?;
            f(&conn)
        })
        .await
        .map_err(|e| MosaicError::backend_with_source("sqlite", "join error", e))?
    }
}

#[async_trait]
impl MosaicBackend for SqliteBackend {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn canonical_uri(&self) -> String {
        format!(
            "sqlite://{}:{}",
            self.path
                .canonicalize()
                .unwrap_or_else(|_| self.path.clone())
                .to_string_lossy(),
            self.mosaic_name
        )
    }

    async fn exists(&self) -> Result<bool> {
        let name = self.mosaic_name.clone();
        self.with_connection(move |conn| {
            let count: i64 = conn
                .query_row(
                    "SELECT COUNT(*) FROM mosaicjson WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .map_err(|e| MosaicError::backend_with_source("sqlite", "exists query failed", e))?;
            Ok(count > 0)
        })
        .await
    }

    async fn read(&self) -> Result<MosaicJson> {
        let name = self.mosaic_name.clone();
        let uri = self.canonical_uri();
        self.with_connection(move |conn| {
            let document: String = conn
                .query_row(
                    "SELECT document FROM mosaicjson WHERE name = ?1",
                    params![name],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => MosaicError::MosaicNotFound(uri.clone()),
                    other => MosaicError::backend_with_source("sqlite", "read query failed", other),
                })?;
            serde_json::from_str(&document).map_err(MosaicError::from)
        })
        .await
    }

    async fn write(&self, doc: &MosaicJson, overwrite: bool) -> Result<()> {
        let name = self.mosaic_name.clone();
        let body = serde_json::to_string(doc)?;
        let uri = self.canonical_uri();
        self.with_connection(move |conn| {
            let tx = conn
                .unchecked_transaction()
                .map_err(|e| MosaicError::backend_with_source("sqlite", "begin transaction failed", e))?;
            let exists: bool = tx
                .query_row(
                    "SELECT COUNT(*) FROM mosaicjson WHERE name = ?1",
                    params![name],
                    |row| row.get::<_, i64>(0),
                )
                .map(|count| count > 0)
                .map_err(|e| MosaicError::backend_with_source("sqlite", "exists query failed", e))?;
            if exists && !overwrite {
                return Err(MosaicError::MosaicExists(uri));
            }
            tx.execute(
                "INSERT INTO mosaicjson (name, document) VALUES (?1, ?2)
                 ON CONFLICT(name) DO UPDATE SET document = excluded.document",
                params![name, body],
            )
            .map_err(|e| MosaicError::backend_with_source("sqlite", "write failed", e))?;
            tx.commit()
                .map_err(|e| MosaicError::backend_with_source("sqlite", "commit failed", e))?;
            Ok(())
        })
        .await
    }

    async fn delete(&self) -> Result<()> {
        let name = self.mosaic_name.clone();
        self.with_connection(move |conn| {
            conn.execute("DELETE FROM mosaicjson WHERE name = ?1", params![name])
                .map_err(|e| MosaicError::backend_with_source("sqlite", "delete failed", e))?;
            Ok(())
        })
        .await
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
    async fn write_then_read_roundtrips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaics.db");
        let backend = SqliteBackend::new(&format!("{}:one", path.display())).unwrap();
        backend.write(&doc(), true).await.unwrap();
        assert!(backend.exists().await.unwrap());
        let read_back = backend.read().await.unwrap();
        assert_eq!(read_back.tiles.len(), 1);
    }

    #[tokio::test]
    async fn multiple_mosaics_coexist_in_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaics.db");
        let a = SqliteBackend::new(&format!("{}:a", path.display())).unwrap();
        let b = SqliteBackend::new(&format!("{}:b", path.display())).unwrap();
        a.write(&doc(), true).await.unwrap();
        assert!(!b.exists().await.unwrap());
        b.write(&doc(), true).await.unwrap();
        assert!(a.exists().await.unwrap());
        assert!(b.exists().await.unwrap());
    }

    #[tokio::test]
    async fn write_without_overwrite_rejects_existing_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mosaics.db");
        let backend = SqliteBackend::new(&format!("{}:one", path.display())).unwrap();
        backend.write(&doc(), true).await.unwrap();
        let err = backend.write(&doc(), false).await.unwrap_err();
        assert!(matches!(err, MosaicError::MosaicExists(_)));
    }
}
