use thiserror::Error;

/// Error taxonomy for the mosaic core.
///
/// Each variant corresponds to one row of the error table; the kind a
/// caller needs to branch on (e.g. to pick a CLI exit code) is available
/// from [`MosaicError::kind`] without matching on the full enum.
#[derive(Error, Debug)]
pub enum MosaicError {
    #[error("validation error: {0}")]
    Validation(String),

    #[error("mosaic not found: {0}")]
    MosaicNotFound(String),

    #[error("mosaic already exists: {0}")]
    MosaicExists(String),

    #[error("no asset found for query")]
    NoAssetFound,

    #[error("point outside of all asset bounds")]
    PointOutsideBounds,

    #[error("backend error ({backend}): {message}")]
    Backend {
        backend: &'static str,
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("operation not implemented on this backend: {0}")]
    NotImplemented(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Coarse-grained classification used to map errors onto CLI exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    UserError,
    Io,
    NotFound,
    AlreadyExists,
}

impl MosaicError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MosaicError::Validation(_) => ErrorKind::UserError,
            MosaicError::MosaicNotFound(_) => ErrorKind::NotFound,
            MosaicError::MosaicExists(_) => ErrorKind::AlreadyExists,
            MosaicError::NoAssetFound | MosaicError::PointOutsideBounds => ErrorKind::NotFound,
            MosaicError::Backend { .. } | MosaicError::Io(_) => ErrorKind::Io,
            MosaicError::NotImplemented(_) => ErrorKind::UserError,
            MosaicError::Json(_) => ErrorKind::UserError,
        }
    }

    pub fn backend(backend: &'static str, message: impl Into<String>) -> Self {
        MosaicError::Backend {
            backend,
            message: message.into(),
            source: None,
        }
    }

    pub fn backend_with_source(
        backend: &'static str,
        message: impl Into<String>,
        source: impl Into<anyhow::Error>,
    ) -> Self {
        MosaicError::Backend {
            backend,
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

pub type Result<T> = std::result::Result<T, MosaicError>;
