use thiserror::Error;
use uuid::Uuid;

/// Failures surfaced by the persisted store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The durable backend rejected a read or write. The write (if any) was rolled back.
    #[error("storage failure: {0:#}")]
    Storage(#[from] anyhow::Error),
    #[error("failed to encode value for slot '{key}': {source}")]
    Encode {
        key: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Fatal conditions for a whole import. Per-entry problems never end up here;
/// they are counted in the import report instead.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("failed to read import file: {0}")]
    Read(#[from] std::io::Error),
    #[error("invalid import file: {0}")]
    Parse(String),
    #[error("unreadable archive: {0}")]
    Archive(String),
    #[error("unsupported import file '{0}' (expected .json, .zip or .md)")]
    UnsupportedFormat(String),
    #[error("import cancelled")]
    Cancelled,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("note {0} not found")]
    NotFound(Uuid),
    #[error("failed to encode notes: {0}")]
    Encode(String),
    #[error("failed to build archive: {0}")]
    Archive(String),
}
