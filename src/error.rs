use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("could not open session: {0}")]
    Connection(String),
    #[error("{subject} has {found} dimensions, expected {expected}")]
    SchemaMismatch {
        subject: String,
        expected: usize,
        found: usize,
    },
    #[error("duplicate key: {0}")]
    DuplicateKey(String),
    #[error("write failed after {chunks_written} committed chunks: {source}")]
    PartialWrite {
        chunks_written: usize,
        source: Box<StoreError>,
    },
    #[error("write cancelled after {chunks_written} committed chunks")]
    Cancelled { chunks_written: usize },
    #[error("target not found: {0}")]
    TargetNotFound(String),
    #[error("session is closed")]
    SessionClosed,
    #[error("malformed record: {0}")]
    MalformedRecord(String),
    #[error(transparent)]
    Sqlite(#[from] rusqlite::Error),
    #[error(transparent)]
    Mongo(#[from] mongodb::error::Error),
}

impl StoreError {
    /// Number of whole chunks known to be committed when a write failed.
    pub fn chunks_written(&self) -> Option<usize> {
        match self {
            StoreError::PartialWrite { chunks_written, .. }
            | StoreError::Cancelled { chunks_written } => Some(*chunks_written),
            _ => None,
        }
    }
}
