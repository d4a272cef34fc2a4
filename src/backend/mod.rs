pub mod mongo;
pub mod sqlite;

use std::path::PathBuf;

use async_trait::async_trait;
use clap::ValueEnum;
use lazy_static::lazy_static;
use regex::Regex;

use crate::{
    error::StoreError,
    source::{EmbeddingMap, Record},
};

pub use mongo::MongoStore;
pub use sqlite::SqliteStore;

/// The native operations a storage engine has to provide.
///
/// Chunking, validation and partial-write accounting are shared and live in
/// [`crate::ingest`]; implementations only see one batch at a time.
#[async_trait]
pub trait EmbeddingStore: Send {
    /// Make `target` ready to receive vectors of `dimension` length, creating
    /// it if needed. Fails with [`StoreError::SchemaMismatch`] if the target
    /// already holds vectors of another length.
    async fn prepare_target(&mut self, target: &str, dimension: usize) -> Result<(), StoreError>;

    /// Write one batch with the engine's native bulk insert.
    async fn insert_batch(&mut self, target: &str, batch: &[Record<'_>]) -> Result<(), StoreError>;

    /// Fetch the vectors of every key in `keys` present in `target` in a
    /// single query.
    async fn read_embeddings(
        &mut self,
        keys: &[String],
        target: &str,
    ) -> Result<EmbeddingMap, StoreError>;

    async fn close(self) -> Result<(), StoreError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    Mongodb,
    Sqlite,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BackendConfig {
    Sqlite {
        path: PathBuf,
    },
    Mongo {
        host: String,
        port: u16,
        database: String,
    },
}

impl BackendConfig {
    pub fn kind(&self) -> BackendKind {
        match self {
            BackendConfig::Sqlite { .. } => BackendKind::Sqlite,
            BackendConfig::Mongo { .. } => BackendKind::Mongodb,
        }
    }
}

pub enum Backend {
    Sqlite(SqliteStore),
    Mongo(MongoStore),
}

impl Backend {
    pub async fn open(config: &BackendConfig) -> Result<Self, StoreError> {
        Ok(match config {
            BackendConfig::Sqlite { path } => Backend::Sqlite(SqliteStore::open(path)?),
            BackendConfig::Mongo {
                host,
                port,
                database,
            } => Backend::Mongo(MongoStore::open(host, *port, database).await?),
        })
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Backend::Sqlite(_) => BackendKind::Sqlite,
            Backend::Mongo(_) => BackendKind::Mongodb,
        }
    }
}

#[async_trait]
impl EmbeddingStore for Backend {
    async fn prepare_target(&mut self, target: &str, dimension: usize) -> Result<(), StoreError> {
        match self {
            Backend::Sqlite(s) => s.prepare_target(target, dimension).await,
            Backend::Mongo(m) => m.prepare_target(target, dimension).await,
        }
    }

    async fn insert_batch(&mut self, target: &str, batch: &[Record<'_>]) -> Result<(), StoreError> {
        match self {
            Backend::Sqlite(s) => s.insert_batch(target, batch).await,
            Backend::Mongo(m) => m.insert_batch(target, batch).await,
        }
    }

    async fn read_embeddings(
        &mut self,
        keys: &[String],
        target: &str,
    ) -> Result<EmbeddingMap, StoreError> {
        match self {
            Backend::Sqlite(s) => s.read_embeddings(keys, target).await,
            Backend::Mongo(m) => m.read_embeddings(keys, target).await,
        }
    }

    async fn close(self) -> Result<(), StoreError> {
        match self {
            Backend::Sqlite(s) => s.close().await,
            Backend::Mongo(m) => m.close().await,
        }
    }
}

/// Target names end up as SQL identifiers and collection names, so only plain
/// identifiers are accepted.
pub fn validate_target(target: &str) -> Result<(), StoreError> {
    lazy_static! {
        static ref RE_TARGET: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
    }
    if RE_TARGET.is_match(target) {
        Ok(())
    } else {
        Err(StoreError::InvalidArgument(format!(
            "{target:?} is not a valid table or collection name"
        )))
    }
}
