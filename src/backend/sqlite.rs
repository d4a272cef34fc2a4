use std::path::Path;

use async_trait::async_trait;
use rusqlite::{ffi, params_from_iter, Connection, ErrorCode};
use tracing::{debug, instrument};

use crate::{
    backend::EmbeddingStore,
    codec::{self, RowLayout},
    error::StoreError,
    source::{EmbeddingMap, Record},
};

/// Relational store: one SQLite table per target, one wide row per key.
pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    #[instrument(skip_all, fields(path = %path.as_ref().display()))]
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(&path).map_err(|e| {
            StoreError::Connection(format!("{}: {e}", path.as_ref().display()))
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        debug!("opened sqlite store");

        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn =
            Connection::open_in_memory().map_err(|e| StoreError::Connection(e.to_string()))?;

        Ok(Self { conn })
    }

    fn table_exists(&self, table: &str) -> Result<bool, StoreError> {
        let count: i64 = self.conn.query_row(
            "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?1",
            [table],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    fn table_layout(&self, table: &str) -> Result<RowLayout, StoreError> {
        let sql = format!("SELECT * FROM {} LIMIT 0", codec::quote_identifier(table));
        let stmt = self.conn.prepare(&sql)?;

        RowLayout::from_columns(&stmt.column_names())
    }

    fn insert_rows(&mut self, table: &str, batch: &[Record]) -> Result<(), StoreError> {
        let Some(dimension) = codec::batch_dimension(batch)? else {
            return Ok(());
        };

        // one transaction per batch: a failing batch leaves nothing behind
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare_cached(&codec::insert_sql(table, dimension))?;
            for record in batch {
                stmt.execute(params_from_iter(codec::encode_row(record)))
                    .map_err(|e| classify_insert_error(e, record.key))?;
            }
        }
        tx.commit()?;

        Ok(())
    }

    fn select_rows(&self, keys: &[String], table: &str) -> Result<EmbeddingMap, StoreError> {
        if !self.table_exists(table)? {
            return Err(StoreError::TargetNotFound(table.to_string()));
        }
        let mut result = EmbeddingMap::new();
        if keys.is_empty() {
            return Ok(result);
        }

        let mut stmt = self
            .conn
            .prepare(&codec::select_by_keys_sql(table, keys.len()))?;
        let layout = RowLayout::from_columns(&stmt.column_names())?;
        let mut rows = stmt.query(params_from_iter(keys.iter()))?;
        while let Some(row) = rows.next()? {
            let (key, vector) = layout.decode(row)?;
            result.insert(key, vector);
        }

        Ok(result)
    }
}

fn classify_insert_error(error: rusqlite::Error, key: &str) -> StoreError {
    match &error {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == ErrorCode::ConstraintViolation
                && (failure.extended_code == ffi::SQLITE_CONSTRAINT_PRIMARYKEY
                    || failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE) =>
        {
            StoreError::DuplicateKey(key.to_string())
        }
        _ => StoreError::Sqlite(error),
    }
}

#[async_trait]
impl EmbeddingStore for SqliteStore {
    #[instrument(skip(self))]
    async fn prepare_target(&mut self, target: &str, dimension: usize) -> Result<(), StoreError> {
        if self.table_exists(target)? {
            let existing = self.table_layout(target)?.dimension();
            if existing != dimension {
                return Err(StoreError::SchemaMismatch {
                    subject: format!("table {target:?}"),
                    expected: existing,
                    found: dimension,
                });
            }
            debug!("appending to existing table");
        } else {
            self.conn
                .execute(&codec::create_table_sql(target, dimension), [])?;
            debug!("created table");
        }

        Ok(())
    }

    async fn insert_batch(&mut self, target: &str, batch: &[Record<'_>]) -> Result<(), StoreError> {
        self.insert_rows(target, batch)
    }

    #[instrument(skip_all, fields(target = %target, keys = keys.len()))]
    async fn read_embeddings(
        &mut self,
        keys: &[String],
        target: &str,
    ) -> Result<EmbeddingMap, StoreError> {
        let result = self.select_rows(keys, target)?;
        debug!(found = result.len(), "read embeddings");

        Ok(result)
    }

    async fn close(self) -> Result<(), StoreError> {
        self.conn.close().map_err(|(_, e)| StoreError::Sqlite(e))
    }
}
