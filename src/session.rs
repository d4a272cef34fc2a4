use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    backend::{Backend, BackendConfig, EmbeddingStore},
    error::StoreError,
    ingest::{self, WriteReport},
    source::{EmbeddingMap, EmbeddingSource},
};

/// An open connection to one store, scoped to a unit of work.
///
/// The connection is released exactly once: by [`Session::release`] or
/// [`Session::close`], or when the session is dropped on an early return.
/// Every operation on a released session fails with
/// [`StoreError::SessionClosed`].
pub struct Session<S: EmbeddingStore = Backend> {
    store: Option<S>,
}

impl Session<Backend> {
    pub async fn open(config: &BackendConfig) -> Result<Self, StoreError> {
        let backend = Backend::open(config).await?;
        debug!(backend = ?backend.kind(), "session opened");

        Ok(Self::new(backend))
    }
}

impl<S: EmbeddingStore> Session<S> {
    pub fn new(store: S) -> Self {
        Self { store: Some(store) }
    }

    pub fn is_open(&self) -> bool {
        self.store.is_some()
    }

    fn store(&mut self) -> Result<&mut S, StoreError> {
        self.store.as_mut().ok_or(StoreError::SessionClosed)
    }

    pub async fn write_embeddings<E: EmbeddingSource + ?Sized>(
        &mut self,
        source: &E,
        target: &str,
        chunk_size: usize,
        cancel: &CancellationToken,
    ) -> Result<WriteReport, StoreError> {
        let store = self.store()?;
        ingest::write_embeddings(store, source, target, chunk_size, cancel).await
    }

    pub async fn read_embeddings(
        &mut self,
        keys: &[String],
        target: &str,
    ) -> Result<EmbeddingMap, StoreError> {
        let store = self.store()?;
        crate::backend::validate_target(target)?;
        store.read_embeddings(keys, target).await
    }

    /// Release the connection. Closing an already released session is a
    /// no-op.
    pub async fn close(&mut self) -> Result<(), StoreError> {
        match self.store.take() {
            Some(store) => {
                debug!("session released");
                store.close().await
            }
            None => Ok(()),
        }
    }

    /// Release the connection, then hand back `outcome` untouched. A failure
    /// to release only surfaces when `outcome` itself succeeded.
    pub async fn release<T>(mut self, outcome: Result<T, StoreError>) -> Result<T, StoreError> {
        let closed = self.close().await;
        match outcome {
            Err(e) => {
                if let Err(close_error) = closed {
                    warn!(error = %close_error, "could not release session after failure");
                }
                Err(e)
            }
            Ok(value) => closed.map(|()| value),
        }
    }
}

impl<S: EmbeddingStore> Drop for Session<S> {
    fn drop(&mut self) {
        if self.store.take().is_some() {
            debug!("session dropped while open; connection released");
        }
    }
}
