use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::{
    backend::{validate_target, EmbeddingStore},
    chunk::{chunk_count, chunks},
    codec,
    error::StoreError,
    source::EmbeddingSource,
};

pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub chunks_written: usize,
    pub records_written: usize,
}

/// Checks every key and vector length without copying anything. Returns the
/// common dimensionality, or `None` for an empty source.
pub fn source_dimension<E: EmbeddingSource + ?Sized>(
    source: &E,
) -> Result<Option<usize>, StoreError> {
    let mut dimension = None;
    for record in source.records() {
        if record.key.is_empty() {
            return Err(StoreError::InvalidArgument(
                "keys must not be empty".to_string(),
            ));
        }
        match dimension {
            None => {
                if record.vector.is_empty() {
                    return Err(StoreError::InvalidArgument(format!(
                        "vector for key {:?} is empty",
                        record.key
                    )));
                }
                dimension = Some(record.vector.len());
            }
            Some(expected) => codec::expect_dimension(&record, expected)?,
        }
    }

    Ok(dimension)
}

/// Streams `source` into `target` one chunk at a time.
///
/// Chunks are written strictly in order. When chunk `i` fails, chunks
/// `0..i` stay committed and the error is wrapped in
/// [`StoreError::PartialWrite`] with `chunks_written: i`. `cancel` is only
/// looked at between chunks.
#[instrument(skip_all, fields(target = %target, chunk_size = chunk_size))]
pub async fn write_embeddings<S, E>(
    store: &mut S,
    source: &E,
    target: &str,
    chunk_size: usize,
    cancel: &CancellationToken,
) -> Result<WriteReport, StoreError>
where
    S: EmbeddingStore + ?Sized,
    E: EmbeddingSource + ?Sized,
{
    validate_target(target)?;
    let mut batches = chunks(source.records(), chunk_size)?;
    let Some(dimension) = source_dimension(source)? else {
        debug!("nothing to write");
        return Ok(WriteReport::default());
    };
    store.prepare_target(target, dimension).await?;

    let total = chunk_count(source.len(), chunk_size);
    let mut report = WriteReport::default();
    while let Some(batch) = batches.next().await {
        if cancel.is_cancelled() {
            warn!(
                chunks_written = report.chunks_written,
                "write cancelled before chunk"
            );
            return Err(StoreError::Cancelled {
                chunks_written: report.chunks_written,
            });
        }

        if let Err(e) = store.insert_batch(target, &batch).await {
            return Err(StoreError::PartialWrite {
                chunks_written: report.chunks_written,
                source: Box::new(e),
            });
        }
        report.chunks_written += 1;
        report.records_written += batch.len();
        info!(
            "wrote chunk {}/{} to {} ({} records)",
            report.chunks_written, total, target, report.records_written
        );
    }

    Ok(report)
}
