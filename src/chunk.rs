use futures::stream::{self, StreamExt};

use crate::error::StoreError;

/// Lazy stream of `Vec`s holding at most `size` items each. Only the chunk
/// being handed out is materialized.
pub type Chunks<I> = stream::Chunks<stream::Iter<I>>;

pub fn chunks<I: IntoIterator>(iter: I, size: usize) -> Result<Chunks<I::IntoIter>, StoreError> {
    // StreamExt::chunks panics on 0
    if size == 0 {
        return Err(StoreError::InvalidArgument(
            "chunk size must be a positive integer".to_string(),
        ));
    }

    Ok(stream::iter(iter).chunks(size))
}

pub fn chunk_count(len: usize, size: usize) -> usize {
    if size == 0 {
        0
    } else {
        len.div_ceil(size)
    }
}
