use std::{
    collections::{BTreeMap, HashMap},
    hash::BuildHasher,
};

/// Result of a lookup: every found key mapped to its vector.
pub type EmbeddingMap = HashMap<String, Vec<f64>>;

/// A borrowed (key, vector) pair, the unit that flows from a source through
/// the chunker and codec into a store.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Record<'a> {
    pub key: &'a str,
    pub vector: &'a [f64],
}

/// A read-only key → vector mapping that can be streamed into a store.
///
/// `records` must enumerate the same records in the same order every time it
/// is called on an unmodified source.
pub trait EmbeddingSource: Sync {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn records(&self) -> Box<dyn Iterator<Item = Record<'_>> + Send + '_>;
}

impl EmbeddingSource for BTreeMap<String, Vec<f64>> {
    fn len(&self) -> usize {
        BTreeMap::len(self)
    }

    fn records(&self) -> Box<dyn Iterator<Item = Record<'_>> + Send + '_> {
        Box::new(self.iter().map(|(key, vector)| Record { key, vector }))
    }
}

impl<S: BuildHasher + Sync> EmbeddingSource for HashMap<String, Vec<f64>, S> {
    fn len(&self) -> usize {
        HashMap::len(self)
    }

    fn records(&self) -> Box<dyn Iterator<Item = Record<'_>> + Send + '_> {
        Box::new(self.iter().map(|(key, vector)| Record { key, vector }))
    }
}
