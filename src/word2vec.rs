//! Reader for the word2vec vector file format.
//!
//! A file starts with a `"<vocabulary size> <dimension>"` header line. Every
//! entry is a word followed by a space and the vector: `dimension`
//! little-endian `f32`s in the binary format, or whitespace-separated decimals
//! on the rest of the line in the text format.

use std::{
    fs::File,
    io::{self, BufRead, BufReader, Read},
    path::Path,
};

use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::source::{EmbeddingSource, Record};

/// Upper bound on values reserved up front from a header's counts; past it
/// the buffers grow with the data actually read.
const PREALLOCATE_VALUES: usize = 1 << 22;

#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Io(#[from] io::Error),
    #[error("bad header: {0:?}")]
    BadHeader(String),
    #[error("file ended after {found} of {expected} entries")]
    Truncated { expected: usize, found: usize },
    #[error("entry {entry} is not valid utf-8")]
    Encoding { entry: usize },
    #[error("vector for {word:?} has {found} dimensions, expected {expected}")]
    Dimension {
        word: String,
        expected: usize,
        found: usize,
    },
    #[error("bad number {value:?} in vector for {word:?}")]
    BadNumber { word: String, value: String },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Format {
    Binary,
    Text,
}

/// Vocabulary in file order with all vectors in one flat buffer.
#[derive(Clone, Debug, PartialEq)]
pub struct KeyedVectors {
    dimension: usize,
    words: Vec<String>,
    data: Vec<f64>,
}

impl KeyedVectors {
    pub fn new(dimension: usize) -> Self {
        Self::with_capacity(dimension, 0)
    }

    pub fn with_capacity(dimension: usize, capacity: usize) -> Self {
        Self {
            dimension,
            words: Vec::with_capacity(capacity),
            data: Vec::with_capacity(capacity.checked_mul(dimension).unwrap_or(0)),
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn words(&self) -> &[String] {
        &self.words
    }

    pub fn push(&mut self, word: String, vector: &[f64]) -> Result<(), LoadError> {
        if vector.len() != self.dimension {
            return Err(LoadError::Dimension {
                word,
                expected: self.dimension,
                found: vector.len(),
            });
        }
        self.words.push(word);
        self.data.extend_from_slice(vector);

        Ok(())
    }

    pub fn vector(&self, index: usize) -> &[f64] {
        &self.data[index * self.dimension..(index + 1) * self.dimension]
    }

    /// Linear scan; meant for spot checks, not bulk lookups.
    pub fn get(&self, word: &str) -> Option<&[f64]> {
        self.words
            .iter()
            .position(|w| w == word)
            .map(|index| self.vector(index))
    }
}

impl EmbeddingSource for KeyedVectors {
    fn len(&self) -> usize {
        self.words.len()
    }

    fn records(&self) -> Box<dyn Iterator<Item = Record<'_>> + Send + '_> {
        Box::new(
            self.words
                .iter()
                .enumerate()
                .map(|(index, key)| Record {
                    key,
                    vector: self.vector(index),
                }),
        )
    }
}

#[instrument(skip_all, fields(path = %path.as_ref().display(), format = ?format))]
pub fn load_word2vec<P: AsRef<Path>>(
    path: P,
    format: Format,
    limit: Option<usize>,
) -> Result<KeyedVectors, LoadError> {
    let file = File::open(&path)?;
    let vectors = read_word2vec(BufReader::with_capacity(1 << 20, file), format, limit)?;
    info!(
        words = vectors.len(),
        dimension = vectors.dimension(),
        "loaded word2vec file"
    );

    Ok(vectors)
}

pub fn read_word2vec<R: BufRead>(
    mut reader: R,
    format: Format,
    limit: Option<usize>,
) -> Result<KeyedVectors, LoadError> {
    let mut header = String::new();
    reader.read_line(&mut header)?;
    let (count, dimension) = parse_header(&header)?;
    let count = limit.map_or(count, |l| l.min(count));
    debug!(count, dimension, "read header");

    let reserve = count.min(PREALLOCATE_VALUES / dimension);
    let mut vectors = KeyedVectors::with_capacity(dimension, reserve);
    let mut vector = Vec::new();
    for entry in 0..count {
        let word = match format {
            Format::Binary => read_binary_entry(&mut reader, dimension, entry, &mut vector)?,
            Format::Text => read_text_entry(&mut reader, entry, &mut vector)?,
        };
        let Some(word) = word else {
            return Err(LoadError::Truncated {
                expected: count,
                found: entry,
            });
        };
        vectors.push(word, &vector)?;
    }

    Ok(vectors)
}

fn parse_header(header: &str) -> Result<(usize, usize), LoadError> {
    let mut fields = header.split_whitespace().map(str::parse::<usize>);
    match (fields.next(), fields.next(), fields.next()) {
        (Some(Ok(count)), Some(Ok(dimension)), None)
            if dimension > 0 && dimension.checked_mul(4).is_some() =>
        {
            Ok((count, dimension))
        }
        _ => Err(LoadError::BadHeader(header.trim_end().to_string())),
    }
}

fn read_binary_entry<R: BufRead>(
    reader: &mut R,
    dimension: usize,
    entry: usize,
    vector: &mut Vec<f64>,
) -> Result<Option<String>, LoadError> {
    let mut word = Vec::new();
    if reader.read_until(b' ', &mut word)? == 0 {
        return Ok(None);
    }
    if word.last() == Some(&b' ') {
        word.pop();
    }
    // vectors may or may not be followed by a newline
    let start = word.iter().position(|&b| b != b'\n').unwrap_or(word.len());
    let word = String::from_utf8(word[start..].to_vec()).map_err(|_| LoadError::Encoding { entry })?;

    // grows with what is really there instead of trusting the header
    let expected = dimension * 4;
    let mut bytes = Vec::new();
    reader.by_ref().take(expected as u64).read_to_end(&mut bytes)?;
    if bytes.len() < expected {
        return Ok(None);
    }
    vector.clear();
    vector.extend(
        bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]) as f64),
    );

    Ok(Some(word))
}

fn read_text_entry<R: BufRead>(
    reader: &mut R,
    entry: usize,
    vector: &mut Vec<f64>,
) -> Result<Option<String>, LoadError> {
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            return Ok(None);
        }
        if !line.iter().all(u8::is_ascii_whitespace) {
            break;
        }
    }
    let line = std::str::from_utf8(&line).map_err(|_| LoadError::Encoding { entry })?;

    let mut fields = line.split_whitespace();
    let word = fields.next().unwrap_or_default().to_string();
    vector.clear();
    for field in fields {
        let value = field.parse::<f64>().map_err(|_| LoadError::BadNumber {
            word: word.clone(),
            value: field.to_string(),
        })?;
        vector.push(value);
    }

    Ok(Some(word))
}
