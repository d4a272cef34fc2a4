//! Conversion between in-memory records and the two persisted shapes.
//!
//! Relational targets store one row per key: a `word` text column holding the
//! primary key, followed by one REAL column per dimension named by its index
//! (`"0"`, `"1"`, ...). Document targets store `{word: <string>, vec: [<double>, ...]}`.

use itertools::Itertools;
use mongodb::bson::{Bson, Document};
use rusqlite::types::{Value, ValueRef};

use crate::{error::StoreError, source::Record};

pub const KEY_FIELD: &str = "word";
pub const VECTOR_FIELD: &str = "vec";

pub fn expect_dimension(record: &Record, expected: usize) -> Result<(), StoreError> {
    if record.vector.len() != expected {
        return Err(StoreError::SchemaMismatch {
            subject: format!("vector for key {:?}", record.key),
            expected,
            found: record.vector.len(),
        });
    }

    Ok(())
}

/// Dimensionality shared by every record in the batch, or `None` for an
/// empty batch.
pub fn batch_dimension(batch: &[Record]) -> Result<Option<usize>, StoreError> {
    let Some(first) = batch.first() else {
        return Ok(None);
    };
    let dimension = first.vector.len();
    for record in &batch[1..] {
        expect_dimension(record, dimension)?;
    }

    Ok(Some(dimension))
}

pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

pub fn create_table_sql(table: &str, dimension: usize) -> String {
    let columns = (0..dimension)
        .map(|i| format!("{} REAL", quote_identifier(&i.to_string())))
        .join(", ");
    let key = format!("{} TEXT PRIMARY KEY NOT NULL", quote_identifier(KEY_FIELD));

    format!("CREATE TABLE {} ({key}, {columns})", quote_identifier(table))
}

pub fn insert_sql(table: &str, dimension: usize) -> String {
    let columns = std::iter::once(KEY_FIELD.to_string())
        .chain((0..dimension).map(|i| i.to_string()))
        .map(|c| quote_identifier(&c))
        .join(", ");
    let placeholders = (1..=dimension + 1).map(|i| format!("?{i}")).join(", ");

    format!(
        "INSERT INTO {} ({columns}) VALUES ({placeholders})",
        quote_identifier(table)
    )
}

pub fn select_by_keys_sql(table: &str, key_count: usize) -> String {
    let placeholders = (1..=key_count).map(|i| format!("?{i}")).join(", ");
    format!(
        "SELECT * FROM {} WHERE {} IN ({placeholders})",
        quote_identifier(table),
        quote_identifier(KEY_FIELD)
    )
}

/// Parameters for one row of [`insert_sql`].
pub fn encode_row(record: &Record) -> Vec<Value> {
    let mut row = Vec::with_capacity(record.vector.len() + 1);
    row.push(Value::Text(record.key.to_string()));
    row.extend(record.vector.iter().map(|&v| Value::Real(v)));

    row
}

/// Position of the key column and of each dimension column, in dimension
/// order, within a result row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowLayout {
    key_column: usize,
    dimension_columns: Vec<usize>,
}

impl RowLayout {
    pub fn from_columns<S: AsRef<str>>(names: &[S]) -> Result<Self, StoreError> {
        let mut key_column = None;
        let mut dimensions = Vec::with_capacity(names.len());
        for (position, name) in names.iter().enumerate() {
            let name = name.as_ref();
            if name == KEY_FIELD {
                key_column = Some(position);
            } else if let Ok(index) = name.parse::<usize>() {
                dimensions.push((index, position));
            } else {
                return Err(StoreError::MalformedRecord(format!(
                    "unexpected column {name:?}"
                )));
            }
        }
        let key_column = key_column.ok_or_else(|| {
            StoreError::MalformedRecord(format!("no {KEY_FIELD:?} column"))
        })?;

        dimensions.sort_unstable();
        for (expected, (index, _)) in dimensions.iter().enumerate() {
            if *index != expected {
                return Err(StoreError::MalformedRecord(format!(
                    "dimension columns are not contiguous: missing column {expected}"
                )));
            }
        }

        Ok(Self {
            key_column,
            dimension_columns: dimensions.into_iter().map(|(_, position)| position).collect(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension_columns.len()
    }

    pub fn decode(&self, row: &rusqlite::Row) -> Result<(String, Vec<f64>), StoreError> {
        let key = match row.get_ref(self.key_column)? {
            ValueRef::Text(bytes) => std::str::from_utf8(bytes)
                .map_err(|e| StoreError::MalformedRecord(format!("key is not utf-8: {e}")))?
                .to_string(),
            other => {
                return Err(StoreError::MalformedRecord(format!(
                    "key column has type {}",
                    other.data_type()
                )))
            }
        };

        let mut vector = Vec::with_capacity(self.dimension_columns.len());
        for &column in &self.dimension_columns {
            let value = match row.get_ref(column)? {
                ValueRef::Real(f) => f,
                ValueRef::Integer(i) => i as f64,
                // sqlite stores NaN as NULL
                ValueRef::Null => f64::NAN,
                other => {
                    return Err(StoreError::MalformedRecord(format!(
                        "dimension column for {key:?} has type {}",
                        other.data_type()
                    )))
                }
            };
            vector.push(value);
        }

        Ok((key, vector))
    }
}

pub fn encode_document(record: &Record) -> Document {
    let vector: Vec<Bson> = record.vector.iter().map(|&v| Bson::Double(v)).collect();
    let mut document = Document::new();
    document.insert(KEY_FIELD, record.key);
    document.insert(VECTOR_FIELD, vector);

    document
}

pub fn decode_document(document: &Document) -> Result<(String, Vec<f64>), StoreError> {
    let key = document
        .get_str(KEY_FIELD)
        .map_err(|e| StoreError::MalformedRecord(format!("document {KEY_FIELD:?} field: {e}")))?;
    let elements = document.get_array(VECTOR_FIELD).map_err(|e| {
        StoreError::MalformedRecord(format!("document {VECTOR_FIELD:?} field for {key:?}: {e}"))
    })?;

    let mut vector = Vec::with_capacity(elements.len());
    for element in elements {
        let value = match element {
            Bson::Double(f) => *f,
            Bson::Int32(i) => *i as f64,
            Bson::Int64(i) => *i as f64,
            other => {
                return Err(StoreError::MalformedRecord(format!(
                    "vector element for {key:?} has type {:?}",
                    other.element_type()
                )))
            }
        };
        vector.push(value);
    }

    Ok((key.to_string(), vector))
}

#[cfg(test)]
mod tests {
    use mongodb::bson::doc;
    use rusqlite::{params_from_iter, Connection};

    use super::*;

    fn record<'a>(key: &'a str, vector: &'a [f64]) -> Record<'a> {
        Record { key, vector }
    }

    #[test]
    fn batch_with_mixed_dimensions_is_rejected() {
        let a = [1.0, 2.0];
        let b = [1.0, 2.0, 3.0];
        let batch = [record("a", &a), record("b", &b)];
        match batch_dimension(&batch) {
            Err(StoreError::SchemaMismatch {
                expected, found, ..
            }) => {
                assert_eq!(expected, 2);
                assert_eq!(found, 3);
            }
            other => panic!("expected schema mismatch, got {other:?}"),
        }
        assert_eq!(batch_dimension(&[]).unwrap(), None);
        assert_eq!(batch_dimension(&batch[..1]).unwrap(), Some(2));
    }

    #[test]
    fn identifiers_are_quoted() {
        assert_eq!(quote_identifier("animals"), "\"animals\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
        assert_eq!(
            insert_sql("t", 2),
            "INSERT INTO \"t\" (\"word\", \"0\", \"1\") VALUES (?1, ?2, ?3)"
        );
    }

    #[test]
    fn row_layout_orders_dimensions_by_name() {
        let layout = RowLayout::from_columns(&["1", "word", "0", "2"]).unwrap();
        assert_eq!(layout.key_column, 1);
        assert_eq!(layout.dimension_columns, vec![2, 0, 3]);
        assert_eq!(layout.dimension(), 3);
    }

    #[test]
    fn row_layout_rejects_gaps_and_strangers() {
        assert!(matches!(
            RowLayout::from_columns(&["word", "0", "2"]),
            Err(StoreError::MalformedRecord(_))
        ));
        assert!(matches!(
            RowLayout::from_columns(&["word", "0", "extra"]),
            Err(StoreError::MalformedRecord(_))
        ));
        assert!(matches!(
            RowLayout::from_columns(&["0", "1"]),
            Err(StoreError::MalformedRecord(_))
        ));
    }

    #[test]
    fn relational_row_is_exact() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(&create_table_sql("t", 4), []).unwrap();
        let vector = [0.1, -7.25e-12, f64::MIN_POSITIVE / 3.0, f64::INFINITY];
        let original = record("exact", &vector);
        conn.execute(&insert_sql("t", 4), params_from_iter(encode_row(&original)))
            .unwrap();

        let mut stmt = conn.prepare(&select_by_keys_sql("t", 1)).unwrap();
        let names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
        let layout = RowLayout::from_columns(&names).unwrap();
        let mut rows = stmt.query(["exact"]).unwrap();
        let row = rows.next().unwrap().unwrap();
        let (key, decoded) = layout.decode(row).unwrap();

        assert_eq!(key, "exact");
        let bits: Vec<u64> = decoded.iter().map(|v| v.to_bits()).collect();
        let expected: Vec<u64> = vector.iter().map(|v| v.to_bits()).collect();
        assert_eq!(bits, expected);
    }

    #[test]
    fn document_round_trip_keeps_order() {
        let vector = [3.0, 1.0, 2.0, 1e-300];
        let document = encode_document(&record("dog", &vector));
        assert_eq!(document.get_str("word").unwrap(), "dog");
        let (key, decoded) = decode_document(&document).unwrap();
        assert_eq!(key, "dog");
        assert_eq!(decoded, vector.to_vec());
    }

    #[test]
    fn document_with_integer_elements_decodes() {
        let document = doc! { "word": "n", "vec": [1_i32, 2_i64, 0.5] };
        let (_, decoded) = decode_document(&document).unwrap();
        assert_eq!(decoded, vec![1.0, 2.0, 0.5]);
    }

    #[test]
    fn malformed_documents_are_reported() {
        let no_vec = doc! { "word": "x" };
        assert!(matches!(
            decode_document(&no_vec),
            Err(StoreError::MalformedRecord(_))
        ));
        let bad_element = doc! { "word": "x", "vec": ["a"] };
        assert!(matches!(
            decode_document(&bad_element),
            Err(StoreError::MalformedRecord(_))
        ));
    }
}
