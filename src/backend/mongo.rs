use async_trait::async_trait;
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, Bson, Document},
    error::{ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions, InsertManyOptions},
    Client, Collection, Database, IndexModel,
};
use tracing::{debug, instrument};

use crate::{
    backend::EmbeddingStore,
    codec::{self, KEY_FIELD},
    error::StoreError,
    source::{EmbeddingMap, Record},
};

const DUPLICATE_KEY_CODE: i32 = 11000;

/// Document store: one MongoDB collection per target, one
/// `{word, vec}` document per key.
pub struct MongoStore {
    client: Client,
    database: Database,
}

impl MongoStore {
    #[instrument(skip_all, fields(host = %host, port = port, database = %database))]
    pub async fn open(host: &str, port: u16, database: &str) -> Result<Self, StoreError> {
        let uri = format!(
            "mongodb://{host}:{port}/?appName=wordvec-store&serverSelectionTimeoutMS=10000"
        );
        let options = ClientOptions::parse(&uri)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        let client =
            Client::with_options(options).map_err(|e| StoreError::Connection(e.to_string()))?;
        let database = client.database(database);

        // the driver connects lazily, so make sure the server is really there
        database
            .run_command(doc! { "ping": 1 }, None)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        debug!("connected to mongodb");

        Ok(Self { client, database })
    }

    fn collection(&self, name: &str) -> Collection<Document> {
        self.database.collection(name)
    }

    async fn collection_exists(&self, name: &str) -> Result<bool, StoreError> {
        let names = self
            .database
            .list_collection_names(doc! { "name": name })
            .await?;

        Ok(!names.is_empty())
    }
}

/// `{word: {$in: [...]}}`
fn key_filter<'a, I: Iterator<Item = &'a str>>(keys: I) -> Document {
    let wanted: Vec<Bson> = keys.map(|k| Bson::String(k.to_string())).collect();
    let mut filter = Document::new();
    filter.insert(KEY_FIELD, doc! { "$in": wanted });
    filter
}

/// Number of leading documents an ordered `insert_many` wrote before it
/// stopped at its first write error.
fn inserted_prefix(error: &mongodb::error::Error) -> usize {
    match &*error.kind {
        ErrorKind::BulkWrite(failure) => failure
            .write_errors
            .as_ref()
            .and_then(|errors| errors.iter().map(|e| e.index).min())
            .unwrap_or(0),
        _ => 0,
    }
}

fn classify_insert_error(error: mongodb::error::Error, batch: &[Record]) -> StoreError {
    let duplicate = match &*error.kind {
        ErrorKind::BulkWrite(failure) => failure.write_errors.as_ref().and_then(|errors| {
            errors
                .iter()
                .find(|e| e.code == DUPLICATE_KEY_CODE)
                .map(|e| {
                    batch
                        .get(e.index)
                        .map(|r| r.key.to_string())
                        .unwrap_or_else(|| e.message.clone())
                })
        }),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY_CODE => {
            Some(e.message.clone())
        }
        _ => None,
    };

    match duplicate {
        Some(key) => StoreError::DuplicateKey(key),
        None => StoreError::Mongo(error),
    }
}

#[async_trait]
impl EmbeddingStore for MongoStore {
    #[instrument(skip(self))]
    async fn prepare_target(&mut self, target: &str, dimension: usize) -> Result<(), StoreError> {
        let collection = self.collection(target);
        if let Some(existing) = collection.find_one(None, None).await? {
            let (_, vector) = codec::decode_document(&existing)?;
            if vector.len() != dimension {
                return Err(StoreError::SchemaMismatch {
                    subject: format!("collection {target:?}"),
                    expected: vector.len(),
                    found: dimension,
                });
            }
        }

        // the key is the collection's primary key, so duplicates must be refused
        let mut keys = Document::new();
        keys.insert(KEY_FIELD, 1);
        let index = IndexModel::builder()
            .keys(keys)
            .options(IndexOptions::builder().unique(true).build())
            .build();
        collection.create_index(index, None).await?;

        Ok(())
    }

    async fn insert_batch(&mut self, target: &str, batch: &[Record<'_>]) -> Result<(), StoreError> {
        if codec::batch_dimension(batch)?.is_none() {
            return Ok(());
        }
        let documents: Vec<Document> = batch.iter().map(codec::encode_document).collect();
        let options = InsertManyOptions::builder().ordered(true).build();
        let collection = self.collection(target);
        if let Err(error) = collection.insert_many(documents, options).await {
            // an ordered insert keeps everything before the first failing
            // document; take it out again so the batch leaves nothing behind
            let inserted = inserted_prefix(&error).min(batch.len());
            if inserted > 0 {
                collection
                    .delete_many(key_filter(batch[..inserted].iter().map(|r| r.key)), None)
                    .await?;
                debug!(removed = inserted, "rolled back partial batch");
            }
            return Err(classify_insert_error(error, batch));
        }

        Ok(())
    }

    #[instrument(skip_all, fields(target = %target, keys = keys.len()))]
    async fn read_embeddings(
        &mut self,
        keys: &[String],
        target: &str,
    ) -> Result<EmbeddingMap, StoreError> {
        if !self.collection_exists(target).await? {
            return Err(StoreError::TargetNotFound(target.to_string()));
        }
        let mut result = EmbeddingMap::new();
        if keys.is_empty() {
            return Ok(result);
        }

        let filter = key_filter(keys.iter().map(String::as_str));
        let mut cursor = self.collection(target).find(filter, None).await?;
        while let Some(document) = cursor.try_next().await? {
            let (key, vector) = codec::decode_document(&document)?;
            result.insert(key, vector);
        }
        debug!(found = result.len(), "read embeddings");

        Ok(result)
    }

    async fn close(self) -> Result<(), StoreError> {
        self.client.shutdown().await;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{ingest::write_embeddings, word2vec::KeyedVectors};

    // These need a running server:
    // WORDVEC_TEST_MONGODB_HOST=localhost cargo test -- --ignored
    async fn test_store() -> MongoStore {
        let host =
            std::env::var("WORDVEC_TEST_MONGODB_HOST").unwrap_or_else(|_| "localhost".to_string());
        let port = std::env::var("WORDVEC_TEST_MONGODB_PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(27017);
        let database = format!("wordvec_test_{}", std::process::id());
        MongoStore::open(&host, port, &database).await.unwrap()
    }

    async fn drop_database(store: MongoStore) {
        store.database.drop(None).await.unwrap();
        store.close().await.unwrap();
    }

    fn animals() -> BTreeMap<String, Vec<f64>> {
        let mut map = BTreeMap::new();
        map.insert("cat".to_string(), vec![1.0, 2.0]);
        map.insert("dog".to_string(), vec![3.0, 4.0]);
        map.insert("fish".to_string(), vec![5.0, 6.0]);
        map
    }

    #[tokio::test]
    #[ignore]
    async fn animals_scenario() {
        let mut store = test_store().await;
        let cancel = CancellationToken::new();
        let report = write_embeddings(&mut store, &animals(), "animals", 2, &cancel)
            .await
            .unwrap();
        assert_eq!(report.chunks_written, 2);

        let wanted = vec!["dog".to_string(), "bird".to_string()];
        let found = store.read_embeddings(&wanted, "animals").await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found["dog"], vec![3.0, 4.0]);

        let again = write_embeddings(&mut store, &animals(), "animals", 2, &cancel)
            .await
            .unwrap_err();
        assert!(matches!(
            again,
            StoreError::PartialWrite {
                chunks_written: 0,
                ..
            }
        ));

        let missing = store.read_embeddings(&wanted, "nowhere").await.unwrap_err();
        assert!(matches!(missing, StoreError::TargetNotFound(_)));

        drop_database(store).await;
    }

    #[tokio::test]
    #[ignore]
    async fn failing_batch_leaves_no_partial_documents() {
        // 100 words in 10 chunks; chunk 3 repeats a word and violates the key.
        let mut vectors = KeyedVectors::new(3);
        for i in 0..100 {
            let word = if i == 37 {
                "w030".to_string()
            } else {
                format!("w{i:03}")
            };
            vectors.push(word, &[i as f64, 0.0, 1.0]).unwrap();
        }

        let mut store = test_store().await;
        let error = write_embeddings(&mut store, &vectors, "words", 10, &CancellationToken::new())
            .await
            .unwrap_err();
        match &error {
            StoreError::PartialWrite {
                chunks_written,
                source,
            } => {
                assert_eq!(*chunks_written, 3);
                assert!(matches!(**source, StoreError::DuplicateKey(ref k) if k == "w030"));
            }
            other => panic!("expected partial write, got {other:?}"),
        }

        let all: Vec<String> = (0..100).map(|i| format!("w{i:03}")).collect();
        let found = store.read_embeddings(&all, "words").await.unwrap();
        for (i, word) in all.iter().enumerate() {
            assert_eq!(found.contains_key(word), i < 30, "{word}");
        }

        drop_database(store).await;
    }

    #[tokio::test]
    async fn unreachable_server_is_a_connection_error() {
        // nothing listens on port 1
        let result = MongoStore::open("127.0.0.1", 1, "wordvec").await;
        assert!(matches!(result, Err(StoreError::Connection(_))));
    }
}
