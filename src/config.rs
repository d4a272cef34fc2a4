use std::{
    io,
    path::{Path, PathBuf},
};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    backend::{BackendConfig, BackendKind},
    ingest::DEFAULT_CHUNK_SIZE,
};

const DEFAULT_MONGODB_PORT: u16 = 27017;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("could not read {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
    #[error("no [{0}] section configured")]
    MissingSection(&'static str),
    #[error("environment variable {name} has bad value {value:?}")]
    BadEnv { name: &'static str, value: String },
    #[error("chunk_size must be a positive integer")]
    ZeroChunkSize,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Store name: the MongoDB database, or the stem of the SQLite file.
    pub name: String,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    pub data: DataConfig,
    #[serde(default)]
    pub sqlite: Option<SqliteConfig>,
    #[serde(default)]
    pub mongodb: Option<MongoConfig>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DataConfig {
    pub path: PathBuf,
    /// Table or collection the vectors go to.
    pub name: String,
    #[serde(default = "default_true")]
    pub binary: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct SqliteConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MongoConfig {
    pub host: String,
    #[serde(default = "default_mongodb_port")]
    pub port: u16,
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_true() -> bool {
    true
}
fn default_mongodb_port() -> u16 {
    DEFAULT_MONGODB_PORT
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Io {
            path: path.as_ref().to_path_buf(),
            source,
        })?;
        Self::from_toml(&contents)?.with_env(|name| std::env::var(name).ok())
    }

    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Apply `WORDVEC_*` overrides looked up through `lookup`.
    pub fn with_env<F: Fn(&str) -> Option<String>>(mut self, lookup: F) -> Result<Self, ConfigError> {
        if let Some(host) = lookup("WORDVEC_MONGODB_HOST") {
            match &mut self.mongodb {
                Some(mongodb) => mongodb.host = host,
                None => {
                    self.mongodb = Some(MongoConfig {
                        host,
                        port: DEFAULT_MONGODB_PORT,
                    })
                }
            }
        }
        if let Some(port) = lookup("WORDVEC_MONGODB_PORT") {
            let parsed = port.parse().map_err(|_| ConfigError::BadEnv {
                name: "WORDVEC_MONGODB_PORT",
                value: port.clone(),
            })?;
            let mongodb = self
                .mongodb
                .as_mut()
                .ok_or(ConfigError::MissingSection("mongodb"))?;
            mongodb.port = parsed;
        }
        if let Some(path) = lookup("WORDVEC_SQLITE_PATH") {
            self.sqlite = Some(SqliteConfig { path: path.into() });
        }
        if let Some(chunk_size) = lookup("WORDVEC_CHUNK_SIZE") {
            self.chunk_size = chunk_size.parse().map_err(|_| ConfigError::BadEnv {
                name: "WORDVEC_CHUNK_SIZE",
                value: chunk_size.clone(),
            })?;
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroChunkSize);
        }

        Ok(self)
    }

    pub fn target(&self) -> &str {
        &self.data.name
    }

    pub fn backend(&self, kind: BackendKind) -> Result<BackendConfig, ConfigError> {
        match kind {
            BackendKind::Sqlite => {
                let sqlite = self
                    .sqlite
                    .as_ref()
                    .ok_or(ConfigError::MissingSection("sqlite"))?;
                Ok(BackendConfig::Sqlite {
                    path: sqlite.path.join(format!("{}.db", self.name)),
                })
            }
            BackendKind::Mongodb => {
                let mongodb = self
                    .mongodb
                    .as_ref()
                    .ok_or(ConfigError::MissingSection("mongodb"))?;
                Ok(BackendConfig::Mongo {
                    host: mongodb.host.clone(),
                    port: mongodb.port,
                    database: self.name.clone(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    const FULL: &str = r#"
name = "word_embeddings"

[data]
path = "GoogleNews-vectors-negative300.bin"
name = "google_news_vec"

[sqlite]
path = "./data"

[mongodb]
host = "db.internal"
port = 27018
"#;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn parses_with_defaults() {
        let config = Config::from_toml(FULL).unwrap().with_env(no_env).unwrap();
        assert_eq!(config.chunk_size, 100_000);
        assert!(config.data.binary);
        assert_eq!(config.data.limit, None);
        assert_eq!(config.target(), "google_news_vec");

        assert_eq!(
            config.backend(BackendKind::Sqlite).unwrap(),
            BackendConfig::Sqlite {
                path: PathBuf::from("./data/word_embeddings.db")
            }
        );
        assert_eq!(
            config.backend(BackendKind::Mongodb).unwrap(),
            BackendConfig::Mongo {
                host: "db.internal".to_string(),
                port: 27018,
                database: "word_embeddings".to_string(),
            }
        );
    }

    #[test]
    fn environment_overrides_file() {
        let env: HashMap<&str, &str> = [
            ("WORDVEC_MONGODB_HOST", "localhost"),
            ("WORDVEC_SQLITE_PATH", "/tmp/vecs"),
            ("WORDVEC_CHUNK_SIZE", "500"),
        ]
        .into_iter()
        .collect();
        let config = Config::from_toml(FULL)
            .unwrap()
            .with_env(|name| env.get(name).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.chunk_size, 500);
        assert_eq!(config.mongodb.as_ref().unwrap().host, "localhost");
        assert_eq!(config.mongodb.as_ref().unwrap().port, 27018);
        assert_eq!(config.sqlite.unwrap().path, PathBuf::from("/tmp/vecs"));
    }

    #[test]
    fn missing_sections_and_bad_values() {
        let minimal = r#"
name = "w"
[data]
path = "v.txt"
name = "t"
binary = false
"#;
        let config = Config::from_toml(minimal).unwrap().with_env(no_env).unwrap();
        assert!(!config.data.binary);
        assert!(matches!(
            config.backend(BackendKind::Sqlite),
            Err(ConfigError::MissingSection("sqlite"))
        ));

        let with_host = config
            .clone()
            .with_env(|name| (name == "WORDVEC_MONGODB_HOST").then(|| "h".to_string()))
            .unwrap();
        assert_eq!(with_host.mongodb.unwrap().port, 27017);

        let bad_port = config
            .clone()
            .with_env(|name| (name == "WORDVEC_MONGODB_PORT").then(|| "x".to_string()));
        assert!(matches!(bad_port, Err(ConfigError::BadEnv { .. })));

        let zero = Config::from_toml(&format!("chunk_size = 0\n{minimal}"))
            .unwrap()
            .with_env(no_env);
        assert!(matches!(zero, Err(ConfigError::ZeroChunkSize)));
    }

    #[test]
    fn loads_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.toml");
        std::fs::write(&path, FULL).unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.name, "word_embeddings");

        assert!(matches!(
            Config::load(dir.path().join("absent.toml")),
            Err(ConfigError::Io { .. })
        ));
    }
}
