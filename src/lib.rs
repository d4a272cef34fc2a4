pub mod backend;
pub mod chunk;
pub mod codec;
pub mod config;
pub mod error;
pub mod ingest;
pub mod session;
pub mod source;
pub mod word2vec;
