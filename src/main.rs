use std::{collections::BTreeMap, path::PathBuf};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use wordvec_store::{
    backend::BackendKind,
    config::Config,
    session::Session,
    word2vec::{self, Format},
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[arg(value_enum)]
    database_type: BackendKind,
    #[arg(short, long, default_value = "db.toml")]
    config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Load a word2vec file into the configured target
    Load {
        #[arg(short, long)]
        input: Option<PathBuf>,
        #[arg(short = 's', long)]
        chunk_size: Option<usize>,
        #[arg(short, long)]
        text: bool,
        #[arg(short, long)]
        limit: Option<usize>,
    },
    /// Print the stored vectors of the given words as JSON
    Lookup {
        #[arg(required = true)]
        words: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let config = Config::load(&args.config)?;
    match args.command.unwrap_or(Commands::Load {
        input: None,
        chunk_size: None,
        text: false,
        limit: None,
    }) {
        Commands::Load {
            input,
            chunk_size,
            text,
            limit,
        } => {
            let path = input.unwrap_or_else(|| config.data.path.clone());
            let format = if text || !config.data.binary {
                Format::Text
            } else {
                Format::Binary
            };
            let limit = limit.or(config.data.limit);
            let vectors =
                tokio::task::spawn_blocking(move || word2vec::load_word2vec(path, format, limit))
                    .await??;

            let cancel = CancellationToken::new();
            let interrupted = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("interrupted, stopping after the current chunk");
                    interrupted.cancel();
                }
            });

            let mut session = Session::open(&config.backend(args.database_type)?).await?;
            let outcome = session
                .write_embeddings(
                    &vectors,
                    config.target(),
                    chunk_size.unwrap_or(config.chunk_size),
                    &cancel,
                )
                .await;
            let report = session.release(outcome).await?;
            info!(
                chunks = report.chunks_written,
                records = report.records_written,
                target = config.target(),
                "load finished"
            );
        }
        Commands::Lookup { words } => {
            let mut session = Session::open(&config.backend(args.database_type)?).await?;
            let outcome = session.read_embeddings(&words, config.target()).await;
            let found: BTreeMap<_, _> = session.release(outcome).await?.into_iter().collect();
            println!("{}", serde_json::to_string_pretty(&found)?);
        }
    }

    Ok(())
}
