use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use rag_chat::commands::{ask, ingest, init_config, search, serve, show_config, show_status, similar};
use rag_chat::config::{Config, get_config_dir};
use rag_chat::database::{DEFAULT_LIMIT, DEFAULT_THRESHOLD};
use rag_chat::embeddings::ChunkingConfig;

#[derive(Parser)]
#[command(name = "rag-chat")]
#[command(about = "Retrieval-augmented chat over your own documents")]
#[command(version)]
struct Cli {
    /// Directory holding config.toml (and the default vector store)
    #[arg(long, global = true, env = "RAG_CHAT_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show or initialize the configuration
    Config {
        /// Show current configuration
        #[arg(long, conflicts_with = "init")]
        show: bool,
        /// Write a default config file
        #[arg(long)]
        init: bool,
    },
    /// Chunk, embed and store a text document
    Ingest {
        /// Path of the UTF-8 document to ingest
        file: PathBuf,
        /// Literal separator between sections
        #[arg(long, conflicts_with = "no_separator")]
        separator: Option<String>,
        /// Only split by size, ignoring any separator
        #[arg(long)]
        no_separator: bool,
        /// Maximum chunk length in characters
        #[arg(long)]
        max_chunk_size: Option<usize>,
    },
    /// Search stored passages by similarity to a query
    Search {
        query: String,
        #[arg(long)]
        top_k: Option<usize>,
        #[arg(long)]
        threshold: Option<f32>,
    },
    /// List records similar to a stored record
    Similar {
        /// Id of the stored record
        id: String,
        #[arg(long, default_value_t = DEFAULT_THRESHOLD)]
        threshold: f32,
        #[arg(long, default_value_t = DEFAULT_LIMIT)]
        limit: usize,
    },
    /// Ask a question and stream the answer
    Ask { question: String },
    /// Start the HTTP server
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Show store and API status
    Status,
}

fn chunking_options(
    defaults: &ChunkingConfig,
    separator: Option<String>,
    no_separator: bool,
    max_chunk_size: Option<usize>,
) -> ChunkingConfig {
    let separator = if no_separator {
        String::new()
    } else {
        separator.unwrap_or_else(|| defaults.separator.clone())
    };

    ChunkingConfig {
        separator,
        max_chunk_size: max_chunk_size.unwrap_or(defaults.max_chunk_size),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let config_dir = match cli.config_dir {
        Some(dir) => dir,
        None => get_config_dir().context("Failed to determine config directory")?,
    };

    if let Commands::Config { init: true, .. } = cli.command {
        return init_config(&config_dir);
    }

    let config = Config::load(&config_dir).context("Failed to load configuration")?;

    match cli.command {
        Commands::Config { .. } => {
            show_config(&config)?;
        }
        Commands::Ingest {
            file,
            separator,
            no_separator,
            max_chunk_size,
        } => {
            let options =
                chunking_options(&config.chunking, separator, no_separator, max_chunk_size);
            ingest(&config, &file, &options).await?;
        }
        Commands::Search {
            query,
            top_k,
            threshold,
        } => {
            let top_k = top_k.unwrap_or(config.retrieval.top_k);
            let threshold = threshold.unwrap_or(config.retrieval.threshold);
            search(&config, &query, top_k, threshold).await?;
        }
        Commands::Similar {
            id,
            threshold,
            limit,
        } => {
            similar(&config, &id, threshold, limit).await?;
        }
        Commands::Ask { question } => {
            ask(&config, &question).await?;
        }
        Commands::Serve { host, port } => {
            serve(&config, host, port).await?;
        }
        Commands::Status => {
            show_status(&config).await?;
        }
    }

    Ok(())
}
