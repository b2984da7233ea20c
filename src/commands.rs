use anyhow::{Context, Result, bail};
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::chat::{ChatMessage, OpenAiChat, ResponseStreamer, RetrievalUpdate, StreamEvent};
use crate::config::Config;
use crate::database::{SimilarityResult, VectorStore};
use crate::embeddings::{ChunkingConfig, EmbeddingProvider, OpenAiEmbeddings};
use crate::indexer::Indexer;
use crate::retrieval::Retriever;
use crate::server::{self, AppState};

/// Embedding client and vector store shared by every command
struct Components {
    embedder: Arc<dyn EmbeddingProvider>,
    store: Arc<VectorStore>,
}

async fn open_components(config: &Config) -> Result<Components> {
    let embedder =
        OpenAiEmbeddings::new(&config.api).context("Failed to create embedding client")?;
    let store = VectorStore::open(config)
        .await
        .with_context(|| format!("Failed to open vector store at {}", config.store_uri()))?;

    Ok(Components {
        embedder: Arc::new(embedder),
        store: Arc::new(store),
    })
}

fn build_streamer(config: &Config, components: &Components) -> Result<(ResponseStreamer, Retriever)> {
    let completion = OpenAiChat::new(&config.api).context("Failed to create chat client")?;
    let retriever = Retriever::from_config(
        Arc::clone(&components.embedder),
        Arc::clone(&components.store),
        &config.retrieval,
    );
    let streamer = ResponseStreamer::new(retriever.clone(), Arc::new(completion))
        .with_top_k(config.retrieval.top_k)
        .with_preamble(config.retrieval.system_preamble.clone());

    Ok((streamer, retriever))
}

fn print_results(results: &[SimilarityResult]) {
    if results.is_empty() {
        println!("{}", style("No matching passages found.").yellow());
        return;
    }

    for (rank, result) in results.iter().enumerate() {
        println!(
            "{} {} {}",
            style(format!("{}.", rank + 1)).bold(),
            style(format!("{:.4}", result.similarity)).green(),
            style(&result.id).dim()
        );
        let preview: String = result.content.chars().take(200).collect();
        println!("   {}", preview.replace('\n', " "));
        println!();
    }
}

/// Print the effective configuration with the API key masked
#[inline]
pub fn show_config(config: &Config) -> Result<()> {
    eprintln!("{}", style("📋 Current Configuration").bold().cyan());
    eprintln!();

    eprintln!("{}", style("API Settings:").bold().yellow());
    eprintln!("  Base URL: {}", style(&config.api.base_url).cyan());
    eprintln!("  API Key: {}", style(config.api.masked_api_key()).cyan());
    eprintln!("  Chat Model: {}", style(&config.api.chat_model).cyan());
    eprintln!(
        "  Embedding Model: {}",
        style(&config.api.embedding_model).cyan()
    );
    eprintln!("  Temperature: {}", style(config.api.temperature).cyan());
    eprintln!("  Max Tokens: {}", style(config.api.max_tokens).cyan());

    eprintln!();
    eprintln!("{}", style("Vector Store:").bold().yellow());
    eprintln!("  URI: {}", style(config.store_uri()).cyan());
    eprintln!("  Table: {}", style(&config.store.table).cyan());
    eprintln!(
        "  Dimension: {}",
        style(config.store.embedding_dimension).cyan()
    );

    eprintln!();
    eprintln!("{}", style("Retrieval:").bold().yellow());
    eprintln!("  Threshold: {}", style(config.retrieval.threshold).cyan());
    eprintln!("  Top K: {}", style(config.retrieval.top_k).cyan());
    let separator = config.chunking.separator().unwrap_or("(none)");
    eprintln!("  Separator: {}", style(separator).cyan());
    eprintln!(
        "  Max Chunk Size: {}",
        style(config.chunking.max_chunk_size).cyan()
    );

    eprintln!();
    eprintln!(
        "Config file: {}",
        style(config.config_file_path().display()).dim()
    );

    Ok(())
}

/// Write a default `config.toml` into `config_dir` unless one already exists
#[inline]
pub fn init_config(config_dir: &Path) -> Result<()> {
    let config = Config {
        base_dir: config_dir.to_path_buf(),
        ..Config::default()
    };
    let path = config.config_file_path();

    if path.exists() {
        eprintln!(
            "{} {}",
            style("Config file already exists:").yellow(),
            path.display()
        );
        return Ok(());
    }

    config.save()?;
    eprintln!(
        "{} {}",
        style("✅ Wrote default configuration to").green(),
        path.display()
    );
    Ok(())
}

/// Chunk, embed and store a document
#[inline]
pub async fn ingest(config: &Config, path: &Path, options: &ChunkingConfig) -> Result<()> {
    let components = open_components(config).await?;
    let indexer = Indexer::new(Arc::clone(&components.embedder), Arc::clone(&components.store));

    let spinner = ProgressBar::new_spinner().with_style(
        ProgressStyle::with_template("{spinner} {msg} [{elapsed}]")
            .context("Invalid progress template")?,
    );
    spinner.enable_steady_tick(Duration::from_millis(120));
    spinner.set_message(format!("Embedding {}", path.display()));

    let outcome = indexer.ingest_file(path, options).await;
    spinner.finish_and_clear();

    let report = outcome.with_context(|| format!("Failed to ingest {}", path.display()))?;
    info!("Ingested {} chunks from {}", report.chunk_count, path.display());

    println!(
        "{} {} chunks from {}",
        style("✅ Stored").green(),
        report.chunk_count,
        path.display()
    );
    for id in &report.ids {
        println!("   {}", style(id).dim());
    }

    match components.store.create_vector_index().await {
        Ok(true) => println!("{}", style("✅ Rebuilt vector index").green()),
        Ok(false) => {}
        Err(e) => warn!("Vector index not rebuilt: {}", e),
    }
    Ok(())
}

/// Print the passages most similar to `query`
#[inline]
pub async fn search(config: &Config, query: &str, top_k: usize, threshold: f32) -> Result<()> {
    let components = open_components(config).await?;
    let retriever = Retriever::new(components.embedder, components.store, threshold);

    let results = retriever
        .retrieve(query, top_k)
        .await
        .context("Search failed")?;
    print_results(&results);
    Ok(())
}

/// Print the records most similar to the stored record `id`
#[inline]
pub async fn similar(config: &Config, id: &str, threshold: f32, limit: usize) -> Result<()> {
    let components = open_components(config).await?;

    let results = components
        .store
        .find_similar_excluding_self(id, threshold, limit)
        .await
        .context("Similarity lookup failed")?;
    print_results(&results);
    Ok(())
}

/// Answer a single question, streaming tokens to stdout
#[inline]
pub async fn ask(config: &Config, question: &str) -> Result<()> {
    let components = open_components(config).await?;
    let (streamer, _) = build_streamer(config, &components)?;

    let mut events = streamer.spawn(vec![ChatMessage::user(question)]);
    let mut stdout = std::io::stdout();

    while let Some(event) = events.recv().await {
        match event {
            StreamEvent::Retrieval(RetrievalUpdate::Searching { message }) => {
                eprintln!("{}", style(message).dim());
            }
            StreamEvent::Retrieval(RetrievalUpdate::Found { count, .. }) => {
                eprintln!("{}", style(format!("{} reference passages", count)).dim());
            }
            StreamEvent::Content { content, .. } => {
                print!("{}", content);
                stdout.flush().context("Failed to write to stdout")?;
            }
            StreamEvent::Done { .. } => {
                println!();
            }
            StreamEvent::Error { message } => {
                println!();
                bail!(message);
            }
        }
    }

    Ok(())
}

/// Start the HTTP server
#[inline]
pub async fn serve(config: &Config, host: Option<String>, port: Option<u16>) -> Result<()> {
    let components = open_components(config).await?;
    let (streamer, retriever) = build_streamer(config, &components)?;
    let state = AppState::new(streamer, retriever).with_top_k(config.retrieval.top_k);

    let host = host.unwrap_or_else(|| config.server.host.clone());
    let port = port.unwrap_or(config.server.port);
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;

    eprintln!(
        "{} http://{}",
        style("🚀 Serving on").green().bold(),
        addr
    );
    server::serve(Arc::new(state), addr)
        .await
        .context("HTTP server failed")?;
    Ok(())
}

/// Report store location, record count and API settings
#[inline]
pub async fn show_status(config: &Config) -> Result<()> {
    println!("📊 RAG Chat Status Report");
    println!("{}", "=".repeat(50));
    println!();

    println!("🔍 Vector Store:");
    println!("   Location: {}", config.store_uri());
    println!("   Table: {}", config.store.table);
    match VectorStore::open(config).await {
        Ok(store) => match store.count().await {
            Ok(count) => println!("   ✅ Records: {}", count),
            Err(e) => println!("   ⚠️  Connected but unable to count records - {}", e),
        },
        Err(e) => {
            warn!("Vector store unavailable: {}", e);
            println!("   ❌ Failed to open - {}", e);
        }
    }

    println!();
    println!("🤖 API:");
    println!("   Base URL: {}", config.api.base_url);
    println!("   Chat Model: {}", config.api.chat_model);
    println!("   Embedding Model: {}", config.api.embedding_model);
    if config.api.api_key.is_empty() {
        println!("   ⚠️  No API key configured");
    } else {
        println!("   API Key: {}", config.api.masked_api_key());
    }

    Ok(())
}
