//! # docvec CLI
//!
//! Ingests a folder of documents into a vector index and answers questions
//! against it.
//!
//! ## Usage
//!
//! ```bash
//! docvec --config ./config/docvec.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `docvec ingest` | Extract, chunk, embed and upload every document in the folder |
//! | `docvec ask "<question>"` | Answer a question from the indexed documents |
//! | `docvec search "<query>"` | Show the closest passages |
//! | `docvec indexes` | List the indexes visible to the API key |
//! | `docvec chunk <file>` | Print the chunks a single file would produce |
//!
//! Credentials come from `OPENAI_API_KEY` and `PINECONE_API_KEY` (a `.env`
//! file in the working directory is honoured). Logs go to stderr; set
//! `RUST_LOG` to change the level.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use docvec::answer::{format_search_results, AnswerOutcome, OpenAiChat, QueryEngine};
use docvec::config::{self, Config};
use docvec::embedding::OpenAiEmbeddings;
use docvec::extract::discover_files;
use docvec::index::{PineconeIndex, VectorIndex};
use docvec::ingest::{DocumentPipeline, IngestSummary, Ingestor};

/// docvec: document-to-vector ingestion and question answering.
#[derive(Parser)]
#[command(
    name = "docvec",
    version,
    about = "Ingest documents into a vector index and answer questions from them"
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/docvec.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every supported document under the configured folder.
    Ingest {
        /// Folder to ingest instead of `ingest.folder`.
        #[arg(long)]
        folder: Option<PathBuf>,

        /// Namespace to write to instead of `index.namespace`.
        #[arg(long)]
        namespace: Option<String>,

        /// Extract and chunk only; report what would be uploaded.
        #[arg(long)]
        dry_run: bool,
    },

    /// Answer a question from the indexed documents.
    Ask {
        question: String,

        /// Number of passages to retrieve.
        #[arg(long)]
        top_k: Option<usize>,

        /// Token budget for the assembled context.
        #[arg(long)]
        max_context_tokens: Option<usize>,
    },

    /// Show the passages closest to a query.
    Search {
        query: String,

        #[arg(long)]
        top_k: Option<usize>,
    },

    /// List the indexes visible to the API key.
    Indexes,

    /// Print the chunks a single file would produce.
    Chunk { file: PathBuf },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("docvec=info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Chunk { file } => {
            let cfg = load_or_minimal(&cli.config)?;
            run_chunk(&cfg, &file)
        }
        Commands::Ingest {
            folder,
            namespace,
            dry_run,
        } => {
            let mut cfg = if dry_run {
                load_or_minimal(&cli.config)?
            } else {
                config::load_config(&cli.config)?
            };
            if let Some(folder) = folder {
                cfg.ingest.folder = folder;
            }
            if let Some(ns) = namespace {
                if !ns.is_ascii() {
                    bail!("--namespace must be ASCII: {:?}", ns);
                }
                cfg.index.namespace = Some(ns);
            }
            run_ingest(&cfg, dry_run).await
        }
        Commands::Ask {
            question,
            top_k,
            max_context_tokens,
        } => {
            let cfg = config::load_config(&cli.config)?;
            run_ask(&cfg, &question, top_k, max_context_tokens).await
        }
        Commands::Search { query, top_k } => {
            let cfg = config::load_config(&cli.config)?;
            run_search(&cfg, &query, top_k).await
        }
        Commands::Indexes => {
            let cfg = config::load_config(&cli.config)?;
            let index = PineconeIndex::new(&cfg.index)?;
            let names = index.list_indexes().await?;
            if names.is_empty() {
                println!("No indexes found.");
            }
            for name in names {
                let marker = if name == cfg.index.name { " (configured)" } else { "" };
                println!("{}{}", name, marker);
            }
            Ok(())
        }
    }
}

/// Commands that never touch remote services can run without a config file.
fn load_or_minimal(path: &Path) -> Result<Config> {
    if path.exists() {
        config::load_config(path)
    } else {
        Ok(Config::minimal("docvec"))
    }
}

fn run_chunk(cfg: &Config, file: &Path) -> Result<()> {
    let pipeline = DocumentPipeline::from_config(cfg)?;
    let doc = pipeline
        .load(file)
        .with_context(|| format!("No text could be extracted from {}", file.display()))?;
    let chunks = pipeline.chunker().chunk_document(doc);

    println!("{}: {} chunk(s)", file.display(), chunks.len());
    for c in &chunks {
        println!(
            "\n--- chunk {} ({} chars, {} tokens) id={} ---",
            c.index,
            c.text.chars().count(),
            pipeline.chunker().counter().count(&c.text),
            pipeline.payload().record_id(c)
        );
        println!("{}", c.text);
    }
    Ok(())
}

async fn run_ingest(cfg: &Config, dry_run: bool) -> Result<()> {
    let paths = discover_files(&cfg.ingest)?;
    if paths.is_empty() {
        println!(
            "No supported files found in {} (supported: {})",
            cfg.ingest.folder.display(),
            cfg.ingest.extensions.join(", ")
        );
        return Ok(());
    }

    let pipeline = DocumentPipeline::from_config(cfg)?;

    if dry_run {
        let summary = pipeline.plan(&paths);
        println!("ingest {} (dry-run)", cfg.ingest.folder.display());
        print_summary(&summary);
        return Ok(());
    }

    let embedder = Arc::new(OpenAiEmbeddings::new(&cfg.embedding)?);
    let index = Arc::new(PineconeIndex::new(&cfg.index)?);
    let ingestor = Ingestor::new(cfg, pipeline, embedder, index);

    let summary = ingestor.run(&paths).await?;
    println!("ingest {} -> {}", cfg.ingest.folder.display(), cfg.index.name);
    print_summary(&summary);
    if let Some(ns) = &cfg.index.namespace {
        println!("  namespace: {}", ns);
    }

    if !summary.upload_complete() {
        eprintln!(
            "error: {} upload batch(es) failed; re-run to retry (uploads are idempotent)",
            summary.upload_failures.len()
        );
        std::process::exit(2);
    }
    if summary.chunks_failed > 0 {
        println!("completed with failures; re-run to retry (uploads are idempotent)");
    } else {
        println!("ok");
    }
    Ok(())
}

fn print_summary(summary: &IngestSummary) {
    println!("  files found: {}", summary.files_found);
    println!("  files processed: {}", summary.files_processed);
    println!("  files skipped: {}", summary.files_skipped);
    println!("  chunks created: {}", summary.chunks_created);
    println!("  chunks embedded: {}", summary.chunks_embedded);
    println!("  chunks uploaded: {}", summary.chunks_uploaded);
    println!("  chunks truncated: {}", summary.chunks_truncated);
    println!("  chunks failed: {}", summary.chunks_failed);
    for failure in &summary.upload_failures {
        println!(
            "  upload batch {} failed ({} records): {}",
            failure.batch, failure.records, failure.error
        );
    }
    if !summary.sample_ids.is_empty() {
        println!("  sample ids:");
        for id in &summary.sample_ids {
            println!("    {}", id);
        }
    }
}

async fn query_engine(cfg: &Config) -> Result<QueryEngine> {
    let embedder = Arc::new(OpenAiEmbeddings::new(&cfg.embedding)?);
    let index = Arc::new(PineconeIndex::new(&cfg.index)?);
    let generator = Arc::new(OpenAiChat::new(&cfg.answer)?);
    Ok(QueryEngine::connect(cfg, embedder, index, generator).await?)
}

async fn run_ask(
    cfg: &Config,
    question: &str,
    top_k: Option<usize>,
    max_context_tokens: Option<usize>,
) -> Result<()> {
    let engine = query_engine(cfg).await?;
    let outcome = engine
        .ask_with(
            question,
            top_k.unwrap_or(cfg.retrieval.top_k),
            max_context_tokens.unwrap_or(cfg.retrieval.max_context_tokens),
        )
        .await?;

    println!("{}", outcome.message());
    match &outcome {
        AnswerOutcome::Answered { sources, .. } => {
            println!("\nSources:");
            for (i, s) in sources.iter().enumerate() {
                println!("  {}. {}", i + 1, s);
            }
        }
        AnswerOutcome::Unavailable { reason } => {
            eprintln!("error: {}", reason);
            std::process::exit(2);
        }
        AnswerOutcome::Insufficient => {}
    }
    Ok(())
}

async fn run_search(cfg: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    let engine = query_engine(cfg).await?;
    let hits = engine
        .retriever()
        .search(query, top_k.unwrap_or(cfg.retrieval.top_k))
        .await?;
    println!("{}", format_search_results(&hits));
    Ok(())
}
