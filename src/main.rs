//! # Guideline RAG CLI (`grag`)
//!
//! ## Usage
//!
//! ```bash
//! grag --config ./config/grag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `grag index` | Load the persisted index, or build it if missing or stale |
//! | `grag rebuild` | Discard the index and rebuild it from the corpus |
//! | `grag status` | Show index state, persisted metadata, and staleness |
//! | `grag ask "<question>"` | Answer a question from the guidelines |
//! | `grag serve` | Start the HTTP query API |
//! | `grag completions <shell>` | Print shell completions |
//!
//! ## Examples
//!
//! ```bash
//! grag index --config ./config/grag.toml
//! grag ask "How can dengue be prevented?" --config ./config/grag.toml
//! grag ask "डेंगू से कैसे बचें?" --lang hi --json
//! GROQ_API_KEY=... grag serve
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use guideline_rag::config::{load_config, Config};
use guideline_rag::embedding::create_embedder;
use guideline_rag::engine::Engine;
use guideline_rag::index_store::{BuildReport, IndexStatus, IndexStore};
use guideline_rag::logging;
use guideline_rag::server::{self, AnswerResponse};

/// Guideline RAG: strict, citation-backed answers from a local corpus of
/// guideline documents.
#[derive(Parser)]
#[command(
    name = "grag",
    about = "Strict retrieval-augmented answers from local guideline documents",
    version,
    long_about = "grag indexes a directory of guideline documents (PDF, PPTX, DOCX, TXT, Markdown) \
    and answers questions using only verbatim-traceable excerpts. When the guidelines do not cover \
    a question it replies with a fixed fallback instead of guessing."
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/grag.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v debug, -vv trace). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Make the index ready: load it, or build it when missing or stale.
    Index,

    /// Discard the persisted index and rebuild it from the corpus.
    ///
    /// Safe to run when no index exists.
    Rebuild,

    /// Show index state, persisted metadata, and whether the corpus changed.
    Status,

    /// Answer a question from the indexed guidelines.
    Ask {
        /// The question.
        question: String,

        /// Preferred reply language code (e.g. `en`, `hi`, `mr`), used when
        /// the question's own language is unclear.
        #[arg(long = "lang", default_value = "en")]
        language: String,

        /// Print the query-API JSON payload instead of plain text.
        #[arg(long)]
        json: bool,
    },

    /// Start the HTTP query API on `[server].bind`.
    Serve,

    /// Generate shell completions.
    ///
    /// Example: `grag completions zsh > ~/.zfunc/_grag`
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logging::init(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "grag", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        Commands::Index => {
            let store = index_store(&config)?;
            let ready = store.ensure_ready().await?;
            if ready.is_none() {
                println!("index unavailable: corpus has no usable text");
            }
            print_status(&store.status().await?);
        }
        Commands::Rebuild => {
            let store = index_store(&config)?;
            let report = store.force_rebuild().await?;
            print_report(&report);
        }
        Commands::Status => {
            let store = index_store(&config)?;
            print_status(&store.status().await?);
        }
        Commands::Ask {
            question,
            language,
            json,
        } => {
            let engine = Engine::from_config(&config)?;
            let answer = engine.answer(&question, &language).await?;
            if json {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&AnswerResponse::from(&answer))?
                );
            } else {
                println!("{}", answer.text);
                println!();
                println!("coverage: {}", answer.coverage);
            }
        }
        Commands::Serve => {
            let engine = Arc::new(Engine::from_config(&config)?);
            server::run_server(engine, &config.server.bind).await?;
        }
        Commands::Completions { .. } => {}
    }

    Ok(())
}

/// Index commands need only the embedder, not generation credentials.
fn index_store(config: &Config) -> anyhow::Result<IndexStore> {
    let embedder = create_embedder(&config.embedding)?;
    Ok(IndexStore::from_config(config, embedder))
}

fn print_status(status: &IndexStatus) {
    println!("index: {}", status.state.as_str());
    println!("  chunks: {}", status.chunk_count);
    println!("  documents: {}", status.document_count);
    if let Some(model) = &status.embedding_model {
        println!("  embedding model: {}", model);
    }
    if let Some(built_at) = &status.built_at {
        println!("  built at: {}", built_at.to_rfc3339());
    }
    println!("  stale: {}", if status.stale { "yes" } else { "no" });
}

fn print_report(report: &BuildReport) {
    println!("rebuild");
    println!("  state: {}", report.state.as_str());
    println!("  chunks: {}", report.chunk_count);
    println!("  documents: {}", report.document_count);
    for (document, reason) in &report.skipped {
        println!("  skipped: {} ({})", document, reason);
    }
    println!("ok");
}
