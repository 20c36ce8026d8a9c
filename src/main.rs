// MUSE Main Entry Point
// Copyright (c) 2026 Xing_The_Creator | MUSE

use muse_core::agent::core::build_captioner;
use muse_core::agent::embedding_store::EmbeddingStore;
use muse_core::{MuseCore, Pipeline, PipelineError, RunLimits, Settings};

use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Parser)]
#[command(name = "muse")]
#[command(about = "Scrape, rank, caption, generate and publish", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full pipeline once
    Run(LimitArgs),

    /// Rank local images through the embedding store
    Select {
        /// Images to rank
        #[arg(required = true)]
        images: Vec<PathBuf>,

        /// Number of images to keep
        #[arg(short = 'k', long, default_value_t = 6)]
        top_k: usize,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Caption local images
    Caption {
        #[arg(required = true)]
        images: Vec<PathBuf>,
    },

    /// Show embedding store statistics
    Store,
}

#[derive(Args)]
struct LimitArgs {
    /// Unique source images required before selection
    #[arg(long, default_value_t = 10)]
    desired_count: usize,

    /// Fetch rounds before giving up on the quota
    #[arg(long, default_value_t = 10)]
    max_attempts: usize,

    /// Reference images used for the caption
    #[arg(long, default_value_t = 6)]
    top_k: usize,

    /// Candidate images to generate
    #[arg(long, default_value_t = 4)]
    num_images: usize,

    /// Recent posts inspected per source account
    #[arg(long, default_value_t = 10)]
    max_posts_per_account: usize,
}

impl From<LimitArgs> for RunLimits {
    fn from(args: LimitArgs) -> Self {
        Self {
            desired_count: args.desired_count,
            max_fetch_attempts: args.max_attempts,
            top_k: args.top_k,
            num_images: args.num_images,
            max_posts_per_account: args.max_posts_per_account,
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();

    // Keep HTTP and tokenizer internals quiet unless explicitly overridden.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info,hyper=warn,reqwest=warn,tokenizers=warn,hf_hub=warn");
    }
    tracing_subscriber::fmt::init();

    std::panic::set_hook(Box::new(|panic_info| {
        let location = panic_info
            .location()
            .map(|l| format!("{}:{}:{}", l.file(), l.line(), l.column()))
            .unwrap_or_else(|| "unknown".to_string());
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };
        error!("[MUSE PANIC] at {}: {}", location, message);
    }));

    let args = Cli::parse();
    let settings = Settings::from_env();

    match execute(args.command, settings).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            ExitCode::from(e.exit_code())
        }
    }
}

async fn execute(command: Commands, settings: Settings) -> Result<(), PipelineError> {
    match command {
        Commands::Run(limits) => {
            // Fail on configuration before paying for the model load.
            settings.ensure_source_accounts()?;
            let mut core = initialize(settings)?;
            let result = Pipeline::new(&mut core, limits.into()).run().await;
            core.shutdown();

            let report = result?;
            match &report.published {
                Some(media) => info!("Published {} with caption: {}", media.id, report.caption),
                None => info!("Run finished without a published post"),
            }
        }
        Commands::Select { images, top_k, json } => {
            let core = initialize(settings)?;
            let ranked = tokio::task::block_in_place(|| core.selector.rank_images(&images))
                .map_err(PipelineError::Selection)?;
            let top: Vec<_> = ranked.into_iter().take(top_k).collect();
            if json {
                let out = serde_json::to_string_pretty(&top)
                    .map_err(|e| PipelineError::Selection(e.into()))?;
                println!("{}", out);
            } else {
                for scored in &top {
                    println!("{:.4}\t{}", scored.score, scored.path.display());
                }
            }
            core.shutdown();
        }
        Commands::Caption { images } => {
            let captioner = build_captioner(&settings).map_err(PipelineError::Init)?;
            let caption = captioner
                .generate_caption(&images)
                .await
                .map_err(PipelineError::Caption)?;
            if caption.is_empty() {
                return Err(PipelineError::NoDescriptions);
            }
            println!("{}", caption);
        }
        Commands::Store => {
            let store = EmbeddingStore::new(&settings.embeddings_path);
            let stats = store.stats().map_err(PipelineError::Store)?;
            println!("path:       {}", store.path().display());
            println!("records:    {}", stats.records);
            match stats.dimension {
                Some(dim) => println!("dimension:  {}", dim),
                None => println!("dimension:  -"),
            }
            println!("size:       {} bytes", stats.file_bytes);
        }
    }
    Ok(())
}

fn initialize(settings: Settings) -> Result<MuseCore, PipelineError> {
    tokio::task::block_in_place(|| MuseCore::initialize(settings))
}
