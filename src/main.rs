//! videorag CLI entry point

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::{generate, Shell};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use videorag::{
    commands::{
        cmd_index, cmd_init, cmd_job_status, cmd_library, cmd_list_jobs, cmd_query,
        print_index_result, print_init_summary, print_job_list, print_job_status, print_library,
        print_query_response,
    },
    config::Config,
    error::{Error, Result},
    graph::GraphStore,
    index::IndexingPipeline,
    media::FfmpegProcessor,
    meta::MetaDb,
    models::ModelSet,
    progress::LogWriterFactory,
    retrieval::RetrievalPipeline,
    store::VectorStores,
};

#[derive(Parser)]
#[command(name = "videorag")]
#[command(version, about = "Multi-modal video RAG indexing and retrieval", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize videorag configuration, database, and collections
    Init {
        /// Force overwrite existing config
        #[arg(long)]
        force: bool,
    },

    /// Index a video into the library
    Index {
        /// Path to the source video file
        video: PathBuf,
    },

    /// Show indexing job status (all jobs when no id is given)
    Status {
        /// Job ID to inspect
        job_id: Option<String>,
    },

    /// Ask a question over the indexed library
    Query {
        /// The question to answer
        query: String,
    },

    /// List indexed videos
    Library {
        /// Filter by a search term over title, description, and tags
        #[arg(short, long)]
        search: Option<String>,
    },

    /// Manage the Qdrant vector collections
    Db {
        #[command(subcommand)]
        action: DbAction,
    },

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Database management actions
#[derive(Subcommand)]
enum DbAction {
    /// Create the vector collections
    Init,

    /// Show collection point counts
    Status,

    /// Reset both collections (delete all vectors and recreate)
    Reset {
        /// Skip confirmation prompt
        #[arg(long)]
        yes: bool,
    },
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(LogWriterFactory::default()))
        .with(filter)
        .init();

    // Init does not need an existing config
    if let Commands::Init { force } = cli.command {
        let base_dir = cli.config.as_deref().and_then(|p| p.parent().map(PathBuf::from));
        let config = cmd_init(base_dir, force).await?;
        print_init_summary(&config);
        return Ok(());
    }

    // Completions need no config either
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        generate(shell, &mut cmd, "videorag", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(cli.config.as_deref())?;
    let meta = MetaDb::new(&config.paths.db_file).await?;
    let stores = VectorStores::connect(&config)?;

    match cli.command {
        Commands::Init { .. } | Commands::Completions { .. } => unreachable!(),

        Commands::Index { video } => {
            let pipeline = build_indexing(&config, &meta, &stores)?;
            let job = cmd_index(&pipeline, &meta, &video, !cli.json).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&job)?);
            } else {
                print_index_result(&job);
            }
        }

        Commands::Status { job_id } => match job_id {
            Some(id) => {
                let job = cmd_job_status(&meta, &id).await?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&job)?);
                } else {
                    print_job_status(&job);
                }
            }
            None => {
                let jobs = cmd_list_jobs(&meta).await?;
                if cli.json {
                    println!("{}", serde_json::to_string_pretty(&jobs)?);
                } else {
                    print_job_list(&jobs);
                }
            }
        },

        Commands::Query { query } => {
            let pipeline = build_retrieval(&config, &meta, &stores)?;
            let response = cmd_query(&pipeline, &query).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&response)?);
            } else {
                print_query_response(&response);
            }
        }

        Commands::Library { search } => {
            let items = cmd_library(&meta, search.as_deref()).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&items)?);
            } else {
                print_library(&items);
            }
        }

        Commands::Db { action } => {
            handle_db_action(&stores, &meta, action, cli.json).await?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&std::path::Path>) -> Result<Config> {
    let config_path = path
        .map(PathBuf::from)
        .unwrap_or_else(Config::default_config_path);

    if !config_path.exists() {
        return Err(Error::NotInitialized);
    }

    Config::load(&config_path)
}

fn build_indexing(
    config: &Config,
    meta: &MetaDb,
    stores: &VectorStores,
) -> Result<IndexingPipeline> {
    let models = ModelSet::connect(
        &config.models,
        config.storage.clip_dimension,
        config.storage.chunk_dimension,
    )?;
    Ok(IndexingPipeline::new(
        config.clone(),
        meta.clone(),
        stores.clone(),
        GraphStore::new(meta.pool().clone()),
        models,
        Arc::new(FfmpegProcessor),
    ))
}

fn build_retrieval(
    config: &Config,
    meta: &MetaDb,
    stores: &VectorStores,
) -> Result<RetrievalPipeline> {
    let models = ModelSet::connect(
        &config.models,
        config.storage.clip_dimension,
        config.storage.chunk_dimension,
    )?;
    Ok(RetrievalPipeline::new(
        config.clone(),
        meta.clone(),
        stores.clone(),
        GraphStore::new(meta.pool().clone()),
        models,
        Arc::new(FfmpegProcessor),
    ))
}

async fn handle_db_action(
    stores: &VectorStores,
    meta: &MetaDb,
    action: DbAction,
    json: bool,
) -> Result<()> {
    match action {
        DbAction::Init => {
            stores.ensure_ready().await?;
            if json {
                println!(r#"{{"status": "ok", "message": "Collections initialized"}}"#);
            } else {
                println!("✓ Vector collections initialized");
            }
        }
        DbAction::Status => {
            let clip_points = stores.clips.count().await?;
            let chunk_points = stores.chunks.count().await?;
            let stats = meta.get_global_stats().await?;
            if json {
                println!(
                    r#"{{"clip_points": {clip_points}, "chunk_points": {chunk_points}, "videos": {}, "entities": {}, "relationships": {}}}"#,
                    stats.video_count, stats.entity_count, stats.relationship_count
                );
            } else {
                println!("Storage status:");
                println!("  Clip points:   {clip_points}");
                println!("  Chunk points:  {chunk_points}");
                println!("  Videos:        {}", stats.video_count);
                println!("  Entities:      {}", stats.entity_count);
                println!("  Relationships: {}", stats.relationship_count);
            }
        }
        DbAction::Reset { yes } => {
            if !yes {
                eprintln!("⚠️  This will delete ALL indexed vectors!");
                eprintln!("Run with --yes to confirm.");
                std::process::exit(1);
            }
            stores.clips.reset().await?;
            stores.chunks.reset().await?;
            if json {
                println!(r#"{{"status": "ok", "message": "Collections reset"}}"#);
            } else {
                println!("✓ Vector collections reset");
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load_config_without_init_errors() {
        let missing = std::path::Path::new("/nonexistent/videorag/config.toml");
        let err = load_config(Some(missing)).unwrap_err();
        assert!(matches!(err, Error::NotInitialized));
        assert!(err.to_string().contains("videorag init"));
    }
}
