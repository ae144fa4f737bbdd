//! Init command implementation

use crate::config::Config;
use crate::error::{Error, Result};
use crate::meta::MetaDb;
use crate::store::VectorStores;
use std::path::PathBuf;
use tracing::{info, warn};

/// Initialize configuration, database, and vector collections.
pub async fn cmd_init(base_dir: Option<PathBuf>, force: bool) -> Result<Config> {
    let config = Config::load_from(base_dir)?;

    if config.paths.config_file.exists() && !force {
        return Err(Error::Config(format!(
            "Config already exists at {}. Use --force to overwrite.",
            config.paths.config_file.display()
        )));
    }

    config.validate()?;
    config.save()?;

    let db = MetaDb::connect(&config).await?;
    db.init_schema().await?;
    info!("Created database at {:?}", config.paths.db_file);

    match VectorStores::connect(&config) {
        Ok(stores) => match stores.ensure_ready().await {
            Ok(()) => info!(
                "Qdrant collections '{}' and '{}' ready",
                config.storage.clip_collection, config.storage.chunk_collection
            ),
            Err(e) => warn!("Could not create Qdrant collections: {e}. You can create them later with 'videorag db init'."),
        },
        Err(e) => warn!(
            "Could not connect to Qdrant at {}: {e}. Make sure Qdrant is running.",
            config.qdrant_url
        ),
    }

    Ok(config)
}

/// Print the post-init summary and next steps.
pub fn print_init_summary(config: &Config) {
    println!("✓ Initialized videorag at {:?}", config.paths.base_dir);
    println!("\nConfiguration: {:?}", config.paths.config_file);
    println!("Database: {:?}", config.paths.db_file);
    println!("\nNext steps:");
    println!("  videorag index /path/to/video.mp4     # Index a video");
    println!("  videorag query \"what happens at the end?\"");
    println!("  videorag library                      # List indexed videos");
}
