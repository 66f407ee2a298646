mod cli;
mod commands;

use std::sync::Arc;

use clap::Parser;
use common::{
    storage::{db::SurrealDbClient, store::StorageManager},
    utils::config::get_config,
};
use ingestion_pipeline::IngestionPipeline;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::{cli::Cli, commands::App};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .try_init()
        .ok();

    let cli = Cli::parse();
    let config = get_config()?;

    let db = Arc::new(
        SurrealDbClient::new(
            &config.surrealdb_address,
            &config.surrealdb_username,
            &config.surrealdb_password,
            &config.surrealdb_namespace,
            &config.surrealdb_database,
        )
        .await?,
    );
    db.ensure_initialized().await?;

    let openai_client = Arc::new(async_openai::Client::with_config(
        async_openai::config::OpenAIConfig::new()
            .with_api_key(&config.openai_api_key)
            .with_api_base(&config.openai_base_url),
    ));

    let storage = StorageManager::new(&config).await?;
    info!(backend = ?storage.backend_kind(), "storage ready");

    let pipeline =
        IngestionPipeline::new(Arc::clone(&db), openai_client, &config, storage.clone());
    let app = App::new(db, storage, pipeline, config);

    let output = app.execute(cli.command).await?;
    println!("{}", serde_json::to_string_pretty(&output)?);

    Ok(())
}
