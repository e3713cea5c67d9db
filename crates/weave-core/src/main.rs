use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod actions;
mod agent;
mod config;
mod context;
mod embedding;
mod error;
mod host_ctx;
mod message;
mod persistence;
mod provider;
mod schema;
mod storage;
mod thread;
mod tools;

use agent::{Agent, CallArgs};
use config::Config;
use host_ctx::HostCtx;
use provider::rig_adapter::RigTextProvider;
use provider::ModelInfo;
use storage::postgres::PgStorage;
use storage::{CreateThreadArgs, StorageBackend};
use thread::Thread;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let config = Config::from_env()?;

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_filter.clone()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("weave starting up");
    info!(provider = %config.provider_api_url, model = %config.chat_model, "configuration loaded");

    {
        use diesel::prelude::*;
        use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
        const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

        let mut conn = diesel::PgConnection::establish(&config.database_url)?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|e| anyhow::anyhow!("migration failed: {e}"))?;
        info!("database migrations applied");
    }

    let storage: Arc<dyn StorageBackend> = Arc::new(PgStorage::new(&config.database_url)?);

    let api_key = config
        .provider_api_key
        .as_deref()
        .context("PROVIDER_API_KEY not set")?;
    let openai_client =
        rig::providers::openai::Client::from_url(api_key, &config.provider_api_url);
    let completion_model = openai_client.completion_model(&config.chat_model);
    let rig_provider = RigTextProvider::new(
        completion_model,
        ModelInfo::new("openai-compatible", config.chat_model.clone()),
    );

    let agent = Arc::new(Agent {
        name: "weave-demo".into(),
        chat_model: ModelInfo::new("openai-compatible", config.chat_model.clone()),
        instructions: Some("You are a helpful assistant.".into()),
        max_retries: Some(2),
        max_steps: 5,
        provider: Arc::new(rig_provider),
        embedding_model: None,
        storage: storage.clone(),
        tools: None,
        context_options: None,
        storage_options: None,
    });

    let thread_doc = storage
        .create_thread(CreateThreadArgs {
            user_id: Some("demo-user".into()),
            title: Some("weave-demo session".into()),
            summary: None,
        })
        .await?;
    info!(thread_id = %thread_doc.id, "created demo thread");

    let thread = Thread::new(agent, thread_doc.id, Some("demo-user".into()));

    let mut call = CallArgs::default();
    call.prompt = Some("Say hello in one short sentence.".into());

    let result = thread.generate_text(call, HostCtx::Mutation).await?;
    info!(text = %result.result.text, "generated reply");
    println!("{}", result.result.text);

    Ok(())
}
