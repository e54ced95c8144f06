use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Semaphore;
use tracing_subscriber::EnvFilter;

use mocktrial::chat::ChatService;
use mocktrial::db::Database;
use mocktrial::filter::Classifier;
use mocktrial::ollama::{OllamaClient, PersonaGenerator};
use mocktrial::store::RecordStore;
use mocktrial::{run_server, AppConfig};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let config = AppConfig::from_env();

    let db = Database::new(&config).await?;
    let store: Arc<dyn RecordStore> = Arc::new(db);

    let ollama = OllamaClient::new(config.ollama_base_url.clone());
    let generator = PersonaGenerator::new(ollama, config.models.clone(), config.pricing);

    let generation_limit = Arc::new(Semaphore::new(config.models.generation_concurrency));

    let chat = ChatService::new(
        store.clone(),
        Arc::new(generator),
        Classifier::new(config.match_mode),
        config.models.history_turns,
        generation_limit,
    );

    tracing::info!(
        model = %config.models.chat_model,
        match_mode = ?config.match_mode,
        "starting mock trial chat service"
    );

    run_server(config, store, chat).await
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
