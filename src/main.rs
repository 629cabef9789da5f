use clap::Parser;
use tracing::info;

use rag_chat_client::api::BackendClient;
use rag_chat_client::cli::Repl;
use rag_chat_client::config::{CliArgs, ClientConfig};
use rag_chat_client::db::SessionRepository;
use rag_chat_client::service::{ChatService, HealthMonitor, ModelService, SessionService};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present; clap reads the RAG_* variables it provides.
    dotenvy::dotenv().ok();

    // Logs go to stderr so they never interleave with streamed answers on stdout.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rag_chat_client=warn".into()),
        )
        .init();

    let config = ClientConfig::from(CliArgs::parse());
    info!(api_base_url = %config.api_base_url, "starting client");

    // ── Dependency wiring ─────────────────────────────────────────────────────
    let client = BackendClient::new(&config)?;
    let mut chat = ChatService::new(client.clone(), config.settings.clone(), "");
    let mut sessions =
        SessionService::new(client.clone(), SessionRepository::new(&config.session_file));
    let models = ModelService::new(client.clone());

    // ── Session restore ───────────────────────────────────────────────────────
    sessions.restore(&mut chat).await?;

    // ── Background health polling ─────────────────────────────────────────────
    let health = HealthMonitor::spawn(client.clone(), config.health_interval);

    Repl::new(client, chat, sessions, models, health).run().await
}
