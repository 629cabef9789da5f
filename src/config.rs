use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::models::{ChatSettings, Provider, RetrievalMode};

pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Command-line arguments. Every flag falls back to an environment variable,
/// which `.env` may provide.
#[derive(Debug, Clone, Parser)]
#[command(name = "rag_chat_client", version, about = "Terminal chat client for a RAG assistant backend")]
pub struct CliArgs {
    /// Base URL of the RAG backend
    #[arg(long, env = "RAG_API_BASE_URL", default_value = DEFAULT_API_BASE_URL)]
    pub api_base_url: String,

    /// File that remembers the current chat session id
    #[arg(long, env = "RAG_SESSION_FILE", default_value = ".rag_session_id")]
    pub session_file: PathBuf,

    /// LLM provider: local, groq, gemini or openai
    #[arg(long, env = "RAG_PROVIDER", default_value = "local")]
    pub provider: Provider,

    /// Retrieval mode: fast, simple or advanced
    #[arg(long, env = "RAG_MODE", default_value = "advanced")]
    pub mode: RetrievalMode,

    /// Model name; empty lets the backend choose
    #[arg(long, env = "RAG_MODEL", default_value = "")]
    pub model: String,

    /// Whether answers should be grounded in the knowledge base
    #[arg(long, env = "RAG_USE_RAG", default_value_t = true, action = ArgAction::Set)]
    pub use_rag: bool,

    /// Seconds between backend health checks
    #[arg(long, env = "RAG_HEALTH_INTERVAL_SECS", default_value_t = 30)]
    pub health_interval_secs: u64,

    /// Overall timeout for a single backend request, in seconds
    #[arg(long, env = "RAG_REQUEST_TIMEOUT_SECS", default_value_t = 300)]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_base_url: String,
    pub session_file: PathBuf,
    pub settings: ChatSettings,
    pub health_interval: Duration,
    pub request_timeout: Duration,
    pub connect_timeout: Duration,
}

impl ClientConfig {
    /// Configuration pointing at `api_base_url` with every other value defaulted.
    pub fn for_base_url(api_base_url: impl Into<String>) -> Self {
        Self {
            api_base_url: api_base_url.into(),
            session_file: PathBuf::from(".rag_session_id"),
            settings: ChatSettings::default(),
            health_interval: Duration::from_secs(30),
            request_timeout: Duration::from_secs(300),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}

impl From<CliArgs> for ClientConfig {
    fn from(args: CliArgs) -> Self {
        Self {
            api_base_url: args.api_base_url.trim_end_matches('/').to_string(),
            session_file: args.session_file,
            settings: ChatSettings {
                mode: args.mode,
                provider: args.provider,
                model: args.model.trim().to_string(),
                use_rag: args.use_rag,
            },
            health_interval: Duration::from_secs(args.health_interval_secs.max(1)),
            request_timeout: Duration::from_secs(args.request_timeout_secs.max(1)),
            connect_timeout: CONNECT_TIMEOUT,
        }
    }
}
