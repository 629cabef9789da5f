use std::path::Path;
use std::time::Duration;

use futures_util::StreamExt;
use reqwest::multipart::{Form, Part};
use reqwest::{Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use crate::api::transport::{text_stream, ChatTransport, ChunkStream};
use crate::config::ClientConfig;
use crate::errors::AppError;
use crate::stream::{pull_event_stream, PullEventStream};
use crate::models::{
    ActionResponse, ChatRequest, ContextMessage, HealthResponse, HealthStatus, ModelInfo,
    ModelNameRequest, ModelsResponse, SessionHistoryResponse, SessionsResponse, UploadKind,
};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Typed client for the RAG backend's HTTP API.
#[derive(Clone)]
pub struct BackendClient {
    client: reqwest::Client,
    base_url: String,
    request_timeout: Duration,
}

impl BackendClient {
    pub fn new(config: &ClientConfig) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|source| AppError::Http {
                message: "building the HTTP client".to_string(),
                source,
            })?;
        Ok(Self {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Request bounded by the configured timeout. The chat and pull streams
    /// build theirs without one, since they legitimately run for minutes.
    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client.request(method, self.url(path)).timeout(self.request_timeout)
    }

    /// Sends a request and turns transport failures and non-2xx statuses into errors.
    async fn send(&self, operation: &str, request: RequestBuilder) -> Result<Response, AppError> {
        let response = request
            .send()
            .await
            .map_err(|e| AppError::from_request(&self.base_url, format!("{operation} request"), e))?;
        let status = response.status();
        if !status.is_success() {
            warn!("{operation} failed with status {status}");
            return Err(AppError::server(operation, status));
        }
        Ok(response)
    }

    async fn read_json<T: DeserializeOwned>(endpoint: &str, response: Response) -> Result<T, AppError> {
        let body = response.text().await.map_err(|e| AppError::StreamFailed {
            message: format!("reading {endpoint} response: {e}"),
        })?;
        serde_json::from_str(&body).map_err(|e| AppError::InvalidResponse {
            endpoint: endpoint.to_string(),
            message: e.to_string(),
        })
    }

    /// Action endpoints answer with `{ "message": ... }`; anything else is
    /// treated as an acknowledgement without a message.
    async fn read_action(endpoint: &str, response: Response) -> ActionResponse {
        match response.text().await {
            Ok(body) => serde_json::from_str(&body).unwrap_or_else(|e| {
                debug!("{endpoint} returned a non-JSON acknowledgement: {e}");
                ActionResponse::default()
            }),
            Err(e) => {
                debug!("{endpoint} acknowledgement unreadable: {e}");
                ActionResponse::default()
            }
        }
    }

    // ── Health ────────────────────────────────────────────────────────────────

    pub async fn check_health(&self) -> Result<HealthResponse, AppError> {
        let response = self.send("Health check", self.request(Method::GET, "/health")).await?;
        Self::read_json("/health", response).await
    }

    /// Never fails: an unreachable or unhealthy backend reads as offline.
    pub async fn health_status(&self) -> HealthStatus {
        match self.check_health().await {
            Ok(response) => HealthStatus::online(response),
            Err(e) => {
                debug!("health check failed: {e}");
                HealthStatus::offline()
            }
        }
    }

    // ── Sessions ──────────────────────────────────────────────────────────────

    /// Session ids known to the backend, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<String>, AppError> {
        let response = self.send("List sessions", self.request(Method::GET, "/sessions")).await?;
        let mut sessions = Self::read_json::<SessionsResponse>("/sessions", response)
            .await?
            .sessions;
        sessions.reverse();
        Ok(sessions)
    }

    pub async fn session_history(&self, session_id: &str) -> Result<Vec<ContextMessage>, AppError> {
        let endpoint = format!("/sessions/{session_id}");
        let response = self
            .send("Load session history", self.request(Method::GET, &endpoint))
            .await?;
        Ok(Self::read_json::<SessionHistoryResponse>(&endpoint, response)
            .await?
            .history)
    }

    pub async fn clear_sessions(&self) -> Result<ActionResponse, AppError> {
        let response = self
            .send("Clear sessions", self.request(Method::DELETE, "/sessions"))
            .await?;
        info!("all chat sessions cleared on the backend");
        Ok(Self::read_action("/sessions", response).await)
    }

    // ── Chat ──────────────────────────────────────────────────────────────────

    pub async fn open_chat(&self, request: &ChatRequest) -> Result<ChunkStream, AppError> {
        debug!(
            session_id = %request.session_id,
            provider = %request.provider,
            mode = %request.mode,
            context_len = request.messages.len(),
            "opening chat stream"
        );
        let response = self
            .send("Chat", self.client.post(self.url("/chat")).json(request))
            .await?;
        Ok(text_stream(response.bytes_stream()))
    }

    // ── Models ────────────────────────────────────────────────────────────────

    pub async fn list_models(&self) -> Result<Vec<ModelInfo>, AppError> {
        let response = self.send("List models", self.request(Method::GET, "/models")).await?;
        Ok(Self::read_json::<ModelsResponse>("/models", response).await?.models)
    }

    pub async fn delete_model(&self, name: &str) -> Result<ActionResponse, AppError> {
        let request = self
            .request(Method::DELETE, "/models")
            .json(&ModelNameRequest { name });
        let response = self.send("Delete model", request).await?;
        info!(model = name, "model deleted");
        Ok(Self::read_action("/models", response).await)
    }

    /// Starts a model download; the body is a server-sent-event stream of progress.
    pub async fn open_model_pull(&self, name: &str) -> Result<PullEventStream, AppError> {
        let request = self
            .client
            .post(self.url("/models/pull"))
            .json(&ModelNameRequest { name });
        let response = self.send("Model pull", request).await?;
        Ok(pull_event_stream(response.bytes_stream()))
    }

    // ── Knowledge base ────────────────────────────────────────────────────────

    /// Uploads a document; `on_progress` receives the share of the file handed
    /// to the connection so far, in percent.
    pub async fn upload_document<F>(
        &self,
        path: &Path,
        kind: UploadKind,
        on_progress: F,
    ) -> Result<ActionResponse, AppError>
    where
        F: Fn(f64) + Send + Sync + 'static,
    {
        let bytes = tokio::fs::read(path).await.map_err(|source| AppError::FileRead {
            path: path.display().to_string(),
            source,
        })?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());
        let total = bytes.len();
        let pieces: Vec<Vec<u8>> = bytes.chunks(UPLOAD_CHUNK_SIZE).map(<[u8]>::to_vec).collect();

        let mut sent = 0usize;
        let body = futures_util::stream::iter(pieces).map(move |piece| {
            sent += piece.len();
            if total > 0 {
                on_progress(sent as f64 / total as f64 * 100.0);
            }
            Ok::<_, std::io::Error>(piece)
        });
        let part = Part::stream_with_length(reqwest::Body::wrap_stream(body), total as u64)
            .file_name(file_name.clone());
        let form = Form::new()
            .part("file", part)
            .text("file_type", kind.as_str());

        let response = self
            .send("Upload", self.request(Method::POST, "/upload").multipart(form))
            .await?;
        info!(file = %file_name, kind = kind.as_str(), bytes = total, "document uploaded");
        Ok(Self::read_action("/upload", response).await)
    }

    pub async fn start_ingestion(&self) -> Result<ActionResponse, AppError> {
        let response = self.send("Ingest", self.request(Method::POST, "/ingest")).await?;
        info!("ingestion started");
        Ok(Self::read_action("/ingest", response).await)
    }

    pub async fn reset_knowledge_base(&self) -> Result<ActionResponse, AppError> {
        let response = self.send("Reset", self.request(Method::POST, "/reset")).await?;
        info!("knowledge base reset");
        Ok(Self::read_action("/reset", response).await)
    }
}

impl ChatTransport for BackendClient {
    async fn open_chat_stream(&self, request: &ChatRequest) -> Result<ChunkStream, AppError> {
        self.open_chat(request).await
    }
}
