use std::str::FromStr;

use chrono::DateTime;
use serde::{Deserialize, Serialize};

use crate::errors::AppError;

/// Label stamped on messages rebuilt from a session's stored history.
pub const HISTORY_SOURCE_LABEL: &str = "History";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

impl MessageRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Citations ─────────────────────────────────────────────────────────────────

/// A source excerpt backing part of an assistant answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Citation {
    pub content: String,
    pub page_label: Option<String>,
    pub file_path: Option<String>,
}

impl Citation {
    /// Page locator for display; `Unknown` when the backend sent none.
    pub fn page_display(&self) -> &str {
        self.page_label.as_deref().unwrap_or("Unknown")
    }

    /// Final path component of `file_path`, if any.
    pub fn file_name(&self) -> Option<&str> {
        self.file_path
            .as_deref()
            .and_then(|p| p.rsplit(['/', '\\']).next())
            .filter(|name| !name.is_empty())
    }
}

/// Wire shape of one entry in the `__METADATA__` array.
#[derive(Debug, Clone, Deserialize)]
pub struct CitationPayload {
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub metadata: Option<CitationPayloadMetadata>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct CitationPayloadMetadata {
    /// The backend sends either a string or a bare number here.
    #[serde(default)]
    pub page_label: Option<serde_json::Value>,
    #[serde(default)]
    pub file_path: Option<String>,
}

impl From<CitationPayload> for Citation {
    fn from(payload: CitationPayload) -> Self {
        let metadata = payload.metadata.unwrap_or_default();
        let page_label = metadata.page_label.and_then(|v| match v {
            serde_json::Value::Null => None,
            serde_json::Value::String(s) => Some(s),
            other => Some(other.to_string()),
        });
        Self {
            content: payload.content,
            page_label,
            file_path: metadata.file_path,
        }
    }
}

// ── Messages ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct ChatMessage {
    pub id: String,
    pub role: MessageRole,
    pub content: String,
    pub citations: Vec<Citation>,
    /// Zero until the stream that produced this message completes.
    pub latency_seconds: f64,
    pub source_label: String,
}

impl ChatMessage {
    pub fn new(role: MessageRole, content: String) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content,
            citations: Vec::new(),
            latency_seconds: 0.0,
            source_label: String::new(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content.into())
    }

    /// Empty assistant message that a streaming turn fills in.
    pub fn assistant_placeholder() -> Self {
        Self::new(MessageRole::Assistant, String::new())
    }

    /// Rebuilds a message from a stored history entry.
    pub fn from_history(session_id: &str, index: usize, turn: ContextMessage) -> Self {
        Self {
            id: format!("hist_{session_id}_{index}"),
            role: turn.role,
            content: turn.content,
            citations: Vec::new(),
            latency_seconds: 0.0,
            source_label: HISTORY_SOURCE_LABEL.to_string(),
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.latency_seconds > 0.0 || !self.source_label.is_empty()
    }

    pub fn as_context(&self) -> ContextMessage {
        ContextMessage { role: self.role, content: self.content.clone() }
    }
}

/// Role/content pair sent as chat context and returned as session history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: MessageRole,
    pub content: String,
}

// ── Chat settings ─────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetrievalMode {
    Fast,
    Simple,
    #[default]
    Advanced,
}

impl RetrievalMode {
    pub const ALL: [RetrievalMode; 3] =
        [RetrievalMode::Fast, RetrievalMode::Simple, RetrievalMode::Advanced];

    pub fn as_str(&self) -> &'static str {
        match self {
            RetrievalMode::Fast => "fast",
            RetrievalMode::Simple => "simple",
            RetrievalMode::Advanced => "advanced",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            RetrievalMode::Fast => "Single query, top result. Fastest response.",
            RetrievalMode::Simple => "Standard search (Top 3). Good for general queries.",
            RetrievalMode::Advanced => "Deep research with query expansion & reranking.",
        }
    }
}

impl std::fmt::Display for RetrievalMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RetrievalMode {
    type Err = AppError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RetrievalMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::UnknownSetting {
                setting: "mode".to_string(),
                value: s.to_string(),
                expected: "fast, simple, advanced".to_string(),
            })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Local,
    Groq,
    Gemini,
    #[serde(rename = "openai")]
    OpenAi,
}

impl Provider {
    pub const ALL: [Provider; 4] =
        [Provider::Local, Provider::Groq, Provider::Gemini, Provider::OpenAi];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Local => "local",
            Provider::Groq => "groq",
            Provider::Gemini => "gemini",
            Provider::OpenAi => "openai",
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Provider::Local)
    }
}

impl std::fmt::Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Provider {
    type Err = AppError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Provider::ALL
            .into_iter()
            .find(|p| p.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| AppError::UnknownSetting {
                setting: "provider".to_string(),
                value: s.to_string(),
                expected: "local, groq, gemini, openai".to_string(),
            })
    }
}

/// Model used by the backend when no explicit model is configured.
pub const DEFAULT_LOCAL_MODEL: &str = "llama3.2";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatSettings {
    pub mode: RetrievalMode,
    pub provider: Provider,
    /// Empty means "let the backend pick".
    pub model: String,
    pub use_rag: bool,
}

impl Default for ChatSettings {
    fn default() -> Self {
        Self {
            mode: RetrievalMode::default(),
            provider: Provider::default(),
            model: String::new(),
            use_rag: true,
        }
    }
}

impl ChatSettings {
    pub fn model_display(&self) -> String {
        if self.model.is_empty() {
            format!("Default ({DEFAULT_LOCAL_MODEL})")
        } else {
            self.model.clone()
        }
    }
}

// ── Backend request / response bodies ─────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct ChatRequest {
    pub session_id: String,
    pub messages: Vec<ContextMessage>,
    pub mode: RetrievalMode,
    pub provider: Provider,
    pub model: String,
    pub use_rag: bool,
    pub stream: bool,
}

impl ChatRequest {
    pub fn new(session_id: &str, messages: Vec<ContextMessage>, settings: &ChatSettings) -> Self {
        Self {
            session_id: session_id.to_string(),
            messages,
            mode: settings.mode,
            provider: settings.provider,
            model: settings.model.clone(),
            use_rag: settings.use_rag,
            stream: true,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionsResponse {
    #[serde(default)]
    pub sessions: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct SessionHistoryResponse {
    #[serde(default)]
    pub history: Vec<ContextMessage>,
}

#[derive(Debug, Default, Deserialize)]
pub struct HealthResponse {
    #[serde(default)]
    pub ollama: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemState {
    Checking,
    Online,
    Offline,
}

impl SystemState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SystemState::Checking => "checking",
            SystemState::Online => "online",
            SystemState::Offline => "offline",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthStatus {
    pub system: SystemState,
    pub ollama: String,
}

impl HealthStatus {
    pub fn checking() -> Self {
        Self { system: SystemState::Checking, ollama: "checking".to_string() }
    }

    pub fn offline() -> Self {
        Self { system: SystemState::Offline, ollama: "offline".to_string() }
    }

    pub fn online(response: HealthResponse) -> Self {
        Self {
            system: SystemState::Online,
            ollama: response.ollama.unwrap_or_else(|| "offline".to_string()),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ModelInfo {
    pub name: String,
    #[serde(default)]
    pub size: Option<u64>,
    #[serde(default)]
    pub modified_at: Option<String>,
    #[serde(default)]
    pub digest: Option<String>,
}

impl ModelInfo {
    /// `mistral:7b` → `("mistral", Some("7b"))`.
    pub fn name_and_tag(&self) -> (&str, Option<&str>) {
        match self.name.split_once(':') {
            Some((base, tag)) => (base, Some(tag)),
            None => (self.name.as_str(), None),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ModelsResponse {
    #[serde(default)]
    pub models: Vec<ModelInfo>,
}

#[derive(Debug, Serialize)]
pub struct ModelNameRequest<'a> {
    pub name: &'a str,
}

/// Generic `{ "message": ... }` acknowledgement returned by action endpoints.
#[derive(Debug, Default, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UploadKind {
    #[default]
    Pdf,
    Word,
    Text,
}

impl UploadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadKind::Pdf => "pdf",
            UploadKind::Word => "word",
            UploadKind::Text => "text",
        }
    }

    /// Guesses the upload kind from a file extension, defaulting to plain text.
    pub fn from_path(path: &std::path::Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("pdf") => UploadKind::Pdf,
            Some("doc" | "docx") => UploadKind::Word,
            _ => UploadKind::Text,
        }
    }
}

impl FromStr for UploadKind {
    type Err = AppError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pdf" => Ok(UploadKind::Pdf),
            "word" => Ok(UploadKind::Word),
            "text" => Ok(UploadKind::Text),
            _ => Err(AppError::UnknownSetting {
                setting: "file type".to_string(),
                value: s.to_string(),
                expected: "pdf, word, text".to_string(),
            }),
        }
    }
}

// ── Formatting helpers ────────────────────────────────────────────────────────

/// Human-readable byte size, e.g. `4.1 GB`. Zero or absent sizes are `Unknown`.
pub fn format_size(bytes: Option<u64>) -> String {
    const UNITS: [&str; 5] = ["Bytes", "KB", "MB", "GB", "TB"];
    let Some(bytes) = bytes.filter(|b| *b > 0) else {
        return "Unknown".to_string();
    };
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

/// Calendar date of an RFC 3339 timestamp; unparsable input is returned as-is.
pub fn format_date(date: Option<&str>) -> String {
    match date.filter(|d| !d.is_empty()) {
        None => "Unknown".to_string(),
        Some(raw) => DateTime::parse_from_rfc3339(raw)
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|_| raw.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn citation_payload_accepts_numeric_page_label() {
        let payload: CitationPayload = serde_json::from_str(
            r#"{"content":"x","metadata":{"page_label":12,"file_path":"/docs/geo.pdf"}}"#,
        )
        .unwrap();
        let citation = Citation::from(payload);
        assert_eq!(citation.page_display(), "12");
        assert_eq!(citation.file_name(), Some("geo.pdf"));
    }

    #[test]
    fn citation_without_metadata_displays_unknown() {
        let payload: CitationPayload = serde_json::from_str(r#"{"content":"x"}"#).unwrap();
        let citation = Citation::from(payload);
        assert_eq!(citation.page_display(), "Unknown");
        assert_eq!(citation.file_name(), None);
    }

    #[test]
    fn chat_request_serializes_wire_names() {
        let settings = ChatSettings { provider: Provider::OpenAi, ..ChatSettings::default() };
        let request = ChatRequest::new(
            "s1",
            vec![ContextMessage { role: MessageRole::User, content: "hi".to_string() }],
            &settings,
        );
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "session_id": "s1",
                "messages": [{"role": "user", "content": "hi"}],
                "mode": "advanced",
                "provider": "openai",
                "model": "",
                "use_rag": true,
                "stream": true
            })
        );
    }

    #[test]
    fn history_messages_get_stable_ids() {
        let turn = ContextMessage { role: MessageRole::Assistant, content: "a".to_string() };
        let msg = ChatMessage::from_history("abc", 3, turn);
        assert_eq!(msg.id, "hist_abc_3");
        assert_eq!(msg.source_label, HISTORY_SOURCE_LABEL);
        assert!(msg.citations.is_empty());
    }

    #[test]
    fn settings_parse_case_insensitively() {
        assert_eq!("FAST".parse::<RetrievalMode>().unwrap(), RetrievalMode::Fast);
        assert_eq!("Gemini".parse::<Provider>().unwrap(), Provider::Gemini);
        assert!("bogus".parse::<Provider>().unwrap_err().is_validation());
    }

    #[test]
    fn sizes_and_dates_format_for_display() {
        assert_eq!(format_size(None), "Unknown");
        assert_eq!(format_size(Some(0)), "Unknown");
        assert_eq!(format_size(Some(512)), "512.0 Bytes");
        assert_eq!(format_size(Some(1536)), "1.5 KB");
        assert_eq!(format_size(Some(4_404_019_200)), "4.1 GB");
        assert_eq!(format_date(Some("2024-05-01T10:00:00Z")), "2024-05-01");
        assert_eq!(format_date(None), "Unknown");
    }

    #[test]
    fn model_name_splits_tag() {
        let model = ModelInfo {
            name: "mistral:7b".to_string(),
            size: None,
            modified_at: None,
            digest: None,
        };
        assert_eq!(model.name_and_tag(), ("mistral", Some("7b")));
    }
}
