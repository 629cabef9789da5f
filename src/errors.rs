use thiserror::Error;

/// Banner text shown when a chat stream fails for a reason other than the user stopping it.
pub const STREAM_FAILURE_BANNER: &str =
    "Failed to stream response. Please ensure backend is running.";

/// Top-level client error.
/// All variants carry a human-readable message for display/logging.
#[derive(Debug, Error)]
pub enum AppError {
    // ── Backend / transport errors ───────────────────────────────────────────
    #[error("Backend unavailable at {base_url}")]
    BackendUnavailable {
        base_url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("HTTP request failed: {message}")]
    Http {
        message: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{operation} failed with status {status}")]
    ServerError { operation: String, status: u16 },

    #[error("Invalid response from {endpoint}: {message}")]
    InvalidResponse { endpoint: String, message: String },

    // ── Streaming errors ─────────────────────────────────────────────────────
    #[error("Stream interrupted: {message}")]
    StreamFailed { message: String },

    #[error("Model pull failed: {message}")]
    PullFailed { message: String },

    // ── Validation errors ────────────────────────────────────────────────────
    #[error("Field '{field_name}' cannot be empty")]
    EmptyField { field_name: String },

    #[error("Nothing to regenerate: no user message in this session")]
    NothingToRegenerate,

    #[error("{0}")]
    InvalidCommand(String),

    #[error("Unknown {setting} '{value}' (expected one of: {expected})")]
    UnknownSetting {
        setting: String,
        value: String,
        expected: String,
    },

    // ── Local storage errors ─────────────────────────────────────────────────
    #[error("Session store at '{path}' failed: {source}")]
    SessionStore {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read '{path}': {source}")]
    FileRead {
        path: String,
        #[source]
        source: std::io::Error,
    },

    // ── System errors ────────────────────────────────────────────────────────
    #[error("Unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    /// Classifies a reqwest failure: connection problems become `BackendUnavailable`.
    pub fn from_request(base_url: &str, message: impl Into<String>, source: reqwest::Error) -> Self {
        if source.is_connect() || source.is_timeout() {
            AppError::BackendUnavailable { base_url: base_url.to_string(), source }
        } else {
            AppError::Http { message: message.into(), source }
        }
    }

    pub fn server(operation: impl Into<String>, status: reqwest::StatusCode) -> Self {
        AppError::ServerError { operation: operation.into(), status: status.as_u16() }
    }

    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::EmptyField { .. }
                | AppError::NothingToRegenerate
                | AppError::InvalidCommand(_)
                | AppError::UnknownSetting { .. }
        )
    }

    pub fn is_backend_unavailable(&self) -> bool {
        matches!(self, AppError::BackendUnavailable { .. })
    }

    pub fn is_stream_failure(&self) -> bool {
        matches!(self, AppError::StreamFailed { .. })
    }

    /// Text suitable for an error banner. Validation errors are shown verbatim;
    /// failures while streaming get the generic recovery hint.
    pub fn user_message(&self) -> String {
        if self.is_validation() {
            self.to_string()
        } else if self.is_stream_failure() || self.is_backend_unavailable() {
            STREAM_FAILURE_BANNER.to_string()
        } else {
            self.to_string()
        }
    }
}
