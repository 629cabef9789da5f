//! Decoder for the server-sent events emitted while the backend pulls a model.
//!
//! The event `data` is JSON carrying any of `status`, `total`, `completed`
//! and `error`.

use std::pin::Pin;

use eventsource_stream::Eventsource;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tracing::trace;

use crate::errors::AppError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PullEvent {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub total: Option<u64>,
    #[serde(default)]
    pub completed: Option<u64>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Download progress as shown to the user.
#[derive(Debug, Clone, PartialEq)]
pub struct PullProgress {
    pub status: String,
    /// 0.0..=100.0
    pub percent: f64,
}

impl Default for PullProgress {
    fn default() -> Self {
        Self { status: "Starting...".to_string(), percent: 0.0 }
    }
}

impl PullProgress {
    pub fn apply(&mut self, event: &PullEvent) {
        if let Some(status) = &event.status {
            self.status = status.clone();
        }
        if let (Some(total), Some(completed)) = (event.total, event.completed) {
            if total > 0 && completed > 0 {
                self.percent = (completed as f64 / total as f64 * 100.0).min(100.0);
            }
        }
        if event.status.as_deref() == Some("success") {
            self.percent = 100.0;
            self.status = "Completed".to_string();
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == "Completed"
    }
}

/// Progress events of a model download, in arrival order.
pub type PullEventStream = Pin<Box<dyn Stream<Item = Result<PullEvent, AppError>> + Send>>;

/// Frames a server-sent-event body into pull events. An event carrying
/// `error` fails the pull; events without a JSON payload are skipped.
pub fn pull_event_stream<S, B, E>(body: S) -> PullEventStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let events = body.eventsource().filter_map(|item| async move {
        match item {
            Ok(event) => parse_pull_event(&event.data).transpose(),
            Err(e) => Some(Err(AppError::StreamFailed { message: e.to_string() })),
        }
    });
    Box::pin(events)
}

/// Decodes the `data` of one event.
fn parse_pull_event(data: &str) -> Result<Option<PullEvent>, AppError> {
    let json = data.trim();
    if json.is_empty() {
        return Ok(None);
    }
    match serde_json::from_str::<PullEvent>(json) {
        Ok(PullEvent { error: Some(message), .. }) => Err(AppError::PullFailed { message }),
        Ok(event) => Ok(Some(event)),
        Err(e) => {
            trace!("skipping unparsable pull event: {e}");
            Ok(None)
        }
    }
}
