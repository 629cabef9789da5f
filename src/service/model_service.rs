use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::BackendClient;
use crate::errors::AppError;
use crate::models::ModelInfo;
use crate::stream::PullProgress;

#[derive(Debug, Clone, PartialEq)]
pub enum PullOutcome {
    /// The event stream ended; carries the last progress seen.
    Finished(PullProgress),
    Cancelled,
}

/// Local model management: listing, pulling and deleting models.
#[derive(Clone)]
pub struct ModelService {
    client: BackendClient,
}

impl ModelService {
    pub fn new(client: BackendClient) -> Self {
        Self { client }
    }

    /// Installed models, sorted by name.
    pub async fn list(&self) -> Result<Vec<ModelInfo>, AppError> {
        let mut models = self.client.list_models().await?;
        models.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(models)
    }

    pub async fn delete(&self, name: &str) -> Result<(), AppError> {
        if name.trim().is_empty() {
            return Err(AppError::EmptyField { field_name: "model name".to_string() });
        }
        self.client.delete_model(name.trim()).await?;
        Ok(())
    }

    /// Downloads `name`, reporting progress after every event, until the
    /// backend closes the stream or `cancel` fires.
    pub async fn pull<F>(
        &self,
        name: &str,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<PullOutcome, AppError>
    where
        F: FnMut(&PullProgress),
    {
        let name = name.trim();
        if name.is_empty() {
            return Err(AppError::EmptyField { field_name: "model name".to_string() });
        }
        let mut progress = PullProgress::default();
        on_progress(&progress);

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(PullOutcome::Cancelled),
            opened = self.client.open_model_pull(name) => opened?,
        };
        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    info!(model = name, "model pull cancelled");
                    return Ok(PullOutcome::Cancelled);
                }
                next = stream.next() => next,
            };
            match next {
                Some(Ok(event)) => {
                    progress.apply(&event);
                    on_progress(&progress);
                }
                Some(Err(e)) => {
                    warn!(model = name, "model pull interrupted: {e}");
                    return Err(e);
                }
                None => break,
            }
        }
        info!(model = name, status = %progress.status, "model pull finished");
        Ok(PullOutcome::Finished(progress))
    }
}
