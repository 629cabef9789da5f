use std::io::ErrorKind;
use std::path::PathBuf;

use tracing::{debug, error};

use crate::errors::AppError;

/// Remembers the active chat session id between runs.
#[derive(Debug, Clone)]
pub struct SessionRepository {
    path: PathBuf,
}

impl SessionRepository {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn store_error(&self, source: std::io::Error) -> AppError {
        AppError::SessionStore { path: self.path.display().to_string(), source }
    }

    /// The stored session id, or `None` when nothing (or only whitespace) is stored.
    pub async fn load(&self) -> Result<Option<String>, AppError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                let id = contents.trim();
                Ok((!id.is_empty()).then(|| id.to_string()))
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => {
                error!("Failed to read session id from {}: {e}", self.path.display());
                Err(self.store_error(e))
            }
        }
    }

    pub async fn save(&self, session_id: &str) -> Result<(), AppError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| self.store_error(e))?;
        }
        tokio::fs::write(&self.path, session_id)
            .await
            .map_err(|e| {
                error!("Failed to save session id {session_id}: {e}");
                self.store_error(e)
            })?;
        debug!(session_id, "session id persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_means_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SessionRepository::new(dir.path().join("session"));
        assert_eq!(repo.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn saved_id_round_trips_through_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let repo = SessionRepository::new(dir.path().join("nested/state/session"));
        repo.save("3f1c").await.unwrap();
        assert_eq!(repo.load().await.unwrap().as_deref(), Some("3f1c"));

        repo.save("9a9a").await.unwrap();
        assert_eq!(repo.load().await.unwrap().as_deref(), Some("9a9a"));
    }

    #[tokio::test]
    async fn blank_file_means_no_session() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("session");
        std::fs::write(&file, "  \n").unwrap();
        assert_eq!(SessionRepository::new(file).load().await.unwrap(), None);
    }
}
