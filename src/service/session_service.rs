use tracing::{info, warn};
use uuid::Uuid;

use crate::api::{BackendClient, ChatTransport};
use crate::db::SessionRepository;
use crate::errors::AppError;
use crate::models::ChatMessage;
use crate::service::chat_service::ChatService;

/// Keeps the list of chat sessions and moves a [`ChatService`] between them.
pub struct SessionService {
    client: BackendClient,
    repository: SessionRepository,
    sessions: Vec<String>,
}

impl SessionService {
    pub fn new(client: BackendClient, repository: SessionRepository) -> Self {
        Self { client, repository, sessions: Vec::new() }
    }

    /// Known sessions, newest first.
    pub fn sessions(&self) -> &[String] {
        &self.sessions
    }

    pub async fn refresh(&mut self) -> Result<&[String], AppError> {
        self.sessions = self.client.list_sessions().await?;
        Ok(&self.sessions)
    }

    /// Resumes the stored session (with its history) or starts a new one.
    pub async fn restore<T: ChatTransport>(&mut self, chat: &mut ChatService<T>) -> Result<(), AppError> {
        if let Err(e) = self.refresh().await {
            warn!("Failed to fetch sessions: {e}");
        }
        match self.repository.load().await? {
            Some(session_id) => {
                info!(session_id = %session_id, "resuming stored session");
                let messages = self.load_history(&session_id).await;
                chat.start_session(session_id, messages);
                Ok(())
            }
            None => self.new_session(chat).await.map(|_| ()),
        }
    }

    /// Starts an empty session. The backend only learns about it with the
    /// first chat turn, so it is added to the local list without refetching.
    pub async fn new_session<T: ChatTransport>(
        &mut self,
        chat: &mut ChatService<T>,
    ) -> Result<String, AppError> {
        let session_id = Uuid::new_v4().to_string();
        self.repository.save(&session_id).await?;
        chat.start_session(session_id.clone(), Vec::new());
        self.sessions.insert(0, session_id.clone());
        info!(session_id = %session_id, "new session started");
        Ok(session_id)
    }

    /// Switches to `session_id` and loads its history. Returns `false` when it
    /// already is the current session.
    pub async fn switch_session<T: ChatTransport>(
        &mut self,
        chat: &mut ChatService<T>,
        session_id: &str,
    ) -> Result<bool, AppError> {
        if chat.session_id() == session_id {
            return Ok(false);
        }
        // Stop the running turn before the history request goes out.
        chat.stop_handle().stop();
        self.repository.save(session_id).await?;
        let messages = self.load_history(session_id).await;
        chat.start_session(session_id, messages);
        info!(session_id, "switched session");
        Ok(true)
    }

    /// Deletes every session on the backend and starts over with a new one.
    pub async fn clear_history<T: ChatTransport>(
        &mut self,
        chat: &mut ChatService<T>,
    ) -> Result<String, AppError> {
        self.client.clear_sessions().await?;
        self.sessions.clear();
        if let Err(e) = self.refresh().await {
            warn!("Failed to fetch sessions: {e}");
        }
        self.new_session(chat).await
    }

    /// History of a session as display messages; a failed load yields an
    /// empty conversation.
    async fn load_history(&self, session_id: &str) -> Vec<ChatMessage> {
        match self.client.session_history(session_id).await {
            Ok(history) => history
                .into_iter()
                .enumerate()
                .map(|(idx, turn)| ChatMessage::from_history(session_id, idx, turn))
                .collect(),
            Err(e) => {
                warn!(session_id, "Failed to load history: {e}");
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ClientConfig;
    use crate::models::{ChatSettings, MessageRole};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        _dir: tempfile::TempDir,
        repository: SessionRepository,
        client: BackendClient,
    }

    fn fixture(server: &MockServer) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let repository = SessionRepository::new(dir.path().join("session"));
        let client = BackendClient::new(&ClientConfig::for_base_url(server.uri())).unwrap();
        Fixture { _dir: dir, repository, client }
    }

    async fn mount_sessions(server: &MockServer, sessions: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "sessions": sessions })))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn restore_without_stored_id_creates_a_session() {
        let server = MockServer::start().await;
        mount_sessions(&server, serde_json::json!(["a", "b"])).await;
        let fx = fixture(&server);
        let mut sessions = SessionService::new(fx.client.clone(), fx.repository.clone());
        let mut chat = ChatService::new(fx.client.clone(), ChatSettings::default(), "");

        sessions.restore(&mut chat).await.unwrap();

        let stored = fx.repository.load().await.unwrap().unwrap();
        assert_eq!(chat.session_id(), stored);
        assert_eq!(sessions.sessions(), [stored.as_str(), "b", "a"]);
        assert!(chat.messages().is_empty());
    }

    #[tokio::test]
    async fn restore_resumes_stored_session_with_history() {
        let server = MockServer::start().await;
        mount_sessions(&server, serde_json::json!(["s1"])).await;
        Mock::given(method("GET"))
            .and(path("/sessions/s1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "history": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"}
                ]
            })))
            .mount(&server)
            .await;
        let fx = fixture(&server);
        fx.repository.save("s1").await.unwrap();
        let mut sessions = SessionService::new(fx.client.clone(), fx.repository.clone());
        let mut chat = ChatService::new(fx.client.clone(), ChatSettings::default(), "");

        sessions.restore(&mut chat).await.unwrap();

        assert_eq!(chat.session_id(), "s1");
        let messages = chat.messages();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].id, "hist_s1_0");
        assert_eq!(messages[1].role, MessageRole::Assistant);
        assert_eq!(messages[1].source_label, "History");
    }

    #[tokio::test]
    async fn switching_to_unknown_session_yields_empty_conversation() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/sessions/missing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        let fx = fixture(&server);
        let mut sessions = SessionService::new(fx.client.clone(), fx.repository.clone());
        let mut chat = ChatService::new(fx.client.clone(), ChatSettings::default(), "current");

        assert!(!sessions.switch_session(&mut chat, "current").await.unwrap());
        assert!(sessions.switch_session(&mut chat, "missing").await.unwrap());
        assert_eq!(chat.session_id(), "missing");
        assert!(chat.messages().is_empty());
        assert_eq!(fx.repository.load().await.unwrap().as_deref(), Some("missing"));
    }

    #[tokio::test]
    async fn clearing_history_starts_a_new_session() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/sessions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"message": "cleared"})))
            .expect(1)
            .mount(&server)
            .await;
        mount_sessions(&server, serde_json::json!([])).await;
        let fx = fixture(&server);
        let mut sessions = SessionService::new(fx.client.clone(), fx.repository.clone());
        let mut chat = ChatService::new(fx.client.clone(), ChatSettings::default(), "old");

        let fresh = sessions.clear_history(&mut chat).await.unwrap();
        assert_ne!(fresh, "old");
        assert_eq!(chat.session_id(), fresh);
        assert_eq!(sessions.sessions(), [fresh.as_str()]);
    }
}
