//! Interactive terminal front end.

mod command;
mod render;

pub use command::{Command, HELP};

use std::io::Write;
use std::path::Path;

use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::api::BackendClient;
use crate::errors::AppError;
use crate::models::{MessageRole, SystemState, UploadKind};
use crate::service::{
    ChatService, HealthMonitor, ModelService, PullOutcome, SessionService, TurnOutcome,
};

enum Flow {
    Continue,
    Quit,
}

/// Read-eval-print loop over stdin. Owns every service for the lifetime of
/// the program.
pub struct Repl {
    client: BackendClient,
    chat: ChatService,
    sessions: SessionService,
    models: ModelService,
    health: HealthMonitor,
    input: Lines<BufReader<Stdin>>,
}

impl Repl {
    pub fn new(
        client: BackendClient,
        chat: ChatService,
        sessions: SessionService,
        models: ModelService,
        health: HealthMonitor,
    ) -> Self {
        Self {
            client,
            chat,
            sessions,
            models,
            health,
            input: BufReader::new(tokio::io::stdin()).lines(),
        }
    }

    pub async fn run(mut self) -> anyhow::Result<()> {
        println!(
            "RAG chat on {} (session {}). Type /help for commands.",
            self.client.base_url(),
            self.chat.session_id()
        );
        self.print_history();

        let mut health = self.health.subscribe();
        let mut last_state = SystemState::Checking;
        loop {
            prompt("> ");
            let line = loop {
                tokio::select! {
                    line = self.input.next_line() => break line?,
                    _ = tokio::signal::ctrl_c() => break None,
                    Ok(()) = health.changed() => {
                        let status = health.borrow_and_update().clone();
                        if status.system != last_state {
                            last_state = status.system;
                            eprintln!("\n[backend {}, ollama {}]", status.system.as_str(), status.ollama);
                            prompt("> ");
                        }
                    }
                }
            };
            let Some(line) = line else { break };

            let result = match Command::parse(&line) {
                Ok(None) => continue,
                Ok(Some(command)) => self.dispatch(command).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(Flow::Quit) => break,
                Ok(Flow::Continue) => {}
                Err(e) => report(&e),
            }
        }

        self.health.shutdown().await;
        println!();
        Ok(())
    }

    async fn dispatch(&mut self, command: Command) -> Result<Flow, AppError> {
        match command {
            Command::Chat(text) => self.run_turn(Some(text)).await?,
            Command::Regenerate => self.run_turn(None).await?,

            // ── Sessions ──────────────────────────────────────────────────────
            Command::NewSession => {
                let session_id = self.sessions.new_session(&mut self.chat).await?;
                println!("Started session {session_id}");
            }
            Command::ListSessions => {
                if let Err(e) = self.sessions.refresh().await {
                    warn!("Failed to fetch sessions: {e}");
                }
                println!("{}", render::sessions(self.sessions.sessions(), self.chat.session_id()));
            }
            Command::Switch(target) => {
                let session_id = self.resolve_session(&target);
                if self.sessions.switch_session(&mut self.chat, &session_id).await? {
                    println!("Switched to session {session_id}");
                    self.print_history();
                } else {
                    println!("Already in session {session_id}");
                }
            }
            Command::History => self.print_history(),
            Command::ClearHistory => {
                if self.confirm("Delete ALL chat history? This cannot be undone.").await? {
                    let session_id = self.sessions.clear_history(&mut self.chat).await?;
                    println!("History cleared. Started session {session_id}");
                }
            }

            // ── Settings ──────────────────────────────────────────────────────
            Command::Mode(None) => println!("{}", render::modes(self.chat.settings().mode)),
            Command::Mode(Some(mode)) => {
                self.chat.settings_mut().mode = mode;
                println!("Mode: {mode} ({})", mode.description());
            }
            Command::Provider(None) => println!(
                "Provider: {} (local, groq, gemini, openai)",
                self.chat.settings().provider
            ),
            Command::Provider(Some(provider)) => {
                self.chat.settings_mut().provider = provider;
                println!("Provider: {provider}");
            }
            Command::Model(name) => {
                self.chat.settings_mut().model = name.unwrap_or_default();
                println!("Model: {}", self.chat.settings().model_display());
            }
            Command::Rag(value) => {
                let settings = self.chat.settings_mut();
                settings.use_rag = value.unwrap_or(!settings.use_rag);
                println!("Knowledge base: {}", if settings.use_rag { "on" } else { "off" });
            }

            // ── Local models ──────────────────────────────────────────────────
            Command::Models => {
                let models = self.models.list().await?;
                if models.is_empty() {
                    println!("  (no local models)");
                }
                for model in &models {
                    println!("{}", render::model(model));
                }
            }
            Command::Pull(name) => self.pull_model(&name).await?,
            Command::DeleteModel(name) => {
                if self.confirm(&format!("Delete model '{name}'?")).await? {
                    self.models.delete(&name).await?;
                    println!("Deleted {name}");
                }
            }

            // ── Knowledge base ────────────────────────────────────────────────
            Command::Upload { path, kind } => self.upload(&path, kind).await?,
            Command::Ingest => {
                let response = self.client.start_ingestion().await?;
                println!("{}", response.message.unwrap_or_else(|| "Ingestion started.".to_string()));
            }
            Command::Reset => {
                if self.confirm("Wipe the knowledge base? All indexed documents are lost.").await? {
                    let response = self.client.reset_knowledge_base().await?;
                    println!("{}", response.message.unwrap_or_else(|| "Knowledge base reset.".to_string()));
                }
            }

            Command::Status => println!(
                "{}",
                render::status(&self.health.current(), self.chat.settings(), self.chat.session_id())
            ),
            Command::Help => println!("{HELP}"),
            Command::Quit => return Ok(Flow::Quit),
        }
        Ok(Flow::Continue)
    }

    /// Streams one turn to the terminal. `None` regenerates the last answer.
    async fn run_turn(&mut self, text: Option<String>) -> Result<(), AppError> {
        let (tx, mut deltas) = mpsc::unbounded_channel();
        self.chat.set_delta_sink(tx);
        let mut status = self.chat.subscribe_status();
        let stop = self.chat.stop_handle();
        let interrupt = on_interrupt(move || stop.stop());

        let mut answered = false;
        let outcome = {
            let chat = &mut self.chat;
            let turn = async move {
                match text {
                    Some(text) => chat.submit(&text).await,
                    None => chat.regenerate().await,
                }
            };
            tokio::pin!(turn);
            loop {
                tokio::select! {
                    outcome = &mut turn => break outcome,
                    Some(delta) = deltas.recv() => print_delta(&mut answered, &delta),
                    Ok(()) = status.changed() => {
                        // Statuses only make sense before the answer starts.
                        let current = status.borrow_and_update().clone();
                        if let Some(line) = current.filter(|_| !answered) {
                            eprintln!("  ... {line}");
                        }
                    }
                }
            }
        };
        interrupt.abort();
        while let Ok(delta) = deltas.try_recv() {
            print_delta(&mut answered, &delta);
        }
        if answered {
            println!();
        }

        match outcome? {
            TurnOutcome::Cancelled => println!("[stopped]"),
            TurnOutcome::Completed => {
                if !answered {
                    println!("assistant> (empty answer)");
                }
                if let Some(answer) = self.chat.messages().last().filter(|m| m.role == MessageRole::Assistant) {
                    if !answer.citations.is_empty() {
                        println!("  Sources:");
                        println!("{}", render::citations(&answer.citations));
                    }
                    if let Some(footer) = render::footer(answer) {
                        println!("{footer}");
                    }
                }
            }
        }
        Ok(())
    }

    async fn pull_model(&self, name: &str) -> Result<(), AppError> {
        let cancel = CancellationToken::new();
        let interrupt = {
            let cancel = cancel.clone();
            on_interrupt(move || cancel.cancel())
        };
        let result = self
            .models
            .pull(name, &cancel, |progress| {
                eprint!("\r  {:<32} {:>5.1}%", progress.status, progress.percent);
                let _ = std::io::stderr().flush();
            })
            .await;
        interrupt.abort();
        eprintln!();

        match result? {
            PullOutcome::Finished(progress) if progress.is_complete() => println!("Pulled {name}"),
            PullOutcome::Finished(progress) => println!("Pull of {name} ended: {}", progress.status),
            PullOutcome::Cancelled => println!("Pull of {name} cancelled"),
        }
        Ok(())
    }

    async fn upload(&self, path: &Path, kind: Option<UploadKind>) -> Result<(), AppError> {
        let kind = kind.unwrap_or_else(|| UploadKind::from_path(path));
        let result = self
            .client
            .upload_document(path, kind, |percent| {
                eprint!("\r  uploading {percent:>5.1}%");
                let _ = std::io::stderr().flush();
            })
            .await;
        eprintln!();
        let response = result?;
        println!("{}", response.message.unwrap_or_else(|| "Upload complete.".to_string()));
        println!("Run /ingest to index it.");
        Ok(())
    }

    async fn confirm(&mut self, question: &str) -> Result<bool, AppError> {
        prompt(&format!("{question} [y/N] "));
        let answer = self
            .input
            .next_line()
            .await
            .map_err(|e| AppError::Unexpected(format!("reading stdin: {e}")))?;
        Ok(matches!(
            answer.as_deref().map(str::trim),
            Some("y" | "Y" | "yes" | "YES")
        ))
    }

    /// A position from `/sessions` (1-based) or a literal session id.
    fn resolve_session(&self, target: &str) -> String {
        let known = self.sessions.sessions();
        match target.parse::<usize>() {
            Ok(n) if (1..=known.len()).contains(&n) => known[n - 1].clone(),
            _ => target.to_string(),
        }
    }

    fn print_history(&self) {
        for message in self.chat.messages() {
            println!("{}", render::message(message));
        }
    }
}

fn prompt(text: &str) {
    print!("{text}");
    let _ = std::io::stdout().flush();
}

fn print_delta(answered: &mut bool, delta: &str) {
    if !*answered {
        *answered = true;
        print!("assistant> ");
    }
    print!("{delta}");
    let _ = std::io::stdout().flush();
}

fn report(error: &AppError) {
    eprintln!("error: {}", error.user_message());
}

/// Runs `action` on the next Ctrl-C until the returned task is aborted.
fn on_interrupt<F>(action: F) -> JoinHandle<()>
where
    F: FnOnce() + Send + 'static,
{
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            action();
        }
    })
}
