use std::path::PathBuf;

use crate::errors::AppError;
use crate::models::{Provider, RetrievalMode, UploadKind};

/// One line of user input, parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Plain text: send it as a chat turn.
    Chat(String),
    NewSession,
    ListSessions,
    /// Accepts a full session id or the position shown by `/sessions`.
    Switch(String),
    ClearHistory,
    History,
    Regenerate,
    /// `None` shows the current mode and what each one does.
    Mode(Option<RetrievalMode>),
    Provider(Option<Provider>),
    /// `None` resets to the backend default model.
    Model(Option<String>),
    Rag(Option<bool>),
    Models,
    Pull(String),
    DeleteModel(String),
    Upload { path: PathBuf, kind: Option<UploadKind> },
    Ingest,
    Reset,
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
Commands:
  <text>                       send a message
  /new                         start a new session
  /sessions                    list sessions (newest first)
  /switch <id|number>          switch to another session
  /history                     show the current conversation
  /clear-history               delete every session on the backend
  /regen                       regenerate the last answer
  /mode [fast|simple|advanced] show or set the retrieval mode
  /provider [name]             show or set the provider (local, groq, gemini, openai)
  /model [name]                set the model; no name resets to the default
  /rag [on|off]                toggle knowledge-base grounding
  /models                      list local models
  /pull <name>                 download a local model
  /delete-model <name>         delete a local model
  /upload <path> [pdf|word|text]  upload a document
  /ingest                      index uploaded documents
  /reset                       wipe the knowledge base
  /status                      backend health and current settings
  /help                        this text
  /quit                        exit
Ctrl-C stops a streaming answer or a model download.";

impl Command {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Command>, AppError> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Ok(Some(Command::Chat(line.to_string())));
        };
        let (name, arg) = match rest.split_once(char::is_whitespace) {
            Some((name, arg)) => (name, arg.trim()),
            None => (rest, ""),
        };
        let arg = (!arg.is_empty()).then_some(arg);

        let command = match name.to_ascii_lowercase().as_str() {
            "new" => Command::NewSession,
            "sessions" => Command::ListSessions,
            "switch" => Command::Switch(required(arg, "/switch <id|number>")?),
            "clear-history" => Command::ClearHistory,
            "history" => Command::History,
            "regen" | "regenerate" => Command::Regenerate,
            "mode" => Command::Mode(arg.map(str::parse).transpose()?),
            "provider" => Command::Provider(arg.map(str::parse).transpose()?),
            "model" => Command::Model(arg.map(str::to_string)),
            "rag" => Command::Rag(arg.map(parse_switch).transpose()?),
            "models" => Command::Models,
            "pull" => Command::Pull(required(arg, "/pull <name>")?),
            "delete-model" => Command::DeleteModel(required(arg, "/delete-model <name>")?),
            "upload" => parse_upload(arg)?,
            "ingest" => Command::Ingest,
            "reset" => Command::Reset,
            "status" => Command::Status,
            "help" | "?" => Command::Help,
            "quit" | "exit" | "q" => Command::Quit,
            other => {
                return Err(AppError::InvalidCommand(format!(
                    "Unknown command '/{other}'. Type /help for the list."
                )))
            }
        };
        Ok(Some(command))
    }
}

fn required(arg: Option<&str>, usage: &str) -> Result<String, AppError> {
    arg.map(str::to_string)
        .ok_or_else(|| AppError::InvalidCommand(format!("Usage: {usage}")))
}

fn parse_switch(value: &str) -> Result<bool, AppError> {
    match value.to_ascii_lowercase().as_str() {
        "on" | "true" | "yes" | "1" => Ok(true),
        "off" | "false" | "no" | "0" => Ok(false),
        _ => Err(AppError::UnknownSetting {
            setting: "rag switch".to_string(),
            value: value.to_string(),
            expected: "on, off".to_string(),
        }),
    }
}

/// `/upload <path> [kind]`. The kind is taken from the last word only when it
/// names one, so paths with spaces still work.
fn parse_upload(arg: Option<&str>) -> Result<Command, AppError> {
    let arg = required(arg, "/upload <path> [pdf|word|text]")?;
    if let Some((path, last)) = arg.rsplit_once(char::is_whitespace) {
        if let Ok(kind) = last.parse::<UploadKind>() {
            return Ok(Command::Upload { path: PathBuf::from(path.trim()), kind: Some(kind) });
        }
    }
    Ok(Command::Upload { path: PathBuf::from(arg), kind: None })
}
