use crate::models::{
    format_date, format_size, ChatMessage, ChatSettings, Citation, HealthStatus, MessageRole,
    ModelInfo, RetrievalMode,
};

const EXCERPT_CHARS: usize = 160;

/// `[n] P.<page> <file>: "<excerpt>"`, one line per citation.
pub fn citations(citations: &[Citation]) -> String {
    citations
        .iter()
        .enumerate()
        .map(|(idx, c)| {
            format!(
                "  [{}] P.{} {}: \"{}\"",
                idx + 1,
                c.page_display(),
                c.file_name().unwrap_or("Unknown File"),
                excerpt(&c.content)
            )
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Collapses whitespace and cuts long excerpts at a character boundary.
fn excerpt(content: &str) -> String {
    let flat = content.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= EXCERPT_CHARS {
        return flat;
    }
    let cut: String = flat.chars().take(EXCERPT_CHARS).collect();
    format!("{}...", cut.trim_end())
}

/// Latency and source line under a finalized assistant message.
pub fn footer(message: &ChatMessage) -> Option<String> {
    if message.role != MessageRole::Assistant || !message.is_finalized() {
        return None;
    }
    if message.latency_seconds > 0.0 {
        Some(format!("  ({:.2}s · {})", message.latency_seconds, message.source_label))
    } else {
        Some(format!("  ({})", message.source_label))
    }
}

/// Full rendering of a stored message, used when replaying a conversation.
pub fn message(message: &ChatMessage) -> String {
    let speaker = match message.role {
        MessageRole::User => "you",
        MessageRole::Assistant => "assistant",
    };
    let mut out = format!("{speaker}> {}", message.content);
    if !message.citations.is_empty() {
        out.push_str("\n  Sources:\n");
        out.push_str(&citations(&message.citations));
    }
    if let Some(footer) = footer(message) {
        out.push('\n');
        out.push_str(&footer);
    }
    out
}

pub fn model(model: &ModelInfo) -> String {
    let (name, tag) = model.name_and_tag();
    let digest = model.digest.as_deref().map(|d| d.get(..12).unwrap_or(d)).unwrap_or("-");
    format!(
        "  {:<28} {:<10} {:>10}  {}  {}",
        name,
        tag.unwrap_or("latest"),
        format_size(model.size),
        format_date(model.modified_at.as_deref()),
        digest
    )
}

pub fn modes(current: RetrievalMode) -> String {
    RetrievalMode::ALL
        .iter()
        .map(|mode| {
            let marker = if *mode == current { '*' } else { ' ' };
            format!("  {marker} {:<9} {}", mode.as_str(), mode.description())
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn sessions(sessions: &[String], current: &str) -> String {
    if sessions.is_empty() {
        return "  (no sessions yet)".to_string();
    }
    sessions
        .iter()
        .enumerate()
        .map(|(idx, id)| {
            let marker = if id == current { '*' } else { ' ' };
            format!("  {marker} {:>2}. {id}", idx + 1)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

pub fn status(health: &HealthStatus, settings: &ChatSettings, session_id: &str) -> String {
    format!(
        "  system:   {}\n  ollama:   {}\n  session:  {}\n  mode:     {} ({})\n  provider: {}\n  model:    {}\n  rag:      {}",
        health.system.as_str(),
        health.ollama,
        session_id,
        settings.mode,
        settings.mode.description(),
        settings.provider,
        settings.model_display(),
        if settings.use_rag { "on" } else { "off" },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ContextMessage, HealthResponse};
    use pretty_assertions::assert_eq;

    fn citation(content: &str, page: Option<&str>, file: Option<&str>) -> Citation {
        Citation {
            content: content.to_string(),
            page_label: page.map(str::to_string),
            file_path: file.map(str::to_string),
        }
    }

    #[test]
    fn citations_are_numbered_with_page_and_file() {
        let rendered = citations(&[
            citation("Paris is\n the capital", Some("12"), Some("/docs/geo.pdf")),
            citation("no locator", None, None),
        ]);
        assert_eq!(
            rendered,
            "  [1] P.12 geo.pdf: \"Paris is the capital\"\n  [2] P.Unknown Unknown File: \"no locator\""
        );
    }

    #[test]
    fn long_excerpts_are_cut_on_char_boundaries() {
        let long = "é".repeat(EXCERPT_CHARS + 20);
        let cut = excerpt(&long);
        assert!(cut.ends_with("..."));
        assert_eq!(cut.chars().count(), EXCERPT_CHARS + 3);
    }

    #[test]
    fn footer_only_for_finalized_answers() {
        let mut answer = ChatMessage::assistant_placeholder();
        assert_eq!(footer(&answer), None);
        answer.latency_seconds = 1.234;
        answer.source_label = "Streaming (local)".to_string();
        assert_eq!(footer(&answer).as_deref(), Some("  (1.23s · Streaming (local))"));

        let restored = ChatMessage::from_history(
            "s",
            0,
            ContextMessage { role: MessageRole::Assistant, content: "hi".to_string() },
        );
        assert_eq!(footer(&restored).as_deref(), Some("  (History)"));
        assert_eq!(footer(&ChatMessage::user("q")), None);
    }

    #[test]
    fn model_line_shows_tag_size_and_short_digest() {
        let info = ModelInfo {
            name: "mistral:7b".to_string(),
            size: Some(4_109_865_159),
            modified_at: Some("2024-05-01T10:00:00Z".to_string()),
            digest: Some("f974a74358d62a017b37c6f424fcdf2744ca02926c4f952513ddf474b2fa5091".to_string()),
        };
        let line = model(&info);
        assert!(line.contains("mistral"));
        assert!(line.contains("7b"));
        assert!(line.contains("3.8 GB"));
        assert!(line.contains("2024-05-01"));
        assert!(line.ends_with("f974a74358d6"));
    }

    #[test]
    fn current_session_and_mode_are_marked() {
        let list = sessions(&["b".to_string(), "a".to_string()], "a");
        assert_eq!(list, "     1. b\n  *  2. a");
        assert!(modes(RetrievalMode::Fast).starts_with("  * fast"));
    }

    #[test]
    fn status_lists_health_and_settings() {
        let health = HealthStatus::online(HealthResponse { ollama: Some("online".to_string()) });
        let text = status(&health, &ChatSettings::default(), "s-1");
        assert!(text.contains("system:   online"));
        assert!(text.contains("model:    Default (llama3.2)"));
        assert!(text.contains("rag:      on"));
    }
}
