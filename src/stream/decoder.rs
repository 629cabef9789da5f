//! Incremental decoder for the chat response stream.
//!
//! The backend multiplexes control signals into the plain text it streams back:
//!
//! - `__STATUS__: <text>\n` announces what the assistant is currently doing;
//! - `__METADATA__[...]` closes the stream with the citation list as a JSON array.
//!
//! Chunk boundaries are arbitrary, so a marker may arrive split over several
//! chunks. The decoder only ever emits display text that can no longer turn
//! out to be part of a marker.

use tracing::{debug, trace};

use crate::models::{Citation, CitationPayload};

pub const STATUS_MARKER: &str = "__STATUS__: ";
pub const METADATA_MARKER: &str = "__METADATA__";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecoderMode {
    /// Display text and status lines are being decoded.
    Accumulating,
    /// The metadata separator was seen; waiting for a complete JSON array.
    MetadataPending,
    /// Citations were decoded; any further input is discarded.
    Done,
}

/// Output of one decoder step.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StreamUpdate {
    /// Newly confirmed display text.
    pub display_delta: String,
    /// Status lines completed by this step, oldest first.
    pub statuses: Vec<String>,
    /// Present only on the step that completed the metadata block.
    pub citations: Option<Vec<Citation>>,
}

impl StreamUpdate {
    /// The status that should be current after applying this update.
    pub fn status(&self) -> Option<&str> {
        self.statuses.last().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.display_delta.is_empty() && self.statuses.is_empty() && self.citations.is_none()
    }
}

#[derive(Debug)]
pub struct StreamDecoder {
    /// Received text not yet classified (`Accumulating`) or the text after the
    /// metadata separator (`MetadataPending`).
    pending: String,
    mode: DecoderMode,
}

impl Default for StreamDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamDecoder {
    pub fn new() -> Self {
        Self { pending: String::new(), mode: DecoderMode::Accumulating }
    }

    pub fn mode(&self) -> DecoderMode {
        self.mode
    }

    /// Feeds the next fragment of the response, in arrival order.
    pub fn consume_chunk(&mut self, chunk: &str) -> StreamUpdate {
        let mut update = StreamUpdate::default();
        match self.mode {
            DecoderMode::Done => {
                trace!(len = chunk.len(), "discarding input after metadata block");
            }
            DecoderMode::MetadataPending => {
                self.pending.push_str(chunk);
                self.try_complete_metadata(&mut update);
            }
            DecoderMode::Accumulating => {
                self.pending.push_str(chunk);
                self.scan(&mut update);
            }
        }
        update
    }

    /// Signals end of stream and flushes whatever is still withheld.
    ///
    /// Partial markers and an unfinished metadata block are not real markers
    /// once no more input can arrive, so they become ordinary display text.
    /// A status line that is missing only its terminator is still a status.
    pub fn finish(&mut self) -> StreamUpdate {
        let mut update = StreamUpdate::default();
        let rest = std::mem::take(&mut self.pending);
        match self.mode {
            DecoderMode::Done => {}
            DecoderMode::MetadataPending => {
                debug!(len = rest.len(), "stream ended with incomplete metadata; flushing as text");
                update.display_delta.push_str(METADATA_MARKER);
                update.display_delta.push_str(&rest);
            }
            DecoderMode::Accumulating => match rest.strip_prefix(STATUS_MARKER) {
                Some(status) => push_status(&mut update, status),
                None => update.display_delta = rest,
            },
        }
        self.mode = DecoderMode::Done;
        update
    }

    fn scan(&mut self, update: &mut StreamUpdate) {
        loop {
            let status_at = self.pending.find(STATUS_MARKER);
            let metadata_at = self.pending.find(METADATA_MARKER);

            match (status_at, metadata_at) {
                (Some(s), m) if m.map_or(true, |m| s < m) => {
                    update.display_delta.push_str(&self.pending[..s]);
                    let line_start = s + STATUS_MARKER.len();
                    let Some(newline) = self.pending[line_start..].find('\n') else {
                        // Wait for the line terminator.
                        self.pending.drain(..s);
                        return;
                    };
                    let line_end = line_start + newline;
                    push_status(update, &self.pending[line_start..line_end]);
                    self.pending.drain(..=line_end);
                }
                (_, Some(m)) => {
                    update.display_delta.push_str(&self.pending[..m]);
                    self.pending.drain(..m + METADATA_MARKER.len());
                    self.mode = DecoderMode::MetadataPending;
                    trace!("metadata separator found");
                    self.try_complete_metadata(update);
                    return;
                }
                (_, None) => {
                    let keep = withheld_suffix_len(&self.pending);
                    let emit = self.pending.len() - keep;
                    update.display_delta.push_str(&self.pending[..emit]);
                    self.pending.drain(..emit);
                    return;
                }
            }
        }
    }

    /// Parses the metadata array once it looks complete. A failed parse just
    /// means more input is needed.
    fn try_complete_metadata(&mut self, update: &mut StreamUpdate) {
        let candidate = self.pending.trim();
        if !candidate.ends_with(']') {
            return;
        }
        match serde_json::from_str::<Vec<CitationPayload>>(candidate) {
            Ok(payloads) => {
                let citations: Vec<Citation> = payloads.into_iter().map(Citation::from).collect();
                debug!(count = citations.len(), "citation metadata decoded");
                update.citations = Some(citations);
                self.pending.clear();
                self.mode = DecoderMode::Done;
            }
            Err(e) => trace!("metadata not complete yet: {e}"),
        }
    }
}

fn push_status(update: &mut StreamUpdate, raw: &str) {
    let status = raw.trim();
    if !status.is_empty() {
        update.statuses.push(status.to_string());
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of a marker.
/// Markers are ASCII and start with `_`, so the cut is always a char boundary.
fn withheld_suffix_len(text: &str) -> usize {
    let bytes = text.as_bytes();
    [STATUS_MARKER, METADATA_MARKER]
        .iter()
        .flat_map(|marker| {
            let marker = marker.as_bytes();
            (1..marker.len().min(bytes.len() + 1))
                .rev()
                .find(|&n| bytes.ends_with(&marker[..n]))
        })
        .max()
        .unwrap_or(0)
}
