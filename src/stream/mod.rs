pub mod decoder;
pub mod pull_progress;
pub mod utf8;

pub use decoder::{DecoderMode, StreamDecoder, StreamUpdate};
pub use pull_progress::{pull_event_stream, PullEvent, PullEventStream, PullProgress};
pub use utf8::Utf8ChunkDecoder;
