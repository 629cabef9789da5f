pub mod client;
pub mod transport;

pub use client::BackendClient;
pub use transport::{text_stream, ChatTransport, ChunkStream};
