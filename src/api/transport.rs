use std::future::Future;
use std::pin::Pin;

use futures_util::{Stream, StreamExt};

use crate::errors::AppError;
use crate::models::ChatRequest;
use crate::stream::Utf8ChunkDecoder;

/// Text fragments of a streaming response body, in arrival order.
/// Dropping the stream aborts the underlying request.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<String, AppError>> + Send>>;

/// Opens the streaming chat request for one turn.
pub trait ChatTransport: Send + Sync {
    fn open_chat_stream(
        &self,
        request: &ChatRequest,
    ) -> impl Future<Output = Result<ChunkStream, AppError>> + Send;
}

/// Adapts a raw byte stream into text fragments, keeping multi-byte
/// characters intact across chunk boundaries.
pub fn text_stream<S, B, E>(body: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = (Box::pin(body), Utf8ChunkDecoder::new(), false);
    let stream = futures_util::stream::unfold(state, |(mut body, mut utf8, finished)| async move {
        if finished {
            return None;
        }
        loop {
            match body.next().await {
                Some(Ok(bytes)) => {
                    let text = utf8.decode(bytes.as_ref());
                    if !text.is_empty() {
                        return Some((Ok(text), (body, utf8, false)));
                    }
                }
                Some(Err(e)) => {
                    let err = AppError::StreamFailed { message: e.to_string() };
                    return Some((Err(err), (body, utf8, true)));
                }
                None => {
                    let tail = utf8.finish();
                    if tail.is_empty() {
                        return None;
                    }
                    return Some((Ok(tail), (body, utf8, true)));
                }
            }
        }
    });
    Box::pin(stream)
}
