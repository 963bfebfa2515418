use axum::extract::ws::Utf8Bytes;
use thiserror::Error;

use parley_types::events::{ClientFrame, ServerFrame};

/// An encoded outbound text frame. Cheap to clone, so a broadcast shares one
/// allocation across every recipient queue.
pub type Frame = Utf8Bytes;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("failed to encode {kind} frame: {source}")]
    Encode {
        kind: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Decode one inbound text frame. Unrecognised `type` tags decode to
/// [`ClientFrame::Unknown`]; anything that is not a tagged object is an error.
pub fn decode(text: &str) -> Result<ClientFrame, CodecError> {
    serde_json::from_str(text).map_err(CodecError::Malformed)
}

pub fn encode(frame: &ServerFrame) -> Result<Frame, CodecError> {
    serde_json::to_string(frame)
        .map(Frame::from)
        .map_err(|source| CodecError::Encode {
            kind: frame.kind(),
            source,
        })
}

/// Join frames that were already queued into a single transport write,
/// newline separated. Clients split on `\n`.
pub fn coalesce(mut batch: Vec<Frame>) -> Frame {
    if batch.len() == 1 {
        if let Some(only) = batch.pop() {
            return only;
        }
    }

    let len = batch.iter().map(|f| f.as_str().len() + 1).sum();
    let mut joined = String::with_capacity(len);
    for (i, frame) in batch.iter().enumerate() {
        if i > 0 {
            joined.push('\n');
        }
        joined.push_str(frame.as_str());
    }
    Frame::from(joined)
}
