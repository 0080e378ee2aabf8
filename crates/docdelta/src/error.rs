use docdelta_buffers::BufferError;
use thiserror::Error;

/// Errors surfaced while decoding or applying an update message.
///
/// A malformed update is rejected before any store mutation: both sections of
/// an update are parsed in full before integration begins, so every variant
/// here implies the document is exactly as it was before the call.
#[derive(Debug, Error)]
pub enum UpdateError {
    /// Truncated varint, byte run, or string.
    #[error("malformed update: {0}")]
    Buffer(#[from] BufferError),
    /// The low five bits of an info byte named a content kind that does not exist.
    #[error("unknown content tag: {0}")]
    UnknownContentTag(u8),
    /// A JSON payload could not be decoded from its CBOR wire form.
    #[error("invalid content payload")]
    InvalidPayload,
    /// The byte stream is not framed the way the selected codec version expects.
    #[error("update framing does not match the selected codec version")]
    UnknownFormat,
    /// A type-ref byte named a nested type kind that does not exist.
    #[error("unknown type ref: {0}")]
    UnknownTypeRef(u8),
}
