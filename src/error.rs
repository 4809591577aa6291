//! Error types for seqwire.

use thiserror::Error;

/// Main error type for all RPC operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error (preamble or JSON codec).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("msgpack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("msgpack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// The preamble carried a magic number other than [`MAGIC_NUMBER`].
    ///
    /// [`MAGIC_NUMBER`]: crate::protocol::MAGIC_NUMBER
    #[error("rpc server: invalid magic number {0:#x}")]
    InvalidMagicNumber(u32),

    /// The preamble named a codec missing from the registry.
    #[error("invalid codec type {0}")]
    InvalidCodecType(String),

    /// A codec name was registered twice.
    #[error("codec type {0} already registered")]
    CodecAlreadyRegistered(String),

    /// A `service_method` with no separator or an empty half.
    #[error("rpc server: service/method request ill-formed: {0}")]
    IllFormed(String),

    /// No service registered under this name.
    #[error("rpc server: can't find service {0}")]
    ServiceNotFound(String),

    /// The service exists but has no such method.
    #[error("rpc server: can't find method {0}")]
    MethodNotFound(String),

    /// One-shot registration: the first entry under a name stays.
    #[error("rpc: service already defined: {0}")]
    ServiceAlreadyDefined(String),

    /// A service or method name not starting with an uppercase letter.
    #[error("rpc service: {0} is not a valid exported name")]
    NameNotExported(String),

    /// The same method name registered twice on one service.
    #[error("rpc service: method {0} registered twice")]
    DuplicateMethod(String),

    /// Submission after close, or a second close.
    #[error("connection is shut down")]
    Shutdown,

    /// The connection died with pending calls outstanding.
    #[error("connection lost: {0}")]
    ConnectionLost(String),

    /// Error string reported by the remote in a response header.
    #[error("{0}")]
    Remote(String),

    /// A response body could not be decoded into the caller's reply type.
    #[error("reading body {0}")]
    ReadBody(String),

    /// Application error returned by a registered method handler.
    #[error("{0}")]
    Method(#[from] MethodError),

    /// A frame unit above the size cap; the stream cannot be trusted.
    #[error("frame of {0} bytes exceeds maximum {1}")]
    FrameTooLarge(usize, usize),

    /// Write attempted after a mid-frame failure closed the codec.
    #[error("codec is closed")]
    CodecClosed,
}

/// Application-level error a method handler can return. Its message becomes
/// the `Error` field of the response header.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct MethodError(pub String);

impl MethodError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<&str> for MethodError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

impl From<String> for MethodError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
