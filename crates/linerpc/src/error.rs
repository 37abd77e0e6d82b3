//! Error types and the `ErrorKind` classification used to decide whether a
//! failure is connection-fatal.
//!
//! Modeled on the `tor_error::HasKind` pattern used throughout Arti: rather
//! than matching on a flat enum, callers ask a value for its [`ErrorKind`]
//! and branch on that instead.

use std::sync::Arc;

/// A coarse classification of an error, used to decide recovery policy.
///
/// See spec §7 for the taxonomy this mirrors.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The peer closed the stream, or a connection-fatal socket error
    /// occurred (`ECONNRESET` and friends). The connection is unusable.
    TransportFatal,
    /// A frame could not be parsed as JSON, or was not an object/array at
    /// the top level. Logged and dropped; the reader keeps going.
    FrameMalformed,
    /// The request named an object or method that does not exist, or a
    /// handler raised while running.
    DispatchLevel,
    /// A local precondition was violated by the caller (duplicate request
    /// id, cross-connection serialization). Never sent on the wire.
    LocalProgrammingError,
}

/// Types that can classify themselves for the purposes of connection
/// recovery policy.
pub trait HasKind {
    /// Return this error's [`ErrorKind`].
    fn kind(&self) -> ErrorKind;
}

/// Failures from the [`crate::framer`] module.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum FramerError {
    /// The peer closed its write half (or the socket died) before a
    /// complete line arrived. Carries the number of bytes that were
    /// buffered but never terminated by a newline.
    #[error("connection closed with {0} unconsumed byte(s) in the read buffer")]
    Eof(usize),
    /// An I/O error occurred that isn't one of the enumerated
    /// connection-fatal kinds and isn't a retryable would-block.
    #[error("I/O error: {0}")]
    Io(#[source] Arc<std::io::Error>),
    /// The frame was not valid UTF-8 after newline-splitting.
    #[error("frame was not valid UTF-8: {0}")]
    InvalidUtf8(#[source] Arc<std::str::Utf8Error>),
    /// A string passed to [`crate::framer::Writer::write_line`] contained an
    /// embedded newline, violating the framing precondition.
    #[error("refusing to write a line containing an embedded newline")]
    EmbeddedNewline,
}

impl HasKind for FramerError {
    fn kind(&self) -> ErrorKind {
        match self {
            FramerError::Eof(_) => ErrorKind::TransportFatal,
            FramerError::Io(_) => ErrorKind::TransportFatal,
            FramerError::InvalidUtf8(_) => ErrorKind::FrameMalformed,
            FramerError::EmbeddedNewline => ErrorKind::LocalProgrammingError,
        }
    }
}

impl From<std::io::Error> for FramerError {
    fn from(e: std::io::Error) -> Self {
        FramerError::Io(Arc::new(e))
    }
}

/// Failures from encoding or decoding the class-hinting JSON protocol
/// (spec §4.B).
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CodecError {
    /// JSON syntax error.
    #[error("invalid JSON: {0}")]
    Json(#[source] Arc<serde_json::Error>),
    /// An `__objectreference__` hint named an object that is not (or is no
    /// longer) in this connection's hosted-object table.
    #[error("no hosted object named {0:?}")]
    InvalidReference(String),
    /// A callable value was bound to a connection other than the one it is
    /// being serialized onto.
    #[error("cannot serialize a callable bound to a different connection")]
    CrossConnectionSerialization,
    /// A value was not representable as plain JSON (it still carried one of
    /// the three class hints after decoding).
    #[error("value is not plain data")]
    NotPlainData,
}

impl HasKind for CodecError {
    fn kind(&self) -> ErrorKind {
        match self {
            CodecError::Json(_) => ErrorKind::FrameMalformed,
            CodecError::InvalidReference(_) => ErrorKind::DispatchLevel,
            CodecError::CrossConnectionSerialization => ErrorKind::LocalProgrammingError,
            CodecError::NotPlainData => ErrorKind::LocalProgrammingError,
        }
    }
}

impl From<serde_json::Error> for CodecError {
    fn from(e: serde_json::Error) -> Self {
        CodecError::Json(Arc::new(e))
    }
}

/// Failures that can occur while dispatching a single inbound frame.
///
/// These never propagate past the dispatcher: per spec §7, each surfaces as
/// an error response frame (or is swallowed, for notifications) rather than
/// tearing down the connection.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// The dotted prefix of a method name did not refer to a hosted object.
    #[error("invalid object identifier: {0:?}")]
    InvalidObjectIdentifier(String),
    /// The object exists, but has no method by that name.
    #[error("unknown method: {0:?}")]
    UnknownMethod(String),
    /// A request frame was not itself malformed JSON, but failed to match
    /// any recognized top-level shape.
    #[error("unknown format")]
    UnknownFormat,
    /// `params` was present but was neither an array nor an object.
    #[error("params must be an array or object")]
    InvalidParams,
    #[error(transparent)]
    /// A codec-level failure while decoding params or encoding a reply.
    Codec(#[from] CodecError),
}

impl HasKind for DispatchError {
    fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Codec(e) => e.kind(),
            _ => ErrorKind::DispatchLevel,
        }
    }
}

impl DispatchError {
    /// Render this error the way spec §7 requires on the wire: a short
    /// human string of the form `"<ErrorKind>: <message>"`.
    pub fn wire_message(&self) -> String {
        let kind = match self {
            DispatchError::InvalidObjectIdentifier(_) => "InvalidObjectIdentifier",
            DispatchError::UnknownMethod(_) => "UnknownMethod",
            DispatchError::UnknownFormat => "UnknownFormat",
            DispatchError::InvalidParams => "InvalidParams",
            DispatchError::Codec(_) => "CodecError",
        };
        format!("{kind}: {self}")
    }
}

/// Local, never-on-the-wire programming errors (spec §7 "Local programming
/// errors").
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum LocalError {
    /// [`crate::registry::Registry::add_request`] was called with an id
    /// that is already pending.
    #[error("request id {0} is already registered")]
    DuplicateRequestId(u64),
}

impl HasKind for LocalError {
    fn kind(&self) -> ErrorKind {
        ErrorKind::LocalProgrammingError
    }
}

/// Errors that can cause a [`crate::connection::Connection`] to stop serving
/// and close.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConnectionError {
    /// The framer reported a connection-fatal condition.
    #[error(transparent)]
    Transport(#[from] FramerError),
    /// A local error was raised by the application (not sent on the wire).
    #[error(transparent)]
    Local(#[from] LocalError),
}

impl HasKind for ConnectionError {
    fn kind(&self) -> ErrorKind {
        match self {
            ConnectionError::Transport(e) => e.kind(),
            ConnectionError::Local(e) => e.kind(),
        }
    }
}

/// Errors a [`crate::proxy::Proxy`] call can return to its caller.
#[derive(Clone, Debug, thiserror::Error)]
#[non_exhaustive]
pub enum CallError {
    /// The connection is closed (or closed while we were waiting).
    #[error("connection closed")]
    ConnectionClosed,
    /// The remote side replied with a non-null `error` field.
    #[error("remote error: {0}")]
    Remote(String),
    /// We could not encode the outbound request.
    #[error(transparent)]
    Codec(#[from] CodecError),
    /// A local precondition was violated (see [`LocalError`]).
    #[error(transparent)]
    Local(#[from] LocalError),
}

impl HasKind for CallError {
    fn kind(&self) -> ErrorKind {
        match self {
            CallError::ConnectionClosed => ErrorKind::TransportFatal,
            CallError::Remote(_) => ErrorKind::DispatchLevel,
            CallError::Codec(e) => e.kind(),
            CallError::Local(e) => e.kind(),
        }
    }
}
