//! Error types for local programmer errors and wire decoding.
//!
//! None of these travel on the wire. Protocol failures are
//! [`RequestException`](crate::RequestException) values carried inside a
//! [`RequestFailure`](crate::RequestFailure).

use shardline_codec::CodecError;
use thiserror::Error;

use crate::abi::AbiVersion;
use crate::proxy::MessageType;

/// Result type for serialization proxy operations.
pub type ProxyResult<T> = Result<T, ProxyError>;

/// An identifier component failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid {kind} '{value}': {reason}")]
pub struct InvalidIdentifierError {
    /// Which component was rejected.
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

/// A data path failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid path '{path}': {reason}")]
pub struct InvalidPathError {
    /// The rejected input.
    pub path: String,
    /// Why it was rejected.
    pub reason: &'static str,
}

/// Two peers share no ABI version.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no common ABI version between {local:?} and {remote:?}")]
pub struct NoCommonVersionError {
    /// Versions offered locally.
    pub local: Vec<AbiVersion>,
    /// Versions offered by the peer.
    pub remote: Vec<AbiVersion>,
}

/// A short version value does not name a released version.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionError {
    /// Older than the oldest supported version.
    #[error("version {0} is too old")]
    Past(u16),
    /// Newer than the newest supported version.
    #[error("version {0} is too new")]
    Future(u16),
}

/// Misuse of a [`ModifyTransactionRequestBuilder`](crate::ModifyTransactionRequestBuilder).
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuilderError {
    /// A request was built before a sequence number was assigned.
    #[error("request sequence has not been set")]
    SequenceNotSet,
}

/// Errors raised by the serialization proxy layer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProxyError {
    /// Malformed CBOR or a body of the wrong shape.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// The frame names a version outside the supported range.
    #[error("version error: {0}")]
    Version(#[from] VersionError),

    /// No proxy exists for this message type at this version.
    #[error("{message_type:?} is not defined at version {version}")]
    UnsupportedVersion {
        /// Message type requested.
        message_type: MessageType,
        /// Version requested.
        version: AbiVersion,
    },

    /// The message exists only in local memory and has no wire form.
    #[error("{kind} is local-only and cannot be serialized")]
    LocalOnly {
        /// Kind of the local message.
        kind: &'static str,
    },

    /// The frame names an unknown message type.
    #[error("unknown message type {0}")]
    UnknownMessageType(u8),

    /// An identifier inside the body failed validation.
    #[error("identifier error: {0}")]
    Identifier(#[from] InvalidIdentifierError),

    /// A path inside the body failed validation.
    #[error("path error: {0}")]
    Path(#[from] InvalidPathError),

    /// A body field holds an out-of-range enumeration value or similar.
    #[error("malformed message: {message}")]
    Malformed {
        /// Description of the problem.
        message: String,
    },
}

impl ProxyError {
    /// Create a malformed message error.
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }
}
