//! Codec errors.
//!
//! A peer sending a frame that fails here is broken or speaks another
//! protocol; nothing in this module is retriable.

use thiserror::Error;

/// Codec result.
pub type CodecResult<T> = Result<T, CodecError>;

/// Errors raised while encoding, decoding or reading CBOR values.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Float values have no canonical form and are rejected.
    #[error("floats have no canonical encoding")]
    FloatForbidden,

    /// Indefinite-length items are rejected.
    #[error("indefinite-length item in canonical input")]
    IndefiniteLengthForbidden,

    /// A text string was not valid UTF-8.
    #[error("text string is not UTF-8")]
    InvalidUtf8,

    /// The input ended in the middle of an item.
    #[error("input truncated inside an item")]
    UnexpectedEof,

    /// Bytes were left over after the top-level item.
    #[error("{count} trailing bytes after top-level item")]
    TrailingBytes {
        /// Number of unread bytes.
        count: usize,
    },

    /// The input is structurally valid CBOR but not canonical, or malformed.
    #[error("malformed frame: {message}")]
    InvalidStructure {
        /// What was wrong.
        message: String,
    },

    /// A construct outside the supported subset was found.
    #[error("{type_name} is outside the supported CBOR subset")]
    UnsupportedType {
        /// Offending construct.
        type_name: String,
    },

    /// An integer does not fit the CBOR integer range or the requested type.
    #[error("integer out of range")]
    IntegerOverflow,

    /// A declared length exceeds the decoder limit.
    #[error("size limit exceeded: claimed {claimed}, max allowed {max_allowed}")]
    SizeLimitExceeded {
        /// Length declared by the input.
        claimed: u64,
        /// Maximum accepted length.
        max_allowed: u64,
    },

    /// A required map field is absent.
    #[error("missing field '{field}'")]
    MissingField {
        /// Field name.
        field: String,
    },

    /// A map field holds a value of the wrong type.
    #[error("field '{field}' has wrong type, expected {expected}")]
    WrongType {
        /// Field name.
        field: String,
        /// Expected type description.
        expected: &'static str,
    },
}

impl CodecError {
    /// Malformed-input error.
    pub fn invalid_structure(message: impl Into<String>) -> Self {
        Self::InvalidStructure {
            message: message.into(),
        }
    }

    /// Unsupported-construct error.
    pub fn unsupported_type(type_name: impl Into<String>) -> Self {
        Self::UnsupportedType {
            type_name: type_name.into(),
        }
    }

    /// Missing-field error.
    pub fn missing_field(field: impl Into<String>) -> Self {
        Self::MissingField {
            field: field.into(),
        }
    }

    /// Wrong-type error.
    pub fn wrong_type(field: impl Into<String>, expected: &'static str) -> Self {
        Self::WrongType {
            field: field.into(),
            expected,
        }
    }
}
