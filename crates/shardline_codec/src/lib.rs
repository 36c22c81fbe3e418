//! # Shardline Codec
//!
//! Canonical CBOR for the shardline access protocol.
//!
//! Every message body on the wire is a CBOR item produced by this crate, so
//! the same logical message always yields the same bytes:
//! - map keys are sorted by their encoded form (shorter first, then bytewise)
//! - integers and lengths use the shortest head
//! - floats, tags and indefinite-length items are rejected
//! - text is UTF-8
//!
//! ## Usage
//!
//! ```
//! use shardline_codec::{from_cbor, to_canonical_cbor, MapBuilder, MapReader, Value};
//!
//! let body = MapBuilder::new()
//!     .field(Value::text("sequence"), 3u64)
//!     .build();
//! let bytes = to_canonical_cbor(&body).unwrap();
//!
//! let decoded = from_cbor(&bytes).unwrap();
//! let reader = MapReader::new(&decoded).unwrap();
//! assert_eq!(reader.u64(&Value::text("sequence")).unwrap(), 3);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

mod decoder;
mod encoder;
mod error;
mod reader;
mod value;

pub use decoder::{from_cbor, CanonicalDecoder};
pub use encoder::{to_canonical_cbor, CanonicalEncoder};
pub use error::{CodecError, CodecResult};
pub use reader::{MapBuilder, MapReader};
pub use value::{Value, MAX_INTEGER, MIN_INTEGER};

/// Types with a fixed CBOR value representation.
pub trait Encode {
    /// Convert into a CBOR value.
    fn to_value(&self) -> Value;

    /// Encode to canonical CBOR bytes.
    ///
    /// # Errors
    ///
    /// Propagates encoder errors.
    fn encode(&self) -> CodecResult<Vec<u8>> {
        to_canonical_cbor(&self.to_value())
    }
}

/// Types that can be rebuilt from their CBOR value representation.
pub trait Decode: Sized {
    /// Rebuild from a CBOR value.
    ///
    /// # Errors
    ///
    /// Returns an error if the value does not have the expected shape.
    fn from_value(value: &Value) -> CodecResult<Self>;

    /// Decode from canonical CBOR bytes.
    ///
    /// # Errors
    ///
    /// Propagates decoder errors and shape errors.
    fn decode(bytes: &[u8]) -> CodecResult<Self> {
        Self::from_value(&from_cbor(bytes)?)
    }
}

impl Encode for Value {
    fn to_value(&self) -> Value {
        self.clone()
    }
}

impl Decode for Value {
    fn from_value(value: &Value) -> CodecResult<Self> {
        Ok(value.clone())
    }
}
