//! Canonical CBOR encoder.

use crate::error::{CodecError, CodecResult};
use crate::value::{Value, MAX_INTEGER, MIN_INTEGER};

/// Encode a value to canonical CBOR bytes.
///
/// The output is deterministic: map keys are ordered by their encoded form
/// (shorter first, then bytewise), every head uses its shortest argument and
/// no indefinite lengths are produced.
///
/// # Errors
///
/// Returns [`CodecError::IntegerOverflow`] if an integer lies outside the CBOR
/// integer range, or [`CodecError::InvalidStructure`] if a map repeats a key.
pub fn to_canonical_cbor(value: &Value) -> CodecResult<Vec<u8>> {
    let mut encoder = CanonicalEncoder::new();
    encoder.encode(value)?;
    Ok(encoder.into_bytes())
}

/// An accumulating canonical CBOR encoder.
///
/// Several values may be written back to back, which is how sequences of
/// frames are laid out in test vectors.
#[derive(Debug, Default)]
pub struct CanonicalEncoder {
    buffer: Vec<u8>,
}

impl CanonicalEncoder {
    /// Create a new encoder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new encoder with the specified capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
        }
    }

    /// Validate and append one value.
    ///
    /// # Errors
    ///
    /// See [`to_canonical_cbor`]. Nothing is written when validation fails.
    pub fn encode(&mut self, value: &Value) -> CodecResult<()> {
        validate(value)?;
        value.write_canonical(&mut self.buffer);
        Ok(())
    }

    /// Consume this encoder and return the encoded bytes.
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Get a reference to the encoded bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.buffer
    }
}

fn validate(value: &Value) -> CodecResult<()> {
    match value {
        Value::Integer(n) if !(MIN_INTEGER..=MAX_INTEGER).contains(n) => {
            Err(CodecError::IntegerOverflow)
        }
        Value::Array(items) => items.iter().try_for_each(validate),
        Value::Map(pairs) => {
            for (i, (key, item)) in pairs.iter().enumerate() {
                validate(key)?;
                validate(item)?;
                if pairs[..i].iter().any(|(earlier, _)| earlier == key) {
                    return Err(CodecError::invalid_structure(format!("duplicate map key {key}")));
                }
            }
            Ok(())
        }
        _ => Ok(()),
    }
}
