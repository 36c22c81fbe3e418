//! Field access helpers for CBOR map bodies.

use crate::error::{CodecError, CodecResult};
use crate::value::Value;

/// Typed read access to the fields of a decoded CBOR map.
///
/// Keys may be text or integers; errors name the key in diagnostic notation.
/// A field that is present with a `null` value is treated as absent by the
/// `optional_*` accessors.
#[derive(Debug, Clone, Copy)]
pub struct MapReader<'a> {
    pairs: &'a [(Value, Value)],
}

impl<'a> MapReader<'a> {
    /// Wrap a map value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::InvalidStructure`] if `value` is not a map.
    pub fn new(value: &'a Value) -> CodecResult<Self> {
        value
            .as_map()
            .map(|pairs| Self { pairs })
            .ok_or_else(|| {
                CodecError::invalid_structure(format!("expected map, found {}", value.type_name()))
            })
    }

    /// Number of fields.
    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    /// Whether the map has no fields.
    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Raw lookup.
    pub fn get(&self, key: &Value) -> Option<&'a Value> {
        self.pairs.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Lookup that maps both a missing field and `null` to `None`.
    pub fn optional(&self, key: &Value) -> Option<&'a Value> {
        self.get(key).filter(|v| !v.is_null())
    }

    /// Required field of any type.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::MissingField`] if the field is absent.
    pub fn required(&self, key: &Value) -> CodecResult<&'a Value> {
        self.get(key).ok_or_else(|| CodecError::missing_field(key.to_string()))
    }

    /// Required unsigned integer field.
    ///
    /// # Errors
    ///
    /// Missing field, or a value that is not an integer in `u64` range.
    pub fn u64(&self, key: &Value) -> CodecResult<u64> {
        let value = self.required(key)?;
        value.as_u64().ok_or_else(|| Self::wrong(key, value, "unsigned integer"))
    }

    /// Optional unsigned integer field.
    ///
    /// # Errors
    ///
    /// A present value that is not an integer in `u64` range.
    pub fn optional_u64(&self, key: &Value) -> CodecResult<Option<u64>> {
        self.optional(key)
            .map(|value| value.as_u64().ok_or_else(|| Self::wrong(key, value, "unsigned integer")))
            .transpose()
    }

    /// Required boolean field.
    ///
    /// # Errors
    ///
    /// Missing field or a non-boolean value.
    pub fn bool(&self, key: &Value) -> CodecResult<bool> {
        let value = self.required(key)?;
        value.as_bool().ok_or_else(|| Self::wrong(key, value, "bool"))
    }

    /// Required text field.
    ///
    /// # Errors
    ///
    /// Missing field or a non-text value.
    pub fn text(&self, key: &Value) -> CodecResult<&'a str> {
        let value = self.required(key)?;
        value.as_text().ok_or_else(|| Self::wrong(key, value, "text"))
    }

    /// Optional text field.
    ///
    /// # Errors
    ///
    /// A present non-text value.
    pub fn optional_text(&self, key: &Value) -> CodecResult<Option<&'a str>> {
        self.optional(key)
            .map(|value| value.as_text().ok_or_else(|| Self::wrong(key, value, "text")))
            .transpose()
    }

    /// Required array field.
    ///
    /// # Errors
    ///
    /// Missing field or a non-array value.
    pub fn array(&self, key: &Value) -> CodecResult<&'a [Value]> {
        let value = self.required(key)?;
        value.as_array().ok_or_else(|| Self::wrong(key, value, "array"))
    }

    fn wrong(key: &Value, value: &Value, expected: &'static str) -> CodecError {
        CodecError::WrongType {
            field: format!("{key} ({})", value.type_name()),
            expected,
        }
    }
}

/// Accumulates map fields and produces a canonical map value.
///
/// `None` optional fields are skipped rather than written as `null`.
#[derive(Debug, Default)]
pub struct MapBuilder {
    pairs: Vec<(Value, Value)>,
}

impl MapBuilder {
    /// Create an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a field.
    #[must_use]
    pub fn field(mut self, key: Value, value: impl Into<Value>) -> Self {
        self.pairs.push((key, value.into()));
        self
    }

    /// Add a field only when `value` is `Some`.
    #[must_use]
    pub fn optional_field(self, key: Value, value: Option<impl Into<Value>>) -> Self {
        match value {
            Some(v) => self.field(key, v),
            None => self,
        }
    }

    /// Finish into a map with keys in canonical order.
    pub fn build(self) -> Value {
        Value::map(self.pairs)
    }
}
