//! Dynamic CBOR value type.

use std::cmp::Ordering;
use std::fmt;

/// Smallest integer representable in CBOR (major type 1, argument `u64::MAX`).
pub const MIN_INTEGER: i128 = -(1_i128 << 64);

/// Largest integer representable in CBOR (major type 0, argument `u64::MAX`).
pub const MAX_INTEGER: i128 = (1_i128 << 64) - 1;

/// A dynamic CBOR value.
///
/// Only the deterministic subset is modelled: there are no floats, tags or
/// indefinite-length items. Integers cover the whole CBOR range, which is
/// wider than `i64` on both ends.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Value {
    /// Null value.
    Null,
    /// Boolean value.
    Bool(bool),
    /// Integer in `MIN_INTEGER..=MAX_INTEGER`.
    Integer(i128),
    /// Byte string.
    Bytes(Vec<u8>),
    /// Text string.
    Text(String),
    /// Array of values.
    Array(Vec<Value>),
    /// Map of key/value pairs, kept in canonical key order by [`Value::map`].
    Map(Vec<(Value, Value)>),
}

impl Value {
    /// Create a map value with keys in canonical order.
    pub fn map(mut pairs: Vec<(Value, Value)>) -> Self {
        pairs.sort_by(|a, b| a.0.cmp_canonical(&b.0));
        Value::Map(pairs)
    }

    /// Create a text value.
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    /// Compare two values by the canonical order of their encodings:
    /// shorter encodings first, then bytewise.
    pub fn cmp_canonical(&self, other: &Self) -> Ordering {
        let mut a = Vec::new();
        let mut b = Vec::new();
        self.write_canonical(&mut a);
        other.write_canonical(&mut b);
        a.len().cmp(&b.len()).then_with(|| a.cmp(&b))
    }

    /// Append the canonical encoding of this value to `out`.
    ///
    /// Integers outside the CBOR range saturate here; callers that need the
    /// range enforced go through [`crate::CanonicalEncoder`].
    pub(crate) fn write_canonical(&self, out: &mut Vec<u8>) {
        let (major, arg) = self.head();
        write_head(out, major, arg);
        match self {
            Value::Bytes(b) => out.extend_from_slice(b),
            Value::Text(s) => out.extend_from_slice(s.as_bytes()),
            Value::Array(items) => {
                for item in items {
                    item.write_canonical(out);
                }
            }
            Value::Map(pairs) => {
                let mut entries: Vec<(Vec<u8>, &Value)> = pairs
                    .iter()
                    .map(|(k, v)| {
                        let mut key = Vec::new();
                        k.write_canonical(&mut key);
                        (key, v)
                    })
                    .collect();
                entries.sort_by(|a, b| a.0.len().cmp(&b.0.len()).then_with(|| a.0.cmp(&b.0)));
                for (key, value) in entries {
                    out.extend_from_slice(&key);
                    value.write_canonical(out);
                }
            }
            _ => {}
        }
    }

    /// Major type and head argument of this value's encoding.
    ///
    /// Integers outside the CBOR range saturate; the encoder rejects them.
    pub(crate) fn head(&self) -> (u8, u64) {
        match self {
            Value::Integer(n) if *n >= 0 => (0, u64::try_from(*n).unwrap_or(u64::MAX)),
            Value::Integer(n) => (1, u64::try_from(-1 - *n).unwrap_or(u64::MAX)),
            Value::Bytes(b) => (2, b.len() as u64),
            Value::Text(s) => (3, s.len() as u64),
            Value::Array(a) => (4, a.len() as u64),
            Value::Map(m) => (5, m.len() as u64),
            Value::Bool(false) => (7, 20),
            Value::Bool(true) => (7, 21),
            Value::Null => (7, 22),
        }
    }

    /// Short name of the value's type, used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::Integer(_) => "integer",
            Value::Bytes(_) => "bytes",
            Value::Text(_) => "text",
            Value::Array(_) => "array",
            Value::Map(_) => "map",
        }
    }

    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Get this value as a boolean, if it is one.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Get this value as an integer, if it is one.
    pub fn as_integer(&self) -> Option<i128> {
        match self {
            Value::Integer(n) => Some(*n),
            _ => None,
        }
    }

    /// Get this value as a `u64`, if it is a non-negative integer in range.
    pub fn as_u64(&self) -> Option<u64> {
        self.as_integer().and_then(|n| u64::try_from(n).ok())
    }

    /// Get this value as an `i64`, if it is an integer in range.
    pub fn as_i64(&self) -> Option<i64> {
        self.as_integer().and_then(|n| i64::try_from(n).ok())
    }

    /// Get this value as bytes, if it is a byte string.
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Bytes(b) => Some(b),
            _ => None,
        }
    }

    /// Get this value as a string, if it is a text string.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Get this value as an array, if it is one.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Value::Array(a) => Some(a),
            _ => None,
        }
    }

    /// Get this value as a map, if it is one.
    pub fn as_map(&self) -> Option<&[(Value, Value)]> {
        match self {
            Value::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a key in this map value.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.as_map()?
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v)
    }
}

/// Write a CBOR item head using the shortest argument encoding.
#[allow(clippy::cast_possible_truncation)]
pub(crate) fn write_head(out: &mut Vec<u8>, major: u8, arg: u64) {
    let initial = major << 5;
    match arg {
        0..=23 => out.push(initial | arg as u8),
        24..=0xff => out.extend_from_slice(&[initial | 24, arg as u8]),
        0x100..=0xffff => {
            out.push(initial | 25);
            out.extend_from_slice(&(arg as u16).to_be_bytes());
        }
        0x1_0000..=0xffff_ffff => {
            out.push(initial | 26);
            out.extend_from_slice(&(arg as u32).to_be_bytes());
        }
        _ => {
            out.push(initial | 27);
            out.extend_from_slice(&arg.to_be_bytes());
        }
    }
}

impl fmt::Display for Value {
    /// Diagnostic notation in the style of RFC 8949 section 8.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Integer(n) => write!(f, "{n}"),
            Value::Bytes(b) => {
                f.write_str("h'")?;
                for byte in b {
                    write!(f, "{byte:02x}")?;
                }
                f.write_str("'")
            }
            Value::Text(s) => write!(f, "{s:?}"),
            Value::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Value::Map(pairs) => {
                f.write_str("{")?;
                for (i, (k, v)) in pairs.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{k}: {v}")?;
                }
                f.write_str("}")
            }
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<u16> for Value {
    fn from(n: u16) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Integer(i128::from(n))
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Bytes(b)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::Array(items)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_keys_sorted_length_first() {
        let map = Value::map(vec![
            (Value::text("abc"), Value::from(1u32)),
            (Value::text("b"), Value::from(2u32)),
            (Value::text("a"), Value::from(3u32)),
        ]);
        let keys: Vec<_> = map
            .as_map()
            .unwrap()
            .iter()
            .map(|(k, _)| k.as_text().unwrap().to_string())
            .collect();
        assert_eq!(keys, vec!["a", "b", "abc"]);
    }

    #[test]
    fn integer_keys_before_text_keys() {
        let map = Value::map(vec![
            (Value::text("a"), Value::Null),
            (Value::from(30u32), Value::Null),
            (Value::from(2u32), Value::Null),
        ]);
        let pairs = map.as_map().unwrap();
        assert_eq!(pairs[0].0, Value::Integer(2));
        // 30 and "a" both take two bytes; 0x18 sorts before 0x61
        assert_eq!(pairs[1].0, Value::Integer(30));
        assert_eq!(pairs[2].0, Value::text("a"));
    }

    #[test]
    fn negative_integers_sort_after_positive_of_same_width() {
        let mut values =
            vec![Value::Integer(-1), Value::Integer(3), Value::Integer(-2), Value::Integer(0)];
        values.sort_by(Value::cmp_canonical);
        assert_eq!(
            values,
            vec![Value::Integer(0), Value::Integer(3), Value::Integer(-1), Value::Integer(-2)]
        );
    }

    #[test]
    fn wide_integers_have_nine_byte_heads() {
        assert_eq!(Value::Integer(MAX_INTEGER).head(), (0, u64::MAX));
        assert_eq!(Value::Integer(MIN_INTEGER).head(), (1, u64::MAX));
    }

    #[test]
    fn numeric_accessors_check_range() {
        assert_eq!(Value::Integer(7).as_u64(), Some(7));
        assert_eq!(Value::Integer(-7).as_u64(), None);
        assert_eq!(Value::Integer(-7).as_i64(), Some(-7));
        assert_eq!(Value::Integer(MAX_INTEGER).as_i64(), None);
        assert_eq!(Value::Integer(MAX_INTEGER).as_u64(), Some(u64::MAX));
        assert_eq!(Value::text("7").as_u64(), None);
    }

    #[test]
    fn get_finds_any_key_type() {
        let map = Value::map(vec![
            (Value::from(1u32), Value::text("one")),
            (Value::text("two"), Value::from(2u32)),
        ]);
        assert_eq!(map.get(&Value::Integer(1)), Some(&Value::text("one")));
        assert_eq!(map.get(&Value::text("two")), Some(&Value::Integer(2)));
        assert_eq!(map.get(&Value::text("three")), None);
        assert_eq!(Value::Null.get(&Value::Integer(1)), None);
    }

    #[test]
    fn diagnostic_display() {
        let value = Value::map(vec![
            (Value::text("k"), Value::Array(vec![Value::Integer(-1), Value::Bytes(vec![0xab])])),
            (Value::from(0u32), Value::Null),
        ]);
        assert_eq!(value.to_string(), r#"{0: null, "k": [-1, h'ab']}"#);
    }

    #[test]
    fn option_conversion() {
        assert_eq!(Value::from(None::<u64>), Value::Null);
        assert_eq!(Value::from(Some(5u64)), Value::Integer(5));
    }
}
