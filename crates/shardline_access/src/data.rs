//! Data paths and nodes exchanged with the data tree.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use shardline_codec::Value;

use crate::error::InvalidPathError;

/// Absolute path into the data tree, as a list of segments.
///
/// The empty list is the root. Segments are non-empty and never contain `/`,
/// so every path has an unambiguous joined text form.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DataPath {
    segments: Vec<String>,
}

impl DataPath {
    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    /// Build a path from segments.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPathError`] for an empty segment or one containing `/`.
    pub fn from_segments<I, S>(segments: I) -> Result<Self, InvalidPathError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        for segment in &segments {
            if segment.is_empty() || segment.contains('/') {
                return Err(InvalidPathError {
                    path: segments.join("/"),
                    reason: "segments must be non-empty and must not contain '/'",
                });
            }
        }
        Ok(Self { segments })
    }

    /// Path segments, outermost first.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Whether this is the root.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Extend by one segment.
    ///
    /// # Errors
    ///
    /// Same rules as [`DataPath::from_segments`].
    pub fn child(&self, segment: impl Into<String>) -> Result<Self, InvalidPathError> {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self::from_segments(segments)
    }

    /// Parent path, `None` for the root.
    pub fn parent(&self) -> Option<Self> {
        let (_, rest) = self.segments.split_last()?;
        Some(Self { segments: rest.to_vec() })
    }

    /// Whether `other` equals this path or lies below it.
    pub fn contains(&self, other: &DataPath) -> bool {
        other.segments.starts_with(&self.segments)
    }
}

impl FromStr for DataPath {
    type Err = InvalidPathError;

    /// Parse the joined form, e.g. `/network/nodes`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some(rest) = s.strip_prefix('/') else {
            return Err(InvalidPathError {
                path: s.to_string(),
                reason: "must start with '/'",
            });
        };
        if rest.is_empty() {
            return Ok(Self::root());
        }
        Self::from_segments(rest.split('/')).map_err(|e| InvalidPathError {
            path: s.to_string(),
            reason: e.reason,
        })
    }
}

impl fmt::Display for DataPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.segments.is_empty() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{segment}")?;
        }
        Ok(())
    }
}

/// A data-tree node: an arbitrary CBOR value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataNode(Value);

impl DataNode {
    /// Wrap a value.
    pub fn new(value: impl Into<Value>) -> Self {
        Self(value.into())
    }

    /// Borrow the value.
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Unwrap the value.
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Merge `other` into this node.
    ///
    /// Two maps merge key by key, recursively; anything else is replaced.
    #[must_use]
    pub fn merge(&self, other: &DataNode) -> DataNode {
        DataNode(merge_values(&self.0, &other.0))
    }
}

fn merge_values(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Map(left), Value::Map(right)) => {
            let mut pairs = left.clone();
            for (key, value) in right {
                match pairs.iter_mut().find(|(k, _)| k == key) {
                    Some((_, existing)) => *existing = merge_values(existing, value),
                    None => pairs.push((key.clone(), value.clone())),
                }
            }
            Value::map(pairs)
        }
        _ => overlay.clone(),
    }
}

/// Read access to a committed state of the data tree.
pub trait SnapshotSource: Send + Sync {
    /// Node at `path`, if any.
    fn read(&self, path: &DataPath) -> Option<DataNode>;

    /// Whether a node exists at `path`.
    fn exists(&self, path: &DataPath) -> bool {
        self.read(path).is_some()
    }
}

/// A shareable handle to a data-tree snapshot.
///
/// Only handed out to frontends living in the same process as the backend.
/// Handles compare by identity.
#[derive(Clone)]
pub struct LocalSnapshot(Arc<dyn SnapshotSource>);

impl LocalSnapshot {
    /// Wrap a snapshot source.
    pub fn new(source: Arc<dyn SnapshotSource>) -> Self {
        Self(source)
    }

    /// Node at `path`, if any.
    pub fn read(&self, path: &DataPath) -> Option<DataNode> {
        self.0.read(path)
    }

    /// Whether a node exists at `path`.
    pub fn exists(&self, path: &DataPath) -> bool {
        self.0.exists(path)
    }
}

impl PartialEq for LocalSnapshot {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl Eq for LocalSnapshot {}

impl fmt::Debug for LocalSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("LocalSnapshot(..)")
    }
}
