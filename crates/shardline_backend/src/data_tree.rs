//! The data-tree collaborator and an in-memory engine.
//!
//! The backend never interprets node contents. It hands change sets to a
//! [`DataTree`] in three steps mirroring the commit phases: `validate`
//! (can-commit), `prepare` (pre-commit) and `apply` (commit).

use crate::error::DataTreeError;
use shardline_access::{DataNode, DataPath, LocalSnapshot, SnapshotSource, TransactionModification};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

/// Execution engine holding committed data.
pub trait DataTree: Send {
    /// Node at `path` in the committed state.
    fn read(&self, path: &DataPath) -> Option<DataNode>;

    /// Whether a node exists at `path` in the committed state.
    fn exists(&self, path: &DataPath) -> bool {
        self.read(path).is_some()
    }

    /// Checks that `modifications` could be applied to the current state.
    fn validate(&self, modifications: &[TransactionModification]) -> Result<(), DataTreeError>;

    /// Prepares `modifications` for commit.
    fn prepare(&mut self, modifications: &[TransactionModification]) -> Result<(), DataTreeError> {
        self.validate(modifications)
    }

    /// Applies `modifications` atomically.
    fn apply(&mut self, modifications: &[TransactionModification]) -> Result<(), DataTreeError>;

    /// A read-only view of the committed state for in-process frontends.
    fn snapshot(&self) -> Option<LocalSnapshot> {
        None
    }
}

/// Committed state of [`InMemoryDataTree`], shared with snapshots.
type Nodes = Arc<BTreeMap<DataPath, DataNode>>;

/// A data tree kept in a sorted map.
///
/// Nodes are addressed by their full path. Writing or deleting a path
/// replaces or removes everything below it as well; merging only touches
/// the node at the path itself.
///
/// Paths can be locked to make every phase touching them fail, which is how
/// conflicting writers are simulated.
#[derive(Debug, Default)]
pub struct InMemoryDataTree {
    nodes: Nodes,
    locked: BTreeSet<DataPath>,
    commits: u64,
}

impl InMemoryDataTree {
    /// Creates an empty tree.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of change sets applied so far.
    pub fn commit_count(&self) -> u64 {
        self.commits
    }

    /// Number of stored nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node is stored.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Makes every modification overlapping `path` conflict until unlocked.
    pub fn lock(&mut self, path: DataPath) {
        self.locked.insert(path);
    }

    /// Removes a lock set by [`InMemoryDataTree::lock`].
    pub fn unlock(&mut self, path: &DataPath) {
        self.locked.remove(path);
    }

    fn check_locks(&self, modifications: &[TransactionModification]) -> Result<(), DataTreeError> {
        for modification in modifications {
            let path = modification.path();
            if let Some(lock) = self.locked.iter().find(|l| l.contains(path) || path.contains(l)) {
                return Err(DataTreeError::Conflict { path: lock.to_string() });
            }
        }
        Ok(())
    }
}

impl DataTree for InMemoryDataTree {
    fn read(&self, path: &DataPath) -> Option<DataNode> {
        self.nodes.get(path).cloned()
    }

    fn validate(&self, modifications: &[TransactionModification]) -> Result<(), DataTreeError> {
        self.check_locks(modifications)
    }

    fn apply(&mut self, modifications: &[TransactionModification]) -> Result<(), DataTreeError> {
        self.check_locks(modifications)?;
        let nodes = Arc::make_mut(&mut self.nodes);
        for modification in modifications {
            match modification {
                TransactionModification::Write { path, data } => {
                    nodes.retain(|k, _| !path.contains(k));
                    nodes.insert(path.clone(), data.clone());
                }
                TransactionModification::Merge { path, data } => {
                    let merged = match nodes.get(path) {
                        Some(existing) => existing.merge(data),
                        None => data.clone(),
                    };
                    nodes.insert(path.clone(), merged);
                }
                TransactionModification::Delete { path } => {
                    nodes.retain(|k, _| !path.contains(k));
                }
            }
        }
        self.commits += 1;
        Ok(())
    }

    fn snapshot(&self) -> Option<LocalSnapshot> {
        Some(LocalSnapshot::new(Arc::new(TreeSnapshot(Arc::clone(&self.nodes)))))
    }
}

/// Frozen committed state handed out by [`InMemoryDataTree::snapshot`].
struct TreeSnapshot(Nodes);

impl SnapshotSource for TreeSnapshot {
    fn read(&self, path: &DataPath) -> Option<DataNode> {
        self.0.get(path).cloned()
    }
}

/// Reads `path` as it would look after `modifications` were applied on top
/// of the committed `base` node.
pub(crate) fn read_through(
    base: Option<DataNode>,
    path: &DataPath,
    modifications: &[TransactionModification],
) -> Option<DataNode> {
    modifications.iter().fold(base, |node, modification| match modification {
        TransactionModification::Write { path: p, data } if p == path => Some(data.clone()),
        TransactionModification::Write { path: p, .. } | TransactionModification::Delete { path: p }
            if p.contains(path) =>
        {
            None
        }
        TransactionModification::Merge { path: p, data } if p == path => Some(match node {
            Some(existing) => existing.merge(data),
            None => data.clone(),
        }),
        _ => node,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use shardline_codec::Value;

    fn path(s: &str) -> DataPath {
        s.parse().unwrap()
    }

    fn write(p: &str, v: u64) -> TransactionModification {
        TransactionModification::Write { path: path(p), data: DataNode::new(v) }
    }

    #[test]
    fn write_replaces_subtree() {
        let mut tree = InMemoryDataTree::new();
        tree.apply(&[write("/a/b", 1), write("/a/c", 2), write("/ab", 3)]).unwrap();
        assert_eq!(tree.len(), 3);

        tree.apply(&[write("/a", 4)]).unwrap();
        assert_eq!(tree.read(&path("/a")), Some(DataNode::new(4u64)));
        assert!(!tree.exists(&path("/a/b")));
        assert!(tree.exists(&path("/ab")));
        assert_eq!(tree.commit_count(), 2);
    }

    #[test]
    fn merge_combines_maps() {
        let mut tree = InMemoryDataTree::new();
        let first = DataNode::new(Value::map(vec![(Value::text("x"), Value::from(1u64))]));
        let second = DataNode::new(Value::map(vec![(Value::text("y"), Value::from(2u64))]));
        tree.apply(&[TransactionModification::Merge { path: path("/m"), data: first }]).unwrap();
        tree.apply(&[TransactionModification::Merge { path: path("/m"), data: second }]).unwrap();

        let merged = tree.read(&path("/m")).unwrap();
        assert_eq!(merged.value().as_map().map(<[_]>::len), Some(2));
    }

    #[test]
    fn delete_removes_subtree() {
        let mut tree = InMemoryDataTree::new();
        tree.apply(&[write("/a", 1), write("/a/b", 2), write("/c", 3)]).unwrap();
        tree.apply(&[TransactionModification::Delete { path: path("/a") }]).unwrap();
        assert_eq!(tree.len(), 1);
        assert!(tree.exists(&path("/c")));
    }

    #[test]
    fn locked_paths_conflict() {
        let mut tree = InMemoryDataTree::new();
        tree.lock(path("/a"));

        let err = tree.validate(&[write("/a/b", 1)]).unwrap_err();
        assert_eq!(err, DataTreeError::Conflict { path: "/a".into() });
        assert!(tree.apply(&[write("/", 1)]).is_err());
        assert!(tree.validate(&[write("/b", 1)]).is_ok());

        tree.unlock(&path("/a"));
        assert!(tree.prepare(&[write("/a/b", 1)]).is_ok());
    }

    #[test]
    fn snapshot_is_frozen() {
        let mut tree = InMemoryDataTree::new();
        tree.apply(&[write("/a", 1)]).unwrap();
        let snapshot = tree.snapshot().unwrap();

        tree.apply(&[write("/a", 2)]).unwrap();
        assert_eq!(snapshot.read(&path("/a")), Some(DataNode::new(1u64)));
        assert_eq!(tree.read(&path("/a")), Some(DataNode::new(2u64)));
    }

    #[test]
    fn read_through_pending_modifications() {
        let base = Some(DataNode::new(1u64));
        let mods = vec![write("/a", 2)];
        assert_eq!(read_through(base.clone(), &path("/a"), &mods), Some(DataNode::new(2u64)));
        assert_eq!(read_through(base.clone(), &path("/b"), &mods), base);

        let mods = vec![write("/a", 2), TransactionModification::Delete { path: path("/") }];
        assert_eq!(read_through(base, &path("/a"), &mods), None);
    }
}
