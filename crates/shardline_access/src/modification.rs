//! Transaction modifications and persistence protocols.

use crate::data::{DataNode, DataPath};

/// One change to the data tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionModification {
    /// Replace the subtree at `path`.
    Write {
        /// Target path.
        path: DataPath,
        /// New content.
        data: DataNode,
    },
    /// Merge into the subtree at `path`.
    Merge {
        /// Target path.
        path: DataPath,
        /// Content to merge.
        data: DataNode,
    },
    /// Remove the subtree at `path`.
    Delete {
        /// Target path.
        path: DataPath,
    },
}

impl TransactionModification {
    /// Path touched by this modification.
    pub fn path(&self) -> &DataPath {
        match self {
            Self::Write { path, .. } | Self::Merge { path, .. } | Self::Delete { path } => path,
        }
    }

    /// Payload, if the kind carries one.
    pub fn data(&self) -> Option<&DataNode> {
        match self {
            Self::Write { data, .. } | Self::Merge { data, .. } => Some(data),
            Self::Delete { .. } => None,
        }
    }

    /// Wire code of the modification kind.
    pub(crate) fn kind_code(&self) -> u8 {
        match self {
            Self::Write { .. } => 1,
            Self::Merge { .. } => 2,
            Self::Delete { .. } => 3,
        }
    }
}

/// How the backend should persist a batch of modifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PersistenceProtocol {
    /// Discard the transaction.
    Abort,
    /// Commit without a prepare phase.
    Simple,
    /// Run can-commit, pre-commit and do-commit.
    ThreePhase,
    /// Seal the transaction and wait for a later commit decision.
    Ready,
}

impl PersistenceProtocol {
    /// Wire code.
    pub fn to_code(self) -> u8 {
        match self {
            Self::Abort => 1,
            Self::Simple => 2,
            Self::ThreePhase => 3,
            Self::Ready => 4,
        }
    }

    /// Parse a wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Abort),
            2 => Some(Self::Simple),
            3 => Some(Self::ThreePhase),
            4 => Some(Self::Ready),
            _ => None,
        }
    }

    /// Commit protocol for a coordinated or uncoordinated commit.
    pub fn for_commit(coordinated: bool) -> Self {
        if coordinated {
            Self::ThreePhase
        } else {
            Self::Simple
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_codes() {
        for protocol in [
            PersistenceProtocol::Abort,
            PersistenceProtocol::Simple,
            PersistenceProtocol::ThreePhase,
            PersistenceProtocol::Ready,
        ] {
            assert_eq!(PersistenceProtocol::from_code(protocol.to_code()), Some(protocol));
        }
        assert_eq!(PersistenceProtocol::from_code(0), None);
        assert_eq!(PersistenceProtocol::from_code(5), None);
    }

    #[test]
    fn commit_protocol_choice() {
        assert_eq!(PersistenceProtocol::for_commit(true), PersistenceProtocol::ThreePhase);
        assert_eq!(PersistenceProtocol::for_commit(false), PersistenceProtocol::Simple);
    }

    #[test]
    fn accessors() {
        let path: DataPath = "/a".parse().unwrap();
        let delete = TransactionModification::Delete { path: path.clone() };
        assert_eq!(delete.path(), &path);
        assert!(delete.data().is_none());
        let write = TransactionModification::Write {
            path,
            data: DataNode::new(1u64),
        };
        assert_eq!(write.data(), Some(&DataNode::new(1u64)));
    }
}
