//! Requests: one closed union per target kind.

use crate::abi::AbiVersion;
use crate::data::DataPath;
use crate::envelope::{ReplyTo, RequestHeader, RequestTarget};
use crate::exception::RequestException;
use crate::identifiers::{ClientIdentifier, LocalHistoryIdentifier, TransactionIdentifier};
use crate::modification::{PersistenceProtocol, TransactionModification};
use crate::response::RequestFailure;

/// Opens a logical connection and negotiates the ABI version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectClientRequest {
    /// Envelope.
    pub header: RequestHeader<ClientIdentifier>,
    /// Oldest version the frontend can speak.
    pub min_version: AbiVersion,
    /// Newest version the frontend can speak.
    pub max_version: AbiVersion,
}

impl ConnectClientRequest {
    /// Connect request for the version range `[min, max]`.
    ///
    /// The request itself is tagged with `min` so any backend that can
    /// talk to this frontend at all can decode it.
    pub fn new(
        client: ClientIdentifier,
        sequence: u64,
        reply_to: ReplyTo,
        min: AbiVersion,
        max: AbiVersion,
    ) -> Self {
        Self {
            header: RequestHeader {
                target: client,
                sequence,
                reply_to,
                version: min,
            },
            min_version: min,
            max_version: max,
        }
    }
}

/// History lifecycle operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryOperation {
    /// Register the history.
    Create,
    /// Close the history to new transactions.
    Destroy,
    /// Drop all bookkeeping for a destroyed history.
    Purge,
}

/// A request addressed to a local history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHistoryRequest {
    /// Envelope.
    pub header: RequestHeader<LocalHistoryIdentifier>,
    /// Operation to perform.
    pub operation: HistoryOperation,
}

impl LocalHistoryRequest {
    /// Request kind name.
    pub fn kind(&self) -> &'static str {
        match self.operation {
            HistoryOperation::Create => "CreateLocalHistoryRequest",
            HistoryOperation::Destroy => "DestroyLocalHistoryRequest",
            HistoryOperation::Purge => "PurgeLocalHistoryRequest",
        }
    }
}

/// Payload of a transaction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionPayload {
    /// Apply modifications, optionally finishing with a protocol step.
    Modify {
        /// Ordered modifications.
        modifications: Vec<TransactionModification>,
        /// `None` keeps the transaction open.
        protocol: Option<PersistenceProtocol>,
    },
    /// Read a subtree.
    Read {
        /// Path to read.
        path: DataPath,
        /// Serve from the last committed snapshot only.
        snapshot_only: bool,
    },
    /// Test for existence of a node.
    Exists {
        /// Path to test.
        path: DataPath,
        /// Serve from the last committed snapshot only.
        snapshot_only: bool,
    },
    /// Second commit phase.
    PreCommit,
    /// Final commit phase.
    DoCommit,
    /// Abort the transaction.
    Abort,
    /// Drop backend bookkeeping for a finished transaction.
    Purge,
    /// Declare transactions that will never be materialized. The target is
    /// the first of them.
    SkipTransactions {
        /// Further transaction ids in the target's history.
        others: Vec<u64>,
    },
    /// In-process abort; never serialized.
    AbortLocal,
    /// In-process commit of a complete change set; never serialized.
    CommitLocal {
        /// The complete change set.
        modifications: Vec<TransactionModification>,
        /// Three-phase when true, simple otherwise.
        coordinated: bool,
    },
}

/// A request addressed to a transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionRequest {
    /// Envelope.
    pub header: RequestHeader<TransactionIdentifier>,
    /// Operation to perform.
    pub payload: TransactionPayload,
}

impl TransactionRequest {
    /// Create a request at the current ABI version.
    pub fn new(
        target: TransactionIdentifier,
        sequence: u64,
        reply_to: ReplyTo,
        payload: TransactionPayload,
    ) -> Self {
        Self {
            header: RequestHeader::new(target, sequence, reply_to),
            payload,
        }
    }

    /// Request kind name.
    pub fn kind(&self) -> &'static str {
        match self.payload {
            TransactionPayload::Modify { .. } => "ModifyTransactionRequest",
            TransactionPayload::Read { .. } => "ReadTransactionRequest",
            TransactionPayload::Exists { .. } => "ExistsTransactionRequest",
            TransactionPayload::PreCommit => "TransactionPreCommitRequest",
            TransactionPayload::DoCommit => "TransactionDoCommitRequest",
            TransactionPayload::Abort => "TransactionAbortRequest",
            TransactionPayload::Purge => "TransactionPurgeRequest",
            TransactionPayload::SkipTransactions { .. } => "SkipTransactionsRequest",
            TransactionPayload::AbortLocal => "AbortLocalTransactionRequest",
            TransactionPayload::CommitLocal { .. } => "CommitLocalTransactionRequest",
        }
    }

    /// Whether this request only exists in local memory.
    pub fn is_local(&self) -> bool {
        matches!(
            self.payload,
            TransactionPayload::AbortLocal | TransactionPayload::CommitLocal { .. }
        )
    }

    /// For a skip request, every named transaction id including the target.
    pub fn skipped_ids(&self) -> Vec<u64> {
        match &self.payload {
            TransactionPayload::SkipTransactions { others } => {
                std::iter::once(self.header.target.transaction_id())
                    .chain(others.iter().copied())
                    .collect()
            }
            _ => Vec::new(),
        }
    }
}

/// Any request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Client connect.
    Connect(ConnectClientRequest),
    /// History lifecycle.
    History(LocalHistoryRequest),
    /// Transaction operation.
    Transaction(TransactionRequest),
}

impl Request {
    /// Request kind name, e.g. `ModifyTransactionRequest`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connect(_) => "ConnectClientRequest",
            Self::History(request) => request.kind(),
            Self::Transaction(request) => request.kind(),
        }
    }

    /// Addressed identifier.
    pub fn target(&self) -> RequestTarget {
        match self {
            Self::Connect(request) => RequestTarget::Client(request.header.target.clone()),
            Self::History(request) => RequestTarget::History(request.header.target.clone()),
            Self::Transaction(request) => RequestTarget::Transaction(request.header.target.clone()),
        }
    }

    /// Sequence number.
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Connect(request) => request.header.sequence,
            Self::History(request) => request.header.sequence,
            Self::Transaction(request) => request.header.sequence,
        }
    }

    /// ABI version tag.
    pub fn version(&self) -> AbiVersion {
        match self {
            Self::Connect(request) => request.header.version,
            Self::History(request) => request.header.version,
            Self::Transaction(request) => request.header.version,
        }
    }

    /// Reply routing.
    pub fn reply_to(&self) -> ReplyTo {
        match self {
            Self::Connect(request) => request.header.reply_to,
            Self::History(request) => request.header.reply_to,
            Self::Transaction(request) => request.header.reply_to,
        }
    }

    /// Whether this request only exists in local memory.
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Transaction(request) if request.is_local())
    }

    /// Same content, tagged for `version`.
    ///
    /// Local-only requests never cross a version boundary and are returned
    /// unchanged.
    #[must_use]
    pub fn clone_as_version(&self, version: AbiVersion) -> Self {
        let mut copy = self.clone();
        match &mut copy {
            Self::Transaction(request) if request.is_local() => {}
            Self::Transaction(request) => request.header.version = version,
            Self::Connect(request) => request.header.version = version,
            Self::History(request) => request.header.version = version,
        }
        copy
    }

    /// Failure reply for this request with the given cause.
    pub fn to_failure(&self, cause: RequestException) -> RequestFailure {
        RequestFailure::new(self.target(), self.sequence(), self.version(), cause)
    }
}

impl From<ConnectClientRequest> for Request {
    fn from(request: ConnectClientRequest) -> Self {
        Self::Connect(request)
    }
}

impl From<LocalHistoryRequest> for Request {
    fn from(request: LocalHistoryRequest) -> Self {
        Self::History(request)
    }
}

impl From<TransactionRequest> for Request {
    fn from(request: TransactionRequest) -> Self {
        Self::Transaction(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::FrontendIdentifier;

    fn tx() -> TransactionIdentifier {
        let client = ClientIdentifier::new(FrontendIdentifier::parse("alice", "test").unwrap(), 0);
        TransactionIdentifier::new(LocalHistoryIdentifier::standalone(client), 3)
    }

    #[test]
    fn clone_as_version_leaves_original_alone() {
        let original: Request =
            TransactionRequest::new(tx(), 2, ReplyTo::new(1, 1), TransactionPayload::Purge).into();
        let copy = original.clone_as_version(AbiVersion::Boron);
        assert_eq!(original.version(), AbiVersion::current());
        assert_eq!(copy.version(), AbiVersion::Boron);
        assert_eq!(copy.sequence(), original.sequence());
        assert_eq!(copy.target(), original.target());
    }

    #[test]
    fn clone_as_version_is_identity_for_local_requests() {
        let local: Request =
            TransactionRequest::new(tx(), 0, ReplyTo::default(), TransactionPayload::AbortLocal)
                .into();
        assert!(local.is_local());
        assert_eq!(local.clone_as_version(AbiVersion::Boron), local);
    }

    #[test]
    fn to_failure_keeps_target_and_sequence() {
        let request: Request =
            TransactionRequest::new(tx(), 9, ReplyTo::default(), TransactionPayload::DoCommit)
                .into();
        let failure = request.to_failure(RequestException::ClosedTransaction { successful: false });
        assert_eq!(failure.header.target, request.target());
        assert_eq!(failure.header.sequence, 9);
        assert!(failure.is_hard_failure());
    }

    #[test]
    fn connect_is_tagged_with_min_version() {
        let client = tx().history().client().clone();
        let connect = ConnectClientRequest::new(
            client,
            0,
            ReplyTo::default(),
            AbiVersion::NeonSr2,
            AbiVersion::Magnesium,
        );
        assert_eq!(connect.header.version, AbiVersion::NeonSr2);
        assert_eq!(Request::from(connect).kind(), "ConnectClientRequest");
    }

    #[test]
    fn skipped_ids_include_target() {
        let request = TransactionRequest::new(
            tx(),
            0,
            ReplyTo::default(),
            TransactionPayload::SkipTransactions { others: vec![5, 4] },
        );
        assert_eq!(request.skipped_ids(), vec![3, 5, 4]);
    }
}
