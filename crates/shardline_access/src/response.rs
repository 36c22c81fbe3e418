//! Responses: successes per target kind, and the single failure envelope.

use crate::abi::AbiVersion;
use crate::data::{DataNode, LocalSnapshot};
use crate::envelope::{ActorAddress, RequestTarget, ResponseHeader};
use crate::exception::RequestException;
use crate::identifiers::{ClientIdentifier, LocalHistoryIdentifier, TransactionIdentifier};

/// Reply to a successful connect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectClientSuccess {
    /// Envelope, tagged with the negotiated version.
    pub header: ResponseHeader<ClientIdentifier>,
    /// Address of the answering backend.
    pub backend: ActorAddress,
    /// Other replicas of the shard.
    pub alternates: Vec<ActorAddress>,
    /// In-process snapshot of the data tree. Never serialized.
    pub data_tree_snapshot: Option<LocalSnapshot>,
    /// Maximum number of unacknowledged requests per channel.
    pub max_messages: u32,
}

/// Reply to a history lifecycle request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalHistorySuccess {
    /// Envelope.
    pub header: ResponseHeader<LocalHistoryIdentifier>,
}

/// Payload of a transaction success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionSuccessPayload {
    /// Modifications accepted.
    Modify,
    /// Read result.
    Read {
        /// Node at the requested path.
        data: Option<DataNode>,
    },
    /// Exists result.
    Exists {
        /// Whether the node exists.
        exists: bool,
    },
    /// Can-commit phase passed.
    CanCommit,
    /// Pre-commit phase passed.
    PreCommit,
    /// Transaction committed.
    Commit,
    /// Transaction aborted.
    Abort,
    /// Bookkeeping dropped.
    Purge,
    /// Skipped transactions recorded.
    SkipTransactions,
}

/// Reply to a successful transaction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionSuccess {
    /// Envelope.
    pub header: ResponseHeader<TransactionIdentifier>,
    /// Result.
    pub payload: TransactionSuccessPayload,
}

impl TransactionSuccess {
    /// Response kind name.
    pub fn kind(&self) -> &'static str {
        match self.payload {
            TransactionSuccessPayload::Modify => "ModifyTransactionSuccess",
            TransactionSuccessPayload::Read { .. } => "ReadTransactionSuccess",
            TransactionSuccessPayload::Exists { .. } => "ExistsTransactionSuccess",
            TransactionSuccessPayload::CanCommit => "TransactionCanCommitSuccess",
            TransactionSuccessPayload::PreCommit => "TransactionPreCommitSuccess",
            TransactionSuccessPayload::Commit => "TransactionCommitSuccess",
            TransactionSuccessPayload::Abort => "TransactionAbortSuccess",
            TransactionSuccessPayload::Purge => "TransactionPurgeResponse",
            TransactionSuccessPayload::SkipTransactions => "SkipTransactionsResponse",
        }
    }
}

/// Any success.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestSuccess {
    /// Connect accepted.
    Connect(ConnectClientSuccess),
    /// History operation done.
    History(LocalHistorySuccess),
    /// Transaction operation done.
    Transaction(TransactionSuccess),
}

/// Rejection of a request, carrying exactly one cause.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestFailure {
    /// Envelope.
    pub header: ResponseHeader<RequestTarget>,
    /// Why the request failed.
    pub cause: RequestException,
}

impl RequestFailure {
    /// Create a failure.
    pub fn new(
        target: RequestTarget,
        sequence: u64,
        version: AbiVersion,
        cause: RequestException,
    ) -> Self {
        Self {
            header: ResponseHeader {
                target,
                sequence,
                version,
            },
            cause,
        }
    }

    /// Whether the failure is terminal for the target.
    pub fn is_hard_failure(&self) -> bool {
        !self.cause.is_retriable()
    }

    /// Response kind name, derived from the target kind.
    pub fn kind(&self) -> &'static str {
        match self.header.target {
            RequestTarget::Client(_) => "ConnectClientFailure",
            RequestTarget::History(_) => "LocalHistoryFailure",
            RequestTarget::Transaction(_) => "TransactionFailure",
        }
    }
}

/// Any response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// Success.
    Success(RequestSuccess),
    /// Failure.
    Failure(RequestFailure),
}

impl Response {
    /// Response kind name.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success(RequestSuccess::Connect(_)) => "ConnectClientSuccess",
            Self::Success(RequestSuccess::History(_)) => "LocalHistorySuccess",
            Self::Success(RequestSuccess::Transaction(success)) => success.kind(),
            Self::Failure(failure) => failure.kind(),
        }
    }

    /// Target of the answered request.
    pub fn target(&self) -> RequestTarget {
        match self {
            Self::Success(RequestSuccess::Connect(s)) => {
                RequestTarget::Client(s.header.target.clone())
            }
            Self::Success(RequestSuccess::History(s)) => {
                RequestTarget::History(s.header.target.clone())
            }
            Self::Success(RequestSuccess::Transaction(s)) => {
                RequestTarget::Transaction(s.header.target.clone())
            }
            Self::Failure(f) => f.header.target.clone(),
        }
    }

    /// Sequence of the answered request.
    pub fn sequence(&self) -> u64 {
        match self {
            Self::Success(RequestSuccess::Connect(s)) => s.header.sequence,
            Self::Success(RequestSuccess::History(s)) => s.header.sequence,
            Self::Success(RequestSuccess::Transaction(s)) => s.header.sequence,
            Self::Failure(f) => f.header.sequence,
        }
    }

    /// Version the response is encoded with.
    pub fn version(&self) -> AbiVersion {
        match self {
            Self::Success(RequestSuccess::Connect(s)) => s.header.version,
            Self::Success(RequestSuccess::History(s)) => s.header.version,
            Self::Success(RequestSuccess::Transaction(s)) => s.header.version,
            Self::Failure(f) => f.header.version,
        }
    }

    /// The failure, if this is one.
    pub fn as_failure(&self) -> Option<&RequestFailure> {
        match self {
            Self::Failure(f) => Some(f),
            Self::Success(_) => None,
        }
    }

    /// Transaction success payload, if this is one.
    pub fn transaction_payload(&self) -> Option<&TransactionSuccessPayload> {
        match self {
            Self::Success(RequestSuccess::Transaction(s)) => Some(&s.payload),
            _ => None,
        }
    }
}

impl From<RequestFailure> for Response {
    fn from(failure: RequestFailure) -> Self {
        Self::Failure(failure)
    }
}

impl From<TransactionSuccess> for Response {
    fn from(success: TransactionSuccess) -> Self {
        Self::Success(RequestSuccess::Transaction(success))
    }
}

impl From<LocalHistorySuccess> for Response {
    fn from(success: LocalHistorySuccess) -> Self {
        Self::Success(RequestSuccess::History(success))
    }
}

impl From<ConnectClientSuccess> for Response {
    fn from(success: ConnectClientSuccess) -> Self {
        Self::Success(RequestSuccess::Connect(success))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifiers::FrontendIdentifier;

    fn client() -> ClientIdentifier {
        ClientIdentifier::new(FrontendIdentifier::parse("m", "t").unwrap(), 1)
    }

    #[test]
    fn failure_kind_follows_target() {
        let failure = RequestFailure::new(
            RequestTarget::Client(client()),
            0,
            AbiVersion::Boron,
            RequestException::runtime("no common version", None),
        );
        assert_eq!(failure.kind(), "ConnectClientFailure");
        assert!(failure.is_hard_failure());
        let response = Response::from(failure);
        assert_eq!(response.kind(), "ConnectClientFailure");
        assert_eq!(response.version(), AbiVersion::Boron);
    }

    #[test]
    fn retriable_failure_is_not_hard() {
        let history = LocalHistoryIdentifier::new(client(), 4);
        let failure = RequestFailure::new(
            history.into(),
            2,
            AbiVersion::current(),
            RequestException::UnknownHistory { last_known: Some(3) },
        );
        assert!(!failure.is_hard_failure());
        assert_eq!(failure.kind(), "LocalHistoryFailure");
    }

    #[test]
    fn success_accessors() {
        let tx = TransactionIdentifier::new(LocalHistoryIdentifier::standalone(client()), 1);
        let response: Response = TransactionSuccess {
            header: ResponseHeader {
                target: tx.clone(),
                sequence: 5,
                version: AbiVersion::SodiumSr1,
            },
            payload: TransactionSuccessPayload::Exists { exists: true },
        }
        .into();
        assert_eq!(response.kind(), "ExistsTransactionSuccess");
        assert_eq!(response.sequence(), 5);
        assert_eq!(response.target(), RequestTarget::Transaction(tx));
        assert!(response.as_failure().is_none());
        assert_eq!(
            response.transaction_payload(),
            Some(&TransactionSuccessPayload::Exists { exists: true })
        );
    }
}
