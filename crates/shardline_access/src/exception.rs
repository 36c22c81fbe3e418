//! Protocol failure causes carried inside [`RequestFailure`](crate::RequestFailure).

use std::fmt;

use crate::envelope::ActorAddress;
use crate::ranges::RangeSet;

/// A closed set of protocol-level failure causes.
///
/// Each kind has a fixed retriable flag, except [`RuntimeRequestException`]
/// where the raiser decides. The `Display` text is part of the contract and
/// must not change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestException {
    /// The sequence number did not match the next expected one.
    OutOfOrder {
        /// Sequence the backend expects next.
        expected: u64,
    },
    /// The backend has no record of the history.
    UnknownHistory {
        /// Highest history id the backend knows for the client.
        last_known: Option<u64>,
    },
    /// The history was purged.
    DeadHistory {
        /// Purged history ids.
        purged: RangeSet,
    },
    /// The transaction was purged.
    DeadTransaction {
        /// Purged transaction ids.
        purged: RangeSet,
    },
    /// The transaction already finished.
    ClosedTransaction {
        /// Whether it finished by committing.
        successful: bool,
    },
    /// The addressed replica is not the shard leader.
    NotLeader {
        /// Address of the replica that received the request.
        actor: ActorAddress,
    },
    /// A newer generation of the same frontend has connected.
    RetiredGeneration {
        /// The generation that replaced the sender's.
        new_generation: u64,
    },
    /// The backend does not handle this kind of request here.
    UnsupportedRequest {
        /// Request kind.
        kind: String,
    },
    /// Wrapper for unexpected backend errors.
    Runtime(RuntimeRequestException),
}

impl RequestException {
    /// Whether the frontend may resolve this by resending the request.
    pub fn is_retriable(&self) -> bool {
        match self {
            Self::UnknownHistory { .. } => true,
            Self::Runtime(runtime) => runtime.retriable,
            Self::OutOfOrder { .. }
            | Self::DeadHistory { .. }
            | Self::DeadTransaction { .. }
            | Self::ClosedTransaction { .. }
            | Self::NotLeader { .. }
            | Self::RetiredGeneration { .. }
            | Self::UnsupportedRequest { .. } => false,
        }
    }

    /// Short kind name, e.g. `OutOfOrderRequestException`.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OutOfOrder { .. } => "OutOfOrderRequestException",
            Self::UnknownHistory { .. } => "UnknownHistoryException",
            Self::DeadHistory { .. } => "DeadHistoryException",
            Self::DeadTransaction { .. } => "DeadTransactionException",
            Self::ClosedTransaction { .. } => "ClosedTransactionException",
            Self::NotLeader { .. } => "NotLeaderException",
            Self::RetiredGeneration { .. } => "RetiredGenerationException",
            Self::UnsupportedRequest { .. } => "UnsupportedRequestException",
            Self::Runtime(_) => "RuntimeRequestException",
        }
    }

    /// Non-retriable runtime failure.
    pub fn runtime(message: impl Into<String>, cause: Option<String>) -> Self {
        Self::Runtime(RuntimeRequestException::new(message, cause))
    }
}

impl fmt::Display for RequestException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OutOfOrder { expected } => write!(f, "Expecting request {expected}"),
            Self::UnknownHistory { last_known: Some(n) } => write!(f, "Last known history is {n}"),
            Self::UnknownHistory { last_known: None } => f.write_str("Last known history is null"),
            Self::DeadHistory { purged } => write!(f, "Histories {purged} have been purged"),
            Self::DeadTransaction { purged } => write!(f, "Transactions {purged} have been purged"),
            Self::ClosedTransaction { successful: true } => {
                f.write_str("Transaction has been committed")
            }
            Self::ClosedTransaction { successful: false } => {
                f.write_str("Transaction has been aborted")
            }
            Self::NotLeader { actor } => write!(f, "Actor {actor} is not the current leader"),
            Self::RetiredGeneration { new_generation } => {
                write!(f, "Originating generation was superseded by {new_generation}")
            }
            Self::UnsupportedRequest { kind } => write!(f, "Unsupported request {kind}"),
            Self::Runtime(runtime) => f.write_str(&runtime.message),
        }
    }
}

impl std::error::Error for RequestException {}

/// An unexpected backend error, wrapped so peers never need to know its type.
///
/// The cause is diagnostic text only and takes no part in equality.
#[derive(Debug, Clone, Eq)]
pub struct RuntimeRequestException {
    /// Message shown to the frontend.
    pub message: String,
    /// Diagnostic cause.
    pub cause: Option<String>,
    /// Whether resending may succeed.
    pub retriable: bool,
}

impl RuntimeRequestException {
    /// Non-retriable wrapper.
    pub fn new(message: impl Into<String>, cause: Option<String>) -> Self {
        Self {
            message: message.into(),
            cause,
            retriable: false,
        }
    }

    /// Mark the failure retriable.
    #[must_use]
    pub fn retriable(mut self) -> Self {
        self.retriable = true;
        self
    }
}

impl PartialEq for RuntimeRequestException {
    fn eq(&self, other: &Self) -> bool {
        self.message == other.message && self.retriable == other.retriable
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retriable_flags() {
        assert!(RequestException::UnknownHistory { last_known: None }.is_retriable());
        assert!(!RequestException::OutOfOrder { expected: 1 }.is_retriable());
        assert!(!RequestException::ClosedTransaction { successful: true }.is_retriable());
        assert!(!RequestException::NotLeader { actor: ActorAddress::new("a") }.is_retriable());
        assert!(!RequestException::runtime("boom", None).is_retriable());
        let busy = RuntimeRequestException::new("busy", None).retriable();
        assert!(RequestException::Runtime(busy).is_retriable());
    }

    #[test]
    fn messages() {
        let purged: RangeSet = [1, 2, 3, 8].into_iter().collect();
        let cases = [
            (RequestException::OutOfOrder { expected: 4 }, "Expecting request 4"),
            (RequestException::UnknownHistory { last_known: Some(2) }, "Last known history is 2"),
            (RequestException::UnknownHistory { last_known: None }, "Last known history is null"),
            (
                RequestException::DeadHistory { purged: purged.clone() },
                "Histories [1..3, 8..8] have been purged",
            ),
            (
                RequestException::DeadTransaction { purged },
                "Transactions [1..3, 8..8] have been purged",
            ),
            (
                RequestException::ClosedTransaction { successful: true },
                "Transaction has been committed",
            ),
            (
                RequestException::ClosedTransaction { successful: false },
                "Transaction has been aborted",
            ),
            (
                RequestException::NotLeader { actor: ActorAddress::new("shard-a@member-2") },
                "Actor shard-a@member-2 is not the current leader",
            ),
            (
                RequestException::RetiredGeneration { new_generation: 7 },
                "Originating generation was superseded by 7",
            ),
            (
                RequestException::UnsupportedRequest { kind: "ReadTransactionRequest".into() },
                "Unsupported request ReadTransactionRequest",
            ),
            (RequestException::runtime("Commit failed", Some("disk".into())), "Commit failed"),
        ];
        for (exception, text) in cases {
            assert_eq!(exception.to_string(), text);
        }
    }

    #[test]
    fn runtime_cause_excluded_from_equality() {
        let a = RequestException::runtime("CanCommit failed", Some("conflict on /a".into()));
        let b = RequestException::runtime("CanCommit failed", None);
        assert_eq!(a, b);
        assert_ne!(a, RequestException::runtime("Commit failed", None));
    }
}
