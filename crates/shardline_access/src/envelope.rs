//! Envelope fields shared by every request and response.

use std::fmt;

use crate::abi::AbiVersion;
use crate::identifiers::{ClientIdentifier, LocalHistoryIdentifier, TransactionIdentifier};

/// Opaque address of a protocol endpoint (a backend replica or a frontend
/// mailbox). Compared and serialized by its text only.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActorAddress(String);

impl ActorAddress {
    /// Wrap an address.
    pub fn new(address: impl Into<String>) -> Self {
        Self(address.into())
    }

    /// The address text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActorAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Where the reply to a request should be routed: a channel id plus a
/// routing token chosen by the sender.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ReplyTo {
    /// Sender channel.
    pub channel: u64,
    /// Sender-chosen correlation token.
    pub token: u64,
}

impl ReplyTo {
    /// Create a reply handle.
    pub fn new(channel: u64, token: u64) -> Self {
        Self { channel, token }
    }
}

/// Common request fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader<T> {
    /// Addressed identifier.
    pub target: T,
    /// Position of this request in the sender's sequence for `target`.
    pub sequence: u64,
    /// Reply routing.
    pub reply_to: ReplyTo,
    /// Version the request is (to be) encoded with.
    pub version: AbiVersion,
}

impl<T> RequestHeader<T> {
    /// Header at the current ABI version.
    pub fn new(target: T, sequence: u64, reply_to: ReplyTo) -> Self {
        Self {
            target,
            sequence,
            reply_to,
            version: AbiVersion::current(),
        }
    }

    /// Response header mirroring this request.
    pub fn response_header(&self) -> ResponseHeader<T>
    where
        T: Clone,
    {
        ResponseHeader {
            target: self.target.clone(),
            sequence: self.sequence,
            version: self.version,
        }
    }
}

/// Common response fields: a copy of the request's target, sequence and
/// version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseHeader<T> {
    /// Target of the answered request.
    pub target: T,
    /// Sequence of the answered request.
    pub sequence: u64,
    /// Version the response is encoded with.
    pub version: AbiVersion,
}

/// Any addressable identifier.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RequestTarget {
    /// A client as a whole.
    Client(ClientIdentifier),
    /// A local history.
    History(LocalHistoryIdentifier),
    /// A transaction.
    Transaction(TransactionIdentifier),
}

impl RequestTarget {
    /// The client owning this target.
    pub fn client(&self) -> &ClientIdentifier {
        match self {
            Self::Client(client) => client,
            Self::History(history) => history.client(),
            Self::Transaction(tx) => tx.history().client(),
        }
    }
}

impl fmt::Display for RequestTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Client(id) => id.fmt(f),
            Self::History(id) => id.fmt(f),
            Self::Transaction(id) => id.fmt(f),
        }
    }
}

impl From<ClientIdentifier> for RequestTarget {
    fn from(id: ClientIdentifier) -> Self {
        Self::Client(id)
    }
}

impl From<LocalHistoryIdentifier> for RequestTarget {
    fn from(id: LocalHistoryIdentifier) -> Self {
        Self::History(id)
    }
}

impl From<TransactionIdentifier> for RequestTarget {
    fn from(id: TransactionIdentifier) -> Self {
        Self::Transaction(id)
    }
}
