//! # Shardline Access
//!
//! The cluster transaction access protocol spoken between a frontend client
//! and the leader of a backend shard.
//!
//! This crate holds the pure protocol model and performs no I/O:
//!
//! - **Identifiers**: frontend, client (with generation), local history and
//!   transaction identifiers
//! - **ABI versions**: the released wire revisions and their negotiation
//! - **Envelopes**: [`Request`], [`RequestSuccess`] and [`RequestFailure`]
//!   with per-operation payloads
//! - **Persistence protocols** and the [`ModifyTransactionRequestBuilder`]
//! - **Exceptions**: the closed [`RequestException`] taxonomy
//! - **Proxies**: per-version encode/decode functions selected by
//!   `(message type, version)`
//!
//! ## Example
//!
//! ```
//! use shardline_access::{
//!     decode_message, encode_request, ClientIdentifier, DataNode, FrontendIdentifier,
//!     LocalHistoryIdentifier, Message, ModifyTransactionRequestBuilder, ReplyTo, Request,
//!     TransactionIdentifier,
//! };
//!
//! let frontend = FrontendIdentifier::parse("member-1", "datastore-config").unwrap();
//! let client = ClientIdentifier::new(frontend, 0);
//! let tx = TransactionIdentifier::new(LocalHistoryIdentifier::standalone(client), 0);
//!
//! let mut builder = ModifyTransactionRequestBuilder::new(tx, ReplyTo::new(1, 0));
//! builder.write("/a".parse().unwrap(), DataNode::new("x"));
//! builder.set_sequence(0);
//! let request = Request::from(builder.commit(false).unwrap());
//!
//! let bytes = encode_request(&request).unwrap();
//! assert_eq!(decode_message(&bytes).unwrap(), Message::Request(request));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod abi;
mod builder;
mod data;
mod envelope;
mod error;
mod exception;
mod identifiers;
mod modification;
pub mod proxy;
mod ranges;
mod request;
mod response;

pub use abi::{negotiate, negotiate_range, AbiVersion};
pub use builder::ModifyTransactionRequestBuilder;
pub use data::{DataNode, DataPath, LocalSnapshot, SnapshotSource};
pub use envelope::{ActorAddress, ReplyTo, RequestHeader, RequestTarget, ResponseHeader};
pub use error::{
    BuilderError, InvalidIdentifierError, InvalidPathError, NoCommonVersionError, ProxyError,
    ProxyResult, VersionError,
};
pub use exception::{RequestException, RuntimeRequestException};
pub use identifiers::{
    ClientIdentifier, FrontendIdentifier, FrontendType, LocalHistoryIdentifier, MemberName,
    TransactionIdentifier,
};
pub use modification::{PersistenceProtocol, TransactionModification};
pub use proxy::{
    decode_message, encode_message, encode_request, encode_response, Message, MessageType,
};
pub use ranges::RangeSet;
pub use request::{
    ConnectClientRequest, HistoryOperation, LocalHistoryRequest, Request, TransactionPayload,
    TransactionRequest,
};
pub use response::{
    ConnectClientSuccess, LocalHistorySuccess, RequestFailure, RequestSuccess, Response,
    TransactionSuccess, TransactionSuccessPayload,
};
pub use shardline_codec::{Decode, Encode};
