//! # Shardline Backend
//!
//! Shard-leader side of the shardline transaction access protocol.
//!
//! This crate provides:
//! - Per-target sequence validation with a replay cache and an out-of-order
//!   buffer bounded by the negotiated window
//! - The per-transaction persistence state machine (ready, can-commit,
//!   pre-commit, commit, abort, purge)
//! - Local history and client generation tables
//! - Collaborator traits for the data tree and the leadership oracle, with
//!   in-memory implementations
//! - A tokio mailbox actor owning the shard
//!
//! # Architecture
//!
//! A [`Shard`] owns all protocol state of one shard replica. It consults the
//! [`LeadershipOracle`] before anything else, then routes each request to the
//! client, history and transaction it targets. Changes reach the
//! [`DataTree`] only through the commit phases.
//!
//! ```
//! use shardline_access::{
//!     AbiVersion, ClientIdentifier, ConnectClientRequest, FrontendIdentifier, ReplyTo,
//! };
//! use shardline_backend::{BackendConfig, Shard};
//! use std::time::Instant;
//!
//! let mut shard = Shard::in_memory(BackendConfig::new("inventory"));
//! let frontend = FrontendIdentifier::parse("member-1", "datastore").unwrap();
//! let client = ClientIdentifier::new(frontend, 0);
//! let connect = ConnectClientRequest::new(
//!     client,
//!     0,
//!     ReplyTo::default(),
//!     AbiVersion::Boron,
//!     AbiVersion::Magnesium,
//! );
//!
//! let replies = shard.handle(connect.into(), Instant::now());
//! assert_eq!(replies[0].version(), AbiVersion::Magnesium);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod actor;
mod client;
mod config;
mod data_tree;
mod error;
mod history;
mod leadership;
mod sequence;
mod shard;
mod transaction;

pub use actor::{ShardActor, ShardHandle};
pub use client::ConnectedClient;
pub use config::BackendConfig;
pub use data_tree::{DataTree, InMemoryDataTree};
pub use error::{BackendError, BackendResult, DataTreeError};
pub use history::{HistoryPhase, LocalHistory};
pub use leadership::{LeadershipOracle, StaticLeadership};
pub use sequence::{Admission, SequenceTracker};
pub use shard::Shard;
pub use transaction::{FrontendTransaction, TransactionPhase};
