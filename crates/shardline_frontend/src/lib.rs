//! # Shardline Frontend
//!
//! Client side of the shardline transaction access protocol.
//!
//! This crate provides:
//! - Connect-time ABI negotiation against a shard backend
//! - Per-target sequence numbering, resend with exponential backoff and
//!   reply matching
//! - Local histories and transactions with buffered modifications
//! - Simple and coordinated (three-phase) commits, plus an in-process path
//!   for backends sharing the process
//! - A transport abstraction with a scripted mock
//!
//! ## Architecture
//!
//! A [`DataStoreClient`] owns one [`BackendChannel`]. The channel stamps every
//! request with the next sequence number of its target and the negotiated
//! version, hands it to a [`BackendTransport`] and waits for the reply with
//! the same target and sequence. Silence and retriable failures are resent
//! unchanged, so the backend's replay cache answers duplicates.
//!
//! ## Key Invariants
//!
//! - Sequence numbers per target start at 0 and never skip
//! - A resend reuses the sequence number of the original
//! - A transaction handle is finalized at most once
//! - After a not-leader reply nothing is sent until reconnect

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod channel;
mod client;
mod config;
mod error;
mod transport;

pub use channel::{BackendChannel, ChannelStats, Connection};
pub use client::{CommitHandle, DataStoreClient, LocalHistoryHandle, TransactionHandle};
pub use config::{FrontendConfig, RetryConfig};
pub use error::{CommitError, FrontendError, FrontendResult};
pub use transport::{BackendTransport, MockTransport};
