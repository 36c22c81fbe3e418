//! # Shardline Testkit
//!
//! Test utilities for shardline.
//!
//! This crate provides:
//! - In-process shards with controllable leadership
//! - Loopback transports (serialized frames, in-process delivery, actor
//!   mailbox)
//! - Raw request builders for protocol-level tests
//! - Property-based generators for every wire message at every ABI version
//!
//! ## Usage
//!
//! ```rust,ignore
//! use shardline_testkit::prelude::*;
//!
//! #[test]
//! fn commit_is_visible() {
//!     with_shard(|shard, client| {
//!         let mut tx = client.open_transaction(&client.standalone_history());
//!         tx.write(path("/a"), DataNode::new(1i64)).unwrap();
//!         client.commit_local(&mut tx, false).unwrap();
//!         assert_eq!(shard.commit_count(), 1);
//!     });
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
    pub use shardline_access::DataNode;
}

pub use fixtures::*;
pub use generators::*;
