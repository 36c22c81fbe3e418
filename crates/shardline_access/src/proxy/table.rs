//! The version-indexed proxy table.

use shardline_codec::Value;

use super::layout::{BodyReader, Layout};
use super::{requests as rq, responses as rs, Message, MessageType};
use crate::abi::AbiVersion;
use crate::error::{ProxyError, ProxyResult};

type EncodeFn = fn(&Message, Layout) -> ProxyResult<Value>;
type DecodeFn = fn(&BodyReader<'_>) -> ProxyResult<Message>;

/// Encode/decode pair for one message type, valid from `since` until the
/// next entry for the same type.
#[derive(Clone, Copy)]
pub struct Proxy {
    /// Message type handled.
    pub message_type: MessageType,
    /// First version this layout applies to.
    pub since: AbiVersion,
    encode: EncodeFn,
    decode: DecodeFn,
}

impl std::fmt::Debug for Proxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Proxy")
            .field("message_type", &self.message_type)
            .field("since", &self.since)
            .finish_non_exhaustive()
    }
}

impl Proxy {
    pub(super) fn encode(&self, message: &Message, version: AbiVersion) -> ProxyResult<Value> {
        (self.encode)(message, Layout::for_version(version))
    }

    pub(super) fn decode(&self, body: &Value, version: AbiVersion) -> ProxyResult<Message> {
        let reader = Layout::for_version(version).reader(body)?;
        (self.decode)(&reader)
    }
}

const fn entry(
    message_type: MessageType,
    since: AbiVersion,
    encode: EncodeFn,
    decode: DecodeFn,
) -> Proxy {
    Proxy {
        message_type,
        since,
        encode,
        decode,
    }
}

use AbiVersion::{Boron, SodiumSr1};
use MessageType as M;

#[rustfmt::skip]
static PROXIES: &[Proxy] = &[
    entry(M::ConnectClientRequest, Boron, rq::encode_connect, rq::decode_connect),
    entry(M::CreateLocalHistoryRequest, Boron, rq::encode_history, rq::decode_create_history),
    entry(M::DestroyLocalHistoryRequest, Boron, rq::encode_history, rq::decode_destroy_history),
    entry(M::PurgeLocalHistoryRequest, Boron, rq::encode_history, rq::decode_purge_history),
    entry(M::ModifyTransactionRequest, Boron, rq::encode_modify, rq::decode_modify),
    entry(M::ReadTransactionRequest, Boron, rq::encode_path_query_v1, rq::decode_read_v1),
    entry(M::ReadTransactionRequest, SodiumSr1, rq::encode_path_query_v2, rq::decode_read_v2),
    entry(M::ExistsTransactionRequest, Boron, rq::encode_path_query_v1, rq::decode_exists_v1),
    entry(M::ExistsTransactionRequest, SodiumSr1, rq::encode_path_query_v2, rq::decode_exists_v2),
    entry(M::TransactionPreCommitRequest, Boron, rq::encode_transaction_header, rq::decode_pre_commit),
    entry(M::TransactionDoCommitRequest, Boron, rq::encode_transaction_header, rq::decode_do_commit),
    entry(M::TransactionAbortRequest, Boron, rq::encode_transaction_header, rq::decode_abort),
    entry(M::TransactionPurgeRequest, Boron, rq::encode_transaction_header, rq::decode_purge),
    entry(M::SkipTransactionsRequest, SodiumSr1, rq::encode_skip, rq::decode_skip),
    entry(M::ConnectClientSuccess, Boron, rs::encode_connect_success, rs::decode_connect_success),
    entry(M::ConnectClientFailure, Boron, rs::encode_failure, rs::decode_connect_failure),
    entry(M::LocalHistorySuccess, Boron, rs::encode_history_success, rs::decode_history_success),
    entry(M::LocalHistoryFailure, Boron, rs::encode_failure, rs::decode_history_failure),
    entry(M::ModifyTransactionSuccess, Boron, rs::encode_transaction_ack, rs::decode_modify_success),
    entry(M::ReadTransactionSuccess, Boron, rs::encode_read_success, rs::decode_read_success),
    entry(M::ExistsTransactionSuccess, Boron, rs::encode_exists_success, rs::decode_exists_success),
    entry(M::TransactionCanCommitSuccess, Boron, rs::encode_transaction_ack, rs::decode_can_commit_success),
    entry(M::TransactionPreCommitSuccess, Boron, rs::encode_transaction_ack, rs::decode_pre_commit_success),
    entry(M::TransactionCommitSuccess, Boron, rs::encode_transaction_ack, rs::decode_commit_success),
    entry(M::TransactionAbortSuccess, Boron, rs::encode_transaction_ack, rs::decode_abort_success),
    entry(M::TransactionPurgeResponse, Boron, rs::encode_transaction_ack, rs::decode_purge_response),
    entry(M::SkipTransactionsResponse, SodiumSr1, rs::encode_transaction_ack, rs::decode_skip_response),
    entry(M::TransactionFailure, Boron, rs::encode_failure, rs::decode_transaction_failure),
];

/// The proxy handling `message_type` at `version`: the entry with the
/// latest `since` not after `version`.
///
/// # Errors
///
/// [`ProxyError::UnsupportedVersion`] if the type did not exist yet at
/// `version`, or `version` is a test sentinel.
pub fn proxy_for(message_type: MessageType, version: AbiVersion) -> ProxyResult<&'static Proxy> {
    if version.is_test_sentinel() {
        return Err(ProxyError::UnsupportedVersion { message_type, version });
    }
    PROXIES
        .iter()
        .filter(|p| p.message_type == message_type && p.since <= version)
        .max_by_key(|p| p.since)
        .ok_or(ProxyError::UnsupportedVersion { message_type, version })
}
