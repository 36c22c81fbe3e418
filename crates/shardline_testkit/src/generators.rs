//! Property-based test generators using proptest.
//!
//! Every message strategy is parameterised by an ABI version and only
//! produces messages that version can carry: no skip requests before
//! SODIUM_SR1, no snapshot-only reads before it, no local-only requests and
//! no in-process snapshots.

use proptest::prelude::*;
use proptest::strategy::Union;
use shardline_access::{
    AbiVersion, ActorAddress, ClientIdentifier, ConnectClientRequest, ConnectClientSuccess,
    DataNode, DataPath, FrontendIdentifier, FrontendType, HistoryOperation, LocalHistoryIdentifier,
    LocalHistoryRequest, LocalHistorySuccess, MemberName, Message, PersistenceProtocol, RangeSet,
    ReplyTo, Request, RequestException, RequestFailure, RequestHeader, RequestSuccess,
    RequestTarget, Response, ResponseHeader, RuntimeRequestException, TransactionIdentifier,
    TransactionModification, TransactionPayload, TransactionRequest, TransactionSuccess,
    TransactionSuccessPayload,
};
use shardline_codec::Value;

/// Strategy for released ABI versions.
pub fn version_strategy() -> impl Strategy<Value = AbiVersion> {
    prop::sample::select(AbiVersion::RELEASED.to_vec())
}

/// Strategy for valid member names.
pub fn member_name_strategy() -> impl Strategy<Value = MemberName> {
    "[a-z][a-z0-9-]{0,11}".prop_map(|s| MemberName::new(s).expect("valid member name"))
}

/// Strategy for valid frontend types.
pub fn frontend_type_strategy() -> impl Strategy<Value = FrontendType> {
    "[a-z][a-z_.-]{0,11}".prop_map(|s| FrontendType::new(s).expect("valid frontend type"))
}

/// Strategy for client identifiers.
pub fn client_strategy() -> impl Strategy<Value = ClientIdentifier> {
    (member_name_strategy(), frontend_type_strategy(), any::<u64>()).prop_map(
        |(member, kind, generation)| {
            ClientIdentifier::new(FrontendIdentifier::new(member, kind), generation)
        },
    )
}

/// Strategy for local history identifiers, the standalone one included.
pub fn history_strategy() -> impl Strategy<Value = LocalHistoryIdentifier> {
    (client_strategy(), prop_oneof![Just(LocalHistoryIdentifier::STANDALONE), any::<u64>()])
        .prop_map(|(client, id)| LocalHistoryIdentifier::new(client, id))
}

/// Strategy for transaction identifiers.
pub fn transaction_strategy() -> impl Strategy<Value = TransactionIdentifier> {
    (history_strategy(), any::<u64>())
        .prop_map(|(history, id)| TransactionIdentifier::new(history, id))
}

/// Strategy for data paths, the root included.
pub fn path_strategy() -> impl Strategy<Value = DataPath> {
    prop::collection::vec("[a-z0-9]{1,6}", 0..4)
        .prop_map(|segments| DataPath::from_segments(segments).expect("valid segments"))
}

/// Strategy for arbitrary data values, nested up to three levels.
pub fn value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(Value::from),
        "[a-zA-Z0-9 ]{0,12}".prop_map(Value::text),
        prop::collection::vec(any::<u8>(), 0..16).prop_map(Value::from),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,6}", inner, 0..4).prop_map(|entries| {
                Value::map(entries.into_iter().map(|(k, v)| (Value::text(k), v)).collect())
            }),
        ]
    })
}

/// Strategy for data nodes.
pub fn node_strategy() -> impl Strategy<Value = DataNode> {
    value_strategy().prop_map(DataNode::new)
}

/// Strategy for single modifications.
pub fn modification_strategy() -> impl Strategy<Value = TransactionModification> {
    prop_oneof![
        (path_strategy(), node_strategy())
            .prop_map(|(path, data)| TransactionModification::Write { path, data }),
        (path_strategy(), node_strategy())
            .prop_map(|(path, data)| TransactionModification::Merge { path, data }),
        path_strategy().prop_map(|path| TransactionModification::Delete { path }),
    ]
}

/// Strategy for an optional persistence protocol.
pub fn protocol_strategy() -> impl Strategy<Value = Option<PersistenceProtocol>> {
    prop_oneof![
        Just(None),
        Just(Some(PersistenceProtocol::Abort)),
        Just(Some(PersistenceProtocol::Ready)),
        Just(Some(PersistenceProtocol::Simple)),
        Just(Some(PersistenceProtocol::ThreePhase)),
    ]
}

/// Strategy for reply handles.
pub fn reply_to_strategy() -> impl Strategy<Value = ReplyTo> {
    (any::<u64>(), any::<u64>()).prop_map(|(channel, token)| ReplyTo::new(channel, token))
}

/// Strategy for actor addresses.
pub fn actor_strategy() -> impl Strategy<Value = ActorAddress> {
    "[a-z]{1,8}(@[a-z0-9-]{1,8})?".prop_map(ActorAddress::new)
}

/// Strategy for sets of purged ids.
pub fn range_set_strategy() -> impl Strategy<Value = RangeSet> {
    prop::collection::vec(0u64..200, 0..12).prop_map(|ids| ids.into_iter().collect())
}

/// Strategy for every failure cause.
pub fn exception_strategy() -> impl Strategy<Value = RequestException> {
    prop_oneof![
        any::<u64>().prop_map(|expected| RequestException::OutOfOrder { expected }),
        any::<Option<u64>>().prop_map(|last_known| RequestException::UnknownHistory { last_known }),
        range_set_strategy().prop_map(|purged| RequestException::DeadHistory { purged }),
        range_set_strategy().prop_map(|purged| RequestException::DeadTransaction { purged }),
        any::<bool>().prop_map(|successful| RequestException::ClosedTransaction { successful }),
        actor_strategy().prop_map(|actor| RequestException::NotLeader { actor }),
        any::<u64>()
            .prop_map(|new_generation| RequestException::RetiredGeneration { new_generation }),
        "[A-Za-z]{1,24}".prop_map(|kind| RequestException::UnsupportedRequest { kind }),
        ("[A-Za-z ]{1,24}", prop::option::of("[a-z ]{0,24}"), any::<bool>()).prop_map(
            |(message, cause, retriable)| {
                let runtime = RuntimeRequestException::new(message, cause);
                RequestException::Runtime(if retriable { runtime.retriable() } else { runtime })
            }
        ),
    ]
}

fn with_skip(version: AbiVersion) -> bool {
    version >= AbiVersion::SodiumSr1
}

fn payload_strategy(version: AbiVersion) -> BoxedStrategy<TransactionPayload> {
    let snapshot_only = if with_skip(version) {
        any::<bool>().boxed()
    } else {
        Just(false).boxed()
    };
    let mut options = vec![
        (prop::collection::vec(modification_strategy(), 0..4), protocol_strategy())
            .prop_map(|(modifications, protocol)| TransactionPayload::Modify {
                modifications,
                protocol,
            })
            .boxed(),
        (path_strategy(), snapshot_only.clone())
            .prop_map(|(path, snapshot_only)| TransactionPayload::Read { path, snapshot_only })
            .boxed(),
        (path_strategy(), snapshot_only)
            .prop_map(|(path, snapshot_only)| TransactionPayload::Exists { path, snapshot_only })
            .boxed(),
        Just(TransactionPayload::PreCommit).boxed(),
        Just(TransactionPayload::DoCommit).boxed(),
        Just(TransactionPayload::Abort).boxed(),
        Just(TransactionPayload::Purge).boxed(),
    ];
    if with_skip(version) {
        options.push(
            prop::collection::vec(any::<u64>(), 0..4)
                .prop_map(|others| TransactionPayload::SkipTransactions { others })
                .boxed(),
        );
    }
    Union::new(options).boxed()
}

/// Strategy for wire requests tagged with `version`.
pub fn request_strategy(version: AbiVersion) -> BoxedStrategy<Request> {
    let header = || (any::<u64>(), reply_to_strategy());
    prop_oneof![
        (client_strategy(), header(), version_strategy(), version_strategy()).prop_map(
            move |(client, (sequence, reply_to), min, max)| {
                let mut request = ConnectClientRequest::new(client, sequence, reply_to, min, max);
                request.header.version = version;
                Request::Connect(request)
            }
        ),
        (
            history_strategy(),
            header(),
            prop::sample::select(vec![
                HistoryOperation::Create,
                HistoryOperation::Destroy,
                HistoryOperation::Purge,
            ]),
        )
            .prop_map(move |(target, (sequence, reply_to), operation)| {
                let mut header = RequestHeader::new(target, sequence, reply_to);
                header.version = version;
                Request::History(LocalHistoryRequest { header, operation })
            }),
        (transaction_strategy(), header(), payload_strategy(version)).prop_map(
            move |(target, (sequence, reply_to), payload)| {
                let mut request = TransactionRequest::new(target, sequence, reply_to, payload);
                request.header.version = version;
                Request::Transaction(request)
            }
        ),
    ]
    .boxed()
}

fn success_payload_strategy(version: AbiVersion) -> BoxedStrategy<TransactionSuccessPayload> {
    let mut options = vec![
        Just(TransactionSuccessPayload::Modify).boxed(),
        prop::option::of(node_strategy())
            .prop_map(|data| TransactionSuccessPayload::Read { data })
            .boxed(),
        any::<bool>()
            .prop_map(|exists| TransactionSuccessPayload::Exists { exists })
            .boxed(),
        Just(TransactionSuccessPayload::CanCommit).boxed(),
        Just(TransactionSuccessPayload::PreCommit).boxed(),
        Just(TransactionSuccessPayload::Commit).boxed(),
        Just(TransactionSuccessPayload::Abort).boxed(),
        Just(TransactionSuccessPayload::Purge).boxed(),
    ];
    if with_skip(version) {
        options.push(Just(TransactionSuccessPayload::SkipTransactions).boxed());
    }
    Union::new(options).boxed()
}

fn target_strategy() -> impl Strategy<Value = RequestTarget> {
    prop_oneof![
        client_strategy().prop_map(RequestTarget::Client),
        history_strategy().prop_map(RequestTarget::History),
        transaction_strategy().prop_map(RequestTarget::Transaction),
    ]
}

/// Strategy for wire responses tagged with `version`.
pub fn response_strategy(version: AbiVersion) -> BoxedStrategy<Response> {
    prop_oneof![
        (
            client_strategy(),
            any::<u64>(),
            actor_strategy(),
            prop::collection::vec(actor_strategy(), 0..3),
            any::<u32>(),
        )
            .prop_map(move |(target, sequence, backend, alternates, max_messages)| {
                Response::Success(RequestSuccess::Connect(ConnectClientSuccess {
                    header: ResponseHeader { target, sequence, version },
                    backend,
                    alternates,
                    data_tree_snapshot: None,
                    max_messages,
                }))
            }),
        (history_strategy(), any::<u64>()).prop_map(move |(target, sequence)| {
            Response::Success(RequestSuccess::History(LocalHistorySuccess {
                header: ResponseHeader { target, sequence, version },
            }))
        }),
        (transaction_strategy(), any::<u64>(), success_payload_strategy(version)).prop_map(
            move |(target, sequence, payload)| {
                Response::Success(RequestSuccess::Transaction(TransactionSuccess {
                    header: ResponseHeader { target, sequence, version },
                    payload,
                }))
            }
        ),
        (target_strategy(), any::<u64>(), exception_strategy()).prop_map(
            move |(target, sequence, cause)| {
                Response::Failure(RequestFailure::new(target, sequence, version, cause))
            }
        ),
    ]
    .boxed()
}

/// Strategy for any wire message at `version`.
pub fn message_strategy(version: AbiVersion) -> BoxedStrategy<Message> {
    prop_oneof![
        request_strategy(version).prop_map(Message::Request),
        response_strategy(version).prop_map(Message::Response),
    ]
    .boxed()
}

/// Strategy pairing a released version with a message it can carry.
pub fn versioned_message_strategy() -> impl Strategy<Value = (AbiVersion, Message)> {
    version_strategy().prop_flat_map(|version| (Just(version), message_strategy(version)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::strategy::ValueTree;
    use proptest::test_runner::TestRunner;

    #[test]
    fn old_versions_never_get_skip_requests() {
        let mut runner = TestRunner::default();
        let strategy = request_strategy(AbiVersion::NeonSr2);
        for _ in 0..256 {
            let request = strategy.new_tree(&mut runner).unwrap().current();
            assert_ne!(request.kind(), "SkipTransactionsRequest");
            if let Request::Transaction(TransactionRequest {
                payload: TransactionPayload::Read { snapshot_only, .. },
                ..
            }) = &request
            {
                assert!(!snapshot_only);
            }
            assert_eq!(request.version(), AbiVersion::NeonSr2);
        }
    }

    proptest! {
        #[test]
        fn generated_paths_reparse(path in path_strategy()) {
            let reparsed: DataPath = path.to_string().parse().unwrap();
            prop_assert_eq!(reparsed, path);
        }
    }
}
