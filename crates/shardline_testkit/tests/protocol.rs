//! Protocol-level scenarios driven with raw requests against one shard.

use shardline_access::PersistenceProtocol::{Ready, Simple, ThreePhase};
use shardline_access::{
    negotiate, AbiVersion, ActorAddress, ConnectClientRequest, DataNode, HistoryOperation,
    PersistenceProtocol, ReplyTo, RequestException, RequestSuccess, RequestTarget, Response,
    TransactionModification, TransactionPayload, TransactionSuccessPayload,
};
use shardline_backend::{BackendConfig, TransactionPhase};
use shardline_codec::Value;
use shardline_testkit::{path, write, RequestFactory, TestShard};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

fn single(mut replies: Vec<Response>) -> Response {
    assert_eq!(replies.len(), 1, "expected exactly one reply, got {replies:?}");
    replies.remove(0)
}

fn cause(response: &Response) -> &RequestException {
    &response.as_failure().expect("expected a failure").cause
}

fn payload(response: &Response) -> &TransactionSuccessPayload {
    response.transaction_payload().expect("expected a transaction success")
}

fn modify(
    modifications: Vec<TransactionModification>,
    protocol: Option<PersistenceProtocol>,
) -> TransactionPayload {
    TransactionPayload::Modify {
        modifications,
        protocol,
    }
}

fn read(p: &str) -> TransactionPayload {
    TransactionPayload::Read {
        path: path(p),
        snapshot_only: false,
    }
}

fn connected(config: BackendConfig) -> (TestShard, RequestFactory) {
    let shard = TestShard::with_config(config);
    let factory = RequestFactory::new("alice", 0);
    assert!(single(shard.handle(factory.connect())).as_failure().is_none());
    (shard, factory)
}

#[test]
fn version_negotiation_is_deterministic() {
    use AbiVersion::*;
    let local: BTreeSet<_> = [Boron, NeonSr2, SodiumSr1].into();
    let remote: BTreeSet<_> = [NeonSr2, SodiumSr1, Magnesium].into();
    assert_eq!(negotiate(&local, &remote).unwrap(), SodiumSr1);
    assert_eq!(negotiate(&remote, &local).unwrap(), SodiumSr1);

    let only_boron: BTreeSet<_> = [Boron].into();
    let only_neon: BTreeSet<_> = [NeonSr2].into();
    assert!(negotiate(&only_boron, &only_neon).is_err());
}

#[test]
fn connect_without_common_version_fails() {
    let config = BackendConfig::new("old").with_supported_versions([AbiVersion::Boron]);
    let shard = TestShard::with_config(config);
    let client = RequestFactory::new("alice", 0).client().clone();
    let connect = ConnectClientRequest::new(
        client,
        0,
        ReplyTo::default(),
        AbiVersion::NeonSr2,
        AbiVersion::Magnesium,
    );

    let reply = single(shard.handle(connect));
    assert_eq!(cause(&reply).to_string(), "No common ABI version");
    assert!(!cause(&reply).is_retriable());
    assert_eq!(reply.kind(), "ConnectClientFailure");
}

#[test]
fn acknowledged_sequences_have_no_gaps() {
    let (shard, alice) = connected(BackendConfig::new("default"));

    for sequence in 0..5 {
        let request = alice.tx(0, 0, sequence, modify(vec![write("/a", sequence)], None));
        let reply = single(shard.handle(request));
        assert_eq!(reply.sequence(), sequence);
        assert_eq!(payload(&reply), &TransactionSuccessPayload::Modify);
    }

    // a resend of an acknowledged request is answered from the replay cache
    let resend = alice.tx(0, 0, 2, modify(vec![write("/b", 9u64)], None));
    let replay = single(shard.handle(resend));
    assert_eq!(replay.sequence(), 2);
    assert_eq!(payload(&replay), &TransactionSuccessPayload::Modify);
}

#[test]
fn request_beyond_window_is_out_of_order() {
    let (shard, alice) = connected(BackendConfig::new("default").with_max_messages(4));
    single(shard.handle(alice.tx(0, 0, 0, modify(Vec::new(), None))));

    let reply = single(shard.handle(alice.tx(0, 0, 9, read("/a"))));
    assert_eq!(cause(&reply), &RequestException::OutOfOrder { expected: 1 });
    assert_eq!(cause(&reply).to_string(), "Expecting request 1");
}

#[test]
fn gap_is_filled_from_the_buffer() {
    let (shard, alice) = connected(BackendConfig::new("default").with_max_messages(8));

    assert!(shard.handle(alice.tx(0, 0, 1, read("/a"))).is_empty());
    let replies = shard.handle(alice.tx(0, 0, 0, modify(vec![write("/a", 1u64)], None)));
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].sequence(), 0);
    assert_eq!(
        payload(&replies[1]),
        &TransactionSuccessPayload::Read {
            data: Some(DataNode::new(1u64))
        }
    );
}

#[test]
fn filled_window_rejects_buffered_requests() {
    let (shard, alice) = connected(BackendConfig::new("default").with_max_messages(3));

    assert!(shard.handle(alice.tx(0, 0, 1, read("/a"))).is_empty());
    let rejected = shard.handle(alice.tx(0, 0, 2, read("/a")));
    assert_eq!(rejected.len(), 2);
    for reply in &rejected {
        assert_eq!(cause(reply), &RequestException::OutOfOrder { expected: 0 });
    }
}

#[test]
fn stale_buffered_requests_time_out() {
    let config = BackendConfig::new("default").with_buffer_timeout(Duration::from_millis(10));
    let (shard, alice) = connected(config);

    assert!(shard.handle(alice.tx(0, 0, 3, read("/a"))).is_empty());
    let expired = shard.tick_at(Instant::now() + Duration::from_secs(1));
    assert_eq!(expired.len(), 1);
    assert_eq!(expired[0].sequence(), 3);
    assert_eq!(cause(&expired[0]), &RequestException::OutOfOrder { expected: 0 });
}

#[test]
fn purge_is_idempotent() {
    let (shard, alice) = connected(BackendConfig::new("default"));
    single(shard.handle(alice.tx(0, 0, 0, modify(vec![write("/a", 1u64)], Some(Simple)))));

    let first = single(shard.handle(alice.tx(0, 0, 1, TransactionPayload::Purge)));
    let second = single(shard.handle(alice.tx(0, 0, 2, TransactionPayload::Purge)));
    assert_eq!(first.kind(), "TransactionPurgeResponse");
    assert_eq!(second.kind(), first.kind());
    assert_eq!(payload(&second), payload(&first));

    let dead = single(shard.handle(alice.tx(0, 0, 3, read("/a"))));
    assert!(matches!(
        cause(&dead),
        RequestException::DeadTransaction { purged } if purged.contains(0)
    ));
}

#[test]
fn do_commit_before_pre_commit_fails_hard() {
    let (shard, alice) = connected(BackendConfig::new("default"));
    let aborted = RequestException::ClosedTransaction { successful: false };

    let unknown = single(shard.handle(alice.tx(0, 0, 0, TransactionPayload::DoCommit)));
    assert_eq!(cause(&unknown), &aborted);

    single(shard.handle(alice.tx(0, 1, 0, modify(vec![write("/a", 1u64)], None))));
    let early = single(shard.handle(alice.tx(0, 1, 1, TransactionPayload::DoCommit)));
    assert_eq!(cause(&early), &aborted);
    assert!(!cause(&early).is_retriable());
}

#[test]
fn simple_modify_answers_with_commit_success_and_data_survives_purge() {
    let (shard, alice) = connected(BackendConfig::new("default"));
    let x = DataNode::new(Value::text("X"));

    // a SIMPLE modify carries the commit decision, so its reply is the
    // commit success rather than a modify ack
    let write_x = modify(vec![write("/a", Value::text("X"))], Some(Simple));
    let commit = single(shard.handle(alice.tx(0, 0, 0, write_x)));
    assert!(commit.as_failure().is_none());
    assert_eq!(payload(&commit), &TransactionSuccessPayload::Commit);
    assert_ne!(payload(&commit), &TransactionSuccessPayload::Modify);

    let expected = TransactionSuccessPayload::Read {
        data: Some(x.clone()),
    };
    let fresh = single(shard.handle(alice.tx(0, 1, 0, read("/a"))));
    assert_eq!(payload(&fresh), &expected);

    single(shard.handle(alice.tx(0, 0, 1, TransactionPayload::Purge)));
    let after_purge = single(shard.handle(alice.tx(0, 2, 0, read("/a"))));
    assert_eq!(payload(&after_purge), &expected);
    assert_eq!(shard.committed(&path("/a")), Some(x));
}

#[test]
fn three_phase_abort_after_can_commit() {
    let (shard, alice) = connected(BackendConfig::new("default"));

    let staged = modify(vec![write("/a", 1u64)], Some(Ready));
    let ready = single(shard.handle(alice.tx(0, 0, 0, staged)));
    assert_eq!(payload(&ready), &TransactionSuccessPayload::Modify);
    let can_commit = single(shard.handle(alice.tx(0, 0, 1, modify(Vec::new(), Some(ThreePhase)))));
    assert_eq!(payload(&can_commit), &TransactionSuccessPayload::CanCommit);
    let abort = single(shard.handle(alice.tx(0, 0, 2, TransactionPayload::Abort)));
    assert_eq!(payload(&abort), &TransactionSuccessPayload::Abort);

    {
        let guard = shard.shard().lock();
        let state = guard.client(alice.client().frontend()).unwrap();
        let phase = state.history(0).unwrap().transaction(0).unwrap().phase();
        assert_eq!(phase, TransactionPhase::Aborted);
    }

    let do_commit = single(shard.handle(alice.tx(0, 0, 3, TransactionPayload::DoCommit)));
    assert_eq!(
        cause(&do_commit),
        &RequestException::ClosedTransaction { successful: false }
    );
    assert_eq!(shard.commit_count(), 0);
}

#[test]
fn later_commit_waits_for_earlier_transaction() {
    let (shard, alice) = connected(BackendConfig::new("default"));
    single(shard.handle(alice.history_request(1, 0, HistoryOperation::Create)));

    single(shard.handle(alice.tx(1, 0, 0, modify(vec![write("/first", 1u64)], None))));
    let second = modify(vec![write("/second", 2u64)], Some(Simple));
    assert!(shard.handle(alice.tx(1, 1, 0, second)).is_empty());
    assert_eq!(shard.commit_count(), 0);

    let replies = shard.handle(alice.tx(1, 0, 1, modify(Vec::new(), Some(Simple))));
    assert_eq!(replies.len(), 2);
    assert_eq!(replies[0].target(), RequestTarget::Transaction(alice.transaction(1, 0)));
    assert_eq!(replies[1].target(), RequestTarget::Transaction(alice.transaction(1, 1)));
    assert!(replies.iter().all(|r| payload(r) == &TransactionSuccessPayload::Commit));
    assert_eq!(shard.commit_count(), 2);
}

#[test]
fn standalone_transactions_commit_independently() {
    let (shard, alice) = connected(BackendConfig::new("default"));
    single(shard.handle(alice.tx(0, 0, 0, modify(vec![write("/first", 1u64)], None))));

    let second = modify(vec![write("/second", 2u64)], Some(Simple));
    let commit = single(shard.handle(alice.tx(0, 1, 0, second)));
    assert_eq!(payload(&commit), &TransactionSuccessPayload::Commit);
}

#[test]
fn history_lifecycle() {
    let (shard, alice) = connected(BackendConfig::new("default"));

    let unknown = single(shard.handle(alice.tx(4, 0, 0, read("/a"))));
    assert!(matches!(cause(&unknown), RequestException::UnknownHistory { .. }));
    assert!(cause(&unknown).is_retriable());

    single(shard.handle(alice.history_request(4, 0, HistoryOperation::Create)));
    let early_purge = single(shard.handle(alice.history_request(4, 1, HistoryOperation::Purge)));
    assert_eq!(
        cause(&early_purge).to_string(),
        format!("History {} has not been destroyed", alice.history(4))
    );

    single(shard.handle(alice.history_request(4, 2, HistoryOperation::Destroy)));
    let closed = single(shard.handle(alice.tx(4, 0, 0, read("/a"))));
    assert!(matches!(cause(&closed), RequestException::Runtime(_)));

    let purged = single(shard.handle(alice.history_request(4, 3, HistoryOperation::Purge)));
    assert!(matches!(purged, Response::Success(RequestSuccess::History(_))));
    let dead = single(shard.handle(alice.tx(4, 1, 0, read("/a"))));
    assert_eq!(cause(&dead).to_string(), "Histories [4..4] have been purged");
}

#[test]
fn standalone_history_cannot_be_managed() {
    let (shard, alice) = connected(BackendConfig::new("default"));
    let reply = single(shard.handle(alice.history_request(0, 0, HistoryOperation::Create)));
    assert!(matches!(cause(&reply), RequestException::UnsupportedRequest { .. }));
}

#[test]
fn skipped_transactions_are_dead() {
    let (shard, alice) = connected(BackendConfig::new("default"));
    single(shard.handle(alice.history_request(1, 0, HistoryOperation::Create)));

    let skip_payload = TransactionPayload::SkipTransactions { others: vec![3, 5] };
    let skip = single(shard.handle(alice.tx(1, 2, 0, skip_payload)));
    assert_eq!(payload(&skip), &TransactionSuccessPayload::SkipTransactions);

    let dead = single(shard.handle(alice.tx(1, 5, 0, read("/a"))));
    assert_eq!(cause(&dead).to_string(), "Transactions [2..3, 5..5] have been purged");
    let alive = single(shard.handle(alice.tx(1, 4, 0, read("/a"))));
    assert!(alive.as_failure().is_none());
}

#[test]
fn newer_generation_retires_older() {
    let (shard, alice) = connected(BackendConfig::new("default"));
    let alice_next = RequestFactory::new("alice", 1);
    single(shard.handle(alice_next.connect()));
    let retired = RequestException::RetiredGeneration { new_generation: 1 };

    let stale = single(shard.handle(alice.tx(0, 0, 0, read("/a"))));
    assert_eq!(cause(&stale), &retired);
    let stale_connect = single(shard.handle(alice.connect()));
    assert_eq!(cause(&stale_connect), &retired);
}

#[test]
fn follower_refuses_everything() {
    let (shard, alice) = connected(BackendConfig::new("default"));
    shard.step_down(ActorAddress::new("shard-default@member-2"));
    let not_leader = RequestException::NotLeader {
        actor: shard.address().clone(),
    };

    for request in [alice.connect(), alice.tx(0, 0, 0, read("/a"))] {
        let reply = single(shard.handle(request));
        assert_eq!(cause(&reply), &not_leader);
    }

    shard.step_up();
    assert!(single(shard.handle(alice.tx(0, 0, 0, read("/a")))).as_failure().is_none());
}

#[test]
fn requests_before_connect_see_unknown_history() {
    let shard = TestShard::new("default");
    let stranger = RequestFactory::new("bob", 0);
    let reply = single(shard.handle(stranger.tx(0, 0, 0, read("/a"))));
    assert_eq!(cause(&reply), &RequestException::UnknownHistory { last_known: None });
}
