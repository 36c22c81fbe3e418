//! The shard running on its own tokio task.

use shardline_access::{
    DataNode, PersistenceProtocol, TransactionPayload, TransactionSuccessPayload,
};
use shardline_backend::{BackendConfig, Shard, ShardActor};
use shardline_frontend::DataStoreClient;
use shardline_testkit::{path, test_config, write, ActorTransport, RequestFactory};

#[tokio::test]
async fn concurrent_submits_are_serialized() {
    let (handle, join) = ShardActor::spawn(Shard::in_memory(BackendConfig::new("default")), 16);

    let mut tasks = Vec::new();
    for member in ["bob", "carol", "dave"] {
        let handle = handle.clone();
        tasks.push(tokio::spawn(async move {
            let factory = RequestFactory::new(member, 0);
            let connected = handle.submit(factory.connect()).await.unwrap();
            assert!(connected[0].as_failure().is_none());

            for tx in 0..3u64 {
                let payload = TransactionPayload::Modify {
                    modifications: vec![write(&format!("/{member}/{tx}"), tx)],
                    protocol: Some(PersistenceProtocol::Simple),
                };
                let replies = handle.submit(factory.tx(0, tx, 0, payload)).await.unwrap();
                assert_eq!(replies.len(), 1);
                let committed = replies[0].transaction_payload();
                assert_eq!(committed, Some(&TransactionSuccessPayload::Commit));
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    assert!(handle.tick().await.unwrap().is_empty());
    drop(handle);
    let shard = join.await.unwrap();
    assert_eq!(shard.data_tree().commit_count(), 9);
    assert_eq!(shard.client_count(), 3);
}

#[tokio::test]
async fn closed_actor_is_unavailable() {
    let (handle, join) = ShardActor::spawn(Shard::in_memory(BackendConfig::new("default")), 1);
    join.abort();
    let _ = join.await;

    let err = handle.submit(RequestFactory::new("bob", 0).connect()).await.unwrap_err();
    assert!(err.is_unavailable());
}

#[test]
fn blocking_client_over_actor() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let shard = Shard::in_memory(BackendConfig::new("default"));
    let (handle, join) = runtime.block_on(async { ShardActor::spawn(shard, 16) });

    let transport = ActorTransport::new(handle);
    let client = DataStoreClient::connect(test_config("alice", 0), transport).unwrap();
    let history = client.create_history().unwrap();
    for n in 0..3u64 {
        let mut tx = client.open_transaction(&history);
        tx.write(path("/counter"), DataNode::new(n)).unwrap();
        let commit = client.ready(&mut tx).unwrap().coordinated();
        client.commit(commit).unwrap();
    }

    let mut check = client.open_transaction(&history);
    assert_eq!(client.read(&mut check, &path("/counter")).unwrap(), Some(DataNode::new(2u64)));
    drop(client);

    let shard = runtime.block_on(join).unwrap();
    assert_eq!(shard.data_tree().commit_count(), 3);
}
