//! Test fixtures: in-process shards, loopback transports and raw request
//! helpers.

use bytes::Bytes;
use parking_lot::Mutex;
use shardline_access::{
    AbiVersion, ActorAddress, ClientIdentifier, ConnectClientRequest, DataNode, DataPath,
    FrontendIdentifier, HistoryOperation, LocalHistoryIdentifier, LocalHistoryRequest, ReplyTo,
    Request, RequestHeader, Response, TransactionIdentifier, TransactionModification,
    TransactionPayload, TransactionRequest,
};
use shardline_backend::{BackendConfig, InMemoryDataTree, Shard, ShardHandle, StaticLeadership};
use shardline_frontend::{
    BackendTransport, DataStoreClient, FrontendConfig, FrontendError, FrontendResult, RetryConfig,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// A shard replica living in the test process, with controllable
/// leadership.
#[derive(Clone)]
pub struct TestShard {
    shard: Arc<Mutex<Shard>>,
    leadership: Arc<StaticLeadership>,
    address: ActorAddress,
}

impl TestShard {
    /// Creates a leader replica named `name`.
    pub fn new(name: &str) -> Self {
        Self::with_config(BackendConfig::new(name))
    }

    /// Creates a leader replica from a configuration.
    pub fn with_config(config: BackendConfig) -> Self {
        let address = config.local_address.clone();
        let leadership = Arc::new(StaticLeadership::leader(address.clone(), Vec::new()));
        let shard = Shard::new(config, InMemoryDataTree::new(), leadership.clone());
        Self {
            shard: Arc::new(Mutex::new(shard)),
            leadership,
            address,
        }
    }

    /// The shared shard.
    pub fn shard(&self) -> &Arc<Mutex<Shard>> {
        &self.shard
    }

    /// Address of this replica.
    pub fn address(&self) -> &ActorAddress {
        &self.address
    }

    /// Hands leadership to another replica.
    pub fn step_down(&self, new_leader: ActorAddress) {
        self.leadership.set_leader(Some(new_leader), false);
    }

    /// Takes leadership back.
    pub fn step_up(&self) {
        self.leadership.set_leader(Some(self.address.clone()), true);
    }

    /// Handles one request directly.
    pub fn handle(&self, request: impl Into<Request>) -> Vec<Response> {
        self.shard.lock().handle(request.into(), Instant::now())
    }

    /// Runs the shard's timers at `now`.
    pub fn tick_at(&self, now: Instant) -> Vec<Response> {
        self.shard.lock().tick(now)
    }

    /// Number of commits applied to the data tree.
    pub fn commit_count(&self) -> u64 {
        self.shard.lock().data_tree().commit_count()
    }

    /// Committed node at `path`.
    pub fn committed(&self, path: &DataPath) -> Option<DataNode> {
        use shardline_backend::DataTree;
        self.shard.lock().data_tree().read(path)
    }

    /// Locks `path` so validation of changes touching it fails.
    pub fn lock_path(&self, path: DataPath) {
        self.shard.lock().data_tree_mut().lock(path);
    }

    /// Transport that serializes every request and response.
    pub fn frame_transport(&self) -> FrameTransport {
        FrameTransport {
            shard: Arc::clone(&self.shard),
            connected: AtomicBool::new(true),
        }
    }

    /// Transport that hands requests over without serialization.
    pub fn in_process_transport(&self) -> InProcessTransport {
        InProcessTransport {
            shard: Arc::clone(&self.shard),
        }
    }

    /// A connected client talking through frames.
    pub fn client(&self, member: &str, generation: u64) -> DataStoreClient<FrameTransport> {
        DataStoreClient::connect(test_config(member, generation), self.frame_transport())
            .expect("client connects to test shard")
    }

    /// A connected client talking in process.
    pub fn in_process_client(
        &self,
        member: &str,
        generation: u64,
    ) -> DataStoreClient<InProcessTransport> {
        DataStoreClient::connect(test_config(member, generation), self.in_process_transport())
            .expect("client connects to test shard")
    }
}

/// Frontend configuration with fast retries, for tests.
pub fn test_config(member: &str, generation: u64) -> FrontendConfig {
    FrontendConfig::for_member(member, "test")
        .expect("valid test member")
        .with_generation(generation)
        .with_retry(
            RetryConfig::new(3)
                .with_initial_delay(Duration::from_millis(1))
                .with_jitter(false),
        )
        .with_request_timeout(Duration::from_secs(2))
}

/// Loopback transport over encoded frames.
pub struct FrameTransport {
    shard: Arc<Mutex<Shard>>,
    connected: AtomicBool,
}

impl BackendTransport for FrameTransport {
    fn send(&self, frame: Bytes) -> FrontendResult<Vec<Bytes>> {
        if !self.is_connected() {
            return Err(FrontendError::NotConnected);
        }
        self.shard
            .lock()
            .handle_frame(&frame, Instant::now())
            .map_err(|e| FrontendError::transport_fatal(e.to_string()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> FrontendResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Loopback transport delivering requests in process.
pub struct InProcessTransport {
    shard: Arc<Mutex<Shard>>,
}

impl BackendTransport for InProcessTransport {
    fn send(&self, frame: Bytes) -> FrontendResult<Vec<Bytes>> {
        self.shard
            .lock()
            .handle_frame(&frame, Instant::now())
            .map_err(|e| FrontendError::transport_fatal(e.to_string()))
    }

    fn supports_local_delivery(&self) -> bool {
        true
    }

    fn deliver_local(&self, request: Request) -> FrontendResult<Vec<Response>> {
        Ok(self.shard.lock().handle(request, Instant::now()))
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn close(&self) -> FrontendResult<()> {
        Ok(())
    }
}

/// Transport feeding frames to a [`ShardActor`](shardline_backend::ShardActor)
/// mailbox. Blocks the calling thread, so it must not be used from inside
/// an async task.
pub struct ActorTransport {
    handle: ShardHandle,
}

impl ActorTransport {
    /// Wraps an actor handle.
    pub fn new(handle: ShardHandle) -> Self {
        Self { handle }
    }
}

impl BackendTransport for ActorTransport {
    fn send(&self, frame: Bytes) -> FrontendResult<Vec<Bytes>> {
        self.handle.blocking_submit_frame(frame).map_err(|e| {
            if e.is_unavailable() {
                FrontendError::NotConnected
            } else {
                FrontendError::transport_fatal(e.to_string())
            }
        })
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn close(&self) -> FrontendResult<()> {
        Ok(())
    }
}

/// Builds raw requests for one client, for protocol-level tests that
/// bypass the frontend.
#[derive(Debug, Clone)]
pub struct RequestFactory {
    client: ClientIdentifier,
    version: AbiVersion,
}

impl RequestFactory {
    /// Factory for `member` at `generation`, tagging requests with the
    /// current version.
    pub fn new(member: &str, generation: u64) -> Self {
        let frontend = FrontendIdentifier::parse(member, "test").expect("valid test member");
        Self {
            client: ClientIdentifier::new(frontend, generation),
            version: AbiVersion::current(),
        }
    }

    /// Tags subsequent requests with `version`.
    #[must_use]
    pub fn at_version(mut self, version: AbiVersion) -> Self {
        self.version = version;
        self
    }

    /// The client identifier.
    pub fn client(&self) -> &ClientIdentifier {
        &self.client
    }

    /// History `id` of the client.
    pub fn history(&self, id: u64) -> LocalHistoryIdentifier {
        LocalHistoryIdentifier::new(self.client.clone(), id)
    }

    /// Transaction `tx` in history `history`.
    pub fn transaction(&self, history: u64, tx: u64) -> TransactionIdentifier {
        TransactionIdentifier::new(self.history(history), tx)
    }

    /// Connect offering every released version.
    pub fn connect(&self) -> Request {
        ConnectClientRequest::new(
            self.client.clone(),
            0,
            ReplyTo::default(),
            AbiVersion::Boron,
            AbiVersion::current(),
        )
        .into()
    }

    /// History lifecycle request.
    pub fn history_request(
        &self,
        history: u64,
        sequence: u64,
        operation: HistoryOperation,
    ) -> Request {
        let mut header = RequestHeader::new(self.history(history), sequence, ReplyTo::default());
        header.version = self.version;
        LocalHistoryRequest { header, operation }.into()
    }

    /// Transaction request.
    pub fn tx(&self, history: u64, tx: u64, sequence: u64, payload: TransactionPayload) -> Request {
        let target = self.transaction(history, tx);
        let mut request = TransactionRequest::new(target, sequence, ReplyTo::default(), payload);
        request.header.version = self.version;
        request.into()
    }
}

/// Parses a path, panicking on invalid input.
pub fn path(s: &str) -> DataPath {
    s.parse().expect("valid test path")
}

/// A write modification.
pub fn write(p: &str, data: impl Into<shardline_codec::Value>) -> TransactionModification {
    TransactionModification::Write {
        path: path(p),
        data: DataNode::new(data),
    }
}

/// Runs `f` with a fresh leader shard and a frame-based client for member
/// `alice`, generation 0.
pub fn with_shard<F, R>(f: F) -> R
where
    F: FnOnce(&TestShard, &DataStoreClient<FrameTransport>) -> R,
{
    let shard = TestShard::new("default");
    let client = shard.client("alice", 0);
    f(&shard, &client)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn with_shard_connects_one_client() {
        with_shard(|shard, client| {
            assert_eq!(shard.shard().lock().client_count(), 1);
            assert_eq!(client.client().generation(), 0);
            assert_eq!(client.channel().version(), Some(AbiVersion::current()));
        });
    }

    #[test]
    fn factory_tags_version() {
        let factory = RequestFactory::new("bob", 2).at_version(AbiVersion::NeonSr2);
        let request = factory.tx(0, 1, 0, TransactionPayload::Purge);
        assert_eq!(request.version(), AbiVersion::NeonSr2);
        assert_eq!(factory.client().generation(), 2);
    }
}
