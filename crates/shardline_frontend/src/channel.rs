//! A logical connection from one frontend generation to one shard backend.

use crate::config::FrontendConfig;
use crate::error::{FrontendError, FrontendResult};
use crate::transport::BackendTransport;
use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use shardline_access::{
    decode_message, encode_request, AbiVersion, ActorAddress, ClientIdentifier,
    ConnectClientRequest, LocalSnapshot, Message, ProxyError, ReplyTo, Request, RequestSuccess,
    RequestTarget, Response,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// What the backend told us at connect time.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Negotiated ABI version.
    pub version: AbiVersion,
    /// Answering backend.
    pub backend: ActorAddress,
    /// Other replicas of the shard.
    pub alternates: Vec<ActorAddress>,
    /// In-process snapshot of the data tree, if the backend is local.
    pub snapshot: Option<LocalSnapshot>,
    /// Maximum number of unanswered requests.
    pub max_messages: u32,
}

/// Channel statistics.
#[derive(Debug, Clone, Default)]
pub struct ChannelStats {
    /// Requests handed to the transport, resends included.
    pub requests_sent: u64,
    /// Resends.
    pub retries: u64,
    /// Replies that arrived for a request other than the one being sent.
    pub replies_stashed: u64,
}

/// Sequences requests per target, resends them with backoff and matches
/// replies by target and sequence.
///
/// A reply that arrives alongside the answer to a different request (a
/// released deferred commit, say) is kept until its own request asks for
/// it.
pub struct BackendChannel<T: BackendTransport> {
    config: FrontendConfig,
    client: ClientIdentifier,
    transport: Arc<T>,
    channel_id: u64,
    connection: RwLock<Option<Connection>>,
    sequences: Mutex<HashMap<RequestTarget, u64>>,
    stash: Mutex<HashMap<(RequestTarget, u64), Response>>,
    stats: RwLock<ChannelStats>,
    outstanding: AtomicU32,
    tokens: AtomicU64,
}

impl<T: BackendTransport> std::fmt::Debug for BackendChannel<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendChannel")
            .field("client", &self.client)
            .field("channel_id", &self.channel_id)
            .field("connection", &*self.connection.read())
            .finish_non_exhaustive()
    }
}

impl<T: BackendTransport> BackendChannel<T> {
    /// Opens a channel and negotiates the ABI version.
    ///
    /// # Errors
    ///
    /// Fails if the backend rejects the connect or never answers.
    pub fn connect(config: FrontendConfig, transport: T) -> FrontendResult<Self> {
        let channel = Self {
            client: config.client_identifier(),
            config,
            transport: Arc::new(transport),
            channel_id: rand::random(),
            connection: RwLock::new(None),
            sequences: Mutex::new(HashMap::new()),
            stash: Mutex::new(HashMap::new()),
            stats: RwLock::new(ChannelStats::default()),
            outstanding: AtomicU32::new(0),
            tokens: AtomicU64::new(0),
        };
        channel.handshake()?;
        Ok(channel)
    }

    /// Reconnects after the backend reported it lost leadership.
    ///
    /// # Errors
    ///
    /// Fails if the backend rejects the connect or never answers.
    pub fn reconnect(&self) -> FrontendResult<()> {
        *self.connection.write() = None;
        self.handshake()
    }

    fn handshake(&self) -> FrontendResult<()> {
        let target = RequestTarget::Client(self.client.clone());
        let request = ConnectClientRequest::new(
            self.client.clone(),
            self.next_sequence(&target),
            self.reply_to(),
            self.config.min_version,
            self.config.max_version,
        );

        let request = Request::Connect(request);
        let response = {
            let _slot = self.acquire_slot(None)?;
            let frame = self.prepare(&request)?;
            self.exchange_with_retry(&request, frame.as_ref())?
        };
        let success = match response {
            Response::Success(RequestSuccess::Connect(success)) => success,
            other => {
                return Err(FrontendError::UnexpectedResponse {
                    expected: "ConnectClientSuccess",
                    actual: other.kind(),
                })
            }
        };

        info!(
            client = %self.client,
            backend = %success.backend,
            version = %success.header.version,
            max_messages = success.max_messages,
            "connected to backend"
        );
        *self.connection.write() = Some(Connection {
            version: success.header.version,
            backend: success.backend,
            alternates: success.alternates,
            snapshot: success.data_tree_snapshot,
            max_messages: success.max_messages,
        });
        Ok(())
    }

    /// The frontend generation this channel speaks for.
    pub fn client(&self) -> &ClientIdentifier {
        &self.client
    }

    /// Frontend configuration.
    pub fn config(&self) -> &FrontendConfig {
        &self.config
    }

    /// The underlying transport.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Current connection details, if connected.
    pub fn connection(&self) -> Option<Connection> {
        self.connection.read().clone()
    }

    /// Negotiated ABI version, if connected.
    pub fn version(&self) -> Option<AbiVersion> {
        self.connection.read().as_ref().map(|c| c.version)
    }

    /// Whether the channel may send requests.
    pub fn is_connected(&self) -> bool {
        self.connection.read().is_some() && self.transport.is_connected()
    }

    /// Gets the current stats.
    pub fn stats(&self) -> ChannelStats {
        self.stats.read().clone()
    }

    /// Allocates the next sequence number for `target`.
    pub fn next_sequence(&self, target: &RequestTarget) -> u64 {
        let mut sequences = self.sequences.lock();
        let next = sequences.entry(target.clone()).or_insert(0);
        let sequence = *next;
        *next += 1;
        sequence
    }

    /// Hands back `sequence` when it is the last one drawn for `target` and
    /// its request never reached the transport, so the next request reuses it.
    fn release_sequence(&self, target: &RequestTarget, sequence: u64) {
        if let Some(next) = self.sequences.lock().get_mut(target) {
            if *next == sequence + 1 {
                *next = sequence;
            }
        }
    }

    /// Drops the sequence counter of a target that will never be addressed
    /// again.
    pub fn forget(&self, target: &RequestTarget) {
        self.sequences.lock().remove(target);
    }

    /// A fresh reply handle on this channel.
    pub fn reply_to(&self) -> ReplyTo {
        ReplyTo::new(self.channel_id, self.tokens.fetch_add(1, Ordering::Relaxed))
    }

    /// Closes the channel and its transport.
    ///
    /// # Errors
    ///
    /// Propagates transport errors.
    pub fn close(&self) -> FrontendResult<()> {
        *self.connection.write() = None;
        self.transport.close()
    }

    /// Sends `request` at the negotiated version and waits for its reply.
    ///
    /// A failure reply is turned into an error. After a not-leader reply the
    /// channel refuses further requests until [`reconnect`](Self::reconnect).
    ///
    /// # Errors
    ///
    /// [`FrontendError::NotConnected`] before connect or after losing the
    /// leader, [`FrontendError::WindowFull`] when too many requests are
    /// unanswered, an encoding error when the request has no wire form at the
    /// negotiated version, or the failure the backend replied with. A request
    /// refused before reaching the transport gives its sequence back.
    pub fn invoke(&self, request: Request) -> FrontendResult<Response> {
        let connected = self.connection.read().as_ref().map(|c| (c.version, c.max_messages));
        let Some((version, limit)) = connected else {
            return Err(self.refuse(&request, FrontendError::NotConnected));
        };
        let _slot = match self.acquire_slot(Some(limit)) {
            Ok(slot) => slot,
            Err(e) => return Err(self.refuse(&request, e)),
        };
        let request = request.clone_as_version(version);
        let frame = match self.prepare(&request) {
            Ok(frame) => frame,
            Err(e) => return Err(self.refuse(&request, e)),
        };

        let result = self.exchange_with_retry(&request, frame.as_ref());
        if let Err(FrontendError::NotLeader { actor }) = &result {
            warn!(client = %self.client, %actor, "backend lost leadership, disconnecting");
            *self.connection.write() = None;
        }
        result
    }

    /// Gives back the sequence of a request that never reached the transport.
    fn refuse(&self, request: &Request, error: FrontendError) -> FrontendError {
        debug!(to = %request.target(), sequence = request.sequence(), %error, "request refused");
        self.release_sequence(&request.target(), request.sequence());
        error
    }

    /// The frame to send, or `None` when the transport takes requests as they
    /// are.
    fn prepare(&self, request: &Request) -> FrontendResult<Option<Bytes>> {
        if self.transport.supports_local_delivery() {
            return Ok(None);
        }
        if request.is_local() {
            return Err(ProxyError::LocalOnly { kind: request.kind() }.into());
        }
        Ok(Some(encode_request(request)?))
    }

    fn exchange_with_retry(
        &self,
        request: &Request,
        frame: Option<&Bytes>,
    ) -> FrontendResult<Response> {
        let key = (request.target(), request.sequence());
        let retry_config = &self.config.retry;
        let started = Instant::now();
        let mut last_error = None;

        for attempt in 0..retry_config.max_attempts {
            if attempt > 0 {
                if started.elapsed() >= self.config.request_timeout {
                    break;
                }
                std::thread::sleep(retry_config.backoff(attempt));
                self.stats.write().retries += 1;
                debug!(to = %key.0, sequence = key.1, attempt, "resending request");
            }

            if let Some(response) = self.stash.lock().remove(&key) {
                return settle(response);
            }

            let responses = match self.exchange(request, frame) {
                Ok(responses) => responses,
                Err(e) if e.is_retryable() => {
                    last_error = Some(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            match self.route(&key, responses) {
                Some(response) => match settle(response) {
                    Err(e) if e.is_retryable() => last_error = Some(e),
                    other => return other,
                },
                None => debug!(to = %key.0, sequence = key.1, "no reply yet"),
            }
        }

        if let Some(error) = last_error {
            warn!(to = %key.0, sequence = key.1, %error, "giving up after retriable failures");
        }
        Err(FrontendError::Timeout {
            attempts: retry_config.max_attempts,
        })
    }

    fn exchange(&self, request: &Request, frame: Option<&Bytes>) -> FrontendResult<Vec<Response>> {
        self.stats.write().requests_sent += 1;
        let Some(frame) = frame else {
            return self.transport.deliver_local(request.clone());
        };

        let frames = self.transport.send(frame.clone())?;
        let mut responses = Vec::with_capacity(frames.len());
        for frame in frames {
            match decode_message(&frame)? {
                Message::Response(response) => responses.push(response),
                Message::Request(other) => {
                    warn!(kind = other.kind(), "backend sent a request frame, ignoring");
                }
            }
        }
        Ok(responses)
    }

    fn route(&self, key: &(RequestTarget, u64), responses: Vec<Response>) -> Option<Response> {
        let mut answer = None;
        for response in responses {
            if answer.is_none() && response.sequence() == key.1 && response.target() == key.0 {
                answer = Some(response);
            } else {
                self.stats.write().replies_stashed += 1;
                self.stash.lock().insert((response.target(), response.sequence()), response);
            }
        }
        answer
    }

    fn acquire_slot(&self, limit: Option<u32>) -> FrontendResult<SlotGuard<'_>> {
        let previous = self.outstanding.fetch_add(1, Ordering::SeqCst);
        let guard = SlotGuard(&self.outstanding);
        match limit {
            Some(limit) if previous >= limit => Err(FrontendError::WindowFull { limit }),
            _ => Ok(guard),
        }
    }
}

/// Releases an outstanding-request slot on drop.
struct SlotGuard<'a>(&'a AtomicU32);

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

fn settle(response: Response) -> FrontendResult<Response> {
    match response {
        Response::Failure(failure) => Err(failure.cause.into()),
        success => Ok(success),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use crate::transport::MockTransport;
    use shardline_access::{
        encode_response, ConnectClientSuccess, LocalHistoryIdentifier, RequestException,
        ResponseHeader, TransactionIdentifier, TransactionPayload, TransactionRequest,
        TransactionSuccess, TransactionSuccessPayload,
    };
    use std::time::Duration;

    fn config() -> FrontendConfig {
        FrontendConfig::for_member("member-1", "test")
            .unwrap()
            .with_retry(RetryConfig::new(3).with_initial_delay(Duration::from_millis(1)))
    }

    fn connect_frame(
        client: &ClientIdentifier,
        sequence: u64,
        version: AbiVersion,
        max_messages: u32,
    ) -> Bytes {
        let success = ConnectClientSuccess {
            header: ResponseHeader {
                target: client.clone(),
                sequence,
                version,
            },
            backend: ActorAddress::new("shard-default"),
            alternates: vec![ActorAddress::new("shard-default@member-2")],
            data_tree_snapshot: None,
            max_messages,
        };
        encode_response(&Response::Success(RequestSuccess::Connect(success))).unwrap()
    }

    fn connected(max_messages: u32) -> BackendChannel<MockTransport> {
        let config = config();
        let transport = MockTransport::new();
        let client = config.client_identifier();
        transport.push_answer(vec![connect_frame(&client, 0, AbiVersion::SodiumSr1, max_messages)]);
        BackendChannel::connect(config, transport).unwrap()
    }

    fn tx(channel: &BackendChannel<MockTransport>, id: u64) -> TransactionIdentifier {
        TransactionIdentifier::new(LocalHistoryIdentifier::standalone(channel.client().clone()), id)
    }

    fn purge_request(channel: &BackendChannel<MockTransport>, id: u64) -> Request {
        let target = tx(channel, id);
        let sequence = channel.next_sequence(&RequestTarget::Transaction(target.clone()));
        TransactionRequest::new(target, sequence, channel.reply_to(), TransactionPayload::Purge)
            .into()
    }

    fn purge_frame(target: TransactionIdentifier, sequence: u64) -> Bytes {
        let success = TransactionSuccess {
            header: ResponseHeader {
                target,
                sequence,
                version: AbiVersion::SodiumSr1,
            },
            payload: TransactionSuccessPayload::Purge,
        };
        encode_response(&Response::Success(RequestSuccess::Transaction(success))).unwrap()
    }

    #[test]
    fn connect_records_negotiated_details() {
        let channel = connected(8);
        let connection = channel.connection().unwrap();
        assert_eq!(connection.version, AbiVersion::SodiumSr1);
        assert_eq!(connection.max_messages, 8);
        assert_eq!(connection.alternates.len(), 1);
        assert!(channel.is_connected());
    }

    #[test]
    fn connect_without_answer_times_out() {
        let result = BackendChannel::connect(config(), MockTransport::new());
        assert!(matches!(result, Err(FrontendError::Timeout { attempts: 3 })));
    }

    #[test]
    fn silence_is_resent_with_same_sequence() {
        let channel = connected(8);
        let request = purge_request(&channel, 1);
        channel.transport().push_answer(Vec::new());
        channel.transport().push_answer(vec![purge_frame(tx(&channel, 1), 0)]);

        let response = channel.invoke(request).unwrap();
        assert_eq!(response.transaction_payload(), Some(&TransactionSuccessPayload::Purge));

        let sent = channel.transport().sent();
        // connect + two identical attempts
        assert_eq!(sent.len(), 3);
        assert_eq!(sent[1], sent[2]);
        assert_eq!(channel.stats().retries, 1);
    }

    #[test]
    fn replies_for_other_requests_are_stashed() {
        let channel = connected(8);
        let first = purge_request(&channel, 1);
        let second = purge_request(&channel, 2);
        channel
            .transport()
            .push_answer(vec![purge_frame(tx(&channel, 2), 0), purge_frame(tx(&channel, 1), 0)]);

        channel.invoke(first).unwrap();
        let sent_before = channel.transport().sent().len();
        channel.invoke(second).unwrap();
        assert_eq!(channel.transport().sent().len(), sent_before);
        assert_eq!(channel.stats().replies_stashed, 1);
    }

    #[test]
    fn hard_failure_is_not_retried() {
        let channel = connected(8);
        let request = purge_request(&channel, 1);
        let failure = request.to_failure(RequestException::OutOfOrder { expected: 4 });
        channel
            .transport()
            .push_answer(vec![encode_response(&Response::Failure(failure)).unwrap()]);

        let err = channel.invoke(request).unwrap_err();
        assert!(matches!(
            err.request_exception(),
            Some(RequestException::OutOfOrder { expected: 4 })
        ));
        assert_eq!(channel.transport().sent().len(), 2);
    }

    #[test]
    fn not_leader_disconnects_until_reconnect() {
        let channel = connected(8);
        let request = purge_request(&channel, 1);
        let failure = request.to_failure(RequestException::NotLeader {
            actor: ActorAddress::new("shard-default"),
        });
        channel
            .transport()
            .push_answer(vec![encode_response(&Response::Failure(failure)).unwrap()]);

        assert!(matches!(channel.invoke(request), Err(FrontendError::NotLeader { .. })));
        assert!(!channel.is_connected());
        assert!(matches!(
            channel.invoke(purge_request(&channel, 2)),
            Err(FrontendError::NotConnected)
        ));

        let client = channel.client().clone();
        let reconnect = connect_frame(&client, 1, AbiVersion::Magnesium, 8);
        channel.transport().push_answer(vec![reconnect]);
        channel.reconnect().unwrap();
        assert_eq!(channel.version(), Some(AbiVersion::Magnesium));
    }

    #[test]
    fn transient_transport_errors_are_retried() {
        let channel = connected(8);
        let request = purge_request(&channel, 1);
        channel.transport().push_error(FrontendError::transport_retryable("reset"));
        channel.transport().push_answer(vec![purge_frame(tx(&channel, 1), 0)]);
        assert!(channel.invoke(request).is_ok());
    }

    #[test]
    fn sequences_are_per_target() {
        let channel = connected(8);
        let a = RequestTarget::Transaction(tx(&channel, 1));
        let b = RequestTarget::Transaction(tx(&channel, 2));
        assert_eq!(channel.next_sequence(&a), 0);
        assert_eq!(channel.next_sequence(&a), 1);
        assert_eq!(channel.next_sequence(&b), 0);
        channel.forget(&a);
        assert_eq!(channel.next_sequence(&a), 0);
    }

    #[test]
    fn window_limit_is_enforced() {
        let channel = connected(1);
        let _held = channel.acquire_slot(Some(1)).unwrap();
        let err = channel.invoke(purge_request(&channel, 1)).unwrap_err();
        assert!(matches!(err, FrontendError::WindowFull { limit: 1 }));
    }

    #[test]
    fn refused_request_gives_its_sequence_back() {
        let channel = connected(1);
        let held = channel.acquire_slot(Some(1)).unwrap();
        let err = channel.invoke(purge_request(&channel, 1)).unwrap_err();
        assert!(matches!(err, FrontendError::WindowFull { .. }));
        drop(held);

        let request = purge_request(&channel, 1);
        assert_eq!(request.sequence(), 0);
        channel.transport().push_answer(vec![purge_frame(tx(&channel, 1), 0)]);
        assert!(channel.invoke(request).is_ok());
        assert_eq!(channel.transport().sent().len(), 2);
    }

    #[test]
    fn request_refused_while_disconnected_gives_its_sequence_back() {
        let channel = connected(8);
        channel.close().unwrap();
        let target = RequestTarget::Transaction(tx(&channel, 1));
        let err = channel.invoke(purge_request(&channel, 1)).unwrap_err();
        assert!(matches!(err, FrontendError::NotConnected));
        assert_eq!(channel.next_sequence(&target), 0);
    }

    #[test]
    fn reconnect_uses_the_next_client_sequence() {
        let channel = connected(8);
        let client = channel.client().clone();
        channel.transport().push_answer(vec![connect_frame(&client, 1, AbiVersion::Magnesium, 8)]);
        channel.reconnect().unwrap();
        assert_eq!(channel.next_sequence(&RequestTarget::Client(client)), 2);
    }
}
