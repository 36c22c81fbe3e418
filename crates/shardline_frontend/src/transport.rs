//! Transport layer abstraction between a frontend and a shard backend.

use crate::error::{FrontendError, FrontendResult};
use bytes::Bytes;
use parking_lot::Mutex;
use shardline_access::{ProxyError, Request, Response};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};

/// A backend transport carries request frames to a shard and brings back
/// whatever response frames the shard emitted while handling them.
///
/// A reply may be absent (the backend buffered or deferred the request),
/// and frames answering earlier requests may arrive together with the
/// current one.
pub trait BackendTransport: Send + Sync {
    /// Sends one encoded request frame.
    fn send(&self, frame: Bytes) -> FrontendResult<Vec<Bytes>>;

    /// Whether the backend shares the process. When true every request goes
    /// through [`deliver_local`](Self::deliver_local) instead of
    /// [`send`](Self::send).
    fn supports_local_delivery(&self) -> bool {
        false
    }

    /// Hands a request to an in-process backend without serializing it.
    fn deliver_local(&self, request: Request) -> FrontendResult<Vec<Response>> {
        Err(ProxyError::LocalOnly { kind: request.kind() }.into())
    }

    /// Checks if the transport is connected.
    fn is_connected(&self) -> bool;

    /// Closes the transport connection.
    fn close(&self) -> FrontendResult<()>;
}

/// A mock transport for testing: replays scripted answers and records
/// every frame it was given.
#[derive(Debug)]
pub struct MockTransport {
    connected: AtomicBool,
    answers: Mutex<VecDeque<FrontendResult<Vec<Bytes>>>>,
    sent: Mutex<Vec<Bytes>>,
}

impl MockTransport {
    /// Creates a new mock transport.
    pub fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            answers: Mutex::new(VecDeque::new()),
            sent: Mutex::new(Vec::new()),
        }
    }

    /// Queues the frames returned by the next `send`.
    pub fn push_answer(&self, frames: Vec<Bytes>) {
        self.answers.lock().push_back(Ok(frames));
    }

    /// Queues an error returned by the next `send`.
    pub fn push_error(&self, error: FrontendError) {
        self.answers.lock().push_back(Err(error));
    }

    /// Frames sent so far.
    pub fn sent(&self) -> Vec<Bytes> {
        self.sent.lock().clone()
    }

    /// Sets the connected state.
    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl Default for MockTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendTransport for MockTransport {
    fn send(&self, frame: Bytes) -> FrontendResult<Vec<Bytes>> {
        if !self.is_connected() {
            return Err(FrontendError::NotConnected);
        }
        self.sent.lock().push(frame);
        // an empty script means the backend stayed silent
        self.answers.lock().pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn close(&self) -> FrontendResult<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}
