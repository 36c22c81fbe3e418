//! Per-target sequence validation, replay cache and out-of-order buffer.

use shardline_access::Response;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// What to do with an incoming request.
#[derive(Debug)]
pub enum Admission<R> {
    /// Next in sequence: process it.
    Process(R),
    /// Already answered: resend these replies.
    Replay(Vec<Response>),
    /// Already accepted and still being worked on: drop it.
    Duplicate,
    /// Ahead of sequence but inside the window: held until the gap fills.
    Buffered,
    /// Fail all of these with an out-of-order error.
    Reject(Vec<R>),
}

/// Sequence state for one transaction or history.
///
/// Requests are admitted strictly in sequence order. Replies to processed
/// requests are cached, up to a capacity, so retries are answered without
/// reprocessing.
#[derive(Debug)]
pub struct SequenceTracker<R> {
    expected: u64,
    window: u64,
    capacity: usize,
    replies: VecDeque<(u64, Vec<Response>)>,
    in_flight: BTreeSet<u64>,
    buffered: BTreeMap<u64, (R, Instant)>,
}

impl<R> SequenceTracker<R> {
    /// Tracker expecting sequence 0, with a flow-control window of `window`
    /// requests and room for `capacity` cached replies.
    pub fn new(window: u32, capacity: usize) -> Self {
        Self {
            expected: 0,
            window: u64::from(window.max(1)),
            capacity: capacity.max(1),
            replies: VecDeque::new(),
            in_flight: BTreeSet::new(),
            buffered: BTreeMap::new(),
        }
    }

    /// Next sequence number this tracker will process.
    pub fn expected(&self) -> u64 {
        self.expected
    }

    /// Number of requests waiting for an earlier sequence.
    pub fn buffered_len(&self) -> usize {
        self.buffered.len()
    }

    /// Classifies an arriving request.
    pub fn admit(&mut self, sequence: u64, request: R, now: Instant) -> Admission<R> {
        if sequence < self.expected {
            if let Some((_, replies)) = self.replies.iter().find(|(s, _)| *s == sequence) {
                debug!(sequence, "replaying cached reply");
                return Admission::Replay(replies.clone());
            }
            if self.in_flight.contains(&sequence) {
                debug!(sequence, "dropping duplicate of a request still in progress");
                return Admission::Duplicate;
            }
            debug!(sequence, expected = self.expected, "reply no longer cached");
            return Admission::Reject(vec![request]);
        }

        if sequence == self.expected {
            self.in_flight.insert(sequence);
            self.expected += 1;
            return Admission::Process(request);
        }

        if sequence - self.expected >= self.window {
            debug!(sequence, expected = self.expected, "request beyond the window");
            return Admission::Reject(vec![request]);
        }

        if self.buffered.contains_key(&sequence) {
            return Admission::Duplicate;
        }
        self.buffered.insert(sequence, (request, now));
        if self.buffered.len() as u64 >= self.window - 1 {
            debug!(expected = self.expected, "window filled without the expected request");
            return Admission::Reject(self.drain());
        }
        Admission::Buffered
    }

    /// Stores the replies to a processed request. An empty list means the
    /// reply is still pending and retries are dropped until it is recorded.
    pub fn record(&mut self, sequence: u64, replies: Vec<Response>) {
        if replies.is_empty() {
            return;
        }
        self.in_flight.remove(&sequence);
        self.replies.push_back((sequence, replies));
        while self.replies.len() > self.capacity {
            self.replies.pop_front();
        }
    }

    /// Releases the buffered request that is now next in sequence, if any.
    pub fn next_ready(&mut self) -> Option<R> {
        let (request, _) = self.buffered.remove(&self.expected)?;
        self.in_flight.insert(self.expected);
        self.expected += 1;
        Some(request)
    }

    /// Gives up on the gap if any buffered request has waited `timeout`.
    pub fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<R> {
        let stale = self
            .buffered
            .values()
            .any(|(_, arrived)| now.saturating_duration_since(*arrived) >= timeout);
        if stale {
            debug!(expected = self.expected, "buffered requests timed out");
            self.drain()
        } else {
            Vec::new()
        }
    }

    fn drain(&mut self) -> Vec<R> {
        std::mem::take(&mut self.buffered).into_values().map(|(r, _)| r).collect()
    }
}
