//! Backend state of one local history and the transactions opened in it.

use crate::config::BackendConfig;
use crate::data_tree::DataTree;
use crate::sequence::{Admission, SequenceTracker};
use crate::transaction::{FrontendTransaction, TransactionPhase};
use shardline_access::{
    HistoryOperation, LocalHistoryIdentifier, LocalHistoryRequest, LocalHistorySuccess, RangeSet,
    RequestException, RequestFailure, RequestSuccess, Response, TransactionPayload,
    TransactionRequest, TransactionSuccess, TransactionSuccessPayload,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Lifecycle of a history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HistoryPhase {
    /// Accepting new transactions.
    Open,
    /// Closed to new transactions; existing ones may finish.
    Destroyed,
    /// Bookkeeping released; the entry is about to be dropped.
    Purged,
}

/// A local history as tracked by the shard leader.
///
/// Transactions of a non-standalone history commit in the order they were
/// opened: a commit that would overtake an earlier transaction is deferred
/// until that transaction finishes.
#[derive(Debug)]
pub struct LocalHistory {
    id: LocalHistoryIdentifier,
    phase: HistoryPhase,
    tracker: SequenceTracker<LocalHistoryRequest>,
    transactions: BTreeMap<u64, FrontendTransaction>,
    purged: RangeSet,
    window: u32,
    capacity: usize,
}

impl LocalHistory {
    pub(crate) fn new(id: LocalHistoryIdentifier, config: &BackendConfig) -> Self {
        Self {
            id,
            phase: HistoryPhase::Open,
            tracker: SequenceTracker::new(config.max_messages, config.replay_cache_capacity),
            transactions: BTreeMap::new(),
            purged: RangeSet::new(),
            window: config.max_messages,
            capacity: config.replay_cache_capacity,
        }
    }

    /// History identifier.
    pub fn id(&self) -> &LocalHistoryIdentifier {
        &self.id
    }

    /// Current phase.
    pub fn phase(&self) -> HistoryPhase {
        self.phase
    }

    /// Transaction with the given id, if it is still tracked.
    pub fn transaction(&self, transaction_id: u64) -> Option<&FrontendTransaction> {
        self.transactions.get(&transaction_id)
    }

    /// Ids of purged or skipped transactions.
    pub fn purged_transactions(&self) -> &RangeSet {
        &self.purged
    }

    fn commit_blocked(&self, transaction_id: u64) -> bool {
        !self.id.is_standalone()
            && self
                .transactions
                .range(..transaction_id)
                .any(|(_, tx)| tx.blocks_later_commits())
    }

    /// Processes a lifecycle request for this history.
    pub(crate) fn handle(&mut self, request: LocalHistoryRequest, now: Instant) -> Vec<Response> {
        let sequence = request.header.sequence;
        let mut next = match self.tracker.admit(sequence, request, now) {
            Admission::Process(request) => Some(request),
            Admission::Replay(replies) => return replies,
            Admission::Duplicate | Admission::Buffered => return Vec::new(),
            Admission::Reject(rejected) => return self.out_of_order(rejected),
        };

        let mut out = Vec::new();
        while let Some(request) = next {
            let reply = self.apply_operation(&request);
            self.tracker.record(request.header.sequence, vec![reply.clone()]);
            out.push(reply);
            if self.phase == HistoryPhase::Purged {
                break;
            }
            next = self.tracker.next_ready();
        }
        out
    }

    fn apply_operation(&mut self, request: &LocalHistoryRequest) -> Response {
        let result = match request.operation {
            HistoryOperation::Create if self.phase == HistoryPhase::Open => Ok(()),
            HistoryOperation::Create => Err(RequestException::runtime(
                format!("History {} has been destroyed", self.id),
                None,
            )),
            HistoryOperation::Destroy => {
                if self.phase == HistoryPhase::Open {
                    info!(id = %self.id, "destroying history");
                    self.phase = HistoryPhase::Destroyed;
                }
                Ok(())
            }
            HistoryOperation::Purge if self.phase == HistoryPhase::Open => {
                Err(RequestException::runtime(
                    format!("History {} has not been destroyed", self.id),
                    None,
                ))
            }
            HistoryOperation::Purge => {
                info!(id = %self.id, transactions = self.transactions.len(), "purging history");
                self.phase = HistoryPhase::Purged;
                self.transactions.clear();
                Ok(())
            }
        };
        match result {
            Ok(()) => history_success(request),
            Err(cause) => history_failure(request, cause),
        }
    }

    /// Processes a request for one of this history's transactions.
    pub(crate) fn handle_transaction(
        &mut self,
        request: TransactionRequest,
        tree: &mut dyn DataTree,
        now: Instant,
    ) -> Vec<Response> {
        let tx_id = request.header.target.transaction_id();

        if let TransactionPayload::SkipTransactions { .. } = request.payload {
            return vec![self.skip(&request)];
        }
        if self.purged.contains(tx_id) {
            let reply = match request.payload {
                TransactionPayload::Purge => {
                    transaction_success(&request, TransactionSuccessPayload::Purge)
                }
                _ => transaction_failure(
                    &request,
                    RequestException::DeadTransaction {
                        purged: self.purged.clone(),
                    },
                ),
            };
            return vec![reply];
        }
        if !self.transactions.contains_key(&tx_id) {
            match request.payload {
                TransactionPayload::PreCommit | TransactionPayload::DoCommit => {
                    debug!(id = %request.header.target, "commit phase for unknown transaction");
                    return vec![transaction_failure(
                        &request,
                        RequestException::ClosedTransaction { successful: false },
                    )];
                }
                TransactionPayload::Purge => {
                    self.purged.insert(tx_id);
                    return vec![transaction_success(&request, TransactionSuccessPayload::Purge)];
                }
                _ if self.phase != HistoryPhase::Open => {
                    return vec![transaction_failure(
                        &request,
                        RequestException::runtime(
                            format!("History {} has been destroyed", self.id),
                            None,
                        ),
                    )];
                }
                _ => {
                    let tx = FrontendTransaction::new(
                        request.header.target.clone(),
                        self.window,
                        self.capacity,
                    );
                    self.transactions.insert(tx_id, tx);
                }
            }
        }

        let mut out = Vec::new();
        let Some(tx) = self.transactions.get_mut(&tx_id) else {
            return out;
        };
        let sequence = request.header.sequence;
        let mut next = match tx.tracker.admit(sequence, request, now) {
            Admission::Process(request) => Some(request),
            Admission::Replay(replies) => return replies,
            Admission::Duplicate | Admission::Buffered => return out,
            Admission::Reject(rejected) => {
                let expected = tx.tracker.expected();
                return rejected
                    .iter()
                    .map(|r| transaction_failure(r, RequestException::OutOfOrder { expected }))
                    .collect();
            }
        };

        while let Some(request) = next {
            let blocked = self.commit_blocked(tx_id);
            let Some(tx) = self.transactions.get_mut(&tx_id) else {
                break;
            };
            out.extend(tx.handle(&request, tree, blocked));
            next = match tx.phase() {
                TransactionPhase::Purged => None,
                _ => tx.tracker.next_ready(),
            };
        }

        if let Some(tx) = self.transactions.get(&tx_id) {
            if tx.phase() == TransactionPhase::Purged {
                self.forget(tx_id, now, &mut out);
            }
        }
        out.extend(self.release_deferred(tree));
        out
    }

    /// Drops a purged transaction, failing anything still buffered for it.
    fn forget(&mut self, tx_id: u64, now: Instant, out: &mut Vec<Response>) {
        let Some(mut tx) = self.transactions.remove(&tx_id) else {
            return;
        };
        self.purged.insert(tx_id);
        let orphans = tx.tracker.expire(now, Duration::ZERO);
        for request in orphans {
            out.push(transaction_failure(
                &request,
                RequestException::DeadTransaction {
                    purged: self.purged.clone(),
                },
            ));
        }
    }

    /// Runs deferred commits that are no longer blocked, oldest first.
    fn release_deferred(&mut self, tree: &mut dyn DataTree) -> Vec<Response> {
        let waiting: Vec<u64> = self
            .transactions
            .iter()
            .filter(|(_, tx)| tx.has_deferred_commit())
            .map(|(id, _)| *id)
            .collect();
        let mut out = Vec::new();
        for tx_id in waiting {
            if self.commit_blocked(tx_id) {
                break;
            }
            let reply = self
                .transactions
                .get_mut(&tx_id)
                .and_then(|tx| tx.run_deferred(tree));
            if let Some(reply) = reply {
                out.push(reply);
            }
        }
        out
    }

    fn skip(&mut self, request: &TransactionRequest) -> Response {
        let ids = request.skipped_ids();
        for id in &ids {
            if !self.transactions.contains_key(id) {
                self.purged.insert(*id);
            }
        }
        debug!(history = %self.id, ?ids, "skipped transactions");
        transaction_success(request, TransactionSuccessPayload::SkipTransactions)
    }

    /// Fails every request that waited too long for a gap to fill.
    pub(crate) fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<Response> {
        let stale = self.tracker.expire(now, timeout);
        let mut out = self.out_of_order(stale);
        for tx in self.transactions.values_mut() {
            let expected = tx.tracker.expected();
            for request in tx.tracker.expire(now, timeout) {
                out.push(transaction_failure(&request, RequestException::OutOfOrder { expected }));
            }
        }
        out
    }

    fn out_of_order(&self, rejected: Vec<LocalHistoryRequest>) -> Vec<Response> {
        let expected = self.tracker.expected();
        rejected
            .iter()
            .map(|r| history_failure(r, RequestException::OutOfOrder { expected }))
            .collect()
    }
}

pub(crate) fn history_success(request: &LocalHistoryRequest) -> Response {
    Response::Success(RequestSuccess::History(LocalHistorySuccess {
        header: request.header.response_header(),
    }))
}

pub(crate) fn history_failure(request: &LocalHistoryRequest, cause: RequestException) -> Response {
    Response::Failure(RequestFailure::new(
        request.header.target.clone().into(),
        request.header.sequence,
        request.header.version,
        cause,
    ))
}

fn transaction_success(
    request: &TransactionRequest,
    payload: TransactionSuccessPayload,
) -> Response {
    Response::Success(RequestSuccess::Transaction(TransactionSuccess {
        header: request.header.response_header(),
        payload,
    }))
}

pub(crate) fn transaction_failure(
    request: &TransactionRequest,
    cause: RequestException,
) -> Response {
    Response::Failure(RequestFailure::new(
        request.header.target.clone().into(),
        request.header.sequence,
        request.header.version,
        cause,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_tree::InMemoryDataTree;
    use shardline_access::{
        ClientIdentifier, DataNode, DataPath, FrontendIdentifier, PersistenceProtocol, ReplyTo,
        RequestHeader, TransactionIdentifier, TransactionModification,
    };

    fn history_id(id: u64) -> LocalHistoryIdentifier {
        let fe = FrontendIdentifier::parse("member-1", "test").unwrap();
        LocalHistoryIdentifier::new(ClientIdentifier::new(fe, 0), id)
    }

    fn history_request(sequence: u64, operation: HistoryOperation) -> LocalHistoryRequest {
        LocalHistoryRequest {
            header: RequestHeader::new(history_id(1), sequence, ReplyTo::default()),
            operation,
        }
    }

    fn tx_request(tx: u64, sequence: u64, payload: TransactionPayload) -> TransactionRequest {
        TransactionRequest::new(
            TransactionIdentifier::new(history_id(1), tx),
            sequence,
            ReplyTo::default(),
            payload,
        )
    }

    fn write(path: &str, value: u64, protocol: Option<PersistenceProtocol>) -> TransactionPayload {
        TransactionPayload::Modify {
            modifications: vec![TransactionModification::Write {
                path: path.parse().unwrap(),
                data: DataNode::new(value),
            }],
            protocol,
        }
    }

    fn is_failure(response: &Response) -> bool {
        response.as_failure().is_some()
    }

    #[test]
    fn lifecycle() {
        let now = Instant::now();
        let mut history = LocalHistory::new(history_id(1), &BackendConfig::default());

        let out = history.handle(history_request(0, HistoryOperation::Purge), now);
        assert!(is_failure(&out[0]));
        assert_eq!(history.phase(), HistoryPhase::Open);

        let out = history.handle(history_request(1, HistoryOperation::Destroy), now);
        assert!(!is_failure(&out[0]));
        let out = history.handle(history_request(2, HistoryOperation::Purge), now);
        assert!(!is_failure(&out[0]));
        assert_eq!(history.phase(), HistoryPhase::Purged);
    }

    #[test]
    fn destroyed_history_rejects_new_transactions() {
        let now = Instant::now();
        let mut tree = InMemoryDataTree::new();
        let mut history = LocalHistory::new(history_id(1), &BackendConfig::default());
        history.handle(history_request(0, HistoryOperation::Destroy), now);

        let out =
            history.handle_transaction(tx_request(0, 0, write("/a", 1, None)), &mut tree, now);
        assert!(is_failure(&out[0]));
        assert!(history.transaction(0).is_none());
    }

    #[test]
    fn commits_follow_open_order() {
        let now = Instant::now();
        let mut tree = InMemoryDataTree::new();
        let mut history = LocalHistory::new(history_id(1), &BackendConfig::default());

        let out = history.handle_transaction(
            tx_request(0, 0, write("/a", 1, Some(PersistenceProtocol::Ready))),
            &mut tree,
            now,
        );
        assert_eq!(out.len(), 1);

        let out = history.handle_transaction(
            tx_request(1, 0, write("/a", 2, Some(PersistenceProtocol::Simple))),
            &mut tree,
            now,
        );
        assert!(out.is_empty(), "later commit must wait");
        assert!(tree.is_empty());

        let commit_first = TransactionPayload::Modify {
            modifications: Vec::new(),
            protocol: Some(PersistenceProtocol::Simple),
        };
        let out = history.handle_transaction(tx_request(0, 1, commit_first), &mut tree, now);
        assert_eq!(out.len(), 2);
        assert_eq!(
            out[0].target().to_string(),
            TransactionIdentifier::new(history_id(1), 0).to_string()
        );
        assert_eq!(out[1].transaction_payload(), Some(&TransactionSuccessPayload::Commit));
        assert_eq!(tree.read(&"/a".parse::<DataPath>().unwrap()), Some(DataNode::new(2u64)));
    }

    #[test]
    fn purge_is_idempotent() {
        let now = Instant::now();
        let mut tree = InMemoryDataTree::new();
        let mut history = LocalHistory::new(history_id(1), &BackendConfig::default());
        history.handle_transaction(
            tx_request(0, 0, write("/a", 1, Some(PersistenceProtocol::Simple))),
            &mut tree,
            now,
        );

        let first =
            history.handle_transaction(tx_request(0, 1, TransactionPayload::Purge), &mut tree, now);
        let second =
            history.handle_transaction(tx_request(0, 2, TransactionPayload::Purge), &mut tree, now);
        assert_eq!(first[0].kind(), second[0].kind());
        assert!(history.purged_transactions().contains(0));

        let late = history.handle_transaction(
            tx_request(
                0,
                3,
                TransactionPayload::Read {
                    path: DataPath::root(),
                    snapshot_only: false,
                },
            ),
            &mut tree,
            now,
        );
        assert!(matches!(
            late[0].as_failure().map(|f| &f.cause),
            Some(RequestException::DeadTransaction { .. })
        ));
    }

    #[test]
    fn skip_marks_unmaterialized_ids() {
        let now = Instant::now();
        let mut tree = InMemoryDataTree::new();
        let mut history = LocalHistory::new(history_id(1), &BackendConfig::default());
        history.handle_transaction(tx_request(3, 0, write("/a", 1, None)), &mut tree, now);

        let skip = tx_request(2, 0, TransactionPayload::SkipTransactions { others: vec![3, 4] });
        let out = history.handle_transaction(skip, &mut tree, now);
        assert_eq!(
            out[0].transaction_payload(),
            Some(&TransactionSuccessPayload::SkipTransactions)
        );
        assert!(history.purged_transactions().contains(2));
        assert!(!history.purged_transactions().contains(3));
        assert!(history.purged_transactions().contains(4));
        assert!(history.transaction(3).is_some());
    }

    #[test]
    fn unknown_transaction_commit_is_closed() {
        let now = Instant::now();
        let mut tree = InMemoryDataTree::new();
        let mut history = LocalHistory::new(history_id(1), &BackendConfig::default());
        let do_commit = tx_request(9, 0, TransactionPayload::DoCommit);
        let out = history.handle_transaction(do_commit, &mut tree, now);
        assert_eq!(
            out[0].as_failure().map(|f| &f.cause),
            Some(&RequestException::ClosedTransaction { successful: false })
        );
        assert!(history.transaction(9).is_none());
    }
}
