//! Backend state of one frontend transaction.

use crate::data_tree::{read_through, DataTree};
use crate::sequence::SequenceTracker;
use shardline_access::{
    PersistenceProtocol, RequestException, RequestFailure, RequestHeader, RequestSuccess, Response,
    ResponseHeader, TransactionIdentifier, TransactionModification, TransactionPayload,
    TransactionRequest, TransactionSuccess, TransactionSuccessPayload,
};
use tracing::{debug, info, warn};

/// Where a transaction stands in the persistence protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransactionPhase {
    /// Accepting modifications and reads.
    Open,
    /// Sealed; waiting for a commit decision.
    Ready,
    /// Passed can-commit.
    CanCommitted,
    /// Passed pre-commit.
    PreCommitted,
    /// Applied to the data tree.
    Committed,
    /// Discarded.
    Aborted,
    /// Bookkeeping released; the entry is about to be dropped.
    Purged,
}

impl TransactionPhase {
    /// Whether the transaction reached a final outcome.
    pub fn is_finished(self) -> bool {
        matches!(self, Self::Committed | Self::Aborted | Self::Purged)
    }
}

/// A transaction as tracked by the shard leader.
#[derive(Debug)]
pub struct FrontendTransaction {
    id: TransactionIdentifier,
    phase: TransactionPhase,
    modifications: Vec<TransactionModification>,
    pub(crate) tracker: SequenceTracker<TransactionRequest>,
    deferred: Option<ResponseHeader<TransactionIdentifier>>,
}

impl FrontendTransaction {
    pub(crate) fn new(id: TransactionIdentifier, window: u32, capacity: usize) -> Self {
        debug!(%id, "opening transaction");
        Self {
            id,
            phase: TransactionPhase::Open,
            modifications: Vec::new(),
            tracker: SequenceTracker::new(window, capacity),
            deferred: None,
        }
    }

    /// Transaction identifier.
    pub fn id(&self) -> &TransactionIdentifier {
        &self.id
    }

    /// Current phase.
    pub fn phase(&self) -> TransactionPhase {
        self.phase
    }

    /// Modifications accumulated so far.
    pub fn modifications(&self) -> &[TransactionModification] {
        &self.modifications
    }

    /// Whether a commit is waiting for earlier transactions of the history.
    pub fn has_deferred_commit(&self) -> bool {
        self.deferred.is_some()
    }

    /// Whether later transactions of the same history must wait for this
    /// one before committing. Read-only open transactions never block.
    pub(crate) fn blocks_later_commits(&self) -> bool {
        match self.phase {
            TransactionPhase::Open => !self.modifications.is_empty(),
            TransactionPhase::Ready
            | TransactionPhase::CanCommitted
            | TransactionPhase::PreCommitted => true,
            TransactionPhase::Committed | TransactionPhase::Aborted | TransactionPhase::Purged => {
                false
            }
        }
    }

    fn closed(&self) -> RequestException {
        RequestException::ClosedTransaction {
            successful: self.phase == TransactionPhase::Committed,
        }
    }

    /// Processes an admitted request and records its replies.
    ///
    /// Returns every response to send, which may include the answer to an
    /// earlier deferred commit this request cancelled. An empty result
    /// means the commit was deferred. `commit_blocked` tells whether an
    /// earlier transaction of the history still has to commit first.
    pub(crate) fn handle(
        &mut self,
        request: &TransactionRequest,
        tree: &mut dyn DataTree,
        commit_blocked: bool,
    ) -> Vec<Response> {
        let header = &request.header;
        let mut out = Vec::new();
        let result = match &request.payload {
            TransactionPayload::Modify { modifications, protocol } => {
                self.modify(modifications, *protocol, header, tree, commit_blocked, &mut out)
            }
            TransactionPayload::CommitLocal {
                modifications,
                coordinated,
            } => {
                if self.phase == TransactionPhase::Open && !self.modifications.is_empty() {
                    Err(RequestException::UnsupportedRequest {
                        kind: request.kind().to_string(),
                    })
                } else {
                    let protocol = Some(PersistenceProtocol::for_commit(*coordinated));
                    self.modify(modifications, protocol, header, tree, commit_blocked, &mut out)
                }
            }
            TransactionPayload::Read { path, snapshot_only } => {
                self.ensure_open().map(|()| {
                    let base = tree.read(path);
                    let data = if *snapshot_only {
                        base
                    } else {
                        read_through(base, path, &self.modifications)
                    };
                    Some(TransactionSuccessPayload::Read { data })
                })
            }
            TransactionPayload::Exists { path, snapshot_only } => self.ensure_open().map(|()| {
                let exists = if *snapshot_only {
                    tree.exists(path)
                } else {
                    read_through(tree.read(path), path, &self.modifications).is_some()
                };
                Some(TransactionSuccessPayload::Exists { exists })
            }),
            TransactionPayload::PreCommit => {
                if self.phase == TransactionPhase::CanCommitted {
                    self.pre_commit(tree).map(|()| Some(TransactionSuccessPayload::PreCommit))
                } else {
                    Err(self.closed())
                }
            }
            TransactionPayload::DoCommit => {
                if self.phase == TransactionPhase::PreCommitted && self.deferred.is_none() {
                    self.commit(header, tree, commit_blocked)
                        .map(|committed| committed.then_some(TransactionSuccessPayload::Commit))
                } else {
                    Err(self.closed())
                }
            }
            TransactionPayload::Abort | TransactionPayload::AbortLocal => {
                if self.phase == TransactionPhase::Committed {
                    Err(self.closed())
                } else {
                    self.abort(&mut out);
                    Ok(Some(TransactionSuccessPayload::Abort))
                }
            }
            TransactionPayload::Purge => {
                if !self.phase.is_finished() {
                    self.abort(&mut out);
                }
                info!(id = %self.id, "purging transaction");
                self.phase = TransactionPhase::Purged;
                Ok(Some(TransactionSuccessPayload::Purge))
            }
            TransactionPayload::SkipTransactions { .. } => {
                Ok(Some(TransactionSuccessPayload::SkipTransactions))
            }
        };

        let reply = match result {
            Ok(Some(payload)) => Some(success(header, payload)),
            Ok(None) => None,
            Err(cause) => {
                debug!(id = %self.id, kind = request.kind(), %cause, "transaction request failed");
                Some(failure(header, cause))
            }
        };
        if let Some(reply) = reply {
            self.tracker.record(header.sequence, vec![reply.clone()]);
            out.push(reply);
        }
        out
    }

    /// Runs a deferred commit once nothing blocks it any more.
    pub(crate) fn run_deferred(&mut self, tree: &mut dyn DataTree) -> Option<Response> {
        let header = self.deferred.take()?;
        info!(id = %self.id, "running deferred commit");
        let reply = match self.apply(tree) {
            Ok(()) => Response::Success(RequestSuccess::Transaction(TransactionSuccess {
                header: header.clone(),
                payload: TransactionSuccessPayload::Commit,
            })),
            Err(cause) => Response::Failure(RequestFailure::new(
                header.target.clone().into(),
                header.sequence,
                header.version,
                cause,
            )),
        };
        self.tracker.record(header.sequence, vec![reply.clone()]);
        Some(reply)
    }

    fn ensure_open(&self) -> Result<(), RequestException> {
        if self.phase == TransactionPhase::Open {
            Ok(())
        } else {
            Err(self.closed())
        }
    }

    fn modify(
        &mut self,
        modifications: &[TransactionModification],
        protocol: Option<PersistenceProtocol>,
        header: &RequestHeader<TransactionIdentifier>,
        tree: &mut dyn DataTree,
        commit_blocked: bool,
        out: &mut Vec<Response>,
    ) -> Result<Option<TransactionSuccessPayload>, RequestException> {
        match self.phase {
            TransactionPhase::Open => self.modifications.extend_from_slice(modifications),
            TransactionPhase::Ready if modifications.is_empty() => {}
            _ => return Err(self.closed()),
        }

        match protocol {
            None => Ok(Some(TransactionSuccessPayload::Modify)),
            Some(PersistenceProtocol::Ready) => {
                debug!(id = %self.id, count = self.modifications.len(), "transaction ready");
                self.phase = TransactionPhase::Ready;
                Ok(Some(TransactionSuccessPayload::Modify))
            }
            Some(PersistenceProtocol::Abort) => {
                self.abort(out);
                Ok(Some(TransactionSuccessPayload::Modify))
            }
            Some(PersistenceProtocol::ThreePhase) => {
                self.can_commit(tree)?;
                Ok(Some(TransactionSuccessPayload::CanCommit))
            }
            // one-shot commits report the commit outcome, not a modify ack
            Some(PersistenceProtocol::Simple) => {
                self.can_commit(tree)?;
                self.pre_commit(tree)?;
                let committed = self.commit(header, tree, commit_blocked)?;
                Ok(committed.then_some(TransactionSuccessPayload::Commit))
            }
        }
    }

    fn can_commit(&mut self, tree: &dyn DataTree) -> Result<(), RequestException> {
        match tree.validate(&self.modifications) {
            Ok(()) => {
                self.phase = TransactionPhase::CanCommitted;
                Ok(())
            }
            Err(err) => Err(self.fail("CanCommit failed", err)),
        }
    }

    fn pre_commit(&mut self, tree: &mut dyn DataTree) -> Result<(), RequestException> {
        match tree.prepare(&self.modifications) {
            Ok(()) => {
                self.phase = TransactionPhase::PreCommitted;
                Ok(())
            }
            Err(err) => Err(self.fail("PreCommit failed", err)),
        }
    }

    /// Applies the change set, or parks it when `blocked`. Returns whether
    /// the commit happened now.
    fn commit(
        &mut self,
        header: &RequestHeader<TransactionIdentifier>,
        tree: &mut dyn DataTree,
        blocked: bool,
    ) -> Result<bool, RequestException> {
        if blocked {
            info!(id = %self.id, "deferring commit behind earlier transactions");
            self.deferred = Some(header.response_header());
            return Ok(false);
        }
        self.apply(tree).map(|()| true)
    }

    fn apply(&mut self, tree: &mut dyn DataTree) -> Result<(), RequestException> {
        match tree.apply(&self.modifications) {
            Ok(()) => {
                info!(id = %self.id, count = self.modifications.len(), "transaction committed");
                self.phase = TransactionPhase::Committed;
                self.modifications.clear();
                Ok(())
            }
            Err(err) => Err(self.fail("Commit failed", err)),
        }
    }

    fn fail(&mut self, message: &str, err: crate::error::DataTreeError) -> RequestException {
        warn!(id = %self.id, %err, "{message}");
        self.phase = TransactionPhase::Aborted;
        self.modifications.clear();
        RequestException::runtime(message, Some(err.to_string()))
    }

    fn abort(&mut self, out: &mut Vec<Response>) {
        if self.phase != TransactionPhase::Aborted {
            debug!(id = %self.id, phase = ?self.phase, "aborting transaction");
        }
        self.phase = TransactionPhase::Aborted;
        self.modifications.clear();
        if let Some(header) = self.deferred.take() {
            let reply = Response::Failure(RequestFailure::new(
                header.target.into(),
                header.sequence,
                header.version,
                RequestException::ClosedTransaction { successful: false },
            ));
            self.tracker.record(header.sequence, vec![reply.clone()]);
            out.push(reply);
        }
    }
}

fn success(
    header: &RequestHeader<TransactionIdentifier>,
    payload: TransactionSuccessPayload,
) -> Response {
    Response::Success(RequestSuccess::Transaction(TransactionSuccess {
        header: header.response_header(),
        payload,
    }))
}

fn failure(header: &RequestHeader<TransactionIdentifier>, cause: RequestException) -> Response {
    Response::Failure(RequestFailure::new(
        header.target.clone().into(),
        header.sequence,
        header.version,
        cause,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data_tree::InMemoryDataTree;
    use shardline_access::{
        ClientIdentifier, DataNode, DataPath, FrontendIdentifier, LocalHistoryIdentifier, ReplyTo,
    };

    fn tx_id() -> TransactionIdentifier {
        let fe = FrontendIdentifier::parse("member-1", "test").unwrap();
        TransactionIdentifier::new(LocalHistoryIdentifier::new(ClientIdentifier::new(fe, 0), 1), 0)
    }

    fn path(s: &str) -> DataPath {
        s.parse().unwrap()
    }

    fn request(sequence: u64, payload: TransactionPayload) -> TransactionRequest {
        TransactionRequest::new(tx_id(), sequence, ReplyTo::default(), payload)
    }

    fn modify(sequence: u64, protocol: Option<PersistenceProtocol>) -> TransactionRequest {
        request(
            sequence,
            TransactionPayload::Modify {
                modifications: vec![TransactionModification::Write {
                    path: path("/a"),
                    data: DataNode::new(7u64),
                }],
                protocol,
            },
        )
    }

    fn payload(responses: &[Response]) -> Option<&TransactionSuccessPayload> {
        responses.last().and_then(Response::transaction_payload)
    }

    fn cause(responses: &[Response]) -> Option<&RequestException> {
        responses.last().and_then(Response::as_failure).map(|f| &f.cause)
    }

    #[test]
    fn three_phase_commit() {
        let mut tree = InMemoryDataTree::new();
        let mut tx = FrontendTransaction::new(tx_id(), 8, 8);

        let out = tx.handle(&modify(0, Some(PersistenceProtocol::ThreePhase)), &mut tree, false);
        assert_eq!(payload(&out), Some(&TransactionSuccessPayload::CanCommit));
        let out = tx.handle(&request(1, TransactionPayload::PreCommit), &mut tree, false);
        assert_eq!(payload(&out), Some(&TransactionSuccessPayload::PreCommit));
        let out = tx.handle(&request(2, TransactionPayload::DoCommit), &mut tree, false);
        assert_eq!(payload(&out), Some(&TransactionSuccessPayload::Commit));

        assert_eq!(tx.phase(), TransactionPhase::Committed);
        assert_eq!(tree.read(&path("/a")), Some(DataNode::new(7u64)));
    }

    #[test]
    fn reads_see_own_writes() {
        let mut tree = InMemoryDataTree::new();
        let mut tx = FrontendTransaction::new(tx_id(), 8, 8);
        tx.handle(&modify(0, None), &mut tree, false);

        let own = tx.handle(
            &request(1, TransactionPayload::Read { path: path("/a"), snapshot_only: false }),
            &mut tree,
            false,
        );
        assert_eq!(
            payload(&own),
            Some(&TransactionSuccessPayload::Read { data: Some(DataNode::new(7u64)) })
        );

        let committed = tx.handle(
            &request(2, TransactionPayload::Exists { path: path("/a"), snapshot_only: true }),
            &mut tree,
            false,
        );
        assert_eq!(payload(&committed), Some(&TransactionSuccessPayload::Exists { exists: false }));
    }

    #[test]
    fn commit_phase_out_of_order_is_closed() {
        let mut tree = InMemoryDataTree::new();
        let mut tx = FrontendTransaction::new(tx_id(), 8, 8);
        tx.handle(&modify(0, None), &mut tree, false);

        let out = tx.handle(&request(1, TransactionPayload::DoCommit), &mut tree, false);
        assert_eq!(cause(&out), Some(&RequestException::ClosedTransaction { successful: false }));
    }

    #[test]
    fn ready_then_commit() {
        let mut tree = InMemoryDataTree::new();
        let mut tx = FrontendTransaction::new(tx_id(), 8, 8);
        tx.handle(&modify(0, Some(PersistenceProtocol::Ready)), &mut tree, false);
        assert_eq!(tx.phase(), TransactionPhase::Ready);

        let late_write = tx.handle(&modify(1, None), &mut tree, false);
        assert!(cause(&late_write).is_some());

        let commit = request(
            2,
            TransactionPayload::Modify {
                modifications: Vec::new(),
                protocol: Some(PersistenceProtocol::Simple),
            },
        );
        let out = tx.handle(&commit, &mut tree, false);
        assert_eq!(payload(&out), Some(&TransactionSuccessPayload::Commit));
        assert!(tree.exists(&path("/a")));
    }

    #[test]
    fn abort_after_commit_fails() {
        let mut tree = InMemoryDataTree::new();
        let mut tx = FrontendTransaction::new(tx_id(), 8, 8);
        tx.handle(&modify(0, Some(PersistenceProtocol::Simple)), &mut tree, false);

        let out = tx.handle(&request(1, TransactionPayload::Abort), &mut tree, false);
        assert_eq!(cause(&out), Some(&RequestException::ClosedTransaction { successful: true }));
    }

    #[test]
    fn data_tree_failure_aborts() {
        let mut tree = InMemoryDataTree::new();
        tree.lock(path("/a"));
        let mut tx = FrontendTransaction::new(tx_id(), 8, 8);

        let out = tx.handle(&modify(0, Some(PersistenceProtocol::ThreePhase)), &mut tree, false);
        match cause(&out) {
            Some(RequestException::Runtime(runtime)) => {
                assert_eq!(runtime.message, "CanCommit failed");
                assert!(!runtime.retriable);
                assert!(runtime.cause.as_deref().is_some_and(|c| c.contains("/a")));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(tx.phase(), TransactionPhase::Aborted);
    }

    #[test]
    fn deferred_commit_runs_later() {
        let mut tree = InMemoryDataTree::new();
        let mut tx = FrontendTransaction::new(tx_id(), 8, 8);

        let out = tx.handle(&modify(0, Some(PersistenceProtocol::Simple)), &mut tree, true);
        assert!(out.is_empty());
        assert!(tx.has_deferred_commit());
        assert!(tree.is_empty());

        let reply = tx.run_deferred(&mut tree).unwrap();
        assert_eq!(reply.transaction_payload(), Some(&TransactionSuccessPayload::Commit));
        assert_eq!(reply.sequence(), 0);
        assert_eq!(tx.phase(), TransactionPhase::Committed);
    }

    #[test]
    fn abort_answers_deferred_commit() {
        let mut tree = InMemoryDataTree::new();
        let mut tx = FrontendTransaction::new(tx_id(), 8, 8);
        tx.handle(&modify(0, Some(PersistenceProtocol::Simple)), &mut tree, true);

        let out = tx.handle(&request(1, TransactionPayload::Abort), &mut tree, false);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].sequence(), 0);
        assert!(out[0].as_failure().is_some());
        assert_eq!(payload(&out), Some(&TransactionSuccessPayload::Abort));
        assert!(!tx.has_deferred_commit());
    }
}
