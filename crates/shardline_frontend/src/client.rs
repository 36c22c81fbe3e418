//! Data-store client API: histories, transactions and their commit.

use crate::channel::BackendChannel;
use crate::config::FrontendConfig;
use crate::error::{CommitError, FrontendError, FrontendResult};
use crate::transport::BackendTransport;
use shardline_access::{
    ClientIdentifier, DataNode, DataPath, HistoryOperation, LocalHistoryIdentifier,
    LocalHistoryRequest, LocalSnapshot, ModifyTransactionRequestBuilder, Request, RequestHeader,
    RequestSuccess, RequestTarget, Response, TransactionIdentifier, TransactionPayload,
    TransactionRequest, TransactionSuccess, TransactionSuccessPayload,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// A local history owned by this client.
#[derive(Debug, Clone)]
pub struct LocalHistoryHandle {
    id: LocalHistoryIdentifier,
    next_transaction: Arc<AtomicU64>,
}

impl LocalHistoryHandle {
    fn new(id: LocalHistoryIdentifier) -> Self {
        Self {
            id,
            next_transaction: Arc::new(AtomicU64::new(0)),
        }
    }

    /// History identifier.
    pub fn id(&self) -> &LocalHistoryIdentifier {
        &self.id
    }

    /// Whether this is the standalone history.
    pub fn is_standalone(&self) -> bool {
        self.id.is_standalone()
    }

    fn allocate(&self) -> TransactionIdentifier {
        let id = self.next_transaction.fetch_add(1, Ordering::SeqCst);
        TransactionIdentifier::new(self.id.clone(), id)
    }
}

/// An open transaction.
///
/// Modifications are buffered locally and flushed before any read, so
/// reads observe them. Once readied, committed or cancelled the handle is
/// sealed.
#[derive(Debug)]
pub struct TransactionHandle {
    id: TransactionIdentifier,
    builder: Option<ModifyTransactionRequestBuilder>,
    flushed: bool,
    contacted: bool,
}

impl TransactionHandle {
    /// Transaction identifier.
    pub fn id(&self) -> &TransactionIdentifier {
        &self.id
    }

    /// Whether the handle was finalized.
    pub fn is_sealed(&self) -> bool {
        self.builder.is_none()
    }

    /// Modifications not yet sent to the backend.
    pub fn pending(&self) -> usize {
        self.builder.as_ref().map_or(0, ModifyTransactionRequestBuilder::len)
    }

    /// Buffers a write.
    ///
    /// # Errors
    ///
    /// [`FrontendError::TransactionSealed`] after the handle was finalized.
    pub fn write(&mut self, path: DataPath, data: DataNode) -> FrontendResult<()> {
        self.builder_mut()?.write(path, data);
        Ok(())
    }

    /// Buffers a merge.
    ///
    /// # Errors
    ///
    /// [`FrontendError::TransactionSealed`] after the handle was finalized.
    pub fn merge(&mut self, path: DataPath, data: DataNode) -> FrontendResult<()> {
        self.builder_mut()?.merge(path, data);
        Ok(())
    }

    /// Buffers a delete.
    ///
    /// # Errors
    ///
    /// [`FrontendError::TransactionSealed`] after the handle was finalized.
    pub fn delete(&mut self, path: DataPath) -> FrontendResult<()> {
        self.builder_mut()?.delete(path);
        Ok(())
    }

    fn builder_mut(&mut self) -> FrontendResult<&mut ModifyTransactionRequestBuilder> {
        let id = &self.id;
        self.builder
            .as_mut()
            .ok_or_else(|| FrontendError::TransactionSealed(id.to_string()))
    }

    fn seal(&mut self) -> FrontendResult<ModifyTransactionRequestBuilder> {
        self.builder
            .take()
            .ok_or_else(|| FrontendError::TransactionSealed(self.id.to_string()))
    }
}

/// A readied transaction waiting for the commit decision.
#[derive(Debug, Clone)]
pub struct CommitHandle {
    id: TransactionIdentifier,
    coordinated: bool,
}

impl CommitHandle {
    /// Transaction identifier.
    pub fn id(&self) -> &TransactionIdentifier {
        &self.id
    }

    /// Commit with the three-phase protocol instead of the simple one.
    #[must_use]
    pub fn coordinated(mut self) -> Self {
        self.coordinated = true;
        self
    }

    /// Whether the three-phase protocol will be used.
    pub fn is_coordinated(&self) -> bool {
        self.coordinated
    }
}

/// Client of one shard.
pub struct DataStoreClient<T: BackendTransport> {
    channel: BackendChannel<T>,
    standalone: LocalHistoryHandle,
    next_history: AtomicU64,
}

impl<T: BackendTransport> std::fmt::Debug for DataStoreClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataStoreClient")
            .field("channel", &self.channel)
            .field("next_history", &self.next_history)
            .finish_non_exhaustive()
    }
}

impl<T: BackendTransport> DataStoreClient<T> {
    /// Connects to the backend behind `transport`.
    ///
    /// # Errors
    ///
    /// Fails if the connect is rejected or never answered.
    pub fn connect(config: FrontendConfig, transport: T) -> FrontendResult<Self> {
        let channel = BackendChannel::connect(config, transport)?;
        let standalone =
            LocalHistoryHandle::new(LocalHistoryIdentifier::standalone(channel.client().clone()));
        Ok(Self {
            channel,
            standalone,
            next_history: AtomicU64::new(LocalHistoryIdentifier::STANDALONE + 1),
        })
    }

    /// The channel to the backend.
    pub fn channel(&self) -> &BackendChannel<T> {
        &self.channel
    }

    /// This frontend generation.
    pub fn client(&self) -> &ClientIdentifier {
        self.channel.client()
    }

    /// In-process snapshot of the committed data tree, when the backend
    /// shares the process.
    pub fn snapshot(&self) -> Option<LocalSnapshot> {
        self.channel.connection().and_then(|c| c.snapshot)
    }

    /// The standalone history, where transactions are independent.
    pub fn standalone_history(&self) -> LocalHistoryHandle {
        self.standalone.clone()
    }

    /// Creates a new local history on the backend.
    ///
    /// # Errors
    ///
    /// Propagates channel and backend failures.
    pub fn create_history(&self) -> FrontendResult<LocalHistoryHandle> {
        let history_id = self.next_history.fetch_add(1, Ordering::SeqCst);
        let id = LocalHistoryIdentifier::new(self.client().clone(), history_id);
        self.history_operation(&id, HistoryOperation::Create)?;
        Ok(LocalHistoryHandle::new(id))
    }

    /// Closes a history to new transactions.
    ///
    /// # Errors
    ///
    /// Propagates channel and backend failures.
    pub fn destroy_history(&self, history: &LocalHistoryHandle) -> FrontendResult<()> {
        self.history_operation(&history.id, HistoryOperation::Destroy)
    }

    /// Drops backend bookkeeping for a destroyed history.
    ///
    /// # Errors
    ///
    /// Propagates channel and backend failures.
    pub fn purge_history(&self, history: &LocalHistoryHandle) -> FrontendResult<()> {
        self.history_operation(&history.id, HistoryOperation::Purge)?;
        self.channel.forget(&RequestTarget::History(history.id.clone()));
        Ok(())
    }

    /// Opens a transaction in `history`. Nothing is sent until the first
    /// read or commit.
    pub fn open_transaction(&self, history: &LocalHistoryHandle) -> TransactionHandle {
        let id = history.allocate();
        let builder = ModifyTransactionRequestBuilder::new(id.clone(), self.channel.reply_to());
        TransactionHandle {
            id,
            builder: Some(builder),
            flushed: false,
            contacted: false,
        }
    }

    /// Reads `path` as seen by the transaction, its own changes included.
    ///
    /// # Errors
    ///
    /// [`FrontendError::TransactionSealed`] after finalization, or channel
    /// and backend failures.
    pub fn read(
        &self,
        tx: &mut TransactionHandle,
        path: &DataPath,
    ) -> FrontendResult<Option<DataNode>> {
        self.read_at(tx, path, false)
    }

    /// Reads `path` from the last committed state, ignoring the
    /// transaction's own changes.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read), and an encoding error when the
    /// negotiated version predates committed-only reads.
    pub fn read_committed(
        &self,
        tx: &mut TransactionHandle,
        path: &DataPath,
    ) -> FrontendResult<Option<DataNode>> {
        self.read_at(tx, path, true)
    }

    fn read_at(
        &self,
        tx: &mut TransactionHandle,
        path: &DataPath,
        snapshot_only: bool,
    ) -> FrontendResult<Option<DataNode>> {
        self.flush(tx)?;
        let payload = TransactionPayload::Read {
            path: path.clone(),
            snapshot_only,
        };
        let success = self.transaction_call(tx, payload)?;
        match success.payload {
            TransactionSuccessPayload::Read { data } => Ok(data),
            _ => Err(unexpected("ReadTransactionSuccess", &success)),
        }
    }

    /// Tests whether `path` exists as seen by the transaction.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read).
    pub fn exists(&self, tx: &mut TransactionHandle, path: &DataPath) -> FrontendResult<bool> {
        self.flush(tx)?;
        let payload = TransactionPayload::Exists {
            path: path.clone(),
            snapshot_only: false,
        };
        let success = self.transaction_call(tx, payload)?;
        match success.payload {
            TransactionSuccessPayload::Exists { exists } => Ok(exists),
            _ => Err(unexpected("ExistsTransactionSuccess", &success)),
        }
    }

    /// Seals the transaction and sends its remaining changes, leaving the
    /// commit decision for later.
    ///
    /// # Errors
    ///
    /// [`FrontendError::TransactionSealed`] on a second finalization, or
    /// channel and backend failures.
    pub fn ready(&self, tx: &mut TransactionHandle) -> FrontendResult<CommitHandle> {
        let mut builder = tx.seal()?;
        builder.set_sequence(self.sequence_for(&tx.id));
        let success = self.send_transaction(builder.ready()?.into())?;
        expect_payload(&success, &TransactionSuccessPayload::Modify, "ModifyTransactionSuccess")?;
        Ok(CommitHandle {
            id: tx.id.clone(),
            coordinated: false,
        })
    }

    /// Commits a readied transaction.
    ///
    /// # Errors
    ///
    /// The backend's failure cause, e.g. a failed validation.
    pub fn commit(&self, handle: CommitHandle) -> Result<(), CommitError> {
        let mut builder =
            ModifyTransactionRequestBuilder::new(handle.id.clone(), self.channel.reply_to());
        builder.set_sequence(self.sequence_for(&handle.id));
        let request = builder.commit(handle.coordinated)?;
        self.finish_commit(&handle.id, request.into(), handle.coordinated)
    }

    /// Aborts a readied transaction.
    ///
    /// # Errors
    ///
    /// Propagates channel and backend failures.
    pub fn abort(&self, handle: CommitHandle) -> FrontendResult<()> {
        let success = self.transaction_call_id(&handle.id, TransactionPayload::Abort)?;
        expect_payload(&success, &TransactionSuccessPayload::Abort, "TransactionAbortSuccess")
    }

    /// Seals the transaction and commits its whole change set in one step.
    ///
    /// An in-process backend receives the change set directly; otherwise it
    /// travels as a single modify request.
    ///
    /// # Errors
    ///
    /// [`FrontendError::TransactionSealed`] on a second finalization, or the
    /// backend's failure cause.
    pub fn commit_local(
        &self,
        tx: &mut TransactionHandle,
        coordinated: bool,
    ) -> Result<(), CommitError> {
        let mut builder = tx.seal()?;
        let sequence = self.sequence_for(&tx.id);
        builder.set_sequence(sequence);

        let request = if self.channel.transport().supports_local_delivery() && !tx.flushed {
            let modifications = match builder.build()?.payload {
                TransactionPayload::Modify { modifications, .. } => modifications,
                _ => Vec::new(),
            };
            debug!(id = %tx.id, count = modifications.len(), "committing in process");
            let payload = TransactionPayload::CommitLocal {
                modifications,
                coordinated,
            };
            TransactionRequest::new(tx.id.clone(), sequence, self.channel.reply_to(), payload)
                .into()
        } else {
            builder.commit(coordinated)?.into()
        };
        self.finish_commit(&tx.id, request, coordinated)
    }

    /// Seals and aborts the transaction.
    ///
    /// # Errors
    ///
    /// [`FrontendError::TransactionSealed`] on a second finalization, or
    /// channel and backend failures.
    pub fn cancel(&self, tx: &mut TransactionHandle) -> FrontendResult<()> {
        let mut builder = tx.seal()?;
        if !tx.contacted {
            builder.set_sequence(self.sequence_for(&tx.id));
            let success = self.send_transaction(builder.abort()?.into())?;
            return expect_payload(
                &success,
                &TransactionSuccessPayload::Modify,
                "ModifyTransactionSuccess",
            );
        }

        let payload = if self.channel.transport().supports_local_delivery() {
            TransactionPayload::AbortLocal
        } else {
            TransactionPayload::Abort
        };
        let success = self.transaction_call_id(&tx.id, payload)?;
        expect_payload(&success, &TransactionSuccessPayload::Abort, "TransactionAbortSuccess")
    }

    /// Drops backend bookkeeping for a finished transaction. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates channel and backend failures.
    pub fn purge(&self, id: &TransactionIdentifier) -> FrontendResult<()> {
        let success = self.transaction_call_id(id, TransactionPayload::Purge)?;
        expect_payload(&success, &TransactionSuccessPayload::Purge, "TransactionPurgeResponse")?;
        self.channel.forget(&RequestTarget::Transaction(id.clone()));
        Ok(())
    }

    /// Declares transaction ids of `history` that will never be used.
    ///
    /// # Errors
    ///
    /// Fails when the negotiated version predates skip requests, or on
    /// channel and backend failures.
    pub fn skip_transactions(
        &self,
        history: &LocalHistoryHandle,
        ids: &[u64],
    ) -> FrontendResult<()> {
        let Some((&first, others)) = ids.split_first() else {
            return Ok(());
        };
        if let Some(&max) = ids.iter().max() {
            history.next_transaction.fetch_max(max.saturating_add(1), Ordering::SeqCst);
        }

        let target = TransactionIdentifier::new(history.id.clone(), first);
        let payload = TransactionPayload::SkipTransactions {
            others: others.to_vec(),
        };
        let success = self.transaction_call_id(&target, payload)?;
        expect_payload(
            &success,
            &TransactionSuccessPayload::SkipTransactions,
            "SkipTransactionsResponse",
        )
    }

    fn history_operation(
        &self,
        id: &LocalHistoryIdentifier,
        operation: HistoryOperation,
    ) -> FrontendResult<()> {
        let target = RequestTarget::History(id.clone());
        let request = LocalHistoryRequest {
            header: RequestHeader::new(
                id.clone(),
                self.channel.next_sequence(&target),
                self.channel.reply_to(),
            ),
            operation,
        };
        match self.channel.invoke(request.into())? {
            Response::Success(RequestSuccess::History(_)) => Ok(()),
            other => Err(FrontendError::UnexpectedResponse {
                expected: "LocalHistorySuccess",
                actual: other.kind(),
            }),
        }
    }

    fn flush(&self, tx: &mut TransactionHandle) -> FrontendResult<()> {
        if tx.pending() == 0 {
            tx.builder_mut()?;
            return Ok(());
        }
        let fresh = ModifyTransactionRequestBuilder::new(tx.id.clone(), self.channel.reply_to());
        let mut builder = tx
            .builder
            .replace(fresh)
            .ok_or_else(|| FrontendError::TransactionSealed(tx.id.to_string()))?;
        builder.set_sequence(self.sequence_for(&tx.id));
        let success = self.send_transaction(builder.build()?.into())?;
        tx.flushed = true;
        tx.contacted = true;
        expect_payload(&success, &TransactionSuccessPayload::Modify, "ModifyTransactionSuccess")
    }

    fn transaction_call(
        &self,
        tx: &mut TransactionHandle,
        payload: TransactionPayload,
    ) -> FrontendResult<TransactionSuccess> {
        tx.contacted = true;
        self.transaction_call_id(&tx.id, payload)
    }

    fn transaction_call_id(
        &self,
        id: &TransactionIdentifier,
        payload: TransactionPayload,
    ) -> FrontendResult<TransactionSuccess> {
        let sequence = self.sequence_for(id);
        let request =
            TransactionRequest::new(id.clone(), sequence, self.channel.reply_to(), payload);
        self.send_transaction(request.into())
    }

    fn finish_commit(
        &self,
        id: &TransactionIdentifier,
        request: Request,
        coordinated: bool,
    ) -> Result<(), CommitError> {
        let success = self.send_transaction(request)?;
        if !coordinated {
            return expect_payload(
                &success,
                &TransactionSuccessPayload::Commit,
                "TransactionCommitSuccess",
            );
        }

        expect_payload(
            &success,
            &TransactionSuccessPayload::CanCommit,
            "TransactionCanCommitSuccess",
        )?;
        let success = self.transaction_call_id(id, TransactionPayload::PreCommit)?;
        expect_payload(
            &success,
            &TransactionSuccessPayload::PreCommit,
            "TransactionPreCommitSuccess",
        )?;
        let success = self.transaction_call_id(id, TransactionPayload::DoCommit)?;
        expect_payload(&success, &TransactionSuccessPayload::Commit, "TransactionCommitSuccess")
    }

    fn send_transaction(&self, request: Request) -> FrontendResult<TransactionSuccess> {
        match self.channel.invoke(request)? {
            Response::Success(RequestSuccess::Transaction(success)) => Ok(success),
            other => Err(FrontendError::UnexpectedResponse {
                expected: "TransactionSuccess",
                actual: other.kind(),
            }),
        }
    }

    fn sequence_for(&self, id: &TransactionIdentifier) -> u64 {
        self.channel.next_sequence(&RequestTarget::Transaction(id.clone()))
    }
}

fn expect_payload(
    success: &TransactionSuccess,
    expected: &TransactionSuccessPayload,
    kind: &'static str,
) -> FrontendResult<()> {
    if &success.payload == expected {
        Ok(())
    } else {
        Err(unexpected(kind, success))
    }
}

fn unexpected(expected: &'static str, actual: &TransactionSuccess) -> FrontendError {
    FrontendError::UnexpectedResponse {
        expected,
        actual: actual.kind(),
    }
}
