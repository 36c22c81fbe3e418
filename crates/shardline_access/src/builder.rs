//! Builder for [`TransactionPayload::Modify`] requests.

use crate::abi::AbiVersion;
use crate::data::{DataNode, DataPath};
use crate::envelope::{ReplyTo, RequestHeader};
use crate::error::BuilderError;
use crate::identifiers::TransactionIdentifier;
use crate::modification::{PersistenceProtocol, TransactionModification};
use crate::request::{TransactionPayload, TransactionRequest};

/// Accumulates modifications for one transaction and is finalized exactly
/// once.
///
/// Every finalizer takes the builder by value, so a finalized builder cannot
/// be reused. A sequence number must be assigned before finalizing.
///
/// The builder is not `Clone`, so one change set cannot be finalized twice:
///
/// ```compile_fail
/// use shardline_access::{
///     ClientIdentifier, FrontendIdentifier, LocalHistoryIdentifier,
///     ModifyTransactionRequestBuilder, ReplyTo, TransactionIdentifier,
/// };
///
/// let frontend = FrontendIdentifier::parse("member-1", "config").unwrap();
/// let client = ClientIdentifier::new(frontend, 0);
/// let tx = TransactionIdentifier::new(LocalHistoryIdentifier::standalone(client), 0);
/// let mut builder = ModifyTransactionRequestBuilder::new(tx, ReplyTo::new(1, 0));
/// builder.set_sequence(0);
/// let first = builder.clone().commit(false);
/// let second = builder.commit(false);
/// ```
#[derive(Debug)]
pub struct ModifyTransactionRequestBuilder {
    target: TransactionIdentifier,
    reply_to: ReplyTo,
    sequence: Option<u64>,
    version: AbiVersion,
    modifications: Vec<TransactionModification>,
}

impl ModifyTransactionRequestBuilder {
    /// Start an empty change set for `target`.
    pub fn new(target: TransactionIdentifier, reply_to: ReplyTo) -> Self {
        Self {
            target,
            reply_to,
            sequence: None,
            version: AbiVersion::current(),
            modifications: Vec::new(),
        }
    }

    /// Transaction being built.
    pub fn target(&self) -> &TransactionIdentifier {
        &self.target
    }

    /// Assign the request sequence number.
    pub fn set_sequence(&mut self, sequence: u64) {
        self.sequence = Some(sequence);
    }

    /// Tag the request with a specific ABI version.
    pub fn set_version(&mut self, version: AbiVersion) {
        self.version = version;
    }

    /// Append a modification.
    pub fn add_modification(&mut self, modification: TransactionModification) {
        self.modifications.push(modification);
    }

    /// Append a write.
    pub fn write(&mut self, path: DataPath, data: DataNode) {
        self.add_modification(TransactionModification::Write { path, data });
    }

    /// Append a merge.
    pub fn merge(&mut self, path: DataPath, data: DataNode) {
        self.add_modification(TransactionModification::Merge { path, data });
    }

    /// Append a delete.
    pub fn delete(&mut self, path: DataPath) {
        self.add_modification(TransactionModification::Delete { path });
    }

    /// Number of accumulated modifications.
    pub fn len(&self) -> usize {
        self.modifications.len()
    }

    /// Whether no modifications were added.
    pub fn is_empty(&self) -> bool {
        self.modifications.is_empty()
    }

    /// Finish without a protocol step; the transaction stays open.
    ///
    /// # Errors
    ///
    /// [`BuilderError::SequenceNotSet`] if no sequence was assigned.
    pub fn build(self) -> Result<TransactionRequest, BuilderError> {
        self.finish(None)
    }

    /// Finish as an abort. Accumulated modifications are dropped.
    ///
    /// # Errors
    ///
    /// [`BuilderError::SequenceNotSet`] if no sequence was assigned.
    pub fn abort(mut self) -> Result<TransactionRequest, BuilderError> {
        self.modifications.clear();
        self.finish(Some(PersistenceProtocol::Abort))
    }

    /// Finish by sealing the transaction for a later commit decision.
    ///
    /// # Errors
    ///
    /// [`BuilderError::SequenceNotSet`] if no sequence was assigned.
    pub fn ready(self) -> Result<TransactionRequest, BuilderError> {
        self.finish(Some(PersistenceProtocol::Ready))
    }

    /// Finish with a commit: three-phase when `coordinated`, simple otherwise.
    ///
    /// # Errors
    ///
    /// [`BuilderError::SequenceNotSet`] if no sequence was assigned.
    pub fn commit(self, coordinated: bool) -> Result<TransactionRequest, BuilderError> {
        self.finish(Some(PersistenceProtocol::for_commit(coordinated)))
    }

    fn finish(
        self,
        protocol: Option<PersistenceProtocol>,
    ) -> Result<TransactionRequest, BuilderError> {
        let sequence = self.sequence.ok_or(BuilderError::SequenceNotSet)?;
        Ok(TransactionRequest {
            header: RequestHeader {
                target: self.target,
                sequence,
                reply_to: self.reply_to,
                version: self.version,
            },
            payload: TransactionPayload::Modify {
                modifications: self.modifications,
                protocol,
            },
        })
    }
}
