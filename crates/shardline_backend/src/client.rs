//! Backend state of one connected frontend client.

use crate::config::BackendConfig;
use crate::data_tree::DataTree;
use crate::history::{
    history_failure, history_success, transaction_failure, LocalHistory, HistoryPhase,
};
use shardline_access::{
    AbiVersion, ClientIdentifier, HistoryOperation, LocalHistoryIdentifier, LocalHistoryRequest,
    RangeSet, RequestException, Response, TransactionRequest,
};
use std::collections::BTreeMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// A frontend generation known to the shard leader, with its histories.
#[derive(Debug)]
pub struct ConnectedClient {
    id: ClientIdentifier,
    version: AbiVersion,
    histories: BTreeMap<u64, LocalHistory>,
    purged_histories: RangeSet,
    last_known_history: Option<u64>,
}

impl ConnectedClient {
    pub(crate) fn new(id: ClientIdentifier, version: AbiVersion) -> Self {
        info!(client = %id, %version, "client connected");
        Self {
            id,
            version,
            histories: BTreeMap::new(),
            purged_histories: RangeSet::new(),
            last_known_history: None,
        }
    }

    /// Client identifier, including its generation.
    pub fn id(&self) -> &ClientIdentifier {
        &self.id
    }

    /// Version negotiated at the last connect.
    pub fn version(&self) -> AbiVersion {
        self.version
    }

    pub(crate) fn reconnected(&mut self, version: AbiVersion) {
        debug!(client = %self.id, %version, "client reconnected");
        self.version = version;
    }

    /// History with the given id, if tracked.
    pub fn history(&self, history_id: u64) -> Option<&LocalHistory> {
        self.histories.get(&history_id)
    }

    /// Ids of purged histories.
    pub fn purged_histories(&self) -> &RangeSet {
        &self.purged_histories
    }

    fn unknown_history(&self) -> RequestException {
        RequestException::UnknownHistory {
            last_known: self.last_known_history,
        }
    }

    fn dead_history(&self) -> RequestException {
        RequestException::DeadHistory {
            purged: self.purged_histories.clone(),
        }
    }

    /// Processes a history lifecycle request.
    pub(crate) fn handle_history(
        &mut self,
        request: LocalHistoryRequest,
        config: &BackendConfig,
        now: Instant,
    ) -> Vec<Response> {
        let history_id = request.header.target.history_id();
        if history_id == LocalHistoryIdentifier::STANDALONE {
            let cause = RequestException::UnsupportedRequest {
                kind: request.kind().to_string(),
            };
            return vec![history_failure(&request, cause)];
        }
        if self.purged_histories.contains(history_id) {
            let reply = match request.operation {
                HistoryOperation::Purge => history_success(&request),
                _ => history_failure(&request, self.dead_history()),
            };
            return vec![reply];
        }
        if !self.histories.contains_key(&history_id) {
            if request.operation != HistoryOperation::Create {
                return vec![history_failure(&request, self.unknown_history())];
            }
            info!(history = %request.header.target, "creating history");
            self.histories
                .insert(history_id, LocalHistory::new(request.header.target.clone(), config));
            self.last_known_history = self.last_known_history.max(Some(history_id));
        }

        let Some(history) = self.histories.get_mut(&history_id) else {
            return Vec::new();
        };
        let out = history.handle(request, now);
        if history.phase() == HistoryPhase::Purged {
            self.histories.remove(&history_id);
            self.purged_histories.insert(history_id);
        }
        out
    }

    /// Routes a transaction request to its history.
    pub(crate) fn handle_transaction(
        &mut self,
        request: TransactionRequest,
        tree: &mut dyn DataTree,
        config: &BackendConfig,
        now: Instant,
    ) -> Vec<Response> {
        let history_id = request.header.target.history().history_id();
        if self.purged_histories.contains(history_id) {
            return vec![transaction_failure(&request, self.dead_history())];
        }
        if history_id == LocalHistoryIdentifier::STANDALONE {
            let id = request.header.target.history().clone();
            self.histories
                .entry(history_id)
                .or_insert_with(|| LocalHistory::new(id, config));
        }
        match self.histories.get_mut(&history_id) {
            Some(history) => history.handle_transaction(request, tree, now),
            None => vec![transaction_failure(&request, self.unknown_history())],
        }
    }

    pub(crate) fn expire(&mut self, now: Instant, timeout: Duration) -> Vec<Response> {
        self.histories
            .values_mut()
            .flat_map(|history| history.expire(now, timeout))
            .collect()
    }
}
