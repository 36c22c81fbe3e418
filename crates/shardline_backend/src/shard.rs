//! The shard leader: dispatches requests to per-client state.

use crate::client::ConnectedClient;
use crate::config::BackendConfig;
use crate::data_tree::{DataTree, InMemoryDataTree};
use crate::error::{BackendError, BackendResult};
use crate::leadership::{LeadershipOracle, StaticLeadership};
use bytes::Bytes;
use shardline_access::{
    decode_message, encode_response, negotiate_range, ClientIdentifier, ConnectClientRequest,
    ConnectClientSuccess, FrontendIdentifier, LocalHistoryRequest, Message, Request,
    RequestException, RequestSuccess, Response, ResponseHeader, TransactionRequest,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Leader-side protocol state of one shard.
///
/// A `Shard` is owned by exactly one execution context. Every request is
/// answered by zero or more responses: zero when the request is buffered,
/// dropped as a duplicate or its commit is deferred; more than one when it
/// releases buffered requests or deferred commits.
///
/// # Example
///
/// ```
/// use shardline_backend::{BackendConfig, Shard};
///
/// let shard = Shard::in_memory(BackendConfig::new("inventory"));
/// assert_eq!(shard.client_count(), 0);
/// ```
pub struct Shard<T = InMemoryDataTree> {
    config: BackendConfig,
    tree: T,
    leadership: Arc<dyn LeadershipOracle>,
    clients: HashMap<FrontendIdentifier, ConnectedClient>,
}

impl Shard<InMemoryDataTree> {
    /// A shard over an empty in-memory tree that always leads.
    pub fn in_memory(config: BackendConfig) -> Self {
        let leadership =
            Arc::new(StaticLeadership::leader(config.local_address.clone(), Vec::new()));
        Self::new(config, InMemoryDataTree::new(), leadership)
    }
}

impl<T: DataTree> Shard<T> {
    /// Creates a shard over `tree`, consulting `leadership` on every request.
    pub fn new(config: BackendConfig, tree: T, leadership: Arc<dyn LeadershipOracle>) -> Self {
        info!(shard = %config.shard_name, address = %config.local_address, "starting shard");
        Self {
            config,
            tree,
            leadership,
            clients: HashMap::new(),
        }
    }

    /// Shard configuration.
    pub fn config(&self) -> &BackendConfig {
        &self.config
    }

    /// The data tree.
    pub fn data_tree(&self) -> &T {
        &self.tree
    }

    /// Mutable access to the data tree.
    pub fn data_tree_mut(&mut self) -> &mut T {
        &mut self.tree
    }

    /// State of the connected generation of `frontend`, if any.
    pub fn client(&self, frontend: &FrontendIdentifier) -> Option<&ConnectedClient> {
        self.clients.get(frontend)
    }

    /// Number of known frontends.
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Processes one request.
    pub fn handle(&mut self, request: Request, now: Instant) -> Vec<Response> {
        if !self.leadership.is_local_leader() {
            debug!(
                kind = request.kind(),
                to = %request.target(),
                "rejecting request: not the leader"
            );
            let cause = RequestException::NotLeader {
                actor: self.config.local_address.clone(),
            };
            return vec![Response::Failure(request.to_failure(cause))];
        }

        match request {
            Request::Connect(connect) => vec![self.connect(connect)],
            Request::History(history) => self.handle_history(history, now),
            Request::Transaction(tx) => self.handle_transaction(tx, now),
        }
    }

    /// Decodes a request frame, processes it and encodes the replies.
    ///
    /// # Errors
    ///
    /// Returns [`BackendError::Proxy`] for an undecodable frame or a reply
    /// that cannot be encoded, and [`BackendError::UnexpectedMessage`] for a
    /// response frame.
    pub fn handle_frame(&mut self, frame: &[u8], now: Instant) -> BackendResult<Vec<Bytes>> {
        let request = match decode_message(frame)? {
            Message::Request(request) => request,
            response @ Message::Response(_) => {
                return Err(BackendError::UnexpectedMessage(response.message_type()?));
            }
        };
        self.handle(request, now)
            .iter()
            .map(|response| encode_response(response).map_err(BackendError::from))
            .collect()
    }

    /// Fails buffered requests whose gap did not fill within the configured
    /// timeout.
    pub fn tick(&mut self, now: Instant) -> Vec<Response> {
        let timeout = self.config.buffer_timeout;
        self.clients
            .values_mut()
            .flat_map(|client| client.expire(now, timeout))
            .collect()
    }

    fn handle_history(&mut self, request: LocalHistoryRequest, now: Instant) -> Vec<Response> {
        let client = request.header.target.client().clone();
        match lookup(&mut self.clients, &client) {
            Ok(state) => state.handle_history(request, &self.config, now),
            Err(cause) => vec![Response::Failure(Request::History(request).to_failure(cause))],
        }
    }

    fn handle_transaction(&mut self, request: TransactionRequest, now: Instant) -> Vec<Response> {
        let client = request.header.target.history().client().clone();
        match lookup(&mut self.clients, &client) {
            Ok(state) => state.handle_transaction(request, &mut self.tree, &self.config, now),
            Err(cause) => vec![Response::Failure(Request::Transaction(request).to_failure(cause))],
        }
    }

    fn connect(&mut self, request: ConnectClientRequest) -> Response {
        let client = request.header.target.clone();
        let supported = &self.config.supported_versions;
        let version = match negotiate_range(request.min_version, request.max_version, supported) {
            Ok(version) => version,
            Err(err) => {
                warn!(%client, %err, "rejecting connect");
                let cause =
                    RequestException::runtime("No common ABI version", Some(err.to_string()));
                return Response::Failure(Request::Connect(request).to_failure(cause));
            }
        };

        let known = self.clients.get(client.frontend()).map(|state| state.id().generation());
        match known {
            Some(generation) if generation > client.generation() => {
                let cause = RequestException::RetiredGeneration {
                    new_generation: generation,
                };
                return Response::Failure(Request::Connect(request).to_failure(cause));
            }
            Some(generation) if generation == client.generation() => {
                if let Some(existing) = self.clients.get_mut(client.frontend()) {
                    existing.reconnected(version);
                }
            }
            _ => {
                if let Some(generation) = known {
                    info!(%client, old_generation = generation, "replacing client generation");
                }
                self.clients.insert(
                    client.frontend().clone(),
                    ConnectedClient::new(client.clone(), version),
                );
            }
        }

        Response::Success(RequestSuccess::Connect(ConnectClientSuccess {
            header: ResponseHeader {
                target: client,
                sequence: request.header.sequence,
                version,
            },
            backend: self.config.local_address.clone(),
            alternates: self.leadership.replicas(),
            data_tree_snapshot: self.tree.snapshot(),
            max_messages: self.config.max_messages,
        }))
    }
}

/// Resolves the state of `client`, checking its generation.
fn lookup<'a>(
    clients: &'a mut HashMap<FrontendIdentifier, ConnectedClient>,
    client: &ClientIdentifier,
) -> Result<&'a mut ConnectedClient, RequestException> {
    let known = clients.get(client.frontend()).map(|state| state.id().generation());
    match known {
        Some(generation) if generation == client.generation() => clients
            .get_mut(client.frontend())
            .ok_or(RequestException::UnknownHistory { last_known: None }),
        Some(generation) if generation > client.generation() => {
            Err(RequestException::RetiredGeneration {
                new_generation: generation,
            })
        }
        Some(generation) => {
            info!(
                %client,
                old_generation = generation,
                "newer generation has not connected; retiring old state"
            );
            clients.remove(client.frontend());
            Err(RequestException::UnknownHistory { last_known: None })
        }
        None => Err(RequestException::UnknownHistory { last_known: None }),
    }
}
