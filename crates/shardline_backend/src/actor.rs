//! Runs a [`Shard`] inside a tokio task fed by a mailbox.
//!
//! The task is the only owner of the shard, so no locks guard its tables.
//! Callers talk to it through a cloneable [`ShardHandle`].

use crate::data_tree::DataTree;
use crate::error::{BackendError, BackendResult};
use crate::shard::Shard;
use bytes::Bytes;
use shardline_access::{Request, Response};
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

enum Command {
    Request {
        request: Request,
        reply: oneshot::Sender<Vec<Response>>,
    },
    Frame {
        frame: Bytes,
        reply: oneshot::Sender<BackendResult<Vec<Bytes>>>,
    },
    Tick {
        reply: oneshot::Sender<Vec<Response>>,
    },
}

/// Mailbox side of a running shard.
#[derive(Debug, Clone)]
pub struct ShardHandle {
    sender: mpsc::Sender<Command>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Request { request, .. } => write!(f, "Request({})", request.kind()),
            Self::Frame { frame, .. } => write!(f, "Frame({} bytes)", frame.len()),
            Self::Tick { .. } => f.write_str("Tick"),
        }
    }
}

impl ShardHandle {
    async fn call<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> BackendResult<R> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .send(make(reply))
            .await
            .map_err(|_| BackendError::ActorClosed)?;
        receiver.await.map_err(|_| BackendError::ReplyDropped)
    }

    fn blocking_call<R>(
        &self,
        make: impl FnOnce(oneshot::Sender<R>) -> Command,
    ) -> BackendResult<R> {
        let (reply, receiver) = oneshot::channel();
        self.sender
            .blocking_send(make(reply))
            .map_err(|_| BackendError::ActorClosed)?;
        receiver.blocking_recv().map_err(|_| BackendError::ReplyDropped)
    }

    /// Submits a request and waits for the responses it produced.
    ///
    /// # Errors
    ///
    /// [`BackendError::ActorClosed`] if the shard task has stopped.
    pub async fn submit(&self, request: Request) -> BackendResult<Vec<Response>> {
        self.call(|reply| Command::Request { request, reply }).await
    }

    /// Submits an encoded request frame.
    ///
    /// # Errors
    ///
    /// Shard unavailability, or any error of [`Shard::handle_frame`].
    pub async fn submit_frame(&self, frame: Bytes) -> BackendResult<Vec<Bytes>> {
        self.call(|reply| Command::Frame { frame, reply }).await?
    }

    /// Expires stale buffered requests and returns their failures.
    ///
    /// # Errors
    ///
    /// [`BackendError::ActorClosed`] if the shard task has stopped.
    pub async fn tick(&self) -> BackendResult<Vec<Response>> {
        self.call(|reply| Command::Tick { reply }).await
    }

    /// Blocking variant of [`ShardHandle::submit`] for non-async callers.
    ///
    /// Must not be called from inside the runtime driving the shard.
    ///
    /// # Errors
    ///
    /// [`BackendError::ActorClosed`] if the shard task has stopped.
    pub fn blocking_submit(&self, request: Request) -> BackendResult<Vec<Response>> {
        self.blocking_call(|reply| Command::Request { request, reply })
    }

    /// Blocking variant of [`ShardHandle::submit_frame`].
    ///
    /// # Errors
    ///
    /// Shard unavailability, or any error of [`Shard::handle_frame`].
    pub fn blocking_submit_frame(&self, frame: Bytes) -> BackendResult<Vec<Bytes>> {
        self.blocking_call(|reply| Command::Frame { frame, reply })?
    }
}

/// A shard running on its own task.
pub struct ShardActor<T> {
    shard: Shard<T>,
    mailbox: mpsc::Receiver<Command>,
}

impl<T: DataTree + 'static> ShardActor<T> {
    /// Moves `shard` onto a new task with a mailbox of `capacity` commands.
    ///
    /// The task stops once every handle is dropped and yields the shard
    /// back through the join handle.
    pub fn spawn(shard: Shard<T>, capacity: usize) -> (ShardHandle, JoinHandle<Shard<T>>) {
        let (sender, mailbox) = mpsc::channel(capacity.max(1));
        let actor = Self { shard, mailbox };
        (ShardHandle { sender }, tokio::spawn(actor.run()))
    }

    async fn run(mut self) -> Shard<T> {
        debug!(shard = %self.shard.config().shard_name, "shard actor running");
        while let Some(command) = self.mailbox.recv().await {
            let delivered = match command {
                Command::Request { request, reply } => {
                    reply.send(self.shard.handle(request, Instant::now())).is_ok()
                }
                Command::Frame { frame, reply } => {
                    reply.send(self.shard.handle_frame(&frame, Instant::now())).is_ok()
                }
                Command::Tick { reply } => reply.send(self.shard.tick(Instant::now())).is_ok(),
            };
            if !delivered {
                warn!("caller went away before its reply was ready");
            }
        }
        debug!(shard = %self.shard.config().shard_name, "shard actor stopped");
        self.shard
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BackendConfig;
    use shardline_access::{
        encode_request, AbiVersion, ClientIdentifier, ConnectClientRequest, FrontendIdentifier,
        ReplyTo,
    };

    fn connect() -> Request {
        let frontend = FrontendIdentifier::parse("alice", "datastore").unwrap();
        let client = ClientIdentifier::new(frontend, 0);
        ConnectClientRequest::new(
            client,
            0,
            ReplyTo::default(),
            AbiVersion::Boron,
            AbiVersion::Magnesium,
        )
        .into()
    }

    #[tokio::test]
    async fn submit_and_stop() {
        let (handle, task) = ShardActor::spawn(Shard::in_memory(BackendConfig::default()), 16);
        let out = handle.submit(connect()).await.unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].version(), AbiVersion::Magnesium);

        let frames = handle.submit_frame(encode_request(&connect()).unwrap()).await.unwrap();
        assert_eq!(frames.len(), 1);
        assert!(handle.tick().await.unwrap().is_empty());

        drop(handle);
        let shard = task.await.unwrap();
        assert_eq!(shard.client_count(), 1);
    }

    #[tokio::test]
    async fn bad_frames_surface_as_errors() {
        let (handle, _task) = ShardActor::spawn(Shard::in_memory(BackendConfig::default()), 4);
        let err = handle.submit_frame(Bytes::from_static(&[0xff])).await.unwrap_err();
        assert!(err.is_peer_error());
    }

    #[test]
    fn blocking_submit_from_plain_thread() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let (handle, task) = runtime.block_on(async {
            ShardActor::spawn(Shard::in_memory(BackendConfig::default()), 4)
        });
        let out = std::thread::spawn(move || handle.blocking_submit(connect()))
            .join()
            .unwrap()
            .unwrap();
        assert_eq!(out.len(), 1);
        let shard = runtime.block_on(task).unwrap();
        assert_eq!(shard.client_count(), 1);
    }
}
