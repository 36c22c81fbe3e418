//! Demo command implementation.
//!
//! Drives one frontend against an in-memory shard leader: commit a write
//! in the standalone history, read it from a fresh transaction, purge the
//! writer and read again.

use super::CliError;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use shardline_access::{DataNode, DataPath, Request, Response};
use shardline_backend::{BackendConfig, Shard};
use shardline_frontend::{
    BackendTransport, DataStoreClient, FrontendConfig, FrontendError, FrontendResult,
};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::info;

/// One step of the demo, for output.
#[derive(Debug, Serialize)]
pub struct DemoStep {
    /// Step name.
    pub step: &'static str,
    /// What happened.
    pub outcome: String,
}

/// Demo result.
#[derive(Debug, Serialize)]
pub struct DemoReport {
    /// Whether requests were handed over without encoding.
    pub local_delivery: bool,
    /// Negotiated version.
    pub version: String,
    /// Steps in order.
    pub steps: Vec<DemoStep>,
    /// Frames sent to the shard.
    pub frames: u64,
    /// Commits applied to the data tree.
    pub commits: u64,
}

struct LoopbackTransport {
    shard: Arc<Mutex<Shard>>,
    local: bool,
    frames: AtomicU64,
}

impl BackendTransport for LoopbackTransport {
    fn send(&self, frame: Bytes) -> FrontendResult<Vec<Bytes>> {
        self.frames.fetch_add(1, Ordering::Relaxed);
        self.shard
            .lock()
            .handle_frame(&frame, Instant::now())
            .map_err(|e| FrontendError::transport_fatal(e.to_string()))
    }

    fn supports_local_delivery(&self) -> bool {
        self.local
    }

    fn deliver_local(&self, request: Request) -> FrontendResult<Vec<Response>> {
        Ok(self.shard.lock().handle(request, Instant::now()))
    }

    fn is_connected(&self) -> bool {
        true
    }

    fn close(&self) -> FrontendResult<()> {
        Ok(())
    }
}

/// Runs the demo and returns what happened.
pub fn execute(local: bool) -> Result<DemoReport, Box<dyn std::error::Error>> {
    let shard = Arc::new(Mutex::new(Shard::in_memory(BackendConfig::new("demo"))));
    let transport = LoopbackTransport {
        shard: Arc::clone(&shard),
        local,
        frames: AtomicU64::new(0),
    };
    let client = DataStoreClient::connect(FrontendConfig::for_member("alice", "demo")?, transport)?;
    let version = client.channel().version().map(|v| v.to_string()).unwrap_or_default();
    let mut steps = Vec::new();

    let path: DataPath = "/a".parse()?;
    let expected = DataNode::new("X");
    let history = client.standalone_history();

    let mut writer = client.open_transaction(&history);
    writer.write(path.clone(), expected.clone())?;
    client.commit_local(&mut writer, false)?;
    info!(tx = %writer.id(), "committed write");
    steps.push(DemoStep {
        step: "commit",
        outcome: format!("{} wrote {path}", writer.id()),
    });

    let mut reader = client.open_transaction(&history);
    let first = client.read(&mut reader, &path)?;
    if first.as_ref() != Some(&expected) {
        return Err(CliError::Demo {
            step: "read",
            message: format!("expected {expected:?}, got {first:?}"),
        }
        .into());
    }
    steps.push(DemoStep {
        step: "read",
        outcome: format!("{} saw {:?}", reader.id(), expected.value()),
    });

    client.purge(writer.id())?;
    info!(tx = %writer.id(), "purged writer");
    steps.push(DemoStep {
        step: "purge",
        outcome: format!("{} purged", writer.id()),
    });

    let mut late = client.open_transaction(&history);
    let second = client.read(&mut late, &path)?;
    if second.as_ref() != Some(&expected) {
        return Err(CliError::Demo {
            step: "read-after-purge",
            message: format!("expected {expected:?}, got {second:?}"),
        }
        .into());
    }
    steps.push(DemoStep {
        step: "read-after-purge",
        outcome: format!("{} still saw {:?}", late.id(), expected.value()),
    });

    let frames = client.channel().transport().frames.load(Ordering::Relaxed);
    let commits = shard.lock().data_tree().commit_count();
    Ok(DemoReport {
        local_delivery: local,
        version,
        steps,
        frames,
        commits,
    })
}

/// Runs the demo command.
pub fn run(local: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let report = execute(local)?;
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&report)?),
        _ => {
            let delivery = if local { "local" } else { "encoded" };
            println!("Negotiated {} ({delivery} delivery)", report.version);
            for step in &report.steps {
                println!("  {:<18} {}", step.step, step.outcome);
            }
            println!("{} frames, {} commits", report.frames, report.commits);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoded_demo_commits_once() {
        let report = execute(false).unwrap();
        assert_eq!(report.version, "MAGNESIUM");
        assert_eq!(report.commits, 1);
        assert_eq!(report.steps.len(), 4);
        assert!(report.frames >= 5);
    }

    #[test]
    fn local_demo_sends_no_frames() {
        let report = execute(true).unwrap();
        assert_eq!(report.frames, 0);
        assert_eq!(report.commits, 1);
    }
}
