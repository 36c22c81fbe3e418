//! The cluster leadership collaborator.

use parking_lot::RwLock;
use shardline_access::ActorAddress;
use tracing::info;

/// Answers who leads the shard and which replicas back it up.
pub trait LeadershipOracle: Send + Sync {
    /// Whether the local replica currently leads the shard.
    fn is_local_leader(&self) -> bool;

    /// Address of the current leader, if known.
    fn leader(&self) -> Option<ActorAddress>;

    /// Addresses of the other replicas of the shard.
    fn replicas(&self) -> Vec<ActorAddress>;
}

#[derive(Debug, Clone)]
struct LeadershipState {
    local_leader: bool,
    leader: Option<ActorAddress>,
    replicas: Vec<ActorAddress>,
}

/// Leadership that only changes when told to.
#[derive(Debug)]
pub struct StaticLeadership {
    state: RwLock<LeadershipState>,
}

impl StaticLeadership {
    /// The local replica at `local` leads, with `replicas` as backups.
    pub fn leader(local: ActorAddress, replicas: Vec<ActorAddress>) -> Self {
        Self {
            state: RwLock::new(LeadershipState {
                local_leader: true,
                leader: Some(local),
                replicas,
            }),
        }
    }

    /// The local replica follows `leader`.
    pub fn follower(leader: Option<ActorAddress>, replicas: Vec<ActorAddress>) -> Self {
        Self {
            state: RwLock::new(LeadershipState {
                local_leader: false,
                leader,
                replicas,
            }),
        }
    }

    /// Records that leadership moved to `leader`; `local` says whether that
    /// is this replica.
    pub fn set_leader(&self, leader: Option<ActorAddress>, local: bool) {
        let mut state = self.state.write();
        info!(?leader, local, "shard leadership changed");
        state.leader = leader;
        state.local_leader = local;
    }
}

impl LeadershipOracle for StaticLeadership {
    fn is_local_leader(&self) -> bool {
        self.state.read().local_leader
    }

    fn leader(&self) -> Option<ActorAddress> {
        self.state.read().leader.clone()
    }

    fn replicas(&self) -> Vec<ActorAddress> {
        self.state.read().replicas.clone()
    }
}
