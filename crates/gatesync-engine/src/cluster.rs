//! Cluster mastership oracle and the gate built on top of it.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Cluster manager unreachable: {0}")]
    Unreachable(String),
}

impl ClusterError {
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::Unreachable(message.into())
    }
}

/// Answers whether the local node currently holds cluster mastership.
///
/// The answer may change at any time; callers query it on every decision and
/// never cache it.
#[async_trait]
pub trait ClusterManager: Send + Sync {
    async fn is_master_node(&self) -> Result<bool, ClusterError>;
}

/// Single-node deployment: always master.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandaloneCluster;

#[async_trait]
impl ClusterManager for StandaloneCluster {
    async fn is_master_node(&self) -> Result<bool, ClusterError> {
        Ok(true)
    }
}

/// Oracle with a switchable role, for fixed-role deployments and tests.
#[derive(Debug)]
pub struct StaticCluster {
    master: AtomicBool,
    reachable: AtomicBool,
    queries: AtomicU64,
}

impl StaticCluster {
    pub fn new(master: bool) -> Self {
        Self {
            master: AtomicBool::new(master),
            reachable: AtomicBool::new(true),
            queries: AtomicU64::new(0),
        }
    }

    pub fn set_master(&self, master: bool) {
        self.master.store(master, Ordering::SeqCst);
    }

    /// While unreachable every query fails.
    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn queries(&self) -> u64 {
        self.queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ClusterManager for StaticCluster {
    async fn is_master_node(&self) -> Result<bool, ClusterError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(ClusterError::unreachable("static cluster marked unreachable"));
        }
        Ok(self.master.load(Ordering::SeqCst))
    }
}

/// Decides whether this node may touch the backing store.
///
/// Work is allowed when the node is master or when the deployment is not
/// distributed. An oracle failure counts as "not master".
#[derive(Clone)]
pub struct MastershipGate {
    cluster: Arc<dyn ClusterManager>,
    distributed: bool,
}

impl MastershipGate {
    pub fn new(cluster: Arc<dyn ClusterManager>, distributed: bool) -> Self {
        Self {
            cluster,
            distributed,
        }
    }

    pub fn is_distributed(&self) -> bool {
        self.distributed
    }

    pub async fn is_master(&self) -> bool {
        match self.cluster.is_master_node().await {
            Ok(master) => master,
            Err(e) => {
                tracing::error!(error = %e, "mastership query failed, assuming non-master");
                false
            }
        }
    }

    pub async fn allows_work(&self) -> bool {
        if !self.distributed {
            return true;
        }
        self.is_master().await
    }
}

impl std::fmt::Debug for MastershipGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MastershipGate")
            .field("distributed", &self.distributed)
            .finish()
    }
}
