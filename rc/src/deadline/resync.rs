//! Rebuilding deadline waits from the object store

use async_trait::async_trait;

use crate::domain::RunSnapshot;

/// Read access to the runs the controller knows about
#[async_trait]
pub trait RunLister<R>: Send + Sync {
    /// All namespaces that may contain runs
    async fn namespaces(&self) -> eyre::Result<Vec<String>>;

    /// Every run in `namespace`, in any state
    async fn list_runs(&self, namespace: &str) -> eyre::Result<Vec<RunSnapshot<R>>>;
}

/// What a resync pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResyncStats {
    /// Namespaces listed successfully
    pub namespaces: usize,
    /// Namespaces whose runs could not be listed
    pub failed_namespaces: usize,
    /// Runs that got a new deadline wait
    pub started: usize,
    /// Runs that already had a deadline wait
    pub attached: usize,
    /// Runs that were done, cancelled, not yet started or unusable
    pub skipped: usize,
}
