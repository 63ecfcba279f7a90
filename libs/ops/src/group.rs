use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

/// Per-cluster serialization scope for state-changing operations.
///
/// Two writers never observe the same `(cluster, operation)` concurrently:
/// the orchestrator holds the cluster's group lock from the first state
/// transition until the operation reaches a terminal state.
#[derive(Default)]
pub struct OperationGroups {
    groups: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl OperationGroups {
    pub fn new() -> Self {
        OperationGroups::default()
    }

    /// The lock for one cluster; created on first use.
    pub fn group(&self, cluster: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut groups = self.groups.lock();
        groups
            .entry(cluster.to_string())
            .or_insert_with(|| {
                trace!(msg = "create operation group", cluster);
                Arc::default()
            })
            .clone()
    }
}
