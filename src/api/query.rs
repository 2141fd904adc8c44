use std::sync::Arc;

use crate::db::{DailyTotal, DelegationSnapshot, SnapshotStore};

/// Read-only view over the snapshot store backing the HTTP API.
///
/// An unknown validator or pair is not an error; it yields an empty list.
#[derive(Clone)]
pub struct QueryService {
    store: Arc<dyn SnapshotStore>,
}

impl QueryService {
    pub fn new(store: Arc<dyn SnapshotStore>) -> Self {
        Self { store }
    }

    /// Raw per-cycle snapshots of a validator.
    pub async fn hourly(&self, validator_addr: &str) -> anyhow::Result<Vec<DelegationSnapshot>> {
        self.store.snapshots_for_validator(validator_addr).await
    }

    /// Net change per delegator and UTC day, recomputed from raw snapshots
    /// (or served from the store's cache when it has one).
    pub async fn daily(&self, validator_addr: &str) -> anyhow::Result<Vec<DailyTotal>> {
        self.store.daily_totals(validator_addr).await
    }

    /// Full history of one delegator at one validator, oldest first.
    pub async fn history(
        &self,
        validator_addr: &str,
        delegator_addr: &str,
    ) -> anyhow::Result<Vec<DelegationSnapshot>> {
        self.store
            .delegator_history(validator_addr, delegator_addr)
            .await
    }

    pub async fn health(&self) -> anyhow::Result<()> {
        self.store.health_check().await
    }
}
