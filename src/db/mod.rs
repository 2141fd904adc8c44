use async_trait::async_trait;

pub mod cached;
pub mod memory;
pub mod models;
pub mod postgres;

pub use cached::CachedStore;
pub use memory::MemoryStore;
pub use models::{DailyTotal, Delegation, DelegationSnapshot};
pub use postgres::PostgresClient;

/// Durable, append-only storage of delegation snapshots.
///
/// Implementations must make `insert_snapshot` a single atomic append and
/// must be safe to share between the collector and concurrent API requests.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Most recent snapshot for the pair, latest `timestamp` first and
    /// insertion order breaking ties.
    async fn latest_snapshot(
        &self,
        validator_addr: &str,
        delegator_addr: &str,
    ) -> anyhow::Result<Option<DelegationSnapshot>>;

    async fn insert_snapshot(&self, snapshot: &DelegationSnapshot) -> anyhow::Result<()>;

    /// Every snapshot recorded for the validator, ordered by timestamp then delegator.
    async fn snapshots_for_validator(
        &self,
        validator_addr: &str,
    ) -> anyhow::Result<Vec<DelegationSnapshot>>;

    /// Snapshots of one pair, oldest first.
    async fn delegator_history(
        &self,
        validator_addr: &str,
        delegator_addr: &str,
    ) -> anyhow::Result<Vec<DelegationSnapshot>>;

    /// Sum of `change_uatom` per (delegator, UTC date), ordered by date then delegator.
    async fn daily_totals(&self, validator_addr: &str) -> anyhow::Result<Vec<DailyTotal>>;

    async fn health_check(&self) -> anyhow::Result<()> {
        Ok(())
    }
}
