use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use moka::future::Cache;
use tokio::sync::Mutex;

use crate::config::CacheSettings;
use crate::db::models::{DailyTotal, DelegationSnapshot};
use crate::db::SnapshotStore;

/// Snapshot store decorator that caches daily aggregates per validator.
///
/// Every insert invalidates the cached aggregate of the written validator, so
/// a reader sharing this store with the collector never sees a total that
/// predates a completed write. The TTL bounds staleness for writes made by
/// other processes.
///
/// A computed aggregate is only cached if no insert completed while it was
/// being computed. The write generation is bumped and the entry invalidated
/// under the same lock that guards cache fills, so a slow read can never
/// publish a total older than the last write.
pub struct CachedStore<S> {
    inner: S,
    daily: Cache<String, Arc<Vec<DailyTotal>>>,
    generation: Mutex<u64>,
}

impl<S: SnapshotStore> CachedStore<S> {
    pub fn new(inner: S, settings: &CacheSettings) -> Self {
        let daily = Cache::builder()
            .max_capacity(settings.max_validators)
            .time_to_live(Duration::from_secs(settings.daily_ttl_secs))
            .build();

        Self {
            inner,
            daily,
            generation: Mutex::new(0),
        }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: SnapshotStore> SnapshotStore for CachedStore<S> {
    async fn latest_snapshot(
        &self,
        validator_addr: &str,
        delegator_addr: &str,
    ) -> anyhow::Result<Option<DelegationSnapshot>> {
        self.inner
            .latest_snapshot(validator_addr, delegator_addr)
            .await
    }

    async fn insert_snapshot(&self, snapshot: &DelegationSnapshot) -> anyhow::Result<()> {
        self.inner.insert_snapshot(snapshot).await?;

        let mut generation = self.generation.lock().await;
        *generation += 1;
        self.daily.invalidate(&snapshot.validator_addr).await;
        Ok(())
    }

    async fn snapshots_for_validator(
        &self,
        validator_addr: &str,
    ) -> anyhow::Result<Vec<DelegationSnapshot>> {
        self.inner.snapshots_for_validator(validator_addr).await
    }

    async fn delegator_history(
        &self,
        validator_addr: &str,
        delegator_addr: &str,
    ) -> anyhow::Result<Vec<DelegationSnapshot>> {
        self.inner
            .delegator_history(validator_addr, delegator_addr)
            .await
    }

    async fn daily_totals(&self, validator_addr: &str) -> anyhow::Result<Vec<DailyTotal>> {
        if let Some(cached) = self.daily.get(validator_addr).await {
            return Ok(cached.as_ref().clone());
        }

        let started_at = *self.generation.lock().await;
        debug!("Computing daily totals for {}", validator_addr);
        let totals = self.inner.daily_totals(validator_addr).await?;

        let generation = self.generation.lock().await;
        if *generation == started_at {
            self.daily
                .insert(validator_addr.to_string(), Arc::new(totals.clone()))
                .await;
        } else {
            debug!(
                "Not caching daily totals for {}: store written during computation",
                validator_addr
            );
        }

        Ok(totals)
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        self.inner.health_check().await
    }
}
