//! Process-local snapshot store.
//!
//! Same ordering and aggregation rules as the PostgreSQL store, kept in a
//! map of per-validator vectors in insertion order. Backs the tests.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;
use chrono::NaiveDate;
use rustc_hash::FxHashMap;

use crate::db::models::{DailyTotal, DelegationSnapshot};
use crate::db::SnapshotStore;

#[derive(Default)]
pub struct MemoryStore {
    by_validator: RwLock<FxHashMap<String, Vec<DelegationSnapshot>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Total number of stored snapshots across all validators.
    pub fn len(&self) -> usize {
        self.by_validator
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(Vec::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn with_validator<T>(
        &self,
        validator_addr: &str,
        f: impl FnOnce(&[DelegationSnapshot]) -> T,
    ) -> T {
        let guard = self
            .by_validator
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        f(guard.get(validator_addr).map(Vec::as_slice).unwrap_or(&[]))
    }
}

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn latest_snapshot(
        &self,
        validator_addr: &str,
        delegator_addr: &str,
    ) -> anyhow::Result<Option<DelegationSnapshot>> {
        Ok(self.with_validator(validator_addr, |rows| {
            // max_by_key keeps the last maximum, i.e. the latest insert on ties
            rows.iter()
                .filter(|s| s.delegator_addr == delegator_addr)
                .max_by_key(|s| s.timestamp)
                .cloned()
        }))
    }

    async fn insert_snapshot(&self, snapshot: &DelegationSnapshot) -> anyhow::Result<()> {
        self.by_validator
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(snapshot.validator_addr.clone())
            .or_default()
            .push(snapshot.clone());
        Ok(())
    }

    async fn snapshots_for_validator(
        &self,
        validator_addr: &str,
    ) -> anyhow::Result<Vec<DelegationSnapshot>> {
        let mut rows = self.with_validator(validator_addr, <[DelegationSnapshot]>::to_vec);
        // stable sort keeps insertion order within equal keys
        rows.sort_by(|a, b| {
            (a.timestamp, &a.delegator_addr).cmp(&(b.timestamp, &b.delegator_addr))
        });
        Ok(rows)
    }

    async fn delegator_history(
        &self,
        validator_addr: &str,
        delegator_addr: &str,
    ) -> anyhow::Result<Vec<DelegationSnapshot>> {
        let mut rows: Vec<DelegationSnapshot> = self.with_validator(validator_addr, |rows| {
            rows.iter()
                .filter(|s| s.delegator_addr == delegator_addr)
                .cloned()
                .collect()
        });
        rows.sort_by_key(|s| s.timestamp);
        Ok(rows)
    }

    async fn daily_totals(&self, validator_addr: &str) -> anyhow::Result<Vec<DailyTotal>> {
        let grouped: BTreeMap<(NaiveDate, String), i64> =
            self.with_validator(validator_addr, |rows| {
                let mut grouped = BTreeMap::new();
                for s in rows {
                    *grouped
                        .entry((s.timestamp.date_naive(), s.delegator_addr.clone()))
                        .or_insert(0i64) += s.change_uatom;
                }
                grouped
            });

        Ok(grouped
            .into_iter()
            .map(|((date, delegator_addr), total_change_uatom)| DailyTotal {
                validator_addr: validator_addr.to_string(),
                delegator_addr,
                date,
                total_change_uatom,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, day, hour, 0, 0).unwrap()
    }

    fn snap(
        validator: &str,
        delegator: &str,
        ts: DateTime<Utc>,
        amount: i64,
        change: i64,
    ) -> DelegationSnapshot {
        DelegationSnapshot::new(validator.into(), delegator.into(), ts, amount, change)
    }

    #[tokio::test]
    async fn test_empty_store_returns_empty_results() {
        let store = MemoryStore::new();
        assert!(store.latest_snapshot("val", "del").await.unwrap().is_none());
        assert!(store.snapshots_for_validator("val").await.unwrap().is_empty());
        assert!(store.delegator_history("val", "del").await.unwrap().is_empty());
        assert!(store.daily_totals("val").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_latest_snapshot_picks_newest_timestamp() {
        let store = MemoryStore::new();
        store.insert_snapshot(&snap("val", "del", at(1, 2), 300, 100)).await.unwrap();
        store.insert_snapshot(&snap("val", "del", at(1, 1), 200, 200)).await.unwrap();
        store.insert_snapshot(&snap("val", "other", at(1, 3), 5, 5)).await.unwrap();

        let latest = store.latest_snapshot("val", "del").await.unwrap().unwrap();
        assert_eq!(latest.amount_uatom, 300);
    }

    #[tokio::test]
    async fn test_history_is_ascending_and_scoped_to_pair() {
        let store = MemoryStore::new();
        store.insert_snapshot(&snap("val", "del", at(1, 0), 10, 10)).await.unwrap();
        store.insert_snapshot(&snap("val", "other", at(1, 0), 7, 7)).await.unwrap();
        store.insert_snapshot(&snap("val", "del", at(1, 1), 15, 5)).await.unwrap();
        store.insert_snapshot(&snap("val2", "del", at(1, 2), 99, 99)).await.unwrap();

        let history = store.delegator_history("val", "del").await.unwrap();
        let amounts: Vec<i64> = history.iter().map(|s| s.amount_uatom).collect();
        assert_eq!(amounts, vec![10, 15]);
    }

    #[tokio::test]
    async fn test_daily_totals_group_by_calendar_date() {
        let store = MemoryStore::new();
        store.insert_snapshot(&snap("val", "del", at(1, 1), 100, 100)).await.unwrap();
        store.insert_snapshot(&snap("val", "del", at(1, 5), 150, 50)).await.unwrap();
        store.insert_snapshot(&snap("val", "del", at(1, 23), 130, -20)).await.unwrap();
        store.insert_snapshot(&snap("val", "del", at(2, 0), 160, 30)).await.unwrap();
        store.insert_snapshot(&snap("val", "other", at(1, 1), 40, 40)).await.unwrap();

        let totals = store.daily_totals("val").await.unwrap();
        assert_eq!(totals.len(), 3);

        let day1 = NaiveDate::from_ymd_opt(2024, 5, 1).unwrap();
        let day2 = NaiveDate::from_ymd_opt(2024, 5, 2).unwrap();
        assert_eq!((totals[0].date, totals[0].delegator_addr.as_str()), (day1, "del"));
        assert_eq!(totals[0].total_change_uatom, 130);
        assert_eq!((totals[1].date, totals[1].delegator_addr.as_str()), (day1, "other"));
        assert_eq!(totals[1].total_change_uatom, 40);
        assert_eq!((totals[2].date, totals[2].delegator_addr.as_str()), (day2, "del"));
        assert_eq!(totals[2].total_change_uatom, 30);
        assert!(totals.iter().all(|t| t.validator_addr == "val"));
    }
}
