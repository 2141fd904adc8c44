use async_trait::async_trait;
use log::error;
use tokio_postgres::Row;

use crate::db::models::{DailyTotal, DelegationSnapshot};
use crate::db::postgres::PostgresClient;
use crate::db::SnapshotStore;

#[async_trait]
impl SnapshotStore for PostgresClient {
    // ==================== COLLECTION ====================

    async fn latest_snapshot(
        &self,
        validator_addr: &str,
        delegator_addr: &str,
    ) -> anyhow::Result<Option<DelegationSnapshot>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT validator_addr, delegator_addr, "timestamp", amount_uatom, change_uatom
            FROM tracker.delegation_snapshots
            WHERE validator_addr = $1 AND delegator_addr = $2
            ORDER BY "timestamp" DESC, id DESC
            LIMIT 1
        "#;

        let row = client
            .query_opt(query, &[&validator_addr, &delegator_addr])
            .await?;

        Ok(row.as_ref().map(row_to_snapshot))
    }

    async fn insert_snapshot(&self, snapshot: &DelegationSnapshot) -> anyhow::Result<()> {
        let client = self.pool.get().await?;
        let query = r#"
            INSERT INTO tracker.delegation_snapshots (
                validator_addr, delegator_addr, "timestamp", amount_uatom, change_uatom
            ) VALUES ($1, $2, $3, $4, $5)
        "#;

        client
            .execute(
                query,
                &[
                    &snapshot.validator_addr,
                    &snapshot.delegator_addr,
                    &snapshot.timestamp,
                    &snapshot.amount_uatom,
                    &snapshot.change_uatom,
                ],
            )
            .await
            .map_err(|e| {
                error!(
                    "Failed to insert snapshot {}/{}: {:?}",
                    snapshot.validator_addr, snapshot.delegator_addr, e
                );
                e
            })?;

        Ok(())
    }

    // ==================== QUERIES ====================

    async fn snapshots_for_validator(
        &self,
        validator_addr: &str,
    ) -> anyhow::Result<Vec<DelegationSnapshot>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT validator_addr, delegator_addr, "timestamp", amount_uatom, change_uatom
            FROM tracker.delegation_snapshots
            WHERE validator_addr = $1
            ORDER BY "timestamp", delegator_addr, id
        "#;

        let rows = client.query(query, &[&validator_addr]).await?;
        Ok(rows.iter().map(row_to_snapshot).collect())
    }

    async fn delegator_history(
        &self,
        validator_addr: &str,
        delegator_addr: &str,
    ) -> anyhow::Result<Vec<DelegationSnapshot>> {
        let client = self.pool.get().await?;
        let query = r#"
            SELECT validator_addr, delegator_addr, "timestamp", amount_uatom, change_uatom
            FROM tracker.delegation_snapshots
            WHERE validator_addr = $1 AND delegator_addr = $2
            ORDER BY "timestamp", id
        "#;

        let rows = client
            .query(query, &[&validator_addr, &delegator_addr])
            .await?;
        Ok(rows.iter().map(row_to_snapshot).collect())
    }

    async fn daily_totals(&self, validator_addr: &str) -> anyhow::Result<Vec<DailyTotal>> {
        let client = self.pool.get().await?;
        // SUM(BIGINT) yields NUMERIC, cast back so it maps onto i64
        let query = r#"
            SELECT
                validator_addr,
                delegator_addr,
                ("timestamp" AT TIME ZONE 'UTC')::date AS date,
                SUM(change_uatom)::BIGINT AS total_change_uatom
            FROM tracker.delegation_snapshots
            WHERE validator_addr = $1
            GROUP BY validator_addr, delegator_addr, ("timestamp" AT TIME ZONE 'UTC')::date
            ORDER BY date, delegator_addr
        "#;

        let rows = client.query(query, &[&validator_addr]).await?;
        let totals = rows
            .iter()
            .map(|row| DailyTotal {
                validator_addr: row.get("validator_addr"),
                delegator_addr: row.get("delegator_addr"),
                date: row.get("date"),
                total_change_uatom: row.get("total_change_uatom"),
            })
            .collect();

        Ok(totals)
    }

    async fn health_check(&self) -> anyhow::Result<()> {
        self.ping().await
    }
}

// ==================== HELPER FUNCTIONS ====================

fn row_to_snapshot(row: &Row) -> DelegationSnapshot {
    DelegationSnapshot {
        validator_addr: row.get("validator_addr"),
        delegator_addr: row.get("delegator_addr"),
        timestamp: row.get("timestamp"),
        amount_uatom: row.get("amount_uatom"),
        change_uatom: row.get("change_uatom"),
    }
}
