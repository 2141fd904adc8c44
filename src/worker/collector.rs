use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, SubsecRound, Utc};
use log::{error, info, warn};

use crate::db::{DelegationSnapshot, SnapshotStore};
use crate::error::CollectError;
use crate::worker::DelegationSource;

/// Outcome of one poll cycle.
#[derive(Debug)]
pub struct CycleReport {
    /// Timestamp shared by every snapshot written in the cycle
    pub timestamp: DateTime<Utc>,
    pub validators_collected: usize,
    pub snapshots_written: usize,
    pub failures: Vec<CollectError>,
}

impl CycleReport {
    fn new(timestamp: DateTime<Utc>) -> Self {
        Self {
            timestamp,
            validators_collected: 0,
            snapshots_written: 0,
            failures: Vec::new(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Fetches the delegation set of every configured validator and appends one
/// delta-annotated snapshot per delegator.
///
/// Deltas are computed against the latest *stored* snapshot of each pair, so
/// a cycle that failed or never ran does not distort the next one.
pub struct DeltaCollector {
    source: Arc<dyn DelegationSource>,
    store: Arc<dyn SnapshotStore>,
    validators: Vec<String>,
}

impl DeltaCollector {
    pub fn new(
        source: Arc<dyn DelegationSource>,
        store: Arc<dyn SnapshotStore>,
        validators: Vec<String>,
    ) -> Self {
        Self {
            source,
            store,
            validators,
        }
    }

    pub fn validators(&self) -> &[String] {
        &self.validators
    }

    /// Runs one cycle stamped with the current time.
    pub async fn run_cycle(&self) -> CycleReport {
        // PostgreSQL keeps microseconds; truncate so stored and in-memory values agree
        self.run_cycle_at(Utc::now().trunc_subsecs(6)).await
    }

    /// Runs one cycle across all validators, stamping every snapshot with `timestamp`.
    ///
    /// A failure only ends the work for the validator it happened on.
    pub async fn run_cycle_at(&self, timestamp: DateTime<Utc>) -> CycleReport {
        let start = Instant::now();
        let mut report = CycleReport::new(timestamp);

        info!(
            "Starting poll cycle at {} for {} validators",
            timestamp,
            self.validators.len()
        );

        for validator in &self.validators {
            match self.collect_validator(validator, timestamp).await {
                Ok(written) => {
                    report.validators_collected += 1;
                    report.snapshots_written += written;
                    info!("Recorded {} snapshots for {}", written, validator);
                },
                Err(e) => {
                    if let CollectError::PersistFailed { written, .. } = &e {
                        report.snapshots_written += written;
                    }
                    error!("{}", e);
                    report.failures.push(e);
                },
            }
        }

        info!(
            "Poll cycle finished in {:?}: {}/{} validators, {} snapshots, {} failures",
            start.elapsed(),
            report.validators_collected,
            self.validators.len(),
            report.snapshots_written,
            report.failures.len()
        );

        report
    }

    async fn collect_validator(
        &self,
        validator: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<usize, CollectError> {
        let delegations = self
            .source
            .fetch_delegations(validator)
            .await
            .map_err(|cause| CollectError::FetchFailed {
                validator: validator.to_string(),
                cause,
            })?;

        let mut written = 0;
        for delegation in delegations {
            if delegation.amount_uatom < 0 {
                warn!(
                    "Negative amount {} reported for {}/{}",
                    delegation.amount_uatom, validator, delegation.delegator_addr
                );
            }

            let previous = self
                .store
                .latest_snapshot(validator, &delegation.delegator_addr)
                .await
                .map_err(|cause| CollectError::LookupFailed {
                    validator: validator.to_string(),
                    delegator: delegation.delegator_addr.clone(),
                    cause,
                })?;

            let snapshot =
                DelegationSnapshot::observe(validator, delegation, previous.as_ref(), timestamp);

            self.store
                .insert_snapshot(&snapshot)
                .await
                .map_err(|cause| CollectError::PersistFailed {
                    validator: validator.to_string(),
                    delegator: snapshot.delegator_addr.clone(),
                    written,
                    cause,
                })?;
            written += 1;
        }

        Ok(written)
    }
}
