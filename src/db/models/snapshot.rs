use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Delegation;

/// One observation of a delegator's stake in a validator (PostgreSQL).
///
/// Append-only. For a fixed (validator, delegator) pair, `change_uatom` is the
/// difference to the immediately preceding snapshot of that pair, or the full
/// amount when no earlier snapshot exists.
///
/// Query Patterns:
///   - "Latest balance of delegator D at validator V"
///   - "All observations for validator V"
///   - "Balance history of D at V, oldest first"
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DelegationSnapshot {
    pub validator_addr: String,
    pub delegator_addr: String,
    pub timestamp: DateTime<Utc>,
    pub amount_uatom: i64,
    pub change_uatom: i64,
}

impl DelegationSnapshot {
    pub fn new(
        validator_addr: String,
        delegator_addr: String,
        timestamp: DateTime<Utc>,
        amount_uatom: i64,
        change_uatom: i64,
    ) -> Self {
        Self {
            validator_addr,
            delegator_addr,
            timestamp,
            amount_uatom,
            change_uatom,
        }
    }

    /// Builds the next snapshot for a fetched delegation, diffed against the
    /// latest stored snapshot of the same pair.
    ///
    /// A pair with no stored history is diffed against an implicit zero
    /// balance, so its first snapshot carries the whole amount as change.
    pub fn observe(
        validator_addr: &str,
        delegation: Delegation,
        previous: Option<&DelegationSnapshot>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let previous_amount = previous.map_or(0, |p| p.amount_uatom);

        Self {
            validator_addr: validator_addr.to_string(),
            delegator_addr: delegation.delegator_addr,
            timestamp,
            amount_uatom: delegation.amount_uatom,
            change_uatom: delegation.amount_uatom.saturating_sub(previous_amount),
        }
    }
}
