use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Net stake change of one delegator at one validator over one UTC day.
///
/// Derived on read by summing `change_uatom` of every snapshot whose
/// timestamp falls on `date`. Never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DailyTotal {
    pub validator_addr: String,
    pub delegator_addr: String,
    pub date: NaiveDate,
    pub total_change_uatom: i64,
}
