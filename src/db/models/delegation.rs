use serde::{Deserialize, Serialize};

/// Current stake of one delegator as reported by the chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delegation {
    pub delegator_addr: String,
    pub amount_uatom: i64,
}

impl Delegation {
    pub fn new(delegator_addr: impl Into<String>, amount_uatom: i64) -> Self {
        Self {
            delegator_addr: delegator_addr.into(),
            amount_uatom,
        }
    }
}
