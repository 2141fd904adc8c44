use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use rustc_hash::FxHashMap;

use crate::db::models::Delegation;
use crate::error::FetchError;
use crate::worker::DelegationSource;

type Response = Result<Vec<Delegation>, FetchError>;

/// Delegation source replaying queued responses per validator.
///
/// A validator with nothing queued reports an empty delegation set.
#[derive(Default)]
pub struct ScriptedSource {
    responses: Mutex<FxHashMap<String, VecDeque<Response>>>,
    calls: Mutex<FxHashMap<String, usize>>,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, validator: &str, response: Response) {
        self.responses
            .lock()
            .unwrap()
            .entry(validator.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self, validator: &str) -> usize {
        self.calls.lock().unwrap().get(validator).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl DelegationSource for ScriptedSource {
    async fn fetch_delegations(
        &self,
        validator_addr: &str,
    ) -> Result<Vec<Delegation>, FetchError> {
        *self
            .calls
            .lock()
            .unwrap()
            .entry(validator_addr.to_string())
            .or_default() += 1;

        self.responses
            .lock()
            .unwrap()
            .get_mut(validator_addr)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| Ok(Vec::new()))
    }
}
