mod collector;
mod fetcher;

#[cfg(test)]
pub(crate) mod testing;

pub use collector::{CycleReport, DeltaCollector};
pub use fetcher::{parse_page, DelegationPage, DelegationSource, LcdClient};
