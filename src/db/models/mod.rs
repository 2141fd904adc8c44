mod daily_total;
mod delegation;
mod snapshot;

pub use daily_total::DailyTotal;
pub use delegation::Delegation;
pub use snapshot::DelegationSnapshot;
