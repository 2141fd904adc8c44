pub mod api;
pub mod config;
pub mod cron;
pub mod db;
pub mod error;
pub mod worker;

pub use api::{AppState, QueryService, RateLimiter};
pub use config::Settings;
pub use cron::CollectionScheduler;
pub use db::{CachedStore, MemoryStore, PostgresClient, SnapshotStore};
pub use worker::{DeltaCollector, LcdClient};
