mod config;

pub use config::{
    ApiSettings, CacheSettings, CollectorSettings, PostgresSettings, RateLimitSettings, Settings,
};
