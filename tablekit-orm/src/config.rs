//! ORM configuration.

use crate::error::{OrmError, OrmResult};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tablekit_client::BackendConfig;
use tablekit_realtime::BackoffPolicy;
use tablekit_schema::PollPolicy;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrmConfig {
    pub backend: BackendConfig,

    /// Lifetime of cached reads in seconds.
    pub cache_ttl_secs: u64,

    /// Readiness polling for created and updated attributes.
    pub poll: PollPolicy,

    /// Realtime reconnect policy.
    pub backoff: BackoffPolicy,

    /// Attribute groups migrated in parallel per table.
    pub max_concurrent_migrations: usize,

    /// Records per bulk-create call during imports (clamped to 25..=100).
    pub import_batch_size: usize,

    /// Connect the realtime channel during init.
    pub realtime: bool,
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self {
            backend: BackendConfig::default(),
            cache_ttl_secs: 60,
            poll: PollPolicy::default(),
            backoff: BackoffPolicy::default(),
            max_concurrent_migrations: 4,
            import_batch_size: 50,
            realtime: true,
        }
    }
}

impl OrmConfig {
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    pub fn validate(&self) -> OrmResult<()> {
        if self.poll.interval_ms == 0 {
            return Err(OrmError::Config("poll interval must be positive".into()));
        }
        if self.poll.timeout_ms < self.poll.interval_ms {
            return Err(OrmError::Config(
                "poll timeout must be at least one interval".into(),
            ));
        }
        if self.max_concurrent_migrations == 0 {
            return Err(OrmError::Config(
                "max_concurrent_migrations must be at least 1".into(),
            ));
        }
        if self.backoff.base_ms == 0 || self.backoff.cap_ms < self.backoff.base_ms {
            return Err(OrmError::Config(
                "backoff needs 0 < base_ms <= cap_ms".into(),
            ));
        }
        if self.backend.database_id.is_empty() {
            return Err(OrmError::Config("database_id is empty".into()));
        }
        Ok(())
    }
}
