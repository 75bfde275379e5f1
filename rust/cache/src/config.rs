use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Configuration for [`crate::LruCache`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Maximum number of entries held before the least-recently-used entry
    /// is evicted.
    pub max_capacity: usize,
    /// Optional idle expiry: an entry untouched for this long is dropped on
    /// its next access and counted as an eviction.
    pub time_to_idle: Option<Duration>,
}

impl CacheConfig {
    pub fn new(max_capacity: usize) -> Self {
        CacheConfig {
            max_capacity,
            time_to_idle: None,
        }
    }

    pub fn with_time_to_idle(mut self, time_to_idle: Duration) -> Self {
        self.time_to_idle = Some(time_to_idle);
        self
    }
}
