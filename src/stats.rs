use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::storage::StorageStats;

#[derive(Debug)]
pub struct CommandStats {
    pub start_time: DateTime<Utc>,
}

impl CommandStats {
    pub fn new() -> Self {
        CommandStats {
            start_time: Utc::now(),
        }
    }

    pub fn finalize(self, storage_stats: StorageStats) -> FullStats {
        FullStats {
            start_time: self.start_time,
            end_time: Utc::now(),
            storage: storage_stats,
        }
    }
}

impl Default for CommandStats {
    fn default() -> Self {
        CommandStats::new()
    }
}

#[derive(Debug)]
pub struct FullStats {
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub storage: StorageStats,
}

impl FullStats {
    pub fn elapsed_time(&self) -> Duration {
        (self.end_time - self.start_time)
            .to_std()
            .unwrap_or_default()
    }
}
