//! Background job draining expired trash.

use std::time::Duration;

use chrono::Utc;
use tokio::time::interval;
use tracing::{error, info};

use crate::services::trash::TrashEngine;

pub struct TrashPurgeScheduler {
    trash: TrashEngine,
    check_interval: Duration,
    batch_size: i64,
}

impl TrashPurgeScheduler {
    pub fn new(trash: TrashEngine, check_interval: Duration, batch_size: i64) -> Self {
        Self {
            trash,
            check_interval,
            batch_size,
        }
    }

    /// Run forever, purging one batch per tick. A failed batch aborts the
    /// cycle; the next tick resumes from the oldest remaining item.
    pub async fn start(&self) {
        info!(
            "Starting trash purge scheduler (interval: {:?}, batch: {})",
            self.check_interval, self.batch_size
        );

        let mut interval_timer = interval(self.check_interval);

        loop {
            interval_timer.tick().await;

            match self.trash.purge_expired(Utc::now(), self.batch_size).await {
                Ok(0) => {}
                Ok(count) => {
                    info!("Trash purge cycle removed {} files", count);
                }
                Err(e) => {
                    error!("Trash purge cycle failed: {}", e);
                }
            }
        }
    }
}
