//! Background reconciliation of blobs against file records.
//!
//! A blob with no record in either view is an orphan: the leftovers of a
//! rolled-back upload, a failed post-commit cleanup, or a crashed move. A
//! candidate must stay unreferenced across a grace period before deletion so
//! an upload that has written its blob but not yet committed its record is
//! never collected.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tracing::{debug, error, info};

use crate::db::Database;
use crate::storage::BlobStore;

pub struct OrphanReaper {
    db: Database,
    blob: Arc<dyn BlobStore>,
    check_interval: Duration,
    grace_seconds: i64,
}

impl OrphanReaper {
    pub fn new(
        db: Database,
        blob: Arc<dyn BlobStore>,
        check_interval: Duration,
        grace_seconds: i64,
    ) -> Self {
        Self {
            db,
            blob,
            check_interval,
            grace_seconds,
        }
    }

    pub async fn start(&self) {
        info!(
            "Starting orphan reaper (interval: {:?}, grace: {}s)",
            self.check_interval, self.grace_seconds
        );

        // Keys seen without a record, with the time of first sighting.
        let mut candidates: HashMap<String, DateTime<Utc>> = HashMap::new();

        let mut interval_timer = interval(self.check_interval);

        loop {
            interval_timer.tick().await;

            match self.run_cycle(&mut candidates, Utc::now()).await {
                Ok(0) => {}
                Ok(count) => info!("Orphan reaper removed {} blobs", count),
                Err(e) => error!("Orphan reaper cycle failed: {}", e),
            }
        }
    }

    /// One reconciliation pass. Newly unreferenced keys become candidates;
    /// candidates older than the grace period are re-verified and deleted.
    /// Returns the number of blobs removed.
    pub async fn run_cycle(
        &self,
        candidates: &mut HashMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> anyhow::Result<usize> {
        let mut removed = 0;
        let mut seen_this_cycle: Vec<String> = Vec::new();

        for user in self.db.get_all_users().await? {
            let prefix = format!("{}/", user.id);
            let stored_keys = self.blob.list_prefix(&prefix).await?;
            let known: std::collections::HashSet<String> =
                self.db.list_all_keys(user.id).await?.into_iter().collect();

            for key in stored_keys {
                if known.contains(&key) {
                    continue;
                }
                seen_this_cycle.push(key.clone());

                match candidates.get(&key) {
                    None => {
                        debug!("Orphan candidate (first sighting): {}", key);
                        candidates.insert(key, now);
                    }
                    Some(first_seen)
                        if (now - *first_seen).num_seconds() >= self.grace_seconds =>
                    {
                        // Still unreferenced after the grace period: an
                        // in-flight upload would have committed by now.
                        info!("Deleting orphaned blob: {}", key);
                        if let Err(e) = self.blob.delete(&key).await {
                            error!("Failed to delete orphaned blob {}: {}", key, e);
                        } else {
                            candidates.remove(&key);
                            removed += 1;
                        }
                    }
                    Some(_) => {}
                }
            }
        }

        // Keys that gained a record since the last cycle stop being
        // candidates.
        candidates.retain(|key, _| seen_this_cycle.contains(key));

        Ok(removed)
    }
}
