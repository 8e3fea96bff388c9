//! Per-user storage quota accounting.
//!
//! Usage covers every file the user owns, trash included, so quota cannot be
//! dodged by parking data in the trash. A reservation is taken *before* the
//! blob is written and released if the record never commits.

use tracing::{debug, info, warn};

use crate::db::Database;
use crate::errors::{GatewayError, GatewayResult};
use crate::models::UserQuota;

#[derive(Clone)]
pub struct QuotaEngine {
    db: Database,
    default_quota_bytes: i64,
}

impl QuotaEngine {
    pub fn new(db: Database, default_quota_bytes: i64) -> Self {
        Self {
            db,
            default_quota_bytes,
        }
    }

    /// Get or create the quota row (lazy creation on first use).
    pub async fn ensure(&self, user_id: i64) -> GatewayResult<UserQuota> {
        self.db.ensure_quota(user_id, self.default_quota_bytes).await
    }

    /// Non-mutating limit check for `needed` additional bytes.
    pub async fn check(&self, user_id: i64, needed: i64) -> GatewayResult<()> {
        let quota = self.ensure(user_id).await?;

        if needed > 0 && !quota.has_space_for(needed) {
            warn!(
                "Quota exceeded for user {}: need {}, have {} available",
                user_id,
                needed,
                quota.available_bytes()
            );
            return Err(GatewayError::QuotaExceeded {
                limit: quota.quota_bytes,
                used: quota.used_bytes,
                need: needed,
            });
        }

        Ok(())
    }

    /// Atomically check the limit and take `bytes` of usage. This is the
    /// serialization point for concurrent uploads: of two racing
    /// reservations, at most one can land within the limit.
    pub async fn reserve(&self, user_id: i64, bytes: i64) -> GatewayResult<()> {
        let quota = self.ensure(user_id).await?;

        if bytes <= 0 {
            // Zero-byte writes (folder markers, empty PUT probes) are always
            // admitted, even over quota.
            return Ok(());
        }

        if self.db.try_reserve_bytes(user_id, bytes).await? {
            debug!("Reserved {} bytes for user {}", bytes, user_id);
            return Ok(());
        }

        // Re-read for an accurate error payload; the conditional update
        // already refused the reservation.
        let quota = self.db.get_quota(user_id).await?.unwrap_or(quota);
        warn!(
            "Quota exceeded for user {}: need {}, have {} available",
            user_id,
            bytes,
            quota.available_bytes()
        );
        Err(GatewayError::QuotaExceeded {
            limit: quota.quota_bytes,
            used: quota.used_bytes,
            need: bytes,
        })
    }

    /// Release a previously taken reservation.
    pub async fn release(&self, user_id: i64, bytes: i64) -> GatewayResult<()> {
        if bytes > 0 {
            self.db.sub_used_bytes(user_id, bytes).await?;
            debug!("Released {} bytes for user {}", bytes, user_id);
        }
        Ok(())
    }

    /// Unconditional usage increment.
    pub async fn add(&self, user_id: i64, bytes: i64) -> GatewayResult<()> {
        self.ensure(user_id).await?;
        if bytes > 0 {
            self.db.add_used_bytes(user_id, bytes).await?;
        }
        Ok(())
    }

    /// Usage decrement, clamped at zero.
    pub async fn sub(&self, user_id: i64, bytes: i64) -> GatewayResult<()> {
        if bytes > 0 {
            self.db.sub_used_bytes(user_id, bytes).await?;
        }
        Ok(())
    }

    /// Adjust usage when content is replaced. Growth is limit-checked;
    /// shrinking is always permitted, even over quota.
    pub async fn adjust(&self, user_id: i64, old_size: i64, new_size: i64) -> GatewayResult<()> {
        let delta = new_size - old_size;

        if delta > 0 {
            self.reserve(user_id, delta).await
        } else if delta < 0 {
            self.sub(user_id, -delta).await
        } else {
            Ok(())
        }
    }

    /// Recalculate usage from the file records (trash included). Fixes drift
    /// after bulk operations or crashes.
    pub async fn recompute(&self, user_id: i64) -> GatewayResult<i64> {
        self.ensure(user_id).await?;

        let total = self.db.sum_file_sizes(user_id).await?;
        self.db.set_used_bytes(user_id, total).await?;

        info!("Recomputed usage for user {}: {} bytes", user_id, total);
        Ok(total)
    }
}
