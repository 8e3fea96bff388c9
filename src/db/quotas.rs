//! Quota row primitives.
//!
//! The quota row is the serialization point for concurrent uploads: all
//! mutations are single-statement atomic increments, and `try_reserve_bytes`
//! folds the limit check into the increment so two racing uploads cannot
//! both pass.

use super::Database;
use crate::errors::GatewayResult;
use crate::models::UserQuota;

impl Database {
    /// Get or create the quota row for a user (lazy, on first interaction).
    pub async fn ensure_quota(
        &self,
        user_id: i64,
        default_quota_bytes: i64,
    ) -> GatewayResult<UserQuota> {
        sqlx::query(
            "INSERT INTO user_quotas (user_id, quota_bytes, used_bytes)
             VALUES ($1, $2, 0)
             ON CONFLICT (user_id) DO NOTHING",
        )
        .bind(user_id)
        .bind(default_quota_bytes)
        .execute(&self.pool)
        .await?;

        let quota = sqlx::query_as::<_, UserQuota>(
            "SELECT user_id, quota_bytes, used_bytes FROM user_quotas WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(quota)
    }

    pub async fn get_quota(&self, user_id: i64) -> GatewayResult<Option<UserQuota>> {
        let quota = sqlx::query_as::<_, UserQuota>(
            "SELECT user_id, quota_bytes, used_bytes FROM user_quotas WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(quota)
    }

    /// Conditionally reserve bytes: increments `used_bytes` only when the
    /// result stays within the limit. Returns whether the reservation was
    /// taken.
    pub async fn try_reserve_bytes(&self, user_id: i64, bytes: i64) -> GatewayResult<bool> {
        let result = sqlx::query(
            "UPDATE user_quotas
             SET used_bytes = used_bytes + $2
             WHERE user_id = $1 AND used_bytes + $2 <= quota_bytes",
        )
        .bind(user_id)
        .bind(bytes)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    /// Unconditional atomic increment.
    pub async fn add_used_bytes(&self, user_id: i64, bytes: i64) -> GatewayResult<()> {
        sqlx::query("UPDATE user_quotas SET used_bytes = used_bytes + $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(bytes)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Atomic decrement, clamped at zero.
    pub async fn sub_used_bytes(&self, user_id: i64, bytes: i64) -> GatewayResult<()> {
        sqlx::query(
            "UPDATE user_quotas SET used_bytes = GREATEST(used_bytes - $2, 0)
             WHERE user_id = $1",
        )
        .bind(user_id)
        .bind(bytes)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn set_used_bytes(&self, user_id: i64, bytes: i64) -> GatewayResult<()> {
        sqlx::query("UPDATE user_quotas SET used_bytes = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(bytes)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    /// Change the limit. Does not touch `used_bytes`; usage above the new
    /// limit only blocks further reservations.
    pub async fn set_quota_limit(&self, user_id: i64, quota_bytes: i64) -> GatewayResult<()> {
        sqlx::query("UPDATE user_quotas SET quota_bytes = $2 WHERE user_id = $1")
            .bind(user_id)
            .bind(quota_bytes)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
