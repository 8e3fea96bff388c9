//! WebDAV session rows.

use chrono::{DateTime, Utc};

use super::Database;
use crate::errors::{GatewayError, GatewayResult};
use crate::models::DavSession;

const SESSION_COLUMNS: &str =
    "id, user_id, session_id, ip_address, user_agent, started_at, last_activity";

impl Database {
    /// Insert a session while holding a lock on the owning user row, failing
    /// once `limit` sessions exist. The user-row lock makes the count-check
    /// and insert a single serialized step across concurrent connects.
    pub async fn insert_session_with_limit(
        &self,
        user_id: i64,
        session_id: &str,
        ip_address: &str,
        user_agent: &str,
        limit: i64,
    ) -> GatewayResult<DavSession> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT id FROM users WHERE id = $1 FOR UPDATE")
            .bind(user_id)
            .fetch_one(&mut *tx)
            .await?;

        let active: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM webdav_sessions WHERE user_id = $1")
                .bind(user_id)
                .fetch_one(&mut *tx)
                .await?;

        if active >= limit {
            return Err(GatewayError::SessionLimitExceeded { limit });
        }

        let session = sqlx::query_as::<_, DavSession>(&format!(
            "INSERT INTO webdav_sessions (user_id, session_id, ip_address, user_agent)
             VALUES ($1, $2, $3, $4)
             RETURNING {SESSION_COLUMNS}",
        ))
        .bind(user_id)
        .bind(session_id)
        .bind(ip_address)
        .bind(user_agent)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;

        Ok(session)
    }

    /// Bump `last_activity`. Returns whether such a session existed.
    pub async fn touch_session(&self, session_id: &str) -> GatewayResult<bool> {
        let result =
            sqlx::query("UPDATE webdav_sessions SET last_activity = NOW() WHERE session_id = $1")
                .bind(session_id)
                .execute(&self.pool)
                .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_session(&self, session_id: &str) -> GatewayResult<bool> {
        let result = sqlx::query("DELETE FROM webdav_sessions WHERE session_id = $1")
            .bind(session_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_stale_sessions(&self, cutoff: DateTime<Utc>) -> GatewayResult<u64> {
        let result = sqlx::query("DELETE FROM webdav_sessions WHERE last_activity < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }

    pub async fn get_session(&self, session_id: &str) -> GatewayResult<Option<DavSession>> {
        let session = sqlx::query_as::<_, DavSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM webdav_sessions WHERE session_id = $1",
        ))
        .bind(session_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }

    pub async fn list_sessions(&self, user_id: i64) -> GatewayResult<Vec<DavSession>> {
        let sessions = sqlx::query_as::<_, DavSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM webdav_sessions
             WHERE user_id = $1 ORDER BY last_activity DESC",
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(sessions)
    }

    /// Existing session for the same client identity, if any. Lets repeated
    /// requests from one client share a session instead of burning the cap.
    pub async fn find_session_for_client(
        &self,
        user_id: i64,
        ip_address: &str,
        user_agent: &str,
    ) -> GatewayResult<Option<DavSession>> {
        let session = sqlx::query_as::<_, DavSession>(&format!(
            "SELECT {SESSION_COLUMNS} FROM webdav_sessions
             WHERE user_id = $1 AND ip_address = $2 AND user_agent = $3
             ORDER BY last_activity DESC
             LIMIT 1",
        ))
        .bind(user_id)
        .bind(ip_address)
        .bind(user_agent)
        .fetch_optional(&self.pool)
        .await?;

        Ok(session)
    }
}
