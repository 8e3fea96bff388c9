//! Concurrent WebDAV session tracking.
//!
//! Native file browsers open several connections; the cap bounds how many a
//! single account may hold. Stale sessions are reaped before every create so
//! abandoned clients do not pin the cap.

use chrono::{Duration, Utc};
use rand::Rng;
use tracing::{debug, info};

use crate::db::Database;
use crate::errors::GatewayResult;
use crate::models::DavSession;

/// Session id length in bytes (32 hex chars once encoded).
const SESSION_ID_BYTES: usize = 16;

const USER_AGENT_MAX_BYTES: usize = 255;

#[derive(Clone)]
pub struct SessionManager {
    db: Database,
    limit: i64,
    timeout_seconds: u64,
}

impl SessionManager {
    pub fn new(db: Database, limit: i64, timeout_seconds: u64) -> Self {
        Self {
            db,
            limit,
            timeout_seconds,
        }
    }

    pub fn limit(&self) -> i64 {
        self.limit
    }

    /// Create a session, enforcing the per-user cap.
    pub async fn create(
        &self,
        user_id: i64,
        ip_address: &str,
        user_agent: &str,
    ) -> GatewayResult<DavSession> {
        self.reap_stale().await?;

        let session_id = generate_session_id();
        let user_agent = truncate_user_agent(user_agent);

        let session = self
            .db
            .insert_session_with_limit(user_id, &session_id, ip_address, user_agent, self.limit)
            .await?;

        info!(
            "WebDAV session created for user {}: {}",
            user_id,
            &session_id[..8]
        );
        Ok(session)
    }

    /// Update a session's activity timestamp. Returns whether it existed.
    pub async fn heartbeat(&self, session_id: &str) -> GatewayResult<bool> {
        self.db.touch_session(session_id).await
    }

    /// End a session. Returns whether it existed.
    pub async fn end(&self, session_id: &str) -> GatewayResult<bool> {
        let deleted = self.db.delete_session(session_id).await?;
        if deleted {
            info!("WebDAV session ended: {}", &session_id[..8.min(session_id.len())]);
        }
        Ok(deleted)
    }

    /// Remove sessions inactive past the timeout. Returns the count removed.
    pub async fn reap_stale(&self) -> GatewayResult<u64> {
        let cutoff = Utc::now() - Duration::seconds(self.timeout_seconds as i64);
        let reaped = self.db.delete_stale_sessions(cutoff).await?;
        if reaped > 0 {
            info!("Cleaned up {} stale WebDAV sessions", reaped);
        }
        Ok(reaped)
    }

    pub async fn get(&self, session_id: &str) -> GatewayResult<Option<DavSession>> {
        self.db.get_session(session_id).await
    }

    pub async fn list(&self, user_id: i64) -> GatewayResult<Vec<DavSession>> {
        self.db.list_sessions(user_id).await
    }

    /// Per-request entry point: reuse the caller's session when one exists
    /// for the same client identity, otherwise create one under the cap.
    pub async fn acquire(
        &self,
        user_id: i64,
        ip_address: &str,
        user_agent: &str,
    ) -> GatewayResult<DavSession> {
        let user_agent = truncate_user_agent(user_agent);

        if let Some(session) = self
            .db
            .find_session_for_client(user_id, ip_address, user_agent)
            .await?
        {
            self.db.touch_session(&session.session_id).await?;
            debug!(
                "Reusing WebDAV session for user {}: {}",
                user_id,
                &session.session_id[..8]
            );
            return Ok(session);
        }

        self.create(user_id, ip_address, user_agent).await
    }
}

fn generate_session_id() -> String {
    let bytes: [u8; SESSION_ID_BYTES] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Truncate a user agent to the column width, on a char boundary.
fn truncate_user_agent(user_agent: &str) -> &str {
    if user_agent.len() <= USER_AGENT_MAX_BYTES {
        return user_agent;
    }
    let mut end = USER_AGENT_MAX_BYTES;
    while !user_agent.is_char_boundary(end) {
        end -= 1;
    }
    &user_agent[..end]
}
