//! Startup seeding of the initial admin account.

use anyhow::Result;
use tracing::info;

use crate::config::Config;
use crate::db::Database;
use crate::models::CreateUser;

/// Create the configured admin account when no such user exists yet. Runs on
/// every startup; existing accounts are left untouched.
pub async fn seed_admin_user(db: &Database, config: &Config) -> Result<()> {
    if db
        .get_user_by_username(&config.admin_username)
        .await?
        .is_some()
    {
        return Ok(());
    }

    let user = db
        .create_user(CreateUser {
            username: config.admin_username.clone(),
            password: config.admin_password.clone(),
        })
        .await?;

    info!("Seeded admin user: {} (id: {})", user.username, user.id);
    Ok(())
}
