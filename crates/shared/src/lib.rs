#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! Shared infrastructure for the AuditPack workspace.
//!
//! Database pool construction, migration running, and the small helpers
//! that both the API server and the worker need.

use std::time::Duration;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;

/// Create the main database connection pool.
pub async fn create_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .acquire_timeout(Duration::from_secs(5))
        .connect(database_url)
        .await?;

    tracing::info!("Database pool created");
    Ok(pool)
}

/// Create a pool suitable for running migrations.
///
/// Uses a single connection with generous timeouts; migrations must go
/// through a direct connection rather than a transaction pooler.
pub async fn create_migration_pool(database_url: &str) -> anyhow::Result<PgPool> {
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(30))
        .connect(database_url)
        .await?;

    Ok(pool)
}

/// Run pending SQL migrations from the workspace `migrations/` directory.
pub async fn run_migrations(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// Normalize a phone-like contact string to digits only.
///
/// Contact numbers are stored digits-only; inbound sender identifiers can
/// arrive with `+`, spaces, or a `@c.us`-style suffix.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_phone_strips_non_digits() {
        assert_eq!(normalize_phone("+351 912 345 678"), "351912345678");
        assert_eq!(normalize_phone("351912345678@c.us"), "351912345678");
        assert_eq!(normalize_phone("(351) 912-345-678"), "351912345678");
    }

    #[test]
    fn normalize_phone_handles_empty_and_garbage() {
        assert_eq!(normalize_phone(""), "");
        assert_eq!(normalize_phone("abc"), "");
    }
}
