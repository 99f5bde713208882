//! Database module
//!
//! Connectivity and schema checks. Migrations live as raw SQL files in
//! `migrations/`.

use sqlx::PgPool;

/// Tables the Postgres stores read and write
pub const REQUIRED_TABLES: [&str; 5] = [
    "payments",
    "audit_entries",
    "accounts",
    "account_debits",
    "period_locks",
];

/// Verify database connectivity
pub async fn verify_connection(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::query("SELECT 1").execute(pool).await?;

    Ok(())
}

/// Check if required tables exist
///
/// Returns the first missing table, if any.
pub async fn check_schema(pool: &PgPool) -> Result<Option<&'static str>, sqlx::Error> {
    for table in REQUIRED_TABLES {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM information_schema.tables
                WHERE table_schema = 'public' AND table_name = $1
            )
            "#,
        )
        .bind(table)
        .fetch_one(pool)
        .await?;

        if !exists {
            tracing::error!("Required table '{}' does not exist", table);
            return Ok(Some(table));
        }
    }

    if !check_append_only_trigger(pool).await? {
        tracing::warn!("audit_entries has no append-only trigger; stored entries can be edited");
    }

    Ok(None)
}

/// Whether the trigger refusing UPDATE and DELETE on audit entries is installed
async fn check_append_only_trigger(pool: &PgPool) -> Result<bool, sqlx::Error> {
    sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1 FROM information_schema.triggers
            WHERE event_object_table = 'audit_entries'
              AND trigger_name = 'audit_entries_append_only'
        )
        "#,
    )
    .fetch_one(pool)
    .await
}
