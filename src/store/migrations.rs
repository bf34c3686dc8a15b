//! Schema creation and additive migrations.
//!
//! The base schema predates sub-second contribution ordering, so the
//! `createdAtNanos` column is added by migration on open. A migration
//! failure is logged and tolerated: the store degrades to whole-second
//! timestamp precision rather than refusing to start.

use sqlx::sqlite::SqlitePool;
use sqlx::Row;

use crate::error::StoreError;
use crate::model::LEGACY_MILLIS_THRESHOLD;

pub(super) async fn create_schema(pool: &SqlitePool) -> Result<(), StoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS pools (
           uuid TEXT PRIMARY KEY UNIQUE,
           createdBy TEXT,
           storageObject TEXT,
           lastUpdated INTEGER
         )",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE TABLE IF NOT EXISTS contributions (
           contributionId TEXT PRIMARY KEY UNIQUE,
           poolId TEXT,
           storageObject TEXT,
           createdAtSeconds INTEGER
         )",
    )
    .execute(pool)
    .await?;

    for sql in [
        "CREATE INDEX IF NOT EXISTS idx_pools_last_updated ON pools(lastUpdated)",
        "CREATE INDEX IF NOT EXISTS idx_contributions_pool ON contributions(poolId)",
        "CREATE INDEX IF NOT EXISTS idx_contributions_pool_seconds
           ON contributions(poolId, createdAtSeconds)",
    ] {
        sqlx::query(sql).execute(pool).await?;
    }

    Ok(())
}

/// Add `createdAtNanos` when missing. Returns whether the column is usable.
pub(super) async fn ensure_nanos_column(pool: &SqlitePool) -> bool {
    match has_column(pool, "contributions", "createdAtNanos").await {
        Ok(true) => true,
        Ok(false) => {
            match sqlx::query("ALTER TABLE contributions ADD COLUMN createdAtNanos INTEGER DEFAULT 0")
                .execute(pool)
                .await
            {
                Ok(_) => {
                    log::info!("[STORE] migrated contributions table: added createdAtNanos");
                    true
                }
                Err(e) => {
                    log::warn!(
                        "[STORE] createdAtNanos migration failed, degrading to second precision: {}",
                        e
                    );
                    false
                }
            }
        }
        Err(e) => {
            log::warn!("[STORE] could not inspect contributions schema: {}", e);
            false
        }
    }
}

/// Rewrite legacy rows whose seconds column holds epoch milliseconds so the
/// sort column is uniform; otherwise a legacy row always outsorts strictly
/// newer second-granularity rows and pins the sync cursor. Non-fatal: on
/// failure the read path still normalizes values it parses.
pub(super) async fn rescale_legacy_timestamps(pool: &SqlitePool, has_nanos: bool) {
    let sql = if has_nanos {
        "UPDATE contributions
         SET createdAtNanos = (createdAtSeconds % 1000) * 1000000,
             createdAtSeconds = createdAtSeconds / 1000
         WHERE createdAtSeconds > ?1"
    } else {
        "UPDATE contributions
         SET createdAtSeconds = createdAtSeconds / 1000
         WHERE createdAtSeconds > ?1"
    };

    match sqlx::query(sql).bind(LEGACY_MILLIS_THRESHOLD).execute(pool).await {
        Ok(result) if result.rows_affected() > 0 => {
            log::info!(
                "[STORE] rescaled {} legacy millisecond timestamp rows",
                result.rows_affected()
            );
        }
        Ok(_) => {}
        Err(e) => {
            log::warn!("[STORE] legacy timestamp rescale failed: {}", e);
        }
    }
}

async fn has_column(pool: &SqlitePool, table: &str, column: &str) -> Result<bool, StoreError> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM pragma_table_info(?1) WHERE name = ?2")
        .bind(table)
        .bind(column)
        .fetch_one(pool)
        .await?;
    let n: i64 = row.try_get("n")?;
    Ok(n > 0)
}
