//! Local persistent cache over SQLite.
//!
//! Two tables: `pools` and `contributions`. Each row carries the full
//! JSON-serialized entity in `storageObject`; the remaining columns exist
//! purely for querying and sorting. All access funnels through one lazily
//! opened connection: the first caller triggers open + schema create, and
//! concurrent first callers await the same init future.

mod migrations;

#[cfg(test)]
mod tests;

use std::path::PathBuf;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use sqlx::Row;
use tokio::sync::OnceCell;

use crate::error::StoreError;
use crate::model::{now_ms, Contribution, ContributionTimestamp, Pool};

#[derive(Debug, Clone)]
enum Location {
    File(PathBuf),
    Memory,
}

#[derive(Debug)]
struct Db {
    pool: SqlitePool,
    /// False when the `createdAtNanos` migration failed; timestamps then
    /// degrade to whole-second precision instead of blocking writes.
    has_nanos: bool,
}

#[derive(Debug)]
pub struct PoolStore {
    location: Location,
    db: OnceCell<Db>,
}

impl PoolStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { location: Location::File(path.into()), db: OnceCell::new() }
    }

    /// Ephemeral store for tests and the demo binary.
    pub fn in_memory() -> Self {
        Self { location: Location::Memory, db: OnceCell::new() }
    }

    async fn db(&self) -> Result<&Db, StoreError> {
        self.db
            .get_or_try_init(|| async {
                let opts = match &self.location {
                    Location::File(path) => SqliteConnectOptions::new()
                        .filename(path)
                        .create_if_missing(true),
                    Location::Memory => SqliteConnectOptions::new().in_memory(true),
                };

                // One shared handle; the pool serializes callers for us.
                let pool = SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None::<std::time::Duration>)
                    .max_lifetime(None::<std::time::Duration>)
                    .connect_with(opts)
                    .await?;

                migrations::create_schema(&pool).await?;
                let has_nanos = migrations::ensure_nanos_column(&pool).await;
                migrations::rescale_legacy_timestamps(&pool, has_nanos).await;
                log::debug!("[STORE] opened (nanos column: {})", has_nanos);

                Ok(Db { pool, has_nanos })
            })
            .await
    }

    // ================================
    // Pools
    // ================================

    /// Insert the pool if its id is unknown, otherwise overwrite
    /// `storageObject`, `createdBy` and `lastUpdated`. Idempotent.
    pub async fn upsert_pool(&self, pool: &Pool) -> Result<(), StoreError> {
        if pool.pool_id.is_empty() {
            return Err(StoreError::Validation("poolId"));
        }
        if pool.creator_uuid.is_empty() {
            return Err(StoreError::Validation("creatorUUID"));
        }

        let db = self.db().await?;
        let blob = serde_json::to_string(pool)?;

        sqlx::query(
            "INSERT INTO pools (uuid, createdBy, storageObject, lastUpdated)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(uuid) DO UPDATE SET
               createdBy = excluded.createdBy,
               storageObject = excluded.storageObject,
               lastUpdated = excluded.lastUpdated",
        )
        .bind(&pool.pool_id)
        .bind(&pool.creator_uuid)
        .bind(&blob)
        .bind(now_ms())
        .execute(&db.pool)
        .await?;

        Ok(())
    }

    /// Idempotent delete; `Ok(false)` when no row existed. The pool's
    /// contribution rows go with it so no orphan ledger rows remain.
    pub async fn delete_pool(&self, pool_id: &str) -> Result<bool, StoreError> {
        let db = self.db().await?;

        let mut tx = db.pool.begin().await?;
        sqlx::query("DELETE FROM contributions WHERE poolId = ?1")
            .bind(pool_id)
            .execute(&mut *tx)
            .await?;
        let result = sqlx::query("DELETE FROM pools WHERE uuid = ?1")
            .bind(pool_id)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(result.rows_affected() > 0)
    }

    pub async fn get_pool(&self, pool_id: &str) -> Result<Option<Pool>, StoreError> {
        let db = self.db().await?;

        let row = sqlx::query("SELECT storageObject, lastUpdated FROM pools WHERE uuid = ?1")
            .bind(pool_id)
            .fetch_optional(&db.pool)
            .await?;

        match row {
            Some(row) => {
                let blob: String = row.try_get("storageObject")?;
                let mut pool: Pool = serde_json::from_str(&blob)?;
                pool.last_updated = row.try_get("lastUpdated")?;
                Ok(Some(pool))
            }
            None => Ok(None),
        }
    }

    /// All pools, most recently touched first. A corrupt blob is skipped
    /// with a warning; one bad row must not block the rest.
    pub async fn get_all_pools(&self) -> Result<Vec<Pool>, StoreError> {
        let db = self.db().await?;

        let rows =
            sqlx::query("SELECT uuid, storageObject, lastUpdated FROM pools ORDER BY lastUpdated DESC")
                .fetch_all(&db.pool)
                .await?;

        let mut pools = Vec::with_capacity(rows.len());
        for row in rows {
            let uuid: String = row.try_get("uuid")?;
            let blob: String = row.try_get("storageObject")?;
            match serde_json::from_str::<Pool>(&blob) {
                Ok(mut pool) => {
                    pool.last_updated = row.try_get("lastUpdated")?;
                    pools.push(pool);
                }
                Err(e) => {
                    log::warn!("[STORE] skipping corrupt pool row {}: {}", uuid, e);
                }
            }
        }
        Ok(pools)
    }

    /// Merge `fields` (a JSON object) over the stored pool document.
    pub async fn update_pool_fields(
        &self,
        pool_id: &str,
        fields: serde_json::Value,
    ) -> Result<Pool, StoreError> {
        let db = self.db().await?;

        let row = sqlx::query("SELECT storageObject FROM pools WHERE uuid = ?1")
            .bind(pool_id)
            .fetch_optional(&db.pool)
            .await?
            .ok_or_else(|| StoreError::NotFound(pool_id.to_string()))?;

        let blob: String = row.try_get("storageObject")?;
        let mut doc: serde_json::Value = serde_json::from_str(&blob)?;

        if let (Some(base), Some(patch)) = (doc.as_object_mut(), fields.as_object()) {
            for (key, value) in patch {
                base.insert(key.clone(), value.clone());
            }
        }

        let merged: Pool = serde_json::from_value(doc)?;
        self.upsert_pool(&merged).await?;
        Ok(merged)
    }

    pub async fn count_pools(&self) -> Result<u64, StoreError> {
        let db = self.db().await?;
        let row = sqlx::query("SELECT COUNT(*) AS n FROM pools")
            .fetch_one(&db.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    // ================================
    // Contributions
    // ================================

    pub async fn save_contribution(&self, contribution: &Contribution) -> Result<(), StoreError> {
        if contribution.contribution_id.is_empty() {
            return Err(StoreError::Validation("contributionId"));
        }
        if contribution.pool_id.is_empty() {
            return Err(StoreError::Validation("poolId"));
        }
        if contribution.amount == 0 {
            return Err(StoreError::Validation("amount"));
        }

        let db = self.db().await?;
        insert_contribution(db, &db.pool, contribution).await?;
        Ok(())
    }

    /// Batched insert-or-replace keyed by `contributionId`. Replaying ids
    /// already stored is a no-op, which is what makes the incremental sync
    /// idempotent. A row-level failure is logged and skipped rather than
    /// aborting the batch.
    pub async fn save_contributions_batch(
        &self,
        contributions: &[Contribution],
    ) -> Result<usize, StoreError> {
        if contributions.is_empty() {
            return Ok(0);
        }

        let db = self.db().await?;
        let mut tx = db.pool.begin().await?;
        let mut written = 0usize;

        for c in contributions {
            if c.contribution_id.is_empty() || c.pool_id.is_empty() || c.amount == 0 {
                log::warn!("[STORE] skipping invalid contribution row in batch");
                continue;
            }
            match insert_contribution(db, &mut *tx, c).await {
                Ok(()) => written += 1,
                Err(e) => {
                    log::warn!(
                        "[STORE] skipping contribution {} in batch: {}",
                        c.contribution_id,
                        e
                    );
                }
            }
        }

        tx.commit().await?;
        Ok(written)
    }

    /// A pool's ledger rows, newest first.
    pub async fn contributions_for_pool(
        &self,
        pool_id: &str,
    ) -> Result<Vec<Contribution>, StoreError> {
        let db = self.db().await?;

        let sql = if db.has_nanos {
            "SELECT contributionId, storageObject FROM contributions
             WHERE poolId = ?1
             ORDER BY createdAtSeconds DESC, createdAtNanos DESC"
        } else {
            "SELECT contributionId, storageObject FROM contributions
             WHERE poolId = ?1
             ORDER BY createdAtSeconds DESC"
        };

        let rows = sqlx::query(sql).bind(pool_id).fetch_all(&db.pool).await?;

        let mut out = Vec::with_capacity(rows.len());
        for row in rows {
            let id: String = row.try_get("contributionId")?;
            let blob: String = row.try_get("storageObject")?;
            match serde_json::from_str::<Contribution>(&blob) {
                Ok(mut c) => {
                    c.created_at =
                        ContributionTimestamp::from_raw(c.created_at.seconds, c.created_at.nanos);
                    out.push(c);
                }
                Err(e) => {
                    log::warn!("[STORE] skipping corrupt contribution row {}: {}", id, e);
                }
            }
        }
        Ok(out)
    }

    /// Sync cursor: newest stored `(seconds, nanos)` pair for the pool, or
    /// zero when the ledger is empty. Legacy millisecond-granularity rows
    /// are rescaled on read.
    pub async fn latest_timestamp(
        &self,
        pool_id: &str,
    ) -> Result<ContributionTimestamp, StoreError> {
        let db = self.db().await?;

        let row = if db.has_nanos {
            sqlx::query(
                "SELECT createdAtSeconds, createdAtNanos FROM contributions
                 WHERE poolId = ?1
                 ORDER BY createdAtSeconds DESC, createdAtNanos DESC
                 LIMIT 1",
            )
            .bind(pool_id)
            .fetch_optional(&db.pool)
            .await?
        } else {
            sqlx::query(
                "SELECT createdAtSeconds, 0 AS createdAtNanos FROM contributions
                 WHERE poolId = ?1
                 ORDER BY createdAtSeconds DESC
                 LIMIT 1",
            )
            .bind(pool_id)
            .fetch_optional(&db.pool)
            .await?
        };

        match row {
            Some(row) => {
                let seconds: i64 = row.try_get("createdAtSeconds")?;
                let nanos: i64 = row.try_get("createdAtNanos")?;
                Ok(ContributionTimestamp::from_raw(seconds, nanos as u32))
            }
            None => Ok(ContributionTimestamp::ZERO),
        }
    }

    pub async fn contributions_count(&self, pool_id: &str) -> Result<u64, StoreError> {
        let db = self.db().await?;
        let row = sqlx::query("SELECT COUNT(*) AS n FROM contributions WHERE poolId = ?1")
            .bind(pool_id)
            .fetch_one(&db.pool)
            .await?;
        let n: i64 = row.try_get("n")?;
        Ok(n as u64)
    }

    /// Test hook for injecting raw rows (e.g. corrupt blobs, legacy
    /// timestamps) beneath the typed API.
    #[cfg(test)]
    pub(crate) async fn execute_raw(&self, sql: &str) -> Result<(), StoreError> {
        let db = self.db().await?;
        sqlx::query(sql).execute(&db.pool).await?;
        Ok(())
    }
}

async fn insert_contribution<'e, E>(
    db: &Db,
    executor: E,
    c: &Contribution,
) -> Result<(), StoreError>
where
    E: sqlx::Executor<'e, Database = sqlx::Sqlite>,
{
    let blob = serde_json::to_string(c)?;

    if db.has_nanos {
        sqlx::query(
            "INSERT OR REPLACE INTO contributions
               (contributionId, poolId, storageObject, createdAtSeconds, createdAtNanos)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )
        .bind(&c.contribution_id)
        .bind(&c.pool_id)
        .bind(&blob)
        .bind(c.created_at.seconds)
        .bind(c.created_at.nanos as i64)
        .execute(executor)
        .await?;
    } else {
        sqlx::query(
            "INSERT OR REPLACE INTO contributions
               (contributionId, poolId, storageObject, createdAtSeconds)
             VALUES (?1, ?2, ?3, ?4)",
        )
        .bind(&c.contribution_id)
        .bind(&c.pool_id)
        .bind(&blob)
        .bind(c.created_at.seconds)
        .execute(executor)
        .await?;
    }

    Ok(())
}
