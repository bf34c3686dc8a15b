//! Pool synchronization engine.
//!
//! This module implements the imperative shell that reconciles the local
//! store with the cloud registry:
//! - **Create**: remote write first (the registry is authoritative), then
//!   the local mirror, then the derivation counter.
//! - **Refresh**: cached fast path, cursor-based incremental contribution
//!   pull, server-aggregate overwrite.
//! - **Bulk sync**: parallel per-pool fetch with isolate-and-continue.
//! - **Restore**: once-per-install recovery of pools from the registry on a
//!   fresh device, advancing the derivation counter past anything found.
//! - **Close**: the one-way `active -> closed` transition; closed pools are
//!   never synced again.

pub mod mock;
pub mod registry;


use std::sync::Arc;

use futures::future::join_all;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::derivation::AddressDeriver;
use crate::error::SyncError;
use crate::lifecycle::PoolLifecycle;
use crate::model::{now_ms, Contribution, Pool, PoolStatus};
use crate::settings::SettingsStore;
use crate::store::PoolStore;

pub use registry::CloudPoolRegistry;

/// Caller-facing view of one pool: the (possibly just refreshed) document
/// plus its ledger rows, newest first.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolView {
    pub pool: Pool,
    pub contributions: Vec<Contribution>,
}

/// What the restore-on-reinstall check decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The persisted flag says the check already ran.
    AlreadyChecked,
    /// The local store has pools; assumed already synced.
    SkippedLocalPools,
    /// Nothing owned by this identity exists remotely.
    NothingToRestore,
    /// This many pools were recovered from the registry.
    Restored(usize),
}

/// User-supplied inputs for a new pool.
#[derive(Debug, Clone)]
pub struct NewPoolParams {
    pub title: String,
    /// Smallest currency unit.
    pub goal_amount: u64,
    pub denomination: String,
}

pub struct PoolSyncEngine<R, S, D> {
    store: Arc<PoolStore>,
    registry: Arc<R>,
    settings: Arc<S>,
    deriver: Arc<D>,
    creator_uuid: String,
    /// Single-flight gate: concurrent restore triggers share one attempt.
    restore_gate: Mutex<()>,
}

impl<R, S, D> PoolSyncEngine<R, S, D>
where
    R: CloudPoolRegistry,
    S: SettingsStore,
    D: AddressDeriver,
{
    pub fn new(
        store: Arc<PoolStore>,
        registry: Arc<R>,
        settings: Arc<S>,
        deriver: Arc<D>,
        creator_uuid: impl Into<String>,
    ) -> Self {
        Self {
            store,
            registry,
            settings,
            deriver,
            creator_uuid: creator_uuid.into(),
            restore_gate: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &PoolStore {
        &self.store
    }

    pub fn creator_uuid(&self) -> &str {
        &self.creator_uuid
    }

    // ================================
    // Create
    // ================================

    /// Allocate a derivation index, derive the receive address, and publish
    /// the new pool. The registry write comes first: a pool the server has
    /// never seen must not exist locally, or its index would be spent on a
    /// pool nobody else can discover.
    pub async fn create_pool(&self, params: NewPoolParams) -> Result<Pool, SyncError> {
        let state = self.settings.sync_state().await.map_err(SyncError::Settings)?;
        let index = state.next_index();
        let derived = self.deriver.derive(index).map_err(SyncError::Derivation)?;

        let pool = Pool {
            pool_id: Uuid::new_v4().to_string(),
            creator_uuid: self.creator_uuid.clone(),
            pool_title: params.title,
            goal_amount: params.goal_amount,
            current_amount: 0,
            status: PoolStatus::Active,
            spark_address: derived.spark_address,
            identity_pub_key: derived.identity_pub_key,
            derivation_index: index,
            pool_denomination: params.denomination,
            created_at: now_ms(),
            closed_at: None,
            transfer_tx_id: None,
            contributor_count: 0,
            last_contribution_at: None,
            top_contributors: vec![],
            last_updated: 0,
        };

        self.registry.create(&pool).await.map_err(SyncError::Registry)?;

        // Remote success makes the index spent. Local bookkeeping failures
        // from here on are logged, never propagated: the counter must still
        // advance or the next create would hand the same index to a second
        // pool the server already knows nothing can reclaim.
        if let Err(e) = self.store.upsert_pool(&pool).await {
            log::warn!("[SYNC] local write failed for new pool {}: {e}", pool.pool_id);
        }
        if let Err(e) = self.settings.set_sync_state(state.advanced()).await {
            log::warn!("[SYNC] failed to persist derivation counter: {e:#}");
        }

        log::info!("[SYNC] created pool {} at index {}", pool.pool_id, index);
        Ok(pool)
    }

    // ================================
    // Refresh
    // ================================

    /// Store-only read for the instant-UI fast path; no network.
    pub async fn cached_view(&self, pool_id: &str) -> Result<Option<PoolView>, SyncError> {
        match self.store.get_pool(pool_id).await? {
            Some(pool) => {
                let contributions = self.store.contributions_for_pool(pool_id).await?;
                Ok(Some(PoolView { pool, contributions }))
            }
            None => Ok(None),
        }
    }

    /// Pull contribution deltas since the local cursor, then overwrite the
    /// local pool document with the server's aggregate copy. Transport
    /// failures degrade to cached data; only a pool that exists neither
    /// locally nor remotely is an error.
    pub async fn refresh_pool(&self, pool_id: &str) -> Result<PoolView, SyncError> {
        let cached = self.store.get_pool(pool_id).await?;

        // Closed pools are immutable: serve the cache, never hit the
        // network, never risk reopening one from a stale read.
        if let Some(pool) = &cached {
            if !PoolLifecycle::of(pool).allows_sync() {
                log::debug!("[SYNC] pool {pool_id} is closed, skipping sync");
                let contributions = self.store.contributions_for_pool(pool_id).await?;
                return Ok(PoolView { pool: pool.clone(), contributions });
            }
        }

        let cursor = self.store.latest_timestamp(pool_id).await?;
        match self.registry.contributions_since(pool_id, cursor).await {
            Ok(fresh) if !fresh.is_empty() => {
                let n = self.store.save_contributions_batch(&fresh).await?;
                log::debug!(
                    "[SYNC] pulled {n} contributions for {pool_id} since ({}, {})",
                    cursor.seconds,
                    cursor.nanos
                );
            }
            Ok(_) => {}
            Err(e) => log::warn!("[SYNC] contribution pull failed for {pool_id}: {e:#}"),
        }

        let pool = match self.registry.get_by_id(pool_id).await {
            Ok(Some(remote)) => {
                // The document's aggregates are server-computed; overwrite
                // the local copy wholesale rather than recomputing from rows.
                self.store.upsert_pool(&remote).await?;
                remote
            }
            Ok(None) => match cached {
                Some(pool) => pool,
                None => return Err(SyncError::PoolNotFound(pool_id.to_string())),
            },
            Err(e) => match cached {
                Some(pool) => {
                    log::warn!("[SYNC] refresh degraded to cache for {pool_id}: {e:#}");
                    pool
                }
                None => return Err(SyncError::Registry(e)),
            },
        };

        let contributions = self.store.contributions_for_pool(pool_id).await?;
        Ok(PoolView { pool, contributions })
    }

    /// Refresh every locally-known active pool from the registry in
    /// parallel. One pool's failure never aborts the batch; returns how
    /// many pools were refreshed successfully.
    pub async fn sync_active_pools(&self) -> Result<usize, SyncError> {
        let pools = self.store.get_all_pools().await?;
        let active: Vec<Pool> = pools.into_iter().filter(|p| !p.is_closed()).collect();
        if active.is_empty() {
            return Ok(0);
        }

        let results = join_all(active.iter().map(|p| self.sync_one(&p.pool_id))).await;
        let ok = results.into_iter().filter(|r| *r).count();
        log::info!("[SYNC] bulk sync: {ok}/{} active pools refreshed", active.len());
        Ok(ok)
    }

    async fn sync_one(&self, pool_id: &str) -> bool {
        match self.registry.get_by_id(pool_id).await {
            Ok(Some(remote)) => match self.store.upsert_pool(&remote).await {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("[SYNC] local write failed for {pool_id}: {e}");
                    false
                }
            },
            Ok(None) => {
                log::warn!("[SYNC] pool {pool_id} missing remotely, keeping cache");
                false
            }
            Err(e) => {
                log::warn!("[SYNC] bulk fetch failed for {pool_id}: {e:#}");
                false
            }
        }
    }

    // ================================
    // Restore
    // ================================

    /// Once-per-install recovery of this identity's pools from the
    /// registry. Runs only when the local store is empty; always advances
    /// the derivation counter past every recovered index so a new pool can
    /// never collide with a recovered one.
    pub async fn restore_if_needed(&self) -> Result<RestoreOutcome, SyncError> {
        // Concurrent triggers (rapid re-focus events) collapse here; the
        // persisted flag is re-checked inside the critical section.
        let _gate = self.restore_gate.lock().await;

        if self.settings.restore_done().await.map_err(SyncError::Settings)? {
            return Ok(RestoreOutcome::AlreadyChecked);
        }

        if self.store.count_pools().await? > 0 {
            // A device with local pools is assumed already synced. See
            // DESIGN.md for the multi-device tradeoff this bakes in.
            self.mark_restore_done().await?;
            return Ok(RestoreOutcome::SkippedLocalPools);
        }

        let remote = self
            .registry
            .get_by_creator(&self.creator_uuid)
            .await
            .map_err(SyncError::Registry)?;
        if remote.is_empty() {
            self.mark_restore_done().await?;
            return Ok(RestoreOutcome::NothingToRestore);
        }

        let mut max_index = 0u32;
        for pool in &remote {
            self.store.upsert_pool(pool).await?;
            max_index = max_index.max(pool.derivation_index);
        }

        let state = self.settings.sync_state().await.map_err(SyncError::Settings)?;
        self.settings
            .set_sync_state(state.advanced_past(max_index))
            .await
            .map_err(SyncError::Settings)?;
        self.mark_restore_done().await?;

        log::info!(
            "[RESTORE] recovered {} pools, counter advanced past index {max_index}",
            remote.len()
        );
        Ok(RestoreOutcome::Restored(remote.len()))
    }

    async fn mark_restore_done(&self) -> Result<(), SyncError> {
        self.settings.set_restore_done(true).await.map_err(SyncError::Settings)
    }

    // ================================
    // Close / delete
    // ================================

    /// The one-way close. Same authority ordering as create: the registry
    /// write comes first, then the local mirror. After this, refresh is a
    /// cached read for this pool.
    pub async fn close_pool(
        &self,
        pool_id: &str,
        transfer_tx_id: Option<String>,
    ) -> Result<Pool, SyncError> {
        let mut pool = self
            .store
            .get_pool(pool_id)
            .await?
            .ok_or_else(|| SyncError::PoolNotFound(pool_id.to_string()))?;

        let mut lifecycle = PoolLifecycle::of(&pool);
        lifecycle.close()?;

        pool.status = PoolStatus::Closed;
        pool.closed_at = Some(now_ms());
        pool.transfer_tx_id = transfer_tx_id;

        self.registry.update(&pool).await.map_err(SyncError::Registry)?;
        self.store.upsert_pool(&pool).await?;

        log::info!("[SYNC] closed pool {pool_id}");
        Ok(pool)
    }

    /// Remove a pool remotely and locally. `Ok(false)` when nothing existed
    /// locally. The pool's derivation index stays burned either way.
    pub async fn delete_pool(&self, pool_id: &str) -> Result<bool, SyncError> {
        self.registry.delete_by_id(pool_id).await.map_err(SyncError::Registry)?;
        Ok(self.store.delete_pool(pool_id).await?)
    }
}
