//! Pure in-memory cloud registry for tests and the demo binary.
//!
//! Maintains the pool aggregates (`currentAmount`, `contributorCount`,
//! `topContributors`) the way the real server does, so engine tests exercise
//! the "aggregates come from the server, never from row sums" contract.
//! Individual pools can be switched into a failing state to test the
//! isolate-and-continue policy.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::model::{Contribution, ContributionTimestamp, Pool, TopContributor};
use crate::sync::registry::CloudPoolRegistry;

const TOP_CONTRIBUTORS_KEPT: usize = 3;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CallCounts {
    pub create: u32,
    pub update: u32,
    pub get_by_id: u32,
    pub get_by_creator: u32,
    pub delete_by_id: u32,
    pub contributions_since: u32,
}

#[derive(Debug, Default)]
struct MockState {
    pools: BTreeMap<String, Pool>,
    contributions: HashMap<String, Vec<Contribution>>,
    failing_pools: HashSet<String>,
    fail_all: bool,
    counts: CallCounts,
}

#[derive(Debug, Default)]
pub struct MockCloudRegistry {
    state: Mutex<MockState>,
}

impl MockCloudRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a pool document directly, as if another device created it.
    pub async fn seed_pool(&self, pool: Pool) {
        self.state.lock().await.pools.insert(pool.pool_id.clone(), pool);
    }

    /// Record a settled payment and fold it into the pool's server-side
    /// aggregates.
    pub async fn push_contribution(&self, contribution: Contribution) {
        let mut state = self.state.lock().await;

        let rows = state
            .contributions
            .entry(contribution.pool_id.clone())
            .or_default();
        rows.push(contribution.clone());
        let rows = rows.clone();

        if let Some(pool) = state.pools.get_mut(&contribution.pool_id) {
            pool.current_amount += contribution.amount;
            pool.last_contribution_at = Some(contribution.created_at.seconds * 1000);

            let mut by_name: BTreeMap<&str, u64> = BTreeMap::new();
            for c in &rows {
                *by_name.entry(c.contributor_name.as_str()).or_default() += c.amount;
            }
            pool.contributor_count = by_name.len() as u32;

            let mut top: Vec<TopContributor> = by_name
                .into_iter()
                .map(|(name, amount)| TopContributor { name: name.to_string(), amount })
                .collect();
            top.sort_by(|a, b| b.amount.cmp(&a.amount));
            top.truncate(TOP_CONTRIBUTORS_KEPT);
            pool.top_contributors = top;
        }
    }

    /// All registry calls touching `pool_id` fail until cleared.
    pub async fn fail_pool(&self, pool_id: &str) {
        self.state.lock().await.failing_pools.insert(pool_id.to_string());
    }

    /// Every registry call fails until cleared, regardless of pool id.
    pub async fn fail_everything(&self) {
        self.state.lock().await.fail_all = true;
    }

    pub async fn clear_failures(&self) {
        let mut state = self.state.lock().await;
        state.failing_pools.clear();
        state.fail_all = false;
    }

    pub async fn counts(&self) -> CallCounts {
        self.state.lock().await.counts
    }

    pub async fn pool(&self, pool_id: &str) -> Option<Pool> {
        self.state.lock().await.pools.get(pool_id).cloned()
    }

    fn check(state: &MockState, pool_id: &str) -> anyhow::Result<()> {
        if state.fail_all || state.failing_pools.contains(pool_id) {
            return Err(anyhow!("simulated transport failure for pool {pool_id}"));
        }
        Ok(())
    }
}

#[async_trait]
impl CloudPoolRegistry for MockCloudRegistry {
    async fn create(&self, pool: &Pool) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.counts.create += 1;
        Self::check(&state, &pool.pool_id)?;
        state.pools.insert(pool.pool_id.clone(), pool.clone());
        Ok(())
    }

    async fn update(&self, pool: &Pool) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.counts.update += 1;
        Self::check(&state, &pool.pool_id)?;
        state.pools.insert(pool.pool_id.clone(), pool.clone());
        Ok(())
    }

    async fn get_by_id(&self, pool_id: &str) -> anyhow::Result<Option<Pool>> {
        let mut state = self.state.lock().await;
        state.counts.get_by_id += 1;
        Self::check(&state, pool_id)?;
        Ok(state.pools.get(pool_id).cloned())
    }

    async fn get_by_creator(&self, creator_uuid: &str) -> anyhow::Result<Vec<Pool>> {
        let mut state = self.state.lock().await;
        state.counts.get_by_creator += 1;
        if state.fail_all {
            return Err(anyhow!("simulated transport failure"));
        }
        Ok(state
            .pools
            .values()
            .filter(|p| p.creator_uuid == creator_uuid)
            .cloned()
            .collect())
    }

    async fn delete_by_id(&self, pool_id: &str) -> anyhow::Result<()> {
        let mut state = self.state.lock().await;
        state.counts.delete_by_id += 1;
        Self::check(&state, pool_id)?;
        state.pools.remove(pool_id);
        state.contributions.remove(pool_id);
        Ok(())
    }

    async fn contributions_since(
        &self,
        pool_id: &str,
        since: ContributionTimestamp,
    ) -> anyhow::Result<Vec<Contribution>> {
        let mut state = self.state.lock().await;
        state.counts.contributions_since += 1;
        Self::check(&state, pool_id)?;
        Ok(state
            .contributions
            .get(pool_id)
            .map(|rows| {
                rows.iter()
                    .filter(|c| c.created_at > since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
