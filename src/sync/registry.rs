//! Minimal cloud-registry interface the sync engine consumes.
//!
//! The remote document store is authoritative: its pool documents carry the
//! server-computed aggregates. Transport and auth live behind this trait.

use async_trait::async_trait;

use crate::model::{Contribution, ContributionTimestamp, Pool};

#[async_trait]
pub trait CloudPoolRegistry: Send + Sync {
    async fn create(&self, pool: &Pool) -> anyhow::Result<()>;

    async fn update(&self, pool: &Pool) -> anyhow::Result<()>;

    async fn get_by_id(&self, pool_id: &str) -> anyhow::Result<Option<Pool>>;

    async fn get_by_creator(&self, creator_uuid: &str) -> anyhow::Result<Vec<Pool>>;

    async fn delete_by_id(&self, pool_id: &str) -> anyhow::Result<()>;

    /// Contributions strictly newer than `since`. `since == ZERO` means
    /// everything.
    async fn contributions_since(
        &self,
        pool_id: &str,
        since: ContributionTimestamp,
    ) -> anyhow::Result<Vec<Contribution>>;
}
