//! Read model over the stored contribution rows of one pool.
//!
//! The creator has no literal contribution row but is always shown, so the
//! feed synthesizes an organizer pseudo-entry at the top. Totals are *not*
//! summed from rows here: concurrent contributions from multiple devices
//! make client-side summation race-prone, so aggregates always come off the
//! server-maintained pool document.

use std::sync::Arc;

use crate::error::StoreError;
use crate::model::{Contribution, ContributionTimestamp, Pool, TopContributor};
use crate::store::PoolStore;

/// One row of the activity feed.
#[derive(Debug, Clone, PartialEq)]
pub struct LedgerEntry {
    /// `None` for the synthesized organizer entry.
    pub contribution_id: Option<String>,
    pub name: String,
    pub amount: u64,
    pub timestamp: ContributionTimestamp,
    pub is_organizer: bool,
}

impl LedgerEntry {
    fn organizer(pool: &Pool, name: &str) -> Self {
        Self {
            contribution_id: None,
            name: name.to_string(),
            amount: 0,
            timestamp: ContributionTimestamp::from_millis(pool.created_at),
            is_organizer: true,
        }
    }

    fn from_contribution(c: Contribution) -> Self {
        Self {
            contribution_id: Some(c.contribution_id),
            name: c.contributor_name,
            amount: c.amount,
            timestamp: c.created_at,
            is_organizer: false,
        }
    }
}

/// Aggregates lifted straight off the pool document.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolAggregates {
    pub current_amount: u64,
    pub goal_amount: u64,
    pub contributor_count: u32,
    pub top_contributors: Vec<TopContributor>,
}

pub struct ContributionLedger {
    store: Arc<PoolStore>,
}

impl ContributionLedger {
    pub fn new(store: Arc<PoolStore>) -> Self {
        Self { store }
    }

    /// Organizer entry plus the `limit` most recent contributions.
    pub async fn recent_activity(
        &self,
        pool: &Pool,
        organizer_name: &str,
        limit: usize,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let mut rows = self.store.contributions_for_pool(&pool.pool_id).await?;
        rows.truncate(limit);

        let mut feed = Vec::with_capacity(rows.len() + 1);
        feed.push(LedgerEntry::organizer(pool, organizer_name));
        feed.extend(rows.into_iter().map(LedgerEntry::from_contribution));
        Ok(feed)
    }

    /// Organizer entry plus every contribution, for the "view all" surface.
    pub async fn full_list(
        &self,
        pool: &Pool,
        organizer_name: &str,
    ) -> Result<Vec<LedgerEntry>, StoreError> {
        let rows = self.store.contributions_for_pool(&pool.pool_id).await?;

        let mut feed = Vec::with_capacity(rows.len() + 1);
        feed.push(LedgerEntry::organizer(pool, organizer_name));
        feed.extend(rows.into_iter().map(LedgerEntry::from_contribution));
        Ok(feed)
    }

    /// Server-computed totals, never recomputed from local rows.
    pub fn aggregates(pool: &Pool) -> PoolAggregates {
        PoolAggregates {
            current_amount: pool.current_amount,
            goal_amount: pool.goal_amount,
            contributor_count: pool.contributor_count,
            top_contributors: pool.top_contributors.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PoolStatus;

    fn pool_doc() -> Pool {
        Pool {
            pool_id: "p1".into(),
            creator_uuid: "creator-1".into(),
            pool_title: "Trip".into(),
            goal_amount: 100_000,
            current_amount: 4_000,
            status: PoolStatus::Active,
            spark_address: "sprt1q".into(),
            identity_pub_key: "02ab".into(),
            derivation_index: 1000,
            pool_denomination: "USD".into(),
            created_at: 1_700_000_000_000,
            closed_at: None,
            transfer_tx_id: None,
            contributor_count: 2,
            last_contribution_at: None,
            top_contributors: vec![],
            last_updated: 0,
        }
    }

    fn row(id: &str, seconds: i64, amount: u64) -> Contribution {
        Contribution {
            contribution_id: id.to_string(),
            pool_id: "p1".to_string(),
            contributor_name: format!("payer-{id}"),
            amount,
            created_at: ContributionTimestamp::new(seconds, 0),
        }
    }

    #[tokio::test]
    async fn organizer_is_prepended_and_limit_applies_to_real_rows() {
        let store = Arc::new(PoolStore::in_memory());
        store
            .save_contributions_batch(&[row("c1", 10, 100), row("c2", 20, 200), row("c3", 30, 300)])
            .await
            .unwrap();

        let ledger = ContributionLedger::new(store);
        let feed = ledger.recent_activity(&pool_doc(), "Alex", 2).await.unwrap();

        assert_eq!(feed.len(), 3); // organizer + 2 newest
        assert!(feed[0].is_organizer);
        assert_eq!(feed[0].name, "Alex");
        assert_eq!(feed[0].amount, 0);
        assert_eq!(feed[1].contribution_id.as_deref(), Some("c3"));
        assert_eq!(feed[2].contribution_id.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn full_list_returns_everything() {
        let store = Arc::new(PoolStore::in_memory());
        store
            .save_contributions_batch(&[row("c1", 10, 100), row("c2", 20, 200)])
            .await
            .unwrap();

        let ledger = ContributionLedger::new(store);
        let feed = ledger.full_list(&pool_doc(), "Alex").await.unwrap();
        assert_eq!(feed.len(), 3);
    }

    #[tokio::test]
    async fn organizer_appears_even_with_no_contributions() {
        let store = Arc::new(PoolStore::in_memory());
        let ledger = ContributionLedger::new(store);

        let feed = ledger.recent_activity(&pool_doc(), "Alex", 5).await.unwrap();
        assert_eq!(feed.len(), 1);
        assert!(feed[0].is_organizer);
    }

    #[test]
    fn aggregates_come_from_the_document() {
        let agg = ContributionLedger::aggregates(&pool_doc());
        assert_eq!(agg.current_amount, 4_000);
        assert_eq!(agg.contributor_count, 2);
    }
}
