//! Core documents shared by the local store and the cloud registry.
//!
//! `Pool` and `Contribution` serialize to the exact JSON shape stored in the
//! `storageObject` column and exchanged with the remote registry (camelCase
//! field names). `last_updated` is local bookkeeping only and never part of
//! the remote document identity, so it is excluded from serialization.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Raw `createdAtSeconds` values above this magnitude are legacy rows that
/// stored epoch *milliseconds* in the seconds column. An epoch-seconds value
/// this large is tens of thousands of years away; an epoch-millis value this
/// small is 2001.
pub(crate) const LEGACY_MILLIS_THRESHOLD: i64 = 1_000_000_000_000;

/// Compound (seconds, nanos) timestamp giving contributions a stable
/// sub-second ordering.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ContributionTimestamp {
    pub seconds: i64,
    pub nanos: u32,
}

impl ContributionTimestamp {
    pub const ZERO: ContributionTimestamp = ContributionTimestamp { seconds: 0, nanos: 0 };

    pub fn new(seconds: i64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    /// Build from raw column values, rescaling legacy rows whose seconds
    /// column actually holds epoch milliseconds.
    pub fn from_raw(seconds: i64, nanos: u32) -> Self {
        if seconds > LEGACY_MILLIS_THRESHOLD {
            Self {
                seconds: seconds / 1000,
                nanos: (seconds % 1000) as u32 * 1_000_000,
            }
        } else {
            Self { seconds, nanos }
        }
    }

    pub fn from_millis(millis: i64) -> Self {
        Self {
            seconds: millis / 1000,
            nanos: (millis % 1000) as u32 * 1_000_000,
        }
    }

    pub fn now() -> Self {
        let d = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self {
            seconds: d.as_secs() as i64,
            nanos: d.subsec_nanos(),
        }
    }

    pub fn is_zero(&self) -> bool {
        self.seconds == 0 && self.nanos == 0
    }
}

/// Lifecycle status carried on the pool document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PoolStatus {
    Active,
    Closed,
}

/// One entry of the server-maintained leaderboard on the pool document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TopContributor {
    pub name: String,
    pub amount: u64,
}

/// A shared fundraising objective with a dedicated receive address.
///
/// `current_amount`, `contributor_count` and `top_contributors` are
/// server-computed aggregates: the engine overwrites them from the remote
/// document and never recomputes them from local contribution rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pool {
    pub pool_id: String,
    #[serde(rename = "creatorUUID")]
    pub creator_uuid: String,
    pub pool_title: String,
    /// Goal in the smallest currency unit.
    pub goal_amount: u64,
    pub current_amount: u64,
    pub status: PoolStatus,
    pub spark_address: String,
    pub identity_pub_key: String,
    pub derivation_index: u32,
    pub pool_denomination: String,
    /// Epoch milliseconds.
    pub created_at: i64,
    pub closed_at: Option<i64>,
    pub transfer_tx_id: Option<String>,
    pub contributor_count: u32,
    pub last_contribution_at: Option<i64>,
    #[serde(default)]
    pub top_contributors: Vec<TopContributor>,
    /// Local bookkeeping, mirrors the `lastUpdated` column.
    #[serde(skip)]
    pub last_updated: i64,
}

impl Pool {
    pub fn is_closed(&self) -> bool {
        self.status == PoolStatus::Closed
    }
}

/// One immutable payment record attributed to a pool. Never updated in
/// place; corrections are new rows with new ids.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contribution {
    pub contribution_id: String,
    pub pool_id: String,
    pub contributor_name: String,
    /// Smallest currency unit, strictly positive.
    pub amount: u64,
    pub created_at: ContributionTimestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_raw_passes_plain_seconds_through() {
        let ts = ContributionTimestamp::from_raw(1_700_000_000, 42);
        assert_eq!(ts, ContributionTimestamp::new(1_700_000_000, 42));
    }

    #[test]
    fn from_raw_rescales_legacy_millis() {
        // 2023-11-14T22:13:20.123Z stored as millis in the seconds column.
        let ts = ContributionTimestamp::from_raw(1_700_000_000_123, 0);
        assert_eq!(ts.seconds, 1_700_000_000);
        assert_eq!(ts.nanos, 123_000_000);
    }

    #[test]
    fn timestamps_order_by_seconds_then_nanos() {
        let a = ContributionTimestamp::new(10, 999_999_999);
        let b = ContributionTimestamp::new(11, 0);
        let c = ContributionTimestamp::new(11, 1);
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn pool_roundtrip_keeps_remote_field_names() {
        let pool = Pool {
            pool_id: "p1".into(),
            creator_uuid: "c1".into(),
            pool_title: "Birthday".into(),
            goal_amount: 100_000,
            current_amount: 0,
            status: PoolStatus::Active,
            spark_address: "sprt1qtest".into(),
            identity_pub_key: "02ab".into(),
            derivation_index: 1000,
            pool_denomination: "USD".into(),
            created_at: 1_700_000_000_000,
            closed_at: None,
            transfer_tx_id: None,
            contributor_count: 0,
            last_contribution_at: None,
            top_contributors: vec![],
            last_updated: 123,
        };

        let json = serde_json::to_value(&pool).unwrap();
        assert_eq!(json["poolId"], "p1");
        assert_eq!(json["creatorUUID"], "c1");
        assert_eq!(json["status"], "active");
        // Local bookkeeping must not leak into the remote document.
        assert!(json.get("lastUpdated").is_none());

        let back: Pool = serde_json::from_value(json).unwrap();
        assert_eq!(back.pool_id, pool.pool_id);
        assert_eq!(back.last_updated, 0);
    }
}
