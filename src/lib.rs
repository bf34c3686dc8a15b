//! Local-first synchronization and ledger engine for fundraising pools.
//!
//! Each pool is a shared objective tied to a wallet-derived receive
//! address. The owning device keeps an authoritative local cache (SQLite),
//! reconciles it against a remote document registry, allocates
//! collision-free derivation indices, and serves an append-only
//! contribution ledger with incremental, idempotent sync.
//!
//! The engine guarantees eventual convergence between local and remote
//! state; it does not execute payments, sign anything, or promise
//! real-time push delivery.

pub mod derivation;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod model;
pub mod settings;
pub mod store;
pub mod sync;

pub use derivation::{AddressDeriver, DerivedAddress, DescriptorDeriver, SyncState, STARTING_OFFSET};
pub use error::{StoreError, SyncError};
pub use ledger::{ContributionLedger, LedgerEntry, PoolAggregates};
pub use lifecycle::{LifecycleError, PoolLifecycle, PoolPhase};
pub use model::{Contribution, ContributionTimestamp, Pool, PoolStatus, TopContributor};
pub use settings::{MemorySettings, SettingsStore};
pub use store::PoolStore;
pub use sync::{CloudPoolRegistry, NewPoolParams, PoolSyncEngine, PoolView, RestoreOutcome};
