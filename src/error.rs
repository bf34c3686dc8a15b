//! Error taxonomy for the engine.
//!
//! Mutation paths (create / close / update / delete) surface these to the
//! caller; background refresh paths log and degrade to cached data instead.

use thiserror::Error;

use crate::lifecycle::LifecycleError;

#[derive(Debug, Error)]
pub enum StoreError {
    /// Synchronous precondition failure, raised before any IO.
    #[error("missing required field: {0}")]
    Validation(&'static str),

    #[error("pool {0} not found")]
    NotFound(String),

    #[error("storage failure: {0}")]
    Sqlx(#[from] sqlx::Error),

    #[error("stored row failed to (de)serialize: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum SyncError {
    /// Neither a cached nor a remote document exists for this id.
    #[error("pool {0} does not exist")]
    PoolNotFound(String),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("cloud registry failure: {0}")]
    Registry(#[source] anyhow::Error),

    #[error("settings store failure: {0}")]
    Settings(#[source] anyhow::Error),

    #[error("address derivation failure: {0}")]
    Derivation(#[source] anyhow::Error),
}
