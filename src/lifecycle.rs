//! Pool lifecycle state machine.
//!
//! This is a PURE state machine: no IO, no async, fully deterministic. The
//! sync engine consults it before every state-changing operation so a closed
//! pool can never be mutated or re-opened by a stale read.

use thiserror::Error;

use crate::model::{Pool, PoolStatus};

/// Where a pool sits between local creation and permanent closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolPhase {
    /// Created locally, remote write not yet confirmed.
    Unsynced,
    /// Present both locally and remotely.
    Synced,
    /// Closed exactly once; value is immutable from here.
    Closed,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LifecycleError {
    #[error("pool is already closed")]
    AlreadyClosed,
    #[error("cannot mark an unsynced pool closed before it is synced")]
    NotSynced,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLifecycle {
    phase: PoolPhase,
}

impl PoolLifecycle {
    pub fn unsynced() -> Self {
        Self { phase: PoolPhase::Unsynced }
    }

    /// Lifecycle of a pool that already has a durable row.
    pub fn of(pool: &Pool) -> Self {
        let phase = match pool.status {
            PoolStatus::Active => PoolPhase::Synced,
            PoolStatus::Closed => PoolPhase::Closed,
        };
        Self { phase }
    }

    pub fn phase(&self) -> PoolPhase {
        self.phase
    }

    /// Whether the sync engine may pull remote state for this pool.
    pub fn allows_sync(&self) -> bool {
        self.phase != PoolPhase::Closed
    }

    /// Whether state-changing writes (aggregate overwrite, close) are legal.
    pub fn allows_mutation(&self) -> bool {
        self.phase != PoolPhase::Closed
    }

    /// Remote create confirmed.
    pub fn mark_synced(&mut self) -> Result<(), LifecycleError> {
        match self.phase {
            PoolPhase::Unsynced | PoolPhase::Synced => {
                self.phase = PoolPhase::Synced;
                Ok(())
            }
            PoolPhase::Closed => Err(LifecycleError::AlreadyClosed),
        }
    }

    /// The one-way `active -> closed` transition.
    pub fn close(&mut self) -> Result<(), LifecycleError> {
        match self.phase {
            PoolPhase::Synced => {
                self.phase = PoolPhase::Closed;
                Ok(())
            }
            PoolPhase::Unsynced => Err(LifecycleError::NotSynced),
            PoolPhase::Closed => Err(LifecycleError::AlreadyClosed),
        }
    }
}
