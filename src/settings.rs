//! Persisted user-settings collaborator.
//!
//! The engine only needs two facts from settings: the derivation counter and
//! the once-per-install restore flag. Both sit behind a narrow trait so the
//! host app can back them with whatever key-value store it already has.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::derivation::SyncState;

#[async_trait]
pub trait SettingsStore: Send + Sync {
    async fn sync_state(&self) -> anyhow::Result<SyncState>;
    async fn set_sync_state(&self, state: SyncState) -> anyhow::Result<()>;

    /// Whether the restore-on-reinstall check has already run.
    async fn restore_done(&self) -> anyhow::Result<bool>;
    async fn set_restore_done(&self, done: bool) -> anyhow::Result<()>;
}

/// In-memory settings for tests and the demo binary.
#[derive(Debug, Default)]
pub struct MemorySettings {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    sync_state: SyncState,
    restore_done: bool,
}

impl MemorySettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sync_state(state: SyncState) -> Self {
        Self {
            inner: Mutex::new(Inner { sync_state: state, restore_done: false }),
        }
    }
}

#[async_trait]
impl SettingsStore for MemorySettings {
    async fn sync_state(&self) -> anyhow::Result<SyncState> {
        Ok(self.inner.lock().await.sync_state)
    }

    async fn set_sync_state(&self, state: SyncState) -> anyhow::Result<()> {
        self.inner.lock().await.sync_state = state;
        Ok(())
    }

    async fn restore_done(&self) -> anyhow::Result<bool> {
        Ok(self.inner.lock().await.restore_done)
    }

    async fn set_restore_done(&self, done: bool) -> anyhow::Result<()> {
        self.inner.lock().await.restore_done = done;
        Ok(())
    }
}
