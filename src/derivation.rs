//! Derivation-index allocation and receive-address derivation.
//!
//! Index allocation is pure bookkeeping over an explicit [`SyncState`] value:
//! the caller reads it from settings, derives from it, and persists the
//! advanced copy back *only after* the pool's remote create has succeeded.
//! Indices are cheap and never reused; a burned index from a partial failure
//! is tolerated, a collision is not.

use anyhow::{Context, Result};
use bdk_wallet::miniscript::{Descriptor, DescriptorPublicKey};
use bitcoin::{Address, Network};
use serde::{Deserialize, Serialize};

/// First derivation index handed to a pool. Keeps pool addresses clear of
/// the wallet's ordinary receive-address index space.
pub const STARTING_OFFSET: u32 = 1000;

/// Persisted allocator state (the `currentDerivedPoolIndex` setting).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    pub current_derived_pool_index: u32,
}

impl SyncState {
    pub fn new(current_derived_pool_index: u32) -> Self {
        Self { current_derived_pool_index }
    }

    /// The index the next created pool will receive.
    pub fn next_index(&self) -> u32 {
        STARTING_OFFSET + self.current_derived_pool_index
    }

    /// State to persist once the pool using [`Self::next_index`] exists
    /// remotely.
    pub fn advanced(self) -> Self {
        Self { current_derived_pool_index: self.current_derived_pool_index + 1 }
    }

    /// Advance past an index discovered during restore so a future create
    /// can never collide with a recovered pool. Never decreases the counter.
    pub fn advanced_past(self, max_observed_index: u32) -> Self {
        if max_observed_index < STARTING_OFFSET {
            return self;
        }
        let needed = max_observed_index - STARTING_OFFSET + 1;
        Self {
            current_derived_pool_index: self.current_derived_pool_index.max(needed),
        }
    }
}

/// Output of the opaque wallet-derivation collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedAddress {
    pub spark_address: String,
    pub identity_pub_key: String,
}

/// Opaque `(seed, index) -> address` function. Deterministic, no side
/// effects; key-derivation internals stay behind this seam.
pub trait AddressDeriver: Send + Sync {
    fn derive(&self, index: u32) -> Result<DerivedAddress>;
}

/// Descriptor-backed deriver: one wildcard descriptor, one address per
/// derivation index.
#[derive(Debug, Clone)]
pub struct DescriptorDeriver {
    descriptor: Descriptor<DescriptorPublicKey>,
    network: Network,
}

impl DescriptorDeriver {
    pub fn new(descriptor: Descriptor<DescriptorPublicKey>, network: Network) -> Self {
        Self { descriptor, network }
    }
}

impl AddressDeriver for DescriptorDeriver {
    fn derive(&self, index: u32) -> Result<DerivedAddress> {
        let derived = self
            .descriptor
            .at_derivation_index(index)
            .context("descriptor does not derive at index")?;
        let spk = derived.script_pubkey();
        let address = Address::from_script(&spk, self.network)
            .context("derived script has no address form")?;

        Ok(DerivedAddress {
            spark_address: address.to_string(),
            identity_pub_key: hex::encode(spk.as_bytes()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    fn test_descriptor() -> Descriptor<DescriptorPublicKey> {
        Descriptor::from_str(
            "wpkh([73c5da0a/84h/1h/0h]tpubDC8msFGeGuwnKG9Upg7DM2b4DaRqg3CUZa5g8v2SRQ6K4NSkxUgd7HsL2XVWbVm39yBA4LAxysQAm397zwQSQoQgewGiYZqrA9DsP4zbQ1M/0/*)"
        ).unwrap()
    }

    #[test]
    fn next_index_starts_at_offset() {
        assert_eq!(SyncState::default().next_index(), STARTING_OFFSET);
        assert_eq!(SyncState::new(7).next_index(), STARTING_OFFSET + 7);
    }

    #[test]
    fn advanced_past_never_decreases() {
        let state = SyncState::new(10);
        assert_eq!(state.advanced_past(STARTING_OFFSET + 3), state);
        assert_eq!(state.advanced_past(0), state);
        assert_eq!(
            state.advanced_past(STARTING_OFFSET + 41),
            SyncState::new(42)
        );
        // Applying it again is a no-op.
        assert_eq!(
            SyncState::new(42).advanced_past(STARTING_OFFSET + 41),
            SyncState::new(42)
        );
    }

    #[test]
    fn next_index_after_restore_exceeds_every_restored_index() {
        let restored_max = STARTING_OFFSET + 17;
        let state = SyncState::new(2).advanced_past(restored_max);
        assert!(state.next_index() > restored_max);
    }

    #[test]
    fn interleaved_creates_and_restores_never_collide() {
        let mut state = SyncState::default();
        let mut assigned = std::collections::BTreeSet::new();

        for round in 0..50u32 {
            let idx = state.next_index();
            assert!(assigned.insert(idx), "index {idx} assigned twice");
            state = state.advanced();

            if round % 7 == 0 {
                // Restore discovers a pool created earlier on another device.
                state = state.advanced_past(STARTING_OFFSET + round + 5);
            }
        }
    }

    #[test]
    fn descriptor_deriver_is_deterministic_and_index_sensitive() {
        let deriver = DescriptorDeriver::new(test_descriptor(), Network::Testnet);

        let a1 = deriver.derive(1000).unwrap();
        let a2 = deriver.derive(1000).unwrap();
        let b = deriver.derive(1001).unwrap();

        assert_eq!(a1, a2);
        assert_ne!(a1.spark_address, b.spark_address);
        assert_ne!(a1.identity_pub_key, b.identity_pub_key);
    }
}
