//! Devices that completed a full connect-verify-disconnect cycle.

use heapless::Vec;

use crate::ble::{AddrString, BleAddress};
use crate::config::REGISTRY_CAPACITY;
use crate::error::RegistryFull;

/// How a recorded device got into the registry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Outcome {
    /// The link came up and was then torn down by us.
    ConnectedAndVerified,
}

/// One registry entry. Holds a copy of the address, never a reference
/// into the live session.
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DeviceRecord {
    address: BleAddress,
    address_str: AddrString,
    outcome: Outcome,
}

impl DeviceRecord {
    fn verified(address: BleAddress) -> Self {
        Self {
            address,
            address_str: address.to_str(),
            outcome: Outcome::ConnectedAndVerified,
        }
    }

    pub fn address(&self) -> &BleAddress {
        &self.address
    }

    /// Rendered address, e.g. `"C0:11:22:33:44:55 (random)"`.
    pub fn address_str(&self) -> &str {
        self.address_str.as_str()
    }

    pub fn outcome(&self) -> Outcome {
        self.outcome
    }
}

/// Ordered, bounded, duplicate-free list of verified devices.
#[derive(Clone, Debug, Default)]
pub struct Registry {
    records: Vec<DeviceRecord, REGISTRY_CAPACITY>,
}

impl Registry {
    pub const fn new() -> Self {
        Self { records: Vec::new() }
    }

    /// Append a verified device.
    ///
    /// Recording an address that is already present is a no-op. Nothing is
    /// ever removed: a completed cycle stays counted.
    pub fn record(&mut self, address: &BleAddress) -> Result<(), RegistryFull> {
        if self.contains(address) {
            return Ok(());
        }
        self.records
            .push(DeviceRecord::verified(*address))
            .map_err(|_| RegistryFull)
    }

    pub fn contains(&self, address: &BleAddress) -> bool {
        self.records.iter().any(|r| r.address == *address)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.records.is_full()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DeviceRecord> {
        self.records.iter()
    }
}
