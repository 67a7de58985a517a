//! Bluetooth Low Energy discovery core.
//!
//! Runs the radio in **Central** role and walks nearby peripherals through
//! a connect-verify-disconnect cycle:
//!
//! 1. **Filter** - drops reports that are not connectable or not close.
//! 2. **Name parser** - scans the advertisement payload for the target
//!    Complete Local Name.
//! 3. **Session** - tracks the single in-flight connection attempt.
//! 4. **Registry** - remembers devices that completed a cycle.
//! 5. **Discovery** - wires the above together and decides when to stop.
//!
//! The link layer is reached only through the [`radio::Radio`] trait; the
//! `softdevice` module implements it for the Nordic S140 on target.

pub mod adv_parser;
pub mod discovery;
pub mod filter;
pub mod radio;
pub mod registry;
pub mod session;
#[cfg(feature = "embedded")]
pub mod softdevice;

use core::fmt::{self, Write};

use heapless::String;

use crate::config::ADDR_STR_LEN;

/// Rendered address, e.g. `"C0:11:22:33:44:55 (random)"`.
pub type AddrString = String<ADDR_STR_LEN>;

/// Address type tag carried next to the 6 address bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AddressKind {
    Public,
    Random,
    /// Resolved public identity address.
    PublicIdentity,
    /// Resolved random (static) identity address.
    RandomIdentity,
    Other(u8),
}

impl From<u8> for AddressKind {
    fn from(raw: u8) -> Self {
        match raw {
            0x00 => AddressKind::Public,
            0x01 => AddressKind::Random,
            0x02 => AddressKind::PublicIdentity,
            0x03 => AddressKind::RandomIdentity,
            other => AddressKind::Other(other),
        }
    }
}

/// A BLE device address.
///
/// `bytes` are in over-the-air order (least-significant byte first), the
/// way both HCI and the SoftDevice hand them over.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct BleAddress {
    pub kind: AddressKind,
    pub bytes: [u8; 6],
}

impl BleAddress {
    pub const fn new(kind: AddressKind, bytes: [u8; 6]) -> Self {
        Self { kind, bytes }
    }

    /// Render as `"AA:BB:CC:DD:EE:FF (type)"`, most-significant byte first.
    pub fn to_str(&self) -> AddrString {
        let mut s = String::new();
        // Longest rendering is 29 bytes, always fits.
        let _ = write!(&mut s, "{}", self);
        s
    }
}

impl fmt::Display for BleAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02X}:{:02X}:{:02X}:{:02X}:{:02X}:{:02X} ",
            b[5], b[4], b[3], b[2], b[1], b[0]
        )?;
        match self.kind {
            AddressKind::Public => f.write_str("(public)"),
            AddressKind::Random => f.write_str("(random)"),
            AddressKind::PublicIdentity => f.write_str("(public-id)"),
            AddressKind::RandomIdentity => f.write_str("(random-id)"),
            AddressKind::Other(raw) => write!(f, "(0x{:02x})", raw),
        }
    }
}

/// Advertising PDU type of a report, as coded in the HCI LE Advertising
/// Report event.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AdvType {
    /// ADV_IND.
    ConnectableUndirected,
    /// ADV_DIRECT_IND.
    ConnectableDirected,
    /// ADV_SCAN_IND.
    ScannableUndirected,
    /// ADV_NONCONN_IND.
    NonConnectable,
    /// SCAN_RSP.
    ScanResponse,
    /// Extended advertising report.
    Extended,
    Other(u8),
}

impl AdvType {
    /// Only these two types permit a connection request.
    pub fn is_connectable(self) -> bool {
        matches!(
            self,
            AdvType::ConnectableUndirected | AdvType::ConnectableDirected
        )
    }
}

impl From<u8> for AdvType {
    fn from(raw: u8) -> Self {
        match raw {
            0x00 => AdvType::ConnectableUndirected,
            0x01 => AdvType::ConnectableDirected,
            0x02 => AdvType::ScannableUndirected,
            0x03 => AdvType::NonConnectable,
            0x04 => AdvType::ScanResponse,
            0x05 => AdvType::Extended,
            other => AdvType::Other(other),
        }
    }
}

/// One advertisement report. Borrows the payload, so it only lives as long
/// as the radio callback that produced it.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AdvReport<'a> {
    pub address: BleAddress,
    /// Received Signal Strength Indicator (dBm).
    pub rssi: i8,
    pub adv_type: AdvType,
    /// Raw tag-length-value advertisement data.
    pub data: &'a [u8],
}

/// Opaque identifier the radio assigns to a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct LinkHandle(pub u16);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn address_renders_msb_first_with_type() {
        let addr = BleAddress::new(
            AddressKind::Random,
            [0x55, 0x44, 0x33, 0x22, 0x11, 0xC0],
        );
        assert_eq!(addr.to_str().as_str(), "C0:11:22:33:44:55 (random)");
    }

    #[test]
    fn address_type_suffixes() {
        let bytes = [0xFF; 6];
        let render = |kind| BleAddress::new(kind, bytes).to_str();
        assert!(render(AddressKind::Public).ends_with(" (public)"));
        assert!(render(AddressKind::PublicIdentity).ends_with(" (public-id)"));
        assert!(render(AddressKind::RandomIdentity).ends_with(" (random-id)"));
        assert!(render(AddressKind::Other(0x7)).ends_with(" (0x07)"));
    }

    #[test]
    fn longest_rendering_fits_buffer() {
        let addr = BleAddress::new(AddressKind::RandomIdentity, [0xAB; 6]);
        let s = addr.to_str();
        assert_eq!(s.len(), 29);
        assert!(s.len() <= ADDR_STR_LEN);
    }

    #[test]
    fn only_ind_and_direct_ind_are_connectable() {
        for raw in 0u8..=0x10 {
            let ty = AdvType::from(raw);
            assert_eq!(ty.is_connectable(), raw == 0x00 || raw == 0x01, "type {raw}");
        }
    }
}
