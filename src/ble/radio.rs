//! Link-layer interface consumed by the discovery core.
//!
//! Every operation returns immediately. Results that the link layer only
//! knows later (reports, connection outcome, teardown) come back as
//! [`RadioEvent`]s fed into
//! [`Discovery::handle`](crate::ble::discovery::Discovery::handle) on the
//! same execution context.

use crate::ble::{AdvReport, BleAddress, LinkHandle};
use crate::config;
use crate::error::RadioError;

/// Scan type.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ScanMode {
    /// Listen only; names must be in the advertisement itself.
    #[default]
    Passive,
    /// Send scan requests to also receive scan-response data.
    Active,
}

/// Connection parameters requested when creating a link.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct ConnParams {
    /// 1.25 ms units.
    pub interval_min: u16,
    /// 1.25 ms units.
    pub interval_max: u16,
    pub latency: u16,
    /// 10 ms units.
    pub supervision_timeout: u16,
}

impl ConnParams {
    pub const DEFAULT: Self = Self {
        interval_min: config::BLE_CONN_INTERVAL_MIN,
        interval_max: config::BLE_CONN_INTERVAL_MAX,
        latency: config::BLE_PERIPHERAL_LATENCY,
        supervision_timeout: config::BLE_SUP_TIMEOUT,
    };

    pub const fn supervision_timeout_ms(&self) -> u32 {
        self.supervision_timeout as u32 * 10
    }

    /// Polls at `poll_ms` needed to outlast one supervision timeout. A link
    /// still up after that many is not going down on its own.
    pub const fn teardown_polls(&self, poll_ms: u32) -> u32 {
        if poll_ms == 0 {
            return 1;
        }
        self.supervision_timeout_ms().div_ceil(poll_ms) + 1
    }
}

impl Default for ConnParams {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Asynchronous notifications from the link layer.
#[derive(Clone, Copy, Debug)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioEvent<'a> {
    /// An advertisement was received while scanning.
    Report(AdvReport<'a>),
    /// The scan window closed without the core asking for it: there are no
    /// further candidates.
    ScanComplete,
    /// Outcome of a `connect` request. `status == 0` means the link is up.
    Connected {
        handle: LinkHandle,
        address: BleAddress,
        status: u8,
    },
    /// A link went down, voluntarily or not.
    Disconnected {
        handle: LinkHandle,
        address: BleAddress,
        reason: u8,
    },
}

/// The operations the discovery core needs from a BLE stack.
pub trait Radio {
    fn start_scan(&mut self, mode: ScanMode) -> Result<(), RadioError>;

    fn stop_scan(&mut self) -> Result<(), RadioError>;

    /// Request a connection. The returned handle identifies the attempt;
    /// its outcome arrives as [`RadioEvent::Connected`].
    fn connect(
        &mut self,
        address: &BleAddress,
        params: &ConnParams,
    ) -> Result<LinkHandle, RadioError>;

    /// Request teardown. Confirmation arrives as [`RadioEvent::Disconnected`].
    fn disconnect(&mut self, handle: LinkHandle, reason: u8) -> Result<(), RadioError>;
}

impl<R: Radio + ?Sized> Radio for &mut R {
    fn start_scan(&mut self, mode: ScanMode) -> Result<(), RadioError> {
        (**self).start_scan(mode)
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        (**self).stop_scan()
    }

    fn connect(
        &mut self,
        address: &BleAddress,
        params: &ConnParams,
    ) -> Result<LinkHandle, RadioError> {
        (**self).connect(address, params)
    }

    fn disconnect(&mut self, handle: LinkHandle, reason: u8) -> Result<(), RadioError> {
        (**self).disconnect(handle, reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn teardown_polls_outlast_supervision_timeout() {
        let params = ConnParams::DEFAULT;
        assert_eq!(params.supervision_timeout_ms(), 4000);
        // 4 s at 500 ms, plus one to see the link gone.
        assert_eq!(params.teardown_polls(500), 9);
        assert_eq!(params.teardown_polls(300), 15);
        assert_eq!(params.teardown_polls(0), 1);
    }
}
