//! Application-wide constants and compile-time configuration.
//!
//! All discovery policy, timing parameters, and protocol constants live
//! here so they can be tuned in one place. [`DiscoveryConfig`] bundles the
//! ones the discovery loop reads at runtime.

use crate::ble::radio::{ConnParams, ScanMode};

// Discovery policy

/// Complete Local Name a peripheral must advertise to be connected to.
pub const TARGET_NAME: &[u8] = b"DXC";

/// Minimum RSSI (dBm) for a peripheral to count as "in close proximity".
pub const MIN_RSSI_DBM: i8 = -50;

/// Number of devices that must complete a connect cycle before discovery stops.
pub const REGISTRY_CAPACITY: usize = 3;

/// Upper bound on scan starts in one discovery run.
///
/// Every completed or failed attempt costs one cycle, so this is what
/// stops the loop when the same peripherals keep failing.
pub const MAX_DISCOVERY_CYCLES: u16 = 16;

/// Non-qualifying reports tolerated in one scan cycle before it is treated
/// as "no further candidates". `0` disables the bound.
pub const MAX_REJECTIONS_PER_CYCLE: u32 = 2048;

// BLE

/// Length of a rendered address, `"AA:BB:CC:DD:EE:FF (random-id)"` plus slack.
pub const ADDR_STR_LEN: usize = 30;

/// Duration of one BLE scan window (seconds). A window that closes without
/// a candidate ends discovery.
pub const BLE_SCAN_DURATION_SECS: u64 = 8;

/// Back-off before retrying a scan that failed to start (milliseconds).
pub const BLE_SCAN_RETRY_MS: u64 = 500;

/// BLE connection interval range (in 1.25 ms units).
/// 24..40 = 30..50 ms, the stack defaults.
pub const BLE_CONN_INTERVAL_MIN: u16 = 24;
pub const BLE_CONN_INTERVAL_MAX: u16 = 40;

/// BLE peripheral latency (number of connection events the peripheral can skip).
pub const BLE_PERIPHERAL_LATENCY: u16 = 0;

/// BLE supervision timeout (in 10 ms units). 400 = 4 s.
pub const BLE_SUP_TIMEOUT: u16 = 400;

/// HCI reason "Remote User Terminated Connection", sent on voluntary teardown.
pub const HCI_ERR_REMOTE_USER_TERM_CONN: u8 = 0x13;

/// Runtime knobs for [`crate::ble::discovery::Discovery`].
#[derive(Clone, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct DiscoveryConfig {
    /// Name matched against the Complete Local Name element.
    pub target_name: &'static [u8],
    /// Reports weaker than this are rejected.
    pub min_rssi: i8,
    /// Passive scanning is enough for names carried in the advertisement.
    pub scan_mode: ScanMode,
    pub conn_params: ConnParams,
    /// Reason code sent with the voluntary disconnect.
    pub disconnect_reason: u8,
    /// `0` means unbounded.
    pub max_cycles: u16,
    /// `0` means unbounded.
    pub max_rejections_per_cycle: u32,
}

impl DiscoveryConfig {
    pub const fn new() -> Self {
        Self {
            target_name: TARGET_NAME,
            min_rssi: MIN_RSSI_DBM,
            scan_mode: ScanMode::Passive,
            conn_params: ConnParams::DEFAULT,
            disconnect_reason: HCI_ERR_REMOTE_USER_TERM_CONN,
            max_cycles: MAX_DISCOVERY_CYCLES,
            max_rejections_per_cycle: MAX_REJECTIONS_PER_CYCLE,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self::new()
    }
}
