//! Unified error type for proxlink.
//!
//! We avoid `alloc` - all error variants carry only fixed-size data.
//! Implements `defmt::Format` (behind the `defmt` feature) for efficient
//! on-target logging, and `Display` for host diagnostics.

use core::fmt;

/// Top-level error type used across the discovery core.
///
/// None of these is fatal: every variant is logged and the discovery loop
/// either re-arms scanning or stalls until [`resume`] is called.
///
/// [`resume`]: crate::ble::discovery::Discovery::resume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Error {
    /// Scanning failed to start; the cycle does not proceed.
    ScanStart(RadioError),

    /// Scanning could not be suspended ahead of a connect request, so the
    /// attempt was abandoned.
    ScanStop(RadioError),

    /// The link layer refused to create the connection.
    ConnectionCreate(RadioError),

    /// The connection attempt completed with a non-zero HCI status.
    ConnectionResult(u8),

    /// The voluntary disconnect request was refused.
    Disconnect(RadioError),

    /// The registry already holds [`REGISTRY_CAPACITY`] devices.
    ///
    /// [`REGISTRY_CAPACITY`]: crate::config::REGISTRY_CAPACITY
    RegistryFull,
}

/// Errors returned synchronously by a [`Radio`](crate::ble::radio::Radio).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum RadioError {
    /// Raw (negative errno style) error code from the link layer.
    Raw(i32),
    /// The operation conflicts with one already in progress.
    Busy,
    /// The link the operation refers to does not exist.
    NotConnected,
    /// The stack ran out of connection contexts or buffers.
    NoResources,
}

/// The registry is at capacity; discovery is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct RegistryFull;

// Convenience conversions

impl From<RegistryFull> for Error {
    fn from(_: RegistryFull) -> Self {
        Error::RegistryFull
    }
}

impl fmt::Display for RadioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioError::Raw(code) => write!(f, "err {}", code),
            RadioError::Busy => f.write_str("busy"),
            RadioError::NotConnected => f.write_str("not connected"),
            RadioError::NoResources => f.write_str("no resources"),
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::ScanStart(e) => write!(f, "scanning failed to start ({})", e),
            Error::ScanStop(e) => write!(f, "scanning failed to stop ({})", e),
            Error::ConnectionCreate(e) => write!(f, "create connection failed ({})", e),
            Error::ConnectionResult(status) => {
                write!(f, "connection failed (status 0x{:02x})", status)
            }
            Error::Disconnect(e) => write!(f, "disconnect request failed ({})", e),
            Error::RegistryFull => f.write_str("device registry is full"),
        }
    }
}

impl fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("device registry is full")
    }
}
