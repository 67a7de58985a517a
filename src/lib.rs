//! proxlink - BLE central discovery core.
//!
//! Scans for advertising peripherals, keeps the connectable ones that are
//! close by and advertise the target Complete Local Name, and proves each
//! is reachable by connecting and immediately disconnecting. Stops once
//! [`config::REGISTRY_CAPACITY`] devices have completed that cycle or the
//! radio runs out of candidates.
//!
//! Everything here is pure logic behind the [`ble::radio::Radio`] trait and
//! can be tested on the host (no embedded hardware required).
//!
//! Usage: `cargo test`, and `cargo test --features log` to run the same
//! suite with diagnostics routed through the `log` facade.
//!
//! Note: The embedded binary uses main.rs with #![no_std] and #![no_main]
//! and is only built with `--features embedded`.

#![cfg_attr(not(test), no_std)]

// Must come first so the other modules see its macros.
mod fmt;

pub mod ble;
pub mod config;
pub mod error;

pub use ble::discovery::{Completion, Discovery, Progress};
pub use error::{Error, RadioError, RegistryFull};

// ═══════════════════════════════════════════════════════════════════════════
// Unit Tests
// ═══════════════════════════════════════════════════════════════════════════
