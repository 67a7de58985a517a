//! Advertisement pre-filter.
//!
//! Pure predicates, safe to run on every report the radio delivers.

use crate::ble::AdvReport;
use crate::config::MIN_RSSI_DBM;

/// Why a report was turned away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Rejection {
    /// A connection attempt is already in flight.
    SessionBusy,
    /// The advertisement type does not allow a connection request.
    NotConnectable,
    /// Signal weaker than the proximity threshold.
    TooFar,
}

/// Check the rules in order: session idle, connectable type, proximity.
pub fn evaluate(
    report: &AdvReport<'_>,
    session_idle: bool,
    min_rssi: i8,
) -> Result<(), Rejection> {
    if !session_idle {
        return Err(Rejection::SessionBusy);
    }
    if !report.adv_type.is_connectable() {
        return Err(Rejection::NotConnectable);
    }
    if report.rssi < min_rssi {
        return Err(Rejection::TooFar);
    }
    Ok(())
}

/// Accept with the default proximity threshold of [`MIN_RSSI_DBM`].
pub fn accept(report: &AdvReport<'_>, session_idle: bool) -> bool {
    evaluate(report, session_idle, MIN_RSSI_DBM).is_ok()
}
