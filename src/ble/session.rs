//! Single connection attempt tracker.
//!
//! `Idle → Attempting → Connected → Disconnecting → Idle`. Link events are
//! only honored when both handle and address match the tracked target;
//! anything else is reported as [`Ignored`](ConnectOutcome::Ignored) and
//! leaves the state untouched.

use crate::ble::{BleAddress, LinkHandle};

/// Observable state of a [`Session`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SessionState {
    Idle,
    Attempting,
    Connected,
    Disconnecting,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Idle,
    Attempting { target: BleAddress, attempt: LinkHandle },
    Connected { target: BleAddress, link: LinkHandle },
    Disconnecting { target: BleAddress, link: LinkHandle },
}

/// Result of feeding a connection-result event to the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ConnectOutcome {
    /// Not about the tracked attempt.
    Ignored,
    /// Link is up; the session is now `Connected`.
    Established(LinkHandle),
    /// Attempt failed with this HCI status; the session is `Idle` again.
    Failed { target: BleAddress, status: u8 },
}

/// Result of feeding a disconnect event to the session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TeardownOutcome {
    Ignored,
    /// The tracked link is gone; the session is `Idle` again.
    Released { target: BleAddress, reason: u8 },
}

/// Tracks at most one in-flight connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    phase: Phase,
}

impl Session {
    pub const fn new() -> Self {
        Self { phase: Phase::Idle }
    }

    pub fn state(&self) -> SessionState {
        match self.phase {
            Phase::Idle => SessionState::Idle,
            Phase::Attempting { .. } => SessionState::Attempting,
            Phase::Connected { .. } => SessionState::Connected,
            Phase::Disconnecting { .. } => SessionState::Disconnecting,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Address of the peer being tracked, if any.
    pub fn target(&self) -> Option<BleAddress> {
        match self.phase {
            Phase::Idle => None,
            Phase::Attempting { target, .. }
            | Phase::Connected { target, .. }
            | Phase::Disconnecting { target, .. } => Some(target),
        }
    }

    /// Handle of the established link. `None` until the link is up.
    pub fn link(&self) -> Option<LinkHandle> {
        match self.phase {
            Phase::Connected { link, .. } | Phase::Disconnecting { link, .. } => Some(link),
            _ => None,
        }
    }

    /// `Idle → Attempting`. Fails with the current state if not idle.
    pub fn begin(&mut self, target: BleAddress, attempt: LinkHandle) -> Result<(), SessionState> {
        if !self.is_idle() {
            return Err(self.state());
        }
        self.phase = Phase::Attempting { target, attempt };
        Ok(())
    }

    pub fn on_connected(
        &mut self,
        handle: LinkHandle,
        address: &BleAddress,
        status: u8,
    ) -> ConnectOutcome {
        let Phase::Attempting { target, attempt } = self.phase else {
            return ConnectOutcome::Ignored;
        };
        if attempt != handle || target != *address {
            return ConnectOutcome::Ignored;
        }

        if status != 0 {
            self.phase = Phase::Idle;
            return ConnectOutcome::Failed { target, status };
        }

        self.phase = Phase::Connected { target, link: handle };
        ConnectOutcome::Established(handle)
    }

    /// `Connected → Disconnecting`. Returns the link to tear down.
    pub fn begin_teardown(&mut self) -> Option<LinkHandle> {
        let Phase::Connected { target, link } = self.phase else {
            return None;
        };
        self.phase = Phase::Disconnecting { target, link };
        Some(link)
    }

    /// Link-down event. Accepted in `Connected` too, since the peer may
    /// drop the link before our own teardown request goes out.
    pub fn on_disconnected(
        &mut self,
        handle: LinkHandle,
        address: &BleAddress,
        reason: u8,
    ) -> TeardownOutcome {
        let (target, link) = match self.phase {
            Phase::Connected { target, link } | Phase::Disconnecting { target, link } => {
                (target, link)
            }
            _ => return TeardownOutcome::Ignored,
        };
        if link != handle || target != *address {
            return TeardownOutcome::Ignored;
        }

        self.phase = Phase::Idle;
        TeardownOutcome::Released { target, reason }
    }

    /// Drop whatever is tracked and go back to `Idle`.
    ///
    /// Returns the handle that still needs an explicit teardown: the
    /// pending attempt or the live link.
    pub fn abort(&mut self) -> Option<LinkHandle> {
        let handle = match self.phase {
            Phase::Idle => None,
            Phase::Attempting { attempt, .. } => Some(attempt),
            Phase::Connected { link, .. } | Phase::Disconnecting { link, .. } => Some(link),
        };
        self.phase = Phase::Idle;
        handle
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::AddressKind;

    const PEER: BleAddress = BleAddress::new(AddressKind::Random, [1, 2, 3, 4, 5, 6]);
    const OTHER: BleAddress = BleAddress::new(AddressKind::Public, [9, 9, 9, 9, 9, 9]);
    const H: LinkHandle = LinkHandle(7);

    #[test]
    fn starts_idle_without_link() {
        let s = Session::new();
        assert_eq!(s.state(), SessionState::Idle);
        assert_eq!(s.target(), None);
        assert_eq!(s.link(), None);
    }

    #[test]
    fn full_cycle() {
        let mut s = Session::new();
        s.begin(PEER, H).unwrap();
        assert_eq!(s.state(), SessionState::Attempting);
        assert_eq!(s.link(), None);

        assert_eq!(s.on_connected(H, &PEER, 0), ConnectOutcome::Established(H));
        assert_eq!(s.state(), SessionState::Connected);
        assert_eq!(s.link(), Some(H));

        assert_eq!(s.begin_teardown(), Some(H));
        assert_eq!(s.state(), SessionState::Disconnecting);

        assert_eq!(
            s.on_disconnected(H, &PEER, 0x16),
            TeardownOutcome::Released { target: PEER, reason: 0x16 }
        );
        assert!(s.is_idle());
        assert_eq!(s.link(), None);
    }

    #[test]
    fn failed_attempt_returns_to_idle() {
        let mut s = Session::new();
        s.begin(PEER, H).unwrap();
        assert_eq!(
            s.on_connected(H, &PEER, 0x3E),
            ConnectOutcome::Failed { target: PEER, status: 0x3E }
        );
        assert!(s.is_idle());
    }

    #[test]
    fn begin_refused_while_live() {
        let mut s = Session::new();
        s.begin(PEER, H).unwrap();
        assert_eq!(s.begin(OTHER, LinkHandle(8)), Err(SessionState::Attempting));
        assert_eq!(s.target(), Some(PEER));
    }

    #[test]
    fn stray_connect_events_are_ignored() {
        let mut s = Session::new();
        assert_eq!(s.on_connected(H, &PEER, 0), ConnectOutcome::Ignored);

        s.begin(PEER, H).unwrap();
        assert_eq!(s.on_connected(H, &OTHER, 0), ConnectOutcome::Ignored);
        assert_eq!(s.on_connected(LinkHandle(8), &PEER, 0), ConnectOutcome::Ignored);
        assert_eq!(s.on_connected(LinkHandle(8), &PEER, 0x3E), ConnectOutcome::Ignored);
        assert_eq!(s.state(), SessionState::Attempting);
    }

    #[test]
    fn stray_disconnect_events_are_ignored() {
        let mut s = Session::new();
        assert_eq!(s.on_disconnected(H, &PEER, 0x13), TeardownOutcome::Ignored);

        s.begin(PEER, H).unwrap();
        // No link yet.
        assert_eq!(s.on_disconnected(H, &PEER, 0x13), TeardownOutcome::Ignored);

        s.on_connected(H, &PEER, 0);
        s.begin_teardown();
        assert_eq!(s.on_disconnected(H, &OTHER, 0x13), TeardownOutcome::Ignored);
        assert_eq!(s.on_disconnected(LinkHandle(1), &PEER, 0x13), TeardownOutcome::Ignored);
        assert_eq!(s.state(), SessionState::Disconnecting);
    }

    #[test]
    fn peer_may_drop_link_before_teardown() {
        let mut s = Session::new();
        s.begin(PEER, H).unwrap();
        s.on_connected(H, &PEER, 0);
        assert!(matches!(
            s.on_disconnected(H, &PEER, 0x08),
            TeardownOutcome::Released { .. }
        ));
        assert!(s.is_idle());
    }

    #[test]
    fn teardown_only_from_connected() {
        let mut s = Session::new();
        assert_eq!(s.begin_teardown(), None);
        s.begin(PEER, H).unwrap();
        assert_eq!(s.begin_teardown(), None);
        assert_eq!(s.state(), SessionState::Attempting);
    }

    #[test]
    fn abort_reports_handle_to_release() {
        let mut s = Session::new();
        assert_eq!(s.abort(), None);

        s.begin(PEER, H).unwrap();
        assert_eq!(s.abort(), Some(H));
        assert!(s.is_idle());

        s.begin(PEER, H).unwrap();
        s.on_connected(H, &PEER, 0);
        assert_eq!(s.abort(), Some(H));
        assert!(s.is_idle());
    }
}
