//! Discovery loop - drives scan → filter → parse → connect → disconnect
//! cycles until the registry is full or no candidates are left.
//!
//! The loop never blocks and never recurses. [`Discovery::start`] arms the
//! first scan; after that every step happens inside [`Discovery::handle`]
//! as link-layer events come in. When a cycle ends (teardown confirmed, or
//! a failed attempt) the same handler re-enters the loop by arming the
//! next scan, after checking capacity and the cycle bound.
//!
//! `Discovery` owns the only [`Session`] and the [`Registry`]; `&mut self`
//! is the single point of mutation.

use crate::ble::adv_parser::{self, NameMatch};
use crate::ble::filter::{self, Rejection};
use crate::ble::radio::{Radio, RadioEvent};
use crate::ble::registry::Registry;
use crate::ble::session::{ConnectOutcome, Session, TeardownOutcome};
use crate::ble::{AdvReport, BleAddress};
use crate::config::DiscoveryConfig;
use crate::error::Error;

/// Why discovery stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Completion {
    /// Every registry slot holds a verified device.
    RegistryFull,
    /// The radio reported no further qualifying candidates.
    Exhausted,
    /// [`Discovery::cancel`] was called.
    Cancelled,
    /// `max_cycles` scan starts were used up.
    CycleLimit,
}

/// Where the loop stands after a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Progress {
    /// Scan running, waiting for reports.
    Scanning,
    /// A session is live; waiting for link events.
    Connecting,
    /// Scanning failed to start. Call [`Discovery::resume`] to retry.
    Stalled,
    Finished(Completion),
}

pub struct Discovery<R: Radio> {
    radio: R,
    config: DiscoveryConfig,
    session: Session,
    registry: Registry,
    scanning: bool,
    /// Scan starts attempted so far.
    cycles: u16,
    /// Non-qualifying reports seen in the current scan cycle.
    rejections: u32,
    finished: Option<Completion>,
    last_error: Option<Error>,
}

impl<R: Radio> Discovery<R> {
    pub fn new(radio: R, config: DiscoveryConfig) -> Self {
        Self {
            radio,
            config,
            session: Session::new(),
            registry: Registry::new(),
            scanning: false,
            cycles: 0,
            rejections: 0,
            finished: None,
            last_error: None,
        }
    }

    /// Begin discovery by arming the first scan.
    pub fn start(&mut self) -> Progress {
        if self.finished.is_some() || self.scanning || !self.session.is_idle() {
            return self.progress();
        }
        self.next_cycle()
    }

    /// Retry after [`Progress::Stalled`]. Does nothing in any other state.
    pub fn resume(&mut self) -> Progress {
        self.start()
    }

    /// Feed one link-layer event.
    pub fn handle(&mut self, event: RadioEvent<'_>) -> Progress {
        if self.finished.is_some() {
            return self.progress();
        }

        match event {
            RadioEvent::Report(report) => self.on_report(&report),
            RadioEvent::ScanComplete => self.on_scan_complete(),
            RadioEvent::Connected {
                handle,
                address,
                status,
            } => match self.session.on_connected(handle, &address, status) {
                ConnectOutcome::Ignored => {
                    debug!("Ignoring connection event for another link");
                    self.progress()
                }
                ConnectOutcome::Established(_) => self.on_established(),
                ConnectOutcome::Failed { target, status } => {
                    let addr = target.to_str();
                    warn!("Failed to connect to {} ({})", addr.as_str(), status);
                    self.last_error = Some(Error::ConnectionResult(status));
                    self.next_cycle()
                }
            },
            RadioEvent::Disconnected {
                handle,
                address,
                reason,
            } => match self.session.on_disconnected(handle, &address, reason) {
                TeardownOutcome::Ignored => {
                    debug!("Ignoring disconnect event for another link");
                    self.progress()
                }
                TeardownOutcome::Released { target, reason } => {
                    let addr = target.to_str();
                    info!("Disconnected: {} (reason {:#x})", addr.as_str(), reason);
                    self.complete_cycle(&target)
                }
            },
        }
    }

    /// Stop discovering. Scanning is stopped and a live link or pending
    /// attempt is torn down; failures there are logged and ignored.
    pub fn cancel(&mut self) -> Progress {
        if self.finished.is_some() {
            return self.progress();
        }
        if self.scanning {
            if let Err(e) = self.radio.stop_scan() {
                warn!("Stopping scan failed ({})", e);
            }
            self.scanning = false;
        }
        if let Some(handle) = self.session.abort() {
            if let Err(e) = self.radio.disconnect(handle, self.config.disconnect_reason) {
                warn!("Teardown on cancel failed ({})", e);
            }
        }
        self.finish(Completion::Cancelled)
    }

    pub fn progress(&self) -> Progress {
        if let Some(c) = self.finished {
            Progress::Finished(c)
        } else if !self.session.is_idle() {
            Progress::Connecting
        } else if self.scanning {
            Progress::Scanning
        } else {
            Progress::Stalled
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub fn radio(&self) -> &R {
        &self.radio
    }

    pub fn radio_mut(&mut self) -> &mut R {
        &mut self.radio
    }

    /// Most recent non-fatal failure, if any.
    pub fn last_error(&self) -> Option<Error> {
        self.last_error
    }

    pub fn cycles(&self) -> u16 {
        self.cycles
    }

    pub fn is_scanning(&self) -> bool {
        self.scanning
    }

    // Loop steps

    /// Loop entry: capacity and bound checks, then arm a scan.
    fn next_cycle(&mut self) -> Progress {
        if self.registry.is_full() {
            return self.finish(Completion::RegistryFull);
        }
        if self.config.max_cycles != 0 && self.cycles >= self.config.max_cycles {
            return self.finish(Completion::CycleLimit);
        }

        self.cycles = self.cycles.saturating_add(1);
        self.rejections = 0;
        match self.radio.start_scan(self.config.scan_mode) {
            Ok(()) => {
                self.scanning = true;
                info!("Scanning successfully started");
                Progress::Scanning
            }
            Err(e) => {
                error!("Scanning failed to start ({})", e);
                self.last_error = Some(Error::ScanStart(e));
                Progress::Stalled
            }
        }
    }

    fn on_report(&mut self, report: &AdvReport<'_>) -> Progress {
        match filter::evaluate(report, self.session.is_idle(), self.config.min_rssi) {
            Ok(()) => {}
            // Not a rejection of the candidate, just bad timing.
            Err(Rejection::SessionBusy) => return self.progress(),
            Err(reason) => {
                trace!("Report rejected: {:?}", reason);
                return self.note_rejection();
            }
        }

        let addr = report.address.to_str();
        info!("Device found: {} (RSSI {})", addr.as_str(), report.rssi);

        if self.registry.contains(&report.address) {
            debug!("{} already registered", addr.as_str());
            return self.note_rejection();
        }

        match adv_parser::match_complete_name(report.data, self.config.target_name) {
            NameMatch::Accept => {
                let name = adv_parser::extract_device_name(report.data);
                self.attempt(report.address, name.as_str())
            }
            NameMatch::Reject => self.note_rejection(),
        }
    }

    /// `Idle → Attempting`, guarded by a successful scan stop.
    fn attempt(&mut self, address: BleAddress, name: &str) -> Progress {
        let addr = address.to_str();

        if let Err(e) = self.radio.stop_scan() {
            warn!("Scan stop failed ({}), not connecting to {}", e, name);
            self.last_error = Some(Error::ScanStop(e));
            return self.progress();
        }
        self.scanning = false;

        match self.radio.connect(&address, &self.config.conn_params) {
            Ok(handle) => {
                debug!("Connecting to {} at {}", name, addr.as_str());
                if let Err(state) = self.session.begin(address, handle) {
                    // Unreachable while the filter gates on an idle session.
                    warn!("Session already {:?}", state);
                }
                self.progress()
            }
            Err(e) => {
                warn!("Create conn to {} failed ({})", name, e);
                self.last_error = Some(Error::ConnectionCreate(e));
                self.next_cycle()
            }
        }
    }

    /// `Connected → Disconnecting`: reachability is proven, hang up.
    fn on_established(&mut self) -> Progress {
        let Some(target) = self.session.target() else {
            return self.progress();
        };
        let addr = target.to_str();
        info!("Connected: {}", addr.as_str());

        let Some(link) = self.session.begin_teardown() else {
            return self.progress();
        };
        match self.radio.disconnect(link, self.config.disconnect_reason) {
            Ok(()) => self.progress(),
            Err(e) => {
                // The link was verified; count it and move on.
                warn!("Disconnect of {} failed ({})", addr.as_str(), e);
                self.last_error = Some(Error::Disconnect(e));
                self.session.abort();
                self.complete_cycle(&target)
            }
        }
    }

    fn on_scan_complete(&mut self) -> Progress {
        if !self.scanning || !self.session.is_idle() {
            return self.progress();
        }
        self.scanning = false;
        self.finish(Completion::Exhausted)
    }

    fn complete_cycle(&mut self, target: &BleAddress) -> Progress {
        if let Err(e) = self.registry.record(target) {
            warn!("Not recording device: {}", e);
            return self.finish(Completion::RegistryFull);
        }
        info!(
            "Registered device {} of {}",
            self.registry.len(),
            crate::config::REGISTRY_CAPACITY
        );
        self.next_cycle()
    }

    fn note_rejection(&mut self) -> Progress {
        self.rejections = self.rejections.saturating_add(1);
        let limit = self.config.max_rejections_per_cycle;
        if limit == 0 || self.rejections < limit || !self.scanning {
            return self.progress();
        }

        info!("No qualifying device in {} reports", self.rejections);
        if let Err(e) = self.radio.stop_scan() {
            warn!("Stopping scan failed ({})", e);
        }
        self.scanning = false;
        self.finish(Completion::Exhausted)
    }

    fn finish(&mut self, completion: Completion) -> Progress {
        self.finished = Some(completion);
        match completion {
            Completion::RegistryFull | Completion::Exhausted => {
                info!(
                    "all compatible devices have been added ({} registered)",
                    self.registry.len()
                );
            }
            Completion::Cancelled => info!("Discovery cancelled"),
            Completion::CycleLimit => {
                warn!("Discovery stopped after {} scan cycles", self.cycles);
            }
        }
        Progress::Finished(completion)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ble::radio::{ConnParams, ScanMode};
    use crate::ble::session::SessionState;
    use crate::ble::{AddressKind, AdvType, LinkHandle};
    use crate::error::RadioError;
    use std::vec::Vec;

    #[derive(Debug, PartialEq)]
    enum Call {
        StartScan,
        StopScan,
        Connect(BleAddress),
        Disconnect(LinkHandle, u8),
    }

    #[derive(Default)]
    struct MockRadio {
        calls: Vec<Call>,
        fail_start: bool,
        fail_stop: bool,
        fail_connect: bool,
        fail_disconnect: bool,
        next_handle: u16,
    }

    impl MockRadio {
        fn count(&self, f: impl Fn(&Call) -> bool) -> usize {
            self.calls.iter().filter(|c| f(c)).count()
        }

        fn scan_starts(&self) -> usize {
            self.count(|c| *c == Call::StartScan)
        }

        fn connects(&self) -> usize {
            self.count(|c| matches!(c, Call::Connect(_)))
        }
    }

    impl Radio for MockRadio {
        fn start_scan(&mut self, _mode: ScanMode) -> Result<(), RadioError> {
            self.calls.push(Call::StartScan);
            if self.fail_start {
                Err(RadioError::Raw(-5))
            } else {
                Ok(())
            }
        }

        fn stop_scan(&mut self) -> Result<(), RadioError> {
            self.calls.push(Call::StopScan);
            if self.fail_stop {
                Err(RadioError::Raw(-11))
            } else {
                Ok(())
            }
        }

        fn connect(
            &mut self,
            address: &BleAddress,
            _params: &ConnParams,
        ) -> Result<LinkHandle, RadioError> {
            self.calls.push(Call::Connect(*address));
            if self.fail_connect {
                return Err(RadioError::NoResources);
            }
            self.next_handle += 1;
            Ok(LinkHandle(self.next_handle))
        }

        fn disconnect(&mut self, handle: LinkHandle, reason: u8) -> Result<(), RadioError> {
            self.calls.push(Call::Disconnect(handle, reason));
            if self.fail_disconnect {
                Err(RadioError::NotConnected)
            } else {
                Ok(())
            }
        }
    }

    const DXC_AD: [u8; 8] = [0x02, 0x01, 0x06, 0x04, 0x09, b'D', b'X', b'C'];
    const OTHER_AD: [u8; 5] = [0x04, 0x09, b'A', b'B', b'C'];

    fn addr(n: u8) -> BleAddress {
        BleAddress::new(AddressKind::Random, [n, 0x22, 0x33, 0x44, 0x55, 0xC0])
    }

    fn report(address: BleAddress, adv_type: AdvType, rssi: i8, data: &[u8]) -> RadioEvent<'_> {
        RadioEvent::Report(AdvReport {
            address,
            rssi,
            adv_type,
            data,
        })
    }

    fn dxc(n: u8) -> RadioEvent<'static> {
        report(addr(n), AdvType::ConnectableUndirected, -40, &DXC_AD)
    }

    fn started(radio: MockRadio) -> Discovery<MockRadio> {
        let mut d = Discovery::new(radio, DiscoveryConfig::default());
        assert_eq!(d.start(), Progress::Scanning);
        d
    }

    /// Run one device through connect and teardown.
    fn cycle(d: &mut Discovery<MockRadio>, n: u8) -> Progress {
        assert_eq!(d.handle(dxc(n)), Progress::Connecting);
        let handle = LinkHandle(d.radio().next_handle);
        assert_eq!(
            d.handle(RadioEvent::Connected {
                handle,
                address: addr(n),
                status: 0
            }),
            Progress::Connecting
        );
        assert_eq!(d.session().state(), SessionState::Disconnecting);
        d.handle(RadioEvent::Disconnected {
            handle,
            address: addr(n),
            reason: 0x16,
        })
    }

    #[test]
    fn single_device_cycle() {
        let mut d = started(MockRadio::default());
        assert_eq!(cycle(&mut d, 1), Progress::Scanning);
        assert_eq!(d.registry().len(), 1);
        assert!(d.session().is_idle());
        assert_eq!(
            d.radio().calls,
            [
                Call::StartScan,
                Call::StopScan,
                Call::Connect(addr(1)),
                Call::Disconnect(LinkHandle(1), 0x13),
                Call::StartScan,
            ]
        );
    }

    #[test]
    fn non_connectable_report_changes_nothing() {
        let mut d = started(MockRadio::default());
        let p = d.handle(report(addr(1), AdvType::NonConnectable, -30, &DXC_AD));
        assert_eq!(p, Progress::Scanning);
        assert!(d.session().is_idle());
        assert!(d.registry().is_empty());
        assert_eq!(d.radio().calls, [Call::StartScan]);
    }

    #[test]
    fn far_or_unnamed_devices_are_skipped() {
        let mut d = started(MockRadio::default());
        d.handle(report(addr(1), AdvType::ConnectableUndirected, -51, &DXC_AD));
        d.handle(report(addr(2), AdvType::ConnectableUndirected, -20, &OTHER_AD));
        d.handle(report(addr(3), AdvType::ConnectableUndirected, -20, &[]));
        assert_eq!(d.radio().connects(), 0);
    }

    #[test]
    fn stops_after_three_devices_without_fourth_scan() {
        let mut d = started(MockRadio::default());
        assert_eq!(cycle(&mut d, 1), Progress::Scanning);
        assert_eq!(cycle(&mut d, 2), Progress::Scanning);
        assert_eq!(
            cycle(&mut d, 3),
            Progress::Finished(Completion::RegistryFull)
        );
        assert_eq!(d.registry().len(), 3);
        assert_eq!(d.radio().scan_starts(), 3);

        // Late reports are ignored once finished.
        assert_eq!(
            d.handle(dxc(4)),
            Progress::Finished(Completion::RegistryFull)
        );
        assert_eq!(d.radio().connects(), 3);
    }

    #[test]
    fn scan_stop_failure_keeps_session_idle() {
        let mut d = started(MockRadio {
            fail_stop: true,
            ..Default::default()
        });
        assert_eq!(d.handle(dxc(1)), Progress::Scanning);
        assert!(d.session().is_idle());
        assert_eq!(d.radio().connects(), 0);
        assert_eq!(d.last_error(), Some(Error::ScanStop(RadioError::Raw(-11))));
    }

    #[test]
    fn reports_ignored_while_attempting() {
        let mut d = started(MockRadio::default());
        d.handle(dxc(1));
        assert_eq!(d.handle(dxc(2)), Progress::Connecting);
        assert_eq!(d.radio().connects(), 1);
        assert_eq!(d.session().target(), Some(addr(1)));
    }

    #[test]
    fn connection_error_rearms_scanning() {
        let mut d = started(MockRadio::default());
        d.handle(dxc(1));
        let p = d.handle(RadioEvent::Connected {
            handle: LinkHandle(1),
            address: addr(1),
            status: 0x3E,
        });
        assert_eq!(p, Progress::Scanning);
        assert!(d.session().is_idle());
        assert!(d.registry().is_empty());
        assert_eq!(d.radio().scan_starts(), 2);
        assert_eq!(d.last_error(), Some(Error::ConnectionResult(0x3E)));
    }

    #[test]
    fn connect_create_failure_rearms_scanning() {
        let mut d = started(MockRadio {
            fail_connect: true,
            ..Default::default()
        });
        assert_eq!(d.handle(dxc(1)), Progress::Scanning);
        assert!(d.session().is_idle());
        assert_eq!(d.radio().scan_starts(), 2);
        assert_eq!(
            d.last_error(),
            Some(Error::ConnectionCreate(RadioError::NoResources))
        );
    }

    #[test]
    fn stray_link_events_do_not_mutate_state() {
        let mut d = started(MockRadio::default());
        d.handle(dxc(1));
        let before = d.radio().calls.len();

        d.handle(RadioEvent::Connected {
            handle: LinkHandle(1),
            address: addr(9),
            status: 0,
        });
        d.handle(RadioEvent::Disconnected {
            handle: LinkHandle(1),
            address: addr(1),
            reason: 0x13,
        });
        assert_eq!(d.session().state(), SessionState::Attempting);
        assert_eq!(d.radio().calls.len(), before);
    }

    #[test]
    fn teardown_rearms_scanning_exactly_once() {
        let mut d = started(MockRadio::default());
        cycle(&mut d, 1);
        assert_eq!(d.radio().scan_starts(), 2);

        // A repeated disconnect for the same link is stray now.
        d.handle(RadioEvent::Disconnected {
            handle: LinkHandle(1),
            address: addr(1),
            reason: 0x16,
        });
        assert_eq!(d.radio().scan_starts(), 2);
    }

    #[test]
    fn registered_device_is_not_reconnected() {
        let mut d = started(MockRadio::default());
        cycle(&mut d, 1);
        assert_eq!(d.handle(dxc(1)), Progress::Scanning);
        assert_eq!(d.radio().connects(), 1);
    }

    #[test]
    fn scan_complete_ends_discovery() {
        let mut d = started(MockRadio::default());
        cycle(&mut d, 1);
        assert_eq!(
            d.handle(RadioEvent::ScanComplete),
            Progress::Finished(Completion::Exhausted)
        );
        assert_eq!(d.registry().len(), 1);
    }

    #[test]
    fn scan_complete_while_connecting_is_ignored() {
        let mut d = started(MockRadio::default());
        d.handle(dxc(1));
        assert_eq!(d.handle(RadioEvent::ScanComplete), Progress::Connecting);
    }

    #[test]
    fn scan_start_failure_stalls_until_resumed() {
        let mut d = Discovery::new(
            MockRadio {
                fail_start: true,
                ..Default::default()
            },
            DiscoveryConfig::default(),
        );
        assert_eq!(d.start(), Progress::Stalled);
        assert_eq!(d.last_error(), Some(Error::ScanStart(RadioError::Raw(-5))));

        d.radio_mut().fail_start = false;
        assert_eq!(d.resume(), Progress::Scanning);
        assert_eq!(d.radio().scan_starts(), 2);
    }

    #[test]
    fn cycle_limit_bounds_the_loop() {
        let config = DiscoveryConfig {
            max_cycles: 2,
            ..Default::default()
        };
        let mut d = Discovery::new(
            MockRadio {
                fail_connect: true,
                ..Default::default()
            },
            config,
        );
        d.start();
        assert_eq!(d.handle(dxc(1)), Progress::Scanning);
        assert_eq!(d.handle(dxc(1)), Progress::Finished(Completion::CycleLimit));
        assert_eq!(d.radio().scan_starts(), 2);
        assert_eq!(d.cycles(), 2);
    }

    #[test]
    fn unbounded_cycle_count_saturates() {
        let config = DiscoveryConfig {
            max_cycles: 0,
            ..Default::default()
        };
        let mut d = Discovery::new(
            MockRadio {
                fail_connect: true,
                ..Default::default()
            },
            config,
        );
        d.start();
        for _ in 0..70_000u32 {
            assert_eq!(d.handle(dxc(1)), Progress::Scanning);
        }
        assert_eq!(d.cycles(), u16::MAX);
        assert!(d.session().is_idle());
    }

    #[test]
    fn endless_incompatible_reports_end_discovery() {
        let config = DiscoveryConfig {
            max_rejections_per_cycle: 3,
            ..Default::default()
        };
        let mut d = Discovery::new(MockRadio::default(), config);
        d.start();
        let noise = report(addr(1), AdvType::NonConnectable, -30, &[]);
        assert_eq!(d.handle(noise), Progress::Scanning);
        assert_eq!(d.handle(noise), Progress::Scanning);
        assert_eq!(d.handle(noise), Progress::Finished(Completion::Exhausted));
        assert_eq!(d.radio().calls.last(), Some(&Call::StopScan));
    }

    #[test]
    fn rejection_count_resets_each_cycle() {
        let config = DiscoveryConfig {
            max_rejections_per_cycle: 2,
            ..Default::default()
        };
        let mut d = Discovery::new(MockRadio::default(), config);
        d.start();
        let noise = report(addr(9), AdvType::NonConnectable, -30, &[]);
        d.handle(noise);
        cycle(&mut d, 1);
        assert_eq!(d.handle(noise), Progress::Scanning);
    }

    #[test]
    fn cancel_tears_down_live_link() {
        let mut d = started(MockRadio::default());
        d.handle(dxc(1));
        d.handle(RadioEvent::Connected {
            handle: LinkHandle(1),
            address: addr(1),
            status: 0,
        });
        assert_eq!(d.cancel(), Progress::Finished(Completion::Cancelled));
        assert!(d.session().is_idle());
        assert_eq!(
            d.radio().calls.last(),
            Some(&Call::Disconnect(LinkHandle(1), 0x13))
        );
    }

    #[test]
    fn cancel_while_scanning_stops_scan() {
        let mut d = started(MockRadio::default());
        assert_eq!(d.cancel(), Progress::Finished(Completion::Cancelled));
        assert!(!d.is_scanning());
        assert_eq!(d.radio().calls, [Call::StartScan, Call::StopScan]);
    }

    #[test]
    fn disconnect_request_failure_still_counts_device() {
        let mut d = started(MockRadio {
            fail_disconnect: true,
            ..Default::default()
        });
        d.handle(dxc(1));
        let p = d.handle(RadioEvent::Connected {
            handle: LinkHandle(1),
            address: addr(1),
            status: 0,
        });
        assert_eq!(p, Progress::Scanning);
        assert_eq!(d.registry().len(), 1);
        assert!(d.session().is_idle());
        assert_eq!(
            d.last_error(),
            Some(Error::Disconnect(RadioError::NotConnected))
        );
    }

    #[test]
    fn start_is_idempotent() {
        let mut d = started(MockRadio::default());
        assert_eq!(d.start(), Progress::Scanning);
        assert_eq!(d.radio().scan_starts(), 1);
    }
}
