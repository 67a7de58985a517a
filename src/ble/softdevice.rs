//! [`Radio`] implementation on top of the Nordic SoftDevice S140.
//!
//! The SoftDevice API is `async` (`central::scan`, `central::connect`),
//! while the discovery core expects fire-and-forget requests followed by
//! events. [`SoftdeviceRadio`] therefore only records what the core asked
//! for, and [`run`] carries each request out, awaits the result, and feeds
//! it back to [`Discovery::handle`] as a [`RadioEvent`] on the same task.

use embassy_time::{Duration, Timer};
use nrf_softdevice::ble::{central, Address, AddressType, Connection};
use nrf_softdevice::raw;
use nrf_softdevice::Softdevice;

use crate::ble::discovery::{Completion, Discovery, Progress};
use crate::ble::radio::{ConnParams, Radio, RadioEvent, ScanMode};
use crate::ble::{AddressKind, AdvReport, AdvType, BleAddress, LinkHandle};
use crate::config::{BLE_SCAN_DURATION_SECS, BLE_SCAN_RETRY_MS};
use crate::error::RadioError;

/// Consecutive scan errors (other than the window timing out) tolerated
/// before the scan is reported as complete.
const MAX_SCAN_RETRIES: u8 = 3;

/// HCI "Connection Failed to be Established".
const HCI_CONN_FAILED_TO_BE_ESTABLISHED: u8 = 0x3E;
/// HCI "Connection Limit Exceeded".
const HCI_CONN_LIMIT_EXCEEDED: u8 = 0x09;
/// HCI "Unspecified Error".
const HCI_UNSPECIFIED_ERROR: u8 = 0x1F;

enum Command {
    Connect {
        handle: LinkHandle,
        address: BleAddress,
        params: ConnParams,
    },
    Disconnect {
        handle: LinkHandle,
        reason: u8,
    },
}

/// Request recorder handed to [`Discovery`].
pub struct SoftdeviceRadio {
    scanning: bool,
    mode: ScanMode,
    pending: Option<Command>,
    next_handle: u16,
    /// SoftDevice address of the report being processed. Keeps the exact
    /// random-address subtype, which [`BleAddress`] does not carry.
    current_peer: Option<Address>,
}

impl SoftdeviceRadio {
    pub const fn new() -> Self {
        Self {
            scanning: false,
            mode: ScanMode::Passive,
            pending: None,
            next_handle: 0,
            current_peer: None,
        }
    }

    fn sd_address(&self, address: &BleAddress) -> Address {
        match self.current_peer {
            Some(peer) if peer.bytes() == address.bytes => peer,
            _ => {
                let ty = match address.kind {
                    AddressKind::Public | AddressKind::PublicIdentity => AddressType::Public,
                    _ => AddressType::RandomStatic,
                };
                Address::new(ty, address.bytes)
            }
        }
    }
}

impl Default for SoftdeviceRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl Radio for SoftdeviceRadio {
    fn start_scan(&mut self, mode: ScanMode) -> Result<(), RadioError> {
        if matches!(self.pending, Some(Command::Connect { .. })) {
            return Err(RadioError::Busy);
        }
        self.mode = mode;
        self.scanning = true;
        Ok(())
    }

    fn stop_scan(&mut self) -> Result<(), RadioError> {
        // Takes effect when the scan callback returns.
        self.scanning = false;
        Ok(())
    }

    fn connect(
        &mut self,
        address: &BleAddress,
        params: &ConnParams,
    ) -> Result<LinkHandle, RadioError> {
        if self.pending.is_some() {
            return Err(RadioError::Busy);
        }
        self.next_handle = self.next_handle.wrapping_add(1);
        let handle = LinkHandle(self.next_handle);
        self.pending = Some(Command::Connect {
            handle,
            address: *address,
            params: *params,
        });
        Ok(handle)
    }

    fn disconnect(&mut self, handle: LinkHandle, reason: u8) -> Result<(), RadioError> {
        // Cancelling an attempt that has not been issued yet.
        if let Some(Command::Connect { handle: h, .. }) = self.pending {
            if h == handle {
                self.pending = None;
                return Ok(());
            }
        }
        self.pending = Some(Command::Disconnect { handle, reason });
        Ok(())
    }
}

/// The established link, owned here so the SoftDevice keeps it alive.
struct Link {
    handle: LinkHandle,
    address: BleAddress,
    conn: Connection,
}

/// Drive `discovery` to completion on the SoftDevice.
pub async fn run(sd: &Softdevice, discovery: &mut Discovery<SoftdeviceRadio>) -> Completion {
    let mut link: Option<Link> = None;
    let mut scan_errors: u8 = 0;
    let mut progress = discovery.start();

    loop {
        match progress {
            Progress::Finished(completion) => {
                if let Some(l) = link.take() {
                    let _ = l.conn.disconnect();
                }
                return completion;
            }
            Progress::Stalled => {
                Timer::after(Duration::from_millis(BLE_SCAN_RETRY_MS)).await;
                progress = discovery.resume();
                continue;
            }
            Progress::Scanning | Progress::Connecting => {}
        }

        if let Some(cmd) = discovery.radio_mut().pending.take() {
            progress = execute(sd, cmd, &mut link, discovery).await;
            continue;
        }

        if discovery.radio().scanning {
            progress = match scan_window(sd, discovery).await {
                Ok(p) => {
                    scan_errors = 0;
                    p
                }
                Err(()) if scan_errors < MAX_SCAN_RETRIES => {
                    scan_errors += 1;
                    Timer::after(Duration::from_millis(BLE_SCAN_RETRY_MS)).await;
                    discovery.progress()
                }
                Err(()) => {
                    discovery.radio_mut().scanning = false;
                    discovery.handle(RadioEvent::ScanComplete)
                }
            };
            continue;
        }

        // Live session with no request left to carry out: nothing will
        // ever answer it.
        warn!("Session waiting on an event that cannot arrive");
        progress = discovery.cancel();
    }
}

/// Scan until the core stops the scan or the window closes.
async fn scan_window(
    sd: &Softdevice,
    discovery: &mut Discovery<SoftdeviceRadio>,
) -> Result<Progress, ()> {
    let config = central::ScanConfig {
        active: discovery.radio().mode == ScanMode::Active,
        // 10 ms units.
        timeout: (BLE_SCAN_DURATION_SECS * 100) as u16,
        ..Default::default()
    };

    let result = central::scan(sd, &config, |params| {
        let data: &[u8] = if params.data.len == 0 || params.data.p_data.is_null() {
            &[]
        } else {
            unsafe { core::slice::from_raw_parts(params.data.p_data, params.data.len as usize) }
        };

        let peer = Address::from_raw(params.peer_addr);
        discovery.radio_mut().current_peer = Some(peer);

        let report = AdvReport {
            address: ble_address(&params.peer_addr),
            rssi: params.rssi,
            adv_type: adv_type(&params.type_),
            data,
        };
        let progress = discovery.handle(RadioEvent::Report(report));
        discovery.radio_mut().current_peer = None;

        // Return None to keep scanning, Some(_) to stop.
        if discovery.radio().scanning {
            None
        } else {
            Some(progress)
        }
    })
    .await;

    match result {
        Ok(progress) => Ok(progress),
        Err(central::ScanError::Timeout) => {
            debug!("Scan window closed");
            discovery.radio_mut().scanning = false;
            Ok(discovery.handle(RadioEvent::ScanComplete))
        }
        Err(e) => {
            warn!("BLE scan ended with error: {:?}", e);
            Err(())
        }
    }
}

async fn execute(
    sd: &Softdevice,
    cmd: Command,
    link: &mut Option<Link>,
    discovery: &mut Discovery<SoftdeviceRadio>,
) -> Progress {
    match cmd {
        Command::Connect {
            handle,
            address,
            params,
        } => {
            let peer = discovery.radio().sd_address(&address);
            let whitelist = [&peer];
            let conn_cfg = central::ConnectConfig {
                scan_config: central::ScanConfig {
                    whitelist: Some(&whitelist),
                    ..Default::default()
                },
                conn_params: raw::ble_gap_conn_params_t {
                    min_conn_interval: params.interval_min,
                    max_conn_interval: params.interval_max,
                    slave_latency: params.latency,
                    conn_sup_timeout: params.supervision_timeout,
                },
                ..Default::default()
            };

            let status = match central::connect(sd, &conn_cfg).await {
                Ok(conn) => {
                    *link = Some(Link {
                        handle,
                        address,
                        conn,
                    });
                    0
                }
                Err(central::ConnectError::Timeout) => HCI_CONN_FAILED_TO_BE_ESTABLISHED,
                Err(central::ConnectError::NoFreeConn) => HCI_CONN_LIMIT_EXCEEDED,
                Err(e) => {
                    warn!("connect error: {:?}", e);
                    HCI_UNSPECIFIED_ERROR
                }
            };

            discovery.handle(RadioEvent::Connected {
                handle,
                address,
                status,
            })
        }
        Command::Disconnect { handle, reason } => {
            let l = match link.take() {
                Some(l) if l.handle == handle => l,
                other => {
                    *link = other;
                    debug!("No link for disconnect request");
                    return discovery.progress();
                }
            };
            info!("Disconnecting (reason {:#x})", reason);
            if l.conn.disconnect().is_err() {
                debug!("Link already down");
            }
            // With one connection slot, the next connect needs this link gone.
            let polls = discovery
                .config()
                .conn_params
                .teardown_polls(BLE_SCAN_RETRY_MS as u32);
            wait_link_down(&l.conn, polls).await;
            let address = l.address;
            drop(l);

            discovery.handle(RadioEvent::Disconnected {
                handle,
                address,
                reason,
            })
        }
    }
}

async fn wait_link_down(conn: &Connection, polls: u32) {
    for _ in 0..polls {
        if conn.handle().is_none() {
            return;
        }
        Timer::after(Duration::from_millis(BLE_SCAN_RETRY_MS)).await;
    }
    warn!("Link still up after {} polls", polls);
}

fn ble_address(raw_addr: &raw::ble_gap_addr_t) -> BleAddress {
    let identity = raw_addr.addr_id_peer() != 0;
    let kind = match (raw_addr.addr_type() as u32, identity) {
        (raw::BLE_GAP_ADDR_TYPE_PUBLIC, false) => AddressKind::Public,
        (raw::BLE_GAP_ADDR_TYPE_PUBLIC, true) => AddressKind::PublicIdentity,
        (raw::BLE_GAP_ADDR_TYPE_RANDOM_STATIC, true) => AddressKind::RandomIdentity,
        (
            raw::BLE_GAP_ADDR_TYPE_RANDOM_STATIC
            | raw::BLE_GAP_ADDR_TYPE_RANDOM_PRIVATE_RESOLVABLE
            | raw::BLE_GAP_ADDR_TYPE_RANDOM_PRIVATE_NON_RESOLVABLE,
            _,
        ) => AddressKind::Random,
        (other, _) => AddressKind::Other(other as u8),
    };
    BleAddress::new(kind, raw_addr.addr)
}

fn adv_type(ty: &raw::ble_gap_adv_report_type_t) -> AdvType {
    if ty.extended_pdu() != 0 {
        AdvType::Extended
    } else if ty.scan_response() != 0 {
        AdvType::ScanResponse
    } else if ty.connectable() != 0 && ty.directed() != 0 {
        AdvType::ConnectableDirected
    } else if ty.connectable() != 0 {
        AdvType::ConnectableUndirected
    } else if ty.scannable() != 0 {
        AdvType::ScannableUndirected
    } else {
        AdvType::NonConnectable
    }
}
