//! proxlink firmware entry point.
//!
//! Brings up the nRF52840 and the S140 SoftDevice in Central role, then
//! hands the radio to the discovery loop until it reports completion.

#![no_std]
#![no_main]

use defmt::{info, unwrap};
use embassy_executor::Spawner;
use embassy_nrf::interrupt::Priority;
use nrf_softdevice::{raw, Softdevice};
use proxlink::ble::discovery::Discovery;
use proxlink::ble::softdevice::{self, SoftdeviceRadio};
use proxlink::config::DiscoveryConfig;
use static_cell::StaticCell;
use {defmt_rtt as _, panic_probe as _};

type CentralDiscovery = Discovery<SoftdeviceRadio>;

#[embassy_executor::task]
async fn softdevice_task(sd: &'static Softdevice) -> ! {
    sd.run().await
}

#[embassy_executor::task]
async fn discovery_task(sd: &'static Softdevice, discovery: &'static mut CentralDiscovery) {
    let completion = softdevice::run(sd, discovery).await;
    info!("Discovery finished: {}", completion);

    for (i, record) in discovery.registry().iter().enumerate() {
        info!("  [{}] {}", i, record.address_str());
    }
}

#[embassy_executor::main]
async fn main(spawner: Spawner) {
    info!("proxlink starting");

    // The SoftDevice reserves interrupt priorities 0, 1 and 4.
    let mut nrf_config = embassy_nrf::config::Config::default();
    nrf_config.gpiote_interrupt_priority = Priority::P2;
    nrf_config.time_interrupt_priority = Priority::P2;
    let _p = embassy_nrf::init(nrf_config);

    let sd_config = nrf_softdevice::Config {
        clock: Some(raw::nrf_clock_lf_cfg_t {
            source: raw::NRF_CLOCK_LF_SRC_RC as u8,
            rc_ctiv: 16,
            rc_temp_ctiv: 2,
            accuracy: raw::NRF_CLOCK_LF_ACCURACY_500_PPM as u8,
        }),
        // One link at a time: connect, verify, disconnect.
        conn_gap: Some(raw::ble_gap_conn_cfg_t {
            conn_count: 1,
            event_length: 24,
        }),
        conn_gatt: Some(raw::ble_gatt_conn_cfg_t { att_mtu: 23 }),
        gap_role_count: Some(raw::ble_gap_cfg_role_count_t {
            adv_set_count: 0,
            periph_role_count: 0,
            central_role_count: 1,
            central_sec_count: 0,
            _bitfield_1: raw::ble_gap_cfg_role_count_t::new_bitfield_1(0),
        }),
        ..Default::default()
    };

    let sd = Softdevice::enable(&sd_config);
    unwrap!(spawner.spawn(softdevice_task(sd)));
    info!("Bluetooth initialized");

    static DISCOVERY: StaticCell<CentralDiscovery> = StaticCell::new();
    let discovery = DISCOVERY.init(Discovery::new(
        SoftdeviceRadio::new(),
        DiscoveryConfig::default(),
    ));
    unwrap!(spawner.spawn(discovery_task(sd, discovery)));
}
