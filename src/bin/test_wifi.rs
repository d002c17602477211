//! Bench-only WiFi smoke test, no SIM required: associate, get a lease,
//! print exactly one of two verdicts. Safe to delete for production builds.
#![no_std]
#![no_main]

use embassy_executor::Spawner;
use embassy_time::{Duration, Timer};
use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::ram;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::TimerGroup;
use esp_radio::Controller;
use log::{error, info};
use static_cell::StaticCell;

use onichip_collar::config;
use onichip_collar::wifi::Wifi;

esp_bootloader_esp_idf::esp_app_desc!();

static RADIO: StaticCell<Controller<'static>> = StaticCell::new();

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();
    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(#[ram(reclaimed)] size: 72 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    let radio_init = &*RADIO.init(esp_radio::init().expect("Failed to init radio"));

    info!("Connecting to WiFi '{}'...", config::WIFI_SSID);
    let outcome = match Wifi::connect(radio_init, peripherals.WIFI, Rng::new(), spawner).await {
        Ok(wifi) => wifi.wait_for_ip().await,
        Err(e) => Err(e),
    };

    match outcome {
        Ok(address) => info!("WiFi connected. IP: {}", address),
        Err(e) => error!("Could not connect to WiFi: {:?}", e),
    }

    loop {
        Timer::after(Duration::from_secs(60)).await;
    }
}
