#![no_std]
#![no_main]
#![deny(
    clippy::mem_forget,
    reason = "mem::forget is generally not safe to do with esp_hal types, especially those \
    holding buffers for the duration of a data transfer."
)]

use embassy_executor::Spawner;
use embassy_time::{Duration, Instant, Timer};
use esp_alloc as _;
use esp_backtrace as _;
use esp_hal::clock::CpuClock;
use esp_hal::gpio::{Level, Output, OutputConfig};
use esp_hal::ram;
use esp_hal::rng::Rng;
use esp_hal::timer::timg::{MwdtStage, TimerGroup};
use esp_hal::uart::{Config as UartConfig, Uart};
use esp_radio::Controller;

use embassy_net::Stack;
use embassy_sync::{blocking_mutex::raw::NoopRawMutex, mutex::Mutex};
use log::{info, warn};

use onichip_collar::config;
use onichip_collar::gps::{Gps, GpsError};
use onichip_collar::led::{self, LedPattern};
use onichip_collar::modem::Sim800;
use onichip_collar::power::Ip5306;
use onichip_collar::telemetry::{self, Telemetry};
use onichip_collar::vitals::AnalogSensors;
use onichip_collar::wifi::Wifi;
use onichip_collar::{RX_BUFFER_SIZE, TX_BUFFER_SIZE};

use static_cell::StaticCell;

extern crate alloc;

// When you are okay with using a nightly compiler it's better to use https://docs.rs/static_cell/2.1.0/static_cell/macro.make_static.html
macro_rules! mk_static {
    ($t:ty,$val:expr) => {{
        static STATIC_CELL: static_cell::StaticCell<$t> = static_cell::StaticCell::new();
        #[deny(unused_attributes)]
        let x = STATIC_CELL.uninit().write($val);
        x
    }};
}

// This creates a default app-descriptor required by the esp-idf bootloader.
// For more information see: <https://docs.espressif.com/projects/esp-idf/en/stable/esp32/api-reference/system/app_image_format.html#application-description>
esp_bootloader_esp_idf::esp_app_desc!();

static RX_BUF: StaticCell<Mutex<NoopRawMutex, [u8; RX_BUFFER_SIZE]>> = StaticCell::new();
static TX_BUF: StaticCell<Mutex<NoopRawMutex, [u8; TX_BUFFER_SIZE]>> = StaticCell::new();
static SHARED_STACK: StaticCell<Mutex<NoopRawMutex, Stack<'static>>> = StaticCell::new();

#[derive(Clone, Copy, PartialEq)]
enum Transport {
    Gprs,
    Wifi,
}

// GPRS is the field transport; flip to Wifi for bench work without a SIM
const TRANSPORT: Transport = Transport::Gprs;

const PUBLISH_INTERVAL_SECS: u64 = 15;
const PUBLISH_DROUGHT_LIMIT_SECS: u64 = 360;
const RETRY_DELAY_SECS: u64 = 5;

#[esp_rtos::main]
async fn main(spawner: Spawner) -> ! {
    esp_println::logger::init_logger_from_env();
    let hal_config = esp_hal::Config::default().with_cpu_clock(CpuClock::max());
    let peripherals = esp_hal::init(hal_config);

    esp_alloc::heap_allocator!(#[ram(reclaimed)] size: 72 * 1024);

    let timg0 = TimerGroup::new(peripherals.TIMG0);
    esp_rtos::start(timg0.timer0);

    // Arm watchdog timer. The budget has to cover a full cold-start GPS
    // acquisition plus a GPRS attach.
    let mut wdt = timg0.wdt;
    wdt.set_timeout(
        MwdtStage::Stage0,
        esp_hal::time::Duration::from_millis(120_000),
    );
    wdt.enable();
    wdt.feed();

    info!("Collar {} starting", config::DEVICE_ID);

    // LED first so every later failure is visible on the board
    let led_pin = Output::new(peripherals.GPIO13, Level::Low, OutputConfig::default());
    spawner.spawn(led::led_task(led_pin)).ok();

    // Without the boost keep-on bit the IP5306 cuts the 5 V rail once the
    // SIM800 idles below its load threshold
    let mut power = Ip5306::new(peripherals.I2C0, peripherals.GPIO21, peripherals.GPIO22);
    match power.set_boost_keep_on(true) {
        Ok(()) => info!("IP5306 boost keep-on set"),
        Err(e) => warn!("IP5306 not responding: {:?}", e),
    }

    let gps_uart = Uart::new(
        peripherals.UART1,
        UartConfig::default().with_baudrate(config::GPS_BAUD),
    )
    .unwrap()
    .with_tx(peripherals.GPIO32)
    .with_rx(peripherals.GPIO33)
    .into_async();
    let mut gps = Gps::new(gps_uart);
    if let Err(e) = gps.configure().await {
        warn!("GPS setup failed: {:?}", e);
    }

    let mut sensors = AnalogSensors::new(peripherals.ADC1, peripherals.GPIO34, peripherals.GPIO35);

    let modem_uart = Uart::new(
        peripherals.UART2,
        UartConfig::default().with_baudrate(config::MODEM_BAUD),
    )
    .unwrap()
    .with_tx(peripherals.GPIO27)
    .with_rx(peripherals.GPIO26)
    .into_async();
    let pwkey = Output::new(peripherals.GPIO4, Level::High, OutputConfig::default());
    let rst = Output::new(peripherals.GPIO5, Level::High, OutputConfig::default());
    let power_on = Output::new(peripherals.GPIO23, Level::Low, OutputConfig::default());
    let mut modem = Sim800::new(modem_uart, pwkey, rst, power_on);

    wdt.feed();

    let mut telemetry_client = None;
    match TRANSPORT {
        Transport::Gprs => {
            modem.power_up().await.expect("SIM800 did not answer");
            wdt.feed();
            modem.attach().await.expect("GPRS attach failed");
        }
        Transport::Wifi => {
            let radio_init = &*mk_static!(
                Controller<'static>,
                esp_radio::init().expect("Failed to init radio")
            );
            let wifi = Wifi::connect(radio_init, peripherals.WIFI, Rng::new(), spawner)
                .await
                .expect("WiFi association failed");
            wifi.wait_for_ip().await.expect("No DHCP lease");

            let shared_stack = SHARED_STACK.init(Mutex::new(wifi.stack));
            // Sockets cannot share the buffers, so users have to make sure that the socket is
            // closed before releasing the mutex.
            let rx_buf = RX_BUF.init(Mutex::new([0; RX_BUFFER_SIZE]));
            let tx_buf = TX_BUF.init(Mutex::new([0; TX_BUFFER_SIZE]));
            telemetry_client = Some(Telemetry::new(shared_stack, rx_buf, tx_buf));
        }
    }

    wdt.feed();
    led::set_pattern(LedPattern::Ok);

    let mut last_publish = Instant::now();

    loop {
        wdt.feed();
        if last_publish.elapsed() > Duration::from_secs(PUBLISH_DROUGHT_LIMIT_SECS) {
            // Panic and trigger watchdog reload to recover
            panic!("No successful publishes in {PUBLISH_DROUGHT_LIMIT_SECS} seconds!");
        }

        let start_mode = gps.start_mode();
        let fix = match gps.acquire().await {
            Ok(fix) => fix,
            Err(GpsError::FixTimeout) => {
                led::set_pattern(LedPattern::Error);
                continue;
            }
            Err(e) => {
                warn!("GPS failure: {:?}", e);
                led::set_pattern(LedPattern::Error);
                Timer::after(Duration::from_secs(RETRY_DELAY_SECS)).await;
                continue;
            }
        };
        info!(
            "Fix: {:.6}, {:.6} ({} sats, HDOP {}, {:?} start)",
            fix.latitude,
            fix.longitude,
            fix.satellites,
            fix.hdop,
            start_mode
        );

        wdt.feed();
        let vitals = sensors.sample_heart_rate().await;
        let battery = sensors.sample_battery();
        let charging = power.is_charging().unwrap_or(false);
        let payload = telemetry::location_payload(&fix, &vitals, &battery, charging);

        wdt.feed();
        let published = match TRANSPORT {
            Transport::Gprs => {
                let request = telemetry::put_request(
                    &telemetry::device_location_path(),
                    config::API_HOST,
                    &payload,
                );
                modem
                    .http_send(config::API_HOST, config::HTTP_PORT, &request)
                    .await
                    .map_err(|e| warn!("GPRS publish failed: {:?}", e))
            }
            Transport::Wifi => match telemetry_client.as_mut() {
                Some(client) => client
                    .publish(&payload)
                    .await
                    .map_err(|e| warn!("WiFi publish failed: {:?}", e)),
                None => Err(()),
            },
        };

        match published {
            Ok(()) => {
                last_publish = Instant::now();
                led::set_pattern(LedPattern::Ok);
                Timer::after(Duration::from_secs(PUBLISH_INTERVAL_SECS)).await;
            }
            Err(()) => {
                led::set_pattern(LedPattern::Error);
                Timer::after(Duration::from_secs(RETRY_DELAY_SECS)).await;
            }
        }
    }
}
