//! WiFi STA bring-up, the collar's bench transport.
//!
//! The field transport is GPRS; WiFi exists so a collar on the desk can
//! reach the backend without a SIM. Association and DHCP waits are bounded
//! the same way the old bench helper was: a fixed number of polls at a fixed
//! interval, then give up.

use esp_hal::rng::Rng;
use esp_radio::{
    Controller,
    wifi::{ClientConfig, ModeConfig, WifiController, WifiDevice, WifiEvent, WifiStaState},
};

use embassy_executor::Spawner;
use embassy_futures::select::{Either, select};
use embassy_net::{DhcpConfig, Runner, Stack, StackResources};
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use heapless::String;
use log::{info, warn};
use static_cell::StaticCell;

use crate::config;

static RESOURCES: StaticCell<StackResources<4>> = StaticCell::new();
static LINK_STATE: Signal<CriticalSectionRawMutex, bool> = Signal::new();

#[derive(Debug)]
pub enum WifiError {
    /// Not associated within the attempt budget.
    ConnectTimeout,
    /// Associated but no DHCP lease within the attempt budget.
    NoAddress,
}

pub struct Wifi {
    pub stack: Stack<'static>,
}

impl Wifi {
    /// Brings the station up and waits (bounded) for the first association.
    pub async fn connect(
        radio_init: &'static Controller<'static>,
        wifi: esp_hal::peripherals::WIFI<'static>,
        rng: Rng,
        spawner: Spawner,
    ) -> Result<Self, WifiError> {
        let radio_config = esp_radio::wifi::Config::default().with_rx_queue_size(10);
        let (wifi_controller, interfaces) = esp_radio::wifi::new(radio_init, wifi, radio_config)
            .expect("Failed to initialize Wi-Fi controller");

        let sta = interfaces.sta;

        let mut dhcp_config: DhcpConfig = Default::default();
        let hostname: String<32> =
            String::try_from(config::DEVICE_ID).unwrap_or_else(|_| String::new());
        dhcp_config.hostname = Some(hostname);
        let net_config = embassy_net::Config::dhcpv4(dhcp_config);

        let seed = (rng.random() as u64) << 32 | rng.random() as u64;

        let resources = RESOURCES.init(StackResources::new());

        spawner.spawn(connection(wifi_controller)).ok();

        info!("Connecting to '{}'...", config::WIFI_SSID);
        let mut attempts = 0;
        loop {
            let poll = Timer::after(Duration::from_millis(config::WIFI_RETRY_INTERVAL_MS));
            match select(LINK_STATE.wait(), poll).await {
                Either::First(true) => break,
                Either::First(false) | Either::Second(_) => {
                    attempts += 1;
                    if attempts >= config::WIFI_MAX_ATTEMPTS {
                        warn!(
                            "No association after {} attempts, giving up",
                            config::WIFI_MAX_ATTEMPTS
                        );
                        return Err(WifiError::ConnectTimeout);
                    }
                }
            }
        }

        let (stack, runner) = embassy_net::new(sta, net_config, resources, seed);
        spawner.spawn(net_task(runner)).ok();

        Ok(Self { stack })
    }

    /// Waits (bounded) for the DHCP lease and reports the address.
    pub async fn wait_for_ip(&self) -> Result<embassy_net::Ipv4Cidr, WifiError> {
        let mut attempts = 0;
        loop {
            if self.stack.is_link_up() {
                if let Some(net_config) = self.stack.config_v4() {
                    info!("Got IP: {}", net_config.address);
                    return Ok(net_config.address);
                }
            }
            attempts += 1;
            if attempts >= config::WIFI_MAX_ATTEMPTS {
                return Err(WifiError::NoAddress);
            }
            Timer::after(Duration::from_millis(config::WIFI_RETRY_INTERVAL_MS)).await;
        }
    }
}

#[embassy_executor::task]
async fn connection(mut controller: WifiController<'static>) {
    info!("Start connection task");
    loop {
        if esp_radio::wifi::sta_state() == WifiStaState::Connected {
            // wait until we're no longer connected
            controller.wait_for_event(WifiEvent::StaDisconnected).await;
            Timer::after(Duration::from_millis(5000)).await
        }
        if !matches!(controller.is_started(), Ok(true)) {
            let client_config = ModeConfig::Client(
                ClientConfig::default()
                    .with_ssid(config::WIFI_SSID.into())
                    .with_password(config::WIFI_PASSWORD.into()),
            );
            controller.set_config(&client_config).unwrap();
            info!("Starting wifi");
            controller.start_async().await.unwrap();
        }

        match controller.connect_async().await {
            Ok(_) => {
                info!("Wifi connected!");
                LINK_STATE.signal(true);
            }
            Err(e) => {
                warn!("Failed to connect to wifi: {:?}", e);
                LINK_STATE.signal(false);
                Timer::after(Duration::from_millis(5000)).await
            }
        }
    }
}

#[embassy_executor::task]
async fn net_task(mut runner: Runner<'static, WifiDevice<'static>>) {
    runner.run().await
}
