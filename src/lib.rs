#![no_std]

extern crate alloc;

pub mod config;
pub mod gps;
pub mod led;
pub mod modem;
pub mod nmea;
pub mod power;
pub mod telemetry;
pub mod vitals;
pub mod wifi;

pub const RX_BUFFER_SIZE: usize = 4096;
pub const TX_BUFFER_SIZE: usize = 4096;

#[unsafe(no_mangle)]
pub fn custom_halt() -> ! {
    esp_hal::system::software_reset();
}

#[unsafe(no_mangle)]
pub extern "Rust" fn _esp_println_timestamp() -> u64 {
    esp_hal::time::Instant::now()
        .duration_since_epoch()
        .as_millis()
}
