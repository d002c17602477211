//! Build-time configuration for the collar.
//!
//! Pin numbers document the LilyGO T-Call v1.4 wiring; the matching typed
//! peripherals are handed out in `src/bin/main.rs`. Values come from the
//! board schematic and the NEO-6M/IP5306 datasheets.

// Device identity / backend
pub const DEVICE_ID: &str = "collar-test";
pub const API_BASE: &str = "https://onichip.xyz";
pub const API_HOST: &str = "onichip.xyz";
pub const HTTP_PORT: u16 = 80;

// SIM & GPRS
pub const SIM_PIN: &str = "";
pub const GPRS_APN: &str = "internet.movistar.ec";
pub const GPRS_USER: &str = "";
pub const GPRS_PASS: &str = "";

// SIM800 control (T-Call v1.4)
pub const MODEM_RST_PIN: u8 = 5;
pub const MODEM_PWKEY_PIN: u8 = 4;
pub const MODEM_POWERON_PIN: u8 = 23;
pub const MODEM_TX_PIN: u8 = 27; // ESP32 TX -> SIM800L RX
pub const MODEM_RX_PIN: u8 = 26; // ESP32 RX <- SIM800L TX
pub const MODEM_BAUD: u32 = 115_200;
pub const STATUS_LED_PIN: u8 = 13;

// GPS NEO-6M, on the pins the T-Call leaves free
pub const GPS_TX_PIN: u8 = 33; // ESP32 RX <- GPS TX
pub const GPS_RX_PIN: u8 = 32; // ESP32 TX -> GPS RX
pub const GPS_BAUD: u32 = 9_600;

// IP5306 power IC (I2C)
pub const I2C_SDA_POWER: u8 = 21;
pub const I2C_SCL_POWER: u8 = 22;
pub const IP5306_ADDR: u8 = 0x75;
pub const IP5306_REG_SYS_CTL0: u8 = 0x00;

// Analog inputs, both on ADC1 so they keep working with the radio up
pub const VITALS_PIN: u8 = 34;
pub const BATT_PIN: u8 = 35;

// Status LED timings (ms)
pub const BLINK_ON_MS: u64 = 100;
pub const BLINK_OFF_MS: u64 = 100;
pub const ERROR_PAUSE_MS: u64 = 300;
pub const OK_ON_MS: u64 = 1000;
pub const OK_OFF_MS: u64 = 1000;

// GPS fix-quality policy
pub const GPS_SBAS_ENABLED: bool = true;
pub const GPS_UPDATE_RATE_MS: u32 = 200; // 5 Hz
pub const GPS_MIN_SATELLITES: u8 = 4;
/// Upper bound on acceptable HDOP. Lower is better; the name is the
/// contract name the rest of the project uses.
pub const GPS_MIN_HDOP: f32 = 2.5;

// Preconfigured PMTK sentences, checksummed. `nmea::verify` proves each one
// before it goes out on the wire.
pub const CMD_UPDATE_RATE: &str = "$PMTK220,200*2C";
pub const CMD_NMEA_OUTPUT: &str = "$PMTK314,0,1,0,1,0,0,0,0,0,0,0,0,0,0,0,0,0,0,0*28";
pub const CMD_SBAS_ON: &str = "$PMTK313,1*2E";
pub const CMD_DYNAMIC_MODEL: &str = "$PMTK886,3*2B";
pub const CMD_DATUM_WGS84: &str = "$PMTK330,0*2E";
pub const CMD_ANTENNA_ON: &str = "$PMTK285,0,100*3C";

// Per-start-type fix timeouts
pub const GPS_COLD_START_TIMEOUT_MS: u64 = 30_000;
pub const GPS_WARM_START_TIMEOUT_MS: u64 = 10_000;
pub const GPS_HOT_START_TIMEOUT_MS: u64 = 5_000;

// GPS debug switches
pub const GPS_DEBUG_ENABLED: bool = true;
pub const GPS_RAW_NMEA_ENABLED: bool = false;

// Bench WiFi, used by the `test-wifi` binary and the WiFi transport.
// Throwaway hotspot credentials, not production secrets.
pub const WIFI_SSID: &str = "AndroidAP";
pub const WIFI_PASSWORD: &str = "12345678";
pub const WIFI_MAX_ATTEMPTS: u32 = 20;
pub const WIFI_RETRY_INTERVAL_MS: u64 = 500;

/// Every GPIO the firmware claims, digital and analog. Wiring sanity checks
/// run over this list.
pub const ASSIGNED_PINS: [u8; 12] = [
    MODEM_RST_PIN,
    MODEM_PWKEY_PIN,
    MODEM_POWERON_PIN,
    MODEM_TX_PIN,
    MODEM_RX_PIN,
    STATUS_LED_PIN,
    GPS_TX_PIN,
    GPS_RX_PIN,
    I2C_SDA_POWER,
    I2C_SCL_POWER,
    VITALS_PIN,
    BATT_PIN,
];

/// ADC1 channels live on GPIO32..=39 on the ESP32. ADC2 is unusable while
/// the radio is active, so analog inputs must sit in this range.
pub const fn is_adc1_capable(pin: u8) -> bool {
    pin >= 32 && pin <= 39
}

/// GPIO34..=39 have no output driver.
pub const fn is_input_only(pin: u8) -> bool {
    pin >= 34 && pin <= 39
}

/// True when no two claimed pins collide.
pub fn pins_are_distinct() -> bool {
    let pins = ASSIGNED_PINS;
    let mut i = 0;
    while i < pins.len() {
        let mut j = i + 1;
        while j < pins.len() {
            if pins[i] == pins[j] {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn claimed_pins_do_not_collide() {
        assert!(pins_are_distinct());
    }

    #[test]
    fn analog_inputs_are_adc1_channels() {
        assert!(is_adc1_capable(VITALS_PIN));
        assert!(is_adc1_capable(BATT_PIN));
    }

    #[test]
    fn driven_pins_have_output_drivers() {
        for pin in [
            MODEM_RST_PIN,
            MODEM_PWKEY_PIN,
            MODEM_POWERON_PIN,
            MODEM_TX_PIN,
            STATUS_LED_PIN,
            GPS_RX_PIN,
            I2C_SDA_POWER,
            I2C_SCL_POWER,
        ] {
            assert!(!is_input_only(pin), "GPIO{pin} cannot drive an output");
        }
    }

    #[test]
    fn start_timeouts_are_tiered() {
        assert!(GPS_COLD_START_TIMEOUT_MS > GPS_WARM_START_TIMEOUT_MS);
        assert!(GPS_WARM_START_TIMEOUT_MS > GPS_HOT_START_TIMEOUT_MS);
    }

    #[test]
    fn led_timings_are_positive() {
        for ms in [BLINK_ON_MS, BLINK_OFF_MS, ERROR_PAUSE_MS, OK_ON_MS, OK_OFF_MS] {
            assert!(ms > 0);
        }
    }

    #[test]
    fn fix_policy_values_are_sane() {
        // The NEO-6M tops out at 10 Hz
        assert!(GPS_UPDATE_RATE_MS >= 100);
        assert!(GPS_MIN_HDOP > 0.0);
        assert!(GPS_MIN_SATELLITES >= 3);
    }

    #[test]
    fn identity_is_configured() {
        assert!(!DEVICE_ID.is_empty());
        assert!(!API_BASE.is_empty());
        assert!(API_BASE.ends_with(API_HOST));
        assert_ne!(HTTP_PORT, 0);
    }
}
