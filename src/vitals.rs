//! Analog sampling: pulse sensor and battery divider, both on ADC1 so they
//! stay usable while the radio owns ADC2.

use embassy_time::{Duration, Timer};
use esp_hal::Blocking;
use esp_hal::analog::adc::{Adc, AdcConfig, AdcPin, Attenuation};
use esp_hal::peripherals::{ADC1, GPIO34, GPIO35};

/// Pulse window: 200 samples at 5 ms, one second of signal.
const HR_WINDOW_SAMPLES: usize = 200;
const HR_SAMPLE_INTERVAL_MS: u64 = 5;
/// Peak-to-peak counts below this are treated as a detached sensor.
const HR_MIN_SWING: u16 = 120;

/// 11 dB attenuation puts full scale near 3.3 V at the pin.
const ADC_FULL_SCALE_MV: u32 = 3300;
const ADC_MAX_COUNT: u32 = 4095;
/// The battery feeds the pin through a 2:1 divider.
const BATT_DIVIDER: u32 = 2;
const BATT_EMPTY_MV: u32 = 3000;
const BATT_FULL_MV: u32 = 4200;
/// Nominal runtime on a full charge, for the backend's estimate field.
const BATT_FULL_RUNTIME_HOURS: f32 = 24.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VitalsReport {
    pub heart_rate_bpm: u16,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryReport {
    pub millivolts: u32,
    /// 0..=100
    pub level: u8,
    pub estimated_hours: f32,
}

/// Threshold-crossing beat counter over one sampling window.
pub fn estimate_bpm(samples: &[u16], interval_ms: u64) -> u16 {
    if samples.len() < 2 {
        return 0;
    }
    let min = samples.iter().copied().min().unwrap_or(0);
    let max = samples.iter().copied().max().unwrap_or(0);
    if max - min < HR_MIN_SWING {
        return 0;
    }
    let threshold = min + (max - min) / 2;
    let mut beats: u64 = 0;
    for pair in samples.windows(2) {
        if pair[0] < threshold && pair[1] >= threshold {
            beats += 1;
        }
    }
    let window_ms = samples.len() as u64 * interval_ms;
    (beats * 60_000 / window_ms) as u16
}

pub fn battery_millivolts(raw: u16) -> u32 {
    raw as u32 * ADC_FULL_SCALE_MV / ADC_MAX_COUNT * BATT_DIVIDER
}

pub fn battery_percent(millivolts: u32) -> u8 {
    let clamped = millivolts.clamp(BATT_EMPTY_MV, BATT_FULL_MV);
    ((clamped - BATT_EMPTY_MV) * 100 / (BATT_FULL_MV - BATT_EMPTY_MV)) as u8
}

pub fn estimated_hours(level: u8) -> f32 {
    level as f32 * BATT_FULL_RUNTIME_HOURS / 100.0
}

pub struct AnalogSensors<'d> {
    adc: Adc<'d, ADC1<'d>, Blocking>,
    vitals_pin: AdcPin<GPIO34<'d>, ADC1<'d>>,
    batt_pin: AdcPin<GPIO35<'d>, ADC1<'d>>,
}

impl<'d> AnalogSensors<'d> {
    pub fn new(adc1: ADC1<'d>, vitals: GPIO34<'d>, batt: GPIO35<'d>) -> Self {
        let mut adc_config = AdcConfig::new();
        let vitals_pin = adc_config.enable_pin(vitals, Attenuation::_11dB);
        let batt_pin = adc_config.enable_pin(batt, Attenuation::_11dB);
        let adc = Adc::new(adc1, adc_config);
        AnalogSensors {
            adc,
            vitals_pin,
            batt_pin,
        }
    }

    /// Samples the pulse sensor for one window and estimates BPM. Zero means
    /// no usable signal (sensor off the skin or flat-lined wiring).
    pub async fn sample_heart_rate(&mut self) -> VitalsReport {
        let mut samples = [0u16; HR_WINDOW_SAMPLES];
        for slot in samples.iter_mut() {
            *slot = self.adc.read_blocking(&mut self.vitals_pin);
            Timer::after(Duration::from_millis(HR_SAMPLE_INTERVAL_MS)).await;
        }
        VitalsReport {
            heart_rate_bpm: estimate_bpm(&samples, HR_SAMPLE_INTERVAL_MS),
        }
    }

    pub fn sample_battery(&mut self) -> BatteryReport {
        let raw = self.adc.read_blocking(&mut self.batt_pin);
        let millivolts = battery_millivolts(raw);
        let level = battery_percent(millivolts);
        BatteryReport {
            millivolts,
            level,
            estimated_hours: estimated_hours(level),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_signal_reads_zero_bpm() {
        let samples = [2000u16; 200];
        assert_eq!(estimate_bpm(&samples, 5), 0);
    }

    #[test]
    fn square_wave_counts_beats() {
        // Two full pulses over a one-second window: 120 BPM
        let mut samples = [1000u16; 200];
        for i in 0..200 {
            if (50..75).contains(&i) || (150..175).contains(&i) {
                samples[i] = 3000;
            }
        }
        assert_eq!(estimate_bpm(&samples, 5), 120);
    }

    #[test]
    fn tiny_swing_is_noise() {
        let mut samples = [2000u16; 200];
        samples[100] = 2050;
        assert_eq!(estimate_bpm(&samples, 5), 0);
    }

    #[test]
    fn battery_scale_covers_divider() {
        assert_eq!(battery_millivolts(0), 0);
        assert_eq!(battery_millivolts(4095), 6600);
    }

    #[test]
    fn battery_percent_clamps_to_lipo_span() {
        assert_eq!(battery_percent(4200), 100);
        assert_eq!(battery_percent(4500), 100);
        assert_eq!(battery_percent(3000), 0);
        assert_eq!(battery_percent(2700), 0);
        assert_eq!(battery_percent(3600), 50);
    }

    #[test]
    fn estimate_tracks_level() {
        assert_eq!(estimated_hours(100), 24.0);
        assert_eq!(estimated_hours(50), 12.0);
        assert_eq!(estimated_hours(0), 0.0);
    }
}
