//! Status LED patterns on the board LED (GPIO13).

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;
use embassy_time::{Duration, Timer};
use esp_hal::gpio::Output;

use crate::config;

/// Fast blinks per error burst.
const ERROR_BURST_BLINKS: u32 = 3;

static PATTERN: Signal<CriticalSectionRawMutex, LedPattern> = Signal::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedPattern {
    Off,
    /// Slow steady blink, the collar is tracking and publishing.
    Ok,
    /// Burst of fast blinks and a pause.
    Error,
}

impl LedPattern {
    /// Length of one full repetition of the pattern.
    pub const fn cycle_ms(self) -> u64 {
        match self {
            LedPattern::Off => config::ERROR_PAUSE_MS,
            LedPattern::Ok => config::OK_ON_MS + config::OK_OFF_MS,
            LedPattern::Error => {
                ERROR_BURST_BLINKS as u64 * (config::BLINK_ON_MS + config::BLINK_OFF_MS)
                    + config::ERROR_PAUSE_MS
            }
        }
    }
}

/// Switches the pattern from any task. Takes effect at the next cycle.
pub fn set_pattern(pattern: LedPattern) {
    PATTERN.signal(pattern);
}

#[embassy_executor::task]
pub async fn led_task(mut led: Output<'static>) {
    let mut pattern = LedPattern::Off;
    loop {
        if let Some(next) = PATTERN.try_take() {
            pattern = next;
        }
        match pattern {
            LedPattern::Off => {
                led.set_low();
                Timer::after(Duration::from_millis(config::ERROR_PAUSE_MS)).await;
            }
            LedPattern::Ok => {
                led.set_high();
                Timer::after(Duration::from_millis(config::OK_ON_MS)).await;
                led.set_low();
                Timer::after(Duration::from_millis(config::OK_OFF_MS)).await;
            }
            LedPattern::Error => {
                for _ in 0..ERROR_BURST_BLINKS {
                    led.set_high();
                    Timer::after(Duration::from_millis(config::BLINK_ON_MS)).await;
                    led.set_low();
                    Timer::after(Duration::from_millis(config::BLINK_OFF_MS)).await;
                }
                Timer::after(Duration::from_millis(config::ERROR_PAUSE_MS)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_lengths_follow_config() {
        assert_eq!(LedPattern::Ok.cycle_ms(), 2000);
        assert_eq!(LedPattern::Error.cycle_ms(), 900);
    }

    #[test]
    fn error_cycle_is_shorter_than_ok_cycle() {
        // The error pattern has to read as urgent
        assert!(LedPattern::Error.cycle_ms() < LedPattern::Ok.cycle_ms());
    }
}
