//! IP5306 power IC on the T-Call's secondary I2C bus.
//!
//! The IP5306 drops its 5 V boost output when load falls under ~45 mA, which
//! is exactly where an idle SIM800 sits. SYS_CTL0 bit 5 keeps the boost up
//! regardless of load.

use esp_hal::Blocking;
use esp_hal::gpio::AnyPin;
use esp_hal::i2c::master::{Config as I2cConfig, I2c};
use esp_hal::peripherals::I2C0;
use esp_hal::time::Rate;

use crate::config;

const SYS_CTL0_BOOST_ON: u8 = 0x37;
const SYS_CTL0_BOOST_OFF: u8 = 0x35;
const REG_READ0: u8 = 0x70;
const READ0_CHARGING: u8 = 1 << 3;

#[derive(Debug)]
pub enum PowerError {
    Bus,
}

pub struct Ip5306<'a> {
    i2c: I2c<'a, Blocking>,
}

impl<'a> Ip5306<'a> {
    pub fn new<SDA, SCL>(i2c_periph: I2C0<'a>, sda: SDA, scl: SCL) -> Self
    where
        SDA: Into<AnyPin<'a>>,
        SCL: Into<AnyPin<'a>>,
    {
        let i2c = I2c::new(
            i2c_periph,
            I2cConfig::default().with_frequency(Rate::from_khz(400)),
        )
        .unwrap()
        .with_sda(sda.into())
        .with_scl(scl.into());

        Ip5306 { i2c }
    }

    pub fn set_boost_keep_on(&mut self, enable: bool) -> Result<(), PowerError> {
        let value = if enable {
            SYS_CTL0_BOOST_ON
        } else {
            SYS_CTL0_BOOST_OFF
        };
        self.i2c
            .write(config::IP5306_ADDR, &[config::IP5306_REG_SYS_CTL0, value])
            .map_err(|_| PowerError::Bus)
    }

    pub fn sys_ctl0(&mut self) -> Result<u8, PowerError> {
        let mut reg = [0u8; 1];
        self.i2c
            .write_read(config::IP5306_ADDR, &[config::IP5306_REG_SYS_CTL0], &mut reg)
            .map_err(|_| PowerError::Bus)?;
        Ok(reg[0])
    }

    pub fn is_charging(&mut self) -> Result<bool, PowerError> {
        let mut reg = [0u8; 1];
        self.i2c
            .write_read(config::IP5306_ADDR, &[REG_READ0], &mut reg)
            .map_err(|_| PowerError::Bus)?;
        Ok(reg[0] & READ0_CHARGING != 0)
    }
}
