//! Board services used by the tasks
//!
//! The firmware implements these on top of its HAL; the simulator and the
//! tests provide synthetic boards.

use embedded_hal::delay::DelayNs;

use crate::config::ConfigStorage;
use crate::radio::Uplink;
use crate::sensors::{MotionSensor, ResonantSensor, Thermometer};

/// Watchdog, status LED and power control
pub trait Board {
    fn kick_watchdog(&mut self);

    /// Short blink of the green LED
    fn flash_led(&mut self);

    /// Store the "off" state and shut down until the next NFC wake-up
    fn power_off(&mut self);

    fn system_reset(&mut self);
}

/// Everything a task may touch on the board
pub trait Hardware:
    MotionSensor + ResonantSensor + Thermometer + Uplink + ConfigStorage + Board + DelayNs
{
}

impl<T> Hardware for T where
    T: MotionSensor + ResonantSensor + Thermometer + Uplink + ConfigStorage + Board + DelayNs
{
}
