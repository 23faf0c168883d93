//! Device configuration
//!
//! The configuration travels as a packed 16-byte little-endian block (command
//! 0xA2 / response to 0xA7). Every incoming block is sanitized field by field:
//! unset (erased flash, all ones), zero or out-of-range values fall back to the
//! compiled-in defaults.

mod nvm;

pub use nvm::*;

use serde::{Deserialize, Serialize};
use thiserror_no_std::Error;

/// Compiled-in defaults
pub mod defaults {
    use super::{AccelRange, GyroRange, ImuFrequency};

    pub const HEARTBEAT_PERIOD_MINUTES: u8 = 15;
    pub const RECORD_DURATION_SECONDS: u16 = 20;
    pub const RECORD_PERIOD_MINUTES: u16 = 60;
    /// FFT disabled
    pub const FFT_PERIOD_HOURS: u8 = 0;
    pub const ACCELEROMETER_RANGE: AccelRange = AccelRange::G4;
    pub const GYROSCOPE_RANGE: GyroRange = GyroRange::Dps2000;
    pub const IMU_FREQUENCY: ImuFrequency = ImuFrequency::Hz1600;
    pub const CH0_DRIVE_CURRENT: u8 = 19;
    pub const CH1_DRIVE_CURRENT: u8 = 22;
    pub const CH0_SETTLE_COUNT: u16 = 0x40;
    pub const CH1_SETTLE_COUNT: u16 = 0x200;
    pub const CH_ENABLED_BITMASK: u8 = 0x01;
}

pub const MIN_RECORD_DURATION_SECONDS: u16 = 5;
pub const MAX_RECORD_DURATION_SECONDS: u16 = 300;
pub const MAX_DRIVE_CURRENT: u8 = 0b11111;
/// Both antenna channels enabled
pub const MAX_CH_ENABLED_BITMASK: u8 = 0b11;

/// Minutes of idle time kept between the end of a recording and the next one
pub const RECORD_PERIOD_MARGIN_MINUTES: u16 = 5;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Configuration block must be {expected} bytes, got {actual}")]
    BadLength { expected: usize, actual: usize },
    #[error("Stored configuration is missing or corrupted")]
    NotFound,
    #[error("Configuration storage error")]
    Storage,
    #[error("Configuration serialization failed")]
    Serialization,
}

/// Accelerometer full-scale range (wire codes 1..=4)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum AccelRange {
    G2 = 1,
    G4 = 2,
    G8 = 3,
    G16 = 4,
}

impl AccelRange {
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::G2),
            2 => Some(Self::G4),
            3 => Some(Self::G8),
            4 => Some(Self::G16),
            _ => None,
        }
    }

    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn g(self) -> u8 {
        match self {
            Self::G2 => 2,
            Self::G4 => 4,
            Self::G8 => 8,
            Self::G16 => 16,
        }
    }
}

/// Gyroscope full-scale range (wire codes 1..=5)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GyroRange {
    Dps125 = 1,
    Dps250 = 2,
    Dps500 = 3,
    Dps1000 = 4,
    Dps2000 = 5,
}

impl GyroRange {
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Dps125),
            2 => Some(Self::Dps250),
            3 => Some(Self::Dps500),
            4 => Some(Self::Dps1000),
            5 => Some(Self::Dps2000),
            _ => None,
        }
    }

    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn dps(self) -> u16 {
        match self {
            Self::Dps125 => 125,
            Self::Dps250 => 250,
            Self::Dps500 => 500,
            Self::Dps1000 => 1000,
            Self::Dps2000 => 2000,
        }
    }
}

/// IMU output data rate (wire codes 1..=7)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum ImuFrequency {
    Hz25 = 1,
    Hz50 = 2,
    Hz100 = 3,
    Hz200 = 4,
    Hz400 = 5,
    Hz800 = 6,
    Hz1600 = 7,
}

impl ImuFrequency {
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            1 => Some(Self::Hz25),
            2 => Some(Self::Hz50),
            3 => Some(Self::Hz100),
            4 => Some(Self::Hz200),
            5 => Some(Self::Hz400),
            6 => Some(Self::Hz800),
            7 => Some(Self::Hz1600),
            _ => None,
        }
    }

    pub const fn code(self) -> u8 {
        self as u8
    }

    pub const fn hz(self) -> u16 {
        match self {
            Self::Hz25 => 25,
            Self::Hz50 => 50,
            Self::Hz100 => 100,
            Self::Hz200 => 200,
            Self::Hz400 => 400,
            Self::Hz800 => 800,
            Self::Hz1600 => 1600,
        }
    }
}

/// Runtime configuration of the tag
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    pub heartbeat_period_minutes: u8,
    pub record_duration_seconds: u16,
    pub record_period_minutes: u16,
    /// 0 disables the periodic FFT
    pub fft_period_hours: u8,
    pub accelerometer_range: AccelRange,
    pub gyroscope_range: GyroRange,
    pub imu_frequency: ImuFrequency,
    pub ch0_drive_current: u8,
    pub ch1_drive_current: u8,
    pub ch0_settle_count: u16,
    pub ch1_settle_count: u16,
    /// Bit 0 enables antenna channel 0, bit 1 channel 1
    pub ch_enabled_bitmask: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            heartbeat_period_minutes: defaults::HEARTBEAT_PERIOD_MINUTES,
            record_duration_seconds: defaults::RECORD_DURATION_SECONDS,
            record_period_minutes: defaults::RECORD_PERIOD_MINUTES,
            fft_period_hours: defaults::FFT_PERIOD_HOURS,
            accelerometer_range: defaults::ACCELEROMETER_RANGE,
            gyroscope_range: defaults::GYROSCOPE_RANGE,
            imu_frequency: defaults::IMU_FREQUENCY,
            ch0_drive_current: defaults::CH0_DRIVE_CURRENT,
            ch1_drive_current: defaults::CH1_DRIVE_CURRENT,
            ch0_settle_count: defaults::CH0_SETTLE_COUNT,
            ch1_settle_count: defaults::CH1_SETTLE_COUNT,
            ch_enabled_bitmask: defaults::CH_ENABLED_BITMASK,
        }
    }
}

fn unset_u8(value: u8) -> bool {
    value == 0 || value == u8::MAX
}

fn unset_u16(value: u16) -> bool {
    value == 0 || value == u16::MAX
}

impl DeviceConfig {
    /// Packed size on the wire
    pub const SIZE: usize = 16;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0] = self.heartbeat_period_minutes;
        bytes[1..3].copy_from_slice(&self.record_duration_seconds.to_le_bytes());
        bytes[3..5].copy_from_slice(&self.record_period_minutes.to_le_bytes());
        bytes[5] = self.fft_period_hours;
        bytes[6] = self.accelerometer_range.code();
        bytes[7] = self.gyroscope_range.code();
        bytes[8] = self.imu_frequency.code();
        bytes[9] = self.ch0_drive_current;
        bytes[10] = self.ch1_drive_current;
        bytes[11..13].copy_from_slice(&self.ch0_settle_count.to_le_bytes());
        bytes[13..15].copy_from_slice(&self.ch1_settle_count.to_le_bytes());
        bytes[15] = self.ch_enabled_bitmask;
        bytes
    }

    /// Decode and sanitize a configuration block
    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        let mut config = Self::default();

        if !unset_u8(bytes[0]) {
            config.heartbeat_period_minutes = bytes[0];
        }

        let duration = u16::from_le_bytes([bytes[1], bytes[2]]);
        if (MIN_RECORD_DURATION_SECONDS..=MAX_RECORD_DURATION_SECONDS).contains(&duration) {
            config.record_duration_seconds = duration;
        }

        let period = u16::from_le_bytes([bytes[3], bytes[4]]);
        if !unset_u16(period) {
            config.record_period_minutes = period;
        }

        if bytes[5] != u8::MAX {
            config.fft_period_hours = bytes[5];
        }

        if let Some(range) = AccelRange::from_code(bytes[6]) {
            config.accelerometer_range = range;
        }
        if let Some(range) = GyroRange::from_code(bytes[7]) {
            config.gyroscope_range = range;
        }
        if let Some(frequency) = ImuFrequency::from_code(bytes[8]) {
            config.imu_frequency = frequency;
        }

        if !unset_u8(bytes[9]) && bytes[9] <= MAX_DRIVE_CURRENT {
            config.ch0_drive_current = bytes[9];
        }
        if !unset_u8(bytes[10]) && bytes[10] <= MAX_DRIVE_CURRENT {
            config.ch1_drive_current = bytes[10];
        }

        let settle = u16::from_le_bytes([bytes[11], bytes[12]]);
        if !unset_u16(settle) {
            config.ch0_settle_count = settle;
        }
        let settle = u16::from_le_bytes([bytes[13], bytes[14]]);
        if !unset_u16(settle) {
            config.ch1_settle_count = settle;
        }

        if (1..=MAX_CH_ENABLED_BITMASK).contains(&bytes[15]) {
            config.ch_enabled_bitmask = bytes[15];
        }

        config.enforce_record_margin();
        config
    }

    /// Decode a configuration block of unchecked length
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        let block: &[u8; Self::SIZE] = bytes.try_into().map_err(|_| ConfigError::BadLength {
            expected: Self::SIZE,
            actual: bytes.len(),
        })?;
        Ok(Self::from_bytes(block))
    }

    /// Re-apply the field checks of [`Self::from_bytes`]
    pub fn sanitized(&self) -> Self {
        Self::from_bytes(&self.to_bytes())
    }

    /// Leave at least five idle minutes between two recordings
    fn enforce_record_margin(&mut self) {
        let recording_minutes = self.record_duration_seconds.div_ceil(60);
        if recording_minutes >= self.record_period_minutes {
            self.record_period_minutes = recording_minutes + RECORD_PERIOD_MARGIN_MINUTES;
        }
    }

    pub fn channel_enabled(&self, channel: u8) -> bool {
        channel < 8 && self.ch_enabled_bitmask & (1 << channel) != 0
    }
}
