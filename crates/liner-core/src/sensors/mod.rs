//! Sensor interfaces used by the recording and FFT tasks
//!
//! Drivers live in board support. They block until their data is ready; the
//! firmware is single-threaded and each task runs to completion.

use thiserror_no_std::Error;

use crate::config::{AccelRange, GyroRange, ImuFrequency};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorError {
    #[error("{sensor} initialization failed: {details}")]
    InitializationFailed {
        sensor: &'static str,
        details: &'static str,
    },
    #[error("{sensor} {operation} failed: {details}")]
    ReadFailed {
        sensor: &'static str,
        operation: &'static str,
        details: &'static str,
    },
    #[error("{sensor} timed out")]
    Timeout { sensor: &'static str },
    #[error("{sensor} is not configured")]
    NotConfigured { sensor: &'static str },
}

/// Raw accelerometer and gyroscope axes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MotionSample {
    pub accel: [i16; 3],
    pub gyro: [i16; 3],
}

fn norm(axes: &[i16; 3]) -> f64 {
    let sum: f64 = axes.iter().map(|&a| (a as f64) * (a as f64)).sum();
    libm::sqrt(sum)
}

impl MotionSample {
    /// Magnitude of the acceleration vector, saturated to `i16`
    pub fn accel_norm(&self) -> i16 {
        norm(&self.accel).min(i16::MAX as f64) as i16
    }

    /// Magnitude of the angular rate vector, saturated to `u16`
    pub fn gyro_norm(&self) -> u16 {
        norm(&self.gyro).min(u16::MAX as f64) as u16
    }

    pub fn accel_module(&self) -> u16 {
        self.accel_norm() as u16
    }
}

/// IMU operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImuProfile {
    /// Accelerometer and gyroscope, used by data recording and vibration trend
    Recording {
        accel_range: AccelRange,
        gyro_range: GyroRange,
        frequency: ImuFrequency,
    },
    /// Accelerometer only with data-ready interrupt, used by FFT captures
    Fft {
        accel_range: AccelRange,
        frequency: ImuFrequency,
    },
}

pub trait MotionSensor {
    /// Power up and configure the IMU
    fn configure(&mut self, profile: ImuProfile) -> Result<(), SensorError>;

    /// Put the IMU back to its lowest power state
    fn shutdown(&mut self);

    /// Wait for the next data-ready event and read the sample
    fn next_sample(&mut self) -> Result<MotionSample, SensorError>;

    /// RMS of the axes over the sensor's internal averaging window
    fn rms_sample(&mut self) -> Result<MotionSample, SensorError>;
}

/// Resonant antenna channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    Ch0,
    Ch1,
}

impl Channel {
    pub const fn index(self) -> u8 {
        match self {
            Self::Ch0 => 0,
            Self::Ch1 => 1,
        }
    }
}

/// Excitation settings for one antenna channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelDrive {
    pub drive_current: u8,
    pub settle_count: u16,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrequencyReading {
    /// Resonant frequency in Hz
    pub frequency: u32,
    /// Converter error flags reported with the reading
    pub error_flags: u8,
}

/// Inductive sensor measuring the resonant frequency of the liner antennas
pub trait ResonantSensor {
    fn measure_channel(
        &mut self,
        channel: Channel,
        drive: ChannelDrive,
    ) -> Result<FrequencyReading, SensorError>;
}

pub trait Thermometer {
    /// Raw temperature register value
    fn read_temperature_raw(&mut self) -> Result<u16, SensorError>;
}
