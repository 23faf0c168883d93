//! Simulated tag hardware
//!
//! Sensors produce synthetic readings, the radio logs what it would send and
//! delays sleep for real, scaled by the simulation speed.

use std::f64::consts::PI;
use std::time::Duration;

use embedded_hal::delay::DelayNs;
use log::{debug, info, warn};

use liner_core::app_state::Board;
use liner_core::config::{ConfigError, ConfigStorage, DeviceConfig, NorFlashConfigStorage};
use liner_core::radio::{RadioError, Response, Uplink, UplinkMessage};
use liner_core::sensors::{
    Channel, ChannelDrive, FrequencyReading, ImuProfile, MotionSample, MotionSensor,
    ResonantSensor, SensorError, Thermometer,
};
use liner_core::storage::MemFlash;

/// One erase sector holds the configuration record
const CONFIG_FLASH_SIZE: usize = 4096;

/// Resonant frequency of an unworn liner antenna
const BASE_FREQUENCY_HZ: f64 = 1_200_000.0;

// ---------------------------------------------------------------------------
// Mock data generation
// ---------------------------------------------------------------------------

/// Synthetic liner: a vibration tone on the z axis and slowly drifting antennas
struct MockLiner {
    /// Seconds of simulated sensor time
    elapsed_secs: f64,
    /// IMU output data rate while a profile is active
    sample_rate_hz: f64,
    vibration_hz: f64,
}

impl MockLiner {
    fn new(vibration_hz: f64) -> Self {
        Self {
            elapsed_secs: 0.0,
            sample_rate_hz: 1600.0,
            vibration_hz,
        }
    }

    /// Next IMU sample, 1 g on z plus the vibration tone
    fn motion(&mut self) -> MotionSample {
        self.elapsed_secs += 1.0 / self.sample_rate_hz;
        let t = self.elapsed_secs;
        let tone = (2.0 * PI * self.vibration_hz * t).sin();
        let wobble = (2.0 * PI * 3.0 * t).sin();

        MotionSample {
            accel: [
                (120.0 * wobble) as i16,
                (80.0 * tone) as i16,
                (4096.0 + 900.0 * tone) as i16,
            ],
            gyro: [(40.0 * wobble) as i16, (25.0 * tone) as i16, 3],
        }
    }

    /// Antenna frequency, shifting as the liner wears over the run
    fn frequency(&self, channel: Channel) -> u32 {
        let t = self.elapsed_secs;
        let offset = channel.index() as f64 * 15_000.0;
        let wear = 2_000.0 * (t / 600.0).sin();
        (BASE_FREQUENCY_HZ + offset + wear) as u32
    }

    /// Raw temperature register, around 25 °C
    fn temperature(&self) -> u16 {
        let celsius = 25.0 + 2.0 * (self.elapsed_secs / 900.0).sin();
        (celsius * 128.0) as u16
    }
}

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

pub struct SimBoard {
    liner: MockLiner,
    imu: Option<ImuProfile>,
    nvm: NorFlashConfigStorage<MemFlash>,
    connected: bool,
    advertising: bool,
    /// Real time is divided by this factor
    speed: u32,
    pub powered_off: bool,
    pub reset_requested: bool,
}

impl SimBoard {
    pub fn new(vibration_hz: f64, speed: u32, connected: bool) -> Self {
        Self {
            liner: MockLiner::new(vibration_hz),
            imu: None,
            nvm: NorFlashConfigStorage::new(MemFlash::new(CONFIG_FLASH_SIZE), 0),
            connected,
            advertising: false,
            speed: speed.max(1),
            powered_off: false,
            reset_requested: false,
        }
    }

    fn imu_active(&self) -> Result<(), SensorError> {
        match self.imu {
            Some(_) => Ok(()),
            None => Err(SensorError::NotConfigured { sensor: "IMU" }),
        }
    }
}

impl MotionSensor for SimBoard {
    fn configure(&mut self, profile: ImuProfile) -> Result<(), SensorError> {
        let frequency = match profile {
            ImuProfile::Recording { frequency, .. } | ImuProfile::Fft { frequency, .. } => {
                frequency
            }
        };
        self.liner.sample_rate_hz = frequency.hz() as f64;
        debug!("IMU configured: {:?}", profile);
        self.imu = Some(profile);
        Ok(())
    }

    fn shutdown(&mut self) {
        debug!("IMU shut down");
        self.imu = None;
    }

    fn next_sample(&mut self) -> Result<MotionSample, SensorError> {
        self.imu_active()?;
        Ok(self.liner.motion())
    }

    fn rms_sample(&mut self) -> Result<MotionSample, SensorError> {
        self.imu_active()?;
        let sample = self.liner.motion();
        Ok(MotionSample {
            accel: sample.accel.map(i16::saturating_abs),
            gyro: sample.gyro.map(i16::saturating_abs),
        })
    }
}

impl ResonantSensor for SimBoard {
    fn measure_channel(
        &mut self,
        channel: Channel,
        drive: ChannelDrive,
    ) -> Result<FrequencyReading, SensorError> {
        debug!(
            "Measuring {:?} (drive {}, settle {})",
            channel, drive.drive_current, drive.settle_count
        );
        Ok(FrequencyReading {
            frequency: self.liner.frequency(channel),
            error_flags: 0,
        })
    }
}

impl Thermometer for SimBoard {
    fn read_temperature_raw(&mut self) -> Result<u16, SensorError> {
        Ok(self.liner.temperature())
    }
}

impl Uplink for SimBoard {
    fn send(&mut self, message: &UplinkMessage) -> Result<(), RadioError> {
        let payload = message.encode();
        match message {
            UplinkMessage::Chunk(_) => debug!("BLE chunk: {} bytes", payload.len()),
            UplinkMessage::Vibration(samples) => {
                info!("Uplink port {}: {} vibration samples", message.port(), samples.len())
            }
            _ => info!("Uplink port {}: {:?}", message.port(), message),
        }
        Ok(())
    }

    fn respond(&mut self, response: Response) {
        info!("BLE response: {:?} {:02X?}", response, response.encode());
    }

    fn start_advertising(&mut self) {
        if !self.advertising {
            debug!("BLE advertising started");
        }
        self.advertising = true;
    }

    fn stop_advertising(&mut self) {
        if self.advertising {
            debug!("BLE advertising stopped");
        }
        self.advertising = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl ConfigStorage for SimBoard {
    fn load_config(&mut self) -> Option<DeviceConfig> {
        self.nvm.load_config()
    }

    fn store_config(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
        self.nvm.store_config(config)
    }
}

impl Board for SimBoard {
    fn kick_watchdog(&mut self) {}

    fn flash_led(&mut self) {
        info!("LED blink");
    }

    fn power_off(&mut self) {
        warn!("Power off requested");
        self.powered_off = true;
    }

    fn system_reset(&mut self) {
        warn!("System reset requested");
        self.reset_requested = true;
    }
}

impl DelayNs for SimBoard {
    fn delay_ns(&mut self, ns: u32) {
        std::thread::sleep(Duration::from_nanos(ns as u64 / self.speed as u64));
    }
}
