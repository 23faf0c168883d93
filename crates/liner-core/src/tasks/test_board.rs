//! Scripted board for task tests

use alloc::vec::Vec;
use core::f32::consts::PI;

use embedded_hal::delay::DelayNs;

use crate::app_state::{App, Board};
use crate::config::{ConfigError, ConfigStorage, DeviceConfig};
use crate::radio::{RadioError, Response, Uplink, UplinkMessage};
use crate::scheduler::TaskScheduler;
use crate::sensors::{
    Channel, ChannelDrive, FrequencyReading, ImuProfile, MotionSample, MotionSensor,
    ResonantSensor, SensorError, Thermometer,
};
use crate::storage::{FS_BLOCK_COUNT, MemFlash, RamFileSystem, RecordStore, SCRATCH_SIZE};

pub(crate) const TEST_TEMPERATURE: u16 = 0x0123;
pub(crate) const TEST_FREQUENCY: u32 = 1_000_000;
/// Samples per period of the FFT test vibration (100 Hz at 1600 Hz)
pub(crate) const VIBRATION_PERIOD: usize = 16;

#[derive(Debug, Default)]
pub(crate) struct TestBoard {
    pub imu_profile: Option<ImuProfile>,
    pub imu_fails: bool,
    pub antenna_fails: bool,
    pub sample_index: usize,
    pub sent: Vec<UplinkMessage>,
    pub responses: Vec<Response>,
    pub connected: bool,
    pub advertising: bool,
    pub send_fails: bool,
    pub stored_config: Option<DeviceConfig>,
    pub measured_channels: Vec<(Channel, ChannelDrive)>,
    pub delayed_ns: u64,
    pub kicks: u32,
    pub led_flashes: u32,
    pub resets: u32,
    pub powered_off: bool,
}

pub(crate) type TestApp<'a> = App<'a, RamFileSystem, MemFlash, TestBoard>;

/// App over a freshly formatted RAM store
pub(crate) fn test_app(scheduler: &TaskScheduler, board: TestBoard) -> TestApp<'_> {
    let store = RecordStore::new(
        RamFileSystem::new(FS_BLOCK_COUNT),
        MemFlash::new(SCRATCH_SIZE as usize),
    );
    let mut app = App::new(scheduler, store, board);
    app.store.enable().unwrap();
    app
}

impl MotionSensor for TestBoard {
    fn configure(&mut self, profile: ImuProfile) -> Result<(), SensorError> {
        if self.imu_fails {
            return Err(SensorError::InitializationFailed {
                sensor: "test IMU",
                details: "scripted failure",
            });
        }
        self.imu_profile = Some(profile);
        Ok(())
    }

    fn shutdown(&mut self) {
        self.imu_profile = None;
    }

    fn next_sample(&mut self) -> Result<MotionSample, SensorError> {
        if self.imu_fails {
            return Err(SensorError::Timeout { sensor: "test IMU" });
        }
        let phase = (self.sample_index % VIBRATION_PERIOD) as f32 / VIBRATION_PERIOD as f32;
        self.sample_index += 1;
        let z = 4096.0 + 512.0 * libm::sinf(2.0 * PI * phase);
        Ok(MotionSample {
            accel: [0, 0, z as i16],
            gyro: [0; 3],
        })
    }

    fn rms_sample(&mut self) -> Result<MotionSample, SensorError> {
        if self.imu_fails {
            return Err(SensorError::Timeout { sensor: "test IMU" });
        }
        Ok(MotionSample {
            accel: [0, 0, 4096],
            gyro: [3, 4, 0],
        })
    }
}

impl ResonantSensor for TestBoard {
    fn measure_channel(
        &mut self,
        channel: Channel,
        drive: ChannelDrive,
    ) -> Result<FrequencyReading, SensorError> {
        if self.antenna_fails {
            return Err(SensorError::ReadFailed {
                sensor: "test antenna",
                operation: "measure",
                details: "scripted failure",
            });
        }
        self.measured_channels.push((channel, drive));
        Ok(FrequencyReading {
            frequency: TEST_FREQUENCY + channel.index() as u32 * 1000,
            error_flags: 0,
        })
    }
}

impl Thermometer for TestBoard {
    fn read_temperature_raw(&mut self) -> Result<u16, SensorError> {
        Ok(TEST_TEMPERATURE)
    }
}

impl Uplink for TestBoard {
    fn send(&mut self, message: &UplinkMessage) -> Result<(), RadioError> {
        if self.send_fails {
            return Err(RadioError::NotJoined);
        }
        self.sent.push(message.clone());
        Ok(())
    }

    fn respond(&mut self, response: Response) {
        self.responses.push(response);
    }

    fn start_advertising(&mut self) {
        self.advertising = true;
    }

    fn stop_advertising(&mut self) {
        self.advertising = false;
    }

    fn is_connected(&self) -> bool {
        self.connected
    }
}

impl ConfigStorage for TestBoard {
    fn load_config(&mut self) -> Option<DeviceConfig> {
        self.stored_config
    }

    fn store_config(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
        self.stored_config = Some(*config);
        Ok(())
    }
}

impl Board for TestBoard {
    fn kick_watchdog(&mut self) {
        self.kicks += 1;
    }

    fn flash_led(&mut self) {
        self.led_flashes += 1;
    }

    fn power_off(&mut self) {
        self.powered_off = true;
    }

    fn system_reset(&mut self) {
        self.resets += 1;
    }
}

impl DelayNs for TestBoard {
    fn delay_ns(&mut self, ns: u32) {
        self.delayed_ns += ns as u64;
    }
}
