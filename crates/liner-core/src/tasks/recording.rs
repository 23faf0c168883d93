//! Data recording sessions

use embedded_storage::nor_flash::NorFlash;
use log::{error, info, warn};

use crate::app_state::{App, AppError, Hardware};
use crate::radio::{Response, UplinkMessage};
use crate::sensors::{Channel, ChannelDrive, ImuProfile};
use crate::storage::{CHANNEL_ERROR_SENSOR, DataPacket, FileSystem, PacketAverager, RecordCount};

/// Time between two packets of a recording session
const SAMPLE_INTERVAL_MS: u32 = 1000;

impl<F, D, H> App<'_, F, D, H>
where
    F: FileSystem,
    D: NorFlash,
    H: Hardware,
{
    pub(super) fn send_data(&mut self) -> Result<(), AppError> {
        info!("### DATA GATHERING TASK ###");
        self.data_gathering(self.config.record_duration_seconds)
            .map(|_| ())
    }

    pub(super) fn data_request(&mut self) -> Result<(), AppError> {
        info!("### DATA REQUEST TASK ###");
        match self.data_gathering(self.config.record_duration_seconds) {
            Ok(_) => {
                self.hw.respond(Response::Done);
                Ok(())
            }
            Err(e) => {
                self.hw.respond(Response::Failed);
                Err(e)
            }
        }
    }

    /// Record one packet per second for `duration_seconds` and uplink their average
    ///
    /// Packets carry the new session id. When no session can be opened
    /// (saturated counter, flash failure) the measurements are still taken
    /// and uplinked with `record_id` 0xFFFF.
    pub fn data_gathering(&mut self, duration_seconds: u16) -> Result<DataPacket, AppError> {
        let expected_bytes = duration_seconds as u32 * DataPacket::SIZE as u32;
        let session = match self.store.create_data_session(expected_bytes) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Recording without a session: {}", e);
                None
            }
        };
        let record_id = session.unwrap_or(RecordCount::SATURATED);

        let profile = ImuProfile::Recording {
            accel_range: self.config.accelerometer_range,
            gyro_range: self.config.gyroscope_range,
            frequency: self.config.imu_frequency,
        };
        if let Err(e) = self.hw.configure(profile) {
            error!("IMU configuration failed: {}", e);
        }

        let mut averager = PacketAverager::default();
        let mut write_failed = false;
        for second in 0..duration_seconds {
            let packet = self.measure(record_id);
            averager.push(&packet);

            if session.is_some() && !write_failed {
                if let Err(e) = self.store.record_data_packet(&packet) {
                    error!("Failed to store packet {}: {}", second, e);
                    write_failed = true;
                }
            }

            self.hw.kick_watchdog();
            if second + 1 < duration_seconds {
                self.hw.delay_ms(SAMPLE_INTERVAL_MS);
            }
        }

        self.hw.shutdown();

        if session.is_some() {
            if let Err(e) = self.store.close_data_session() {
                error!("Failed to close data session: {}", e);
            }
        }

        let average = averager.average(record_id).unwrap_or(DataPacket {
            record_id,
            ..Default::default()
        });
        info!(
            "Session {}: {} packets, accel {} gyro {} f0 {} f1 {}",
            record_id,
            averager.count(),
            average.accel_mod,
            average.gyro_mod,
            average.freq_chan_0,
            average.freq_chan_1
        );

        self.hw.send(&UplinkMessage::Data(average))?;
        Ok(average)
    }

    /// Take one packet worth of measurements
    fn measure(&mut self, record_id: u16) -> DataPacket {
        let mut packet = DataPacket {
            record_id,
            ..Default::default()
        };

        match self.hw.read_temperature_raw() {
            Ok(temp) => packet.temp = temp,
            Err(e) => warn!("Temperature read failed: {}", e),
        }

        match self.hw.rms_sample() {
            Ok(sample) => {
                packet.accel_mod = sample.accel_module();
                packet.gyro_mod = sample.gyro_norm();
            }
            Err(e) => warn!("IMU read failed: {}", e),
        }

        for channel in [Channel::Ch0, Channel::Ch1] {
            if !self.config.channel_enabled(channel.index()) {
                continue;
            }

            let drive = match channel {
                Channel::Ch0 => ChannelDrive {
                    drive_current: self.config.ch0_drive_current,
                    settle_count: self.config.ch0_settle_count,
                },
                Channel::Ch1 => ChannelDrive {
                    drive_current: self.config.ch1_drive_current,
                    settle_count: self.config.ch1_settle_count,
                },
            };

            let (frequency, flags) = match self.hw.measure_channel(channel, drive) {
                Ok(reading) => (reading.frequency, reading.error_flags),
                Err(e) => {
                    warn!("Antenna {:?} failed: {}", channel, e);
                    (0, CHANNEL_ERROR_SENSOR)
                }
            };
            match channel {
                Channel::Ch0 => {
                    packet.freq_chan_0 = frequency;
                    packet.err_chan_0 = flags;
                }
                Channel::Ch1 => {
                    packet.freq_chan_1 = frequency;
                    packet.err_chan_1 = flags;
                }
            }
        }

        packet
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_board::{TEST_FREQUENCY, TEST_TEMPERATURE, TestBoard, test_app};
    use super::*;
    use crate::scheduler::{TaskId, TaskScheduler};
    use crate::storage::{DATA_FOLDER, Folder, StoreError};

    #[test]
    fn test_data_gathering_writes_one_packet_per_second() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let mut app = test_app(&scheduler, TestBoard::default());
        app.config.record_duration_seconds = 5;

        let average = app.data_gathering(5).unwrap();

        assert_eq!(app.store.get_data_session_count(), 1);
        assert_eq!(app.store.download_data_file_start(0).unwrap(), 5);
        for index in 0..5 {
            let packet = app.store.download_data_record(index).unwrap();
            assert_eq!(packet.record_id, 0);
            assert_eq!(packet.temp, TEST_TEMPERATURE);
            assert_eq!(packet.freq_chan_0, TEST_FREQUENCY);
            assert_eq!(packet.freq_chan_1, 0, "Channel 1 is disabled by default");
        }
        app.store.download_file_stop().unwrap();

        assert_eq!(average.accel_mod, 4096);
        assert_eq!(average.gyro_mod, 5);
        assert_eq!(app.hw.sent, [UplinkMessage::Data(average)]);
        assert_eq!(app.hw.delayed_ns, 4 * 1_000_000_000);
        assert!(app.hw.imu_profile.is_none(), "IMU is shut down afterwards");
        assert_eq!(app.store.busy(), None);
    }

    #[test]
    fn test_sessions_get_consecutive_ids() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let mut app = test_app(&scheduler, TestBoard::default());

        assert_eq!(app.data_gathering(5).unwrap().record_id, 0);
        assert_eq!(app.data_gathering(5).unwrap().record_id, 1);
        assert_eq!(app.store.get_data_session_count(), 2);
        assert_eq!(
            app.store.folder_size(Folder::Data).unwrap(),
            10 * DataPacket::SIZE as u32
        );
    }

    #[test]
    fn test_both_channels_use_their_drive() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let mut app = test_app(&scheduler, TestBoard::default());
        app.config.ch_enabled_bitmask = 0b11;

        let average = app.data_gathering(5).unwrap();

        assert_eq!(average.freq_chan_1, TEST_FREQUENCY + 1000);
        assert_eq!(app.hw.measured_channels.len(), 10);
        assert_eq!(
            app.hw.measured_channels[1],
            (
                Channel::Ch1,
                ChannelDrive {
                    drive_current: 22,
                    settle_count: 0x200
                }
            )
        );
    }

    #[test]
    fn test_sensor_failures_are_flagged() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let board = TestBoard {
            antenna_fails: true,
            imu_fails: true,
            ..Default::default()
        };
        let mut app = test_app(&scheduler, board);

        let average = app.data_gathering(5).unwrap();
        assert_eq!(average.err_chan_0, CHANNEL_ERROR_SENSOR);
        assert_eq!(average.err_chan_1, 0);
        assert_eq!(average.accel_mod, 0);
        assert_eq!(average.temp, TEST_TEMPERATURE);
    }

    #[test]
    fn test_recording_without_storage_still_uplinks() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let mut app = test_app(&scheduler, TestBoard::default());
        app.store.disable().unwrap();

        let average = app.data_gathering(5).unwrap();
        assert_eq!(average.record_id, RecordCount::SATURATED);
        assert_eq!(app.hw.sent.len(), 1);
        assert_eq!(
            app.store.download_data_file_start(0),
            Err(StoreError::NotMounted)
        );
    }

    #[test]
    fn test_data_request_answers_when_done() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let mut app = test_app(&scheduler, TestBoard::default());
        app.config.record_duration_seconds = 5;

        app.handle_command(&[0xAF]).unwrap();
        scheduler.tick_handler();
        app.dispatch();

        assert_eq!(app.hw.responses, [Response::Ok, Response::Done]);
        assert_eq!(app.store.get_data_session_count(), 1);
        assert!(app
            .store
            .filesystem()
            .contents(&alloc::format!("{}/0", DATA_FOLDER))
            .is_some_and(|file| file.len() == 5 * DataPacket::SIZE));
        assert!(!scheduler.is_scheduled(TaskId::DataRequest));
    }

    #[test]
    fn test_failed_uplink_is_reported() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let board = TestBoard {
            send_fails: true,
            ..Default::default()
        };
        let mut app = test_app(&scheduler, board);

        assert!(matches!(app.data_gathering(5), Err(AppError::Radio(_))));
        assert_eq!(
            app.store.get_data_session_count(),
            1,
            "The session is stored even if the uplink fails"
        );
    }
}
