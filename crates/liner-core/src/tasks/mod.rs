//! Task bodies run by the scheduler
//!
//! Every task runs to completion inside [`App::dispatch`]. Errors are logged
//! and dropped: the tag keeps following its schedule.

mod analysis;
mod link;
mod recording;

#[cfg(test)]
pub(crate) mod test_board;

pub use analysis::VIBRATION_SAMPLES_PER_UPLINK;
pub use link::ADVERTISING_WINDOW_TICKS;

use embedded_storage::nor_flash::NorFlash;
use log::{error, info};

use crate::app_state::{App, Hardware};
use crate::scheduler::{SchedulerError, TaskId, hours_to_ticks, minutes_to_ticks, secs_to_ticks};
use crate::storage::FileSystem;

pub const ADVERTISE_PERIOD_SECONDS: u32 = 5;
/// Visual heartbeat
pub const LED_PERIOD_SECONDS: u32 = 30;
pub const VIBRATION_ANALYSIS_PERIOD_SECONDS: u32 = 360;

impl<F, D, H> App<'_, F, D, H>
where
    F: FileSystem,
    D: NorFlash,
    H: Hardware,
{
    /// Register the background tasks
    pub fn setup_tasks(&mut self) -> Result<(), SchedulerError> {
        let scheduler = self.scheduler;

        let advertise = secs_to_ticks(ADVERTISE_PERIOD_SECONDS);
        scheduler.add_task(TaskId::Advertise, advertise, advertise, false)?;

        let led = secs_to_ticks(LED_PERIOD_SECONDS);
        scheduler.add_task(TaskId::FlashLed, led, led, false)?;

        scheduler.add_task(TaskId::Heartbeat, 0, self.heartbeat_period(), false)?;
        scheduler.add_task(TaskId::SendData, 0, self.record_period(), false)?;

        let vibration = secs_to_ticks(VIBRATION_ANALYSIS_PERIOD_SECONDS);
        scheduler.add_task(TaskId::VibrationAnalysis, vibration, vibration, false)?;

        self.schedule_fft()
    }

    /// Run every due task. Returns the number of tasks that ran.
    pub fn dispatch(&mut self) -> usize {
        let scheduler = self.scheduler;
        scheduler.dispatch_tasks(|id| self.run_task(id))
    }

    /// Run one task to completion, logging its failure
    pub fn run_task(&mut self, id: TaskId) {
        let result = match id {
            TaskId::Advertise => self.advertise(),
            TaskId::StopAdvertising => {
                self.stop_advertising();
                Ok(())
            }
            TaskId::FlashLed => {
                self.flash_led();
                Ok(())
            }
            TaskId::Heartbeat => self.send_heartbeat(),
            TaskId::SendData => self.send_data(),
            TaskId::DataRequest => self.data_request(),
            TaskId::VibrationAnalysis => self.vibration_analysis(),
            TaskId::PerformFft => self.perform_fft().map(|_| ()),
            TaskId::SaveConfig => self.save_config(),
            TaskId::DownloadData => self.download_data(),
            TaskId::DownloadFft => self.download_fft(),
            TaskId::GetSessionCount => {
                self.get_session_count();
                Ok(())
            }
            TaskId::GetFftCount => {
                self.get_fft_count();
                Ok(())
            }
            TaskId::EraseAll => self.erase_all(),
            TaskId::EraseData => self.erase_data(),
            TaskId::EraseFft => self.erase_fft(),
            TaskId::PowerOff => {
                self.power_off();
                Ok(())
            }
        };

        if let Err(e) = result {
            error!("Task {:?} failed: {}", id, e);
        }
    }

    fn heartbeat_period(&self) -> u32 {
        minutes_to_ticks(self.config.heartbeat_period_minutes as u32)
    }

    fn record_period(&self) -> u32 {
        minutes_to_ticks(self.config.record_period_minutes as u32)
    }

    /// Add, re-time or drop the periodic FFT after a configuration change
    ///
    /// A pending on-demand FFT is left alone.
    fn schedule_fft(&self) -> Result<(), SchedulerError> {
        match self.config.fft_period_hours {
            0 => {
                let periodic = self
                    .scheduler
                    .timing(TaskId::PerformFft)
                    .is_some_and(|timing| !timing.one_shot);
                if periodic {
                    self.scheduler.remove_task(TaskId::PerformFft);
                    info!("Periodic FFT disabled");
                }
                Ok(())
            }
            hours => {
                let period = hours_to_ticks(hours as u32);
                self.scheduler
                    .add_task(TaskId::PerformFft, period, period, false)
            }
        }
    }

    /// Apply the configured periods to the running schedule
    fn retime_tasks(&self) -> Result<(), SchedulerError> {
        self.scheduler
            .modify_task(TaskId::Heartbeat, 0, self.heartbeat_period(), false)?;

        let period = self.record_period();
        self.scheduler
            .modify_task(TaskId::SendData, period, period, false)?;

        self.schedule_fft()
    }
}

#[cfg(test)]
mod tests {
    use super::test_board::{TestBoard, test_app};
    use super::*;
    use crate::radio::Response;
    use crate::scheduler::TaskScheduler;

    #[test]
    fn test_setup_registers_background_tasks() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let mut app = test_app(&scheduler, TestBoard::default());
        app.setup_tasks().unwrap();

        for id in [
            TaskId::Advertise,
            TaskId::FlashLed,
            TaskId::Heartbeat,
            TaskId::SendData,
            TaskId::VibrationAnalysis,
        ] {
            assert!(scheduler.is_scheduled(id), "{id:?} must be scheduled");
        }
        assert!(
            !scheduler.is_scheduled(TaskId::PerformFft),
            "FFT period 0 keeps the FFT off the schedule"
        );

        let send_data = scheduler.timing(TaskId::SendData).unwrap();
        assert_eq!(send_data.remaining, 0);
        assert_eq!(send_data.period, minutes_to_ticks(60));
        assert!(!send_data.one_shot);
        assert_eq!(
            scheduler.timing(TaskId::Heartbeat).unwrap().period,
            minutes_to_ticks(15)
        );
    }

    #[test]
    fn test_setup_with_fft_period() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let mut app = test_app(&scheduler, TestBoard::default());
        app.config.fft_period_hours = 6;
        app.setup_tasks().unwrap();

        let fft = scheduler.timing(TaskId::PerformFft).unwrap();
        assert_eq!(fft.remaining, hours_to_ticks(6));
        assert_eq!(fft.period, hours_to_ticks(6));
    }

    #[test]
    fn test_config_change_retimes_tasks() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let mut app = test_app(&scheduler, TestBoard::default());
        app.config.fft_period_hours = 2;
        app.setup_tasks().unwrap();

        let mut frame = [0u8; 18];
        frame[0] = 0xA2;
        let mut config = app.config;
        config.heartbeat_period_minutes = 30;
        config.record_period_minutes = 120;
        config.fft_period_hours = 0;
        frame[2..].copy_from_slice(&config.to_bytes());

        app.handle_command(&frame).unwrap();
        app.run_task(TaskId::SaveConfig);

        let heartbeat = scheduler.timing(TaskId::Heartbeat).unwrap();
        assert_eq!(heartbeat.period, minutes_to_ticks(30));
        assert!(!heartbeat.one_shot, "Heartbeat stays periodic");

        let send_data = scheduler.timing(TaskId::SendData).unwrap();
        assert_eq!(send_data.remaining, minutes_to_ticks(120));
        assert_eq!(send_data.period, minutes_to_ticks(120));

        assert!(!scheduler.is_scheduled(TaskId::PerformFft));
        assert_eq!(app.hw.stored_config, Some(config));
        assert_eq!(app.hw.resets, 0);
    }

    #[test]
    fn test_unknown_command_fails() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let mut app = test_app(&scheduler, TestBoard::default());

        assert!(app.handle_command(&[0x01]).is_err());
        assert!(app.handle_command(&[0xAB]).is_err());
        assert_eq!(app.hw.responses, [Response::Failed, Response::Failed]);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_commands_schedule_one_shot_tasks() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let mut app = test_app(&scheduler, TestBoard::default());

        app.handle_command(&[0xA4]).unwrap();
        app.handle_command(&[0xA4]).unwrap();
        app.handle_command(&[0xA3, 3, 0]).unwrap();

        assert_eq!(scheduler.len(), 2, "Repeated commands do not double-schedule");
        assert!(scheduler.timing(TaskId::GetSessionCount).unwrap().one_shot);
        assert_eq!(app.state.download_file, 3);
        assert_eq!(app.hw.responses, [Response::Ok; 3]);

        scheduler.tick_handler();
        assert_eq!(app.dispatch(), 2);
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_get_config_answers_immediately() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let mut app = test_app(&scheduler, TestBoard::default());

        app.handle_command(&[0xA7]).unwrap();
        assert_eq!(
            app.hw.responses,
            [Response::Ok, Response::Config(app.config), Response::Done]
        );
        assert!(scheduler.is_empty());
    }

    #[test]
    fn test_stored_config_is_loaded_at_boot() {
        let scheduler: TaskScheduler = TaskScheduler::new();
        let mut board = TestBoard::default();
        let mut config = crate::config::DeviceConfig::default();
        config.record_duration_seconds = 240;
        config.record_period_minutes = 2;
        board.stored_config = Some(config);

        let app = test_app(&scheduler, board);
        assert_eq!(app.config.record_duration_seconds, 240);
        assert_eq!(
            app.config.record_period_minutes, 9,
            "Stored configuration is sanitized again"
        );
    }
}
