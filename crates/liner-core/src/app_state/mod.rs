//! Application-wide state and error types
//!
//! [`App`] owns everything the tasks share: the record store, the device
//! configuration, the board and the link state. It borrows the scheduler,
//! which lives in a `static` so the tick interrupt can reach it.

mod hardware;

pub use hardware::*;

use embedded_storage::nor_flash::NorFlash;
use log::{error, info, warn};
use thiserror_no_std::Error;

use crate::commands::{Command, CommandError};
use crate::config::{ConfigError, DeviceConfig};
use crate::radio::{RadioError, Response};
use crate::scheduler::{SchedulerError, TaskId, TaskScheduler};
use crate::sensors::SensorError;
use crate::storage::{FileSystem, RecordStore, StoreError};

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppError {
    #[error("Storage error: {0}")]
    Store(StoreError),
    #[error("Scheduler error: {0}")]
    Scheduler(SchedulerError),
    #[error("Sensor error: {0}")]
    Sensor(SensorError),
    #[error("Radio error: {0}")]
    Radio(RadioError),
    #[error("Configuration error: {0}")]
    Config(ConfigError),
    #[error("Command error: {0}")]
    Command(CommandError),
}

impl From<StoreError> for AppError {
    fn from(error: StoreError) -> Self {
        Self::Store(error)
    }
}

impl From<SchedulerError> for AppError {
    fn from(error: SchedulerError) -> Self {
        Self::Scheduler(error)
    }
}

impl From<SensorError> for AppError {
    fn from(error: SensorError) -> Self {
        Self::Sensor(error)
    }
}

impl From<RadioError> for AppError {
    fn from(error: RadioError) -> Self {
        Self::Radio(error)
    }
}

impl From<ConfigError> for AppError {
    fn from(error: ConfigError) -> Self {
        Self::Config(error)
    }
}

impl From<CommandError> for AppError {
    fn from(error: CommandError) -> Self {
        Self::Command(error)
    }
}

/// Link and download state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AppState {
    /// BLE advertising is running
    pub advertising: bool,
    /// File index requested by the last download command
    pub download_file: u16,
}

/// Main application state container
pub struct App<'a, F, D, H>
where
    F: FileSystem,
    D: NorFlash,
    H: Hardware,
{
    pub(crate) scheduler: &'a TaskScheduler,
    pub store: RecordStore<F, D>,
    pub hw: H,
    pub config: DeviceConfig,
    pub state: AppState,
}

impl<'a, F, D, H> App<'a, F, D, H>
where
    F: FileSystem,
    D: NorFlash,
    H: Hardware,
{
    /// Assemble the application, loading the stored configuration
    ///
    /// Missing or corrupted configuration falls back to the defaults.
    pub fn new(scheduler: &'a TaskScheduler, store: RecordStore<F, D>, mut hw: H) -> Self {
        let config = match hw.load_config() {
            Some(config) => config.sanitized(),
            None => {
                warn!("No stored configuration, using defaults");
                DeviceConfig::default()
            }
        };

        Self {
            scheduler,
            store,
            hw,
            config,
            state: AppState::default(),
        }
    }

    pub fn scheduler(&self) -> &'a TaskScheduler {
        self.scheduler
    }

    /// Mount the store and register the background tasks
    ///
    /// Flash problems are logged and the tag keeps running; only a task table
    /// overflow is reported.
    pub fn start(&mut self) -> Result<(), AppError> {
        match self.store.enable() {
            Ok(()) => {
                if let Err(e) = self.store.self_test() {
                    error!("Flash self-test failed: {}", e);
                }
            }
            Err(e) => error!("Flash enable failed: {}", e),
        }

        info!("Configuration: {:?}", self.config);
        self.setup_tasks()?;
        Ok(())
    }

    /// Execute a command frame received over BLE or LoRaWAN
    ///
    /// Work that touches flash or sensors is scheduled as a one-shot task and
    /// acknowledged with [`Response::Ok`]; the task answers when it completes.
    pub fn handle_command(&mut self, frame: &[u8]) -> Result<(), AppError> {
        let command = match Command::parse(frame) {
            Ok(command) => command,
            Err(e) => {
                warn!("Rejected command: {}", e);
                self.hw.respond(Response::Failed);
                return Err(e.into());
            }
        };
        info!("Command {:?}", command);

        let task = match command {
            Command::SetConfig(config) => {
                self.config = config;
                TaskId::SaveConfig
            }
            Command::DownloadData(file) => {
                self.state.download_file = file;
                TaskId::DownloadData
            }
            Command::DownloadFft(file) => {
                self.state.download_file = file;
                TaskId::DownloadFft
            }
            Command::GetSessionCount => TaskId::GetSessionCount,
            Command::GetFftCount => TaskId::GetFftCount,
            Command::EraseMemory => TaskId::EraseAll,
            Command::EraseData => TaskId::EraseData,
            Command::EraseFft => TaskId::EraseFft,
            Command::PowerOff => TaskId::PowerOff,
            Command::RequestData => TaskId::DataRequest,
            Command::PerformFft => TaskId::PerformFft,
            Command::GetConfig => {
                self.hw.respond(Response::Ok);
                self.hw.respond(Response::Config(self.config));
                self.hw.respond(Response::Done);
                return Ok(());
            }
            Command::GetDeviceInfo => {
                let info = self.hw.device_info();
                self.hw.respond(Response::Ok);
                self.hw.respond(Response::DeviceInfo(info));
                self.hw.respond(Response::Done);
                return Ok(());
            }
            Command::Restart => {
                info!("Restarting");
                self.hw.system_reset();
                return Ok(());
            }
        };

        if let Err(e) = self.scheduler.add_task(task, 0, 0, true) {
            error!("Cannot schedule {:?}: {}", task, e);
            self.hw.respond(Response::Failed);
            return Err(e.into());
        }
        self.hw.respond(Response::Ok);
        Ok(())
    }
}
