//! Radio, maintenance and on-demand command tasks

use embedded_storage::nor_flash::NorFlash;
use log::{error, info, warn};

use crate::app_state::{App, AppError, Hardware};
use crate::radio::{CHUNK_SIZE, Chunk, RadioError, Response, UplinkMessage};
use crate::scheduler::TaskId;
use crate::storage::{DataPacket, FileSystem, FsError, StoreError};

/// Ticks the tag stays connectable after each advertise task
pub const ADVERTISING_WINDOW_TICKS: u32 = 5;

fn chunk(bytes: &[u8]) -> Result<Chunk, RadioError> {
    Chunk::from_slice(bytes).map_err(|_| RadioError::PayloadTooLarge {
        len: bytes.len(),
        max: CHUNK_SIZE,
    })
}

impl<F, D, H> App<'_, F, D, H>
where
    F: FileSystem,
    D: NorFlash,
    H: Hardware,
{
    pub(super) fn advertise(&mut self) -> Result<(), AppError> {
        if !self.hw.is_connected() && !self.state.advertising {
            self.hw.start_advertising();
            self.state.advertising = true;
            self.scheduler
                .add_task(TaskId::StopAdvertising, ADVERTISING_WINDOW_TICKS, 0, true)?;
        }
        self.hw.kick_watchdog();
        Ok(())
    }

    pub(super) fn stop_advertising(&mut self) {
        if !self.hw.is_connected() && self.state.advertising {
            self.hw.stop_advertising();
            self.state.advertising = false;
        }
        self.hw.kick_watchdog();
    }

    pub(super) fn flash_led(&mut self) {
        self.hw.flash_led();
        self.hw.kick_watchdog();
    }

    pub(super) fn send_heartbeat(&mut self) -> Result<(), AppError> {
        info!("### SENDING HEART BEAT ###");
        let flash_usage = self.store.usage_percent().unwrap_or_else(|e| {
            warn!("Flash usage unavailable: {}", e);
            0
        });
        let message = UplinkMessage::Heartbeat {
            data_sessions: self.store.get_data_session_count(),
            fft_sessions: self.store.get_fft_session_count(),
            flash_usage,
        };
        let sent = self.hw.send(&message);
        self.hw.kick_watchdog();
        sent.map_err(AppError::from)
    }

    /// Persist the configuration and apply it to the schedule
    ///
    /// A change made over BLE resets the tag instead, which restarts the
    /// radio stack with the new settings.
    pub(super) fn save_config(&mut self) -> Result<(), AppError> {
        info!("### SAVE CONFIG TASK ###");
        let stored = self.hw.store_config(&self.config);
        if let Err(e) = stored {
            error!("Configuration not persisted: {}", e);
        }

        if self.hw.is_connected() {
            info!("The device will reset");
            self.hw.respond(Response::Done);
            self.hw.system_reset();
            return stored.map_err(AppError::from);
        }

        self.retime_tasks()?;
        self.hw.kick_watchdog();
        stored.map_err(AppError::from)
    }

    pub(super) fn download_data(&mut self) -> Result<(), AppError> {
        let file = self.state.download_file;
        info!("### DOWNLOAD DATA FILE {} ###", file);
        let records = match self.store.download_data_file_start(file) {
            Ok(records) => records,
            Err(StoreError::Fs(FsError::NotFound)) => {
                self.hw.respond(Response::Empty);
                return Ok(());
            }
            Err(e) => {
                self.hw.respond(Response::Failed);
                return Err(e.into());
            }
        };

        let streamed = self.stream_data_records(records);
        let stopped = self.store.download_file_stop();
        self.finish_download(streamed, stopped)
    }

    fn stream_data_records(&mut self, records: u32) -> Result<(), AppError> {
        for index in 0..records {
            let packet = self.store.download_data_record(index)?;
            let bytes: [u8; DataPacket::SIZE] = packet.to_bytes();
            self.hw.send(&UplinkMessage::Chunk(chunk(&bytes)?))?;
            self.hw.kick_watchdog();
        }
        Ok(())
    }

    pub(super) fn download_fft(&mut self) -> Result<(), AppError> {
        let file = self.state.download_file;
        info!("### DOWNLOAD FFT FILE {} ###", file);
        match self.store.download_fft_file_start(file) {
            Ok(_) => {}
            Err(StoreError::Fs(FsError::NotFound)) => {
                self.hw.respond(Response::Empty);
                return Ok(());
            }
            Err(e) => {
                self.hw.respond(Response::Failed);
                return Err(e.into());
            }
        }

        let streamed = self.stream_fft_file();
        let stopped = self.store.download_file_stop();
        self.finish_download(streamed, stopped)
    }

    fn stream_fft_file(&mut self) -> Result<(), AppError> {
        let mut buf = [0u8; CHUNK_SIZE];
        let mut offset = 0u32;
        loop {
            let read = self.store.download_fft_chunk(offset, &mut buf)?;
            if read == 0 {
                return Ok(());
            }
            self.hw.send(&UplinkMessage::Chunk(chunk(&buf[..read])?))?;
            self.hw.kick_watchdog();
            offset += read as u32;
        }
    }

    fn finish_download(
        &mut self,
        streamed: Result<(), AppError>,
        stopped: Result<(), StoreError>,
    ) -> Result<(), AppError> {
        let result = streamed.and(stopped.map_err(AppError::from));
        match result {
            Ok(()) => self.hw.respond(Response::Done),
            Err(_) => self.hw.respond(Response::Failed),
        }
        result
    }

    pub(super) fn get_session_count(&mut self) {
        let count = self.store.get_data_session_count();
        info!("Data session count: {}", count);
        self.hw.respond(Response::SessionCount(count));
        self.hw.respond(Response::Done);
    }

    pub(super) fn get_fft_count(&mut self) {
        let count = self.store.get_fft_session_count();
        info!("FFT session count: {}", count);
        self.hw.respond(Response::FftCount(count));
        self.hw.respond(Response::Done);
    }

    pub(super) fn erase_all(&mut self) -> Result<(), AppError> {
        info!("### ERASE ALL TASK ###");
        let result = self.store.erase_all();
        self.answer(result)
    }

    pub(super) fn erase_data(&mut self) -> Result<(), AppError> {
        info!("### ERASE DATA TASK ###");
        let result = self.store.remove_all_data_sessions();
        self.answer(result)
    }

    pub(super) fn erase_fft(&mut self) -> Result<(), AppError> {
        info!("### ERASE FFT TASK ###");
        let result = self.store.remove_all_fft_sessions();
        self.answer(result)
    }

    pub(super) fn power_off(&mut self) {
        info!("### POWER OFF TASK ###");
        if let Err(e) = self.store.disable() {
            warn!("Unmount before power off failed: {}", e);
        }
        self.hw.power_off();
    }

    fn answer(&mut self, result: Result<(), StoreError>) -> Result<(), AppError> {
        match result {
            Ok(()) => {
                self.hw.respond(Response::Done);
                Ok(())
            }
            Err(e) => {
                self.hw.respond(Response::Failed);
                Err(e.into())
            }
        }
    }
}
