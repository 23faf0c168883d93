//! FFT and vibration trend tasks

use alloc::vec;

use embedded_storage::nor_flash::NorFlash;
use log::{error, info};

use crate::app_state::{App, AppError, Hardware};
use crate::fft::{FFT_BINS, VibrationAnalyzer};
use crate::radio::UplinkMessage;
use crate::sensors::ImuProfile;
use crate::storage::{FftHeader, FileSystem, StoreError, spectrum_to_bytes};

/// Trend samples accumulated before they are uplinked
pub const VIBRATION_SAMPLES_PER_UPLINK: u32 = 10;

/// Strongest bin of `spectrum`, DC excluded
fn spectrum_peak(spectrum: &[u16]) -> (u16, u16) {
    spectrum
        .iter()
        .enumerate()
        .skip(1)
        .max_by_key(|&(_, &magnitude)| magnitude)
        .map(|(bin, &magnitude)| (bin as u16, magnitude))
        .unwrap_or((0, 0))
}

impl<F, D, H> App<'_, F, D, H>
where
    F: FileSystem,
    D: NorFlash,
    H: Hardware,
{
    /// Capture a vibration spectrum, store it as an FFT session and uplink its summary
    ///
    /// Returns the stored header.
    pub fn perform_fft(&mut self) -> Result<FftHeader, AppError> {
        info!("### FFT TASK ###");
        if let Some(state) = self.store.busy() {
            return Err(StoreError::Busy(state).into());
        }

        let mut spectrum = vec![0u16; FFT_BINS];
        let mut analyzer = VibrationAnalyzer::new();
        let summary = {
            let mut scratch = self.store.scratch();
            analyzer.compute_fft(
                &mut self.hw,
                &mut scratch,
                self.config.accelerometer_range,
                self.config.imu_frequency,
                &mut spectrum,
            )
        };
        info!(
            "FFT done: {} windows over {} samples, gain {}",
            summary.windows, summary.samples, summary.gain
        );

        let mut header = FftHeader {
            fft_id: 0,
            gain: summary.gain,
            freq: self.config.imu_frequency.code(),
        };
        header.fft_id = self.store.create_fft_session(header)?;

        let written = self.store.record_fft_packet(&spectrum_to_bytes(&spectrum));
        let closed = self.store.close_fft_session();
        written?;
        closed?;

        let (peak_bin, peak_magnitude) = spectrum_peak(&spectrum);
        info!(
            "FFT {} stored, peak at bin {} ({})",
            header.fft_id, peak_bin, peak_magnitude
        );
        self.hw.send(&UplinkMessage::FftReady {
            header,
            peak_bin,
            peak_magnitude,
        })?;
        Ok(header)
    }

    pub(super) fn vibration_analysis(&mut self) -> Result<(), AppError> {
        info!("### VIBRATION ANALYSIS TASK ###");
        let module = self.vibration_module()?;
        let count = self.store.append_vibration_sample(module)?;
        info!("Vibration module {} ({} stored)", module, count);

        if count >= VIBRATION_SAMPLES_PER_UPLINK {
            let samples = self.store.vibration_samples()?;
            self.hw.send(&UplinkMessage::Vibration(samples))?;
            self.store.remove_vibration_data()?;
        }
        self.hw.kick_watchdog();
        Ok(())
    }

    /// Module of the accelerometer RMS vector
    fn vibration_module(&mut self) -> Result<u16, AppError> {
        let profile = ImuProfile::Recording {
            accel_range: self.config.accelerometer_range,
            gyro_range: self.config.gyroscope_range,
            frequency: self.config.imu_frequency,
        };
        if let Err(e) = self.hw.configure(profile) {
            error!("IMU configuration failed: {}", e);
            return Err(e.into());
        }
        let sample = self.hw.rms_sample();
        self.hw.shutdown();
        Ok(sample?.accel_module())
    }
}
