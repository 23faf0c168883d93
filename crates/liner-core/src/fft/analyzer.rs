use alloc::vec;
use alloc::vec::Vec;

use embedded_storage::nor_flash::NorFlash;
use log::{debug, error, info, warn};

use super::spectrum::{SpectrumAverager, WindowProcessor};
use super::{CAPTURE_CHUNK_BYTES, CAPTURE_SAMPLES, FFT_BINS, FFT_HOP, FFT_SIZE};
use crate::app_state::Board;
use crate::config::{AccelRange, ImuFrequency};
use crate::sensors::{ImuProfile, MotionSensor};
use crate::storage::ScratchRegion;

/// Gain that stretches the largest deviation from `mean` to full scale
///
/// `gain * max(|mean - max|, |mean - min|)` never exceeds `i16::MAX`. A flat
/// capture has no deviation and gets a gain of 1.
pub fn compute_gain(mean: i16, min: i16, max: i16) -> i16 {
    let spread = (mean as i32 - max as i32)
        .abs()
        .max((mean as i32 - min as i32).abs());
    if spread == 0 {
        return 1;
    }
    (i16::MAX as i32 / spread).clamp(1, i16::MAX as i32) as i16
}

/// Running statistics of a capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureStats {
    pub min: i16,
    pub max: i16,
    sum: i64,
    pub count: u32,
}

impl Default for CaptureStats {
    fn default() -> Self {
        Self {
            min: i16::MAX,
            max: i16::MIN,
            sum: 0,
            count: 0,
        }
    }
}

impl CaptureStats {
    pub fn push(&mut self, sample: i16) {
        self.min = self.min.min(sample);
        self.max = self.max.max(sample);
        self.sum += sample as i64;
        self.count += 1;
    }

    pub fn mean(&self) -> i16 {
        if self.count == 0 {
            return 0;
        }
        (self.sum / self.count as i64) as i16
    }

    pub fn gain(&self) -> i16 {
        if self.count == 0 {
            return 1;
        }
        compute_gain(self.mean(), self.min, self.max)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capture {
    pub stats: CaptureStats,
    /// Samples that repeat the previous value because the IMU read failed
    pub failed_reads: u32,
}

/// Outcome of one FFT run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FftSummary {
    pub gain: i16,
    pub samples: u32,
    pub windows: u32,
    pub failed_reads: u32,
}

/// Stream `samples` acceleration magnitudes from the IMU into the scratch area
///
/// Sensor and flash errors are logged and the capture carries on: a failed
/// IMU read repeats the last good sample, a failed flash write loses that
/// chunk.
pub fn capture<H, D>(
    board: &mut H,
    scratch: &mut ScratchRegion<'_, D>,
    profile: ImuProfile,
    samples: usize,
) -> Capture
where
    H: MotionSensor + Board,
    D: NorFlash,
{
    let samples = samples.min(scratch.len() as usize / 2);

    if let Err(e) = board.configure(profile) {
        error!("IMU configuration for FFT failed: {}", e);
    }
    if let Err(e) = scratch.erase() {
        error!("Scratch erase failed: {:?}", e);
    }

    let mut stats = CaptureStats::default();
    let mut failed_reads = 0u32;
    let mut last = 0i16;
    let mut chunk = [0u8; CAPTURE_CHUNK_BYTES];
    let mut fill = 0usize;
    let mut offset = 0u32;

    for _ in 0..samples {
        match board.next_sample() {
            Ok(sample) => last = sample.accel_norm(),
            Err(e) => {
                if failed_reads == 0 {
                    warn!("IMU read failed during capture: {}", e);
                }
                failed_reads += 1;
            }
        }
        stats.push(last);

        chunk[fill..fill + 2].copy_from_slice(&last.to_le_bytes());
        fill += 2;
        if fill == CAPTURE_CHUNK_BYTES {
            if let Err(e) = scratch.write(offset, &chunk) {
                error!("Scratch write at {} failed: {:?}", offset, e);
            }
            offset += CAPTURE_CHUNK_BYTES as u32;
            fill = 0;
            board.kick_watchdog();
        }
    }
    if fill > 0 {
        if let Err(e) = scratch.write(offset, &chunk[..fill]) {
            error!("Scratch write at {} failed: {:?}", offset, e);
        }
    }

    board.shutdown();

    if failed_reads > 0 {
        warn!("{} of {} IMU reads failed", failed_reads, samples);
    }
    Capture {
        stats,
        failed_reads,
    }
}

/// FFT pipeline state, sized for [`FFT_SIZE`]-point windows
pub struct VibrationAnalyzer {
    processor: WindowProcessor<FFT_SIZE>,
    averager: SpectrumAverager,
    window: Vec<i16>,
    raw: Vec<u8>,
    magnitudes: Vec<u16>,
}

impl Default for VibrationAnalyzer {
    fn default() -> Self {
        Self::new()
    }
}

impl VibrationAnalyzer {
    pub fn new() -> Self {
        Self {
            processor: WindowProcessor::new(),
            averager: SpectrumAverager::new(FFT_BINS),
            window: vec![0; FFT_SIZE],
            raw: vec![0; FFT_SIZE * 2],
            magnitudes: vec![0; FFT_BINS],
        }
    }

    /// Capture a full scratch area of vibration and write its averaged
    /// magnitude spectrum (`FFT_BINS` values) to `spectrum`
    pub fn compute_fft<H, D>(
        &mut self,
        board: &mut H,
        scratch: &mut ScratchRegion<'_, D>,
        accel_range: AccelRange,
        frequency: ImuFrequency,
        spectrum: &mut [u16],
    ) -> FftSummary
    where
        H: MotionSensor + Board,
        D: NorFlash,
    {
        let profile = ImuProfile::Fft {
            accel_range,
            frequency,
        };
        self.compute_fft_over(board, scratch, profile, CAPTURE_SAMPLES, spectrum)
    }

    /// [`Self::compute_fft`] over a capture of `samples` magnitudes
    pub fn compute_fft_over<H, D>(
        &mut self,
        board: &mut H,
        scratch: &mut ScratchRegion<'_, D>,
        profile: ImuProfile,
        samples: usize,
        spectrum: &mut [u16],
    ) -> FftSummary
    where
        H: MotionSensor + Board,
        D: NorFlash,
    {
        let capture = capture(board, scratch, profile, samples);
        let gain = capture.stats.gain();
        info!(
            "Captured {} samples (mean {}, min {}, max {}), gain {}",
            capture.stats.count,
            capture.stats.mean(),
            capture.stats.min,
            capture.stats.max,
            gain
        );

        let windows =
            self.welch_average(board, scratch, capture.stats.count as usize, gain, spectrum);

        FftSummary {
            gain,
            samples: capture.stats.count,
            windows,
            failed_reads: capture.failed_reads,
        }
    }

    /// Average the spectra of every full window of the capture
    ///
    /// Windows start every [`FFT_HOP`] samples. Returns the number of windows.
    pub fn welch_average<H, D>(
        &mut self,
        board: &mut H,
        scratch: &mut ScratchRegion<'_, D>,
        samples: usize,
        gain: i16,
        spectrum: &mut [u16],
    ) -> u32
    where
        H: Board,
        D: NorFlash,
    {
        self.averager.reset();

        let mut start = 0usize;
        while start + FFT_SIZE <= samples {
            match scratch.read((start * 2) as u32, &mut self.raw) {
                Ok(()) => {
                    for (sample, bytes) in self.window.iter_mut().zip(self.raw.chunks_exact(2)) {
                        *sample = i16::from_le_bytes([bytes[0], bytes[1]]);
                    }
                    match self
                        .processor
                        .process(&mut self.window, gain, &mut self.magnitudes)
                    {
                        Ok(()) => self.averager.accumulate(&self.magnitudes),
                        Err(e) => error!("Window at {} failed: {}", start, e),
                    }
                }
                Err(e) => error!("Scratch read at {} failed: {:?}", start, e),
            }

            debug!("Window {} done", self.averager.windows());
            board.kick_watchdog();
            start += FFT_HOP;
        }

        self.averager.write_to(spectrum);
        if spectrum.len() > FFT_BINS {
            spectrum[FFT_BINS..].fill(0);
        }
        self.averager.windows()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensors::{MotionSample, SensorError};
    use crate::storage::MemFlash;
    use crate::storage::SCRATCH_SIZE;
    use core::f32::consts::PI;

    /// IMU producing `base + amplitude * sin(2π i / period)` on the Z axis
    struct SineImu {
        index: usize,
        base: f32,
        amplitude: f32,
        period: usize,
        fail_every: Option<usize>,
        configured: Option<ImuProfile>,
        kicks: u32,
    }

    impl SineImu {
        fn new(base: f32, amplitude: f32, period: usize) -> Self {
            Self {
                index: 0,
                base,
                amplitude,
                period,
                fail_every: None,
                configured: None,
                kicks: 0,
            }
        }
    }

    fn sine(base: f32, amplitude: f32, period: usize, i: usize) -> i16 {
        let phase = (i % period) as f32 / period as f32;
        (base + amplitude * libm::sinf(2.0 * PI * phase)) as i16
    }

    impl MotionSensor for SineImu {
        fn configure(&mut self, profile: ImuProfile) -> Result<(), SensorError> {
            self.configured = Some(profile);
            Ok(())
        }

        fn shutdown(&mut self) {
            self.configured = None;
        }

        fn next_sample(&mut self) -> Result<MotionSample, SensorError> {
            let i = self.index;
            self.index += 1;
            if self.fail_every.is_some_and(|n| i % n == n - 1) {
                return Err(SensorError::Timeout { sensor: "test IMU" });
            }
            Ok(MotionSample {
                accel: [0, 0, sine(self.base, self.amplitude, self.period, i)],
                gyro: [0; 3],
            })
        }

        fn rms_sample(&mut self) -> Result<MotionSample, SensorError> {
            self.next_sample()
        }
    }

    impl Board for SineImu {
        fn kick_watchdog(&mut self) {
            self.kicks += 1;
        }
        fn flash_led(&mut self) {}
        fn power_off(&mut self) {}
        fn system_reset(&mut self) {}
    }

    const PROFILE: ImuProfile = ImuProfile::Fft {
        accel_range: AccelRange::G4,
        frequency: ImuFrequency::Hz1600,
    };

    #[test]
    fn test_gain_is_bounded() {
        let cases = [
            (4096, 3000, 5000),
            (0, -1, 1),
            (100, 100, 32_000),
            (-20_000, i16::MIN, 10),
            (7, 7, 8),
        ];
        for (mean, min, max) in cases {
            let gain = compute_gain(mean, min, max);
            let spread = (mean as i32 - max as i32)
                .abs()
                .max((mean as i32 - min as i32).abs());
            assert!(gain >= 1, "gain must be positive for {mean}/{min}/{max}");
            assert!(
                gain as i32 * spread <= i16::MAX as i32,
                "gain {gain} overflows spread {spread}"
            );
        }
        assert_eq!(compute_gain(4096, 3000, 5000), 32_767 / 1096);
    }

    #[test]
    fn test_flat_capture_has_unit_gain() {
        assert_eq!(compute_gain(500, 500, 500), 1);
        assert_eq!(CaptureStats::default().gain(), 1);
    }

    #[test]
    fn test_capture_streams_magnitudes_to_scratch() {
        let mut flash = MemFlash::new(SCRATCH_SIZE as usize);
        let mut imu = SineImu::new(4000.0, 0.0, 10);
        imu.fail_every = Some(5);

        let mut scratch = ScratchRegion::new(&mut flash, 0, SCRATCH_SIZE);
        let result = capture(&mut imu, &mut scratch, PROFILE, 100);

        assert_eq!(result.stats.count, 100);
        assert_eq!(result.failed_reads, 20);
        assert_eq!(result.stats.mean(), 4000);
        assert_eq!(imu.kicks, 100 * 2 / CAPTURE_CHUNK_BYTES as u32);
        assert!(imu.configured.is_none(), "IMU is shut down after the capture");

        let mut bytes = [0u8; 200];
        scratch.read(0, &mut bytes).unwrap();
        assert!(
            bytes
                .chunks_exact(2)
                .all(|pair| i16::from_le_bytes([pair[0], pair[1]]) == 4000),
            "Failed reads repeat the previous sample"
        );
        assert_eq!(flash.as_bytes()[200], 0xFF, "Nothing written past the capture");
    }

    #[test]
    fn test_identical_windows_average_to_single_window() {
        let samples = FFT_SIZE + FFT_HOP;
        let mut flash = MemFlash::new(SCRATCH_SIZE as usize);
        // Period divides the hop, so both windows see the same samples
        let mut imu = SineImu::new(4000.0, 800.0, 10);

        let mut scratch = ScratchRegion::new(&mut flash, 0, SCRATCH_SIZE);
        let mut analyzer = VibrationAnalyzer::new();
        let mut spectrum = vec![0u16; FFT_BINS];
        let summary = analyzer.compute_fft_over(&mut imu, &mut scratch, PROFILE, samples, &mut spectrum);
        assert_eq!(summary.windows, 2);

        let mut first_window: Vec<i16> = (0..FFT_SIZE).map(|i| sine(4000.0, 800.0, 10, i)).collect();
        let mut expected = vec![0u16; FFT_BINS];
        WindowProcessor::<FFT_SIZE>::new()
            .process(&mut first_window, summary.gain, &mut expected)
            .unwrap();

        assert_eq!(spectrum, expected);
    }

    #[test]
    fn test_spectrum_peaks_at_vibration_frequency() {
        // 100 Hz at 1600 Hz sampling lands on bin 100 * 4096 / 1600 = 256
        let samples = FFT_SIZE + 3 * FFT_HOP;
        let mut flash = MemFlash::new(SCRATCH_SIZE as usize);
        let mut imu = SineImu::new(4096.0, 300.0, 16);

        let mut scratch = ScratchRegion::new(&mut flash, 0, SCRATCH_SIZE);
        let mut analyzer = VibrationAnalyzer::new();
        let mut spectrum = vec![0u16; FFT_BINS];
        let summary = analyzer.compute_fft_over(&mut imu, &mut scratch, PROFILE, samples, &mut spectrum);

        assert_eq!(summary.windows, 4);
        assert!((100..=110).contains(&summary.gain), "gain {}", summary.gain);
        let peak = (1..FFT_BINS).max_by_key(|&bin| spectrum[bin]).unwrap();
        assert_eq!(peak, 256);
        assert!(spectrum[256] > 5_000, "Peak magnitude {}", spectrum[256]);
    }

    #[test]
    fn test_short_capture_has_no_window() {
        let mut flash = MemFlash::new(SCRATCH_SIZE as usize);
        let mut imu = SineImu::new(4000.0, 100.0, 10);

        let mut scratch = ScratchRegion::new(&mut flash, 0, SCRATCH_SIZE);
        let mut analyzer = VibrationAnalyzer::new();
        let mut spectrum = vec![7u16; FFT_BINS];
        let summary =
            analyzer.compute_fft_over(&mut imu, &mut scratch, PROFILE, FFT_SIZE - 1, &mut spectrum);

        assert_eq!(summary.windows, 0);
        assert!(spectrum.iter().all(|&bin| bin == 0));
    }
}
