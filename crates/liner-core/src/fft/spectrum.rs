//! Per-window processing and spectral averaging

use alloc::vec;
use alloc::vec::Vec;

use super::FftError;
use super::q15::{HammingWindow, Q15Complex, Q15Fft};

/// Subtract the mean of `samples` from each of them. Returns the mean.
pub fn remove_dc(samples: &mut [i16]) -> i16 {
    if samples.is_empty() {
        return 0;
    }
    let sum: i64 = samples.iter().map(|&s| s as i64).sum();
    let mean = (sum / samples.len() as i64) as i16;
    for sample in samples.iter_mut() {
        *sample = sample.saturating_sub(mean);
    }
    mean
}

/// Multiply every sample by `gain`, saturating at the `i16` bounds
pub fn apply_gain(samples: &mut [i16], gain: i16) {
    for sample in samples.iter_mut() {
        *sample = sample.saturating_mul(gain);
    }
}

/// DC removal, gain, Hamming window and FFT of one window of `N` samples
pub struct WindowProcessor<const N: usize> {
    fft: Q15Fft<N>,
    window: HammingWindow<N>,
    work: Vec<Q15Complex>,
}

impl<const N: usize> Default for WindowProcessor<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> WindowProcessor<N> {
    pub const BINS: usize = N / 2;

    pub fn new() -> Self {
        Self {
            fft: Q15Fft::new(),
            window: HammingWindow::new(),
            work: vec![Q15Complex::default(); N],
        }
    }

    /// Process `samples` in place and write the magnitudes of the first `N/2`
    /// bins to `magnitudes`. The mirrored upper half of the spectrum is dropped.
    pub fn process(
        &mut self,
        samples: &mut [i16],
        gain: i16,
        magnitudes: &mut [u16],
    ) -> Result<(), FftError> {
        if samples.len() != N {
            return Err(FftError::LengthMismatch {
                expected: N,
                actual: samples.len(),
            });
        }
        if magnitudes.len() < Self::BINS {
            return Err(FftError::LengthMismatch {
                expected: Self::BINS,
                actual: magnitudes.len(),
            });
        }

        remove_dc(samples);
        apply_gain(samples, gain);
        self.window.apply(samples);

        for (slot, &sample) in self.work.iter_mut().zip(samples.iter()) {
            *slot = Q15Complex::real(sample);
        }
        self.fft.process(&mut self.work)?;

        for (magnitude, bin) in magnitudes.iter_mut().zip(self.work.iter()).take(Self::BINS) {
            *magnitude = bin.magnitude();
        }
        Ok(())
    }
}

/// Running mean of magnitude spectra, `avg += (new - avg) / n`
#[derive(Debug, Clone)]
pub struct SpectrumAverager {
    average: Vec<i32>,
    windows: u32,
}

impl SpectrumAverager {
    pub fn new(bins: usize) -> Self {
        Self {
            average: vec![0; bins],
            windows: 0,
        }
    }

    pub fn reset(&mut self) {
        self.average.fill(0);
        self.windows = 0;
    }

    pub fn accumulate(&mut self, magnitudes: &[u16]) {
        self.windows += 1;
        let n = self.windows as i32;
        for (avg, &new) in self.average.iter_mut().zip(magnitudes.iter()) {
            *avg += (new as i32 - *avg) / n;
        }
    }

    /// Number of windows folded in so far
    pub fn windows(&self) -> u32 {
        self.windows
    }

    /// Write the current average to `out`
    pub fn write_to(&self, out: &mut [u16]) {
        for (slot, &avg) in out.iter_mut().zip(self.average.iter()) {
            *slot = avg.clamp(0, u16::MAX as i32) as u16;
        }
    }
}
