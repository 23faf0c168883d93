//! Vibration spectrum analysis
//!
//! A capture of acceleration magnitudes is streamed to the flash scratch area,
//! then processed window by window (DC removal, adaptive gain, Hamming window,
//! 4096-point Q15 FFT) and averaged into a single magnitude spectrum (Welch
//! method, 1/3 overlap between consecutive windows).

mod analyzer;
mod q15;
mod spectrum;

pub use analyzer::*;
pub use q15::{HammingWindow, Q15Complex, Q15Fft};
pub use spectrum::{SpectrumAverager, WindowProcessor, apply_gain, remove_dc};

use thiserror_no_std::Error;

use crate::storage::SCRATCH_SIZE;

/// Points per FFT window
pub const FFT_SIZE: usize = 4096;

/// Bins kept from each window (the upper half mirrors the lower half)
pub const FFT_BINS: usize = FFT_SIZE / 2;

/// Distance between the starts of two consecutive windows
pub const FFT_HOP: usize = FFT_SIZE * 2 / 3;

/// Magnitudes captured per FFT run, filling the scratch area
pub const CAPTURE_SAMPLES: usize = SCRATCH_SIZE as usize / 2;

/// Bytes written to the scratch area per flash program operation
pub const CAPTURE_CHUNK_BYTES: usize = 32;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FftError {
    #[error("Buffer holds {actual} values, {expected} expected")]
    LengthMismatch { expected: usize, actual: usize },
}

/// Number of full windows in a capture of `samples` magnitudes
pub const fn window_count(samples: usize) -> usize {
    if samples < FFT_SIZE {
        0
    } else {
        (samples - FFT_SIZE) / FFT_HOP + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_geometry() {
        assert_eq!(CAPTURE_SAMPLES, 98_304);
        assert_eq!(FFT_HOP, 2730);
        assert_eq!(window_count(CAPTURE_SAMPLES), 35);
        assert_eq!(window_count(FFT_SIZE - 1), 0);
        assert_eq!(window_count(FFT_SIZE + FFT_HOP), 2);
    }
}
