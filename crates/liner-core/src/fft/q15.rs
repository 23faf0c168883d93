//! Q15 fixed-point radix-2 FFT and Hamming window
//!
//! Q15 values represent `value / 32768` in `[-1, 1)`. Every butterfly stage
//! halves its outputs, so the transform never overflows and returns
//! `DFT(x) / N`.

use alloc::vec;
use alloc::vec::Vec;
use core::f32::consts::PI;

use super::FftError;

/// Complex sample in Q15
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Q15Complex {
    pub re: i16,
    pub im: i16,
}

impl Q15Complex {
    pub const fn real(re: i16) -> Self {
        Self { re, im: 0 }
    }

    /// Modulus, saturated to `u16`
    pub fn magnitude(self) -> u16 {
        let re = self.re as f32;
        let im = self.im as f32;
        libm::sqrtf(re * re + im * im).min(u16::MAX as f32) as u16
    }
}

fn to_q15(value: f32) -> i16 {
    libm::roundf(value * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16
}

fn saturate(value: i32) -> i16 {
    value.clamp(i16::MIN as i32, i16::MAX as i32) as i16
}

/// Precomputed radix-2 transform of size `N`
pub struct Q15Fft<const N: usize> {
    /// `(cos, sin)` of `2πk/N` for `k` in `0..N/2`
    twiddles: Vec<(i16, i16)>,
}

impl<const N: usize> Default for Q15Fft<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Q15Fft<N> {
    const SIZE_CHECK: () = assert!(N >= 2 && N.is_power_of_two(), "FFT size must be a power of two");

    pub fn new() -> Self {
        let () = Self::SIZE_CHECK;

        let twiddles = (0..N / 2)
            .map(|k| {
                let angle = 2.0 * PI * k as f32 / N as f32;
                (to_q15(libm::cosf(angle)), to_q15(libm::sinf(angle)))
            })
            .collect();
        Self { twiddles }
    }

    pub const fn size(&self) -> usize {
        N
    }

    /// In-place forward transform of `N` samples
    pub fn process(&self, buf: &mut [Q15Complex]) -> Result<(), FftError> {
        if buf.len() != N {
            return Err(FftError::LengthMismatch {
                expected: N,
                actual: buf.len(),
            });
        }

        // Bit-reversal permutation
        let mut j = 0usize;
        for i in 1..N {
            let mut bit = N >> 1;
            while j & bit != 0 {
                j ^= bit;
                bit >>= 1;
            }
            j |= bit;
            if i < j {
                buf.swap(i, j);
            }
        }

        let mut len = 2;
        while len <= N {
            let half = len / 2;
            let step = N / len;

            for start in (0..N).step_by(len) {
                for k in 0..half {
                    let (wr, ws) = self.twiddles[k * step];
                    let (wr, ws) = (wr as i32, ws as i32);

                    let a = buf[start + k];
                    let b = buf[start + k + half];
                    let (br, bi) = (b.re as i32, b.im as i32);

                    // b * e^(-i 2πk/len)
                    let tr = (br * wr + bi * ws) >> 15;
                    let ti = (bi * wr - br * ws) >> 15;

                    let (ar, ai) = (a.re as i32, a.im as i32);
                    buf[start + k] = Q15Complex {
                        re: saturate((ar + tr) >> 1),
                        im: saturate((ai + ti) >> 1),
                    };
                    buf[start + k + half] = Q15Complex {
                        re: saturate((ar - tr) >> 1),
                        im: saturate((ai - ti) >> 1),
                    };
                }
            }
            len <<= 1;
        }
        Ok(())
    }
}

/// Hamming window coefficients in Q15
pub struct HammingWindow<const N: usize> {
    coefficients: Vec<i16>,
}

impl<const N: usize> Default for HammingWindow<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> HammingWindow<N> {
    pub fn new() -> Self {
        let mut coefficients = vec![0i16; N];
        let span = N.saturating_sub(1).max(1) as f32;
        for (i, c) in coefficients.iter_mut().enumerate() {
            *c = to_q15(0.54 - 0.46 * libm::cosf(2.0 * PI * i as f32 / span));
        }
        Self { coefficients }
    }

    pub fn coefficients(&self) -> &[i16] {
        &self.coefficients
    }

    /// Multiply `samples` by the window, element-wise
    pub fn apply(&self, samples: &mut [i16]) {
        for (sample, &c) in samples.iter_mut().zip(self.coefficients.iter()) {
            *sample = ((*sample as i32 * c as i32) >> 15) as i16;
        }
    }
}
