//! Binary record formats stored in flash and sent over the air.
//!
//! All records are packed and little-endian:
//! - DataPacket: 18 bytes (one per second of a recording session)
//! - FftHeader: 5 bytes (precedes the spectrum of an FFT record)
//! - RecordCount: 4 bytes (session counters in the `record_count` file)

use alloc::vec::Vec;

use crate::fft::FFT_BINS;

/// Bit set in a channel error byte when the antenna could not be measured
pub const CHANNEL_ERROR_SENSOR: u8 = 0x80;

/// One second of measurements from a data recording session.
///
/// Binary format (little-endian):
/// - record_id: 2 bytes (u16, session the record belongs to)
/// - temp: 2 bytes (u16, raw thermometer value)
/// - accel_mod: 2 bytes (u16, accelerometer RMS module)
/// - gyro_mod: 2 bytes (u16, gyroscope RMS module)
/// - freq_chan_0: 4 bytes (u32, resonant frequency of antenna 0)
/// - freq_chan_1: 4 bytes (u32, resonant frequency of antenna 1)
/// - err_chan_0: 1 byte (u8)
/// - err_chan_1: 1 byte (u8)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DataPacket {
    pub record_id: u16,
    pub temp: u16,
    pub accel_mod: u16,
    pub gyro_mod: u16,
    pub freq_chan_0: u32,
    pub freq_chan_1: u32,
    pub err_chan_0: u8,
    pub err_chan_1: u8,
}

impl DataPacket {
    pub const SIZE: usize = 18;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.record_id.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.temp.to_le_bytes());
        bytes[4..6].copy_from_slice(&self.accel_mod.to_le_bytes());
        bytes[6..8].copy_from_slice(&self.gyro_mod.to_le_bytes());
        bytes[8..12].copy_from_slice(&self.freq_chan_0.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.freq_chan_1.to_le_bytes());
        bytes[16] = self.err_chan_0;
        bytes[17] = self.err_chan_1;
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            record_id: u16::from_le_bytes([bytes[0], bytes[1]]),
            temp: u16::from_le_bytes([bytes[2], bytes[3]]),
            accel_mod: u16::from_le_bytes([bytes[4], bytes[5]]),
            gyro_mod: u16::from_le_bytes([bytes[6], bytes[7]]),
            freq_chan_0: u32::from_le_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]),
            freq_chan_1: u32::from_le_bytes([bytes[12], bytes[13], bytes[14], bytes[15]]),
            err_chan_0: bytes[16],
            err_chan_1: bytes[17],
        }
    }
}

/// Running average of the packets of one recording session
///
/// Error bytes are OR-ed together so any failure during the session shows up
/// in the averaged packet.
#[derive(Debug, Clone, Default)]
pub struct PacketAverager {
    count: u32,
    temp: u64,
    accel_mod: u64,
    gyro_mod: u64,
    freq_chan_0: u64,
    freq_chan_1: u64,
    err_chan_0: u8,
    err_chan_1: u8,
}

impl PacketAverager {
    pub fn push(&mut self, packet: &DataPacket) {
        self.count += 1;
        self.temp += packet.temp as u64;
        self.accel_mod += packet.accel_mod as u64;
        self.gyro_mod += packet.gyro_mod as u64;
        self.freq_chan_0 += packet.freq_chan_0 as u64;
        self.freq_chan_1 += packet.freq_chan_1 as u64;
        self.err_chan_0 |= packet.err_chan_0;
        self.err_chan_1 |= packet.err_chan_1;
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    /// Averaged packet tagged with `record_id`, `None` if nothing was pushed
    pub fn average(&self, record_id: u16) -> Option<DataPacket> {
        if self.count == 0 {
            return None;
        }
        let n = self.count as u64;
        Some(DataPacket {
            record_id,
            temp: (self.temp / n) as u16,
            accel_mod: (self.accel_mod / n) as u16,
            gyro_mod: (self.gyro_mod / n) as u16,
            freq_chan_0: (self.freq_chan_0 / n) as u32,
            freq_chan_1: (self.freq_chan_1 / n) as u32,
            err_chan_0: self.err_chan_0,
            err_chan_1: self.err_chan_1,
        })
    }
}

/// Header written at the start of every FFT record.
///
/// Binary format (little-endian):
/// - fft_id: 2 bytes (u16, FFT session id)
/// - gain: 2 bytes (i16, adaptive gain applied before the transform)
/// - freq: 1 byte (u8, IMU output data rate code of the capture)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FftHeader {
    pub fft_id: u16,
    pub gain: i16,
    pub freq: u8,
}

impl FftHeader {
    pub const SIZE: usize = 5;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.fft_id.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.gain.to_le_bytes());
        bytes[4] = self.freq;
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            fft_id: u16::from_le_bytes([bytes[0], bytes[1]]),
            gain: i16::from_le_bytes([bytes[2], bytes[3]]),
            freq: bytes[4],
        }
    }
}

/// Header plus averaged magnitude spectrum of one FFT session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FftRecord {
    pub header: FftHeader,
    pub spectrum: Vec<u16>,
}

impl FftRecord {
    /// Size of the spectrum payload in bytes
    pub const SPECTRUM_SIZE: usize = FFT_BINS * 2;
    pub const SIZE: usize = FftHeader::SIZE + Self::SPECTRUM_SIZE;

    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != Self::SIZE {
            return None;
        }
        let mut header = [0u8; FftHeader::SIZE];
        header.copy_from_slice(&bytes[..FftHeader::SIZE]);

        let spectrum = bytes[FftHeader::SIZE..]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();

        Some(Self {
            header: FftHeader::from_bytes(&header),
            spectrum,
        })
    }
}

/// Serialize a magnitude spectrum to little-endian bytes
pub fn spectrum_to_bytes(spectrum: &[u16]) -> Vec<u8> {
    spectrum.iter().flat_map(|bin| bin.to_le_bytes()).collect()
}

/// Session counters persisted in the `record_count` file.
///
/// Binary format (little-endian):
/// - session_count: 2 bytes (u16, data sessions created so far)
/// - fft_count: 2 bytes (u16, FFT sessions created so far)
///
/// `0xFFFF` in either field means the counter is saturated and no more
/// sessions of that kind can be created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecordCount {
    pub session_count: u16,
    pub fft_count: u16,
}

impl RecordCount {
    pub const SIZE: usize = 4;
    pub const SATURATED: u16 = u16::MAX;

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.session_count.to_le_bytes());
        bytes[2..4].copy_from_slice(&self.fft_count.to_le_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8; Self::SIZE]) -> Self {
        Self {
            session_count: u16::from_le_bytes([bytes[0], bytes[1]]),
            fft_count: u16::from_le_bytes([bytes[2], bytes[3]]),
        }
    }
}
