//! Messages exchanged with the gateway (LoRaWAN uplinks) and the BLE central
//!
//! The radio stacks themselves are board support; the tasks only see the
//! [`Uplink`] trait.

use alloc::vec::Vec;

use thiserror_no_std::Error;

use crate::config::DeviceConfig;
use crate::storage::{DataPacket, FftHeader};

/// Largest BLE notification payload used by downloads
pub const CHUNK_SIZE: usize = 32;

pub type Chunk = heapless::Vec<u8, CHUNK_SIZE>;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioError {
    #[error("Not joined to a network")]
    NotJoined,
    #[error("No central connected")]
    NotConnected,
    #[error("Radio is busy")]
    Busy,
    #[error("Payload of {len} bytes exceeds {max}")]
    PayloadTooLarge { len: usize, max: usize },
    #[error("Transport error: {0}")]
    Transport(&'static str),
}

/// Payload sent by a task
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UplinkMessage {
    /// Periodic liveness report
    Heartbeat {
        data_sessions: u16,
        fft_sessions: u16,
        flash_usage: u8,
    },
    /// Averaged packet of a recording session
    Data(DataPacket),
    /// Vibration trend samples, oldest first
    Vibration(Vec<u16>),
    /// Summary of a stored FFT record
    FftReady {
        header: FftHeader,
        peak_bin: u16,
        peak_magnitude: u16,
    },
    /// Piece of a file being downloaded over BLE
    Chunk(Chunk),
}

impl UplinkMessage {
    /// LoRaWAN application port of the message
    pub const fn port(&self) -> u8 {
        match self {
            Self::Heartbeat { .. } => 1,
            Self::Data(_) => 2,
            Self::Vibration(_) => 3,
            Self::FftReady { .. } => 4,
            Self::Chunk(_) => 0,
        }
    }

    /// Little-endian wire payload
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Self::Heartbeat {
                data_sessions,
                fft_sessions,
                flash_usage,
            } => {
                out.extend_from_slice(&data_sessions.to_le_bytes());
                out.extend_from_slice(&fft_sessions.to_le_bytes());
                out.push(*flash_usage);
            }
            Self::Data(packet) => out.extend_from_slice(&packet.to_bytes()),
            Self::Vibration(samples) => {
                for sample in samples {
                    out.extend_from_slice(&sample.to_le_bytes());
                }
            }
            Self::FftReady {
                header,
                peak_bin,
                peak_magnitude,
            } => {
                out.extend_from_slice(&header.to_bytes());
                out.extend_from_slice(&peak_bin.to_le_bytes());
                out.extend_from_slice(&peak_magnitude.to_le_bytes());
            }
            Self::Chunk(bytes) => out.extend_from_slice(bytes),
        }
        out
    }
}

/// Identification block returned by the device info command
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub panel_number: u16,
    pub pcba_number: u8,
    pub firmware: (u8, u8, u8),
    pub hardware: (u8, u8),
    pub batch_number: u32,
}

impl DeviceInfo {
    pub const SIZE: usize = 12;

    /// Firmware version of this build
    pub fn firmware_version() -> (u8, u8, u8) {
        let mut parts = env!("CARGO_PKG_VERSION")
            .split('.')
            .map(|part| part.parse::<u8>().unwrap_or(0));
        (
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
            parts.next().unwrap_or(0),
        )
    }

    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let (major, minor, patch) = self.firmware;
        let (hw_major, hw_minor) = self.hardware;
        let mut bytes = [0u8; Self::SIZE];
        bytes[0..2].copy_from_slice(&self.panel_number.to_le_bytes());
        bytes[2] = self.pcba_number;
        bytes[3] = patch;
        bytes[4] = minor;
        bytes[5] = major;
        bytes[6] = hw_minor;
        bytes[7] = hw_major;
        bytes[8..12].copy_from_slice(&self.batch_number.to_le_bytes());
        bytes
    }
}

/// Reply to the BLE central
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Response {
    /// Command accepted
    Ok,
    /// Command completed
    Done,
    Failed,
    /// Nothing to send back
    Empty,
    SessionCount(u16),
    FftCount(u16),
    Config(DeviceConfig),
    DeviceInfo(DeviceInfo),
}

impl Response {
    pub const OK: u8 = 0xE0;
    pub const DONE: u8 = 0xE1;
    pub const FAILED: u8 = 0xE2;
    pub const EMPTY: u8 = 0xE3;

    pub fn encode(&self) -> Vec<u8> {
        match self {
            Self::Ok => alloc::vec![Self::OK],
            Self::Done => alloc::vec![Self::DONE],
            Self::Failed => alloc::vec![Self::FAILED],
            Self::Empty => alloc::vec![Self::EMPTY],
            Self::SessionCount(count) | Self::FftCount(count) => count.to_le_bytes().to_vec(),
            Self::Config(config) => config.to_bytes().to_vec(),
            Self::DeviceInfo(info) => info.to_bytes().to_vec(),
        }
    }
}

/// LoRaWAN uplink and BLE link
pub trait Uplink {
    /// Queue a message for the gateway, or the central while one is connected
    fn send(&mut self, message: &UplinkMessage) -> Result<(), RadioError>;

    /// Answer the BLE central. Dropped when nobody is connected.
    fn respond(&mut self, response: Response);

    fn start_advertising(&mut self);

    fn stop_advertising(&mut self);

    /// Whether a BLE central is connected
    fn is_connected(&self) -> bool;

    fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            firmware: DeviceInfo::firmware_version(),
            ..Default::default()
        }
    }
}
