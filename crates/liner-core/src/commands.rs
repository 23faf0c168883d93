//! Single-byte command opcodes received over BLE or as LoRaWAN downlinks

use thiserror_no_std::Error;

use crate::config::DeviceConfig;

/// Longest command frame accepted
pub const MAX_COMMAND_LEN: usize = 20;

/// Offset of the configuration block in a set-config frame
const CONFIG_OFFSET: usize = 2;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,
    #[error("Command of {0} bytes is too long")]
    TooLong(usize),
    #[error("Unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("Opcode {0:#04x} is not supported")]
    Unsupported(u8),
    #[error("Opcode {opcode:#04x} needs {expected} bytes, got {actual}")]
    Truncated {
        opcode: u8,
        expected: usize,
        actual: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    SetConfig(DeviceConfig),
    /// Download a data file, by file index
    DownloadData(u16),
    DownloadFft(u16),
    GetSessionCount,
    GetFftCount,
    GetDeviceInfo,
    EraseMemory,
    GetConfig,
    EraseData,
    EraseFft,
    PowerOff,
    RequestData,
    PerformFft,
    Restart,
}

impl Command {
    pub const SET_CONFIG: u8 = 0xA2;
    pub const DOWNLOAD_DATA: u8 = 0xA3;
    pub const GET_SESSION_COUNT: u8 = 0xA4;
    pub const GET_DEVICE_INFO: u8 = 0xA5;
    pub const ERASE_MEMORY: u8 = 0xA6;
    pub const GET_CONFIG: u8 = 0xA7;
    pub const ERASE_DATA: u8 = 0xA8;
    pub const PERFORM_FFT: u8 = 0xA9;
    pub const GET_LORA_KEYS: u8 = 0xAB;
    pub const ERASE_FFT: u8 = 0xAC;
    pub const DOWNLOAD_FFT: u8 = 0xAD;
    pub const GET_FFT_COUNT: u8 = 0xAE;
    pub const REQUEST_DATA: u8 = 0xAF;
    pub const RESTART: u8 = 0x72;
    pub const POWER_OFF: u8 = 0x73;

    /// Decode a command frame
    ///
    /// Download frames may carry the file index as a little-endian `u16` after
    /// the opcode; without it file 0 is downloaded.
    pub fn parse(frame: &[u8]) -> Result<Self, CommandError> {
        let (&opcode, args) = frame.split_first().ok_or(CommandError::Empty)?;
        if frame.len() > MAX_COMMAND_LEN {
            return Err(CommandError::TooLong(frame.len()));
        }

        let command = match opcode {
            Self::SET_CONFIG => {
                let end = CONFIG_OFFSET + DeviceConfig::SIZE;
                let block = frame.get(CONFIG_OFFSET..end).ok_or(CommandError::Truncated {
                    opcode,
                    expected: end,
                    actual: frame.len(),
                })?;
                let config = DeviceConfig::from_slice(block).map_err(|_| CommandError::Truncated {
                    opcode,
                    expected: end,
                    actual: frame.len(),
                })?;
                Self::SetConfig(config)
            }
            Self::DOWNLOAD_DATA => Self::DownloadData(file_index(args)),
            Self::DOWNLOAD_FFT => Self::DownloadFft(file_index(args)),
            Self::GET_SESSION_COUNT => Self::GetSessionCount,
            Self::GET_FFT_COUNT => Self::GetFftCount,
            Self::GET_DEVICE_INFO => Self::GetDeviceInfo,
            Self::ERASE_MEMORY => Self::EraseMemory,
            Self::GET_CONFIG => Self::GetConfig,
            Self::ERASE_DATA => Self::EraseData,
            Self::ERASE_FFT => Self::EraseFft,
            Self::POWER_OFF => Self::PowerOff,
            Self::REQUEST_DATA => Self::RequestData,
            Self::PERFORM_FFT => Self::PerformFft,
            Self::RESTART => Self::Restart,
            Self::GET_LORA_KEYS => return Err(CommandError::Unsupported(opcode)),
            other => return Err(CommandError::UnknownOpcode(other)),
        };
        Ok(command)
    }

    /// Decode a LoRaWAN downlink, sent as ASCII hex
    pub fn parse_hex(text: &[u8]) -> Result<Self, CommandError> {
        if text.len() % 2 != 0 || text.len() > MAX_COMMAND_LEN * 2 {
            return Err(CommandError::TooLong(text.len()));
        }
        let mut frame: heapless::Vec<u8, MAX_COMMAND_LEN> = heapless::Vec::new();
        for pair in text.chunks_exact(2) {
            let byte = core::str::from_utf8(pair)
                .ok()
                .and_then(|digits| u8::from_str_radix(digits, 16).ok())
                .ok_or(CommandError::Empty)?;
            frame
                .push(byte)
                .map_err(|_| CommandError::TooLong(text.len() / 2))?;
        }
        Self::parse(&frame)
    }
}

fn file_index(args: &[u8]) -> u16 {
    match args {
        [lo, hi, ..] => u16::from_le_bytes([*lo, *hi]),
        _ => 0,
    }
}
