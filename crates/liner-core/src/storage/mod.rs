//! Flash-backed session storage
//!
//! [`RecordStore`] works over two seams:
//! - a [`NorFlash`](embedded_storage::nor_flash::NorFlash) device whose blocks
//!   `[0, FS_BLOCK_OFFSET)` are the raw scratch area for FFT captures
//! - a [`FileSystem`] holding `/data`, `/fft` and the `record_count` metadata
//!   file. On the tag this is the board's littlefs volume on blocks
//!   `[FS_BLOCK_OFFSET, FLASH_BLOCK_COUNT)`; [`RamFileSystem`] stands in for
//!   it on the host.
//!
//! A full erase wipes the flash device and then re-formats the filesystem.

pub mod fs;
pub mod mem_flash;
pub mod ram_fs;
pub mod records;
pub mod scratch;
pub mod store;

pub use fs::{DirEntry, EntryKind, FileHandle, FileSystem, FsError, OpenOptions};
pub use mem_flash::MemFlash;
pub use ram_fs::RamFileSystem;
pub use records::*;
pub use scratch::ScratchRegion;
pub use store::{BusyState, RecordStore, StoreError};

/// Erase block size of the external flash and littlefs block size
pub const FS_BLOCK_SIZE: u32 = 4096;

/// Total number of blocks of the external flash (4 MiB)
pub const FLASH_BLOCK_COUNT: u32 = 1024;

/// First block used by the filesystem. Blocks below it hold the FFT scratch area.
pub const FS_BLOCK_OFFSET: u32 = 48;

/// Blocks available to the filesystem
pub const FS_BLOCK_COUNT: u32 = FLASH_BLOCK_COUNT - FS_BLOCK_OFFSET;

/// Size of the FFT scratch area in bytes
pub const SCRATCH_SIZE: u32 = FS_BLOCK_OFFSET * FS_BLOCK_SIZE;

/// Per-folder size budget in bytes
pub const FOLDER_BUDGET: u32 = 400 * FS_BLOCK_SIZE;

pub const SESSIONS_PER_DATA_FILE: u16 = 100;
pub const SESSIONS_PER_FFT_FILE: u16 = 50;

pub const DATA_FOLDER: &str = "/data";
pub const FFT_FOLDER: &str = "/fft";
pub const RECORD_COUNT_FILE: &str = "record_count";
pub const VIBRATION_FILE: &str = "vibration_data";
pub const SELF_TEST_FILE: &str = "self_test";

/// Kind of session, each with its own folder, budget and counter
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Folder {
    Data,
    Fft,
}

impl Folder {
    pub const fn path(self) -> &'static str {
        match self {
            Self::Data => DATA_FOLDER,
            Self::Fft => FFT_FOLDER,
        }
    }

    /// Size of one stored record of this kind
    pub const fn record_size(self) -> usize {
        match self {
            Self::Data => DataPacket::SIZE,
            Self::Fft => FftRecord::SIZE,
        }
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Fft => "fft",
        }
    }
}

/// Sizing of the store, defaults match the tag's 4 MiB flash
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreLayout {
    pub data_budget: u32,
    pub fft_budget: u32,
    pub sessions_per_data_file: u16,
    pub sessions_per_fft_file: u16,
    /// Byte offset of the FFT scratch area in the raw flash
    pub scratch_offset: u32,
    pub scratch_size: u32,
}

impl Default for StoreLayout {
    fn default() -> Self {
        Self {
            data_budget: FOLDER_BUDGET,
            fft_budget: FOLDER_BUDGET,
            sessions_per_data_file: SESSIONS_PER_DATA_FILE,
            sessions_per_fft_file: SESSIONS_PER_FFT_FILE,
            scratch_offset: 0,
            scratch_size: SCRATCH_SIZE,
        }
    }
}

impl StoreLayout {
    pub const fn budget(&self, folder: Folder) -> u32 {
        match folder {
            Folder::Data => self.data_budget,
            Folder::Fft => self.fft_budget,
        }
    }

    pub const fn sessions_per_file(&self, folder: Folder) -> u16 {
        match folder {
            Folder::Data => self.sessions_per_data_file,
            Folder::Fft => self.sessions_per_fft_file,
        }
    }
}
