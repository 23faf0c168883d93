//! Filesystem seam for the record store
//!
//! On the tag the store runs on littlefs over the external NOR flash; the
//! binding lives in board support and implements [`FileSystem`]. The host
//! simulator and tests use [`super::RamFileSystem`].

use alloc::string::String;
use alloc::vec::Vec;
use thiserror_no_std::Error;

/// Errors reported by a [`FileSystem`] implementation
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsError {
    #[error("I/O error")]
    Io,
    #[error("Filesystem is corrupted")]
    Corrupt,
    #[error("No such file or directory")]
    NotFound,
    #[error("Entry already exists")]
    Exists,
    #[error("Not a directory")]
    NotDir,
    #[error("Is a directory")]
    IsDir,
    #[error("Directory is not empty")]
    NotEmpty,
    #[error("Bad file handle")]
    BadHandle,
    #[error("No space left on device")]
    NoSpace,
    #[error("Invalid parameter")]
    Invalid,
    #[error("Filesystem is not mounted")]
    NotMounted,
}

/// Opaque handle to an open file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle(pub u8);

/// How a file is opened, mirroring the littlefs open flags
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenOptions {
    pub read: bool,
    pub write: bool,
    pub create: bool,
    pub append: bool,
    pub truncate: bool,
}

impl OpenOptions {
    pub const READ_ONLY: Self = Self {
        read: true,
        write: false,
        create: false,
        append: false,
        truncate: false,
    };

    pub const READ_WRITE: Self = Self {
        read: true,
        write: true,
        create: false,
        append: false,
        truncate: false,
    };

    /// Create if missing, every write goes to the end of the file
    pub const APPEND: Self = Self {
        read: false,
        write: true,
        create: true,
        append: true,
        truncate: false,
    };

    /// Create if missing and discard any previous content
    pub const CREATE_TRUNCATE: Self = Self {
        read: false,
        write: true,
        create: true,
        append: false,
        truncate: true,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Dir,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// Name relative to the listed directory
    pub name: String,
    pub kind: EntryKind,
    /// Size in bytes, 0 for directories
    pub size: u32,
}

impl DirEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }
}

/// Minimal littlefs-style filesystem interface used by the record store
///
/// Paths are absolute or relative to the root, using `/` separators.
pub trait FileSystem {
    fn mount(&mut self) -> Result<(), FsError>;

    fn unmount(&mut self) -> Result<(), FsError>;

    /// Write an empty filesystem image. The filesystem must be unmounted.
    fn format(&mut self) -> Result<(), FsError>;

    fn mkdir(&mut self, path: &str) -> Result<(), FsError>;

    fn open(&mut self, path: &str, options: OpenOptions) -> Result<FileHandle, FsError>;

    /// Read up to `buf.len()` bytes from the current position. Returns the
    /// number of bytes read, 0 at end of file.
    fn read(&mut self, file: FileHandle, buf: &mut [u8]) -> Result<usize, FsError>;

    fn write(&mut self, file: FileHandle, data: &[u8]) -> Result<usize, FsError>;

    /// Move the position of `file` to `offset` bytes from the start
    fn seek(&mut self, file: FileHandle, offset: u32) -> Result<(), FsError>;

    fn size(&mut self, file: FileHandle) -> Result<u32, FsError>;

    fn close(&mut self, file: FileHandle) -> Result<(), FsError>;

    /// Remove a file or an empty directory
    fn remove(&mut self, path: &str) -> Result<(), FsError>;

    fn read_dir(&mut self, path: &str) -> Result<Vec<DirEntry>, FsError>;

    /// Number of blocks currently in use
    fn used_blocks(&mut self) -> Result<u32, FsError>;

    /// Total number of blocks of the filesystem
    fn block_count(&self) -> u32;
}
