//! Session store on top of the filesystem
//!
//! A session is a run of fixed-size records appended to `<folder>/<index>`.
//! Several consecutive sessions share a file; the file index is derived from
//! the session id. Session ids come from the persistent `record_count` file.
//!
//! At most one file is open at a time, either for recording or for a download,
//! tracked by three mutually exclusive busy flags. Every entry point that
//! touches files checks the flags first and refuses with [`StoreError::Busy`].
//!
//! Before a new session is opened, the oldest files of the folder (smallest
//! index above 1) are deleted until the incoming session fits the folder
//! budget. Files 0 and 1 are never reclaimed.
//!
//! The counter update in [`RecordStore::create_data_session`] is a plain
//! read-modify-write of `record_count`; a power loss between the rewrite and
//! the first record leaves an id allocated with no data behind it.

use core::fmt::Write as _;

use alloc::vec;
use alloc::vec::Vec;
use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};
use log::{debug, error, info, warn};
use thiserror_no_std::Error;

use super::fs::{FileHandle, FileSystem, FsError, OpenOptions};
use super::records::{DataPacket, FftHeader, FftRecord, RecordCount};
use super::scratch::ScratchRegion;
use super::{Folder, RECORD_COUNT_FILE, SELF_TEST_FILE, StoreLayout, VIBRATION_FILE};

/// Longest path built by the store (`/data/65535`)
type FilePath = heapless::String<32>;

const SELF_TEST_PATTERN: &[u8] = b"smart liner flash self-test";

/// Operation currently holding the store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusyState {
    Erasing,
    Recording,
    Reading,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreError {
    #[error("Filesystem error: {0}")]
    Fs(FsError),
    #[error("Flash error: {0:?}")]
    Flash(NorFlashErrorKind),
    #[error("Store is not mounted")]
    NotMounted,
    #[error("Store is busy ({0:?})")]
    Busy(BusyState),
    #[error("No session is being recorded")]
    NotRecording,
    #[error("No download in progress")]
    NotReading,
    #[error("Session counter of {0:?} is saturated")]
    CounterSaturated(Folder),
    #[error("No reclaimable file left in {0:?}")]
    NoReclaimableFile(Folder),
    #[error("Short read: expected {expected} bytes, got {actual}")]
    ShortRead { expected: usize, actual: usize },
    #[error("Read-back does not match what was written")]
    VerifyFailed,
}

impl From<FsError> for StoreError {
    fn from(error: FsError) -> Self {
        Self::Fs(error)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct BusyFlags {
    erasing: bool,
    recording: bool,
    reading: bool,
}

impl BusyFlags {
    fn current(&self) -> Option<BusyState> {
        if self.erasing {
            Some(BusyState::Erasing)
        } else if self.recording {
            Some(BusyState::Recording)
        } else if self.reading {
            Some(BusyState::Reading)
        } else {
            None
        }
    }
}

fn counter(counts: &RecordCount, folder: Folder) -> u16 {
    match folder {
        Folder::Data => counts.session_count,
        Folder::Fft => counts.fft_count,
    }
}

fn set_counter(counts: &mut RecordCount, folder: Folder, value: u16) {
    match folder {
        Folder::Data => counts.session_count = value,
        Folder::Fft => counts.fft_count = value,
    }
}

/// Persistent session store over a filesystem `F` and the raw flash `D`
pub struct RecordStore<F: FileSystem, D: NorFlash> {
    fs: F,
    flash: D,
    layout: StoreLayout,
    mounted: bool,
    flags: BusyFlags,
    /// The single open session or download file
    file: Option<FileHandle>,
    active: Option<Folder>,
}

impl<F: FileSystem, D: NorFlash> RecordStore<F, D> {
    pub fn new(fs: F, flash: D) -> Self {
        Self::with_layout(fs, flash, StoreLayout::default())
    }

    pub fn with_layout(fs: F, flash: D, layout: StoreLayout) -> Self {
        Self {
            fs,
            flash,
            layout,
            mounted: false,
            flags: BusyFlags::default(),
            file: None,
            active: None,
        }
    }

    pub fn filesystem(&self) -> &F {
        &self.fs
    }

    pub fn filesystem_mut(&mut self) -> &mut F {
        &mut self.fs
    }

    pub fn flash(&self) -> &D {
        &self.flash
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Operation currently holding the store, if any
    pub fn busy(&self) -> Option<BusyState> {
        self.flags.current()
    }

    // -----------------------------------------------------------------------
    // Mount / unmount
    // -----------------------------------------------------------------------

    /// Mount the filesystem, formatting the flash if no valid image is found
    pub fn enable(&mut self) -> Result<(), StoreError> {
        if self.mounted {
            return Ok(());
        }

        if let Err(e) = self.fs.mount() {
            warn!("Filesystem mount failed ({}), formatting flash", e);
            self.erase_chip()?;
            self.fs.format()?;
            self.fs.mount()?;
            info!("Flash formatted");
        }
        self.mounted = true;

        self.prepare_structure()
    }

    /// Close any open file and unmount
    pub fn disable(&mut self) -> Result<(), StoreError> {
        if !self.mounted {
            return Ok(());
        }

        if let Some(file) = self.file.take() {
            warn!("Unmounting with an open {:?} file", self.active);
            if let Err(e) = self.fs.close(file) {
                error!("Failed to close file before unmount: {}", e);
            }
        }
        self.flags.recording = false;
        self.flags.reading = false;
        self.active = None;

        let result = self.fs.unmount();
        self.mounted = false;
        result.map_err(StoreError::from)
    }

    /// Create the folders and the session counter if they are missing
    fn prepare_structure(&mut self) -> Result<(), StoreError> {
        for folder in [Folder::Data, Folder::Fft] {
            match self.fs.mkdir(folder.path()) {
                Ok(()) => debug!("Created {}", folder.path()),
                Err(FsError::Exists) => {}
                Err(e) => return Err(e.into()),
            }
        }

        match self.fs.open(RECORD_COUNT_FILE, OpenOptions::READ_ONLY) {
            Ok(file) => self.fs.close(file)?,
            Err(FsError::NotFound) => {
                info!("Creating session counter");
                self.write_record_count(&RecordCount::default())?;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn erase_chip(&mut self) -> Result<(), StoreError> {
        let capacity = self.flash.capacity() as u32;
        self.flash
            .erase(0, capacity)
            .map_err(|e| StoreError::Flash(e.kind()))
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    fn ensure_mounted(&self) -> Result<(), StoreError> {
        if self.mounted {
            Ok(())
        } else {
            Err(StoreError::NotMounted)
        }
    }

    fn ensure_idle(&self) -> Result<(), StoreError> {
        self.ensure_mounted()?;
        match self.flags.current() {
            Some(state) => Err(StoreError::Busy(state)),
            None => Ok(()),
        }
    }

    /// Open `path`, run `f` on it and close it again, even if `f` failed
    fn with_file<T>(
        &mut self,
        path: &str,
        options: OpenOptions,
        f: impl FnOnce(&mut Self, FileHandle) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let file = self.fs.open(path, options)?;
        let result = f(self, file);
        let closed = self.fs.close(file);
        let value = result?;
        closed?;
        Ok(value)
    }

    fn read_exact(&mut self, file: FileHandle, buf: &mut [u8]) -> Result<(), StoreError> {
        let mut filled = 0;
        while filled < buf.len() {
            let count = self.fs.read(file, &mut buf[filled..])?;
            if count == 0 {
                return Err(StoreError::ShortRead {
                    expected: buf.len(),
                    actual: filled,
                });
            }
            filled += count;
        }
        Ok(())
    }

    fn write_all(&mut self, file: FileHandle, data: &[u8]) -> Result<(), StoreError> {
        let written = self.fs.write(file, data)?;
        if written != data.len() {
            return Err(StoreError::Fs(FsError::NoSpace));
        }
        Ok(())
    }

    fn file_path(folder: Folder, index: u16) -> Result<FilePath, StoreError> {
        let mut path = FilePath::new();
        write!(path, "{}/{}", folder.path(), index).map_err(|_| FsError::Invalid)?;
        Ok(path)
    }

    fn read_record_count(&mut self) -> Result<RecordCount, StoreError> {
        self.with_file(RECORD_COUNT_FILE, OpenOptions::READ_ONLY, |store, file| {
            let mut bytes = [0u8; RecordCount::SIZE];
            store.read_exact(file, &mut bytes)?;
            Ok(RecordCount::from_bytes(&bytes))
        })
    }

    fn write_record_count(&mut self, counts: &RecordCount) -> Result<(), StoreError> {
        let bytes = counts.to_bytes();
        self.with_file(
            RECORD_COUNT_FILE,
            OpenOptions::CREATE_TRUNCATE,
            |store, file| store.write_all(file, &bytes),
        )
    }

    /// Sum of the sizes of the regular files in `folder`
    pub fn folder_size(&mut self, folder: Folder) -> Result<u32, StoreError> {
        self.ensure_mounted()?;
        let entries = self.fs.read_dir(folder.path())?;
        Ok(entries
            .iter()
            .filter(|e| e.is_file())
            .map(|e| e.size)
            .sum())
    }

    /// Delete the oldest files of `folder` until `incoming` more bytes fit its budget
    fn reclaim_space(&mut self, folder: Folder, incoming: u32) -> Result<(), StoreError> {
        let budget = self.layout.budget(folder);

        loop {
            let entries = self.fs.read_dir(folder.path())?;
            let used: u32 = entries.iter().filter(|e| e.is_file()).map(|e| e.size).sum();
            if used.saturating_add(incoming) <= budget {
                return Ok(());
            }

            let oldest = entries
                .iter()
                .filter(|e| e.is_file())
                .filter_map(|e| e.name.parse::<u16>().ok())
                .filter(|&index| index > 1)
                .min();

            match oldest {
                Some(index) => {
                    let path = Self::file_path(folder, index)?;
                    info!("Removing {} to free space ({} bytes used)", path, used);
                    self.fs.remove(&path)?;
                }
                None => {
                    warn!(
                        "{} full ({} + {} bytes) and nothing left to reclaim",
                        folder.path(),
                        used,
                        incoming
                    );
                    return Err(StoreError::NoReclaimableFile(folder));
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Sessions
    // -----------------------------------------------------------------------

    fn create_session(
        &mut self,
        folder: Folder,
        incoming: u32,
        header: Option<FftHeader>,
    ) -> Result<u16, StoreError> {
        self.ensure_idle()?;

        let mut counts = self.read_record_count()?;
        let session_id = counter(&counts, folder);
        if session_id == RecordCount::SATURATED {
            warn!("{} session counter saturated", folder.label());
            return Err(StoreError::CounterSaturated(folder));
        }

        self.reclaim_space(folder, incoming)?;

        set_counter(&mut counts, folder, session_id + 1);
        self.write_record_count(&counts)?;

        let per_file = self.layout.sessions_per_file(folder).max(1);
        let path = Self::file_path(folder, session_id / per_file)?;
        if session_id % per_file == 0 {
            info!("Creating file {}", path);
        }

        let file = self.fs.open(&path, OpenOptions::APPEND)?;
        if let Some(mut header) = header {
            header.fft_id = session_id;
            if let Err(e) = self.write_all(file, &header.to_bytes()) {
                error!("Failed to write FFT header: {}", e);
                let _ = self.fs.close(file);
                return Err(e);
            }
        }

        self.file = Some(file);
        self.active = Some(folder);
        self.flags.recording = true;
        info!("Started {} session {} in {}", folder.label(), session_id, path);
        Ok(session_id)
    }

    fn record(&mut self, folder: Folder, bytes: &[u8]) -> Result<(), StoreError> {
        if !self.flags.recording || self.active != Some(folder) {
            return Err(StoreError::NotRecording);
        }
        let file = self.file.ok_or(StoreError::NotRecording)?;
        self.write_all(file, bytes)
    }

    fn close_session(&mut self, folder: Folder) -> Result<(), StoreError> {
        if !self.flags.recording || self.active != Some(folder) {
            return Ok(());
        }

        let file = self.file.take();
        self.flags.recording = false;
        self.active = None;

        if let Some(file) = file {
            self.fs.close(file)?;
        }
        debug!("Closed {} session", folder.label());
        Ok(())
    }

    fn session_count(&mut self, folder: Folder) -> u16 {
        if let Err(e) = self.ensure_mounted() {
            error!("Cannot read {} session count: {}", folder.label(), e);
            return 0;
        }
        match self.read_record_count() {
            Ok(counts) => counter(&counts, folder),
            Err(e) => {
                error!("Cannot read {} session count: {}", folder.label(), e);
                0
            }
        }
    }

    fn remove_all_sessions(&mut self, folder: Folder) -> Result<(), StoreError> {
        self.ensure_idle()?;

        self.flags.erasing = true;
        let result = self.remove_folder_files(folder).and_then(|()| {
            let mut counts = self.read_record_count()?;
            set_counter(&mut counts, folder, 0);
            self.write_record_count(&counts)
        });
        self.flags.erasing = false;

        match &result {
            Ok(()) => info!("Removed all {} sessions", folder.label()),
            Err(e) => error!("Failed to remove {} sessions: {}", folder.label(), e),
        }
        result
    }

    fn remove_folder_files(&mut self, folder: Folder) -> Result<(), StoreError> {
        let entries = self.fs.read_dir(folder.path())?;
        for entry in entries.iter().filter(|e| e.is_file()) {
            let mut path = FilePath::new();
            write!(path, "{}/{}", folder.path(), entry.name).map_err(|_| FsError::Invalid)?;
            self.fs.remove(&path)?;
        }
        Ok(())
    }

    /// Open session file `file_index` of `folder` for download
    ///
    /// Returns the number of whole records in the file.
    fn download_start(&mut self, folder: Folder, file_index: u16) -> Result<u32, StoreError> {
        self.ensure_idle()?;

        let path = Self::file_path(folder, file_index)?;
        let file = self.fs.open(&path, OpenOptions::READ_ONLY)?;
        let size = match self.fs.size(file) {
            Ok(size) => size,
            Err(e) => {
                let _ = self.fs.close(file);
                return Err(e.into());
            }
        };

        self.file = Some(file);
        self.active = Some(folder);
        self.flags.reading = true;

        let records = size / folder.record_size() as u32;
        info!("Downloading {} ({} records)", path, records);
        Ok(records)
    }

    fn reading_file(&self, folder: Folder) -> Result<FileHandle, StoreError> {
        if !self.flags.reading || self.active != Some(folder) {
            return Err(StoreError::NotReading);
        }
        self.file.ok_or(StoreError::NotReading)
    }

    fn download_record(
        &mut self,
        folder: Folder,
        index: u32,
        buf: &mut [u8],
    ) -> Result<(), StoreError> {
        let file = self.reading_file(folder)?;
        self.fs.seek(file, index * folder.record_size() as u32)?;
        self.read_exact(file, buf)
    }

    // -----------------------------------------------------------------------
    // Data sessions
    // -----------------------------------------------------------------------

    /// Open a new data session sized for `expected_bytes` of records
    ///
    /// Returns the session id, to be stored as `record_id` of every packet.
    pub fn create_data_session(&mut self, expected_bytes: u32) -> Result<u16, StoreError> {
        self.create_session(Folder::Data, expected_bytes, None)
    }

    pub fn record_data_packet(&mut self, packet: &DataPacket) -> Result<(), StoreError> {
        self.record(Folder::Data, &packet.to_bytes())
    }

    /// Append raw bytes to the open data session
    pub fn record_data_bytes(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.record(Folder::Data, bytes)
    }

    pub fn close_data_session(&mut self) -> Result<(), StoreError> {
        self.close_session(Folder::Data)
    }

    /// Number of data sessions created so far, 0 if it cannot be read
    pub fn get_data_session_count(&mut self) -> u16 {
        self.session_count(Folder::Data)
    }

    pub fn download_data_file_start(&mut self, file_index: u16) -> Result<u32, StoreError> {
        self.download_start(Folder::Data, file_index)
    }

    pub fn download_data_record(&mut self, index: u32) -> Result<DataPacket, StoreError> {
        let mut bytes = [0u8; DataPacket::SIZE];
        self.download_record(Folder::Data, index, &mut bytes)?;
        Ok(DataPacket::from_bytes(&bytes))
    }

    pub fn remove_all_data_sessions(&mut self) -> Result<(), StoreError> {
        self.remove_all_sessions(Folder::Data)
    }

    // -----------------------------------------------------------------------
    // FFT sessions
    // -----------------------------------------------------------------------

    /// Open a new FFT session and write `header` with the assigned id
    pub fn create_fft_session(&mut self, header: FftHeader) -> Result<u16, StoreError> {
        self.create_session(Folder::Fft, FftRecord::SIZE as u32, Some(header))
    }

    pub fn record_fft_packet(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.record(Folder::Fft, bytes)
    }

    pub fn close_fft_session(&mut self) -> Result<(), StoreError> {
        self.close_session(Folder::Fft)
    }

    pub fn get_fft_session_count(&mut self) -> u16 {
        self.session_count(Folder::Fft)
    }

    pub fn download_fft_file_start(&mut self, file_index: u16) -> Result<u32, StoreError> {
        self.download_start(Folder::Fft, file_index)
    }

    pub fn download_fft_record(&mut self, index: u32) -> Result<FftRecord, StoreError> {
        let mut bytes = vec![0u8; FftRecord::SIZE];
        self.download_record(Folder::Fft, index, &mut bytes)?;
        FftRecord::from_bytes(&bytes).ok_or(StoreError::ShortRead {
            expected: FftRecord::SIZE,
            actual: bytes.len(),
        })
    }

    /// Read raw bytes of the FFT file being downloaded, starting at `offset`
    ///
    /// Returns the number of bytes read, short or 0 at the end of the file.
    pub fn download_fft_chunk(&mut self, offset: u32, buf: &mut [u8]) -> Result<usize, StoreError> {
        let file = self.reading_file(Folder::Fft)?;
        self.fs.seek(file, offset)?;
        Ok(self.fs.read(file, buf)?)
    }

    pub fn remove_all_fft_sessions(&mut self) -> Result<(), StoreError> {
        self.remove_all_sessions(Folder::Fft)
    }

    /// End the current download, data or FFT
    pub fn download_file_stop(&mut self) -> Result<(), StoreError> {
        if !self.flags.reading {
            return Ok(());
        }

        let file = self.file.take();
        self.flags.reading = false;
        self.active = None;

        if let Some(file) = file {
            self.fs.close(file)?;
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Erase the whole flash, then format and prepare an empty filesystem
    pub fn erase_all(&mut self) -> Result<(), StoreError> {
        if let Some(state) = self.flags.current() {
            return Err(StoreError::Busy(state));
        }

        self.flags.erasing = true;
        let result = self.reformat();
        self.flags.erasing = false;

        match &result {
            Ok(()) => info!("Flash erased"),
            Err(e) => error!("Flash erase failed: {}", e),
        }
        result
    }

    fn reformat(&mut self) -> Result<(), StoreError> {
        if self.mounted {
            if let Err(e) = self.fs.unmount() {
                warn!("Unmount before erase failed: {}", e);
            }
            self.mounted = false;
        }

        self.erase_chip()?;
        self.fs.format()?;
        self.fs.mount()?;
        self.mounted = true;
        self.prepare_structure()
    }

    /// Filesystem fill level, in percent of its blocks
    pub fn usage_percent(&mut self) -> Result<u8, StoreError> {
        self.ensure_mounted()?;
        let used = self.fs.used_blocks()?;
        let total = self.fs.block_count().max(1);
        Ok((used.saturating_mul(100) / total).min(100) as u8)
    }

    /// Write, read back and remove a probe file
    pub fn self_test(&mut self) -> Result<(), StoreError> {
        self.ensure_idle()?;

        self.with_file(SELF_TEST_FILE, OpenOptions::CREATE_TRUNCATE, |store, file| {
            store.write_all(file, SELF_TEST_PATTERN)
        })?;

        let mut read_back = [0u8; SELF_TEST_PATTERN.len()];
        self.with_file(SELF_TEST_FILE, OpenOptions::READ_ONLY, |store, file| {
            store.read_exact(file, &mut read_back)
        })?;
        self.fs.remove(SELF_TEST_FILE)?;

        if read_back != SELF_TEST_PATTERN {
            error!("Flash self-test read-back mismatch");
            return Err(StoreError::VerifyFailed);
        }
        info!("Flash self-test passed");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Vibration trend file
    // -----------------------------------------------------------------------

    /// Append one vibration module. Returns the number of stored samples.
    pub fn append_vibration_sample(&mut self, sample: u16) -> Result<u32, StoreError> {
        self.ensure_idle()?;
        self.with_file(VIBRATION_FILE, OpenOptions::APPEND, |store, file| {
            store.write_all(file, &sample.to_le_bytes())?;
            Ok(store.fs.size(file)? / 2)
        })
    }

    pub fn vibration_samples(&mut self) -> Result<Vec<u16>, StoreError> {
        self.ensure_idle()?;
        let result = self.with_file(VIBRATION_FILE, OpenOptions::READ_ONLY, |store, file| {
            let size = store.fs.size(file)? as usize;
            let mut bytes = vec![0u8; size - size % 2];
            store.read_exact(file, &mut bytes)?;
            Ok(bytes
                .chunks_exact(2)
                .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
                .collect())
        });

        match result {
            Err(StoreError::Fs(FsError::NotFound)) => Ok(Vec::new()),
            other => other,
        }
    }

    pub fn remove_vibration_data(&mut self) -> Result<(), StoreError> {
        self.ensure_idle()?;
        match self.fs.remove(VIBRATION_FILE) {
            Ok(()) | Err(FsError::NotFound) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    // -----------------------------------------------------------------------
    // FFT scratch area
    // -----------------------------------------------------------------------

    /// Raw flash area reserved for FFT captures
    pub fn scratch(&mut self) -> ScratchRegion<'_, D> {
        ScratchRegion::new(
            &mut self.flash,
            self.layout.scratch_offset,
            self.layout.scratch_size,
        )
    }
}
