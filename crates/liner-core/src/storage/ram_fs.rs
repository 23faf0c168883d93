//! RAM-backed [`FileSystem`] used by the host simulator and tests
//!
//! Behaves like littlefs on a blank chip: a new instance has no valid image,
//! so [`FileSystem::mount`] fails with [`FsError::Corrupt`] until it is
//! formatted.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::string::{String, ToString};
use alloc::vec::Vec;

use super::fs::{DirEntry, EntryKind, FileHandle, FileSystem, FsError, OpenOptions};
use super::FS_BLOCK_SIZE;

const MAX_OPEN_FILES: usize = 4;

/// Blocks taken by the superblock pair and by each directory's metadata pair
const METADATA_PAIR_BLOCKS: u32 = 2;

#[derive(Debug, Clone)]
struct OpenFile {
    path: String,
    position: usize,
    options: OpenOptions,
}

#[derive(Debug)]
pub struct RamFileSystem {
    block_count: u32,
    formatted: bool,
    mounted: bool,
    dirs: BTreeSet<String>,
    files: BTreeMap<String, Vec<u8>>,
    handles: [Option<OpenFile>; MAX_OPEN_FILES],
}

impl RamFileSystem {
    /// Create an unformatted filesystem of `block_count` blocks
    pub fn new(block_count: u32) -> Self {
        Self {
            block_count,
            formatted: false,
            mounted: false,
            dirs: BTreeSet::new(),
            files: BTreeMap::new(),
            handles: Default::default(),
        }
    }

    /// Invalidate the image, as if the chip had been erased behind our back
    pub fn corrupt(&mut self) {
        self.formatted = false;
        self.mounted = false;
        self.dirs.clear();
        self.files.clear();
        self.handles = Default::default();
    }

    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    /// Content of a file, for inspection
    pub fn contents(&self, path: &str) -> Option<&[u8]> {
        self.files.get(normalize(path)).map(Vec::as_slice)
    }

    pub fn open_file_count(&self) -> usize {
        self.handles.iter().filter(|h| h.is_some()).count()
    }

    fn ensure_mounted(&self) -> Result<(), FsError> {
        if self.mounted {
            Ok(())
        } else {
            Err(FsError::NotMounted)
        }
    }

    fn ensure_parent(&self, path: &str) -> Result<(), FsError> {
        let parent = parent_of(path);
        if parent.is_empty() || self.dirs.contains(parent) {
            Ok(())
        } else if self.files.contains_key(parent) {
            Err(FsError::NotDir)
        } else {
            Err(FsError::NotFound)
        }
    }

    fn handle(&self, file: FileHandle) -> Result<&OpenFile, FsError> {
        self.handles
            .get(file.0 as usize)
            .and_then(Option::as_ref)
            .ok_or(FsError::BadHandle)
    }

    fn handle_mut(&mut self, file: FileHandle) -> Result<&mut OpenFile, FsError> {
        self.handles
            .get_mut(file.0 as usize)
            .and_then(Option::as_mut)
            .ok_or(FsError::BadHandle)
    }

    fn blocks_for(len: usize) -> u32 {
        (len as u32).div_ceil(FS_BLOCK_SIZE)
    }

    fn blocks_in_use(&self) -> u32 {
        let metadata = METADATA_PAIR_BLOCKS * (1 + self.dirs.len() as u32);
        let data: u32 = self.files.values().map(|f| Self::blocks_for(f.len())).sum();
        metadata + data
    }
}

fn normalize(path: &str) -> &str {
    path.trim_matches('/')
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(index) => &path[..index],
        None => "",
    }
}

impl FileSystem for RamFileSystem {
    fn mount(&mut self) -> Result<(), FsError> {
        if !self.formatted {
            return Err(FsError::Corrupt);
        }
        self.mounted = true;
        Ok(())
    }

    fn unmount(&mut self) -> Result<(), FsError> {
        self.ensure_mounted()?;
        self.handles = Default::default();
        self.mounted = false;
        Ok(())
    }

    fn format(&mut self) -> Result<(), FsError> {
        if self.mounted {
            return Err(FsError::Invalid);
        }
        self.dirs.clear();
        self.files.clear();
        self.formatted = true;
        Ok(())
    }

    fn mkdir(&mut self, path: &str) -> Result<(), FsError> {
        self.ensure_mounted()?;
        let path = normalize(path);
        if path.is_empty() || self.dirs.contains(path) || self.files.contains_key(path) {
            return Err(FsError::Exists);
        }
        self.ensure_parent(path)?;
        self.dirs.insert(path.to_string());
        Ok(())
    }

    fn open(&mut self, path: &str, options: OpenOptions) -> Result<FileHandle, FsError> {
        self.ensure_mounted()?;
        let path = normalize(path);
        if path.is_empty() || self.dirs.contains(path) {
            return Err(FsError::IsDir);
        }
        self.ensure_parent(path)?;

        let slot = self
            .handles
            .iter()
            .position(Option::is_none)
            .ok_or(FsError::NoSpace)?;

        match self.files.get_mut(path) {
            Some(content) => {
                if options.truncate {
                    content.clear();
                }
            }
            None if options.create => {
                if self.blocks_in_use() >= self.block_count {
                    return Err(FsError::NoSpace);
                }
                self.files.insert(path.to_string(), Vec::new());
            }
            None => return Err(FsError::NotFound),
        }

        self.handles[slot] = Some(OpenFile {
            path: path.to_string(),
            position: 0,
            options,
        });
        Ok(FileHandle(slot as u8))
    }

    fn read(&mut self, file: FileHandle, buf: &mut [u8]) -> Result<usize, FsError> {
        self.ensure_mounted()?;
        let open = self.handle(file)?;
        if !open.options.read {
            return Err(FsError::BadHandle);
        }
        let content = self.files.get(&open.path).ok_or(FsError::NotFound)?;
        let start = open.position.min(content.len());
        let count = buf.len().min(content.len() - start);
        buf[..count].copy_from_slice(&content[start..start + count]);

        self.handle_mut(file)?.position = start + count;
        Ok(count)
    }

    fn write(&mut self, file: FileHandle, data: &[u8]) -> Result<usize, FsError> {
        self.ensure_mounted()?;
        let open = self.handle(file)?.clone();
        if !open.options.write {
            return Err(FsError::BadHandle);
        }

        let current_len = self.files.get(&open.path).ok_or(FsError::NotFound)?.len();
        let start = if open.options.append {
            current_len
        } else {
            open.position
        };
        let end = start + data.len();

        let grown = Self::blocks_for(end.max(current_len)) - Self::blocks_for(current_len);
        if self.blocks_in_use() + grown > self.block_count {
            return Err(FsError::NoSpace);
        }

        let content = self.files.get_mut(&open.path).ok_or(FsError::NotFound)?;
        if content.len() < end {
            content.resize(end, 0);
        }
        content[start..end].copy_from_slice(data);

        self.handle_mut(file)?.position = end;
        Ok(data.len())
    }

    fn seek(&mut self, file: FileHandle, offset: u32) -> Result<(), FsError> {
        self.ensure_mounted()?;
        self.handle_mut(file)?.position = offset as usize;
        Ok(())
    }

    fn size(&mut self, file: FileHandle) -> Result<u32, FsError> {
        self.ensure_mounted()?;
        let open = self.handle(file)?;
        let content = self.files.get(&open.path).ok_or(FsError::NotFound)?;
        Ok(content.len() as u32)
    }

    fn close(&mut self, file: FileHandle) -> Result<(), FsError> {
        self.ensure_mounted()?;
        let slot = self
            .handles
            .get_mut(file.0 as usize)
            .ok_or(FsError::BadHandle)?;
        slot.take().map(|_| ()).ok_or(FsError::BadHandle)
    }

    fn remove(&mut self, path: &str) -> Result<(), FsError> {
        self.ensure_mounted()?;
        let path = normalize(path);

        if self.files.remove(path).is_some() {
            return Ok(());
        }
        if !self.dirs.contains(path) {
            return Err(FsError::NotFound);
        }

        let prefix = alloc::format!("{path}/");
        let has_children = self.files.keys().any(|k| k.starts_with(&prefix))
            || self.dirs.iter().any(|d| d.starts_with(&prefix));
        if has_children {
            return Err(FsError::NotEmpty);
        }
        self.dirs.remove(path);
        Ok(())
    }

    fn read_dir(&mut self, path: &str) -> Result<Vec<DirEntry>, FsError> {
        self.ensure_mounted()?;
        let path = normalize(path);
        if !path.is_empty() && !self.dirs.contains(path) {
            return Err(if self.files.contains_key(path) {
                FsError::NotDir
            } else {
                FsError::NotFound
            });
        }

        let children_of = |candidate: &str| parent_of(candidate) == path;
        let name_of = |candidate: &str| candidate.rsplit('/').next().unwrap_or(candidate).to_string();

        let mut entries: Vec<DirEntry> = self
            .dirs
            .iter()
            .filter(|d| children_of(d.as_str()))
            .map(|d| DirEntry {
                name: name_of(d.as_str()),
                kind: EntryKind::Dir,
                size: 0,
            })
            .collect();
        entries.extend(
            self.files
                .iter()
                .filter(|(f, _)| children_of(f.as_str()))
                .map(|(f, content)| DirEntry {
                    name: name_of(f.as_str()),
                    kind: EntryKind::File,
                    size: content.len() as u32,
                }),
        );
        Ok(entries)
    }

    fn used_blocks(&mut self) -> Result<u32, FsError> {
        self.ensure_mounted()?;
        Ok(self.blocks_in_use())
    }

    fn block_count(&self) -> u32 {
        self.block_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounted() -> RamFileSystem {
        let mut fs = RamFileSystem::new(64);
        fs.format().unwrap();
        fs.mount().unwrap();
        fs
    }

    #[test]
    fn test_blank_image_does_not_mount() {
        let mut fs = RamFileSystem::new(64);
        assert_eq!(fs.mount(), Err(FsError::Corrupt));
        fs.format().unwrap();
        assert!(fs.mount().is_ok());
    }

    #[test]
    fn test_append_write_and_read_back() {
        let mut fs = mounted();
        fs.mkdir("/data").unwrap();

        let file = fs.open("/data/0", OpenOptions::APPEND).unwrap();
        fs.write(file, b"abc").unwrap();
        fs.seek(file, 0).unwrap();
        fs.write(file, b"def").unwrap();
        fs.close(file).unwrap();

        assert_eq!(fs.contents("data/0"), Some(&b"abcdef"[..]));

        let file = fs.open("data/0", OpenOptions::READ_ONLY).unwrap();
        fs.seek(file, 4).unwrap();
        let mut buf = [0u8; 8];
        assert_eq!(fs.read(file, &mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(fs.read(file, &mut buf).unwrap(), 0, "Read past end returns 0");
        fs.close(file).unwrap();
    }

    #[test]
    fn test_open_missing_file_without_create() {
        let mut fs = mounted();
        assert_eq!(
            fs.open("record_count", OpenOptions::READ_WRITE),
            Err(FsError::NotFound)
        );
        assert_eq!(
            fs.open("/nodir/file", OpenOptions::APPEND),
            Err(FsError::NotFound)
        );
    }

    #[test]
    fn test_read_dir_lists_direct_children_only() {
        let mut fs = mounted();
        fs.mkdir("/fft").unwrap();
        for path in ["/fft/0", "/fft/1", "/other"] {
            let file = fs.open(path, OpenOptions::CREATE_TRUNCATE).unwrap();
            fs.write(file, &[0u8; 10]).unwrap();
            fs.close(file).unwrap();
        }

        let entries = fs.read_dir("/fft").unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.is_file() && e.size == 10));

        let root = fs.read_dir("/").unwrap();
        assert!(root.iter().any(|e| e.name == "fft" && e.kind == EntryKind::Dir));
    }

    #[test]
    fn test_remove_non_empty_directory_fails() {
        let mut fs = mounted();
        fs.mkdir("/data").unwrap();
        let file = fs.open("/data/0", OpenOptions::APPEND).unwrap();
        fs.close(file).unwrap();

        assert_eq!(fs.remove("/data"), Err(FsError::NotEmpty));
        fs.remove("/data/0").unwrap();
        fs.remove("/data").unwrap();
    }

    #[test]
    fn test_write_beyond_capacity_fails() {
        let mut fs = RamFileSystem::new(4);
        fs.format().unwrap();
        fs.mount().unwrap();

        let file = fs.open("big", OpenOptions::APPEND).unwrap();
        assert!(fs.write(file, &[0u8; 4096]).is_ok());
        assert_eq!(fs.write(file, &[0u8; 8192]), Err(FsError::NoSpace));
    }

    #[test]
    fn test_used_blocks_counts_metadata_and_data() {
        let mut fs = mounted();
        assert_eq!(fs.used_blocks().unwrap(), 2);
        fs.mkdir("/data").unwrap();
        let file = fs.open("/data/0", OpenOptions::APPEND).unwrap();
        fs.write(file, &[0u8; 5000]).unwrap();
        fs.close(file).unwrap();
        assert_eq!(fs.used_blocks().unwrap(), 2 + 2 + 2);
    }
}
