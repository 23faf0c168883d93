//! RAM-backed NOR flash for the simulator and tests
//!
//! Erasing sets bytes to `0xFF`. Programming can only clear bits, as on a real
//! NOR array, so writing over unerased data corrupts it the same way.

use alloc::vec;
use alloc::vec::Vec;

use embedded_storage::nor_flash::{
    ErrorType, NorFlash, NorFlashErrorKind, ReadNorFlash, check_erase, check_read, check_write,
};

use super::FS_BLOCK_SIZE;

#[derive(Debug, Clone)]
pub struct MemFlash {
    data: Vec<u8>,
    erase_count: u32,
}

impl MemFlash {
    /// Create an erased flash of `capacity` bytes
    pub fn new(capacity: usize) -> Self {
        Self {
            data: vec![0xFF; capacity],
            erase_count: 0,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    /// Number of sector erases performed so far
    pub fn erase_count(&self) -> u32 {
        self.erase_count
    }
}

impl ErrorType for MemFlash {
    type Error = NorFlashErrorKind;
}

impl ReadNorFlash for MemFlash {
    const READ_SIZE: usize = 1;

    fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), Self::Error> {
        check_read(self, offset, bytes.len())?;
        let start = offset as usize;
        bytes.copy_from_slice(&self.data[start..start + bytes.len()]);
        Ok(())
    }

    fn capacity(&self) -> usize {
        self.data.len()
    }
}

impl NorFlash for MemFlash {
    const WRITE_SIZE: usize = 1;
    const ERASE_SIZE: usize = FS_BLOCK_SIZE as usize;

    fn erase(&mut self, from: u32, to: u32) -> Result<(), Self::Error> {
        check_erase(self, from, to)?;
        self.data[from as usize..to as usize].fill(0xFF);
        self.erase_count += (to - from) / Self::ERASE_SIZE as u32;
        Ok(())
    }

    fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), Self::Error> {
        check_write(self, offset, bytes.len())?;
        let start = offset as usize;
        for (cell, byte) in self.data[start..start + bytes.len()].iter_mut().zip(bytes) {
            *cell &= *byte;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_flash_is_erased() {
        let flash = MemFlash::new(2 * 4096);
        assert!(flash.as_bytes().iter().all(|&b| b == 0xFF));
    }

    #[test]
    fn test_write_only_clears_bits() {
        let mut flash = MemFlash::new(4096);
        flash.write(0, &[0x0F]).unwrap();
        flash.write(0, &[0xF3]).unwrap();

        let mut out = [0u8; 1];
        flash.read(0, &mut out).unwrap();
        assert_eq!(out[0], 0x03);

        flash.erase(0, 4096).unwrap();
        flash.read(0, &mut out).unwrap();
        assert_eq!(out[0], 0xFF);
        assert_eq!(flash.erase_count(), 1);
    }

    #[test]
    fn test_unaligned_erase_is_rejected() {
        let mut flash = MemFlash::new(2 * 4096);
        assert_eq!(flash.erase(100, 4096), Err(NorFlashErrorKind::NotAligned));
        assert_eq!(
            flash.erase(0, 3 * 4096),
            Err(NorFlashErrorKind::OutOfBounds)
        );
    }
}
