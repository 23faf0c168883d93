//! Raw flash area below the filesystem, used to hold FFT captures

use embedded_storage::nor_flash::{NorFlash, NorFlashError, NorFlashErrorKind, ReadNorFlash};

/// Borrowed window over the scratch area of the raw flash
///
/// Offsets are relative to the start of the area. The area is erased once per
/// capture and then written sequentially.
pub struct ScratchRegion<'a, D: NorFlash> {
    flash: &'a mut D,
    base: u32,
    len: u32,
}

impl<'a, D: NorFlash> ScratchRegion<'a, D> {
    pub fn new(flash: &'a mut D, base: u32, len: u32) -> Self {
        Self { flash, base, len }
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn check(&self, offset: u32, length: usize) -> Result<u32, NorFlashErrorKind> {
        let end = offset
            .checked_add(length as u32)
            .ok_or(NorFlashErrorKind::OutOfBounds)?;
        if end > self.len {
            return Err(NorFlashErrorKind::OutOfBounds);
        }
        Ok(self.base + offset)
    }

    /// Erase the whole area
    pub fn erase(&mut self) -> Result<(), NorFlashErrorKind> {
        self.flash
            .erase(self.base, self.base + self.len)
            .map_err(|e| e.kind())
    }

    pub fn write(&mut self, offset: u32, bytes: &[u8]) -> Result<(), NorFlashErrorKind> {
        let address = self.check(offset, bytes.len())?;
        self.flash.write(address, bytes).map_err(|e| e.kind())
    }

    pub fn read(&mut self, offset: u32, bytes: &mut [u8]) -> Result<(), NorFlashErrorKind> {
        let address = self.check(offset, bytes.len())?;
        self.flash.read(address, bytes).map_err(|e| e.kind())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemFlash;

    #[test]
    fn test_scratch_is_offset_into_flash() {
        let mut flash = MemFlash::new(4 * 4096);
        {
            let mut scratch = ScratchRegion::new(&mut flash, 4096, 2 * 4096);
            scratch.erase().unwrap();
            scratch.write(0, &[1, 2, 3, 4]).unwrap();

            let mut out = [0u8; 4];
            scratch.read(0, &mut out).unwrap();
            assert_eq!(out, [1, 2, 3, 4]);
        }
        assert_eq!(&flash.as_bytes()[4096..4100], &[1, 2, 3, 4]);
        assert_eq!(flash.as_bytes()[0], 0xFF, "Bytes before the area are untouched");
    }

    #[test]
    fn test_access_past_area_is_rejected() {
        let mut flash = MemFlash::new(4 * 4096);
        let mut scratch = ScratchRegion::new(&mut flash, 0, 4096);
        assert_eq!(
            scratch.write(4094, &[0, 0, 0, 0]),
            Err(NorFlashErrorKind::OutOfBounds)
        );
    }
}
