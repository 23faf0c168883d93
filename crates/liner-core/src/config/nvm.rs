//! Persistence of [`DeviceConfig`] in a dedicated flash sector
//!
//! Layout: `magic u32 | version u16 | len u16 | crc32 u32 | postcard payload`,
//! padded with `0xFF` to the flash write granularity.

use embedded_storage::nor_flash::{NorFlash, ReadNorFlash};
use log::{info, warn};

use super::{ConfigError, DeviceConfig};

const CFG_MAGIC: u32 = 0x4C_43_46_47; // 'LCFG'
const CFG_VERSION: u16 = 1;
const CFG_HEADER_SIZE: usize = 12;
const CFG_MAX_SIZE: usize = 64;

/// Non-volatile home of the device configuration
pub trait ConfigStorage {
    /// Stored configuration, `None` if nothing valid was stored yet
    fn load_config(&mut self) -> Option<DeviceConfig>;

    fn store_config(&mut self, config: &DeviceConfig) -> Result<(), ConfigError>;
}

fn calc_crc32(data: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(data);
    hasher.finalize()
}

/// [`ConfigStorage`] over one erase sector of a NOR flash
pub struct NorFlashConfigStorage<D: NorFlash> {
    flash: D,
    offset: u32,
}

impl<D: NorFlash> NorFlashConfigStorage<D> {
    /// `offset` must be aligned to an erase sector of `flash`
    pub fn new(flash: D, offset: u32) -> Self {
        Self { flash, offset }
    }

    pub fn flash(&self) -> &D {
        &self.flash
    }

    fn sector_end(&self) -> u32 {
        let size = (CFG_HEADER_SIZE + CFG_MAX_SIZE).next_multiple_of(D::ERASE_SIZE);
        self.offset + size as u32
    }
}

impl<D: NorFlash> ConfigStorage for NorFlashConfigStorage<D> {
    fn load_config(&mut self) -> Option<DeviceConfig> {
        let mut buf = [0u8; CFG_HEADER_SIZE + CFG_MAX_SIZE];
        if let Err(e) = self.flash.read(self.offset, &mut buf) {
            warn!("Config read failed: {:?}", e);
            return None;
        }

        let magic = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let version = u16::from_le_bytes([buf[4], buf[5]]);
        let len = u16::from_le_bytes([buf[6], buf[7]]) as usize;
        let crc = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);

        if magic != CFG_MAGIC || version != CFG_VERSION || len > CFG_MAX_SIZE {
            return None;
        }

        let payload = &buf[CFG_HEADER_SIZE..CFG_HEADER_SIZE + len];
        if calc_crc32(payload) != crc {
            warn!("Stored config CRC mismatch");
            return None;
        }

        postcard::from_bytes::<DeviceConfig>(payload).ok()
    }

    fn store_config(&mut self, config: &DeviceConfig) -> Result<(), ConfigError> {
        let mut buf = [0xFFu8; CFG_HEADER_SIZE + CFG_MAX_SIZE];
        let len = postcard::to_slice(config, &mut buf[CFG_HEADER_SIZE..])
            .map_err(|_| ConfigError::Serialization)?
            .len();
        let crc = calc_crc32(&buf[CFG_HEADER_SIZE..CFG_HEADER_SIZE + len]);

        buf[0..4].copy_from_slice(&CFG_MAGIC.to_le_bytes());
        buf[4..6].copy_from_slice(&CFG_VERSION.to_le_bytes());
        buf[6..8].copy_from_slice(&(len as u16).to_le_bytes());
        buf[8..12].copy_from_slice(&crc.to_le_bytes());

        let total = (CFG_HEADER_SIZE + len).next_multiple_of(D::WRITE_SIZE).min(buf.len());

        self.flash
            .erase(self.offset, self.sector_end())
            .map_err(|_| ConfigError::Storage)?;
        self.flash
            .write(self.offset, &buf[..total])
            .map_err(|_| ConfigError::Storage)?;

        info!("Configuration saved ({} bytes)", len);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImuFrequency;
    use crate::storage::MemFlash;

    #[test]
    fn test_blank_flash_has_no_config() {
        let mut storage = NorFlashConfigStorage::new(MemFlash::new(2 * 4096), 4096);
        assert!(storage.load_config().is_none());
    }

    #[test]
    fn test_store_then_load() {
        let mut storage = NorFlashConfigStorage::new(MemFlash::new(2 * 4096), 4096);
        let mut config = DeviceConfig::default();
        config.fft_period_hours = 12;
        config.imu_frequency = ImuFrequency::Hz400;

        storage.store_config(&config).unwrap();
        assert_eq!(storage.load_config(), Some(config));

        // Overwrite with a second value, the sector is erased first
        config.heartbeat_period_minutes = 1;
        storage.store_config(&config).unwrap();
        assert_eq!(storage.load_config(), Some(config));
    }

    #[test]
    fn test_corrupted_payload_is_rejected() {
        let mut storage = NorFlashConfigStorage::new(MemFlash::new(4096), 0);
        storage.store_config(&DeviceConfig::default()).unwrap();

        let mut flash = storage.flash().clone();
        flash.write(CFG_HEADER_SIZE as u32, &[0x00]).unwrap();
        let mut storage = NorFlashConfigStorage::new(flash, 0);

        assert!(storage.load_config().is_none());
    }
}
