//! Cache construction parameters.

use crate::error::{CacheError, CacheResult};
use crate::flags::{CacheFlags, Mode};
use crate::lba::{Geometry, Lba};

/// Parameters handed to [`crate::cache::WriteBackCache::new`]. Validated up front so
/// construction fails cleanly with [`CacheError::InvalidParameter`] instead of
/// panicking deep inside the engine on a bad shift amount.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub block_size_sh: u32,
    pub packet_size_sh: u32,
    pub blocks_per_frame_sh: u32,
    pub first_lba: Lba,
    pub last_lba: Lba,
    pub max_blocks: usize,
    pub max_frames: usize,
    pub frames_to_keep_free: usize,
    pub max_bytes_to_read: usize,
    pub mode: Mode,
    pub flags: CacheFlags,
    /// Overrides the PRNG seed for reproducible tests. `None` seeds from the
    /// system clock.
    pub seed: Option<u32>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            block_size_sh: 9,  // 512 bytes
            packet_size_sh: 2, // 4 blocks
            blocks_per_frame_sh: 4, // 16 blocks
            first_lba: 0,
            last_lba: u64::MAX,
            max_blocks: 4096,
            max_frames: 256,
            frames_to_keep_free: 2,
            max_bytes_to_read: 1024 * 1024,
            mode: Mode::Rw,
            flags: CacheFlags::empty(),
            seed: None,
        }
    }
}

impl CacheConfig {
    pub fn geometry(&self) -> Geometry {
        Geometry {
            block_size_sh: self.block_size_sh,
            packet_size_sh: self.packet_size_sh,
            blocks_per_frame_sh: self.blocks_per_frame_sh,
        }
    }

    pub fn with_seed(mut self, seed: u32) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> CacheResult<()> {
        if self.first_lba > self.last_lba {
            return Err(CacheError::InvalidParameter);
        }
        if self.max_blocks == 0 || self.max_frames == 0 {
            return Err(CacheError::InvalidParameter);
        }
        let geom = self.geometry();
        if geom.packet_size() > geom.blocks_per_frame() {
            return Err(CacheError::InvalidParameter);
        }
        if geom.blocks_per_frame() % geom.packet_size() != 0 {
            return Err(CacheError::InvalidParameter);
        }
        if self.max_bytes_to_read < geom.block_size() {
            return Err(CacheError::InvalidParameter);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(CacheConfig::default().validate().is_ok());
    }

    #[test]
    fn packet_must_divide_frame() {
        let mut cfg = CacheConfig {
            packet_size_sh: 3,
            blocks_per_frame_sh: 2,
            ..CacheConfig::default()
        };
        assert_eq!(cfg.validate(), Err(CacheError::InvalidParameter));
        cfg.packet_size_sh = 2;
        cfg.blocks_per_frame_sh = 2;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn inverted_range_is_rejected() {
        let cfg = CacheConfig {
            first_lba: 100,
            last_lba: 10,
            ..CacheConfig::default()
        };
        assert_eq!(cfg.validate(), Err(CacheError::InvalidParameter));
    }
}
