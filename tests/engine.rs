//! Scenario coverage for the write-back block cache, against an in-memory device.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use wb_block_cache::{
    BlockDevice, CacheConfig, CacheError, CacheFlags, Lba, Mode, UsageFlags, WriteBackCache,
};

/// A plain in-memory backing store, recording every I/O call for assertions.
struct MemDevice {
    block_size: usize,
    storage: Mutex<Vec<u8>>,
    zero_blocks: Mutex<HashSet<Lba>>,
    bad_blocks: Mutex<HashSet<Lba>>,
    reads: Mutex<u32>,
    writes: Mutex<u32>,
    relocations: Mutex<u32>,
    next_reloc_addr: Mutex<Lba>,
}

impl MemDevice {
    fn new(block_size: usize, blocks: u64) -> Self {
        Self {
            block_size,
            storage: Mutex::new(vec![0u8; block_size * blocks as usize]),
            zero_blocks: Mutex::new(HashSet::new()),
            bad_blocks: Mutex::new(HashSet::new()),
            reads: Mutex::new(0),
            writes: Mutex::new(0),
            relocations: Mutex::new(0),
            next_reloc_addr: Mutex::new(1_000_000),
        }
    }

    fn mark_zero(&self, lba: Lba) {
        self.zero_blocks.lock().unwrap().insert(lba);
    }

    fn mark_bad(&self, lba: Lba) {
        self.bad_blocks.lock().unwrap().insert(lba);
    }

    fn reads(&self) -> u32 {
        *self.reads.lock().unwrap()
    }

    fn writes(&self) -> u32 {
        *self.writes.lock().unwrap()
    }

    fn relocations(&self) -> u32 {
        *self.relocations.lock().unwrap()
    }
}

impl BlockDevice for MemDevice {
    fn read(&self, buf: &mut [u8], lba: Lba, _temp_hint: bool) -> wb_block_cache::CacheResult<usize> {
        *self.reads.lock().unwrap() += 1;
        let storage = self.storage.lock().unwrap();
        let start = lba as usize * self.block_size;
        buf.copy_from_slice(&storage[start..start + buf.len()]);
        Ok(buf.len())
    }

    fn write(&self, buf: &[u8], lba: Lba, _temp_hint: bool) -> wb_block_cache::CacheResult<usize> {
        *self.writes.lock().unwrap() += 1;
        let mut storage = self.storage.lock().unwrap();
        let start = lba as usize * self.block_size;
        let end = start + buf.len();
        if end > storage.len() {
            storage.resize(end, 0);
        }
        storage[start..end].copy_from_slice(buf);
        Ok(buf.len())
    }

    fn check_used(&self, lba: Lba) -> UsageFlags {
        if self.bad_blocks.lock().unwrap().contains(&lba) {
            return UsageFlags::BAD;
        }
        if self.zero_blocks.lock().unwrap().contains(&lba) {
            return UsageFlags::ZERO;
        }
        UsageFlags::USED
    }

    fn update_reloc(&self, reloc_tab: &[Lba]) -> wb_block_cache::CacheResult<Lba> {
        *self.relocations.lock().unwrap() += 1;
        let mut next = self.next_reloc_addr.lock().unwrap();
        let dest = *next;
        *next += reloc_tab.len() as Lba;
        Ok(dest)
    }
}

fn rw_config() -> CacheConfig {
    CacheConfig {
        block_size_sh: 9,
        packet_size_sh: 1, // 2 blocks/packet
        blocks_per_frame_sh: 2, // 4 blocks/frame
        first_lba: 0,
        last_lba: 1023,
        max_blocks: 16,
        max_frames: 8,
        frames_to_keep_free: 1,
        max_bytes_to_read: 64 * 1024,
        mode: Mode::Rw,
        flags: CacheFlags::empty(),
        seed: Some(7),
    }
}

fn block(block_size: usize, fill: u8) -> Vec<u8> {
    vec![fill; block_size]
}

#[test]
fn read_after_write_returns_the_write() {
    let device = MemDevice::new(512, 64);
    let cache = WriteBackCache::new(device, rw_config()).unwrap();

    let data = block(512, 0xAB);
    cache.write(10, 1, &data).unwrap();

    let mut out = vec![0u8; 512];
    cache.read(10, 1, &mut out).unwrap();
    assert_eq!(out, data);
}

#[test]
fn uncached_read_fetches_from_device_once() {
    let device = MemDevice::new(512, 64);
    let cache = WriteBackCache::new(device, rw_config()).unwrap();

    let mut out = vec![0u8; 512];
    cache.read(4, 1, &mut out).unwrap();
    cache.read(4, 1, &mut out).unwrap();
    assert!(cache.is_cached(4, 1));
}

#[test]
fn flush_blocks_is_idempotent() {
    let device = MemDevice::new(512, 64);
    let cache = WriteBackCache::new(device, rw_config()).unwrap();

    cache.write(0, 1, &block(512, 1)).unwrap();
    cache.flush_blocks(0, 1).unwrap();
    let wc = cache.write_block_count();
    cache.flush_blocks(0, 1).unwrap();
    assert_eq!(cache.write_block_count(), wc);
    assert_eq!(wc, 0);
}

#[test]
fn purge_all_flushes_and_drops_everything() {
    let device = MemDevice::new(512, 64);
    let cache = WriteBackCache::new(device, rw_config()).unwrap();

    cache.write(0, 1, &block(512, 2)).unwrap();
    cache.read(8, 1, &mut vec![0u8; 512]).unwrap();
    cache.purge_all().unwrap();

    assert_eq!(cache.write_block_count(), 0);
    assert!(!cache.is_cached(0, 1));
    assert!(!cache.is_cached(8, 1));
}

#[test]
fn rw_mode_flush_is_read_modify_write() {
    let device = Arc::new(MemDevice::new(512, 64));
    let cache = WriteBackCache::new(device.clone(), rw_config()).unwrap();

    // Packet at [0,1] (packet_size=2): write only block 0, leaving block 1 uncached.
    cache.write(0, 1, &block(512, 5)).unwrap();
    let writes_before = device.writes();
    cache.flush_blocks(0, 1).unwrap();

    assert!(device.reads() > 0, "RMW must read the rest of the packet");
    assert_eq!(device.writes(), writes_before + 1);

    let mut out = vec![0u8; 512];
    cache.read(1, 1, &mut out).unwrap();
    assert_eq!(out, block(512, 0)); // untouched backing store is zeroed
}

#[test]
fn zero_usage_block_is_not_read_from_device() {
    let device = MemDevice::new(512, 64);
    device.mark_zero(20);
    let cache = WriteBackCache::new(device, rw_config()).unwrap();

    let mut out = vec![0xFFu8; 512];
    cache.read(20, 1, &mut out).unwrap();
    assert_eq!(out, block(512, 0));
}

#[test]
fn bad_usage_block_read_fails() {
    let device = MemDevice::new(512, 64);
    device.mark_bad(21);
    let cache = WriteBackCache::new(device, rw_config()).unwrap();

    let mut out = vec![0u8; 512];
    let err = cache.read(21, 1, &mut out).unwrap_err();
    assert_eq!(err, CacheError::DeviceDataError);
}

#[test]
fn rom_mode_rejects_writes() {
    let mut cfg = rw_config();
    cfg.mode = Mode::Rom;
    let device = MemDevice::new(512, 64);
    let cache = WriteBackCache::new(device, cfg).unwrap();

    let err = cache.write(0, 1, &block(512, 1)).unwrap_err();
    assert_eq!(err, CacheError::MediaWriteProtected);
}

#[test]
fn eviction_keeps_block_count_under_the_limit() {
    let mut cfg = rw_config();
    cfg.max_blocks = 4;
    cfg.max_frames = 4;
    let device = MemDevice::new(512, 256);
    let cache = WriteBackCache::new(device, cfg).unwrap();

    for i in 0..64u64 {
        let mut out = vec![0u8; 512];
        cache.read(i, 1, &mut out).unwrap();
    }
    assert!(cache.write_block_count() <= 4);
}

#[test]
fn worm_purge_relocates_scattered_modified_blocks() {
    let mut cfg = rw_config();
    cfg.mode = Mode::R;
    cfg.packet_size_sh = 1; // PacketSize = 2
    let device = Arc::new(MemDevice::new(512, 256));
    let cache = WriteBackCache::new(device.clone(), cfg).unwrap();

    // Four scattered modified blocks across different packets/frames.
    for &lba in &[0u64, 5, 10, 15] {
        cache.write(lba, 1, &block(512, lba as u8)).unwrap();
    }
    assert_eq!(cache.write_block_count(), 4);

    cache.purge_all().unwrap();

    assert_eq!(cache.write_block_count(), 0);
    assert!(!cache.is_cached(0, 1));
    // ceil(4 modified blocks / PacketSize=2) relocation packets.
    assert_eq!(device.relocations(), 2);
}

#[test]
fn ram_mode_flush_writes_only_the_dirty_run() {
    let mut cfg = rw_config();
    cfg.mode = Mode::Ram;
    let device = MemDevice::new(512, 64);
    let cache = WriteBackCache::new(device, cfg).unwrap();

    cache.write(0, 2, &vec![9u8; 1024]).unwrap();
    cache.flush_blocks(0, 2).unwrap();
    assert_eq!(cache.write_block_count(), 0);
}

#[test]
fn direct_session_populates_and_marks_modified() {
    let device = MemDevice::new(512, 64);
    let cache = WriteBackCache::new(device, rw_config()).unwrap();

    let mut session = cache.start_direct(true).unwrap();
    session.with_direct(3, true, |buf| buf.fill(0x42)).unwrap();
    session.end().unwrap();

    assert!(cache.write_block_count() >= 1);
    let mut out = vec![0u8; 512];
    cache.read(3, 1, &mut out).unwrap();
    assert_eq!(out, block(512, 0x42));
}

#[test]
fn direct_session_drop_ends_the_bracket() {
    let device = MemDevice::new(512, 64);
    let cache = WriteBackCache::new(device, rw_config()).unwrap();

    {
        let mut session = cache.start_direct(true).unwrap();
        session.with_direct(3, true, |buf| buf.fill(0x42)).unwrap();
    }

    // The bracket closed on drop, so a fresh session can open without error.
    let mut session = cache.start_direct(true).unwrap();
    session.with_direct(4, false, |buf| buf.fill(0x00)).unwrap();
}

#[test]
fn discard_drops_without_writing_back() {
    let device = MemDevice::new(512, 64);
    let cache = WriteBackCache::new(device, rw_config()).unwrap();

    cache.write(0, 1, &block(512, 3)).unwrap();
    cache.discard_blocks(0, 1).unwrap();
    assert_eq!(cache.write_block_count(), 0);
    assert!(!cache.is_cached(0, 1));
}

#[test]
fn out_of_range_access_is_rejected() {
    let device = MemDevice::new(512, 64);
    let cache = WriteBackCache::new(device, rw_config()).unwrap();

    let err = cache.write(2000, 1, &block(512, 1)).unwrap_err();
    assert_eq!(err, CacheError::InvalidParameter);
}
