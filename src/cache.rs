//! Public entry point. See SPEC_FULL.md §4.1–§4.6.

use std::sync::{RwLock, RwLockWriteGuard};

use crate::config::CacheConfig;
use crate::device::BlockDevice;
use crate::engine::Engine;
use crate::error::CacheResult;
use crate::flags::{CacheFlags, Mode};
use crate::lba::Lba;

/// A write-back block cache in front of a [`BlockDevice`].
///
/// All state lives behind a single `RwLock`: the engine itself assumes exclusive
/// `&mut self` access and performs no internal locking, so every public method here
/// takes the write half of the lock. There is no reader/writer split at the engine
/// level — a plain read still mutates access counters and can trigger eviction.
pub struct WriteBackCache<D: BlockDevice> {
    engine: RwLock<Engine<D>>,
}

/// A bracket of `direct` calls, opened by [`WriteBackCache::start_direct`].
///
/// Holds the cache's write lock for its entire lifetime, so the pinned buffer
/// handed out by `with_direct` stays stable — no other `read`/`write`/eviction can
/// run until the session ends, whether by calling `end` or by dropping it.
pub struct DirectSession<'a, D: BlockDevice> {
    guard: RwLockWriteGuard<'a, Engine<D>>,
}

impl<D: BlockDevice> DirectSession<'_, D> {
    /// Run `f` against the cache buffer for `lba`, populating it on a miss.
    /// `modified` marks the block dirty and schedules it for eventual flush.
    pub fn with_direct<R>(&mut self, lba: Lba, modified: bool, f: impl FnOnce(&mut [u8]) -> R) -> CacheResult<R> {
        let buf = self.guard.direct(lba, modified)?;
        Ok(f(buf))
    }

    /// End the bracket explicitly. Equivalent to dropping the session.
    pub fn end(mut self) -> CacheResult<()> {
        self.guard.end_direct()
    }
}

impl<D: BlockDevice> Drop for DirectSession<'_, D> {
    fn drop(&mut self) {
        let _ = self.guard.end_direct();
    }
}

impl<D: BlockDevice> WriteBackCache<D> {
    pub fn new(device: D, config: CacheConfig) -> CacheResult<Self> {
        Ok(Self {
            engine: RwLock::new(Engine::new(device, config)?),
        })
    }

    /// Always `true` for a live instance: construction (`new`) either fails before
    /// any `WriteBackCache` exists or succeeds fully, so there is no partially
    /// initialized state to observe. Mirrors the reference API's Init/Release pair,
    /// where `Release` is this type's `Drop`.
    pub fn is_initialized(&self) -> bool {
        true
    }

    pub fn mode(&self) -> Mode {
        self.engine.read().expect("cache lock poisoned").mode()
    }

    pub fn set_mode(&self, mode: Mode) {
        self.engine.write().expect("cache lock poisoned").set_mode(mode);
    }

    pub fn ch_flags(&self, set: CacheFlags, clear: CacheFlags) {
        self.engine.write().expect("cache lock poisoned").ch_flags(set, clear);
    }

    pub fn flags(&self) -> CacheFlags {
        self.engine.read().expect("cache lock poisoned").flags()
    }

    pub fn write_block_count(&self) -> usize {
        self.engine.read().expect("cache lock poisoned").write_block_count()
    }

    pub fn is_cached(&self, lba: Lba, bcount: u64) -> bool {
        self.engine.read().expect("cache lock poisoned").is_cached_range(lba, bcount)
    }

    /// Read `bcount` blocks starting at `lba` into `out`, which must be exactly
    /// `bcount * block_size` bytes.
    pub fn read(&self, lba: Lba, bcount: u64, out: &mut [u8]) -> CacheResult<()> {
        self.engine.write().expect("cache lock poisoned").read_impl(lba, bcount, out)
    }

    /// Write `bcount` blocks starting at `lba` from `data`, which must be exactly
    /// `bcount * block_size` bytes.
    pub fn write(&self, lba: Lba, bcount: u64, data: &[u8]) -> CacheResult<()> {
        self.engine.write().expect("cache lock poisoned").write_impl(lba, bcount, data)
    }

    /// Read-modify-write every dirty packet touching `[lba, lba+bcount)`, leaving
    /// the blocks cached.
    pub fn flush_blocks(&self, lba: Lba, bcount: u64) -> CacheResult<()> {
        self.engine.write().expect("cache lock poisoned").flush_blocks(lba, bcount)
    }

    /// Flush every modified block in the cache, leaving clean blocks cached.
    pub fn flush_all(&self) -> CacheResult<()> {
        self.engine.write().expect("cache lock poisoned").flush_all()
    }

    /// Flush everything, then drop every cached buffer and frame.
    pub fn purge_all(&self) -> CacheResult<()> {
        self.engine.write().expect("cache lock poisoned").purge_all()
    }

    /// Commit any pending WORM relocation bookkeeping; a no-op on non-WORM media.
    pub fn sync_reloc(&self) -> CacheResult<()> {
        self.engine.write().expect("cache lock poisoned").sync_reloc()
    }

    /// Drop `[lba, lba+bcount)` from the cache without writing anything back.
    pub fn discard_blocks(&self, lba: Lba, bcount: u64) -> CacheResult<()> {
        self.engine.write().expect("cache lock poisoned").discard_blocks(lba, bcount)
    }

    /// Begin a bracket of `direct` calls, holding the cache's write lock for the
    /// returned session's entire lifetime. `exclusive` is forwarded to the engine's
    /// own bracket bookkeeping.
    pub fn start_direct(&self, exclusive: bool) -> CacheResult<DirectSession<'_, D>> {
        let mut guard = self.engine.write().expect("cache lock poisoned");
        guard.start_direct(exclusive)?;
        Ok(DirectSession { guard })
    }
}

impl<D: BlockDevice> Drop for WriteBackCache<D> {
    fn drop(&mut self) {
        if let Ok(mut engine) = self.engine.write() {
            let _ = engine.purge_all();
        }
    }
}
