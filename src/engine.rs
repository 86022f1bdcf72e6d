//! Cache engine state. Single-threaded by construction — [`crate::cache::WriteBackCache`]
//! is the only thing that takes a lock; every method here assumes exclusive access.

use std::collections::BTreeMap;

use log::trace;

use crate::config::CacheConfig;
use crate::device::BlockDevice;
use crate::error::{CacheError, CacheResult};
use crate::flags::{CacheFlags, Mode};
use crate::frame::Frame;
use crate::index::SortedIndex;
use crate::lba::{Geometry, Lba};
use crate::random::Lcg;

pub(crate) struct Engine<D: BlockDevice> {
    pub(crate) device: D,
    pub(crate) config: CacheConfig,
    pub(crate) geometry: Geometry,
    pub(crate) mode: Mode,
    pub(crate) flags: CacheFlags,
    pub(crate) frames: BTreeMap<u64, Frame>,
    pub(crate) cached: SortedIndex,
    pub(crate) modified: SortedIndex,
    pub(crate) rng: Lcg,
    /// Scratch buffer sized to one packet, used to assemble the read-modify-write
    /// payload.
    pub(crate) tmp_buf: Vec<u8>,
    /// Second scratch buffer, used to assemble a WORM relocation packet out of
    /// blocks scattered across more than one source frame.
    pub(crate) tmp_buf_r: Vec<u8>,
    /// Pending relocation addresses, length at most `PacketSize`.
    pub(crate) reloc_tab: Vec<Lba>,
    pub(crate) tries_for_na: u32,
    /// Bracket depth for `start_direct`/`end_direct`; `direct` refuses to run
    /// outside a bracket.
    pub(crate) direct_depth: u32,
}

impl<D: BlockDevice> Engine<D> {
    pub(crate) fn new(device: D, config: CacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let geometry = config.geometry();
        let packet_bytes = geometry.packet_size() as usize * geometry.block_size();
        let seed = config.seed.unwrap_or_else(default_seed);
        Ok(Self {
            device,
            mode: config.mode,
            flags: config.flags,
            tmp_buf: vec![0u8; packet_bytes],
            tmp_buf_r: vec![0u8; packet_bytes],
            reloc_tab: Vec::with_capacity(geometry.packet_size() as usize),
            rng: Lcg::new(seed),
            frames: BTreeMap::new(),
            cached: SortedIndex::new(),
            modified: SortedIndex::new(),
            tries_for_na: 0,
            direct_depth: 0,
            geometry,
            config,
        })
    }

    pub(crate) fn in_range(&self, lba: Lba, bcount: u64) -> bool {
        bcount > 0
            && lba >= self.config.first_lba
            && lba.checked_add(bcount - 1).map_or(false, |last| last <= self.config.last_lba)
    }

    pub(crate) fn write_block_count(&self) -> usize {
        self.modified.len()
    }

    pub(crate) fn is_cached_range(&self, lba: Lba, bcount: u64) -> bool {
        (0..bcount).all(|i| self.cached.contains(lba + i))
    }

    pub(crate) fn set_mode(&mut self, mode: Mode) {
        trace!("cache mode {:?} -> {:?}", self.mode, mode);
        self.mode = mode;
    }

    pub(crate) fn mode(&self) -> Mode {
        self.mode
    }

    pub(crate) fn ch_flags(&mut self, set: CacheFlags, clear: CacheFlags) {
        self.flags.remove(clear);
        self.flags.insert(set);
    }

    pub(crate) fn flags(&self) -> CacheFlags {
        self.flags
    }

    /// Drop a cached block's buffer and remove it from both sorted indexes. Does
    /// not touch the owning frame's `block_count` bookkeeping — callers adjust the
    /// frame separately so frame removal can be batched.
    pub(crate) fn forget_block(&mut self, frame_no: u64, lba: Lba) {
        self.cached.remove_item(lba);
        self.modified.remove_item(lba);
        if let Some(frame) = self.frames.get_mut(&frame_no) {
            frame.vacate(self.geometry.offset_in_frame(lba));
            if frame.is_empty() {
                self.frames.remove(&frame_no);
            }
        }
    }

    /// Remove every block of `[lba, lba+count)` from the indexes and its owning
    /// frame, without issuing any I/O. Used by `discard_blocks` and after a
    /// successful flush.
    pub(crate) fn discard_range(&mut self, lba: Lba, count: u64) {
        for off in 0..count {
            let b = lba + off;
            let frame_no = self.geometry.frame_of(b);
            self.forget_block(frame_no, b);
        }
    }

    pub(crate) fn discard_blocks(&mut self, lba: Lba, bcount: u64) -> CacheResult<()> {
        if !self.in_range(lba, bcount) {
            return Err(CacheError::InvalidParameter);
        }
        self.discard_range(lba, bcount);
        Ok(())
    }
}

fn default_seed() -> u32 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.subsec_nanos() ^ (d.as_secs() as u32))
        .unwrap_or(0x2545F491)
}
