//! Flush, purge, and discard. See SPEC_FULL.md §4.6.

use std::collections::BTreeSet;

use crate::device::BlockDevice;
use crate::engine::Engine;
use crate::error::{CacheError, CacheResult};
use crate::flags::Mode;
use crate::index::SortedIndex;
use crate::lba::Lba;

impl<D: BlockDevice> Engine<D> {
    /// Packet-align `[lba, lba+bcount)` and read-modify-write every packet whose
    /// owning frame exists. Blocks remain cached.
    pub(crate) fn flush_blocks(&mut self, lba: Lba, bcount: u64) -> CacheResult<()> {
        if bcount == 0 {
            return Ok(());
        }
        if !self.in_range(lba, bcount) {
            return Err(CacheError::InvalidParameter);
        }
        let packet_size = self.geometry.packet_size();
        let start = self.geometry.packet_base(lba);
        let end = self.geometry.packet_base(lba + bcount - 1) + packet_size;

        match self.mode {
            Mode::Rw | Mode::Rom => {
                let mut p = start;
                while p < end {
                    let frame_no = self.geometry.frame_of(p);
                    if self.frames.contains_key(&frame_no) {
                        self.update_packet(frame_no, p, true)?;
                    }
                    p += packet_size;
                }
            }
            Mode::Ram => self.flush_ram_range(start, end - start)?,
            Mode::R | Mode::Ewr => {
                while self.try_build_and_relocate_packet()? {}
            }
        }
        Ok(())
    }

    /// Flush every modified block. Dispatches by mode; WORM has no in-place flush
    /// and defers to `purge_all`.
    pub(crate) fn flush_all(&mut self) -> CacheResult<()> {
        match self.mode {
            Mode::Rw | Mode::Rom => {
                let packets: BTreeSet<Lba> = self
                    .modified
                    .iter()
                    .map(|l| self.geometry.packet_base(l))
                    .collect();
                for p in packets {
                    let frame_no = self.geometry.frame_of(p);
                    self.update_packet(frame_no, p, true)?;
                }
                Ok(())
            }
            Mode::Ram => {
                let mods: Vec<Lba> = self.modified.iter().collect();
                if let (Some(&min), Some(&max)) = (mods.first(), mods.last()) {
                    self.flush_ram_range(min, max - min + 1)?;
                }
                Ok(())
            }
            Mode::R | Mode::Ewr => self.purge_all(),
        }
    }

    /// Like `flush_all`, but additionally frees every cached buffer and removes
    /// every frame.
    pub(crate) fn purge_all(&mut self) -> CacheResult<()> {
        match self.mode {
            Mode::Rw | Mode::Rom => {
                let packets: BTreeSet<Lba> = self
                    .modified
                    .iter()
                    .map(|l| self.geometry.packet_base(l))
                    .collect();
                for p in packets {
                    let frame_no = self.geometry.frame_of(p);
                    self.update_packet(frame_no, p, true)?;
                }
            }
            Mode::Ram => {
                let mods: Vec<Lba> = self.modified.iter().collect();
                if let (Some(&min), Some(&max)) = (mods.first(), mods.last()) {
                    self.flush_ram_range(min, max - min + 1)?;
                }
            }
            Mode::R | Mode::Ewr => self.purge_worm()?,
        }

        let remaining: Vec<Lba> = self.cached.iter().collect();
        for lba in remaining {
            let frame_no = self.geometry.frame_of(lba);
            self.forget_block(frame_no, lba);
        }
        self.frames.clear();
        self.cached = SortedIndex::new();
        self.modified = SortedIndex::new();
        Ok(())
    }

    /// WORM-only: relocate every full packet obtainable from ModifiedBlocks, then
    /// relocate whatever remains as a single short packet (acceptable at an
    /// explicit Purge, unlike the forced-eviction path).
    pub(crate) fn purge_worm(&mut self) -> CacheResult<()> {
        while self.try_build_and_relocate_packet()? {}
        if !self.modified.is_empty() {
            let lbas: Vec<Lba> = self.modified.iter().collect();
            self.relocate_packet(&lbas)?;
        }
        Ok(())
    }

    /// Called after a client-managed teardown to eagerly commit any relocation
    /// bookkeeping still pending for WORM media. For non-WORM modes this is a
    /// no-op; WORM has no in-place flush, so this is equivalent to `purge_all`.
    pub(crate) fn sync_reloc(&mut self) -> CacheResult<()> {
        if self.mode.is_worm() {
            self.purge_all()
        } else {
            Ok(())
        }
    }
}
