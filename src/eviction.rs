//! Dual-limit eviction controller. Dispatches by media mode; never uses LRU — see
//! SPEC_FULL.md §4.9 for the biased-random victim selection this implements.

use log::debug;

use crate::device::BlockDevice;
use crate::engine::Engine;
use crate::error::CacheResult;
use crate::flags::Mode;
use crate::lba::Lba;
use crate::packet::PacketOutcome;

const MAX_TRIES_FOR_NA: u32 = 3;

impl<D: BlockDevice> Engine<D> {
    /// Called by Read, Write, and Direct before consuming more space. `need_new_frame`
    /// signals that the caller is about to insert a frame not yet in the table, so an
    /// extra `frames_to_keep_free` headroom is enforced on top of the hard ceiling.
    pub(crate) fn check_limits(&mut self, bcount: u64, need_new_frame: bool) -> CacheResult<()> {
        self.ensure_frame_capacity(need_new_frame)?;
        self.ensure_block_capacity(bcount)?;
        Ok(())
    }

    fn ensure_frame_capacity(&mut self, need_new_frame: bool) -> CacheResult<()> {
        if self.frames.len() * 4 >= self.config.max_frames * 3 {
            self.frames.retain(|_, f| !f.is_empty());
        }
        let target = self
            .config
            .max_frames
            .saturating_sub(self.config.frames_to_keep_free)
            .max(1);
        let mut guard = self.frames.len() + self.config.max_frames;
        while self.frames.len() + usize::from(need_new_frame) > target && !self.frames.is_empty() {
            self.evict_one_frame()?;
            guard -= 1;
            if guard == 0 {
                break;
            }
        }
        Ok(())
    }

    fn ensure_block_capacity(&mut self, incoming: u64) -> CacheResult<()> {
        let mut guard = self.config.max_blocks * 2 + incoming as usize;
        while self.cached.len() as u64 + incoming > self.config.max_blocks as u64 && !self.cached.is_empty() {
            self.evict_one_block()?;
            guard -= 1;
            if guard == 0 {
                break;
            }
        }
        Ok(())
    }

    fn evict_one_frame(&mut self) -> CacheResult<()> {
        let Some(frame_no) = self.find_frame_to_release() else {
            return Ok(());
        };
        debug!("evicting frame {frame_no}");
        match self.mode {
            Mode::Rw | Mode::Rom => self.flush_frame_rmw(frame_no)?,
            Mode::Ram => {
                let base = self.geometry.frame_base(frame_no);
                let n = self.geometry.blocks_per_frame();
                self.flush_ram_range(base, n)?;
            }
            Mode::R | Mode::Ewr => self.worm_flush_frame(frame_no)?,
        }
        let base = self.geometry.frame_base(frame_no);
        let n = self.geometry.blocks_per_frame();
        self.discard_range(base, n);
        Ok(())
    }

    fn flush_frame_rmw(&mut self, frame_no: u64) -> CacheResult<()> {
        let base = self.geometry.frame_base(frame_no);
        let packet_size = self.geometry.packet_size();
        let packets = self.geometry.blocks_per_frame() / packet_size;
        for p in 0..packets {
            self.update_packet(frame_no, base + p * packet_size, true)?;
        }
        Ok(())
    }

    /// Best-effort WORM eviction: relocate whatever full packets can be assembled
    /// from the global modified set, then drop everything else in the frame. Any
    /// modified block that hasn't reached a full relocation packet is lost unless
    /// the client already called `flush_blocks`/`purge_all` for it; see DESIGN.md.
    fn worm_flush_frame(&mut self, _frame_no: u64) -> CacheResult<()> {
        while self.try_build_and_relocate_packet()? {}
        Ok(())
    }

    pub(crate) fn try_build_and_relocate_packet(&mut self) -> CacheResult<bool> {
        let packet_size = self.geometry.packet_size() as usize;
        if self.modified.len() < packet_size {
            return Ok(false);
        }
        let lbas: Vec<Lba> = self.modified.iter().take(packet_size).collect();
        self.relocate_packet(&lbas)?;
        Ok(true)
    }

    fn evict_one_block(&mut self) -> CacheResult<()> {
        match self.mode {
            Mode::Rw | Mode::Rom => self.evict_one_block_rmw(),
            Mode::Ram => {
                let Some(packet_lba) = self.find_lba_to_release() else {
                    return Ok(());
                };
                let packet_size = self.geometry.packet_size();
                self.flush_ram_range(packet_lba, packet_size)?;
                self.discard_range(packet_lba, packet_size);
                Ok(())
            }
            Mode::R | Mode::Ewr => {
                let Some(packet_lba) = self.find_lba_to_release() else {
                    return Ok(());
                };
                let packet_size = self.geometry.packet_size();
                if !self.try_build_and_relocate_packet()? {
                    debug!("dropping unreloc'd WORM packet at {packet_lba} under pressure");
                }
                self.discard_range(packet_lba, packet_size);
                Ok(())
            }
        }
    }

    /// RW/ROM eviction: retries a different victim whenever the chosen packet still
    /// has a modified block and the retry budget (`MAX_TRIES_FOR_NA`) has not been
    /// exhausted, rather than discarding dirty data that was never written back.
    fn evict_one_block_rmw(&mut self) -> CacheResult<()> {
        let packet_size = self.geometry.packet_size();
        let attempts = self.cached.len().max(1);
        for _ in 0..attempts {
            let Some(packet_lba) = self.find_lba_to_release() else {
                return Ok(());
            };
            let frame_no = self.geometry.frame_of(packet_lba);
            match self.update_packet(frame_no, packet_lba, false)? {
                PacketOutcome::Retry => {
                    self.tries_for_na += 1;
                    if self.tries_for_na >= MAX_TRIES_FOR_NA {
                        self.tries_for_na = 0;
                        self.update_packet(frame_no, packet_lba, true)?;
                        self.discard_range(packet_lba, packet_size);
                        return Ok(());
                    }
                    // Not yet forced: leave this packet's data intact and try another victim.
                }
                PacketOutcome::NothingToDo | PacketOutcome::Wrote => {
                    self.tries_for_na = 0;
                    self.discard_range(packet_lba, packet_size);
                    return Ok(());
                }
            }
        }
        Ok(())
    }

    /// Scan every cached frame for the smallest `update_count*32 + access_count`
    /// score. If no frame has been written to, fall back to a uniformly random pick
    /// and age every frame's counters (§4.9).
    pub(crate) fn find_frame_to_release(&mut self) -> Option<u64> {
        if self.frames.is_empty() {
            return None;
        }
        let any_updated = self.frames.values().any(|f| f.update_count > 0);
        if !any_updated {
            let idx = self.rng.below(self.frames.len());
            let frame_no = *self.frames.keys().nth(idx)?;
            for f in self.frames.values_mut() {
                f.age();
            }
            return Some(frame_no);
        }
        self.frames
            .iter()
            .min_by_key(|(_, f)| f.score())
            .map(|(k, _)| *k)
    }

    pub(crate) fn find_lba_to_release(&mut self) -> Option<Lba> {
        if self.cached.is_empty() {
            return None;
        }
        let idx = self.rng.below(self.cached.len());
        let lba = self.cached.get(idx)?;
        Some(self.geometry.packet_base(lba))
    }

    pub(crate) fn find_modified_lba_to_release(&mut self) -> Option<Lba> {
        if self.modified.is_empty() {
            return None;
        }
        let idx = self.rng.below(self.modified.len());
        let lba = self.modified.get(idx)?;
        Some(self.geometry.packet_base(lba))
    }
}
