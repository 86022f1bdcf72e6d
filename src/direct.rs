//! Direct (pinned) block access. See SPEC_FULL.md §4.5.
//!
//! `direct` hands the caller a mutable reference straight into the cache buffer,
//! skipping the copy-in/copy-out that `read`/`write` do. It exists for callers that
//! already own a page-sized buffer elsewhere (a filesystem's own buffer cache, say)
//! and just want this cache to track dirtiness and eviction for it.

use crate::device::BlockDevice;
use crate::engine::Engine;
use crate::error::{CacheError, CacheResult};
use crate::flags::{CacheFlags, UsageFlags};
use crate::frame::Frame;
use crate::lba::Lba;

/// Counter increment direct access applies, larger than the bulk +1 so pinned
/// blocks outlive ordinary cache pressure for a while.
const DIRECT_WEIGHT: u64 = 8;

impl<D: BlockDevice> Engine<D> {
    pub(crate) fn start_direct(&mut self, _exclusive: bool) -> CacheResult<()> {
        self.direct_depth += 1;
        Ok(())
    }

    pub(crate) fn end_direct(&mut self) -> CacheResult<()> {
        if self.direct_depth == 0 {
            return Err(CacheError::DriverInternalError);
        }
        self.direct_depth -= 1;
        Ok(())
    }

    /// Returns a mutable reference to the block's cache buffer, populating it on a
    /// miss. Must be called between `start_direct`/`end_direct`.
    pub(crate) fn direct(&mut self, lba: Lba, modified: bool) -> CacheResult<&mut [u8]> {
        if self.direct_depth == 0 {
            return Err(CacheError::DriverInternalError);
        }
        if !self.in_range(lba, 1) {
            return Err(CacheError::InvalidParameter);
        }

        let frame_no = self.geometry.frame_of(lba);
        let off = self.geometry.offset_in_frame(lba);

        if !self.frames.get(&frame_no).is_some_and(|f| !f.slot(off).is_empty()) {
            let usage = self.device.check_used(lba);
            let block_size = self.geometry.block_size();
            let (buf, bad) = if usage.contains(UsageFlags::BAD) {
                if !self.flags.contains(CacheFlags::MARK_BAD_BLOCKS) {
                    return Err(CacheError::DeviceDataError);
                }
                (vec![0u8; block_size].into_boxed_slice(), true)
            } else if usage.contains(UsageFlags::ZERO) {
                (vec![0u8; block_size].into_boxed_slice(), false)
            } else {
                self.device_read_retry(block_size, lba, true)?;
                (self.tmp_buf[..block_size].to_vec().into_boxed_slice(), false)
            };

            let need_new_frame = !self.frames.contains_key(&frame_no);
            self.check_limits(1, need_new_frame)?;
            let blocks_per_frame = self.geometry.blocks_per_frame();
            self.frames
                .entry(frame_no)
                .or_insert_with(|| Frame::new(blocks_per_frame));
            let frame = self.frames.get_mut(&frame_no).unwrap();
            frame.occupy(off, buf, false, bad);
            self.cached.insert_item(lba);
        }

        let frame = self.frames.get_mut(&frame_no).unwrap();
        if modified {
            frame.set_modified(off, true);
            frame.update_count += DIRECT_WEIGHT;
            self.modified.insert_item(lba);
        } else {
            frame.access_count += DIRECT_WEIGHT;
        }

        frame
            .slot_mut(off)
            .buf_mut()
            .ok_or(CacheError::DriverInternalError)
    }
}
