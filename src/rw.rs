//! Public read/write paths. See SPEC_FULL.md §4.3–§4.4.

use log::trace;

use crate::device::BlockDevice;
use crate::engine::Engine;
use crate::error::{CacheError, CacheResult};
use crate::flags::{CacheFlags, Mode, UsageFlags};
use crate::frame::Frame;
use crate::lba::Lba;

impl<D: BlockDevice> Engine<D> {
    pub(crate) fn read_impl(&mut self, lba: Lba, bcount: u64, out: &mut [u8]) -> CacheResult<()> {
        if bcount == 0 {
            return Ok(());
        }
        let block_size = self.geometry.block_size();
        if out.len() != bcount as usize * block_size {
            return Err(CacheError::InvalidParameter);
        }

        let max_chunk = (self.config.max_bytes_to_read / block_size).max(1) as u64;
        let packet_size = self.geometry.packet_size();
        if bcount >= self.config.max_blocks as u64 || bcount > max_chunk {
            let stride = if bcount >= self.config.max_blocks as u64 {
                packet_size
            } else {
                max_chunk
            };
            let mut done = 0u64;
            while done < bcount {
                let chunk = stride.min(bcount - done);
                let byte_off = done as usize * block_size;
                let chunk_bytes = chunk as usize * block_size;
                self.read_impl(lba + done, chunk, &mut out[byte_off..byte_off + chunk_bytes])?;
                done += chunk;
            }
            return Ok(());
        }

        if !self.in_range(lba, bcount) {
            trace!("bypass read outside managed range at {lba}+{bcount}");
            self.device_read_into_retry(out, lba, false)?;
            return Ok(());
        }

        if self.flags.contains(CacheFlags::CACHE_WHOLE_PACKET) && bcount < packet_size {
            self.preread_packet(lba)?;
        }

        for i in 0..bcount {
            let cur = lba + i;
            let frame_no = self.geometry.frame_of(cur);
            let off = self.geometry.offset_in_frame(cur);
            let dst = &mut out[i as usize * block_size..(i as usize + 1) * block_size];

            let cached = self
                .frames
                .get(&frame_no)
                .and_then(|f| f.slot(off).buf().map(|b| b.to_vec()));
            if let Some(buf) = cached {
                dst.copy_from_slice(&buf);
                if let Some(f) = self.frames.get_mut(&frame_no) {
                    f.access_count += 1;
                }
                continue;
            }

            let usage = self.device.check_used(cur);
            if usage.contains(UsageFlags::BAD) {
                if !self.flags.contains(CacheFlags::MARK_BAD_BLOCKS) {
                    return Err(CacheError::DeviceDataError);
                }
                dst.fill(0);
                self.cache_new_block(frame_no, off, cur, dst.to_vec().into_boxed_slice(), true)?;
                continue;
            }
            if usage.contains(UsageFlags::ZERO) {
                dst.fill(0);
                continue;
            }

            self.device_read_into_retry(dst, cur, false)?;
            self.cache_new_block(frame_no, off, cur, dst.to_vec().into_boxed_slice(), false)?;
        }
        Ok(())
    }

    /// Install a freshly read block into its frame, creating the frame if needed
    /// and respecting the `check_limits` eviction gate. No-op if another path
    /// already occupied the slot first.
    fn cache_new_block(&mut self, frame_no: u64, off: usize, lba: Lba, buf: Box<[u8]>, bad: bool) -> CacheResult<()> {
        let need_new_frame = !self.frames.contains_key(&frame_no);
        self.check_limits(1, need_new_frame)?;
        let blocks_per_frame = self.geometry.blocks_per_frame();
        self.frames
            .entry(frame_no)
            .or_insert_with(|| Frame::new(blocks_per_frame));
        let frame = self.frames.get_mut(&frame_no).unwrap();
        if frame.slot(off).is_empty() {
            frame.occupy(off, buf, false, bad);
            frame.access_count += 1;
            self.cached.insert_item(lba);
        }
        Ok(())
    }

    /// Pre-read the packet containing `lba` when every currently-uncached slot in
    /// it is neither already cached nor logically zero, populating the rest.
    fn preread_packet(&mut self, lba: Lba) -> CacheResult<()> {
        let packet_size = self.geometry.packet_size();
        let packet_lba = self.geometry.packet_base(lba);
        let frame_no = self.geometry.frame_of(packet_lba);
        let need_new_frame = !self.frames.contains_key(&frame_no);
        self.check_limits(packet_size, need_new_frame)?;
        let blocks_per_frame = self.geometry.blocks_per_frame();
        self.frames
            .entry(frame_no)
            .or_insert_with(|| Frame::new(blocks_per_frame));

        let block_size = self.geometry.block_size();
        let mark_bad = self.flags.contains(CacheFlags::MARK_BAD_BLOCKS);
        let mut need_any = false;
        for i in 0..packet_size {
            let l = packet_lba + i;
            let off = self.geometry.offset_in_frame(l);
            let is_empty = self.frames.get(&frame_no).unwrap().slot(off).is_empty();
            if !is_empty {
                continue;
            }
            let usage = self.device.check_used(l);
            if usage.contains(UsageFlags::BAD) {
                if !mark_bad {
                    return Err(CacheError::DeviceDataError);
                }
                let buf = vec![0u8; block_size].into_boxed_slice();
                self.frames.get_mut(&frame_no).unwrap().occupy(off, buf, false, true);
                self.cached.insert_item(l);
                continue;
            }
            if !usage.contains(UsageFlags::ZERO) {
                need_any = true;
            }
        }
        if !need_any {
            return Ok(());
        }

        let packet_bytes = packet_size as usize * block_size;
        self.device_read_retry(packet_bytes, packet_lba, true)?;

        for i in 0..packet_size {
            let l = packet_lba + i;
            let off = self.geometry.offset_in_frame(l);
            let is_empty = self.frames.get(&frame_no).unwrap().slot(off).is_empty();
            if is_empty {
                let start = i as usize * block_size;
                let buf = self.tmp_buf[start..start + block_size].to_vec().into_boxed_slice();
                self.frames.get_mut(&frame_no).unwrap().occupy(off, buf, false, false);
                self.cached.insert_item(l);
            }
        }
        Ok(())
    }

    pub(crate) fn write_impl(&mut self, lba: Lba, bcount: u64, data: &[u8]) -> CacheResult<()> {
        if bcount == 0 {
            return Ok(());
        }
        if self.mode.is_read_only() {
            return Err(CacheError::MediaWriteProtected);
        }
        let block_size = self.geometry.block_size();
        if data.len() != bcount as usize * block_size {
            return Err(CacheError::InvalidParameter);
        }
        if !self.in_range(lba, bcount) {
            return Err(CacheError::InvalidParameter);
        }

        let packet_size = self.geometry.packet_size();
        if bcount > packet_size {
            let stride = packet_size.min(bcount);
            let mut done = 0u64;
            while done < bcount {
                let chunk = stride.min(bcount - done);
                let byte_off = done as usize * block_size;
                let chunk_bytes = chunk as usize * block_size;
                self.write_impl(lba + done, chunk, &data[byte_off..byte_off + chunk_bytes])?;
                done += chunk;
            }
            return Ok(());
        }

        let frame_no_start = self.geometry.frame_of(lba);
        let frame_no_end = self.geometry.frame_of(lba + bcount - 1);
        let packet_aligned =
            self.geometry.is_packet_aligned(lba) && self.geometry.is_packet_aligned(lba + bcount);
        let frame_cold = !self.frames.contains_key(&frame_no_start);
        if packet_aligned
            && frame_no_start == frame_no_end
            && frame_cold
            && !self.mode.is_worm()
            && !self.flags.contains(CacheFlags::NO_WRITE_THROUGH)
        {
            trace!("bypass write of {bcount} blocks at {lba}");
            self.device_write_from_retry(data, lba, false)?;
            return Ok(());
        }

        for i in 0..bcount {
            let cur = lba + i;
            let frame_no = self.geometry.frame_of(cur);
            let off = self.geometry.offset_in_frame(cur);
            if self.flags.contains(CacheFlags::RO_BAD_BLOCKS)
                && self.frames.get(&frame_no).is_some_and(|f| f.slot(off).is_bad())
            {
                return Err(CacheError::DeviceDataError);
            }
            let need_new_frame = !self.frames.contains_key(&frame_no);
            self.check_limits(1, need_new_frame)?;
            let blocks_per_frame = self.geometry.blocks_per_frame();
            self.frames
                .entry(frame_no)
                .or_insert_with(|| Frame::new(blocks_per_frame));

            let src = &data[i as usize * block_size..(i as usize + 1) * block_size];
            let frame = self.frames.get_mut(&frame_no).unwrap();
            if frame.slot(off).is_empty() {
                frame.occupy(off, src.to_vec().into_boxed_slice(), true, false);
            } else if let Some(buf) = frame.slot_mut(off).buf_mut() {
                buf.copy_from_slice(src);
                frame.set_modified(off, true);
            }
            frame.update_count += 1;
            self.cached.insert_item(cur);
            self.modified.insert_item(cur);
        }

        if self.mode == Mode::Ram && !self.flags.contains(CacheFlags::NO_WRITE_THROUGH) {
            let crosses_packet = self.geometry.packet_base(lba) != self.geometry.packet_base(lba + bcount - 1);
            if crosses_packet || bcount > packet_size {
                self.flush_ram_range(lba, bcount)?;
            }
        }
        Ok(())
    }
}
