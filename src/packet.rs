//! Packet-level I/O: read-modify-write for RW/ROM, sector coalescing for RAM, and
//! relocation-packet assembly for WORM.

use log::{trace, warn};

use crate::device::{BlockDevice, ErrorAction, ErrorContext, ErrorOp};
use crate::engine::Engine;
use crate::error::{CacheError, CacheResult};
use crate::frame::BlockSlot;
use crate::lba::Lba;

/// Outcome of [`Engine::update_packet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum PacketOutcome {
    /// No modified blocks in the packet; nothing was written.
    NothingToDo,
    /// The packet was read-modified-written.
    Wrote,
    /// Modified blocks exist but `prefer_write` was false.
    Retry,
}

impl<D: BlockDevice> Engine<D> {
    /// Issue `self.device.read(&mut self.tmp_buf[..len], lba, temp_hint)`, consulting
    /// the error handler and retrying exactly once on `ErrorAction::Retry`.
    pub(crate) fn device_read_retry(&mut self, len: usize, lba: Lba, temp_hint: bool) -> CacheResult<usize> {
        match self.device.read(&mut self.tmp_buf[..len], lba, temp_hint) {
            Ok(n) => Ok(n),
            Err(e) => self.recover_read(e, len, lba, temp_hint),
        }
    }

    fn recover_read(&mut self, err: CacheError, len: usize, lba: Lba, temp_hint: bool) -> CacheResult<usize> {
        let ctx = ErrorContext {
            op: ErrorOp::Read,
            lba,
            block_count: (len / self.geometry.block_size()) as u32,
        };
        match self.device.handle_error(&ctx) {
            ErrorAction::Retry => {
                warn!("retrying read at lba {lba} after {err}");
                self.device.read(&mut self.tmp_buf[..len], lba, temp_hint)
            }
            ErrorAction::Fail => Err(err),
            ErrorAction::Fatal => Err(CacheError::DriverInternalError),
        }
    }

    /// Bypass I/O straight into a caller-owned buffer, bypassing `self.tmp_buf`
    /// entirely — used for out-of-range reads and packet-aligned cache-miss writes
    /// that never touch a cache buffer.
    pub(crate) fn device_read_into_retry(&mut self, buf: &mut [u8], lba: Lba, temp_hint: bool) -> CacheResult<usize> {
        match self.device.read(buf, lba, temp_hint) {
            Ok(n) => Ok(n),
            Err(e) => {
                let ctx = ErrorContext {
                    op: ErrorOp::Read,
                    lba,
                    block_count: (buf.len() / self.geometry.block_size()) as u32,
                };
                match self.device.handle_error(&ctx) {
                    ErrorAction::Retry => {
                        warn!("retrying bypass read at lba {lba} after {e}");
                        self.device.read(buf, lba, temp_hint)
                    }
                    ErrorAction::Fail => Err(e),
                    ErrorAction::Fatal => Err(CacheError::DriverInternalError),
                }
            }
        }
    }

    pub(crate) fn device_write_from_retry(&mut self, buf: &[u8], lba: Lba, temp_hint: bool) -> CacheResult<usize> {
        match self.device.write(buf, lba, temp_hint) {
            Ok(n) => Ok(n),
            Err(e) => {
                let ctx = ErrorContext {
                    op: ErrorOp::Write,
                    lba,
                    block_count: (buf.len() / self.geometry.block_size()) as u32,
                };
                match self.device.handle_error(&ctx) {
                    ErrorAction::Retry => {
                        warn!("retrying bypass write at lba {lba} after {e}");
                        self.device.write(buf, lba, temp_hint)
                    }
                    ErrorAction::Fail => Err(e),
                    ErrorAction::Fatal => Err(CacheError::DriverInternalError),
                }
            }
        }
    }

    pub(crate) fn device_write_retry(&mut self, len: usize, lba: Lba, temp_hint: bool) -> CacheResult<usize> {
        match self.device.write(&self.tmp_buf[..len], lba, temp_hint) {
            Ok(n) => Ok(n),
            Err(e) => self.recover_write(e, len, lba, temp_hint),
        }
    }

    fn recover_write(&mut self, err: CacheError, len: usize, lba: Lba, temp_hint: bool) -> CacheResult<usize> {
        let ctx = ErrorContext {
            op: ErrorOp::Write,
            lba,
            block_count: (len / self.geometry.block_size()) as u32,
        };
        match self.device.handle_error(&ctx) {
            ErrorAction::Retry => {
                warn!("retrying write at lba {lba} after {err}");
                self.device.write(&self.tmp_buf[..len], lba, temp_hint)
            }
            ErrorAction::Fail => Err(err),
            ErrorAction::Fatal => Err(CacheError::DriverInternalError),
        }
    }

    /// Read-modify-write the packet starting at `packet_lba`, owned by `frame_no`.
    /// See SPEC_FULL.md §4.8.
    pub(crate) fn update_packet(
        &mut self,
        frame_no: u64,
        packet_lba: Lba,
        prefer_write: bool,
    ) -> CacheResult<PacketOutcome> {
        let packet_blocks = self.geometry.packet_size();
        let block_size = self.geometry.block_size();
        let base = self.geometry.frame_base(frame_no);

        let mut any_modified = false;
        let mut any_needs_read = false;
        {
            let frame = self
                .frames
                .get(&frame_no)
                .ok_or(CacheError::DriverInternalError)?;
            for i in 0..packet_blocks {
                let lba = packet_lba + i;
                let offset = (lba - base) as usize;
                match frame.slot(offset) {
                    BlockSlot::Cached { modified: true, .. } => any_modified = true,
                    BlockSlot::Cached { .. } => {}
                    BlockSlot::Empty => {
                        let usage = self.device.check_used(lba);
                        if !usage.contains(crate::flags::UsageFlags::BAD)
                            && !usage.contains(crate::flags::UsageFlags::ZERO)
                        {
                            any_needs_read = true;
                        }
                    }
                }
            }
        }

        if !any_modified {
            return Ok(PacketOutcome::NothingToDo);
        }
        if !prefer_write {
            return Ok(PacketOutcome::Retry);
        }

        let packet_bytes = packet_blocks as usize * block_size;
        if any_needs_read {
            self.device_read_retry(packet_bytes, packet_lba, true)?;
        } else {
            self.tmp_buf[..packet_bytes].fill(0);
        }

        let do_not_compare = self.flags.contains(crate::flags::CacheFlags::DO_NOT_COMPARE);
        let mut changed = do_not_compare;
        {
            let frame = self
                .frames
                .get(&frame_no)
                .ok_or(CacheError::DriverInternalError)?;
            for i in 0..packet_blocks {
                let lba = packet_lba + i;
                let offset = (lba - base) as usize;
                if let BlockSlot::Cached { buf, modified, .. } = frame.slot(offset) {
                    if *modified || do_not_compare {
                        let start = i as usize * block_size;
                        let dest = &mut self.tmp_buf[start..start + block_size];
                        if !changed && dest != &buf[..] {
                            changed = true;
                        }
                        dest.copy_from_slice(buf);
                    }
                }
            }
        }

        if changed {
            trace!("rmw packet at {packet_lba} ({packet_bytes} bytes)");
            self.device_write_retry(packet_bytes, packet_lba, false)?;
        }

        if let Some(frame) = self.frames.get_mut(&frame_no) {
            for i in 0..packet_blocks {
                let lba = packet_lba + i;
                let offset = (lba - base) as usize;
                frame.set_modified(offset, false);
            }
        }
        for i in 0..packet_blocks {
            self.modified.remove_item(packet_lba + i);
        }

        Ok(PacketOutcome::Wrote)
    }

    /// Sector-granular coalescing flush for RAM mode: writes runs of consecutive
    /// modified blocks directly, without reading the rest of the packet.
    pub(crate) fn flush_ram_range(&mut self, lba: Lba, count: u64) -> CacheResult<()> {
        let block_size = self.geometry.block_size();
        let max_run = self.geometry.packet_size();
        let mut offset = 0u64;
        while offset < count {
            let run_start = lba + offset;
            if !self.modified.contains(run_start) {
                offset += 1;
                continue;
            }
            let mut run_len = 0u64;
            while run_len < max_run
                && offset + run_len < count
                && self.modified.contains(lba + offset + run_len)
            {
                run_len += 1;
            }
            let frame_no = self.geometry.frame_of(run_start);
            let base = self.geometry.frame_base(frame_no);
            {
                let frame = self
                    .frames
                    .get(&frame_no)
                    .ok_or(CacheError::DriverInternalError)?;
                for i in 0..run_len {
                    let off = (run_start + i - base) as usize;
                    let start = i as usize * block_size;
                    if let Some(buf) = frame.slot(off).buf() {
                        self.tmp_buf[start..start + block_size].copy_from_slice(buf);
                    }
                }
            }
            self.device_write_retry((run_len as usize) * block_size, run_start, false)?;
            if let Some(frame) = self.frames.get_mut(&frame_no) {
                for i in 0..run_len {
                    let off = (run_start + i - base) as usize;
                    frame.set_modified(off, false);
                }
            }
            for i in 0..run_len {
                self.modified.remove_item(run_start + i);
            }
            offset += run_len.max(1);
        }
        Ok(())
    }

    /// WORM relocation: gather the given (already-modified) block addresses — which
    /// must number exactly one packet's worth — into the relocation scratch buffer,
    /// commit the relocation table, and write the assembled packet to the address
    /// the client allocates.
    pub(crate) fn relocate_packet(&mut self, lbas: &[Lba]) -> CacheResult<()> {
        let block_size = self.geometry.block_size();
        for (i, &lba) in lbas.iter().enumerate() {
            let frame_no = self.geometry.frame_of(lba);
            let frame = self
                .frames
                .get(&frame_no)
                .ok_or(CacheError::DriverInternalError)?;
            let offset = self.geometry.offset_in_frame(lba);
            let buf = frame.slot(offset).buf().ok_or(CacheError::DriverInternalError)?;
            self.tmp_buf_r[i * block_size..(i + 1) * block_size].copy_from_slice(buf);
        }

        let dest = self.device.update_reloc(lbas)?;
        let len = lbas.len() * block_size;
        self.tmp_buf[..len].copy_from_slice(&self.tmp_buf_r[..len]);
        self.device_write_retry(len, dest, false)?;

        for &lba in lbas {
            let frame_no = self.geometry.frame_of(lba);
            self.forget_block(frame_no, lba);
        }
        Ok(())
    }
}
