//! The client-supplied callback boundary.

use crate::error::CacheResult;
use crate::flags::UsageFlags;
use crate::lba::Lba;

/// Which kind of operation failed, for [`ErrorContext`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorOp {
    Read,
    Write,
    UpdateReloc,
}

/// Everything the error handler needs to decide what happens next.
#[derive(Debug, Clone, Copy)]
pub struct ErrorContext {
    pub op: ErrorOp,
    pub lba: Lba,
    pub block_count: u32,
}

/// Verdict returned by [`BlockDevice::handle_error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorAction {
    /// Try the operation once more.
    Retry,
    /// Surface the original error to the caller.
    Fail,
    /// Escalate to [`crate::error::CacheError::DriverInternalError`].
    Fatal,
}

impl<T: BlockDevice + ?Sized> BlockDevice for std::sync::Arc<T> {
    fn read(&self, buf: &mut [u8], lba: Lba, temp_hint: bool) -> CacheResult<usize> {
        T::read(self, buf, lba, temp_hint)
    }

    fn write(&self, buf: &[u8], lba: Lba, temp_hint: bool) -> CacheResult<usize> {
        T::write(self, buf, lba, temp_hint)
    }

    fn check_used(&self, lba: Lba) -> UsageFlags {
        T::check_used(self, lba)
    }

    fn update_reloc(&self, reloc_tab: &[Lba]) -> CacheResult<Lba> {
        T::update_reloc(self, reloc_tab)
    }

    fn handle_error(&self, ctx: &ErrorContext) -> ErrorAction {
        T::handle_error(self, ctx)
    }
}

/// The synchronous I/O boundary the engine calls through. Implementations must not
/// re-enter the owning [`crate::cache::WriteBackCache`] instance.
pub trait BlockDevice {
    /// Read `buf.len()` bytes starting at `lba`. `temp_hint` is set when the
    /// destination is the engine's scratch buffer rather than a per-block cache
    /// buffer, in case the implementation wants to skip a defensive copy.
    fn read(&self, buf: &mut [u8], lba: Lba, temp_hint: bool) -> CacheResult<usize>;

    /// Write `buf` starting at `lba`. In WORM mode `lba` may be
    /// [`crate::lba::ALLOCATE_NEW`], in which case `update_reloc` has already been
    /// called for the blocks in `buf`.
    fn write(&self, buf: &[u8], lba: Lba, temp_hint: bool) -> CacheResult<usize>;

    /// Usage classification for `lba`, queried before deciding whether a miss needs
    /// a device read at all.
    fn check_used(&self, lba: Lba) -> UsageFlags;

    /// WORM-only: relocate the logical addresses in `reloc_tab` to a freshly
    /// allocated packet, returning its physical address.
    fn update_reloc(&self, reloc_tab: &[Lba]) -> CacheResult<Lba> {
        let _ = reloc_tab;
        Err(crate::error::CacheError::DriverInternalError)
    }

    /// Consulted on every read/write/relocation failure.
    fn handle_error(&self, ctx: &ErrorContext) -> ErrorAction {
        let _ = ctx;
        ErrorAction::Fail
    }
}
