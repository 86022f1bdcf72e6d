//! Flag sets and media modes.

use bitflags::bitflags;

bitflags! {
    /// Client-controlled behavior toggles for a cache instance.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CacheFlags: u32 {
        /// On a sub-packet read miss, pre-read the whole containing packet.
        const CACHE_WHOLE_PACKET = 0x0001;
        /// Always overlay and always write, skipping the unchanged-packet check.
        const DO_NOT_COMPARE     = 0x0002;
        /// Reserved for chained I/O in the reference implementation; no-op here.
        const CHAINED_IO         = 0x0004;
        /// Mark blocks reported bad by the usage oracle instead of failing outright.
        const MARK_BAD_BLOCKS    = 0x0008;
        /// Refuse writes to blocks already marked bad.
        const RO_BAD_BLOCKS      = 0x0010;
        /// Disable write-through flushing on packet-crossing RAM writes.
        const NO_WRITE_THROUGH   = 0x0020;
    }
}

bitflags! {
    /// Block-usage classification reported by the client's usage oracle.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct UsageFlags: u32 {
        const USED = 0x01;
        const ZERO = 0x02;
        const BAD  = 0x04;
    }
}

/// Media class. Determines which eviction/flush strategy the engine runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Read-only.
    Rom,
    /// Rewritable, random-access; flush is read-modify-write.
    Rw,
    /// Write-once; flush relocates to newly allocated packets.
    R,
    /// Randomly writable without read-modify-write (e.g. RAM disk); flush is
    /// sector-granular.
    Ram,
    /// Erase-cycle-required media; treated identically to `R`.
    Ewr,
}

impl Mode {
    pub fn is_worm(self) -> bool {
        matches!(self, Mode::R | Mode::Ewr)
    }

    pub fn is_read_only(self) -> bool {
        matches!(self, Mode::Rom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ewr_behaves_as_worm() {
        assert!(Mode::Ewr.is_worm());
        assert!(Mode::R.is_worm());
        assert!(!Mode::Rw.is_worm());
    }

    #[test]
    fn flag_union() {
        let f = CacheFlags::CACHE_WHOLE_PACKET | CacheFlags::NO_WRITE_THROUGH;
        assert!(f.contains(CacheFlags::CACHE_WHOLE_PACKET));
        assert!(!f.contains(CacheFlags::DO_NOT_COMPARE));
    }
}
