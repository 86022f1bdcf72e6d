//! Error taxonomy for the write-back block cache.

use std::fmt;

/// Result alias used throughout the crate.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors the cache engine can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheError {
    /// Alignment, range, or bounds violation in a public call.
    InvalidParameter,
    /// A buffer or scratch allocation could not be obtained.
    InsufficientResources,
    /// The usage oracle reported a block as permanently bad.
    DeviceDataError,
    /// A `read`/`write`/`update_reloc` callback returned failure.
    IoError,
    /// An internal invariant was violated; indicates a bug in the engine.
    DriverInternalError,
    /// A write was attempted against a read-only (ROM) cache.
    MediaWriteProtected,
    /// Internal signal from packet update: not ready to read-modify-write yet.
    /// Never escapes the crate's public API.
    Retry,
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheError::InvalidParameter => write!(f, "invalid parameter"),
            CacheError::InsufficientResources => write!(f, "insufficient resources"),
            CacheError::DeviceDataError => write!(f, "device data error"),
            CacheError::IoError => write!(f, "device I/O error"),
            CacheError::DriverInternalError => write!(f, "internal cache invariant violated"),
            CacheError::MediaWriteProtected => write!(f, "media is write protected"),
            CacheError::Retry => write!(f, "retry"),
        }
    }
}

impl std::error::Error for CacheError {}
