//! A write-back block cache that sits between a filesystem (or similar consumer)
//! and a block device, batching small writes into device-aligned packets and
//! deferring them under a configurable dual limit on cached blocks and frames.

mod cache;
mod config;
mod device;
mod direct;
mod engine;
mod error;
mod eviction;
mod flags;
mod flush;
mod frame;
mod index;
mod lba;
mod packet;
mod random;
mod rw;

pub use cache::{DirectSession, WriteBackCache};
pub use config::CacheConfig;
pub use device::{BlockDevice, ErrorAction, ErrorContext, ErrorOp};
pub use error::{CacheError, CacheResult};
pub use flags::{CacheFlags, Mode, UsageFlags};
pub use lba::{Geometry, Lba, ALLOCATE_NEW};
