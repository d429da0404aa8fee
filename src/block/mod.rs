use std::io::Error;

mod config;
pub use self::config::block_storage_with_config;

mod gate;
pub use self::gate::IoGate;

mod memory;
pub use self::memory::MemoryBlock;

mod raw;
pub use self::raw::RawBlock;

mod sharded;
pub use self::sharded::ShardedBlock;

/// A fixed-size volume that connections read and write.
///
/// One instance is shared by every connection of an export, so implementations
/// must tolerate concurrent calls. Ranges are already bounds-checked by the caller.
/// After `trim` the range reads back as zeros for every driver in this crate.
pub trait BlockStorage: Send + Sync {
    fn get_name(&self) -> String;
    fn get_volume_size(&self) -> Result<u64, Error>;
    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error>;
    fn write(&self, offset: u64, data: &[u8]) -> Result<(), Error>;
    fn flush(&self) -> Result<(), Error>;
    fn trim(&self, offset: u64, length: u64) -> Result<(), Error>;
    fn zero(&self, offset: u64, length: u64, may_trim: bool) -> Result<(), Error>;

    fn supports_flush(&self) -> bool {
        true
    }
    fn supports_trim(&self) -> bool {
        true
    }
    fn supports_zero(&self) -> bool {
        true
    }
    fn is_rotational(&self) -> bool {
        false
    }

    fn close(&self);
}

// Zero-fill chunk used by drivers that have to write zeros out explicitly.
pub(crate) const ZERO_CHUNK: usize = 64 * 1024;
