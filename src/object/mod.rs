use std::io::Error;

mod config;
pub use self::config::object_storage_with_config;

mod file;
pub use self::file::FileBackend;

/// Named byte objects that block drivers build volumes from.
///
/// Implementations are shared between connections, so every method takes `&self`
/// and does its own locking.
pub trait ObjectStorage: Send + Sync {
    fn exists(&self, object_name: &str) -> Result<bool, Error>;
    fn read(&self, object_name: &str) -> Result<Vec<u8>, Error>;
    fn write(&self, object_name: &str, data: &[u8]) -> Result<(), Error>;
    fn delete(&self, object_name: &str) -> Result<(), Error>;

    // partial reads/writes
    fn partial_read(&self, object_name: &str, offset: u64, buf: &mut [u8]) -> Result<(), Error>;
    fn partial_write(&self, object_name: &str, offset: u64, data: &[u8]) -> Result<(), Error>;

    /// Makes the contents of one object durable.
    fn persist_object(&self, object_name: &str) -> Result<(), Error>;

    /// Makes object creation and deletion durable.
    fn persist(&self) -> Result<(), Error> {
        Ok(())
    }

    fn close(&self);
}
