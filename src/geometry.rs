//! Volume size as seen by one connection.

use crate::block::BlockStorage;
use crate::error::{PluginError, PluginResult};
use crate::request::Request;

/// Size of the volume, captured when the connection opens and fixed for its lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    size: u64,
}

impl Geometry {
    /// Queries the store. A store that cannot report its size cannot serve the
    /// connection, so callers treat failure as fatal for the handle.
    pub fn query(store: &dyn BlockStorage) -> PluginResult<Geometry> {
        let size = store.get_volume_size().map_err(PluginError::SizeUnavailable)?;
        if size > i64::MAX as u64 {
            return Err(PluginError::SizeUnavailable(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("volume size {} exceeds the protocol limit", size),
            )));
        }
        Ok(Geometry { size })
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Size in the signed form the host expects; always non-negative.
    pub fn size_i64(&self) -> i64 {
        self.size as i64
    }

    pub fn validate(&self, request: &Request) -> PluginResult<()> {
        request.check_bounds(self.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemoryBlock;
    use crate::request::{Command, Flags};
    use std::io::{Error, ErrorKind};

    struct Broken;

    impl BlockStorage for Broken {
        fn get_name(&self) -> String {
            String::from("broken")
        }
        fn get_volume_size(&self) -> Result<u64, Error> {
            Err(Error::new(ErrorKind::NotConnected, "device gone"))
        }
        fn read(&self, _: u64, _: &mut [u8]) -> Result<(), Error> {
            unreachable!()
        }
        fn write(&self, _: u64, _: &[u8]) -> Result<(), Error> {
            unreachable!()
        }
        fn flush(&self) -> Result<(), Error> {
            unreachable!()
        }
        fn trim(&self, _: u64, _: u64) -> Result<(), Error> {
            unreachable!()
        }
        fn zero(&self, _: u64, _: u64, _: bool) -> Result<(), Error> {
            unreachable!()
        }
        fn close(&self) {}
    }

    #[test]
    fn query_reports_store_size() {
        let store = MemoryBlock::new(String::from("m"), 1024, None).unwrap();
        let geometry = Geometry::query(&store).unwrap();
        assert_eq!(geometry.size(), 1024);
        assert_eq!(geometry.size_i64(), 1024);
        assert!(geometry
            .validate(&Request::new(Command::Read, 1024, 1, Flags::NONE))
            .is_err());
    }

    #[test]
    fn query_failure_is_size_unavailable() {
        assert!(matches!(Geometry::query(&Broken), Err(PluginError::SizeUnavailable(_))));
    }
}
