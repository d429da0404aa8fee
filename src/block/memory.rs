use std::{io::Error, time::Duration};

use crate::block::{BlockStorage, IoGate};

// Driver: MemoryBlock

/// Volume kept entirely in memory. Nothing is volatile, so flush has nothing to do.
pub struct MemoryBlock {
    name: String,
    data: IoGate<Vec<u8>>,
}

impl MemoryBlock {
    pub fn new(name: String, size: u64, timeout: Option<Duration>) -> Result<MemoryBlock, Error> {
        let size = usize::try_from(size).map_err(|_| {
            Error::new(std::io::ErrorKind::OutOfMemory, "volume does not fit in memory")
        })?;
        let mut data = Vec::new();
        data.try_reserve_exact(size).map_err(|e| {
            Error::new(std::io::ErrorKind::OutOfMemory, format!("cannot allocate {} bytes: {}", size, e))
        })?;
        data.resize(size, 0);
        log::debug!("storage::memory({}, {} bytes)", name, size);
        Ok(MemoryBlock {
            name,
            data: IoGate::new(data, timeout),
        })
    }

    // Stalls every other request until the guard is dropped.
    #[cfg(test)]
    pub(crate) fn lock_exclusive(&self) -> Result<parking_lot::RwLockWriteGuard<'_, Vec<u8>>, Error> {
        self.data.write()
    }
}

impl BlockStorage for MemoryBlock {
    fn get_name(&self) -> String {
        self.name.clone()
    }

    fn get_volume_size(&self) -> Result<u64, Error> {
        Ok(self.data.read()?.len() as u64)
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        let data = self.data.read()?;
        let start = offset as usize;
        buf.copy_from_slice(&data[start..start + buf.len()]);
        Ok(())
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), Error> {
        let mut volume = self.data.write()?;
        let start = offset as usize;
        volume[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    fn flush(&self) -> Result<(), Error> {
        Ok(())
    }

    fn trim(&self, offset: u64, length: u64) -> Result<(), Error> {
        self.zero(offset, length, true)
    }

    fn zero(&self, offset: u64, length: u64, _may_trim: bool) -> Result<(), Error> {
        let mut volume = self.data.write()?;
        let start = offset as usize;
        volume[start..start + length as usize].fill(0);
        Ok(())
    }

    fn close(&self) {
        log::debug!("storage::close({})", self.name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_block_starts_zeroed() {
        let block = MemoryBlock::new(String::from("mem"), 64, None).unwrap();
        assert_eq!(block.get_volume_size().unwrap(), 64);
        let mut buf = [0xff_u8; 64];
        block.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0_u8; 64]);
    }

    #[test]
    fn test_memory_block_write_trim_read() {
        let block = MemoryBlock::new(String::from("mem"), 32, None).unwrap();
        block.write(0, &[7_u8; 32]).unwrap();
        block.trim(8, 8).unwrap();

        let mut buf = [0_u8; 32];
        block.read(0, &mut buf).unwrap();
        let mut expected = vec![7_u8; 32];
        expected[8..16].fill(0);
        assert_eq!(buf.to_vec(), expected);
    }

    #[test]
    fn test_memory_block_too_large() {
        let err = MemoryBlock::new(String::from("mem"), u64::MAX / 2, None).err().unwrap();
        assert_eq!(err.kind(), std::io::ErrorKind::OutOfMemory);
    }
}
