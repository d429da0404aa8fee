use std::{
    collections::BTreeSet,
    io::{Error, ErrorKind},
    str,
    time::Duration,
};

use crate::{
    block::{BlockStorage, IoGate},
    config::DEFAULT_SHARD_SIZE,
    object::ObjectStorage,
};

// Driver: ShardedBlock

const SIZE_OBJECT: &str = "size";
const SHARD_SIZE_OBJECT: &str = "shard-size";

/// Volume split into fixed-size shard objects named `block-N`.
///
/// Shards that were never written (or were trimmed away) do not exist and read as
/// zeros. The volume size and the shard size live in the `size` and `shard-size`
/// objects, each holding a decimal number.
pub struct ShardedBlock {
    name: String,
    volume_size: u64,
    shard_size: u64,
    object_storage: Box<dyn ObjectStorage>,
    // shards written since the last flush
    dirty: IoGate<BTreeSet<u64>>,
}

/// The part of one request that falls inside a single shard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Segment {
    shard: u64,
    shard_offset: u64,
    length: u64,
    // offset of this segment within the request
    position: u64,
}

impl ShardedBlock {
    /// Opens the volume kept in `object_storage`, creating it when `create_size` is
    /// set and no `size` object exists yet.
    ///
    /// The shard size is recorded with the volume. `shard_size` picks it for a new
    /// volume (default 4M); for an existing one it must match the recorded value,
    /// and `None` means "whatever the volume was created with".
    pub fn new(
        name: String,
        object_storage: Box<dyn ObjectStorage>,
        shard_size: Option<u64>,
        create_size: Option<u64>,
        timeout: Option<Duration>,
    ) -> Result<ShardedBlock, Error> {
        if let Some(shard_size) = shard_size {
            check_shard_size(shard_size)?;
        }

        if !object_storage.exists(SIZE_OBJECT)? {
            let size = create_size.ok_or_else(|| {
                Error::new(ErrorKind::NotFound, format!("volume {} has no size object", name))
            })?;
            let shard_size = shard_size.unwrap_or(DEFAULT_SHARD_SIZE);
            log::info!(
                "storage::sharded creating volume {} ({} bytes, {} byte shards)",
                name,
                size,
                shard_size
            );
            for (object, value) in [(SHARD_SIZE_OBJECT, shard_size), (SIZE_OBJECT, size)] {
                object_storage.write(object, value.to_string().as_bytes())?;
                object_storage.persist_object(object)?;
            }
            object_storage.persist()?;
        }

        let volume_size = read_number(object_storage.as_ref(), SIZE_OBJECT)?;
        let shard_size = recorded_shard_size(object_storage.as_ref(), &name, shard_size)?;
        log::debug!(
            "storage::sharded({}, size: {}, shard_size: {})",
            name,
            volume_size,
            shard_size
        );
        Ok(ShardedBlock {
            name,
            volume_size,
            shard_size,
            object_storage,
            dirty: IoGate::new(BTreeSet::new(), timeout),
        })
    }

    pub fn shard_name(&self, index: u64) -> String {
        format!("block-{}", index)
    }

    fn segments(&self, offset: u64, length: u64) -> Vec<Segment> {
        let mut segments = Vec::new();
        let mut position = 0;
        while position < length {
            let cur_offset = offset + position;
            let shard_offset = cur_offset % self.shard_size;
            let len = std::cmp::min(self.shard_size - shard_offset, length - position);
            segments.push(Segment {
                shard: cur_offset / self.shard_size,
                shard_offset,
                length: len,
                position,
            });
            position += len;
        }
        segments
    }

    // Clears a range inside existing shards; whole shards are removed.
    fn discard(&self, dirty: &mut BTreeSet<u64>, offset: u64, length: u64) -> Result<(), Error> {
        for segment in self.segments(offset, length) {
            let shard_name = self.shard_name(segment.shard);
            if segment.length == self.shard_size {
                log::trace!("storage::discard(delete shard: {})", segment.shard);
                self.object_storage.delete(&shard_name)?;
                dirty.remove(&segment.shard);
            } else if self.object_storage.exists(&shard_name)? {
                log::trace!(
                    "storage::discard(shard: {}, offset: {}, len: {})",
                    segment.shard,
                    segment.shard_offset,
                    segment.length
                );
                let zeroes = vec![0_u8; segment.length as usize];
                self.object_storage
                    .partial_write(&shard_name, segment.shard_offset, &zeroes)?;
                dirty.insert(segment.shard);
            }
        }
        Ok(())
    }
}

fn check_shard_size(shard_size: u64) -> Result<u64, Error> {
    if shard_size == 0 || !shard_size.is_power_of_two() {
        return Err(Error::new(
            ErrorKind::InvalidInput,
            format!("shard size must be a non-zero power of two, got {}", shard_size),
        ));
    }
    Ok(shard_size)
}

fn read_number(object_storage: &dyn ObjectStorage, object_name: &str) -> Result<u64, Error> {
    let filedata = object_storage.read(object_name)?;
    let text = str::from_utf8(&filedata).map_err(|e| Error::new(ErrorKind::InvalidData, e))?;
    text.trim().parse().map_err(|e| {
        Error::new(ErrorKind::InvalidData, format!("bad {} object: {}", object_name, e))
    })
}

// Volumes created before the shard size was recorded fall back to the requested
// size or the default.
fn recorded_shard_size(
    object_storage: &dyn ObjectStorage,
    name: &str,
    requested: Option<u64>,
) -> Result<u64, Error> {
    if !object_storage.exists(SHARD_SIZE_OBJECT)? {
        let shard_size = requested.unwrap_or(DEFAULT_SHARD_SIZE);
        log::warn!(
            "storage::sharded volume {} records no shard size, assuming {}",
            name,
            shard_size
        );
        return Ok(shard_size);
    }
    let recorded = check_shard_size(read_number(object_storage, SHARD_SIZE_OBJECT)?)?;
    match requested {
        Some(requested) if requested != recorded => Err(Error::new(
            ErrorKind::InvalidInput,
            format!(
                "volume {} uses {} byte shards, configured shard size is {}",
                name, recorded, requested
            ),
        )),
        _ => Ok(recorded),
    }
}

impl BlockStorage for ShardedBlock {
    fn get_name(&self) -> String {
        self.name.clone()
    }

    fn get_volume_size(&self) -> Result<u64, Error> {
        Ok(self.volume_size)
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        let _guard = self.dirty.read()?;
        for segment in self.segments(offset, buf.len() as u64) {
            log::trace!("storage::read(shard: {}, len: {})", segment.shard, segment.length);
            let start = segment.position as usize;
            let target = &mut buf[start..start + segment.length as usize];
            let shard_name = self.shard_name(segment.shard);
            if self.object_storage.exists(&shard_name)? {
                self.object_storage
                    .partial_read(&shard_name, segment.shard_offset, target)?;
            } else {
                target.fill(0);
            }
        }
        Ok(())
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), Error> {
        let mut dirty = self.dirty.write()?;
        log::trace!("storage::write(offset: {}, length: {})", offset, data.len());

        for segment in self.segments(offset, data.len() as u64) {
            let shard_name = self.shard_name(segment.shard);
            let start = segment.position as usize;
            let slice = &data[start..start + segment.length as usize];

            // full write
            if segment.length == self.shard_size {
                self.object_storage.write(&shard_name, slice)?;
            }
            // new object
            else if !self.object_storage.exists(&shard_name)? {
                let mut buffer = vec![0_u8; self.shard_size as usize];
                let head = segment.shard_offset as usize;
                buffer[head..head + slice.len()].copy_from_slice(slice);
                self.object_storage.write(&shard_name, &buffer)?;
            }
            // existing object, partial write
            else {
                self.object_storage
                    .partial_write(&shard_name, segment.shard_offset, slice)?;
            }
            dirty.insert(segment.shard);
        }
        Ok(())
    }

    fn flush(&self) -> Result<(), Error> {
        let mut dirty = self.dirty.write()?;
        log::debug!("storage::flush({} shards)", dirty.len());
        for shard in dirty.iter() {
            self.object_storage.persist_object(&self.shard_name(*shard))?;
        }
        // shard creation and deletion
        self.object_storage.persist()?;
        dirty.clear();
        Ok(())
    }

    fn trim(&self, offset: u64, length: u64) -> Result<(), Error> {
        let mut dirty = self.dirty.write()?;
        log::debug!("storage::trim(offset: {}, length: {})", offset, length);
        self.discard(&mut dirty, offset, length)
    }

    fn zero(&self, offset: u64, length: u64, _may_trim: bool) -> Result<(), Error> {
        // missing shards already read as zeros, so zeroing and trimming coincide
        let mut dirty = self.dirty.write()?;
        log::debug!("storage::zero(offset: {}, length: {})", offset, length);
        self.discard(&mut dirty, offset, length)
    }

    fn close(&self) {
        log::debug!("storage::close({})", self.name);
        self.object_storage.close();
    }
}
