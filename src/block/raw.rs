use std::{
    fs::{File, OpenOptions},
    io::{Error, ErrorKind},
    os::unix::fs::FileExt,
    path::{Path, PathBuf},
    sync::atomic::{AtomicBool, Ordering},
    time::Duration,
};

use crate::block::{BlockStorage, IoGate, ZERO_CHUNK};

// Driver: RawBlock

/// Volume backed by a single image file, addressed with positional I/O.
pub struct RawBlock {
    name: String,
    path: PathBuf,
    volume_size: u64,
    file: IoGate<File>,
    punch_holes: AtomicBool,
}

impl RawBlock {
    /// Attaches the image at `path`.
    ///
    /// With `create_size` set, a missing image is created at that size; an existing
    /// image keeps its own length.
    pub fn open(
        path: &Path,
        create_size: Option<u64>,
        readonly: bool,
        timeout: Option<Duration>,
    ) -> Result<RawBlock, Error> {
        if let Some(size) = create_size {
            if !path.exists() {
                log::info!("storage::raw creating {:?} ({} bytes)", path, size);
                if let Some(parent) = path.parent() {
                    std::fs::create_dir_all(parent)?;
                }
                let file = OpenOptions::new().write(true).create_new(true).open(path)?;
                file.set_len(size)?;
                file.sync_all()?;
            }
        }

        let file = OpenOptions::new().read(true).write(!readonly).open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(Error::new(ErrorKind::InvalidInput, format!("{:?} is not a regular file", path)));
        }
        let volume_size = metadata.len();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        log::debug!("Volume Size of export {} is: <{}>", name, volume_size);
        Ok(RawBlock {
            name,
            path: path.to_path_buf(),
            volume_size,
            file: IoGate::new(file, timeout),
            punch_holes: AtomicBool::new(cfg!(target_os = "linux")),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_zeroes(file: &File, offset: u64, length: u64) -> Result<(), Error> {
        let zeroes = vec![0_u8; ZERO_CHUNK];
        let mut done: u64 = 0;
        while done < length {
            let n = std::cmp::min(length - done, ZERO_CHUNK as u64) as usize;
            file.write_all_at(&zeroes[..n], offset + done)?;
            done += n as u64;
        }
        Ok(())
    }

    // Punches a hole when the filesystem allows it, otherwise writes zeros.
    fn discard(&self, file: &File, offset: u64, length: u64) -> Result<(), Error> {
        if self.punch_holes.load(Ordering::Relaxed) {
            match punch_hole(file, offset, length) {
                Ok(()) => return Ok(()),
                Err(e) if is_unsupported(&e) => {
                    log::debug!("storage::raw hole punching unavailable on {:?}: {}", self.path, e);
                    self.punch_holes.store(false, Ordering::Relaxed);
                }
                Err(e) => return Err(e),
            }
        }
        Self::write_zeroes(file, offset, length)
    }
}

impl BlockStorage for RawBlock {
    fn get_name(&self) -> String {
        self.name.clone()
    }

    fn get_volume_size(&self) -> Result<u64, Error> {
        Ok(self.volume_size)
    }

    fn read(&self, offset: u64, buf: &mut [u8]) -> Result<(), Error> {
        let file = self.file.read()?;
        file.read_exact_at(buf, offset)
    }

    fn write(&self, offset: u64, data: &[u8]) -> Result<(), Error> {
        let file = self.file.write()?;
        file.write_all_at(data, offset)
    }

    fn flush(&self) -> Result<(), Error> {
        let file = self.file.read()?;
        log::trace!("storage::raw flush({:?})", self.path);
        file.sync_data()
    }

    fn trim(&self, offset: u64, length: u64) -> Result<(), Error> {
        let file = self.file.write()?;
        self.discard(&file, offset, length)
    }

    fn zero(&self, offset: u64, length: u64, may_trim: bool) -> Result<(), Error> {
        let file = self.file.write()?;
        if may_trim {
            self.discard(&file, offset, length)
        } else {
            Self::write_zeroes(&file, offset, length)
        }
    }

    fn close(&self) {
        log::debug!("storage::close({:?})", self.path);
    }
}

fn is_unsupported(e: &Error) -> bool {
    e.kind() == ErrorKind::Unsupported || matches!(e.raw_os_error(), Some(libc::EOPNOTSUPP) | Some(libc::ENOSYS))
}

#[cfg(target_os = "linux")]
fn punch_hole(file: &File, offset: u64, length: u64) -> Result<(), Error> {
    use std::os::unix::io::AsRawFd;

    let mode = libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE;
    // SAFETY: the descriptor stays open for the duration of the call.
    let r = unsafe { libc::fallocate(file.as_raw_fd(), mode, offset as libc::off_t, length as libc::off_t) };
    if r == -1 {
        return Err(Error::last_os_error());
    }
    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn punch_hole(_file: &File, _offset: u64, _length: u64) -> Result<(), Error> {
    Err(Error::new(ErrorKind::Unsupported, "hole punching is linux only"))
}
