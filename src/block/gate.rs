use std::{
    io::{Error, ErrorKind},
    time::Duration,
};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reader/writer gate in front of a backing store.
///
/// Reads share the gate, mutations hold it exclusively, so two overlapping writes
/// never interleave: whichever acquires the gate second overwrites the first in full.
/// Guards release on unwind, a panicking request never keeps the store locked.
pub struct IoGate<T> {
    lock: RwLock<T>,
    timeout: Option<Duration>,
}

impl<T> IoGate<T> {
    pub fn new(inner: T, timeout: Option<Duration>) -> IoGate<T> {
        IoGate {
            lock: RwLock::new(inner),
            timeout,
        }
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, T>, Error> {
        match self.timeout {
            None => Ok(self.lock.read()),
            Some(timeout) => self
                .lock
                .try_read_for(timeout)
                .ok_or_else(|| timed_out("read", timeout)),
        }
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, T>, Error> {
        match self.timeout {
            None => Ok(self.lock.write()),
            Some(timeout) => self
                .lock
                .try_write_for(timeout)
                .ok_or_else(|| timed_out("write", timeout)),
        }
    }
}

fn timed_out(access: &str, timeout: Duration) -> Error {
    log::warn!("storage::gate: {} access timed out after {:?}", access, timeout);
    Error::new(
        ErrorKind::TimedOut,
        format!("backing store busy for more than {:?}", timeout),
    )
}
