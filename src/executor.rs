//! Data-path operations for one connection.
//!
//! Every request is checked against the connection's read-only flag, its
//! capabilities and its geometry before the store is touched, so rejected
//! requests never mutate anything.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use crate::block::BlockStorage;
use crate::capability::Capabilities;
use crate::config::PluginConfig;
use crate::error::{PluginError, PluginResult};
use crate::geometry::Geometry;
use crate::request::{Command, Flags, Request};
use crate::stats::Stats;

/// State owned by one open handle.
pub struct Connection {
    geometry: Geometry,
    capabilities: Capabilities,
    store: Arc<dyn BlockStorage>,
    stats: Arc<Stats>,
    opened_at: Instant,
}

impl Connection {
    pub fn open(
        config: &PluginConfig,
        store: Arc<dyn BlockStorage>,
        stats: Arc<Stats>,
        readonly: bool,
    ) -> PluginResult<Connection> {
        let geometry = Geometry::query(store.as_ref())?;
        let capabilities = Capabilities::negotiate(config, store.as_ref(), readonly);
        Ok(Connection {
            geometry,
            capabilities,
            store,
            stats,
            opened_at: Instant::now(),
        })
    }

    pub fn geometry(&self) -> Geometry {
        self.geometry
    }

    pub fn capabilities(&self) -> Capabilities {
        self.capabilities
    }

    pub fn opened_at(&self) -> Instant {
        self.opened_at
    }

    pub fn pread(&self, buf: &mut [u8], offset: u64, flags: Flags) -> PluginResult<()> {
        let request = Request::new(Command::Read, offset, count_of(buf.len())?, flags);
        self.geometry.validate(&request)?;
        if request.count == 0 {
            return Ok(());
        }
        log::trace!("{} offset: {}, count: {}", request.command, offset, request.count);
        self.store.read(offset, buf).map_err(|e| io_failure(&request, e))?;
        self.stats.add_read(request.count);
        Ok(())
    }

    pub fn pwrite(&self, buf: &[u8], offset: u64, flags: Flags) -> PluginResult<()> {
        let request = Request::new(Command::Write, offset, count_of(buf.len())?, flags);
        self.check_writable(&request)?;
        self.geometry.validate(&request)?;
        if request.count == 0 {
            return Ok(());
        }
        log::trace!("{} offset: {}, count: {}", request.command, offset, request.count);
        self.store.write(offset, buf).map_err(|e| io_failure(&request, e))?;
        self.stats.add_written(request.count);
        self.finish_durable(&request)
    }

    pub fn flush(&self, flags: Flags) -> PluginResult<()> {
        let request = Request::flush(flags);
        if !self.capabilities.can_flush {
            return Err(PluginError::Unsupported {
                command: Command::Flush,
            });
        }
        log::trace!("flush");
        self.store.flush().map_err(|e| io_failure(&request, e))
    }

    pub fn trim(&self, count: u32, offset: u64, flags: Flags) -> PluginResult<()> {
        let request = Request::new(Command::Trim, offset, count, flags);
        self.check_writable(&request)?;
        if !self.capabilities.can_trim {
            return Err(PluginError::Unsupported {
                command: Command::Trim,
            });
        }
        self.geometry.validate(&request)?;
        if count == 0 {
            return Ok(());
        }
        log::trace!("trim offset: {}, count: {}", offset, count);
        self.store
            .trim(offset, u64::from(count))
            .map_err(|e| io_failure(&request, e))?;
        self.stats.add_trimmed(count);
        self.finish_durable(&request)
    }

    /// Zeroes the range. When this fails with `Unsupported` the caller is expected
    /// to fall back to writing zeros with `pwrite`.
    pub fn zero(&self, count: u32, offset: u64, flags: Flags) -> PluginResult<()> {
        let request = Request::new(Command::Zero, offset, count, flags);
        self.check_writable(&request)?;
        if !self.capabilities.can_zero {
            return Err(PluginError::Unsupported {
                command: Command::Zero,
            });
        }
        self.geometry.validate(&request)?;
        if count == 0 {
            return Ok(());
        }
        log::trace!("zero offset: {}, count: {}, may_trim: {}", offset, count, flags.may_trim());
        self.store
            .zero(offset, u64::from(count), flags.may_trim())
            .map_err(|e| io_failure(&request, e))?;
        self.stats.add_zeroed(count);
        self.finish_durable(&request)
    }

    fn check_writable(&self, request: &Request) -> PluginResult<()> {
        if !request.command.mutates() || self.capabilities.can_write {
            return Ok(());
        }
        log::debug!("{} operation rejected on read-only handle", request.command);
        Err(PluginError::ReadOnlyViolation {
            command: request.command,
        })
    }

    // FUA: the request does not complete until a flush would have.
    fn finish_durable(&self, request: &Request) -> PluginResult<()> {
        if request.flags.force_durable() {
            self.store.flush().map_err(|e| io_failure(request, e))?;
        }
        Ok(())
    }
}

fn count_of(len: usize) -> PluginResult<u32> {
    u32::try_from(len).map_err(|_| {
        PluginError::Io(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("request of {} bytes is too large", len),
        ))
    })
}

fn io_failure(request: &Request, e: io::Error) -> PluginError {
    log::warn!(
        "{} failed at offset {} ({} bytes): {}",
        request.command,
        request.offset,
        request.count,
        e
    );
    PluginError::Io(e)
}
