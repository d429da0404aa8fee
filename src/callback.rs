//! Host-facing adapter using integer return conventions.
//!
//! Lifecycle and I/O calls return `0` on success and `-1` on failure. Boolean
//! queries return `1`, `0` or `-1`. I/O calls also write the NBD error number
//! through an out-parameter, and the error text of the most recent failure on
//! the calling thread is available from [`last_error`]. A panic inside the
//! plugin is caught here and reported as `EIO`; it never crosses into the host.

use std::cell::RefCell;
use std::panic::{catch_unwind, AssertUnwindSafe};

use crate::error::PluginError;
use crate::handle::HandleId;
use crate::plugin::Plugin;
use crate::proto;
use crate::request::Flags;

thread_local! {
    static LAST_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Message of the last failure reported on this thread, if any.
pub fn last_error() -> Option<String> {
    LAST_ERROR.with(|e| e.borrow().clone())
}

fn set_last_error(message: String) {
    LAST_ERROR.with(|e| *e.borrow_mut() = Some(message));
}

enum Failure {
    Error(PluginError),
    Panic,
}

impl Failure {
    fn errno(&self) -> u32 {
        match self {
            Failure::Error(e) => e.errno(),
            Failure::Panic => proto::NBD_EIO,
        }
    }
}

fn guarded<T>(call: &str, f: impl FnOnce() -> Result<T, PluginError>) -> Result<T, Failure> {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => {
            log::error!("{}: {}", call, e);
            set_last_error(e.to_string());
            Err(Failure::Error(e))
        }
        Err(payload) => {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| String::from("unknown panic"));
            log::error!("{}: plugin panicked: {}", call, message);
            set_last_error(format!("plugin panicked: {}", message));
            Err(Failure::Panic)
        }
    }
}

fn status(result: Result<(), Failure>) -> i32 {
    match result {
        Ok(()) => 0,
        Err(_) => -1,
    }
}

fn boolean(result: Result<bool, Failure>) -> i32 {
    match result {
        Ok(true) => 1,
        Ok(false) => 0,
        Err(_) => -1,
    }
}

fn with_errno(result: Result<(), Failure>, errno: &mut u32) -> i32 {
    match result {
        Ok(()) => 0,
        Err(failure) => {
            *errno = failure.errno();
            -1
        }
    }
}

/// Wraps a [`Plugin`] and exposes it through the host calling convention.
pub struct CallbackAdapter<P: Plugin> {
    plugin: P,
}

impl<P: Plugin> CallbackAdapter<P> {
    pub fn new(plugin: P) -> CallbackAdapter<P> {
        CallbackAdapter { plugin }
    }

    pub fn plugin(&self) -> &P {
        &self.plugin
    }

    pub fn load(&self) {
        let _ = guarded("load", || {
            self.plugin.load();
            Ok(())
        });
    }

    pub fn unload(&self) {
        let _ = guarded("unload", || {
            self.plugin.unload();
            Ok(())
        });
    }

    pub fn config(&self, key: &str, value: &str) -> i32 {
        status(guarded("config", || self.plugin.config(key, value)))
    }

    pub fn config_complete(&self) -> i32 {
        status(guarded("config_complete", || self.plugin.config_complete()))
    }

    pub fn get_ready(&self) -> i32 {
        status(guarded("get_ready", || self.plugin.get_ready()))
    }

    /// `0` admits the connection, `-1` refuses it.
    pub fn pre_connect(&self, readonly: bool) -> i32 {
        match guarded("pre_connect", || self.plugin.pre_connect(readonly)) {
            Ok(true) => 0,
            _ => -1,
        }
    }

    /// Returns the handle token, which is never zero.
    pub fn open(&self, readonly: bool) -> Option<u64> {
        guarded("open", || self.plugin.open(readonly))
            .ok()
            .map(HandleId::to_token)
    }

    pub fn close(&self, handle: u64) {
        let _ = guarded("close", || {
            self.plugin.close(HandleId::from_token(handle));
            Ok(())
        });
    }

    pub fn get_size(&self, handle: u64) -> i64 {
        guarded("get_size", || self.plugin.get_size(HandleId::from_token(handle))).unwrap_or(-1)
    }

    pub fn can_write(&self, handle: u64) -> i32 {
        boolean(guarded("can_write", || self.plugin.can_write(HandleId::from_token(handle))))
    }

    pub fn can_flush(&self, handle: u64) -> i32 {
        boolean(guarded("can_flush", || self.plugin.can_flush(HandleId::from_token(handle))))
    }

    pub fn can_trim(&self, handle: u64) -> i32 {
        boolean(guarded("can_trim", || self.plugin.can_trim(HandleId::from_token(handle))))
    }

    pub fn can_zero(&self, handle: u64) -> i32 {
        boolean(guarded("can_zero", || self.plugin.can_zero(HandleId::from_token(handle))))
    }

    pub fn can_multi_conn(&self, handle: u64) -> i32 {
        boolean(guarded("can_multi_conn", || {
            self.plugin.can_multi_conn(HandleId::from_token(handle))
        }))
    }

    pub fn is_rotational(&self, handle: u64) -> i32 {
        boolean(guarded("is_rotational", || {
            self.plugin.is_rotational(HandleId::from_token(handle))
        }))
    }

    pub fn pread(&self, handle: u64, buf: &mut [u8], offset: u64, flags: u32, errno: &mut u32) -> i32 {
        let result = guarded("pread", || {
            self.plugin
                .pread(HandleId::from_token(handle), buf, offset, Flags::from_bits(flags))
        });
        with_errno(result, errno)
    }

    pub fn pwrite(&self, handle: u64, buf: &[u8], offset: u64, flags: u32, errno: &mut u32) -> i32 {
        let result = guarded("pwrite", || {
            self.plugin
                .pwrite(HandleId::from_token(handle), buf, offset, Flags::from_bits(flags))
        });
        with_errno(result, errno)
    }

    pub fn flush(&self, handle: u64, flags: u32, errno: &mut u32) -> i32 {
        let result = guarded("flush", || {
            self.plugin.flush(HandleId::from_token(handle), Flags::from_bits(flags))
        });
        with_errno(result, errno)
    }

    pub fn trim(&self, handle: u64, count: u32, offset: u64, flags: u32, errno: &mut u32) -> i32 {
        let result = guarded("trim", || {
            self.plugin
                .trim(HandleId::from_token(handle), count, offset, Flags::from_bits(flags))
        });
        with_errno(result, errno)
    }

    pub fn zero(&self, handle: u64, count: u32, offset: u64, flags: u32, errno: &mut u32) -> i32 {
        let result = guarded("zero", || {
            self.plugin
                .zero(HandleId::from_token(handle), count, offset, Flags::from_bits(flags))
        });
        with_errno(result, errno)
    }
}
