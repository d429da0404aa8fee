use std::fmt;

use crate::error::{PluginError, PluginResult};
use crate::proto;

/// The five data-path operations a connection can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    Read,
    Write,
    Flush,
    Trim,
    Zero,
}

impl Command {
    /// Whether the command changes the contents of the volume.
    pub fn mutates(self) -> bool {
        matches!(self, Command::Write | Command::Trim | Command::Zero)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Command::Read => "pread",
            Command::Write => "pwrite",
            Command::Flush => "flush",
            Command::Trim => "trim",
            Command::Zero => "zero",
        };
        f.write_str(name)
    }
}

/// Flag bitset passed along with a request.
///
/// Bits this crate does not know about are carried but never inspected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Flags(u32);

impl Flags {
    pub const NONE: Flags = Flags(0);
    pub const MAY_TRIM: Flags = Flags(proto::PLUGIN_FLAG_MAY_TRIM);
    pub const FORCE_DURABLE: Flags = Flags(proto::PLUGIN_FLAG_FUA);

    pub fn from_bits(bits: u32) -> Flags {
        Flags(bits)
    }

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: Flags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn force_durable(self) -> bool {
        self.contains(Flags::FORCE_DURABLE)
    }

    pub fn may_trim(self) -> bool {
        self.contains(Flags::MAY_TRIM)
    }
}

impl std::ops::BitOr for Flags {
    type Output = Flags;

    fn bitor(self, rhs: Flags) -> Flags {
        Flags(self.0 | rhs.0)
    }
}

/// One I/O operation as seen by the executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub command: Command,
    pub offset: u64,
    pub count: u32,
    pub flags: Flags,
}

impl Request {
    pub fn new(command: Command, offset: u64, count: u32, flags: Flags) -> Request {
        Request {
            command,
            offset,
            count,
            flags,
        }
    }

    pub fn flush(flags: Flags) -> Request {
        Request::new(Command::Flush, 0, 0, flags)
    }

    /// Exclusive end of the byte range, `None` if it does not fit in a u64.
    pub fn end(&self) -> Option<u64> {
        self.offset.checked_add(u64::from(self.count))
    }

    /// Rejects ranges reaching past `size`. Flush carries no range and always passes.
    pub fn check_bounds(&self, size: u64) -> PluginResult<()> {
        if self.command == Command::Flush {
            return Ok(());
        }
        match self.end() {
            Some(end) if end <= size => Ok(()),
            _ => Err(PluginError::OutOfRange {
                command: self.command,
                offset: self.offset,
                count: self.count,
                size,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_flag_bits_are_kept_but_ignored() {
        let flags = Flags::from_bits(0xffff_0000 | proto::PLUGIN_FLAG_FUA);
        assert!(flags.force_durable());
        assert!(!flags.may_trim());
        assert_eq!(flags.bits() & 0xffff_0000, 0xffff_0000);
    }

    #[test]
    fn bounds_accept_exact_end() {
        let req = Request::new(Command::Read, 512, 512, Flags::NONE);
        assert!(req.check_bounds(1024).is_ok());
    }

    #[test]
    fn bounds_reject_past_end() {
        let req = Request::new(Command::Write, 1000, 25, Flags::NONE);
        let err = req.check_bounds(1024).unwrap_err();
        assert!(matches!(
            err,
            PluginError::OutOfRange { command: Command::Write, offset: 1000, count: 25, size: 1024 }
        ));
    }

    #[test]
    fn bounds_reject_offset_overflow() {
        let req = Request::new(Command::Zero, u64::MAX - 1, 4, Flags::NONE);
        assert!(req.check_bounds(u64::MAX).is_err());
    }

    #[test]
    fn zero_length_at_end_is_in_range() {
        let req = Request::new(Command::Trim, 1024, 0, Flags::NONE);
        assert!(req.check_bounds(1024).is_ok());
        let req = Request::new(Command::Trim, 1025, 0, Flags::NONE);
        assert!(req.check_bounds(1024).is_err());
    }

    #[test]
    fn flush_has_no_range() {
        assert!(Request::flush(Flags::FORCE_DURABLE).check_bounds(0).is_ok());
    }
}
