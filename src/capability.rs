//! Capability answers for a connection.
//!
//! Computed once at open from the configuration, the store and the connection's
//! read-only flag, then served unchanged. The executor consults the same values,
//! so an operation is accepted exactly when its capability was advertised.

use itertools::Itertools;

use crate::block::BlockStorage;
use crate::config::PluginConfig;
use crate::proto;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub can_write: bool,
    pub can_flush: bool,
    pub can_trim: bool,
    pub can_zero: bool,
    pub can_multi_conn: bool,
    pub is_rotational: bool,
}

impl Capabilities {
    pub fn negotiate(config: &PluginConfig, store: &dyn BlockStorage, readonly: bool) -> Capabilities {
        let can_write = !readonly && !config.readonly;
        Capabilities {
            can_write,
            can_flush: config.flush && store.supports_flush(),
            can_trim: can_write && config.trim && store.supports_trim(),
            can_zero: can_write && config.zero && store.supports_zero(),
            // every connection shares one store instance, and a flush on any of
            // them persists writes made through all of them
            can_multi_conn: true,
            is_rotational: config.rotational || store.is_rotational(),
        }
    }

    /// NBD transmission flags advertising these capabilities.
    pub fn transmission_flags(&self) -> u16 {
        let mut flags = proto::NBD_FLAG_HAS_FLAGS;
        if !self.can_write {
            flags |= proto::NBD_FLAG_READ_ONLY;
        }
        if self.can_flush {
            flags |= proto::NBD_FLAG_SEND_FLUSH | proto::NBD_FLAG_SEND_FUA;
        }
        if self.is_rotational {
            flags |= proto::NBD_FLAG_ROTATIONAL;
        }
        if self.can_trim {
            flags |= proto::NBD_FLAG_SEND_TRIM;
        }
        if self.can_zero {
            flags |= proto::NBD_FLAG_SEND_WRITE_ZEROES;
        }
        if self.can_multi_conn {
            flags |= proto::NBD_FLAG_CAN_MULTI_CONN;
        }
        flags
    }

    pub fn summary(&self) -> String {
        [
            ("write", self.can_write),
            ("flush", self.can_flush),
            ("trim", self.can_trim),
            ("zero", self.can_zero),
            ("multi-conn", self.can_multi_conn),
            ("rotational", self.is_rotational),
        ]
        .iter()
        .map(|(name, enabled)| format!("{}={}", name, enabled))
        .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemoryBlock;

    fn store() -> MemoryBlock {
        MemoryBlock::new(String::from("m"), 4096, None).unwrap()
    }

    #[test]
    fn writable_memory_volume() {
        let caps = Capabilities::negotiate(&PluginConfig::memory(4096), &store(), false);
        assert_eq!(
            caps,
            Capabilities {
                can_write: true,
                can_flush: true,
                can_trim: true,
                can_zero: true,
                can_multi_conn: true,
                is_rotational: false,
            }
        );
        let flags = caps.transmission_flags();
        assert_eq!(flags & proto::NBD_FLAG_READ_ONLY, 0);
        assert_ne!(flags & proto::NBD_FLAG_SEND_TRIM, 0);
        assert_ne!(flags & proto::NBD_FLAG_CAN_MULTI_CONN, 0);
    }

    #[test]
    fn readonly_connection_drops_mutating_capabilities() {
        let caps = Capabilities::negotiate(&PluginConfig::memory(4096), &store(), true);
        assert!(!caps.can_write && !caps.can_trim && !caps.can_zero);
        assert!(caps.can_flush);
        assert_ne!(caps.transmission_flags() & proto::NBD_FLAG_READ_ONLY, 0);
    }

    #[test]
    fn plugin_wide_readonly_and_toggles() {
        let config = PluginConfig {
            readonly: true,
            flush: false,
            rotational: true,
            ..PluginConfig::memory(4096)
        };
        let caps = Capabilities::negotiate(&config, &store(), false);
        assert!(!caps.can_write);
        assert!(!caps.can_flush);
        assert!(caps.is_rotational);
        let flags = caps.transmission_flags();
        assert_eq!(flags & proto::NBD_FLAG_SEND_FUA, 0);
        assert_ne!(flags & proto::NBD_FLAG_ROTATIONAL, 0);
    }

    #[test]
    fn summary_lists_every_capability() {
        let caps = Capabilities::negotiate(
            &PluginConfig { trim: false, ..PluginConfig::memory(4096) },
            &store(),
            false,
        );
        assert_eq!(
            caps.summary(),
            "write=true flush=true trim=false zero=true multi-conn=true rotational=false"
        );
    }
}
