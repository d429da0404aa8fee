//! The plugin callback surface and its lifecycle.
//!
//! [`Plugin`] has one method per host callback. [`BlockPlugin`] implements it as a
//! state machine (`Unloaded → Loaded → Configuring → Configured → Ready → Unloaded`)
//! around an [`Export`], the explicitly constructed object that owns the backing
//! store and the handle table once configuration is sealed.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::block::{block_storage_with_config, BlockStorage};
use crate::config::{ConfigBuilder, PluginConfig, CONFIG_HELP};
use crate::error::{PluginError, PluginResult};
use crate::executor::Connection;
use crate::handle::{HandleId, HandleTable};
use crate::request::Flags;
use crate::stats::{Stats, StatsSnapshot};

/// Callbacks a host server drives, in the order
/// `load → config* → config_complete → get_ready → (pre_connect → open → I/O* → close)* → unload`.
pub trait Plugin: Send + Sync {
    fn load(&self);
    fn config(&self, key: &str, value: &str) -> PluginResult<()>;
    fn config_complete(&self) -> PluginResult<()>;
    fn get_ready(&self) -> PluginResult<()>;

    /// Returns `false` to refuse the connection before any handle exists.
    fn pre_connect(&self, readonly: bool) -> PluginResult<bool>;
    fn open(&self, readonly: bool) -> PluginResult<HandleId>;
    fn close(&self, handle: HandleId);

    fn get_size(&self, handle: HandleId) -> PluginResult<i64>;
    fn can_write(&self, handle: HandleId) -> PluginResult<bool>;
    fn can_flush(&self, handle: HandleId) -> PluginResult<bool>;
    fn can_trim(&self, handle: HandleId) -> PluginResult<bool>;
    fn can_zero(&self, handle: HandleId) -> PluginResult<bool>;
    fn can_multi_conn(&self, handle: HandleId) -> PluginResult<bool>;
    fn is_rotational(&self, handle: HandleId) -> PluginResult<bool>;

    fn pread(&self, handle: HandleId, buf: &mut [u8], offset: u64, flags: Flags) -> PluginResult<()>;
    fn pwrite(&self, handle: HandleId, buf: &[u8], offset: u64, flags: Flags) -> PluginResult<()>;
    fn flush(&self, handle: HandleId, flags: Flags) -> PluginResult<()>;
    fn trim(&self, handle: HandleId, count: u32, offset: u64, flags: Flags) -> PluginResult<()>;
    fn zero(&self, handle: HandleId, count: u32, offset: u64, flags: Flags) -> PluginResult<()>;

    fn unload(&self);
}

/// Static description of the plugin, printed by `nbd-store dump`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: &'static str,
    pub version: &'static str,
    pub thread_model: &'static str,
    pub config_help: &'static str,
}

/// A configured, attached volume and the connections open against it.
pub struct Export {
    config: PluginConfig,
    store: Arc<dyn BlockStorage>,
    handles: HandleTable<Connection>,
    stats: Arc<Stats>,
    closed: AtomicBool,
}

impl Export {
    /// Attaches the backing store described by `config`.
    pub fn new(config: PluginConfig) -> PluginResult<Export> {
        let store = block_storage_with_config(&config).map_err(|e| {
            log::error!("could not attach {} store: {}", config.driver, e);
            PluginError::NotReady(e.to_string())
        })?;
        Ok(Export::with_store(config, store))
    }

    pub fn with_store(config: PluginConfig, store: Arc<dyn BlockStorage>) -> Export {
        log::info!("export {:?} -> {}", store.get_name(), config.driver);
        Export {
            config,
            store,
            handles: HandleTable::new(),
            stats: Arc::new(Stats::default()),
            closed: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PluginConfig {
        &self.config
    }

    pub fn pre_connect(&self, readonly: bool) -> bool {
        if self.config.readonly && !readonly {
            log::info!("refusing writable connection to read-only export");
            return false;
        }
        true
    }

    pub fn open(&self, readonly: bool) -> PluginResult<HandleId> {
        if self.closed.load(Ordering::Acquire) {
            return Err(PluginError::OpenFailed(String::from("export has been shut down")));
        }
        let connection = Connection::open(
            &self.config,
            Arc::clone(&self.store),
            Arc::clone(&self.stats),
            readonly || self.config.readonly,
        )?;
        let id = self.handles.insert(connection);
        log::debug!("open {} (readonly: {})", id, readonly);
        Ok(id)
    }

    pub fn connection(&self, handle: HandleId) -> PluginResult<Arc<Connection>> {
        self.handles.get(handle)
    }

    pub fn close(&self, handle: HandleId) -> PluginResult<()> {
        let connection = self.handles.remove(handle)?;
        log::debug!(
            "close {} after {:?}",
            handle,
            connection.opened_at().elapsed()
        );
        Ok(())
    }

    pub fn open_handles(&self) -> usize {
        self.handles.len()
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Closes leftover handles and the store. Further opens fail.
    pub fn shutdown(&self) -> StatsSnapshot {
        if self.closed.swap(true, Ordering::AcqRel) {
            return self.stats();
        }
        for (id, _) in self.handles.drain() {
            log::warn!("handle {} still open at unload, closing it", id);
        }
        self.store.close();
        let stats = self.stats();
        log::info!("count bytes: {}", stats);
        stats
    }
}

enum Lifecycle {
    Unloaded,
    Loaded,
    Configuring(ConfigBuilder),
    Configured(PluginConfig),
    Ready(Arc<Export>),
}

impl Lifecycle {
    fn name(&self) -> &'static str {
        match self {
            Lifecycle::Unloaded => "unloaded",
            Lifecycle::Loaded => "loaded",
            Lifecycle::Configuring(_) => "configuring",
            Lifecycle::Configured(_) => "configured",
            Lifecycle::Ready(_) => "ready",
        }
    }
}

/// The block-device plugin: one instance per process.
pub struct BlockPlugin {
    state: RwLock<Lifecycle>,
}

impl Default for BlockPlugin {
    fn default() -> Self {
        BlockPlugin {
            state: RwLock::new(Lifecycle::Unloaded),
        }
    }
}

impl BlockPlugin {
    pub fn new() -> BlockPlugin {
        BlockPlugin::default()
    }

    pub fn info() -> PluginInfo {
        PluginInfo {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            thread_model: "parallel",
            config_help: CONFIG_HELP,
        }
    }

    pub fn state_name(&self) -> &'static str {
        self.state.read().name()
    }

    /// The ready export, for callers that want to bypass handle lookups.
    pub fn export(&self) -> PluginResult<Arc<Export>> {
        self.ready("export")
    }

    fn ready(&self, call: &'static str) -> PluginResult<Arc<Export>> {
        match &*self.state.read() {
            Lifecycle::Ready(export) => Ok(Arc::clone(export)),
            state => Err(PluginError::InvalidState {
                call,
                state: state.name(),
            }),
        }
    }

    fn connection(&self, call: &'static str, handle: HandleId) -> PluginResult<Arc<Connection>> {
        self.ready(call)?.connection(handle)
    }
}

impl Plugin for BlockPlugin {
    fn load(&self) {
        let mut state = self.state.write();
        if matches!(*state, Lifecycle::Unloaded) {
            log::info!("{} {} loaded", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
            *state = Lifecycle::Loaded;
        } else {
            log::debug!("load ignored, plugin already {}", state.name());
        }
    }

    fn config(&self, key: &str, value: &str) -> PluginResult<()> {
        let mut state = self.state.write();
        if matches!(*state, Lifecycle::Loaded) {
            *state = Lifecycle::Configuring(ConfigBuilder::new());
        }
        match &mut *state {
            Lifecycle::Configuring(builder) => builder.set(key, value),
            other => Err(PluginError::InvalidState {
                call: "config",
                state: other.name(),
            }),
        }
    }

    fn config_complete(&self) -> PluginResult<()> {
        let mut state = self.state.write();
        let builder = match std::mem::replace(&mut *state, Lifecycle::Loaded) {
            Lifecycle::Loaded => ConfigBuilder::new(),
            Lifecycle::Configuring(builder) => builder,
            other => {
                let name = other.name();
                *state = other;
                return Err(PluginError::InvalidState {
                    call: "config_complete",
                    state: name,
                });
            }
        };
        // on failure the plugin falls back to Loaded and startup is aborted
        let config = builder.complete()?;
        *state = Lifecycle::Configured(config);
        Ok(())
    }

    fn get_ready(&self) -> PluginResult<()> {
        let mut state = self.state.write();
        let config = match &*state {
            Lifecycle::Configured(config) => config.clone(),
            other => {
                return Err(PluginError::InvalidState {
                    call: "get_ready",
                    state: other.name(),
                })
            }
        };
        let export = Export::new(config)?;
        log::info!("plugin ready");
        *state = Lifecycle::Ready(Arc::new(export));
        Ok(())
    }

    fn pre_connect(&self, readonly: bool) -> PluginResult<bool> {
        Ok(self.ready("pre_connect")?.pre_connect(readonly))
    }

    fn open(&self, readonly: bool) -> PluginResult<HandleId> {
        self.ready("open")?.open(readonly)
    }

    fn close(&self, handle: HandleId) {
        let closed = self.ready("close").and_then(|export| export.close(handle));
        if let Err(e) = closed {
            log::warn!("close {}: {}", handle, e);
        }
    }

    fn get_size(&self, handle: HandleId) -> PluginResult<i64> {
        Ok(self.connection("get_size", handle)?.geometry().size_i64())
    }

    fn can_write(&self, handle: HandleId) -> PluginResult<bool> {
        Ok(self.connection("can_write", handle)?.capabilities().can_write)
    }

    fn can_flush(&self, handle: HandleId) -> PluginResult<bool> {
        Ok(self.connection("can_flush", handle)?.capabilities().can_flush)
    }

    fn can_trim(&self, handle: HandleId) -> PluginResult<bool> {
        Ok(self.connection("can_trim", handle)?.capabilities().can_trim)
    }

    fn can_zero(&self, handle: HandleId) -> PluginResult<bool> {
        Ok(self.connection("can_zero", handle)?.capabilities().can_zero)
    }

    fn can_multi_conn(&self, handle: HandleId) -> PluginResult<bool> {
        Ok(self.connection("can_multi_conn", handle)?.capabilities().can_multi_conn)
    }

    fn is_rotational(&self, handle: HandleId) -> PluginResult<bool> {
        Ok(self.connection("is_rotational", handle)?.capabilities().is_rotational)
    }

    fn pread(&self, handle: HandleId, buf: &mut [u8], offset: u64, flags: Flags) -> PluginResult<()> {
        self.connection("pread", handle)?.pread(buf, offset, flags)
    }

    fn pwrite(&self, handle: HandleId, buf: &[u8], offset: u64, flags: Flags) -> PluginResult<()> {
        self.connection("pwrite", handle)?.pwrite(buf, offset, flags)
    }

    fn flush(&self, handle: HandleId, flags: Flags) -> PluginResult<()> {
        self.connection("flush", handle)?.flush(flags)
    }

    fn trim(&self, handle: HandleId, count: u32, offset: u64, flags: Flags) -> PluginResult<()> {
        self.connection("trim", handle)?.trim(count, offset, flags)
    }

    fn zero(&self, handle: HandleId, count: u32, offset: u64, flags: Flags) -> PluginResult<()> {
        self.connection("zero", handle)?.zero(count, offset, flags)
    }

    fn unload(&self) {
        let mut state = self.state.write();
        if let Lifecycle::Ready(export) = &*state {
            export.shutdown();
        }
        log::info!("plugin unloaded (was {})", state.name());
        *state = Lifecycle::Unloaded;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemoryBlock;
    use crate::proto;

    fn ready_plugin(params: &[(&str, &str)]) -> BlockPlugin {
        let plugin = BlockPlugin::new();
        plugin.load();
        for (key, value) in params {
            plugin.config(key, value).unwrap();
        }
        plugin.config_complete().unwrap();
        plugin.get_ready().unwrap();
        plugin
    }

    #[test]
    fn lifecycle_states() {
        let plugin = BlockPlugin::new();
        assert_eq!(plugin.state_name(), "unloaded");
        plugin.load();
        plugin.load();
        assert_eq!(plugin.state_name(), "loaded");
        plugin.config("size", "1K").unwrap();
        assert_eq!(plugin.state_name(), "configuring");
        plugin.config_complete().unwrap();
        assert_eq!(plugin.state_name(), "configured");
        plugin.get_ready().unwrap();
        assert_eq!(plugin.state_name(), "ready");
        plugin.unload();
        assert_eq!(plugin.state_name(), "unloaded");
    }

    #[test]
    fn config_after_complete_is_rejected() {
        let plugin = BlockPlugin::new();
        plugin.load();
        plugin.config("size", "1K").unwrap();
        plugin.config_complete().unwrap();
        assert!(matches!(
            plugin.config("readonly", "true"),
            Err(PluginError::InvalidState { call: "config", state: "configured" })
        ));
        assert!(plugin.config_complete().is_err());
        assert_eq!(plugin.state_name(), "configured");
    }

    #[test]
    fn open_before_ready_is_rejected() {
        let plugin = BlockPlugin::new();
        plugin.load();
        assert!(matches!(plugin.open(false), Err(PluginError::InvalidState { .. })));
        assert!(matches!(plugin.get_ready(), Err(PluginError::InvalidState { .. })));
    }

    #[test]
    fn failed_config_complete_returns_to_loaded() {
        let plugin = BlockPlugin::new();
        plugin.load();
        plugin.config("driver", "raw").unwrap();
        assert!(matches!(plugin.config_complete(), Err(PluginError::IncompleteConfig(_))));
        assert_eq!(plugin.state_name(), "loaded");
    }

    #[test]
    fn get_ready_failure_is_not_ready() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.img");
        let plugin = BlockPlugin::new();
        plugin.load();
        plugin.config("driver", "raw").unwrap();
        plugin.config("location", missing.to_str().unwrap()).unwrap();
        plugin.config_complete().unwrap();
        assert!(matches!(plugin.get_ready(), Err(PluginError::NotReady(_))));
    }

    #[test]
    fn handle_queries() {
        let plugin = ready_plugin(&[("size", "4K"), ("rotational", "yes")]);
        let handle = plugin.open(false).unwrap();
        assert_eq!(plugin.get_size(handle).unwrap(), 4096);
        assert!(plugin.can_write(handle).unwrap());
        assert!(plugin.can_flush(handle).unwrap());
        assert!(plugin.can_trim(handle).unwrap());
        assert!(plugin.can_zero(handle).unwrap());
        assert!(plugin.can_multi_conn(handle).unwrap());
        assert!(plugin.is_rotational(handle).unwrap());
        plugin.close(handle);
        assert!(matches!(plugin.get_size(handle), Err(PluginError::StaleHandle(_))));
    }

    #[test]
    fn readonly_plugin_vetoes_writers() {
        let plugin = ready_plugin(&[("size", "4K"), ("readonly", "on")]);
        assert!(!plugin.pre_connect(false).unwrap());
        assert!(plugin.pre_connect(true).unwrap());
        let handle = plugin.open(true).unwrap();
        assert!(!plugin.can_write(handle).unwrap());
    }

    #[test]
    fn unload_closes_leftover_handles() {
        let plugin = ready_plugin(&[("size", "4K")]);
        let export = plugin.export().unwrap();
        let handle = plugin.open(false).unwrap();
        plugin.pwrite(handle, b"abc", 0, Flags::NONE).unwrap();
        assert_eq!(export.open_handles(), 1);
        plugin.unload();
        assert_eq!(export.open_handles(), 0);
        assert_eq!(export.stats().bytes_written, 3);
        assert!(matches!(export.open(false), Err(PluginError::OpenFailed(_))));
    }

    #[test]
    fn io_stuck_behind_the_gate_times_out_with_eio() {
        let mut builder = ConfigBuilder::new();
        builder.set("size", "4K").unwrap();
        builder.set("timeout", "50ms").unwrap();
        let config = builder.complete().unwrap();
        assert_eq!(config.timeout, Some(std::time::Duration::from_millis(50)));

        let store = Arc::new(MemoryBlock::new(String::from("memory"), 4096, config.timeout).unwrap());
        let shared: Arc<dyn BlockStorage> = store.clone();
        let export = Export::with_store(config, shared);
        let handle = export.open(false).unwrap();
        let connection = export.connection(handle).unwrap();

        let held = store.lock_exclusive().unwrap();
        let mut buf = [0_u8; 16];
        let err = connection.pread(&mut buf, 0, Flags::NONE).unwrap_err();
        assert!(matches!(err, PluginError::Io(ref e) if e.kind() == std::io::ErrorKind::TimedOut));
        assert_eq!(err.errno(), proto::NBD_EIO);
        let err = connection.pwrite(&buf, 0, Flags::NONE).unwrap_err();
        assert_eq!(err.errno(), proto::NBD_EIO);

        drop(held);
        connection.pread(&mut buf, 0, Flags::NONE).unwrap();
        assert_eq!(export.stats().bytes_written, 0);
    }
}
