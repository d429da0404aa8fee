//! Plugin configuration, accumulated one `key=value` pair at a time.

use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use url::Url;

use crate::error::{PluginError, PluginResult};
use crate::util::{parse_bool, parse_duration, parse_size};

pub const DEFAULT_SHARD_SIZE: u64 = 4 * 1024 * 1024;
pub const MIN_SHARD_SIZE: u64 = 4096;

pub const CONFIG_HELP: &str = "\
driver=memory|raw|sharded    Backing store driver (default: memory)
location=URL                 file:// URL of the image (raw) or shard folder (sharded)
size=SIZE                    Volume size, e.g. 64M (required for memory and create=true)
shard-size=SIZE              Shard object size for a new sharded volume (default: 4M);
                             an existing volume keeps the size it was created with
create=BOOL                  Create the store at `size` if it does not exist
readonly=BOOL                Refuse writable connections
trim=BOOL                    Advertise and serve trim (default: true)
zero=BOOL                    Advertise and serve zero (default: true)
flush=BOOL                   Advertise and serve flush (default: true)
rotational=BOOL              Report the device as rotational (default: false)
timeout=DURATION             Fail I/O that waits longer than this for the store";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Driver {
    Memory,
    Raw,
    Sharded,
}

impl FromStr for Driver {
    type Err = String;

    fn from_str(s: &str) -> Result<Driver, String> {
        match s {
            "memory" => Ok(Driver::Memory),
            "raw" => Ok(Driver::Raw),
            "sharded" => Ok(Driver::Sharded),
            _ => Err(format!("no such storage driver: {:?}", s)),
        }
    }
}

impl fmt::Display for Driver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Driver::Memory => "memory",
            Driver::Raw => "raw",
            Driver::Sharded => "sharded",
        })
    }
}

/// Finalized, immutable configuration shared by every connection.
#[derive(Debug, Clone, PartialEq)]
pub struct PluginConfig {
    pub driver: Driver,
    pub location: Option<Url>,
    pub size: Option<u64>,
    /// `None` lets the sharded driver use the size recorded with the volume.
    pub shard_size: Option<u64>,
    pub create: bool,
    pub readonly: bool,
    pub trim: bool,
    pub zero: bool,
    pub flush: bool,
    pub rotational: bool,
    pub timeout: Option<Duration>,
}

impl Default for PluginConfig {
    fn default() -> PluginConfig {
        PluginConfig {
            driver: Driver::Memory,
            location: None,
            size: None,
            shard_size: None,
            create: false,
            readonly: false,
            trim: true,
            zero: true,
            flush: true,
            rotational: false,
            timeout: None,
        }
    }
}

impl PluginConfig {
    /// Shortcut for an in-memory volume, mostly for tests.
    pub fn memory(size: u64) -> PluginConfig {
        PluginConfig {
            size: Some(size),
            ..PluginConfig::default()
        }
    }
}

/// Collects `config` calls until `config_complete` seals them.
#[derive(Debug, Default)]
pub struct ConfigBuilder {
    config: PluginConfig,
    seen: HashSet<String>,
}

impl ConfigBuilder {
    pub fn new() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Validates and records one parameter.
    pub fn set(&mut self, key: &str, value: &str) -> PluginResult<()> {
        if self.seen.contains(key) {
            return Err(PluginError::invalid_config(key, "parameter appears multiple times"));
        }
        let invalid = |reason: String| PluginError::invalid_config(key, reason);

        let config = &mut self.config;
        match key {
            "driver" => config.driver = value.parse().map_err(invalid)?,
            "location" => config.location = Some(parse_location(value).map_err(invalid)?),
            "size" => config.size = Some(parse_size(value).map_err(invalid)?),
            "shard-size" => {
                let shard_size = parse_size(value).map_err(invalid)?;
                if shard_size < MIN_SHARD_SIZE || !shard_size.is_power_of_two() {
                    return Err(invalid(format!(
                        "shard size must be a power of two of at least {} bytes",
                        MIN_SHARD_SIZE
                    )));
                }
                config.shard_size = Some(shard_size);
            }
            "create" => config.create = parse_bool(value).map_err(invalid)?,
            "readonly" => config.readonly = parse_bool(value).map_err(invalid)?,
            "trim" => config.trim = parse_bool(value).map_err(invalid)?,
            "zero" => config.zero = parse_bool(value).map_err(invalid)?,
            "flush" => config.flush = parse_bool(value).map_err(invalid)?,
            "rotational" => config.rotational = parse_bool(value).map_err(invalid)?,
            "timeout" => {
                let timeout = parse_duration(value).map_err(invalid)?;
                config.timeout = if timeout.is_zero() { None } else { Some(timeout) };
            }
            _ => return Err(invalid(String::from("unknown parameter"))),
        }

        log::debug!("config: {}={}", key, value);
        self.seen.insert(key.to_string());
        Ok(())
    }

    /// Checks cross-field requirements and returns the sealed configuration.
    pub fn complete(self) -> PluginResult<PluginConfig> {
        let config = self.config;
        let seen = self.seen;

        match config.driver {
            Driver::Memory => {
                if config.size.is_none() {
                    return Err(PluginError::IncompleteConfig(String::from(
                        "the memory driver requires size",
                    )));
                }
                if config.location.is_some() {
                    return Err(PluginError::IncompleteConfig(String::from(
                        "the memory driver does not take a location",
                    )));
                }
            }
            Driver::Raw | Driver::Sharded => {
                if config.location.is_none() {
                    return Err(PluginError::IncompleteConfig(format!(
                        "the {} driver requires location",
                        config.driver
                    )));
                }
                if config.create && config.size.is_none() {
                    return Err(PluginError::IncompleteConfig(String::from(
                        "create=true requires size",
                    )));
                }
            }
        }
        if seen.contains("shard-size") && config.driver != Driver::Sharded {
            return Err(PluginError::IncompleteConfig(String::from(
                "shard-size is only meaningful for the sharded driver",
            )));
        }

        log::info!(
            "config complete: driver={} size={:?} readonly={}",
            config.driver,
            config.size,
            config.readonly
        );
        Ok(config)
    }
}

fn parse_location(value: &str) -> Result<Url, String> {
    let url = if value.starts_with('/') {
        Url::from_file_path(Path::new(value))
            .map_err(|_| format!("not an absolute path: {:?}", value))?
    } else {
        Url::parse(value).map_err(|e| format!("could not parse url {:?}: {}", value, e))?
    };
    match url.scheme() {
        "file" => Ok(url),
        scheme => Err(format!("unsupported url scheme: <{}>", scheme)),
    }
}
