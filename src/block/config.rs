use std::io::{Error, ErrorKind};
use std::sync::Arc;

use url::Url;

use crate::block::{BlockStorage, MemoryBlock, RawBlock, ShardedBlock};
use crate::config::{Driver, PluginConfig};
use crate::object::object_storage_with_config;

pub fn block_storage_with_config(config: &PluginConfig) -> Result<Arc<dyn BlockStorage>, Error> {
    log::info!("block storage: {}", config.driver);

    let create_size = if config.create { config.size } else { None };
    match config.driver {
        Driver::Memory => {
            let size = config
                .size
                .ok_or_else(|| Error::new(ErrorKind::InvalidInput, "memory driver needs a size"))?;
            Ok(Arc::new(MemoryBlock::new(String::from("memory"), size, config.timeout)?))
        }
        Driver::Raw => {
            let url = location(config)?;
            let path = url
                .to_file_path()
                .map_err(|_| Error::new(ErrorKind::InvalidInput, "file url is not a local path"))?;
            Ok(Arc::new(RawBlock::open(&path, create_size, config.readonly, config.timeout)?))
        }
        Driver::Sharded => {
            let url = location(config)?;
            let object_storage = object_storage_with_config(url)?;
            let name = url
                .path_segments()
                .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
                .unwrap_or("sharded")
                .to_string();
            Ok(Arc::new(ShardedBlock::new(
                name,
                object_storage,
                config.shard_size,
                create_size,
                config.timeout,
            )?))
        }
    }
}

fn location(config: &PluginConfig) -> Result<&Url, Error> {
    config.location.as_ref().ok_or_else(|| {
        log::error!("{} driver configured without a location", config.driver);
        Error::new(ErrorKind::InvalidInput, "missing location")
    })
}
