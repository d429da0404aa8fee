//! Storage plugin core for an NBD server.
//!
//! A host drives [`plugin::BlockPlugin`] through its lifecycle callbacks, either
//! directly through the [`plugin::Plugin`] trait or through the integer calling
//! convention of [`callback::CallbackAdapter`]. Volumes are served from one of the
//! stores in [`block`]: an in-memory buffer, a raw image file, or fixed-size
//! shards in an [`object`] folder.

pub mod block;
pub mod callback;
pub mod capability;
pub mod config;
pub mod error;
pub mod executor;
pub mod geometry;
pub mod handle;
pub mod object;
pub mod plugin;
pub mod proto;
pub mod request;
pub mod stats;
pub mod util;

pub use crate::callback::CallbackAdapter;
pub use crate::config::{ConfigBuilder, Driver, PluginConfig};
pub use crate::error::{PluginError, PluginResult};
pub use crate::handle::HandleId;
pub use crate::plugin::{BlockPlugin, Export, Plugin, PluginInfo};
pub use crate::request::Flags;
