//! Table of per-connection state, addressed by opaque tokens.
//!
//! A slot is reused after close with a bumped generation, so a token kept past
//! close no longer resolves and use-after-close is reported as [`PluginError::StaleHandle`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PluginError, PluginResult};

/// Identity of one open connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId {
    index: u32,
    generation: u32,
}

impl HandleId {
    /// Packs the id into a non-zero integer for the callback layer.
    pub fn to_token(self) -> u64 {
        (u64::from(self.generation) << 32) | u64::from(self.index)
    }

    pub fn from_token(token: u64) -> HandleId {
        HandleId {
            index: token as u32,
            generation: (token >> 32) as u32,
        }
    }
}

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}.{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<Arc<T>>,
}

struct Slots<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    open: usize,
}

pub struct HandleTable<T> {
    inner: Mutex<Slots<T>>,
}

impl<T> Default for HandleTable<T> {
    fn default() -> Self {
        HandleTable {
            inner: Mutex::new(Slots {
                slots: Vec::new(),
                free: Vec::new(),
                open: 0,
            }),
        }
    }
}

impl<T> HandleTable<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, value: T) -> HandleId {
        let mut inner = self.inner.lock();
        inner.open += 1;
        let value = Some(Arc::new(value));
        if let Some(index) = inner.free.pop() {
            let slot = &mut inner.slots[index as usize];
            slot.value = value;
            return HandleId {
                index,
                generation: slot.generation,
            };
        }
        let index = inner.slots.len() as u32;
        inner.slots.push(Slot {
            generation: 1,
            value,
        });
        HandleId {
            index,
            generation: 1,
        }
    }

    pub fn get(&self, id: HandleId) -> PluginResult<Arc<T>> {
        let inner = self.inner.lock();
        match inner.slots.get(id.index as usize) {
            Some(Slot {
                generation,
                value: Some(value),
            }) if *generation == id.generation => Ok(Arc::clone(value)),
            _ => Err(PluginError::StaleHandle(id)),
        }
    }

    /// Closes the slot. Requests already holding the value finish with it,
    /// nothing can look it up afterwards.
    pub fn remove(&self, id: HandleId) -> PluginResult<Arc<T>> {
        let mut inner = self.inner.lock();
        let value = match inner.slots.get_mut(id.index as usize) {
            Some(slot) if slot.generation == id.generation && slot.value.is_some() => {
                slot.generation = slot.generation.wrapping_add(1).max(1);
                slot.value.take()
            }
            _ => None,
        };
        match value {
            Some(value) => {
                inner.free.push(id.index);
                inner.open -= 1;
                Ok(value)
            }
            None => Err(PluginError::StaleHandle(id)),
        }
    }

    /// Number of open handles.
    pub fn len(&self) -> usize {
        self.inner.lock().open
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Closes every remaining handle, returning them for cleanup.
    pub fn drain(&self) -> Vec<(HandleId, Arc<T>)> {
        let mut inner = self.inner.lock();
        let mut drained = Vec::new();
        for index in 0..inner.slots.len() {
            let slot = &mut inner.slots[index];
            if let Some(value) = slot.value.take() {
                let id = HandleId {
                    index: index as u32,
                    generation: slot.generation,
                };
                slot.generation = slot.generation.wrapping_add(1).max(1);
                drained.push((id, value));
                inner.free.push(index as u32);
            }
        }
        inner.open = 0;
        drained
    }
}
