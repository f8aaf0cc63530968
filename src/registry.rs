//! Alias registry for record class names.
//!
//! A record's default wire class name is its Rust type name. When peers use
//! a different name, register an alias here and share the registry with the
//! writers and readers involved. The registry is explicit state, not a
//! global, so two connections can map the same type to different names.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::Record;

#[derive(Default)]
pub struct Registry {
    aliases: RwLock<HashMap<TypeId, String>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps `T` to `alias` for both encoding (emitted class name) and
    /// decoding (accepted class name). Re-registering replaces the alias.
    pub fn register<T: Record + 'static>(&self, alias: &str) {
        self.aliases
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(TypeId::of::<T>(), alias.to_string());
    }

    pub fn alias_of<T: 'static>(&self) -> Option<String> {
        self.aliases
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(&TypeId::of::<T>())
            .cloned()
    }

    /// Whether a wire class name is acceptable for `T`: its default name or
    /// its registered alias.
    pub fn accepts<T: Record + 'static>(&self, wire_name: &str) -> bool {
        wire_name == T::class_name()
            || self
                .alias_of::<T>()
                .map_or(false, |alias| alias == wire_name)
    }
}
