//! Per-pass registry through which sub-reconcilers hand values to later steps.
//!
//! Keys are typed constants:
//!
//! ```
//! use riff_system_controller::controller::stash::{Stash, StashKey};
//!
//! const TARGET_IMAGE: StashKey<String> = StashKey::new("target-image");
//!
//! let mut stash = Stash::default();
//! assert!(stash.retrieve(&TARGET_IMAGE).is_none());
//! stash.store(&TARGET_IMAGE, "registry.example.com/square".to_string());
//! assert_eq!(stash.retrieve(&TARGET_IMAGE).map(String::as_str), Some("registry.example.com/square"));
//! ```
//!
//! An absent key means the value was not resolved; a key holding an empty
//! collection means it resolved to nothing.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;

/// Name of a stash slot holding a `T`
pub struct StashKey<T> {
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> StashKey<T> {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            _marker: PhantomData,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<T> fmt::Debug for StashKey<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StashKey").field(&self.name).finish()
    }
}

#[derive(Default)]
pub struct Stash {
    values: HashMap<&'static str, Box<dyn Any + Send + Sync>>,
}

impl Stash {
    /// Store a value, replacing any previous value under the same key
    pub fn store<T: Send + Sync + 'static>(&mut self, key: &StashKey<T>, value: T) {
        self.values.insert(key.name, Box::new(value));
    }

    pub fn retrieve<T: 'static>(&self, key: &StashKey<T>) -> Option<&T> {
        self.values
            .get(key.name)
            .and_then(|v| v.downcast_ref::<T>())
    }

    pub fn contains<T: 'static>(&self, key: &StashKey<T>) -> bool {
        self.retrieve(key).is_some()
    }

    pub fn clear<T>(&mut self, key: &StashKey<T>) {
        self.values.remove(key.name);
    }
}

impl fmt::Debug for Stash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut keys: Vec<_> = self.values.keys().collect();
        keys.sort();
        f.debug_struct("Stash").field("keys", &keys).finish()
    }
}
