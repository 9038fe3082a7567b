//! Per-builder key/value directives passed between hooks.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

pub type SettingValue = Arc<dyn Any + Send + Sync>;

/// Concurrency-safe settings store. Cloning copies the entry map but shares the values.
#[derive(Default)]
pub struct Settings {
    inner: RwLock<HashMap<String, SettingValue>>,
}

impl Settings {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, SettingValue>> {
        match self.inner.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, SettingValue>> {
        match self.inner.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn set<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) {
        self.write().insert(name.into(), Arc::new(value));
    }

    pub fn set_shared(&self, name: impl Into<String>, value: SettingValue) {
        self.write().insert(name.into(), value);
    }

    /// Fetch a typed copy of a setting. A value stored under another type reads as absent.
    #[must_use]
    pub fn get<T: Any + Clone>(&self, name: &str) -> Option<T> {
        self.read()
            .get(name)
            .and_then(|value| value.downcast_ref::<T>().cloned())
    }

    #[must_use]
    pub fn get_shared(&self, name: &str) -> Option<SettingValue> {
        self.read().get(name).cloned()
    }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    pub fn remove(&self, name: &str) -> Option<SettingValue> {
        self.write().remove(name)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }
}

impl Clone for Settings {
    fn clone(&self) -> Self {
        Self {
            inner: RwLock::new(self.read().clone()),
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let keys: Vec<String> = self.read().keys().cloned().collect();
        f.debug_struct("Settings").field("keys", &keys).finish()
    }
}
