//! In-memory intent registry (name-keyed).
//!
//! The registry is the source of the intent snapshot handed to training.
//! It yields intents sorted by name: the artifact generator is only
//! deterministic for a deterministic input order, and a stable order is what
//! lets it detect "nothing changed" and skip retraining.

use std::collections::BTreeMap;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::intent::Intent;

/// Thread-safe intent registry for tests/dev and the single-node service.
#[derive(Debug, Default)]
pub struct IntentRegistry {
    inner: RwLock<BTreeMap<String, Intent>>,
}

impl IntentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry pre-populated with `intents` (last one wins on duplicates).
    pub fn from_intents(intents: impl IntoIterator<Item = Intent>) -> Self {
        let registry = Self::new();
        for intent in intents {
            registry.upsert(intent);
        }
        registry
    }

    /// Insert or replace an intent by name. Returns the previous definition.
    pub fn upsert(&self, intent: Intent) -> Option<Intent> {
        self.write().insert(intent.name.clone(), intent)
    }

    /// Replace the whole registry content.
    pub fn replace_all(&self, intents: impl IntoIterator<Item = Intent>) {
        let fresh: BTreeMap<String, Intent> =
            intents.into_iter().map(|i| (i.name.clone(), i)).collect();
        *self.write() = fresh;
    }

    pub fn remove(&self, name: &str) -> Option<Intent> {
        self.write().remove(name)
    }

    pub fn get(&self, name: &str) -> Option<Intent> {
        self.read().get(name).cloned()
    }

    /// Snapshot of every intent, sorted by name.
    pub fn all(&self) -> Vec<Intent> {
        self.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    // A panic while holding the lock cannot leave the map half-updated (every
    // mutation is a single map call), so poisoned guards are safe to reuse.
    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Intent>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Intent>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}
