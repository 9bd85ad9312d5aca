//! Sensor registry.
//!
//! Membership is built once by a [`RegistryBuilder`] during discovery and then
//! frozen into a [`Registry`]. A frozen registry can update the state of its
//! members but can never gain or lose one.

use crate::reading::Reading;
use crate::sensor::{SensorKey, SensorProfile, SensorState};
use std::collections::BTreeMap;

/// Append-only registry used while discovery is running.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    entries: BTreeMap<SensorKey, SensorState>,
    profile: SensorProfile,
}

impl RegistryBuilder {
    pub fn new(profile: SensorProfile) -> Self {
        Self {
            entries: BTreeMap::new(),
            profile,
        }
    }

    /// Register `key` from `reading` unless it is already known.
    ///
    /// Returns true if a new entry was created. An existing entry keeps the
    /// state of its first reading.
    pub fn observe(&mut self, key: SensorKey, reading: &Reading) -> bool {
        if self.entries.contains_key(&key) {
            return false;
        }
        let state = SensorState::from_reading(key.clone(), reading, &self.profile);
        self.entries.insert(key, state);
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Close membership.
    pub fn freeze(self) -> Registry {
        Registry {
            entries: self.entries,
        }
    }
}

/// Frozen-membership mapping from [`SensorKey`] to [`SensorState`].
#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<SensorKey, SensorState>,
}

impl Registry {
    pub fn get(&self, key: &SensorKey) -> Option<&SensorState> {
        self.entries.get(key)
    }

    /// Mutable access to an existing entry, for the dispatcher.
    pub(crate) fn get_mut(&mut self, key: &SensorKey) -> Option<&mut SensorState> {
        self.entries.get_mut(key)
    }

    pub fn contains(&self, key: &SensorKey) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in lexicographic order, independent of arrival order.
    pub fn ordered_keys(&self) -> Vec<SensorKey> {
        self.entries.keys().cloned().collect()
    }

    /// States in the same order as [`Registry::ordered_keys`].
    pub fn iter(&self) -> impl Iterator<Item = &SensorState> {
        self.entries.values()
    }

    /// The first entry in key order.
    ///
    /// Bridges treat this sensor as the primary accessory.
    pub fn primary(&self) -> Option<&SensorState> {
        self.entries.values().next()
    }

    /// Every entry after [`Registry::primary`], in key order.
    pub fn secondaries(&self) -> impl Iterator<Item = &SensorState> {
        self.entries.values().skip(1)
    }
}
