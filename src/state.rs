//! The per-data-item state table.
//!
//! Gives Current queries an O(1) "latest value" lookup without scanning the
//! buffer, and backs duplicate suppression. The table is a single guarded
//! owner: callers go through atomic update operations and can never reach
//! the raw map.
//!
//! Non-condition items hold the single most recent observation. Condition
//! items hold the ordered set of active entries keyed by `nativeCode`:
//! several faults can be active at once, a NORMAL with a code retires just
//! its entry, and a NORMAL without a code clears the set. When the set
//! empties, the clearing NORMAL is kept as the sole entry so Current always
//! renders a definite condition state; the next non-normal entry displaces
//! that marker.

use crate::observation::{
    Condition, ConditionLevel, Observation, ObservationFilter, ObservationValues,
};
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

type ItemKey = (String, String);

enum ItemState {
    Latest(Arc<Observation>),
    Conditions(Vec<Arc<Observation>>),
}

/// One data item's current value(s): a single observation for samples and
/// events, the active-entry set (insertion order) for conditions.
#[derive(Clone, Debug)]
pub struct CurrentEntry {
    pub device_uuid: String,
    pub data_item_id: String,
    pub observations: Vec<Arc<Observation>>,
}

/// Latest-value and active-condition state, shared by the write path and
/// any number of concurrent Current readers.
#[derive(Default)]
pub struct StateTable {
    inner: RwLock<HashMap<ItemKey, ItemState>>,
}

impl StateTable {
    pub fn new() -> Self {
        StateTable::default()
    }

    fn read_inner(&self) -> RwLockReadGuard<'_, HashMap<ItemKey, ItemState>> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_inner(&self) -> RwLockWriteGuard<'_, HashMap<ItemKey, ItemState>> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// True when `values` equals the stored latest value for the item.
    /// Only meaningful for non-condition items; conditions are never
    /// duplicate-suppressed.
    pub fn is_duplicate(&self, device_uuid: &str, data_item_id: &str, values: &ObservationValues) -> bool {
        let inner = self.read_inner();
        match inner.get(&(device_uuid.to_string(), data_item_id.to_string())) {
            Some(ItemState::Latest(current)) => current.values == *values,
            _ => false,
        }
    }

    /// Fold a freshly appended observation into the table.
    pub fn apply(&self, observation: &Arc<Observation>) {
        let key = (
            observation.device_uuid.clone(),
            observation.data_item_id.clone(),
        );
        let mut inner = self.write_inner();
        match &observation.values {
            ObservationValues::Condition(condition) => {
                let state = inner
                    .entry(key)
                    .or_insert_with(|| ItemState::Conditions(Vec::new()));
                if !matches!(state, ItemState::Conditions(_)) {
                    // A data item cannot change category; start a fresh set.
                    *state = ItemState::Conditions(Vec::new());
                }
                if let ItemState::Conditions(active) = state {
                    Self::apply_condition(active, condition, observation);
                }
            }
            _ => {
                inner.insert(key, ItemState::Latest(observation.clone()));
            }
        }
    }

    fn apply_condition(
        active: &mut Vec<Arc<Observation>>,
        condition: &Condition,
        observation: &Arc<Observation>,
    ) {
        match condition.level {
            ConditionLevel::Normal => match &condition.native_code {
                Some(code) => {
                    active.retain(|entry| {
                        entry
                            .condition()
                            .map_or(true, |c| c.native_code.as_deref() != Some(code.as_str()))
                    });
                    if active.is_empty() {
                        active.push(observation.clone());
                    }
                }
                None => {
                    active.clear();
                    active.push(observation.clone());
                }
            },
            ConditionLevel::Warning | ConditionLevel::Fault | ConditionLevel::Unavailable => {
                // Displace a lone normal marker before adding.
                active.retain(|entry| {
                    entry
                        .condition()
                        .map_or(false, |c| c.level != ConditionLevel::Normal)
                });
                let existing = active.iter_mut().find(|entry| {
                    entry
                        .condition()
                        .map_or(false, |c| c.native_code == condition.native_code)
                });
                match existing {
                    Some(slot) => *slot = observation.clone(),
                    None => active.push(observation.clone()),
                }
            }
        }
    }

    /// The current value(s) for one data item.
    pub fn current_of(&self, device_uuid: &str, data_item_id: &str) -> Option<CurrentEntry> {
        let inner = self.read_inner();
        let state = inner.get(&(device_uuid.to_string(), data_item_id.to_string()))?;
        Some(Self::entry(device_uuid, data_item_id, state))
    }

    /// A consistent copy of every matching item's current value(s), ordered
    /// by (device, data item) for deterministic rendering.
    pub fn snapshot(&self, filter: &ObservationFilter) -> Vec<CurrentEntry> {
        let inner = self.read_inner();
        let mut entries: Vec<CurrentEntry> = inner
            .iter()
            .filter(|((device, item), _)| filter.matches_ids(device, item))
            .map(|((device, item), state)| Self::entry(device, item, state))
            .collect();
        entries.sort_by(|a, b| {
            (&a.device_uuid, &a.data_item_id).cmp(&(&b.device_uuid, &b.data_item_id))
        });
        entries
    }

    fn entry(device_uuid: &str, data_item_id: &str, state: &ItemState) -> CurrentEntry {
        let observations = match state {
            ItemState::Latest(obs) => vec![obs.clone()],
            ItemState::Conditions(active) => active.clone(),
        };
        CurrentEntry {
            device_uuid: device_uuid.to_string(),
            data_item_id: data_item_id.to_string(),
            observations,
        }
    }
}
