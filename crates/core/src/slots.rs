//! Bounded table of concurrently running watches.

use std::{collections::BTreeMap, sync::Arc};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::debug;

/// Default number of runs allowed at once.
pub const DEFAULT_MAX_SLOTS: usize = 4;

/// A run currently holding a slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSlot {
    /// Run name.
    pub name: String,
    /// When the slot was taken.
    pub since: DateTime<Utc>,
}

#[derive(Debug)]
struct SlotTable {
    max: usize,
    active: BTreeMap<String, DateTime<Utc>>,
}

/// Hands out at most `max` slots; names are unique among active slots.
#[derive(Debug, Clone)]
pub struct SlotManager {
    table: Arc<Mutex<SlotTable>>,
}

impl Default for SlotManager {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_SLOTS)
    }
}

impl SlotManager {
    /// Manager with `max` slots.
    pub fn new(max: usize) -> Self {
        Self {
            table: Arc::new(Mutex::new(SlotTable {
                max,
                active: BTreeMap::new(),
            })),
        }
    }

    /// Take a slot for `name`. `None` when full or the name is already running.
    pub fn acquire(&self, name: &str) -> Option<SlotGuard> {
        let mut table = self.table.lock();
        if table.active.len() >= table.max || table.active.contains_key(name) {
            return None;
        }
        table.active.insert(name.to_string(), Utc::now());
        debug!("slot taken by {name} ({}/{})", table.active.len(), table.max);
        Some(SlotGuard {
            name: name.to_string(),
            table: Arc::clone(&self.table),
        })
    }

    /// Number of slots in use.
    pub fn active_count(&self) -> usize {
        self.table.lock().active.len()
    }

    /// Free slots.
    pub fn available(&self) -> usize {
        let table = self.table.lock();
        table.max.saturating_sub(table.active.len())
    }

    /// Whether every slot is taken.
    pub fn is_full(&self) -> bool {
        self.available() == 0
    }

    /// Active slots ordered by name.
    pub fn slots(&self) -> Vec<ActiveSlot> {
        self.table
            .lock()
            .active
            .iter()
            .map(|(name, since)| ActiveSlot {
                name: name.clone(),
                since: *since,
            })
            .collect()
    }
}

/// Releases its slot when dropped.
#[derive(Debug)]
pub struct SlotGuard {
    name: String,
    table: Arc<Mutex<SlotTable>>,
}

impl SlotGuard {
    /// Name the slot was taken for.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut table = self.table.lock();
        table.active.remove(&self.name);
        debug!("slot released by {}", self.name);
    }
}
