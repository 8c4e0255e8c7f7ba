//! Purpose: Host-side cache from pointer id to materialized value.
//! Exports: `Store`, `MemoryStore`, `page_bounds`.
//! Role: Authoritative record of what has been resolved; shared by all connections.
//! Invariants: Scans return entries in insertion order; re-saving an id keeps its slot.
//! Invariants: Invalid pages yield an empty result, never an error.
use std::collections::{BTreeMap, HashMap};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::id::PointerId;
use crate::core::value::Value;

/// Concurrent keyed storage. All methods take `&self`; implementations
/// synchronize internally so connections never need an outer lock.
pub trait Store: Send + Sync {
    fn save(&self, id: &PointerId, value: Value);
    fn get(&self, id: &PointerId) -> Option<Value>;
    fn has(&self, id: &PointerId) -> bool;
    fn delete(&self, id: &PointerId) -> Option<Value>;
    fn len(&self) -> usize;

    /// `get_all(0, 0)` returns everything; otherwise the `page_index`-th
    /// window of `page_size` entries, or nothing when the window is invalid.
    fn get_all(&self, page_index: i64, page_size: i64) -> Vec<(PointerId, Value)>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Validates a page request against `store_size`, returning the slice bounds.
pub fn page_bounds(page_index: i64, page_size: i64, store_size: usize) -> Option<(usize, usize)> {
    if page_index < 0 || page_size < 0 {
        return None;
    }
    let start = page_index.checked_mul(page_size)?;
    let end = start.checked_add(page_size)?;
    let start = usize::try_from(start).ok()?;
    let end = usize::try_from(end).ok()?;
    if start > store_size || end > store_size {
        return None;
    }
    Some((start, end))
}

#[derive(Default)]
struct Entries {
    next_seq: u64,
    values: HashMap<PointerId, (u64, Value)>,
    order: BTreeMap<u64, PointerId>,
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<Entries>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, Entries> {
        self.entries
            .read()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Entries> {
        self.entries
            .write()
            .unwrap_or_else(|poison| poison.into_inner())
    }
}

impl Store for MemoryStore {
    fn save(&self, id: &PointerId, value: Value) {
        let mut entries = self.write();
        if let Some(slot) = entries.values.get_mut(id) {
            slot.1 = value;
            return;
        }
        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.order.insert(seq, id.clone());
        entries.values.insert(id.clone(), (seq, value));
    }

    fn get(&self, id: &PointerId) -> Option<Value> {
        self.read().values.get(id).map(|(_, value)| value.clone())
    }

    fn has(&self, id: &PointerId) -> bool {
        self.read().values.contains_key(id)
    }

    fn delete(&self, id: &PointerId) -> Option<Value> {
        let mut entries = self.write();
        let (seq, value) = entries.values.remove(id)?;
        entries.order.remove(&seq);
        Some(value)
    }

    fn len(&self) -> usize {
        self.read().values.len()
    }

    fn get_all(&self, page_index: i64, page_size: i64) -> Vec<(PointerId, Value)> {
        let entries = self.read();
        let (skip, take) = if page_index == 0 && page_size == 0 {
            (0, entries.values.len())
        } else {
            match page_bounds(page_index, page_size, entries.values.len()) {
                Some((start, end)) => (start, end - start),
                None => return Vec::new(),
            }
        };
        entries
            .order
            .values()
            .skip(skip)
            .take(take)
            .filter_map(|id| {
                entries
                    .values
                    .get(id)
                    .map(|(_, value)| (id.clone(), value.clone()))
            })
            .collect()
    }
}
