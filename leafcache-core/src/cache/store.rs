//! Record storage with one key index and two independent orderings.
//!
//! Records live in a slot arena addressed by generational [`RecordId`]s.
//! On top of the arena sit:
//! - a `BTreeMap` from [`ThumbKey`] to id, for lookup;
//! - the *load order*, an intrusive list where every QUEUED record precedes
//!   every other record, so the loader finds work at the front;
//! - the *recency order*, an intrusive list where LOADED records come first,
//!   least recently used at the head. `end_of_loaded` points at the first
//!   record that is not LOADED (or is `None` when there is none), so the
//!   LOADED prefix can grow without scanning.
//!
//! Relinking a record in one list never disturbs its place in the other.
//! The store has no lock of its own; callers hold the cache lock.

use std::collections::BTreeMap;
use std::sync::Weak;

use super::lifecycle::RecordStatus;
use crate::key::ThumbKey;
use crate::traits::{CompletionHandler, ThumbnailGenerator, ThumbnailPixmap};

/// Stable handle to a record. Stale once the record is removed, even if the
/// slot gets reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct RecordId {
    index: u32,
    generation: u32,
}

/// Per-key bookkeeping.
pub(crate) struct Record {
    key: ThumbKey,
    status: RecordStatus,
    pub(crate) pixmap: Option<ThumbnailPixmap>,
    pub(crate) subscribers: Vec<Weak<dyn CompletionHandler>>,
    generator: Box<dyn ThumbnailGenerator>,
    created_at_attempt: u64,
}

impl Record {
    pub(crate) fn queued(
        key: ThumbKey,
        generator: Box<dyn ThumbnailGenerator>,
        created_at_attempt: u64,
    ) -> Self {
        Self {
            key,
            status: RecordStatus::Queued,
            pixmap: None,
            subscribers: Vec::new(),
            generator,
            created_at_attempt,
        }
    }

    pub(crate) fn key(&self) -> &ThumbKey {
        &self.key
    }

    pub(crate) fn status(&self) -> RecordStatus {
        self.status
    }

    pub(crate) fn generator(&self) -> &dyn ThumbnailGenerator {
        self.generator.as_ref()
    }

    pub(crate) fn created_at_attempt(&self) -> u64 {
        self.created_at_attempt
    }
}

impl std::fmt::Debug for Record {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Record")
            .field("key", &self.key)
            .field("status", &self.status)
            .field("has_pixmap", &self.pixmap.is_some())
            .field("subscribers", &self.subscribers.len())
            .field("created_at_attempt", &self.created_at_attempt)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Links {
    prev: Option<RecordId>,
    next: Option<RecordId>,
}

#[derive(Debug, Clone, Copy, Default)]
struct ListEnds {
    head: Option<RecordId>,
    tail: Option<RecordId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Order {
    Load,
    Recency,
}

#[derive(Debug)]
struct Entry {
    record: Record,
    load: Links,
    recency: Links,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    entry: Option<Entry>,
}

#[derive(Debug, Default)]
pub(crate) struct RecordStore {
    slots: Vec<Slot>,
    free: Vec<u32>,
    by_key: BTreeMap<ThumbKey, RecordId>,
    load: ListEnds,
    recency: ListEnds,
    end_of_loaded: Option<RecordId>,
    queued: usize,
    loaded: usize,
}

impl RecordStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn len(&self) -> usize {
        self.by_key.len()
    }

    pub(crate) fn queued_count(&self) -> usize {
        self.queued
    }

    pub(crate) fn loaded_count(&self) -> usize {
        self.loaded
    }

    pub(crate) fn find(&self, key: &ThumbKey) -> Option<RecordId> {
        self.by_key.get(key).copied()
    }

    pub(crate) fn get(&self, id: RecordId) -> Option<&Record> {
        self.entry(id).map(|entry| &entry.record)
    }

    pub(crate) fn get_mut(&mut self, id: RecordId) -> Option<&mut Record> {
        self.entry_mut(id).map(|entry| &mut entry.record)
    }

    /// Add a record for a key that is not yet present. It lands at the front
    /// of the load order and at the back of the recency order.
    pub(crate) fn insert(&mut self, record: Record) -> RecordId {
        debug_assert!(!self.by_key.contains_key(&record.key));
        debug_assert_eq!(record.status, RecordStatus::Queued);

        let index = match self.free.pop() {
            Some(index) => index,
            None => {
                self.slots.push(Slot {
                    generation: 0,
                    entry: None,
                });
                (self.slots.len() - 1) as u32
            }
        };
        let slot = &mut self.slots[index as usize];
        let id = RecordId {
            index,
            generation: slot.generation,
        };

        let status = record.status;
        self.by_key.insert(record.key.clone(), id);
        slot.entry = Some(Entry {
            record,
            load: Links::default(),
            recency: Links::default(),
        });
        self.count(status, 1);

        let head = self.load.head;
        self.link_before(Order::Load, id, head);
        self.link_before(Order::Recency, id, None);
        if self.end_of_loaded.is_none() {
            self.end_of_loaded = Some(id);
        }

        id
    }

    /// Change a record's status, keeping the per-status counters in step.
    /// Orderings are left alone.
    pub(crate) fn set_status(&mut self, id: RecordId, status: RecordStatus) {
        let Some(entry) = self.entry_mut(id) else {
            return;
        };
        let previous = std::mem::replace(&mut entry.record.status, status);
        if previous != status {
            self.count(previous, -1);
            self.count(status, 1);
        }
    }

    pub(crate) fn move_to_load_front(&mut self, id: RecordId) {
        if self.entry(id).is_none() || self.load.head == Some(id) {
            return;
        }
        self.unlink(Order::Load, id);
        let head = self.load.head;
        self.link_before(Order::Load, id, head);
    }

    pub(crate) fn move_to_load_back(&mut self, id: RecordId) {
        if self.entry(id).is_none() || self.load.tail == Some(id) {
            return;
        }
        self.unlink(Order::Load, id);
        self.link_before(Order::Load, id, None);
    }

    /// Make `id` the most recently used LOADED record: it moves to just
    /// before the boundary marker. The record must already be LOADED.
    pub(crate) fn move_to_loaded_tail(&mut self, id: RecordId) {
        if self.entry(id).is_none() {
            return;
        }
        if self.end_of_loaded == Some(id) {
            // Already right after the last LOADED record; the boundary just
            // moves past it.
            self.end_of_loaded = self.links(Order::Recency, id).next;
            return;
        }
        self.unlink(Order::Recency, id);
        let boundary = self.end_of_loaded;
        self.link_before(Order::Recency, id, boundary);
    }

    /// The eviction candidate: head of the recency order, if LOADED.
    pub(crate) fn least_recently_used(&self) -> Option<RecordId> {
        self.iter_recency()
            .next()
            .filter(|(_, record)| record.status == RecordStatus::Loaded)
            .map(|(id, _)| id)
    }

    /// Drop a record from the key index and both orderings at once.
    pub(crate) fn remove(&mut self, id: RecordId) -> Option<Record> {
        self.entry(id)?;

        if self.end_of_loaded == Some(id) {
            self.end_of_loaded = self.links(Order::Recency, id).next;
        }
        self.unlink(Order::Load, id);
        self.unlink(Order::Recency, id);

        let slot = &mut self.slots[id.index as usize];
        let entry = slot.entry.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);

        self.by_key.remove(&entry.record.key);
        self.count(entry.record.status, -1);
        Some(entry.record)
    }

    /// Records in load order, front first.
    pub(crate) fn iter_load(&self) -> OrderIter<'_> {
        OrderIter {
            store: self,
            order: Order::Load,
            next: self.load.head,
        }
    }

    /// Records in recency order, least recently used first.
    pub(crate) fn iter_recency(&self) -> OrderIter<'_> {
        OrderIter {
            store: self,
            order: Order::Recency,
            next: self.recency.head,
        }
    }

    fn entry(&self, id: RecordId) -> Option<&Entry> {
        let slot = self.slots.get(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_ref()
    }

    fn entry_mut(&mut self, id: RecordId) -> Option<&mut Entry> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        slot.entry.as_mut()
    }

    fn count(&mut self, status: RecordStatus, delta: isize) {
        let counter = match status {
            RecordStatus::Queued => &mut self.queued,
            RecordStatus::Loaded => &mut self.loaded,
            RecordStatus::InProgress | RecordStatus::LoadFailed => return,
        };
        *counter = counter.saturating_add_signed(delta);
    }

    fn links(&self, order: Order, id: RecordId) -> Links {
        self.entry(id)
            .map(|entry| match order {
                Order::Load => entry.load,
                Order::Recency => entry.recency,
            })
            .unwrap_or_default()
    }

    fn links_mut(&mut self, order: Order, id: RecordId) -> Option<&mut Links> {
        self.entry_mut(id).map(|entry| match order {
            Order::Load => &mut entry.load,
            Order::Recency => &mut entry.recency,
        })
    }

    fn ends_mut(&mut self, order: Order) -> &mut ListEnds {
        match order {
            Order::Load => &mut self.load,
            Order::Recency => &mut self.recency,
        }
    }

    /// Splice an unlinked `id` in front of `before` (`None` = at the tail).
    fn link_before(
        &mut self,
        order: Order,
        id: RecordId,
        before: Option<RecordId>,
    ) {
        let prev = match before {
            Some(before) => self.links(order, before).prev,
            None => self.ends_mut(order).tail,
        };

        if let Some(links) = self.links_mut(order, id) {
            links.prev = prev;
            links.next = before;
        }
        match prev {
            Some(prev) => {
                if let Some(links) = self.links_mut(order, prev) {
                    links.next = Some(id);
                }
            }
            None => self.ends_mut(order).head = Some(id),
        }
        match before {
            Some(before) => {
                if let Some(links) = self.links_mut(order, before) {
                    links.prev = Some(id);
                }
            }
            None => self.ends_mut(order).tail = Some(id),
        }
    }

    fn unlink(&mut self, order: Order, id: RecordId) {
        let Links { prev, next } = self.links(order, id);
        match prev {
            Some(prev) => {
                if let Some(links) = self.links_mut(order, prev) {
                    links.next = next;
                }
            }
            None => self.ends_mut(order).head = next,
        }
        match next {
            Some(next) => {
                if let Some(links) = self.links_mut(order, next) {
                    links.prev = prev;
                }
            }
            None => self.ends_mut(order).tail = prev,
        }
        if let Some(links) = self.links_mut(order, id) {
            *links = Links::default();
        }
    }

    /// Walk every structure and check the invariants the cache relies on.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        use std::collections::HashSet;

        let load: Vec<RecordId> = self.iter_load().map(|(id, _)| id).collect();
        let recency: Vec<RecordId> =
            self.iter_recency().map(|(id, _)| id).collect();

        assert_eq!(load.len(), self.by_key.len(), "load order size");
        assert_eq!(recency.len(), self.by_key.len(), "recency order size");
        let load_set: HashSet<_> = load.iter().copied().collect();
        let recency_set: HashSet<_> = recency.iter().copied().collect();
        let key_set: HashSet<_> = self.by_key.values().copied().collect();
        assert_eq!(load_set, key_set, "load order covers every record");
        assert_eq!(recency_set, key_set, "recency order covers every record");

        for (key, id) in &self.by_key {
            assert_eq!(self.get(*id).map(Record::key), Some(key));
        }

        let status = |id: &RecordId| self.get(*id).map(Record::status);
        let queued_prefix = load
            .iter()
            .take_while(|id| status(id) == Some(RecordStatus::Queued))
            .count();
        assert!(
            load[queued_prefix..]
                .iter()
                .all(|id| status(id) != Some(RecordStatus::Queued)),
            "QUEUED records must precede all others in load order"
        );
        assert_eq!(queued_prefix, self.queued, "queued counter");

        let loaded_prefix = recency
            .iter()
            .take_while(|id| status(id) == Some(RecordStatus::Loaded))
            .count();
        assert!(
            recency[loaded_prefix..]
                .iter()
                .all(|id| status(id) != Some(RecordStatus::Loaded)),
            "LOADED records must precede all others in recency order"
        );
        assert_eq!(loaded_prefix, self.loaded, "loaded counter");
        assert_eq!(
            self.end_of_loaded,
            recency.get(loaded_prefix).copied(),
            "boundary marker sits on the first non-LOADED record"
        );
    }
}

pub(crate) struct OrderIter<'a> {
    store: &'a RecordStore,
    order: Order,
    next: Option<RecordId>,
}

impl<'a> Iterator for OrderIter<'a> {
    type Item = (RecordId, &'a Record);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let entry = self.store.entry(id)?;
        self.next = match self.order {
            Order::Load => entry.load.next,
            Order::Recency => entry.recency.next,
        };
        Some((id, &entry.record))
    }
}
