//! Arena-backed LRU cache bounded by entry count and aggregate size

use crate::types::CacheStats;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use tracing::trace;

/// Sentinel index for "no neighbour" in the recency list
const NIL: usize = usize::MAX;

/// Sizing function applied to a value when it is stored
type Sizer<V> = Box<dyn Fn(&V) -> u64 + Send + Sync>;

/// Recency links for one arena slot. Kept apart from the entry so relinking a
/// slot never has to look inside it.
#[derive(Debug, Clone, Copy)]
struct Link {
    prev: usize,
    next: usize,
}

impl Link {
    const fn detached() -> Self {
        Self {
            prev: NIL,
            next: NIL,
        }
    }
}

struct Entry<K, V> {
    key: K,
    value: V,
    /// Size charged when the value was stored
    size: u64,
}

/// An LRU cache that holds at most `capacity` entries and at most `max_size`
/// bytes as reported by its sizing function.
///
/// Entries live in a vector arena and are threaded onto a doubly linked
/// recency list by index, most recently used at the head. Freed slots are
/// recycled through a free list, so steady-state churn does not allocate.
pub struct ChunkStore<K, V> {
    /// Key to arena slot
    index: HashMap<K, usize>,
    /// Arena of entries; `None` marks a free slot
    entries: Vec<Option<Entry<K, V>>>,
    /// Recency links, parallel to `entries`
    links: Vec<Link>,
    /// Slots available for reuse
    free: Vec<usize>,
    /// Most recently used slot
    head: usize,
    /// Least recently used slot
    tail: usize,
    /// Maximum number of entries
    capacity: usize,
    /// Maximum aggregate size
    max_size: u64,
    /// Sum of the sizes charged for every live entry
    current_size: u64,
    sizer: Sizer<V>,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl<K, V> ChunkStore<K, V>
where
    K: Eq + Hash + Clone,
{
    /// Create an empty store.
    ///
    /// `sizer` is evaluated once per `set` and its result is what the store
    /// charges against `max_size` for that entry until it is replaced or
    /// evicted.
    pub fn new<F>(capacity: usize, max_size: u64, sizer: F) -> Self
    where
        F: Fn(&V) -> u64 + Send + Sync + 'static,
    {
        Self {
            index: HashMap::new(),
            entries: Vec::new(),
            links: Vec::new(),
            free: Vec::new(),
            head: NIL,
            tail: NIL,
            capacity,
            max_size,
            current_size: 0,
            sizer: Box::new(sizer),
            hits: 0,
            misses: 0,
            evictions: 0,
        }
    }

    /// Look up `key`, promoting it to most recently used on a hit
    pub fn get(&mut self, key: &K) -> Option<&V> {
        let Some(&slot) = self.index.get(key) else {
            self.misses += 1;
            return None;
        };

        self.hits += 1;
        self.move_to_front(slot);
        self.entries[slot].as_ref().map(|entry| &entry.value)
    }

    /// Look up `key` without touching recency or the hit counters
    pub fn peek(&self, key: &K) -> Option<&V> {
        let slot = *self.index.get(key)?;
        self.entries[slot].as_ref().map(|entry| &entry.value)
    }

    pub fn contains(&self, key: &K) -> bool {
        self.index.contains_key(key)
    }

    /// Insert or replace `key` as the most recently used entry, then evict
    /// from the least recently used end until both bounds hold.
    ///
    /// A value larger than `max_size` on its own is evicted immediately.
    pub fn set(&mut self, key: K, value: V) {
        let size = (self.sizer)(&value);

        if let Some(&slot) = self.index.get(&key) {
            if let Some(entry) = self.entries[slot].as_mut() {
                self.current_size = self.current_size.saturating_sub(entry.size);
                entry.value = value;
                entry.size = size;
            }
            self.current_size += size;
            self.move_to_front(slot);
        } else {
            let slot = self.allocate(Entry {
                key: key.clone(),
                value,
                size,
            });
            self.index.insert(key, slot);
            self.push_front(slot);
            self.current_size += size;
        }

        self.evict_to_bounds();
    }

    /// Remove `key`, returning its value if it was present
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let slot = self.index.remove(key)?;
        self.unlink(slot);
        let entry = self.release(slot)?;
        self.current_size = self.current_size.saturating_sub(entry.size);
        Some(entry.value)
    }

    /// Drop every entry and reset the aggregate size. Counters are kept.
    pub fn clear(&mut self) {
        self.index.clear();
        self.entries.clear();
        self.links.clear();
        self.free.clear();
        self.head = NIL;
        self.tail = NIL;
        self.current_size = 0;
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Aggregate size currently charged against `max_size`
    pub fn size(&self) -> u64 {
        self.current_size
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Iterate entries from most to least recently used
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            store: self,
            cursor: self.head,
        }
    }

    /// Keys from most to least recently used
    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(key, _)| key)
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            total_size: self.current_size,
            hits: self.hits,
            misses: self.misses,
            evictions: self.evictions,
        }
    }

    fn evict_to_bounds(&mut self) {
        while self.index.len() > self.capacity || self.current_size > self.max_size {
            let victim = self.tail;
            if victim == NIL {
                break;
            }

            self.unlink(victim);
            let Some(entry) = self.release(victim) else {
                break;
            };
            self.index.remove(&entry.key);
            self.current_size = self.current_size.saturating_sub(entry.size);
            self.evictions += 1;

            trace!(
                evicted_size = entry.size,
                entries = self.index.len(),
                total_size = self.current_size,
                "Evicted least recently used entry"
            );
        }
    }

    fn allocate(&mut self, entry: Entry<K, V>) -> usize {
        match self.free.pop() {
            Some(slot) => {
                self.entries[slot] = Some(entry);
                self.links[slot] = Link::detached();
                slot
            }
            None => {
                self.entries.push(Some(entry));
                self.links.push(Link::detached());
                self.entries.len() - 1
            }
        }
    }

    fn release(&mut self, slot: usize) -> Option<Entry<K, V>> {
        let entry = self.entries[slot].take()?;
        self.free.push(slot);
        Some(entry)
    }

    fn move_to_front(&mut self, slot: usize) {
        if self.head == slot {
            return;
        }
        self.unlink(slot);
        self.push_front(slot);
    }

    fn push_front(&mut self, slot: usize) {
        self.links[slot] = Link {
            prev: NIL,
            next: self.head,
        };
        if self.head != NIL {
            self.links[self.head].prev = slot;
        }
        self.head = slot;
        if self.tail == NIL {
            self.tail = slot;
        }
    }

    fn unlink(&mut self, slot: usize) {
        let Link { prev, next } = self.links[slot];

        if prev == NIL {
            self.head = next;
        } else {
            self.links[prev].next = next;
        }

        if next == NIL {
            self.tail = prev;
        } else {
            self.links[next].prev = prev;
        }

        self.links[slot] = Link::detached();
    }
}

impl<K, V> fmt::Debug for ChunkStore<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChunkStore")
            .field("entries", &self.index.len())
            .field("capacity", &self.capacity)
            .field("size", &self.current_size)
            .field("max_size", &self.max_size)
            .finish()
    }
}

/// Iterator over a [`ChunkStore`] in recency order
pub struct Iter<'a, K, V> {
    store: &'a ChunkStore<K, V>,
    cursor: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.cursor == NIL {
            return None;
        }
        let slot = self.cursor;
        self.cursor = self.store.links[slot].next;
        self.store.entries[slot]
            .as_ref()
            .map(|entry| (&entry.key, &entry.value))
    }
}
