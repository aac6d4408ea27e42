//! Insertion-ordered, capacity-bounded catalog cache.
//!
//! Each session keeps at most `capacity` custom translation catalogs. The
//! cache remembers insertion order so that the oldest catalog is evicted
//! first, and re-inserting an existing name moves it to the newest position.
//!
//! # Layout
//!
//! ```text
//!   entries: HashMap<name, (seq, value)>      O(1) lookup
//!   order:   VecDeque<(seq, name)>            oldest at the front
//! ```
//!
//! Removing or re-inserting a name leaves a stale `(seq, name)` pair in
//! `order`; stale pairs are skipped on eviction and iteration and compacted
//! away once they outnumber live entries.

use std::collections::{BTreeMap, HashMap, VecDeque};

/// Extension (lower-case) every catalog source name must carry.
pub const CATALOG_EXTENSION: &str = ".po";

/// Extension of compiled catalogs.
pub const COMPILED_EXTENSION: &str = "mo";

/// Module name → catalog names for that module, oldest first.
pub type CatalogGrouping = BTreeMap<String, Vec<String>>;

/// Returns true if `name` ends with the catalog extension (case-insensitive).
pub fn is_catalog_name(name: &str) -> bool {
    name.to_lowercase().ends_with(CATALOG_EXTENSION)
}

/// Groups `(catalog name, module)` pairs by module, preserving input order
/// inside each group.
pub fn group_by_module<'a, I>(items: I) -> CatalogGrouping
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut grouping = CatalogGrouping::new();
    for (name, module) in items {
        grouping
            .entry(module.to_string())
            .or_default()
            .push(name.to_string());
    }
    grouping
}

/// What an insertion pushed out of the cache.
#[derive(Debug, PartialEq, Eq)]
pub enum Displaced<V> {
    /// The same name was already cached; this is its previous value.
    Replaced(V),
    /// The cache was full; this is the oldest entry.
    Evicted { name: String, value: V },
}

#[derive(Debug)]
struct Slot<V> {
    seq: u64,
    value: V,
}

/// Ordered map bounded by a fixed capacity.
#[derive(Debug)]
pub struct CatalogCache<V> {
    capacity: usize,
    entries: HashMap<String, Slot<V>>,
    order: VecDeque<(u64, String)>,
    next_seq: u64,
}

impl<V> CatalogCache<V> {
    /// Creates an empty cache. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: HashMap::new(),
            order: VecDeque::new(),
            next_seq: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn get(&self, name: &str) -> Option<&V> {
        self.entries.get(name).map(|slot| &slot.value)
    }

    /// Inserts `value` under `name` at the newest position.
    ///
    /// An existing entry with the same name is replaced (and does not count
    /// against capacity); otherwise, if the cache is full, the oldest entry
    /// is evicted. The displaced value is handed back so the caller can
    /// release whatever it owns.
    pub fn insert(&mut self, name: impl Into<String>, value: V) -> Option<Displaced<V>> {
        let name = name.into();

        let displaced = if let Some(old) = self.entries.remove(&name) {
            Some(Displaced::Replaced(old.value))
        } else if self.entries.len() >= self.capacity {
            self.pop_oldest()
                .map(|(name, value)| Displaced::Evicted { name, value })
        } else {
            None
        };

        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.order.push_back((seq, name.clone()));
        self.entries.insert(name, Slot { seq, value });
        self.compact();

        displaced
    }

    /// Removes `name` from the cache.
    pub fn remove(&mut self, name: &str) -> Option<V> {
        let slot = self.entries.remove(name)?;
        self.compact();
        Some(slot.value)
    }

    /// Removes and returns the oldest live entry.
    pub fn pop_oldest(&mut self) -> Option<(String, V)> {
        while let Some((seq, name)) = self.order.pop_front() {
            let live = self.entries.get(&name).is_some_and(|slot| slot.seq == seq);
            if live {
                if let Some(slot) = self.entries.remove(&name) {
                    return Some((name, slot.value));
                }
            }
        }
        None
    }

    /// Iterates live entries from oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.order.iter().filter_map(move |(seq, name)| {
            self.entries
                .get(name)
                .filter(|slot| slot.seq == *seq)
                .map(|slot| (name.as_str(), &slot.value))
        })
    }

    /// Catalog names from oldest to newest.
    pub fn names(&self) -> Vec<&str> {
        self.iter().map(|(name, _)| name).collect()
    }

    /// Empties the cache, returning every entry oldest first.
    pub fn drain(&mut self) -> Vec<(String, V)> {
        let mut drained = Vec::with_capacity(self.entries.len());
        while let Some(entry) = self.pop_oldest() {
            drained.push(entry);
        }
        self.order.clear();
        drained
    }

    fn compact(&mut self) {
        if self.order.len() <= self.entries.len() * 2 + 8 {
            return;
        }
        let entries = &self.entries;
        self.order
            .retain(|(seq, name)| entries.get(name).is_some_and(|slot| slot.seq == *seq));
    }
}
