use std::fmt::Debug;

#[derive(Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("slot table is full")]
pub struct Full<T>(pub T);

impl<T> Debug for Full<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("slot table is full")
    }
}

struct Entry<T> {
    /// Bumped every time the entry is vacated.
    generation: u32,
    value: Option<T>,
}

/// Bounded, growable slab addressed by stable index.
///
/// Vacant entries are reused lowest index first; the table only grows
/// when every allocated entry is occupied, and never beyond `limit`.
/// Removal does not shrink the backing storage.
pub struct SlotTable<T> {
    entries: Vec<Entry<T>>,
    len: usize,
    limit: usize,
}

impl<T> SlotTable<T> {
    pub fn with_limit(limit: usize) -> Self {
        Self {
            entries: Vec::new(),
            len: 0,
            limit,
        }
    }

    /// Reserve storage for the full limit up front.
    pub fn preallocated(limit: usize) -> Self {
        Self {
            entries: Vec::with_capacity(limit),
            len: 0,
            limit,
        }
    }

    /// Insert a value. Returns the key, or the value back when the table is
    /// at its limit or the allocator refuses to grow it.
    pub fn insert(&mut self, value: T) -> Result<usize, Full<T>> {
        if let Some(key) = self.first_vacant() {
            self.entries[key].value = Some(value);
            self.len += 1;
            return Ok(key);
        }

        // No vacant entry, so len == entries.len() here
        if self.is_full() || self.entries.try_reserve(1).is_err() {
            return Err(Full(value));
        }

        self.entries.push(Entry {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Ok(self.entries.len() - 1)
    }

    /// Remove by key. Returns None if out of range or vacant.
    pub fn remove(&mut self, key: usize) -> Option<T> {
        let entry = self.entries.get_mut(key)?;
        let value = entry.value.take()?;

        entry.generation = entry.generation.wrapping_add(1);
        self.len -= 1;
        Some(value)
    }

    #[inline(always)]
    pub fn get(&self, key: usize) -> Option<&T> {
        self.entries.get(key)?.value.as_ref()
    }

    #[inline(always)]
    pub fn get_mut(&mut self, key: usize) -> Option<&mut T> {
        self.entries.get_mut(key)?.value.as_mut()
    }

    /// Generation of an occupied entry.
    ///
    /// Two equal generations observed for the same key mean the same value
    /// has occupied it throughout.
    #[inline(always)]
    pub fn generation(&self, key: usize) -> Option<u32> {
        let entry = self.entries.get(key)?;
        entry.value.as_ref().map(|_| entry.generation)
    }

    /// Occupied entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(key, entry)| entry.value.as_ref().map(|v| (key, v)))
    }

    /// Occupied entries in ascending key order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.entries
            .iter_mut()
            .enumerate()
            .filter_map(|(key, entry)| entry.value.as_mut().map(|v| (key, v)))
    }

    /// Drop every value and release the backing storage.
    pub fn clear(&mut self) {
        self.entries = Vec::new();
        self.len = 0;
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline(always)]
    pub fn is_full(&self) -> bool {
        self.len >= self.limit
    }

    /// Occupied entries.
    #[inline(always)]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Allocated entries, occupied or vacant.
    #[inline(always)]
    pub fn slot_count(&self) -> usize {
        self.entries.len()
    }

    #[inline(always)]
    pub fn limit(&self) -> usize {
        self.limit
    }

    #[inline(always)]
    fn first_vacant(&self) -> Option<usize> {
        if self.len == self.entries.len() {
            return None;
        }
        self.entries.iter().position(|entry| entry.value.is_none())
    }
}
