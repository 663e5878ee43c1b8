//! Open-addressed, linear-probing hash table keyed by `Value` (spec §4.3).
//!
//! `None` is reserved as the empty-bucket sentinel (its key field), so `None`
//! is never a valid user key; the VM never inserts one. Grounded on
//! `original_source/Caby/src/hashtable.c`'s `find_entry`/`adjust_capacity`,
//! generalized from string-only keys to arbitrary values.

use super::gc::Gc;
use super::value::Value;

const MAX_LOAD: f64 = 0.75;
const INITIAL_CAPACITY: usize = 8;

#[derive(Clone, Copy)]
struct Entry {
    key: Value,
    val: Value,
}

/// Bucket state as encoded by the key/val pair: empty (`key=None,
/// val=None`), tombstone (`key=None, val=Some(sentinel)`), or live.
fn is_empty(e: &Entry) -> bool {
    matches!(e.key, Value::None) && matches!(e.val, Value::None)
}

fn is_tombstone(e: &Entry) -> bool {
    matches!(e.key, Value::None) && !matches!(e.val, Value::None)
}

pub struct Table {
    entries: Vec<Entry>,
    count: usize,
}

impl Default for Table {
    fn default() -> Self {
        Self::new()
    }
}

impl Table {
    pub fn new() -> Self {
        Table {
            entries: Vec::new(),
            count: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    fn find_slot(entries: &[Entry], capacity: usize, key: &Value, gc: &Gc) -> usize {
        let mut idx = (key.hash(gc) as usize) & (capacity - 1);
        let mut tombstone: Option<usize> = None;
        loop {
            let e = &entries[idx];
            if is_empty(e) {
                return tombstone.unwrap_or(idx);
            } else if is_tombstone(e) {
                if tombstone.is_none() {
                    tombstone = Some(idx);
                }
            } else if e.key.equals(key, gc) {
                return idx;
            }
            idx = (idx + 1) & (capacity - 1);
        }
    }

    fn grow(&mut self, gc: &Gc) {
        let new_capacity = if self.entries.is_empty() {
            INITIAL_CAPACITY
        } else {
            self.entries.len() * 2
        };
        let mut new_entries = vec![
            Entry {
                key: Value::None,
                val: Value::None,
            };
            new_capacity
        ];
        let mut new_count = 0;
        for e in &self.entries {
            if is_empty(e) || is_tombstone(e) {
                continue;
            }
            let slot = Self::find_slot(&new_entries, new_capacity, &e.key, gc);
            new_entries[slot] = *e;
            new_count += 1;
        }
        self.entries = new_entries;
        self.count = new_count;
    }

    /// Returns `true` iff `key` was not already present. Grows (doubling)
    /// when the load factor would exceed 0.75.
    pub fn set(&mut self, key: Value, val: Value, gc: &Gc) -> bool {
        if self.entries.is_empty()
            || (self.count + 1) as f64 > self.entries.len() as f64 * MAX_LOAD
        {
            self.grow(gc);
        }
        let capacity = self.entries.len();
        let idx = Self::find_slot(&self.entries, capacity, &key, gc);
        let is_new = is_empty(&self.entries[idx]);
        if is_new {
            self.count += 1;
        }
        self.entries[idx] = Entry { key, val };
        is_new
    }

    pub fn get(&self, key: &Value, gc: &Gc) -> Option<Value> {
        if self.entries.is_empty() {
            return None;
        }
        let idx = Self::find_slot(&self.entries, self.entries.len(), key, gc);
        let e = &self.entries[idx];
        if is_empty(e) || is_tombstone(e) {
            None
        } else {
            Some(e.val)
        }
    }

    pub fn contains(&self, key: &Value, gc: &Gc) -> bool {
        self.get(key, gc).is_some()
    }

    /// Replaces the bucket with a tombstone; `count` is not decremented, so
    /// probe chains stay intact.
    pub fn delete(&mut self, key: &Value, gc: &Gc) -> bool {
        if self.entries.is_empty() {
            return false;
        }
        let idx = Self::find_slot(&self.entries, self.entries.len(), key, gc);
        let e = &self.entries[idx];
        if is_empty(e) || is_tombstone(e) {
            return false;
        }
        self.entries[idx] = Entry {
            key: Value::None,
            val: Value::Bool(true),
        };
        true
    }

    /// All live (key, value) pairs, used by the GC's `mark_table`.
    pub fn iter_live(&self) -> impl Iterator<Item = (Value, Value)> + '_ {
        self.entries
            .iter()
            .filter(|e| !is_empty(e) && !is_tombstone(e))
            .map(|e| (e.key, e.val))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vm::alloc::BlockAllocator;
    use crate::vm::gc::Gc;
    use crate::vm::value::{Object, StringObj};

    fn test_gc() -> Gc {
        Gc::new(BlockAllocator::new(1 << 20), false)
    }

    fn intern(gc: &mut Gc, s: &str) -> Value {
        let roots = crate::vm::gc::Roots {
            constant_pool: &[],
            stack: &[],
            globals: &[],
            frame_locals: &[],
        };
        let r = gc
            .alloc_object(Object::String(StringObj::new(s.as_bytes().to_vec())), &roots)
            .expect("test heap should not be exhausted");
        Value::Object(r)
    }

    #[test]
    fn set_get_roundtrip() {
        let mut gc = test_gc();
        let mut t = Table::new();
        let k = intern(&mut gc, "x");
        assert!(t.set(k, Value::Int(42), &gc));
        assert!(matches!(t.get(&k, &gc), Some(Value::Int(42))));
    }

    #[test]
    fn delete_then_get_misses_but_capacity_stays_power_of_two() {
        let mut gc = test_gc();
        let mut t = Table::new();
        let k = intern(&mut gc, "x");
        t.set(k, Value::Int(1), &gc);
        assert!(t.delete(&k, &gc));
        assert!(t.get(&k, &gc).is_none());
        assert!(t.capacity().is_power_of_two());
    }

    #[test]
    fn grows_and_keeps_load_factor_bounded() {
        let mut gc = test_gc();
        let mut t = Table::new();
        let keys: Vec<Value> = (0..100)
            .map(|i| intern(&mut gc, &format!("k{i}")))
            .collect();
        for (i, k) in keys.iter().enumerate() {
            t.set(*k, Value::Int(i as i32), &gc);
        }
        assert!(t.capacity().is_power_of_two());
        assert!((t.len() as f64) <= t.capacity() as f64 * MAX_LOAD);
        for (i, k) in keys.iter().enumerate() {
            assert!(matches!(t.get(k, &gc), Some(Value::Int(n)) if n == i as i32));
        }
    }

    #[test]
    fn reinsert_after_delete_reuses_tombstone_without_losing_count_consistency() {
        let mut gc = test_gc();
        let mut t = Table::new();
        let k = intern(&mut gc, "x");
        t.set(k, Value::Int(1), &gc);
        t.delete(&k, &gc);
        let is_new = t.set(k, Value::Int(2), &gc);
        assert!(!is_new, "tombstone reuse should not count as a new key a second time over");
        assert!(matches!(t.get(&k, &gc), Some(Value::Int(2))));
    }
}
