//! Hybrid array+hash table for Lua.

use crate::number::float_to_integer;
use crate::string::LuaStr;
use crate::value::TValue;
use indexmap::IndexMap;
use std::cell::RefCell;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

/// Shared handle to a table.
pub type TableRef = Rc<RefCell<Table>>;

/// Errors from raw table writes and traversal.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum TableError {
    #[error("table index is nil")]
    NilKey,
    #[error("table index is NaN")]
    NaNKey,
    #[error("invalid key to 'next'")]
    InvalidNextKey,
}

/// A reference-kind key (table, function, host value, thread), compared
/// and hashed by identity.
#[derive(Clone, Debug)]
pub struct ObjectKey(TValue);

impl ObjectKey {
    fn id(&self) -> usize {
        self.0.ptr_id().unwrap_or_default()
    }
}

impl PartialEq for ObjectKey {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for ObjectKey {}

impl Hash for ObjectKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

/// A key in the hash part of a table.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum TableKey {
    Integer(i64),
    String(LuaStr),
    /// Float key without an integer value, stored as raw bits for hashing.
    Float(u64),
    Boolean(bool),
    Object(ObjectKey),
}

impl TableKey {
    /// Normalize a value into a key. Floats with an exact integer value
    /// become integer keys. Nil and NaN have no key.
    pub fn from_value(v: &TValue) -> Result<TableKey, TableError> {
        Ok(match v {
            TValue::Nil => return Err(TableError::NilKey),
            TValue::Integer(i) => TableKey::Integer(*i),
            TValue::Float(f) => {
                if f.is_nan() {
                    return Err(TableError::NaNKey);
                }
                match float_to_integer(*f) {
                    Some(i) => TableKey::Integer(i),
                    None => TableKey::Float(f.to_bits()),
                }
            }
            TValue::Bool(b) => TableKey::Boolean(*b),
            TValue::String(s) => TableKey::String(s.clone()),
            _ => TableKey::Object(ObjectKey(v.clone())),
        })
    }

    /// Convert back to a value.
    pub fn to_value(&self) -> TValue {
        match self {
            TableKey::Integer(i) => TValue::from_integer(*i),
            TableKey::String(s) => TValue::String(s.clone()),
            TableKey::Float(bits) => TValue::from_float(f64::from_bits(*bits)),
            TableKey::Boolean(b) => TValue::from_bool(*b),
            TableKey::Object(o) => o.0.clone(),
        }
    }
}

/// A Lua table: hybrid array + hash map.
#[derive(Default)]
pub struct Table {
    /// Array part (1-indexed: array[0] corresponds to key 1).
    array: Vec<TValue>,
    /// Hash part for non-sequential keys (insertion-order preserving).
    /// Entries assigned nil stay as tombstones so `next` can continue
    /// past keys cleared during traversal.
    hash: IndexMap<TableKey, TValue>,
    tombstones: usize,
    /// Metatable (if any).
    pub metatable: Option<TableRef>,
}

impl Table {
    /// Create a new empty table with size hints.
    pub fn new(array_hint: usize, hash_hint: usize) -> Self {
        Table {
            array: Vec::with_capacity(array_hint),
            hash: IndexMap::with_capacity(hash_hint),
            tombstones: 0,
            metatable: None,
        }
    }

    /// Wrap into a shared handle.
    pub fn into_ref(self) -> TableRef {
        Rc::new(RefCell::new(self))
    }

    /// Raw get by value key. Nil and NaN keys read as nil.
    pub fn raw_get(&self, key: &TValue) -> TValue {
        match key {
            TValue::Integer(i) => self.raw_geti(*i),
            TValue::String(s) => self.raw_get_str(s),
            _ => match TableKey::from_value(key) {
                Ok(TableKey::Integer(i)) => self.raw_geti(i),
                Ok(tk) => self.hash.get(&tk).cloned().unwrap_or_default(),
                Err(_) => TValue::nil(),
            },
        }
    }

    /// Raw set by value key.
    pub fn raw_set(&mut self, key: &TValue, value: TValue) -> Result<(), TableError> {
        match TableKey::from_value(key)? {
            TableKey::Integer(i) => self.raw_seti(i, value),
            tk => self.hash_set(tk, value),
        }
        Ok(())
    }

    /// Fast integer get (1-indexed).
    pub fn raw_geti(&self, key: i64) -> TValue {
        if key >= 1 && (key as u64) <= self.array.len() as u64 {
            self.array[(key - 1) as usize].clone()
        } else {
            self.hash
                .get(&TableKey::Integer(key))
                .cloned()
                .unwrap_or_default()
        }
    }

    /// Fast integer set (1-indexed).
    pub fn raw_seti(&mut self, key: i64, value: TValue) {
        if key >= 1 && (key as u64) <= self.array.len() as u64 + 1 {
            let idx = (key - 1) as usize;
            if idx < self.array.len() {
                self.array[idx] = value;
                return;
            }
            // Appending: extend the array unless the value is nil
            if !value.is_nil() {
                if let Some(old) = self.hash.get_mut(&TableKey::Integer(key)) {
                    *old = TValue::nil();
                    self.tombstones += 1;
                }
                self.array.push(value);
                self.migrate_from_hash();
                return;
            }
        }
        self.hash_set(TableKey::Integer(key), value);
    }

    /// Fast string key get.
    pub fn raw_get_str(&self, key: &LuaStr) -> TValue {
        self.hash
            .get(&TableKey::String(key.clone()))
            .cloned()
            .unwrap_or_default()
    }

    /// Fast string key set.
    pub fn raw_set_str(&mut self, key: LuaStr, value: TValue) {
        self.hash_set(TableKey::String(key), value);
    }

    fn hash_set(&mut self, tk: TableKey, value: TValue) {
        match self.hash.get_mut(&tk) {
            Some(slot) => {
                match (slot.is_nil(), value.is_nil()) {
                    (true, false) => self.tombstones -= 1,
                    (false, true) => self.tombstones += 1,
                    _ => {}
                }
                *slot = value;
            }
            // Only existing keys get tombstones; never-present keys stay absent
            None if value.is_nil() => {}
            None => {
                if self.tombstones > 8 && self.tombstones * 2 > self.hash.len() {
                    self.compact_hash();
                }
                self.hash.insert(tk, value);
            }
        }
    }

    /// Get the "length" of a table: a border n such that t[n] is non-nil
    /// and t[n+1] is nil (0 when t[1] is nil).
    pub fn length(&self) -> i64 {
        let n = self.array.len();
        if n > 0 && self.array[n - 1].is_nil() {
            // Binary search for a border inside the array part
            let mut lo = 0usize;
            let mut hi = n;
            while lo < hi {
                let mid = (lo + hi) / 2;
                if self.array[mid].is_nil() {
                    hi = mid;
                } else {
                    lo = mid + 1;
                }
            }
            return lo as i64;
        }
        // Array part full (or empty): continue into the hash part
        let mut j = n as i64;
        while j < i64::MAX && !self.raw_geti(j + 1).is_nil() {
            j += 1;
        }
        j
    }

    /// Get the next key-value pair after `key` (nil starts the traversal).
    /// Returns Ok(None) at the end of the traversal.
    pub fn next(&self, key: &TValue) -> Result<Option<(TValue, TValue)>, TableError> {
        let start_array = match key {
            TValue::Nil => 0,
            _ => match TableKey::from_value(key) {
                Ok(TableKey::Integer(i)) if i >= 1 && (i as u64) <= self.array.len() as u64 => {
                    i as usize
                }
                Ok(tk) => {
                    let pos = self
                        .hash
                        .get_index_of(&tk)
                        .ok_or(TableError::InvalidNextKey)?;
                    return Ok(self.next_in_hash(pos + 1));
                }
                Err(_) => return Err(TableError::InvalidNextKey),
            },
        };
        for j in start_array..self.array.len() {
            if !self.array[j].is_nil() {
                return Ok(Some((
                    TValue::from_integer((j + 1) as i64),
                    self.array[j].clone(),
                )));
            }
        }
        Ok(self.next_in_hash(0))
    }

    fn next_in_hash(&self, from: usize) -> Option<(TValue, TValue)> {
        (from..self.hash.len()).find_map(|i| {
            let (k, v) = self.hash.get_index(i)?;
            (!v.is_nil()).then(|| (k.to_value(), v.clone()))
        })
    }

    /// Remove tombstones from the hash part.
    pub fn compact_hash(&mut self) {
        self.hash.retain(|_, v| !v.is_nil());
        self.tombstones = 0;
    }

    /// Move consecutive integer entries from hash into array.
    fn migrate_from_hash(&mut self) {
        loop {
            let next_idx = self.array.len() as i64 + 1;
            match self.hash.shift_remove(&TableKey::Integer(next_idx)) {
                Some(v) if !v.is_nil() => self.array.push(v),
                Some(_) => {
                    self.tombstones -= 1;
                    break;
                }
                None => break,
            }
        }
    }

    /// Number of live entries (array slots holding non-nil values plus live hash entries).
    pub fn live_len(&self) -> usize {
        self.array.iter().filter(|v| !v.is_nil()).count() + self.hash.len() - self.tombstones
    }
}

impl std::fmt::Debug for Table {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "table(array={}, hash={})",
            self.array.len(),
            self.hash.len() - self.tombstones
        )
    }
}
