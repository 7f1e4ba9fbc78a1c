//! An ordered collection of values belonging to one attribute.
//!
//! Duplicate checking started life as a straight comparison of each new
//! value against everything already present. With many values that is
//! quadratic, so past a small threshold the set switches to a btree of
//! normalized keys, bulk loaded on first use. Below the threshold the
//! linear scan is measurably faster, which is why the tree is not built
//! eagerly.

use std::collections::BTreeSet;

use crate::constants::VALUE_DUPCHECK_THRESHOLD;
use crate::value::{Value, ValueSyntax};

#[derive(Debug, Clone, Default)]
pub struct ValueSet {
    values: Vec<Value>,
    keys: Option<BTreeSet<Vec<u8>>>,
}

impl ValueSet {
    pub fn new() -> Self {
        ValueSet::default()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Value> {
        self.values.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Value> {
        self.values.iter_mut()
    }

    pub fn first(&self) -> Option<&Value> {
        self.values.first()
    }

    fn build_keys(&mut self, syntax: ValueSyntax) {
        let keys = self
            .values
            .iter()
            .map(|v| syntax.norm_key(v.as_bytes()))
            .collect();
        self.keys = Some(keys);
    }

    pub fn contains(&self, raw: &[u8], syntax: ValueSyntax) -> bool {
        match &self.keys {
            Some(keys) => keys.contains(&syntax.norm_key(raw)),
            None => self
                .values
                .iter()
                .any(|v| syntax.value_eq(v.as_bytes(), raw)),
        }
    }

    pub fn position(&self, raw: &[u8], syntax: ValueSyntax) -> Option<usize> {
        self.values
            .iter()
            .position(|v| syntax.value_eq(v.as_bytes(), raw))
    }

    /// Append without any duplicate consideration. The key index, if it has
    /// been built, is kept coherent so later checked inserts stay correct.
    pub fn append(&mut self, v: Value, syntax: ValueSyntax) {
        if let Some(keys) = &mut self.keys {
            keys.insert(syntax.norm_key(v.as_bytes()));
        }
        self.values.push(v);
    }

    /// Returns whether the value was newly inserted. That is:
    /// * If the set did not previously contain an equal value, true is
    ///   returned and the value is consumed into the set.
    /// * If an equal value was already present, false is returned and the
    ///   set is not updated.
    pub fn insert_checked(&mut self, v: Value, syntax: ValueSyntax) -> bool {
        if self.keys.is_none() && self.values.len() >= VALUE_DUPCHECK_THRESHOLD {
            self.build_keys(syntax);
        }
        match &mut self.keys {
            Some(keys) => {
                if keys.insert(syntax.norm_key(v.as_bytes())) {
                    self.values.push(v);
                    true
                } else {
                    false
                }
            }
            None => {
                if self
                    .values
                    .iter()
                    .any(|val| syntax.value_eq(val.as_bytes(), v.as_bytes()))
                {
                    false
                } else {
                    self.values.push(v);
                    true
                }
            }
        }
    }

    /// Remove the value equal to `raw`, returning it if it was present.
    pub fn remove(&mut self, raw: &[u8], syntax: ValueSyntax) -> Option<Value> {
        let pos = self.position(raw, syntax)?;
        let v = self.values.remove(pos);
        if let Some(keys) = &mut self.keys {
            keys.remove(&syntax.norm_key(v.as_bytes()));
        }
        Some(v)
    }

    /// Move every value out, leaving the set empty. This is how decode
    /// scratch sets hand their contents to the entry without copying.
    pub fn take_values(&mut self) -> Vec<Value> {
        self.keys = None;
        std::mem::take(&mut self.values)
    }

    pub fn append_all(&mut self, vals: Vec<Value>, syntax: ValueSyntax) {
        for v in vals {
            self.append(v, syntax);
        }
    }

    pub(crate) fn size(&self) -> usize {
        std::mem::size_of::<ValueSet>() + self.values.iter().map(|v| v.size()).sum::<usize>()
    }
}
