//! Modification expressions. This is how a change to an entry is expressed
//! and carried: an ordered list of (operation, type, values) triples that
//! [`crate::entry::Entry::apply_mods`] replays in sequence.

use std::slice;

use serde::{Deserialize, Serialize};

use crate::value::Value;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModOp {
    Add,
    Delete,
    Replace,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Mod {
    pub op: ModOp,
    pub ty: String,
    /// Empty for a whole-attribute delete or an emptying replace.
    pub values: Vec<Value>,
}

pub fn m_add(ty: &str, values: Vec<Value>) -> Mod {
    Mod {
        op: ModOp::Add,
        ty: ty.to_string(),
        values,
    }
}

pub fn m_delete(ty: &str, values: Vec<Value>) -> Mod {
    Mod {
        op: ModOp::Delete,
        ty: ty.to_string(),
        values,
    }
}

/// Delete the whole attribute, whatever its values.
pub fn m_delete_all(ty: &str) -> Mod {
    Mod {
        op: ModOp::Delete,
        ty: ty.to_string(),
        values: Vec::new(),
    }
}

pub fn m_replace(ty: &str, values: Vec<Value>) -> Mod {
    Mod {
        op: ModOp::Replace,
        ty: ty.to_string(),
        values,
    }
}

/// The order of this list matters. Each change must be done in order.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ModifyList {
    mods: Vec<Mod>,
}

impl ModifyList {
    pub fn new() -> Self {
        ModifyList {
            mods: Vec::with_capacity(0),
        }
    }

    pub fn new_list(mods: Vec<Mod>) -> Self {
        ModifyList { mods }
    }

    pub fn push_mod(&mut self, m: Mod) {
        self.mods.push(m)
    }

    pub fn iter(&self) -> slice::Iter<'_, Mod> {
        self.mods.iter()
    }

    pub fn len(&self) -> usize {
        self.mods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mods.is_empty()
    }
}

impl<'a> IntoIterator for &'a ModifyList {
    type IntoIter = slice::Iter<'a, Mod>;
    type Item = &'a Mod;

    fn into_iter(self) -> Self::IntoIter {
        self.mods.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_modlist_build() {
        let mut ml = ModifyList::new();
        assert!(ml.is_empty());
        ml.push_mod(m_add("mail", vec![Value::from("a@x")]));
        ml.push_mod(m_delete_all("description"));
        assert_eq!(ml.len(), 2);
        let ops: Vec<_> = ml.iter().map(|m| m.op).collect();
        assert_eq!(ops, vec![ModOp::Add, ModOp::Delete]);
    }
}
