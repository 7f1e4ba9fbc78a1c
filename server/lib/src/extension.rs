//! The extension side channel for attribute types that must never live in
//! the ordinary attribute list - today, the pseudo attribute carrying an
//! unhashed credential between plugins. Each routed type resolves to a
//! capability record (get / set / copy / size) that operates on an
//! entry-private slot store instead of the attribute lists, so the value can
//! neither be serialized nor read back through the normal accessor surface.

use hashbrown::HashMap;

use crate::constants::PSEUDO_ATTR_UNHASHEDPASSWORD;
use crate::error::OperationError;
use crate::value::Value;

/// Per-entry storage for extension routed values. Owned by the entry,
/// opaque to everything but the handlers below.
#[derive(Debug, Clone, Default)]
pub struct ExtStore {
    slots: HashMap<String, Vec<Value>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtSetMode {
    Add,
    Replace,
}

/// Capability record for one extension routed attribute type.
pub trait ExtAttrHandler: Send + Sync {
    fn get(&self, store: &ExtStore) -> Option<Vec<Value>>;

    /// `None` values with `Replace` clear the slot.
    fn set(
        &self,
        store: &mut ExtStore,
        vals: Option<Vec<Value>>,
        mode: ExtSetMode,
    ) -> Result<(), OperationError>;

    fn copy(&self, from: &ExtStore, to: &mut ExtStore);

    fn size(&self, store: &ExtStore) -> usize;
}

/// The standard handler: a named slot in the entry's store.
struct SlotHandler {
    key: &'static str,
}

impl ExtAttrHandler for SlotHandler {
    fn get(&self, store: &ExtStore) -> Option<Vec<Value>> {
        store.slots.get(self.key).cloned()
    }

    fn set(
        &self,
        store: &mut ExtStore,
        vals: Option<Vec<Value>>,
        mode: ExtSetMode,
    ) -> Result<(), OperationError> {
        match (mode, vals) {
            (ExtSetMode::Add, Some(vals)) => {
                store
                    .slots
                    .entry(self.key.to_string())
                    .or_default()
                    .extend(vals);
            }
            (ExtSetMode::Add, None) => return Err(OperationError::Operations),
            (ExtSetMode::Replace, Some(vals)) => {
                store.slots.insert(self.key.to_string(), vals);
            }
            (ExtSetMode::Replace, None) => {
                store.slots.remove(self.key);
            }
        }
        Ok(())
    }

    fn copy(&self, from: &ExtStore, to: &mut ExtStore) {
        if let Some(vals) = from.slots.get(self.key) {
            to.slots.insert(self.key.to_string(), vals.clone());
        }
    }

    fn size(&self, store: &ExtStore) -> usize {
        store
            .slots
            .get(self.key)
            .map(|vals| vals.iter().map(|v| v.len()).sum())
            .unwrap_or(0)
    }
}

lazy_static! {
    static ref EXT_HANDLERS: HashMap<&'static str, Box<dyn ExtAttrHandler>> = {
        let mut m: HashMap<&'static str, Box<dyn ExtAttrHandler>> = HashMap::new();
        m.insert(
            PSEUDO_ATTR_UNHASHEDPASSWORD,
            Box::new(SlotHandler {
                key: PSEUDO_ATTR_UNHASHEDPASSWORD,
            }),
        );
        m
    };
}

/// Resolve the handler for an attribute type, if that type is routed to
/// the extension store.
pub fn extension_handler(ty: &str) -> Option<&'static dyn ExtAttrHandler> {
    EXT_HANDLERS
        .get(ty.to_ascii_lowercase().as_str())
        .map(|b| b.as_ref())
}

/// Copy every registered extension slot from one store to another. Used by
/// entry duplication.
pub fn copy_all(from: &ExtStore, to: &mut ExtStore) {
    for handler in EXT_HANDLERS.values() {
        handler.copy(from, to);
    }
}

/// Cumulative size of every registered extension slot.
pub fn size_all(store: &ExtStore) -> usize {
    EXT_HANDLERS.values().map(|h| h.size(store)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_slot_handler_modes() {
        let handler = extension_handler(PSEUDO_ATTR_UNHASHEDPASSWORD)
            .expect("default handler must be registered");
        let mut store = ExtStore::default();
        assert!(handler.get(&store).is_none());

        handler
            .set(&mut store, Some(vec![Value::from("secret")]), ExtSetMode::Add)
            .expect("add must succeed");
        handler
            .set(
                &mut store,
                Some(vec![Value::from("other")]),
                ExtSetMode::Add,
            )
            .expect("add must succeed");
        assert_eq!(handler.get(&store).map(|v| v.len()), Some(2));

        handler
            .set(
                &mut store,
                Some(vec![Value::from("only")]),
                ExtSetMode::Replace,
            )
            .expect("replace must succeed");
        assert_eq!(handler.get(&store).map(|v| v.len()), Some(1));

        handler
            .set(&mut store, None, ExtSetMode::Replace)
            .expect("clear must succeed");
        assert!(handler.get(&store).is_none());
    }

    #[test]
    fn test_copy_and_size() {
        let handler = extension_handler(PSEUDO_ATTR_UNHASHEDPASSWORD)
            .expect("default handler must be registered");
        let mut a = ExtStore::default();
        handler
            .set(&mut a, Some(vec![Value::from("secret")]), ExtSetMode::Add)
            .expect("add must succeed");
        let mut b = ExtStore::default();
        copy_all(&a, &mut b);
        assert_eq!(handler.get(&b).map(|v| v.len()), Some(1));
        assert_eq!(size_all(&b), "secret".len());

        assert!(extension_handler("cn").is_none());
    }
}
