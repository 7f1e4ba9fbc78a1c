//! Attributes and the ordered attribute list an entry owns.
//!
//! The list preserves decode order and is searched case insensitively by
//! type name. Each attribute keeps two value sets: the live values, and the
//! values deleted-but-retained for replication, plus the csn of a whole
//! attribute deletion when one has happened.

use bitflags::bitflags;

use crate::error::OperationError;
use crate::repl::csn::Csn;
use crate::value::{Value, ValueSyntax};
use crate::valueset::ValueSet;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct AttrFlags: u32 {
        /// Maintained by the server, not settable by clients, and elided
        /// from output when the caller asks for user attributes only.
        const OPERATIONAL = 0b0000_0001;
    }
}

lazy_static! {
    static ref OPERATIONAL_ATTRS: hashbrown::HashSet<&'static str> = {
        let mut s = hashbrown::HashSet::new();
        s.insert("creatorsname");
        s.insert("modifiersname");
        s.insert("createtimestamp");
        s.insert("modifytimestamp");
        s.insert("entrydn");
        s.insert("entryid");
        s.insert("parentid");
        s.insert("numsubordinates");
        s
    };
}

#[derive(Debug, Clone)]
pub struct Attr {
    name: String,
    syntax: ValueSyntax,
    flags: AttrFlags,
    present: ValueSet,
    deleted: ValueSet,
    deletion_csn: Option<Csn>,
}

impl Attr {
    pub fn new(name: &str) -> Self {
        let syntax = ValueSyntax::for_attr_type(name);
        let flags = if OPERATIONAL_ATTRS.contains(name.to_ascii_lowercase().as_str()) {
            AttrFlags::OPERATIONAL
        } else {
            AttrFlags::empty()
        };
        Attr {
            name: name.to_string(),
            syntax,
            flags,
            present: ValueSet::new(),
            deleted: ValueSet::new(),
            deletion_csn: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn syntax(&self) -> ValueSyntax {
        self.syntax
    }

    pub fn is_operational(&self) -> bool {
        self.flags.contains(AttrFlags::OPERATIONAL)
    }

    pub fn present(&self) -> &ValueSet {
        &self.present
    }

    pub fn present_mut(&mut self) -> &mut ValueSet {
        &mut self.present
    }

    pub fn deleted(&self) -> &ValueSet {
        &self.deleted
    }

    pub fn deleted_mut(&mut self) -> &mut ValueSet {
        &mut self.deleted
    }

    pub fn deletion_csn(&self) -> Option<&Csn> {
        self.deletion_csn.as_ref()
    }

    /// Record a whole-attribute deletion. A later csn always wins; an
    /// earlier one is absorbed.
    pub fn set_deletion_csn(&mut self, csn: Csn) {
        match &self.deletion_csn {
            Some(cur) if *cur >= csn => {}
            _ => self.deletion_csn = Some(csn),
        }
    }

    pub fn first_value(&self) -> Option<&Value> {
        self.present.first()
    }

    pub fn hasvalue(&self, raw: &[u8]) -> bool {
        self.present.contains(raw, self.syntax)
    }

    /// Add values with duplicate checking. On the first duplicate the set
    /// is left as built so far and the error is surfaced.
    pub fn add_values(&mut self, vals: Vec<Value>) -> Result<(), OperationError> {
        for v in vals {
            if !self.present.insert_checked(v, self.syntax) {
                return Err(OperationError::DuplicateValue);
            }
        }
        Ok(())
    }

    /// Add values without checking, for callers that have already dedup'd.
    pub fn merge_values(&mut self, vals: Vec<Value>) {
        self.present.append_all(vals, self.syntax);
    }

    pub(crate) fn size(&self) -> usize {
        std::mem::size_of::<Attr>()
            + self.name.len()
            + self.present.size()
            + self.deleted.size()
    }
}

/// The order preserving attribute collection of an entry.
#[derive(Debug, Clone, Default)]
pub struct AttrList {
    attrs: Vec<Attr>,
}

impl AttrList {
    pub fn new() -> Self {
        AttrList::default()
    }

    pub fn len(&self) -> usize {
        self.attrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attrs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Attr> {
        self.attrs.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Attr> {
        self.attrs.iter_mut()
    }

    pub fn find(&self, name: &str) -> Option<&Attr> {
        self.attrs
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Attr> {
        self.attrs
            .iter_mut()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }

    pub fn find_or_create(&mut self, name: &str) -> &mut Attr {
        let pos = match self
            .attrs
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(name))
        {
            Some(pos) => pos,
            None => {
                self.attrs.push(Attr::new(name));
                self.attrs.len() - 1
            }
        };
        &mut self.attrs[pos]
    }

    /// Append a new attribute only if the type is not already present.
    /// `None` signals the caller's contiguity assumption was violated.
    pub fn append_missing(&mut self, name: &str) -> Option<&mut Attr> {
        if self.find(name).is_some() {
            return None;
        }
        self.attrs.push(Attr::new(name));
        self.attrs.last_mut()
    }

    pub(crate) fn at_mut(&mut self, idx: usize) -> &mut Attr {
        &mut self.attrs[idx]
    }

    pub fn delete(&mut self, name: &str) -> Result<(), OperationError> {
        let pos = self
            .attrs
            .iter()
            .position(|a| a.name.eq_ignore_ascii_case(name))
            .ok_or(OperationError::NoSuchAttribute)?;
        self.attrs.remove(pos);
        Ok(())
    }

    pub(crate) fn size(&self) -> usize {
        self.attrs.iter().map(|a| a.size()).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attr_flags_and_syntax() {
        assert!(Attr::new("modifyTimestamp").is_operational());
        assert!(!Attr::new("cn").is_operational());
        assert_eq!(Attr::new("member").syntax(), ValueSyntax::DistinguishedName);
    }

    #[test]
    fn test_attr_add_values_dup() {
        let mut a = Attr::new("mail");
        a.add_values(vec![Value::from("a@x"), Value::from("b@x")])
            .expect("clean add must succeed");
        assert_eq!(
            a.add_values(vec![Value::from("A@X")]),
            Err(OperationError::DuplicateValue)
        );
        assert!(a.hasvalue(b"b@x"));
    }

    #[test]
    fn test_attr_deletion_csn_monotonic() {
        let mut a = Attr::new("mail");
        a.set_deletion_csn(Csn::new(20, 0, 1, 0));
        a.set_deletion_csn(Csn::new(10, 0, 1, 0));
        assert_eq!(a.deletion_csn(), Some(&Csn::new(20, 0, 1, 0)));
    }

    #[test]
    fn test_attrlist_case_insensitive() {
        let mut al = AttrList::new();
        al.find_or_create("objectClass");
        assert!(al.find("OBJECTCLASS").is_some());
        assert!(al.append_missing("objectclass").is_none());
        al.delete("ObjectClass").expect("delete must succeed");
        assert_eq!(al.delete("objectclass"), Err(OperationError::NoSuchAttribute));
    }
}
