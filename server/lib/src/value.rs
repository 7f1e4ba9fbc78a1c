//! A single attribute value: a byte string plus the replication metadata
//! that has accumulated on it. Equality between values is never raw byte
//! equality - it is delegated to the owning attribute's syntax, so `CN: Bob`
//! and `cn: bob` deduplicate while two distinct jpeg blobs never will.

use serde::{Deserialize, Serialize};

use crate::repl::csn::{Csn, CsnSet, CsnType};

lazy_static! {
    /// Attribute types whose values are themselves DNs.
    static ref DN_SYNTAX_ATTRS: hashbrown::HashSet<&'static str> = {
        let mut s = hashbrown::HashSet::new();
        s.insert("aliasedobjectname");
        s.insert("distinguishedname");
        s.insert("manager");
        s.insert("member");
        s.insert("memberof");
        s.insert("owner");
        s.insert("roleoccupant");
        s.insert("secretary");
        s.insert("seealso");
        s.insert("uniquemember");
        s
    };

    /// Attribute types compared byte for byte.
    static ref CASE_EXACT_ATTRS: hashbrown::HashSet<&'static str> = {
        let mut s = hashbrown::HashSet::new();
        s.insert("userpassword");
        s.insert("unhashed#user#password");
        s
    };
}

/// How values of an attribute compare for duplicate detection and delete
/// matching. The default for unknown types is case insensitive ascii.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSyntax {
    CaseIgnore,
    CaseExact,
    DistinguishedName,
}

impl ValueSyntax {
    pub fn for_attr_type(ty: &str) -> ValueSyntax {
        let lower = ty.to_ascii_lowercase();
        if DN_SYNTAX_ATTRS.contains(lower.as_str()) {
            ValueSyntax::DistinguishedName
        } else if CASE_EXACT_ATTRS.contains(lower.as_str()) {
            ValueSyntax::CaseExact
        } else {
            ValueSyntax::CaseIgnore
        }
    }

    pub fn is_dn(self) -> bool {
        self == ValueSyntax::DistinguishedName
    }

    /// The key a value indexes under when duplicate checking moves to a
    /// tree. Two values are duplicates exactly when their keys are equal.
    pub fn norm_key(self, raw: &[u8]) -> Vec<u8> {
        match self {
            ValueSyntax::CaseExact => raw.to_vec(),
            // DN values also compare case insensitively once normalized.
            ValueSyntax::CaseIgnore | ValueSyntax::DistinguishedName => {
                raw.to_ascii_lowercase()
            }
        }
    }

    pub fn value_eq(self, a: &[u8], b: &[u8]) -> bool {
        match self {
            ValueSyntax::CaseExact => a == b,
            ValueSyntax::CaseIgnore | ValueSyntax::DistinguishedName => {
                a.eq_ignore_ascii_case(b)
            }
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Value {
    raw: Vec<u8>,
    csnset: Option<CsnSet>,
}

impl Value {
    pub fn new(raw: impl Into<Vec<u8>>) -> Self {
        Value {
            raw: raw.into(),
            csnset: None,
        }
    }

    pub fn new_with_csnset(raw: impl Into<Vec<u8>>, csnset: Option<CsnSet>) -> Self {
        Value {
            raw: raw.into(),
            csnset,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.raw
    }

    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.raw).ok()
    }

    pub fn len(&self) -> usize {
        self.raw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.raw.is_empty()
    }

    pub fn csnset(&self) -> Option<&CsnSet> {
        self.csnset.as_ref()
    }

    pub fn set_csnset(&mut self, csnset: Option<CsnSet>) {
        self.csnset = csnset;
    }

    pub fn add_csn(&mut self, t: CsnType, csn: Csn) {
        self.csnset.get_or_insert_with(CsnSet::new).add(t, csn);
    }

    pub fn get_csn_of_type(&self, t: CsnType) -> Option<&Csn> {
        self.csnset.as_ref().and_then(|s| s.get_csn_of_type(t))
    }

    /// Heap footprint estimate, used by entry sizing.
    pub(crate) fn size(&self) -> usize {
        std::mem::size_of::<Value>()
            + self.raw.len()
            + self
                .csnset
                .as_ref()
                .map(|s| s.len() * (std::mem::size_of::<Csn>() + std::mem::size_of::<CsnType>()))
                .unwrap_or(0)
    }

    pub fn as_i64(&self) -> Option<i64> {
        self.as_str().and_then(|s| s.trim().parse().ok())
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_str().and_then(|s| s.trim().parse().ok())
    }

    pub fn as_i32(&self) -> Option<i32> {
        self.as_str().and_then(|s| s.trim().parse().ok())
    }

    pub fn as_u32(&self) -> Option<u32> {
        self.as_str().and_then(|s| s.trim().parse().ok())
    }

    /// Boolean forms accepted in configuration entries. Unrecognized text
    /// falls back to numeric nonzero, then None.
    pub fn as_bool(&self) -> Option<bool> {
        let s = self.as_str()?.trim();
        if s.is_empty() {
            return Some(false);
        }
        match s.to_ascii_lowercase().as_str() {
            "on" | "true" | "yes" | "1" => Some(true),
            "off" | "false" | "no" | "0" => Some(false),
            _ => s.parse::<u64>().ok().map(|n| n != 0),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::new(s.as_bytes().to_vec())
    }
}
