//! Change sequence numbers - the ordering primitive of multi-master
//! replication. Every write anywhere in the topology is stamped with a Csn,
//! and divergent copies of an entry are reconciled by comparing them.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::constants::CSN_STRSIZE;
use crate::error::OperationError;

#[derive(Serialize, Deserialize, Debug, PartialEq, Clone, Copy, Eq, PartialOrd, Ord, Hash)]
pub struct Csn {
    // Field order matters: the derived Ord compares ts first.
    pub ts: u32,
    pub seq: u16,
    pub rid: u16,
    pub subseq: u16,
}

impl fmt::Display for Csn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:08x}{:04x}{:04x}{:04x}",
            self.ts, self.seq, self.rid, self.subseq
        )
    }
}

impl Csn {
    pub fn new(ts: u32, seq: u16, rid: u16, subseq: u16) -> Self {
        Csn {
            ts,
            seq,
            rid,
            subseq,
        }
    }

    /// Parse the fixed width form. Anything that is not exactly
    /// [`CSN_STRSIZE`] hex chars is rejected.
    pub fn parse_str(s: &str) -> Result<Self, OperationError> {
        if s.len() != CSN_STRSIZE || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(OperationError::InvalidCsn);
        }
        let ts = u32::from_str_radix(&s[0..8], 16).map_err(|_| OperationError::InvalidCsn)?;
        let seq = u16::from_str_radix(&s[8..12], 16).map_err(|_| OperationError::InvalidCsn)?;
        let rid = u16::from_str_radix(&s[12..16], 16).map_err(|_| OperationError::InvalidCsn)?;
        let subseq = u16::from_str_radix(&s[16..20], 16).map_err(|_| OperationError::InvalidCsn)?;
        Ok(Csn {
            ts,
            seq,
            rid,
            subseq,
        })
    }
}

/// What a Csn attached to a value or attribute records.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy, Hash)]
pub enum CsnType {
    Unknown,
    None,
    AttributeDeleted,
    ValueUpdated,
    ValueDeleted,
    ValueDistinguished,
}

impl CsnType {
    /// The wire tag rendered between `;` and `-` in an attribute option.
    pub fn tag(self) -> &'static str {
        match self {
            CsnType::Unknown => "x1csn",
            CsnType::None => "x2csn",
            CsnType::AttributeDeleted => "adcsn",
            CsnType::ValueUpdated => "vucsn",
            CsnType::ValueDeleted => "vdcsn",
            CsnType::ValueDistinguished => "mdcsn",
        }
    }

    /// Classify the two discriminator chars of a `??csn-` option.
    pub fn from_tag_chars(a: u8, b: u8) -> Option<Self> {
        match (a, b) {
            (b'x', b'1') => Some(CsnType::Unknown),
            (b'x', b'2') => Some(CsnType::None),
            (b'a', b'd') => Some(CsnType::AttributeDeleted),
            (b'v', b'u') => Some(CsnType::ValueUpdated),
            (b'v', b'd') => Some(CsnType::ValueDeleted),
            (b'm', b'd') => Some(CsnType::ValueDistinguished),
            _ => None,
        }
    }
}

/// Rendered size of one `;??csn-<csn>` option.
pub const CSN_OPTION_STRSIZE: usize = 1 + 5 + 1 + CSN_STRSIZE;

/// Render one csn as an attribute type option, e.g. `;vucsn-...`.
pub fn csn_as_attr_option(t: CsnType, csn: &Csn, out: &mut String) {
    out.push(';');
    out.push_str(t.tag());
    out.push('-');
    out.push_str(&csn.to_string());
}

/// An ordered multiset of typed csns carried by a single value.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Default)]
pub struct CsnSet {
    inner: Vec<(CsnType, Csn)>,
}

impl CsnSet {
    pub fn new() -> Self {
        CsnSet { inner: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Append in arrival order.
    pub fn add(&mut self, t: CsnType, csn: Csn) {
        self.inner.push((t, csn));
    }

    /// Insert keeping the set ordered by csn. Exact duplicates are elided.
    pub fn insert_increasing(&mut self, t: CsnType, csn: Csn) {
        if self.inner.iter().any(|(it, ic)| *it == t && *ic == csn) {
            return;
        }
        let pos = self
            .inner
            .iter()
            .position(|(_, ic)| *ic > csn)
            .unwrap_or(self.inner.len());
        self.inner.insert(pos, (t, csn));
    }

    pub fn get_csn_of_type(&self, t: CsnType) -> Option<&Csn> {
        self.inner.iter().find(|(it, _)| *it == t).map(|(_, c)| c)
    }

    pub fn max_csn(&self) -> Option<&Csn> {
        self.inner.iter().map(|(_, c)| c).max()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(CsnType, Csn)> {
        self.inner.iter()
    }

    /// Exact size of [`Self::render`]'s output, for the encoder's sizing pass.
    pub fn rendered_size(&self) -> usize {
        self.inner.len() * CSN_OPTION_STRSIZE
    }

    /// Render every element as a `;??csn-` option in set order.
    pub fn render(&self, out: &mut String) {
        for (t, csn) in &self.inner {
            csn_as_attr_option(*t, csn, out);
        }
    }
}

/// Fold a newly observed csn into a running maximum.
pub fn track_max_csn(maxcsn: &mut Option<Csn>, csn: &Csn) {
    match maxcsn {
        Some(cur) if *cur >= *csn => {}
        _ => *maxcsn = Some(*csn),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cmp::Ordering;

    #[test]
    fn test_csn_ordering() {
        // Check diff ts
        let csn_a = Csn::new(5, 0, 1, 0);
        let csn_b = Csn::new(15, 0, 1, 0);

        assert!(csn_a.cmp(&csn_a) == Ordering::Equal);
        assert!(csn_a.cmp(&csn_b) == Ordering::Less);
        assert!(csn_b.cmp(&csn_a) == Ordering::Greater);

        // Same ts, seq breaks the tie before rid.
        let csn_c = Csn::new(5, 1, 0, 0);
        let csn_d = Csn::new(5, 0, 2, 0);
        assert!(csn_c.cmp(&csn_d) == Ordering::Greater);

        // Same ts and seq, diff rid.
        let csn_e = Csn::new(5, 0, 0, 0);
        let csn_f = Csn::new(5, 0, 1, 0);
        assert!(csn_e.cmp(&csn_f) == Ordering::Less);
    }

    #[test]
    fn test_csn_parse_display() {
        let csn = Csn::new(0x5f1e2d3c, 0x0001, 0x00a5, 0x0000);
        let s = csn.to_string();
        assert_eq!(s.len(), CSN_STRSIZE);
        assert_eq!(s, "5f1e2d3c000100a50000");
        assert_eq!(Csn::parse_str(&s), Ok(csn));

        assert_eq!(Csn::parse_str("short"), Err(OperationError::InvalidCsn));
        assert_eq!(
            Csn::parse_str("zzzzzzzzzzzzzzzzzzzz"),
            Err(OperationError::InvalidCsn)
        );
    }

    #[test]
    fn test_csnset_max_and_lookup() {
        let mut set = CsnSet::new();
        set.add(CsnType::ValueUpdated, Csn::new(10, 0, 1, 0));
        set.add(CsnType::ValueDeleted, Csn::new(20, 0, 1, 0));
        set.add(CsnType::ValueUpdated, Csn::new(15, 0, 2, 0));

        assert_eq!(set.max_csn(), Some(&Csn::new(20, 0, 1, 0)));
        // First of the requested type in set order.
        assert_eq!(
            set.get_csn_of_type(CsnType::ValueUpdated),
            Some(&Csn::new(10, 0, 1, 0))
        );
        assert_eq!(set.get_csn_of_type(CsnType::AttributeDeleted), None);
    }

    #[test]
    fn test_csnset_insert_increasing() {
        let mut set = CsnSet::new();
        set.insert_increasing(CsnType::ValueDistinguished, Csn::new(20, 0, 1, 0));
        set.insert_increasing(CsnType::ValueDistinguished, Csn::new(10, 0, 1, 0));
        set.insert_increasing(CsnType::ValueDistinguished, Csn::new(10, 0, 1, 0));

        let csns: Vec<_> = set.iter().map(|(_, c)| c.ts).collect();
        assert_eq!(csns, vec![10, 20]);
    }

    #[test]
    fn test_csnset_render() {
        let mut set = CsnSet::new();
        set.add(CsnType::ValueUpdated, Csn::new(0x11, 0, 1, 0));
        let mut out = String::new();
        set.render(&mut out);
        assert_eq!(out, ";vucsn-00000011000000010000");
        assert_eq!(out.len(), set.rendered_size());
    }
}
