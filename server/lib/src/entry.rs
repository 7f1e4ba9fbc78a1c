//! Entries are the base unit of storage in the server: a distinguished
//! name plus a list of attributes, each holding one or more values. What
//! makes this entry type different from a plain record is that replication
//! state is threaded through the whole structure - values and attributes
//! carry change sequence numbers, deletions leave values behind in deleted
//! sets rather than destroying them, and a whole entry can persist as a
//! tombstone - so that independent masters can reconcile divergent copies
//! of the same record later.
//!
//! In text form an entry looks like either of these:
//!
//! ```text
//! dn: uid=bob,dc=example,dc=com
//! objectclass: person
//! mail;vucsn-5f1e2d3c000100a50000: bob@example.com
//! mail;deleted;vdcsn-5f1e2d3c000200a50000: old@example.com
//!
//! rdn: uid=bob
//! objectclass: person
//! ```
//!
//! A double colon after a type means the value is base64 encoded. The
//! `;option` suffixes on a type carry the replication state; stripping them
//! yields the base attribute type. Decoding comes in two flavours: a fast
//! path that trusts the input to be well formed (contiguous types, no
//! duplicate values) and builds attributes by direct append, and a
//! defensive path that tolerates interleaved types and duplicates at the
//! cost of per-line lookups. Encoding is the exact inverse and sizes the
//! output buffer in a first pass before filling it in a second.

use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::{Arc, RwLock};

use bitflags::bitflags;
use uuid::Uuid;

use crate::attr::{Attr, AttrList};
use crate::constants::{
    ATTR_DN, ATTR_ENTRYDN, ATTR_OBJECTCLASS, ATTR_PARENTID, ATTR_RDN, ATTR_UNIQUEID,
    CSN_STRSIZE, ENTRY_MAX_ATTRIBUTE_VALUE_COUNT, PSEUDO_ATTR_UNHASHEDPASSWORD,
    RUV_STORAGE_ENTRY_UNIQUEID, VALUE_LDAPSUBENTRY, VALUE_TOMBSTONE,
};
use crate::dn::{dn_syntax_check, Dn, Rdn};
use crate::error::OperationError;
use crate::extension::{self, ExtSetMode, ExtStore};
use crate::ldif;
use crate::modify::{m_add, m_delete, m_delete_all, Mod, ModOp, ModifyList};
use crate::repl::csn::{csn_as_attr_option, track_max_csn, Csn, CsnSet, CsnType};
use crate::value::{Value, ValueSyntax};
use crate::valueset::ValueSet;

bitflags! {
    /// Decode behaviour selection. Any flag outside the fast-handled set
    /// (or an explicit NOT_WELL_FORMED) routes the input to the defensive
    /// decoder.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ParseFlags: u32 {
        /// Drop deleted values/attributes and all csns while decoding.
        const IGNORE_STATE = 0b0000_0000_0001;
        /// Detect and drop duplicate present values.
        const REMOVE_DUP_VALUES = 0b0000_0000_0010;
        /// Expect many attribute types; index them in a tree.
        const BIG_ENTRY = 0b0000_0000_0100;
        /// Request objectclass hierarchy expansion after decode. The
        /// expansion itself belongs to the schema layer.
        const EXPAND_OBJECTCLASSES = 0b0000_0000_1000;
        /// Re-check for the tombstone objectclass after decode.
        const TOMBSTONE_CHECK = 0b0000_0001_0000;
        /// Skip any entrydn line in the input.
        const NO_ENTRYDN = 0b0000_0010_0000;
        /// The supplied dn is already normalized.
        const DN_NORMALIZED = 0b0000_0100_0000;
        /// The input may hold duplicate values or interleaved types.
        const NOT_WELL_FORMED = 0b0000_1000_0000;
        /// Add any missing rdn values to the entry after decode.
        const ADD_RDN_VALUES = 0b0001_0000_0000;
        /// Reject malformed values of dn-syntax attributes.
        const STRICT_DN = 0b0010_0000_0000;
    }
}

impl ParseFlags {
    const FAST_HANDLED: ParseFlags = ParseFlags::IGNORE_STATE
        .union(ParseFlags::EXPAND_OBJECTCLASSES)
        .union(ParseFlags::TOMBSTONE_CHECK)
        .union(ParseFlags::NO_ENTRYDN)
        .union(ParseFlags::DN_NORMALIZED);

    fn requires_dupcheck(self) -> bool {
        self.contains(ParseFlags::NOT_WELL_FORMED) || !Self::FAST_HANDLED.contains(self)
    }
}

bitflags! {
    /// Encode behaviour selection.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DumpFlags: u32 {
        /// Include replication state: csn options, deleted values and
        /// deleted attributes.
        const STATEINFO = 0b0000_0001;
        /// Include the unique id.
        const UNIQUEID = 0b0000_0010;
        /// Omit operational attributes.
        const NO_OPATTRS = 0b0000_0100;
        /// Do not fold long lines.
        const NOWRAP = 0b0000_1000;
        /// Only armour values that would corrupt the line structure.
        const MINIMAL_ENCODING = 0b0001_0000;
        /// Lead with `rdn:` instead of `dn:`.
        const RDN_ENTRY = 0b0010_0000;
    }
}

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct EntryFlags: u32 {
        const LDAPSUBENTRY = 0b0000_0001;
        const TOMBSTONE = 0b0000_0010;
        /// Set by conflict resolution when this entry diverged from a
        /// replica's copy.
        const REPL_CONFLICT = 0b0000_0100;
    }
}

lazy_static! {
    /// Attribute types which are never serialized, whatever the flags.
    static ref PROTECTED_ATTRS: RwLock<Vec<String>> =
        RwLock::new(vec![PSEUDO_ATTR_UNHASHEDPASSWORD.to_string()]);
}

pub fn is_type_protected(ty: &str) -> bool {
    PROTECTED_ATTRS
        .read()
        .map(|g| g.iter().any(|p| p.eq_ignore_ascii_case(ty)))
        .unwrap_or(false)
}

/// Add or remove an attribute type from the protected list.
pub fn set_attr_protected(ty: &str, protect: bool) {
    if let Ok(mut guard) = PROTECTED_ATTRS.write() {
        let pos = guard.iter().position(|p| p.eq_ignore_ascii_case(ty));
        match (pos, protect) {
            (None, true) => guard.push(ty.to_string()),
            (Some(i), false) => {
                guard.remove(i);
            }
            _ => {}
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ValueState {
    Present,
    Deleted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AttrState {
    Present,
    Deleted,
}

/// The invalidation epoch shared by every entry whose virtual attribute
/// cache must stale together. Any configuration or schema change that could
/// alter virtual attribute computation bumps the counter; entries compare
/// their stored watermark against it lazily on the next cache access.
/// Injected at decode so tests can isolate their own epoch.
#[derive(Debug, Clone)]
pub struct VattrEpoch {
    counter: Arc<AtomicU32>,
}

impl Default for VattrEpoch {
    fn default() -> Self {
        Self::new()
    }
}

impl VattrEpoch {
    pub fn new() -> Self {
        // Zero means "never cached", so the epoch starts past it.
        VattrEpoch {
            counter: Arc::new(AtomicU32::new(1)),
        }
    }

    pub fn current(&self) -> u32 {
        self.counter.load(AtomicOrdering::Acquire)
    }

    pub fn invalidate_all(&self) {
        // Make sure the value is never 0.
        if self
            .counter
            .fetch_add(1, AtomicOrdering::Release)
            .wrapping_add(1)
            == 0
        {
            self.counter.fetch_add(1, AtomicOrdering::Release);
        }
    }
}

#[derive(Debug, Default)]
struct VattrCache {
    watermark: u32,
    attrs: Vec<Vattr>,
}

/// One cached virtual attribute. `attr: None` records the first class
/// outcome "resolved, and absent on this entry".
#[derive(Debug, Clone)]
struct Vattr {
    name: String,
    attr: Option<Attr>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum VattrLookup {
    NotResolved,
    ResolvedAbsent,
    ResolvedPresent { ty: String, values: Vec<Value> },
}

/// The state information decoded out of one attribute type token.
struct TypeStateInfo {
    base_len: usize,
    csnset: Option<CsnSet>,
    adcsn: Option<Csn>,
    value_state: ValueState,
    attr_state: AttrState,
}

/// Strip the csn and deletion options from an attribute type token.
///
/// The recognized options are `;??csn-<csn>` (with `??` one of x1, x2, ad,
/// vu, vd, md), `;deletedattribute` and `;deleted`. The base type ends at
/// the first recognized option; anything else after a `;` (subtypes such as
/// `;lang-en`, or an option with an unparsable csn body) stays part of the
/// base type byte for byte and will round trip unchanged.
fn state_info_from_type(ty: &str, maxcsn: &mut Option<Csn>) -> TypeStateInfo {
    let bytes = ty.as_bytes();
    let mut info = TypeStateInfo {
        base_len: ty.len(),
        csnset: None,
        adcsn: None,
        value_state: ValueState::Present,
        attr_state: AttrState::Present,
    };
    let mut first_recognized: Option<usize> = None;
    let mut search_from = 0usize;
    while let Some(rel) = bytes[search_from..].iter().position(|b| *b == b';') {
        let p = search_from + rel;
        search_from = p + 1;
        let rest = &bytes[p..];
        let mut recognized = false;
        if rest.len() > 6 && rest[3..7] == *b"csn-" {
            let t = CsnType::from_tag_chars(rest[1], rest[2]).unwrap_or(CsnType::Unknown);
            let body = ty.get(p + 7..p + 7 + CSN_STRSIZE);
            match body.map(Csn::parse_str) {
                Some(Ok(csn)) => {
                    if t == CsnType::AttributeDeleted {
                        info.adcsn = Some(csn);
                    } else {
                        info.csnset.get_or_insert_with(CsnSet::new).add(t, csn);
                    }
                    track_max_csn(maxcsn, &csn);
                    recognized = true;
                }
                _ => {
                    warn!("malformed csn option left in attribute type {ty}");
                }
            }
        } else if rest.len() > 1 && rest[1..].starts_with(b"deletedattribute") {
            info.attr_state = AttrState::Deleted;
            recognized = true;
        } else if rest.len() > 1 && rest[1..].starts_with(b"deleted") {
            info.value_state = ValueState::Deleted;
            recognized = true;
        }
        if recognized && first_recognized.is_none() {
            first_recognized = Some(p);
        }
    }
    if let Some(p) = first_recognized {
        info.base_len = p;
    }
    info
}

/// Scratch state for one attribute type while the defensive decoder runs.
/// Value sets accumulate here and are moved, not copied, onto the entry
/// once the whole input has been consumed.
struct DecodeAttr {
    ty: String,
    state: AttrState,
    syntax: ValueSyntax,
    present: ValueSet,
    deleted: ValueSet,
    numdups: usize,
    adcsn: Option<Csn>,
}

impl DecodeAttr {
    fn new(ty: &str, state: AttrState) -> Self {
        DecodeAttr {
            ty: ty.to_string(),
            state,
            syntax: ValueSyntax::for_attr_type(ty),
            present: ValueSet::new(),
            deleted: ValueSet::new(),
            numdups: 0,
            adcsn: None,
        }
    }
}

/// Lookup strategy for attribute types already seen by the defensive
/// decoder. Linear scanning wins while the set of types is small; an entry
/// declared big up front moves to a tree, built lazily by bulk inserting
/// everything seen so far on the first non-adjacent lookup.
trait AttrIndex {
    fn find(&self, ty: &str, attrs: &[DecodeAttr]) -> Option<usize>;
    fn insert(&mut self, ty: &str, idx: usize);
}

struct LinearIndex;

impl AttrIndex for LinearIndex {
    fn find(&self, ty: &str, attrs: &[DecodeAttr]) -> Option<usize> {
        attrs.iter().position(|a| a.ty.eq_ignore_ascii_case(ty))
    }

    fn insert(&mut self, _ty: &str, _idx: usize) {}
}

#[derive(Default)]
struct TreeIndex {
    map: std::collections::BTreeMap<String, usize>,
}

impl AttrIndex for TreeIndex {
    fn find(&self, ty: &str, _attrs: &[DecodeAttr]) -> Option<usize> {
        self.map.get(&ty.to_ascii_lowercase()).copied()
    }

    fn insert(&mut self, ty: &str, idx: usize) {
        self.map.insert(ty.to_ascii_lowercase(), idx);
    }
}

/// Entry is the core data type of the server. It is allocated empty,
/// populated by exactly one decode call, then mutated in place by the
/// modify, merge and rename operations. Decode, encode and modify assume
/// exclusive ownership for the duration of the call; the one exception is
/// the virtual attribute cache, which may be read and merged from many
/// threads sharing the entry and is guarded by its own lock.
#[derive(Debug)]
pub struct Entry {
    dn: Option<Dn>,
    rdn: Option<Rdn>,
    uniqueid: Option<String>,
    attrs: AttrList,
    deleted_attrs: AttrList,
    /// Csns that have distinguished this entry's dn values.
    dncsn: CsnSet,
    /// The highest csn seen anywhere in the entry during decode.
    maxcsn: Option<Csn>,
    flags: EntryFlags,
    ext: ExtStore,
    epoch: VattrEpoch,
    vattrs: RwLock<VattrCache>,
}

impl Clone for Entry {
    fn clone(&self) -> Self {
        let mut ext = ExtStore::default();
        extension::copy_all(&self.ext, &mut ext);
        // The virtual attribute cache is intentionally cold on the copy.
        Entry {
            dn: self.dn.clone(),
            rdn: self.rdn.clone(),
            uniqueid: self.uniqueid.clone(),
            attrs: self.attrs.clone(),
            deleted_attrs: self.deleted_attrs.clone(),
            dncsn: self.dncsn.clone(),
            maxcsn: self.maxcsn,
            flags: self.flags,
            ext,
            epoch: self.epoch.clone(),
            vattrs: RwLock::new(VattrCache::default()),
        }
    }
}

fn seed_dn_from_raw(
    e: &mut Entry,
    rawdn: &str,
    srdn: Option<&Rdn>,
    flags: ParseFlags,
) -> Result<(), OperationError> {
    if e.dn.is_none() {
        let dn = if flags.contains(ParseFlags::DN_NORMALIZED) {
            Dn::from_normalized(rawdn)
        } else {
            Dn::new(rawdn)?
        };
        e.dn = Some(dn);
    }
    if e.rdn.is_none() {
        if let Some(r) = srdn {
            e.rdn = Some(r.clone());
        } else if let Some(dn) = &e.dn {
            e.rdn = dn.rdn().ok();
        }
    }
    Ok(())
}

/// Handle the pseudo attribute lines both decoders special case. Returns
/// true when the line was consumed, an error when the decode must abort.
fn consume_special_line(
    e: &mut Entry,
    base: &str,
    value: &[u8],
    flags: ParseFlags,
    oc_flag_check: bool,
) -> Result<bool, OperationError> {
    if base.eq_ignore_ascii_case(ATTR_DN) {
        if e.dn.is_some() {
            trace!("entry has multiple dns, second ignored");
            return Ok(true);
        }
        let raw = String::from_utf8_lossy(value);
        let dn = Dn::new(&raw).inspect_err(|_| trace!("invalid dn: {raw}"))?;
        e.dn = Some(dn);
        return Ok(true);
    }
    if base.eq_ignore_ascii_case(ATTR_RDN) {
        if e.rdn.is_none() {
            match Rdn::new(&String::from_utf8_lossy(value)) {
                Ok(r) => e.rdn = Some(r),
                Err(_) => warn!("ignoring malformed rdn line"),
            }
        }
        return Ok(true);
    }
    if flags.contains(ParseFlags::NO_ENTRYDN) && base.eq_ignore_ascii_case(ATTR_ENTRYDN) {
        return Ok(true);
    }
    if base.eq_ignore_ascii_case(ATTR_UNIQUEID) {
        if e.uniqueid.is_some() {
            trace!("entry has multiple uniqueids, second ignored");
        } else {
            e.uniqueid = Some(String::from_utf8_lossy(value).into_owned());
        }
        return Ok(true);
    }
    if oc_flag_check && base.eq_ignore_ascii_case(ATTR_OBJECTCLASS) {
        if value.eq_ignore_ascii_case(VALUE_LDAPSUBENTRY.as_bytes()) {
            e.flags |= EntryFlags::LDAPSUBENTRY;
        }
        if value.eq_ignore_ascii_case(VALUE_TOMBSTONE.as_bytes()) {
            e.flags |= EntryFlags::TOMBSTONE;
        }
    }
    Ok(false)
}

/// The fast decoder. The caller guarantees well formed input: all values
/// of an attribute type contiguous and no duplicates, which lets the loop
/// keep a single current-attribute handle and append in O(1) per line.
fn str2entry_fast(
    rawdn: Option<&str>,
    srdn: Option<&Rdn>,
    s: &str,
    flags: ParseFlags,
    read_stateinfo: bool,
    epoch: &VattrEpoch,
) -> Result<Entry, OperationError> {
    trace!("str2entry_fast ==>");
    let mut e = Entry::new(epoch.clone());
    let mut maxcsn: Option<Csn> = None;
    let mut rest = s;
    let mut rawdn = rawdn;
    let mut ptype: Option<String> = None;
    let mut cur: Option<(AttrState, usize)> = None;
    let mut attr_val_cnt = 0usize;

    while let Some(line) = ldif::get_line(&mut rest) {
        if attr_val_cnt >= ENTRY_MAX_ATTRIBUTE_VALUE_COUNT {
            break;
        }
        if line.is_empty() {
            break;
        }
        let Some((rawtype, value)) = ldif::parse_line(&line) else {
            trace!("str2entry_fast: skipping unparsable line");
            continue;
        };
        let info = state_info_from_type(&rawtype, &mut maxcsn);
        let base = &rawtype[..info.base_len];
        let mut valuecsnset = info.csnset;
        let mut adcsn = info.adcsn;
        if !read_stateinfo {
            // We are not maintaining state information.
            if info.value_state == ValueState::Deleted || info.attr_state == AttrState::Deleted {
                continue;
            }
            valuecsnset = None;
            adcsn = None;
        }
        if ptype.as_deref().is_none_or(|p| !p.eq_ignore_ascii_case(base)) {
            ptype = Some(base.to_string());
            cur = None;
        }
        if let Some(rd) = rawdn.take() {
            seed_dn_from_raw(&mut e, rd, srdn, flags)
                .inspect_err(|_| trace!("str2entry_fast: invalid dn: {rd}"))?;
        }
        match consume_special_line(&mut e, base, &value, flags, info.value_state == ValueState::Present)
        {
            Ok(true) => continue,
            Ok(false) => {}
            Err(err) => return Err(err),
        }
        if cur.is_none() {
            let (state, list) = match info.attr_state {
                AttrState::Deleted => (AttrState::Deleted, &mut e.deleted_attrs),
                AttrState::Present => (AttrState::Present, &mut e.attrs),
            };
            if list.append_missing(base).is_none() {
                error!("str2entry_fast: non-contiguous attribute values for {base}");
                continue;
            }
            cur = Some((state, list.len() - 1));
        }
        let Some((state, idx)) = cur else { continue };
        let v = Value::new_with_csnset(value, valuecsnset);
        if let Some(dcsn) = v.get_csn_of_type(CsnType::ValueDistinguished).copied() {
            e.dncsn.insert_increasing(CsnType::ValueDistinguished, dcsn);
        }
        let a = match state {
            AttrState::Present => e.attrs.at_mut(idx),
            AttrState::Deleted => e.deleted_attrs.at_mut(idx),
        };
        let syntax = a.syntax();
        match info.value_state {
            ValueState::Deleted => a.deleted_mut().append(v, syntax),
            ValueState::Present => a.present_mut().append(v, syntax),
        }
        if let Some(ad) = adcsn {
            a.set_deletion_csn(ad);
        }
        attr_val_cnt += 1;
    }
    if attr_val_cnt >= ENTRY_MAX_ATTRIBUTE_VALUE_COUNT {
        error!(
            "str2entry_fast: entry {} exceeded max attribute value count {attr_val_cnt}",
            e.dn_display()
        );
    }
    if read_stateinfo {
        e.maxcsn = maxcsn;
    }
    // If this is a tombstone, it requires a special treatment for rdn.
    if e.flags.contains(EntryFlags::TOMBSTONE) {
        e.set_tombstone_rdn()
            .inspect_err(|_| trace!("str2entry_fast: tombstone entry has badly formatted dn"))?;
    }
    if e.dn.is_none() {
        error!("str2entry_fast: entry has no dn");
        return Err(OperationError::InvalidEntry);
    }
    trace!("str2entry_fast <==");
    Ok(e)
}

/// The defensive decoder: tolerates interleaved attribute types and, when
/// requested, detects and drops duplicate values. Attribute lookup is
/// linear until the caller declares a big entry, at which point a tree is
/// built lazily from everything seen so far.
#[allow(unused_assignments)]
fn str2entry_dupcheck(
    rawdn: Option<&str>,
    s: &str,
    flags: ParseFlags,
    read_stateinfo: bool,
    epoch: &VattrEpoch,
) -> Result<Entry, OperationError> {
    let strict = flags.contains(ParseFlags::STRICT_DN);
    let check_dups = flags.contains(ParseFlags::REMOVE_DUP_VALUES);
    let big_entry = flags.contains(ParseFlags::BIG_ENTRY);
    let mut e = Entry::new(epoch.clone());
    let mut attrs: Vec<DecodeAttr> = Vec::new();
    let mut index: Box<dyn AttrIndex> = Box::new(LinearIndex);
    let mut tree_checking = false;
    let mut prev: Option<usize> = None;
    let mut maxcsn: Option<Csn> = None;
    let mut rest = s;
    let mut rawdn = rawdn;

    while let Some(line) = ldif::get_line(&mut rest) {
        if line.is_empty() {
            break;
        }
        let Some((rawtype, value)) = ldif::parse_line(&line) else {
            warn!(
                "str2entry_dupcheck: entry ({}), ignoring invalid line",
                e.dn_display()
            );
            continue;
        };
        let info = state_info_from_type(&rawtype, &mut maxcsn);
        let base = &rawtype[..info.base_len];
        let mut valuecsnset = info.csnset;
        let mut adcsn = info.adcsn;
        if !read_stateinfo {
            if info.value_state == ValueState::Deleted || info.attr_state == AttrState::Deleted {
                continue;
            }
            valuecsnset = None;
            adcsn = None;
        }
        if let Some(rd) = rawdn.take() {
            seed_dn_from_raw(&mut e, rd, None, flags)
                .inspect_err(|_| trace!("str2entry_dupcheck: invalid dn: {rd}"))?;
        }
        match consume_special_line(&mut e, base, &value, flags, true) {
            Ok(true) => continue,
            Ok(false) => {}
            Err(err) => return Err(err),
        }
        // Quick check whether this value belongs to the type we last
        // processed, before paying for a lookup.
        if prev.is_none_or(|i| !attrs[i].ty.eq_ignore_ascii_case(base)) {
            prev = None;
            if big_entry && !tree_checking {
                // Just switched checking mechanism: load the existing
                // attributes into the tree.
                let mut tree = TreeIndex::default();
                for (i, a) in attrs.iter().enumerate() {
                    tree.insert(&a.ty, i);
                }
                index = Box::new(tree);
                tree_checking = true;
            }
            prev = index.find(base, &attrs);
        }
        let idx = match prev {
            Some(i) => i,
            None => {
                attrs.push(DecodeAttr::new(base, info.attr_state));
                let i = attrs.len() - 1;
                index.insert(base, i);
                prev = Some(i);
                i
            }
        };
        let sa = &mut attrs[idx];
        let mut raw_val = value;
        if sa.syntax.is_dn() {
            let text = String::from_utf8_lossy(&raw_val).into_owned();
            if strict && dn_syntax_check(&text).is_err() {
                error!("str2entry_dupcheck: strict: invalid dn value: {base}: {text}");
                return Err(OperationError::InvalidDn);
            }
            match Dn::new(&text) {
                Ok(ndn) => raw_val = ndn.as_str().as_bytes().to_vec(),
                Err(_) => warn!("str2entry_dupcheck: unnormalizable dn value for {base} kept as-is"),
            }
        }
        let v = Value::new_with_csnset(raw_val, valuecsnset);
        if let Some(dcsn) = v.get_csn_of_type(CsnType::ValueDistinguished).copied() {
            e.dncsn.insert_increasing(CsnType::ValueDistinguished, dcsn);
        }
        match info.value_state {
            ValueState::Deleted => {
                // Deleted values are never dupchecked.
                sa.deleted.append(v, sa.syntax);
                if let Some(ad) = adcsn.take() {
                    sa.adcsn = Some(ad);
                }
            }
            ValueState::Present => {
                if check_dups {
                    if sa.present.insert_checked(v, sa.syntax) {
                        if let Some(ad) = adcsn.take() {
                            sa.adcsn = Some(ad);
                        }
                    } else {
                        // Dropped with the duplicate: any adcsn that rode
                        // this line.
                        sa.numdups += 1;
                    }
                } else {
                    sa.present.append(v, sa.syntax);
                    if let Some(ad) = adcsn.take() {
                        sa.adcsn = Some(ad);
                    }
                }
            }
        }
    }

    // All done with parsing. Check there was a dn line, then build the
    // entry from the accumulated per-type scratch state.
    if e.dn.is_none() {
        error!("str2entry_dupcheck: entry has no dn");
        return Err(OperationError::InvalidEntry);
    }
    for sa in attrs.iter_mut() {
        if sa.numdups > 0 {
            if sa.numdups > 1 {
                warn!(
                    "str2entry_dupcheck: {} duplicate values for attribute type {} detected in entry {}. Extra values ignored.",
                    sa.numdups,
                    sa.ty,
                    e.dn_display()
                );
            } else {
                warn!(
                    "str2entry_dupcheck: duplicate value for attribute type {} detected in entry {}. Extra value ignored.",
                    sa.ty,
                    e.dn_display()
                );
            }
        }
        let list = match sa.state {
            AttrState::Deleted if read_stateinfo => &mut e.deleted_attrs,
            // Not maintaining state info: deleted attributes are dropped.
            AttrState::Deleted => continue,
            AttrState::Present => &mut e.attrs,
        };
        let a = list.find_or_create(&sa.ty);
        let syntax = a.syntax();
        a.merge_values(sa.present.take_values());
        a.deleted_mut().append_all(sa.deleted.take_values(), syntax);
        if let Some(ad) = sa.adcsn.take() {
            a.set_deletion_csn(ad);
        }
    }
    if e.flags.contains(EntryFlags::TOMBSTONE) {
        e.set_tombstone_rdn()
            .inspect_err(|_| trace!("str2entry_dupcheck: tombstone entry has badly formatted dn"))?;
    }
    if flags.contains(ParseFlags::ADD_RDN_VALUES) {
        e.add_rdn_values()
            .inspect_err(|_| trace!("str2entry_dupcheck: entry has badly formatted dn"))?;
    }
    if read_stateinfo {
        e.maxcsn = maxcsn;
    }
    trace!("str2entry_dupcheck <== {}", e.dn_display());
    Ok(e)
}

/// Two pass output target: the first pass sums exact line sizes, the
/// second fills a buffer reserved to that sum.
enum Output {
    Size(usize),
    Fill(String),
}

impl Output {
    fn put(&mut self, ty: &str, val: &[u8], ctrl: DumpFlags) {
        let nowrap = ctrl.contains(DumpFlags::NOWRAP);
        let minimal = ctrl.contains(DumpFlags::MINIMAL_ENCODING);
        match self {
            Output::Size(n) => *n += ldif::size_type_and_value(ty.len(), val, nowrap, minimal),
            Output::Fill(buf) => ldif::put_type_and_value(buf, ty, val, nowrap, minimal),
        }
    }
}

fn render_value(
    out: &mut Output,
    typebuf: &mut String,
    ty: &str,
    attrcsn: Option<(CsnType, &Csn)>,
    attr_state: AttrState,
    v: &Value,
    value_state: ValueState,
    ctrl: DumpFlags,
) {
    if ctrl.contains(DumpFlags::STATEINFO) {
        typebuf.clear();
        typebuf.push_str(ty);
        if let Some((t, csn)) = attrcsn {
            csn_as_attr_option(t, csn, typebuf);
        }
        if let Some(set) = v.csnset() {
            set.render(typebuf);
        }
        if attr_state == AttrState::Deleted {
            typebuf.push_str(";deletedattribute");
        }
        if value_state == ValueState::Deleted {
            typebuf.push_str(";deleted");
        }
        out.put(typebuf, v.as_bytes(), ctrl);
    } else {
        out.put(ty, v.as_bytes(), ctrl);
    }
}

fn render_valueset(
    out: &mut Output,
    typebuf: &mut String,
    ty: &str,
    attrcsn: Option<(CsnType, &Csn)>,
    attr_state: AttrState,
    vs: &ValueSet,
    value_state: ValueState,
    ctrl: DumpFlags,
) {
    // The attribute level csn rides the first value only; later values of
    // the set share it by implication.
    for (i, v) in vs.iter().enumerate() {
        let ac = if i == 0 { attrcsn } else { None };
        render_value(out, typebuf, ty, ac, attr_state, v, value_state, ctrl);
    }
}

fn render_attrlist(
    out: &mut Output,
    typebuf: &mut String,
    list: &AttrList,
    attr_state: AttrState,
    ctrl: DumpFlags,
) {
    for a in list.iter() {
        if ctrl.contains(DumpFlags::NO_OPATTRS) && a.is_operational() {
            continue;
        }
        if a.name().eq_ignore_ascii_case(ATTR_UNIQUEID) && !ctrl.contains(DumpFlags::UNIQUEID) {
            continue;
        }
        if is_type_protected(a.name()) {
            continue;
        }
        let adcsn = a.deletion_csn().map(|c| (CsnType::AttributeDeleted, c));
        let has_present = !a.present().is_empty();
        if has_present {
            render_valueset(
                out,
                typebuf,
                a.name(),
                adcsn,
                attr_state,
                a.present(),
                ValueState::Present,
                ctrl,
            );
        }
        if ctrl.contains(DumpFlags::STATEINFO) {
            if has_present {
                render_valueset(
                    out,
                    typebuf,
                    a.name(),
                    None,
                    attr_state,
                    a.deleted(),
                    ValueState::Deleted,
                    ctrl,
                );
            } else if !a.deleted().is_empty() {
                // No present value to place the attribute deletion csn on,
                // so it rides the first deleted value.
                render_valueset(
                    out,
                    typebuf,
                    a.name(),
                    adcsn,
                    attr_state,
                    a.deleted(),
                    ValueState::Deleted,
                    ctrl,
                );
            } else if let Some(ad) = a.deletion_csn() {
                // Both sets are empty but the attribute deletion csn must
                // survive the round trip. Emit a single empty deleted
                // value to carry it; it is never shown to clients.
                let mut carrier = Value::new(Vec::new());
                carrier.add_csn(CsnType::ValueDeleted, *ad);
                render_value(
                    out,
                    typebuf,
                    a.name(),
                    adcsn,
                    attr_state,
                    &carrier,
                    ValueState::Deleted,
                    ctrl,
                );
            }
        }
    }
}

impl Entry {
    /// A new empty entry bound to an invalidation epoch. Decode is the
    /// normal way to populate one.
    pub fn new(epoch: VattrEpoch) -> Self {
        Entry {
            dn: None,
            rdn: None,
            uniqueid: None,
            attrs: AttrList::new(),
            deleted_attrs: AttrList::new(),
            dncsn: CsnSet::new(),
            maxcsn: None,
            flags: EntryFlags::empty(),
            ext: ExtStore::default(),
            epoch,
            vattrs: RwLock::new(VattrCache::default()),
        }
    }

    /// Decode an entry from its text form.
    pub fn parse(s: &str, flags: ParseFlags, epoch: &VattrEpoch) -> Result<Entry, OperationError> {
        trace!(
            "entry parse flags={flags:?} entry=\"{}...\"",
            s.get(..50).unwrap_or(s)
        );
        let read_stateinfo = !flags.contains(ParseFlags::IGNORE_STATE);
        let e = if flags.requires_dupcheck() {
            str2entry_dupcheck(None, s, flags, read_stateinfo, epoch)?
        } else {
            str2entry_fast(None, None, s, flags, read_stateinfo, epoch)?
        };
        Self::parse_post(e, flags)
    }

    /// Decode with an externally supplied normalized dn (and optionally an
    /// already derived rdn), for callers that have them on hand and want
    /// to skip the re-derivation. The input text must not carry a dn line.
    pub fn parse_with_dn(
        normdn: &str,
        srdn: Option<&Rdn>,
        s: &str,
        flags: ParseFlags,
        epoch: &VattrEpoch,
    ) -> Result<Entry, OperationError> {
        trace!(
            "entry parse flags={flags:?} dn=\"{normdn}\" entry=\"{}...\"",
            s.get(..50).unwrap_or(s)
        );
        let flags = flags | ParseFlags::DN_NORMALIZED;
        let read_stateinfo = !flags.contains(ParseFlags::IGNORE_STATE);
        let e = if flags.requires_dupcheck() {
            str2entry_dupcheck(Some(normdn), s, flags, read_stateinfo, epoch)?
        } else {
            str2entry_fast(Some(normdn), srdn, s, flags, read_stateinfo, epoch)?
        };
        Self::parse_post(e, flags)
    }

    fn parse_post(mut e: Entry, flags: ParseFlags) -> Result<Entry, OperationError> {
        if flags.contains(ParseFlags::EXPAND_OBJECTCLASSES) {
            // Hierarchy expansion needs the schema, which lives above this
            // layer.
            debug!("objectclass expansion deferred to the schema layer");
        }
        if flags.contains(ParseFlags::TOMBSTONE_CHECK)
            && e.attr_hasvalue(ATTR_OBJECTCLASS, VALUE_TOMBSTONE.as_bytes())
        {
            e.flags |= EntryFlags::TOMBSTONE;
        }
        Ok(e)
    }

    fn dn_display(&self) -> &str {
        self.dn.as_ref().map(|d| d.as_str()).unwrap_or("unknown")
    }

    /// Encode to text form. Two passes: size everything exactly, reserve,
    /// then fill.
    pub fn to_text(&self, ctrl: DumpFlags) -> String {
        let mut sizing = Output::Size(0);
        self.render_entry(&mut sizing, ctrl);
        let len = match sizing {
            Output::Size(n) => n,
            Output::Fill(_) => 0,
        };
        let mut filling = Output::Fill(String::with_capacity(len));
        self.render_entry(&mut filling, ctrl);
        match filling {
            Output::Fill(buf) => {
                debug_assert_eq!(buf.len(), len, "entry encode size and fill passes disagree");
                buf
            }
            Output::Size(_) => String::new(),
        }
    }

    fn render_entry(&self, out: &mut Output, ctrl: DumpFlags) {
        let mut typebuf = String::with_capacity(64);
        if ctrl.contains(DumpFlags::RDN_ENTRY) {
            let rdn = self
                .rdn
                .clone()
                .or_else(|| self.dn.as_ref().and_then(|d| d.rdn().ok()));
            if let Some(r) = rdn {
                out.put(ATTR_RDN, r.as_str().as_bytes(), ctrl);
            }
        } else if let Some(dn) = &self.dn {
            out.put(ATTR_DN, dn.as_str().as_bytes(), ctrl);
        }
        if ctrl.contains(DumpFlags::UNIQUEID) {
            if let Some(id) = &self.uniqueid {
                out.put(ATTR_UNIQUEID, id.as_bytes(), ctrl);
            }
        }
        render_attrlist(out, &mut typebuf, &self.attrs, AttrState::Present, ctrl);
        if ctrl.contains(DumpFlags::STATEINFO) {
            render_attrlist(
                out,
                &mut typebuf,
                &self.deleted_attrs,
                AttrState::Deleted,
                ctrl,
            );
        }
    }

    // ==== dn / rdn / identity ====

    pub fn dn(&self) -> Option<&Dn> {
        self.dn.as_ref()
    }

    pub fn set_dn(&mut self, dn: Dn) {
        self.dn = Some(dn);
    }

    pub fn rdn(&self) -> Option<&Rdn> {
        self.rdn.as_ref()
    }

    pub fn set_rdn(&mut self, rdn: Rdn) {
        self.rdn = Some(rdn);
    }

    pub fn uniqueid(&self) -> Option<&str> {
        self.uniqueid.as_deref()
    }

    pub fn set_uniqueid(&mut self, id: String) {
        self.uniqueid = Some(id);
    }

    /// Stamp a fresh unique id in the storage format: four dash separated
    /// groups of eight hex chars.
    pub fn assign_uniqueid(&mut self) {
        let simple = Uuid::new_v4().simple().to_string();
        let id = format!(
            "{}-{}-{}-{}",
            &simple[..8],
            &simple[8..16],
            &simple[16..24],
            &simple[24..32]
        );
        self.uniqueid = Some(id);
    }

    // ==== flags and replication watermarks ====

    pub fn flags(&self) -> EntryFlags {
        self.flags
    }

    pub fn set_flag(&mut self, flag: EntryFlags) {
        self.flags |= flag;
    }

    pub fn clear_flag(&mut self, flag: EntryFlags) {
        self.flags &= !flag;
    }

    pub fn is_tombstone(&self) -> bool {
        self.flags.contains(EntryFlags::TOMBSTONE)
    }

    pub fn is_ldapsubentry(&self) -> bool {
        self.flags.contains(EntryFlags::LDAPSUBENTRY)
    }

    /// The highest csn observed anywhere in the entry during decode. A
    /// replica that has seen this csn has seen every update the entry
    /// carries.
    pub fn maxcsn(&self) -> Option<&Csn> {
        self.maxcsn.as_ref()
    }

    pub fn dncsn_set(&self) -> &CsnSet {
        &self.dncsn
    }

    pub fn epoch(&self) -> &VattrEpoch {
        &self.epoch
    }

    pub fn ext_store(&self) -> &ExtStore {
        &self.ext
    }

    // ==== attribute access ====

    pub fn attrs(&self) -> impl Iterator<Item = &Attr> {
        self.attrs.iter()
    }

    pub fn deleted_attrs(&self) -> impl Iterator<Item = &Attr> {
        self.deleted_attrs.iter()
    }

    pub fn attr_find(&self, ty: &str) -> Option<&Attr> {
        self.attrs.find(ty)
    }

    pub fn has_attr(&self, ty: &str) -> bool {
        self.attrs.find(ty).is_some()
    }

    pub fn attr_hasvalue(&self, ty: &str, raw: &[u8]) -> bool {
        self.attrs.find(ty).map(|a| a.hasvalue(raw)).unwrap_or(false)
    }

    pub fn attr_get_str(&self, ty: &str) -> Option<String> {
        self.attr_get_ref(ty).map(str::to_string)
    }

    /// Borrow the first value as text, when it is utf8.
    pub fn attr_get_ref(&self, ty: &str) -> Option<&str> {
        self.attrs
            .find(ty)
            .and_then(|a| a.first_value())
            .and_then(|v| v.as_str())
    }

    pub fn attr_get_i64(&self, ty: &str) -> Option<i64> {
        self.attrs
            .find(ty)
            .and_then(|a| a.first_value())
            .and_then(|v| v.as_i64())
    }

    pub fn attr_get_u64(&self, ty: &str) -> Option<u64> {
        self.attrs
            .find(ty)
            .and_then(|a| a.first_value())
            .and_then(|v| v.as_u64())
    }

    pub fn attr_get_i32(&self, ty: &str) -> Option<i32> {
        self.attrs
            .find(ty)
            .and_then(|a| a.first_value())
            .and_then(|v| v.as_i32())
    }

    pub fn attr_get_u32(&self, ty: &str) -> Option<u32> {
        self.attrs
            .find(ty)
            .and_then(|a| a.first_value())
            .and_then(|v| v.as_u32())
    }

    pub fn attr_get_bool(&self, ty: &str) -> bool {
        self.attr_get_bool_default(ty, false)
    }

    /// Missing attribute yields the default; unrecognized text is false.
    pub fn attr_get_bool_default(&self, ty: &str, default: bool) -> bool {
        match self.attrs.find(ty).and_then(|a| a.first_value()) {
            Some(v) => v.as_bool().unwrap_or(false),
            None => default,
        }
    }

    pub fn attr_set_str(&mut self, ty: &str, val: &str) {
        self.attr_replace(ty, vec![Value::from(val)]);
    }

    pub fn attr_set_i64(&mut self, ty: &str, val: i64) {
        self.attr_set_str(ty, &val.to_string());
    }

    pub fn attr_set_u64(&mut self, ty: &str, val: u64) {
        self.attr_set_str(ty, &val.to_string());
    }

    pub fn attr_set_i32(&mut self, ty: &str, val: i32) {
        self.attr_set_str(ty, &val.to_string());
    }

    pub fn attr_set_u32(&mut self, ty: &str, val: u32) {
        self.attr_set_str(ty, &val.to_string());
    }

    pub fn attr_set_bool(&mut self, ty: &str, val: bool) {
        self.attr_set_str(ty, if val { "on" } else { "off" });
    }

    /// Append values without duplicate checking.
    pub fn attr_merge(&mut self, ty: &str, vals: Vec<Value>) {
        self.attrs.find_or_create(ty).merge_values(vals);
    }

    /// Replace whatever the attribute held. Empty values delete it.
    pub fn attr_replace(&mut self, ty: &str, vals: Vec<Value>) {
        let _ = self.attrs.delete(ty);
        if !vals.is_empty() {
            self.attr_merge(ty, vals);
        }
    }

    pub fn attr_delete(&mut self, ty: &str) -> Result<(), OperationError> {
        self.attrs.delete(ty)
    }

    pub fn add_value(&mut self, ty: &str, v: Value) {
        let a = self.attrs.find_or_create(ty);
        let syntax = a.syntax();
        a.present_mut().append(v, syntax);
    }

    /// Add values with duplicate checking.
    pub fn add_values(&mut self, ty: &str, vals: Vec<Value>) -> Result<(), OperationError> {
        if vals.is_empty() {
            // No values to add: unexpected but acceptable.
            return Ok(());
        }
        self.attrs.find_or_create(ty).add_values(vals)
    }

    pub fn add_valueset(&mut self, ty: &str, mut vs: ValueSet) {
        for v in vs.take_values() {
            self.add_value(ty, v);
        }
    }

    fn delete_values_internal(
        &mut self,
        ty: &str,
        vals: &[Value],
        mut ignore_error: bool,
    ) -> Result<(), OperationError> {
        // A protected type may exist only on the in-memory entry, so its
        // absence is not an error.
        if is_type_protected(ty) {
            ignore_error = true;
        }
        if vals.is_empty() {
            trace!("delete_values: removing entire attribute {ty}");
            return match self.attrs.delete(ty) {
                Ok(()) => Ok(()),
                Err(_) if ignore_error => Ok(()),
                Err(err) => Err(err),
            };
        }
        let Some(a) = self.attrs.find_mut(ty) else {
            trace!("delete_values: could not find attribute {ty}");
            return if ignore_error {
                Ok(())
            } else {
                Err(OperationError::NoSuchAttribute)
            };
        };
        let syntax = a.syntax();
        let mut emptied = false;
        for v in vals {
            if a.present_mut().remove(v.as_bytes(), syntax).is_none() && !ignore_error {
                return Err(OperationError::NoSuchAttribute);
            }
            emptied = a.present().is_empty();
        }
        if emptied {
            // All values gone: the attribute goes with them.
            let name = a.name().to_string();
            let _ = self.attrs.delete(&name);
        }
        Ok(())
    }

    /// Delete present values. Removing the last value removes the
    /// attribute itself.
    pub fn delete_values(&mut self, ty: &str, vals: &[Value]) -> Result<(), OperationError> {
        self.delete_values_internal(ty, vals, false)
    }

    /// Add the values not already present, leaving existing ones alone.
    pub fn merge_values(&mut self, ty: &str, vals: Vec<Value>) -> Result<(), OperationError> {
        self.delete_values_internal(ty, &vals, true)?;
        self.attr_merge(ty, vals);
        Ok(())
    }

    /// Rough heap footprint of the entry, caches included.
    pub fn size(&self) -> usize {
        let mut size = std::mem::size_of::<Entry>();
        if let Some(dn) = &self.dn {
            size += dn.as_str().len();
        }
        if let Some(rdn) = &self.rdn {
            size += rdn.as_str().len();
        }
        if let Some(id) = &self.uniqueid {
            size += id.len();
        }
        size += self.attrs.size() + self.deleted_attrs.size();
        size += extension::size_all(&self.ext);
        if let Ok(cache) = self.vattrs.read() {
            for va in &cache.attrs {
                size += va.name.len();
                if let Some(a) = &va.attr {
                    size += a.size();
                }
            }
        }
        size
    }

    // ==== modify / diff / rename ====

    /// Route a mod to the extension store when its type is registered
    /// there. Returns true when the mod was fully handled.
    fn apply_mod_extension(&mut self, m: &Mod) -> Result<bool, OperationError> {
        let Some(handler) = extension::extension_handler(&m.ty) else {
            return Ok(false);
        };
        let syntax = ValueSyntax::for_attr_type(&m.ty);
        match m.op {
            ModOp::Add => {
                if !m.values.is_empty() {
                    handler
                        .set(&mut self.ext, Some(m.values.clone()), ExtSetMode::Add)
                        .inspect_err(|_| {
                            error!("apply_mod: add: failed to set {} to extension", m.ty)
                        })?;
                }
            }
            ModOp::Delete => {
                if m.values.is_empty() {
                    handler
                        .set(&mut self.ext, None, ExtSetMode::Replace)
                        .inspect_err(|_| {
                            error!("apply_mod: delete: failed to set {} to extension", m.ty)
                        })?;
                } else if let Some(current) = handler.get(&self.ext) {
                    let remaining: Vec<Value> = current
                        .into_iter()
                        .filter(|cur| {
                            !m.values
                                .iter()
                                .any(|del| syntax.value_eq(cur.as_bytes(), del.as_bytes()))
                        })
                        .collect();
                    handler
                        .set(&mut self.ext, Some(remaining), ExtSetMode::Replace)
                        .inspect_err(|_| {
                            error!("apply_mod: delete: failed to set {} to extension", m.ty)
                        })?;
                }
            }
            ModOp::Replace => {
                if !m.values.is_empty() {
                    handler
                        .set(&mut self.ext, Some(m.values.clone()), ExtSetMode::Replace)
                        .inspect_err(|_| {
                            error!("apply_mod: replace: failed to set {} to extension", m.ty)
                        })?;
                }
            }
        }
        Ok(true)
    }

    /// Apply a single modification.
    pub fn apply_mod(&mut self, m: &Mod) -> Result<(), OperationError> {
        let sawsubentry = m.ty.eq_ignore_ascii_case(ATTR_OBJECTCLASS)
            && m.values
                .iter()
                .any(|v| v.as_bytes().eq_ignore_ascii_case(VALUE_LDAPSUBENTRY.as_bytes()));
        if self.apply_mod_extension(m)? {
            return Ok(());
        }
        match m.op {
            ModOp::Add => {
                trace!("apply_mod: add: {}", m.ty);
                if sawsubentry {
                    self.flags |= EntryFlags::LDAPSUBENTRY;
                }
                self.add_values(&m.ty, m.values.clone())
            }
            ModOp::Delete => {
                trace!("apply_mod: delete: {}", m.ty);
                self.delete_values_internal(&m.ty, &m.values, false)
            }
            ModOp::Replace => {
                trace!("apply_mod: replace: {}", m.ty);
                self.attr_replace(&m.ty, m.values.clone());
                Ok(())
            }
        }
    }

    /// Apply an ordered batch of modifications. The first failure aborts
    /// the remainder.
    pub fn apply_mods(&mut self, mods: &ModifyList) -> Result<(), OperationError> {
        self.apply_mods_ignore_error(mods, None).map_err(|(_, e)| e)
    }

    /// As [`Self::apply_mods`], but reports the zero based index of the
    /// failing mod, and optionally treats one error code as ignorable -
    /// the escape hatch idempotent retries need.
    pub fn apply_mods_ignore_error(
        &mut self,
        mods: &ModifyList,
        ignore: Option<OperationError>,
    ) -> Result<(), (usize, OperationError)> {
        for (i, m) in mods.iter().enumerate() {
            match self.apply_mod(m) {
                Ok(()) => {}
                Err(err) if Some(err) == ignore => {
                    trace!("apply_mods: ignoring {err} on mod {i}");
                }
                Err(err) => return Err((i, err)),
            }
        }
        Ok(())
    }

    /// Make the entry's attributes contain its rdn values.
    pub fn add_rdn_values(&mut self) -> Result<(), OperationError> {
        let rdn = match &self.rdn {
            Some(r) => r.clone(),
            None => self
                .dn
                .as_ref()
                .ok_or(OperationError::InvalidDn)?
                .rdn()?,
        };
        for (ty, val) in rdn.avas() {
            if ty.eq_ignore_ascii_case(ATTR_UNIQUEID) {
                continue;
            }
            if !self.attr_hasvalue(ty, val.as_bytes()) {
                self.add_value(ty, Value::from(val.as_str()));
            }
        }
        Ok(())
    }

    /// Rename the entry, simulating a modrdn operation: optionally strip
    /// the old rdn values, rebuild the dn under the new superior (or the
    /// old parent), and add the new rdn values. The parent pointer
    /// attributes are always dropped - the backend owns them.
    pub fn rename(
        &mut self,
        newrdn: &str,
        deleteoldrdn: bool,
        new_superior: Option<&Dn>,
    ) -> Result<(), OperationError> {
        trace!("entry rename =>");
        let newrdn = Rdn::new(newrdn)?;
        let olddn = self.dn.clone().ok_or(OperationError::InvalidDn)?;
        if deleteoldrdn {
            let oldrdn = olddn.rdn()?;
            let mut mods = ModifyList::new();
            for (ty, val) in oldrdn.avas() {
                mods.push_mod(m_delete(ty, vec![Value::from(val.as_str())]));
            }
            self.apply_mods(&mods)?;
        }
        let _ = self.attrs.delete(ATTR_PARENTID);
        let _ = self.attrs.delete(ATTR_ENTRYDN);
        let parent = match new_superior {
            Some(ns) => Some(ns.clone()),
            None => olddn.parent(),
        };
        self.dn = Some(Dn::from_rdn_and_parent(&newrdn, parent.as_ref()));
        self.rdn = Some(newrdn);
        let r = self.add_rdn_values();
        trace!("entry rename <=");
        r
    }

    /// Recover the true rdn of a tombstone. The stored dn leads with the
    /// unique id component; the component after it is the original rdn.
    /// The replica update vector entry keeps its literal rdn.
    fn set_tombstone_rdn(&mut self) -> Result<(), OperationError> {
        const PREFIX: &str = "nsuniqueid=";
        let Some(dn) = &self.dn else {
            return Ok(());
        };
        let s = dn.as_str();
        let leads_uniqueid = s
            .get(..PREFIX.len())
            .map(|p| p.eq_ignore_ascii_case(PREFIX))
            .unwrap_or(false);
        if leads_uniqueid && !s.contains(RUV_STORAGE_ENTRY_UNIQUEID) {
            let parent = dn.parent().ok_or(OperationError::TombstoneFormat)?;
            let rdn = parent
                .rdn()
                .map_err(|_| OperationError::TombstoneFormat)?;
            self.rdn = Some(rdn);
        }
        Ok(())
    }

    // ==== virtual attribute cache ====

    /// Look up a virtual attribute in the entry's cache. A stale watermark
    /// means nothing in the cache can be trusted, so everything reports
    /// not-resolved without being swept.
    pub fn vattr_find(&self, ty: &str) -> VattrLookup {
        let Ok(cache) = self.vattrs.read() else {
            return VattrLookup::NotResolved;
        };
        if cache.watermark != self.epoch.current() {
            return VattrLookup::NotResolved;
        }
        match cache
            .attrs
            .iter()
            .find(|va| va.name.eq_ignore_ascii_case(ty))
        {
            None => VattrLookup::NotResolved,
            Some(va) => match &va.attr {
                Some(a) if !a.present().is_empty() => VattrLookup::ResolvedPresent {
                    ty: a.name().to_string(),
                    values: a.present().iter().cloned().collect(),
                },
                _ => VattrLookup::ResolvedAbsent,
            },
        }
    }

    /// Cache a computed virtual attribute value - or, with `None`, the
    /// fact that the attribute resolved to nothing on this entry. A stale
    /// cache is discarded wholesale before the merge.
    pub fn vattr_merge(&self, ty: &str, values: Option<Vec<Value>>) {
        let Ok(mut cache) = self.vattrs.write() else {
            return;
        };
        if cache.watermark != self.epoch.current() {
            cache.attrs.clear();
        }
        match cache
            .attrs
            .iter_mut()
            .find(|va| va.name.eq_ignore_ascii_case(ty))
        {
            Some(va) => match (&mut va.attr, values) {
                (Some(a), Some(vals)) => a.merge_values(vals),
                (None, Some(_)) => {
                    error!(
                        "vattr_merge: virtual attribute {ty} already cached with empty value, unwilling to cache a different value ({})",
                        self.dn_display()
                    );
                }
                (_, None) => {}
            },
            None => {
                let attr = values.map(|vals| {
                    let mut a = Attr::new(ty);
                    a.merge_values(vals);
                    a
                });
                cache.attrs.push(Vattr {
                    name: ty.to_string(),
                    attr,
                });
            }
        }
        cache.watermark = self.epoch.current();
    }

    /// Invalidate this entry's cache only.
    pub fn vattr_invalidate(&self) {
        if let Ok(mut cache) = self.vattrs.write() {
            cache.watermark = 0;
        }
    }
}

/// Compute the minimal modification list that transforms `a` into `b`:
/// per-value adds and deletes for attributes present in both, whole
/// attribute adds/deletes otherwise. Value equality goes through the
/// attribute syntax.
pub fn entry_diff(a: &Entry, b: &Entry, ctrl: DumpFlags) -> ModifyList {
    let skip_op = ctrl.contains(DumpFlags::NO_OPATTRS);
    let mut mods = ModifyList::new();

    for battr in b.attrs() {
        if skip_op && battr.is_operational() {
            continue;
        }
        match a.attr_find(battr.name()) {
            Some(aattr) => {
                for v in battr.present().iter() {
                    if !aattr.present().contains(v.as_bytes(), battr.syntax()) {
                        trace!("entry_diff: attr-val of {} is not in a; add it", battr.name());
                        mods.push_mod(m_add(battr.name(), vec![v.clone()]));
                    }
                }
            }
            None => {
                trace!("entry_diff: attr {} is not in a; add it", battr.name());
                mods.push_mod(m_add(
                    battr.name(),
                    battr.present().iter().cloned().collect(),
                ));
            }
        }
    }

    for aattr in a.attrs() {
        if skip_op && aattr.is_operational() {
            continue;
        }
        match b.attr_find(aattr.name()) {
            Some(battr) => {
                for v in aattr.present().iter() {
                    if !battr.present().contains(v.as_bytes(), aattr.syntax()) {
                        trace!(
                            "entry_diff: attr-val of {} is not in b; delete it",
                            aattr.name()
                        );
                        mods.push_mod(m_delete(aattr.name(), vec![v.clone()]));
                    }
                }
            }
            None => {
                trace!("entry_diff: attr {} is not in b; delete it", aattr.name());
                mods.push_mod(m_delete_all(aattr.name()));
            }
        }
    }

    mods
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::constants::VALUE_DUPCHECK_THRESHOLD;
    use crate::modify::m_replace;

    const TEST_CSN: &str = "5f1e2d3c000100a50000";

    fn ep() -> VattrEpoch {
        VattrEpoch::new()
    }

    fn attr_values(e: &Entry, ty: &str) -> Vec<String> {
        e.attr_find(ty)
            .map(|a| {
                a.present()
                    .iter()
                    .map(|v| v.as_str().unwrap_or("").to_string())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Attribute-value equality between two entries, ignoring order.
    fn attrs_equivalent(x: &Entry, y: &Entry) -> bool {
        let xc = x.attrs().count();
        let yc = y.attrs().count();
        if xc != yc {
            return false;
        }
        x.attrs().all(|xa| match y.attr_find(xa.name()) {
            Some(ya) => {
                xa.present().len() == ya.present().len()
                    && xa
                        .present()
                        .iter()
                        .all(|v| ya.present().contains(v.as_bytes(), ya.syntax()))
            }
            None => false,
        })
    }

    #[test]
    fn test_parse_simple_entry() {
        let e = Entry::parse(
            "dn: uid=bob,dc=example,dc=com\n\
             objectclass: top\n\
             objectclass: person\n\
             cn: Bob Fielding\n\
             mail:: Ym9iQGV4YW1wbGUuY29t\n",
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");
        assert_eq!(e.dn().map(|d| d.as_str()), Some("uid=bob,dc=example,dc=com"));
        assert_eq!(attr_values(&e, "objectclass"), vec!["top", "person"]);
        assert_eq!(attr_values(&e, "cn"), vec!["Bob Fielding"]);
        assert_eq!(attr_values(&e, "mail"), vec!["bob@example.com"]);
        assert!(!e.is_tombstone());
        assert!(e.maxcsn().is_none());
    }

    #[test]
    fn test_parse_failures() {
        // No dn at all.
        assert_eq!(
            Entry::parse("cn: bob\n", ParseFlags::empty(), &ep()).map(|_| ()),
            Err(OperationError::InvalidEntry)
        );
        // Malformed dn aborts the decode.
        assert_eq!(
            Entry::parse("dn: not a dn\ncn: bob\n", ParseFlags::empty(), &ep()).map(|_| ()),
            Err(OperationError::InvalidDn)
        );
        // Blank line terminates before a dn arrives.
        assert_eq!(
            Entry::parse("\ndn: dc=x\n", ParseFlags::empty(), &ep()).map(|_| ()),
            Err(OperationError::InvalidEntry)
        );
    }

    #[test]
    fn test_parse_multiple_dn_ignored() {
        let e = Entry::parse(
            "dn: dc=first\ndn: dc=second\ncn: x\n",
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");
        assert_eq!(e.dn().map(|d| d.as_str()), Some("dc=first"));
    }

    #[test]
    fn test_parse_state_options() {
        let e = Entry::parse(
            &format!(
                "dn: uid=bob,dc=example,dc=com\n\
                 cn;vucsn-{TEST_CSN};mdcsn-{TEST_CSN}: bob\n\
                 mail;vucsn-5f1e2d3c000200a50000: bob@example.com\n\
                 mail;deleted;vdcsn-5f1e2d3c000300a50000: old@example.com\n"
            ),
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");
        let cn = e.attr_find("cn").expect("cn must exist");
        let v = cn.first_value().expect("cn must hold a value");
        assert_eq!(
            v.get_csn_of_type(CsnType::ValueUpdated),
            Some(&Csn::parse_str(TEST_CSN).unwrap())
        );
        let mail = e.attr_find("mail").expect("mail must exist");
        assert_eq!(mail.present().len(), 1);
        assert_eq!(mail.deleted().len(), 1);
        // Watermark is the largest csn seen anywhere.
        assert_eq!(
            e.maxcsn(),
            Some(&Csn::parse_str("5f1e2d3c000300a50000").unwrap())
        );
        // The distinguished csn lands in the dn csn set.
        assert_eq!(e.dncsn_set().len(), 1);
    }

    #[test]
    fn test_parse_ignore_state() {
        let e = Entry::parse(
            &format!(
                "dn: uid=bob,dc=example,dc=com\n\
                 cn;vucsn-{TEST_CSN}: bob\n\
                 mail;deleted;vdcsn-5f1e2d3c000300a50000: old@example.com\n"
            ),
            ParseFlags::IGNORE_STATE,
            &ep(),
        )
        .expect("entry must parse");
        let cn = e.attr_find("cn").expect("cn must exist");
        assert!(cn.first_value().unwrap().csnset().is_none());
        // Deleted lines dropped entirely.
        assert!(e.attr_find("mail").is_none());
        assert!(e.maxcsn().is_none());
    }

    #[test]
    fn test_unrecognized_option_preserved() {
        let e = Entry::parse(
            &format!("dn: dc=x\ncn;lang-en;vucsn-{TEST_CSN}: bob\n"),
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");
        // The subtype stays part of the base type; the csn option is
        // stripped and consumed.
        let a = e.attr_find("cn;lang-en").expect("subtyped attr must exist");
        assert!(a.first_value().unwrap().csnset().is_some());
        let out = e.to_text(DumpFlags::empty());
        assert!(out.contains("cn;lang-en: bob\n"));
    }

    #[test]
    fn test_fast_path_non_contiguous_line_skipped() {
        let e = Entry::parse(
            "dn: dc=x\ncn: a\nsn: b\ncn: c\n",
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");
        // The second cn block violates the fast path contract and is
        // dropped.
        assert_eq!(attr_values(&e, "cn"), vec!["a"]);
        assert_eq!(attr_values(&e, "sn"), vec!["b"]);
    }

    #[test]
    fn test_dupcheck_handles_non_contiguous() {
        let e = Entry::parse(
            "dn: dc=x\ncn: a\nsn: b\ncn: c\n",
            ParseFlags::NOT_WELL_FORMED,
            &ep(),
        )
        .expect("entry must parse");
        assert_eq!(attr_values(&e, "cn"), vec!["a", "c"]);
    }

    #[test]
    fn test_dedup_idempotence() {
        quill::test_init();
        let input = "dn: dc=x\ncn: x\ncn: x\ncn: x\ncn: x\ncn: x\n";
        // Dupchecked: one survivor.
        let e = Entry::parse(input, ParseFlags::REMOVE_DUP_VALUES, &ep())
            .expect("entry must parse");
        assert_eq!(attr_values(&e, "cn"), vec!["x"]);
        // Fast path stores all five verbatim.
        let e = Entry::parse(input, ParseFlags::empty(), &ep()).expect("entry must parse");
        assert_eq!(e.attr_find("cn").unwrap().present().len(), 5);
    }

    #[test]
    fn test_threshold_switch_equivalence() {
        // More distinct types than the value dupcheck threshold, values
        // interleaved so every lookup is a miss.
        let mut text = String::from("dn: dc=x\n");
        let nattrs = VALUE_DUPCHECK_THRESHOLD + 3;
        for round in 0..2 {
            for i in 0..nattrs {
                text.push_str(&format!("attr{i}: value{round}\n"));
            }
        }
        let linear = Entry::parse(text.as_str(), ParseFlags::NOT_WELL_FORMED, &ep())
            .expect("entry must parse");
        let tree = Entry::parse(
            text.as_str(),
            ParseFlags::NOT_WELL_FORMED | ParseFlags::BIG_ENTRY,
            &ep(),
        )
        .expect("entry must parse");
        assert!(attrs_equivalent(&linear, &tree));
        assert_eq!(
            linear.to_text(DumpFlags::empty()),
            tree.to_text(DumpFlags::empty())
        );
    }

    #[test]
    fn test_round_trip_stateinfo() {
        let input = format!(
            "dn: uid=bob,dc=example,dc=com\n\
             nsuniqueid: 12345678-12345678-12345678-12345678\n\
             objectclass;vucsn-{TEST_CSN}: top\n\
             objectclass: person\n\
             cn;vucsn-5f1e2d3c000200a50000;mdcsn-5f1e2d3c000200a50000: bob\n\
             mail;vucsn-5f1e2d3c000300a50000: bob@example.com\n\
             mail;deleted;vdcsn-5f1e2d3c000400a50000: old@example.com\n\
             description;adcsn-5f1e2d3c000500a50000;deletedattribute;deleted: \n"
        );
        let ctrl = DumpFlags::STATEINFO | DumpFlags::UNIQUEID;
        let e = Entry::parse(&input, ParseFlags::empty(), &ep()).expect("entry must parse");
        assert_eq!(
            e.uniqueid(),
            Some("12345678-12345678-12345678-12345678")
        );
        assert_eq!(
            e.maxcsn(),
            Some(&Csn::parse_str("5f1e2d3c000500a50000").unwrap())
        );
        let encoded = e.to_text(ctrl);
        let e2 = Entry::parse(&encoded, ParseFlags::empty(), &ep()).expect("round trip must parse");

        // Semantic equivalence: dn, uniqueid, watermark, per value csns,
        // deleted values, and the deleted attribute's adcsn all survive.
        assert_eq!(e2.dn().map(|d| d.as_str()), e.dn().map(|d| d.as_str()));
        assert_eq!(e2.uniqueid(), e.uniqueid());
        assert_eq!(e2.maxcsn(), e.maxcsn());
        assert!(attrs_equivalent(&e, &e2));
        let mail2 = e2.attr_find("mail").expect("mail must exist");
        assert_eq!(mail2.deleted().len(), 1);
        let desc2 = e2
            .deleted_attrs()
            .find(|a| a.name() == "description")
            .expect("deleted attr must survive");
        assert_eq!(
            desc2.deletion_csn(),
            Some(&Csn::parse_str("5f1e2d3c000500a50000").unwrap())
        );
        // And the encoding has reached a fixed point.
        assert_eq!(e2.to_text(ctrl), encoded);
    }

    #[test]
    fn test_encode_variants() {
        let e = Entry::parse(
            "dn: uid=bob,dc=example,dc=com\n\
             uid: bob\n\
             entrydn: uid=bob,dc=example,dc=com\n",
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");
        let plain = e.to_text(DumpFlags::empty());
        assert!(plain.starts_with("dn: uid=bob,dc=example,dc=com\n"));
        assert!(plain.contains("entrydn:"));

        let noop = e.to_text(DumpFlags::NO_OPATTRS);
        assert!(!noop.contains("entrydn:"));

        let rdn = e.to_text(DumpFlags::RDN_ENTRY);
        assert!(rdn.starts_with("rdn: uid=bob\n"));
    }

    #[test]
    fn test_parse_no_entrydn_flag() {
        let e = Entry::parse(
            "dn: uid=bob,dc=example,dc=com\nentrydn: uid=bob,dc=example,dc=com\nuid: bob\n",
            ParseFlags::NO_ENTRYDN,
            &ep(),
        )
        .expect("entry must parse");
        assert!(!e.has_attr("entrydn"));
    }

    #[test]
    fn test_parse_with_dn() {
        let srdn = Rdn::new("uid=bob").expect("rdn must parse");
        let e = Entry::parse_with_dn(
            "uid=bob,dc=example,dc=com",
            Some(&srdn),
            "uid: bob\ncn: Bob\n",
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");
        assert_eq!(e.dn().map(|d| d.as_str()), Some("uid=bob,dc=example,dc=com"));
        assert_eq!(e.rdn().map(|r| r.as_str()), Some("uid=bob"));
        assert_eq!(attr_values(&e, "cn"), vec!["Bob"]);
    }

    #[test]
    fn test_tombstone_rdn() {
        let e = Entry::parse(
            "dn: nsuniqueid=1234-1234-1234-1234,uid=bob,dc=example,dc=com\n\
             objectclass: nsTombstone\n\
             uid: bob\n",
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");
        assert!(e.is_tombstone());
        assert_eq!(e.rdn().map(|r| r.as_str()), Some("uid=bob"));
    }

    #[test]
    fn test_tombstone_ruv_exempt() {
        let e = Entry::parse(
            &format!(
                "dn: nsuniqueid={RUV_STORAGE_ENTRY_UNIQUEID},dc=example,dc=com\n\
                 objectclass: nsTombstone\n"
            ),
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");
        assert!(e.is_tombstone());
        // The literal rdn is kept: nothing was rewritten.
        assert!(e.rdn().is_none());
        let out = e.to_text(DumpFlags::RDN_ENTRY);
        assert!(out.starts_with(&format!("rdn: nsuniqueid={RUV_STORAGE_ENTRY_UNIQUEID}\n")));
    }

    #[test]
    fn test_tombstone_missing_separator() {
        assert_eq!(
            Entry::parse(
                "dn: nsuniqueid=1234-1234-1234-1234\nobjectclass: nsTombstone\n",
                ParseFlags::empty(),
                &ep(),
            )
            .map(|_| ()),
            Err(OperationError::TombstoneFormat)
        );
    }

    #[test]
    fn test_tombstone_check_flag() {
        // Without the inline objectclass value match (mixed case caught
        // anyway), the explicit check still flags decoded entries.
        let e = Entry::parse(
            "dn: nsuniqueid=1234-1234-1234-1234,uid=bob,dc=x\nobjectclass: NSTOMBSTONE\n",
            ParseFlags::TOMBSTONE_CHECK,
            &ep(),
        )
        .expect("entry must parse");
        assert!(e.is_tombstone());
    }

    #[test]
    fn test_apply_mods() {
        let mut e = Entry::parse(
            "dn: uid=bob,dc=x\nmail: a@x\nmail: b@x\n",
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");

        e.apply_mods(&ModifyList::new_list(vec![m_delete(
            "mail",
            vec![Value::from("a@x")],
        )]))
        .expect("value delete must succeed");
        assert_eq!(attr_values(&e, "mail"), vec!["b@x"]);

        e.apply_mods(&ModifyList::new_list(vec![m_delete_all("mail")]))
            .expect("attribute delete must succeed");
        assert!(!e.has_attr("mail"));

        // Deleting again reports which mod failed.
        let err = e
            .apply_mods_ignore_error(&ModifyList::new_list(vec![m_delete_all("mail")]), None)
            .expect_err("second delete must fail");
        assert_eq!(err, (0, OperationError::NoSuchAttribute));

        // ... unless the caller asked to ignore that error.
        e.apply_mods_ignore_error(
            &ModifyList::new_list(vec![m_delete_all("mail")]),
            Some(OperationError::NoSuchAttribute),
        )
        .expect("ignored error must not abort");
    }

    #[test]
    fn test_apply_mods_replace_and_add() {
        let mut e = Entry::parse("dn: uid=bob,dc=x\ncn: bob\n", ParseFlags::empty(), &ep())
            .expect("entry must parse");

        e.apply_mods(&ModifyList::new_list(vec![m_replace(
            "cn",
            vec![Value::from("robert")],
        )]))
        .expect("replace must succeed");
        assert_eq!(attr_values(&e, "cn"), vec!["robert"]);

        // Replace with no values deletes.
        e.apply_mods(&ModifyList::new_list(vec![m_replace("cn", vec![])]))
            .expect("emptying replace must succeed");
        assert!(!e.has_attr("cn"));

        // Adding a duplicate is an error, and the index is reported.
        e.apply_mods(&ModifyList::new_list(vec![m_add("mail", vec![Value::from("a@x")])]))
            .expect("add must succeed");
        let err = e
            .apply_mods_ignore_error(
                &ModifyList::new_list(vec![
                    m_add("description", vec![Value::from("fine")]),
                    m_add("mail", vec![Value::from("A@X")]),
                ]),
                None,
            )
            .expect_err("duplicate add must fail");
        assert_eq!(err, (1, OperationError::DuplicateValue));

        // Subentry objectclass adds flag the entry.
        e.apply_mods(&ModifyList::new_list(vec![m_add(
            "objectclass",
            vec![Value::from("ldapSubEntry")],
        )]))
        .expect("objectclass add must succeed");
        assert!(e.is_ldapsubentry());
    }

    #[test]
    fn test_apply_mod_extension_side_channel() {
        let mut e = Entry::parse("dn: uid=bob,dc=x\nuid: bob\n", ParseFlags::empty(), &ep())
            .expect("entry must parse");
        let handler = extension::extension_handler(PSEUDO_ATTR_UNHASHEDPASSWORD)
            .expect("handler must exist");

        e.apply_mods(&ModifyList::new_list(vec![m_add(
            PSEUDO_ATTR_UNHASHEDPASSWORD,
            vec![Value::from("hunter2")],
        )]))
        .expect("extension add must succeed");
        // Never lands in the attribute list, never serializes.
        assert!(!e.has_attr(PSEUDO_ATTR_UNHASHEDPASSWORD));
        assert!(!e
            .to_text(DumpFlags::STATEINFO)
            .contains(PSEUDO_ATTR_UNHASHEDPASSWORD));
        assert_eq!(handler.get(e.ext_store()).map(|v| v.len()), Some(1));

        // Copies travel with duplication.
        let dup = e.clone();
        assert_eq!(handler.get(dup.ext_store()).map(|v| v.len()), Some(1));

        // Value delete subtracts, bare delete clears.
        e.apply_mods(&ModifyList::new_list(vec![m_delete(
            PSEUDO_ATTR_UNHASHEDPASSWORD,
            vec![Value::from("hunter2")],
        )]))
        .expect("extension value delete must succeed");
        assert_eq!(handler.get(e.ext_store()).map(|v| v.len()), Some(0));
        e.apply_mods(&ModifyList::new_list(vec![m_delete_all(
            PSEUDO_ATTR_UNHASHEDPASSWORD,
        )]))
        .expect("extension clear must succeed");
        assert!(handler.get(e.ext_store()).is_none());
    }

    #[test]
    fn test_diff_and_apply() {
        let a = Entry::parse(
            "dn: uid=bob,dc=x\ncn: bob\nmail: a@x\nmail: b@x\n",
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");
        let b = Entry::parse(
            "dn: uid=bob,dc=x\ncn: bob\nmail: b@x\nmail: c@x\nsn: smith\n",
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");

        // Self diff is empty.
        assert!(entry_diff(&a, &a, DumpFlags::empty()).is_empty());

        let mods = entry_diff(&a, &b, DumpFlags::empty());
        let mut a2 = a.clone();
        a2.apply_mods(&mods).expect("diff mods must apply");
        assert!(attrs_equivalent(&a2, &b));
    }

    #[test]
    fn test_rename() {
        let mut e = Entry::parse(
            "dn: uid=bob,dc=example,dc=com\n\
             uid: bob\n\
             parentid: 4\n\
             entrydn: uid=bob,dc=example,dc=com\n",
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");
        e.rename("uid=bobby", true, None).expect("rename must succeed");
        assert_eq!(
            e.dn().map(|d| d.as_str()),
            Some("uid=bobby,dc=example,dc=com")
        );
        assert_eq!(attr_values(&e, "uid"), vec!["bobby"]);
        assert!(!e.has_attr("parentid"));
        assert!(!e.has_attr("entrydn"));

        let superior = Dn::new("ou=people,dc=example,dc=com").expect("dn must parse");
        e.rename("uid=bobby", false, Some(&superior))
            .expect("rename must succeed");
        assert_eq!(
            e.dn().map(|d| d.as_str()),
            Some("uid=bobby,ou=people,dc=example,dc=com")
        );
    }

    #[test]
    fn test_accessors() {
        let mut e = Entry::new(ep());
        e.set_dn(Dn::new("cn=config").expect("dn must parse"));
        e.attr_set_str("nsds5replicaroot", "dc=example,dc=com");
        e.attr_set_i64("nsds5replicatimeout", 120);
        e.attr_set_bool("nsds5replicaenabled", true);

        assert_eq!(
            e.attr_get_str("nsds5replicaroot").as_deref(),
            Some("dc=example,dc=com")
        );
        assert_eq!(e.attr_get_i64("nsds5replicatimeout"), Some(120));
        assert_eq!(e.attr_get_u32("nsds5replicatimeout"), Some(120));
        assert!(e.attr_get_bool("nsds5replicaenabled"));
        assert!(e.attr_get_bool_default("missing", true));
        assert!(!e.attr_get_bool("missing"));

        e.attr_set_str("nsds5replicatimeout", "not-a-number");
        assert_eq!(e.attr_get_i64("nsds5replicatimeout"), None);

        e.assign_uniqueid();
        let id = e.uniqueid().expect("uniqueid must be set").to_string();
        assert_eq!(id.len(), 35);
        assert_eq!(id.matches('-').count(), 3);

        e.set_flag(EntryFlags::REPL_CONFLICT);
        assert!(e.flags().contains(EntryFlags::REPL_CONFLICT));
        e.clear_flag(EntryFlags::REPL_CONFLICT);
        assert!(!e.flags().contains(EntryFlags::REPL_CONFLICT));

        assert!(e.size() > 0);
    }

    #[test]
    fn test_merge_and_delete_values() {
        let mut e = Entry::parse("dn: dc=x\nmail: a@x\n", ParseFlags::empty(), &ep())
            .expect("entry must parse");
        e.merge_values("mail", vec![Value::from("a@x"), Value::from("b@x")])
            .expect("merge must succeed");
        assert_eq!(e.attr_find("mail").unwrap().present().len(), 2);

        // Removing the last value removes the attribute.
        e.delete_values("mail", &[Value::from("a@x"), Value::from("b@x")])
            .expect("delete must succeed");
        assert!(!e.has_attr("mail"));
        assert_eq!(
            e.delete_values("mail", &[Value::from("a@x")]),
            Err(OperationError::NoSuchAttribute)
        );
    }

    #[test]
    fn test_vattr_cache() {
        let epoch = ep();
        let e = Entry::parse("dn: dc=x\ncn: x\n", ParseFlags::empty(), &epoch)
            .expect("entry must parse");

        assert_eq!(e.vattr_find("memberOf"), VattrLookup::NotResolved);

        // Resolved-but-absent is a first class cached outcome.
        e.vattr_merge("memberOf", None);
        assert_eq!(e.vattr_find("memberof"), VattrLookup::ResolvedAbsent);

        // A global invalidation stales the cache without sweeping it.
        epoch.invalidate_all();
        assert_eq!(e.vattr_find("memberOf"), VattrLookup::NotResolved);

        e.vattr_merge("memberOf", Some(vec![Value::from("cn=admins,dc=x")]));
        match e.vattr_find("memberof") {
            VattrLookup::ResolvedPresent { ty, values } => {
                assert_eq!(ty, "memberOf");
                assert_eq!(values.len(), 1);
            }
            other => panic!("expected resolved present, got {other:?}"),
        }

        // Per entry invalidation.
        e.vattr_invalidate();
        assert_eq!(e.vattr_find("memberOf"), VattrLookup::NotResolved);
    }

    #[test]
    fn test_vattr_epoch_never_settles_on_zero() {
        let epoch = VattrEpoch::new();
        assert_ne!(epoch.current(), 0);
        for _ in 0..5 {
            epoch.invalidate_all();
            assert_ne!(epoch.current(), 0);
        }
    }

    #[test]
    fn test_clone_is_deep_and_cache_cold() {
        let e = Entry::parse(
            &format!("dn: dc=x\ncn;vucsn-{TEST_CSN}: bob\n"),
            ParseFlags::empty(),
            &ep(),
        )
        .expect("entry must parse");
        e.vattr_merge("memberOf", None);
        let mut dup = e.clone();
        assert_eq!(dup.dn().map(|d| d.as_str()), e.dn().map(|d| d.as_str()));
        assert_eq!(dup.maxcsn(), e.maxcsn());
        // The copy's cache starts cold.
        assert_eq!(dup.vattr_find("memberOf"), VattrLookup::NotResolved);
        // And it is independent.
        dup.attr_set_str("cn", "other");
        assert_eq!(attr_values(&e, "cn"), vec!["bob"]);
    }

    #[test]
    fn test_protected_attr_registry() {
        assert!(is_type_protected(PSEUDO_ATTR_UNHASHEDPASSWORD));
        set_attr_protected("secretAttr", true);
        assert!(is_type_protected("secretattr"));
        let e = Entry::parse("dn: dc=x\nsecretattr: hide me\ncn: x\n", ParseFlags::empty(), &ep())
            .expect("entry must parse");
        assert!(!e.to_text(DumpFlags::empty()).contains("secretattr"));
        set_attr_protected("secretAttr", false);
        assert!(!is_type_protected("secretattr"));
    }

    #[test]
    fn test_strict_dn_check() {
        let text = "dn: dc=x\nmember: not a dn at all\n";
        // Lenient: kept as-is with a warning.
        assert!(Entry::parse(text, ParseFlags::NOT_WELL_FORMED, &ep()).is_ok());
        // Strict: aborts the decode.
        assert_eq!(
            Entry::parse(text, ParseFlags::STRICT_DN, &ep()).map(|_| ()),
            Err(OperationError::InvalidDn)
        );
    }

    #[test]
    fn test_add_rdn_values_flag() {
        let e = Entry::parse(
            "dn: uid=bob,dc=x\ncn: bob\n",
            ParseFlags::ADD_RDN_VALUES | ParseFlags::NOT_WELL_FORMED,
            &ep(),
        )
        .expect("entry must parse");
        assert_eq!(attr_values(&e, "uid"), vec!["bob"]);
    }
}
