//! The Sable Directory Server backend library. This implements the record
//! model at the heart of the server - entries, their attributes and values,
//! the replication metadata threaded through them - together with the text
//! codec that moves entries between memory, storage and replication peers.

#![deny(warnings)]
#![warn(unused_extern_crates)]
// Enable some groups of clippy lints.
#![deny(clippy::suspicious)]
#![deny(clippy::perf)]
// Specific lints to enforce.
#![deny(clippy::todo)]
#![deny(clippy::unimplemented)]
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![deny(clippy::panic)]
#![deny(clippy::await_holding_lock)]
#![deny(clippy::needless_pass_by_value)]
#![deny(clippy::trivially_copy_pass_by_ref)]
#![deny(clippy::manual_let_else)]
#![allow(clippy::unreachable)]

#[macro_use]
extern crate tracing;
#[macro_use]
extern crate lazy_static;

pub mod attr;
pub mod constants;
pub mod dn;
pub mod entry;
pub mod error;
pub mod extension;
pub(crate) mod ldif;
pub mod modify;
pub mod repl;
pub mod value;
pub mod valueset;

/// A prelude of imports that should be imported by all other Sable modules
/// to help make imports cleaner.
pub mod prelude {
    pub use crate::attr::{Attr, AttrFlags, AttrList};
    pub use crate::constants::*;
    pub use crate::dn::{Dn, Rdn};
    pub use crate::entry::{
        entry_diff, is_type_protected, set_attr_protected, DumpFlags, Entry, EntryFlags,
        ParseFlags, VattrEpoch, VattrLookup,
    };
    pub use crate::error::OperationError;
    pub use crate::extension::{ExtAttrHandler, ExtSetMode, ExtStore};
    pub use crate::modify::{
        m_add, m_delete, m_delete_all, m_replace, Mod, ModOp, ModifyList,
    };
    pub use crate::repl::csn::{Csn, CsnSet, CsnType};
    pub use crate::value::{Value, ValueSyntax};
    pub use crate::valueset::ValueSet;
}
