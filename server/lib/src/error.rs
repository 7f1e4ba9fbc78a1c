//! Error taxonomy of the entry codec and its mutation operations.
//!
//! Decode failures are fatal to the single decode call that raised them:
//! the partially built entry is dropped and the caller receives only the
//! error. Duplicate values found while decoding are *not* errors - they are
//! counted, logged and dropped by the dupcheck path.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationError {
    /// A DN or RDN failed to parse, or failed the strict syntax check.
    InvalidDn,
    /// The input could not produce an entry at all, e.g. no dn line was
    /// present before the terminating blank line.
    InvalidEntry,
    /// A change sequence number was not a valid fixed width encoding.
    InvalidCsn,
    /// The named attribute does not exist on the entry.
    NoSuchAttribute,
    /// The value being added compares equal to one already present.
    DuplicateValue,
    /// A tombstone entry's DN did not follow the uniqueid-first convention.
    TombstoneFormat,
    /// Internal invariant violation.
    Operations,
}

impl fmt::Display for OperationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationError::InvalidDn => write!(f, "invalid dn"),
            OperationError::InvalidEntry => write!(f, "invalid entry"),
            OperationError::InvalidCsn => write!(f, "invalid csn"),
            OperationError::NoSuchAttribute => write!(f, "no such attribute"),
            OperationError::DuplicateValue => write!(f, "duplicate value"),
            OperationError::TombstoneFormat => write!(f, "malformed tombstone dn"),
            OperationError::Operations => write!(f, "operations error"),
        }
    }
}

impl std::error::Error for OperationError {}
