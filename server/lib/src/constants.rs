//! Constant names and limits shared across the entry codec.

/// Attribute type of the DN pseudo-line in the text format.
pub const ATTR_DN: &str = "dn";
/// Attribute type of the RDN pseudo-line in the text format.
pub const ATTR_RDN: &str = "rdn";
/// Operational attribute carrying the entry's full DN in storage.
pub const ATTR_ENTRYDN: &str = "entrydn";
/// Operational attribute carrying the id of the entry's parent in storage.
pub const ATTR_PARENTID: &str = "parentid";
/// The unique identifier attribute. Consumed into the entry itself on
/// decode rather than stored in the attribute list.
pub const ATTR_UNIQUEID: &str = "nsuniqueid";
pub const ATTR_OBJECTCLASS: &str = "objectclass";

pub const VALUE_LDAPSUBENTRY: &str = "ldapsubentry";
pub const VALUE_TOMBSTONE: &str = "nstombstone";

/// The fixed unique id of the replica update vector entry. Tombstone RDN
/// rewriting must not touch this entry.
pub const RUV_STORAGE_ENTRY_UNIQUEID: &str = "ffffffff-ffffffff-ffffffff-ffffffff";

/// Pseudo attribute used to carry an unhashed credential between plugins.
/// Never serialized, and routed to the entry extension store on modify.
pub const PSEUDO_ATTR_UNHASHEDPASSWORD: &str = "unhashed#user#password";

/// Number of values in a single value set after which duplicate checking
/// moves from a linear comparator scan to a btree of normalized keys.
pub const VALUE_DUPCHECK_THRESHOLD: usize = 5;

/// Upper bound on attribute value lines accepted by a single decode.
pub const ENTRY_MAX_ATTRIBUTE_VALUE_COUNT: usize = 100_000;

/// Column at which the encoder folds long lines. Continuations are
/// introduced with a newline + tab pair.
pub const TEXT_LINE_WIDTH: usize = 76;

/// Rendered length of a change sequence number: 8 hex time chars, then
/// 4 each of sequence, replica id and subsequence.
pub const CSN_STRSIZE: usize = 20;
