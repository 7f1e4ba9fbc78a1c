//! Distinguished name handling. A [`Dn`] is stored normalized - attribute
//! types lowercased, insignificant whitespace around separators removed,
//! escape sequences preserved - so that later comparisons are cheap. An
//! [`Rdn`] is the leading component of a Dn, decomposed into its
//! (possibly `+` joined) attribute value assertions.

use std::fmt;

use crate::error::OperationError;

/// Find the next occurrence of `sep` in `s` that is not preceded by an
/// escape character, starting at `from`.
fn find_unescaped(s: &str, sep: u8, from: usize) -> Option<usize> {
    let bytes = s.as_bytes();
    let mut i = from;
    while i < bytes.len() {
        if bytes[i] == b'\\' {
            i += 2;
            continue;
        }
        if bytes[i] == sep {
            return Some(i);
        }
        i += 1;
    }
    None
}

fn split_unescaped(s: &str, sep: u8) -> Vec<&str> {
    let mut out = Vec::new();
    let mut start = 0;
    while let Some(pos) = find_unescaped(s, sep, start) {
        out.push(&s[start..pos]);
        start = pos + 1;
    }
    out.push(&s[start..]);
    out
}

fn valid_attr_type(t: &str) -> bool {
    if t.is_empty() {
        return false;
    }
    let bytes = t.as_bytes();
    if bytes[0].is_ascii_digit() {
        // Numeric OID form.
        bytes.iter().all(|b| b.is_ascii_digit() || *b == b'.')
    } else {
        bytes[0].is_ascii_alphabetic()
            && bytes.iter().all(|b| b.is_ascii_alphanumeric() || *b == b'-')
    }
}

/// Normalize one `type=value` assertion. Types are lowercased, whitespace
/// around the separator dropped, the value kept case intact.
fn normalize_ava(ava: &str) -> Result<(String, String), OperationError> {
    let eq = find_unescaped(ava, b'=', 0).ok_or(OperationError::InvalidDn)?;
    let ty = ava[..eq].trim();
    if !valid_attr_type(ty) {
        return Err(OperationError::InvalidDn);
    }
    let val = ava[eq + 1..].trim();
    Ok((ty.to_ascii_lowercase(), val.to_string()))
}

fn normalize_component(comp: &str) -> Result<String, OperationError> {
    let avas = split_unescaped(comp, b'+');
    let mut parts = Vec::with_capacity(avas.len());
    for ava in avas {
        let (ty, val) = normalize_ava(ava)?;
        parts.push(format!("{ty}={val}"));
    }
    Ok(parts.join("+"))
}

/// An owned, normalized distinguished name.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Dn {
    norm: String,
}

impl fmt::Display for Dn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.norm)
    }
}

impl Dn {
    /// Parse and normalize. The empty string is the valid root DN.
    pub fn new(raw: &str) -> Result<Self, OperationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(Dn::default());
        }
        let comps = split_unescaped(raw, b',');
        let mut parts = Vec::with_capacity(comps.len());
        for comp in comps {
            parts.push(normalize_component(comp)?);
        }
        Ok(Dn {
            norm: parts.join(","),
        })
    }

    /// Trust the caller that `s` is already in normalized form.
    pub fn from_normalized(s: &str) -> Self {
        Dn {
            norm: s.to_string(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.norm
    }

    pub fn is_empty(&self) -> bool {
        self.norm.is_empty()
    }

    /// Case insensitive comparison of two normalized DNs.
    pub fn eq_ignore_case(&self, other: &Dn) -> bool {
        self.norm.eq_ignore_ascii_case(&other.norm)
    }

    /// Everything after the first component, or None at (or one below)
    /// the root.
    pub fn parent(&self) -> Option<Dn> {
        find_unescaped(&self.norm, b',', 0).map(|pos| Dn {
            norm: self.norm[pos + 1..].to_string(),
        })
    }

    /// The leading component of this DN.
    pub fn rdn(&self) -> Result<Rdn, OperationError> {
        let end = find_unescaped(&self.norm, b',', 0).unwrap_or(self.norm.len());
        Rdn::new(&self.norm[..end])
    }

    /// Assemble `rdn,parent`, or just the rdn below the root.
    pub fn from_rdn_and_parent(rdn: &Rdn, parent: Option<&Dn>) -> Dn {
        match parent {
            Some(p) if !p.is_empty() => Dn {
                norm: format!("{},{}", rdn.as_str(), p.as_str()),
            },
            _ => Dn {
                norm: rdn.as_str().to_string(),
            },
        }
    }
}

/// Strict validation of a DN-syntax attribute value, without keeping the
/// parse. Used by the defensive decoder when strict checking is requested.
pub fn dn_syntax_check(raw: &str) -> Result<(), OperationError> {
    Dn::new(raw).map(|_| ())
}

/// A relative distinguished name: the leading component of a DN, with its
/// attribute value assertions split out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rdn {
    norm: String,
    avas: Vec<(String, String)>,
}

impl fmt::Display for Rdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.norm)
    }
}

impl Rdn {
    pub fn new(raw: &str) -> Result<Self, OperationError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(OperationError::InvalidDn);
        }
        let mut avas = Vec::new();
        for ava in split_unescaped(raw, b'+') {
            avas.push(normalize_ava(ava)?);
        }
        let norm = avas
            .iter()
            .map(|(t, v)| format!("{t}={v}"))
            .collect::<Vec<_>>()
            .join("+");
        Ok(Rdn { norm, avas })
    }

    pub fn as_str(&self) -> &str {
        &self.norm
    }

    /// The `(type, value)` assertions of this rdn.
    pub fn avas(&self) -> &[(String, String)] {
        &self.avas
    }
}
