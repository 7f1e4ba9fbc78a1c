//! The line oriented text format entries are stored and shipped in.
//!
//! A serialized entry is a run of `\n` terminated lines. Each line is
//! `type: value`, or `type:: <base64>` when the value cannot appear
//! literally. Long lines are folded at [`TEXT_LINE_WIDTH`] columns and
//! continued on the next line behind a single tab. A blank line (or the end
//! of the buffer) terminates the entry.
//!
//! The writer is built for the encoder's two pass discipline: for every
//! `put_*` there is a `size_*` that reports the exact byte count the put
//! will produce, so the output buffer can be reserved up front.

use std::borrow::Cow;

use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;

use crate::constants::TEXT_LINE_WIDTH;

/// Yield the next logical line from `rest`, joining tab continuations.
/// Returns `None` once the buffer is exhausted. The terminating `\n` is not
/// part of the returned line.
pub(crate) fn get_line<'a>(rest: &mut &'a str) -> Option<Cow<'a, str>> {
    if rest.is_empty() {
        return None;
    }
    let bytes = rest.as_bytes();
    let mut from = 0;
    let mut folded = false;
    let end;
    let next;
    loop {
        match bytes[from..].iter().position(|b| *b == b'\n') {
            Some(rel) => {
                let pos = from + rel;
                if pos + 1 < bytes.len() && bytes[pos + 1] == b'\t' {
                    folded = true;
                    from = pos + 2;
                } else {
                    end = pos;
                    next = pos + 1;
                    break;
                }
            }
            None => {
                end = bytes.len();
                next = bytes.len();
                break;
            }
        }
    }
    let line = &rest[..end];
    *rest = &rest[next..];
    if !folded {
        Some(Cow::Borrowed(line))
    } else {
        let mut out = String::with_capacity(line.len());
        let mut seg = line;
        while let Some(pos) = seg.find("\n\t") {
            out.push_str(&seg[..pos]);
            seg = &seg[pos + 2..];
        }
        out.push_str(seg);
        Some(Cow::Owned(out))
    }
}

/// Split a logical line into its attribute type and raw value bytes.
/// `None` means the line is unusable and should be skipped by the caller.
pub(crate) fn parse_line(line: &str) -> Option<(String, Vec<u8>)> {
    let colon = line.find(':')?;
    let ty = line[..colon].trim_end();
    if ty.is_empty() {
        return None;
    }
    let rest = &line[colon + 1..];
    if let Some(b64body) = rest.strip_prefix(':') {
        let body = b64body.trim_start_matches(' ');
        match B64.decode(body.as_bytes()) {
            Ok(val) => Some((ty.to_string(), val)),
            Err(_) => None,
        }
    } else {
        let body = rest.strip_prefix(' ').unwrap_or(rest);
        Some((ty.to_string(), body.as_bytes().to_vec()))
    }
}

/// Whether `val` must be base64 armoured. Minimal encoding keeps printable
/// control free ascii literal and only armours what would corrupt the line
/// structure; the default additionally armours every control byte so the
/// output is clean to read.
fn needs_base64(val: &[u8], minimal: bool) -> bool {
    match val.first() {
        None => return false,
        Some(b' ') | Some(b':') | Some(b'<') => return true,
        _ => {}
    }
    if minimal {
        val.iter()
            .any(|b| *b == 0 || *b == b'\n' || *b == b'\r' || *b >= 0x80)
    } else {
        val.iter().any(|b| *b < 0x20 || *b >= 0x7f)
    }
}

fn b64_len(n: usize) -> usize {
    n.div_ceil(3) * 4
}

/// Exact output size of [`put_type_and_value`] with the same arguments.
pub(crate) fn size_type_and_value(
    ty_len: usize,
    val: &[u8],
    nowrap: bool,
    minimal: bool,
) -> usize {
    let b64 = needs_base64(val, minimal);
    let content_len = if b64 { b64_len(val.len()) } else { val.len() };
    let sep_len = if b64 { 2 } else { 1 };
    let prefix = ty_len + sep_len + 1;
    let mut total = prefix + content_len + 1;
    if !nowrap {
        let mut col = prefix;
        for _ in 0..content_len {
            if col >= TEXT_LINE_WIDTH {
                total += 2;
                col = 1;
            }
            col += 1;
        }
    }
    total
}

/// Append one `type: value` line, folding and armouring as required.
pub(crate) fn put_type_and_value(
    out: &mut String,
    ty: &str,
    val: &[u8],
    nowrap: bool,
    minimal: bool,
) {
    let b64 = needs_base64(val, minimal);
    let content: Cow<str> = if b64 {
        Cow::Owned(B64.encode(val))
    } else {
        // needs_base64 has guaranteed printable ascii here.
        Cow::Borrowed(std::str::from_utf8(val).unwrap_or(""))
    };
    out.push_str(ty);
    out.push_str(if b64 { ":: " } else { ": " });
    if nowrap {
        out.push_str(&content);
    } else {
        let mut col = ty.len() + if b64 { 3 } else { 2 };
        for ch in content.chars() {
            if col >= TEXT_LINE_WIDTH {
                out.push('\n');
                out.push('\t');
                col = 1;
            }
            out.push(ch);
            col += 1;
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_line_folding() {
        let mut rest = "cn: value\nsn: split\n\tacross\n\tlines\n\nleftover";
        assert_eq!(get_line(&mut rest).as_deref(), Some("cn: value"));
        assert_eq!(get_line(&mut rest).as_deref(), Some("sn: splitacrosslines"));
        // The blank entry terminator comes through as an empty line.
        assert_eq!(get_line(&mut rest).as_deref(), Some(""));
        assert_eq!(get_line(&mut rest).as_deref(), Some("leftover"));
        assert_eq!(get_line(&mut rest), None);
    }

    #[test]
    fn test_parse_line_forms() {
        assert_eq!(
            parse_line("cn: bob"),
            Some(("cn".to_string(), b"bob".to_vec()))
        );
        // No space after the colon is accepted.
        assert_eq!(
            parse_line("cn:bob"),
            Some(("cn".to_string(), b"bob".to_vec()))
        );
        assert_eq!(parse_line("cn:"), Some(("cn".to_string(), Vec::new())));
        assert_eq!(
            parse_line("jpegphoto:: AAEC"),
            Some(("jpegphoto".to_string(), vec![0, 1, 2]))
        );
        assert_eq!(parse_line("no colon here"), None);
        assert_eq!(parse_line("jpegphoto:: !!notb64!!"), None);
    }

    #[test]
    fn test_put_round_trip_wrapped() {
        let long: Vec<u8> = std::iter::repeat(b"abcdefghij".to_vec())
            .take(20)
            .flatten()
            .collect();
        let mut out = String::new();
        put_type_and_value(&mut out, "description", &long, false, false);
        assert_eq!(out.len(), size_type_and_value("description".len(), &long, false, false));
        assert!(out.contains("\n\t"));

        let mut rest = out.as_str();
        let line = get_line(&mut rest).expect("no line produced");
        let (ty, val) = parse_line(&line).expect("line must parse");
        assert_eq!(ty, "description");
        assert_eq!(val, long);
    }

    #[test]
    fn test_put_base64_decisions() {
        for (val, b64) in [
            (b" leading space".to_vec(), true),
            (b":colon".to_vec(), true),
            (b"plain".to_vec(), false),
            (vec![0xc3, 0xa9], true),
            (b"inner\nnewline".to_vec(), true),
        ] {
            let mut out = String::new();
            put_type_and_value(&mut out, "t", &val, true, false);
            assert_eq!(out.starts_with("t:: "), b64, "value {val:?}");
            assert_eq!(out.len(), size_type_and_value(1, &val, true, false));

            let mut rest = out.as_str();
            let line = get_line(&mut rest).expect("no line produced");
            let (_, back) = parse_line(&line).expect("line must parse");
            assert_eq!(back, val);
        }
    }

    #[test]
    fn test_minimal_encoding_keeps_control_bytes() {
        let val = vec![b'a', 0x07, b'b'];
        let mut out = String::new();
        put_type_and_value(&mut out, "t", &val, true, true);
        assert!(out.starts_with("t: "));
        let mut out2 = String::new();
        put_type_and_value(&mut out2, "t", &val, true, false);
        assert!(out2.starts_with("t:: "));
    }
}
