//! String escaping for audit records
//!
//! Payloads captured from the wire are escaped the way MySQL escapes string
//! literals so that a record stays on one line and can be read back by a
//! human. The output is for display and storage only, it is not a quoting
//! scheme for building new statements.

/// Map a byte to the character that follows the backslash in its escape
/// sequence, or `None` if the byte passes through unchanged.
#[inline]
fn escape_char(byte: u8) -> Option<u8> {
    match byte {
        b'\r' => Some(b'r'),
        b'\n' => Some(b'n'),
        b'\\' => Some(b'\\'),
        b'\'' => Some(b'\''),
        b'"' => Some(b'"'),
        0x1a => Some(b'Z'),
        _ => None,
    }
}

/// Escape raw payload bytes in a single pass
///
/// `\r`, `\n`, `\`, `'`, `"` and 0x1A become two-byte backslash sequences;
/// every other byte is copied as-is. Bytes that are not valid UTF-8 are
/// rendered as U+FFFD.
pub fn escape(payload: &[u8]) -> String {
    if payload.is_empty() {
        return String::new();
    }

    let mut out = Vec::with_capacity(payload.len() * 2);
    for &byte in payload {
        match escape_char(byte) {
            Some(c) => {
                out.push(b'\\');
                out.push(c);
            }
            None => out.push(byte),
        }
    }

    match String::from_utf8(out) {
        Ok(s) => s,
        Err(e) => String::from_utf8_lossy(e.as_bytes()).into_owned(),
    }
}

/// Normalize `\r\n` and lone `\r` line terminators to `\n`
pub fn to_unix_line_endings(s: &str) -> String {
    if !s.contains('\r') {
        return s.to_string();
    }

    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\r' {
            if chars.peek() == Some(&'\n') {
                chars.next();
            }
            out.push('\n');
        } else {
            out.push(c);
        }
    }
    out
}

/// Escape a payload and normalize its line endings, producing the SQL
/// string stored in an audit record
pub fn escape_payload(payload: &[u8]) -> String {
    to_unix_line_endings(&escape(payload))
}

/// Reverse [`escape`] for inputs that only contain recognised sequences
pub fn unescape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('Z') => out.push('\u{1a}'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
