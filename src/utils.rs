use std::fmt::Write;

/// Escapes a key into something safe to use as a single file name.
///
/// Anything outside of `[A-Za-z0-9._-]` becomes `%XX`, a lone `.` or `..`
/// is escaped entirely so a key can never point outside its directory.
pub fn escape_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let force = key == "." || key == "..";

    for byte in key.bytes() {
        if is_safe(byte) && !force {
            out.push(byte as char);
        } else {
            let _ = write!(out, "%{:02X}", byte);
        }
    }

    out
}

#[inline]
fn is_safe(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-')
}

/// The inverse of `escape_key`, returns `None` for names it could not have produced.
pub fn unescape_key(name: &str) -> Option<String> {
    let raw = name.as_bytes();
    let mut out = Vec::with_capacity(raw.len());

    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else if is_safe(raw[i]) {
            out.push(raw[i]);
            i += 1;
        } else {
            return None;
        }
    }

    String::from_utf8(out).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_plain_names_untouched() {
        assert_eq!(escape_key("card_sale_42_171.jpg"), "card_sale_42_171.jpg");
    }

    #[test]
    fn test_escape_path_like_names() {
        assert_eq!(escape_key("../etc/passwd"), "..%2Fetc%2Fpasswd");
        assert_eq!(escape_key(".."), "%2E%2E");
        assert_eq!(escape_key("hero bg.png"), "hero%20bg.png");
    }

    #[test]
    fn test_unescape_reverses_escape() {
        for key in ["a b/c.png", "..", "über.jpg", "plain.webp", "100%.gif"] {
            assert_eq!(unescape_key(&escape_key(key)).as_deref(), Some(key));
        }
    }

    #[test]
    fn test_unescape_rejects_bad_sequences() {
        assert_eq!(unescape_key("broken%2"), None);
        assert_eq!(unescape_key("broken%zz"), None);
        assert_eq!(unescape_key("a.jpg~tmp"), None);
    }
}
