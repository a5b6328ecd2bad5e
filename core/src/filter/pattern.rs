//! Wildcard matching for host and URI filters.

/// Matches `s` against `pattern`, where `*` matches any run of characters
/// (including empty) and `?` matches exactly one.
pub fn wildcard_match(s: &str, pattern: &str) -> bool {
    let s = s.as_bytes();
    let p = pattern.as_bytes();
    let n = p.len();

    let mut i = 0;
    let mut j = 0;
    let mut asterisk: isize = -1;
    let mut matched = 0;

    while i < s.len() {
        if j < n && p[j] == b'*' {
            matched = i;
            asterisk = j as isize;
            j += 1;
        } else if j < n && (s[i] == p[j] || p[j] == b'?') {
            i += 1;
            j += 1;
        } else if asterisk >= 0 {
            matched += 1;
            i = matched;
            j = asterisk as usize + 1;
        } else {
            return false;
        }
    }
    while j < n && p[j] == b'*' {
        j += 1;
    }
    j == n
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Straightforward recursive definition used as the oracle.
    fn reference_match(s: &[u8], p: &[u8]) -> bool {
        match (p.first(), s.first()) {
            (None, None) => true,
            (None, Some(_)) => false,
            (Some(b'*'), _) => {
                reference_match(s, &p[1..]) || (!s.is_empty() && reference_match(&s[1..], p))
            }
            (Some(b'?'), Some(_)) => reference_match(&s[1..], &p[1..]),
            (Some(&c), Some(&d)) if c == d => reference_match(&s[1..], &p[1..]),
            _ => false,
        }
    }

    #[test]
    fn literals_and_metas() {
        assert!(wildcard_match("example.com", "example.com"));
        assert!(wildcard_match("example.com", "*.com"));
        assert!(wildcard_match("example.com", "example.*"));
        assert!(wildcard_match("example.com", "ex?mple.com"));
        assert!(wildcard_match("", "*"));
        assert!(!wildcard_match("", "?"));
        assert!(!wildcard_match("example.org", "*.com"));
        assert!(wildcard_match("/api/v1/users", "/api/*/users"));
        assert!(!wildcard_match("/api/v1/admin", "/api/*/users"));
    }

    #[test]
    fn agrees_with_reference_implementation() {
        // every combination of short inputs and patterns with up to four metas
        let inputs = ["", "a", "ab", "abc", "aabbcc", "abcabc", "xaybzc"];
        let patterns = [
            "*", "?", "a*", "*a", "a?c", "*b*", "a*c", "??", "*?*", "a*b*c", "*a*b*", "****",
            "?*?*", "abc", "a*bc*", "*abc", "x?y?z?",
        ];
        for s in inputs {
            for p in patterns {
                assert_eq!(
                    wildcard_match(s, p),
                    reference_match(s.as_bytes(), p.as_bytes()),
                    "input={:?} pattern={:?}",
                    s,
                    p
                );
            }
        }
    }
}
