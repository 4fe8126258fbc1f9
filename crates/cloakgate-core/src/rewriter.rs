//! URL Rewriter (spec.md §4.5). Pure string/regex logic: split the redirect
//! id from its suffix, find emails in the suffix, strip them for BOT, and
//! join the (possibly rewritten) suffix onto the chosen destination URL.

use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use regex::Regex;

/// Separators that can start a suffix, or precede an opportunistically
/// Base64-decoded token (spec.md §4.5.2, §6).
const SUFFIX_SEPARATORS: &[char] = &['?', '#', '$', '*'];

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[A-Za-z0-9._-]+@[A-Za-z0-9._-]+\.[A-Za-z0-9_-]+")
            .expect("email regex is a fixed, valid pattern")
    })
}

/// Result of splitting the request path tail (everything after `/r/`) into
/// the redirect's public id and the suffix that follows it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitId<'a> {
    pub public_id: &'a str,
    /// Includes the leading separator character (`?`, `#`, `$`, `*`), or is
    /// empty if there was no suffix at all.
    pub suffix: &'a str,
}

/// Split `source` (everything after `/r/`, i.e. path tail + `?query` if any —
/// fragments never reach the server so are only relevant to tests that feed
/// one in directly) into a public id and its suffix.
///
/// The id ends at the first occurrence of any of `?`, `#`, `$`, `*` —
/// whichever comes first. This single rule subsumes both halves of spec.md
/// §4.5.1 ("split on `$`/`*`") and §6 ("suffix starts with `?`/`#`/`$`/`*`"):
/// ordinary query strings and fragments are just suffixes that happen to
/// start with `?`/`#` rather than a custom separator.
pub fn split_id(source: &str) -> SplitId<'_> {
    match source.find(SUFFIX_SEPARATORS) {
        Some(idx) => SplitId {
            public_id: &source[..idx],
            suffix: &source[idx..],
        },
        None => SplitId {
            public_id: source,
            suffix: "",
        },
    }
}

fn percent_decode_once(input: &str) -> String {
    percent_encoding::percent_decode_str(input)
        .decode_utf8()
        .map(|cow| cow.into_owned())
        .unwrap_or_else(|_| input.to_string())
}

fn looks_base64(token: &str) -> bool {
    token.len() >= 20
        && token
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/' || b == b'=')
}

/// Tokens immediately following a `$*?&#` separator, used for opportunistic
/// Base64 decoding (spec.md §4.5.2).
fn separator_tokens(decoded: &str) -> Vec<&str> {
    let mut tokens = Vec::new();
    let bytes = decoded.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        if matches!(bytes[i], b'$' | b'*' | b'?' | b'&' | b'#') {
            let start = i + 1;
            let mut end = start;
            while end < bytes.len() && !matches!(bytes[end], b'$' | b'*' | b'?' | b'&' | b'#') {
                end += 1;
            }
            if end > start {
                tokens.push(&decoded[start..end]);
            }
            i = end;
        } else {
            i += 1;
        }
    }
    tokens
}

/// Find every email in `suffix`, in order of first appearance, deduplicated.
/// Tolerates a single layer of URL-decoding and, if `base64_decode_enabled`,
/// opportunistic Base64 decoding of long tokens after a separator.
pub fn find_emails(suffix: &str, base64_decode_enabled: bool) -> Vec<String> {
    let decoded = percent_decode_once(suffix);
    let mut found = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for m in email_regex().find_iter(&decoded) {
        let email = m.as_str().to_string();
        if seen.insert(email.clone()) {
            found.push(email);
        }
    }

    if base64_decode_enabled {
        for token in separator_tokens(&decoded) {
            if !looks_base64(token) {
                continue;
            }
            let Ok(bytes) = STANDARD.decode(token) else {
                continue;
            };
            let Ok(text) = String::from_utf8(bytes) else {
                continue;
            };
            for m in email_regex().find_iter(&text) {
                let email = m.as_str().to_string();
                if seen.insert(email.clone()) {
                    found.push(email);
                }
            }
        }
    }

    found
}

/// The first email found in a HUMAN request's decoded suffix, if any — the
/// "captured email" of spec.md's glossary.
pub fn captured_email(suffix: &str, base64_decode_enabled: bool) -> Option<String> {
    find_emails(suffix, base64_decode_enabled).into_iter().next()
}

/// Remove every email occurrence from a query-style (`?...`) suffix and clean
/// up the query string left behind: collapse `&&`, drop a stray leading
/// `?&`, and drop now-empty `key=` fragments (spec.md §4.5.3).
fn strip_emails_from_query(suffix: &str) -> String {
    debug_assert!(suffix.starts_with('?'));
    let body = &suffix[1..];
    let stripped = email_regex().replace_all(body, "");

    let pairs: Vec<&str> = stripped
        .split('&')
        .filter(|pair| {
            let trimmed = pair.trim();
            if trimmed.is_empty() {
                return false;
            }
            match trimmed.split_once('=') {
                Some((_, value)) => !value.is_empty(),
                None => true,
            }
        })
        .collect();

    if pairs.is_empty() {
        String::new()
    } else {
        format!("?{}", pairs.join("&"))
    }
}

/// Remove every email occurrence from a non-query suffix (`#...`, `$...`,
/// `*...`). No key/value structure to clean up — just delete the matches.
fn strip_emails_plain(suffix: &str) -> String {
    email_regex().replace_all(suffix, "").into_owned()
}

/// Produce the suffix that should be appended to the BOT destination: every
/// email occurrence removed, idempotently (spec.md §4.5.3, §8 round-trip
/// property: rewriting a BOT suffix twice changes nothing the second time).
pub fn strip_emails(suffix: &str) -> String {
    if suffix.starts_with('?') {
        strip_emails_from_query(suffix)
    } else {
        strip_emails_plain(suffix)
    }
}

/// Join a (possibly rewritten) suffix onto a destination URL, preserving the
/// destination's scheme/host and the suffix's intended parameter style
/// (spec.md §4.5.4).
pub fn join_destination(destination: &str, suffix: &str) -> String {
    if suffix.is_empty() {
        return destination.to_string();
    }

    match suffix.as_bytes()[0] {
        b'?' => {
            let tail = &suffix[1..];
            if tail.is_empty() {
                destination.to_string()
            } else if destination.contains('?') {
                format!("{destination}&{tail}")
            } else {
                format!("{destination}?{tail}")
            }
        }
        b'#' => {
            let base = destination.split('#').next().unwrap_or(destination);
            format!("{base}{suffix}")
        }
        _ => {
            // `$…`, `*…`, or any other unknown form: force a trailing slash
            // so a literal `@` in e.g. `$user@host` is never parsed by a
            // downstream client as URL userinfo.
            let mut base = destination.to_string();
            if !base.ends_with('/') {
                base.push('/');
            }
            format!("{base}{suffix}")
        }
    }
}

/// Final outcome of rewriting one request's suffix onto its chosen
/// destination.
#[derive(Debug, Clone)]
pub struct RewriteOutcome {
    pub location: String,
    /// Only set for HUMAN verdicts with a captured email (spec.md §4.5.5).
    pub captured_email: Option<String>,
}

/// `parameter_format` label recorded alongside a captured email, derived
/// from the suffix's leading separator.
pub fn parameter_format_for(suffix: &str) -> &'static str {
    match suffix.as_bytes().first() {
        Some(b'?') => "query",
        Some(b'#') => "fragment",
        Some(b'$') => "dollar",
        Some(b'*') => "star",
        _ => "none",
    }
}

/// Rewrite `suffix` onto `destination` for the given verdict.
pub fn rewrite(destination: &str, suffix: &str, is_bot: bool, base64_decode_enabled: bool) -> RewriteOutcome {
    if is_bot {
        let cleaned = strip_emails(suffix);
        RewriteOutcome {
            location: join_destination(destination, &cleaned),
            captured_email: None,
        }
    } else {
        let captured = captured_email(suffix, base64_decode_enabled);
        RewriteOutcome {
            location: join_destination(destination, suffix),
            captured_email: captured,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_id_on_query() {
        let split = split_id("abc?email=x@y.io");
        assert_eq!(split.public_id, "abc");
        assert_eq!(split.suffix, "?email=x@y.io");
    }

    #[test]
    fn split_id_on_dollar_separator() {
        let split = split_id("abc$bob@corp.io");
        assert_eq!(split.public_id, "abc");
        assert_eq!(split.suffix, "$bob@corp.io");
    }

    #[test]
    fn split_id_with_no_suffix() {
        let split = split_id("abc");
        assert_eq!(split.public_id, "abc");
        assert_eq!(split.suffix, "");
    }

    #[test]
    fn finds_single_email() {
        let emails = find_emails("?email=x@y.io", false);
        assert_eq!(emails, vec!["x@y.io".to_string()]);
    }

    #[test]
    fn finds_url_encoded_email() {
        let emails = find_emails("?email=x%40y.io", false);
        assert_eq!(emails, vec!["x@y.io".to_string()]);
    }

    #[test]
    fn dedupes_repeated_emails() {
        let emails = find_emails("?a=x@y.io&b=x@y.io", false);
        assert_eq!(emails, vec!["x@y.io".to_string()]);
    }

    #[test]
    fn strips_email_and_collapses_query() {
        let cleaned = strip_emails("?email=x@y.io&utm=abc");
        assert_eq!(cleaned, "?utm=abc");
    }

    #[test]
    fn strips_email_leaving_empty_query() {
        let cleaned = strip_emails("?email=x@y.io");
        assert_eq!(cleaned, "");
    }

    #[test]
    fn strip_is_idempotent() {
        let once = strip_emails("?email=x@y.io&&utm=abc");
        let twice = strip_emails(&once);
        assert_eq!(once, twice);
    }

    #[test]
    fn join_query_onto_plain_destination() {
        let joined = join_destination("https://landing.example.com/", "?email=x@y.io");
        assert_eq!(joined, "https://landing.example.com/?email=x@y.io");
    }

    #[test]
    fn join_query_onto_destination_with_existing_query() {
        let joined = join_destination("https://landing.example.com/?ref=a", "?email=x@y.io");
        assert_eq!(
            joined,
            "https://landing.example.com/?ref=a&email=x@y.io"
        );
    }

    #[test]
    fn join_fragment_replaces_existing_fragment() {
        let joined = join_destination("https://landing.example.com/#old", "#new");
        assert_eq!(joined, "https://landing.example.com/#new");
    }

    #[test]
    fn join_dollar_forces_trailing_slash() {
        let joined = join_destination("https://landing.example.com", "$bob@corp.io");
        assert_eq!(joined, "https://landing.example.com/$bob@corp.io");
    }

    #[test]
    fn rewrite_human_preserves_suffix_verbatim() {
        let outcome = rewrite("https://landing.example.com/", "?email=x@y.io", false, false);
        assert_eq!(outcome.location, "https://landing.example.com/?email=x@y.io");
        assert_eq!(outcome.captured_email.as_deref(), Some("x@y.io"));
    }

    #[test]
    fn rewrite_bot_strips_email_and_never_captures() {
        let outcome = rewrite("https://ads.example.com/", "?email=x@y.io", true, false);
        assert_eq!(outcome.location, "https://ads.example.com/");
        assert!(outcome.captured_email.is_none());
        assert!(!outcome.location.contains('@'));
    }

    #[test]
    fn rewrite_bot_twice_is_idempotent() {
        let first = rewrite("https://ads.example.com/", "?email=x@y.io&utm=1", true, false);
        let split = split_id("ignored$irrelevant");
        let _ = split; // id splitting is not part of rewrite(); suffix comes pre-split.
        let second = rewrite(&first.location, "", true, false);
        assert_eq!(first.location, second.location);
    }
}
