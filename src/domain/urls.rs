//! URL work items collected for cache warm-up.

use std::collections::BTreeSet;

/// Whether `reference` starts with an RFC 3986 scheme (`https:`, `data:`, ...).
pub fn has_scheme(reference: &str) -> bool {
    let Some((scheme, _)) = reference.split_once(':') else {
        return false;
    };
    let mut chars = scheme.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Resolve a markup reference against the site's base URL.
///
/// References with a scheme are returned unchanged. Anything else, including
/// `//`-prefixed text, is joined to the base with exactly one separating
/// slash, whatever slashes either side carried.
pub fn resolve_against(base: &str, reference: &str) -> String {
    if has_scheme(reference) {
        return reference.to_string();
    }

    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        reference.trim_start_matches('/')
    )
}

/// Remove surrounding whitespace and one layer of matching quotes.
pub fn strip_quotes(raw: &str) -> &str {
    let trimmed = raw.trim();
    for quote in ['"', '\''] {
        if let Some(inner) = trimmed
            .strip_prefix(quote)
            .and_then(|rest| rest.strip_suffix(quote))
        {
            return inner.trim();
        }
    }
    trimmed
}

/// Only plain web URLs are worth warming.
pub fn is_fetchable(url: &str) -> bool {
    let lower = url.get(..8).unwrap_or(url).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Deduplicated, deterministically ordered set of URLs to fetch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UrlSet {
    urls: BTreeSet<String>,
}

impl UrlSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a raw markup reference and insert it when it names a web URL.
    ///
    /// Empty references, in-page fragments and non-HTTP schemes are dropped.
    pub fn insert_reference(&mut self, base: &str, raw: &str) -> bool {
        let reference = strip_quotes(raw);
        if reference.is_empty() || reference.starts_with('#') {
            return false;
        }
        let resolved = resolve_against(base, reference);
        if !is_fetchable(&resolved) {
            return false;
        }
        self.urls.insert(resolved)
    }

    pub fn len(&self) -> usize {
        self.urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.urls.is_empty()
    }

    pub fn into_vec(self) -> Vec<String> {
        self.urls.into_iter().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "https://example.com";

    #[test]
    fn absolute_urls_pass_through() {
        let url = "https://cdn.example.net/app.js?v=2";
        assert_eq!(resolve_against(BASE, url), url);
        assert_eq!(resolve_against(BASE, &resolve_against(BASE, url)), url);
    }

    #[test]
    fn rooted_reference_gets_single_slash() {
        assert_eq!(
            resolve_against(BASE, "/foo/bar.css"),
            "https://example.com/foo/bar.css"
        );
    }

    #[test]
    fn double_slash_reference_stays_on_the_site() {
        assert_eq!(
            resolve_against(BASE, "//img/a.png"),
            "https://example.com/img/a.png"
        );
        assert_eq!(resolve_against(BASE, "//"), "https://example.com/");
    }

    #[test]
    fn bare_reference_is_joined_to_base() {
        assert_eq!(resolve_against(BASE, "foo.js"), "https://example.com/foo.js");
        assert_eq!(
            resolve_against("https://example.com/", "foo.js"),
            "https://example.com/foo.js"
        );
    }

    #[test]
    fn trailing_and_leading_slashes_collapse() {
        assert_eq!(
            resolve_against("https://example.com//", "///img/a.png"),
            "https://example.com/img/a.png"
        );
    }

    #[test]
    fn resolution_is_idempotent() {
        let once = resolve_against(BASE, "css/site.css");
        assert_eq!(resolve_against(BASE, &once), once);
    }

    #[test]
    fn scheme_detection() {
        assert!(has_scheme("https://a"));
        assert!(has_scheme("data:image/png;base64,AAA"));
        assert!(has_scheme("mailto:me@example.com"));
        assert!(!has_scheme("/a:b"));
        assert!(!has_scheme("img/a.png"));
        assert!(!has_scheme("1http://nope"));
    }

    #[test]
    fn quotes_are_stripped() {
        assert_eq!(strip_quotes(" 'a.css' "), "a.css");
        assert_eq!(strip_quotes("\"b.css\""), "b.css");
        assert_eq!(strip_quotes("c.css"), "c.css");
        assert_eq!(strip_quotes("'mismatched\""), "'mismatched\"");
    }

    #[test]
    fn set_drops_duplicates_and_unfetchable_references() {
        let mut set = UrlSet::new();
        assert!(set.insert_reference(BASE, "/css/site.css"));
        assert!(!set.insert_reference(BASE, "'/css/site.css'"));
        assert!(!set.insert_reference(BASE, "https://example.com/css/site.css"));
        assert!(!set.insert_reference(BASE, "#top"));
        assert!(!set.insert_reference(BASE, "data:image/png;base64,AAAA"));
        assert!(!set.insert_reference(BASE, "mailto:me@example.com"));
        assert!(!set.insert_reference(BASE, "  "));
        assert_eq!(set.into_vec(), vec!["https://example.com/css/site.css"]);
    }
}
