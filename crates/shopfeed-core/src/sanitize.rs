//! Text and URL cleanup for outbound feed fields.

use std::sync::LazyLock;

use regex::Regex;
use url::Url;

/// Host substituted for `localhost`; the remote validator rejects local hostnames.
pub const LOCALHOST_PLACEHOLDER: &str = "localhost.com";

static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").expect("tag pattern"));
static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

/// Decodes HTML entities, strips tags and collapses whitespace.
///
/// Text that is entirely upper-case is folded to lower-case; anything with
/// at least one lower-case character is left as written.
///
/// ```rust
/// use shopfeed_core::sanitize::clean_text;
///
/// assert_eq!(clean_text("<p>Tom &amp; Jerry</p>"), "Tom & Jerry");
/// assert_eq!(clean_text("RED SHIRT"), "red shirt");
/// assert_eq!(clean_text("iPhone CASE"), "iPhone CASE");
/// ```
pub fn clean_text(raw: &str) -> String {
    let decoded = html_escape::decode_html_entities(raw);
    let stripped = TAGS.replace_all(&decoded, " ");
    let collapsed = WHITESPACE.replace_all(stripped.trim(), " ").into_owned();

    if is_all_caps(&collapsed) {
        collapsed.to_lowercase()
    } else {
        collapsed
    }
}

fn is_all_caps(text: &str) -> bool {
    text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase)
}

/// Truncates to at most `max_chars` characters, on a char boundary.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].trim_end().to_string(),
        None => text.to_string(),
    }
}

/// Rewrites a `localhost` host to [`LOCALHOST_PLACEHOLDER`].
///
/// Unparseable input falls back to a literal substitution.
pub fn sanitize_url(raw: &str) -> String {
    match Url::parse(raw) {
        Ok(mut url) => {
            if url.host_str() == Some("localhost") && url.set_host(Some(LOCALHOST_PLACEHOLDER)).is_ok() {
                return url.to_string();
            }
            raw.to_string()
        }
        Err(_) => raw.replace("localhost", LOCALHOST_PLACEHOLDER),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_strips_markup() {
        assert_eq!(
            clean_text("<div><b>Soft</b>\n  cotton&nbsp;tee</div>"),
            "Soft cotton tee"
        );
        assert_eq!(clean_text("&lt;b&gt;bold&lt;/b&gt;"), "bold");
    }

    #[test]
    fn test_clean_text_case_folding() {
        assert_eq!(clean_text("BLUE JEANS 32W"), "blue jeans 32w");
        assert_eq!(clean_text("Blue Jeans"), "Blue Jeans");
        // No letters at all: nothing to fold
        assert_eq!(clean_text("12-34"), "12-34");
    }

    #[test]
    fn test_truncate_chars() {
        assert_eq!(truncate_chars("héllo world", 5), "héllo");
        assert_eq!(truncate_chars("short", 50), "short");
    }

    #[test]
    fn test_sanitize_url() {
        assert_eq!(
            sanitize_url("http://localhost/shirt.html"),
            "http://localhost.com/shirt.html"
        );
        assert_eq!(
            sanitize_url("http://localhost:8080/media/a.jpg"),
            "http://localhost.com:8080/media/a.jpg"
        );
        assert_eq!(
            sanitize_url("https://shop.example/p/1"),
            "https://shop.example/p/1"
        );
        assert_eq!(sanitize_url("localhost/x"), "localhost.com/x");
    }
}
