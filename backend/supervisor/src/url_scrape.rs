//! Public URL extraction from tunnel output.

use once_cell::sync::Lazy;
use regex::Regex;

static PUBLIC_URL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"https://[a-z0-9-]+\.trycloudflare\.com").expect("public URL regex is valid")
});

/// First quick-tunnel URL in a chunk of tunnel output, if any.
pub fn extract_public_url(chunk: &str) -> Option<&str> {
    PUBLIC_URL_RE.find(chunk).map(|m| m.as_str())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_url_inside_log_banner() {
        let line = "2024-05-01T10:00:00Z INF |  https://shy-violet-river-42.trycloudflare.com  |";
        assert_eq!(
            extract_public_url(line),
            Some("https://shy-violet-river-42.trycloudflare.com")
        );
    }

    #[test]
    fn ignores_other_urls() {
        assert_eq!(extract_public_url("INF Requesting new quick Tunnel on trycloudflare.com..."), None);
        assert_eq!(extract_public_url("INF see https://developers.cloudflare.com/"), None);
        assert_eq!(extract_public_url("http://plain.trycloudflare.com"), None);
        assert_eq!(extract_public_url(""), None);
    }
}
