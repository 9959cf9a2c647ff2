//! Identifier normalization: reduce raw targets to the canonical form policies are written in.
//!
//! Pure string transforms. No DNS resolution happens here; blocking is pattern-based on the
//! textual host.

use tollgate_core::TargetKind;
use url::Url;

/// Reduce a URL or host string to a lower-cased host.
///
/// Absolute URLs yield their host component (IPv6 hosts keep their brackets). Anything that
/// does not parse as a URL with a host is returned lower-cased and otherwise unchanged.
pub fn normalize_domain(input: &str) -> String {
    let trimmed = input.trim();
    match Url::parse(trimmed) {
        Ok(url) => match url.host_str() {
            Some(host) if !host.is_empty() => host.to_ascii_lowercase(),
            _ => trimmed.to_lowercase(),
        },
        Err(_) => trimmed.to_lowercase(),
    }
}

/// Reduce a command invocation to its lower-cased executable basename.
///
/// `"/usr/bin/FFmpeg -i in.mp4"` becomes `"ffmpeg"`.
pub fn normalize_command(input: &str) -> String {
    let first = input.split_whitespace().next().unwrap_or("");
    let base = first.rsplit(['/', '\\']).next().unwrap_or(first);
    base.to_lowercase()
}

pub fn normalize(kind: TargetKind, input: &str) -> String {
    match kind {
        TargetKind::Domain => normalize_domain(input),
        TargetKind::Command => normalize_command(input),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_reduces_to_host() {
        assert_eq!(normalize_domain("https://API.GitHub.com/repos?x=1"), "api.github.com");
        assert_eq!(normalize_domain("http://user:pw@10.0.0.1:8080/"), "10.0.0.1");
        assert_eq!(normalize_domain("http://[::1]:3000/"), "[::1]");
    }

    #[test]
    fn bare_host_is_lowercased() {
        assert_eq!(normalize_domain("Example.COM"), "example.com");
        assert_eq!(normalize_domain("*.Example.com"), "*.example.com");
    }

    #[test]
    fn url_without_host_falls_back_to_lowercase() {
        assert_eq!(normalize_domain("mailto:Someone@Example.com"), "mailto:someone@example.com");
    }

    #[test]
    fn command_strips_path_and_args() {
        assert_eq!(normalize_command("/usr/local/bin/FFmpeg -i in.mp4"), "ffmpeg");
        assert_eq!(normalize_command("  yt-dlp --version"), "yt-dlp");
        assert_eq!(normalize_command(r"C:\Tools\Git.exe status"), "git.exe");
        assert_eq!(normalize_command(""), "");
    }
}
