//! # URL Helpers
//!
//! Minimal, allocation-light handling of the physical URLs that flow through
//! the planner: `scheme://host/path`, `file:///path`, or a bare absolute path.
//!
//! Path comparison is purely lexical (`.`/`..`/duplicate separators are
//! folded) so that planning never touches the local filesystem and stays
//! deterministic across machines.

use crate::primitives::{FILE_URL_SCHEME, SYMLINK_URL_SCHEME};

/// The pieces of a physical URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UrlParts<'a> {
    /// Protocol without the `://` separator. `None` for bare paths.
    pub scheme: Option<&'a str>,
    /// Host (and optional port). Empty for `file:///` URLs and bare paths.
    pub host: &'a str,
    /// Absolute path component, always starting with `/` when non-empty.
    pub path: &'a str,
}

/// Split a URL into scheme, host and path.
#[must_use]
pub fn parse(url: &str) -> UrlParts<'_> {
    match url.split_once("://") {
        Some((scheme, rest)) => {
            let (host, path) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, "/"),
            };
            UrlParts {
                scheme: Some(scheme),
                host,
                path,
            }
        }
        None => UrlParts {
            scheme: None,
            host: "",
            path: url,
        },
    }
}

/// Check whether a URL is a raw file-path URL.
#[must_use]
pub fn is_file_url(url: &str) -> bool {
    url.starts_with(FILE_URL_SCHEME)
}

/// The path component of a URL.
#[must_use]
pub fn path_of(url: &str) -> &str {
    parse(url).path
}

/// Build a `file://` URL for an absolute path.
#[must_use]
pub fn file_url(path: &str) -> String {
    if path.starts_with('/') {
        format!("{FILE_URL_SCHEME}//{path}")
    } else {
        format!("{FILE_URL_SCHEME}///{path}")
    }
}

/// Append path segments to a URL or path with exactly one `/` between them.
///
/// Empty and `.` segments are skipped so a flat relative directory does not
/// leave `/./` noise in generated URLs.
#[must_use]
pub fn join<'a>(base: &str, segments: impl IntoIterator<Item = &'a str>) -> String {
    let mut out = base.trim_end_matches('/').to_string();
    for segment in segments {
        let segment = segment.trim_matches('/');
        if segment.is_empty() || segment == "." {
            continue;
        }
        out.push('/');
        out.push_str(segment);
    }
    out
}

/// Lexically normalize an absolute path.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other),
        }
    }
    format!("/{}", parts.join("/"))
}

/// The final path segment (file name) of a URL.
#[must_use]
pub fn last_segment(url: &str) -> &str {
    url.rsplit_once('/').map_or(url, |(_, name)| name)
}

/// Everything before the final path segment of a URL.
#[must_use]
pub fn parent_of(url: &str) -> &str {
    url.rsplit_once('/').map_or("", |(dir, _)| dir)
}

/// Check whether two URLs denote the same location.
///
/// Scheme and host compare case-insensitively; bare paths are treated as
/// `file` URLs; paths compare after lexical normalization.
#[must_use]
pub fn same_location(a: &str, b: &str) -> bool {
    let pa = parse(a);
    let pb = parse(b);
    let scheme_a = pa.scheme.unwrap_or("file");
    let scheme_b = pb.scheme.unwrap_or("file");
    scheme_a.eq_ignore_ascii_case(scheme_b)
        && pa.host.eq_ignore_ascii_case(pb.host)
        && normalize_path(pa.path) == normalize_path(pb.path)
}

/// Rewrite a URL into a symlink URL.
///
/// File URLs keep everything after the scheme; any other protocol has its
/// scheme and host stripped and the path placed under the symlink scheme.
#[must_use]
pub fn to_symlink_url(url: &str) -> String {
    if let Some(rest) = url.strip_prefix(FILE_URL_SCHEME) {
        return format!("{SYMLINK_URL_SCHEME}{rest}");
    }
    format!("{SYMLINK_URL_SCHEME}//{}", path_of(url))
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_protocol_url() {
        let parts = parse("gsiftp://se.example.org:2811/scratch/run/f.a");
        assert_eq!(parts.scheme, Some("gsiftp"));
        assert_eq!(parts.host, "se.example.org:2811");
        assert_eq!(parts.path, "/scratch/run/f.a");
    }

    #[test]
    fn parse_file_url_has_empty_host() {
        let parts = parse("file:///data/inputs/f.a");
        assert_eq!(parts.scheme, Some("file"));
        assert_eq!(parts.host, "");
        assert_eq!(parts.path, "/data/inputs/f.a");
    }

    #[test]
    fn parse_bare_path() {
        let parts = parse("/data/f.a");
        assert_eq!(parts.scheme, None);
        assert_eq!(parts.path, "/data/f.a");
    }

    #[test]
    fn join_skips_flat_segments() {
        assert_eq!(join("gsiftp://h/scratch/", [".", "f.a"]), "gsiftp://h/scratch/f.a");
        assert_eq!(join("/scratch", ["00/1f", "f.a"]), "/scratch/00/1f/f.a");
    }

    #[test]
    fn normalize_folds_dots() {
        assert_eq!(normalize_path("/a/./b//c/../d/"), "/a/b/d");
        assert_eq!(normalize_path("/"), "/");
    }

    #[test]
    fn same_location_is_lexical() {
        assert!(same_location("file:///a/b/../c/f", "file:///a/c/f"));
        assert!(same_location("/a/c/f", "file:///a/c/f"));
        assert!(same_location("GSIFTP://Host/x", "gsiftp://host/x"));
        assert!(!same_location("gsiftp://h1/x", "gsiftp://h2/x"));
    }

    #[test]
    fn symlink_rewrite_of_file_url_changes_scheme_only() {
        assert_eq!(to_symlink_url("file:///data/f.a"), "symlink:///data/f.a");
    }

    #[test]
    fn symlink_rewrite_strips_host() {
        assert_eq!(
            to_symlink_url("gsiftp://se.example.org/data/f.a"),
            "symlink:///data/f.a"
        );
    }

    #[test]
    fn segments() {
        assert_eq!(last_segment("file:///data/f.a"), "f.a");
        assert_eq!(parent_of("file:///data/f.a"), "file:///data");
        assert_eq!(file_url("/data/f.a"), "file:///data/f.a");
    }
}
