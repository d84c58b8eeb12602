//! Deterministic on-disk identity for a request.
//!
//! Two requests with the same method, host, path and query-parameter
//! set resolve to the same identity; distinct parameter sets get
//! distinct identities via a fixed-length hash suffix. Request paths
//! are sanitized before any filesystem use so traversal sequences and
//! control characters never reach the disk layout.
//!
//! Layout: `<root>/<host>[-<port>]/<method>-<encoded-path>[-<sha1-hex>]`

use hyper::Method;
use sha1::{Digest, Sha1};
use std::path::PathBuf;

/// The deterministic key addressing one stored capture.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StubIdentity {
    host_dir: String,
    file_name: String,
}

impl StubIdentity {
    /// Resolve a request to its identity. Pure: depends only on the
    /// arguments. `port` should be `None` for the default port.
    pub fn resolve(
        method: &Method,
        host: &str,
        port: Option<u16>,
        path: &str,
        query: Option<&str>,
    ) -> Self {
        let host_dir = match port {
            Some(port) => format!("{}-{port}", sanitize_component(host)),
            None => sanitize_component(host),
        };

        let sanitized = sanitize_path(path);
        let encoded = if sanitized.is_empty() {
            "_".to_string()
        } else {
            urlencoding::encode(&sanitized).into_owned()
        };

        let mut file_name = format!("{}-{}", method.as_str().to_lowercase(), encoded);
        if let Some(hash) = hash_params(query) {
            file_name.push('-');
            file_name.push_str(&hash);
        }

        Self {
            host_dir,
            file_name,
        }
    }

    pub fn host_dir(&self) -> &str {
        &self.host_dir
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// Path relative to the stub root directory.
    pub fn relative_path(&self) -> PathBuf {
        PathBuf::from(&self.host_dir).join(&self.file_name)
    }
}

/// Characters permitted in a request path before encoding. Everything
/// else (control characters, shell metacharacters, quotes) is dropped.
fn is_permitted(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '/' | '-' | '_' | '.' | '~' | '%' | '+' | '=' | ',')
}

/// Sanitize a request path for filesystem use: strip the leading slash,
/// drop disallowed characters and collapse runs of dots so traversal
/// sequences cannot survive.
fn sanitize_path(path: &str) -> String {
    let filtered: String = path
        .trim_start_matches('/')
        .chars()
        .filter(|c| is_permitted(*c))
        .collect();
    collapse_dots(&filtered)
}

fn sanitize_component(s: &str) -> String {
    let filtered: String = s
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
        .collect();
    collapse_dots(&filtered)
}

/// Collapse ".." (and longer runs) to a single dot.
fn collapse_dots(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_dot = false;
    for c in s.chars() {
        if c == '.' {
            if !prev_dot {
                out.push('.');
            }
            prev_dot = true;
        } else {
            out.push(c);
            prev_dot = false;
        }
    }
    out
}

/// Canonicalize the query string and reduce it to a fixed-length hash.
/// Absent or empty parameter sets collapse to `None` (one canonical
/// identity with no suffix).
fn hash_params(query: Option<&str>) -> Option<String> {
    let query = query?;
    let mut pairs: Vec<(&str, &str)> = query
        .split('&')
        .filter(|p| !p.is_empty())
        .map(|p| p.split_once('=').unwrap_or((p, "")))
        .collect();
    if pairs.is_empty() {
        return None;
    }
    pairs.sort_unstable();

    // Stable serialization of the sorted pairs.
    let canonical = serde_json::to_string(&pairs).expect("query pairs serialize");
    let digest = Sha1::digest(canonical.as_bytes());
    Some(digest.iter().map(|b| format!("{b:02x}")).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_is_deterministic() {
        let a = StubIdentity::resolve(&Method::GET, "api.test", None, "/users/42", Some("a=1&b=2"));
        let b = StubIdentity::resolve(&Method::GET, "api.test", None, "/users/42", Some("a=1&b=2"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_query_order_is_canonicalized() {
        let a = StubIdentity::resolve(&Method::GET, "api.test", None, "/u", Some("a=1&b=2"));
        let b = StubIdentity::resolve(&Method::GET, "api.test", None, "/u", Some("b=2&a=1"));
        assert_eq!(a, b);
    }

    #[test]
    fn test_distinct_params_distinct_identities() {
        let a = StubIdentity::resolve(&Method::GET, "api.test", None, "/u", Some("a=1"));
        let b = StubIdentity::resolve(&Method::GET, "api.test", None, "/u", Some("a=2"));
        assert_ne!(a, b);
    }

    #[test]
    fn test_absent_and_empty_query_collapse() {
        let absent = StubIdentity::resolve(&Method::GET, "api.test", None, "/u", None);
        let empty = StubIdentity::resolve(&Method::GET, "api.test", None, "/u", Some(""));
        assert_eq!(absent, empty);
        assert_eq!(absent.file_name(), "get-u");
    }

    #[test]
    fn test_method_distinguishes_identities() {
        let get = StubIdentity::resolve(&Method::GET, "api.test", None, "/u", None);
        let post = StubIdentity::resolve(&Method::POST, "api.test", None, "/u", None);
        assert_ne!(get, post);
        assert!(post.file_name().starts_with("post-"));
    }

    #[test]
    fn test_port_suffixes_host_dir() {
        let id = StubIdentity::resolve(&Method::GET, "api.test", Some(8080), "/u", None);
        assert_eq!(id.host_dir(), "api.test-8080");
        let id = StubIdentity::resolve(&Method::GET, "api.test", None, "/u", None);
        assert_eq!(id.host_dir(), "api.test");
    }

    #[test]
    fn test_root_path_uses_placeholder() {
        let id = StubIdentity::resolve(&Method::GET, "api.test", None, "/", None);
        assert_eq!(id.file_name(), "get-_");
    }

    #[test]
    fn test_path_slashes_are_encoded() {
        let id = StubIdentity::resolve(&Method::GET, "api.test", None, "/api/users/42", None);
        assert_eq!(id.file_name(), "get-api%2Fusers%2F42");
        // The whole path lives in one file name under the host directory
        assert_eq!(
            id.relative_path(),
            PathBuf::from("api.test/get-api%2Fusers%2F42")
        );
    }

    #[test]
    fn test_traversal_payloads_are_neutralized() {
        for payload in [
            "/../../etc/passwd",
            "/..%2F..%2Fetc/passwd",
            "/a/../../b",
            "/....//secret",
        ] {
            let id = StubIdentity::resolve(&Method::GET, "api.test", None, payload, None);
            let rendered = id.relative_path().to_string_lossy().into_owned();
            assert!(!rendered.contains(".."), "{payload} -> {rendered}");
        }
    }

    #[test]
    fn test_control_and_shell_characters_are_dropped() {
        let id = StubIdentity::resolve(
            &Method::GET,
            "api.test",
            None,
            "/a\0b;rm|$(x)`y'\"<z>\n",
            None,
        );
        assert_eq!(id.file_name(), "get-abrmxyz");
    }

    #[test]
    fn test_host_is_sanitized() {
        let id = StubIdentity::resolve(&Method::GET, "api/../test", None, "/u", None);
        assert!(!id.host_dir().contains('/'));
        assert!(!id.host_dir().contains(".."));
    }
}
