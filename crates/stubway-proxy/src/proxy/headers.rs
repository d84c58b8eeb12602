//! Header rewriting for forwarded and replayed responses.
//!
//! Static header names/values avoid runtime `.parse().unwrap()` calls
//! for stubway's own marker headers.

use hyper::header::{HeaderMap, HeaderName, HeaderValue};
use indexmap::IndexMap;

// Marker headers added by stubway
pub static VIA: HeaderName = HeaderName::from_static("via");
pub static X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
pub static X_STUBWAY_RECORDED: HeaderName = HeaderName::from_static("x-stubway-recorded");
pub static X_STUBWAY_REPLAYED: HeaderName = HeaderName::from_static("x-stubway-replayed");

pub static VALUE_STUBWAY: HeaderValue = HeaderValue::from_static("stubway");
pub static VALUE_TRUE: HeaderValue = HeaderValue::from_static("true");

/// Hop-by-hop headers, never forwarded upstream.
const HOP_BY_HOP: [&str; 9] = [
    "host",
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Conditional/encoding headers stripped in capture mode so the
/// upstream returns a full, human-readable body to record.
const CAPTURE_STRIPPED: [&str; 3] = ["if-modified-since", "if-none-match", "accept-encoding"];

/// Connection-level headers dropped from upstream responses before
/// forwarding; the client-facing connection does its own framing.
pub const RESPONSE_HOP_BY_HOP: [&str; 6] = [
    "connection",
    "keep-alive",
    "transfer-encoding",
    "trailer",
    "proxy-authenticate",
    "upgrade",
];

/// Copy request headers for forwarding, dropping hop-by-hop headers
/// and, in capture mode, the conditional/encoding headers.
pub fn forward_headers(src: &HeaderMap, capture: bool) -> HeaderMap {
    let mut out = HeaderMap::with_capacity(src.len());
    for (name, value) in src {
        let n = name.as_str();
        if HOP_BY_HOP.contains(&n) {
            continue;
        }
        if capture && CAPTURE_STRIPPED.contains(&n) {
            continue;
        }
        out.append(name.clone(), value.clone());
    }
    out
}

/// Apply configured response-header overrides. An empty value removes
/// the header; `Set-Cookie` values get any `Domain=` attribute stripped
/// so cookies stay valid against the local proxy's host.
pub fn apply_response_overrides(headers: &mut HeaderMap, overrides: &IndexMap<String, String>) {
    for (name, value) in overrides {
        let Ok(name) = name.parse::<HeaderName>() else {
            tracing::warn!("ignoring invalid override header name {name:?}");
            continue;
        };
        if value.is_empty() {
            headers.remove(&name);
            continue;
        }
        let value = if name == hyper::header::SET_COOKIE {
            strip_cookie_domain(value)
        } else {
            value.clone()
        };
        match HeaderValue::from_str(&value) {
            Ok(v) => {
                headers.insert(name, v);
            }
            Err(_) => tracing::warn!("ignoring invalid override value for {name}"),
        }
    }
}

/// Drop any `Domain=` attribute from a Set-Cookie value.
fn strip_cookie_domain(value: &str) -> String {
    value
        .split(';')
        .map(str::trim)
        .filter(|attr| !attr.to_ascii_lowercase().starts_with("domain="))
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn overrides(pairs: &[(&str, &str)]) -> IndexMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_hop_by_hop_headers_removed() {
        let mut src = HeaderMap::new();
        src.insert("host", "api.test".parse().unwrap());
        src.insert("connection", "keep-alive".parse().unwrap());
        src.insert("transfer-encoding", "chunked".parse().unwrap());
        src.insert("accept", "application/json".parse().unwrap());

        let out = forward_headers(&src, false);
        assert!(out.get("host").is_none());
        assert!(out.get("connection").is_none());
        assert!(out.get("transfer-encoding").is_none());
        assert_eq!(out.get("accept").unwrap(), "application/json");
    }

    #[test]
    fn test_capture_mode_strips_conditional_headers() {
        let mut src = HeaderMap::new();
        src.insert("if-modified-since", "yesterday".parse().unwrap());
        src.insert("if-none-match", "\"etag\"".parse().unwrap());
        src.insert("accept-encoding", "gzip".parse().unwrap());
        src.insert("accept", "text/html".parse().unwrap());

        let plain = forward_headers(&src, false);
        assert!(plain.get("accept-encoding").is_some());

        let capture = forward_headers(&src, true);
        assert!(capture.get("if-modified-since").is_none());
        assert!(capture.get("if-none-match").is_none());
        assert!(capture.get("accept-encoding").is_none());
        assert_eq!(capture.get("accept").unwrap(), "text/html");
    }

    #[test]
    fn test_override_sets_and_removes() {
        let mut headers = HeaderMap::new();
        headers.insert("x-old", "1".parse().unwrap());
        headers.insert("server", "upstream".parse().unwrap());

        apply_response_overrides(
            &mut headers,
            &overrides(&[("x-env", "dev"), ("server", "")]),
        );
        assert_eq!(headers.get("x-env").unwrap(), "dev");
        assert!(headers.get("server").is_none());
        assert_eq!(headers.get("x-old").unwrap(), "1");
    }

    #[test]
    fn test_later_override_wins_for_same_header() {
        let mut headers = HeaderMap::new();
        apply_response_overrides(&mut headers, &overrides(&[("x-a", "host-level")]));
        apply_response_overrides(&mut headers, &overrides(&[("x-a", "rule-level")]));
        assert_eq!(headers.get("x-a").unwrap(), "rule-level");
    }

    #[test]
    fn test_set_cookie_domain_stripped() {
        let mut headers = HeaderMap::new();
        apply_response_overrides(
            &mut headers,
            &overrides(&[(
                "set-cookie",
                "session=abc; Domain=api.test; Path=/; HttpOnly",
            )]),
        );
        assert_eq!(
            headers.get("set-cookie").unwrap(),
            "session=abc; Path=/; HttpOnly"
        );
    }
}
