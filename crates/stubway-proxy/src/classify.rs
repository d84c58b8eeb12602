//! Request classification.
//!
//! Maps a request path against one host's configuration to a handling
//! mode, in strict precedence order: stubs, then backed, then tampered,
//! then the host's passthrough default. A host with no configuration at
//! all is proxied bare.

use crate::config::HostConfig;

/// How a request is to be handled. Modes carry the name of the rule
/// that matched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlingMode {
    /// Answer from a stored response.
    Stubbed(String),
    /// Forward live and capture the response for future stubbing.
    Backed(String),
    /// Reserved for in-flight rewriting; currently forwarded untouched.
    Tampered(String),
    /// Forward live, no recording.
    Passthrough,
    /// Decline to handle.
    Unhandled,
}

impl HandlingMode {
    pub fn rule_name(&self) -> Option<&str> {
        match self {
            Self::Stubbed(name) | Self::Backed(name) | Self::Tampered(name) => Some(name),
            Self::Passthrough | Self::Unhandled => None,
        }
    }
}

/// Classify a request path. First applicable mode wins.
pub fn classify(host: Option<&HostConfig>, path: &str) -> HandlingMode {
    let Some(host) = host else {
        // Unknown host: bare reverse-proxy behavior, no overrides.
        return HandlingMode::Passthrough;
    };

    if let Some(rule) = host.stubs.match_path(path) {
        return HandlingMode::Stubbed(rule.name.clone());
    }
    if let Some(rule) = host.backed.match_path(path) {
        return HandlingMode::Backed(rule.name.clone());
    }
    if let Some(rule) = host.tampered.match_path(path) {
        return HandlingMode::Tampered(rule.name.clone());
    }
    if host.passthrough {
        return HandlingMode::Passthrough;
    }
    HandlingMode::Unhandled
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use std::path::Path;

    fn host(yaml: &str) -> HostConfig {
        let config = Config::from_yaml(yaml, Path::new("test.yaml")).unwrap();
        config.hosts.values().next().unwrap().clone()
    }

    #[test]
    fn test_unknown_host_is_passthrough() {
        assert_eq!(classify(None, "/anything"), HandlingMode::Passthrough);
    }

    #[test]
    fn test_stubs_take_precedence_over_backed() {
        let host = host(
            r#"
hosts:
  api.test:
    stubs:
      "/users/:id": true
    backed:
      "/users/:id": true
"#,
        );
        assert_eq!(
            classify(Some(&host), "/users/42"),
            HandlingMode::Stubbed("/users/:id".to_string())
        );
    }

    #[test]
    fn test_backed_over_tampered_over_passthrough() {
        let host = host(
            r#"
hosts:
  api.test:
    passthrough: true
    backed:
      "/api/*": true
    tampered:
      "/api/*": true
      "/admin/*": true
"#,
        );
        assert_eq!(
            classify(Some(&host), "/api/items"),
            HandlingMode::Backed("/api/*".to_string())
        );
        assert_eq!(
            classify(Some(&host), "/admin/users"),
            HandlingMode::Tampered("/admin/*".to_string())
        );
        assert_eq!(classify(Some(&host), "/other"), HandlingMode::Passthrough);
    }

    #[test]
    fn test_no_match_no_passthrough_is_unhandled() {
        let host = host(
            r#"
hosts:
  api.test:
    passthrough: false
    stubs:
      "/users/:id": true
"#,
        );
        assert_eq!(classify(Some(&host), "/other"), HandlingMode::Unhandled);
    }

    #[test]
    fn test_disabled_stub_falls_through_to_backed() {
        let host = host(
            r#"
hosts:
  api.test:
    stubs:
      "/users/:id": false
    backed:
      "/users/:id": true
"#,
        );
        assert_eq!(
            classify(Some(&host), "/users/42"),
            HandlingMode::Backed("/users/:id".to_string())
        );
    }
}
