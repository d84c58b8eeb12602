//! Configuration types for the stubway proxy.
//!
//! The config file is YAML with camelCase keys, one entry per virtual
//! host. Route sections (`stubs`, `backed`, `tampered`) are ordered
//! mappings of path pattern to rule; declaration order is the match
//! priority. Rule entries accept a boolean shorthand (`true`/`false`)
//! that normalization expands into the canonical [`RouteRule`] form.

mod snapshot;
mod watcher;

pub use snapshot::{ConfigHandle, RoutingSnapshot};
pub use watcher::spawn_config_watcher;

use crate::matcher::{CompiledPattern, PatternError};
use indexmap::IndexMap;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Reserved keys inside a route section mapping. They configure the
/// section itself instead of declaring a path pattern.
const SECTION_RESPONSE_HEADERS: &str = "responseHeaders";
const SECTION_ON_STATUS_CODE: &str = "onStatusCode";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },
    #[error("host {host:?}: {source}")]
    Pattern {
        host: String,
        #[source]
        source: PatternError,
    },
    #[error("host {host:?}, section {section:?}, entry {key:?}: {reason}")]
    Entry {
        host: String,
        section: String,
        key: String,
        reason: String,
    },
}

/// Fully normalized configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub listen: ListenConfig,
    pub stub_root: Option<PathBuf>,
    pub connection_pool: ConnectionPoolConfig,
    pub hosts: IndexMap<String, HostConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_port() -> u16 {
    3000
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

/// Upstream connection pool tuning.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionPoolConfig {
    pub connect_timeout_secs: u64,
    pub keepalive_timeout_secs: u64,
    pub idle_timeout_secs: u64,
    pub max_idle_per_host: usize,
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            keepalive_timeout_secs: 60,
            idle_timeout_secs: 90,
            max_idle_per_host: 8,
        }
    }
}

/// Routing/behavior configuration for one virtual host.
#[derive(Debug, Clone, Default)]
pub struct HostConfig {
    /// Forward unmatched requests live when true.
    pub passthrough: bool,
    /// Upstream host override.
    pub target_host: Option<String>,
    /// Upstream port override.
    pub target_port: Option<u16>,
    /// Header overrides applied to every response for this host.
    /// An empty value removes the header.
    pub response_headers: IndexMap<String, String>,
    pub stubs: RouteSection,
    pub backed: RouteSection,
    pub tampered: RouteSection,
}

/// One ordered section (`stubs`, `backed` or `tampered`) of a host.
#[derive(Debug, Clone, Default)]
pub struct RouteSection {
    /// Section-level header overrides, layered over the host-level ones.
    pub response_headers: IndexMap<String, String>,
    /// Section-wide capture rejection set.
    pub on_status_code: Vec<u16>,
    /// Rules in declaration order; first enabled match wins.
    pub rules: Vec<RouteRule>,
}

impl RouteSection {
    /// First enabled rule whose pattern matches the path.
    /// Disabled rules are skipped entirely.
    pub fn match_path(&self, path: &str) -> Option<&RouteRule> {
        self.rules
            .iter()
            .filter(|r| r.enabled)
            .find(|r| r.pattern.matches(path))
    }

    pub fn rule(&self, name: &str) -> Option<&RouteRule> {
        self.rules.iter().find(|r| r.name == name)
    }

    /// Whether an upstream status code is excluded from capture, either
    /// by the section-wide set or by the given rule's own set.
    pub fn rejects_status(&self, rule: &RouteRule, status: u16) -> bool {
        self.on_status_code.contains(&status) || rule.on_status_code.contains(&status)
    }
}

/// One named path-pattern entry within a route section.
#[derive(Debug, Clone)]
pub struct RouteRule {
    /// The pattern as declared; doubles as the rule name.
    pub name: String,
    pub pattern: CompiledPattern,
    pub enabled: bool,
    pub response_headers: IndexMap<String, String>,
    /// Replaces the replayed status code when present.
    pub status_code: Option<u16>,
    /// Upstream status codes treated as capture failures for this rule.
    pub on_status_code: Vec<u16>,
}

// ===== Raw (pre-normalization) deserialization shapes =====

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawConfig {
    #[serde(default)]
    listen: ListenConfig,
    #[serde(default)]
    stub_root: Option<PathBuf>,
    #[serde(default)]
    connection_pool: ConnectionPoolConfig,
    #[serde(default)]
    hosts: IndexMap<String, RawHostConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawHostConfig {
    #[serde(default)]
    passthrough: bool,
    #[serde(default)]
    target_host: Option<String>,
    #[serde(default)]
    target_port: Option<u16>,
    #[serde(default)]
    response_headers: IndexMap<String, String>,
    #[serde(default)]
    stubs: IndexMap<String, serde_yaml::Value>,
    #[serde(default)]
    backed: IndexMap<String, serde_yaml::Value>,
    #[serde(default)]
    tampered: IndexMap<String, serde_yaml::Value>,
}

/// Boolean-or-object shorthand for a rule entry.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawRule {
    Enabled(bool),
    Detailed(RawDetailedRule),
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
struct RawDetailedRule {
    #[serde(default = "default_true")]
    enabled: bool,
    #[serde(default)]
    response_headers: IndexMap<String, String>,
    #[serde(default)]
    status_code: Option<u16>,
    #[serde(default)]
    on_status_code: Vec<u16>,
}

fn default_true() -> bool {
    true
}

impl Config {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&contents, path)
    }

    pub fn from_yaml(contents: &str, path: &Path) -> Result<Self, ConfigError> {
        let raw: RawConfig =
            serde_yaml::from_str(contents).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;

        let mut hosts = IndexMap::with_capacity(raw.hosts.len());
        for (host_key, raw_host) in raw.hosts {
            let host = normalize_host(&host_key, raw_host)?;
            hosts.insert(host_key, host);
        }

        Ok(Self {
            listen: raw.listen,
            stub_root: raw.stub_root,
            connection_pool: raw.connection_pool,
            hosts,
        })
    }
}

/// Expand shorthand entries into canonical [`RouteRule`]s and compile
/// every pattern. Any malformed entry fails the load.
fn normalize_host(host_key: &str, raw: RawHostConfig) -> Result<HostConfig, ConfigError> {
    Ok(HostConfig {
        passthrough: raw.passthrough,
        target_host: raw.target_host,
        target_port: raw.target_port,
        response_headers: raw.response_headers,
        stubs: normalize_section(host_key, "stubs", raw.stubs)?,
        backed: normalize_section(host_key, "backed", raw.backed)?,
        tampered: normalize_section(host_key, "tampered", raw.tampered)?,
    })
}

fn normalize_section(
    host_key: &str,
    section_name: &str,
    raw: IndexMap<String, serde_yaml::Value>,
) -> Result<RouteSection, ConfigError> {
    let entry_err = |key: &str, reason: String| ConfigError::Entry {
        host: host_key.to_string(),
        section: section_name.to_string(),
        key: key.to_string(),
        reason,
    };

    let mut section = RouteSection::default();
    for (key, value) in raw {
        if key == SECTION_RESPONSE_HEADERS {
            section.response_headers = serde_yaml::from_value(value)
                .map_err(|e| entry_err(&key, format!("expected a header map: {e}")))?;
            continue;
        }
        if key == SECTION_ON_STATUS_CODE {
            section.on_status_code = serde_yaml::from_value(value)
                .map_err(|e| entry_err(&key, format!("expected a status code list: {e}")))?;
            continue;
        }

        let raw_rule: RawRule = serde_yaml::from_value(value)
            .map_err(|e| entry_err(&key, format!("expected bool or rule object: {e}")))?;
        let detailed = match raw_rule {
            RawRule::Enabled(enabled) => RawDetailedRule {
                enabled,
                response_headers: IndexMap::new(),
                status_code: None,
                on_status_code: Vec::new(),
            },
            RawRule::Detailed(d) => d,
        };

        let pattern =
            CompiledPattern::compile(&key).map_err(|source| ConfigError::Pattern {
                host: host_key.to_string(),
                source,
            })?;

        section.rules.push(RouteRule {
            name: key,
            pattern,
            enabled: detailed.enabled,
            response_headers: detailed.response_headers,
            status_code: detailed.status_code,
            on_status_code: detailed.on_status_code,
        });
    }
    Ok(section)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(yaml: &str) -> Result<Config, ConfigError> {
        Config::from_yaml(yaml, Path::new("test.yaml"))
    }

    #[test]
    fn test_parse_basic_config() {
        let config = parse(
            r#"
listen:
  port: 3000
hosts:
  api.test:
    passthrough: true
    stubs:
      "/users/:id": true
    backed:
      "/api/*": true
  localhost:
    targetHost: dev.internal
    targetPort: 8080
    passthrough: true
"#,
        )
        .unwrap();

        assert_eq!(config.listen.port, 3000);
        assert_eq!(config.hosts.len(), 2);

        let api = &config.hosts["api.test"];
        assert!(api.passthrough);
        assert_eq!(api.stubs.rules.len(), 1);
        assert_eq!(api.stubs.rules[0].name, "/users/:id");
        assert!(api.stubs.rules[0].enabled);
        assert_eq!(api.backed.rules.len(), 1);

        let local = &config.hosts["localhost"];
        assert_eq!(local.target_host.as_deref(), Some("dev.internal"));
        assert_eq!(local.target_port, Some(8080));
    }

    #[test]
    fn test_shorthand_false_disables_rule() {
        let config = parse(
            r#"
hosts:
  api.test:
    stubs:
      "/a": false
      "/b": true
"#,
        )
        .unwrap();

        let stubs = &config.hosts["api.test"].stubs;
        assert!(!stubs.rules[0].enabled);
        assert!(stubs.rules[1].enabled);
        // Disabled rules never match
        assert!(stubs.match_path("/a").is_none());
    }

    #[test]
    fn test_detailed_rule_entry() {
        let config = parse(
            r#"
hosts:
  api.test:
    backed:
      "/api/*":
        statusCode: 200
        onStatusCode: [500, 502]
        responseHeaders:
          X-Env: dev
"#,
        )
        .unwrap();

        let rule = &config.hosts["api.test"].backed.rules[0];
        assert!(rule.enabled);
        assert_eq!(rule.status_code, Some(200));
        assert_eq!(rule.on_status_code, vec![500, 502]);
        assert_eq!(rule.response_headers["X-Env"], "dev");
    }

    #[test]
    fn test_section_reserved_keys() {
        let config = parse(
            r#"
hosts:
  api.test:
    stubs:
      responseHeaders:
        Content-Type: application/json
      "/users/:id": true
    backed:
      onStatusCode: [500]
      "/api/*": true
"#,
        )
        .unwrap();

        let host = &config.hosts["api.test"];
        assert_eq!(
            host.stubs.response_headers["Content-Type"],
            "application/json"
        );
        // Reserved keys do not become rules
        assert_eq!(host.stubs.rules.len(), 1);
        assert_eq!(host.backed.on_status_code, vec![500]);

        let rule = &host.backed.rules[0];
        assert!(host.backed.rejects_status(rule, 500));
        assert!(!host.backed.rejects_status(rule, 503));
    }

    #[test]
    fn test_declaration_order_is_priority() {
        let config = parse(
            r#"
hosts:
  api.test:
    stubs:
      "/x": true
      "/:anything": true
"#,
        )
        .unwrap();

        let stubs = &config.hosts["api.test"].stubs;
        assert_eq!(stubs.match_path("/x").unwrap().name, "/x");
        assert_eq!(stubs.match_path("/y").unwrap().name, "/:anything");
    }

    #[test]
    fn test_disabled_rule_is_skipped_for_matching() {
        let config = parse(
            r#"
hosts:
  api.test:
    stubs:
      "/x": false
      "/:anything": true
"#,
        )
        .unwrap();

        // The disabled first-declared rule never matches, even though
        // its pattern would.
        let stubs = &config.hosts["api.test"].stubs;
        assert_eq!(stubs.match_path("/x").unwrap().name, "/:anything");
    }

    #[test]
    fn test_invalid_pattern_fails_load() {
        let result = parse(
            r#"
hosts:
  api.test:
    stubs:
      "no-leading-slash": true
"#,
        );
        assert!(matches!(result, Err(ConfigError::Pattern { .. })));
    }

    #[test]
    fn test_malformed_rule_entry_fails_load() {
        let result = parse(
            r#"
hosts:
  api.test:
    stubs:
      "/x": 42
"#,
        );
        assert!(matches!(result, Err(ConfigError::Entry { .. })));
    }

    #[test]
    fn test_empty_config() {
        let config = parse("{}").unwrap();
        assert!(config.hosts.is_empty());
        assert_eq!(config.listen.port, 3000);
    }
}
