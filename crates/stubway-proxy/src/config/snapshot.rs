//! Atomically swapped configuration snapshot.
//!
//! Every in-flight request loads one complete snapshot and uses it for
//! the whole request; the reload path builds a fresh snapshot and swaps
//! it in wholesale. Readers never observe a partially-updated mapping
//! and take no locks.

use super::{Config, HostConfig};
use arc_swap::ArcSwap;
use indexmap::IndexMap;
use std::sync::Arc;

/// Immutable host-key to [`HostConfig`] mapping.
#[derive(Debug, Default)]
pub struct RoutingSnapshot {
    hosts: IndexMap<String, Arc<HostConfig>>,
}

impl RoutingSnapshot {
    pub fn from_config(config: &Config) -> Self {
        let hosts = config
            .hosts
            .iter()
            .map(|(key, host)| (key.clone(), Arc::new(host.clone())))
            .collect();
        Self { hosts }
    }

    /// Look up a host config: exact `host:port` key first, bare
    /// hostname second.
    pub fn host(&self, host: &str, port: Option<u16>) -> Option<&Arc<HostConfig>> {
        if let Some(port) = port {
            if let Some(cfg) = self.hosts.get(&format!("{host}:{port}")) {
                return Some(cfg);
            }
        }
        self.hosts.get(host)
    }

    /// Configured host keys in declaration order. Consumed by the
    /// admin/PAC collaborators.
    pub fn host_keys(&self) -> impl Iterator<Item = &str> {
        self.hosts.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }
}

/// Shared handle to the live snapshot.
pub struct ConfigHandle {
    current: ArcSwap<RoutingSnapshot>,
}

impl ConfigHandle {
    pub fn new(snapshot: RoutingSnapshot) -> Self {
        Self {
            current: ArcSwap::from(Arc::new(snapshot)),
        }
    }

    /// The current snapshot. Hold the returned `Arc` for the duration
    /// of a request so a concurrent reload cannot mix configs.
    pub fn snapshot(&self) -> Arc<RoutingSnapshot> {
        self.current.load_full()
    }

    /// Replace the live snapshot wholesale.
    pub fn swap(&self, next: RoutingSnapshot) {
        self.current.store(Arc::new(next));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn snapshot(yaml: &str) -> RoutingSnapshot {
        let config = Config::from_yaml(yaml, Path::new("test.yaml")).unwrap();
        RoutingSnapshot::from_config(&config)
    }

    #[test]
    fn test_host_lookup_prefers_port_suffix_key() {
        let snap = snapshot(
            r#"
hosts:
  "api.test:8080":
    passthrough: true
  api.test:
    passthrough: false
"#,
        );

        assert!(snap.host("api.test", Some(8080)).unwrap().passthrough);
        assert!(!snap.host("api.test", Some(9090)).unwrap().passthrough);
        assert!(!snap.host("api.test", None).unwrap().passthrough);
        assert!(snap.host("other.test", None).is_none());
    }

    #[test]
    fn test_swap_replaces_wholesale() {
        let handle = ConfigHandle::new(snapshot(
            r#"
hosts:
  a.test: {passthrough: true}
"#,
        ));

        // A reader holding the old snapshot keeps seeing it after a swap.
        let before = handle.snapshot();
        handle.swap(snapshot(
            r#"
hosts:
  b.test: {passthrough: true}
"#,
        ));

        assert!(before.host("a.test", None).is_some());
        assert!(before.host("b.test", None).is_none());

        let after = handle.snapshot();
        assert!(after.host("a.test", None).is_none());
        assert!(after.host("b.test", None).is_some());
    }

    #[test]
    fn test_host_keys_in_declaration_order() {
        let snap = snapshot(
            r#"
hosts:
  z.test: {}
  a.test: {}
"#,
        );
        let keys: Vec<&str> = snap.host_keys().collect();
        assert_eq!(keys, vec!["z.test", "a.test"]);
    }
}
