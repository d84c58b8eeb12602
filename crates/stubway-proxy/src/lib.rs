//! Stubway: a development-time HTTP intermediary.
//!
//! Stubway sits between a client application and its upstream APIs.
//! Each request is classified against a hot-reloadable per-host
//! configuration and then stubbed from disk, forwarded live while
//! being recorded, or passed straight through. Captured responses are
//! plain files keyed by a deterministic identity derived from the
//! request shape, so they can be inspected and edited by hand.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use stubway_proxy::config::{Config, ConfigHandle, RoutingSnapshot};
//! use stubway_proxy::proxy::{create_http_client, ProxyServer, RequestContext};
//! use stubway_proxy::stub::StubStore;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_file("config.yaml")?;
//!     let handle = Arc::new(ConfigHandle::new(RoutingSnapshot::from_config(&config)));
//!     let ctx = RequestContext {
//!         client: create_http_client(&config.connection_pool),
//!         store: Arc::new(StubStore::new("./stubs")),
//!         config: handle,
//!     };
//!     let server = ProxyServer::bind(([127, 0, 0, 1], 3000).into(), ctx).await?;
//!     server.run().await
//! }
//! ```

pub mod classify;
pub mod config;
pub mod matcher;
pub mod proxy;
pub mod stub;
