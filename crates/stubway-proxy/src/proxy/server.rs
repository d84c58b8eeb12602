//! Proxy server and connection accept loop.

use super::handler::{handle_request, RequestContext};
use anyhow::Context;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, info};

/// The HTTP proxy server. Binds once, then serves each accepted
/// connection on its own task.
pub struct ProxyServer {
    listener: TcpListener,
    ctx: Arc<RequestContext>,
}

impl ProxyServer {
    pub async fn bind(addr: SocketAddr, ctx: RequestContext) -> anyhow::Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        Ok(Self {
            listener,
            ctx: Arc::new(ctx),
        })
    }

    /// The address actually bound, useful when binding port 0.
    pub fn local_addr(&self) -> anyhow::Result<SocketAddr> {
        self.listener
            .local_addr()
            .context("failed to read local address")
    }

    pub async fn run(self) -> anyhow::Result<()> {
        info!(addr = %self.local_addr()?, "proxy listening");
        loop {
            let (stream, remote_addr) = self
                .listener
                .accept()
                .await
                .context("failed to accept connection")?;
            let ctx = Arc::clone(&self.ctx);

            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service =
                    service_fn(move |req| handle_request(Arc::clone(&ctx), remote_addr, req));

                if let Err(e) = http1::Builder::new()
                    .serve_connection(io, service)
                    .await
                {
                    debug!(error = %e, client = %remote_addr, "connection ended with error");
                }
            });
        }
    }
}
