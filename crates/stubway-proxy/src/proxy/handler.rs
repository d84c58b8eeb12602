//! Request handling and the per-request decision state machine.
//!
//! Every request is independently classified against the current
//! routing snapshot, then routed through one of the handling modes:
//! stubbed replay, backed record-with-fallback, tampered, passthrough,
//! or a 404 when the host is configured but nothing matched.

use super::forwarder::{self, CaptureTarget};
use super::{error_response, HttpClient, ProxyBody};
use crate::classify::{classify, HandlingMode};
use crate::config::{ConfigHandle, HostConfig, RouteSection};
use crate::stub::{respond_with_stub, StubIdentity, StubStore};
use http_body_util::{BodyExt, LengthLimitError, Limited};
use hyper::body::{Bytes, Incoming};
use hyper::http::request::Parts;
use hyper::{Request, Response};
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{debug, error, warn};

/// Largest request body buffered for a backed-mode retry. Backed mode
/// needs the whole body in memory so the same request can be re-sent
/// on the passthrough fallback; bodies over this limit are refused.
const MAX_BUFFERED_REQUEST: usize = 10 * 1024 * 1024;

/// Shared state handed to every request handler.
pub struct RequestContext {
    pub client: HttpClient,
    pub store: Arc<StubStore>,
    pub config: Arc<ConfigHandle>,
}

/// Extract the request's host and optional port, preferring the URI
/// authority (absolute-form proxy requests) over the Host header.
fn request_host<B>(req: &Request<B>) -> Option<(String, Option<u16>)> {
    if let Some(authority) = req.uri().authority() {
        return Some((authority.host().to_string(), authority.port_u16()));
    }
    let host = req.headers().get(hyper::header::HOST)?.to_str().ok()?;
    match host.rsplit_once(':') {
        Some((name, port)) => match port.parse() {
            Ok(port) => Some((name.to_string(), Some(port))),
            Err(_) => Some((host.to_string(), None)),
        },
        None => Some((host.to_string(), None)),
    }
}

fn not_handled() -> Response<ProxyBody> {
    error_response(404, "no stub or route matched this request")
}

/// Handle a single proxied request.
///
/// The routing snapshot is loaded once at the top; config reloads
/// swapped in mid-flight never affect a request already in progress.
pub async fn handle_request(
    ctx: Arc<RequestContext>,
    remote_addr: SocketAddr,
    req: Request<Incoming>,
) -> Result<Response<ProxyBody>, Infallible> {
    let snapshot = ctx.config.snapshot();

    let Some((host, port)) = request_host(&req) else {
        return Ok(error_response(400, "request carries no host"));
    };
    let host_cfg = snapshot.host(&host, port).map(Arc::clone);
    let host_cfg = host_cfg.as_deref();

    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);
    let mode = classify(host_cfg, &path);
    debug!(%host, %path, ?mode, client = %remote_addr, "classified request");

    // The stub identity folds in the port only when it is explicit and
    // not the default.
    let identity_port = port.filter(|p| *p != 80);
    let identity = StubIdentity::resolve(req.method(), &host, identity_port, &path, query.as_deref());

    match mode {
        HandlingMode::Stubbed(rule_name) => {
            let section = host_cfg.map(|h| &h.stubs);
            let rule = section.and_then(|s| s.rule(&rule_name));
            match respond_with_stub(&ctx.store, &identity, host_cfg, section, rule).await {
                Ok(Some(response)) => Ok(response),
                Ok(None) => {
                    if passthrough_allowed(host_cfg) {
                        debug!(%host, %path, "stub miss, passing through");
                        forward_or_bad_gateway(&ctx, req, remote_addr, &host, port, host_cfg).await
                    } else {
                        Ok(not_handled())
                    }
                }
                Err(e) => {
                    error!(error = %e, path = %identity.relative_path().display(), "stub read failed");
                    Ok(error_response(500, "failed to read stored capture"))
                }
            }
        }
        HandlingMode::Backed(rule_name) => {
            let (parts, body) = req.into_parts();
            let body = match buffer_request_body(body).await {
                Ok(bytes) => bytes,
                Err(response) => return Ok(response),
            };
            Ok(handle_backed(
                &ctx, &rule_name, parts, body, remote_addr, &host, port, host_cfg, &identity,
            )
            .await)
        }
        HandlingMode::Tampered(_) | HandlingMode::Passthrough => {
            forward_or_bad_gateway(&ctx, req, remote_addr, &host, port, host_cfg).await
        }
        HandlingMode::Unhandled => Ok(not_handled()),
    }
}

/// Buffer a request body up to [`MAX_BUFFERED_REQUEST`], answering
/// with a ready-made error response when it cannot be held in memory.
async fn buffer_request_body<B>(body: B) -> Result<Bytes, Response<ProxyBody>>
where
    B: hyper::body::Body<Data = Bytes>,
    B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    match Limited::new(body, MAX_BUFFERED_REQUEST).collect().await {
        Ok(collected) => Ok(collected.to_bytes()),
        Err(e) if e.is::<LengthLimitError>() => {
            warn!(limit = MAX_BUFFERED_REQUEST, "request body too large to buffer");
            Err(error_response(413, "request body too large"))
        }
        Err(e) => {
            warn!(error = %e, "failed to read request body");
            Err(error_response(400, "failed to read request body"))
        }
    }
}

fn passthrough_allowed(host_cfg: Option<&HostConfig>) -> bool {
    host_cfg.map(|h| h.passthrough).unwrap_or(true)
}

async fn forward_or_bad_gateway(
    ctx: &RequestContext,
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    host: &str,
    port: Option<u16>,
    host_cfg: Option<&HostConfig>,
) -> Result<Response<ProxyBody>, Infallible> {
    match forwarder::forward_streaming(&ctx.client, req, remote_addr, host, port, host_cfg).await {
        Ok(response) => Ok(response),
        Err(e) => {
            warn!(error = %e, %host, "upstream request failed");
            Ok(error_response(502, "upstream request failed"))
        }
    }
}

/// Backed mode: try the live upstream and capture the response; on any
/// failure fall back to the last committed capture, and only then to
/// passthrough (without capturing) or a 404.
#[allow(clippy::too_many_arguments)]
async fn handle_backed(
    ctx: &RequestContext,
    rule_name: &str,
    parts: Parts,
    body: Bytes,
    remote_addr: SocketAddr,
    host: &str,
    port: Option<u16>,
    host_cfg: Option<&HostConfig>,
    identity: &StubIdentity,
) -> Response<ProxyBody> {
    let section: Option<&RouteSection> = host_cfg.map(|h| &h.backed);
    let rule = section.and_then(|s| s.rule(rule_name));

    if let Some((section, rule)) = section.zip(rule) {
        let capture = CaptureTarget {
            store: &ctx.store,
            identity,
            section,
            rule,
        };
        match forwarder::forward_buffered(
            &ctx.client,
            &parts,
            body.clone(),
            remote_addr,
            host,
            port,
            host_cfg,
            Some(capture),
        )
        .await
        {
            Ok(response) => return response,
            Err(e) => {
                warn!(error = %e, %host, "live upstream unusable, falling back to capture");
            }
        }
    }

    // Fallback: serve the last committed capture if there is one.
    match respond_with_stub(&ctx.store, identity, host_cfg, section, rule).await {
        Ok(Some(response)) => response,
        Ok(None) => {
            if passthrough_allowed(host_cfg) {
                debug!(%host, "no capture to fall back on, passing through");
                match forwarder::forward_buffered(
                    &ctx.client,
                    &parts,
                    body,
                    remote_addr,
                    host,
                    port,
                    host_cfg,
                    None,
                )
                .await
                {
                    Ok(response) => response,
                    Err(e) => {
                        warn!(error = %e, %host, "passthrough retry failed");
                        error_response(502, "upstream request failed")
                    }
                }
            } else {
                not_handled()
            }
        }
        Err(e) => {
            error!(error = %e, path = %identity.relative_path().display(), "stub read failed");
            error_response(500, "failed to read stored capture")
        }
    }
}
