//! Upstream forwarding.
//!
//! Sends requests to the live upstream, rewrites headers in both
//! directions, and optionally tees the response body into the stub
//! store while it streams to the client.

use super::headers::{self, forward_headers};
use super::{HttpClient, ProxyBody};
use crate::config::{HostConfig, RouteRule, RouteSection};
use crate::stub::{CaptureHandle, StubIdentity, StubStore};
use futures::SinkExt;
use http_body_util::{BodyExt, StreamBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::http::request::Parts;
use hyper::{HeaderMap, Request, Response, Uri};
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, warn};

/// A forwarding attempt that did not produce a usable response.
///
/// Every variant is treated the same way by callers: the live answer
/// is unusable and the fallback path (stored stub, then passthrough)
/// takes over.
#[derive(Debug, Error)]
pub enum ForwardError {
    #[error("cannot derive a valid upstream target from {0:?}")]
    InvalidTarget(String),
    #[error("upstream request failed: {0}")]
    Upstream(#[from] hyper_util::client::legacy::Error),
    #[error("upstream status {0} rejected by capture policy")]
    RejectedStatus(u16),
}

/// Capture parameters for a recording forward.
pub struct CaptureTarget<'a> {
    pub store: &'a StubStore,
    pub identity: &'a StubIdentity,
    pub section: &'a RouteSection,
    pub rule: &'a RouteRule,
}

/// Resolve the upstream host and port for a request.
///
/// A per-host `targetHost`/`targetPort` wins; otherwise the request's
/// own host is dialed back, with the port taken from the request
/// authority, then from a trailing `:port` on the Origin header, then
/// defaulting to 80.
fn resolve_target(
    host_cfg: Option<&HostConfig>,
    req_host: &str,
    req_port: Option<u16>,
    req_headers: &HeaderMap,
) -> (String, u16) {
    let host = host_cfg
        .and_then(|h| h.target_host.clone())
        .unwrap_or_else(|| req_host.to_string());
    let port = host_cfg
        .and_then(|h| h.target_port)
        .or(req_port)
        .or_else(|| origin_port(req_headers))
        .unwrap_or(80);
    (host, port)
}

/// Extract a port from a trailing `:port` in the Origin header, if any.
fn origin_port(headers: &HeaderMap) -> Option<u16> {
    let origin = headers.get(hyper::header::ORIGIN)?.to_str().ok()?;
    let (_, port) = origin.rsplit_once(':')?;
    port.parse().ok()
}

/// Build the upstream request URI. A resolved target that does not
/// form a valid URI (a Host header with embedded whitespace, say) is
/// an error, never a guessed destination.
fn upstream_uri(host: &str, port: u16, parts: &Parts) -> Result<Uri, ForwardError> {
    let path_and_query = parts
        .uri
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    format!("http://{host}:{port}{path_and_query}")
        .parse()
        .map_err(|_| ForwardError::InvalidTarget(format!("{host}:{port}")))
}

fn build_upstream_request(
    parts: &Parts,
    uri: Uri,
    remote_addr: SocketAddr,
    capture: bool,
    body: ProxyBody,
) -> Request<ProxyBody> {
    let mut builder = Request::builder().method(parts.method.clone()).uri(uri);
    if let Some(dst) = builder.headers_mut() {
        *dst = forward_headers(&parts.headers, capture);
        if let Ok(value) = remote_addr.ip().to_string().parse() {
            dst.append(headers::X_FORWARDED_FOR.clone(), value);
        }
    }
    // Builder cannot fail here: method and headers are already valid.
    builder.body(body).unwrap()
}

/// Drop connection-level upstream headers, apply the host-level
/// response policy, and tag the response as having traversed the
/// proxy. The client-side connection gets its own framing; upstream
/// `connection`/`transfer-encoding` must not leak through.
fn finalize_response_headers(headers: &mut HeaderMap, host_cfg: Option<&HostConfig>) {
    for name in headers::RESPONSE_HOP_BY_HOP {
        headers.remove(name);
    }
    if let Some(cfg) = host_cfg {
        headers::apply_response_overrides(headers, &cfg.response_headers);
    }
    headers.insert(headers::VIA.clone(), headers::VALUE_STUBWAY.clone());
}

/// Forward a request upstream, streaming the request body through.
///
/// Used for passthrough and tampered traffic where no capture happens
/// and the request body never needs to be replayed.
pub async fn forward_streaming(
    client: &HttpClient,
    req: Request<Incoming>,
    remote_addr: SocketAddr,
    req_host: &str,
    req_port: Option<u16>,
    host_cfg: Option<&HostConfig>,
) -> Result<Response<ProxyBody>, ForwardError> {
    let (parts, body) = req.into_parts();
    let (host, port) = resolve_target(host_cfg, req_host, req_port, &parts.headers);
    let uri = upstream_uri(&host, port, &parts)?;
    debug!(%uri, "forwarding request upstream");

    let body = ProxyBody::new(body.map_err(std::io::Error::other));
    let upstream_req = build_upstream_request(&parts, uri, remote_addr, false, body);
    let response = client.request(upstream_req).await?;

    let (mut resp_parts, resp_body) = response.into_parts();
    finalize_response_headers(&mut resp_parts.headers, host_cfg);
    let resp_body = ProxyBody::new(resp_body.map_err(std::io::Error::other));
    Ok(Response::from_parts(resp_parts, resp_body))
}

/// Forward a buffered request upstream, optionally capturing the
/// response body into the stub store as it streams back.
///
/// The body is buffered by the caller so that a failed attempt can be
/// retried along the fallback path. When `capture` is set the response
/// status is checked against the section's rejection policy before any
/// bytes are persisted.
pub async fn forward_buffered(
    client: &HttpClient,
    parts: &Parts,
    body: Bytes,
    remote_addr: SocketAddr,
    req_host: &str,
    req_port: Option<u16>,
    host_cfg: Option<&HostConfig>,
    capture: Option<CaptureTarget<'_>>,
) -> Result<Response<ProxyBody>, ForwardError> {
    let (host, port) = resolve_target(host_cfg, req_host, req_port, &parts.headers);
    let uri = upstream_uri(&host, port, parts)?;
    debug!(%uri, capture = capture.is_some(), "forwarding request upstream");

    let upstream_req =
        build_upstream_request(parts, uri, remote_addr, capture.is_some(), super::full_body(body));
    let response = client.request(upstream_req).await?;

    let (mut resp_parts, resp_body) = response.into_parts();

    if let Some(target) = &capture {
        let status = resp_parts.status.as_u16();
        if target.section.rejects_status(target.rule, status) {
            warn!(status, "upstream status rejected, response not captured");
            return Err(ForwardError::RejectedStatus(status));
        }
    }

    finalize_response_headers(&mut resp_parts.headers, host_cfg);

    let resp_body = match capture {
        Some(target) => {
            resp_parts
                .headers
                .insert(headers::X_STUBWAY_RECORDED.clone(), headers::VALUE_TRUE.clone());
            let handle = target.store.begin_capture(target.identity);
            tee_capture(resp_body, handle)
        }
        None => ProxyBody::new(resp_body.map_err(std::io::Error::other)),
    };

    Ok(Response::from_parts(resp_parts, resp_body))
}

/// Tee an upstream body: every data frame goes both to the client and
/// to the capture handle. The capture is committed only when the
/// upstream body ends cleanly; an error or an early-disconnecting
/// client abandons it, leaving any prior capture untouched.
fn tee_capture(mut upstream: Incoming, handle: CaptureHandle) -> ProxyBody {
    let (mut tx, rx) = futures::channel::mpsc::channel::<Result<Frame<Bytes>, std::io::Error>>(16);

    tokio::spawn(async move {
        loop {
            match upstream.frame().await {
                Some(Ok(frame)) => {
                    if let Some(data) = frame.data_ref() {
                        handle.write(data.clone());
                    }
                    if tx.send(Ok(frame)).await.is_err() {
                        // Client went away; drop the handle uncommitted.
                        debug!("client disconnected mid-capture, discarding");
                        return;
                    }
                }
                Some(Err(e)) => {
                    warn!(error = %e, "upstream body failed mid-capture, discarding");
                    let _ = tx.send(Err(std::io::Error::other(e))).await;
                    return;
                }
                None => {
                    handle.commit();
                    return;
                }
            }
        }
    });

    ProxyBody::new(StreamBody::new(rx))
}
