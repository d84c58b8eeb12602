//! Serving stored captures back to clients.

use crate::config::{HostConfig, RouteRule, RouteSection};
use crate::proxy::headers::{self, apply_response_overrides};
use crate::proxy::ProxyBody;
use crate::stub::{StubIdentity, StubStore};
use futures::StreamExt;
use http_body_util::StreamBody;
use hyper::body::Frame;
use hyper::{Response, StatusCode};
use tokio_util::io::ReaderStream;
use tracing::debug;

/// Serve the stored capture for `identity`, if one exists.
///
/// Returns `Ok(None)` when nothing has been captured for this request
/// shape; the caller decides what a miss means. The body streams from
/// disk rather than loading into memory.
///
/// Header overrides are applied host-wide first, then section-wide,
/// then per-rule, so the most specific layer wins.
pub async fn respond_with_stub(
    store: &StubStore,
    identity: &StubIdentity,
    host_cfg: Option<&HostConfig>,
    section: Option<&RouteSection>,
    rule: Option<&RouteRule>,
) -> std::io::Result<Option<Response<ProxyBody>>> {
    let Some(file) = store.open(identity).await? else {
        return Ok(None);
    };
    debug!(path = %identity.relative_path().display(), "serving stored capture");

    let status = rule
        .and_then(|r| r.status_code)
        .and_then(|code| StatusCode::from_u16(code).ok())
        .unwrap_or(StatusCode::OK);

    let stream = ReaderStream::new(file).map(|chunk| chunk.map(Frame::data));
    let mut response = Response::builder()
        .status(status)
        .body(ProxyBody::new(StreamBody::new(stream)))
        .unwrap();

    let resp_headers = response.headers_mut();
    resp_headers.insert(headers::X_STUBWAY_REPLAYED.clone(), headers::VALUE_TRUE.clone());
    if let Some(cfg) = host_cfg {
        apply_response_overrides(resp_headers, &cfg.response_headers);
    }
    if let Some(section) = section {
        apply_response_overrides(resp_headers, &section.response_headers);
    }
    if let Some(rule) = rule {
        apply_response_overrides(resp_headers, &rule.response_headers);
    }

    Ok(Some(response))
}
