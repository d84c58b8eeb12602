//! Proxy server module.
//!
//! # Module Structure
//!
//! - `server` - ProxyServer struct and accept loop
//! - `handler` - per-request decision/fallback state machine
//! - `forwarder` - live upstream calls, capture tee, failure typing
//! - `client` - shared HTTP client construction
//! - `headers` - header rewriting rules

mod client;
mod forwarder;
mod handler;
pub mod headers;
mod server;

pub use client::{create_http_client, HttpClient};
pub use forwarder::ForwardError;
pub use handler::{handle_request, RequestContext};
pub use server::ProxyServer;

use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::Response;
use std::convert::Infallible;

/// Body type used for every response the proxy produces. Stored
/// captures stream with I/O errors; upstream body errors are mapped in.
pub type ProxyBody = BoxBody<Bytes, std::io::Error>;

/// Build a full-body response from bytes.
pub fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    BoxBody::new(Full::new(bytes.into()).map_err(|never: Infallible| match never {}))
}

/// Helper to create an error response.
pub fn error_response(status: u16, message: &str) -> Response<ProxyBody> {
    let body = format!(r#"{{"error": "{message}"}}"#);
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(body))
        .unwrap()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_status_and_content_type() {
        let response = error_response(502, "Bad Gateway");
        assert_eq!(response.status(), 502);
        assert_eq!(
            response.headers().get("content-type").unwrap(),
            "application/json"
        );
    }

    #[test]
    fn test_error_response_not_found() {
        let response = error_response(404, "not handled");
        assert_eq!(response.status(), 404);
    }
}
