//! Stub storage: deterministic identities and the filesystem store.
//!
//! # Module Structure
//!
//! - `identity` - request-to-disk identity resolution
//! - `store` - capture read/write/delete with atomic visibility
//! - `responder` - replaying a stored capture as an HTTP response

mod identity;
mod responder;
mod store;

pub use identity::StubIdentity;
pub use responder::respond_with_stub;
pub use store::{CaptureHandle, StubStore};
