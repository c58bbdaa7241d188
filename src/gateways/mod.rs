//! Payment gateway integration layer.
//!
//! Stateless adapters for the supported gateways plus the shared pieces they
//! are built from: normalized types, signature schemes, status mapping, and
//! the HTTP client wrapper. Business side effects never happen here; the
//! adapters produce normalized results for the webhook processor to act on.

pub mod error;
pub mod factory;
pub mod gateway;
pub mod providers;
pub mod signature;
pub mod status;
pub mod types;
pub mod utils;
