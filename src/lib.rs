//! IndoWater payment reconciliation backend.
//!
//! Integrates prepaid water-credit purchases with the Midtrans and DOKU
//! payment gateways: outbound charge/status/cancel calls, inbound webhook
//! verification, idempotent credit application, and persisted retry of
//! transient webhook failures.

pub mod api;
pub mod config;
pub mod database;
pub mod error;
pub mod gateways;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod services;
pub mod workers;
