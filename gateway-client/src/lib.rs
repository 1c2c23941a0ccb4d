//! # Gateway Client
//!
//! Talks to remote broker-gateway instances over HTTP.
//!
//! ## Modules
//! - `transport`: The [`HttpTransport`] seam and its `reqwest` implementation.
//! - `client`: [`GatewayClient::call`], with timeout, exponential backoff and
//!   transient/permanent classification.
//! - `api`: [`BrokerApi`], the typed operations (ping, funds, positions, ...).
//! - `wire`: Remote reply shapes and their conversion into `fleet` types.

pub mod api;
pub mod client;
pub mod transport;
pub mod wire;

pub use api::BrokerApi;
pub use client::{backoff_delay, GatewayClient, GatewayConfig};
pub use transport::{HttpReply, HttpRequest, HttpTransport, ReqwestTransport, TransportError};
