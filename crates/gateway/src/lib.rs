#![forbid(unsafe_code)]
//! HTTP to RPC gateway (§4.F): translates inbound HTTP requests into broker RPCs over the
//! broker's local UDS endpoint. The gateway is never on the stdio bus — it reaches the broker
//! exactly the way any other peer does, through [`BrokerClient`], and never decides which
//! child serves a method; that's the broker's `target`-routing call.

mod client;
mod error;
mod routes;

pub use client::{BrokerClient, InvokeError};
pub use error::GatewayError;
pub use routes::{router, RpcEnvelope};
