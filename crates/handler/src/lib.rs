#![forbid(unsafe_code)]
//! Minimal framework every RPC-participating child links against (§4.E).
//!
//! A child builds a [`HandlerTable`], wraps it in a [`Runtime`], and calls [`Runtime::serve`].
//! Handlers that need to call another child go through the [`ChildClient`] returned by
//! [`Runtime::client`] before `serve` is called — the same stdin stream demultiplexes work
//! dispatched to this child (`request`) from replies to this child's own outbound calls
//! (`response`/`error`), so the client and the handler table share one reader task.

mod error;
mod invoke;
mod runtime;
mod table;

pub use error::HandlerError;
pub use invoke::{ChildClient, DEFAULT_INVOKE_TIMEOUT_MS};
pub use runtime::{process_id, Runtime};
pub use table::{BoxFuture, Handler, HandlerTable};
