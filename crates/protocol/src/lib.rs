#![forbid(unsafe_code)]
//! Newline-delimited JSON envelope protocol shared by the broker and every child process.
//!
//! Every message exchanged on the stdio bus (or on the broker's local gateway endpoint) is
//! one [`Envelope`] per line: `request`, `response`, `event`, or `error`. [`LineReader`] and
//! [`LineWriter`] frame that stream without ever buffering an unbounded line, and
//! [`encode_line`]/[`decode_line`] do the pure JSON <-> `Envelope` conversion used by both
//! sides of the wire.

mod codec;
mod envelope;
mod error;

pub use codec::{decode_line, encode_line, LineReader, LineWriter, DEFAULT_MAX_LINE_BYTES};
pub use envelope::{Envelope, ErrorCode};
pub use error::ProtocolError;

#[cfg(test)]
mod tests;
