//! SHDR: the line-oriented text protocol between adapters and the agent.
//!
//! One received line decodes into zero or more observation inputs, or into a
//! control message (`* PING`, `* PONG <ms>`, `* key: value` agent commands).
//! Decoding never fails the connection: malformed groups are dropped with a
//! log line and sibling groups on the same line still process.

mod decoder;
mod units;

pub use decoder::{AdapterCommand, DecodedLine, DecoderOptions, ShdrDecoder};
pub use units::convert_native_units;
