//! Host-protocol framing, sync sub-protocol frames, and text parsers.

pub mod codec;
pub mod parse;
pub mod sync;

pub use codec::{decode_hex_len, encode_request, ProtocolError, Status};
pub use parse::{parse_device_table, parse_forward_list};
