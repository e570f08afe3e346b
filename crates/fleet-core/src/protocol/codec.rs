//! Framing codec for the device bridge's host protocol.
//!
//! Wire format:
//! ```text
//! request:   [len:4 lowercase hex][command:len UTF-8 bytes]
//! response:  [status:4 "OKAY" | "FAIL"][body...]
//! FAIL body: [len:4 hex][message:len UTF-8 bytes]
//! ```
//!
//! What follows an `OKAY` depends on the command: some commands reply with a
//! single hex-length-prefixed string, others stream raw bytes until the bridge
//! closes the connection.  The codec only knows about the framing; choosing
//! how to read the body is the caller's job.

use thiserror::Error;

/// Status token sent by the bridge when a request was accepted.
pub const OKAY: &[u8; 4] = b"OKAY";

/// Status token sent by the bridge when a request was rejected.
pub const FAIL: &[u8; 4] = b"FAIL";

/// Size in bytes of the length prefix and of the status token.
pub const PREFIX_LEN: usize = 4;

/// Largest command that fits in a 4-hex-digit length prefix.
pub const MAX_COMMAND_LEN: usize = 0xFFFF;

/// Errors that can occur while encoding or decoding host-protocol frames.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The command does not fit in the 4-hex-digit length prefix.
    #[error("command too long: {len} bytes (max {MAX_COMMAND_LEN})")]
    CommandTooLong { len: usize },

    /// A length prefix was not four ASCII hex digits.
    #[error("invalid hex length prefix: {0:?}")]
    InvalidLength(String),

    /// The 4-byte status token was neither `OKAY` nor `FAIL`.
    #[error("unknown status token: {0:?}")]
    UnknownStatus(String),

    /// A text payload was not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    InvalidUtf8,

    /// A binary sync frame was truncated or carried an unexpected id.
    #[error("malformed sync frame: {0}")]
    MalformedSync(String),
}

/// The 4-byte status token at the start of every host-protocol response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    Okay,
    Fail,
}

impl Status {
    /// Parses a 4-byte status token.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::UnknownStatus`] for anything other than
    /// `OKAY` or `FAIL`.
    pub fn parse(token: &[u8]) -> Result<Self, ProtocolError> {
        match token {
            t if t == OKAY => Ok(Status::Okay),
            t if t == FAIL => Ok(Status::Fail),
            other => Err(ProtocolError::UnknownStatus(
                String::from_utf8_lossy(other).into_owned(),
            )),
        }
    }
}

/// Encodes `command` as a host-protocol request frame.
///
/// # Errors
///
/// Returns [`ProtocolError::CommandTooLong`] when the command is longer than
/// `0xFFFF` bytes.
///
/// # Examples
///
/// ```rust
/// use fleet_core::protocol::encode_request;
///
/// assert_eq!(encode_request("hello").unwrap(), b"0005hello".to_vec());
/// ```
pub fn encode_request(command: &str) -> Result<Vec<u8>, ProtocolError> {
    let bytes = command.as_bytes();
    if bytes.len() > MAX_COMMAND_LEN {
        return Err(ProtocolError::CommandTooLong { len: bytes.len() });
    }
    let mut buf = Vec::with_capacity(PREFIX_LEN + bytes.len());
    buf.extend_from_slice(format!("{:04x}", bytes.len()).as_bytes());
    buf.extend_from_slice(bytes);
    Ok(buf)
}

/// Decodes a 4-hex-digit length prefix.
///
/// Both upper- and lowercase digits are accepted; the bridge itself always
/// sends lowercase but `host:version` replies have been seen in uppercase.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidLength`] if `prefix` is not exactly four
/// hex digits.
pub fn decode_hex_len(prefix: &[u8]) -> Result<usize, ProtocolError> {
    let invalid = || ProtocolError::InvalidLength(String::from_utf8_lossy(prefix).into_owned());
    if prefix.len() != PREFIX_LEN || !prefix.iter().all(u8::is_ascii_hexdigit) {
        return Err(invalid());
    }
    let text = std::str::from_utf8(prefix).map_err(|_| invalid())?;
    usize::from_str_radix(text, 16).map_err(|_| invalid())
}

/// Decodes a text payload as UTF-8.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidUtf8`] for invalid byte sequences.
pub fn decode_text(payload: Vec<u8>) -> Result<String, ProtocolError> {
    String::from_utf8(payload).map_err(|_| ProtocolError::InvalidUtf8)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
