//! Frames of the bridge's `sync:` file-transfer sub-protocol.
//!
//! After a `host:transport:<serial>` + `sync:` exchange the connection
//! switches from hex-length text frames to binary frames:
//!
//! ```text
//! request:   [id:4 ASCII][len:4 u32 LE][payload:len]
//! STAT resp: ["STAT"][mode:4 u32 LE][size:4 u32 LE][mtime:4 u32 LE]
//! DATA:      ["DATA"][len:4 u32 LE][chunk:len]      (len <= 64 KiB)
//! DONE:      ["DONE"][mtime:4 u32 LE]
//! status:    ["OKAY"][0:4] | ["FAIL"][len:4 u32 LE][message:len]
//! ```
//!
//! A push is `SEND "<path>,<mode>"`, any number of `DATA` chunks, then
//! `DONE`; the device answers with a single status frame.

use crate::protocol::codec::ProtocolError;

/// Largest chunk the device accepts in a single `DATA` frame.
pub const MAX_DATA_CHUNK: usize = 64 * 1024;

/// Size of a `STAT` response frame.
pub const STAT_RESPONSE_LEN: usize = 16;

/// Size of the id + length header shared by every sync frame.
pub const SYNC_HEADER_LEN: usize = 8;

/// Metadata of a remote file as reported by `STAT`.
///
/// A missing file is reported as all zeros.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteStat {
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
}

impl RemoteStat {
    /// Returns `true` when the remote file already has `size` bytes and all
    /// permission bits in `mode`.
    ///
    /// Content is not compared: a corrupted file of the right size passes.
    pub fn satisfies(&self, size: u64, mode: u32) -> bool {
        u64::from(self.size) == size && self.mode & mode == mode
    }
}

/// Encodes a sync request frame with a 4-byte `id`.
pub fn encode_sync_request(id: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SYNC_HEADER_LEN + payload.len());
    buf.extend_from_slice(id);
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Encodes the `SEND` frame opening a push of `path` with permission `mode`.
pub fn encode_send(path: &str, mode: u32) -> Vec<u8> {
    encode_sync_request(b"SEND", format!("{path},{mode}").as_bytes())
}

/// Encodes the `DONE` frame closing a push.
pub fn encode_done(mtime: u32) -> Vec<u8> {
    let mut buf = Vec::with_capacity(SYNC_HEADER_LEN);
    buf.extend_from_slice(b"DONE");
    buf.extend_from_slice(&mtime.to_le_bytes());
    buf
}

/// Splits a sync header into its id and little-endian length.
pub fn decode_sync_header(header: &[u8; SYNC_HEADER_LEN]) -> ([u8; 4], u32) {
    let id = [header[0], header[1], header[2], header[3]];
    let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);
    (id, len)
}

/// Decodes a `STAT` response frame.
///
/// # Errors
///
/// Returns [`ProtocolError::MalformedSync`] if the frame does not start with
/// `STAT`.
pub fn decode_stat(frame: &[u8; STAT_RESPONSE_LEN]) -> Result<RemoteStat, ProtocolError> {
    if &frame[..4] != b"STAT" {
        return Err(ProtocolError::MalformedSync(format!(
            "expected STAT, got {:?}",
            String::from_utf8_lossy(&frame[..4])
        )));
    }
    let word = |i: usize| u32::from_le_bytes([frame[i], frame[i + 1], frame[i + 2], frame[i + 3]]);
    Ok(RemoteStat {
        mode: word(4),
        size: word(8),
        mtime: word(12),
    })
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sync_request_uses_little_endian_length() {
        let frame = encode_sync_request(b"STAT", b"/data/local/tmp/minicap");
        assert_eq!(&frame[..4], b"STAT");
        assert_eq!(&frame[4..8], &23u32.to_le_bytes());
        assert_eq!(&frame[8..], b"/data/local/tmp/minicap");
    }

    #[test]
    fn test_send_payload_is_path_comma_decimal_mode() {
        let frame = encode_send("/data/local/tmp/atx-agent", 0o755);
        assert_eq!(&frame[8..], b"/data/local/tmp/atx-agent,493");
    }

    #[test]
    fn test_done_carries_mtime() {
        let frame = encode_done(1_700_000_000);
        assert_eq!(&frame[..4], b"DONE");
        assert_eq!(&frame[4..], &1_700_000_000u32.to_le_bytes());
    }

    #[test]
    fn test_decode_stat_reads_mode_size_mtime() {
        // Arrange
        let mut frame = [0u8; STAT_RESPONSE_LEN];
        frame[..4].copy_from_slice(b"STAT");
        frame[4..8].copy_from_slice(&0o100755u32.to_le_bytes());
        frame[8..12].copy_from_slice(&4096u32.to_le_bytes());
        frame[12..16].copy_from_slice(&7u32.to_le_bytes());

        // Act
        let stat = decode_stat(&frame).unwrap();

        // Assert
        assert_eq!(stat.mode, 0o100755);
        assert_eq!(stat.size, 4096);
        assert_eq!(stat.mtime, 7);
    }

    #[test]
    fn test_decode_stat_rejects_other_ids() {
        let mut frame = [0u8; STAT_RESPONSE_LEN];
        frame[..4].copy_from_slice(b"FAIL");
        assert!(matches!(
            decode_stat(&frame),
            Err(ProtocolError::MalformedSync(_))
        ));
    }

    #[test]
    fn test_satisfies_checks_size_and_mode_bits() {
        let stat = RemoteStat {
            mode: 0o100755,
            size: 10,
            mtime: 0,
        };
        assert!(stat.satisfies(10, 0o755));
        assert!(stat.satisfies(10, 0o644));
        assert!(!stat.satisfies(11, 0o755));

        let readonly = RemoteStat { mode: 0o100644, ..stat };
        assert!(!readonly.satisfies(10, 0o755));
    }

    #[test]
    fn test_missing_file_never_satisfies_nonempty_artifact() {
        let missing = RemoteStat {
            mode: 0,
            size: 0,
            mtime: 0,
        };
        assert!(!missing.satisfies(1, 0o644));
    }

    #[test]
    fn test_decode_sync_header_splits_id_and_len() {
        let mut header = [0u8; SYNC_HEADER_LEN];
        header[..4].copy_from_slice(b"FAIL");
        header[4..].copy_from_slice(&12u32.to_le_bytes());
        assert_eq!(decode_sync_header(&header), (*b"FAIL", 12));
    }
}
