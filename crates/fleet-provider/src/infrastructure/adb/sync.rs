//! File transfer over the `sync:` service.

use std::time::{SystemTime, UNIX_EPOCH};

use fleet_core::protocol::codec::decode_text;
use fleet_core::protocol::sync::{
    decode_stat, decode_sync_header, encode_done, encode_send, encode_sync_request, RemoteStat,
    MAX_DATA_CHUNK, STAT_RESPONSE_LEN, SYNC_HEADER_LEN,
};
use tracing::debug;

use super::client::AdbHostClient;
use super::connection::AdbConnection;
use super::AdbError;

impl AdbHostClient {
    async fn open_sync(&self, serial: &str) -> Result<AdbConnection, AdbError> {
        let mut conn = self.connect_device(serial).await?;
        conn.request("sync:").await?;
        Ok(conn)
    }

    /// Mode, size, and mtime of `path` on the device; all zero when the file
    /// does not exist.
    pub async fn stat(&self, serial: &str, path: &str) -> Result<RemoteStat, AdbError> {
        let mut conn = self.open_sync(serial).await?;
        conn.write_all(&encode_sync_request(b"STAT", path.as_bytes()))
            .await?;
        let mut frame = [0u8; STAT_RESPONSE_LEN];
        conn.read_exact(&mut frame).await?;
        Ok(decode_stat(&frame)?)
    }

    /// Writes `data` to `path` on the device with permission bits `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`AdbError::Protocol`] with the device's message when it
    /// rejects the transfer.
    pub async fn push(
        &self,
        serial: &str,
        data: &[u8],
        path: &str,
        mode: u32,
    ) -> Result<(), AdbError> {
        let mut conn = self.open_sync(serial).await?;
        conn.write_all(&encode_send(path, mode)).await?;
        for chunk in data.chunks(MAX_DATA_CHUNK) {
            conn.write_all(&encode_sync_request(b"DATA", chunk)).await?;
        }
        conn.write_all(&encode_done(unix_now())).await?;

        let mut header = [0u8; SYNC_HEADER_LEN];
        conn.read_exact(&mut header).await?;
        match decode_sync_header(&header) {
            (id, _) if &id == b"OKAY" => {
                debug!("pushed {} bytes to {serial}:{path} ({mode:o})", data.len());
                Ok(())
            }
            (id, len) if &id == b"FAIL" => {
                let mut message = vec![0u8; len as usize];
                conn.read_exact(&mut message).await?;
                Err(AdbError::Protocol(decode_text(message)?))
            }
            (id, _) => Err(AdbError::UnexpectedStatus(
                String::from_utf8_lossy(&id).into_owned(),
            )),
        }
    }
}

fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::infrastructure::adb::AdbAddress;

    async fn read_request(stream: &mut TcpStream) -> String {
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await.unwrap();
        let len = usize::from_str_radix(std::str::from_utf8(&prefix).unwrap(), 16).unwrap();
        let mut body = vec![0u8; len];
        stream.read_exact(&mut body).await.unwrap();
        String::from_utf8(body).unwrap()
    }

    async fn read_frame(stream: &mut TcpStream) -> ([u8; 4], Vec<u8>) {
        let mut header = [0u8; SYNC_HEADER_LEN];
        stream.read_exact(&mut header).await.unwrap();
        let (id, len) = decode_sync_header(&header);
        if &id == b"DONE" {
            return (id, Vec::new());
        }
        let mut body = vec![0u8; len as usize];
        stream.read_exact(&mut body).await.unwrap();
        (id, body)
    }

    /// Accepts one sync session, records every frame, and answers with
    /// `reply` once `DONE` (or a `STAT`) arrives.
    async fn fake_sync_device(reply: Vec<u8>) -> (AdbHostClient, Arc<Mutex<Vec<([u8; 4], Vec<u8>)>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let frames = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&frames);

        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            assert!(read_request(&mut stream).await.starts_with("host:transport:"));
            stream.write_all(b"OKAY").await.unwrap();
            assert_eq!(read_request(&mut stream).await, "sync:");
            stream.write_all(b"OKAY").await.unwrap();
            loop {
                let (id, body) = read_frame(&mut stream).await;
                log.lock().unwrap().push((id, body));
                if &id == b"DONE" || &id == b"STAT" {
                    stream.write_all(&reply).await.unwrap();
                    break;
                }
            }
        });

        let client = AdbHostClient::new(AdbAddress {
            host: "127.0.0.1".to_string(),
            port,
        });
        (client, frames)
    }

    #[tokio::test]
    async fn test_push_splits_data_into_64k_chunks() {
        // Arrange
        let mut okay = b"OKAY".to_vec();
        okay.extend_from_slice(&0u32.to_le_bytes());
        let (client, frames) = fake_sync_device(okay).await;
        let data = vec![7u8; MAX_DATA_CHUNK + 10];

        // Act
        client
            .push("abc", &data, "/data/local/tmp/minitouch", 0o755)
            .await
            .unwrap();

        // Assert
        let frames = frames.lock().unwrap();
        let ids: Vec<&[u8; 4]> = frames.iter().map(|(id, _)| id).collect();
        assert_eq!(ids, vec![b"SEND", b"DATA", b"DATA", b"DONE"]);
        assert_eq!(frames[0].1, b"/data/local/tmp/minitouch,493");
        assert_eq!(frames[1].1.len(), MAX_DATA_CHUNK);
        assert_eq!(frames[2].1.len(), 10);
    }

    #[tokio::test]
    async fn test_push_failure_carries_device_message() {
        // Arrange
        let message = b"couldn't create file: Permission denied";
        let mut fail = b"FAIL".to_vec();
        fail.extend_from_slice(&(message.len() as u32).to_le_bytes());
        fail.extend_from_slice(message);
        let (client, _) = fake_sync_device(fail).await;

        // Act
        let err = client.push("abc", b"x", "/system/x", 0o644).await.unwrap_err();

        // Assert
        assert!(
            matches!(err, AdbError::Protocol(ref m) if m == "couldn't create file: Permission denied")
        );
    }

    #[tokio::test]
    async fn test_stat_decodes_reply() {
        // Arrange
        let mut reply = b"STAT".to_vec();
        reply.extend_from_slice(&0o100755u32.to_le_bytes());
        reply.extend_from_slice(&1234u32.to_le_bytes());
        reply.extend_from_slice(&99u32.to_le_bytes());
        let (client, frames) = fake_sync_device(reply).await;

        // Act
        let stat = client.stat("abc", "/data/local/tmp/atx-agent").await.unwrap();

        // Assert
        assert_eq!(stat.size, 1234);
        assert!(stat.satisfies(1234, 0o755));
        assert_eq!(frames.lock().unwrap()[0].1, b"/data/local/tmp/atx-agent");
    }
}
