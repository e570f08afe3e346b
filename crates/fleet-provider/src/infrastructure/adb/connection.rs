//! One framed connection to the adb server.

use fleet_core::protocol::codec::{decode_text, PREFIX_LEN};
use fleet_core::protocol::{decode_hex_len, encode_request, Status};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use super::AdbError;

/// A TCP connection speaking the host protocol.
///
/// The server serves one request per connection (except for `host:transport`,
/// which re-targets the same connection at a device), so callers open a new
/// `AdbConnection` per operation.
#[derive(Debug)]
pub struct AdbConnection {
    stream: TcpStream,
}

impl AdbConnection {
    /// Connects to the server at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`AdbError::Connection`] if the TCP connect fails.
    pub async fn open(host: &str, port: u16) -> Result<Self, AdbError> {
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        Ok(Self { stream })
    }

    /// Writes one length-prefixed command.
    pub async fn send_command(&mut self, command: &str) -> Result<(), AdbError> {
        trace!("adb <- {command}");
        let frame = encode_request(command)?;
        self.stream.write_all(&frame).await?;
        Ok(())
    }

    /// Reads the 4-byte status token, turning `FAIL` into
    /// [`AdbError::Protocol`] carrying the server's message.
    pub async fn check_okay(&mut self) -> Result<(), AdbError> {
        let mut token = [0u8; 4];
        self.stream.read_exact(&mut token).await?;
        match Status::parse(&token)? {
            Status::Okay => Ok(()),
            Status::Fail => {
                let message = self.read_string().await?;
                trace!("adb -> FAIL {message}");
                Err(AdbError::Protocol(message))
            }
        }
    }

    /// Sends `command` and checks for `OKAY`.
    pub async fn request(&mut self, command: &str) -> Result<(), AdbError> {
        self.send_command(command).await?;
        self.check_okay().await
    }

    /// Reads one hex-length-prefixed string.
    pub async fn read_string(&mut self) -> Result<String, AdbError> {
        let mut prefix = [0u8; PREFIX_LEN];
        self.stream.read_exact(&mut prefix).await?;
        let len = decode_hex_len(&prefix)?;
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await?;
        Ok(decode_text(payload)?)
    }

    /// Reads everything until the server closes the connection.
    pub async fn read_to_end(&mut self) -> Result<Vec<u8>, AdbError> {
        let mut buf = Vec::new();
        self.stream.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<(), AdbError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    pub async fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), AdbError> {
        self.stream.read_exact(buf).await?;
        Ok(())
    }
}
