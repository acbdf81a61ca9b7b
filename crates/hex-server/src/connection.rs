//! Line-oriented wrapper around one accepted TCP connection.

use std::io;
use std::net::SocketAddr;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tracing::debug;

/// Owns both halves of a client socket.
///
/// Lines are read up to `\n`; a trailing `\r` is dropped so `\n` and
/// `\r\n` clients look the same. Bytes that are not valid UTF-8 are
/// replaced rather than treated as an error.
///
/// After `close()` every read and write fails with `NotConnected`.
pub struct ConnectionHandle {
    peer_addr: SocketAddr,
    reader: Option<BufReader<OwnedReadHalf>>,
    writer: Option<OwnedWriteHalf>,
    buf: Vec<u8>,
}

impl ConnectionHandle {
    pub fn new(stream: TcpStream, peer_addr: SocketAddr) -> Self {
        // Responses are single short lines; don't let Nagle hold them back.
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {}: {}", peer_addr, e);
        }

        let (read_half, write_half) = stream.into_split();

        Self {
            peer_addr,
            reader: Some(BufReader::new(read_half)),
            writer: Some(write_half),
            buf: Vec::with_capacity(256),
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Wait for the next full line.
    ///
    /// Returns `Ok(None)` when the peer has closed its side. A final line
    /// without a terminator is still delivered before that.
    pub async fn read_line(&mut self) -> io::Result<Option<String>> {
        let reader = self.reader.as_mut().ok_or_else(not_connected)?;

        self.buf.clear();
        let n = reader.read_until(b'\n', &mut self.buf).await?;
        if n == 0 {
            return Ok(None);
        }

        if self.buf.last() == Some(&b'\n') {
            self.buf.pop();
        }
        if self.buf.last() == Some(&b'\r') {
            self.buf.pop();
        }

        Ok(Some(String::from_utf8_lossy(&self.buf).into_owned()))
    }

    /// Write `text` plus a newline and flush immediately.
    pub async fn send_line(&mut self, text: &str) -> io::Result<()> {
        let writer = self.writer.as_mut().ok_or_else(not_connected)?;

        let data = format!("{}\n", text);
        writer.write_all(data.as_bytes()).await?;
        writer.flush().await?;

        Ok(())
    }

    /// Release the socket. Only the first call does anything; it returns
    /// `true` in that case.
    pub async fn close(&mut self) -> bool {
        let writer = self.writer.take();
        let reader = self.reader.take();

        if writer.is_none() && reader.is_none() {
            return false;
        }

        if let Some(mut writer) = writer {
            if let Err(e) = writer.shutdown().await {
                debug!("Shutdown of {} failed: {}", self.peer_addr, e);
            }
        }
        // Dropping both halves closes the socket.
        drop(reader);

        true
    }
}

fn not_connected() -> io::Error {
    io::Error::new(io::ErrorKind::NotConnected, "connection closed")
}
