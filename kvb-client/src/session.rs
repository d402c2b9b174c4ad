//! # Store Session
//!
//! Purpose: One live RESP2 connection to the backing store with reusable
//! buffers and bounded I/O.
//!
//! ## Design Principles
//! 1. **Bounded I/O**: Connect, read and write each run under a timeout so an
//!    unresponsive store cannot pin a session forever.
//! 2. **Pipelining**: A batch is written in one go and its replies are read
//!    back in order.
//! 3. **Buffer Reuse**: The session keeps its own read/write buffers.

use std::time::{Duration, Instant};

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::error::{ClientError, ClientResult};
use crate::resp::{decode, encode_command, RespValue};

/// Default deadline for connect, read and write.
pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(5);

/// Deadlines applied to every store interaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub connect: Duration,
    pub read: Duration,
    pub write: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        SessionTimeouts {
            connect: DEFAULT_IO_TIMEOUT,
            read: DEFAULT_IO_TIMEOUT,
            write: DEFAULT_IO_TIMEOUT,
        }
    }
}

/// A live connection to the backing store.
pub struct Session {
    stream: TcpStream,
    read_buf: BytesMut,
    write_buf: Vec<u8>,
    timeouts: SessionTimeouts,
    last_used: Instant,
}

impl Session {
    /// Opens a single connection, without retries.
    pub async fn connect(addr: &str, timeouts: SessionTimeouts) -> ClientResult<Self> {
        let stream = timeout(timeouts.connect, TcpStream::connect(addr))
            .await
            .map_err(|_| ClientError::Timeout("connect"))??;
        // Disable Nagle to keep request latency low for small payloads.
        stream.set_nodelay(true)?;

        Ok(Session {
            stream,
            read_buf: BytesMut::with_capacity(4 * 1024),
            write_buf: Vec::with_capacity(256),
            timeouts,
            last_used: Instant::now(),
        })
    }

    /// Executes one command and returns its reply.
    pub async fn exec(&mut self, args: &[&[u8]]) -> ClientResult<RespValue> {
        self.write_buf.clear();
        encode_command(args, &mut self.write_buf);
        self.flush_writes().await?;
        let reply = self.read_reply().await?;
        self.last_used = Instant::now();
        Ok(reply)
    }

    /// Writes every command, then reads exactly one reply per command.
    pub async fn exec_pipeline(&mut self, commands: &[Vec<&[u8]>]) -> ClientResult<Vec<RespValue>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }

        self.write_buf.clear();
        for args in commands {
            encode_command(args, &mut self.write_buf);
        }
        self.flush_writes().await?;

        let mut replies = Vec::with_capacity(commands.len());
        for _ in 0..commands.len() {
            replies.push(self.read_reply().await?);
        }
        self.last_used = Instant::now();
        Ok(replies)
    }

    /// Time since the session last completed a round trip.
    pub fn idle_for(&self) -> Duration {
        self.last_used.elapsed()
    }

    async fn flush_writes(&mut self) -> ClientResult<()> {
        let deadline = self.timeouts.write;
        let stream = &mut self.stream;
        let buf = &self.write_buf;
        let write = async move {
            stream.write_all(buf).await?;
            stream.flush().await
        };
        timeout(deadline, write)
            .await
            .map_err(|_| ClientError::Timeout("write"))??;
        Ok(())
    }

    async fn read_reply(&mut self) -> ClientResult<RespValue> {
        loop {
            if let Some(value) = decode(&mut self.read_buf)? {
                return Ok(value);
            }

            let read = timeout(self.timeouts.read, self.stream.read_buf(&mut self.read_buf))
                .await
                .map_err(|_| ClientError::Timeout("read"))??;
            if read == 0 {
                return Err(ClientError::Io(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "store closed the connection",
                )));
            }
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("peer", &self.stream.peer_addr().ok())
            .field("idle_for", &self.idle_for())
            .finish()
    }
}
