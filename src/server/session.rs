//! # Session - one accepted client connection.
//!
//! Wraps the split TCP stream with the pieces the server needs to enforce
//! its policies: a bounded read, an idle timestamp for eviction, and a
//! write-serialization guard so that concurrent logical writers (the session
//! loop, `reply_all` broadcasts) never interleave partial writes.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

use crate::error::ExecError;

/// One client connection and its transport state.
pub struct Session {
    id: String,
    reader: Mutex<OwnedReadHalf>,
    /// Flush guard: one writer drains at a time.
    writer: Mutex<OwnedWriteHalf>,
    last_activity: StdMutex<Instant>,
    connected: AtomicBool,
    read_size: usize,
}

impl Session {
    /// Wraps an accepted stream. `kind` prefixes the session id
    /// (`S` shell, `W` web).
    pub fn new(stream: TcpStream, peer: SocketAddr, read_size: usize, kind: &str) -> Self {
        let (reader, writer) = stream.into_split();
        Self {
            id: format!("{kind}{}:{}", peer.ip(), peer.port()),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            last_activity: StdMutex::new(Instant::now()),
            connected: AtomicBool::new(true),
            read_size: read_size.max(64),
        }
    }

    /// Session id (shown in events and `reply_all` bookkeeping).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Reads one bounded chunk and decodes it as a trimmed line.
    /// `Ok(None)` signals end-of-stream.
    pub async fn read_chunk(&self) -> Result<Option<String>, ExecError> {
        let mut buf = vec![0u8; self.read_size];
        let n = self
            .reader
            .lock()
            .await
            .read(&mut buf)
            .await
            .map_err(|e| ExecError::Network(e.to_string()))?;
        if n == 0 {
            return Ok(None);
        }
        Ok(Some(
            String::from_utf8_lossy(&buf[..n]).trim().to_string(),
        ))
    }

    /// Sends one reply line (newline-terminated), serialized on the guard.
    pub async fn send_line(&self, msg: &str) -> Result<(), ExecError> {
        self.send_bytes(format!("{msg}\n").as_bytes()).await
    }

    /// Sends raw text (prompts carry no trailing newline).
    pub async fn send_raw(&self, msg: &str) -> Result<(), ExecError> {
        self.send_bytes(msg.as_bytes()).await
    }

    async fn send_bytes(&self, bytes: &[u8]) -> Result<(), ExecError> {
        if !self.is_connected() {
            return Err(ExecError::Network("session closed".into()));
        }
        let mut writer = self.writer.lock().await;
        writer
            .write_all(bytes)
            .await
            .map_err(|e| ExecError::Network(e.to_string()))?;
        writer
            .flush()
            .await
            .map_err(|e| ExecError::Network(e.to_string()))
    }

    /// Marks client activity (resets the idle clock).
    pub fn touch(&self) {
        if let Ok(mut at) = self.last_activity.lock() {
            *at = Instant::now();
        }
    }

    /// Time since the last client activity.
    pub fn idle(&self) -> Duration {
        self.last_activity
            .lock()
            .map(|at| at.elapsed())
            .unwrap_or_default()
    }

    /// True until the session is closed.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the connection (idempotent).
    pub async fn close(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            let mut writer = self.writer.lock().await;
            let _ = writer.shutdown().await;
        }
    }
}
