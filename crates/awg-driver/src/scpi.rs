//! SCPI over TCP (raw socket) transport.
//!
//! Handles connection setup, terminated command writes, raw bulk writes for
//! waveform frames, and line-based query replies.

use anyhow::{Context, Result};
use async_trait::async_trait;
use awg_core::InstrumentTransport;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// Default query timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 5000;

/// Async SCPI client for a raw-socket instrument connection.
pub struct ScpiClient {
    stream: Mutex<BufReader<TcpStream>>,
    timeout: Duration,
}

impl ScpiClient {
    /// Connect to `host:port`.
    ///
    /// `host` may be an IP address or a resolvable name.
    pub async fn connect(host: &str, port: u16) -> Result<Self> {
        let addr = format!("{}:{}", host, port);
        let stream = timeout(Duration::from_secs(5), TcpStream::connect(&addr))
            .await
            .with_context(|| format!("Connection timeout to {}", addr))?
            .with_context(|| format!("Failed to connect to {}", addr))?;

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let peer: Option<SocketAddr> = stream.peer_addr().ok();
        tracing::info!("Connected to AWG at {} ({:?})", addr, peer);

        Ok(Self {
            stream: Mutex::new(BufReader::new(stream)),
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        })
    }

    /// Set the query timeout duration.
    pub fn set_timeout(&mut self, duration: Duration) {
        self.timeout = duration;
    }

    /// Send bytes as-is.
    pub async fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        let mut stream = self.stream.lock().await;
        tracing::debug!("SCPI write: {} bytes", bytes.len());

        stream
            .get_mut()
            .write_all(bytes)
            .await
            .context("Failed to write to instrument")?;

        stream
            .get_mut()
            .flush()
            .await
            .context("Failed to flush stream")?;

        Ok(())
    }

    /// Send a query and read the trimmed reply line.
    pub async fn query_line(&self, query: &str) -> Result<String> {
        let mut stream = self.stream.lock().await;

        // Clear any pending data in the buffer
        Self::flush_input_buffer(&mut stream).await?;

        let cmd = format!("{}\n", query);
        tracing::debug!("SCPI query: {:?}", query);

        stream
            .get_mut()
            .write_all(cmd.as_bytes())
            .await
            .with_context(|| format!("Failed to write query: {}", query))?;

        stream
            .get_mut()
            .flush()
            .await
            .context("Failed to flush stream")?;

        let mut response = String::new();
        let result = timeout(self.timeout, stream.read_line(&mut response)).await;

        match result {
            Ok(Ok(0)) => anyhow::bail!("Connection closed by device"),
            Ok(Ok(_)) => {
                let trimmed = response.trim().to_string();
                tracing::debug!("SCPI response: {:?}", trimmed);
                Ok(trimmed)
            }
            Ok(Err(e)) => Err(e).context("Failed to read response"),
            Err(_) => anyhow::bail!("Timeout waiting for response to: {}", query),
        }
    }

    /// Clear any pending data from the input buffer.
    async fn flush_input_buffer(stream: &mut BufReader<TcpStream>) -> Result<()> {
        {
            let buf = stream.buffer();
            if !buf.is_empty() {
                let len = buf.len();
                tracing::debug!("Flushing {} bytes from buffer", len);
                stream.consume(len);
            }
        }

        let mut discard = vec![0u8; 256];
        loop {
            match timeout(
                Duration::from_millis(10),
                stream.get_mut().peek(&mut discard),
            )
            .await
            {
                Ok(Ok(0)) | Err(_) => break,
                Ok(Ok(n)) => {
                    let mut consume_buf = vec![0u8; n];
                    let _ = stream.get_mut().try_read(&mut consume_buf);
                    tracing::debug!("Flushed {} stale bytes from stream", n);
                }
                Ok(Err(_)) => break,
            }
        }

        Ok(())
    }
}

#[async_trait]
impl InstrumentTransport for ScpiClient {
    async fn write_raw(&self, bytes: &[u8]) -> Result<()> {
        self.write_bytes(bytes).await
    }

    async fn query(&self, command: &str) -> Result<String> {
        self.query_line(command).await
    }
}
