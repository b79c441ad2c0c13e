// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Vendor wire channel: newline-delimited JSON over TCP.
//
// Control traffic (commands out, status reports in) rides one long-lived
// socket; file transfers open a second, short-lived socket on the next
// port. The Bambu adapter talks only to the `VendorChannel` trait, so
// tests can script a channel without a listening firmware.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tracing::{debug, info};

use druckwerk_core::error::{DruckwerkError, Result};

/// Ack code for a completed file transfer.
const TRANSFER_OK: u16 = 226;
/// Ack code the firmware sends when it closed the data path early even
/// though the file usually landed intact.
const TRANSFER_TRUNCATED: u16 = 426;

/// Transfer chunk size, sized for progress granularity not throughput.
const CHUNK_SIZE: usize = 8192;

/// A control command, one JSON object per line on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum VendorCommand {
    StartPrint { file: String },
    PausePrint,
    ResumePrint,
    StopPrint,
}

/// A state push from the firmware.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VendorReport {
    /// Vendor state code, e.g. `IDLE`, `RUNNING`, `PAUSE`.
    pub state: String,
    #[serde(default)]
    pub percent: Option<u8>,
    #[serde(default)]
    pub layer: Option<u32>,
    #[serde(default)]
    pub total_layers: Option<u32>,
    #[serde(default)]
    pub elapsed_secs: Option<u64>,
    #[serde(default)]
    pub remaining_secs: Option<u64>,
}

/// Header line opening a file transfer on the data socket.
#[derive(Debug, Serialize, Deserialize)]
struct TransferHeader<'a> {
    op: &'a str,
    name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    size: Option<u64>,
}

/// Ack line closing a transfer or answering a stat query.
#[derive(Debug, Deserialize)]
struct TransferAck {
    code: u16,
    #[serde(default)]
    message: String,
    #[serde(default)]
    size: Option<u64>,
}

/// Raw device link. `next_report` blocks until the firmware pushes state.
#[async_trait]
pub trait VendorChannel: Send + Sync {
    /// Open the control socket. Idempotent.
    async fn open(&self) -> Result<()>;

    async fn close(&self) -> Result<()>;

    /// Write one command line on the control socket.
    async fn send_command(&self, command: &VendorCommand) -> Result<()>;

    /// Await the next pushed status report.
    async fn next_report(&self) -> Result<VendorReport>;

    /// Stream a file to the device's data port.
    async fn transfer_file(&self, local: &Path, remote_name: &str) -> Result<()>;

    /// Size of a staged file, `None` if the device has no such file.
    async fn staged_file_size(&self, remote_name: &str) -> Result<Option<u64>>;
}

/// Production channel: control on `port`, file transfers on `port + 1`.
///
/// The control socket halves sit behind separate locks. The listener
/// parks in `next_report` holding the read side, and commands must
/// still go out on the write side while it waits.
pub struct TcpVendorChannel {
    host: String,
    port: u16,
    connect_timeout: Duration,
    command_timeout: Duration,
    transfer_timeout: Duration,
    control_reader: Mutex<Option<BufReader<OwnedReadHalf>>>,
    control_writer: Mutex<Option<OwnedWriteHalf>>,
    /// Checked first by `open` so idempotent reconnects never contend
    /// with a listener parked on the read half.
    connected: AtomicBool,
}

impl TcpVendorChannel {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        connect_timeout: Duration,
        command_timeout: Duration,
        transfer_timeout: Duration,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            connect_timeout,
            command_timeout,
            transfer_timeout,
            control_reader: Mutex::new(None),
            control_writer: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    /// Timeouts taken from the orchestrator configuration.
    pub fn from_config(
        host: impl Into<String>,
        port: u16,
        config: &druckwerk_core::config::OrchestratorConfig,
    ) -> Self {
        Self::new(
            host,
            port,
            config.connect_timeout(),
            config.command_timeout(),
            config.transfer_timeout(),
        )
    }

    fn control_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    fn data_addr(&self) -> String {
        format!("{}:{}", self.host, self.port + 1)
    }

    async fn connect_to(&self, addr: &str) -> Result<TcpStream> {
        let stream = tokio::time::timeout(self.connect_timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| {
                DruckwerkError::DeviceTimeout(format!(
                    "connect to {} timed out after {}s",
                    addr,
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| DruckwerkError::DeviceIo(format!("connect to {addr}: {e}")))?;
        Ok(stream)
    }

    /// Open the data socket, run the transfer dialogue, parse the ack.
    async fn transfer_inner(&self, local: &Path, remote_name: &str) -> Result<()> {
        let bytes = tokio::fs::read(local).await?;
        let mut stream = self.connect_to(&self.data_addr()).await?;

        let header = TransferHeader {
            op: "put",
            name: remote_name,
            size: Some(bytes.len() as u64),
        };
        let mut line = serde_json::to_vec(&header)?;
        line.push(b'\n');
        stream
            .write_all(&line)
            .await
            .map_err(|e| DruckwerkError::DeviceIo(format!("transfer header: {e}")))?;

        let mut sent = 0usize;
        for chunk in bytes.chunks(CHUNK_SIZE) {
            stream.write_all(chunk).await.map_err(|e| {
                if e.kind() == std::io::ErrorKind::ConnectionReset {
                    DruckwerkError::TransferTruncated(format!(
                        "connection reset at byte {sent} of {}",
                        bytes.len()
                    ))
                } else {
                    DruckwerkError::DeviceIo(format!("transfer failed at byte {sent}: {e}"))
                }
            })?;
            sent += chunk.len();
            debug!(sent, total = bytes.len(), "transfer progress");
        }
        stream
            .flush()
            .await
            .map_err(|e| DruckwerkError::DeviceIo(format!("transfer flush: {e}")))?;

        let ack = read_ack(&mut stream).await?;
        match ack.code {
            TRANSFER_OK => {
                info!(remote_name, total = bytes.len(), "file transfer acknowledged");
                Ok(())
            }
            TRANSFER_TRUNCATED => Err(DruckwerkError::TransferTruncated(format!(
                "device acked {}: {}",
                ack.code, ack.message
            ))),
            code if ack.message.to_ascii_lowercase().contains("truncated") => {
                Err(DruckwerkError::TransferTruncated(format!(
                    "device acked {}: {}",
                    code, ack.message
                )))
            }
            code => Err(DruckwerkError::DeviceIo(format!(
                "transfer rejected with {}: {}",
                code, ack.message
            ))),
        }
    }
}

async fn read_ack(stream: &mut TcpStream) -> Result<TransferAck> {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::ConnectionReset {
                DruckwerkError::TransferTruncated(format!("connection reset awaiting ack: {e}"))
            } else {
                DruckwerkError::DeviceIo(format!("reading transfer ack: {e}"))
            }
        })?;
        if n == 0 {
            return Err(DruckwerkError::TransferTruncated(
                "connection closed before transfer ack".into(),
            ));
        }
        if byte[0] == b'\n' {
            break;
        }
        buf.push(byte[0]);
    }
    Ok(serde_json::from_slice(&buf)?)
}

#[async_trait]
impl VendorChannel for TcpVendorChannel {
    async fn open(&self) -> Result<()> {
        if self.connected.load(Ordering::Acquire) {
            return Ok(());
        }
        let mut writer = self.control_writer.lock().await;
        if self.connected.load(Ordering::Acquire) {
            return Ok(());
        }
        let stream = self.connect_to(&self.control_addr()).await?;
        let (read_half, write_half) = stream.into_split();
        *self.control_reader.lock().await = Some(BufReader::new(read_half));
        *writer = Some(write_half);
        self.connected.store(true, Ordering::Release);
        info!(addr = %self.control_addr(), "control channel open");
        Ok(())
    }

    /// Callers must stop any task parked in `next_report` first, it
    /// holds the read half.
    async fn close(&self) -> Result<()> {
        self.connected.store(false, Ordering::Release);
        self.control_reader.lock().await.take();
        if let Some(mut writer) = self.control_writer.lock().await.take() {
            // Best effort, the socket is going away either way.
            let _ = writer.shutdown().await;
            info!(addr = %self.control_addr(), "control channel closed");
        }
        Ok(())
    }

    async fn send_command(&self, command: &VendorCommand) -> Result<()> {
        let mut guard = self.control_writer.lock().await;
        let writer = guard
            .as_mut()
            .ok_or_else(|| DruckwerkError::DeviceIo("control channel not open".into()))?;

        let mut line = serde_json::to_vec(command)?;
        line.push(b'\n');
        tokio::time::timeout(self.command_timeout, writer.write_all(&line))
            .await
            .map_err(|_| {
                DruckwerkError::DeviceTimeout(format!(
                    "command timed out after {}s",
                    self.command_timeout.as_secs()
                ))
            })?
            .map_err(|e| DruckwerkError::DeviceIo(format!("command write: {e}")))?;
        debug!(?command, "command sent");
        Ok(())
    }

    async fn next_report(&self) -> Result<VendorReport> {
        let mut guard = self.control_reader.lock().await;
        let reader = guard
            .as_mut()
            .ok_or_else(|| DruckwerkError::DeviceIo("control channel not open".into()))?;

        let mut line = String::new();
        let read = reader.read_line(&mut line).await;
        match read {
            Ok(0) => {
                // Peer hung up. Drop the stale half so a later `open`
                // rebuilds the link.
                guard.take();
                self.connected.store(false, Ordering::Release);
                Err(DruckwerkError::DeviceIo("control channel closed by peer".into()))
            }
            Ok(_) => Ok(serde_json::from_str(line.trim_end())?),
            Err(e) => {
                guard.take();
                self.connected.store(false, Ordering::Release);
                Err(DruckwerkError::DeviceIo(format!("report read: {e}")))
            }
        }
    }

    async fn transfer_file(&self, local: &Path, remote_name: &str) -> Result<()> {
        tokio::time::timeout(self.transfer_timeout, self.transfer_inner(local, remote_name))
            .await
            .map_err(|_| {
                DruckwerkError::DeviceTimeout(format!(
                    "transfer timed out after {}s",
                    self.transfer_timeout.as_secs()
                ))
            })?
    }

    async fn staged_file_size(&self, remote_name: &str) -> Result<Option<u64>> {
        let mut stream = self.connect_to(&self.data_addr()).await?;
        let header = TransferHeader {
            op: "stat",
            name: remote_name,
            size: None,
        };
        let mut line = serde_json::to_vec(&header)?;
        line.push(b'\n');
        tokio::time::timeout(self.command_timeout, stream.write_all(&line))
            .await
            .map_err(|_| DruckwerkError::DeviceTimeout("stat query timed out".into()))?
            .map_err(|e| DruckwerkError::DeviceIo(format!("stat query: {e}")))?;

        let ack = tokio::time::timeout(self.command_timeout, read_ack(&mut stream))
            .await
            .map_err(|_| DruckwerkError::DeviceTimeout("stat reply timed out".into()))??;
        match ack.code {
            200 => Ok(ack.size),
            404 => Ok(None),
            code => Err(DruckwerkError::DeviceIo(format!(
                "stat rejected with {}: {}",
                code, ack.message
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_serializes_with_tag() {
        let json = serde_json::to_string(&VendorCommand::StartPrint {
            file: "plate_1.3mf".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"command":"start_print","file":"plate_1.3mf"}"#);
    }

    #[test]
    fn report_tolerates_missing_progress_fields() {
        let report: VendorReport = serde_json::from_str(r#"{"state":"IDLE"}"#).unwrap();
        assert_eq!(report.state, "IDLE");
        assert!(report.percent.is_none());
    }

    #[test]
    fn ack_parses_size_and_defaults_message() {
        let ack: TransferAck = serde_json::from_str(r#"{"code":200,"size":4096}"#).unwrap();
        assert_eq!(ack.code, 200);
        assert_eq!(ack.size, Some(4096));
        assert!(ack.message.is_empty());
    }
}
