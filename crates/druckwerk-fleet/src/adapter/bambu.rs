// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Bambu Lab LAN adapter.
//
// One listener task owns the control stream and feeds a cached state,
// so `status()` and `progress()` answer from memory instead of polling
// the printer. File uploads tolerate the firmware's habit of dropping
// the data connection after a complete transfer (see
// `resolve_truncated_upload`).

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::types::{PrintProgress, PrinterStatus};

use super::channel::{VendorChannel, VendorCommand, VendorReport};
use super::{DeviceAdapter, DeviceEvent};

/// Vendor state codes and their generic equivalents. Codes not listed
/// here (including the firmware's literal `UNKNOWN`) map to Offline.
const STATE_MAP: &[(&str, PrinterStatus)] = &[
    ("IDLE", PrinterStatus::Idle),
    ("RUNNING", PrinterStatus::Busy),
    ("PAUSE", PrinterStatus::Paused),
    ("FINISH", PrinterStatus::Idle),
    ("FAILED", PrinterStatus::Error),
];

pub(crate) fn map_vendor_state(code: &str) -> PrinterStatus {
    STATE_MAP
        .iter()
        .find(|(vendor, _)| code.eq_ignore_ascii_case(vendor))
        .map(|(_, status)| *status)
        .unwrap_or(PrinterStatus::Offline)
}

/// Outcome of checking a staged file after a truncated-transfer ack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UploadVerification {
    /// Staged size matches what we sent.
    Confirmed,
    /// Could not check; treat the upload as good anyway. The firmware
    /// drops the data connection after complete transfers often enough
    /// that failing here would reject mostly-good uploads.
    Unverified,
    /// Staged size is wrong or the file is absent.
    Rejected,
}

/// Pure decision for the truncated-upload quirk. `probe` is the staged
/// file size, `None` in the outer position when the probe itself failed.
pub(crate) fn resolve_truncated_upload(
    expected_size: u64,
    probe: Option<Option<u64>>,
) -> UploadVerification {
    match probe {
        Some(Some(size)) if size == expected_size => UploadVerification::Confirmed,
        Some(_) => UploadVerification::Rejected,
        None => UploadVerification::Unverified,
    }
}

#[derive(Debug)]
struct CachedState {
    status: PrinterStatus,
    progress: Option<PrintProgress>,
}

pub struct BambuAdapter {
    printer_id: String,
    channel: Arc<dyn VendorChannel>,
    state: Arc<RwLock<CachedState>>,
    events: broadcast::Sender<DeviceEvent>,
    listener: Mutex<Option<JoinHandle<()>>>,
    staged: Mutex<HashSet<String>>,
}

impl BambuAdapter {
    pub fn new(printer_id: impl Into<String>, channel: Arc<dyn VendorChannel>) -> Self {
        let (events, _) = broadcast::channel(32);
        Self {
            printer_id: printer_id.into(),
            channel,
            state: Arc::new(RwLock::new(CachedState {
                status: PrinterStatus::Offline,
                progress: None,
            })),
            events,
            listener: Mutex::new(None),
            staged: Mutex::new(HashSet::new()),
        }
    }

    fn event_from_report(report: &VendorReport) -> DeviceEvent {
        let status = map_vendor_state(&report.state);
        let progress = match status {
            PrinterStatus::Busy | PrinterStatus::Paused => Some(PrintProgress {
                percent: report.percent.unwrap_or(0),
                layer_current: report.layer.unwrap_or(0),
                layer_total: report.total_layers.unwrap_or(0),
                time_elapsed_secs: report.elapsed_secs.unwrap_or(0),
                time_remaining_secs: report.remaining_secs.unwrap_or(0),
            }),
            _ => None,
        };
        DeviceEvent { status, progress }
    }

    async fn run_listener(
        printer_id: String,
        channel: Arc<dyn VendorChannel>,
        state: Arc<RwLock<CachedState>>,
        events: broadcast::Sender<DeviceEvent>,
    ) {
        loop {
            match channel.next_report().await {
                Ok(report) => {
                    let event = Self::event_from_report(&report);
                    debug!(printer_id = %printer_id, state = %report.state, status = ?event.status, "device report");
                    {
                        let mut cached = state.write().await;
                        cached.status = event.status;
                        cached.progress = event.progress.clone();
                    }
                    // No subscribers is fine, the cache still advanced.
                    let _ = events.send(event);
                }
                Err(e) => {
                    warn!(printer_id = %printer_id, error = %e, "device stream lost, marking offline");
                    {
                        let mut cached = state.write().await;
                        cached.status = PrinterStatus::Offline;
                        cached.progress = None;
                    }
                    let _ = events.send(DeviceEvent {
                        status: PrinterStatus::Offline,
                        progress: None,
                    });
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl DeviceAdapter for BambuAdapter {
    async fn connect(&self) -> Result<()> {
        self.channel.open().await?;

        let mut listener = self.listener.lock().await;
        let stale = listener.as_ref().map(|h| h.is_finished()).unwrap_or(true);
        if stale {
            let handle = tokio::spawn(Self::run_listener(
                self.printer_id.clone(),
                Arc::clone(&self.channel),
                Arc::clone(&self.state),
                self.events.clone(),
            ));
            *listener = Some(handle);
            info!(printer_id = %self.printer_id, "device listener started");
        }
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        if let Some(handle) = self.listener.lock().await.take() {
            handle.abort();
        }
        self.channel.close().await?;
        {
            let mut cached = self.state.write().await;
            cached.status = PrinterStatus::Offline;
            cached.progress = None;
        }
        info!(printer_id = %self.printer_id, "device disconnected");
        Ok(())
    }

    async fn status(&self) -> Result<PrinterStatus> {
        Ok(self.state.read().await.status)
    }

    async fn send_file(&self, local: &Path, remote_name: &str) -> Result<()> {
        let outcome = self.channel.transfer_file(local, remote_name).await;
        match outcome {
            Ok(()) => {}
            Err(DruckwerkError::TransferTruncated(detail)) => {
                let expected = tokio::fs::metadata(local).await?.len();
                let probe = self.channel.staged_file_size(remote_name).await.ok();
                match resolve_truncated_upload(expected, probe) {
                    UploadVerification::Confirmed => {
                        info!(
                            printer_id = %self.printer_id,
                            remote_name,
                            detail = %detail,
                            "truncated transfer verified against staged file"
                        );
                    }
                    UploadVerification::Unverified => {
                        warn!(
                            printer_id = %self.printer_id,
                            remote_name,
                            detail = %detail,
                            "truncated transfer could not be verified, assuming staged"
                        );
                    }
                    UploadVerification::Rejected => {
                        return Err(DruckwerkError::TransferTruncated(detail));
                    }
                }
            }
            Err(e) => return Err(e),
        }

        self.staged.lock().await.insert(remote_name.to_string());
        Ok(())
    }

    async fn start_print(&self, remote_name: &str) -> Result<()> {
        if !self.staged.lock().await.contains(remote_name) {
            return Err(DruckwerkError::DeviceIo(format!(
                "file {remote_name} has not been staged on {}",
                self.printer_id
            )));
        }
        self.channel
            .send_command(&VendorCommand::StartPrint {
                file: remote_name.to_string(),
            })
            .await
    }

    async fn pause_print(&self) -> Result<()> {
        self.channel.send_command(&VendorCommand::PausePrint).await
    }

    async fn resume_print(&self) -> Result<()> {
        self.channel.send_command(&VendorCommand::ResumePrint).await
    }

    async fn cancel_print(&self) -> Result<()> {
        self.channel.send_command(&VendorCommand::StopPrint).await
    }

    async fn progress(&self) -> Result<Option<PrintProgress>> {
        Ok(self.state.read().await.progress.clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent> {
        self.events.subscribe()
    }
}
