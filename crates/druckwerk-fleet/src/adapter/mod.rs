// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Device adapter seam between the orchestrator and printer firmware.
//
// The orchestrator only speaks this trait. Vendor quirks (wire framing,
// status vocabularies, upload oddities) stay inside the adapter impls.

pub mod bambu;
pub mod channel;
#[cfg(test)]
pub mod mock;

use std::path::Path;

use async_trait::async_trait;
use tokio::sync::broadcast;

use druckwerk_core::error::Result;
use druckwerk_core::types::{PrintProgress, PrinterStatus};

pub use bambu::BambuAdapter;
pub use channel::{TcpVendorChannel, VendorChannel, VendorCommand, VendorReport};

/// A state push from the device, rebroadcast to every subscriber.
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    pub status: PrinterStatus,
    /// Present only while the device reports an active print.
    pub progress: Option<PrintProgress>,
}

/// Uniform control surface over one physical printer.
///
/// Implementations own their connection lifecycle; `connect` is
/// idempotent and `status`/`progress` must not block on the wire.
#[async_trait]
pub trait DeviceAdapter: Send + Sync {
    /// Establish the device link and start listening for state pushes.
    async fn connect(&self) -> Result<()>;

    /// Tear down the link. The device is reported Offline afterwards.
    async fn disconnect(&self) -> Result<()>;

    /// Last known device status (served from cache, never polls).
    async fn status(&self) -> Result<PrinterStatus>;

    /// Stage a local file on the device under `remote_name`.
    async fn send_file(&self, local: &Path, remote_name: &str) -> Result<()>;

    /// Start printing a previously staged file.
    async fn start_print(&self, remote_name: &str) -> Result<()>;

    async fn pause_print(&self) -> Result<()>;

    async fn resume_print(&self) -> Result<()>;

    async fn cancel_print(&self) -> Result<()>;

    /// Last reported print progress, if a print is active.
    async fn progress(&self) -> Result<Option<PrintProgress>>;

    /// Subscribe to the device's event stream.
    fn subscribe(&self) -> broadcast::Receiver<DeviceEvent>;
}
