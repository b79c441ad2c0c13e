// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Unified error types for Druckwerk.

use thiserror::Error;

use crate::types::{JobId, JobStatus, PrinterStatus};

/// Top-level error type for all Druckwerk operations.
#[derive(Debug, Error)]
pub enum DruckwerkError {
    // -- Domain state errors --
    #[error("cannot {attempted}: job status is {current:?}")]
    InvalidTransition {
        attempted: &'static str,
        current: JobStatus,
    },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("progress percent out of range: {0}")]
    InvalidProgress(u8),

    // -- Printer assignment --
    #[error("printer {printer_id} is not available (status: {status:?})")]
    DeviceBusy {
        printer_id: String,
        status: PrinterStatus,
    },

    // -- Device I/O --
    #[error("device I/O failed: {0}")]
    DeviceIo(String),

    /// The vendor file channel reported a truncated stream during transfer.
    /// This specific error does NOT always mean the upload failed; see the
    /// adapter's staged-file verification policy.
    #[error("transfer stream truncated: {0}")]
    TransferTruncated(String),

    #[error("device operation timed out: {0}")]
    DeviceTimeout(String),

    // -- Container format --
    #[error("container format error: {0}")]
    ContainerFormat(String),

    // -- Lookups --
    #[error("job {0} is not in the queue")]
    QueueNotFound(JobId),

    #[error("job {0} not found")]
    JobNotFound(JobId),

    #[error("printer {0} not found")]
    PrinterNotFound(String),

    // -- Ambient --
    #[error("file I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DruckwerkError {
    /// Whether this error is a transient device condition worth retrying.
    ///
    /// State-machine, queue, and container errors indicate caller logic or
    /// bad input and are never retried.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::DeviceIo(_) | Self::DeviceTimeout(_) | Self::TransferTruncated(_)
        )
    }
}

/// Alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, DruckwerkError>;
