// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Orchestrator configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Tunable knobs for the orchestration core.
///
/// One instance is built at process start and injected into the
/// orchestration service; it is never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorConfig {
    /// Upper bound on establishing a device connection.
    pub connect_timeout_secs: u64,
    /// Upper bound on a single device command (pause/resume/cancel/start).
    pub command_timeout_secs: u64,
    /// Upper bound on a file transfer to the printer.
    pub transfer_timeout_secs: u64,
    /// Maximum automatic retries for transient device I/O errors.
    pub max_device_retries: u32,
    /// Base delay for exponential backoff between device retries.
    pub retry_base_delay_ms: u64,
    /// Cap on the backoff delay.
    pub retry_max_delay_ms: u64,
    /// How many pending jobs a queue snapshot returns (and sums wait over).
    pub queue_snapshot_window: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            command_timeout_secs: 5,
            transfer_timeout_secs: 120,
            max_device_retries: 3,
            retry_base_delay_ms: 500,
            retry_max_delay_ms: 10_000,
            queue_snapshot_window: 5,
        }
    }
}

impl OrchestratorConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn transfer_timeout(&self) -> Duration {
        Duration::from_secs(self.transfer_timeout_secs)
    }

    pub fn retry_base_delay(&self) -> Duration {
        Duration::from_millis(self.retry_base_delay_ms)
    }

    pub fn retry_max_delay(&self) -> Duration {
        Duration::from_millis(self.retry_max_delay_ms)
    }
}
