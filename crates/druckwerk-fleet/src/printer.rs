// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Printer device entity.
//
// Status and heartbeat are written by the printer's status-stream listener;
// `current_job_id` and `is_enabled` belong to the orchestration layer.  The
// orchestrator keeps each device behind its own mutex so the availability
// check in `assign_job` and the assignment itself are one critical section.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::types::{AdapterKind, ConnectionConfig, HardwareProfile, JobId, PrinterStatus};

/// A registered physical printer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterDevice {
    pub id: String,
    pub name: String,
    pub model: String,
    pub adapter_kind: AdapterKind,
    pub connection_config: ConnectionConfig,
    pub hardware_profile: HardwareProfile,
    status: PrinterStatus,
    current_job_id: Option<JobId>,
    /// Operator kill-switch.  A disabled printer is never offered work.
    pub is_enabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl PrinterDevice {
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        model: impl Into<String>,
        adapter_kind: AdapterKind,
        connection_config: ConnectionConfig,
        hardware_profile: HardwareProfile,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            model: model.into(),
            adapter_kind,
            connection_config,
            hardware_profile,
            status: PrinterStatus::Offline,
            current_job_id: None,
            is_enabled: true,
            created_at: Utc::now(),
            last_heartbeat: None,
        }
    }

    pub fn status(&self) -> PrinterStatus {
        self.status
    }

    pub fn current_job_id(&self) -> Option<JobId> {
        self.current_job_id
    }

    /// Enabled, idle, and holding no job.
    pub fn is_available(&self) -> bool {
        self.is_enabled && self.status == PrinterStatus::Idle && self.current_job_id.is_none()
    }

    /// Called by the status-stream listener.  Refreshes the heartbeat.
    pub fn update_status(&mut self, status: PrinterStatus) {
        self.status = status;
        self.last_heartbeat = Some(Utc::now());
    }

    /// Atomic check-then-set: only an available printer accepts a job.
    pub fn assign_job(&mut self, job_id: JobId) -> Result<()> {
        if !self.is_available() {
            return Err(DruckwerkError::DeviceBusy {
                printer_id: self.id.clone(),
                status: self.status,
            });
        }
        self.current_job_id = Some(job_id);
        self.status = PrinterStatus::Busy;
        Ok(())
    }

    /// Clear the assignment and return to Idle.  Called on job terminal
    /// transitions and on printer-side failure.
    pub fn release_job(&mut self) {
        self.current_job_id = None;
        self.status = PrinterStatus::Idle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use druckwerk_core::types::ConnectionType;

    pub(crate) fn test_profile() -> HardwareProfile {
        HardwareProfile {
            bed_size: (256, 256, 256),
            nozzle_diameter: 0.4,
            filament_diameter: 1.75,
            max_print_speed: 500,
            max_travel_speed: 600,
            firmware_flavor: "bambu".into(),
            supported_formats: vec!["3mf".into(), "gcode".into()],
        }
    }

    fn test_printer() -> PrinterDevice {
        PrinterDevice::new(
            "bambu-1",
            "Workshop H2D",
            "Bambu Lab H2D",
            AdapterKind::Bambu,
            ConnectionConfig {
                connection_type: ConnectionType::Network,
                host: Some("192.168.1.50".into()),
                port: Some(8883),
                access_code: Some("12345678".into()),
                serial_number: Some("01S00A123400001".into()),
                use_tls: false,
            },
            test_profile(),
        )
    }

    #[test]
    fn new_printer_starts_offline_and_unavailable() {
        let printer = test_printer();
        assert_eq!(printer.status(), PrinterStatus::Offline);
        assert!(!printer.is_available());
    }

    #[test]
    fn idle_enabled_printer_is_available() {
        let mut printer = test_printer();
        printer.update_status(PrinterStatus::Idle);
        assert!(printer.is_available());
        assert!(printer.last_heartbeat.is_some());
    }

    #[test]
    fn disabled_printer_is_never_available() {
        let mut printer = test_printer();
        printer.update_status(PrinterStatus::Idle);
        printer.is_enabled = false;
        assert!(!printer.is_available());
    }

    #[test]
    fn assign_on_unavailable_printer_fails_and_leaves_state() {
        let mut printer = test_printer();
        let result = printer.assign_job(JobId::new());
        assert!(matches!(result, Err(DruckwerkError::DeviceBusy { .. })));
        assert!(printer.current_job_id().is_none());
        assert_eq!(printer.status(), PrinterStatus::Offline);
    }

    #[test]
    fn assign_and_release_round_trip() {
        let mut printer = test_printer();
        printer.update_status(PrinterStatus::Idle);

        let job_id = JobId::new();
        printer.assign_job(job_id).expect("assign");
        assert_eq!(printer.current_job_id(), Some(job_id));
        assert_eq!(printer.status(), PrinterStatus::Busy);

        // A second assignment must be rejected.
        assert!(printer.assign_job(JobId::new()).is_err());

        printer.release_job();
        assert!(printer.current_job_id().is_none());
        assert_eq!(printer.status(), PrinterStatus::Idle);
        assert!(printer.is_available());
    }
}
