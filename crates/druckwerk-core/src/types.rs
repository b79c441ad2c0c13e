// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Core domain types for the Druckwerk print fleet orchestrator.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{DruckwerkError, Result};

/// Unique identifier for a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobId(pub Uuid);

impl JobId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a 3D model owned by an external model store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ModelId(pub Uuid);

impl std::fmt::Display for ModelId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle states of a print job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobStatus {
    /// Created, nothing has happened yet.
    Pending,
    /// Mesh is being sliced into machine code.
    Slicing,
    /// Waiting in the queue for a printer.
    Queued,
    /// Running on a printer.
    Printing,
    /// Paused on the printer.
    Paused,
    /// Finished successfully.
    Completed,
    /// Failed; see the job error field.
    Failed,
    /// Cancelled by the user.
    Cancelled,
}

impl JobStatus {
    /// Terminal states admit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// Live states of a physical printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PrinterStatus {
    Offline,
    Idle,
    Busy,
    Error,
    Paused,
}

/// Which adapter implementation drives a printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterKind {
    Bambu,
    Generic,
    Octoprint,
}

/// How the adapter reaches the printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionType {
    Network,
    Serial,
    Cloud,
}

/// Build-plate adhesion helper printed around the part.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdhesionType {
    None,
    Skirt,
    Brim,
    Raft,
}

/// Filament material.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MaterialType {
    Pla,
    Abs,
    Petg,
    Tpu,
}

/// Slicing parameters (immutable value object, validated on construction).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SliceConfig {
    /// Layer height in mm (0.1–0.3).
    pub layer_height: f64,
    /// Infill density in percent (0–100).
    pub infill_density: u8,
    /// Print speed in mm/s.
    pub print_speed: u32,
    /// Travel speed in mm/s.
    pub travel_speed: u32,
    pub support_enabled: bool,
    pub adhesion_type: AdhesionType,
    pub material_type: MaterialType,
    /// Nozzle temperature in °C.
    pub nozzle_temperature: u16,
    /// Bed temperature in °C.
    pub bed_temperature: u16,
}

impl SliceConfig {
    /// Build a validated config. Rejects out-of-range layer heights, infill
    /// percentages, and non-positive speeds/temperatures.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        layer_height: f64,
        infill_density: u8,
        print_speed: u32,
        travel_speed: u32,
        support_enabled: bool,
        adhesion_type: AdhesionType,
        material_type: MaterialType,
        nozzle_temperature: u16,
        bed_temperature: u16,
    ) -> Result<Self> {
        if !(0.1..=0.3).contains(&layer_height) {
            return Err(DruckwerkError::InvalidConfig(format!(
                "layer height must be between 0.1 and 0.3 mm, got {layer_height}"
            )));
        }
        if infill_density > 100 {
            return Err(DruckwerkError::InvalidConfig(format!(
                "infill density must be between 0 and 100%, got {infill_density}"
            )));
        }
        if print_speed == 0 || travel_speed == 0 {
            return Err(DruckwerkError::InvalidConfig(
                "print and travel speeds must be positive".into(),
            ));
        }
        if nozzle_temperature == 0 {
            return Err(DruckwerkError::InvalidConfig(
                "nozzle temperature must be positive".into(),
            ));
        }
        Ok(Self {
            layer_height,
            infill_density,
            print_speed,
            travel_speed,
            support_enabled,
            adhesion_type,
            material_type,
            nozzle_temperature,
            bed_temperature,
        })
    }

    /// Quick draft: thick layers, sparse infill, no support.
    pub fn fast() -> Self {
        Self {
            layer_height: 0.3,
            infill_density: 10,
            print_speed: 60,
            travel_speed: 120,
            support_enabled: false,
            adhesion_type: AdhesionType::Skirt,
            material_type: MaterialType::Pla,
            nozzle_temperature: 200,
            bed_temperature: 60,
        }
    }

    /// Sensible default for most parts.
    pub fn standard() -> Self {
        Self {
            layer_height: 0.2,
            infill_density: 20,
            print_speed: 50,
            travel_speed: 100,
            support_enabled: true,
            adhesion_type: AdhesionType::Brim,
            material_type: MaterialType::Pla,
            nozzle_temperature: 210,
            bed_temperature: 60,
        }
    }

    /// Fine layers, denser infill, raft adhesion.
    pub fn high_quality() -> Self {
        Self {
            layer_height: 0.1,
            infill_density: 30,
            print_speed: 30,
            travel_speed: 80,
            support_enabled: true,
            adhesion_type: AdhesionType::Raft,
            material_type: MaterialType::Pla,
            nozzle_temperature: 215,
            bed_temperature: 65,
        }
    }
}

impl Default for SliceConfig {
    fn default() -> Self {
        Self::standard()
    }
}

/// How the adapter connects to a printer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    pub connection_type: ConnectionType,
    pub host: Option<String>,
    pub port: Option<u16>,
    /// Access code shown on the printer's screen.
    pub access_code: Option<String>,
    pub serial_number: Option<String>,
    pub use_tls: bool,
}

impl ConnectionConfig {
    /// Network connection to a LAN printer.
    pub fn network(host: impl Into<String>, port: u16) -> Self {
        Self {
            connection_type: ConnectionType::Network,
            host: Some(host.into()),
            port: Some(port),
            access_code: None,
            serial_number: None,
            use_tls: false,
        }
    }
}

/// Static hardware capabilities of a printer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HardwareProfile {
    /// Build volume (x, y, z) in mm.
    pub bed_size: (u32, u32, u32),
    /// Nozzle diameter in mm.
    pub nozzle_diameter: f64,
    /// Filament diameter in mm.
    pub filament_diameter: f64,
    /// Max print speed in mm/s.
    pub max_print_speed: u32,
    /// Max travel speed in mm/s.
    pub max_travel_speed: u32,
    pub firmware_flavor: String,
    /// Container/file formats the printer accepts (e.g. "3mf", "gcode").
    pub supported_formats: Vec<String>,
}

impl HardwareProfile {
    pub fn is_valid(&self) -> bool {
        let (x, y, z) = self.bed_size;
        self.nozzle_diameter > 0.0
            && self.filament_diameter > 0.0
            && x > 0
            && y > 0
            && z > 0
            && self.max_print_speed > 0
            && self.max_travel_speed > 0
    }
}

/// Live progress of an in-flight print, as reported by the device.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrintProgress {
    /// Completion percentage (0–100).
    pub percent: u8,
    pub layer_current: u32,
    pub layer_total: u32,
    /// Seconds since the print started.
    pub time_elapsed_secs: u64,
    /// Estimated seconds remaining.
    pub time_remaining_secs: u64,
}

/// Timestamp helper used by the entities when stamping transitions.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}
