// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Metadata serialized into the container's settings entry.

use std::path::PathBuf;

use druckwerk_core::types::{MaterialType, SliceConfig};

/// Everything the settings entry of a packed container records about the
/// job: the slicing parameters, the target printer model, and (optionally)
/// a thumbnail to embed.
#[derive(Debug, Clone)]
pub struct ContainerMetadata {
    /// Printer model string written into the settings entry.
    pub printer_model: String,
    /// Application name written into the model-definition entry.
    pub application: String,
    pub layer_height: f64,
    pub infill_density: u8,
    pub print_speed: u32,
    pub support_enabled: bool,
    pub material_type: MaterialType,
    pub nozzle_temperature: u16,
    pub bed_temperature: u16,
    /// PNG thumbnail to embed as the plate preview, if present on disk.
    pub thumbnail_path: Option<PathBuf>,
}

impl ContainerMetadata {
    /// Build metadata from a slice config and a printer model name.
    pub fn from_slice_config(config: &SliceConfig, printer_model: impl Into<String>) -> Self {
        Self {
            printer_model: printer_model.into(),
            application: "Druckwerk".into(),
            layer_height: config.layer_height,
            infill_density: config.infill_density,
            print_speed: config.print_speed,
            support_enabled: config.support_enabled,
            material_type: config.material_type,
            nozzle_temperature: config.nozzle_temperature,
            bed_temperature: config.bed_temperature,
            thumbnail_path: None,
        }
    }

    /// Settings value for the filament type entry.
    pub fn material_name(&self) -> &'static str {
        match self.material_type {
            MaterialType::Pla => "PLA",
            MaterialType::Abs => "ABS",
            MaterialType::Petg => "PETG",
            MaterialType::Tpu => "TPU",
        }
    }
}
