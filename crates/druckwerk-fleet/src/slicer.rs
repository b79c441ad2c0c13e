// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Slicer seam. The orchestrator never invokes a slicer binary itself;
// it calls through this trait and treats the result as opaque machine
// code plus whatever estimates the backend chose to report.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;

use druckwerk_core::error::Result;
use druckwerk_core::types::{ModelId, SliceConfig};

use crate::estimate;

/// What a slicing backend hands back to the orchestrator.
#[derive(Debug, Clone)]
pub struct SliceOutcome {
    /// Machine code ready to be packed into a container.
    pub machine_code_path: PathBuf,
    /// Layer count, when the backend parsed it out of its own output.
    pub layer_count: Option<u32>,
    /// Backend-reported print duration, if any.
    pub estimated_duration: Option<Duration>,
    /// Backend-reported filament usage in grams, if any.
    pub estimated_material_grams: Option<f64>,
}

impl SliceOutcome {
    /// Fill missing estimates from the layer-count heuristics.
    ///
    /// Backend-reported figures are never overwritten. Without a layer
    /// count there is nothing to derive from, so gaps stay `None`.
    pub fn with_fallback_estimates(mut self, config: &SliceConfig) -> Self {
        if let Some(layers) = self.layer_count {
            if self.estimated_duration.is_none() {
                self.estimated_duration = Some(estimate::estimate_duration(layers, config));
            }
            if self.estimated_material_grams.is_none() {
                self.estimated_material_grams =
                    Some(estimate::estimate_material_grams(layers, config));
            }
        }
        self
    }
}

/// A slicing backend: turns a stored model into machine code.
#[async_trait]
pub trait Slicer: Send + Sync {
    /// Slice `model_id` with the given settings, writing machine code
    /// under `work_dir`.
    async fn slice(
        &self,
        model_id: ModelId,
        config: &SliceConfig,
        work_dir: &Path,
    ) -> Result<SliceOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_fills_only_missing_estimates() {
        let reported = Duration::from_secs(42);
        let outcome = SliceOutcome {
            machine_code_path: PathBuf::from("/tmp/out.gcode"),
            layer_count: Some(100),
            estimated_duration: Some(reported),
            estimated_material_grams: None,
        }
        .with_fallback_estimates(&SliceConfig::standard());

        assert_eq!(outcome.estimated_duration, Some(reported));
        assert!(outcome.estimated_material_grams.is_some());
    }

    #[test]
    fn fallback_without_layer_count_leaves_gaps() {
        let outcome = SliceOutcome {
            machine_code_path: PathBuf::from("/tmp/out.gcode"),
            layer_count: None,
            estimated_duration: None,
            estimated_material_grams: None,
        }
        .with_fallback_estimates(&SliceConfig::standard());

        assert!(outcome.estimated_duration.is_none());
        assert!(outcome.estimated_material_grams.is_none());
    }
}
