// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Fallback print estimates for slicers that report none.
//
// These are coarse layer-count heuristics, not physics. They exist so a
// queue wait estimate is always available; slicer-reported figures win
// whenever present.

use std::time::Duration;

use druckwerk_core::types::SliceConfig;

/// Estimate print duration from layer count and slice settings.
///
/// Seconds per layer grow linearly with infill density on top of a fixed
/// per-layer floor for travel and perimeter moves.
pub fn estimate_duration(layer_count: u32, config: &SliceConfig) -> Duration {
    let secs_per_layer = 30.0 + f64::from(config.infill_density) * 0.30;
    Duration::from_secs_f64(f64::from(layer_count) * secs_per_layer)
}

/// Estimate filament usage in grams from layer count and infill.
pub fn estimate_material_grams(layer_count: u32, config: &SliceConfig) -> f64 {
    let infill_fraction = f64::from(config.infill_density) / 100.0;
    f64::from(layer_count) * infill_fraction * 0.5
}
