// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk Container: packages raw machine code (G-code) into the 3MF
// ZIP container that Bambu-class printers accept, and unpacks/validates
// existing containers.  The entry names and manifest contents are a wire
// format the target hardware reads; they must not drift.

pub mod metadata;
pub mod threemf;

pub use metadata::ContainerMetadata;
pub use threemf::ContainerConverter;
