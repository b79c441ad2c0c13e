// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Druckwerk Fleet: the orchestration core with print job and printer state
// machines, the priority queue arbitrating printer access, the device
// adapter protocol abstraction with its Bambu implementation, and the
// service that composes them.

pub mod adapter;
pub mod estimate;
pub mod job;
pub mod orchestrator;
pub mod printer;
pub mod queue;
pub mod retry;
pub mod slicer;
pub mod store;

pub use adapter::{DeviceAdapter, DeviceEvent};
pub use job::PrintJob;
pub use orchestrator::PrintOrchestrationService;
pub use printer::PrinterDevice;
pub use queue::{QueueManager, QueueSnapshot};
pub use slicer::{SliceOutcome, Slicer};
pub use store::JobStore;
