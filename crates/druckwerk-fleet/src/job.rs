// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print job aggregate and its state machine.
//
// Every status change goes through a named transition method that pattern
// matches on the current state.  Anything outside the transition table is an
// `InvalidTransition` error; a job never silently moves out of an unexpected
// state, and terminal states admit no further transition at all.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::types::{JobId, JobStatus, ModelId, SliceConfig};

/// A print job: one sliced model headed for one printer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: JobId,
    /// The source model, owned by an external model store.
    pub model_id: ModelId,
    /// Target printer.
    pub printer_id: String,
    status: JobStatus,
    /// 1-based rank among queued jobs. `Some` iff status is `Queued`.
    queue_position: Option<u32>,
    pub slice_config: SliceConfig,
    /// Raw machine code produced by the slicer.
    pub machine_code_path: Option<PathBuf>,
    /// Packed container actually uploaded to the printer.
    pub container_path: Option<PathBuf>,
    pub estimated_duration: Option<Duration>,
    pub estimated_material_grams: Option<f64>,
    actual_start: Option<DateTime<Utc>>,
    actual_end: Option<DateTime<Utc>>,
    progress_percent: u8,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PrintJob {
    pub fn new(model_id: ModelId, printer_id: impl Into<String>, slice_config: SliceConfig) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::new(),
            model_id,
            printer_id: printer_id.into(),
            status: JobStatus::Pending,
            queue_position: None,
            slice_config,
            machine_code_path: None,
            container_path: None,
            estimated_duration: None,
            estimated_material_grams: None,
            actual_start: None,
            actual_end: None,
            progress_percent: 0,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> JobStatus {
        self.status
    }

    pub fn queue_position(&self) -> Option<u32> {
        self.queue_position
    }

    pub fn progress_percent(&self) -> u8 {
        self.progress_percent
    }

    pub fn actual_start(&self) -> Option<DateTime<Utc>> {
        self.actual_start
    }

    pub fn actual_end(&self) -> Option<DateTime<Utc>> {
        self.actual_end
    }

    // -- Transitions ---------------------------------------------------------

    /// Pending → Slicing.
    pub fn start_slicing(&mut self) -> Result<()> {
        match self.status {
            JobStatus::Pending => {
                self.status = JobStatus::Slicing;
                self.touch();
                Ok(())
            }
            current => Err(invalid("start slicing", current)),
        }
    }

    /// Record the slicer's output while Slicing.
    pub fn record_slice_output(
        &mut self,
        machine_code_path: PathBuf,
        estimated_duration: Duration,
        estimated_material_grams: f64,
    ) -> Result<()> {
        match self.status {
            JobStatus::Slicing => {
                self.machine_code_path = Some(machine_code_path);
                self.estimated_duration = Some(estimated_duration);
                self.estimated_material_grams = Some(estimated_material_grams);
                self.touch();
                Ok(())
            }
            current => Err(invalid("record slice output", current)),
        }
    }

    /// Pending|Slicing → Queued at the given 1-based position.
    pub fn enqueue(&mut self, position: u32) -> Result<()> {
        match self.status {
            JobStatus::Pending | JobStatus::Slicing => {
                self.status = JobStatus::Queued;
                self.queue_position = Some(position);
                self.touch();
                Ok(())
            }
            current => Err(invalid("enqueue", current)),
        }
    }

    /// Update the queue rank of an already-queued job (queue renumbering).
    pub fn reposition(&mut self, position: u32) -> Result<()> {
        match self.status {
            JobStatus::Queued => {
                self.queue_position = Some(position);
                self.touch();
                Ok(())
            }
            current => Err(invalid("reposition", current)),
        }
    }

    /// Clear the queue rank when the job leaves the queue without yet
    /// starting (dequeue handoff, removal).
    pub fn clear_queue_position(&mut self) -> Result<()> {
        match self.status {
            JobStatus::Queued => {
                self.queue_position = None;
                self.touch();
                Ok(())
            }
            current => Err(invalid("clear queue position", current)),
        }
    }

    /// Queued → Printing.  Stamps the actual start and drops the rank.
    pub fn start_printing(&mut self) -> Result<()> {
        match self.status {
            JobStatus::Queued => {
                self.status = JobStatus::Printing;
                self.queue_position = None;
                self.actual_start = Some(Utc::now());
                self.touch();
                Ok(())
            }
            current => Err(invalid("start printing", current)),
        }
    }

    /// Printing → Paused.
    pub fn pause(&mut self) -> Result<()> {
        match self.status {
            JobStatus::Printing => {
                self.status = JobStatus::Paused;
                self.touch();
                Ok(())
            }
            current => Err(invalid("pause", current)),
        }
    }

    /// Paused → Printing.
    pub fn resume(&mut self) -> Result<()> {
        match self.status {
            JobStatus::Paused => {
                self.status = JobStatus::Printing;
                self.touch();
                Ok(())
            }
            current => Err(invalid("resume", current)),
        }
    }

    /// Progress updates are only legal while Printing.
    pub fn update_progress(&mut self, percent: u8) -> Result<()> {
        if percent > 100 {
            return Err(DruckwerkError::InvalidProgress(percent));
        }
        match self.status {
            JobStatus::Printing => {
                self.progress_percent = percent;
                self.touch();
                Ok(())
            }
            current => Err(invalid("update progress", current)),
        }
    }

    /// Printing → Completed.  Forces progress to 100.
    pub fn complete(&mut self) -> Result<()> {
        match self.status {
            JobStatus::Printing => {
                self.status = JobStatus::Completed;
                self.progress_percent = 100;
                self.actual_end = Some(Utc::now());
                self.touch();
                Ok(())
            }
            current => Err(invalid("complete", current)),
        }
    }

    /// Any non-terminal state → Failed.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<()> {
        match self.status {
            current if current.is_terminal() => Err(invalid("fail", current)),
            _ => {
                self.status = JobStatus::Failed;
                self.error_message = Some(error.into());
                self.actual_end = Some(Utc::now());
                self.queue_position = None;
                self.touch();
                Ok(())
            }
        }
    }

    /// Any non-terminal state → Cancelled.
    pub fn cancel(&mut self) -> Result<()> {
        match self.status {
            current if current.is_terminal() => Err(invalid("cancel", current)),
            _ => {
                self.status = JobStatus::Cancelled;
                self.actual_end = Some(Utc::now());
                self.queue_position = None;
                self.touch();
                Ok(())
            }
        }
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

fn invalid(attempted: &'static str, current: JobStatus) -> DruckwerkError {
    DruckwerkError::InvalidTransition { attempted, current }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn test_job() -> PrintJob {
        PrintJob::new(ModelId(Uuid::new_v4()), "printer-1", SliceConfig::standard())
    }

    #[test]
    fn full_happy_path() {
        let mut job = test_job();
        assert_eq!(job.status(), JobStatus::Pending);

        job.start_slicing().expect("start slicing");
        assert_eq!(job.status(), JobStatus::Slicing);

        job.enqueue(1).expect("enqueue");
        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.queue_position(), Some(1));

        job.start_printing().expect("start printing");
        assert_eq!(job.status(), JobStatus::Printing);
        assert!(job.queue_position().is_none());
        assert!(job.actual_start().is_some());

        job.update_progress(50).expect("progress");
        assert_eq!(job.progress_percent(), 50);

        job.complete().expect("complete");
        assert_eq!(job.status(), JobStatus::Completed);
        assert_eq!(job.progress_percent(), 100);
        assert!(job.actual_end().is_some());
    }

    #[test]
    fn enqueue_directly_from_pending() {
        let mut job = test_job();
        job.enqueue(3).expect("enqueue from pending");
        assert_eq!(job.status(), JobStatus::Queued);
        assert_eq!(job.queue_position(), Some(3));
    }

    #[test]
    fn pause_and_resume() {
        let mut job = test_job();
        job.enqueue(1).unwrap();
        job.start_printing().unwrap();

        job.pause().expect("pause");
        assert_eq!(job.status(), JobStatus::Paused);

        job.resume().expect("resume");
        assert_eq!(job.status(), JobStatus::Printing);
    }

    #[test]
    fn illegal_transitions_name_attempt_and_state() {
        let mut job = test_job();
        let err = job.start_printing().unwrap_err();
        match err {
            DruckwerkError::InvalidTransition { attempted, current } => {
                assert_eq!(attempted, "start printing");
                assert_eq!(current, JobStatus::Pending);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
        // State unchanged after the rejected transition.
        assert_eq!(job.status(), JobStatus::Pending);
    }

    #[test]
    fn pause_requires_printing() {
        let mut job = test_job();
        assert!(job.pause().is_err());
        job.enqueue(1).unwrap();
        assert!(job.pause().is_err());
        assert_eq!(job.status(), JobStatus::Queued);
    }

    #[test]
    fn progress_only_while_printing() {
        let mut job = test_job();
        assert!(job.update_progress(10).is_err());
        job.enqueue(1).unwrap();
        job.start_printing().unwrap();
        job.pause().unwrap();
        assert!(job.update_progress(10).is_err());
        assert_eq!(job.progress_percent(), 0);
    }

    #[test]
    fn progress_out_of_range_rejected() {
        let mut job = test_job();
        job.enqueue(1).unwrap();
        job.start_printing().unwrap();
        let err = job.update_progress(101).unwrap_err();
        assert!(matches!(err, DruckwerkError::InvalidProgress(101)));
        assert_eq!(job.progress_percent(), 0);
        job.update_progress(100).expect("100 is legal");
    }

    #[test]
    fn fail_from_any_non_terminal() {
        for setup in 0..4 {
            let mut job = test_job();
            match setup {
                0 => {}
                1 => job.start_slicing().unwrap(),
                2 => job.enqueue(1).unwrap(),
                _ => {
                    job.enqueue(1).unwrap();
                    job.start_printing().unwrap();
                }
            }
            job.fail("boom").expect("fail is legal from non-terminal");
            assert_eq!(job.status(), JobStatus::Failed);
            assert_eq!(job.error_message.as_deref(), Some("boom"));
            assert!(job.actual_end().is_some());
        }
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut job = test_job();
        job.cancel().expect("cancel from pending");
        assert_eq!(job.status(), JobStatus::Cancelled);

        assert!(job.cancel().is_err());
        assert!(job.fail("late").is_err());
        assert!(job.start_slicing().is_err());
        assert!(job.enqueue(1).is_err());
        assert_eq!(job.status(), JobStatus::Cancelled);
    }

    #[test]
    fn cancel_clears_queue_position() {
        let mut job = test_job();
        job.enqueue(2).unwrap();
        job.cancel().unwrap();
        assert!(job.queue_position().is_none());
    }

    #[test]
    fn completed_job_cannot_be_cancelled() {
        let mut job = test_job();
        job.enqueue(1).unwrap();
        job.start_printing().unwrap();
        job.complete().unwrap();
        assert!(job.cancel().is_err());
        assert_eq!(job.status(), JobStatus::Completed);
    }
}
