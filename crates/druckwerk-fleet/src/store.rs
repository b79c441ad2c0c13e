// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// In-memory job store.
//
// One process-wide instance, constructed at startup and injected into the
// queue manager and the orchestration service.  A durable backend can
// replace this later; the orchestration core only needs these operations.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::debug;

use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::types::JobId;

use crate::job::PrintJob;

/// Shared map of all known print jobs.
#[derive(Debug, Default)]
pub struct JobStore {
    jobs: RwLock<HashMap<JobId, PrintJob>>,
}

impl JobStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert(&self, job: PrintJob) {
        debug!(job_id = %job.id, "job inserted into store");
        self.jobs.write().await.insert(job.id, job);
    }

    /// Snapshot of a single job.
    pub async fn get(&self, job_id: JobId) -> Result<PrintJob> {
        self.jobs
            .read()
            .await
            .get(&job_id)
            .cloned()
            .ok_or(DruckwerkError::JobNotFound(job_id))
    }

    /// Snapshot of all jobs, newest first.
    pub async fn list(&self) -> Vec<PrintJob> {
        let mut jobs: Vec<PrintJob> = self.jobs.read().await.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs
    }

    /// Apply a fallible mutation to a job under the store lock.
    ///
    /// The closure's error propagates unchanged, so a rejected state
    /// transition surfaces exactly as the state machine raised it.
    pub async fn update<T>(
        &self,
        job_id: JobId,
        f: impl FnOnce(&mut PrintJob) -> Result<T>,
    ) -> Result<T> {
        let mut jobs = self.jobs.write().await;
        let job = jobs
            .get_mut(&job_id)
            .ok_or(DruckwerkError::JobNotFound(job_id))?;
        f(job)
    }
}
