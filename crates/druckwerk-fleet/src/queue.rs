// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Priority queue over jobs awaiting a printer.
//
// Ordering is priority descending with insertion sequence as the FIFO
// tie-break.  All operations serialize on one mutex, so positions are
// always contiguous 1..n and two concurrent dequeues can never hand out
// the same job.  The manager is the only component that writes
// `queue_position` back onto jobs.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use druckwerk_core::error::Result;
use druckwerk_core::types::JobId;

use crate::job::PrintJob;
use crate::store::JobStore;

/// One queued job: ordering key only, the job itself lives in the store.
#[derive(Debug, Clone, Copy)]
struct QueueEntry {
    job_id: JobId,
    priority: i32,
    seq: u64,
}

#[derive(Debug, Default)]
struct QueueInner {
    /// Kept sorted: priority desc, seq asc.  Manual reorder may override.
    entries: Vec<QueueEntry>,
    next_seq: u64,
}

/// Window view of the queue returned by [`QueueManager::snapshot`].
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    /// Total queued jobs, including those beyond the window.
    pub total: usize,
    /// The first N pending jobs in queue order.
    pub pending: Vec<PrintJob>,
    /// Sum of estimated durations over `pending` only; the wait estimate
    /// is deliberately bounded to the visible window.
    pub estimated_wait: Duration,
}

/// The single arbiter of which job is offered to a freed printer.
pub struct QueueManager {
    store: Arc<JobStore>,
    inner: Mutex<QueueInner>,
    snapshot_window: usize,
}

impl QueueManager {
    pub fn new(store: Arc<JobStore>, snapshot_window: usize) -> Arc<Self> {
        Arc::new(Self {
            store,
            inner: Mutex::new(QueueInner::default()),
            snapshot_window,
        })
    }

    /// Insert a job in priority order and transition it to Queued.
    ///
    /// Returns the 1-based position.  Trailing jobs are renumbered so
    /// positions stay contiguous.
    pub async fn enqueue(&self, job_id: JobId, priority: i32) -> Result<u32> {
        let mut inner = self.inner.lock().await;

        let index = inner
            .entries
            .partition_point(|e| e.priority >= priority);
        let position = (index + 1) as u32;

        // Transition first: if the job is in the wrong state the queue is
        // left untouched.
        self.store.update(job_id, |job| job.enqueue(position)).await?;

        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.entries.insert(index, QueueEntry { job_id, priority, seq });

        self.renumber_from(&inner, index + 1).await;

        info!(%job_id, priority, position, "job enqueued");
        Ok(position)
    }

    /// Remove and return the highest-priority, earliest-inserted job.
    pub async fn dequeue(&self) -> Result<Option<PrintJob>> {
        let mut inner = self.inner.lock().await;
        if inner.entries.is_empty() {
            debug!("queue is empty");
            return Ok(None);
        }
        let entry = inner.entries.remove(0);

        let job = self
            .store
            .update(entry.job_id, |job| {
                job.clear_queue_position()?;
                Ok(job.clone())
            })
            .await?;

        self.renumber_from(&inner, 0).await;

        info!(job_id = %entry.job_id, "job dequeued");
        Ok(Some(job))
    }

    /// Peek at the head of the queue without removing it.
    pub async fn peek(&self) -> Option<JobId> {
        self.inner.lock().await.entries.first().map(|e| e.job_id)
    }

    /// Remove an arbitrary pending job (cancellation path).
    ///
    /// Returns `false` if the job is not queued.
    pub async fn remove(&self, job_id: JobId) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.entries.iter().position(|e| e.job_id == job_id) else {
            debug!(%job_id, "job not found in queue");
            return Ok(false);
        };
        inner.entries.remove(index);

        self.store
            .update(job_id, |job| job.clear_queue_position())
            .await?;
        self.renumber_from(&inner, index).await;

        info!(%job_id, "job removed from queue");
        Ok(true)
    }

    /// Re-insert a job at an explicit 1-based rank (manual override).
    ///
    /// Renumbers every entry afterwards.  Returns `false` if the job is
    /// not queued.
    pub async fn reorder(&self, job_id: JobId, new_position: u32) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        let Some(index) = inner.entries.iter().position(|e| e.job_id == job_id) else {
            debug!(%job_id, "job not found in queue");
            return Ok(false);
        };
        let entry = inner.entries.remove(index);
        let target = (new_position.max(1) as usize - 1).min(inner.entries.len());
        inner.entries.insert(target, entry);

        self.renumber_from(&inner, 0).await;

        info!(%job_id, new_position = target + 1, "queue reordered");
        Ok(true)
    }

    /// Bounded view of the queue: total count, the first N jobs, and the
    /// wait estimate summed over that window.
    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        let inner = self.inner.lock().await;
        let total = inner.entries.len();

        let mut pending = Vec::new();
        for entry in inner.entries.iter().take(self.snapshot_window) {
            pending.push(self.store.get(entry.job_id).await?);
        }

        let estimated_wait = pending
            .iter()
            .filter_map(|job| job.estimated_duration)
            .sum();

        Ok(QueueSnapshot {
            total,
            pending,
            estimated_wait,
        })
    }

    /// Rewrite `queue_position` on every entry from `start` onwards.
    ///
    /// Caller holds the queue lock, so positions observed by other
    /// operations are always contiguous.
    async fn renumber_from(&self, inner: &QueueInner, start: usize) {
        for (i, entry) in inner.entries.iter().enumerate().skip(start) {
            let position = (i + 1) as u32;
            let result = self
                .store
                .update(entry.job_id, |job| job.reposition(position))
                .await;
            if let Err(e) = result {
                // A job missing from the store mid-renumber means someone
                // deleted it outside the queue path.
                warn!(job_id = %entry.job_id, error = %e, "failed to renumber queued job");
            }
        }
    }
}
