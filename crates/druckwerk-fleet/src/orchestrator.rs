// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Print orchestration service: the one component that touches jobs,
// printers, the queue, the slicer, and the device adapters together.
//
// Lifecycle ownership is explicit: the service spawns every listener
// and monitor task it needs and `shutdown` reaps them all, so nothing
// keeps talking to a device after the service is gone.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use druckwerk_container::{ContainerConverter, ContainerMetadata};
use druckwerk_core::config::OrchestratorConfig;
use druckwerk_core::error::{DruckwerkError, Result};
use druckwerk_core::types::{JobId, JobStatus, ModelId, PrinterStatus, SliceConfig};

use crate::adapter::{DeviceAdapter, DeviceEvent};
use crate::job::PrintJob;
use crate::printer::PrinterDevice;
use crate::queue::{QueueManager, QueueSnapshot};
use crate::retry::{self, RetryConfig};
use crate::slicer::Slicer;
use crate::store::JobStore;

/// A registered printer: its record, its adapter, and the task that
/// mirrors device status pushes onto the record.
struct PrinterEntry {
    device: Mutex<PrinterDevice>,
    adapter: Arc<dyn DeviceAdapter>,
    listener: Mutex<Option<JoinHandle<()>>>,
}

pub struct PrintOrchestrationService {
    config: OrchestratorConfig,
    retry: RetryConfig,
    store: Arc<JobStore>,
    queue: Arc<QueueManager>,
    printers: RwLock<HashMap<String, Arc<PrinterEntry>>>,
    slicer: Arc<dyn Slicer>,
    converter: ContainerConverter,
    work_dir: PathBuf,
    monitors: Mutex<HashMap<JobId, JoinHandle<()>>>,
}

impl PrintOrchestrationService {
    pub fn new(
        config: OrchestratorConfig,
        slicer: Arc<dyn Slicer>,
        work_dir: impl Into<PathBuf>,
    ) -> Arc<Self> {
        let store = JobStore::new();
        let queue = QueueManager::new(Arc::clone(&store), config.queue_snapshot_window);
        let retry = RetryConfig::from_orchestrator(&config);
        Arc::new(Self {
            config,
            retry,
            store,
            queue,
            printers: RwLock::new(HashMap::new()),
            slicer,
            converter: ContainerConverter::new(),
            work_dir: work_dir.into(),
            monitors: Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Register a printer and connect its adapter.
    ///
    /// A listener task mirrors the adapter's event stream onto the
    /// printer record so availability checks never touch the wire.
    pub async fn register_printer(
        &self,
        device: PrinterDevice,
        adapter: Arc<dyn DeviceAdapter>,
    ) -> Result<()> {
        if !device.hardware_profile.is_valid() {
            return Err(DruckwerkError::InvalidConfig(format!(
                "printer {} has an invalid hardware profile",
                device.id
            )));
        }
        let printer_id = device.id.clone();
        // The write lock is held through connect and insert, so two
        // registrations for the same id cannot both pass the check.
        let mut printers = self.printers.write().await;
        if printers.contains_key(&printer_id) {
            return Err(DruckwerkError::InvalidConfig(format!(
                "printer {printer_id} is already registered"
            )));
        }

        adapter.connect().await?;

        // Subscribe before spawning so no event published after this
        // point can be missed by the listener.
        let events = adapter.subscribe();
        let entry = Arc::new(PrinterEntry {
            device: Mutex::new(device),
            adapter,
            listener: Mutex::new(None),
        });
        let handle = tokio::spawn(Self::run_printer_listener(Arc::clone(&entry), events));
        *entry.listener.lock().await = Some(handle);

        printers.insert(printer_id.clone(), entry);
        info!(%printer_id, "printer registered");
        Ok(())
    }

    async fn run_printer_listener(
        entry: Arc<PrinterEntry>,
        mut events: broadcast::Receiver<DeviceEvent>,
    ) {
        loop {
            match events.recv().await {
                Ok(event) => entry.device.lock().await.update_status(event.status),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "printer listener lagged behind device events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn printer_entry(&self, printer_id: &str) -> Result<Arc<PrinterEntry>> {
        self.printers
            .read()
            .await
            .get(printer_id)
            .cloned()
            .ok_or_else(|| DruckwerkError::PrinterNotFound(printer_id.to_string()))
    }

    /// Create a job: slice, fill estimates, pack the container, enqueue.
    ///
    /// Slicing and packaging failures mark the job Failed with the error
    /// message and still return its id, so callers can inspect the
    /// record instead of losing it.
    pub async fn create_job(
        &self,
        model_id: ModelId,
        printer_id: &str,
        slice_config: SliceConfig,
        priority: i32,
    ) -> Result<JobId> {
        let entry = self.printer_entry(printer_id).await?;
        let printer_model = entry.device.lock().await.model.clone();

        let job = PrintJob::new(model_id, printer_id, slice_config.clone());
        let job_id = job.id;
        self.store.insert(job).await;
        info!(%job_id, %model_id, printer_id, priority, "job created");

        self.store.update(job_id, |j| j.start_slicing()).await?;
        let outcome = match self
            .slicer
            .slice(model_id, &slice_config, &self.work_dir)
            .await
        {
            Ok(outcome) => outcome.with_fallback_estimates(&slice_config),
            Err(e) => {
                warn!(%job_id, error = %e, "slicing failed");
                self.store
                    .update(job_id, |j| j.fail(format!("slicing failed: {e}")))
                    .await?;
                return Ok(job_id);
            }
        };

        self.store
            .update(job_id, |j| {
                j.record_slice_output(
                    outcome.machine_code_path.clone(),
                    outcome.estimated_duration.unwrap_or_default(),
                    outcome.estimated_material_grams.unwrap_or_default(),
                )
            })
            .await?;

        let metadata = ContainerMetadata::from_slice_config(&slice_config, printer_model);
        let container_target = self.work_dir.join(format!("{job_id}.3mf"));
        let packed = self
            .converter
            .pack(&outcome.machine_code_path, &container_target, &metadata);
        let container_path = match packed {
            Ok(path) => path,
            Err(e) => {
                warn!(%job_id, error = %e, "container packaging failed");
                self.store
                    .update(job_id, |j| j.fail(format!("container packaging failed: {e}")))
                    .await?;
                return Ok(job_id);
            }
        };
        self.store
            .update(job_id, |j| {
                j.container_path = Some(container_path);
                Ok(())
            })
            .await?;

        self.queue.enqueue(job_id, priority).await?;
        Ok(job_id)
    }

    /// Offer the head of the queue to `printer_id`.
    ///
    /// Returns the dispatched job id, or `None` when the printer is
    /// busy, the queue is empty, or its head targets another printer.
    /// The head blocks for its own printer; jobs are bound to a printer
    /// at creation and are not rerouted.
    pub async fn dispatch(&self, printer_id: &str) -> Result<Option<JobId>> {
        let entry = self.printer_entry(printer_id).await?;

        let Some(job_id) = self.queue.peek().await else {
            return Ok(None);
        };
        let job = self.store.get(job_id).await?;
        if job.printer_id != printer_id {
            debug!(%job_id, head_target = %job.printer_id, printer_id, "queue head targets another printer");
            return Ok(None);
        }

        // Check-then-set under the device lock: exactly one dispatcher
        // can claim an available printer.
        {
            let mut device = entry.device.lock().await;
            if !device.is_available() {
                return Ok(None);
            }
            device.assign_job(job_id)?;
        }

        // Remove exactly the job we claimed. A concurrent cancel may
        // have pulled it already, in which case the claim is rolled back.
        if !self.queue.remove(job_id).await? {
            entry.device.lock().await.release_job();
            return Ok(None);
        }

        if let Err(e) = self.upload_and_start(&entry, &job, printer_id).await {
            self.fail_job(&entry, job_id, format!("dispatch failed: {e}"))
                .await;
            return Err(e);
        }

        if let Err(e) = self.store.update(job_id, |j| j.start_printing()).await {
            // A concurrent cancel can win between the queue removal and
            // this transition. The device-side print already started, so
            // stop it and free the printer instead of leaving it claimed.
            if let Err(stop) = entry.adapter.cancel_print().await {
                warn!(%job_id, error = %stop, "device stop command failed after lost dispatch");
            }
            self.fail_job(&entry, job_id, format!("dispatch failed: {e}"))
                .await;
            return Err(e);
        }
        info!(%job_id, printer_id, "job dispatched");

        // Same pattern as registration: take the receiver here so the
        // monitor cannot miss an event raced against the spawn.
        let events = entry.adapter.subscribe();
        let monitor = tokio::spawn(Self::run_job_monitor(
            Arc::clone(&entry),
            Arc::clone(&self.store),
            job_id,
            events,
        ));
        let mut monitors = self.monitors.lock().await;
        monitors.retain(|_, handle| !handle.is_finished());
        monitors.insert(job_id, monitor);
        Ok(Some(job_id))
    }

    /// Stage the container on the device and issue the start command,
    /// both under the transient-error retry policy.
    async fn upload_and_start(
        &self,
        entry: &Arc<PrinterEntry>,
        job: &PrintJob,
        printer_id: &str,
    ) -> Result<()> {
        let container = job.container_path.clone().ok_or_else(|| {
            DruckwerkError::InvalidConfig(format!("job {} has no packed container", job.id))
        })?;
        let remote_name = format!("{}.3mf", job.id);

        retry::retry_with(&self.retry, "upload container", || {
            let adapter = Arc::clone(&entry.adapter);
            let container = container.clone();
            let remote_name = remote_name.clone();
            async move { adapter.send_file(&container, &remote_name).await }
        })
        .await?;

        retry::retry_with(&self.retry, "start print", || {
            let adapter = Arc::clone(&entry.adapter);
            let remote_name = remote_name.clone();
            async move { adapter.start_print(&remote_name).await }
        })
        .await?;

        debug!(job_id = %job.id, printer_id, remote_name = %remote_name, "container staged and print started");
        Ok(())
    }

    /// Drive a printing job from the device's event stream.
    ///
    /// Busy reports feed progress, Idle means the print finished, Error
    /// and Offline are terminal failures. The printer is released on
    /// every terminal path.
    async fn run_job_monitor(
        entry: Arc<PrinterEntry>,
        store: Arc<JobStore>,
        job_id: JobId,
        mut events: broadcast::Receiver<DeviceEvent>,
    ) {
        // Printers keep emitting idle heartbeats until the firmware
        // picks up the job, so Idle only counts as completion once the
        // print has actually been seen running.
        let mut print_observed = false;
        loop {
            let event = match events.recv().await {
                Ok(event) => event,
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(%job_id, skipped, "job monitor lagged behind device events");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            };
            match event.status {
                PrinterStatus::Busy => {
                    print_observed = true;
                    if let Some(progress) = event.progress {
                        let update = store
                            .update(job_id, |j| j.update_progress(progress.percent))
                            .await;
                        if let Err(e) = update {
                            // Job may have been cancelled out from under us.
                            debug!(%job_id, error = %e, "progress update skipped");
                        }
                    }
                }
                PrinterStatus::Paused => {
                    // A device-side pause (filament runout, user panel).
                    print_observed = true;
                    let _ = store.update(job_id, |j| j.pause()).await;
                }
                PrinterStatus::Idle => {
                    if !print_observed {
                        debug!(%job_id, "idle report before the print started, ignoring");
                        continue;
                    }
                    let done = store.update(job_id, |j| j.complete()).await;
                    match done {
                        Ok(()) => info!(%job_id, "print completed"),
                        Err(e) => debug!(%job_id, error = %e, "completion skipped"),
                    }
                    entry.device.lock().await.release_job();
                    break;
                }
                PrinterStatus::Error => {
                    Self::fail_from_monitor(&entry, &store, job_id, "device reported an error")
                        .await;
                    break;
                }
                PrinterStatus::Offline => {
                    Self::fail_from_monitor(&entry, &store, job_id, "device went offline mid-print")
                        .await;
                    break;
                }
            }
        }
    }

    async fn fail_from_monitor(
        entry: &Arc<PrinterEntry>,
        store: &Arc<JobStore>,
        job_id: JobId,
        reason: &str,
    ) {
        warn!(%job_id, reason, "print failed");
        if let Err(e) = store.update(job_id, |j| j.fail(reason)).await {
            debug!(%job_id, error = %e, "failure transition skipped");
        }
        entry.device.lock().await.release_job();
    }

    /// Mark a job Failed and free its printer so the queue progresses.
    async fn fail_job(&self, entry: &Arc<PrinterEntry>, job_id: JobId, reason: String) {
        warn!(%job_id, reason = %reason, "job failed");
        if let Err(e) = self.store.update(job_id, |j| j.fail(reason.clone())).await {
            debug!(%job_id, error = %e, "failure transition skipped");
        }
        entry.device.lock().await.release_job();
    }

    /// Cancel a job in any non-terminal state.
    ///
    /// While printing, the stop command is sent first; its outcome is
    /// recorded on the job but never blocks the cancellation. The
    /// operator asked for the job to stop existing, not for a debate
    /// with the firmware.
    pub async fn cancel_job(&self, job_id: JobId) -> Result<()> {
        let job = self.store.get(job_id).await?;
        match job.status() {
            JobStatus::Queued => {
                self.queue.remove(job_id).await?;
                self.store.update(job_id, |j| j.cancel()).await?;
            }
            JobStatus::Printing | JobStatus::Paused => {
                let entry = self.printer_entry(&job.printer_id).await?;
                if let Some(monitor) = self.monitors.lock().await.remove(&job_id) {
                    monitor.abort();
                }
                let device_note = match entry.adapter.cancel_print().await {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(%job_id, error = %e, "device stop command failed during cancel");
                        Some(format!("device stop command failed: {e}"))
                    }
                };
                self.store
                    .update(job_id, |j| {
                        j.cancel()?;
                        if device_note.is_some() {
                            j.error_message = device_note;
                        }
                        Ok(())
                    })
                    .await?;
                entry.device.lock().await.release_job();
            }
            _ => {
                self.store.update(job_id, |j| j.cancel()).await?;
            }
        }
        info!(%job_id, "job cancelled");
        Ok(())
    }

    /// Pause an active print. The job transition happens first and is
    /// rolled back if the device refuses the command.
    pub async fn pause_job(&self, job_id: JobId) -> Result<()> {
        let job = self.store.get(job_id).await?;
        let entry = self.printer_entry(&job.printer_id).await?;

        self.store.update(job_id, |j| j.pause()).await?;
        if let Err(e) = entry.adapter.pause_print().await {
            warn!(%job_id, error = %e, "device pause failed, rolling back");
            let _ = self.store.update(job_id, |j| j.resume()).await;
            return Err(e);
        }
        info!(%job_id, "job paused");
        Ok(())
    }

    /// Resume a paused print, with the same rollback discipline.
    pub async fn resume_job(&self, job_id: JobId) -> Result<()> {
        let job = self.store.get(job_id).await?;
        let entry = self.printer_entry(&job.printer_id).await?;

        self.store.update(job_id, |j| j.resume()).await?;
        if let Err(e) = entry.adapter.resume_print().await {
            warn!(%job_id, error = %e, "device resume failed, rolling back");
            let _ = self.store.update(job_id, |j| j.pause()).await;
            return Err(e);
        }
        info!(%job_id, "job resumed");
        Ok(())
    }

    pub async fn get_job(&self, job_id: JobId) -> Result<PrintJob> {
        self.store.get(job_id).await
    }

    pub async fn list_jobs(&self) -> Vec<PrintJob> {
        self.store.list().await
    }

    pub async fn get_printer(&self, printer_id: &str) -> Result<PrinterDevice> {
        let entry = self.printer_entry(printer_id).await?;
        let device = entry.device.lock().await.clone();
        Ok(device)
    }

    pub async fn list_printers(&self) -> Vec<PrinterDevice> {
        let entries: Vec<Arc<PrinterEntry>> =
            self.printers.read().await.values().cloned().collect();
        let mut printers = Vec::with_capacity(entries.len());
        for entry in entries {
            printers.push(entry.device.lock().await.clone());
        }
        printers.sort_by(|a, b| a.id.cmp(&b.id));
        printers
    }

    /// Printers that can take a job right now.
    pub async fn available_printers(&self) -> Vec<PrinterDevice> {
        self.list_printers()
            .await
            .into_iter()
            .filter(|p| p.is_available())
            .collect()
    }

    pub async fn queue_status(&self) -> Result<QueueSnapshot> {
        self.queue.snapshot().await
    }

    /// Graceful drain: stop every monitor and listener, then disconnect
    /// the adapters. The service owns all of these tasks, so after this
    /// returns nothing is left talking to a device.
    pub async fn shutdown(&self) {
        info!("orchestration service shutting down");
        for (job_id, monitor) in self.monitors.lock().await.drain() {
            debug!(%job_id, "aborting job monitor");
            monitor.abort();
        }
        let entries: Vec<Arc<PrinterEntry>> =
            self.printers.read().await.values().cloned().collect();
        for entry in entries {
            if let Some(listener) = entry.listener.lock().await.take() {
                listener.abort();
            }
            if let Err(e) = entry.adapter.disconnect().await {
                let printer_id = entry.device.lock().await.id.clone();
                warn!(%printer_id, error = %e, "adapter disconnect failed during shutdown");
            }
        }
    }
}
