// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Scripted vendor channel for adapter and orchestrator tests.
//
// Reports are pushed through an mpsc pair so the listener task really
// awaits them; transfer and stat outcomes are queued up front.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, Mutex};

use druckwerk_core::error::{DruckwerkError, Result};

use super::channel::{VendorChannel, VendorCommand, VendorReport};

pub struct MockChannel {
    report_tx: std::sync::Mutex<Option<mpsc::UnboundedSender<VendorReport>>>,
    report_rx: Mutex<mpsc::UnboundedReceiver<VendorReport>>,
    transfer_script: Mutex<VecDeque<Result<()>>>,
    stat_script: Mutex<VecDeque<Result<Option<u64>>>>,
    commands: Mutex<Vec<VendorCommand>>,
    commands_closed: AtomicBool,
}

impl MockChannel {
    pub fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            report_tx: std::sync::Mutex::new(Some(tx)),
            report_rx: Mutex::new(rx),
            transfer_script: Mutex::new(VecDeque::new()),
            stat_script: Mutex::new(VecDeque::new()),
            commands: Mutex::new(Vec::new()),
            commands_closed: AtomicBool::new(false),
        })
    }

    /// Queue the outcome of the next `transfer_file` call.
    pub async fn script_transfer(&self, outcome: Result<()>) {
        self.transfer_script.lock().await.push_back(outcome);
    }

    /// Queue the outcome of the next `staged_file_size` call.
    pub async fn script_stat(&self, outcome: Result<Option<u64>>) {
        self.stat_script.lock().await.push_back(outcome);
    }

    /// Push a status report to whoever is blocked in `next_report`.
    pub fn push_report(&self, report: VendorReport) {
        if let Ok(guard) = self.report_tx.lock() {
            if let Some(tx) = guard.as_ref() {
                let _ = tx.send(report);
            }
        }
    }

    /// Drop the report sender, simulating a lost control stream.
    pub fn close_reports(&self) {
        if let Ok(mut guard) = self.report_tx.lock() {
            guard.take();
        }
    }

    /// Make every subsequent command write fail.
    pub fn close_commands(&self) {
        self.commands_closed.store(true, Ordering::SeqCst);
    }

    pub async fn sent_commands(&self) -> Vec<VendorCommand> {
        self.commands.lock().await.clone()
    }
}

#[async_trait]
impl VendorChannel for MockChannel {
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }

    async fn send_command(&self, command: &VendorCommand) -> Result<()> {
        if self.commands_closed.load(Ordering::SeqCst) {
            return Err(DruckwerkError::DeviceIo("control channel closed".into()));
        }
        self.commands.lock().await.push(command.clone());
        Ok(())
    }

    async fn next_report(&self) -> Result<VendorReport> {
        self.report_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| DruckwerkError::DeviceIo("report stream closed".into()))
    }

    async fn transfer_file(&self, _local: &Path, _remote_name: &str) -> Result<()> {
        self.transfer_script
            .lock()
            .await
            .pop_front()
            .unwrap_or(Ok(()))
    }

    async fn staged_file_size(&self, _remote_name: &str) -> Result<Option<u64>> {
        self.stat_script
            .lock()
            .await
            .pop_front()
            .unwrap_or_else(|| Err(DruckwerkError::DeviceIo("no stat scripted".into())))
    }
}
