// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// End-to-end exercise of the TCP vendor channel against a scripted
// in-process firmware: control reports, command handling, file staging
// with both clean and truncated acks, and stat queries.

use std::collections::HashMap;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Mutex;

use druckwerk_core::types::PrinterStatus;
use druckwerk_fleet::adapter::{BambuAdapter, TcpVendorChannel};
use druckwerk_fleet::DeviceAdapter;

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter("druckwerk_fleet=debug")
        .with_test_writer()
        .try_init()
        .ok();
}

/// Bind the control port and the adjacent data port as one pair.
async fn bind_port_pair() -> (TcpListener, TcpListener, u16) {
    loop {
        let control = TcpListener::bind(("127.0.0.1", 0)).await.unwrap();
        let port = control.local_addr().unwrap().port();
        if port == u16::MAX {
            continue;
        }
        if let Ok(data) = TcpListener::bind(("127.0.0.1", port + 1)).await {
            return (control, data, port);
        }
    }
}

type Staged = Arc<Mutex<HashMap<String, u64>>>;

/// Control side: announce IDLE, then answer start/stop commands with
/// RUNNING and FINISH reports.
async fn run_control(listener: TcpListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    let idle = serde_json::to_string(&json!({"state": "IDLE"})).unwrap();
    write_half.write_all(idle.as_bytes()).await.unwrap();
    write_half.write_all(b"\n").await.unwrap();

    while let Ok(Some(line)) = lines.next_line().await {
        let command: Value = serde_json::from_str(&line).unwrap();
        if command["command"] == "start_print" {
            let running = serde_json::to_string(&json!({
                "state": "RUNNING",
                "percent": 30,
                "layer": 36,
                "total_layers": 120,
            }))
            .unwrap();
            write_half.write_all(running.as_bytes()).await.unwrap();
            write_half.write_all(b"\n").await.unwrap();

            let finish = serde_json::to_string(&json!({"state": "FINISH"})).unwrap();
            write_half.write_all(finish.as_bytes()).await.unwrap();
            write_half.write_all(b"\n").await.unwrap();
        }
    }
}

/// Data side: accept transfers and stat queries. With `truncate_acks`
/// the firmware consumes the whole file but still acks 426, which is
/// exactly the quirk the adapter has to tolerate.
async fn run_data(listener: TcpListener, staged: Staged, truncate_acks: bool) {
    loop {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let staged = Arc::clone(&staged);
        tokio::spawn(async move {
            handle_data_conn(stream, staged, truncate_acks).await;
        });
    }
}

async fn handle_data_conn(stream: TcpStream, staged: Staged, truncate_acks: bool) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let mut header = String::new();
    if reader.read_line(&mut header).await.unwrap_or(0) == 0 {
        return;
    }
    let header: Value = serde_json::from_str(header.trim_end()).unwrap();

    match header["op"].as_str() {
        Some("put") => {
            let name = header["name"].as_str().unwrap().to_string();
            let size = header["size"].as_u64().unwrap();
            let mut body = vec![0u8; size as usize];
            reader.read_exact(&mut body).await.unwrap();
            staged.lock().await.insert(name, size);

            let ack = if truncate_acks {
                json!({"code": 426, "message": "transfer truncated"})
            } else {
                json!({"code": 226, "message": "transfer complete"})
            };
            let line = serde_json::to_string(&ack).unwrap();
            write_half.write_all(line.as_bytes()).await.unwrap();
            write_half.write_all(b"\n").await.unwrap();
        }
        Some("stat") => {
            let name = header["name"].as_str().unwrap();
            let reply = match staged.lock().await.get(name) {
                Some(size) => json!({"code": 200, "size": size}),
                None => json!({"code": 404, "message": "no such file"}),
            };
            let line = serde_json::to_string(&reply).unwrap();
            write_half.write_all(line.as_bytes()).await.unwrap();
            write_half.write_all(b"\n").await.unwrap();
        }
        _ => {}
    }
}

fn test_channel(port: u16) -> TcpVendorChannel {
    TcpVendorChannel::new(
        "127.0.0.1",
        port,
        Duration::from_secs(5),
        Duration::from_secs(5),
        Duration::from_secs(10),
    )
}

fn payload_file(bytes: &[u8]) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(bytes).unwrap();
    file.flush().unwrap();
    file
}

#[tokio::test]
async fn adapter_drives_a_print_over_tcp() {
    init_tracing();
    let (control, data, port) = bind_port_pair().await;
    let staged: Staged = Arc::new(Mutex::new(HashMap::new()));
    tokio::spawn(run_control(control));
    tokio::spawn(run_data(data, Arc::clone(&staged), false));

    let adapter = BambuAdapter::new("bench-bambu", Arc::new(test_channel(port)));
    let mut events = adapter.subscribe();
    adapter.connect().await.unwrap();

    assert_eq!(events.recv().await.unwrap().status, PrinterStatus::Idle);

    let payload = payload_file(b"G28\nG1 X50 Y50\nM104 S0\n");
    adapter.send_file(payload.path(), "plate_1.3mf").await.unwrap();
    assert_eq!(staged.lock().await.get("plate_1.3mf"), Some(&23));

    adapter.start_print("plate_1.3mf").await.unwrap();

    let running = events.recv().await.unwrap();
    assert_eq!(running.status, PrinterStatus::Busy);
    assert_eq!(running.progress.unwrap().percent, 30);

    assert_eq!(events.recv().await.unwrap().status, PrinterStatus::Idle);
    assert_eq!(adapter.status().await.unwrap(), PrinterStatus::Idle);

    adapter.disconnect().await.unwrap();
    assert_eq!(adapter.status().await.unwrap(), PrinterStatus::Offline);
}

#[tokio::test]
async fn truncated_ack_is_verified_against_the_staged_file() {
    init_tracing();
    let (control, data, port) = bind_port_pair().await;
    let staged: Staged = Arc::new(Mutex::new(HashMap::new()));
    tokio::spawn(run_control(control));
    tokio::spawn(run_data(data, Arc::clone(&staged), true));

    let adapter = BambuAdapter::new("bench-bambu", Arc::new(test_channel(port)));
    adapter.connect().await.unwrap();

    // The firmware acks 426 even though the file arrived whole; the
    // stat probe confirms the staged size and the upload succeeds.
    let payload = payload_file(b"G28\nM104 S0\n");
    adapter.send_file(payload.path(), "plate_1.3mf").await.unwrap();
    assert_eq!(staged.lock().await.get("plate_1.3mf"), Some(&12));

    adapter.disconnect().await.unwrap();
}
