#![allow(dead_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use ur_fabrication::{ControllerConfig, FabricationConfig, ListenerConfig, RetryPolicy};

/// How the fake controller reacts to a script.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Mode {
    /// Record only, never report back.
    Silent,
    /// Report every `socket_send_line` string back to the listener.
    Execute,
    /// Report only the first line, as if the program never finished.
    AcknowledgeOnly,
}

/// Stands in for the UR secondary interface: accepts one script per
/// connection and optionally plays its feedback lines back.
pub struct FakeController {
    port: u16,
    scripts: Arc<Mutex<Vec<String>>>,
    handle: JoinHandle<()>,
}

impl FakeController {
    pub async fn start(mode: Mode) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let scripts = Arc::new(Mutex::new(Vec::new()));
        let recorded = scripts.clone();
        let handle = tokio::spawn(async move {
            while let Ok((mut stream, _)) = listener.accept().await {
                let recorded = recorded.clone();
                tokio::spawn(async move {
                    let mut script = String::new();
                    if stream.read_to_string(&mut script).await.is_err() {
                        return;
                    }
                    recorded.lock().unwrap().push(script.clone());
                    execute(&script, mode).await;
                });
            }
        });
        Self {
            port,
            scripts,
            handle,
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn scripts(&self) -> Vec<String> {
        self.scripts.lock().unwrap().clone()
    }

    pub fn stop_commands(&self) -> usize {
        self.scripts()
            .iter()
            .filter(|s| s.contains("stopl("))
            .count()
    }

    pub fn task_scripts(&self) -> Vec<String> {
        self.scripts()
            .into_iter()
            .filter(|s| !s.contains("stopl("))
            .collect()
    }
}

impl Drop for FakeController {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn execute(script: &str, mode: Mode) {
    if mode == Mode::Silent {
        return;
    }
    let mut target = None;
    let mut lines = Vec::new();
    for line in script.lines().map(str::trim) {
        if let Some(args) = line.strip_prefix("socket_open(") {
            let ip = first_quoted(args);
            let port = args
                .split(',')
                .nth(1)
                .and_then(|p| p.trim().parse::<u16>().ok());
            if let (Some(ip), Some(port)) = (ip, port) {
                target = Some(format!("{}:{}", ip, port));
            }
        } else if let Some(args) = line.strip_prefix("socket_send_line(\"") {
            if let Some(text) = args.split('"').next() {
                lines.push(text.to_string());
            }
        }
    }
    if mode == Mode::AcknowledgeOnly {
        lines.truncate(1);
    }
    let Some(target) = target else {
        return;
    };
    if let Ok(mut stream) = TcpStream::connect(&target).await {
        for line in lines {
            let _ = stream.write_all(format!("{}\n", line).as_bytes()).await;
        }
        let _ = stream.flush().await;
        // Give the listener time to read before the connection goes away.
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn first_quoted(text: &str) -> Option<&str> {
    text.split('"').nth(1)
}

pub fn config(controller_port: u16, retry: RetryPolicy) -> FabricationConfig {
    FabricationConfig {
        listener: ListenerConfig::new("127.0.0.1", 0),
        controller: ControllerConfig::new("127.0.0.1", controller_port),
        retry,
    }
}

/// Polls `condition` until it holds or `limit` passes.
pub async fn wait_until<F: FnMut() -> bool>(limit: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    false
}
