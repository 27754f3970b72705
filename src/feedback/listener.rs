use std::io::ErrorKind;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;

use crate::{FeedbackLineCodec, ListenerConfig, ListenerError, MessageStore};

/// What a generated script needs to report back to the listener.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEndpoint {
    pub ip: String,
    pub port: u16,
    pub socket_name: String,
}

struct Running {
    cancel: CancellationToken,
    acceptor: JoinHandle<()>,
    processor: JoinHandle<Result<usize, ListenerError>>,
    connections: TaskTracker,
}

/// TCP server receiving the controller's line-based progress reports.
///
/// Every accepted connection gets its own reader task that appends raw
/// lines to the [`MessageStore`]; a separate processing task converts them
/// into messages.
pub struct FeedbackListener {
    config: ListenerConfig,
    store: MessageStore,
    local_addr: Option<SocketAddr>,
    running: Option<Running>,
}

impl FeedbackListener {
    pub fn new(config: ListenerConfig) -> Self {
        Self::with_store(config, MessageStore::new())
    }

    /// Uses an existing store, e.g. one shared with tasks created earlier.
    pub fn with_store(config: ListenerConfig, store: MessageStore) -> Self {
        Self {
            config,
            store,
            local_addr: None,
            running: None,
        }
    }

    pub fn config(&self) -> &ListenerConfig {
        &self.config
    }

    pub fn store(&self) -> MessageStore {
        self.store.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn ip(&self) -> &str {
        &self.config.ip
    }

    /// The bound port once started, the configured one otherwise.
    pub fn port(&self) -> u16 {
        self.local_addr
            .map(|addr| addr.port())
            .unwrap_or(self.config.port)
    }

    pub fn socket_name(&self) -> &str {
        &self.config.socket_name
    }

    pub fn endpoint(&self) -> Option<FeedbackEndpoint> {
        self.local_addr.map(|addr| FeedbackEndpoint {
            ip: self.config.ip.clone(),
            port: addr.port(),
            socket_name: self.config.socket_name.clone(),
        })
    }

    /// Binds and starts serving. A listener that is already running is shut
    /// down and started again.
    pub async fn start(&mut self) -> Result<SocketAddr, ListenerError> {
        self.shutdown().await;

        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            if e.kind() == ErrorKind::AddrInUse {
                ListenerError::AddressInUse(bind_addr.clone())
            } else {
                ListenerError::Bind {
                    addr: bind_addr.clone(),
                    source: e,
                }
            }
        })?;
        let local_addr = listener.local_addr()?;
        log::info!(target: "feedback_listener", "Feedback listener started at {}.", local_addr);

        let cancel = CancellationToken::new();
        let connections = TaskTracker::new();

        let acceptor = tokio::spawn(accept_loop(
            listener,
            self.store.clone(),
            self.config.clone(),
            cancel.clone(),
            connections.clone(),
        ));

        // Runs for as long as the listener does, the idle timeout only applies to `listen`.
        let processor = {
            let store = self.store.clone();
            let cancel = cancel.clone();
            let interval = self.config.processing_interval;
            tokio::spawn(async move { process_messages(&store, &cancel, interval, None).await })
        };

        self.local_addr = Some(local_addr);
        self.running = Some(Running {
            cancel,
            acceptor,
            processor,
            connections,
        });
        Ok(local_addr)
    }

    /// Runs the processing loop on the caller's task until `stop` fires or
    /// no message arrives for `idle_timeout` (the configured
    /// `processing_timeout` when `None`). Returns the number of messages
    /// added meanwhile.
    pub async fn listen(
        &self,
        stop: &CancellationToken,
        idle_timeout: Option<Duration>,
    ) -> Result<usize, ListenerError> {
        let idle_timeout = idle_timeout.or(self.config.processing_timeout);
        process_messages(&self.store, stop, self.config.processing_interval, idle_timeout).await
    }

    /// Empties the raw buffer and the message store.
    pub fn clear(&self) {
        self.store.clear();
    }

    /// Stops accepting, stops the processing loop, joins every task and
    /// releases the port. Safe to call when not started.
    pub async fn shutdown(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        running.cancel.cancel();

        if let Err(e) = running.acceptor.await {
            log::error!(target: "feedback_listener", "Acceptor task failed: {}", e);
        }
        running.connections.close();
        running.connections.wait().await;
        match running.processor.await {
            Ok(Ok(count)) => {
                log::debug!(target: "feedback_listener",
                    "Processing loop converted {} messages.", count)
            }
            Ok(Err(_)) => (),
            Err(e) => log::error!(target: "feedback_listener", "Processing task failed: {}", e),
        }

        if let Some(addr) = self.local_addr.take() {
            log::info!(target: "feedback_listener", "Feedback listener at {} shut down.", addr);
        }
    }
}

impl Drop for FeedbackListener {
    fn drop(&mut self) {
        // Tasks cannot be joined here, but they all watch this token.
        if let Some(running) = &self.running {
            running.cancel.cancel();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    store: MessageStore,
    config: ListenerConfig,
    cancel: CancellationToken,
    connections: TaskTracker,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    log::info!(target: "feedback_listener", "Connected to client at {}.", peer);
                    connections.spawn(handle_connection(
                        stream,
                        peer,
                        store.clone(),
                        config.clone(),
                        cancel.clone(),
                    ));
                }
                Err(e) => {
                    log::warn!(target: "feedback_listener", "Failed to accept connection: {}", e);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        }
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    store: MessageStore,
    config: ListenerConfig,
    cancel: CancellationToken,
) {
    let read_timeout = config.read_timeout;
    let mut lines = Framed::new(stream, FeedbackLineCodec::new(config.max_line_length));
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => break,
            next = timeout(read_timeout, lines.next()) => next,
        };
        let line = match next {
            // Nothing within the read timeout, check for shutdown and go again.
            Err(_) => continue,
            Ok(None) => {
                log::info!(target: "feedback_listener", "Client {} closed the connection.", peer);
                break;
            }
            Ok(Some(Err(e))) => {
                log::warn!(target: "feedback_listener", "Reading from {} failed: {}", peer, e);
                break;
            }
            Ok(Some(Ok(line))) => line,
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        log::debug!(target: "feedback_listener", "Received from {}: {}", peer, line);
        store.push_raw(line.to_string());

        if config.echo_replies {
            if let Err(e) = lines.send(format!("Message from client: {}", line)).await {
                log::warn!(target: "feedback_listener", "Could not reply to {}: {}", peer, e);
                break;
            }
        }
    }
}

/// Converts pending raw lines until `stop` fires or the store stays idle for
/// `idle_timeout`.
pub async fn process_messages(
    store: &MessageStore,
    stop: &CancellationToken,
    interval: Duration,
    idle_timeout: Option<Duration>,
) -> Result<usize, ListenerError> {
    let mut processed = 0;
    let mut seen = store.len();
    let mut last_activity = Instant::now();
    loop {
        if stop.is_cancelled() {
            return Ok(processed);
        }
        store.process_pending();
        // Measured on the store, so messages converted by another loop count too.
        let len = store.len();
        if len != seen {
            processed += len.saturating_sub(seen);
            seen = len;
            last_activity = Instant::now();
        } else if let Some(idle_timeout) = idle_timeout {
            if last_activity.elapsed() >= idle_timeout {
                log::warn!(target: "feedback_listener", "Listening to server timed out.");
                return Err(ListenerError::ListenTimeout(idle_timeout));
            }
        }
        tokio::select! {
            _ = stop.cancelled() => (),
            _ = tokio::time::sleep(interval) => (),
        }
    }
}
