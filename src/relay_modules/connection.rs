use bytes::Bytes;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::relay_modules::pipeline::ReceivedChunk;
use crate::relay_modules::reporting::ConnectionErrorReporter;

const READ_BUFFER_SIZE: usize = 1024;
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(10);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[derive(Debug, Clone, Copy)]
pub struct ReconnectPolicy {
    /// Wait after a failed connection attempt.
    pub connect_retry_delay: Duration,
    /// Wait after an established connection was lost.
    pub reconnect_delay: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            connect_retry_delay: CONNECT_RETRY_DELAY,
            reconnect_delay: RECONNECT_DELAY,
        }
    }
}

enum ReadEnd {
    Cancelled,
    PeerClosed,
    ReadFailed(io::Error),
    QueueClosed,
}

/// Keeps a TCP connection to monitord open for the lifetime of the process
/// and forwards everything read from it to the pipeline queue.
pub struct ConnectionManager {
    address: String,
    policy: ReconnectPolicy,
    error_reporter: Arc<dyn ConnectionErrorReporter>,
    state_tx: watch::Sender<ConnectionState>,
}

impl ConnectionManager {
    pub fn new(
        address: impl Into<String>,
        policy: ReconnectPolicy,
        error_reporter: Arc<dyn ConnectionErrorReporter>,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            address: address.into(),
            policy,
            error_reporter,
            state_tx,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, state: ConnectionState) {
        debug!(?state, "Connection state changed.");
        self.state_tx.send_replace(state);
    }

    async fn connect(&self) -> io::Result<TcpStream> {
        match tokio::time::timeout(CONNECT_TIMEOUT, TcpStream::connect(&self.address)).await {
            Ok(result) => result,
            Err(_) => Err(io::Error::new(io::ErrorKind::TimedOut, "connect timed out")),
        }
    }

    /// Connects, reads and reconnects until `cancel` fires. Returns early only
    /// if the pipeline queue has been closed.
    pub async fn run(&self, chunks_tx: mpsc::Sender<ReceivedChunk>, cancel: CancellationToken) {
        let mut consecutive_failures: u32 = 0;

        loop {
            self.set_state(ConnectionState::Connecting);
            info!(address = %self.address, "Connecting to monitord.");

            let connected = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                result = self.connect() => result,
            };

            let delay = match connected {
                Ok(stream) => {
                    consecutive_failures = 0;
                    self.set_state(ConnectionState::Connected);
                    info!(address = %self.address, "Connected to monitord.");

                    match self.read_loop(stream, &chunks_tx, &cancel).await {
                        ReadEnd::Cancelled => break,
                        ReadEnd::QueueClosed => {
                            error!("Pipeline queue closed. Stopping connection manager.");
                            break;
                        }
                        ReadEnd::PeerClosed => {
                            warn!(address = %self.address, "Connection lost! Restarting.");
                        }
                        ReadEnd::ReadFailed(e) => {
                            warn!(address = %self.address, error = %e, "Read failed. Restarting.");
                        }
                    }
                    self.policy.reconnect_delay
                }
                Err(e) => {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    warn!(address = %self.address, error = %e, "Failed to connect.");
                    self.error_reporter.report_connection_error(consecutive_failures);
                    self.policy.connect_retry_delay
                }
            };

            self.set_state(ConnectionState::Disconnected);
            debug!(delay_ms = delay.as_millis() as u64, "Sleeping before next connection attempt.");
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        self.set_state(ConnectionState::Disconnected);
        info!("Connection manager stopped.");
    }

    async fn read_loop(
        &self,
        mut stream: TcpStream,
        chunks_tx: &mpsc::Sender<ReceivedChunk>,
        cancel: &CancellationToken,
    ) -> ReadEnd {
        let mut buf = [0u8; READ_BUFFER_SIZE];

        let end = loop {
            let read = tokio::select! {
                biased;
                _ = cancel.cancelled() => break ReadEnd::Cancelled,
                read = stream.read(&mut buf) => read,
            };

            match read {
                Ok(0) => break ReadEnd::PeerClosed,
                Ok(n) => {
                    let chunk = ReceivedChunk::now(Bytes::copy_from_slice(&buf[..n]));
                    debug!(received = ?chunk.data, "Received chunk.");
                    let queued = tokio::select! {
                        biased;
                        _ = cancel.cancelled() => break ReadEnd::Cancelled,
                        queued = chunks_tx.send(chunk) => queued,
                    };
                    if queued.is_err() {
                        break ReadEnd::QueueClosed;
                    }
                }
                Err(e) => break ReadEnd::ReadFailed(e),
            }
        };

        if let Err(e) = stream.shutdown().await {
            debug!(error = %e, "Error while closing connection.");
        }
        end
    }
}
