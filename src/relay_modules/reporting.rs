use std::process::Stdio;
use std::sync::Arc;
use tokio::process::Command as TokioCommand;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

pub const DEFAULT_ZABBIX_SENDER: &str = "/usr/bin/zabbix_sender";
pub const DEFAULT_ZABBIX_AGENT_CONFIG: &str = "/etc/zabbix/zabbix_agentd.conf";
pub const DEFAULT_ZABBIX_ITEM_KEY: &str = "receivedZVEI";
/// Upper bound on concurrently running `zabbix_sender` processes.
pub const MAX_PENDING_REPORTS: usize = 16;

/// Receives every alert key read from the socket, including duplicates and
/// keys without a trigger. Implementations must not block the caller.
pub trait MetricsReporter: Send + Sync {
    fn report_alert(&self, key: &str);
}

/// Told about each failed connection attempt, with the number of consecutive
/// failures so far.
pub trait ConnectionErrorReporter: Send + Sync {
    fn report_connection_error(&self, consecutive_failures: u32);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogConnectionErrorReporter;

impl ConnectionErrorReporter for LogConnectionErrorReporter {
    fn report_connection_error(&self, consecutive_failures: u32) {
        error!(consecutive_failures, "Connection error count: {}", consecutive_failures);
    }
}

/// Pushes each alert key to Zabbix through `zabbix_sender`.
///
/// At most [`MAX_PENDING_REPORTS`] processes run at once; reports beyond that
/// are dropped with a warning rather than queued.
#[derive(Debug, Clone)]
pub struct ZabbixMetricsReporter {
    sender_path: String,
    agent_config: String,
    item_key: String,
    pending: Arc<Semaphore>,
}

impl ZabbixMetricsReporter {
    pub fn new(
        sender_path: impl Into<String>,
        agent_config: impl Into<String>,
        item_key: impl Into<String>,
    ) -> Self {
        Self {
            sender_path: sender_path.into(),
            agent_config: agent_config.into(),
            item_key: item_key.into(),
            pending: Arc::new(Semaphore::new(MAX_PENDING_REPORTS)),
        }
    }
}

impl Default for ZabbixMetricsReporter {
    fn default() -> Self {
        Self::new(
            DEFAULT_ZABBIX_SENDER,
            DEFAULT_ZABBIX_AGENT_CONFIG,
            DEFAULT_ZABBIX_ITEM_KEY,
        )
    }
}

impl MetricsReporter for ZabbixMetricsReporter {
    fn report_alert(&self, key: &str) {
        let Ok(permit) = Arc::clone(&self.pending).try_acquire_owned() else {
            warn!(alert_key = %key, "Too many zabbix_sender processes running. Dropping report.");
            return;
        };

        let mut command = TokioCommand::new(&self.sender_path);
        command
            .args([
                "-c",
                self.agent_config.as_str(),
                "-k",
                self.item_key.as_str(),
                "-o",
                key,
            ])
            .stdin(Stdio::null());
        let key = key.to_string();

        tokio::spawn(async move {
            let _permit = permit;
            match command.output().await {
                Ok(output) if output.status.success() => {
                    debug!(alert_key = %key, "Alert reported to zabbix.");
                }
                Ok(output) => {
                    warn!(
                        alert_key = %key,
                        status = %output.status,
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "zabbix_sender exited with failure."
                    );
                }
                Err(e) => {
                    warn!(alert_key = %key, error = %e, "Failed to run zabbix_sender.");
                }
            }
        });
    }
}
