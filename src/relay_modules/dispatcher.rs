use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::relay_modules::config::Config;
use crate::relay_modules::trigger::Trigger;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Alarm API returned non-success status: {0}")]
    BadStatus(StatusCode),
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Delivered { attempts: u32, status: StatusCode },
    Failed { attempts: u32, last_error: String },
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            DispatchOutcome::Delivered { attempts, .. } | DispatchOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

/// Forwards a matched alert to the remote alarm-management API.
#[async_trait]
pub trait AlertSender: Send + Sync {
    /// Never fails: exhausted retries are reported through the outcome.
    async fn dispatch(&self, trigger: &Trigger, key: &str) -> DispatchOutcome;
}

/// Sends the trigger's request parameters as a GET query to the alarm API,
/// retrying on any failure.
pub struct HttpAlertDispatcher {
    client: Client,
    url: String,
    max_attempts: u32,
    retry_delay: Duration,
}

impl HttpAlertDispatcher {
    pub fn new(
        url: impl Into<String>,
        max_attempts: u32,
        retry_delay: Duration,
    ) -> Result<Self, DispatchError> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            url: url.into(),
            // A request is always made at least once.
            max_attempts: max_attempts.max(1),
            retry_delay,
        })
    }

    pub fn from_config(config: &Config) -> Result<Self, DispatchError> {
        Self::new(config.url.clone(), config.retries, config.retry_delay_duration())
    }

    async fn send_once(&self, trigger: &Trigger) -> Result<StatusCode, DispatchError> {
        let response = self
            .client
            .get(&self.url)
            .query(&trigger.request)
            .send()
            .await?;
        let status = response.status();
        info!(trigger = %trigger.name, status = status.as_u16(), "Received status code.");

        if !status.is_success() {
            return Err(DispatchError::BadStatus(status));
        }
        Ok(status)
    }
}

#[async_trait]
impl AlertSender for HttpAlertDispatcher {
    async fn dispatch(&self, trigger: &Trigger, key: &str) -> DispatchOutcome {
        let mut last_error = String::new();

        for attempt in 1..=self.max_attempts {
            match self.send_once(trigger).await {
                Ok(status) => {
                    info!(alert_key = %key, trigger = %trigger.name, attempt, "Alarm dispatched.");
                    return DispatchOutcome::Delivered {
                        attempts: attempt,
                        status,
                    };
                }
                Err(e) => {
                    warn!(
                        alert_key = %key,
                        trigger = %trigger.name,
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %e,
                        "Alarm dispatch attempt failed."
                    );
                    last_error = e.to_string();
                }
            }

            if attempt < self.max_attempts {
                tokio::time::sleep(self.retry_delay).await;
            }
        }

        error!(
            alert_key = %key,
            trigger = %trigger.name,
            attempts = self.max_attempts,
            error = %last_error,
            "Alarm dispatch failed, giving up."
        );
        DispatchOutcome::Failed {
            attempts: self.max_attempts,
            last_error,
        }
    }
}
