use bytes::Bytes;
use chrono::{Local, NaiveDateTime};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, info_span, Instrument};

use crate::relay_modules::dedup::Deduplicator;
use crate::relay_modules::dispatcher::{AlertSender, DispatchOutcome};
use crate::relay_modules::protocol::{parse_chunk, MonitordMessage};
use crate::relay_modules::reporting::MetricsReporter;
use crate::relay_modules::side_effects::{invoke_local_actions, LocalActions};
use crate::relay_modules::trigger::{is_suppressed, TriggerTable};

/// Where processing of a single alert stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineOutcome {
    Duplicate,
    NotInFilter,
    Suppressed {
        trigger: String,
    },
    Dispatched {
        trigger: String,
        outcome: DispatchOutcome,
        local_actions: bool,
    },
}

/// Bytes read from the socket, stamped when they arrived.
///
/// Workers may pick a chunk up much later than it was read, so the debounce
/// window and the suppression calendar use these stamps, never the time of
/// processing.
#[derive(Debug, Clone)]
pub struct ReceivedChunk {
    pub data: Bytes,
    pub received_at: Instant,
    pub local_time: NaiveDateTime,
}

impl ReceivedChunk {
    pub fn now(data: Bytes) -> Self {
        Self {
            data,
            received_at: Instant::now(),
            local_time: Local::now().naive_local(),
        }
    }
}

/// Runs every received alert through dedup, trigger matching, the
/// suppression calendar, dispatch and local actions.
pub struct AlertPipeline {
    triggers: Arc<TriggerTable>,
    dedup: Arc<Deduplicator>,
    sender: Arc<dyn AlertSender>,
    local_actions: Arc<dyn LocalActions>,
    metrics: Arc<dyn MetricsReporter>,
}

impl AlertPipeline {
    pub fn new(
        triggers: Arc<TriggerTable>,
        dedup: Arc<Deduplicator>,
        sender: Arc<dyn AlertSender>,
        local_actions: Arc<dyn LocalActions>,
        metrics: Arc<dyn MetricsReporter>,
    ) -> Self {
        Self {
            triggers,
            dedup,
            sender,
            local_actions,
            metrics,
        }
    }

    /// Decodes a raw socket chunk and processes every message in it.
    /// Malformed input is logged and dropped.
    pub async fn handle_chunk(&self, chunk: &ReceivedChunk) -> Vec<PipelineOutcome> {
        let mut outcomes = Vec::new();
        for parsed in parse_chunk(&chunk.data) {
            match parsed {
                Ok(message) => {
                    if let Some(outcome) = self
                        .handle_message(message, chunk.received_at, chunk.local_time)
                        .await
                    {
                        outcomes.push(outcome);
                    }
                }
                Err(e) => {
                    error!(error = %e, "Discarding unknown or malformed command.");
                }
            }
        }
        outcomes
    }

    pub async fn handle_message(
        &self,
        message: MonitordMessage,
        received_at: Instant,
        local_now: NaiveDateTime,
    ) -> Option<PipelineOutcome> {
        match message {
            MonitordMessage::Welcome { version } => {
                info!(monitord_version = %version, "Received welcome.");
                None
            }
            MonitordMessage::Alert { key, fields } => {
                debug!(?fields, "Received alert fields.");
                let span = info_span!("alert", alert_key = %key);
                let outcome = self
                    .process_alert(&key, received_at, local_now)
                    .instrument(span)
                    .await;
                Some(outcome)
            }
        }
    }

    /// Processes one alert key. `received_at` drives the debounce window and
    /// `local_now` the suppression calendar.
    pub async fn process_alert(
        &self,
        key: &str,
        received_at: Instant,
        local_now: NaiveDateTime,
    ) -> PipelineOutcome {
        self.metrics.report_alert(key);

        if self.dedup.is_duplicate(key, received_at) {
            debug!("Repeat of the previous alert inside the debounce window. Dropping.");
            return PipelineOutcome::Duplicate;
        }
        info!("Received alarm.");

        let Some(trigger) = self.triggers.match_key(key) else {
            info!("Received alarm not in filter. Stopping.");
            return PipelineOutcome::NotInFilter;
        };
        info!(trigger = %trigger.name, time = %local_now.time(), "Received alarm in filter.");

        if is_suppressed(trigger, local_now) {
            info!(trigger = %trigger.name, "Test alarm window. Stopping.");
            return PipelineOutcome::Suppressed {
                trigger: trigger.name.clone(),
            };
        }

        info!(trigger = %trigger.name, "Starting alarm tasks.");
        let outcome = self.sender.dispatch(trigger, key).await;

        invoke_local_actions(self.local_actions.as_ref(), trigger).await;

        PipelineOutcome::Dispatched {
            trigger: trigger.name.clone(),
            outcome,
            local_actions: trigger.local,
        }
    }
}
