//! Deduplicated fan-out of alert events to guardians.
//!
//! For each event the engine checks the dispatch ledger, claims the
//! (student, alert type) row, hands the alert off to every linked guardian
//! through a [`DeliveryChannel`], and only then records `last_sent_at`.
//! Handoff is the end of the engine's responsibility; final delivery is
//! the transport's problem.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::DeliveryError;
use crate::models::{AlertEvent, AlertType, NotificationLogEntry};
use crate::store::{DispatchLedger, MetricStore, NotificationHistory};

/// External sender (email, SMS, push). Returns a handoff id on success.
#[async_trait]
pub trait DeliveryChannel: Send + Sync {
    async fn send_notification(
        &self,
        recipient_id: Uuid,
        alert_type: AlertType,
        payload: &serde_json::Value,
    ) -> Result<String, DeliveryError>;

    fn channel_name(&self) -> &str;
}

/// Hands every notification to the log. Used when no transport is wired up.
pub struct LogChannel;

#[async_trait]
impl DeliveryChannel for LogChannel {
    async fn send_notification(
        &self,
        recipient_id: Uuid,
        alert_type: AlertType,
        payload: &serde_json::Value,
    ) -> Result<String, DeliveryError> {
        let handoff_id = Uuid::new_v4().to_string();
        tracing::info!(
            guardian_id = %recipient_id,
            alert_type = %alert_type,
            handoff_id = %handoff_id,
            payload = %payload,
            "Notification handed off"
        );
        Ok(handoff_id)
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DispatchReport {
    pub alerts_generated: usize,
    pub alerts_dispatched: usize,
    pub suppressed_by_dedup: usize,
    /// Events skipped because the student has no linked guardian.
    pub no_delivery_target: usize,
    pub notifications_sent: usize,
    pub handoff_failures: usize,
    /// Another run held the ledger row.
    pub claim_conflicts: usize,
    pub errors: Vec<String>,
}

impl DispatchReport {
    pub fn merge(&mut self, other: DispatchReport) {
        self.alerts_generated += other.alerts_generated;
        self.alerts_dispatched += other.alerts_dispatched;
        self.suppressed_by_dedup += other.suppressed_by_dedup;
        self.no_delivery_target += other.no_delivery_target;
        self.notifications_sent += other.notifications_sent;
        self.handoff_failures += other.handoff_failures;
        self.claim_conflicts += other.claim_conflicts;
        self.errors.extend(other.errors);
    }
}

pub fn context_payload(event: &AlertEvent) -> serde_json::Value {
    serde_json::json!({
        "student_id": event.student_id,
        "alert_type": event.alert_type.as_str(),
        "period_id": event.period_id,
        "computed_value": event.computed_value,
        "threshold_value": event.threshold_value,
        "generated_at": event.generated_at.to_rfc3339(),
        "offering_ids": event.offering_ids,
        "details": event.details,
    })
}

pub struct NotificationEngine {
    store: Arc<dyn MetricStore>,
    ledger: Arc<dyn DispatchLedger>,
    history: Arc<dyn NotificationHistory>,
    channel: Arc<dyn DeliveryChannel>,
    config: EngineConfig,
}

impl NotificationEngine {
    pub fn new(
        store: Arc<dyn MetricStore>,
        ledger: Arc<dyn DispatchLedger>,
        history: Arc<dyn NotificationHistory>,
        channel: Arc<dyn DeliveryChannel>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            history,
            channel,
            config,
        }
    }

    pub async fn dispatch(&self, events: &[AlertEvent], now: DateTime<Utc>) -> DispatchReport {
        let mut report = DispatchReport {
            alerts_generated: events.len(),
            ..DispatchReport::default()
        };

        for event in events {
            if let Err(e) = self.dispatch_one(event, now, &mut report).await {
                tracing::error!(
                    student_id = %event.student_id,
                    alert_type = %event.alert_type,
                    error = %e,
                    "Dispatch failed"
                );
                report.errors.push(format!(
                    "{} {}: {e:#}",
                    event.student_id, event.alert_type
                ));
            }
        }

        report
    }

    async fn dispatch_one(
        &self,
        event: &AlertEvent,
        now: DateTime<Utc>,
        report: &mut DispatchReport,
    ) -> anyhow::Result<()> {
        let last_sent = self
            .ledger
            .dispatch_record(event.student_id, event.alert_type)
            .await?
            .and_then(|record| record.last_sent_at);

        if let Some(last) = last_sent {
            if now - last < self.config.dedup_window() {
                tracing::debug!(
                    student_id = %event.student_id,
                    alert_type = %event.alert_type,
                    last_sent = %last,
                    "Alert suppressed (dedup window)"
                );
                report.suppressed_by_dedup += 1;
                return Ok(());
            }
        }

        let guardians = self.store.guardians_for_student(event.student_id).await?;
        if guardians.is_empty() {
            tracing::info!(
                student_id = %event.student_id,
                alert_type = %event.alert_type,
                "No guardian on file, alert undeliverable"
            );
            report.no_delivery_target += 1;
            return Ok(());
        }

        let claimed = self
            .ledger
            .claim(
                event.student_id,
                event.alert_type,
                last_sent,
                now,
                now + self.config.dispatch_lease(),
            )
            .await?;
        if !claimed {
            tracing::warn!(
                student_id = %event.student_id,
                alert_type = %event.alert_type,
                "Ledger row held by another dispatch, skipping"
            );
            report.claim_conflicts += 1;
            return Ok(());
        }

        report.alerts_dispatched += 1;
        let payload = context_payload(event);
        let mut delivered = 0usize;

        for link in &guardians {
            match self.hand_off(link.guardian_id, event.alert_type, &payload).await {
                Ok(handoff_id) => {
                    delivered += 1;
                    report.notifications_sent += 1;
                    let entry = NotificationLogEntry {
                        handoff_id,
                        student_id: event.student_id,
                        guardian_id: link.guardian_id,
                        alert_type: event.alert_type,
                        sent_at: now,
                        payload: payload.clone(),
                    };
                    // History is read-only; a failed write never blocks the ledger.
                    if let Err(e) = self.history.record_handoff(&entry).await {
                        tracing::warn!(error = %e, "Failed to record notification history");
                    }
                }
                Err(e) => {
                    report.handoff_failures += 1;
                    tracing::error!(
                        student_id = %event.student_id,
                        guardian_id = %link.guardian_id,
                        alert_type = %event.alert_type,
                        error = %e,
                        "Handoff failed after retries"
                    );
                }
            }
        }

        if delivered > 0 {
            self.ledger
                .complete(event.student_id, event.alert_type, now)
                .await?;
        } else {
            self.ledger
                .release(event.student_id, event.alert_type)
                .await?;
        }
        Ok(())
    }

    /// One guardian, retried with doubling backoff. Each attempt is bounded
    /// by the delivery timeout.
    async fn hand_off(
        &self,
        guardian_id: Uuid,
        alert_type: AlertType,
        payload: &serde_json::Value,
    ) -> Result<String, DeliveryError> {
        let attempts = self.config.delivery_max_attempts.max(1) as u32;
        let timeout = self.config.delivery_timeout();
        let mut last_err = DeliveryError::Rejected("no attempt made".to_string());

        for attempt in 1..=attempts {
            if attempt > 1 {
                tokio::time::sleep(self.config.delivery_backoff(attempt - 1)).await;
            }

            let send = self.channel.send_notification(guardian_id, alert_type, payload);
            match tokio::time::timeout(timeout, send).await {
                Ok(Ok(handoff_id)) => return Ok(handoff_id),
                Ok(Err(e)) => last_err = e,
                Err(_) => last_err = DeliveryError::Timeout(timeout.as_secs()),
            }

            tracing::warn!(
                channel = self.channel.channel_name(),
                guardian_id = %guardian_id,
                attempt,
                error = %last_err,
                "Handoff attempt failed"
            );
        }

        Err(last_err)
    }
}
