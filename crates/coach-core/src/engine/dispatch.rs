//! The dispatch pass: hand due messages to the transport in `order`.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use super::Engine;
use crate::error::Result;
use crate::model::{DialogMessage, DialogMessageType, Intervention, Participant};
use crate::store::queries::{ByOrder, DialogMessageQuery, InterventionQuery, ParticipantQuery};
use crate::transport::TransportError;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub sent: usize,
    pub activations: usize,
    /// Messages left pending after a retryable transport failure.
    pub retried: usize,
    pub discarded: usize,
    pub failures: usize,
}

enum Sent {
    Delivered,
    Activated,
    Retry,
    Discarded,
}

impl Engine {
    /// Dispatch every due message of every monitored participant of a
    /// running intervention.
    pub fn run_dispatch_pass(&self) -> Result<DispatchReport> {
        let now = self.now();
        let mut report = DispatchReport::default();

        let interventions: Vec<Intervention> =
            self.store.find(&InterventionQuery::ActiveAndMonitoringActive)?;
        for intervention in &interventions {
            let participants: Vec<Participant> = self
                .store
                .find(&ParticipantQuery::ByInterventionAndMonitoringActive(intervention.id))?;
            for participant in participants {
                if self
                    .store
                    .count(&DialogMessageQuery::DueForSending(participant.id, now))?
                    == 0
                {
                    continue;
                }
                let _guard = self.locks.lock(participant.id);
                // An opt-out may have landed since the listing above.
                let participant = match self.monitored(participant.id) {
                    Ok(Some(participant)) => participant,
                    Ok(None) => {
                        tracing::debug!(participant = %participant.id, "not monitored, messages held");
                        continue;
                    }
                    Err(e) => {
                        report.failures += 1;
                        tracing::error!(participant = %participant.id, "dispatch failed: {e}");
                        continue;
                    }
                };
                if let Err(e) = self.dispatch_participant(intervention, &participant, now, &mut report)
                {
                    report.failures += 1;
                    tracing::error!(participant = %participant.id, "dispatch failed: {e}");
                }
            }
        }

        if report != DispatchReport::default() {
            tracing::info!(?report, "dispatch pass finished");
        }
        Ok(report)
    }

    fn dispatch_participant(
        &self,
        intervention: &Intervention,
        participant: &Participant,
        now: DateTime<Utc>,
        report: &mut DispatchReport,
    ) -> Result<()> {
        // Activations may create further due messages, so the due list is
        // fetched again after every message.
        let mut attempted: HashSet<Uuid> = HashSet::new();
        while attempted.len() < self.config.max_messages_per_dispatch_pass {
            let due: Vec<DialogMessage> = self.store.find_sorted(
                &DialogMessageQuery::DueForSending(participant.id, now),
                &ByOrder::Asc,
            )?;
            let Some(message) = due.into_iter().find(|m| !attempted.contains(&m.id)) else {
                break;
            };
            attempted.insert(message.id);

            match self.dispatch_message(intervention, participant, message, now)? {
                Sent::Delivered => report.sent += 1,
                Sent::Activated => report.activations += 1,
                Sent::Discarded => report.discarded += 1,
                Sent::Retry => {
                    report.retried += 1;
                    break;
                }
            }
        }
        Ok(())
    }

    fn dispatch_message(
        &self,
        intervention: &Intervention,
        participant: &Participant,
        mut message: DialogMessage,
        now: DateTime<Utc>,
    ) -> Result<Sent> {
        let ledger = self.ledger();

        if message.kind == DialogMessageType::MicroDialogActivation {
            ledger.mark_sending(&mut message, now)?;
            ledger.mark_sent(&mut message, now)?;
            let Some(micro_dialog) = message.related_micro_dialog else {
                tracing::error!(message = %message.id, "activation without micro-dialog");
                return Ok(Sent::Activated);
            };
            let outcome = self.start_micro_dialog(participant, micro_dialog, now)?;
            tracing::debug!(participant = %participant.id, %micro_dialog, ?outcome, "micro-dialog activated");
            return Ok(Sent::Activated);
        }

        let Some(option) = self.dialog_option(participant.id, message.supervisor_message)? else {
            tracing::error!(
                participant = %participant.id,
                message = %message.id,
                supervisor = message.supervisor_message,
                "no dialog option to deliver message, discarding it"
            );
            ledger.discard(&message)?;
            return Ok(Sent::Discarded);
        };

        ledger.mark_sending(&mut message, now)?;
        match self.transport.dispatch(&option, &message, intervention.sender()) {
            Ok(()) => {
                ledger.mark_sent(&mut message, now)?;
                tracing::debug!(participant = %participant.id, message = %message.id, order = message.order, "message sent");
                Ok(Sent::Delivered)
            }
            Err(TransportError::Retryable(reason)) => {
                tracing::warn!(message = %message.id, "send failed, retrying later: {reason}");
                ledger.revert_to_prepared(&mut message, now)?;
                Ok(Sent::Retry)
            }
            Err(TransportError::InvalidConfiguration(reason)) => {
                tracing::error!(message = %message.id, "send can never succeed, discarding message: {reason}");
                ledger.discard(&message)?;
                Ok(Sent::Discarded)
            }
        }
    }
}
