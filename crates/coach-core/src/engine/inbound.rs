//! Inbound messages: sender lookup, stop words, intentions, answers and
//! unexpected messages.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Engine, Timing};
use crate::dialog::AnswerOutcome;
use crate::error::Result;
use crate::model::{
    DialogMessage, DialogOption, DialogOptionType, Intervention, MonitoringMessage,
    MonitoringMessageGroup, MonitoringRuleKind, Participant,
};
use crate::resolver::{ResolutionCase, Resolver};
use crate::store::queries::{DialogOptionQuery, InterventionQuery};
use crate::variables::{self, clean_received_message, VariableStore};

/// A message received on a channel, waiting for the inbound worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub channel: DialogOptionType,
    pub sender: String,
    pub body: String,
    #[serde(default)]
    pub client_id: Option<String>,
    /// `order` of the outbound message this replies to, when the channel knows it.
    #[serde(default)]
    pub order: Option<u64>,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InboundOutcome {
    UnknownSender,
    Duplicate,
    StoppedMonitoring { participant: Uuid },
    Answered { participant: Uuid, message: Uuid, accepted: bool },
    Unexpected { participant: Uuid, message: Uuid, handled: bool },
    Intention { participant: Uuid, message: Uuid },
}

impl Engine {
    /// Queue a received message for the next inbound pass.
    pub fn enqueue(&self, message: InboundMessage) {
        tracing::debug!(channel = %message.channel, sender = %message.sender, "inbound message queued");
        self.inbox
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push_back(message);
    }

    pub fn inbox_len(&self) -> usize {
        self.inbox.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Handle every queued inbound message. Returns how many were taken off
    /// the queue; failures are logged.
    pub fn run_inbound_pass(&self) -> usize {
        let mut handled = 0;
        loop {
            let next = self
                .inbox
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front();
            let Some(message) = next else {
                break;
            };
            handled += 1;
            match self.handle_received_message(
                message.channel,
                &message.sender,
                &message.body,
                message.client_id.as_deref(),
                message.order,
                message.received_at,
            ) {
                Ok(outcome) => tracing::debug!(?outcome, "inbound message handled"),
                Err(e) => tracing::error!(sender = %message.sender, "inbound message failed: {e}"),
            }
        }
        handled
    }

    /// Process one received message synchronously.
    pub fn handle_received_message(
        &self,
        channel: DialogOptionType,
        sender: &str,
        body: &str,
        client_id: Option<&str>,
        order: Option<u64>,
        received_at: DateTime<Utc>,
    ) -> Result<InboundOutcome> {
        let Some(participant) = self.participant_by_address(channel, sender)? else {
            tracing::warn!(%channel, sender, "message from unknown sender ignored");
            return Ok(InboundOutcome::UnknownSender);
        };

        let _guard = self.locks.lock(participant.id);
        let ledger = self.ledger();
        let now = self.now();

        if let Some(id) = client_id {
            if ledger.is_duplicate(participant.id, id)? {
                tracing::info!(participant = %participant.id, client_id = id, "duplicate message ignored");
                return Ok(InboundOutcome::Duplicate);
            }
        }

        let cleaned = clean_received_message(body);

        if let Some(intention) = self.strip_intention_prefix(body) {
            let cleaned = clean_received_message(intention);
            let message =
                ledger.create_received(participant.id, body, &cleaned, true, client_id, received_at)?;
            self.variables()
                .write_internal(participant.id, variables::INTENTION, &cleaned)?;
            self.react_to_received(&participant, &message, MonitoringRuleKind::UserIntention, now)?;
            return Ok(InboundOutcome::Intention {
                participant: participant.id,
                message: message.id,
            });
        }

        if self.is_stop_word(&cleaned) {
            let mut message =
                ledger.create_received(participant.id, body, &cleaned, false, client_id, received_at)?;
            ledger.mark_auto_processed(&mut message, now)?;
            if let Some(mut status) = self.status_of(participant.id)? {
                if !status.monitoring_performed {
                    self.finish_monitoring(&participant, &mut status, now)?;
                }
            }
            return Ok(InboundOutcome::StoppedMonitoring {
                participant: participant.id,
            });
        }

        if let Some(mut open) = ledger.correlate(participant.id, order, received_at)? {
            let validation = self.validation_expression_of(&open)?;
            let outcome = ledger.record_answer(
                &mut open,
                body,
                &cleaned,
                client_id,
                validation.as_deref(),
                received_at,
            )?;
            let message = open.id;
            let accepted = outcome == AnswerOutcome::Accepted;
            if !accepted {
                tracing::info!(participant = %participant.id, %message, "answer failed validation");
            } else if let Some(participant) = self.monitored(participant.id)? {
                self.react_to_answer(&participant, open, now)?;
            } else {
                tracing::info!(participant = %participant.id, %message, "answer stored, participant not monitored");
            }
            return Ok(InboundOutcome::Answered {
                participant: participant.id,
                message,
                accepted,
            });
        }

        let mut message =
            ledger.create_received(participant.id, body, &cleaned, false, client_id, received_at)?;
        self.variables()
            .write_internal(participant.id, variables::UNEXPECTED_MESSAGE, &cleaned)?;
        let handled =
            self.react_to_received(&participant, &message, MonitoringRuleKind::UnexpectedMessage, now)?;
        if handled {
            ledger.mark_auto_processed(&mut message, now)?;
        }
        Ok(InboundOutcome::Unexpected {
            participant: participant.id,
            message: message.id,
            handled,
        })
    }

    /// Newest participant of an active intervention owning this address.
    fn participant_by_address(
        &self,
        channel: DialogOptionType,
        address: &str,
    ) -> Result<Option<Participant>> {
        let options: Vec<DialogOption> = self
            .store
            .find(&DialogOptionQuery::ByKindAndData(channel, address.to_string()))?;
        if options.is_empty() {
            return Ok(None);
        }
        let active: Vec<Intervention> = self.store.find(&InterventionQuery::Active)?;

        let mut best: Option<Participant> = None;
        for option in options {
            let Some(participant) = self.store.get_by_id::<Participant>(option.participant_id)? else {
                continue;
            };
            if !active.iter().any(|i| i.id == participant.intervention_id) {
                continue;
            }
            if best
                .as_ref()
                .map_or(true, |b| participant.created_at > b.created_at)
            {
                best = Some(participant);
            }
        }
        Ok(best)
    }

    fn is_stop_word(&self, cleaned: &str) -> bool {
        self.config
            .stop_words
            .iter()
            .any(|w| w.trim().eq_ignore_ascii_case(cleaned.trim()))
    }

    fn strip_intention_prefix<'b>(&self, body: &'b str) -> Option<&'b str> {
        let prefix = self.config.intention_prefix.as_str();
        if prefix.is_empty() {
            return None;
        }
        body.trim_start().strip_prefix(prefix)
    }

    fn validation_expression_of(&self, message: &DialogMessage) -> Result<Option<String>> {
        let Some(id) = message.related_monitoring_message else {
            return Ok(None);
        };
        let Some(monitoring_message) = self.store.get_by_id::<MonitoringMessage>(id)? else {
            return Ok(None);
        };
        Ok(self
            .store
            .get_by_id::<MonitoringMessageGroup>(monitoring_message.group_id)?
            .and_then(|g| g.validation_expression))
    }

    /// Run the rules of `kind` for a received message. Returns whether they
    /// produced anything.
    fn react_to_received(
        &self,
        participant: &Participant,
        message: &DialogMessage,
        kind: MonitoringRuleKind,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let Some(participant) = self.monitored(participant.id)? else {
            return Ok(false);
        };
        let Some(mut status) = self.status_of(participant.id)? else {
            return Ok(false);
        };

        let variables = self.variables();
        let resolution = Resolver::new(&self.store, &variables, &participant)
            .with_context(message)
            .resolve(ResolutionCase::Monitoring(kind))?;
        if resolution.is_empty() {
            return Ok(false);
        }
        if resolution.stop_intervention {
            self.finish_monitoring(&participant, &mut status, now)?;
            return Ok(true);
        }
        self.apply_resolution(&participant, resolution, Timing::Now, now)?;
        Ok(true)
    }
}
