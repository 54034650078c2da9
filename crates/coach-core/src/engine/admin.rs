//! Operations for researchers and supervisors. Unlike the worker passes,
//! these return every failure to the caller.

use serde::Serialize;
use uuid::Uuid;

use super::Engine;
use crate::dialog::NewDialogMessage;
use crate::error::{CoachError, Result};
use crate::model::{
    DialogMessage, DialogMessageStatus, DialogStatus, Intervention, Participant, ReplyWindow,
};
use crate::store::queries::{ByOrder, DialogMessageQuery, InterventionQuery, ParticipantQuery};
use crate::variables::{render_text, VariableStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InterventionStatistics {
    pub intervention: Uuid,
    pub name: String,
    pub participants: usize,
    pub monitoring_active: usize,
    pub sent: usize,
    pub received: usize,
    pub answered: usize,
    pub unanswered: usize,
}

impl Engine {
    /// Render `text` for the participant and queue it for immediate dispatch.
    ///
    /// With `reply_window_minutes` the message waits for an answer for that
    /// long after it is actually sent. Supervisor messages never wait.
    pub fn send_manual_message(
        &self,
        participant_id: Uuid,
        text: &str,
        supervisor: bool,
        reply_window_minutes: Option<u32>,
    ) -> Result<DialogMessage> {
        let participant: Participant = self.store.require(participant_id)?;
        let _guard = self.locks.lock(participant.id);
        if self.dialog_option(participant.id, supervisor)?.is_none() {
            return Err(CoachError::NoContactData(participant.id.to_string()));
        }

        let now = self.now();
        let snapshot = self.variables().snapshot(&participant, None)?;
        let mut new = NewDialogMessage::new(participant.id, render_text(text, &snapshot), now)
            .supervisor(supervisor);
        if let (Some(minutes), false) = (reply_window_minutes, supervisor) {
            new = new.expecting_answer(ReplyWindow::Minutes(minutes));
        }
        new.manually_sent = true;

        let message = self.ledger().create(new, now)?;
        tracing::info!(participant = %participant.id, message = %message.id, supervisor, "manual message queued");
        Ok(message)
    }

    /// Resolve a message the engine could not process automatically.
    pub fn mark_problem_solved(&self, message_id: Uuid, corrected: &str) -> Result<DialogMessage> {
        let message: DialogMessage = self.store.require(message_id)?;
        let _guard = self.locks.lock(message.participant_id);
        let solved = self.ledger().problem_solved(message_id, corrected, self.now())?;
        tracing::info!(message = %message_id, status = %solved.status, "problem marked solved");
        Ok(solved)
    }

    /// Toggle `monitoring_active` of each participant. Activation requires
    /// contact data; participants without it stay inactive.
    pub fn participants_switch_monitoring(&self, ids: &[Uuid]) -> Result<Vec<Participant>> {
        let mut switched = Vec::with_capacity(ids.len());
        for id in ids {
            let _guard = self.locks.lock(*id);
            let mut participant: Participant = self.store.require(*id)?;
            if participant.monitoring_active {
                participant.monitoring_active = false;
            } else {
                let has_contact = self
                    .status_of(participant.id)?
                    .is_some_and(|s| s.contact_data_available);
                if !has_contact {
                    tracing::warn!(participant = %participant.id, "no contact data, monitoring stays off");
                    switched.push(participant);
                    continue;
                }
                participant.monitoring_active = true;
            }
            self.store.save(&participant)?;
            tracing::info!(
                participant = %participant.id,
                monitoring_active = participant.monitoring_active,
                "monitoring switched"
            );
            switched.push(participant);
        }
        Ok(switched)
    }

    /// Set a participant variable from outside the engine. Reserved names are
    /// rejected with [`CoachError::WriteProtectedVariable`].
    pub fn participant_adjust_variable(&self, participant_id: Uuid, name: &str, value: &str) -> Result<()> {
        let participant: Participant = self.store.require(participant_id)?;
        let _guard = self.locks.lock(participant.id);
        self.variables().write(participant.id, name, value)
    }

    pub fn participant_messages(&self, participant_id: Uuid) -> Result<Vec<DialogMessage>> {
        self.store.require::<Participant>(participant_id)?;
        self.store
            .find_sorted(&DialogMessageQuery::ByParticipant(participant_id), &ByOrder::Asc)
    }

    pub fn participant_status(&self, participant_id: Uuid) -> Result<DialogStatus> {
        self.status_of(participant_id)?
            .ok_or_else(|| CoachError::not_found("dialog status", participant_id))
    }

    /// Message counts per active intervention.
    pub fn statistics(&self) -> Result<Vec<InterventionStatistics>> {
        let interventions: Vec<Intervention> = self.store.find(&InterventionQuery::Active)?;
        let mut out = Vec::with_capacity(interventions.len());
        for intervention in interventions {
            let participants: Vec<Participant> =
                self.store.find(&ParticipantQuery::ByIntervention(intervention.id))?;
            let mut stats = InterventionStatistics {
                intervention: intervention.id,
                name: intervention.name.clone(),
                participants: participants.len(),
                monitoring_active: participants.iter().filter(|p| p.monitoring_active).count(),
                sent: 0,
                received: 0,
                answered: 0,
                unanswered: 0,
            };
            for participant in &participants {
                let messages: Vec<DialogMessage> = self
                    .store
                    .find(&DialogMessageQuery::ByParticipant(participant.id))?;
                for message in &messages {
                    use DialogMessageStatus::*;
                    match message.status {
                        SentButNotWaitingForAnswer | SentAndWaitingForAnswer => stats.sent += 1,
                        SentAndAnsweredByParticipant | SentAndAnsweredAndProcessed => {
                            stats.sent += 1;
                            stats.answered += 1;
                        }
                        SentAndNotAnsweredAndProcessed => {
                            stats.sent += 1;
                            stats.unanswered += 1;
                        }
                        ReceivedUnexpectedly | ReceivedAsIntention => stats.received += 1,
                        InCreation | PreparedForSending | Sending => {}
                    }
                }
            }
            out.push(stats);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::EngineConfig;
    use crate::model::{DialogOption, DialogOptionType};
    use crate::store::Store;
    use crate::transport::RecordingTransport;
    use chrono::Utc;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn engine() -> (TempDir, Engine) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("e.redb")).unwrap();
        let engine = Engine::new(
            store,
            EngineConfig::default(),
            Arc::new(ManualClock::new(Utc::now())),
            Arc::new(RecordingTransport::new()),
        );
        (dir, engine)
    }

    fn seed(engine: &Engine, contact: bool) -> Participant {
        let intervention = Intervention {
            id: Uuid::new_v4(),
            name: "Sleep well".into(),
            active: true,
            monitoring_active: true,
            monitoring_starting_days: Vec::new(),
            sender_identification: None,
            created_at: Utc::now(),
        };
        let participant = Participant {
            id: Uuid::new_v4(),
            intervention_id: intervention.id,
            nickname: "Ada".into(),
            language: "en".into(),
            group: None,
            monitoring_active: false,
            created_at: Utc::now(),
        };
        let mut status = DialogStatus::new(participant.id);
        status.contact_data_available = contact;
        let store = engine.store();
        store.save(&intervention).unwrap();
        store.save(&participant).unwrap();
        store.save(&status).unwrap();
        if contact {
            store
                .save(&DialogOption {
                    id: Uuid::new_v4(),
                    participant_id: participant.id,
                    kind: DialogOptionType::Sms,
                    data: "+100".into(),
                })
                .unwrap();
        }
        participant
    }

    #[test]
    fn manual_message_renders_variables() {
        let (_dir, engine) = engine();
        let p = seed(&engine, true);
        let m = engine
            .send_manual_message(p.id, "Hi $participantName", false, Some(30))
            .unwrap();
        assert_eq!(m.text, "Hi Ada");
        assert!(m.manually_sent);
        assert!(m.answer_expected);
        assert_eq!(m.status, DialogMessageStatus::PreparedForSending);
    }

    #[test]
    fn manual_message_needs_contact_data() {
        let (_dir, engine) = engine();
        let p = seed(&engine, false);
        let err = engine.send_manual_message(p.id, "Hi", false, None).unwrap_err();
        assert!(matches!(err, CoachError::NoContactData(_)));
        let err = engine.send_manual_message(p.id, "Hi", true, None).unwrap_err();
        assert!(matches!(err, CoachError::NoContactData(_)));
    }

    #[test]
    fn switching_requires_contact_data_to_activate() {
        let (_dir, engine) = engine();
        let with = seed(&engine, true);
        let without = seed(&engine, false);

        let switched = engine
            .participants_switch_monitoring(&[with.id, without.id])
            .unwrap();
        assert!(switched[0].monitoring_active);
        assert!(!switched[1].monitoring_active);

        let switched = engine.participants_switch_monitoring(&[with.id]).unwrap();
        assert!(!switched[0].monitoring_active);
    }

    #[test]
    fn reserved_variables_are_write_protected() {
        let (_dir, engine) = engine();
        let p = seed(&engine, true);
        engine.participant_adjust_variable(p.id, "$mood", "7").unwrap();
        let err = engine
            .participant_adjust_variable(p.id, "$participantName", "Bob")
            .unwrap_err();
        assert!(matches!(err, CoachError::WriteProtectedVariable(_)));
    }

    #[test]
    fn statistics_count_messages_by_status() {
        let (_dir, engine) = engine();
        let p = seed(&engine, true);
        let now = engine.now();
        engine
            .ledger()
            .create_received(p.id, "hello", "hello", false, None, now)
            .unwrap();
        let mut sent = engine
            .ledger()
            .create(NewDialogMessage::new(p.id, "Hi", now), now)
            .unwrap();
        engine.ledger().mark_sending(&mut sent, now).unwrap();
        engine.ledger().mark_sent(&mut sent, now).unwrap();

        let stats = engine.statistics().unwrap();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].participants, 1);
        assert_eq!(stats[0].sent, 1);
        assert_eq!(stats[0].received, 1);
        assert_eq!(stats[0].answered, 0);
    }

    #[test]
    fn unknown_participant_is_not_found() {
        let (_dir, engine) = engine();
        let err = engine.participant_messages(Uuid::new_v4()).unwrap_err();
        assert!(matches!(err, CoachError::NotFound { .. }));
    }
}
