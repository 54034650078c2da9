use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::{CoachError, Result};

// ---------------------------------------------------------------------------
// DialogMessageStatus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DialogMessageStatus {
    InCreation,
    PreparedForSending,
    Sending,
    SentButNotWaitingForAnswer,
    SentAndWaitingForAnswer,
    SentAndAnsweredByParticipant,
    SentAndAnsweredAndProcessed,
    SentAndNotAnsweredAndProcessed,
    ReceivedUnexpectedly,
    ReceivedAsIntention,
}

impl DialogMessageStatus {
    pub fn all() -> &'static [DialogMessageStatus] {
        &[
            DialogMessageStatus::InCreation,
            DialogMessageStatus::PreparedForSending,
            DialogMessageStatus::Sending,
            DialogMessageStatus::SentButNotWaitingForAnswer,
            DialogMessageStatus::SentAndWaitingForAnswer,
            DialogMessageStatus::SentAndAnsweredByParticipant,
            DialogMessageStatus::SentAndAnsweredAndProcessed,
            DialogMessageStatus::SentAndNotAnsweredAndProcessed,
            DialogMessageStatus::ReceivedUnexpectedly,
            DialogMessageStatus::ReceivedAsIntention,
        ]
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DialogMessageStatus::InCreation => "IN_CREATION",
            DialogMessageStatus::PreparedForSending => "PREPARED_FOR_SENDING",
            DialogMessageStatus::Sending => "SENDING",
            DialogMessageStatus::SentButNotWaitingForAnswer => "SENT_BUT_NOT_WAITING_FOR_ANSWER",
            DialogMessageStatus::SentAndWaitingForAnswer => "SENT_AND_WAITING_FOR_ANSWER",
            DialogMessageStatus::SentAndAnsweredByParticipant => {
                "SENT_AND_ANSWERED_BY_PARTICIPANT"
            }
            DialogMessageStatus::SentAndAnsweredAndProcessed => "SENT_AND_ANSWERED_AND_PROCESSED",
            DialogMessageStatus::SentAndNotAnsweredAndProcessed => {
                "SENT_AND_NOT_ANSWERED_AND_PROCESSED"
            }
            DialogMessageStatus::ReceivedUnexpectedly => "RECEIVED_UNEXPECTEDLY",
            DialogMessageStatus::ReceivedAsIntention => "RECEIVED_AS_INTENTION",
        }
    }

    /// Statuses that may follow `self`.
    ///
    /// `Sending -> PreparedForSending` covers restart recovery and retryable
    /// transport failures. `SentAndWaitingForAnswer` may re-enter itself when
    /// an answer fails validation.
    pub fn successors(self) -> &'static [DialogMessageStatus] {
        use DialogMessageStatus::*;
        match self {
            InCreation => &[PreparedForSending],
            PreparedForSending => &[Sending],
            Sending => &[
                SentButNotWaitingForAnswer,
                SentAndWaitingForAnswer,
                PreparedForSending,
            ],
            SentAndWaitingForAnswer => &[
                SentAndWaitingForAnswer,
                SentAndAnsweredByParticipant,
                SentAndAnsweredAndProcessed,
                SentAndNotAnsweredAndProcessed,
            ],
            SentAndAnsweredByParticipant => &[SentAndAnsweredAndProcessed],
            SentButNotWaitingForAnswer
            | SentAndAnsweredAndProcessed
            | SentAndNotAnsweredAndProcessed
            | ReceivedUnexpectedly
            | ReceivedAsIntention => &[],
        }
    }

    pub fn is_received(self) -> bool {
        matches!(
            self,
            DialogMessageStatus::ReceivedUnexpectedly | DialogMessageStatus::ReceivedAsIntention
        )
    }
}

impl fmt::Display for DialogMessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DialogMessageStatus {
    type Err = CoachError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        DialogMessageStatus::all()
            .iter()
            .copied()
            .find(|status| status.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoachError::InvalidStatus(s.to_string()))
    }
}

// ---------------------------------------------------------------------------
// DialogMessageType
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogMessageType {
    #[default]
    Plain,
    Command,
    Intention,
    /// Expands into a micro-dialog walk when dispatched; never reaches a transport.
    MicroDialogActivation,
}

// ---------------------------------------------------------------------------
// DialogMessage
// ---------------------------------------------------------------------------

/// One outbound or inbound message instance of a participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogMessage {
    pub id: Uuid,
    pub participant_id: Uuid,
    /// Per participant, strictly increasing at creation.
    pub order: u64,
    pub status: DialogMessageStatus,
    #[serde(default)]
    pub kind: DialogMessageType,
    pub text: String,
    #[serde(default)]
    pub answer_options: Option<String>,

    /// Monitoring rule whose reply rules apply to this message.
    #[serde(default)]
    pub related_monitoring_rule: Option<Uuid>,
    #[serde(default)]
    pub related_monitoring_message: Option<Uuid>,
    #[serde(default)]
    pub related_micro_dialog: Option<Uuid>,
    #[serde(default)]
    pub related_micro_dialog_message: Option<Uuid>,

    pub should_be_sent_at: DateTime<Utc>,
    #[serde(default)]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub is_unanswered_after: Option<DateTime<Utc>>,
    #[serde(default)]
    pub answer_received_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub answer: Option<String>,
    #[serde(default)]
    pub answer_raw: Option<String>,
    #[serde(default)]
    pub answer_not_automatically_processable: bool,
    #[serde(default)]
    pub client_id: Option<String>,

    #[serde(default)]
    pub supervisor_message: bool,
    #[serde(default)]
    pub answer_expected: bool,
    #[serde(default)]
    pub sticky: bool,
    #[serde(default)]
    pub manually_sent: bool,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl DialogMessage {
    pub fn can_transition_to(&self, target: DialogMessageStatus) -> Result<()> {
        if self.status.successors().contains(&target) {
            return Ok(());
        }
        let reason = if self.status.successors().is_empty() {
            format!("{} is terminal", self.status)
        } else {
            format!("{} may not follow {}", target, self.status)
        };
        Err(CoachError::InvalidTransition {
            from: self.status.to_string(),
            to: target.to_string(),
            reason,
        })
    }

    pub fn transition(&mut self, target: DialogMessageStatus, at: DateTime<Utc>) -> Result<()> {
        self.can_transition_to(target)?;
        self.status = target;
        self.updated_at = at;
        Ok(())
    }

    /// Due for dispatch at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.status == DialogMessageStatus::PreparedForSending && self.should_be_sent_at <= now
    }

    /// Waiting for an answer and still inside its reply window at `at`.
    pub fn accepts_answer_at(&self, at: DateTime<Utc>) -> bool {
        self.status == DialogMessageStatus::SentAndWaitingForAnswer
            && self.is_unanswered_after.map(|d| at < d).unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(status: DialogMessageStatus) -> DialogMessage {
        let now = Utc::now();
        DialogMessage {
            id: Uuid::new_v4(),
            participant_id: Uuid::new_v4(),
            order: 0,
            status,
            kind: DialogMessageType::Plain,
            text: "Hello".into(),
            answer_options: None,
            related_monitoring_rule: None,
            related_monitoring_message: None,
            related_micro_dialog: None,
            related_micro_dialog_message: None,
            should_be_sent_at: now,
            sent_at: None,
            is_unanswered_after: None,
            answer_received_at: None,
            answer: None,
            answer_raw: None,
            answer_not_automatically_processable: false,
            client_id: None,
            supervisor_message: false,
            answer_expected: false,
            sticky: false,
            manually_sent: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn status_names_parse_back() {
        for status in DialogMessageStatus::all() {
            assert_eq!(status.as_str().parse::<DialogMessageStatus>().unwrap(), *status);
        }
        assert_eq!(DialogMessageStatus::all().len(), 10);
        assert!("DELIVERED".parse::<DialogMessageStatus>().is_err());
    }

    #[test]
    fn serde_uses_screaming_snake_case() {
        let json = serde_json::to_string(&DialogMessageStatus::SentAndWaitingForAnswer).unwrap();
        assert_eq!(json, "\"SENT_AND_WAITING_FOR_ANSWER\"");
    }

    #[test]
    fn dispatch_path_is_allowed() {
        let mut m = message(DialogMessageStatus::PreparedForSending);
        let now = Utc::now();
        m.transition(DialogMessageStatus::Sending, now).unwrap();
        m.transition(DialogMessageStatus::SentAndWaitingForAnswer, now)
            .unwrap();
        m.transition(DialogMessageStatus::SentAndAnsweredByParticipant, now)
            .unwrap();
        m.transition(DialogMessageStatus::SentAndAnsweredAndProcessed, now)
            .unwrap();
    }

    #[test]
    fn skipping_sending_is_rejected() {
        let m = message(DialogMessageStatus::PreparedForSending);
        let err = m
            .can_transition_to(DialogMessageStatus::SentAndWaitingForAnswer)
            .unwrap_err();
        assert!(matches!(err, CoachError::InvalidTransition { .. }));
    }

    #[test]
    fn received_messages_are_terminal() {
        let m = message(DialogMessageStatus::ReceivedUnexpectedly);
        let err = m
            .can_transition_to(DialogMessageStatus::PreparedForSending)
            .unwrap_err();
        assert!(err.to_string().contains("terminal"));
    }

    #[test]
    fn answers_accepted_only_before_deadline() {
        let mut m = message(DialogMessageStatus::SentAndWaitingForAnswer);
        let now = Utc::now();
        m.is_unanswered_after = Some(now + chrono::Duration::minutes(5));
        assert!(m.accepts_answer_at(now));
        assert!(!m.accepts_answer_at(now + chrono::Duration::minutes(5)));
    }
}
