//! Lifecycle operations on dialog messages.
//!
//! Every status change of a [`DialogMessage`] goes through [`DialogLedger`],
//! which checks the transition against the state machine of
//! [`DialogMessageStatus::successors`] before persisting. Callers hold the
//! participant's lock.

use chrono::{DateTime, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::error::{CoachError, Result};
use crate::model::monitoring::infinite_deadline;
use crate::model::{
    DialogMessage, DialogMessageStatus, DialogMessageType, LinkTarget, ReplyWindow, ShortUrl,
};
use crate::store::queries::{ByOrder, DialogMessageQuery, ShortUrlQuery, ShortUrlSort};
use crate::store::Store;

// ---------------------------------------------------------------------------
// NewDialogMessage
// ---------------------------------------------------------------------------

/// Everything needed to create an outbound message.
#[derive(Debug, Clone)]
pub struct NewDialogMessage {
    pub participant: Uuid,
    pub text: String,
    pub kind: DialogMessageType,
    pub answer_options: Option<String>,
    pub should_be_sent_at: DateTime<Utc>,
    pub related_monitoring_rule: Option<Uuid>,
    pub related_monitoring_message: Option<Uuid>,
    pub related_micro_dialog: Option<Uuid>,
    pub related_micro_dialog_message: Option<Uuid>,
    pub answer_expected: bool,
    /// Window used for the unanswered deadline when `answer_expected`.
    pub reply_window: ReplyWindow,
    pub supervisor: bool,
    pub manually_sent: bool,
    pub links: Vec<LinkTarget>,
}

impl NewDialogMessage {
    pub fn new(participant: Uuid, text: impl Into<String>, should_be_sent_at: DateTime<Utc>) -> Self {
        Self {
            participant,
            text: text.into(),
            kind: DialogMessageType::Plain,
            answer_options: None,
            should_be_sent_at,
            related_monitoring_rule: None,
            related_monitoring_message: None,
            related_micro_dialog: None,
            related_micro_dialog_message: None,
            answer_expected: false,
            reply_window: ReplyWindow::default(),
            supervisor: false,
            manually_sent: false,
            links: Vec::new(),
        }
    }

    pub fn expecting_answer(mut self, window: ReplyWindow) -> Self {
        self.answer_expected = true;
        self.reply_window = window;
        self
    }

    pub fn kind(mut self, kind: DialogMessageType) -> Self {
        self.kind = kind;
        self
    }

    pub fn supervisor(mut self, supervisor: bool) -> Self {
        self.supervisor = supervisor;
        self
    }

    pub fn link(mut self, target: Option<LinkTarget>) -> Self {
        self.links.extend(target);
        self
    }
}

/// Outcome of recording an answer on a waiting message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerOutcome {
    Accepted,
    /// Answer stored but the message keeps waiting.
    FailedValidation,
}

// ---------------------------------------------------------------------------
// DialogLedger
// ---------------------------------------------------------------------------

pub struct DialogLedger<'a> {
    store: &'a Store,
    short_url_base: &'a str,
}

impl<'a> DialogLedger<'a> {
    pub fn new(store: &'a Store, short_url_base: &'a str) -> Self {
        Self {
            store,
            short_url_base,
        }
    }

    /// Next free order of `participant`: one above the highest, or 0.
    pub fn next_order(&self, participant: Uuid) -> Result<u64> {
        let last: Option<DialogMessage> = self
            .store
            .find_one_sorted(&DialogMessageQuery::ByParticipant(participant), &ByOrder::Desc)?;
        Ok(last.map(|m| m.order + 1).unwrap_or(0))
    }

    /// Create a message ready for dispatch.
    ///
    /// Messages with link targets pass through `IN_CREATION` until their
    /// short links are generated and injected into the text.
    pub fn create(&self, new: NewDialogMessage, now: DateTime<Utc>) -> Result<DialogMessage> {
        let status = if new.links.is_empty() {
            DialogMessageStatus::PreparedForSending
        } else {
            DialogMessageStatus::InCreation
        };
        let planned_deadline = new
            .answer_expected
            .then(|| new.reply_window.deadline_from(new.should_be_sent_at));

        let mut message = DialogMessage {
            id: Uuid::new_v4(),
            participant_id: new.participant,
            order: self.next_order(new.participant)?,
            status,
            kind: new.kind,
            text: new.text,
            answer_options: new.answer_options,
            related_monitoring_rule: new.related_monitoring_rule,
            related_monitoring_message: new.related_monitoring_message,
            related_micro_dialog: new.related_micro_dialog,
            related_micro_dialog_message: new.related_micro_dialog_message,
            should_be_sent_at: new.should_be_sent_at,
            sent_at: None,
            is_unanswered_after: planned_deadline,
            answer_received_at: None,
            answer: None,
            answer_raw: None,
            answer_not_automatically_processable: false,
            client_id: None,
            supervisor_message: new.supervisor,
            answer_expected: new.answer_expected,
            sticky: false,
            manually_sent: new.manually_sent,
            created_at: now,
            updated_at: now,
        };
        self.store.save(&message)?;

        if status == DialogMessageStatus::InCreation {
            for target in &new.links {
                let url = self.ensure_short_url(&message, target, now)?;
                let placeholder = target.placeholder();
                if message.text.contains(placeholder) {
                    message.text = message.text.replace(placeholder, &url);
                } else {
                    message.text = format!("{} {}", message.text.trim_end(), url);
                }
            }
            message.transition(DialogMessageStatus::PreparedForSending, now)?;
            self.store.save(&message)?;
        }

        tracing::debug!(
            participant = %message.participant_id,
            message = %message.id,
            order = message.order,
            due = %message.should_be_sent_at,
            "dialog message created"
        );
        Ok(message)
    }

    fn ensure_short_url(
        &self,
        message: &DialogMessage,
        target: &LinkTarget,
        now: DateTime<Utc>,
    ) -> Result<String> {
        let existing: Vec<ShortUrl> = self
            .store
            .find(&ShortUrlQuery::ByDialogMessage(message.id))?;
        if let Some(found) = existing.into_iter().find(|s| s.target == *target) {
            return Ok(found.url(self.short_url_base));
        }
        let last: Option<ShortUrl> = self
            .store
            .find_one_sorted(&ShortUrlQuery::All, &ShortUrlSort::ShortIdDesc)?;
        let short = ShortUrl {
            id: Uuid::new_v4(),
            short_id: last.map(|s| s.short_id + 1).unwrap_or(1),
            dialog_message_id: message.id,
            participant_id: message.participant_id,
            target: target.clone(),
            created_at: now,
        };
        self.store.save(&short)?;
        Ok(short.url(self.short_url_base))
    }

    // -----------------------------------------------------------------------
    // Dispatch
    // -----------------------------------------------------------------------

    pub fn mark_sending(&self, message: &mut DialogMessage, now: DateTime<Utc>) -> Result<()> {
        message.transition(DialogMessageStatus::Sending, now)?;
        self.store.save(message)
    }

    /// Undo [`DialogLedger::mark_sending`] after a retryable failure.
    pub fn revert_to_prepared(&self, message: &mut DialogMessage, now: DateTime<Utc>) -> Result<()> {
        message.transition(DialogMessageStatus::PreparedForSending, now)?;
        self.store.save(message)
    }

    /// Record a completed send.
    ///
    /// A message expecting an answer starts waiting with its planned reply
    /// window shifted to the actual send time. For micro-dialog messages any
    /// older open message of the same micro-dialog message is closed first.
    pub fn mark_sent(&self, message: &mut DialogMessage, now: DateTime<Utc>) -> Result<()> {
        message.sent_at = Some(now);
        if !message.answer_expected {
            message.transition(DialogMessageStatus::SentButNotWaitingForAnswer, now)?;
            return self.store.save(message);
        }

        let deadline = match message.is_unanswered_after {
            Some(planned) if planned == infinite_deadline() => planned,
            Some(planned) => now + (planned - message.should_be_sent_at),
            None => ReplyWindow::default().deadline_from(now),
        };
        message.is_unanswered_after = Some(deadline);

        if let Some(mdm) = message.related_micro_dialog_message {
            let open: Vec<DialogMessage> = self.store.find(
                &DialogMessageQuery::OpenForMicroDialogMessage(message.participant_id, mdm),
            )?;
            for mut older in open.into_iter().filter(|m| m.id != message.id) {
                older.transition(DialogMessageStatus::SentAndNotAnsweredAndProcessed, now)?;
                self.store.save(&older)?;
                tracing::debug!(message = %older.id, "closed older open micro-dialog message");
            }
        }

        message.transition(DialogMessageStatus::SentAndWaitingForAnswer, now)?;
        self.store.save(message)
    }

    /// Remove a message that can never be delivered.
    pub fn discard(&self, message: &DialogMessage) -> Result<()> {
        self.store.delete_by_id::<DialogMessage>(message.id)?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Answers
    // -----------------------------------------------------------------------

    /// Store an answer on a waiting message.
    ///
    /// With a `validation` expression the cleaned answer must match it as a
    /// whole; capture group 1, when present, becomes the stored answer. A
    /// failed validation keeps the message waiting and flags it as not
    /// automatically processable.
    pub fn record_answer(
        &self,
        message: &mut DialogMessage,
        raw: &str,
        cleaned: &str,
        client_id: Option<&str>,
        validation: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<AnswerOutcome> {
        message.answer_raw = Some(raw.to_string());
        message.answer_received_at = Some(at);
        if let Some(id) = client_id {
            message.client_id = Some(id.to_string());
        }

        let validated = match validation.map(str::trim).filter(|v| !v.is_empty()) {
            None => Some(cleaned.to_string()),
            Some(expression) => validate(expression, cleaned),
        };

        match validated {
            Some(answer) => {
                message.answer = Some(answer);
                message.answer_not_automatically_processable = false;
                message.transition(DialogMessageStatus::SentAndAnsweredByParticipant, at)?;
                self.store.save(message)?;
                Ok(AnswerOutcome::Accepted)
            }
            None => {
                message.answer = Some(cleaned.to_string());
                message.answer_not_automatically_processable = true;
                message.transition(DialogMessageStatus::SentAndWaitingForAnswer, at)?;
                self.store.save(message)?;
                Ok(AnswerOutcome::FailedValidation)
            }
        }
    }

    /// Close a message after its answer or timeout has been reacted to.
    pub fn mark_processed(
        &self,
        message: &mut DialogMessage,
        answered: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let target = if answered {
            DialogMessageStatus::SentAndAnsweredAndProcessed
        } else {
            DialogMessageStatus::SentAndNotAnsweredAndProcessed
        };
        message.transition(target, now)?;
        self.store.save(message)
    }

    /// Persist an inbound message that answers nothing.
    pub fn create_received(
        &self,
        participant: Uuid,
        raw: &str,
        cleaned: &str,
        intention: bool,
        client_id: Option<&str>,
        at: DateTime<Utc>,
    ) -> Result<DialogMessage> {
        let (status, kind) = if intention {
            (DialogMessageStatus::ReceivedAsIntention, DialogMessageType::Intention)
        } else {
            (DialogMessageStatus::ReceivedUnexpectedly, DialogMessageType::Plain)
        };
        let message = DialogMessage {
            id: Uuid::new_v4(),
            participant_id: participant,
            order: self.next_order(participant)?,
            status,
            kind,
            text: String::new(),
            answer_options: None,
            related_monitoring_rule: None,
            related_monitoring_message: None,
            related_micro_dialog: None,
            related_micro_dialog_message: None,
            should_be_sent_at: at,
            sent_at: None,
            is_unanswered_after: None,
            answer_received_at: Some(at),
            answer: Some(cleaned.to_string()),
            answer_raw: Some(raw.to_string()),
            answer_not_automatically_processable: !intention,
            client_id: client_id.map(str::to_string),
            supervisor_message: false,
            answer_expected: false,
            sticky: false,
            manually_sent: false,
            created_at: at,
            updated_at: at,
        };
        self.store.save(&message)?;
        Ok(message)
    }

    /// Clear the "not automatically processable" flag of a received message.
    pub fn mark_auto_processed(&self, message: &mut DialogMessage, now: DateTime<Utc>) -> Result<()> {
        message.answer_not_automatically_processable = false;
        message.updated_at = now;
        self.store.save(message)
    }

    // -----------------------------------------------------------------------
    // Correlation
    // -----------------------------------------------------------------------

    /// Whether an inbound message with this client id was already handled.
    pub fn is_duplicate(&self, participant: Uuid, client_id: &str) -> Result<bool> {
        Ok(self
            .store
            .count(&DialogMessageQuery::ByParticipantAndClientId(
                participant,
                client_id.to_string(),
            ))?
            > 0)
    }

    /// The open message an inbound reply answers.
    ///
    /// Only messages inside their reply window and not flagged as
    /// automatically unprocessable are candidates. An exact `order` hit among
    /// them wins, otherwise the oldest candidate is used.
    pub fn correlate(
        &self,
        participant: Uuid,
        order: Option<u64>,
        at: DateTime<Utc>,
    ) -> Result<Option<DialogMessage>> {
        let open: Vec<DialogMessage> = self
            .store
            .find_sorted(&DialogMessageQuery::OpenAt(participant, at), &ByOrder::Asc)?
            .into_iter()
            .filter(|m: &DialogMessage| !m.answer_not_automatically_processable)
            .collect();
        if let Some(order) = order {
            if let Some(exact) = open.iter().find(|m| m.order == order) {
                return Ok(Some(exact.clone()));
            }
        }
        Ok(open.into_iter().next())
    }

    // -----------------------------------------------------------------------
    // Maintenance
    // -----------------------------------------------------------------------

    /// Revert every message stuck in `SENDING` to `PREPARED_FOR_SENDING`.
    /// Returns how many were reverted; a second call reverts none.
    pub fn reset_after_restart(&self, now: DateTime<Utc>) -> Result<usize> {
        let stuck: Vec<DialogMessage> = self
            .store
            .find(&DialogMessageQuery::ByStatus(DialogMessageStatus::Sending))?;
        let count = stuck.len();
        let mut reverted = Vec::with_capacity(count);
        for mut message in stuck {
            message.transition(DialogMessageStatus::PreparedForSending, now)?;
            reverted.push(message);
        }
        self.store.save_all(&reverted)?;
        Ok(count)
    }

    /// Manually resolve a message the engine could not process.
    ///
    /// A waiting message becomes answered with `corrected`; a message
    /// received unexpectedly only loses its "not automatically processable"
    /// flag. Any other status cannot be solved anymore.
    pub fn problem_solved(
        &self,
        id: Uuid,
        corrected: &str,
        now: DateTime<Utc>,
    ) -> Result<DialogMessage> {
        let mut message: DialogMessage = self.store.require(id)?;
        match message.status {
            DialogMessageStatus::SentAndWaitingForAnswer => {
                let cleaned = crate::variables::clean_received_message(corrected);
                message.answer = Some(cleaned);
                message.answer_raw = Some(corrected.to_string());
                message.answer_received_at = Some(now);
                message.answer_not_automatically_processable = false;
                message.transition(DialogMessageStatus::SentAndAnsweredByParticipant, now)?;
                self.store.save(&message)?;
            }
            DialogMessageStatus::ReceivedUnexpectedly => {
                self.mark_auto_processed(&mut message, now)?;
            }
            other => {
                return Err(CoachError::CaseCantBeSolvedAnymore(
                    id.to_string(),
                    other.to_string(),
                ));
            }
        }
        Ok(message)
    }
}

/// `Some(answer)` when `cleaned` fully matches `expression`.
fn validate(expression: &str, cleaned: &str) -> Option<String> {
    let re = match Regex::new(&format!("^(?:{expression})$")) {
        Ok(re) => re,
        Err(e) => {
            tracing::warn!("invalid validation expression '{expression}', answer accepted: {e}");
            return Some(cleaned.to_string());
        }
    };
    let caps = re.captures(cleaned.trim())?;
    let answer = caps.get(1).or_else(|| caps.get(0))?;
    Some(answer.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use tempfile::TempDir;

    const BASE: &str = "https://c.example/s/";

    fn open_tmp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    #[test]
    fn orders_strictly_increase_from_zero() {
        let (_dir, store) = open_tmp();
        let ledger = DialogLedger::new(&store, BASE);
        let pid = Uuid::new_v4();
        let now = Utc::now();
        let a = ledger.create(NewDialogMessage::new(pid, "a", now), now).unwrap();
        let b = ledger.create(NewDialogMessage::new(pid, "b", now), now).unwrap();
        let other = ledger.create(NewDialogMessage::new(Uuid::new_v4(), "c", now), now).unwrap();
        assert_eq!((a.order, b.order, other.order), (0, 1, 0));
        assert_eq!(a.status, DialogMessageStatus::PreparedForSending);
        assert!(!a.sticky && !b.sticky);
    }

    #[test]
    fn links_are_injected_through_in_creation() {
        let (_dir, store) = open_tmp();
        let ledger = DialogLedger::new(&store, BASE);
        let pid = Uuid::new_v4();
        let now = Utc::now();
        let with_placeholder = ledger
            .create(
                NewDialogMessage::new(pid, "Watch $linkedMediaObject today", now)
                    .link(Some(LinkTarget::MediaObject("walk.mp4".into()))),
                now,
            )
            .unwrap();
        assert_eq!(with_placeholder.text, "Watch https://c.example/s/1 today");
        assert_eq!(with_placeholder.status, DialogMessageStatus::PreparedForSending);

        let appended = ledger
            .create(
                NewDialogMessage::new(pid, "Please fill in:", now)
                    .link(Some(LinkTarget::Survey("weekly".into()))),
                now,
            )
            .unwrap();
        assert_eq!(appended.text, "Please fill in: https://c.example/s/2");
        assert_eq!(store.len::<ShortUrl>().unwrap(), 2);
    }

    #[test]
    fn sent_message_gets_shifted_deadline() {
        let (_dir, store) = open_tmp();
        let ledger = DialogLedger::new(&store, BASE);
        let planned = Utc::now();
        let mut m = ledger
            .create(
                NewDialogMessage::new(Uuid::new_v4(), "How are you?", planned)
                    .expecting_answer(ReplyWindow::hours(2)),
                planned,
            )
            .unwrap();
        let sent = planned + Duration::minutes(30);
        ledger.mark_sending(&mut m, sent).unwrap();
        ledger.mark_sent(&mut m, sent).unwrap();
        assert_eq!(m.status, DialogMessageStatus::SentAndWaitingForAnswer);
        assert_eq!(m.is_unanswered_after, Some(sent + Duration::hours(2)));
    }

    #[test]
    fn infinite_window_keeps_sentinel() {
        let (_dir, store) = open_tmp();
        let ledger = DialogLedger::new(&store, BASE);
        let now = Utc::now();
        let mut m = ledger
            .create(
                NewDialogMessage::new(Uuid::new_v4(), "Whenever", now)
                    .expecting_answer(ReplyWindow::Infinite),
                now,
            )
            .unwrap();
        ledger.mark_sending(&mut m, now).unwrap();
        ledger.mark_sent(&mut m, now + Duration::days(3)).unwrap();
        assert_eq!(m.is_unanswered_after, Some(infinite_deadline()));
    }

    #[test]
    fn only_one_open_message_per_micro_dialog_message() {
        let (_dir, store) = open_tmp();
        let ledger = DialogLedger::new(&store, BASE);
        let pid = Uuid::new_v4();
        let mdm = Uuid::new_v4();
        let now = Utc::now();
        let send = |at| {
            let mut new = NewDialogMessage::new(pid, "Mood?", at).expecting_answer(ReplyWindow::hours(4));
            new.related_micro_dialog_message = Some(mdm);
            let mut m = ledger.create(new, at).unwrap();
            ledger.mark_sending(&mut m, at).unwrap();
            ledger.mark_sent(&mut m, at).unwrap();
            m
        };
        let first = send(now);
        let second = send(now + Duration::minutes(1));

        let open: Vec<DialogMessage> = store
            .find(&DialogMessageQuery::OpenForMicroDialogMessage(pid, mdm))
            .unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, second.id);
        let first: DialogMessage = store.require(first.id).unwrap();
        assert_eq!(first.status, DialogMessageStatus::SentAndNotAnsweredAndProcessed);
    }

    fn waiting(ledger: &DialogLedger<'_>, pid: Uuid, now: DateTime<Utc>) -> DialogMessage {
        let mut m = ledger
            .create(
                NewDialogMessage::new(pid, "Steps?", now).expecting_answer(ReplyWindow::hours(4)),
                now,
            )
            .unwrap();
        ledger.mark_sending(&mut m, now).unwrap();
        ledger.mark_sent(&mut m, now).unwrap();
        m
    }

    #[test]
    fn validation_uses_capture_group() {
        let (_dir, store) = open_tmp();
        let ledger = DialogLedger::new(&store, BASE);
        let now = Utc::now();
        let mut m = waiting(&ledger, Uuid::new_v4(), now);
        let outcome = ledger
            .record_answer(&mut m, "About 7000!", "about 7000", Some("c1"), Some(r"\D*(\d+)\D*"), now)
            .unwrap();
        assert_eq!(outcome, AnswerOutcome::Accepted);
        assert_eq!(m.answer.as_deref(), Some("7000"));
        assert_eq!(m.status, DialogMessageStatus::SentAndAnsweredByParticipant);
    }

    #[test]
    fn failed_validation_keeps_waiting() {
        let (_dir, store) = open_tmp();
        let ledger = DialogLedger::new(&store, BASE);
        let now = Utc::now();
        let mut m = waiting(&ledger, Uuid::new_v4(), now);
        let outcome = ledger
            .record_answer(&mut m, "lots", "lots", None, Some(r"\d+"), now)
            .unwrap();
        assert_eq!(outcome, AnswerOutcome::FailedValidation);
        assert_eq!(m.status, DialogMessageStatus::SentAndWaitingForAnswer);
        assert_eq!(m.answer.as_deref(), Some("lots"));
        assert!(m.answer_not_automatically_processable);
        assert!(m.is_unanswered_after.is_some());
    }

    #[test]
    fn correlation_prefers_exact_open_order() {
        let (_dir, store) = open_tmp();
        let ledger = DialogLedger::new(&store, BASE);
        let pid = Uuid::new_v4();
        let now = Utc::now();
        let older = waiting(&ledger, pid, now);
        let newer = waiting(&ledger, pid, now);

        let hit = ledger.correlate(pid, Some(newer.order), now).unwrap().unwrap();
        assert_eq!(hit.id, newer.id);
        let fallback = ledger.correlate(pid, Some(99), now).unwrap().unwrap();
        assert_eq!(fallback.id, older.id);
        let none = ledger.correlate(pid, None, now + Duration::hours(5)).unwrap();
        assert!(none.is_none());
    }

    #[test]
    fn correlation_never_picks_flagged_message() {
        let (_dir, store) = open_tmp();
        let ledger = DialogLedger::new(&store, BASE);
        let pid = Uuid::new_v4();
        let now = Utc::now();
        let mut flagged = waiting(&ledger, pid, now);
        let newer = waiting(&ledger, pid, now);
        ledger
            .record_answer(&mut flagged, "x", "x", None, Some(r"\d+"), now)
            .unwrap();
        assert!(flagged.answer_not_automatically_processable);

        let exact = ledger.correlate(pid, Some(flagged.order), now).unwrap().unwrap();
        assert_eq!(exact.id, newer.id);
        let unordered = ledger.correlate(pid, None, now).unwrap().unwrap();
        assert_eq!(unordered.id, newer.id);
    }

    #[test]
    fn restart_recovery_is_idempotent() {
        let (_dir, store) = open_tmp();
        let ledger = DialogLedger::new(&store, BASE);
        let now = Utc::now();
        let mut m = ledger.create(NewDialogMessage::new(Uuid::new_v4(), "hi", now), now).unwrap();
        ledger.mark_sending(&mut m, now).unwrap();
        ledger.create(NewDialogMessage::new(Uuid::new_v4(), "hi", now), now).unwrap();

        assert_eq!(ledger.reset_after_restart(now).unwrap(), 1);
        assert_eq!(ledger.reset_after_restart(now).unwrap(), 0);
        let m: DialogMessage = store.require(m.id).unwrap();
        assert_eq!(m.status, DialogMessageStatus::PreparedForSending);
    }

    #[test]
    fn problem_solved_by_status() {
        let (_dir, store) = open_tmp();
        let ledger = DialogLedger::new(&store, BASE);
        let pid = Uuid::new_v4();
        let now = Utc::now();

        let m = waiting(&ledger, pid, now);
        let solved = ledger.problem_solved(m.id, " Eight ", now).unwrap();
        assert_eq!(solved.status, DialogMessageStatus::SentAndAnsweredByParticipant);
        assert_eq!(solved.answer.as_deref(), Some("eight"));

        let received = ledger.create_received(pid, "???", "", false, None, now).unwrap();
        assert!(received.answer_not_automatically_processable);
        let solved = ledger.problem_solved(received.id, "ok", now).unwrap();
        assert!(!solved.answer_not_automatically_processable);

        let plain = ledger.create(NewDialogMessage::new(pid, "hi", now), now).unwrap();
        let err = ledger.problem_solved(plain.id, "x", now).unwrap_err();
        assert!(matches!(err, CoachError::CaseCantBeSolvedAnymore(..)));
    }

    #[test]
    fn duplicates_are_found_by_client_id() {
        let (_dir, store) = open_tmp();
        let ledger = DialogLedger::new(&store, BASE);
        let pid = Uuid::new_v4();
        ledger
            .create_received(pid, "hi", "hi", false, Some("abc"), Utc::now())
            .unwrap();
        assert!(ledger.is_duplicate(pid, "abc").unwrap());
        assert!(!ledger.is_duplicate(pid, "abd").unwrap());
    }
}
