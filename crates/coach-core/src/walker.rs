//! Walks a participant through a micro-dialog.
//!
//! Messages and decision points of a micro-dialog share one `order` axis. The
//! walker repeatedly takes the item with the smallest order above its cursor
//! until the dialog ends, a blocking message waits for its answer, a decision
//! point stops the dialog or hands over to another micro-dialog.

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::dialog::{DialogLedger, NewDialogMessage};
use crate::error::Result;
use crate::model::{
    DialogMessageType, LinkTarget, MicroDialogDecisionPoint, MicroDialogMessage,
    MicroDialogMessageRule, Participant,
};
use crate::resolver::{DecisionDirective, ResolutionCase, Resolver};
use crate::rule_evaluator;
use crate::store::queries::{ByOrder, MicroDialogItemQuery, MicroDialogMessageRuleQuery};
use crate::store::Store;
use crate::variables::{render_text, Snapshot, VariableStore};

/// Upper bound of items visited in one walk; jumps can form loops.
pub const MAX_WALK_STEPS: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOutcome {
    /// No item left after the cursor.
    Finished,
    /// Waiting for the answer to this micro-dialog message.
    Blocked(Uuid),
    /// A decision point ended the dialog.
    Stopped,
    /// An activation message for this micro-dialog was created.
    Handover(Uuid),
}

enum Item {
    Message(MicroDialogMessage),
    DecisionPoint(MicroDialogDecisionPoint),
}

pub struct MicroDialogWalker<'a> {
    store: &'a Store,
    variables: &'a dyn VariableStore,
    participant: &'a Participant,
    ledger: DialogLedger<'a>,
    now: DateTime<Utc>,
    max_steps: usize,
    snapshot: Option<Snapshot>,
}

impl<'a> MicroDialogWalker<'a> {
    pub fn new(
        store: &'a Store,
        variables: &'a dyn VariableStore,
        participant: &'a Participant,
        short_url_base: &'a str,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            store,
            variables,
            participant,
            ledger: DialogLedger::new(store, short_url_base),
            now,
            max_steps: MAX_WALK_STEPS,
            snapshot: None,
        }
    }

    pub fn with_step_limit(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps;
        self
    }

    /// Advance through `micro_dialog` starting after `cursor`. A fresh
    /// activation starts from `i64::MIN`.
    pub fn walk(&mut self, micro_dialog: Uuid, mut cursor: i64) -> Result<WalkOutcome> {
        for _ in 0..self.max_steps {
            let Some(item) = self.next_item(micro_dialog, cursor)? else {
                tracing::debug!(participant = %self.participant.id, micro_dialog = %micro_dialog, "micro-dialog finished");
                return Ok(WalkOutcome::Finished);
            };

            match item {
                Item::Message(message) => {
                    cursor = message.order;
                    if !self.guards_pass(&message)? {
                        continue;
                    }
                    self.create_message(&message)?;
                    if message.expects_answer && message.blocks_until_answered {
                        return Ok(WalkOutcome::Blocked(message.id));
                    }
                }
                Item::DecisionPoint(point) => {
                    cursor = point.order;
                    let resolution = Resolver::new(self.store, self.variables, self.participant)
                        .resolve(ResolutionCase::DecisionPoint(point.id))?;
                    self.snapshot = None;

                    match resolution.directive {
                        None => {}
                        Some(DecisionDirective::Stop) => return Ok(WalkOutcome::Stopped),
                        Some(DecisionDirective::JumpToMessage(target)) => {
                            match self.store.get_by_id::<MicroDialogMessage>(target)? {
                                Some(t) if t.micro_dialog_id == micro_dialog => {
                                    cursor = t.order.saturating_sub(1);
                                }
                                _ => {
                                    tracing::warn!(
                                        participant = %self.participant.id,
                                        decision_point = %point.id,
                                        target = %target,
                                        "jump target is not a message of this micro-dialog"
                                    );
                                    return Ok(WalkOutcome::Stopped);
                                }
                            }
                        }
                        Some(DecisionDirective::JumpToMicroDialog(next)) => {
                            let mut activation = NewDialogMessage::new(self.participant.id, "", self.now)
                                .kind(DialogMessageType::MicroDialogActivation);
                            activation.related_micro_dialog = Some(next);
                            self.ledger.create(activation, self.now)?;
                            return Ok(WalkOutcome::Handover(next));
                        }
                    }
                }
            }
        }

        tracing::warn!(
            participant = %self.participant.id,
            micro_dialog = %micro_dialog,
            "micro-dialog walk exceeded {} steps, stopped",
            self.max_steps
        );
        Ok(WalkOutcome::Stopped)
    }

    /// Smallest order above `cursor`; a message wins a tie with a decision point.
    fn next_item(&self, micro_dialog: Uuid, cursor: i64) -> Result<Option<Item>> {
        let query = MicroDialogItemQuery::ByMicroDialogAfter(micro_dialog, cursor);
        let message: Option<MicroDialogMessage> = self.store.find_one_sorted(&query, &ByOrder::Asc)?;
        let point: Option<MicroDialogDecisionPoint> = self.store.find_one_sorted(&query, &ByOrder::Asc)?;
        Ok(match (message, point) {
            (Some(m), Some(p)) if p.order < m.order => Some(Item::DecisionPoint(p)),
            (Some(m), _) => Some(Item::Message(m)),
            (None, Some(p)) => Some(Item::DecisionPoint(p)),
            (None, None) => None,
        })
    }

    fn snapshot(&mut self) -> Result<&Snapshot> {
        if self.snapshot.is_none() {
            self.snapshot = Some(self.variables.snapshot(self.participant, None)?);
        }
        Ok(self.snapshot.get_or_insert_with(Snapshot::new))
    }

    fn guards_pass(&mut self, message: &MicroDialogMessage) -> Result<bool> {
        let guards: Vec<MicroDialogMessageRule> = self
            .store
            .find_sorted(&MicroDialogMessageRuleQuery::ByMessage(message.id), &ByOrder::Asc)?;
        if guards.is_empty() {
            return Ok(true);
        }
        let participant = self.participant.id;
        let snapshot = self.snapshot()?;
        for guard in &guards {
            match rule_evaluator::evaluate(&guard.condition, snapshot) {
                Ok(r) if r.matches => {}
                Ok(_) => return Ok(false),
                Err(e) => {
                    tracing::warn!(participant = %participant, guard = %guard.id, "guard failed: {e}");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    fn create_message(&mut self, message: &MicroDialogMessage) -> Result<()> {
        let now = self.now;
        let participant = self.participant.id;
        let snapshot = self.snapshot()?;
        let text = render_text(&message.text, snapshot);
        let answer_options = message
            .answer_options
            .as_deref()
            .map(|o| render_text(o, snapshot));

        let mut new = NewDialogMessage::new(participant, text, now)
            .link(message.linked_media_object.clone().map(LinkTarget::MediaObject))
            .link(message.linked_survey.clone().map(LinkTarget::Survey));
        if message.is_command {
            new = new.kind(DialogMessageType::Command);
        }
        if message.expects_answer {
            new = new.expecting_answer(message.reply_window);
        }
        new.answer_options = answer_options;
        new.related_micro_dialog = Some(message.micro_dialog_id);
        new.related_micro_dialog_message = Some(message.id);
        self.ledger.create(new, now)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::model::{
        DialogMessage, DialogMessageStatus, EquationSign, MicroDialogRule, ReplyWindow,
        RuleCondition,
    };
    use crate::store::queries::DialogMessageQuery;
    use crate::variables::StoreVariables;
    use chrono::FixedOffset;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        store: Store,
        clock: ManualClock,
        participant: Participant,
        dialog: Uuid,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            let store = Store::open(&dir.path().join("test.redb")).unwrap();
            Self {
                _dir: dir,
                store,
                clock: ManualClock::new(Utc::now()),
                participant: Participant {
                    id: Uuid::new_v4(),
                    intervention_id: Uuid::new_v4(),
                    nickname: "Kim".into(),
                    language: "en".into(),
                    group: None,
                    monitoring_active: true,
                    created_at: Utc::now(),
                },
                dialog: Uuid::new_v4(),
            }
        }

        fn message(&self, order: i64, text: &str) -> MicroDialogMessage {
            let m = MicroDialogMessage {
                id: Uuid::new_v4(),
                micro_dialog_id: self.dialog,
                order,
                text: text.into(),
                is_command: false,
                expects_answer: false,
                blocks_until_answered: false,
                store_value_to_variable: None,
                no_reply_value: None,
                reply_window: ReplyWindow::default(),
                answer_options: None,
                linked_media_object: None,
                linked_survey: None,
            };
            self.store.save(&m).unwrap();
            m
        }

        fn decision(&self, order: i64, rule: impl FnOnce(Uuid) -> MicroDialogRule) -> Uuid {
            let point = MicroDialogDecisionPoint {
                id: Uuid::new_v4(),
                micro_dialog_id: self.dialog,
                order,
                comment: None,
            };
            self.store.save(&point).unwrap();
            self.store.save(&rule(point.id)).unwrap();
            point.id
        }

        fn walk(&self, cursor: i64) -> WalkOutcome {
            let vars = StoreVariables::new(&self.store, &self.clock, FixedOffset::east_opt(0).unwrap());
            MicroDialogWalker::new(&self.store, &vars, &self.participant, "http://s/", self.clock.now())
                .with_step_limit(40)
                .walk(self.dialog, cursor)
                .unwrap()
        }

        fn texts(&self) -> Vec<String> {
            let mut messages: Vec<DialogMessage> = self
                .store
                .find_sorted(&DialogMessageQuery::ByParticipant(self.participant.id), &ByOrder::Asc)
                .unwrap();
            messages.retain(|m| m.kind != DialogMessageType::MicroDialogActivation);
            messages.into_iter().map(|m| m.text).collect()
        }
    }

    fn rule(point: Uuid, condition: RuleCondition) -> MicroDialogRule {
        MicroDialogRule {
            id: Uuid::new_v4(),
            decision_point_id: point,
            parent: None,
            order: 0,
            level: 0,
            condition,
            store_value_to_variable: None,
            next_message_when_true: None,
            next_micro_dialog_when_true: None,
            stop_micro_dialog_when_true: false,
        }
    }

    #[test]
    fn walks_messages_in_order() {
        let f = Fixture::new();
        f.message(20, "second");
        f.message(10, "first");
        assert_eq!(f.walk(i64::MIN), WalkOutcome::Finished);
        assert_eq!(f.texts(), vec!["first", "second"]);
    }

    #[test]
    fn blocking_message_stops_and_resumes() {
        let f = Fixture::new();
        let mut question = f.message(1, "How do you feel?");
        question.expects_answer = true;
        question.blocks_until_answered = true;
        f.store.save(&question).unwrap();
        f.message(2, "Thanks!");

        assert_eq!(f.walk(i64::MIN), WalkOutcome::Blocked(question.id));
        assert_eq!(f.texts(), vec!["How do you feel?"]);

        assert_eq!(f.walk(question.order), WalkOutcome::Finished);
        assert_eq!(f.texts(), vec!["How do you feel?", "Thanks!"]);
    }

    #[test]
    fn guarded_message_is_skipped() {
        let f = Fixture::new();
        let skipped = f.message(1, "skipped");
        f.store
            .save(&MicroDialogMessageRule {
                id: Uuid::new_v4(),
                micro_dialog_message_id: skipped.id,
                order: 0,
                condition: RuleCondition::new(EquationSign::Equals, "1", "2"),
            })
            .unwrap();
        f.message(2, "shown");
        f.walk(i64::MIN);
        assert_eq!(f.texts(), vec!["shown"]);
    }

    #[test]
    fn decision_point_jumps_to_message() {
        let f = Fixture::new();
        f.message(1, "intro");
        f.message(3, "skipped");
        let target = f.message(5, "target");
        f.decision(2, |p| MicroDialogRule {
            next_message_when_true: Some(target.id),
            ..rule(p, RuleCondition::always())
        });
        assert_eq!(f.walk(i64::MIN), WalkOutcome::Finished);
        assert_eq!(f.texts(), vec!["intro", "target"]);
    }

    #[test]
    fn decision_point_stops() {
        let f = Fixture::new();
        f.decision(1, |p| MicroDialogRule {
            stop_micro_dialog_when_true: true,
            ..rule(p, RuleCondition::always())
        });
        f.message(2, "never");
        assert_eq!(f.walk(i64::MIN), WalkOutcome::Stopped);
        assert!(f.texts().is_empty());
    }

    #[test]
    fn handover_creates_activation_message() {
        let f = Fixture::new();
        let next = Uuid::new_v4();
        f.decision(1, |p| MicroDialogRule {
            next_micro_dialog_when_true: Some(next),
            ..rule(p, RuleCondition::always())
        });
        assert_eq!(f.walk(i64::MIN), WalkOutcome::Handover(next));

        let messages: Vec<DialogMessage> = f
            .store
            .find(&DialogMessageQuery::ByParticipant(f.participant.id))
            .unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].kind, DialogMessageType::MicroDialogActivation);
        assert_eq!(messages[0].related_micro_dialog, Some(next));
        assert_eq!(messages[0].status, DialogMessageStatus::PreparedForSending);
    }

    #[test]
    fn jump_loop_is_bounded() {
        let f = Fixture::new();
        let start = f.message(1, "again");
        f.decision(2, |p| MicroDialogRule {
            next_message_when_true: Some(start.id),
            ..rule(p, RuleCondition::always())
        });
        assert_eq!(f.walk(i64::MIN), WalkOutcome::Stopped);
        assert_eq!(f.texts().len(), 20);
    }

    #[test]
    fn jump_outside_dialog_stops() {
        let f = Fixture::new();
        f.decision(1, |p| MicroDialogRule {
            next_message_when_true: Some(Uuid::new_v4()),
            ..rule(p, RuleCondition::always())
        });
        assert_eq!(f.walk(i64::MIN), WalkOutcome::Stopped);
    }
}
