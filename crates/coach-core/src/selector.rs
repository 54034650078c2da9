//! Choice of one message variant out of a monitoring message group.
//!
//! Selection runs as three explicit passes over the (optionally shuffled)
//! candidates:
//!
//! 0. [`select_unused`]: first guard-passing variant never sent to the participant
//! 1. [`select_least_used`]: the least-used variant, if its guards pass
//! 2. [`select_any`]: first guard-passing variant regardless of usage
//!
//! Guard results and usage counts are computed once per call.

use std::collections::HashMap;

use rand::seq::SliceRandom;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{DialogMessage, MonitoringMessage, MonitoringMessageGroup, MonitoringMessageRule};
use crate::rule_evaluator;
use crate::store::queries::{
    ByOrder, DialogMessageQuery, MonitoringMessageQuery, MonitoringMessageRuleQuery,
};
use crate::store::Store;
use crate::variables::Snapshot;

/// A candidate variant with its per-call facts.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub message: MonitoringMessage,
    pub guards_pass: bool,
    pub times_used: usize,
}

pub struct MessageSelector<'a> {
    store: &'a Store,
}

impl<'a> MessageSelector<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self { store }
    }

    /// Pick a variant of `group` for `participant`.
    ///
    /// `reply_to` is the message whose answer or timeout triggered the
    /// selection. Position mirroring only applies outside of a monitoring
    /// rule context. `None` means nothing can be sent.
    pub fn select(
        &self,
        participant: Uuid,
        group: &MonitoringMessageGroup,
        reply_to: Option<&DialogMessage>,
        monitoring_rule_context: bool,
        snapshot: &Snapshot,
    ) -> Result<Option<MonitoringMessage>> {
        let variants: Vec<MonitoringMessage> = self
            .store
            .find_sorted(&MonitoringMessageQuery::ByGroup(group.id), &ByOrder::Asc)?;

        if !monitoring_rule_context && group.send_same_position_if_sending_as_reply {
            if let Some(mirrored) = self.mirrored(reply_to, &variants)? {
                tracing::debug!(
                    participant = %participant,
                    group = %group.name,
                    message = %mirrored.id,
                    "mirrored position of triggering message"
                );
                return Ok(Some(mirrored));
            }
        }

        let mut candidates = self.candidates(participant, variants, snapshot)?;
        if group.send_in_random_order {
            candidates.shuffle(&mut rand::thread_rng());
        }

        let chosen = select_unused(&candidates)
            .or_else(|| select_least_used(&candidates))
            .or_else(|| select_any(&candidates));
        if chosen.is_none() {
            tracing::warn!(
                participant = %participant,
                group = %group.name,
                "no eligible message in group"
            );
        }
        Ok(chosen.map(|c| c.message.clone()))
    }

    /// Variant at the same index the triggering message had in its own group.
    fn mirrored(
        &self,
        reply_to: Option<&DialogMessage>,
        variants: &[MonitoringMessage],
    ) -> Result<Option<MonitoringMessage>> {
        let Some(origin_id) = reply_to.and_then(|m| m.related_monitoring_message) else {
            return Ok(None);
        };
        let Some(origin) = self.store.get_by_id::<MonitoringMessage>(origin_id)? else {
            return Ok(None);
        };
        let siblings: Vec<MonitoringMessage> = self
            .store
            .find_sorted(&MonitoringMessageQuery::ByGroup(origin.group_id), &ByOrder::Asc)?;
        let index = siblings.iter().position(|m| m.id == origin.id);
        Ok(index.and_then(|i| variants.get(i)).cloned())
    }

    fn candidates(
        &self,
        participant: Uuid,
        variants: Vec<MonitoringMessage>,
        snapshot: &Snapshot,
    ) -> Result<Vec<Candidate>> {
        let sent: Vec<DialogMessage> = self
            .store
            .find(&DialogMessageQuery::ByParticipant(participant))?;
        let mut usage: HashMap<Uuid, usize> = HashMap::new();
        for m in sent.iter().filter_map(|m| m.related_monitoring_message) {
            *usage.entry(m).or_default() += 1;
        }

        variants
            .into_iter()
            .map(|message| {
                let guards_pass = self.guards_pass(&message, snapshot)?;
                let times_used = usage.get(&message.id).copied().unwrap_or(0);
                Ok(Candidate {
                    message,
                    guards_pass,
                    times_used,
                })
            })
            .collect()
    }

    fn guards_pass(&self, message: &MonitoringMessage, snapshot: &Snapshot) -> Result<bool> {
        let guards: Vec<MonitoringMessageRule> = self
            .store
            .find_sorted(&MonitoringMessageRuleQuery::ByMessage(message.id), &ByOrder::Asc)?;
        for guard in &guards {
            match rule_evaluator::evaluate(&guard.condition, snapshot) {
                Ok(r) if r.matches => {}
                Ok(_) => return Ok(false),
                Err(e) => {
                    tracing::warn!(message = %message.id, guard = %guard.id, "guard failed: {e}");
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

// ---------------------------------------------------------------------------
// Passes
// ---------------------------------------------------------------------------

/// Pass 0: a variant never sent before whose guards pass.
pub fn select_unused(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates
        .iter()
        .find(|c| c.times_used == 0 && c.guards_pass)
}

/// Pass 1: the least-used variant over all candidates, first on ties, if its
/// guards pass.
pub fn select_least_used(candidates: &[Candidate]) -> Option<&Candidate> {
    let mut least: Option<&Candidate> = None;
    for c in candidates {
        if least.map(|l| c.times_used < l.times_used).unwrap_or(true) {
            least = Some(c);
        }
    }
    least.filter(|c| c.guards_pass)
}

/// Pass 2: any variant whose guards pass.
pub fn select_any(candidates: &[Candidate]) -> Option<&Candidate> {
    candidates.iter().find(|c| c.guards_pass)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DialogMessageStatus, DialogMessageType, EquationSign, RuleCondition};
    use chrono::Utc;
    use tempfile::TempDir;

    fn open_tmp() -> (TempDir, Store) {
        let dir = TempDir::new().unwrap();
        let store = Store::open(&dir.path().join("test.redb")).unwrap();
        (dir, store)
    }

    fn group(store: &Store, name: &str, variants: &[&str], mirror: bool) -> (MonitoringMessageGroup, Vec<MonitoringMessage>) {
        let g = MonitoringMessageGroup {
            id: Uuid::new_v4(),
            intervention_id: Uuid::nil(),
            name: name.into(),
            order: 0,
            send_in_random_order: false,
            send_same_position_if_sending_as_reply: mirror,
            messages_expect_answer: false,
            validation_expression: None,
        };
        store.save(&g).unwrap();
        let messages: Vec<MonitoringMessage> = variants
            .iter()
            .enumerate()
            .map(|(i, text)| MonitoringMessage {
                id: Uuid::new_v4(),
                group_id: g.id,
                order: i as i64,
                text: text.to_string(),
                store_value_to_variable: None,
                linked_media_object: None,
                linked_survey: None,
            })
            .collect();
        store.save_all(&messages).unwrap();
        (g, messages)
    }

    fn sent(participant: Uuid, order: u64, origin: Uuid) -> DialogMessage {
        let now = Utc::now();
        DialogMessage {
            id: Uuid::new_v4(),
            participant_id: participant,
            order,
            status: DialogMessageStatus::SentButNotWaitingForAnswer,
            kind: DialogMessageType::Plain,
            text: String::new(),
            answer_options: None,
            related_monitoring_rule: None,
            related_monitoring_message: Some(origin),
            related_micro_dialog: None,
            related_micro_dialog_message: None,
            should_be_sent_at: now,
            sent_at: Some(now),
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

    fn candidate(text: &str, guards_pass: bool, times_used: usize) -> Candidate {
        Candidate {
            message: MonitoringMessage {
                id: Uuid::new_v4(),
                group_id: Uuid::nil(),
                order: 0,
                text: text.into(),
                store_value_to_variable: None,
                linked_media_object: None,
                linked_survey: None,
            },
            guards_pass,
            times_used,
        }
    }

    #[test]
    fn unused_pass_skips_used_and_guarded() {
        let c = [candidate("a", true, 1), candidate("b", false, 0), candidate("c", true, 0)];
        assert_eq!(select_unused(&c).unwrap().message.text, "c");
    }

    #[test]
    fn least_used_pass_requires_guard() {
        let c = [candidate("a", true, 3), candidate("b", false, 1), candidate("c", true, 2)];
        assert!(select_least_used(&c).is_none());
        assert_eq!(select_any(&c).unwrap().message.text, "a");

        let c = [candidate("a", true, 3), candidate("b", true, 1), candidate("c", true, 1)];
        assert_eq!(select_least_used(&c).unwrap().message.text, "b");
    }

    #[test]
    fn never_returns_used_variant_while_unused_exist() {
        let (_dir, store) = open_tmp();
        let pid = Uuid::new_v4();
        let (g, variants) = group(&store, "tips", &["one", "two", "three"], false);
        store.save(&sent(pid, 0, variants[0].id)).unwrap();

        let selector = MessageSelector::new(&store);
        let chosen = selector.select(pid, &g, None, true, &Snapshot::new()).unwrap().unwrap();
        assert_eq!(chosen.text, "two");

        store.save(&sent(pid, 1, variants[1].id)).unwrap();
        store.save(&sent(pid, 2, variants[2].id)).unwrap();
        store.save(&sent(pid, 3, variants[0].id)).unwrap();
        // All used: the least used variant wins.
        let chosen = selector.select(pid, &g, None, true, &Snapshot::new()).unwrap().unwrap();
        assert_eq!(chosen.text, "two");
    }

    #[test]
    fn failing_guards_exclude_variant() {
        let (_dir, store) = open_tmp();
        let (g, variants) = group(&store, "tips", &["guarded", "open"], false);
        store
            .save(&MonitoringMessageRule {
                id: Uuid::new_v4(),
                message_id: variants[0].id,
                order: 0,
                condition: RuleCondition::new(EquationSign::BiggerThan, "$steps", "10000"),
            })
            .unwrap();

        let mut vars = Snapshot::new();
        vars.insert("$steps".into(), "200".into());
        let chosen = MessageSelector::new(&store)
            .select(Uuid::new_v4(), &g, None, true, &vars)
            .unwrap()
            .unwrap();
        assert_eq!(chosen.text, "open");

        // An evaluation error counts as a failing guard.
        let chosen = MessageSelector::new(&store)
            .select(Uuid::new_v4(), &g, None, true, &Snapshot::new())
            .unwrap()
            .unwrap();
        assert_eq!(chosen.text, "open");
    }

    #[test]
    fn empty_group_selects_nothing() {
        let (_dir, store) = open_tmp();
        let (g, _) = group(&store, "empty", &[], false);
        let chosen = MessageSelector::new(&store)
            .select(Uuid::new_v4(), &g, None, true, &Snapshot::new())
            .unwrap();
        assert!(chosen.is_none());
    }

    #[test]
    fn reply_mirrors_position_of_triggering_variant() {
        let (_dir, store) = open_tmp();
        let pid = Uuid::new_v4();
        let (_, questions) = group(&store, "questions", &["q0", "q1", "q2"], false);
        let (answers, _) = group(&store, "answers", &["a0", "a1", "a2"], true);
        let trigger = sent(pid, 0, questions[1].id);

        let selector = MessageSelector::new(&store);
        let chosen = selector
            .select(pid, &answers, Some(&trigger), false, &Snapshot::new())
            .unwrap()
            .unwrap();
        assert_eq!(chosen.text, "a1");
    }

    #[test]
    fn mirroring_falls_back_when_index_missing() {
        let (_dir, store) = open_tmp();
        let pid = Uuid::new_v4();
        let (_, questions) = group(&store, "A", &["q0", "q1", "q2"], false);
        let (answers, _) = group(&store, "B", &["b0", "b1"], true);
        let trigger = sent(pid, 0, questions[2].id);

        let chosen = MessageSelector::new(&store)
            .select(pid, &answers, Some(&trigger), false, &Snapshot::new())
            .unwrap()
            .unwrap();
        assert_eq!(chosen.text, "b0");
    }

    #[test]
    fn monitoring_rule_context_never_mirrors() {
        let (_dir, store) = open_tmp();
        let pid = Uuid::new_v4();
        let (_, questions) = group(&store, "A", &["q0", "q1"], false);
        let (answers, _) = group(&store, "B", &["b0", "b1"], true);
        let trigger = sent(pid, 0, questions[1].id);

        let chosen = MessageSelector::new(&store)
            .select(pid, &answers, Some(&trigger), true, &Snapshot::new())
            .unwrap()
            .unwrap();
        assert_eq!(chosen.text, "b0");
    }
}
