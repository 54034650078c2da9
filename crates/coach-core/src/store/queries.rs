//! Named predicates and sort orders over stored entities.

use std::cmp::Ordering;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::model::{
    DialogMessage, DialogMessageStatus, DialogOption, DialogOptionType, DialogStatus,
    Intervention, MicroDialog, MicroDialogDecisionPoint, MicroDialogMessage,
    MicroDialogMessageRule, MicroDialogRule, MonitoringMessage, MonitoringMessageGroup,
    MonitoringMessageRule, MonitoringReplyRule, MonitoringRule, MonitoringRuleKind, Participant,
    ParticipantVariable, ReplyBranch, ShortUrl,
};

pub trait Predicate<E> {
    fn matches(&self, entity: &E) -> bool;
}

pub trait SortOrder<E> {
    fn compare(&self, a: &E, b: &E) -> Ordering;
}

// ---------------------------------------------------------------------------
// Ordering by `order`
// ---------------------------------------------------------------------------

/// Entities carrying an explicit `order` field.
pub trait Ordered {
    fn order_key(&self) -> i128;
}

macro_rules! ordered {
    ($($ty:ty),* $(,)?) => {
        $(impl Ordered for $ty {
            fn order_key(&self) -> i128 {
                i128::from(self.order)
            }
        })*
    };
}

ordered!(
    DialogMessage,
    MonitoringRule,
    MonitoringReplyRule,
    MonitoringMessageGroup,
    MonitoringMessage,
    MonitoringMessageRule,
    MicroDialog,
    MicroDialogMessage,
    MicroDialogMessageRule,
    MicroDialogDecisionPoint,
    MicroDialogRule,
);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByOrder {
    Asc,
    Desc,
}

impl<E: Ordered> SortOrder<E> for ByOrder {
    fn compare(&self, a: &E, b: &E) -> Ordering {
        match self {
            ByOrder::Asc => a.order_key().cmp(&b.order_key()),
            ByOrder::Desc => b.order_key().cmp(&a.order_key()),
        }
    }
}

// ---------------------------------------------------------------------------
// Interventions and participants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum InterventionQuery {
    All,
    ActiveAndMonitoringActive,
    Active,
}

impl Predicate<Intervention> for InterventionQuery {
    fn matches(&self, i: &Intervention) -> bool {
        match self {
            InterventionQuery::All => true,
            InterventionQuery::ActiveAndMonitoringActive => i.is_running(),
            InterventionQuery::Active => i.active,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ParticipantQuery {
    All,
    ByIntervention(Uuid),
    ByInterventionAndMonitoringActive(Uuid),
}

impl Predicate<Participant> for ParticipantQuery {
    fn matches(&self, p: &Participant) -> bool {
        match self {
            ParticipantQuery::All => true,
            ParticipantQuery::ByIntervention(id) => p.intervention_id == *id,
            ParticipantQuery::ByInterventionAndMonitoringActive(id) => {
                p.intervention_id == *id && p.monitoring_active
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ParticipantSort {
    CreatedAsc,
}

impl SortOrder<Participant> for ParticipantSort {
    fn compare(&self, a: &Participant, b: &Participant) -> Ordering {
        match self {
            ParticipantSort::CreatedAsc => a.created_at.cmp(&b.created_at),
        }
    }
}

#[derive(Debug, Clone)]
pub enum DialogOptionQuery {
    ByParticipant(Uuid),
    ByParticipantAndKind(Uuid, DialogOptionType),
    ByKindAndData(DialogOptionType, String),
}

impl Predicate<DialogOption> for DialogOptionQuery {
    fn matches(&self, o: &DialogOption) -> bool {
        match self {
            DialogOptionQuery::ByParticipant(p) => o.participant_id == *p,
            DialogOptionQuery::ByParticipantAndKind(p, kind) => {
                o.participant_id == *p && o.kind == *kind
            }
            DialogOptionQuery::ByKindAndData(kind, data) => {
                o.kind == *kind && o.data.trim().eq_ignore_ascii_case(data.trim())
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum DialogStatusQuery {
    ByParticipant(Uuid),
}

impl Predicate<DialogStatus> for DialogStatusQuery {
    fn matches(&self, s: &DialogStatus) -> bool {
        match self {
            DialogStatusQuery::ByParticipant(p) => s.participant_id == *p,
        }
    }
}

// ---------------------------------------------------------------------------
// Dialog messages
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum DialogMessageQuery {
    ByParticipant(Uuid),
    ByStatus(DialogMessageStatus),
    ByParticipantAndStatus(Uuid, DialogMessageStatus),
    /// `PREPARED_FOR_SENDING` and due at the given instant.
    DueForSending(Uuid, DateTime<Utc>),
    /// Waiting for an answer with a deadline at or before the given instant.
    UnansweredAfter(Uuid, DateTime<Utc>),
    /// Waiting for an answer and still inside the reply window at the given instant.
    OpenAt(Uuid, DateTime<Utc>),
    ByParticipantAndMonitoringMessage(Uuid, Uuid),
    ByParticipantAndClientId(Uuid, String),
    OpenForMicroDialogMessage(Uuid, Uuid),
}

impl Predicate<DialogMessage> for DialogMessageQuery {
    fn matches(&self, m: &DialogMessage) -> bool {
        match self {
            DialogMessageQuery::ByParticipant(p) => m.participant_id == *p,
            DialogMessageQuery::ByStatus(s) => m.status == *s,
            DialogMessageQuery::ByParticipantAndStatus(p, s) => {
                m.participant_id == *p && m.status == *s
            }
            DialogMessageQuery::DueForSending(p, now) => m.participant_id == *p && m.is_due(*now),
            DialogMessageQuery::UnansweredAfter(p, now) => {
                m.participant_id == *p
                    && m.status == DialogMessageStatus::SentAndWaitingForAnswer
                    && m.is_unanswered_after.map(|d| d <= *now).unwrap_or(false)
            }
            DialogMessageQuery::OpenAt(p, at) => m.participant_id == *p && m.accepts_answer_at(*at),
            DialogMessageQuery::ByParticipantAndMonitoringMessage(p, mm) => {
                m.participant_id == *p && m.related_monitoring_message == Some(*mm)
            }
            DialogMessageQuery::ByParticipantAndClientId(p, client_id) => {
                m.participant_id == *p && m.client_id.as_deref() == Some(client_id.as_str())
            }
            DialogMessageQuery::OpenForMicroDialogMessage(p, mdm) => {
                m.participant_id == *p
                    && m.related_micro_dialog_message == Some(*mdm)
                    && m.status == DialogMessageStatus::SentAndWaitingForAnswer
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Rule trees and message pools
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum MonitoringRuleQuery {
    ByIntervention(Uuid),
    ByInterventionAndKind(Uuid, MonitoringRuleKind),
}

impl Predicate<MonitoringRule> for MonitoringRuleQuery {
    fn matches(&self, r: &MonitoringRule) -> bool {
        match self {
            MonitoringRuleQuery::ByIntervention(i) => r.intervention_id == *i,
            MonitoringRuleQuery::ByInterventionAndKind(i, kind) => {
                r.intervention_id == *i && r.kind == *kind
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum MonitoringReplyRuleQuery {
    ByMonitoringRuleAndBranch(Uuid, ReplyBranch),
}

impl Predicate<MonitoringReplyRule> for MonitoringReplyRuleQuery {
    fn matches(&self, r: &MonitoringReplyRule) -> bool {
        match self {
            MonitoringReplyRuleQuery::ByMonitoringRuleAndBranch(rule, branch) => {
                r.monitoring_rule_id == *rule && r.branch == *branch
            }
        }
    }
}

#[derive(Debug, Clone)]
pub enum MonitoringMessageGroupQuery {
    ByIntervention(Uuid),
}

impl Predicate<MonitoringMessageGroup> for MonitoringMessageGroupQuery {
    fn matches(&self, g: &MonitoringMessageGroup) -> bool {
        match self {
            MonitoringMessageGroupQuery::ByIntervention(i) => g.intervention_id == *i,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MonitoringMessageQuery {
    ByGroup(Uuid),
}

impl Predicate<MonitoringMessage> for MonitoringMessageQuery {
    fn matches(&self, m: &MonitoringMessage) -> bool {
        match self {
            MonitoringMessageQuery::ByGroup(g) => m.group_id == *g,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MonitoringMessageRuleQuery {
    ByMessage(Uuid),
}

impl Predicate<MonitoringMessageRule> for MonitoringMessageRuleQuery {
    fn matches(&self, r: &MonitoringMessageRule) -> bool {
        match self {
            MonitoringMessageRuleQuery::ByMessage(m) => r.message_id == *m,
        }
    }
}

// ---------------------------------------------------------------------------
// Micro-dialogs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum MicroDialogQuery {
    ByIntervention(Uuid),
}

impl Predicate<MicroDialog> for MicroDialogQuery {
    fn matches(&self, d: &MicroDialog) -> bool {
        match self {
            MicroDialogQuery::ByIntervention(i) => d.intervention_id == *i,
        }
    }
}

/// Items of one micro-dialog positioned after a cursor.
#[derive(Debug, Clone)]
pub enum MicroDialogItemQuery {
    ByMicroDialog(Uuid),
    ByMicroDialogAfter(Uuid, i64),
}

impl MicroDialogItemQuery {
    fn accepts(&self, micro_dialog_id: Uuid, order: i64) -> bool {
        match self {
            MicroDialogItemQuery::ByMicroDialog(d) => micro_dialog_id == *d,
            MicroDialogItemQuery::ByMicroDialogAfter(d, cursor) => {
                micro_dialog_id == *d && order > *cursor
            }
        }
    }
}

impl Predicate<MicroDialogMessage> for MicroDialogItemQuery {
    fn matches(&self, m: &MicroDialogMessage) -> bool {
        self.accepts(m.micro_dialog_id, m.order)
    }
}

impl Predicate<MicroDialogDecisionPoint> for MicroDialogItemQuery {
    fn matches(&self, d: &MicroDialogDecisionPoint) -> bool {
        self.accepts(d.micro_dialog_id, d.order)
    }
}

#[derive(Debug, Clone)]
pub enum MicroDialogMessageRuleQuery {
    ByMessage(Uuid),
}

impl Predicate<MicroDialogMessageRule> for MicroDialogMessageRuleQuery {
    fn matches(&self, r: &MicroDialogMessageRule) -> bool {
        match self {
            MicroDialogMessageRuleQuery::ByMessage(m) => r.micro_dialog_message_id == *m,
        }
    }
}

#[derive(Debug, Clone)]
pub enum MicroDialogRuleQuery {
    ByDecisionPoint(Uuid),
}

impl Predicate<MicroDialogRule> for MicroDialogRuleQuery {
    fn matches(&self, r: &MicroDialogRule) -> bool {
        match self {
            MicroDialogRuleQuery::ByDecisionPoint(d) => r.decision_point_id == *d,
        }
    }
}

// ---------------------------------------------------------------------------
// Variables and short links
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub enum ParticipantVariableQuery {
    ByParticipant(Uuid),
    ByParticipantAndName(Uuid, String),
}

impl Predicate<ParticipantVariable> for ParticipantVariableQuery {
    fn matches(&self, v: &ParticipantVariable) -> bool {
        match self {
            ParticipantVariableQuery::ByParticipant(p) => v.participant_id == *p,
            ParticipantVariableQuery::ByParticipantAndName(p, name) => {
                v.participant_id == *p && v.name == *name
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum VariableSort {
    UpdatedDesc,
}

impl SortOrder<ParticipantVariable> for VariableSort {
    fn compare(&self, a: &ParticipantVariable, b: &ParticipantVariable) -> Ordering {
        match self {
            VariableSort::UpdatedDesc => b.updated_at.cmp(&a.updated_at),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ShortUrlQuery {
    All,
    ByDialogMessage(Uuid),
}

impl Predicate<ShortUrl> for ShortUrlQuery {
    fn matches(&self, s: &ShortUrl) -> bool {
        match self {
            ShortUrlQuery::All => true,
            ShortUrlQuery::ByDialogMessage(m) => s.dialog_message_id == *m,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub enum ShortUrlSort {
    ShortIdDesc,
}

impl SortOrder<ShortUrl> for ShortUrlSort {
    fn compare(&self, a: &ShortUrl, b: &ShortUrl) -> Ordering {
        match self {
            ShortUrlSort::ShortIdDesc => b.short_id.cmp(&a.short_id),
        }
    }
}
