use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::condition::RuleCondition;

/// Default answer window of monitoring rules: four hours.
pub const DEFAULT_REPLY_WINDOW_MINUTES: u32 = 4 * 60;

/// Default hour of day for daily messages.
pub const DEFAULT_SEND_HOUR: u32 = 18;

// ---------------------------------------------------------------------------
// ReplyWindow
// ---------------------------------------------------------------------------

/// How long an outbound message waits for an answer before it is handled as
/// unanswered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyWindow {
    Minutes(u32),
    Infinite,
}

impl ReplyWindow {
    pub fn hours(hours: u32) -> Self {
        ReplyWindow::Minutes(hours.saturating_mul(60))
    }

    /// Deadline for a message sent at `sent_at`.
    pub fn deadline_from(self, sent_at: DateTime<Utc>) -> DateTime<Utc> {
        match self {
            ReplyWindow::Minutes(m) => sent_at + Duration::minutes(i64::from(m)),
            ReplyWindow::Infinite => infinite_deadline(),
        }
    }
}

impl Default for ReplyWindow {
    fn default() -> Self {
        ReplyWindow::Minutes(DEFAULT_REPLY_WINDOW_MINUTES)
    }
}

/// Sentinel deadline for messages that wait forever: 9999-12-31T23:59:59Z.
pub fn infinite_deadline() -> DateTime<Utc> {
    DateTime::from_timestamp(253_402_300_799, 0).unwrap_or(DateTime::<Utc>::MAX_UTC)
}

// ---------------------------------------------------------------------------
// SendHour
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendHour {
    Fixed(u32),
    /// Hour read from a participant variable at scheduling time.
    FromVariable(String),
}

impl Default for SendHour {
    fn default() -> Self {
        SendHour::Fixed(DEFAULT_SEND_HOUR)
    }
}

// ---------------------------------------------------------------------------
// MonitoringRule
// ---------------------------------------------------------------------------

/// Which execution case a root monitoring rule tree belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MonitoringRuleKind {
    Daily,
    Periodic,
    UnexpectedMessage,
    UserIntention,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringRule {
    pub id: Uuid,
    pub intervention_id: Uuid,
    pub kind: MonitoringRuleKind,
    #[serde(default)]
    pub parent: Option<Uuid>,
    #[serde(default)]
    pub order: i64,
    /// Else-if depth among siblings, see the resolver.
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub condition: RuleCondition,
    #[serde(default)]
    pub store_value_to_variable: Option<String>,
    #[serde(default)]
    pub send_message_if_true: bool,
    #[serde(default)]
    pub message_group: Option<Uuid>,
    #[serde(default)]
    pub send_to_supervisor: bool,
    #[serde(default)]
    pub activate_micro_dialog: Option<Uuid>,
    #[serde(default)]
    pub stop_intervention_when_true: bool,
    #[serde(default)]
    pub send_hour: SendHour,
    #[serde(default)]
    pub reply_window: ReplyWindow,
}

// ---------------------------------------------------------------------------
// MonitoringReplyRule
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplyBranch {
    GotAnswer,
    GotNoAnswer,
}

impl ReplyBranch {
    pub fn for_answer(answered: bool) -> Self {
        if answered {
            ReplyBranch::GotAnswer
        } else {
            ReplyBranch::GotNoAnswer
        }
    }
}

/// Rule evaluated when a message sent by `monitoring_rule_id` is answered or
/// times out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringReplyRule {
    pub id: Uuid,
    pub monitoring_rule_id: Uuid,
    pub branch: ReplyBranch,
    #[serde(default)]
    pub parent: Option<Uuid>,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub level: u32,
    #[serde(default)]
    pub condition: RuleCondition,
    #[serde(default)]
    pub store_value_to_variable: Option<String>,
    #[serde(default)]
    pub send_message_if_true: bool,
    #[serde(default)]
    pub message_group: Option<Uuid>,
    #[serde(default)]
    pub send_to_supervisor: bool,
    #[serde(default)]
    pub activate_micro_dialog: Option<Uuid>,
}

// ---------------------------------------------------------------------------
// Message groups
// ---------------------------------------------------------------------------

/// A pool of interchangeable message variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringMessageGroup {
    pub id: Uuid,
    pub intervention_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub send_in_random_order: bool,
    #[serde(default)]
    pub send_same_position_if_sending_as_reply: bool,
    #[serde(default)]
    pub messages_expect_answer: bool,
    /// Answers must match this expression as a whole; capture group 1, when
    /// present, becomes the stored answer.
    #[serde(default)]
    pub validation_expression: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringMessage {
    pub id: Uuid,
    pub group_id: Uuid,
    #[serde(default)]
    pub order: i64,
    pub text: String,
    #[serde(default)]
    pub store_value_to_variable: Option<String>,
    #[serde(default)]
    pub linked_media_object: Option<String>,
    #[serde(default)]
    pub linked_survey: Option<String>,
}

/// Guard on a message variant; all guards of a variant must hold.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringMessageRule {
    pub id: Uuid,
    pub message_id: Uuid,
    #[serde(default)]
    pub order: i64,
    pub condition: RuleCondition,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reply_window_deadlines() {
        let sent = Utc::now();
        assert_eq!(
            ReplyWindow::hours(2).deadline_from(sent),
            sent + Duration::hours(2)
        );
        let forever = ReplyWindow::Infinite.deadline_from(sent);
        assert_eq!(forever.format("%Y-%m-%d").to_string(), "9999-12-31");
    }

    #[test]
    fn rule_yaml_uses_defaults() {
        let yaml = r#"
id: 6f1c2d9e-8c44-4e36-9a57-0d3e4b1b2a10
intervention_id: 0b8f7a52-5d7e-4a3a-8a1e-1c0f3c5f2d11
kind: daily
send_hour:
  from_variable: $preferredHour
"#;
        let rule: MonitoringRule = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(rule.level, 0);
        assert!(rule.parent.is_none());
        assert_eq!(rule.send_hour, SendHour::FromVariable("$preferredHour".into()));
        assert_eq!(rule.reply_window, ReplyWindow::Minutes(240));
    }
}
