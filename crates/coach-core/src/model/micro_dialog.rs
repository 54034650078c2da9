use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::condition::RuleCondition;
use super::monitoring::ReplyWindow;

/// A short branching sequence. Messages and decision points share one
/// `order` axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroDialog {
    pub id: Uuid,
    pub intervention_id: Uuid,
    pub name: String,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroDialogMessage {
    pub id: Uuid,
    pub micro_dialog_id: Uuid,
    pub order: i64,
    pub text: String,
    #[serde(default)]
    pub is_command: bool,
    #[serde(default)]
    pub expects_answer: bool,
    /// Stop walking after this message until it is answered or times out.
    #[serde(default)]
    pub blocks_until_answered: bool,
    #[serde(default)]
    pub store_value_to_variable: Option<String>,
    /// Stored instead of an answer when the message times out.
    #[serde(default)]
    pub no_reply_value: Option<String>,
    #[serde(default)]
    pub reply_window: ReplyWindow,
    #[serde(default)]
    pub answer_options: Option<String>,
    #[serde(default)]
    pub linked_media_object: Option<String>,
    #[serde(default)]
    pub linked_survey: Option<String>,
}

/// Guard on a micro-dialog message; a failing guard skips the message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroDialogMessageRule {
    pub id: Uuid,
    pub micro_dialog_message_id: Uuid,
    #[serde(default)]
    pub order: i64,
    pub condition: RuleCondition,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroDialogDecisionPoint {
    pub id: Uuid,
    pub micro_dialog_id: Uuid,
    pub order: i64,
    #[serde(default)]
    pub comment: Option<String>,
}

/// Rule tree node evaluated at a decision point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MicroDialogRule {
    pub id: Uuid,
    pub decision_point_id: Uuid,
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
    pub next_message_when_true: Option<Uuid>,
    #[serde(default)]
    pub next_micro_dialog_when_true: Option<Uuid>,
    #[serde(default)]
    pub stop_micro_dialog_when_true: bool,
}
