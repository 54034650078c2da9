//! Persistent entities of the engine.

pub mod condition;
pub mod dialog_message;
pub mod micro_dialog;
pub mod monitoring;
pub mod participant;

pub use condition::{EquationSign, RuleCondition};
pub use dialog_message::{DialogMessage, DialogMessageStatus, DialogMessageType};
pub use micro_dialog::{
    MicroDialog, MicroDialogDecisionPoint, MicroDialogMessage, MicroDialogMessageRule,
    MicroDialogRule,
};
pub use monitoring::{
    MonitoringMessage, MonitoringMessageGroup, MonitoringMessageRule, MonitoringReplyRule,
    MonitoringRule, MonitoringRuleKind, ReplyBranch, ReplyWindow, SendHour,
};
pub use participant::{
    DialogOption, DialogOptionType, DialogStatus, Intervention, LinkTarget, Participant,
    ParticipantVariable, ShortUrl,
};
