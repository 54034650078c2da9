//! Intervention bundles: one YAML file carrying an intervention with its
//! participants, rules, message pools and micro-dialogs.

use std::collections::HashSet;
use std::path::Path;

use chrono::{Offset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CoachError, Result};
use crate::model::{
    DialogOption, DialogStatus, Intervention, MicroDialog, MicroDialogDecisionPoint,
    MicroDialogMessage, MicroDialogMessageRule, MicroDialogRule, MonitoringMessage,
    MonitoringMessageGroup, MonitoringMessageRule, MonitoringReplyRule, MonitoringRule,
    Participant,
};
use crate::store::queries::DialogStatusQuery;
use crate::store::Store;
use crate::variables::{StoreVariables, VariableStore};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleVariable {
    pub participant_id: Uuid,
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InterventionBundle {
    pub intervention: Intervention,
    #[serde(default)]
    pub participants: Vec<Participant>,
    #[serde(default)]
    pub dialog_options: Vec<DialogOption>,
    #[serde(default)]
    pub dialog_statuses: Vec<DialogStatus>,
    #[serde(default)]
    pub monitoring_rules: Vec<MonitoringRule>,
    #[serde(default)]
    pub reply_rules: Vec<MonitoringReplyRule>,
    #[serde(default)]
    pub message_groups: Vec<MonitoringMessageGroup>,
    #[serde(default)]
    pub messages: Vec<MonitoringMessage>,
    #[serde(default)]
    pub message_rules: Vec<MonitoringMessageRule>,
    #[serde(default)]
    pub micro_dialogs: Vec<MicroDialog>,
    #[serde(default)]
    pub micro_dialog_messages: Vec<MicroDialogMessage>,
    #[serde(default)]
    pub micro_dialog_message_rules: Vec<MicroDialogMessageRule>,
    #[serde(default)]
    pub decision_points: Vec<MicroDialogDecisionPoint>,
    #[serde(default)]
    pub micro_dialog_rules: Vec<MicroDialogRule>,
    #[serde(default)]
    pub variables: Vec<BundleVariable>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportReport {
    pub participants: usize,
    pub statuses_created: usize,
    pub rules: usize,
    pub messages: usize,
    pub micro_dialog_items: usize,
    pub variables: usize,
}

impl InterventionBundle {
    pub fn load(path: &Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        let bundle: InterventionBundle = serde_yaml::from_str(&data)?;
        Ok(bundle)
    }

    /// Check that every reference points into this bundle.
    pub fn validate(&self) -> Result<()> {
        let intervention = self.intervention.id;
        let participants: HashSet<Uuid> = self.participants.iter().map(|p| p.id).collect();
        let rules: HashSet<Uuid> = self.monitoring_rules.iter().map(|r| r.id).collect();
        let groups: HashSet<Uuid> = self.message_groups.iter().map(|g| g.id).collect();
        let messages: HashSet<Uuid> = self.messages.iter().map(|m| m.id).collect();
        let micro_dialogs: HashSet<Uuid> = self.micro_dialogs.iter().map(|d| d.id).collect();
        let md_messages: HashSet<Uuid> = self.micro_dialog_messages.iter().map(|m| m.id).collect();
        let points: HashSet<Uuid> = self.decision_points.iter().map(|p| p.id).collect();

        let check = |ok: bool, what: &str, id: Uuid| {
            if ok {
                Ok(())
            } else {
                Err(CoachError::InvalidConfig(format!("{what} {id} has a dangling reference")))
            }
        };

        for p in &self.participants {
            check(p.intervention_id == intervention, "participant", p.id)?;
        }
        for o in &self.dialog_options {
            check(participants.contains(&o.participant_id), "dialog option", o.id)?;
        }
        for s in &self.dialog_statuses {
            check(participants.contains(&s.participant_id), "dialog status", s.id)?;
        }
        for r in &self.monitoring_rules {
            check(
                r.intervention_id == intervention
                    && r.parent.is_none_or_in(&rules)
                    && r.message_group.is_none_or_in(&groups)
                    && r.activate_micro_dialog.is_none_or_in(&micro_dialogs),
                "monitoring rule",
                r.id,
            )?;
        }
        let reply_rules: HashSet<Uuid> = self.reply_rules.iter().map(|r| r.id).collect();
        for r in &self.reply_rules {
            check(
                rules.contains(&r.monitoring_rule_id)
                    && r.parent.is_none_or_in(&reply_rules)
                    && r.message_group.is_none_or_in(&groups)
                    && r.activate_micro_dialog.is_none_or_in(&micro_dialogs),
                "reply rule",
                r.id,
            )?;
        }
        for g in &self.message_groups {
            check(g.intervention_id == intervention, "message group", g.id)?;
        }
        for m in &self.messages {
            check(groups.contains(&m.group_id), "message", m.id)?;
        }
        for r in &self.message_rules {
            check(messages.contains(&r.message_id), "message rule", r.id)?;
        }
        for d in &self.micro_dialogs {
            check(d.intervention_id == intervention, "micro-dialog", d.id)?;
        }
        for m in &self.micro_dialog_messages {
            check(micro_dialogs.contains(&m.micro_dialog_id), "micro-dialog message", m.id)?;
        }
        for r in &self.micro_dialog_message_rules {
            check(md_messages.contains(&r.micro_dialog_message_id), "micro-dialog message rule", r.id)?;
        }
        for p in &self.decision_points {
            check(micro_dialogs.contains(&p.micro_dialog_id), "decision point", p.id)?;
        }
        let md_rules: HashSet<Uuid> = self.micro_dialog_rules.iter().map(|r| r.id).collect();
        for r in &self.micro_dialog_rules {
            check(
                points.contains(&r.decision_point_id)
                    && r.parent.is_none_or_in(&md_rules)
                    && r.next_message_when_true.is_none_or_in(&md_messages)
                    && r.next_micro_dialog_when_true.is_none_or_in(&micro_dialogs),
                "micro-dialog rule",
                r.id,
            )?;
        }
        for v in &self.variables {
            if !participants.contains(&v.participant_id) {
                return Err(CoachError::InvalidConfig(format!(
                    "variable {} belongs to unknown participant {}",
                    v.name, v.participant_id
                )));
            }
        }
        Ok(())
    }

    /// Validate and write everything into `store`. Existing records with the
    /// same ids are replaced; participants without a dialog status get a
    /// fresh one.
    pub fn import(&self, store: &Store, clock: &dyn Clock) -> Result<ImportReport> {
        self.validate()?;
        let mut report = ImportReport::default();

        store.save(&self.intervention)?;
        store.save_all(&self.participants)?;
        store.save_all(&self.dialog_options)?;
        store.save_all(&self.dialog_statuses)?;
        report.participants = self.participants.len();

        for participant in &self.participants {
            if store.count(&DialogStatusQuery::ByParticipant(participant.id))? == 0 {
                store.save(&DialogStatus::new(participant.id))?;
                report.statuses_created += 1;
            }
        }

        store.save_all(&self.monitoring_rules)?;
        store.save_all(&self.reply_rules)?;
        report.rules = self.monitoring_rules.len() + self.reply_rules.len();

        store.save_all(&self.message_groups)?;
        store.save_all(&self.messages)?;
        store.save_all(&self.message_rules)?;
        report.messages = self.messages.len();

        store.save_all(&self.micro_dialogs)?;
        store.save_all(&self.micro_dialog_messages)?;
        store.save_all(&self.micro_dialog_message_rules)?;
        store.save_all(&self.decision_points)?;
        store.save_all(&self.micro_dialog_rules)?;
        report.micro_dialog_items = self.micro_dialog_messages.len() + self.decision_points.len();

        let variables = StoreVariables::new(store, clock, Utc.fix());
        for v in &self.variables {
            variables.write(v.participant_id, &v.name, &v.value)?;
        }
        report.variables = self.variables.len();

        tracing::info!(intervention = %self.intervention.id, name = %self.intervention.name, ?report, "bundle imported");
        Ok(report)
    }
}

trait OptionalRef {
    fn is_none_or_in(&self, ids: &HashSet<Uuid>) -> bool;
}

impl OptionalRef for Option<Uuid> {
    fn is_none_or_in(&self, ids: &HashSet<Uuid>) -> bool {
        self.map_or(true, |id| ids.contains(&id))
    }
}
