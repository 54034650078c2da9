//! The scheduling tick: reply and timeout reactions, daily and periodic passes.

use chrono::{DateTime, Datelike, Duration, Utc};
use serde::Serialize;

use super::{Engine, Timing};
use crate::error::Result;
use crate::model::{
    DialogMessage, DialogMessageStatus, DialogStatus, Intervention, MicroDialogMessage,
    MonitoringMessage, MonitoringRuleKind, Participant,
};
use crate::resolver::{ResolutionCase, Resolver};
use crate::store::queries::{ByOrder, DialogMessageQuery, InterventionQuery, ParticipantQuery};
use crate::variables::{self, VariableStore};

/// What one scheduling tick did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TickReport {
    pub participants: usize,
    pub timeouts: usize,
    pub answers: usize,
    pub daily_passes: usize,
    pub periodic_passes: usize,
    pub messages_created: usize,
    pub monitoring_finished: usize,
    pub failures: usize,
}

impl Engine {
    /// Run one scheduling tick over every monitoring-active participant of
    /// every running intervention. A failing participant is logged and
    /// skipped.
    pub fn run_scheduling_tick(&self) -> Result<TickReport> {
        let now = self.now();
        let periodic_due = self.claim_periodic_run(now);
        let mut report = TickReport::default();

        let interventions: Vec<Intervention> =
            self.store.find(&InterventionQuery::ActiveAndMonitoringActive)?;
        for intervention in &interventions {
            let participants: Vec<Participant> = self.store.find(
                &ParticipantQuery::ByInterventionAndMonitoringActive(intervention.id),
            )?;
            for participant in participants {
                report.participants += 1;
                let _guard = self.locks.lock(participant.id);
                if let Err(e) =
                    self.schedule_participant(intervention, &participant, periodic_due, now, &mut report)
                {
                    report.failures += 1;
                    tracing::error!(participant = %participant.id, "scheduling failed: {e}");
                }
            }
        }

        tracing::debug!(?report, periodic_due, "scheduling tick finished");
        Ok(report)
    }

    /// Whether the periodic pass runs in this tick. Claims the run when it does.
    fn claim_periodic_run(&self, now: DateTime<Utc>) -> bool {
        let interval = Duration::minutes(i64::from(self.config.periodic_interval_minutes));
        let mut shared = self.shared();
        let due = shared
            .last_periodic_run
            .map_or(true, |last| now - last >= interval);
        if due {
            shared.last_periodic_run = Some(now);
        }
        due
    }

    fn schedule_participant(
        &self,
        intervention: &Intervention,
        participant: &Participant,
        periodic_due: bool,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<()> {
        // Re-validate under the lock; the listing above may be stale.
        let Some(participant) = self.store.get_by_id::<Participant>(participant.id)? else {
            return Ok(());
        };
        if !participant.monitoring_active {
            return Ok(());
        }
        let Some(status) = self.status_of(participant.id)? else {
            tracing::warn!(participant = %participant.id, "participant has no dialog status");
            return Ok(());
        };
        if !status.is_eligible_for_monitoring() {
            return Ok(());
        }

        report.timeouts += self.react_to_unanswered(&participant, now)?;
        report.answers += self.react_to_answered(&participant, now)?;

        // Reactions may have finished monitoring.
        let Some(mut status) = self.status_of(participant.id)? else {
            return Ok(());
        };
        if status.monitoring_performed {
            return Ok(());
        }

        match self.daily_pass(intervention, &participant, &mut status, now)? {
            PassOutcome::Skipped => {}
            PassOutcome::Ran(created) => {
                report.daily_passes += 1;
                report.messages_created += created;
            }
            PassOutcome::Finished => {
                report.daily_passes += 1;
                report.monitoring_finished += 1;
                return Ok(());
            }
        }

        if periodic_due && status.monitoring_started_at.is_some() {
            match self.periodic_pass(&participant, &mut status, now)? {
                PassOutcome::Skipped => {}
                PassOutcome::Ran(created) => {
                    report.periodic_passes += 1;
                    report.messages_created += created;
                }
                PassOutcome::Finished => {
                    report.periodic_passes += 1;
                    report.monitoring_finished += 1;
                }
            }
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Reactions
    // -----------------------------------------------------------------------

    /// React to every waiting message whose reply window has closed.
    pub(super) fn react_to_unanswered(
        &self,
        participant: &Participant,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let expired: Vec<DialogMessage> = self.store.find_sorted(
            &DialogMessageQuery::UnansweredAfter(participant.id, now),
            &ByOrder::Asc,
        )?;
        let count = expired.len();
        for mut message in expired {
            tracing::debug!(participant = %participant.id, message = %message.id, "reply window closed");

            if let Some(mdm) = self.micro_dialog_message_of(&message)? {
                if let (Some(name), Some(value)) = (&mdm.store_value_to_variable, &mdm.no_reply_value) {
                    self.write_logged(participant, name, value);
                }
            }

            match self.dialog_option(participant.id, message.supervisor_message)? {
                Some(option) => {
                    if let Err(e) = self.transport.inform_about_answering_timeout(&option, &message) {
                        tracing::warn!(message = %message.id, "timeout notification failed: {e}");
                    }
                }
                None => {
                    tracing::warn!(participant = %participant.id, "no dialog option for timeout notification")
                }
            }

            self.ledger().mark_processed(&mut message, false, now)?;
            self.react_with_reply_rules(participant, &message, false, now)?;
            self.resume_micro_dialog(participant, &message, now)?;
        }
        Ok(count)
    }

    /// React to every answer accepted since the last tick.
    pub(super) fn react_to_answered(
        &self,
        participant: &Participant,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let answered: Vec<DialogMessage> = self.store.find_sorted(
            &DialogMessageQuery::ByParticipantAndStatus(
                participant.id,
                DialogMessageStatus::SentAndAnsweredByParticipant,
            ),
            &ByOrder::Asc,
        )?;
        let count = answered.len();
        for message in answered {
            self.react_to_answer(participant, message, now)?;
        }
        Ok(count)
    }

    /// Consume one accepted answer: store it, close the message, run the
    /// "got answer" reply rules and continue a blocked micro-dialog.
    pub(super) fn react_to_answer(
        &self,
        participant: &Participant,
        mut message: DialogMessage,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let answer = message.answer.clone().unwrap_or_default();

        let target = match message.related_monitoring_message {
            Some(id) => self
                .store
                .get_by_id::<MonitoringMessage>(id)?
                .and_then(|m| m.store_value_to_variable),
            None => self
                .micro_dialog_message_of(&message)?
                .and_then(|m| m.store_value_to_variable),
        };
        if let Some(name) = target {
            self.write_logged(participant, &name, &answer);
        }
        if let Err(e) = self
            .variables()
            .write_internal(participant.id, variables::MESSAGE_REPLY, &answer)
        {
            tracing::warn!(participant = %participant.id, "could not store reply: {e}");
        }

        self.ledger().mark_processed(&mut message, true, now)?;
        self.react_with_reply_rules(participant, &message, true, now)?;
        self.resume_micro_dialog(participant, &message, now)
    }

    fn react_with_reply_rules(
        &self,
        participant: &Participant,
        message: &DialogMessage,
        answered: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let Some(monitoring_rule) = message.related_monitoring_rule else {
            return Ok(());
        };
        let variables = self.variables();
        let resolution = Resolver::new(&self.store, &variables, participant)
            .with_context(message)
            .resolve(ResolutionCase::Reply {
                monitoring_rule,
                answered,
            })?;
        self.apply_resolution(participant, resolution, Timing::Now, now)?;
        Ok(())
    }

    fn micro_dialog_message_of(&self, message: &DialogMessage) -> Result<Option<MicroDialogMessage>> {
        match message.related_micro_dialog_message {
            Some(id) => self.store.get_by_id(id),
            None => Ok(None),
        }
    }

    /// Variable write whose failure only concerns the author of the rule.
    fn write_logged(&self, participant: &Participant, name: &str, value: &str) {
        if let Err(e) = self.variables().write(participant.id, name, value) {
            tracing::warn!(participant = %participant.id, variable = name, "variable not written: {e}");
        }
    }

    // -----------------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------------

    fn daily_pass(
        &self,
        intervention: &Intervention,
        participant: &Participant,
        status: &mut DialogStatus,
        now: DateTime<Utc>,
    ) -> Result<PassOutcome> {
        let today = now.with_timezone(&self.offset()).date_naive();
        let date_index = today.format("%Y-%m-%d").to_string();
        if status.last_daily_pass_date_index.as_deref() == Some(date_index.as_str()) {
            return Ok(PassOutcome::Skipped);
        }
        if status.days_participated == 0 && !intervention.may_start_on(today.weekday()) {
            tracing::debug!(participant = %participant.id, weekday = %today.weekday(), "not a starting day");
            return Ok(PassOutcome::Skipped);
        }

        let variables = self.variables();
        let resolution = Resolver::new(&self.store, &variables, participant)
            .resolve(ResolutionCase::Monitoring(MonitoringRuleKind::Daily))?;
        if resolution.stop_intervention {
            self.finish_monitoring(participant, status, now)?;
            return Ok(PassOutcome::Finished);
        }

        let created = self.apply_resolution(participant, resolution, Timing::DailyOn(today), now)?;
        status.record_daily_pass(date_index, now);
        self.store.save(status)?;
        tracing::info!(
            participant = %participant.id,
            day = status.days_participated,
            created,
            "daily pass"
        );
        Ok(PassOutcome::Ran(created))
    }

    fn periodic_pass(
        &self,
        participant: &Participant,
        status: &mut DialogStatus,
        now: DateTime<Utc>,
    ) -> Result<PassOutcome> {
        let variables = self.variables();
        let resolution = Resolver::new(&self.store, &variables, participant)
            .resolve(ResolutionCase::Monitoring(MonitoringRuleKind::Periodic))?;
        if resolution.is_empty() {
            return Ok(PassOutcome::Skipped);
        }
        if resolution.stop_intervention {
            self.finish_monitoring(participant, status, now)?;
            return Ok(PassOutcome::Finished);
        }
        let created = self.apply_resolution(participant, resolution, Timing::Now, now)?;
        Ok(PassOutcome::Ran(created))
    }

    pub(super) fn finish_monitoring(
        &self,
        participant: &Participant,
        status: &mut DialogStatus,
        now: DateTime<Utc>,
    ) -> Result<()> {
        status.finish_monitoring(now);
        self.store.save(status)?;
        tracing::info!(participant = %participant.id, "monitoring finished");
        Ok(())
    }
}

enum PassOutcome {
    Skipped,
    Ran(usize),
    Finished,
}
