//! The scheduling orchestrator.
//!
//! One [`Engine`] is shared by the worker loops and the HTTP handlers. All of
//! its entry points are synchronous and run to completion. Every
//! read-decide-write sequence touching a participant's dialog status or
//! dialog messages runs under that participant's lock from
//! [`ParticipantLocks`]; the only other lock guards small shared scalars.

mod admin;
mod dispatch;
mod inbound;
mod scheduling;

use std::collections::VecDeque;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};
use uuid::Uuid;

use crate::clock::{Clock, SystemClock};
use crate::config::{Config, EngineConfig};
use crate::dialog::{DialogLedger, NewDialogMessage};
use crate::error::Result;
use crate::locks::ParticipantLocks;
use crate::model::{
    DialogMessage, DialogMessageType, DialogOption, DialogOptionType, DialogStatus, Intervention,
    LinkTarget, Participant, SendHour,
};
use crate::paths;
use crate::resolver::{Resolution, SendTask, TaskOrigin};
use crate::store::queries::{DialogOptionQuery, DialogStatusQuery};
use crate::store::Store;
use crate::transport::{self, Transport};
use crate::variables::{StoreVariables, VariableStore};
use crate::walker::{MicroDialogWalker, WalkOutcome};

pub use admin::InterventionStatistics;
pub use dispatch::DispatchReport;
pub use inbound::{InboundMessage, InboundOutcome};
pub use scheduling::TickReport;

/// Scalars shared by all loops, behind one narrow mutex.
#[derive(Debug, Default)]
struct SharedState {
    last_periodic_run: Option<DateTime<Utc>>,
}

/// When the messages of a resolution are due.
#[derive(Debug, Clone, Copy)]
enum Timing {
    Now,
    /// At the rule's send hour on this local day.
    DailyOn(NaiveDate),
}

pub struct Engine {
    store: Store,
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn Transport>,
    locks: ParticipantLocks,
    shared: Mutex<SharedState>,
    inbox: Mutex<VecDeque<InboundMessage>>,
}

impl Engine {
    pub fn new(
        store: Store,
        config: EngineConfig,
        clock: Arc<dyn Clock>,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            store,
            config,
            clock,
            transport,
            locks: ParticipantLocks::default(),
            shared: Mutex::new(SharedState::default()),
            inbox: Mutex::new(VecDeque::new()),
        }
    }

    /// Open the engine of an initialized project root with the system clock
    /// and the configured transport.
    pub fn open(root: &Path, config: &Config) -> Result<Self> {
        let store = Store::open(&paths::database_path(root))?;
        Ok(Self::new(
            store,
            config.engine.clone(),
            Arc::new(SystemClock),
            transport::from_config(&config.transport),
        ))
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Revert messages left in `SENDING` by a previous process. Must run
    /// before any worker loop starts.
    pub fn startup_recovery(&self) -> Result<usize> {
        let reverted = self.ledger().reset_after_restart(self.now())?;
        if reverted > 0 {
            tracing::warn!(reverted, "reverted messages interrupted while sending");
        }
        Ok(reverted)
    }

    // -----------------------------------------------------------------------
    // Helpers shared by the entry points
    // -----------------------------------------------------------------------

    fn offset(&self) -> FixedOffset {
        self.config.offset()
    }

    fn variables(&self) -> StoreVariables<'_> {
        StoreVariables::new(&self.store, self.clock.as_ref(), self.offset())
    }

    fn ledger(&self) -> DialogLedger<'_> {
        DialogLedger::new(&self.store, &self.config.short_url_base)
    }

    fn shared(&self) -> MutexGuard<'_, SharedState> {
        self.shared.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn status_of(&self, participant: Uuid) -> Result<Option<DialogStatus>> {
        let statuses: Vec<DialogStatus> = self
            .store
            .find(&DialogStatusQuery::ByParticipant(participant))?;
        Ok(statuses.into_iter().next())
    }

    /// Fresh copy of the participant when it may still receive and react to
    /// messages: participant monitoring on, intervention running, status
    /// eligible and not finished. Call under the participant's lock.
    fn monitored(&self, participant: Uuid) -> Result<Option<Participant>> {
        let Some(participant) = self.store.get_by_id::<Participant>(participant)? else {
            return Ok(None);
        };
        if !participant.monitoring_active {
            return Ok(None);
        }
        let running = self
            .store
            .get_by_id::<Intervention>(participant.intervention_id)?
            .is_some_and(|i| i.is_running());
        if !running {
            return Ok(None);
        }
        let eligible = self
            .status_of(participant.id)?
            .is_some_and(|s| s.is_eligible_for_monitoring());
        Ok(eligible.then_some(participant))
    }

    /// Preferred dialog option for a participant or their supervisor.
    fn dialog_option(&self, participant: Uuid, supervisor: bool) -> Result<Option<DialogOption>> {
        for kind in DialogOptionType::preference(supervisor) {
            let found: Vec<DialogOption> = self
                .store
                .find(&DialogOptionQuery::ByParticipantAndKind(participant, *kind))?;
            if let Some(option) = found.into_iter().find(|o| !o.data.trim().is_empty()) {
                return Ok(Some(option));
            }
        }
        Ok(None)
    }

    /// Create the dialog messages of a resolution. Returns how many were created.
    fn apply_resolution(
        &self,
        participant: &Participant,
        resolution: Resolution,
        timing: Timing,
        now: DateTime<Utc>,
    ) -> Result<usize> {
        let mut created = 0;
        for task in resolution.send_tasks {
            let Some(due) = self.due_time(participant, &task.origin, timing, now)? else {
                continue;
            };
            self.create_from_task(participant, task, due, now)?;
            created += 1;
        }
        for activation in resolution.activations {
            let Some(due) = self.due_time(participant, &activation.origin, timing, now)? else {
                continue;
            };
            let mut new = NewDialogMessage::new(participant.id, "", due)
                .kind(DialogMessageType::MicroDialogActivation);
            new.related_micro_dialog = Some(activation.micro_dialog);
            self.ledger().create(new, now)?;
            created += 1;
        }
        Ok(created)
    }

    fn create_from_task(
        &self,
        participant: &Participant,
        task: SendTask,
        due: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<DialogMessage> {
        let supervisor = task.origin.send_to_supervisor();
        let (related_rule, window) = match &task.origin {
            TaskOrigin::MonitoringRule(rule) => (Some(rule.id), rule.reply_window),
            TaskOrigin::ReplyRule {
                monitoring_rule, ..
            } => (None, monitoring_rule.reply_window),
        };
        let payload = task.payload;

        let mut new = NewDialogMessage::new(participant.id, payload.text, due)
            .supervisor(supervisor)
            .link(payload.message.linked_media_object.clone().map(LinkTarget::MediaObject))
            .link(payload.message.linked_survey.clone().map(LinkTarget::Survey));
        if payload.group.messages_expect_answer && !supervisor {
            new = new.expecting_answer(window);
        }
        new.related_monitoring_rule = related_rule;
        new.related_monitoring_message = Some(payload.message.id);
        self.ledger().create(new, now)
    }

    /// Due time of a task, `None` when its send hour cannot be determined.
    fn due_time(
        &self,
        participant: &Participant,
        origin: &TaskOrigin,
        timing: Timing,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        let Timing::DailyOn(day) = timing else {
            return Ok(Some(now));
        };
        let TaskOrigin::MonitoringRule(rule) = origin else {
            return Ok(Some(now));
        };
        let hour = match &rule.send_hour {
            SendHour::Fixed(h) => i64::from(*h),
            SendHour::FromVariable(name) => {
                let raw = self.variables().read(participant.id, name)?;
                match raw.as_deref().map(str::trim).and_then(|v| v.parse::<f64>().ok()) {
                    Some(v) if v.is_finite() => v.trunc() as i64,
                    _ => {
                        tracing::warn!(
                            participant = %participant.id,
                            rule = %rule.id,
                            variable = %name,
                            "send hour variable is missing or not a number, message skipped"
                        );
                        return Ok(None);
                    }
                }
            }
        };
        let hour = self.config.clamp_send_hour(hour);
        let local = day
            .and_hms_opt(hour, 0, 0)
            .and_then(|naive| self.offset().from_local_datetime(&naive).single());
        Ok(local.map(|t| t.with_timezone(&Utc)))
    }

    /// Continue a micro-dialog after one of its blocking messages was processed.
    fn resume_micro_dialog(
        &self,
        participant: &Participant,
        message: &DialogMessage,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let (Some(micro_dialog), Some(mdm_id)) =
            (message.related_micro_dialog, message.related_micro_dialog_message)
        else {
            return Ok(());
        };
        let Some(mdm) = self
            .store
            .get_by_id::<crate::model::MicroDialogMessage>(mdm_id)?
        else {
            return Ok(());
        };
        if !mdm.blocks_until_answered {
            return Ok(());
        }
        let variables = self.variables();
        let outcome = MicroDialogWalker::new(
            &self.store,
            &variables,
            participant,
            &self.config.short_url_base,
            now,
        )
        .walk(micro_dialog, mdm.order)?;
        tracing::debug!(participant = %participant.id, ?outcome, "micro-dialog resumed");
        Ok(())
    }

    /// Start a micro-dialog from its first item.
    fn start_micro_dialog(
        &self,
        participant: &Participant,
        micro_dialog: Uuid,
        now: DateTime<Utc>,
    ) -> Result<WalkOutcome> {
        let variables = self.variables();
        MicroDialogWalker::new(
            &self.store,
            &variables,
            participant,
            &self.config.short_url_base,
            now,
        )
        .walk(micro_dialog, i64::MIN)
    }
}
