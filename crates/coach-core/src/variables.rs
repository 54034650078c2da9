//! Participant and system variables.
//!
//! Variable names always carry their leading `$`. Names below the
//! `$system` and `$participant` prefixes are computed by the engine and are
//! read-only for every caller outside of it.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use chrono::{DateTime, Datelike, FixedOffset, Timelike, Utc};
use regex::Regex;
use uuid::Uuid;

use crate::clock::Clock;
use crate::error::{CoachError, Result};
use crate::model::{DialogMessage, DialogStatus, Participant, ParticipantVariable};
use crate::store::queries::{DialogStatusQuery, ParticipantVariableQuery, VariableSort};
use crate::store::Store;

/// Resolved `name -> value` view used by the rule evaluator and rendering.
pub type Snapshot = BTreeMap<String, String>;

pub const SYSTEM_PREFIX: &str = "$system";
pub const PARTICIPANT_PREFIX: &str = "$participant";

pub const MESSAGE_REPLY: &str = "$participantMessageReply";
pub const INTENTION: &str = "$participantIntention";
pub const UNEXPECTED_MESSAGE: &str = "$participantUnexpectedMessage";

/// Link placeholders survive rendering; they are filled when the message is created.
const LINK_PLACEHOLDERS: [&str; 2] = ["$linkedMediaObject", "$linkedSurvey"];

/// Reserved names the engine itself is allowed to write.
const INTERNALLY_WRITABLE: [&str; 3] = [MESSAGE_REPLY, INTENTION, UNEXPECTED_MESSAGE];

static PLACEHOLDER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$[a-zA-Z0-9_]+").expect("valid regex"));
static NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\$[a-zA-Z0-9_]+$").expect("valid regex"));
static UNCLEAN_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^a-z0-9\-\s\.]").expect("valid regex"));

pub fn is_valid_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

pub fn is_reserved(name: &str) -> bool {
    name.starts_with(SYSTEM_PREFIX) || name.starts_with(PARTICIPANT_PREFIX)
}

/// Normalize an inbound body for comparisons: trimmed, lowercased, and
/// stripped of everything except ascii letters, digits, `-`, `.` and whitespace.
pub fn clean_received_message(raw: &str) -> String {
    let lowered = raw.trim().to_lowercase();
    UNCLEAN_RE.replace_all(&lowered, "").into_owned()
}

/// Replace every `$name` placeholder in `template` from `snapshot`.
/// Unknown placeholders render as the empty string.
pub fn render_text(template: &str, snapshot: &Snapshot) -> String {
    PLACEHOLDER_RE
        .replace_all(template, |caps: &regex::Captures<'_>| {
            let name = &caps[0];
            if LINK_PLACEHOLDERS.contains(&name) {
                return name.to_string();
            }
            snapshot.get(name).cloned().unwrap_or_default()
        })
        .into_owned()
}

// ---------------------------------------------------------------------------
// VariableStore
// ---------------------------------------------------------------------------

pub trait VariableStore {
    fn read(&self, participant: Uuid, name: &str) -> Result<Option<String>>;

    /// Write on behalf of an outside caller. Reserved names are rejected.
    fn write(&self, participant: Uuid, name: &str, value: &str) -> Result<()>;

    /// Write on behalf of the engine, which may also set the reply and
    /// intention variables.
    fn write_internal(&self, participant: Uuid, name: &str, value: &str) -> Result<()>;

    /// Every variable visible to rules for `participant`. A `context` message
    /// contributes its answer as `$participantMessageReply`.
    fn snapshot(&self, participant: &Participant, context: Option<&DialogMessage>)
        -> Result<Snapshot>;
}

/// [`VariableStore`] backed by `ParticipantVariable` records.
pub struct StoreVariables<'a> {
    store: &'a Store,
    clock: &'a dyn Clock,
    offset: FixedOffset,
}

impl<'a> StoreVariables<'a> {
    pub fn new(store: &'a Store, clock: &'a dyn Clock, offset: FixedOffset) -> Self {
        Self {
            store,
            clock,
            offset,
        }
    }

    fn upsert(&self, participant: Uuid, name: &str, value: &str) -> Result<()> {
        if !is_valid_name(name) {
            return Err(CoachError::InvalidVariableName(name.to_string()));
        }
        let now = self.clock.now();
        let existing: Option<ParticipantVariable> = self.store.find_one_sorted(
            &ParticipantVariableQuery::ByParticipantAndName(participant, name.to_string()),
            &VariableSort::UpdatedDesc,
        )?;
        let record = match existing {
            Some(mut v) => {
                v.value = value.to_string();
                v.updated_at = now;
                v
            }
            None => ParticipantVariable {
                id: Uuid::new_v4(),
                participant_id: participant,
                name: name.to_string(),
                value: value.to_string(),
                updated_at: now,
            },
        };
        tracing::debug!(participant = %participant, variable = name, value, "variable written");
        self.store.save(&record)
    }
}

impl VariableStore for StoreVariables<'_> {
    fn read(&self, participant: Uuid, name: &str) -> Result<Option<String>> {
        let found: Option<ParticipantVariable> = self.store.find_one_sorted(
            &ParticipantVariableQuery::ByParticipantAndName(participant, name.to_string()),
            &VariableSort::UpdatedDesc,
        )?;
        Ok(found.map(|v| v.value))
    }

    fn write(&self, participant: Uuid, name: &str, value: &str) -> Result<()> {
        if is_reserved(name) {
            return Err(CoachError::WriteProtectedVariable(name.to_string()));
        }
        self.upsert(participant, name, value)
    }

    fn write_internal(&self, participant: Uuid, name: &str, value: &str) -> Result<()> {
        if is_reserved(name) && !INTERNALLY_WRITABLE.contains(&name) {
            return Err(CoachError::WriteProtectedVariable(name.to_string()));
        }
        self.upsert(participant, name, value)
    }

    fn snapshot(
        &self,
        participant: &Participant,
        context: Option<&DialogMessage>,
    ) -> Result<Snapshot> {
        let mut snapshot = Snapshot::new();

        let mut stored: Vec<ParticipantVariable> = self.store.find_sorted(
            &ParticipantVariableQuery::ByParticipant(participant.id),
            &VariableSort::UpdatedDesc,
        )?;
        // Oldest first so the newest duplicate wins.
        stored.reverse();
        for v in stored {
            snapshot.insert(v.name, v.value);
        }

        let now = self.clock.now();
        insert_system_variables(&mut snapshot, now, self.offset);

        let statuses: Vec<DialogStatus> = self
            .store
            .find(&DialogStatusQuery::ByParticipant(participant.id))?;
        let days = statuses.first().map(|s| s.days_participated).unwrap_or(0);
        snapshot.insert("$participantName".into(), participant.nickname.clone());
        snapshot.insert("$participantLanguage".into(), participant.language.clone());
        snapshot.insert(
            "$participantGroup".into(),
            participant.group.clone().unwrap_or_default(),
        );
        snapshot.insert("$participantParticipationInDays".into(), days.to_string());
        snapshot.insert(
            "$participantParticipationInWeeks".into(),
            days.div_ceil(7).to_string(),
        );

        if let Some(answer) = context.and_then(|m| m.answer.as_deref()) {
            snapshot.insert(MESSAGE_REPLY.into(), answer.to_string());
        }
        Ok(snapshot)
    }
}

fn insert_system_variables(snapshot: &mut Snapshot, now: DateTime<Utc>, offset: FixedOffset) {
    let local = now.with_timezone(&offset);
    snapshot.insert(
        "$systemDayInWeek".into(),
        local.weekday().number_from_monday().to_string(),
    );
    snapshot.insert("$systemHourOfDay".into(), local.hour().to_string());
    snapshot.insert("$systemDayOfMonth".into(), local.day().to_string());
    snapshot.insert("$systemMonth".into(), local.month().to_string());
    snapshot.insert("$systemYear".into(), local.year().to_string());
    snapshot.insert("$systemDate".into(), local.format("%d.%m.%Y").to_string());
}
