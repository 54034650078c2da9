use chrono::{DateTime, Utc, Weekday};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

use crate::error::CoachError;

// ---------------------------------------------------------------------------
// Intervention
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Intervention {
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub monitoring_active: bool,
    /// Weekdays on which a participant with zero participation days may start.
    /// Empty means every day.
    #[serde(default)]
    pub monitoring_starting_days: Vec<Weekday>,
    #[serde(default)]
    pub sender_identification: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Intervention {
    pub fn is_running(&self) -> bool {
        self.active && self.monitoring_active
    }

    pub fn may_start_on(&self, day: Weekday) -> bool {
        self.monitoring_starting_days.is_empty() || self.monitoring_starting_days.contains(&day)
    }

    pub fn sender(&self) -> &str {
        self.sender_identification.as_deref().unwrap_or(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Participant
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Participant {
    pub id: Uuid,
    pub intervention_id: Uuid,
    #[serde(default)]
    pub nickname: String,
    #[serde(default = "default_language")]
    pub language: String,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub monitoring_active: bool,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_language() -> String {
    "en".to_string()
}

// ---------------------------------------------------------------------------
// DialogOption
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DialogOptionType {
    Sms,
    Email,
    SupervisorSms,
    SupervisorEmail,
}

impl DialogOptionType {
    pub fn is_supervisor(self) -> bool {
        matches!(
            self,
            DialogOptionType::SupervisorSms | DialogOptionType::SupervisorEmail
        )
    }

    /// Delivery preference when several options exist for one recipient.
    pub fn preference(supervisor: bool) -> &'static [DialogOptionType] {
        if supervisor {
            &[DialogOptionType::SupervisorSms, DialogOptionType::SupervisorEmail]
        } else {
            &[DialogOptionType::Sms, DialogOptionType::Email]
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            DialogOptionType::Sms => "sms",
            DialogOptionType::Email => "email",
            DialogOptionType::SupervisorSms => "supervisor_sms",
            DialogOptionType::SupervisorEmail => "supervisor_email",
        }
    }
}

impl fmt::Display for DialogOptionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for DialogOptionType {
    type Err = CoachError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sms" => Ok(DialogOptionType::Sms),
            "email" => Ok(DialogOptionType::Email),
            "supervisor_sms" => Ok(DialogOptionType::SupervisorSms),
            "supervisor_email" => Ok(DialogOptionType::SupervisorEmail),
            _ => Err(CoachError::InvalidConfig(format!(
                "unknown dialog option type '{s}'"
            ))),
        }
    }
}

/// An addressable channel endpoint of a participant or their supervisor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogOption {
    pub id: Uuid,
    pub participant_id: Uuid,
    pub kind: DialogOptionType,
    /// Phone number or mail address.
    pub data: String,
}

// ---------------------------------------------------------------------------
// DialogStatus
// ---------------------------------------------------------------------------

/// Per-participant progress record, written only by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogStatus {
    pub id: Uuid,
    pub participant_id: Uuid,
    #[serde(default)]
    pub contact_data_available: bool,
    #[serde(default)]
    pub screening_survey_performed: bool,
    #[serde(default)]
    pub monitoring_performed: bool,
    /// `YYYY-MM-DD` of the last daily pass, in the configured offset.
    #[serde(default)]
    pub last_daily_pass_date_index: Option<String>,
    #[serde(default)]
    pub days_participated: u32,
    #[serde(default)]
    pub monitoring_started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub monitoring_finished_at: Option<DateTime<Utc>>,
}

impl DialogStatus {
    pub fn new(participant_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            participant_id,
            contact_data_available: false,
            screening_survey_performed: false,
            monitoring_performed: false,
            last_daily_pass_date_index: None,
            days_participated: 0,
            monitoring_started_at: None,
            monitoring_finished_at: None,
        }
    }

    /// Contact data present, screening done and monitoring not yet finished.
    pub fn is_eligible_for_monitoring(&self) -> bool {
        self.contact_data_available && self.screening_survey_performed && !self.monitoring_performed
    }

    pub fn finish_monitoring(&mut self, at: DateTime<Utc>) {
        self.monitoring_performed = true;
        self.monitoring_finished_at = Some(at);
    }

    pub fn record_daily_pass(&mut self, date_index: String, at: DateTime<Utc>) {
        self.last_daily_pass_date_index = Some(date_index);
        self.days_participated += 1;
        if self.monitoring_started_at.is_none() {
            self.monitoring_started_at = Some(at);
        }
    }
}

// ---------------------------------------------------------------------------
// ParticipantVariable
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticipantVariable {
    pub id: Uuid,
    pub participant_id: Uuid,
    /// Includes the leading `$`.
    pub name: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ShortUrl
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "reference", rename_all = "snake_case")]
pub enum LinkTarget {
    MediaObject(String),
    Survey(String),
}

impl LinkTarget {
    /// Text placeholder replaced by the generated link.
    pub fn placeholder(&self) -> &'static str {
        match self {
            LinkTarget::MediaObject(_) => "$linkedMediaObject",
            LinkTarget::Survey(_) => "$linkedSurvey",
        }
    }
}

/// Sequential short link generated for one dialog message and target.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShortUrl {
    pub id: Uuid,
    pub short_id: u64,
    pub dialog_message_id: Uuid,
    pub participant_id: Uuid,
    pub target: LinkTarget,
    pub created_at: DateTime<Utc>,
}

impl ShortUrl {
    pub fn url(&self, base: &str) -> String {
        format!("{}{}", base, self.short_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_starting_days_allow_every_weekday() {
        let mut intervention = Intervention {
            id: Uuid::new_v4(),
            name: "walk more".to_string(),
            active: true,
            monitoring_active: true,
            monitoring_starting_days: vec![],
            sender_identification: None,
            created_at: Utc::now(),
        };
        assert!(intervention.may_start_on(Weekday::Sun));
        intervention.monitoring_starting_days = vec![Weekday::Mon];
        assert!(intervention.may_start_on(Weekday::Mon));
        assert!(!intervention.may_start_on(Weekday::Tue));
        assert_eq!(intervention.sender(), "walk more");
    }

    #[test]
    fn daily_pass_sets_start_once() {
        let mut status = DialogStatus::new(Uuid::new_v4());
        let first = Utc::now();
        status.record_daily_pass("2026-10-12".into(), first);
        status.record_daily_pass("2026-10-13".into(), first + chrono::Duration::days(1));
        assert_eq!(status.days_participated, 2);
        assert_eq!(status.monitoring_started_at, Some(first));
        assert_eq!(status.last_daily_pass_date_index.as_deref(), Some("2026-10-13"));
    }

    #[test]
    fn eligibility_requires_contact_screening_and_unfinished() {
        let mut status = DialogStatus::new(Uuid::new_v4());
        assert!(!status.is_eligible_for_monitoring());
        status.contact_data_available = true;
        status.screening_survey_performed = true;
        assert!(status.is_eligible_for_monitoring());
        status.finish_monitoring(Utc::now());
        assert!(!status.is_eligible_for_monitoring());
    }

    #[test]
    fn dialog_option_type_parses_round_trip_names() {
        for kind in [
            DialogOptionType::Sms,
            DialogOptionType::Email,
            DialogOptionType::SupervisorSms,
            DialogOptionType::SupervisorEmail,
        ] {
            assert_eq!(kind.as_str().parse::<DialogOptionType>().unwrap(), kind);
        }
        assert!("fax".parse::<DialogOptionType>().is_err());
    }
}
