//! Persistent storage for engine entities using redb.
//!
//! # Table design
//!
//! Every entity kind lives in its own table:
//! ```text
//! key:   uuid (16 bytes)
//! value: JSON-encoded entity
//! ```
//!
//! Lookups go through named predicates and sort orders defined in
//! [`queries`]; the engine never filters with ad hoc closures. Predicate
//! lookups scan the table of their kind.

pub mod queries;

use std::path::Path;

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use uuid::Uuid;

use crate::error::{CoachError, Result};
use crate::model::{
    DialogMessage, DialogOption, DialogStatus, Intervention, MicroDialog,
    MicroDialogDecisionPoint, MicroDialogMessage, MicroDialogMessageRule, MicroDialogRule,
    MonitoringMessage, MonitoringMessageGroup, MonitoringMessageRule, MonitoringReplyRule,
    MonitoringRule, Participant, ParticipantVariable, ShortUrl,
};

pub use queries::{Predicate, SortOrder};

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A record kind stored in its own table.
pub trait Entity: Serialize + DeserializeOwned {
    /// redb table name.
    const TABLE: &'static str;
    /// Human readable kind used in errors.
    const KIND: &'static str;

    fn id(&self) -> Uuid;
}

macro_rules! entity {
    ($ty:ty, $table:literal, $kind:literal) => {
        impl Entity for $ty {
            const TABLE: &'static str = $table;
            const KIND: &'static str = $kind;

            fn id(&self) -> Uuid {
                self.id
            }
        }
    };
}

entity!(Intervention, "interventions", "intervention");
entity!(Participant, "participants", "participant");
entity!(DialogOption, "dialog_options", "dialog option");
entity!(DialogStatus, "dialog_statuses", "dialog status");
entity!(DialogMessage, "dialog_messages", "dialog message");
entity!(MonitoringRule, "monitoring_rules", "monitoring rule");
entity!(MonitoringReplyRule, "monitoring_reply_rules", "monitoring reply rule");
entity!(MonitoringMessageGroup, "monitoring_message_groups", "monitoring message group");
entity!(MonitoringMessage, "monitoring_messages", "monitoring message");
entity!(MonitoringMessageRule, "monitoring_message_rules", "monitoring message rule");
entity!(MicroDialog, "micro_dialogs", "micro dialog");
entity!(MicroDialogMessage, "micro_dialog_messages", "micro dialog message");
entity!(MicroDialogMessageRule, "micro_dialog_message_rules", "micro dialog message rule");
entity!(MicroDialogDecisionPoint, "micro_dialog_decision_points", "decision point");
entity!(MicroDialogRule, "micro_dialog_rules", "micro dialog rule");
entity!(ParticipantVariable, "participant_variables", "participant variable");
entity!(ShortUrl, "short_urls", "short url");

const ALL_TABLES: &[&str] = &[
    Intervention::TABLE,
    Participant::TABLE,
    DialogOption::TABLE,
    DialogStatus::TABLE,
    DialogMessage::TABLE,
    MonitoringRule::TABLE,
    MonitoringReplyRule::TABLE,
    MonitoringMessageGroup::TABLE,
    MonitoringMessage::TABLE,
    MonitoringMessageRule::TABLE,
    MicroDialog::TABLE,
    MicroDialogMessage::TABLE,
    MicroDialogMessageRule::TABLE,
    MicroDialogDecisionPoint::TABLE,
    MicroDialogRule::TABLE,
    ParticipantVariable::TABLE,
    ShortUrl::TABLE,
];

fn table(name: &str) -> TableDefinition<'_, &'static [u8], &'static [u8]> {
    TableDefinition::new(name)
}

fn store_err(e: impl std::fmt::Display) -> CoachError {
    CoachError::Store(e.to_string())
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Persistent store for every entity of the engine.
pub struct Store {
    db: Database,
}

impl Store {
    /// Open or create the redb database at `path`, creating all tables.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let db = Database::create(path).map_err(store_err)?;
        let wt = db.begin_write().map_err(store_err)?;
        for name in ALL_TABLES {
            wt.open_table(table(name)).map_err(store_err)?;
        }
        wt.commit().map_err(store_err)?;
        Ok(Self { db })
    }

    /// Insert or replace `entity` under its id.
    pub fn save<E: Entity>(&self, entity: &E) -> Result<()> {
        self.save_all(std::slice::from_ref(entity))
    }

    /// Insert or replace several entities of one kind in a single transaction.
    pub fn save_all<E: Entity>(&self, entities: &[E]) -> Result<()> {
        let wt = self.db.begin_write().map_err(store_err)?;
        {
            let mut t = wt.open_table(table(E::TABLE)).map_err(store_err)?;
            for entity in entities {
                let value = serde_json::to_vec(entity).map_err(store_err)?;
                t.insert(entity.id().as_bytes().as_slice(), value.as_slice())
                    .map_err(store_err)?;
            }
        }
        wt.commit().map_err(store_err)?;
        Ok(())
    }

    /// Remove the entity with `id`. Returns whether it existed.
    pub fn delete_by_id<E: Entity>(&self, id: Uuid) -> Result<bool> {
        let wt = self.db.begin_write().map_err(store_err)?;
        let existed = {
            let mut t = wt.open_table(table(E::TABLE)).map_err(store_err)?;
            let removed = t.remove(id.as_bytes().as_slice()).map_err(store_err)?;
            removed.is_some()
        };
        wt.commit().map_err(store_err)?;
        Ok(existed)
    }

    pub fn get_by_id<E: Entity>(&self, id: Uuid) -> Result<Option<E>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let t = rt.open_table(table(E::TABLE)).map_err(store_err)?;
        match t.get(id.as_bytes().as_slice()).map_err(store_err)? {
            Some(v) => Ok(Some(serde_json::from_slice(v.value()).map_err(store_err)?)),
            None => Ok(None),
        }
    }

    /// Like [`Store::get_by_id`] but a missing entity is an error.
    pub fn require<E: Entity>(&self, id: Uuid) -> Result<E> {
        self.get_by_id(id)?
            .ok_or_else(|| CoachError::not_found(E::KIND, id))
    }

    /// Every entity of kind `E`, in key order.
    pub fn all<E: Entity>(&self) -> Result<Vec<E>> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let t = rt.open_table(table(E::TABLE)).map_err(store_err)?;

        let mut result = Vec::new();
        for entry in t.iter().map_err(store_err)? {
            let (_, v) = entry.map_err(store_err)?;
            result.push(serde_json::from_slice(v.value()).map_err(store_err)?);
        }
        Ok(result)
    }

    pub fn len<E: Entity>(&self) -> Result<u64> {
        let rt = self.db.begin_read().map_err(store_err)?;
        let t = rt.open_table(table(E::TABLE)).map_err(store_err)?;
        t.len().map_err(store_err)
    }

    pub fn find<E, P>(&self, predicate: &P) -> Result<Vec<E>>
    where
        E: Entity,
        P: Predicate<E>,
    {
        Ok(self
            .all::<E>()?
            .into_iter()
            .filter(|e| predicate.matches(e))
            .collect())
    }

    pub fn find_sorted<E, P, S>(&self, predicate: &P, sort: &S) -> Result<Vec<E>>
    where
        E: Entity,
        P: Predicate<E>,
        S: SortOrder<E>,
    {
        let mut found = self.find(predicate)?;
        found.sort_by(|a, b| sort.compare(a, b));
        Ok(found)
    }

    pub fn find_one_sorted<E, P, S>(&self, predicate: &P, sort: &S) -> Result<Option<E>>
    where
        E: Entity,
        P: Predicate<E>,
        S: SortOrder<E>,
    {
        Ok(self
            .find(predicate)?
            .into_iter()
            .min_by(|a, b| sort.compare(a, b)))
    }

    pub fn count<E, P>(&self, predicate: &P) -> Result<usize>
    where
        E: Entity,
        P: Predicate<E>,
    {
        Ok(self
            .all::<E>()?
            .iter()
            .filter(|e| predicate.matches(e))
            .count())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
