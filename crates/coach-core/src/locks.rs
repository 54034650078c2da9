//! Per-participant serialization.
//!
//! A fixed set of mutex stripes keyed by participant id. Two participants may
//! share a stripe, which only costs parallelism. Code holding a participant
//! guard must never try to take a second one.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Mutex, MutexGuard};

use uuid::Uuid;

pub const DEFAULT_STRIPES: usize = 64;

pub struct ParticipantLocks {
    stripes: Vec<Mutex<()>>,
}

impl ParticipantLocks {
    pub fn new(stripes: usize) -> Self {
        Self {
            stripes: (0..stripes.max(1)).map(|_| Mutex::new(())).collect(),
        }
    }

    /// Block until the participant's stripe is free.
    ///
    /// A stripe poisoned by a panicking holder is taken over; the data it
    /// guards lives in the store, not in the mutex.
    pub fn lock(&self, participant: Uuid) -> MutexGuard<'_, ()> {
        self.stripes[self.stripe_of(participant)]
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn stripe_of(&self, participant: Uuid) -> usize {
        let mut hasher = DefaultHasher::new();
        participant.hash(&mut hasher);
        (hasher.finish() % self.stripes.len() as u64) as usize
    }
}

impl Default for ParticipantLocks {
    fn default() -> Self {
        Self::new(DEFAULT_STRIPES)
    }
}
