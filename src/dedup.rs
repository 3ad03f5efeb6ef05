//! Fingerprint dedup index.
//!
//! Tracks the live (queued or running) job per request fingerprint so
//! identical triggers return the existing job instead of starting new work.
//! Reservation is compare-and-set under a single lock: two near-simultaneous
//! identical triggers cannot both reach pipeline execution. The reservation
//! is released when the job reaches a terminal state, after which an
//! identical request starts a fresh run.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

/// Result of a [`DedupIndex::submit`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// A live job already exists for this fingerprint.
    Existing(Uuid),
    /// The fingerprint was free and is now reserved for the candidate job.
    Reserved,
}

#[derive(Default)]
pub struct DedupIndex {
    live: Mutex<HashMap<String, Uuid>>,
}

impl DedupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically look up the fingerprint and, if free, reserve it for
    /// `candidate`.
    pub fn submit(&self, fingerprint: &str, candidate: Uuid) -> Submission {
        let mut live = self.live.lock().expect("dedup index lock poisoned");
        match live.get(fingerprint) {
            Some(existing) => Submission::Existing(*existing),
            None => {
                live.insert(fingerprint.to_string(), candidate);
                Submission::Reserved
            }
        }
    }

    /// Release the reservation held by `job_id`. A release by any other job
    /// is ignored, so a stale caller cannot free a newer reservation.
    pub fn release(&self, fingerprint: &str, job_id: Uuid) {
        let mut live = self.live.lock().expect("dedup index lock poisoned");
        if live.get(fingerprint) == Some(&job_id) {
            live.remove(fingerprint);
        }
    }

    /// The currently-live job for a fingerprint, if any.
    pub fn live_job(&self, fingerprint: &str) -> Option<Uuid> {
        self.live
            .lock()
            .expect("dedup index lock poisoned")
            .get(fingerprint)
            .copied()
    }
}
