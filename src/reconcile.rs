//! Attendance history and the ledger that guards it.
//!
//! History holds at most one record per (student, date). Every mutation
//! builds a complete new [`Snapshot`] (history plus recomputed roster) and
//! swaps it in under a single write lock, so readers never see a history
//! that disagrees with the derived student fields.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, RwLock};

use chrono::NaiveDate;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::metrics::{compute_metrics, CohortMetrics};
use crate::models::{AttendanceRecord, AttendanceStatus, Roster, SubjectConfig};
use crate::risk::recompute_students;
use crate::timing::effective_session_minutes;

type RecordKey = (Uuid, NaiveDate);

fn key_of(record: &AttendanceRecord) -> RecordKey {
    (record.student_id, record.date)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    records: Vec<AttendanceRecord>,
}

impl History {
    /// Builds a history, keeping the last record seen for each
    /// (student, date).
    pub fn new(records: Vec<AttendanceRecord>) -> Self {
        let (records, dropped) = dedupe_last_wins(records);
        if dropped > 0 {
            warn!(dropped, "stored history repeats (student, date); keeping the last of each");
        }
        Self { records }
    }

    pub fn records(&self) -> &[AttendanceRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn find(&self, student_id: Uuid, date: NaiveDate) -> Option<&AttendanceRecord> {
        self.records
            .iter()
            .find(|record| record.student_id == student_id && record.date == date)
    }

    /// Records of the given students on one date.
    pub fn session(&self, students: &HashSet<Uuid>, date: NaiveDate) -> Vec<&AttendanceRecord> {
        self.records
            .iter()
            .filter(|record| record.date == date && students.contains(&record.student_id))
            .collect()
    }

    /// Untouched history followed by the incoming records; any stored record
    /// sharing an incoming (student, date) is dropped.
    pub fn merged(&self, incoming: Vec<AttendanceRecord>) -> History {
        let (incoming, dropped) = dedupe_last_wins(incoming);
        if dropped > 0 {
            warn!(dropped, "duplicate (student, date) records in one batch; keeping the last of each");
        }
        let replaced: HashSet<RecordKey> = incoming.iter().map(key_of).collect();

        let mut records: Vec<AttendanceRecord> = self
            .records
            .iter()
            .filter(|record| !replaced.contains(&key_of(record)))
            .cloned()
            .collect();
        records.extend(incoming);

        History { records }
    }

    /// Removes the given students' records on `date`, returning the new
    /// history and how many records were removed.
    pub fn without_session(&self, students: &HashSet<Uuid>, date: NaiveDate) -> (History, usize) {
        let records: Vec<AttendanceRecord> = self
            .records
            .iter()
            .filter(|record| !(record.date == date && students.contains(&record.student_id)))
            .cloned()
            .collect();
        let removed = self.records.len() - records.len();
        (History { records }, removed)
    }
}

/// Keeps the last record for each (student, date), returning how many
/// earlier ones were dropped.
fn dedupe_last_wins(records: Vec<AttendanceRecord>) -> (Vec<AttendanceRecord>, usize) {
    let mut last_index: HashMap<RecordKey, usize> = HashMap::new();
    for (index, record) in records.iter().enumerate() {
        last_index.insert(key_of(record), index);
    }

    let dropped = records.len() - last_index.len();
    if dropped == 0 {
        return (records, 0);
    }

    let kept = records
        .into_iter()
        .enumerate()
        .filter(|(index, record)| last_index.get(&key_of(record)) == Some(index))
        .map(|(_, record)| record)
        .collect();
    (kept, dropped)
}

/// History together with the roster whose derived fields were computed
/// from it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub history: History,
    pub roster: Roster,
}

impl Snapshot {
    fn recomputed(history: History, roster: Roster) -> Self {
        let students = recompute_students(history.records(), &roster.students);
        Snapshot {
            history,
            roster: Roster {
                classes: roster.classes,
                students,
            },
        }
    }
}

#[derive(Debug, Default)]
pub struct Ledger {
    state: RwLock<Arc<Snapshot>>,
}

impl Ledger {
    pub fn new(roster: Roster, records: Vec<AttendanceRecord>) -> Self {
        let snapshot = Snapshot::recomputed(History::new(records), roster);
        Self {
            state: RwLock::new(Arc::new(snapshot)),
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        // A panic while holding the lock cannot leave a partial snapshot
        // behind, so a poisoned lock still guards consistent state.
        let guard = self.state.read().unwrap_or_else(|e| e.into_inner());
        Arc::clone(&*guard)
    }

    /// Upserts a batch by (student, date) and recomputes derived fields.
    /// The batch applies entirely or not at all.
    pub fn submit(&self, records: Vec<AttendanceRecord>) -> Result<Arc<Snapshot>> {
        if records.is_empty() {
            return Err(Error::Validation("submission contains no records".to_string()));
        }

        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        let current = Arc::clone(&*guard);

        let unknown: Vec<String> = records
            .iter()
            .filter(|record| current.roster.student(record.student_id).is_none())
            .map(|record| record.student_id.to_string())
            .collect();
        if !unknown.is_empty() {
            return Err(Error::Validation(format!(
                "records reference students outside the roster: {}",
                unknown.join(", ")
            )));
        }

        let incoming: Vec<AttendanceRecord> = records.into_iter().map(normalize).collect();
        let submitted = incoming.len();
        let history = current.history.merged(incoming);
        let next = Arc::new(Snapshot::recomputed(history, current.roster.clone()));
        *guard = Arc::clone(&next);

        info!(
            submitted,
            history = next.history.len(),
            "attendance batch committed"
        );
        Ok(next)
    }

    /// Removes every record of `class_id`'s current members on `date`.
    pub fn delete_session(&self, class_id: Uuid, date: NaiveDate) -> Result<(Arc<Snapshot>, usize)> {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        let current = Arc::clone(&*guard);

        if current.roster.class(class_id).is_none() {
            return Err(Error::NotFound(format!("class {class_id}")));
        }

        let members = current.roster.class_member_ids(class_id);
        let (history, removed) = current.history.without_session(&members, date);
        let next = Arc::new(Snapshot::recomputed(history, current.roster.clone()));
        *guard = Arc::clone(&next);

        info!(%class_id, %date, removed, "attendance session deleted");
        Ok((next, removed))
    }

    /// Swaps in a roster edited elsewhere, recomputing its derived fields.
    pub fn replace_roster(&self, roster: Roster) -> Arc<Snapshot> {
        let mut guard = self.state.write().unwrap_or_else(|e| e.into_inner());
        let next = Arc::new(Snapshot::recomputed(guard.history.clone(), roster));
        *guard = Arc::clone(&next);
        next
    }

    pub fn metrics(&self, subjects: &SubjectConfig) -> CohortMetrics {
        let snapshot = self.snapshot();
        compute_metrics(snapshot.history.records(), &snapshot.roster.students, subjects)
    }
}

fn normalize(mut record: AttendanceRecord) -> AttendanceRecord {
    if record.status != AttendanceStatus::Late && record.minutes_late != 0 {
        debug!(
            student_id = %record.student_id,
            status = %record.status,
            "clearing minutes late on a non-late record"
        );
        record.minutes_late = 0;
    }
    record.session_duration = record.session_duration.map(effective_session_minutes);
    record
}
