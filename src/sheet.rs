//! Manual attendance sheet for one class session.

use std::collections::HashMap;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::config::{Settings, UnmarkedPolicy};
use crate::error::{Error, Result};
use crate::models::{AttendanceRecord, AttendanceStatus, RecordSource, Roster};
use crate::reconcile::History;
use crate::timing::{effective_session_minutes, session_minutes, DEFAULT_SESSION_MINUTES};

#[derive(Debug, Clone, PartialEq)]
pub struct Mark {
    pub status: AttendanceStatus,
    pub minutes_late: Option<u32>,
    pub note: Option<String>,
    record_id: Option<Uuid>,
}

impl Mark {
    fn new(status: AttendanceStatus) -> Self {
        Self {
            status,
            minutes_late: None,
            note: None,
            record_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceSheet {
    pub class_id: Option<Uuid>,
    pub subject: Option<String>,
    pub date: NaiveDate,
    pub session_minutes: u32,
    marks: HashMap<Uuid, Mark>,
}

impl AttendanceSheet {
    pub fn new(date: NaiveDate) -> Self {
        Self {
            class_id: None,
            subject: None,
            date,
            session_minutes: DEFAULT_SESSION_MINUTES,
            marks: HashMap::new(),
        }
    }

    pub fn for_class(mut self, class_id: Uuid) -> Self {
        self.class_id = Some(class_id);
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_session_minutes(mut self, minutes: u32) -> Self {
        self.session_minutes = effective_session_minutes(minutes);
        self
    }

    pub fn timed(mut self, start: chrono::NaiveTime, end: chrono::NaiveTime) -> Self {
        self.session_minutes = session_minutes(start, end);
        self
    }

    pub fn mark(&mut self, student_id: Uuid, status: AttendanceStatus) {
        let mark = self
            .marks
            .entry(student_id)
            .or_insert_with(|| Mark::new(status));
        mark.status = status;
    }

    pub fn set_minutes_late(&mut self, student_id: Uuid, minutes: u32) {
        self.marks
            .entry(student_id)
            .or_insert_with(|| Mark::new(AttendanceStatus::Late))
            .minutes_late = Some(minutes);
    }

    pub fn set_note(&mut self, student_id: Uuid, note: impl Into<String>) {
        let note = note.into();
        self.marks
            .entry(student_id)
            .or_insert_with(|| Mark::new(AttendanceStatus::Present))
            .note = if note.trim().is_empty() { None } else { Some(note) };
    }

    /// Gives every member of the selected class the same status.
    pub fn mark_all(&mut self, roster: &Roster, status: AttendanceStatus) -> Result<()> {
        let class_id = self.require_class()?;
        for student in roster.students_in_class(class_id) {
            let mark = self
                .marks
                .entry(student.id)
                .or_insert_with(|| Mark::new(status));
            mark.status = status;
            mark.minutes_late = None;
        }
        Ok(())
    }

    pub fn mark_for(&self, student_id: Uuid) -> Option<&Mark> {
        self.marks.get(&student_id)
    }

    /// Pre-populates the sheet from an already stored session. Returns
    /// whether anything was loaded, i.e. whether this is an edit.
    pub fn load_existing(&mut self, history: &History, roster: &Roster) -> Result<bool> {
        let class_id = self.require_class()?;
        let members = roster.class_member_ids(class_id);
        let existing = history.session(&members, self.date);

        for record in &existing {
            self.marks.insert(
                record.student_id,
                Mark {
                    status: record.status,
                    minutes_late: Some(record.minutes_late),
                    note: record.note.clone(),
                    record_id: Some(record.id),
                },
            );
        }

        Ok(!existing.is_empty())
    }

    /// One record per class member. Members nobody marked follow the
    /// configured [`UnmarkedPolicy`].
    pub fn build(&self, roster: &Roster, settings: &Settings) -> Result<Vec<AttendanceRecord>> {
        let class_id = self.require_class()?;
        let subject = self
            .subject
            .as_deref()
            .map(str::trim)
            .filter(|subject| !subject.is_empty())
            .ok_or_else(|| Error::Validation("a subject must be selected".to_string()))?;

        if roster.class(class_id).is_none() {
            return Err(Error::Validation(format!("unknown class {class_id}")));
        }

        let members = roster.students_in_class(class_id);
        if settings.unmarked_policy == UnmarkedPolicy::RequireExplicit {
            let unmarked: Vec<String> = members
                .iter()
                .filter(|student| !self.marks.contains_key(&student.id))
                .map(|student| student.full_name())
                .collect();
            if !unmarked.is_empty() {
                return Err(Error::Validation(format!(
                    "no status given for: {}",
                    unmarked.join(", ")
                )));
            }
        }

        let records = members
            .into_iter()
            .map(|student| {
                let mark = self
                    .marks
                    .get(&student.id)
                    .cloned()
                    .unwrap_or_else(|| Mark::new(AttendanceStatus::Present));
                let minutes_late = if mark.status == AttendanceStatus::Late {
                    mark.minutes_late
                        .filter(|minutes| *minutes > 0)
                        .unwrap_or(settings.default_late_minutes)
                } else {
                    0
                };

                AttendanceRecord {
                    id: mark.record_id.unwrap_or_else(Uuid::new_v4),
                    student_id: student.id,
                    date: self.date,
                    status: mark.status,
                    source: RecordSource::Manual,
                    minutes_late,
                    note: mark.note,
                    subject: Some(subject.to_string()),
                    session_duration: Some(effective_session_minutes(self.session_minutes)),
                }
            })
            .collect();

        Ok(records)
    }

    fn require_class(&self) -> Result<Uuid> {
        self.class_id
            .ok_or_else(|| Error::Validation("a class must be selected".to_string()))
    }
}
