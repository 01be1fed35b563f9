use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Error;
use crate::timing::{effective_session_minutes, DEFAULT_SESSION_MINUTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Late,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AttendanceStatus::Present => "present",
            AttendanceStatus::Absent => "absent",
            AttendanceStatus::Late => "late",
            AttendanceStatus::Excused => "excused",
        }
    }

    /// Present and late both count as attended.
    pub fn is_attending(&self) -> bool {
        matches!(self, AttendanceStatus::Present | AttendanceStatus::Late)
    }
}

impl fmt::Display for AttendanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AttendanceStatus {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "present" => Ok(AttendanceStatus::Present),
            "absent" => Ok(AttendanceStatus::Absent),
            "late" => Ok(AttendanceStatus::Late),
            "excused" => Ok(AttendanceStatus::Excused),
            other => Err(Error::Validation(format!("unknown attendance status '{other}'"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordSource {
    #[serde(rename = "manual")]
    Manual,
    #[serde(rename = "ocr")]
    OpticalExtraction,
}

impl RecordSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RecordSource::Manual => "manual",
            RecordSource::OpticalExtraction => "ocr",
        }
    }
}

impl FromStr for RecordSource {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "manual" => Ok(RecordSource::Manual),
            "ocr" => Ok(RecordSource::OpticalExtraction),
            other => Err(Error::Validation(format!("unknown record source '{other}'"))),
        }
    }
}

/// A roster entry. `absence_count` and `risk_score` are derived from history
/// and only ever rewritten by [`crate::risk::recompute_students`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Student {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub student_code: String,
    pub class_id: Uuid,
    pub parent_phone: Option<String>,
    pub absence_count: u32,
    pub risk_score: u8,
}

impl Student {
    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassGroup {
    pub id: Uuid,
    pub name: String,
    pub grade: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roster {
    pub classes: Vec<ClassGroup>,
    pub students: Vec<Student>,
}

impl Roster {
    pub fn new(classes: Vec<ClassGroup>, students: Vec<Student>) -> Self {
        Self { classes, students }
    }

    pub fn class(&self, class_id: Uuid) -> Option<&ClassGroup> {
        self.classes.iter().find(|class| class.id == class_id)
    }

    /// Case-insensitive lookup by display name.
    pub fn class_by_name(&self, name: &str) -> Option<&ClassGroup> {
        let needle = name.trim().to_lowercase();
        self.classes
            .iter()
            .find(|class| class.name.to_lowercase() == needle)
    }

    pub fn student(&self, student_id: Uuid) -> Option<&Student> {
        self.students.iter().find(|student| student.id == student_id)
    }

    pub fn student_by_code(&self, code: &str) -> Option<&Student> {
        let code = code.trim();
        self.students
            .iter()
            .find(|student| student.student_code.eq_ignore_ascii_case(code))
    }

    pub fn students_in_class(&self, class_id: Uuid) -> Vec<&Student> {
        self.students
            .iter()
            .filter(|student| student.class_id == class_id)
            .collect()
    }

    pub fn class_member_ids(&self, class_id: Uuid) -> HashSet<Uuid> {
        self.students
            .iter()
            .filter(|student| student.class_id == class_id)
            .map(|student| student.id)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub id: Uuid,
    pub student_id: Uuid,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
    pub source: RecordSource,
    /// Only meaningful for late records; zero otherwise.
    pub minutes_late: u32,
    pub note: Option<String>,
    pub subject: Option<String>,
    pub session_duration: Option<u32>,
}

impl AttendanceRecord {
    pub fn new(
        student_id: Uuid,
        date: NaiveDate,
        status: AttendanceStatus,
        source: RecordSource,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            student_id,
            date,
            status,
            source,
            minutes_late: 0,
            note: None,
            subject: None,
            session_duration: None,
        }
    }

    pub fn with_minutes_late(mut self, minutes: u32) -> Self {
        self.minutes_late = minutes;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_session_duration(mut self, minutes: u32) -> Self {
        self.session_duration = Some(effective_session_minutes(minutes));
        self
    }

    /// Instructional minutes this record costs: the whole session for an
    /// absence, the minutes missed for a lateness, nothing otherwise.
    pub fn lost_minutes(&self) -> u64 {
        match self.status {
            AttendanceStatus::Absent => {
                let minutes = self
                    .session_duration
                    .map_or(DEFAULT_SESSION_MINUTES, effective_session_minutes);
                u64::from(minutes)
            }
            AttendanceStatus::Late => u64::from(self.minutes_late),
            AttendanceStatus::Present | AttendanceStatus::Excused => 0,
        }
    }
}

/// Subject name to total expected hours.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubjectConfig(BTreeMap<String, f64>);

impl SubjectConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_hours(mut self, subject: impl Into<String>, hours: f64) -> Self {
        self.0.insert(subject.into(), hours);
        self
    }

    /// Expected minutes for a subject, `None` when not configured.
    pub fn expected_minutes(&self, subject: &str) -> Option<f64> {
        self.0
            .get(subject)
            .copied()
            .filter(|hours| *hours > 0.0)
            .map(|hours| hours * 60.0)
    }

}

/// One row as reported by the optical extraction collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedItem {
    pub student_name: String,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub minutes_late: Option<u32>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AtRiskStudent {
    pub student_id: Uuid,
    pub student_name: String,
    pub student_code: String,
    pub class_id: Uuid,
    pub parent_phone: Option<String>,
    pub absence_count: u32,
    pub total_sessions: u32,
    pub absence_ratio: f64,
    pub risk_score: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubjectLoss {
    pub subject: String,
    pub records: u32,
    pub absences: u32,
    pub lost_minutes: u64,
    /// `None` when the subject has no configured expected hours.
    pub lost_percentage: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayTally {
    pub date: NaiveDate,
    pub present: u32,
    /// Absent and excused together.
    pub absent: u32,
    pub late: u32,
    pub total: u32,
}
