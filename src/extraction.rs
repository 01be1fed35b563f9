//! Staging area for attendance read off a photographed sign-in sheet.

use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::matcher::{match_identity, MatchOutcome};
use crate::models::{
    AttendanceRecord, AttendanceStatus, ExtractedItem, RecordSource, Roster, Student,
};
use crate::timing::effective_session_minutes;

/// Label given to rows added by hand.
pub const MANUAL_ROW_LABEL: &str = "Manual Entry";

/// The image-understanding service, seen as a blocking call that either
/// returns parsed rows or fails outright.
pub trait SheetExtractor {
    fn extract(&self) -> Result<Vec<ExtractedItem>>;
}

/// Reads the collaborator's JSON output from disk.
#[derive(Debug, Clone)]
pub struct JsonExtractionFile {
    path: PathBuf,
}

impl JsonExtractionFile {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }
}

impl SheetExtractor for JsonExtractionFile {
    fn extract(&self) -> Result<Vec<ExtractedItem>> {
        let raw = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::ExternalService(format!("cannot read {}: {e}", self.path.display()))
        })?;
        parse_extraction(&raw)
    }
}

/// Parses a JSON array of extracted rows. Any malformed row fails the whole
/// payload.
pub fn parse_extraction(raw: &str) -> Result<Vec<ExtractedItem>> {
    if raw.trim().is_empty() {
        return Ok(Vec::new());
    }
    serde_json::from_str(raw)
        .map_err(|e| Error::ExternalService(format!("malformed extraction payload: {e}")))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowOrigin {
    Extracted,
    Manual,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BatchRow {
    pub label: String,
    pub status: AttendanceStatus,
    pub minutes_late: Option<u32>,
    pub notes: Option<String>,
    pub outcome: MatchOutcome,
    pub origin: RowOrigin,
}

impl BatchRow {
    pub fn student_id(&self) -> Option<Uuid> {
        self.outcome.student_id()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExtractionBatch {
    rows: Vec<BatchRow>,
}

impl ExtractionBatch {
    pub fn from_items(items: Vec<ExtractedItem>, students: &[Student]) -> Self {
        let rows = items
            .into_iter()
            .map(|item| BatchRow {
                outcome: match_identity(&item.student_name, students),
                label: item.student_name,
                status: item.status,
                minutes_late: item.minutes_late,
                notes: item.notes,
                origin: RowOrigin::Extracted,
            })
            .collect::<Vec<_>>();

        debug!(
            rows = rows.len(),
            resolved = rows.iter().filter(|row| row.outcome.is_resolved()).count(),
            "extraction batch matched"
        );
        Self { rows }
    }

    /// Runs the collaborator and stages its output. A failing collaborator
    /// stages nothing.
    pub fn from_extractor(extractor: &dyn SheetExtractor, students: &[Student]) -> Result<Self> {
        let items = extractor.extract()?;
        Ok(Self::from_items(items, students))
    }

    pub fn rows(&self) -> &[BatchRow] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Indices of rows still waiting for a student.
    pub fn unresolved(&self) -> Vec<usize> {
        self.rows
            .iter()
            .enumerate()
            .filter(|(_, row)| !row.outcome.is_resolved())
            .map(|(index, _)| index)
            .collect()
    }

    /// Prepends an unresolved, present row for the caller to fill in.
    pub fn add_manual_row(&mut self) {
        self.rows.insert(
            0,
            BatchRow {
                label: MANUAL_ROW_LABEL.to_string(),
                status: AttendanceStatus::Present,
                minutes_late: None,
                notes: None,
                outcome: MatchOutcome::NoMatch,
                origin: RowOrigin::Manual,
            },
        );
    }

    pub fn remove_row(&mut self, index: usize) -> Result<BatchRow> {
        if index >= self.rows.len() {
            return Err(Error::NotFound(format!("batch row {index}")));
        }
        Ok(self.rows.remove(index))
    }

    /// Resolves a row by hand.
    pub fn assign(&mut self, index: usize, student_id: Uuid, roster: &Roster) -> Result<()> {
        if roster.student(student_id).is_none() {
            return Err(Error::Validation(format!("unknown student {student_id}")));
        }
        let row = self
            .rows
            .get_mut(index)
            .ok_or_else(|| Error::NotFound(format!("batch row {index}")))?;
        row.outcome = MatchOutcome::Resolved(student_id);
        Ok(())
    }

    pub fn set_status(&mut self, index: usize, status: AttendanceStatus) -> Result<()> {
        let row = self
            .rows
            .get_mut(index)
            .ok_or_else(|| Error::NotFound(format!("batch row {index}")))?;
        row.status = status;
        Ok(())
    }

    /// Turns resolved rows into records. Unresolved rows are skipped; a
    /// batch with no resolved row at all is refused.
    pub fn commit(
        &self,
        date: NaiveDate,
        subject: Option<&str>,
        session_minutes: u32,
    ) -> Result<Vec<AttendanceRecord>> {
        let subject = subject.map(str::trim).filter(|subject| !subject.is_empty());
        let session_minutes = effective_session_minutes(session_minutes);

        let records: Vec<AttendanceRecord> = self
            .rows
            .iter()
            .filter_map(|row| {
                let student_id = row.student_id()?;
                Some(AttendanceRecord {
                    id: Uuid::new_v4(),
                    student_id,
                    date,
                    status: row.status,
                    source: RecordSource::OpticalExtraction,
                    minutes_late: if row.status == AttendanceStatus::Late {
                        row.minutes_late.unwrap_or(0)
                    } else {
                        0
                    },
                    note: row.notes.clone().filter(|note| !note.trim().is_empty()),
                    subject: subject.map(str::to_string),
                    session_duration: Some(session_minutes),
                })
            })
            .collect();

        if records.is_empty() {
            return Err(Error::CommitWithoutMatches);
        }

        info!(
            committed = records.len(),
            skipped = self.rows.len() - records.len(),
            "extraction batch ready for submission"
        );
        Ok(records)
    }
}
