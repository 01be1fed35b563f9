use std::collections::HashMap;

use uuid::Uuid;

use crate::models::{AtRiskStudent, AttendanceRecord, AttendanceStatus, Student};

/// Absence ratio above which a student counts as chronically absent.
pub const CHRONIC_ABSENCE_RATIO: f64 = 0.10;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AttendanceTally {
    pub total: u32,
    pub absent: u32,
}

impl AttendanceTally {
    pub fn absence_ratio(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(f64::from(self.absent) / f64::from(self.total))
        }
    }

    pub fn is_chronic(&self) -> bool {
        self.absence_ratio()
            .map(|ratio| ratio > CHRONIC_ABSENCE_RATIO)
            .unwrap_or(false)
    }

    pub fn risk_score(&self) -> u8 {
        risk_score(self.absent, self.total)
    }
}

/// `round(min(100, 100 * absent / total))`, or 0 without sessions.
pub fn risk_score(absent: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let risk = (f64::from(absent) / f64::from(total)) * 100.0;
    risk.round().clamp(0.0, 100.0) as u8
}

/// Counts recorded sessions and `absent` records per student. Excused
/// records count as sessions but not as absences.
pub fn tally_by_student(history: &[AttendanceRecord]) -> HashMap<Uuid, AttendanceTally> {
    let mut tallies: HashMap<Uuid, AttendanceTally> = HashMap::new();

    for record in history {
        let entry = tallies.entry(record.student_id).or_default();
        entry.total += 1;
        if record.status == AttendanceStatus::Absent {
            entry.absent += 1;
        }
    }

    tallies
}

/// Regenerates every student's derived fields from history.
pub fn recompute_students(history: &[AttendanceRecord], students: &[Student]) -> Vec<Student> {
    let tallies = tally_by_student(history);

    students
        .iter()
        .map(|student| {
            let tally = tallies.get(&student.id).copied().unwrap_or_default();
            Student {
                absence_count: tally.absent,
                risk_score: tally.risk_score(),
                ..student.clone()
            }
        })
        .collect()
}

/// Students whose absence ratio exceeds [`CHRONIC_ABSENCE_RATIO`], highest
/// ratio first and then by name.
pub fn at_risk_students(history: &[AttendanceRecord], students: &[Student]) -> Vec<AtRiskStudent> {
    let tallies = tally_by_student(history);

    let mut values: Vec<AtRiskStudent> = students
        .iter()
        .filter_map(|student| {
            let tally = tallies.get(&student.id)?;
            if !tally.is_chronic() {
                return None;
            }
            Some(AtRiskStudent {
                student_id: student.id,
                student_name: student.full_name(),
                student_code: student.student_code.clone(),
                class_id: student.class_id,
                parent_phone: student.parent_phone.clone(),
                absence_count: tally.absent,
                total_sessions: tally.total,
                absence_ratio: tally.absence_ratio().unwrap_or(0.0),
                risk_score: tally.risk_score(),
            })
        })
        .collect();

    values.sort_by(|a, b| {
        b.absence_ratio
            .partial_cmp(&a.absence_ratio)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.student_name.cmp(&b.student_name))
    });
    values
}
