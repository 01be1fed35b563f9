//! Cohort and class level attendance metrics.

use std::collections::{BTreeMap, HashSet};

use chrono::{Duration, NaiveDate};
use serde::Serialize;
use uuid::Uuid;

use crate::models::{
    AtRiskStudent, AttendanceRecord, AttendanceStatus, DayTally, Student, SubjectConfig,
    SubjectLoss,
};
use crate::risk::{at_risk_students, tally_by_student};

/// Bucket for records without a subject tag.
pub const GENERAL_SUBJECT: &str = "General";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CohortMetrics {
    pub total_students: usize,
    pub attendance_rate: f64,
    pub chronic_absenteeism_rate: f64,
    pub lost_instructional_minutes: u64,
    pub at_risk: Vec<AtRiskStudent>,
    pub subject_breakdown: BTreeMap<Uuid, Vec<SubjectLoss>>,
}

pub fn compute_metrics(
    history: &[AttendanceRecord],
    students: &[Student],
    subjects: &SubjectConfig,
) -> CohortMetrics {
    let mut subject_breakdown = BTreeMap::new();
    let recorded: HashSet<Uuid> = history.iter().map(|record| record.student_id).collect();

    for student in students.iter().filter(|student| recorded.contains(&student.id)) {
        subject_breakdown.insert(student.id, subject_breakdown_for(student.id, history, subjects));
    }

    CohortMetrics {
        total_students: students.len(),
        attendance_rate: attendance_rate(history),
        chronic_absenteeism_rate: chronic_absenteeism_rate(history, students),
        lost_instructional_minutes: lost_instructional_minutes(history),
        at_risk: at_risk_students(history, students),
        subject_breakdown,
    }
}

/// Share of present and late records, one decimal, 0 without history.
pub fn attendance_rate(history: &[AttendanceRecord]) -> f64 {
    if history.is_empty() {
        return 0.0;
    }
    let attended = history
        .iter()
        .filter(|record| record.status.is_attending())
        .count();
    round_one_decimal(attended as f64 / history.len() as f64 * 100.0)
}

/// Share of students with at least one session whose absence ratio exceeds
/// ten percent. Students without sessions are left out entirely.
pub fn chronic_absenteeism_rate(history: &[AttendanceRecord], students: &[Student]) -> f64 {
    let tallies = tally_by_student(history);
    let mut active = 0usize;
    let mut chronic = 0usize;

    for student in students {
        if let Some(tally) = tallies.get(&student.id) {
            active += 1;
            if tally.is_chronic() {
                chronic += 1;
            }
        }
    }

    if active == 0 {
        0.0
    } else {
        round_one_decimal(chronic as f64 / active as f64 * 100.0)
    }
}

pub fn lost_instructional_minutes(history: &[AttendanceRecord]) -> u64 {
    history.iter().map(AttendanceRecord::lost_minutes).sum()
}

/// Lost time per subject for one student.
pub fn subject_breakdown_for(
    student_id: Uuid,
    history: &[AttendanceRecord],
    subjects: &SubjectConfig,
) -> Vec<SubjectLoss> {
    let records: Vec<&AttendanceRecord> = history
        .iter()
        .filter(|record| record.student_id == student_id)
        .collect();
    summarize_records(records, subjects)
}

/// Lost time per subject across every record given.
pub fn summarize_by_subject(
    history: &[AttendanceRecord],
    subjects: &SubjectConfig,
) -> Vec<SubjectLoss> {
    summarize_records(history.iter().collect(), subjects)
}

fn summarize_records(records: Vec<&AttendanceRecord>, subjects: &SubjectConfig) -> Vec<SubjectLoss> {
    let mut map: BTreeMap<&str, (u32, u32, u64)> = BTreeMap::new();

    for record in records {
        let subject = record
            .subject
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(GENERAL_SUBJECT);
        let entry = map.entry(subject).or_insert((0, 0, 0));
        entry.0 += 1;
        if record.status == AttendanceStatus::Absent {
            entry.1 += 1;
        }
        entry.2 += record.lost_minutes();
    }

    map.into_iter()
        .map(|(subject, (records, absences, lost_minutes))| SubjectLoss {
            subject: subject.to_string(),
            records,
            absences,
            lost_minutes,
            lost_percentage: subjects
                .expected_minutes(subject)
                .map(|expected| lost_minutes as f64 / expected * 100.0),
        })
        .collect()
}

/// Per-day tallies for trend charts. Excused records are grouped with
/// absences here even though they carry no penalty elsewhere.
pub fn daily_trend(history: &[AttendanceRecord]) -> Vec<DayTally> {
    let mut days: BTreeMap<NaiveDate, DayTally> = BTreeMap::new();

    for record in history {
        let entry = days.entry(record.date).or_insert(DayTally {
            date: record.date,
            present: 0,
            absent: 0,
            late: 0,
            total: 0,
        });
        entry.total += 1;
        match record.status {
            AttendanceStatus::Present => entry.present += 1,
            AttendanceStatus::Late => entry.late += 1,
            AttendanceStatus::Absent | AttendanceStatus::Excused => entry.absent += 1,
        }
    }

    days.into_values().collect()
}

/// Restricts history and roster to one class.
pub fn scope_to_class(
    history: &[AttendanceRecord],
    students: &[Student],
    class_id: Uuid,
) -> (Vec<AttendanceRecord>, Vec<Student>) {
    let members: Vec<Student> = students
        .iter()
        .filter(|student| student.class_id == class_id)
        .cloned()
        .collect();
    let ids: HashSet<Uuid> = members.iter().map(|student| student.id).collect();
    let records = history
        .iter()
        .filter(|record| ids.contains(&record.student_id))
        .cloned()
        .collect();
    (records, members)
}

pub fn records_since(history: &[AttendanceRecord], cutoff: NaiveDate) -> Vec<AttendanceRecord> {
    history
        .iter()
        .filter(|record| record.date >= cutoff)
        .cloned()
        .collect()
}

pub fn cutoff_date(today: NaiveDate, since_days: i64) -> NaiveDate {
    today - Duration::days(since_days.max(1))
}

fn round_one_decimal(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RecordSource;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    fn sample_student(first: &str, class_id: Uuid) -> Student {
        Student {
            id: Uuid::new_v4(),
            first_name: first.to_string(),
            last_name: "Moreno".to_string(),
            student_code: format!("ST-{first}"),
            class_id,
            parent_phone: None,
            absence_count: 0,
            risk_score: 0,
        }
    }

    fn record(student_id: Uuid, date: NaiveDate, status: AttendanceStatus) -> AttendanceRecord {
        AttendanceRecord::new(student_id, date, status, RecordSource::Manual)
    }

    #[test]
    fn lost_time_counts_absences_and_lateness_only() {
        let id = Uuid::new_v4();
        let history = vec![
            record(id, day(1), AttendanceStatus::Absent).with_session_duration(60),
            record(id, day(2), AttendanceStatus::Late).with_minutes_late(15),
            record(id, day(3), AttendanceStatus::Excused).with_session_duration(60),
            record(id, day(4), AttendanceStatus::Present).with_session_duration(60),
        ];
        assert_eq!(lost_instructional_minutes(&history), 75);
    }

    #[test]
    fn attendance_rate_rounds_to_one_decimal() {
        let id = Uuid::new_v4();
        let history = vec![
            record(id, day(1), AttendanceStatus::Present),
            record(id, day(2), AttendanceStatus::Late),
            record(id, day(3), AttendanceStatus::Excused),
        ];
        assert_eq!(attendance_rate(&history), 66.7);
        assert_eq!(attendance_rate(&[]), 0.0);
    }

    #[test]
    fn chronic_rate_ignores_students_without_sessions() {
        let class_id = Uuid::new_v4();
        let chronic = sample_student("Avery", class_id);
        let steady = sample_student("Jules", class_id);
        let idle = sample_student("Kiara", class_id);
        let history = vec![
            record(chronic.id, day(1), AttendanceStatus::Absent),
            record(chronic.id, day(2), AttendanceStatus::Present),
            record(steady.id, day(1), AttendanceStatus::Present),
        ];

        let rate = chronic_absenteeism_rate(&history, &[chronic, steady, idle]);
        assert_eq!(rate, 50.0);
        assert_eq!(chronic_absenteeism_rate(&[], &[]), 0.0);
    }

    #[test]
    fn unconfigured_subject_percentage_is_undefined_not_zero() {
        let id = Uuid::new_v4();
        let history = vec![
            record(id, day(1), AttendanceStatus::Present).with_subject("Arabic"),
            record(id, day(2), AttendanceStatus::Absent)
                .with_subject("English")
                .with_session_duration(90),
        ];
        let subjects = SubjectConfig::new().with_hours("English", 30.0);

        let breakdown = subject_breakdown_for(id, &history, &subjects);
        assert_eq!(breakdown.len(), 2);

        let arabic = &breakdown[0];
        assert_eq!(arabic.subject, "Arabic");
        assert_eq!(arabic.lost_minutes, 0);
        assert_eq!(arabic.lost_percentage, None);

        let english = &breakdown[1];
        assert_eq!(english.lost_minutes, 90);
        assert_eq!(english.absences, 1);
        assert_eq!(english.lost_percentage, Some(5.0));
    }

    #[test]
    fn untagged_records_fall_into_general_bucket() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        let history = vec![
            record(id, day(1), AttendanceStatus::Late).with_minutes_late(20),
            record(id, day(2), AttendanceStatus::Absent).with_subject(""),
            record(other, day(1), AttendanceStatus::Absent).with_subject("French"),
        ];

        let breakdown = subject_breakdown_for(id, &history, &SubjectConfig::new());
        assert_eq!(breakdown.len(), 1);
        assert_eq!(breakdown[0].subject, GENERAL_SUBJECT);
        assert_eq!(breakdown[0].records, 2);
        assert_eq!(breakdown[0].lost_minutes, 80);
    }

    #[test]
    fn daily_trend_groups_excused_with_absent() {
        let id = Uuid::new_v4();
        let other = Uuid::new_v4();
        let history = vec![
            record(id, day(2), AttendanceStatus::Excused),
            record(other, day(2), AttendanceStatus::Late),
            record(id, day(1), AttendanceStatus::Present),
            record(other, day(1), AttendanceStatus::Absent),
        ];

        let trend = daily_trend(&history);
        assert_eq!(trend.len(), 2);
        assert_eq!(trend[0].date, day(1));
        assert_eq!((trend[0].present, trend[0].absent, trend[0].late), (1, 1, 0));
        assert_eq!((trend[1].present, trend[1].absent, trend[1].late), (0, 1, 1));
        assert_eq!(trend[1].total, 2);
    }

    #[test]
    fn compute_metrics_is_idempotent() {
        let class_id = Uuid::new_v4();
        let a = sample_student("Avery", class_id);
        let b = sample_student("Jules", class_id);
        let history = vec![
            record(a.id, day(1), AttendanceStatus::Absent).with_subject("English"),
            record(a.id, day(2), AttendanceStatus::Present).with_subject("Arabic"),
            record(b.id, day(1), AttendanceStatus::Late)
                .with_minutes_late(5)
                .with_subject("English"),
        ];
        let students = vec![a.clone(), b];
        let subjects = SubjectConfig::new().with_hours("English", 40.0);

        let first = compute_metrics(&history, &students, &subjects);
        let second = compute_metrics(&history, &students, &subjects);
        assert_eq!(first, second);
        assert_eq!(first.total_students, 2);
        assert_eq!(first.lost_instructional_minutes, 65);
        assert_eq!(first.at_risk.len(), 1);
        assert_eq!(first.at_risk[0].student_id, a.id);
        assert_eq!(first.subject_breakdown.len(), 2);
    }

    #[test]
    fn scope_to_class_keeps_members_only() {
        let class_c = Uuid::new_v4();
        let class_d = Uuid::new_v4();
        let s1 = sample_student("Avery", class_c);
        let s3 = sample_student("Kiara", class_d);
        let history = vec![
            record(s1.id, day(1), AttendanceStatus::Present),
            record(s3.id, day(1), AttendanceStatus::Absent),
        ];

        let (records, members) = scope_to_class(&history, &[s1.clone(), s3], class_c);
        assert_eq!(members.len(), 1);
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].student_id, s1.id);
    }

    #[test]
    fn window_filters_older_records() {
        let id = Uuid::new_v4();
        let history = vec![
            record(id, day(1), AttendanceStatus::Absent),
            record(id, day(20), AttendanceStatus::Present),
        ];
        let cutoff = cutoff_date(day(25), 14);
        assert_eq!(cutoff, day(11));
        assert_eq!(records_since(&history, cutoff).len(), 1);
        assert_eq!(cutoff_date(day(25), 0), day(24));
    }
}
