//! End-to-end flow through the library: manual sheet, optical extraction
//! batch, resubmission, session deletion and metrics.

use std::collections::HashSet;

use chrono::{NaiveDate, NaiveTime};
use uuid::Uuid;

use attendance_reconciler::config::Settings;
use attendance_reconciler::extraction::{parse_extraction, ExtractionBatch};
use attendance_reconciler::matcher::MatchOutcome;
use attendance_reconciler::metrics::compute_metrics;
use attendance_reconciler::models::{
    AttendanceStatus, ClassGroup, RecordSource, Roster, Student, SubjectConfig,
};
use attendance_reconciler::sheet::AttendanceSheet;
use attendance_reconciler::{Error, Ledger};

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
}

fn clock(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap()
}

fn roster() -> Roster {
    let ge101 = ClassGroup {
        id: Uuid::new_v4(),
        name: "GE101".to_string(),
        grade: "1A".to_string(),
    };
    let ge102 = ClassGroup {
        id: Uuid::new_v4(),
        name: "GE102".to_string(),
        grade: "1A".to_string(),
    };

    let people = [
        ("Ahmed", "Ali", "ST001", ge101.id),
        ("Sarah", "Connor", "ST002", ge101.id),
        ("Jean", "Dupont", "ST003", ge101.id),
        ("John", "Doe", "ST005", ge102.id),
    ];
    let students = people
        .iter()
        .map(|(first, last, code, class_id)| Student {
            id: Uuid::new_v4(),
            first_name: first.to_string(),
            last_name: last.to_string(),
            student_code: code.to_string(),
            class_id: *class_id,
            parent_phone: None,
            absence_count: 0,
            risk_score: 0,
        })
        .collect();

    Roster::new(vec![ge101, ge102], students)
}

fn assert_unique(ledger: &Ledger) {
    let snapshot = ledger.snapshot();
    let keys: HashSet<(Uuid, NaiveDate)> = snapshot
        .history
        .records()
        .iter()
        .map(|record| (record.student_id, record.date))
        .collect();
    assert_eq!(keys.len(), snapshot.history.len());
}

#[test]
fn sheet_and_extraction_flow_keeps_one_record_per_student_day() {
    let roster = roster();
    let ge101 = roster.class_by_name("ge101").unwrap().id;
    let ge102 = roster.class_by_name("GE102").unwrap().id;
    let ahmed = roster.student_by_code("ST001").unwrap().id;
    let sarah = roster.student_by_code("ST002").unwrap().id;
    let jean = roster.student_by_code("ST003").unwrap().id;
    let john = roster.student_by_code("ST005").unwrap().id;
    let settings = Settings::default();
    let ledger = Ledger::new(roster.clone(), Vec::new());

    // Day 1: manual sheet for GE101, Jean absent, everyone else unmarked.
    let mut sheet = AttendanceSheet::new(day(1))
        .for_class(ge101)
        .with_subject("English")
        .timed(clock(8, 0), clock(8, 50));
    sheet.mark(jean, AttendanceStatus::Absent);
    let records = sheet.build(&roster, &settings).unwrap();
    assert_eq!(records.len(), 3);
    ledger.submit(records).unwrap();

    // Day 1 for GE102 as well.
    let mut other = AttendanceSheet::new(day(1))
        .for_class(ge102)
        .with_subject("Arabic");
    other.mark(john, AttendanceStatus::Absent);
    ledger.submit(other.build(&roster, &settings).unwrap()).unwrap();

    // Day 2: photographed sheet for GE101.
    let items = parse_extraction(
        r#"[
            {"studentName": "ahmed ali", "status": "late", "minutesLate": 10},
            {"studentName": "Sarah Connor", "status": "excused"},
            {"studentName": "J. Dupont", "status": "absent"}
        ]"#,
    )
    .unwrap();
    let mut batch = ExtractionBatch::from_items(items, &roster.students);
    assert_eq!(batch.rows()[0].outcome, MatchOutcome::Resolved(ahmed));
    assert_eq!(batch.rows()[2].outcome, MatchOutcome::NoMatch);
    batch.assign(2, jean, &roster).unwrap();
    let snapshot = ledger
        .submit(batch.commit(day(2), Some("English"), 50).unwrap())
        .unwrap();

    assert_eq!(snapshot.history.len(), 7);
    let jean_now = snapshot.roster.student(jean).unwrap();
    assert_eq!(jean_now.absence_count, 2);
    assert_eq!(jean_now.risk_score, 100);
    let sarah_now = snapshot.roster.student(sarah).unwrap();
    assert_eq!(sarah_now.absence_count, 0);
    assert_eq!(
        snapshot.history.find(sarah, day(2)).unwrap().source,
        RecordSource::OpticalExtraction
    );
    assert_unique(&ledger);

    // Re-editing day 1 for GE101 replaces rather than duplicates.
    let mut edit = AttendanceSheet::new(day(1))
        .for_class(ge101)
        .with_subject("English");
    assert!(edit.load_existing(&snapshot.history, &snapshot.roster).unwrap());
    edit.mark(jean, AttendanceStatus::Present);
    let snapshot = ledger.submit(edit.build(&roster, &settings).unwrap()).unwrap();
    assert_eq!(snapshot.history.len(), 7);
    assert_eq!(snapshot.roster.student(jean).unwrap().risk_score, 50);
    // The edit carries its own session length, not the stored one.
    assert_eq!(
        snapshot.history.find(ahmed, day(1)).unwrap().session_duration,
        Some(60)
    );
    assert_unique(&ledger);

    // Lost time: Jean absent day 2 (50) + Ahmed late day 2 (10) + John absent (60).
    let subjects = SubjectConfig::new().with_hours("English", 20.0);
    let metrics = ledger.metrics(&subjects);
    assert_eq!(metrics.lost_instructional_minutes, 120);
    assert_eq!(metrics.total_students, 4);
    assert_eq!(metrics, ledger.metrics(&subjects));

    // Deleting GE101's day 2 leaves GE102 and day 1 untouched.
    let (snapshot, removed) = ledger.delete_session(ge101, day(2)).unwrap();
    assert_eq!(removed, 3);
    assert_eq!(snapshot.history.len(), 4);
    assert!(snapshot.history.find(john, day(1)).is_some());
    assert_eq!(snapshot.roster.student(jean).unwrap().risk_score, 0);
    assert_eq!(snapshot.roster.student(john).unwrap().risk_score, 100);

    let recomputed = compute_metrics(
        snapshot.history.records(),
        &snapshot.roster.students,
        &subjects,
    );
    assert_eq!(recomputed.attendance_rate, 75.0);
    assert_eq!(recomputed.chronic_absenteeism_rate, 25.0);
    assert_eq!(recomputed.at_risk.len(), 1);
    assert_eq!(recomputed.at_risk[0].student_id, john);
}

#[test]
fn failed_batches_never_touch_history() {
    let roster = roster();
    let ledger = Ledger::new(roster.clone(), Vec::new());
    let before = ledger.snapshot();

    let incomplete = AttendanceSheet::new(day(3)).with_subject("French");
    assert!(matches!(
        incomplete.build(&roster, &Settings::default()),
        Err(Error::Validation(_))
    ));

    assert!(matches!(
        parse_extraction(r#"[{"name": "Ahmed"}]"#),
        Err(Error::ExternalService(_))
    ));

    let items = parse_extraction(r#"[{"studentName": "Zed Nobody", "status": "absent"}]"#).unwrap();
    let batch = ExtractionBatch::from_items(items, &roster.students);
    assert!(matches!(
        batch.commit(day(3), None, 60),
        Err(Error::CommitWithoutMatches)
    ));

    assert_eq!(ledger.snapshot(), before);
    assert!(ledger.snapshot().history.is_empty());
}
