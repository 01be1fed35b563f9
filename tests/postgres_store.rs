//! Storage tests against a live Postgres named by DATABASE_URL.
//!
//! Run with `cargo test -- --ignored` once the database is reachable.

use std::io::Write;

use chrono::NaiveDate;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use attendance_reconciler::db;
use attendance_reconciler::models::{AttendanceRecord, AttendanceStatus, RecordSource, Roster};
use attendance_reconciler::Ledger;

async fn connect() -> PgPool {
    let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = PgPoolOptions::new()
        .max_connections(2)
        .connect(&url)
        .await
        .expect("Failed to connect to Postgres");
    db::init_db(&pool).await.expect("Failed to migrate");
    pool
}

async fn load_ledger(pool: &PgPool) -> Ledger {
    let roster = db::fetch_roster(pool).await.unwrap();
    let history = db::fetch_history(pool).await.unwrap();
    Ledger::new(roster, history)
}

fn manual(student_id: Uuid, date: NaiveDate, status: AttendanceStatus) -> AttendanceRecord {
    AttendanceRecord::new(student_id, date, status, RecordSource::Manual)
}

fn student_id(roster: &Roster, code: &str) -> Uuid {
    roster.student_by_code(code).unwrap().id
}

#[tokio::test]
#[ignore] // Requires a Postgres instance in DATABASE_URL
async fn stale_writer_does_not_overwrite_derived_fields() {
    let pool = connect().await;
    let tag = Uuid::new_v4().simple().to_string()[..8].to_string();
    let (absent_code, present_code) = (format!("A-{tag}"), format!("P-{tag}"));

    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "first_name,last_name,student_code,class_name,parent_phone").unwrap();
    writeln!(csv, "Rania,Idrissi,{absent_code},Stale {tag},").unwrap();
    writeln!(csv, "Omar,Benali,{present_code},Stale {tag},").unwrap();
    assert_eq!(db::import_roster_csv(&pool, csv.path()).await.unwrap(), 2);

    // Both writers load before either commits.
    let first = load_ledger(&pool).await;
    let second = load_ledger(&pool).await;
    let date = NaiveDate::from_ymd_opt(2024, 5, 6).unwrap();

    let absent = student_id(&first.snapshot().roster, &absent_code);
    let batch = vec![manual(absent, date, AttendanceStatus::Absent).with_session_duration(0)];
    first.submit(batch.clone()).unwrap();
    db::apply_submission(&pool, &batch).await.unwrap();

    let present = student_id(&second.snapshot().roster, &present_code);
    let batch = vec![manual(present, date, AttendanceStatus::Present)];
    let snapshot = second.submit(batch.clone()).unwrap();
    assert_eq!(snapshot.roster.student(absent).unwrap().risk_score, 0);
    db::apply_submission(&pool, &batch).await.unwrap();

    let stored = db::fetch_roster(&pool).await.unwrap();
    let absent_now = stored.student(absent).unwrap();
    assert_eq!(absent_now.absence_count, 1);
    assert_eq!(absent_now.risk_score, 100);
    assert_eq!(stored.student(present).unwrap().risk_score, 0);

    let history = db::fetch_history(&pool).await.unwrap();
    let record = history
        .iter()
        .find(|record| record.student_id == absent && record.date == date)
        .unwrap();
    assert_eq!(record.session_duration, Some(60));
}

#[tokio::test]
#[ignore] // Requires a Postgres instance in DATABASE_URL
async fn session_deletion_refreshes_derived_fields() {
    let pool = connect().await;
    let tag = Uuid::new_v4().simple().to_string()[..8].to_string();
    let code = format!("D-{tag}");
    let class_name = format!("Deletion {tag}");

    let mut csv = tempfile::NamedTempFile::new().unwrap();
    writeln!(csv, "first_name,last_name,student_code,class_name,parent_phone").unwrap();
    writeln!(csv, "Lina,Haddad,{code},{class_name},").unwrap();
    db::import_roster_csv(&pool, csv.path()).await.unwrap();

    let roster = db::fetch_roster(&pool).await.unwrap();
    let id = student_id(&roster, &code);
    let class_id = roster.class_by_name(&class_name).unwrap().id;
    let date = NaiveDate::from_ymd_opt(2024, 5, 7).unwrap();

    let batch = vec![manual(id, date, AttendanceStatus::Absent)];
    db::apply_submission(&pool, &batch).await.unwrap();
    let before = db::fetch_roster(&pool).await.unwrap();
    assert_eq!(before.student(id).unwrap().risk_score, 100);

    assert_eq!(db::apply_session_deletion(&pool, class_id, date).await.unwrap(), 1);
    let after = db::fetch_roster(&pool).await.unwrap();
    let student = after.student(id).unwrap();
    assert_eq!(student.absence_count, 0);
    assert_eq!(student.risk_score, 0);
}
