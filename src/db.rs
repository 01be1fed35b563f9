use std::collections::HashMap;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, Postgres, Row, Transaction};
use uuid::Uuid;

use crate::models::{
    AttendanceRecord, AttendanceStatus, ClassGroup, RecordSource, Roster, Student,
};

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let classes = vec![
        (
            Uuid::parse_str("6f1c2a7e-0b5d-4c1e-9d0a-3a8f1e2b4c01")?,
            "GE101",
            "1A",
        ),
        (
            Uuid::parse_str("6f1c2a7e-0b5d-4c1e-9d0a-3a8f1e2b4c02")?,
            "GE102",
            "1A",
        ),
    ];

    for (id, name, grade) in classes {
        sqlx::query(
            r#"
            INSERT INTO attendance.classes (id, name, grade)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO UPDATE SET grade = EXCLUDED.grade
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(grade)
        .execute(pool)
        .await?;
    }

    let students = vec![
        ("Ahmed", "Ali", "ST001", "GE101", "0661123456"),
        ("Sarah", "Connor", "ST002", "GE101", "0661987654"),
        ("Jean", "Dupont", "ST003", "GE101", "0661555555"),
        ("Fatima", "Zahra", "ST004", "GE101", "0661222222"),
        ("John", "Doe", "ST005", "GE102", "0661333333"),
    ];

    for (first_name, last_name, code, class_name, phone) in students {
        let class_id: Uuid = sqlx::query("SELECT id FROM attendance.classes WHERE name = $1")
            .bind(class_name)
            .fetch_one(pool)
            .await?
            .get("id");

        upsert_student(pool, first_name, last_name, code, class_id, Some(phone)).await?;
    }

    Ok(())
}

async fn upsert_student(
    pool: &PgPool,
    first_name: &str,
    last_name: &str,
    code: &str,
    class_id: Uuid,
    parent_phone: Option<&str>,
) -> anyhow::Result<bool> {
    let inserted: bool = sqlx::query(
        r#"
        INSERT INTO attendance.students
        (id, first_name, last_name, student_code, class_id, parent_phone)
        VALUES ($1, $2, $3, $4, $5, $6)
        ON CONFLICT (student_code) DO UPDATE
        SET first_name = EXCLUDED.first_name,
            last_name = EXCLUDED.last_name,
            class_id = EXCLUDED.class_id,
            parent_phone = EXCLUDED.parent_phone
        RETURNING (xmax = 0) AS inserted
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(first_name)
    .bind(last_name)
    .bind(code)
    .bind(class_id)
    .bind(parent_phone)
    .fetch_one(pool)
    .await?
    .get("inserted");

    Ok(inserted)
}

pub async fn fetch_roster(pool: &PgPool) -> anyhow::Result<Roster> {
    let class_rows = sqlx::query("SELECT id, name, grade FROM attendance.classes ORDER BY name")
        .fetch_all(pool)
        .await?;
    let classes = class_rows
        .into_iter()
        .map(|row| ClassGroup {
            id: row.get("id"),
            name: row.get("name"),
            grade: row.get("grade"),
        })
        .collect();

    let student_rows = sqlx::query(
        "SELECT id, first_name, last_name, student_code, class_id, parent_phone, \
         absence_count, risk_score \
         FROM attendance.students \
         ORDER BY last_name, first_name",
    )
    .fetch_all(pool)
    .await?;

    let mut students = Vec::new();
    for row in student_rows {
        let absence_count: i32 = row.get("absence_count");
        let risk_score: i32 = row.get("risk_score");
        students.push(Student {
            id: row.get("id"),
            first_name: row.get("first_name"),
            last_name: row.get("last_name"),
            student_code: row.get("student_code"),
            class_id: row.get("class_id"),
            parent_phone: row.get("parent_phone"),
            absence_count: u32::try_from(absence_count).unwrap_or(0),
            risk_score: u8::try_from(risk_score.clamp(0, 100)).unwrap_or(0),
        });
    }

    Ok(Roster::new(classes, students))
}

pub async fn fetch_history(pool: &PgPool) -> anyhow::Result<Vec<AttendanceRecord>> {
    let rows = sqlx::query(
        "SELECT id, student_id, date, status, source, minutes_late, note, subject, \
         session_duration \
         FROM attendance.records \
         ORDER BY date, student_id",
    )
    .fetch_all(pool)
    .await?;

    let mut records = Vec::new();
    for row in rows {
        let status: String = row.get("status");
        let source: String = row.get("source");
        let minutes_late: i32 = row.get("minutes_late");
        let session_duration: Option<i32> = row.get("session_duration");
        records.push(AttendanceRecord {
            id: row.get("id"),
            student_id: row.get("student_id"),
            date: row.get("date"),
            status: status.parse::<AttendanceStatus>()?,
            source: source.parse::<RecordSource>()?,
            minutes_late: u32::try_from(minutes_late).unwrap_or(0),
            note: row.get("note"),
            subject: row.get("subject"),
            session_duration: session_duration.and_then(|minutes| u32::try_from(minutes).ok()),
        });
    }

    Ok(records)
}

// Serializes every write to attendance.records across processes.
const RECORDS_WRITE_LOCK: i64 = 0x6174_7465_6e64;

/// Upserts a committed batch by (student, date) and refreshes the derived
/// student fields from stored records in the same transaction.
pub async fn apply_submission(pool: &PgPool, records: &[AttendanceRecord]) -> anyhow::Result<()> {
    let mut tx = pool.begin().await?;
    lock_records(&mut tx).await?;

    for record in records {
        sqlx::query(
            r#"
            INSERT INTO attendance.records
            (id, student_id, date, status, source, minutes_late, note, subject, session_duration)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (student_id, date) DO UPDATE
            SET id = EXCLUDED.id,
                status = EXCLUDED.status,
                source = EXCLUDED.source,
                minutes_late = EXCLUDED.minutes_late,
                note = EXCLUDED.note,
                subject = EXCLUDED.subject,
                session_duration = EXCLUDED.session_duration
            "#,
        )
        .bind(record.id)
        .bind(record.student_id)
        .bind(record.date)
        .bind(record.status.as_str())
        .bind(record.source.as_str())
        .bind(i32::try_from(record.minutes_late).context("minutes late out of range")?)
        .bind(record.note.as_deref())
        .bind(record.subject.as_deref())
        .bind(
            record
                .session_duration
                .map(i32::try_from)
                .transpose()
                .context("session duration out of range")?,
        )
        .execute(&mut *tx)
        .await?;
    }

    refresh_derived_fields(&mut tx).await?;
    tx.commit().await?;
    Ok(())
}

/// Deletes one class session and refreshes the derived student fields in
/// the same transaction.
pub async fn apply_session_deletion(
    pool: &PgPool,
    class_id: Uuid,
    date: NaiveDate,
) -> anyhow::Result<u64> {
    let mut tx = pool.begin().await?;
    lock_records(&mut tx).await?;

    let removed = sqlx::query(
        r#"
        DELETE FROM attendance.records
        WHERE date = $1
          AND student_id IN (SELECT id FROM attendance.students WHERE class_id = $2)
        "#,
    )
    .bind(date)
    .bind(class_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();

    refresh_derived_fields(&mut tx).await?;
    tx.commit().await?;
    Ok(removed)
}

async fn lock_records(tx: &mut Transaction<'_, Postgres>) -> anyhow::Result<()> {
    sqlx::query("SELECT pg_advisory_xact_lock($1)")
        .bind(RECORDS_WRITE_LOCK)
        .execute(&mut **tx)
        .await?;
    Ok(())
}

/// Recomputes absence counts and risk scores from the records visible to
/// `tx`, using the same rule as `risk::risk_score`.
async fn refresh_derived_fields(tx: &mut Transaction<'_, Postgres>) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        UPDATE attendance.students s
        SET absence_count = COALESCE(agg.absent, 0),
            risk_score = CASE
                WHEN COALESCE(agg.total, 0) = 0 THEN 0
                ELSE LEAST(100, ROUND(100.0 * agg.absent / agg.total))::INTEGER
            END
        FROM attendance.students target
        LEFT JOIN (
            SELECT student_id,
                   COUNT(*) FILTER (WHERE status = 'absent')::INTEGER AS absent,
                   COUNT(*)::INTEGER AS total
            FROM attendance.records
            GROUP BY student_id
        ) agg ON agg.student_id = target.id
        WHERE s.id = target.id
        "#,
    )
    .execute(&mut **tx)
    .await?;
    Ok(())
}

pub async fn import_roster_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct CsvRow {
        first_name: String,
        last_name: String,
        student_code: String,
        class_name: Option<String>,
        parent_phone: Option<String>,
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let mut class_ids: HashMap<String, Uuid> = HashMap::new();
    let mut inserted = 0usize;

    for result in reader.deserialize::<CsvRow>() {
        let row = result?;
        if row.first_name.trim().is_empty() && row.last_name.trim().is_empty() {
            continue;
        }

        let class_name = row
            .class_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .unwrap_or("General")
            .to_string();

        let class_id = match class_ids.get(&class_name.to_lowercase()) {
            Some(id) => *id,
            None => {
                let id = ensure_class(pool, &class_name).await?;
                class_ids.insert(class_name.to_lowercase(), id);
                id
            }
        };

        let code = if row.student_code.trim().is_empty() {
            format!("ST-{}", &Uuid::new_v4().simple().to_string()[..8])
        } else {
            row.student_code.trim().to_string()
        };

        let phone = row
            .parent_phone
            .as_deref()
            .map(str::trim)
            .filter(|phone| !phone.is_empty());

        if upsert_student(
            pool,
            row.first_name.trim(),
            row.last_name.trim(),
            &code,
            class_id,
            phone,
        )
        .await?
        {
            inserted += 1;
        }
    }

    Ok(inserted)
}

async fn ensure_class(pool: &PgPool, name: &str) -> anyhow::Result<Uuid> {
    let existing = sqlx::query("SELECT id FROM attendance.classes WHERE lower(name) = lower($1)")
        .bind(name)
        .fetch_optional(pool)
        .await?;

    if let Some(row) = existing {
        return Ok(row.get("id"));
    }

    let id: Uuid = sqlx::query(
        r#"
        INSERT INTO attendance.classes (id, name, grade)
        VALUES ($1, $2, 'General')
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .fetch_one(pool)
    .await?
    .get("id");

    Ok(id)
}
