use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use attendance_reconciler::config::Settings;
use attendance_reconciler::extraction::{ExtractionBatch, JsonExtractionFile};
use attendance_reconciler::matcher::MatchOutcome;
use attendance_reconciler::models::{AttendanceRecord, AttendanceStatus, Roster, Student};
use attendance_reconciler::sheet::AttendanceSheet;
use attendance_reconciler::{db, metrics, report, timing, Ledger, Snapshot};

#[derive(Parser)]
#[command(name = "attendance-reconciler")]
#[command(about = "Attendance reconciliation and absence risk tracker for Group Scholar", long_about = None)]
struct Cli {
    /// Settings file (TOML)
    #[arg(long, global = true, env = "ATTENDANCE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load demo classes and students
    Seed,
    /// Import students from a CSV file
    ImportRoster {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Record a manual attendance sheet for one class session
    Submit {
        #[arg(long)]
        class: String,
        #[arg(long)]
        subject: String,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long, default_value = "08:00")]
        start: String,
        #[arg(long, default_value = "09:00")]
        end: String,
        /// CSV of student_code,status,minutes_late,notes
        #[arg(long)]
        marks: Option<PathBuf>,
    },
    /// Stage and commit attendance extracted from a sign-in sheet photo
    Ingest {
        /// JSON output of the extraction service
        #[arg(long)]
        items: PathBuf,
        #[arg(long)]
        date: NaiveDate,
        #[arg(long)]
        subject: Option<String>,
        #[arg(long)]
        start: Option<String>,
        #[arg(long)]
        end: Option<String>,
        /// Resolve a row by hand, as ROW=STUDENT_CODE
        #[arg(long)]
        assign: Vec<String>,
        /// Withdraw a row from the batch
        #[arg(long = "drop")]
        drop_rows: Vec<usize>,
        /// Show the matched batch without committing it
        #[arg(long)]
        dry_run: bool,
    },
    /// Remove every record of a class on one date
    DeleteSession {
        #[arg(long)]
        class: String,
        #[arg(long)]
        date: NaiveDate,
    },
    /// Print attendance metrics
    Metrics {
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        since_days: Option<i64>,
        #[arg(long, default_value_t = 10)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    /// Show one student's lost time by subject
    Student {
        #[arg(long)]
        code: String,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        class: Option<String>,
        #[arg(long)]
        since_days: Option<i64>,
        #[arg(long, default_value = "attendance-report.md")]
        out: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "attendance_reconciler=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::ImportRoster { csv } => {
            let inserted = db::import_roster_csv(&pool, &csv).await?;
            println!("Inserted {inserted} students from {}.", csv.display());
        }
        Commands::Submit {
            class,
            subject,
            date,
            start,
            end,
            marks,
        } => {
            let ledger = load_ledger(&pool).await?;
            let snapshot = ledger.snapshot();
            let class = snapshot
                .roster
                .class_by_name(&class)
                .with_context(|| format!("unknown class {class}"))?
                .clone();

            let minutes =
                timing::resolve_session_minutes(Some(start.as_str()), Some(end.as_str()));
            let mut sheet = AttendanceSheet::new(date)
                .for_class(class.id)
                .with_subject(subject)
                .with_session_minutes(minutes);
            if sheet.load_existing(&snapshot.history, &snapshot.roster)? {
                info!("Editing existing session for {} on {}", class.name, date);
            }
            if let Some(path) = marks {
                let marked = apply_marks(&mut sheet, &snapshot.roster, class.id, &path)?;
                info!("Applied {marked} marks from {}", path.display());
            }

            let records = sheet.build(&snapshot.roster, &settings)?;
            let next = ledger.submit(records.clone())?;
            persist_submission(&pool, &next, &records).await?;
            println!(
                "Recorded {} students for {} on {} ({} min session).",
                records.len(),
                class.name,
                date,
                minutes
            );
        }
        Commands::Ingest {
            items,
            date,
            subject,
            start,
            end,
            assign,
            drop_rows,
            dry_run,
        } => {
            let ledger = load_ledger(&pool).await?;
            let snapshot = ledger.snapshot();
            let roster = &snapshot.roster;

            let extractor = JsonExtractionFile::new(&items);
            let mut batch = ExtractionBatch::from_extractor(&extractor, &roster.students)
                .context("extraction failed, nothing was staged")?;

            for entry in &assign {
                let (row, code) = parse_assignment(entry)?;
                let student = roster
                    .student_by_code(code)
                    .with_context(|| format!("unknown student code {code}"))?;
                batch.assign(row, student.id, roster)?;
            }

            let mut drop_rows = drop_rows;
            drop_rows.sort_unstable();
            drop_rows.dedup();
            for row in drop_rows.into_iter().rev() {
                batch.remove_row(row)?;
            }

            for (index, row) in batch.rows().iter().enumerate() {
                println!(
                    "[{index}] {} ({}) -> {}",
                    row.label,
                    row.status,
                    describe_outcome(&row.outcome, roster)
                );
            }

            if dry_run {
                println!("Dry run: {} unresolved rows.", batch.unresolved().len());
                return Ok(());
            }

            let minutes = timing::resolve_session_minutes(start.as_deref(), end.as_deref());
            let records = batch.commit(date, subject.as_deref(), minutes)?;
            let next = ledger.submit(records.clone())?;
            persist_submission(&pool, &next, &records).await?;
            println!(
                "{} records saved, {} rows left unresolved.",
                records.len(),
                batch.unresolved().len()
            );
        }
        Commands::DeleteSession { class, date } => {
            let ledger = load_ledger(&pool).await?;
            let class = ledger
                .snapshot()
                .roster
                .class_by_name(&class)
                .with_context(|| format!("unknown class {class}"))?
                .clone();

            let (_, removed) = ledger.delete_session(class.id, date)?;
            let stored = db::apply_session_deletion(&pool, class.id, date).await?;
            if stored != removed as u64 {
                tracing::warn!(removed, stored, "database and ledger disagreed on removed records");
            }
            println!("Removed {removed} records for {} on {}.", class.name, date);
        }
        Commands::Metrics {
            class,
            since_days,
            limit,
            json,
        } => {
            let ledger = load_ledger(&pool).await?;
            let snapshot = ledger.snapshot();
            let (history, students) = scoped(&snapshot, class.as_deref(), window(since_days))?;
            let metrics = metrics::compute_metrics(&history, &students, &settings.subjects);

            if json {
                println!("{}", serde_json::to_string_pretty(&metrics)?);
                return Ok(());
            }

            println!("Students: {}", metrics.total_students);
            println!("Attendance rate: {:.1}%", metrics.attendance_rate);
            println!("Chronic absenteeism: {:.1}%", metrics.chronic_absenteeism_rate);
            println!(
                "Lost instructional time: {} min",
                metrics.lost_instructional_minutes
            );

            if metrics.at_risk.is_empty() {
                println!("No student is above the chronic absence threshold.");
            } else {
                println!("Students at risk:");
                for student in metrics.at_risk.iter().take(limit) {
                    println!(
                        "- {} ({}) risk {} with {} of {} sessions missed",
                        student.student_name,
                        student.student_code,
                        student.risk_score,
                        student.absence_count,
                        student.total_sessions
                    );
                }
            }
        }
        Commands::Student { code } => {
            let ledger = load_ledger(&pool).await?;
            let snapshot = ledger.snapshot();
            let student = snapshot
                .roster
                .student_by_code(&code)
                .with_context(|| format!("unknown student code {code}"))?;
            let breakdown = metrics::subject_breakdown_for(
                student.id,
                snapshot.history.records(),
                &settings.subjects,
            );

            println!(
                "{} ({}) risk {} with {} absences",
                student.full_name(),
                student.student_code,
                student.risk_score,
                student.absence_count
            );
            if breakdown.is_empty() {
                println!("No attendance recorded.");
            }
            for loss in breakdown {
                let percentage = loss
                    .lost_percentage
                    .map(|value| format!("{value:.1}%"))
                    .unwrap_or_else(|| "-".to_string());
                println!(
                    "- {}: {:.1} h lost ({} min), {} of expected hours",
                    loss.subject,
                    loss.lost_minutes as f64 / 60.0,
                    loss.lost_minutes,
                    percentage
                );
            }
        }
        Commands::Report {
            class,
            since_days,
            out,
        } => {
            let ledger = load_ledger(&pool).await?;
            let snapshot = ledger.snapshot();
            let cutoff = window(since_days);
            let (history, students) = scoped(&snapshot, class.as_deref(), cutoff)?;
            let report = report::build_report(
                &settings.school_name,
                class.as_deref(),
                cutoff,
                &history,
                &students,
                &settings.subjects,
            );
            std::fs::write(&out, report)?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

async fn load_ledger(pool: &sqlx::PgPool) -> anyhow::Result<Ledger> {
    let roster = db::fetch_roster(pool).await?;
    let history = db::fetch_history(pool).await?;
    Ok(Ledger::new(roster, history))
}

/// Persists the stored form of the submitted records. Derived student
/// fields are refreshed by the database from what it holds.
async fn persist_submission(
    pool: &sqlx::PgPool,
    snapshot: &Snapshot,
    submitted: &[AttendanceRecord],
) -> anyhow::Result<()> {
    let stored: Vec<AttendanceRecord> = submitted
        .iter()
        .filter_map(|record| snapshot.history.find(record.student_id, record.date).cloned())
        .collect();
    db::apply_submission(pool, &stored).await
}

fn window(since_days: Option<i64>) -> Option<NaiveDate> {
    since_days.map(|days| metrics::cutoff_date(Utc::now().date_naive(), days))
}

fn scoped(
    snapshot: &Snapshot,
    class: Option<&str>,
    cutoff: Option<NaiveDate>,
) -> anyhow::Result<(Vec<AttendanceRecord>, Vec<Student>)> {
    let (history, students) = match class {
        Some(name) => {
            let class = snapshot
                .roster
                .class_by_name(name)
                .with_context(|| format!("unknown class {name}"))?;
            metrics::scope_to_class(snapshot.history.records(), &snapshot.roster.students, class.id)
        }
        None => (
            snapshot.history.records().to_vec(),
            snapshot.roster.students.clone(),
        ),
    };

    let history = match cutoff {
        Some(cutoff) => metrics::records_since(&history, cutoff),
        None => history,
    };
    Ok((history, students))
}

fn apply_marks(
    sheet: &mut AttendanceSheet,
    roster: &Roster,
    class_id: uuid::Uuid,
    path: &Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct MarkRow {
        student_code: String,
        status: String,
        minutes_late: Option<u32>,
        notes: Option<String>,
    }

    let mut reader = csv::Reader::from_path(path)?;
    let mut marked = 0usize;

    for result in reader.deserialize::<MarkRow>() {
        let row = result?;
        let student = roster
            .student_by_code(&row.student_code)
            .with_context(|| format!("unknown student code {}", row.student_code))?;
        if student.class_id != class_id {
            bail!("{} is not in the selected class", student.full_name());
        }

        let status: AttendanceStatus = row.status.parse()?;
        sheet.mark(student.id, status);
        if let (AttendanceStatus::Late, Some(minutes)) = (status, row.minutes_late) {
            sheet.set_minutes_late(student.id, minutes);
        }
        if let Some(note) = row.notes {
            sheet.set_note(student.id, note);
        }
        marked += 1;
    }

    Ok(marked)
}

fn parse_assignment(entry: &str) -> anyhow::Result<(usize, &str)> {
    let (row, code) = entry
        .split_once('=')
        .with_context(|| format!("expected ROW=STUDENT_CODE, got {entry}"))?;
    let row = row
        .trim()
        .parse::<usize>()
        .with_context(|| format!("invalid row index in {entry}"))?;
    Ok((row, code.trim()))
}

fn describe_outcome(outcome: &MatchOutcome, roster: &Roster) -> String {
    match outcome {
        MatchOutcome::Resolved(id) => roster
            .student(*id)
            .map(|student| format!("{} ({})", student.full_name(), student.student_code))
            .unwrap_or_else(|| id.to_string()),
        MatchOutcome::Ambiguous(candidates) => {
            format!("ambiguous, {} candidates", candidates.len())
        }
        MatchOutcome::NoMatch => "no match".to_string(),
    }
}
