use std::fmt::Write;

use chrono::NaiveDate;

use crate::metrics::{compute_metrics, daily_trend, summarize_by_subject};
use crate::models::{AttendanceRecord, Student, SubjectConfig, SubjectLoss};

fn format_percentage(loss: &SubjectLoss) -> String {
    match loss.lost_percentage {
        Some(percentage) => format!("{percentage:.1}%"),
        None => "-".to_string(),
    }
}

pub fn build_report(
    school_name: &str,
    scope: Option<&str>,
    since: Option<NaiveDate>,
    history: &[AttendanceRecord],
    students: &[Student],
    subjects: &SubjectConfig,
) -> String {
    let metrics = compute_metrics(history, students, subjects);
    let trend = daily_trend(history);
    let subject_losses = summarize_by_subject(history, subjects);

    let mut output = String::new();
    let scope_label = scope.unwrap_or("all classes");

    let _ = writeln!(output, "# Attendance Report: {school_name}");
    match since {
        Some(cutoff) => {
            let _ = writeln!(output, "Generated for {} (records since {})", scope_label, cutoff);
        }
        None => {
            let _ = writeln!(output, "Generated for {} (full history)", scope_label);
        }
    }
    let _ = writeln!(output);
    let _ = writeln!(output, "## Overview");
    let _ = writeln!(output, "- Students: {}", metrics.total_students);
    let _ = writeln!(output, "- Attendance rate: {:.1}%", metrics.attendance_rate);
    let _ = writeln!(
        output,
        "- Chronic absenteeism: {:.1}%",
        metrics.chronic_absenteeism_rate
    );
    let _ = writeln!(
        output,
        "- Lost instructional time: {} min ({:.1} h)",
        metrics.lost_instructional_minutes,
        metrics.lost_instructional_minutes as f64 / 60.0
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Daily Trend");

    if trend.is_empty() {
        let _ = writeln!(output, "No attendance recorded for this window.");
    } else {
        for day in trend.iter() {
            let _ = writeln!(
                output,
                "- {}: {} present, {} late, {} absent or excused ({} records)",
                day.date, day.present, day.late, day.absent, day.total
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Students At Risk");

    if metrics.at_risk.is_empty() {
        let _ = writeln!(output, "No student is above the chronic absence threshold.");
    } else {
        for student in metrics.at_risk.iter() {
            let _ = writeln!(
                output,
                "- {} ({}) risk {} with {} absences across {} sessions{}",
                student.student_name,
                student.student_code,
                student.risk_score,
                student.absence_count,
                student.total_sessions,
                student
                    .parent_phone
                    .as_deref()
                    .map(|phone| format!(", guardian {phone}"))
                    .unwrap_or_default()
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Lost Instructional Time by Subject");

    if subject_losses.is_empty() {
        let _ = writeln!(output, "No attendance recorded for this window.");
    } else {
        for loss in subject_losses.iter() {
            let _ = writeln!(
                output,
                "- {}: {} min lost over {} records ({} absences), {} of expected hours",
                loss.subject,
                loss.lost_minutes,
                loss.records,
                loss.absences,
                format_percentage(loss)
            );
        }
    }

    output
}
