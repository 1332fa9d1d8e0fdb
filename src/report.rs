use std::fmt::Write;

use crate::batch::{BatchReport, StudentGpa, StudentIssue};
use crate::models::AlertType;

#[derive(Debug, Clone, PartialEq)]
pub struct AlertTypeSummary {
    pub alert_type: AlertType,
    pub count: usize,
    pub share: f64,
}

pub fn summarize_by_type(report: &BatchReport) -> Vec<AlertTypeSummary> {
    let total: usize = report.alerts_by_type.values().sum();

    let mut summaries: Vec<AlertTypeSummary> = report
        .alerts_by_type
        .iter()
        .map(|(alert_type, count)| AlertTypeSummary {
            alert_type: *alert_type,
            count: *count,
            share: if total == 0 {
                0.0
            } else {
                *count as f64 / total as f64
            },
        })
        .collect();

    summaries.sort_by(|a, b| b.count.cmp(&a.count).then(a.alert_type.cmp(&b.alert_type)));
    summaries
}

fn write_issues(output: &mut String, issues: &[StudentIssue], empty: &str) {
    if issues.is_empty() {
        let _ = writeln!(output, "{empty}");
        return;
    }
    for issue in issues {
        match issue.offering_id {
            Some(offering_id) => {
                let _ = writeln!(
                    output,
                    "- student {} / offering {}: {}",
                    issue.student_id, offering_id, issue.message
                );
            }
            None => {
                let _ = writeln!(output, "- student {}: {}", issue.student_id, issue.message);
            }
        }
    }
}

pub fn build_report(report: &BatchReport) -> String {
    let summaries = summarize_by_type(report);
    let dispatch = &report.dispatch;

    let mut output = String::new();

    let _ = writeln!(output, "# Academic Alert Batch Report");
    let _ = writeln!(
        output,
        "Daily pass as of {} (ran {} to {})",
        report.as_of,
        report.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        report.finished_at.format("%H:%M:%S UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Run Summary");
    let _ = writeln!(
        output,
        "- Students processed: {} of {}",
        report.students_processed, report.students_total
    );
    let _ = writeln!(output, "- Alerts generated: {}", dispatch.alerts_generated);
    let _ = writeln!(output, "- Suppressed by dedup: {}", dispatch.suppressed_by_dedup);
    let _ = writeln!(output, "- No delivery target: {}", dispatch.no_delivery_target);
    let _ = writeln!(output, "- Notifications handed off: {}", dispatch.notifications_sent);
    let _ = writeln!(output, "- Handoff failures: {}", dispatch.handoff_failures);
    if dispatch.claim_conflicts > 0 {
        let _ = writeln!(output, "- Held by another run: {}", dispatch.claim_conflicts);
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Alert Mix");

    if summaries.is_empty() {
        let _ = writeln!(output, "No alerts generated for this run.");
    } else {
        for summary in summaries.iter() {
            let _ = writeln!(
                output,
                "- {}: {} ({:.0}%)",
                summary.alert_type,
                summary.count,
                summary.share * 100.0
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Data Integrity Follow-up");
    write_issues(
        &mut output,
        &report.data_integrity_errors,
        "No data integrity problems found.",
    );

    let _ = writeln!(output);
    let _ = writeln!(output, "## Failed Units");
    write_issues(&mut output, &report.failed_units, "Every student unit completed.");

    if !dispatch.errors.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Dispatch Errors");
        for error in dispatch.errors.iter() {
            let _ = writeln!(output, "- {error}");
        }
    }

    let mut lowest: Vec<(&StudentGpa, f64)> = report
        .student_gpas
        .iter()
        .filter_map(|gpa| gpa.cumulative_gpa.map(|cumulative| (gpa, cumulative.gpa4)))
        .collect();
    if !lowest.is_empty() {
        lowest.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        let _ = writeln!(output);
        let _ = writeln!(output, "## Lowest Cumulative GPAs");
        for (gpa, gpa4) in lowest.iter().take(10) {
            let _ = writeln!(output, "- student {}: {:.2}", gpa.student_id, gpa4);
        }
    }

    if !report.monday_friday_students.is_empty() {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Monday/Friday Absence Patterns");
        for student_id in report.monday_friday_students.iter().take(20) {
            let _ = writeln!(output, "- student {student_id}");
        }
    }

    output
}
