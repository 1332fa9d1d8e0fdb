//! Threshold rules that turn a student's metrics into alert events.
//!
//! Each rule looks at one [`StudentMetrics`] snapshot and emits at most one
//! [`AlertEvent`] per student, covering every offering that tripped it.
//! Rules know nothing about dedup or delivery.

use chrono::{DateTime, Utc};

use crate::config::EngineConfig;
use crate::models::{AlertEvent, AlertType, OfferingMetrics, StudentMetrics};

pub trait AlertRule: Send + Sync {
    fn alert_type(&self) -> AlertType;

    fn evaluate(&self, metrics: &StudentMetrics, now: DateTime<Utc>) -> Option<AlertEvent>;
}

/// An offering that tripped a rule, with the value that tripped it.
struct Hit<'a> {
    offering: &'a OfferingMetrics,
    value: f64,
    detail: String,
}

/// Folds per-offering hits into one event, reporting the worst value.
fn collect_hits(
    alert_type: AlertType,
    metrics: &StudentMetrics,
    threshold: f64,
    now: DateTime<Utc>,
    hits: Vec<Hit<'_>>,
    worst_is_lowest: bool,
) -> Option<AlertEvent> {
    let worst = hits.iter().max_by(|a, b| {
        let ord = a.value.partial_cmp(&b.value).unwrap_or(std::cmp::Ordering::Equal);
        if worst_is_lowest {
            ord.reverse()
        } else {
            ord
        }
    })?;
    let period_id = worst.offering.period_id.clone();
    let computed_value = worst.value;

    Some(AlertEvent {
        student_id: metrics.student_id,
        alert_type,
        period_id,
        computed_value,
        threshold_value: threshold,
        generated_at: now,
        offering_ids: hits.iter().map(|hit| hit.offering.offering_id).collect(),
        details: hits.into_iter().map(|hit| hit.detail).collect(),
    })
}

pub struct MissingAssignmentRule;

impl AlertRule for MissingAssignmentRule {
    fn alert_type(&self) -> AlertType {
        AlertType::MissingAssignment
    }

    fn evaluate(&self, metrics: &StudentMetrics, now: DateTime<Utc>) -> Option<AlertEvent> {
        let hits = metrics
            .offerings
            .iter()
            .filter(|offering| !offering.missing_assignments.is_empty())
            .map(|offering| Hit {
                offering,
                value: offering.missing_assignments.len() as f64,
                detail: format!(
                    "{}: {}",
                    offering.offering_name,
                    offering
                        .missing_assignments
                        .iter()
                        .map(|m| {
                            format!(
                                "{} (due {}, {}d overdue)",
                                m.assignment_name, m.due_date, m.days_overdue
                            )
                        })
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            })
            .collect::<Vec<_>>();

        let total: usize = metrics
            .offerings
            .iter()
            .map(|offering| offering.missing_assignments.len())
            .sum();

        let mut event = collect_hits(self.alert_type(), metrics, 1.0, now, hits, false)?;
        event.computed_value = total as f64;
        Some(event)
    }
}

pub struct FailingGradeRule {
    pub floor: f64,
}

impl AlertRule for FailingGradeRule {
    fn alert_type(&self) -> AlertType {
        AlertType::FailingGrade
    }

    fn evaluate(&self, metrics: &StudentMetrics, now: DateTime<Utc>) -> Option<AlertEvent> {
        let hits = metrics
            .offerings
            .iter()
            .filter_map(|offering| {
                let grade = offering.grade.as_ref()?;
                (grade.percentage < self.floor).then(|| Hit {
                    offering,
                    value: grade.percentage,
                    detail: format!(
                        "{}: {:.1}% ({})",
                        offering.offering_name, grade.percentage, grade.letter
                    ),
                })
            })
            .collect();
        collect_hits(self.alert_type(), metrics, self.floor, now, hits, true)
    }
}

pub struct ChronicLowAttendanceRule {
    pub rate: f64,
}

impl AlertRule for ChronicLowAttendanceRule {
    fn alert_type(&self) -> AlertType {
        AlertType::ChronicLowAttendance
    }

    fn evaluate(&self, metrics: &StudentMetrics, now: DateTime<Utc>) -> Option<AlertEvent> {
        let hits = metrics
            .offerings
            .iter()
            .filter_map(|offering| {
                let attendance = offering.attendance.as_ref()?;
                let rate = attendance.rate?;
                attendance.chronic_low_attendance.then(|| Hit {
                    offering,
                    value: rate,
                    detail: format!(
                        "{}: {:.1}% attendance over {} meeting days",
                        offering.offering_name,
                        rate * 100.0,
                        attendance.total_days
                    ),
                })
            })
            .collect();
        collect_hits(self.alert_type(), metrics, self.rate, now, hits, true)
    }
}

pub struct ConsecutiveAbsenceRule {
    pub threshold: usize,
}

impl AlertRule for ConsecutiveAbsenceRule {
    fn alert_type(&self) -> AlertType {
        AlertType::ConsecutiveAbsence
    }

    fn evaluate(&self, metrics: &StudentMetrics, now: DateTime<Utc>) -> Option<AlertEvent> {
        let hits = metrics
            .offerings
            .iter()
            .filter_map(|offering| {
                let attendance = offering.attendance.as_ref()?;
                attendance.consecutive_absence.then(|| Hit {
                    offering,
                    value: attendance.trailing_absence_streak as f64,
                    detail: format!(
                        "{}: {} consecutive absences",
                        offering.offering_name, attendance.trailing_absence_streak
                    ),
                })
            })
            .collect();
        collect_hits(self.alert_type(), metrics, self.threshold as f64, now, hits, false)
    }
}

pub struct RecurringTardinessRule {
    pub threshold: usize,
}

impl AlertRule for RecurringTardinessRule {
    fn alert_type(&self) -> AlertType {
        AlertType::RecurringTardiness
    }

    fn evaluate(&self, metrics: &StudentMetrics, now: DateTime<Utc>) -> Option<AlertEvent> {
        let hits = metrics
            .offerings
            .iter()
            .filter_map(|offering| {
                let attendance = offering.attendance.as_ref()?;
                attendance.recurring_tardiness.then(|| Hit {
                    offering,
                    value: attendance.tardy_days as f64,
                    detail: format!(
                        "{}: tardy {} of {} meeting days",
                        offering.offering_name, attendance.tardy_days, attendance.total_days
                    ),
                })
            })
            .collect();
        collect_hits(self.alert_type(), metrics, self.threshold as f64, now, hits, false)
    }
}

/// The fixed rule set, parameterized from config.
pub struct RuleEvaluator {
    rules: Vec<Box<dyn AlertRule>>,
}

impl RuleEvaluator {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            rules: vec![
                Box::new(MissingAssignmentRule),
                Box::new(FailingGradeRule {
                    floor: config.failing_grade_floor,
                }),
                Box::new(ChronicLowAttendanceRule {
                    rate: config.low_attendance_rate,
                }),
                Box::new(ConsecutiveAbsenceRule {
                    threshold: config.consecutive_absence_threshold.max(0) as usize,
                }),
                Box::new(RecurringTardinessRule {
                    threshold: config.tardiness_threshold.max(0) as usize,
                }),
            ],
        }
    }

    pub fn evaluate(&self, metrics: &StudentMetrics, now: DateTime<Utc>) -> Vec<AlertEvent> {
        let events: Vec<AlertEvent> = self
            .rules
            .iter()
            .filter_map(|rule| rule.evaluate(metrics, now))
            .collect();

        if !events.is_empty() {
            tracing::debug!(
                student_id = %metrics.student_id,
                alerts = events.len(),
                "Rules fired"
            );
        }
        events
    }
}
