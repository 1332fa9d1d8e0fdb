use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub struct GradeRecord {
    pub student_id: Uuid,
    pub offering_id: Uuid,
    pub assignment_id: Uuid,
    pub assignment_name: String,
    pub category: String,
    pub category_weight: f64,
    pub points_earned: Option<f64>,
    pub max_points: f64,
    pub due_date: NaiveDate,
    /// Turned in but possibly not graded yet.
    pub submitted: bool,
    pub excused: bool,
}

impl GradeRecord {
    pub fn is_graded(&self) -> bool {
        self.points_earned.is_some() && !self.excused
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttendanceStatus {
    Present,
    Absent,
    Tardy,
    Excused,
}

impl AttendanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Present => "present",
            Self::Absent => "absent",
            Self::Tardy => "tardy",
            Self::Excused => "excused",
        }
    }
}

impl FromStr for AttendanceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "present" | "p" => Ok(Self::Present),
            "absent" | "a" => Ok(Self::Absent),
            "tardy" | "t" => Ok(Self::Tardy),
            "excused" | "e" => Ok(Self::Excused),
            other => Err(format!("unknown attendance status: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AttendanceRecord {
    pub student_id: Uuid,
    pub offering_id: Uuid,
    pub date: NaiveDate,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone)]
pub struct Enrollment {
    pub student_id: Uuid,
    pub offering_id: Uuid,
    pub period_id: String,
    pub period_start: NaiveDate,
    pub period_end: NaiveDate,
}

impl Enrollment {
    pub fn is_active_on(&self, date: NaiveDate) -> bool {
        self.period_start <= date && date <= self.period_end
    }
}

#[derive(Debug, Clone)]
pub struct Offering {
    pub offering_id: Uuid,
    pub name: String,
    pub credit_hours: f64,
    pub schedule: MeetingSchedule,
}

/// Days an offering actually meets.
#[derive(Debug, Clone, Default)]
pub struct MeetingSchedule {
    pub weekdays: Vec<Weekday>,
    pub non_meeting_dates: BTreeSet<NaiveDate>,
}

impl MeetingSchedule {
    pub fn weekdays(weekdays: &[Weekday]) -> Self {
        Self {
            weekdays: weekdays.to_vec(),
            non_meeting_dates: BTreeSet::new(),
        }
    }

    pub fn meets_on(&self, date: NaiveDate) -> bool {
        self.weekdays.contains(&date.weekday()) && !self.non_meeting_dates.contains(&date)
    }
}

/// Inclusive date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DateWindow {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateWindow {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// The `days` days ending on `end`, inclusive. Saturates at the
    /// earliest representable date.
    pub fn trailing(end: NaiveDate, days: i64) -> Self {
        let back = chrono::Days::new(days.max(1) as u64 - 1);
        Self {
            start: end.checked_sub_days(back).unwrap_or(NaiveDate::MIN),
            end,
        }
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start <= date && date <= self.end
    }

    pub fn clip(&self, start: NaiveDate, end: NaiveDate) -> Option<Self> {
        let clipped = Self {
            start: self.start.max(start),
            end: self.end.min(end),
        };
        (clipped.start <= clipped.end).then_some(clipped)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    MissingAssignment,
    FailingGrade,
    ChronicLowAttendance,
    ConsecutiveAbsence,
    RecurringTardiness,
}

impl AlertType {
    pub const ALL: [AlertType; 5] = [
        AlertType::MissingAssignment,
        AlertType::FailingGrade,
        AlertType::ChronicLowAttendance,
        AlertType::ConsecutiveAbsence,
        AlertType::RecurringTardiness,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingAssignment => "missing_assignment",
            Self::FailingGrade => "failing_grade",
            Self::ChronicLowAttendance => "chronic_low_attendance",
            Self::ConsecutiveAbsence => "consecutive_absence",
            Self::RecurringTardiness => "recurring_tardiness",
        }
    }
}

impl fmt::Display for AlertType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AlertType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|alert_type| alert_type.as_str() == s)
            .ok_or_else(|| format!("unknown alert type: {s}"))
    }
}

/// A rule firing for one student. Lives only for the batch run that made it.
#[derive(Debug, Clone, Serialize)]
pub struct AlertEvent {
    pub student_id: Uuid,
    pub alert_type: AlertType,
    pub period_id: String,
    pub computed_value: f64,
    pub threshold_value: f64,
    pub generated_at: DateTime<Utc>,
    pub offering_ids: Vec<Uuid>,
    pub details: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DispatchRecord {
    pub student_id: Uuid,
    pub alert_type: AlertType,
    /// `None` when the row was claimed but nothing was ever handed off.
    pub last_sent_at: Option<DateTime<Utc>>,
    pub claimed_until: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardianLink {
    pub student_id: Uuid,
    pub guardian_id: Uuid,
}

/// A successful handoff, kept for user-visible history only.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationLogEntry {
    pub handoff_id: String,
    pub student_id: Uuid,
    pub guardian_id: Uuid,
    pub alert_type: AlertType,
    pub sent_at: DateTime<Utc>,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CategoryScore {
    pub category: String,
    pub weight: f64,
    pub points_earned: f64,
    pub max_points: f64,
    pub graded_count: usize,
}

impl CategoryScore {
    pub fn percentage(&self) -> f64 {
        self.points_earned / self.max_points * 100.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OfferingGrade {
    pub offering_id: Uuid,
    pub percentage: f64,
    pub letter: &'static str,
    pub categories: Vec<CategoryScore>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Gpa {
    pub gpa4: f64,
    pub gpa_percent: f64,
    pub offering_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MissingAssignment {
    pub offering_id: Uuid,
    pub assignment_id: Uuid,
    pub assignment_name: String,
    pub due_date: NaiveDate,
    pub days_overdue: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRate {
    pub rate: f64,
    pub total_days: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PatternResult {
    /// `None` when the offering did not meet inside the window.
    pub rate: Option<f64>,
    pub total_days: usize,
    pub present_days: usize,
    pub absent_days: usize,
    pub tardy_days: usize,
    pub excused_days: usize,
    pub longest_absence_streak: usize,
    pub trailing_absence_streak: usize,
    /// Absences per weekday, Monday first.
    pub absences_by_weekday: [usize; 7],
    pub chronic_low_attendance: bool,
    pub consecutive_absence: bool,
    pub recurring_tardiness: bool,
    pub monday_friday_absences: bool,
}

/// Everything the rule evaluator needs to know about one offering.
#[derive(Debug, Clone)]
pub struct OfferingMetrics {
    pub offering_id: Uuid,
    pub offering_name: String,
    pub period_id: String,
    /// `None` is "no graded work yet", not a failing grade.
    pub grade: Option<OfferingGrade>,
    pub attendance: Option<PatternResult>,
    pub missing_assignments: Vec<MissingAssignment>,
}

#[derive(Debug, Clone)]
pub struct StudentMetrics {
    pub student_id: Uuid,
    pub as_of: NaiveDate,
    pub offerings: Vec<OfferingMetrics>,
    pub period_gpa: Vec<(String, Option<Gpa>)>,
    pub cumulative_gpa: Option<Gpa>,
}
