use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{Datelike, NaiveDate, Weekday};
use uuid::Uuid;

use crate::config::EngineConfig;
use crate::error::{MetricError, MetricResult};
use crate::models::{
    AttendanceRate, AttendanceRecord, AttendanceStatus, DateWindow, MeetingSchedule,
    PatternResult,
};
use crate::store::MetricStore;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttendanceThresholds {
    pub low_attendance_rate: f64,
    pub low_attendance_min_sample: usize,
    pub consecutive_absence_threshold: usize,
    pub tardiness_threshold: usize,
    pub tardiness_min_sample: usize,
}

impl Default for AttendanceThresholds {
    fn default() -> Self {
        Self::from(&EngineConfig::default())
    }
}

impl From<&EngineConfig> for AttendanceThresholds {
    fn from(config: &EngineConfig) -> Self {
        Self {
            low_attendance_rate: config.low_attendance_rate,
            low_attendance_min_sample: config.low_attendance_min_sample.max(0) as usize,
            consecutive_absence_threshold: config.consecutive_absence_threshold.max(0) as usize,
            tardiness_threshold: config.tardiness_threshold.max(0) as usize,
            tardiness_min_sample: config.tardiness_min_sample.max(0) as usize,
        }
    }
}

/// Keeps records inside `window`, oldest first, and rejects anything that
/// could not have been taken on a real meeting day.
fn meeting_day_records<'a>(
    records: &'a [AttendanceRecord],
    schedule: &MeetingSchedule,
    window: DateWindow,
) -> MetricResult<Vec<&'a AttendanceRecord>> {
    let mut kept: Vec<&AttendanceRecord> = records
        .iter()
        .filter(|record| window.contains(record.date))
        .collect();
    kept.sort_by_key(|record| record.date);

    let mut seen = BTreeSet::new();
    for record in &kept {
        if !schedule.meets_on(record.date) {
            return Err(MetricError::integrity(format!(
                "attendance on {} ({}) falls outside the offering's meeting days",
                record.date,
                record.date.weekday()
            )));
        }
        if !seen.insert(record.date) {
            return Err(MetricError::integrity(format!(
                "more than one attendance record on {}",
                record.date
            )));
        }
    }

    Ok(kept)
}

/// `(present + tardy) / meeting days` over the window.
pub fn attendance_rate(
    records: &[AttendanceRecord],
    schedule: &MeetingSchedule,
    window: DateWindow,
) -> MetricResult<AttendanceRate> {
    let kept = meeting_day_records(records, schedule, window)?;
    if kept.is_empty() {
        return Err(MetricError::no_data("offering did not meet in the window"));
    }

    let attended = kept
        .iter()
        .filter(|record| {
            matches!(
                record.status,
                AttendanceStatus::Present | AttendanceStatus::Tardy
            )
        })
        .count();

    Ok(AttendanceRate {
        rate: attended as f64 / kept.len() as f64,
        total_days: kept.len(),
    })
}

/// Longest and trailing runs of `Absent`. Any other status ends a run.
pub fn absence_streaks(statuses: &[AttendanceStatus]) -> (usize, usize) {
    let mut longest = 0;
    let mut current = 0;
    for status in statuses {
        if *status == AttendanceStatus::Absent {
            current += 1;
            longest = longest.max(current);
        } else {
            current = 0;
        }
    }
    (longest, current)
}

pub fn detect_patterns(
    records: &[AttendanceRecord],
    schedule: &MeetingSchedule,
    window: DateWindow,
    thresholds: &AttendanceThresholds,
) -> MetricResult<PatternResult> {
    let kept = meeting_day_records(records, schedule, window)?;
    let mut result = PatternResult {
        total_days: kept.len(),
        ..PatternResult::default()
    };

    for record in &kept {
        match record.status {
            AttendanceStatus::Present => result.present_days += 1,
            AttendanceStatus::Tardy => result.tardy_days += 1,
            AttendanceStatus::Excused => result.excused_days += 1,
            AttendanceStatus::Absent => {
                result.absent_days += 1;
                let weekday = record.date.weekday().num_days_from_monday() as usize;
                result.absences_by_weekday[weekday] += 1;
            }
        }
    }

    let statuses: Vec<AttendanceStatus> = kept.iter().map(|record| record.status).collect();
    let (longest, trailing) = absence_streaks(&statuses);
    result.longest_absence_streak = longest;
    result.trailing_absence_streak = trailing;

    if result.total_days > 0 {
        let rate = (result.present_days + result.tardy_days) as f64 / result.total_days as f64;
        result.rate = Some(rate);
        result.chronic_low_attendance = rate < thresholds.low_attendance_rate
            && result.total_days >= thresholds.low_attendance_min_sample;
    }

    result.consecutive_absence = trailing >= thresholds.consecutive_absence_threshold;
    result.recurring_tardiness = result.tardy_days >= thresholds.tardiness_threshold
        && result.total_days >= thresholds.tardiness_min_sample;

    let mon_fri = result.absences_by_weekday[Weekday::Mon.num_days_from_monday() as usize]
        + result.absences_by_weekday[Weekday::Fri.num_days_from_monday() as usize];
    result.monday_friday_absences = result.absent_days >= 3 && mon_fri * 2 > result.absent_days;

    Ok(result)
}

pub struct AttendanceAnalyzer {
    store: Arc<dyn MetricStore>,
    thresholds: AttendanceThresholds,
}

impl AttendanceAnalyzer {
    pub fn new(store: Arc<dyn MetricStore>, thresholds: AttendanceThresholds) -> Self {
        Self { store, thresholds }
    }

    async fn load(
        &self,
        student_id: Uuid,
        offering_id: Uuid,
        window: DateWindow,
    ) -> MetricResult<(Vec<AttendanceRecord>, MeetingSchedule)> {
        let offering = self
            .store
            .offering(offering_id)
            .await?
            .ok_or(MetricError::UnknownOffering(offering_id))?;
        let records = self
            .store
            .attendance_records(student_id, offering_id, window)
            .await?;
        Ok((records, offering.schedule))
    }

    pub async fn compute_attendance_rate(
        &self,
        student_id: Uuid,
        offering_id: Uuid,
        window: DateWindow,
    ) -> MetricResult<AttendanceRate> {
        let (records, schedule) = self.load(student_id, offering_id, window).await?;
        attendance_rate(&records, &schedule, window)
    }

    pub async fn detect_patterns(
        &self,
        student_id: Uuid,
        offering_id: Uuid,
        window: DateWindow,
    ) -> MetricResult<PatternResult> {
        let (records, schedule) = self.load(student_id, offering_id, window).await?;
        detect_patterns(&records, &schedule, window, &self.thresholds)
    }
}

/// Dates in `window` the offering meets on, for callers building reports.
pub fn meeting_days(schedule: &MeetingSchedule, window: DateWindow) -> Vec<NaiveDate> {
    window
        .start
        .iter_days()
        .take_while(|day| *day <= window.end)
        .filter(|day| schedule.meets_on(*day))
        .collect()
}
