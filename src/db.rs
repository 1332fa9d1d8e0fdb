use std::collections::BTreeSet;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::{
    AlertType, AttendanceRecord, AttendanceStatus, DateWindow, DispatchRecord, Enrollment,
    GradeRecord, GuardianLink, MeetingSchedule, NotificationLogEntry, Offering,
};
use crate::store::{DispatchLedger, MetricStore, NotificationHistory};

const WEEKDAYS: [Weekday; 7] = [
    Weekday::Mon,
    Weekday::Tue,
    Weekday::Wed,
    Weekday::Thu,
    Weekday::Fri,
    Weekday::Sat,
    Weekday::Sun,
];

fn weekday_from_index(index: i16) -> anyhow::Result<Weekday> {
    usize::try_from(index)
        .ok()
        .and_then(|i| WEEKDAYS.get(i).copied())
        .with_context(|| format!("invalid meeting day index {index}"))
}

/// Parses `mon;wed;fri` style meeting day lists.
fn parse_weekdays(value: &str) -> anyhow::Result<Vec<Weekday>> {
    value
        .split(';')
        .map(str::trim)
        .filter(|day| !day.is_empty())
        .map(|day| {
            day.parse::<Weekday>()
                .map_err(|_| anyhow::anyhow!("invalid weekday: {day}"))
        })
        .collect()
}

fn parse_dates(value: &str) -> anyhow::Result<Vec<NaiveDate>> {
    value
        .split(';')
        .map(str::trim)
        .filter(|day| !day.is_empty())
        .map(|day| {
            NaiveDate::parse_from_str(day, "%Y-%m-%d")
                .with_context(|| format!("invalid date: {day}"))
        })
        .collect()
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn offering_from_row(row: &PgRow) -> anyhow::Result<Offering> {
    let days: Vec<i16> = row.try_get("meeting_days")?;
    let non_meeting: Vec<NaiveDate> = row.try_get("non_meeting_dates")?;
    Ok(Offering {
        offering_id: row.try_get("id")?,
        name: row.try_get("name")?,
        credit_hours: row.try_get("credit_hours")?,
        schedule: MeetingSchedule {
            weekdays: days
                .into_iter()
                .map(weekday_from_index)
                .collect::<anyhow::Result<_>>()?,
            non_meeting_dates: non_meeting.into_iter().collect::<BTreeSet<_>>(),
        },
    })
}

fn enrollment_from_row(row: &PgRow) -> anyhow::Result<Enrollment> {
    Ok(Enrollment {
        student_id: row.try_get("student_id")?,
        offering_id: row.try_get("offering_id")?,
        period_id: row.try_get("period_id")?,
        period_start: row.try_get("period_start")?,
        period_end: row.try_get("period_end")?,
    })
}

fn dispatch_from_row(row: &PgRow) -> anyhow::Result<DispatchRecord> {
    let alert_type: String = row.try_get("alert_type")?;
    Ok(DispatchRecord {
        student_id: row.try_get("student_id")?,
        alert_type: alert_type.parse().map_err(anyhow::Error::msg)?,
        last_sent_at: row.try_get("last_sent_at")?,
        claimed_until: row.try_get("claimed_until")?,
    })
}

#[async_trait]
impl MetricStore for PgStore {
    async fn offering(&self, offering_id: Uuid) -> anyhow::Result<Option<Offering>> {
        let row = sqlx::query(
            "SELECT id, name, credit_hours, meeting_days, non_meeting_dates \
             FROM academic_alerts.offerings WHERE id = $1",
        )
        .bind(offering_id)
        .fetch_optional(&self.pool)
        .await
        .context("failed to load offering")?;

        row.as_ref().map(offering_from_row).transpose()
    }

    async fn enrollments_for_student(&self, student_id: Uuid) -> anyhow::Result<Vec<Enrollment>> {
        let rows = sqlx::query(
            "SELECT student_id, offering_id, period_id, period_start, period_end \
             FROM academic_alerts.enrollments WHERE student_id = $1 \
             ORDER BY period_start, offering_id",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load enrollments")?;

        rows.iter().map(enrollment_from_row).collect()
    }

    async fn active_enrollments(&self, as_of: NaiveDate) -> anyhow::Result<Vec<Enrollment>> {
        let rows = sqlx::query(
            "SELECT student_id, offering_id, period_id, period_start, period_end \
             FROM academic_alerts.enrollments \
             WHERE period_start <= $1 AND period_end >= $1",
        )
        .bind(as_of)
        .fetch_all(&self.pool)
        .await
        .context("failed to load active enrollments")?;

        rows.iter().map(enrollment_from_row).collect()
    }

    async fn grade_records(
        &self,
        student_id: Uuid,
        offering_id: Uuid,
    ) -> anyhow::Result<Vec<GradeRecord>> {
        let rows = sqlx::query(
            "SELECT student_id, offering_id, assignment_id, assignment_name, category, \
             category_weight, points_earned, max_points, due_date, submitted, excused \
             FROM academic_alerts.grade_records \
             WHERE student_id = $1 AND offering_id = $2 \
             ORDER BY due_date",
        )
        .bind(student_id)
        .bind(offering_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load grade records")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(GradeRecord {
                student_id: row.get("student_id"),
                offering_id: row.get("offering_id"),
                assignment_id: row.get("assignment_id"),
                assignment_name: row.get("assignment_name"),
                category: row.get("category"),
                category_weight: row.get("category_weight"),
                points_earned: row.get("points_earned"),
                max_points: row.get("max_points"),
                due_date: row.get("due_date"),
                submitted: row.get("submitted"),
                excused: row.get("excused"),
            });
        }
        Ok(records)
    }

    async fn attendance_records(
        &self,
        student_id: Uuid,
        offering_id: Uuid,
        window: DateWindow,
    ) -> anyhow::Result<Vec<AttendanceRecord>> {
        let rows = sqlx::query(
            "SELECT student_id, offering_id, date, status \
             FROM academic_alerts.attendance_records \
             WHERE student_id = $1 AND offering_id = $2 AND date >= $3 AND date <= $4 \
             ORDER BY date",
        )
        .bind(student_id)
        .bind(offering_id)
        .bind(window.start)
        .bind(window.end)
        .fetch_all(&self.pool)
        .await
        .context("failed to load attendance")?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let status: String = row.get("status");
            records.push(AttendanceRecord {
                student_id: row.get("student_id"),
                offering_id: row.get("offering_id"),
                date: row.get("date"),
                status: status.parse().map_err(anyhow::Error::msg)?,
            });
        }
        Ok(records)
    }

    async fn guardians_for_student(&self, student_id: Uuid) -> anyhow::Result<Vec<GuardianLink>> {
        let rows = sqlx::query(
            "SELECT student_id, guardian_id FROM academic_alerts.guardian_links \
             WHERE student_id = $1 ORDER BY guardian_id",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .context("failed to load guardian links")?;

        Ok(rows
            .into_iter()
            .map(|row| GuardianLink {
                student_id: row.get("student_id"),
                guardian_id: row.get("guardian_id"),
            })
            .collect())
    }
}

#[async_trait]
impl DispatchLedger for PgStore {
    async fn dispatch_record(
        &self,
        student_id: Uuid,
        alert_type: AlertType,
    ) -> anyhow::Result<Option<DispatchRecord>> {
        let row = sqlx::query(
            "SELECT student_id, alert_type, last_sent_at, claimed_until \
             FROM academic_alerts.dispatch_records \
             WHERE student_id = $1 AND alert_type = $2",
        )
        .bind(student_id)
        .bind(alert_type.as_str())
        .fetch_optional(&self.pool)
        .await
        .context("failed to load dispatch record")?;

        row.as_ref().map(dispatch_from_row).transpose()
    }

    async fn claim(
        &self,
        student_id: Uuid,
        alert_type: AlertType,
        expected_last_sent: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        claimed_until: DateTime<Utc>,
    ) -> anyhow::Result<bool> {
        // Single statement: either inserts a fresh claimed row or takes the
        // claim on the existing one, but only if nobody moved last_sent_at
        // since we read it and no live claim exists.
        let claimed = sqlx::query(
            r#"
            INSERT INTO academic_alerts.dispatch_records AS d
            (student_id, alert_type, last_sent_at, claimed_until)
            VALUES ($1, $2, NULL, $5)
            ON CONFLICT (student_id, alert_type) DO UPDATE
            SET claimed_until = EXCLUDED.claimed_until
            WHERE d.last_sent_at IS NOT DISTINCT FROM $3
              AND (d.claimed_until IS NULL OR d.claimed_until <= $4)
            RETURNING d.student_id
            "#,
        )
        .bind(student_id)
        .bind(alert_type.as_str())
        .bind(expected_last_sent)
        .bind(now)
        .bind(claimed_until)
        .fetch_optional(&self.pool)
        .await
        .context("failed to claim dispatch record")?;

        Ok(claimed.is_some())
    }

    async fn complete(
        &self,
        student_id: Uuid,
        alert_type: AlertType,
        sent_at: DateTime<Utc>,
    ) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE academic_alerts.dispatch_records \
             SET last_sent_at = $3, claimed_until = NULL \
             WHERE student_id = $1 AND alert_type = $2",
        )
        .bind(student_id)
        .bind(alert_type.as_str())
        .bind(sent_at)
        .execute(&self.pool)
        .await
        .context("failed to record dispatch")?;
        Ok(())
    }

    async fn release(&self, student_id: Uuid, alert_type: AlertType) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE academic_alerts.dispatch_records SET claimed_until = NULL \
             WHERE student_id = $1 AND alert_type = $2",
        )
        .bind(student_id)
        .bind(alert_type.as_str())
        .execute(&self.pool)
        .await
        .context("failed to release dispatch claim")?;
        Ok(())
    }
}

#[async_trait]
impl NotificationHistory for PgStore {
    async fn record_handoff(&self, entry: &NotificationLogEntry) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO academic_alerts.notification_log
            (handoff_id, student_id, guardian_id, alert_type, sent_at, payload)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (handoff_id) DO NOTHING
            "#,
        )
        .bind(&entry.handoff_id)
        .bind(entry.student_id)
        .bind(entry.guardian_id)
        .bind(entry.alert_type.as_str())
        .bind(entry.sent_at)
        .bind(&entry.payload)
        .execute(&self.pool)
        .await
        .context("failed to write notification log")?;
        Ok(())
    }
}

async fn upsert_offering(pool: &PgPool, offering: &Offering) -> anyhow::Result<()> {
    let days: Vec<i16> = offering
        .schedule
        .weekdays
        .iter()
        .map(|day| day.num_days_from_monday() as i16)
        .collect();
    let non_meeting: Vec<NaiveDate> = offering.schedule.non_meeting_dates.iter().copied().collect();

    sqlx::query(
        r#"
        INSERT INTO academic_alerts.offerings
        (id, name, credit_hours, meeting_days, non_meeting_dates)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (id) DO UPDATE
        SET name = EXCLUDED.name,
            credit_hours = EXCLUDED.credit_hours,
            meeting_days = EXCLUDED.meeting_days,
            non_meeting_dates = EXCLUDED.non_meeting_dates
        "#,
    )
    .bind(offering.offering_id)
    .bind(&offering.name)
    .bind(offering.credit_hours)
    .bind(days)
    .bind(non_meeting)
    .execute(pool)
    .await?;
    Ok(())
}

async fn upsert_enrollment(pool: &PgPool, enrollment: &Enrollment) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO academic_alerts.enrollments
        (student_id, offering_id, period_id, period_start, period_end)
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (student_id, offering_id, period_id) DO UPDATE
        SET period_start = EXCLUDED.period_start, period_end = EXCLUDED.period_end
        "#,
    )
    .bind(enrollment.student_id)
    .bind(enrollment.offering_id)
    .bind(&enrollment.period_id)
    .bind(enrollment.period_start)
    .bind(enrollment.period_end)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

async fn upsert_grade(pool: &PgPool, record: &GradeRecord) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO academic_alerts.grade_records
        (student_id, offering_id, assignment_id, assignment_name, category, category_weight,
         points_earned, max_points, due_date, submitted, excused)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (student_id, assignment_id) DO UPDATE
        SET assignment_name = EXCLUDED.assignment_name,
            category = EXCLUDED.category,
            category_weight = EXCLUDED.category_weight,
            points_earned = EXCLUDED.points_earned,
            max_points = EXCLUDED.max_points,
            due_date = EXCLUDED.due_date,
            submitted = EXCLUDED.submitted,
            excused = EXCLUDED.excused
        "#,
    )
    .bind(record.student_id)
    .bind(record.offering_id)
    .bind(record.assignment_id)
    .bind(&record.assignment_name)
    .bind(&record.category)
    .bind(record.category_weight)
    .bind(record.points_earned)
    .bind(record.max_points)
    .bind(record.due_date)
    .bind(record.submitted)
    .bind(record.excused)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

async fn upsert_attendance(pool: &PgPool, record: &AttendanceRecord) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO academic_alerts.attendance_records (student_id, offering_id, date, status)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (student_id, offering_id, date) DO UPDATE
        SET status = EXCLUDED.status
        "#,
    )
    .bind(record.student_id)
    .bind(record.offering_id)
    .bind(record.date)
    .bind(record.status.as_str())
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

async fn link_guardian(pool: &PgPool, link: &GuardianLink) -> anyhow::Result<u64> {
    let result = sqlx::query(
        r#"
        INSERT INTO academic_alerts.guardian_links (student_id, guardian_id)
        VALUES ($1, $2)
        ON CONFLICT DO NOTHING
        "#,
    )
    .bind(link.student_id)
    .bind(link.guardian_id)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let biology = Uuid::parse_str("6f1c2a8e-4b7d-4f0e-9a51-0c3d2e7b9a10")?;
    let algebra = Uuid::parse_str("b2e4c6d8-1a3f-4c5e-8d7b-9f0a1b2c3d4e")?;
    let avery = Uuid::parse_str("3d7f5d6f-24f7-4e8e-8b4b-3e7e44b4a7b2")?;
    let jules = Uuid::parse_str("0c22f1f1-9184-4fd4-9b21-28c68a6a89dc")?;

    let holiday = NaiveDate::from_ymd_opt(2026, 2, 16).context("invalid date")?;
    let offerings = vec![
        Offering {
            offering_id: biology,
            name: "Biology 101".to_string(),
            credit_hours: 1.0,
            schedule: MeetingSchedule {
                weekdays: vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri],
                non_meeting_dates: BTreeSet::from([holiday]),
            },
        },
        Offering {
            offering_id: algebra,
            name: "Algebra II".to_string(),
            credit_hours: 1.0,
            schedule: MeetingSchedule::weekdays(&[Weekday::Mon, Weekday::Wed, Weekday::Fri]),
        },
    ];
    for offering in &offerings {
        upsert_offering(pool, offering).await?;
    }

    let period_start = NaiveDate::from_ymd_opt(2025, 9, 2).context("invalid date")?;
    let period_end = NaiveDate::from_ymd_opt(2026, 6, 12).context("invalid date")?;
    for student_id in [avery, jules] {
        for offering in &offerings {
            upsert_enrollment(
                pool,
                &Enrollment {
                    student_id,
                    offering_id: offering.offering_id,
                    period_id: "2025-2026".to_string(),
                    period_start,
                    period_end,
                },
            )
            .await?;
        }
    }

    for (student_id, guardian) in [
        (avery, "9a8b7c6d-5e4f-4a3b-8c2d-1e0f9a8b7c6d"),
        (avery, "1f2e3d4c-5b6a-4978-8a1b-2c3d4e5f6a7b"),
        (jules, "7c6b5a49-3827-4160-9f8e-7d6c5b4a3928"),
    ] {
        link_guardian(
            pool,
            &GuardianLink {
                student_id,
                guardian_id: Uuid::parse_str(guardian)?,
            },
        )
        .await?;
    }

    let grades = vec![
        (avery, biology, "Unit 1 test", "Tests", 0.4, Some(92.0), 100.0, (2026, 1, 23)),
        (avery, biology, "Lab report 2", "Labs", 0.3, None, 20.0, (2026, 2, 6)),
        (avery, algebra, "Quiz 4", "Quizzes", 0.3, Some(61.0), 100.0, (2026, 1, 30)),
        (avery, algebra, "Midterm", "Tests", 0.7, Some(64.0), 100.0, (2026, 2, 11)),
        (jules, biology, "Unit 1 test", "Tests", 0.4, Some(85.0), 100.0, (2026, 1, 23)),
        (jules, algebra, "Quiz 4", "Quizzes", 0.3, Some(18.0), 20.0, (2026, 1, 30)),
    ];
    for (index, (student_id, offering_id, name, category, weight, earned, max, due)) in
        grades.into_iter().enumerate()
    {
        upsert_grade(
            pool,
            &GradeRecord {
                student_id,
                offering_id,
                assignment_id: Uuid::from_u128(0x5eed_0000 + index as u128),
                assignment_name: name.to_string(),
                category: category.to_string(),
                category_weight: weight,
                points_earned: earned,
                max_points: max,
                due_date: NaiveDate::from_ymd_opt(due.0, due.1, due.2).context("invalid date")?,
                submitted: earned.is_some(),
                excused: false,
            },
        )
        .await?;
    }

    // Avery misses the last three Biology days; Jules is late most Mondays.
    let start = NaiveDate::from_ymd_opt(2026, 1, 26).context("invalid date")?;
    let end = NaiveDate::from_ymd_opt(2026, 2, 27).context("invalid date")?;
    for offering in &offerings {
        let days: Vec<NaiveDate> = start
            .iter_days()
            .take_while(|day| *day <= end)
            .filter(|day| offering.schedule.meets_on(*day))
            .collect();
        let last = days.len();
        for (index, day) in days.into_iter().enumerate() {
            let avery_status = if offering.offering_id == biology && index + 3 >= last {
                AttendanceStatus::Absent
            } else {
                AttendanceStatus::Present
            };
            let jules_status = if day.weekday() == Weekday::Mon {
                AttendanceStatus::Tardy
            } else {
                AttendanceStatus::Present
            };
            for (student_id, status) in [(avery, avery_status), (jules, jules_status)] {
                upsert_attendance(
                    pool,
                    &AttendanceRecord {
                        student_id,
                        offering_id: offering.offering_id,
                        date: day,
                        status,
                    },
                )
                .await?;
            }
        }
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum ImportKind {
    Offerings,
    Enrollments,
    Grades,
    Attendance,
    Guardians,
}

pub async fn import_csv(
    pool: &PgPool,
    kind: ImportKind,
    csv_path: &std::path::Path,
) -> anyhow::Result<usize> {
    #[derive(serde::Deserialize)]
    struct OfferingRow {
        offering_id: Uuid,
        name: String,
        credit_hours: Option<f64>,
        meeting_days: String,
        non_meeting_dates: Option<String>,
    }

    #[derive(serde::Deserialize)]
    struct EnrollmentRow {
        student_id: Uuid,
        offering_id: Uuid,
        period_id: String,
        period_start: NaiveDate,
        period_end: NaiveDate,
    }

    #[derive(serde::Deserialize)]
    struct GradeRow {
        student_id: Uuid,
        offering_id: Uuid,
        assignment_id: Uuid,
        assignment_name: String,
        category: String,
        category_weight: f64,
        points_earned: Option<f64>,
        max_points: f64,
        due_date: NaiveDate,
        submitted: Option<bool>,
        excused: Option<bool>,
    }

    #[derive(serde::Deserialize)]
    struct AttendanceRow {
        student_id: Uuid,
        offering_id: Uuid,
        date: NaiveDate,
        status: String,
    }

    #[derive(serde::Deserialize)]
    struct GuardianRow {
        student_id: Uuid,
        guardian_id: Uuid,
    }

    let mut reader = csv::Reader::from_path(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut inserted = 0usize;

    match kind {
        ImportKind::Offerings => {
            for result in reader.deserialize::<OfferingRow>() {
                let row = result?;
                let offering = Offering {
                    offering_id: row.offering_id,
                    name: row.name,
                    credit_hours: row.credit_hours.unwrap_or(1.0),
                    schedule: MeetingSchedule {
                        weekdays: parse_weekdays(&row.meeting_days)?,
                        non_meeting_dates: parse_dates(
                            row.non_meeting_dates.as_deref().unwrap_or_default(),
                        )?
                        .into_iter()
                        .collect(),
                    },
                };
                upsert_offering(pool, &offering).await?;
                inserted += 1;
            }
        }
        ImportKind::Enrollments => {
            for result in reader.deserialize::<EnrollmentRow>() {
                let row = result?;
                let enrollment = Enrollment {
                    student_id: row.student_id,
                    offering_id: row.offering_id,
                    period_id: row.period_id,
                    period_start: row.period_start,
                    period_end: row.period_end,
                };
                if upsert_enrollment(pool, &enrollment).await? > 0 {
                    inserted += 1;
                }
            }
        }
        ImportKind::Grades => {
            for result in reader.deserialize::<GradeRow>() {
                let row = result?;
                let record = GradeRecord {
                    student_id: row.student_id,
                    offering_id: row.offering_id,
                    assignment_id: row.assignment_id,
                    assignment_name: row.assignment_name,
                    category: row.category,
                    category_weight: row.category_weight,
                    points_earned: row.points_earned,
                    max_points: row.max_points,
                    due_date: row.due_date,
                    submitted: row.submitted.unwrap_or(row.points_earned.is_some()),
                    excused: row.excused.unwrap_or(false),
                };
                if upsert_grade(pool, &record).await? > 0 {
                    inserted += 1;
                }
            }
        }
        ImportKind::Attendance => {
            for result in reader.deserialize::<AttendanceRow>() {
                let row = result?;
                let record = AttendanceRecord {
                    student_id: row.student_id,
                    offering_id: row.offering_id,
                    date: row.date,
                    status: row.status.parse().map_err(anyhow::Error::msg)?,
                };
                if upsert_attendance(pool, &record).await? > 0 {
                    inserted += 1;
                }
            }
        }
        ImportKind::Guardians => {
            for result in reader.deserialize::<GuardianRow>() {
                let row = result?;
                let link = GuardianLink {
                    student_id: row.student_id,
                    guardian_id: row.guardian_id,
                };
                if link_guardian(pool, &link).await? > 0 {
                    inserted += 1;
                }
            }
        }
    }

    Ok(inserted)
}
