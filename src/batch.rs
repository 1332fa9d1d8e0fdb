use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::attendance::{AttendanceAnalyzer, AttendanceThresholds};
use crate::config::EngineConfig;
use crate::error::{ConfigError, MetricError, MetricResult};
use crate::grades::{self, GradeAggregator};
use crate::models::{AlertType, DateWindow, Enrollment, Gpa, OfferingMetrics, StudentMetrics};
use crate::notify::{DeliveryChannel, DispatchReport, NotificationEngine};
use crate::rules::RuleEvaluator;
use crate::store::{DispatchLedger, MetricStore, NotificationHistory};

#[derive(Debug, Clone, Serialize)]
pub struct StudentIssue {
    pub student_id: Uuid,
    pub offering_id: Option<Uuid>,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StudentGpa {
    pub student_id: Uuid,
    pub period_gpa: Vec<(String, Option<Gpa>)>,
    pub cumulative_gpa: Option<Gpa>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub as_of: NaiveDate,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub students_total: usize,
    pub students_processed: usize,
    pub alerts_by_type: BTreeMap<AlertType, usize>,
    pub dispatch: DispatchReport,
    /// DataIntegrityErrors, for manual follow-up.
    pub data_integrity_errors: Vec<StudentIssue>,
    /// Students whose unit timed out or hit a store error.
    pub failed_units: Vec<StudentIssue>,
    pub monday_friday_students: Vec<Uuid>,
    pub student_gpas: Vec<StudentGpa>,
}

struct StudentOutcome {
    student_id: Uuid,
    gpa: StudentGpa,
    alert_types: Vec<AlertType>,
    dispatch: DispatchReport,
    issues: Vec<StudentIssue>,
    monday_friday: bool,
}

/// Everything a worker needs, shared across the pool.
struct PassContext {
    store: Arc<dyn MetricStore>,
    grades: GradeAggregator,
    attendance: AttendanceAnalyzer,
    rules: RuleEvaluator,
    notifier: NotificationEngine,
    config: EngineConfig,
    as_of: NaiveDate,
    now: DateTime<Utc>,
}

pub struct BatchRunner {
    store: Arc<dyn MetricStore>,
    ledger: Arc<dyn DispatchLedger>,
    history: Arc<dyn NotificationHistory>,
    channel: Arc<dyn DeliveryChannel>,
    config: EngineConfig,
}

impl BatchRunner {
    pub fn new(
        store: Arc<dyn MetricStore>,
        ledger: Arc<dyn DispatchLedger>,
        history: Arc<dyn NotificationHistory>,
        channel: Arc<dyn DeliveryChannel>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            ledger,
            history,
            channel,
            config,
        }
    }

    /// The daily batch entry point.
    ///
    /// Configuration is validated before anything else; a bad config is the
    /// only thing that aborts the run. After that, each student is an
    /// isolated unit: errors and timeouts are collected, never propagated.
    pub async fn run_daily_pass(&self, as_of: NaiveDate) -> anyhow::Result<BatchReport> {
        self.run_daily_pass_at(as_of, Utc::now()).await
    }

    pub async fn run_daily_pass_at(
        &self,
        as_of: NaiveDate,
        now: DateTime<Utc>,
    ) -> anyhow::Result<BatchReport> {
        self.config.validate().map_err(|e: ConfigError| {
            tracing::error!(error = %e, "Refusing to start batch run");
            anyhow::Error::new(e).context("invalid engine configuration")
        })?;

        let started_at = Utc::now();
        let students: BTreeSet<Uuid> = self
            .store
            .active_enrollments(as_of)
            .await?
            .into_iter()
            .map(|enrollment| enrollment.student_id)
            .collect();

        tracing::info!(%as_of, students = students.len(), "Starting daily pass");

        let ctx = Arc::new(PassContext {
            store: self.store.clone(),
            grades: GradeAggregator::new(
                self.store.clone(),
                self.config.credit_hour_weighting_enabled,
            ),
            attendance: AttendanceAnalyzer::new(
                self.store.clone(),
                AttendanceThresholds::from(&self.config),
            ),
            rules: RuleEvaluator::new(&self.config),
            notifier: NotificationEngine::new(
                self.store.clone(),
                self.ledger.clone(),
                self.history.clone(),
                self.channel.clone(),
                self.config.clone(),
            ),
            config: self.config.clone(),
            as_of,
            now,
        });

        let permits = Arc::new(Semaphore::new(self.config.worker_count.max(1) as usize));
        let timeout = self.config.student_timeout();
        let mut workers = JoinSet::new();
        let mut task_students = HashMap::with_capacity(students.len());

        for &student_id in &students {
            let ctx = ctx.clone();
            let permits = permits.clone();
            let handle = workers.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let outcome =
                    tokio::time::timeout(timeout, process_student(&ctx, student_id)).await;
                (student_id, outcome)
            });
            task_students.insert(handle.id(), student_id);
        }

        let mut report = BatchReport {
            as_of,
            started_at,
            finished_at: started_at,
            students_total: students.len(),
            students_processed: 0,
            alerts_by_type: BTreeMap::new(),
            dispatch: DispatchReport::default(),
            data_integrity_errors: Vec::new(),
            failed_units: Vec::new(),
            monday_friday_students: Vec::new(),
            student_gpas: Vec::new(),
        };

        while let Some(joined) = workers.join_next_with_id().await {
            match joined {
                Ok((_, (_, Ok(Ok(outcome))))) => {
                    report.students_processed += 1;
                    for alert_type in outcome.alert_types {
                        *report.alerts_by_type.entry(alert_type).or_default() += 1;
                    }
                    if outcome.monday_friday {
                        report.monday_friday_students.push(outcome.student_id);
                    }
                    report.dispatch.merge(outcome.dispatch);
                    report.data_integrity_errors.extend(outcome.issues);
                    report.student_gpas.push(outcome.gpa);
                }
                Ok((_, (student_id, Ok(Err(e))))) => {
                    tracing::error!(%student_id, error = %e, "Student unit failed");
                    report.failed_units.push(StudentIssue {
                        student_id,
                        offering_id: None,
                        message: format!("{e:#}"),
                    });
                }
                Ok((_, (student_id, Err(_)))) => {
                    tracing::warn!(%student_id, ?timeout, "Student unit timed out, abandoned");
                    report.failed_units.push(StudentIssue {
                        student_id,
                        offering_id: None,
                        message: format!("timed out after {}s", timeout.as_secs()),
                    });
                }
                Err(e) => {
                    let student_id = task_students.get(&e.id()).copied().unwrap_or_default();
                    tracing::error!(%student_id, error = %e, "Student worker panicked");
                    report.failed_units.push(StudentIssue {
                        student_id,
                        offering_id: None,
                        message: format!("worker panicked: {e}"),
                    });
                }
            }
        }

        report.monday_friday_students.sort();
        report.data_integrity_errors.sort_by_key(|issue| issue.student_id);
        report.failed_units.sort_by_key(|issue| issue.student_id);
        report.student_gpas.sort_by_key(|gpa| gpa.student_id);
        report.finished_at = Utc::now();

        tracing::info!(
            processed = report.students_processed,
            failed = report.failed_units.len(),
            alerts = report.dispatch.alerts_generated,
            suppressed = report.dispatch.suppressed_by_dedup,
            sent = report.dispatch.notifications_sent,
            handoff_failures = report.dispatch.handoff_failures,
            "Daily pass finished"
        );
        Ok(report)
    }
}

/// Collects a DataIntegrityError as an issue; anything else that is not
/// NoData aborts the student's unit.
fn absorb<T>(
    result: MetricResult<T>,
    student_id: Uuid,
    offering_id: Option<Uuid>,
    issues: &mut Vec<StudentIssue>,
) -> anyhow::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_no_data() => Ok(None),
        Err(e) if e.is_data_integrity() => {
            let message = e.to_string();
            // Period and cumulative GPA can trip over the same record.
            if !issues.iter().any(|issue| issue.message == message) {
                tracing::warn!(%student_id, ?offering_id, error = %e, "Data integrity problem");
                issues.push(StudentIssue {
                    student_id,
                    offering_id,
                    message,
                });
            }
            Ok(None)
        }
        Err(MetricError::Store(e)) => Err(e),
        Err(e) => Err(anyhow::Error::new(e)),
    }
}

async fn offering_metrics(
    ctx: &PassContext,
    enrollment: &Enrollment,
    issues: &mut Vec<StudentIssue>,
) -> anyhow::Result<Option<OfferingMetrics>> {
    let student_id = enrollment.student_id;
    let offering_id = enrollment.offering_id;

    let Some(offering) = ctx.store.offering(offering_id).await? else {
        absorb::<()>(
            Err(MetricError::UnknownOffering(offering_id)),
            student_id,
            Some(offering_id),
            issues,
        )?;
        return Ok(None);
    };

    let records = ctx.store.grade_records(student_id, offering_id).await?;
    let grade = absorb(
        ctx.grades.compute_offering_grade(student_id, offering_id).await,
        student_id,
        Some(offering_id),
        issues,
    )?;
    let missing_assignments = grades::missing_assignments(
        &records,
        ctx.as_of,
        ctx.config.missing_assignment_grace_days,
    );

    let attendance = match DateWindow::trailing(ctx.as_of, ctx.config.attendance_window_days)
        .clip(enrollment.period_start, enrollment.period_end)
    {
        Some(window) => absorb(
            ctx.attendance
                .detect_patterns(student_id, offering_id, window)
                .await,
            student_id,
            Some(offering_id),
            issues,
        )?,
        None => None,
    };

    Ok(Some(OfferingMetrics {
        offering_id,
        offering_name: offering.name,
        period_id: enrollment.period_id.clone(),
        grade,
        attendance,
        missing_assignments,
    }))
}

async fn process_student(ctx: &PassContext, student_id: Uuid) -> anyhow::Result<StudentOutcome> {
    let enrollments = ctx.store.enrollments_for_student(student_id).await?;
    let mut issues = Vec::new();
    let mut offerings = Vec::new();

    let active: Vec<&Enrollment> = enrollments
        .iter()
        .filter(|enrollment| enrollment.is_active_on(ctx.as_of))
        .collect();

    for enrollment in &active {
        if let Some(metrics) = offering_metrics(ctx, enrollment, &mut issues).await? {
            offerings.push(metrics);
        }
    }

    let periods: BTreeSet<&str> = active
        .iter()
        .map(|enrollment| enrollment.period_id.as_str())
        .collect();
    let mut period_gpa = Vec::with_capacity(periods.len());
    for period_id in periods {
        let gpa = absorb(
            ctx.grades.compute_period_gpa(student_id, period_id).await,
            student_id,
            None,
            &mut issues,
        )?;
        period_gpa.push((period_id.to_string(), gpa));
    }
    let cumulative_gpa = absorb(
        ctx.grades.compute_cumulative_gpa(student_id).await,
        student_id,
        None,
        &mut issues,
    )?;

    let monday_friday = offerings.iter().any(|offering| {
        offering
            .attendance
            .as_ref()
            .is_some_and(|pattern| pattern.monday_friday_absences)
    });

    let metrics = StudentMetrics {
        student_id,
        as_of: ctx.as_of,
        offerings,
        period_gpa,
        cumulative_gpa,
    };

    tracing::debug!(
        %student_id,
        offerings = metrics.offerings.len(),
        cumulative_gpa = ?metrics.cumulative_gpa.map(|gpa| gpa.gpa4),
        period_gpa = ?metrics.period_gpa,
        "Metrics computed"
    );

    let events = ctx.rules.evaluate(&metrics, ctx.now);
    let dispatch = ctx.notifier.dispatch(&events, ctx.now).await;

    Ok(StudentOutcome {
        student_id,
        gpa: StudentGpa {
            student_id,
            period_gpa: metrics.period_gpa,
            cumulative_gpa: metrics.cumulative_gpa,
        },
        alert_types: events.iter().map(|event| event.alert_type).collect(),
        dispatch,
        issues,
        monday_friday,
    })
}

#[cfg(test)]
mod tests {
    use chrono::Weekday;

    use super::*;
    use crate::models::{
        AttendanceRecord, AttendanceStatus, GradeRecord, MeetingSchedule, Offering,
    };
    use crate::notify::tests::{fast_config, ScriptedChannel};
    use crate::store::memory::MemoryStore;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn weekday_schedule() -> MeetingSchedule {
        MeetingSchedule::weekdays(&[
            Weekday::Mon,
            Weekday::Tue,
            Weekday::Wed,
            Weekday::Thu,
            Weekday::Fri,
        ])
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        channel: Arc<ScriptedChannel>,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                store: Arc::new(MemoryStore::default()),
                channel: Arc::new(ScriptedChannel::default()),
            }
        }

        fn runner(&self, config: EngineConfig) -> BatchRunner {
            BatchRunner::new(
                self.store.clone(),
                self.store.clone(),
                self.store.clone(),
                self.channel.clone(),
                config,
            )
        }

        fn enroll(&self, student_id: Uuid, name: &str) -> Uuid {
            let offering_id = Uuid::new_v4();
            self.store.add_offering(Offering {
                offering_id,
                name: name.to_string(),
                credit_hours: 1.0,
                schedule: weekday_schedule(),
            });
            self.store.add_enrollment(Enrollment {
                student_id,
                offering_id,
                period_id: "2025-2026".to_string(),
                period_start: date(2025, 9, 1),
                period_end: date(2026, 6, 15),
            });
            offering_id
        }

        fn grade(
            &self,
            student_id: Uuid,
            offering_id: Uuid,
            category: &str,
            weight: f64,
            earned: Option<f64>,
            max: f64,
        ) {
            self.store.add_grade(GradeRecord {
                student_id,
                offering_id,
                assignment_id: Uuid::new_v4(),
                assignment_name: format!("{category} 1"),
                category: category.to_string(),
                category_weight: weight,
                points_earned: earned,
                max_points: max,
                due_date: date(2026, 6, 1),
                submitted: earned.is_some(),
                excused: false,
            });
        }

        /// One record per weekday from Feb 2 2026, in order.
        fn attendance(&self, student_id: Uuid, offering_id: Uuid, statuses: &[AttendanceStatus]) {
            let days = crate::attendance::meeting_days(
                &weekday_schedule(),
                DateWindow::new(date(2026, 2, 2), date(2026, 3, 31)),
            );
            for (day, status) in days.into_iter().zip(statuses) {
                self.store.add_attendance(AttendanceRecord {
                    student_id,
                    offering_id,
                    date: day,
                    status: *status,
                });
            }
        }
    }

    // Feb 25 2026 is the 18th weekday from Feb 2.
    const AS_OF: (i32, u32, u32) = (2026, 2, 25);

    fn as_of() -> NaiveDate {
        date(AS_OF.0, AS_OF.1, AS_OF.2)
    }

    #[tokio::test]
    async fn healthy_student_triggers_nothing() {
        use crate::models::AttendanceStatus::{Absent, Present, Tardy};
        let fx = Fixture::new();
        let student = Uuid::new_v4();
        fx.store.link_guardian(student, Uuid::new_v4());
        let biology = fx.enroll(student, "Biology");

        fx.grade(student, biology, "Tests", 0.4, Some(92.0), 100.0);
        fx.grade(student, biology, "Homework", 0.6, None, 50.0);

        let mut statuses = vec![Present; 18];
        statuses[4] = Absent;
        statuses[9] = Tardy;
        fx.attendance(student, biology, &statuses);

        let report = fx.runner(fast_config()).run_daily_pass(as_of()).await.unwrap();

        assert_eq!(report.students_processed, 1);
        assert!(report.alerts_by_type.is_empty());
        assert_eq!(report.dispatch.alerts_generated, 0);
        assert!(report.data_integrity_errors.is_empty());
        assert_eq!(report.student_gpas.len(), 1);
        let gpa = &report.student_gpas[0];
        assert_eq!(gpa.student_id, student);
        assert_eq!(gpa.cumulative_gpa.map(|g| g.gpa4), Some(4.0));
        assert_eq!(gpa.period_gpa.len(), 1);

        let analyzer = AttendanceAnalyzer::new(fx.store.clone(), AttendanceThresholds::default());
        let window = DateWindow::trailing(as_of(), 30);
        let rate = analyzer.compute_attendance_rate(student, biology, window).await.unwrap();
        assert_eq!(rate.total_days, 18);
        assert!((rate.rate - 17.0 / 18.0).abs() < 1e-9);

        let grade = GradeAggregator::new(fx.store.clone(), false)
            .compute_offering_grade(student, biology)
            .await
            .unwrap();
        assert!((grade.percentage - 92.0).abs() < 1e-9);
        assert_eq!(grades::gpa_from_percentage(grade.percentage), 4.0);
    }

    #[tokio::test]
    async fn struggling_student_notifies_every_guardian_once() {
        use crate::models::AttendanceStatus::{Absent, Present};
        let fx = Fixture::new();
        let student = Uuid::new_v4();
        let (mom, dad) = (Uuid::new_v4(), Uuid::new_v4());
        fx.store.link_guardian(student, mom);
        fx.store.link_guardian(student, dad);
        let algebra = fx.enroll(student, "Algebra");

        fx.grade(student, algebra, "Tests", 1.0, Some(55.0), 100.0);
        let mut statuses = vec![Present; 14];
        statuses.extend([Absent, Absent, Absent, Absent]);
        fx.attendance(student, algebra, &statuses);

        let runner = fx.runner(fast_config());
        let now = Utc::now();
        let report = runner.run_daily_pass_at(as_of(), now).await.unwrap();

        assert_eq!(report.alerts_by_type.get(&AlertType::FailingGrade), Some(&1));
        assert_eq!(report.alerts_by_type.get(&AlertType::ConsecutiveAbsence), Some(&1));
        assert_eq!(report.alerts_by_type.get(&AlertType::ChronicLowAttendance), Some(&1));
        assert_eq!(report.dispatch.notifications_sent, 6);

        // A manual re-run the same day sends nothing new.
        let rerun = runner
            .run_daily_pass_at(as_of(), now + chrono::Duration::hours(2))
            .await
            .unwrap();
        assert_eq!(rerun.dispatch.alerts_generated, 3);
        assert_eq!(rerun.dispatch.suppressed_by_dedup, 3);
        assert_eq!(rerun.dispatch.notifications_sent, 0);
        assert_eq!(fx.channel.delivered.lock().unwrap().len(), 6);
    }

    #[tokio::test]
    async fn bad_data_is_isolated_to_one_student() {
        let fx = Fixture::new();
        let (broken, fine) = (Uuid::new_v4(), Uuid::new_v4());
        fx.store.link_guardian(fine, Uuid::new_v4());

        let broken_course = fx.enroll(broken, "Chemistry");
        fx.grade(broken, broken_course, "Labs", 0.5, Some(5.0), 0.0);

        let fine_course = fx.enroll(fine, "Chemistry");
        fx.grade(fine, fine_course, "Labs", 0.5, Some(40.0), 100.0);

        let report = fx.runner(fast_config()).run_daily_pass(as_of()).await.unwrap();

        assert_eq!(report.students_processed, 2);
        assert!(report.failed_units.is_empty());
        assert_eq!(report.data_integrity_errors.len(), 1);
        assert_eq!(report.data_integrity_errors[0].student_id, broken);
        assert_eq!(
            report.data_integrity_errors[0].offering_id,
            Some(broken_course)
        );
        assert_eq!(report.alerts_by_type.get(&AlertType::FailingGrade), Some(&1));
        assert_eq!(report.dispatch.notifications_sent, 1);
    }

    #[test]
    fn repeated_integrity_problem_is_recorded_once() {
        let student = Uuid::new_v4();
        let mut issues = Vec::new();
        for _ in 0..3 {
            let outcome: Option<()> = absorb(
                Err(MetricError::integrity("offering Chemistry has non-positive credit hours 0")),
                student,
                None,
                &mut issues,
            )
            .unwrap();
            assert!(outcome.is_none());
        }
        assert_eq!(issues.len(), 1);
    }

    #[tokio::test]
    async fn invalid_config_aborts_before_any_work() {
        let fx = Fixture::new();
        let student = Uuid::new_v4();
        fx.store.link_guardian(student, Uuid::new_v4());
        let course = fx.enroll(student, "Physics");
        fx.grade(student, course, "Tests", 1.0, Some(10.0), 100.0);

        let config = EngineConfig {
            dedup_window_days: -3,
            ..fast_config()
        };
        let err = fx.runner(config).run_daily_pass(as_of()).await.unwrap_err();
        assert!(err.to_string().contains("invalid engine configuration"));
        assert!(fx.channel.attempts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn missing_assignment_alert_after_due_date() {
        let fx = Fixture::new();
        let student = Uuid::new_v4();
        fx.store.link_guardian(student, Uuid::new_v4());
        let course = fx.enroll(student, "English");
        fx.store.add_grade(GradeRecord {
            student_id: student,
            offering_id: course,
            assignment_id: Uuid::new_v4(),
            assignment_name: "Essay 3".to_string(),
            category: "Essays".to_string(),
            category_weight: 0.5,
            points_earned: None,
            max_points: 20.0,
            due_date: date(2026, 2, 20),
            submitted: false,
            excused: false,
        });

        let report = fx.runner(fast_config()).run_daily_pass(as_of()).await.unwrap();
        assert_eq!(report.alerts_by_type.get(&AlertType::MissingAssignment), Some(&1));
        assert_eq!(report.dispatch.notifications_sent, 1);
        // Ungraded offering: no failing-grade alert.
        assert_eq!(report.alerts_by_type.get(&AlertType::FailingGrade), None);
    }

    struct PanickingChannel;

    #[async_trait::async_trait]
    impl DeliveryChannel for PanickingChannel {
        async fn send_notification(
            &self,
            _recipient_id: Uuid,
            _alert_type: AlertType,
            _payload: &serde_json::Value,
        ) -> Result<String, crate::error::DeliveryError> {
            panic!("transport crashed");
        }

        fn channel_name(&self) -> &str {
            "panicking"
        }
    }

    #[tokio::test]
    async fn panicked_unit_keeps_its_student_id() {
        let fx = Fixture::new();
        let student = Uuid::new_v4();
        fx.store.link_guardian(student, Uuid::new_v4());
        let course = fx.enroll(student, "Chemistry");
        fx.grade(student, course, "Tests", 1.0, Some(30.0), 100.0);

        let runner = BatchRunner::new(
            fx.store.clone(),
            fx.store.clone(),
            fx.store.clone(),
            Arc::new(PanickingChannel),
            fast_config(),
        );
        let report = runner.run_daily_pass(as_of()).await.unwrap();

        assert_eq!(report.students_processed, 0);
        assert_eq!(report.failed_units.len(), 1);
        assert_eq!(report.failed_units[0].student_id, student);
        assert!(report.failed_units[0].message.contains("panicked"));
    }

    #[tokio::test(start_paused = true)]
    async fn timed_out_unit_is_abandoned_without_touching_ledger() {
        let fx = Fixture::new();
        let (slow, quick) = (Uuid::new_v4(), Uuid::new_v4());
        fx.store.link_guardian(slow, Uuid::new_v4());
        let course = fx.enroll(slow, "Geometry");
        fx.grade(slow, course, "Tests", 1.0, Some(20.0), 100.0);
        fx.enroll(quick, "Geometry");
        *fx.channel.delay.lock().unwrap() = Some(std::time::Duration::from_secs(30));

        let config = EngineConfig {
            student_timeout_secs: 5,
            delivery_timeout_secs: 60,
            ..fast_config()
        };
        let report = fx.runner(config).run_daily_pass(as_of()).await.unwrap();

        assert_eq!(report.students_processed, 1);
        assert_eq!(report.failed_units.len(), 1);
        assert_eq!(report.failed_units[0].student_id, slow);
        assert!(report.failed_units[0].message.contains("timed out"));
        assert_eq!(fx.store.last_sent(slow, AlertType::FailingGrade), None);
    }

    #[tokio::test]
    async fn inactive_enrollments_are_skipped() {
        let fx = Fixture::new();
        let student = Uuid::new_v4();
        fx.store.link_guardian(student, Uuid::new_v4());
        let course = fx.enroll(student, "Latin");
        fx.grade(student, course, "Tests", 1.0, Some(30.0), 100.0);

        let report = fx
            .runner(fast_config())
            .run_daily_pass(date(2026, 7, 1))
            .await
            .unwrap();
        assert_eq!(report.students_total, 0);
        assert_eq!(report.dispatch.alerts_generated, 0);
    }
}
