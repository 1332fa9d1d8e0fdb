use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::models::{
    AlertType, AttendanceRecord, DateWindow, DispatchRecord, Enrollment, GradeRecord,
    GuardianLink, NotificationLogEntry, Offering,
};

/// Read-only view over the record-entry system's snapshots.
#[async_trait]
pub trait MetricStore: Send + Sync {
    async fn offering(&self, offering_id: Uuid) -> anyhow::Result<Option<Offering>>;

    async fn enrollments_for_student(&self, student_id: Uuid) -> anyhow::Result<Vec<Enrollment>>;

    /// Enrollments whose period covers `as_of`.
    async fn active_enrollments(&self, as_of: NaiveDate) -> anyhow::Result<Vec<Enrollment>>;

    async fn grade_records(
        &self,
        student_id: Uuid,
        offering_id: Uuid,
    ) -> anyhow::Result<Vec<GradeRecord>>;

    /// Attendance inside `window`, oldest first.
    async fn attendance_records(
        &self,
        student_id: Uuid,
        offering_id: Uuid,
        window: DateWindow,
    ) -> anyhow::Result<Vec<AttendanceRecord>>;

    async fn guardians_for_student(&self, student_id: Uuid) -> anyhow::Result<Vec<GuardianLink>>;
}

/// The dedup ledger: one row per (student, alert type).
///
/// A dispatch first claims the row, hands off, then either completes
/// (sets `last_sent_at`) or releases the claim. A claim left behind by a
/// crashed run expires on its own and never touches `last_sent_at`.
#[async_trait]
pub trait DispatchLedger: Send + Sync {
    async fn dispatch_record(
        &self,
        student_id: Uuid,
        alert_type: AlertType,
    ) -> anyhow::Result<Option<DispatchRecord>>;

    /// Compare-and-set: succeeds only if `last_sent_at` still equals
    /// `expected_last_sent` and no unexpired claim is held.
    async fn claim(
        &self,
        student_id: Uuid,
        alert_type: AlertType,
        expected_last_sent: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
        claimed_until: DateTime<Utc>,
    ) -> anyhow::Result<bool>;

    async fn complete(
        &self,
        student_id: Uuid,
        alert_type: AlertType,
        sent_at: DateTime<Utc>,
    ) -> anyhow::Result<()>;

    async fn release(&self, student_id: Uuid, alert_type: AlertType) -> anyhow::Result<()>;
}

/// User-visible history of successful handoffs. Never read for dedup.
#[async_trait]
pub trait NotificationHistory: Send + Sync {
    async fn record_handoff(&self, entry: &NotificationLogEntry) -> anyhow::Result<()>;
}

#[cfg(test)]
pub mod memory {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory store used by the tests in place of Postgres.
    #[derive(Default)]
    pub struct MemoryStore {
        pub offerings: Mutex<Vec<Offering>>,
        pub enrollments: Mutex<Vec<Enrollment>>,
        pub grades: Mutex<Vec<GradeRecord>>,
        pub attendance: Mutex<Vec<AttendanceRecord>>,
        pub guardians: Mutex<Vec<GuardianLink>>,
        pub ledger: Mutex<HashMap<(Uuid, AlertType), DispatchRecord>>,
        pub history: Mutex<Vec<NotificationLogEntry>>,
        pub ledger_writes: Mutex<usize>,
    }

    impl MemoryStore {
        pub fn add_offering(&self, offering: Offering) {
            self.offerings.lock().unwrap().push(offering);
        }

        pub fn add_enrollment(&self, enrollment: Enrollment) {
            self.enrollments.lock().unwrap().push(enrollment);
        }

        pub fn add_grade(&self, record: GradeRecord) {
            self.grades.lock().unwrap().push(record);
        }

        pub fn add_attendance(&self, record: AttendanceRecord) {
            self.attendance.lock().unwrap().push(record);
        }

        pub fn link_guardian(&self, student_id: Uuid, guardian_id: Uuid) {
            self.guardians.lock().unwrap().push(GuardianLink {
                student_id,
                guardian_id,
            });
        }

        pub fn last_sent(&self, student_id: Uuid, alert_type: AlertType) -> Option<DateTime<Utc>> {
            self.ledger
                .lock()
                .unwrap()
                .get(&(student_id, alert_type))
                .and_then(|record| record.last_sent_at)
        }
    }

    #[async_trait]
    impl MetricStore for MemoryStore {
        async fn offering(&self, offering_id: Uuid) -> anyhow::Result<Option<Offering>> {
            Ok(self
                .offerings
                .lock()
                .unwrap()
                .iter()
                .find(|offering| offering.offering_id == offering_id)
                .cloned())
        }

        async fn enrollments_for_student(&self, student_id: Uuid) -> anyhow::Result<Vec<Enrollment>> {
            Ok(self
                .enrollments
                .lock()
                .unwrap()
                .iter()
                .filter(|enrollment| enrollment.student_id == student_id)
                .cloned()
                .collect())
        }

        async fn active_enrollments(&self, as_of: NaiveDate) -> anyhow::Result<Vec<Enrollment>> {
            Ok(self
                .enrollments
                .lock()
                .unwrap()
                .iter()
                .filter(|enrollment| enrollment.is_active_on(as_of))
                .cloned()
                .collect())
        }

        async fn grade_records(
            &self,
            student_id: Uuid,
            offering_id: Uuid,
        ) -> anyhow::Result<Vec<GradeRecord>> {
            Ok(self
                .grades
                .lock()
                .unwrap()
                .iter()
                .filter(|record| record.student_id == student_id && record.offering_id == offering_id)
                .cloned()
                .collect())
        }

        async fn attendance_records(
            &self,
            student_id: Uuid,
            offering_id: Uuid,
            window: DateWindow,
        ) -> anyhow::Result<Vec<AttendanceRecord>> {
            let mut records: Vec<AttendanceRecord> = self
                .attendance
                .lock()
                .unwrap()
                .iter()
                .filter(|record| {
                    record.student_id == student_id
                        && record.offering_id == offering_id
                        && window.contains(record.date)
                })
                .cloned()
                .collect();
            records.sort_by_key(|record| record.date);
            Ok(records)
        }

        async fn guardians_for_student(&self, student_id: Uuid) -> anyhow::Result<Vec<GuardianLink>> {
            Ok(self
                .guardians
                .lock()
                .unwrap()
                .iter()
                .filter(|link| link.student_id == student_id)
                .cloned()
                .collect())
        }
    }

    #[async_trait]
    impl DispatchLedger for MemoryStore {
        async fn dispatch_record(
            &self,
            student_id: Uuid,
            alert_type: AlertType,
        ) -> anyhow::Result<Option<DispatchRecord>> {
            Ok(self
                .ledger
                .lock()
                .unwrap()
                .get(&(student_id, alert_type))
                .cloned())
        }

        async fn claim(
            &self,
            student_id: Uuid,
            alert_type: AlertType,
            expected_last_sent: Option<DateTime<Utc>>,
            now: DateTime<Utc>,
            claimed_until: DateTime<Utc>,
        ) -> anyhow::Result<bool> {
            let mut ledger = self.ledger.lock().unwrap();
            let record = ledger
                .entry((student_id, alert_type))
                .or_insert_with(|| DispatchRecord {
                    student_id,
                    alert_type,
                    last_sent_at: None,
                    claimed_until: None,
                });

            let lease_free = record.claimed_until.map_or(true, |until| until <= now);
            if record.last_sent_at != expected_last_sent || !lease_free {
                return Ok(false);
            }
            record.claimed_until = Some(claimed_until);
            Ok(true)
        }

        async fn complete(
            &self,
            student_id: Uuid,
            alert_type: AlertType,
            sent_at: DateTime<Utc>,
        ) -> anyhow::Result<()> {
            let mut ledger = self.ledger.lock().unwrap();
            if let Some(record) = ledger.get_mut(&(student_id, alert_type)) {
                record.last_sent_at = Some(sent_at);
                record.claimed_until = None;
                *self.ledger_writes.lock().unwrap() += 1;
            }
            Ok(())
        }

        async fn release(&self, student_id: Uuid, alert_type: AlertType) -> anyhow::Result<()> {
            if let Some(record) = self
                .ledger
                .lock()
                .unwrap()
                .get_mut(&(student_id, alert_type))
            {
                record.claimed_until = None;
            }
            Ok(())
        }
    }

    #[async_trait]
    impl NotificationHistory for MemoryStore {
        async fn record_handoff(&self, entry: &NotificationLogEntry) -> anyhow::Result<()> {
            self.history.lock().unwrap().push(entry.clone());
            Ok(())
        }
    }
}
