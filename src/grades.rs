use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::NaiveDate;
use uuid::Uuid;

use crate::error::{MetricError, MetricResult};
use crate::models::{CategoryScore, GradeRecord, Gpa, MissingAssignment, OfferingGrade};
use crate::store::MetricStore;

/// Maps a percentage onto the 4.0 scale.
///
/// Piecewise linear between the letter boundaries (60 -> 1.0, 70 -> 2.0,
/// 80 -> 3.0, 90 -> 4.0), flat at 4.0 above 90 and 0.0 below 60. Input is
/// clamped to [0, 100] first. Period and cumulative GPA both go through here.
pub fn gpa_from_percentage(percentage: f64) -> f64 {
    if percentage.is_nan() {
        return 0.0;
    }
    let pct = percentage.clamp(0.0, 100.0);
    if pct >= 90.0 {
        4.0
    } else if pct < 60.0 {
        0.0
    } else {
        1.0 + (pct - 60.0) / 10.0
    }
}

pub fn letter_grade(percentage: f64) -> &'static str {
    match percentage {
        p if p >= 97.0 => "A+",
        p if p >= 93.0 => "A",
        p if p >= 90.0 => "A-",
        p if p >= 87.0 => "B+",
        p if p >= 83.0 => "B",
        p if p >= 80.0 => "B-",
        p if p >= 77.0 => "C+",
        p if p >= 73.0 => "C",
        p if p >= 70.0 => "C-",
        p if p >= 67.0 => "D+",
        p if p >= 63.0 => "D",
        p if p >= 60.0 => "D-",
        _ => "F",
    }
}

fn check_record(record: &GradeRecord) -> MetricResult<()> {
    if !(record.max_points > 0.0) {
        return Err(MetricError::integrity(format!(
            "assignment {} has maxPoints {} (must be positive)",
            record.assignment_id, record.max_points
        )));
    }
    if record.category_weight < 0.0 || record.category_weight.is_nan() {
        return Err(MetricError::integrity(format!(
            "category {} has negative weight {}",
            record.category, record.category_weight
        )));
    }
    if let Some(points) = record.points_earned {
        if points < 0.0 || points.is_nan() {
            return Err(MetricError::integrity(format!(
                "assignment {} has negative points {}",
                record.assignment_id, points
            )));
        }
    }
    Ok(())
}

/// Weighted percentage over graded work.
///
/// Weights are re-normalized over only the categories that have graded
/// work, so an empty category neither helps nor hurts.
pub fn weighted_percentage(records: &[GradeRecord]) -> MetricResult<(f64, Vec<CategoryScore>)> {
    let mut categories: BTreeMap<&str, CategoryScore> = BTreeMap::new();

    for record in records {
        check_record(record)?;
        if !record.is_graded() {
            continue;
        }

        let entry = categories
            .entry(record.category.as_str())
            .or_insert_with(|| CategoryScore {
                category: record.category.clone(),
                weight: record.category_weight,
                points_earned: 0.0,
                max_points: 0.0,
                graded_count: 0,
            });

        if (entry.weight - record.category_weight).abs() > 1e-9 {
            return Err(MetricError::integrity(format!(
                "category {} declares conflicting weights {} and {}",
                record.category, entry.weight, record.category_weight
            )));
        }

        entry.points_earned += record.points_earned.unwrap_or_default();
        entry.max_points += record.max_points;
        entry.graded_count += 1;
    }

    if categories.is_empty() {
        return Err(MetricError::no_data("no graded assignments"));
    }

    let total_weight: f64 = categories.values().map(|c| c.weight).sum();
    if total_weight <= 0.0 {
        return Err(MetricError::integrity(
            "every graded category carries zero weight",
        ));
    }

    let percentage = categories
        .values()
        .map(|c| c.weight * c.percentage())
        .sum::<f64>()
        / total_weight;

    Ok((percentage, categories.into_values().collect()))
}

/// Assignments past due (plus grace) that were never turned in or excused.
pub fn missing_assignments(
    records: &[GradeRecord],
    as_of: NaiveDate,
    grace_days: i64,
) -> Vec<MissingAssignment> {
    let mut missing: Vec<MissingAssignment> = records
        .iter()
        .filter(|r| !r.submitted && !r.excused && r.points_earned.is_none())
        .filter(|r| {
            r.due_date
                .checked_add_days(chrono::Days::new(grace_days.max(0) as u64))
                .is_some_and(|deadline| deadline < as_of)
        })
        .map(|r| MissingAssignment {
            offering_id: r.offering_id,
            assignment_id: r.assignment_id,
            assignment_name: r.assignment_name.clone(),
            due_date: r.due_date,
            days_overdue: (as_of - r.due_date).num_days(),
        })
        .collect();
    missing.sort_by(|a, b| a.due_date.cmp(&b.due_date));
    missing
}

/// Averages offering percentages (optionally credit-hour weighted) and
/// converts the average once. Each percentage is clamped to [0, 100] before
/// it is averaged, so extra credit in one offering cannot prop up another.
pub fn average_gpa(graded: &[(f64, f64)]) -> MetricResult<Gpa> {
    if graded.is_empty() {
        return Err(MetricError::no_data("no graded offerings"));
    }

    let total_weight: f64 = graded.iter().map(|(_, weight)| weight).sum();
    if total_weight <= 0.0 {
        return Err(MetricError::integrity("offering weights sum to zero"));
    }

    let gpa_percent = graded
        .iter()
        .map(|(pct, weight)| pct.clamp(0.0, 100.0) * weight)
        .sum::<f64>()
        / total_weight;

    Ok(Gpa {
        gpa4: gpa_from_percentage(gpa_percent),
        gpa_percent,
        offering_count: graded.len(),
    })
}

pub struct GradeAggregator {
    store: Arc<dyn MetricStore>,
    credit_hour_weighting: bool,
}

impl GradeAggregator {
    pub fn new(store: Arc<dyn MetricStore>, credit_hour_weighting: bool) -> Self {
        Self {
            store,
            credit_hour_weighting,
        }
    }

    pub async fn compute_offering_grade(
        &self,
        student_id: Uuid,
        offering_id: Uuid,
    ) -> MetricResult<OfferingGrade> {
        let records = self.store.grade_records(student_id, offering_id).await?;
        let (percentage, categories) = weighted_percentage(&records)?;
        Ok(OfferingGrade {
            offering_id,
            percentage,
            letter: letter_grade(percentage),
            categories,
        })
    }

    pub async fn compute_period_gpa(&self, student_id: Uuid, period_id: &str) -> MetricResult<Gpa> {
        let offerings: Vec<Uuid> = self
            .store
            .enrollments_for_student(student_id)
            .await?
            .into_iter()
            .filter(|enrollment| enrollment.period_id == period_id)
            .map(|enrollment| enrollment.offering_id)
            .collect();

        if offerings.is_empty() {
            return Err(MetricError::no_data(format!(
                "no offerings in period {period_id}"
            )));
        }
        self.gpa_over(student_id, &offerings).await
    }

    /// Averages offering percentages across every period, not period GPAs.
    pub async fn compute_cumulative_gpa(&self, student_id: Uuid) -> MetricResult<Gpa> {
        let mut offerings: Vec<Uuid> = self
            .store
            .enrollments_for_student(student_id)
            .await?
            .into_iter()
            .map(|enrollment| enrollment.offering_id)
            .collect();
        offerings.sort();
        offerings.dedup();

        if offerings.is_empty() {
            return Err(MetricError::no_data("student has no enrollments"));
        }
        self.gpa_over(student_id, &offerings).await
    }

    async fn gpa_over(&self, student_id: Uuid, offerings: &[Uuid]) -> MetricResult<Gpa> {
        let mut graded = Vec::with_capacity(offerings.len());

        for &offering_id in offerings {
            let percentage = match self.compute_offering_grade(student_id, offering_id).await {
                Ok(grade) => grade.percentage,
                Err(err) if err.is_no_data() => continue,
                // Surfaced by the offering grade itself; leave it out of the average.
                Err(err) if err.is_data_integrity() => {
                    tracing::debug!(
                        %student_id,
                        %offering_id,
                        error = %err,
                        "Offering left out of GPA"
                    );
                    continue;
                }
                Err(err) => return Err(err),
            };
            graded.push((percentage, self.offering_weight(offering_id).await?));
        }

        average_gpa(&graded)
    }

    async fn offering_weight(&self, offering_id: Uuid) -> MetricResult<f64> {
        if !self.credit_hour_weighting {
            return Ok(1.0);
        }
        let offering = self
            .store
            .offering(offering_id)
            .await?
            .ok_or(MetricError::UnknownOffering(offering_id))?;
        if !(offering.credit_hours > 0.0) {
            return Err(MetricError::integrity(format!(
                "offering {} has non-positive credit hours {}",
                offering.name, offering.credit_hours
            )));
        }
        Ok(offering.credit_hours)
    }
}
