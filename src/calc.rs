use crate::policy::{AverageDivisor, GradeBand, GradingPolicy, PositionMode, TieBreak};
use serde::Serialize;
use std::cmp::Ordering;

/// Half-up rounding to 2 decimals: `Int(100*x + 0.5) / 100`.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Pulls a component mark into `[0, max]`. Returns the value and whether it
/// had to be moved. NaN counts as 0.
pub fn clamp_component(value: f64, max: f64) -> (f64, bool) {
    if value.is_nan() {
        return (0.0, true);
    }
    if value < 0.0 {
        return (0.0, true);
    }
    if value > max {
        return (max, true);
    }
    (value, false)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowResult {
    pub ca1: f64,
    pub ca2: f64,
    pub exam: f64,
    pub total: f64,
    pub grade: String,
    pub remark: String,
    /// Components that were outside their cap and got clamped.
    pub clamped: Vec<&'static str>,
}

/// Total and grade for one subject row. Missing components count as 0.
pub fn compute_row(
    ca1: Option<f64>,
    ca2: Option<f64>,
    exam: Option<f64>,
    policy: &GradingPolicy,
) -> RowResult {
    let mut clamped = Vec::new();
    let mut take = |name: &'static str, v: Option<f64>, max: f64| -> f64 {
        let (out, moved) = clamp_component(v.unwrap_or(0.0), max);
        if moved {
            clamped.push(name);
        }
        out
    };
    let ca1 = take("ca1", ca1, policy.ca1_max);
    let ca2 = take("ca2", ca2, policy.ca2_max);
    let exam = take("exam", exam, policy.exam_max);

    let total = ca1 + ca2 + exam;
    let band = grade_for_total(total, policy);
    RowResult {
        ca1,
        ca2,
        exam,
        total,
        grade: band.grade.clone(),
        remark: band.remark.clone(),
        clamped,
    }
}

/// Grade band for a total on the subject scale (`ca1Max + ca2Max + examMax`).
pub fn grade_for_total(total: f64, policy: &GradingPolicy) -> &GradeBand {
    let max = policy.subject_max();
    let percent = if max > 0.0 { 100.0 * total / max } else { 0.0 };
    grade_for_percent(percent, &policy.bands)
}

/// First band whose `min` the percentage reaches. Bands are validated to be
/// descending and to end at 0, so the last band catches everything else.
pub fn grade_for_percent(percent: f64, bands: &[GradeBand]) -> &GradeBand {
    bands
        .iter()
        .find(|b| percent >= b.min)
        .or_else(|| bands.last())
        .unwrap_or(&FALLBACK_BAND)
}

static FALLBACK_BAND: GradeBand = GradeBand {
    min: 0.0,
    grade: String::new(),
    remark: String::new(),
};

/// Student average over `(subject, total)` pairs.
///
/// With [`AverageDivisor::Expected`] only subjects of the class curriculum
/// contribute and the divisor is the curriculum size, so ungraded subjects
/// pull the average down. With [`AverageDivisor::Recorded`] every recorded
/// row counts and the divisor is the row count. A zero divisor gives 0.0.
pub fn compute_average<'a, I>(rows: I, expected: &[String], divisor: AverageDivisor) -> f64
where
    I: IntoIterator<Item = (&'a str, f64)>,
{
    let mut sum = 0.0_f64;
    let mut count = 0_usize;
    for (subject, total) in rows {
        match divisor {
            AverageDivisor::Expected => {
                if expected.iter().any(|s| s.eq_ignore_ascii_case(subject)) {
                    sum += total;
                }
            }
            AverageDivisor::Recorded => {
                sum += total;
                count += 1;
            }
        }
    }
    let denom = match divisor {
        AverageDivisor::Expected => expected.len(),
        AverageDivisor::Recorded => count,
    };
    if denom == 0 {
        return 0.0;
    }
    round_off_2_decimals(sum / (denom as f64))
}

#[derive(Debug, Clone)]
pub struct RankInput {
    pub student_id: String,
    pub student_no: Option<String>,
    /// Position in the class roster (`students.sort_order`).
    pub roster_index: usize,
    pub average: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RankedStudent {
    pub student_id: String,
    pub average: f64,
    pub position: usize,
    pub ordinal: String,
}

/// Orders a class by average, highest first, and assigns 1-based positions.
pub fn rank(
    entries: &[RankInput],
    tie_break: TieBreak,
    position_mode: PositionMode,
) -> Vec<RankedStudent> {
    let mut order: Vec<&RankInput> = entries.iter().collect();
    order.sort_by(|a, b| {
        b.average
            .partial_cmp(&a.average)
            .unwrap_or(Ordering::Equal)
            .then_with(|| match tie_break {
                TieBreak::RosterOrder => a.roster_index.cmp(&b.roster_index),
                TieBreak::StudentNo => cmp_student_no(&a.student_no, &b.student_no)
                    .then_with(|| a.student_id.cmp(&b.student_id)),
            })
    });

    let mut out: Vec<RankedStudent> = Vec::with_capacity(order.len());
    for (i, e) in order.into_iter().enumerate() {
        let position = match (position_mode, out.last()) {
            (PositionMode::Shared, Some(prev)) if prev.average == e.average => prev.position,
            _ => i + 1,
        };
        out.push(RankedStudent {
            student_id: e.student_id.clone(),
            average: e.average,
            position,
            ordinal: ordinal(position),
        });
    }
    out
}

// Students without a number sort after those with one.
fn cmp_student_no(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(x), Some(y)) => x.cmp(y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// 1 -> "1st", 12 -> "12th", 22 -> "22nd".
pub fn ordinal(n: usize) -> String {
    let suffix = match (n % 100, n % 10) {
        (11..=13, _) => "th",
        (_, 1) => "st",
        (_, 2) => "nd",
        (_, 3) => "rd",
        _ => "th",
    };
    format!("{}{}", n, suffix)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectStats {
    pub subject: String,
    pub recorded_count: usize,
    pub class_average: Option<f64>,
    pub highest: Option<f64>,
    pub lowest: Option<f64>,
    pub median: Option<f64>,
}

/// Class statistics for one subject over the students that have a row.
pub fn subject_stats(subject: &str, totals: &[f64]) -> SubjectStats {
    if totals.is_empty() {
        return SubjectStats {
            subject: subject.to_string(),
            recorded_count: 0,
            class_average: None,
            highest: None,
            lowest: None,
            median: None,
        };
    }
    let sum: f64 = totals.iter().sum();
    let highest = totals.iter().copied().fold(f64::MIN, f64::max);
    let lowest = totals.iter().copied().fold(f64::MAX, f64::min);
    SubjectStats {
        subject: subject.to_string(),
        recorded_count: totals.len(),
        class_average: Some(round_off_2_decimals(sum / (totals.len() as f64))),
        highest: Some(highest),
        lowest: Some(lowest),
        median: Some(round_off_2_decimals(compute_median(totals))),
    }
}

fn compute_median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let n = sorted.len();
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[(n / 2) - 1] + sorted[n / 2]) / 2.0
    }
}
