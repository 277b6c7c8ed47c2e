//! Class-level result models: broadsheet, ranking and report card.
//!
//! Every view goes through [`compute_class_results`], so averages and
//! positions are computed one way only. Rows whose subject is no longer in
//! the class curriculum are left out of the views and the averages.

use crate::calc::{
    compute_average, compute_row, grade_for_total, rank, round_off_2_decimals, subject_stats,
    RankInput, RankedStudent, SubjectStats,
};
use crate::policy::GradingPolicy;
use crate::store::{ClassRecord, ScoreDocument, StudentRecord, Traits};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubjectCell {
    pub subject: String,
    pub recorded: bool,
    pub ca1: Option<f64>,
    pub ca2: Option<f64>,
    pub exam: Option<f64>,
    pub total: Option<f64>,
    pub grade: Option<String>,
    pub remark: Option<String>,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentResult {
    pub student_id: String,
    pub display_name: String,
    pub student_no: Option<String>,
    pub cells: Vec<SubjectCell>,
    pub recorded_subjects: usize,
    pub average: f64,
    pub average_percent: f64,
    pub grade: String,
    pub position: usize,
    pub ordinal: String,
    pub has_document: bool,
    pub is_passed: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassResults {
    pub subjects: Vec<String>,
    pub class_size: usize,
    /// Roster order.
    pub students: Vec<StudentResult>,
    /// Highest average first.
    pub ranking: Vec<RankedStudent>,
    pub subject_stats: Vec<SubjectStats>,
}

impl ClassResults {
    pub fn student(&self, student_id: &str) -> Option<&StudentResult> {
        self.students.iter().find(|s| s.student_id == student_id)
    }
}

fn subject_cells(
    doc: Option<&ScoreDocument>,
    subjects: &[String],
    policy: &GradingPolicy,
) -> Vec<SubjectCell> {
    subjects
        .iter()
        .map(|subject| {
            let row = doc.and_then(|d| {
                d.rows
                    .iter()
                    .find(|r| r.subject.trim().eq_ignore_ascii_case(subject))
            });
            match row {
                Some(r) if r.has_marks() => {
                    let res = compute_row(r.ca1, r.ca2, r.exam, policy);
                    SubjectCell {
                        subject: subject.clone(),
                        recorded: true,
                        ca1: Some(res.ca1),
                        ca2: Some(res.ca2),
                        exam: Some(res.exam),
                        total: Some(res.total),
                        grade: Some(res.grade),
                        remark: Some(res.remark),
                        comment: r.comment.clone(),
                    }
                }
                _ => SubjectCell {
                    subject: subject.clone(),
                    recorded: false,
                    ca1: None,
                    ca2: None,
                    exam: None,
                    total: None,
                    grade: None,
                    remark: None,
                    comment: row.and_then(|r| r.comment.clone()),
                },
            }
        })
        .collect()
}

pub fn compute_class_results(
    roster: &[StudentRecord],
    docs: &HashMap<String, ScoreDocument>,
    subjects: &[String],
    policy: &GradingPolicy,
) -> ClassResults {
    let mut students: Vec<StudentResult> = Vec::with_capacity(roster.len());
    let mut rank_inputs: Vec<RankInput> = Vec::with_capacity(roster.len());
    let mut totals_by_subject: Vec<Vec<f64>> = vec![Vec::new(); subjects.len()];
    let subject_max = policy.subject_max();

    for (roster_index, s) in roster.iter().enumerate() {
        let doc = docs.get(&s.id);
        let cells = subject_cells(doc, subjects, policy);
        for (i, cell) in cells.iter().enumerate() {
            if let Some(t) = cell.total {
                totals_by_subject[i].push(t);
            }
        }
        let average = compute_average(
            cells
                .iter()
                .filter_map(|c| c.total.map(|t| (c.subject.as_str(), t))),
            subjects,
            policy.average_divisor,
        );
        let average_percent = if subject_max > 0.0 {
            round_off_2_decimals(100.0 * average / subject_max)
        } else {
            0.0
        };

        rank_inputs.push(RankInput {
            student_id: s.id.clone(),
            student_no: s.student_no.clone(),
            roster_index,
            average,
        });
        students.push(StudentResult {
            student_id: s.id.clone(),
            display_name: s.display_name(),
            student_no: s.student_no.clone(),
            recorded_subjects: cells.iter().filter(|c| c.recorded).count(),
            cells,
            average,
            average_percent,
            grade: grade_for_total(average, policy).grade.clone(),
            position: 0,
            ordinal: String::new(),
            has_document: doc.is_some(),
            is_passed: doc.map(|d| d.is_passed).unwrap_or(false),
        });
    }

    let ranking = rank(&rank_inputs, policy.tie_break, policy.position_mode);
    let index_by_id: HashMap<&str, usize> = students
        .iter()
        .enumerate()
        .map(|(i, s)| (s.student_id.as_str(), i))
        .collect();
    let placements: Vec<(usize, usize, String)> = ranking
        .iter()
        .filter_map(|r| {
            index_by_id
                .get(r.student_id.as_str())
                .map(|&i| (i, r.position, r.ordinal.clone()))
        })
        .collect();
    for (i, position, ordinal) in placements {
        students[i].position = position;
        students[i].ordinal = ordinal;
    }

    let subject_stats = subjects
        .iter()
        .zip(totals_by_subject.iter())
        .map(|(subject, totals)| subject_stats(subject, totals))
        .collect();

    ClassResults {
        subjects: subjects.to_vec(),
        class_size: roster.len(),
        students,
        ranking,
        subject_stats,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: String,
    pub display_name: String,
    pub student_no: Option<String>,
    pub class_id: String,
    pub class_name: String,
}

impl StudentSummary {
    pub fn new(student: &StudentRecord, class: &ClassRecord) -> Self {
        Self {
            id: student.id.clone(),
            display_name: student.display_name(),
            student_no: student.student_no.clone(),
            class_id: class.id.clone(),
            class_name: class.name.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRow {
    #[serde(flatten)]
    pub cell: SubjectCell,
    pub class_average: Option<f64>,
    pub class_highest: Option<f64>,
    pub class_lowest: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Attendance {
    pub present: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportCard {
    pub student: StudentSummary,
    pub session: String,
    pub term: i64,
    pub is_passed: bool,
    pub has_document: bool,
    pub rows: Vec<ReportRow>,
    pub average: f64,
    pub average_percent: f64,
    pub grade: String,
    pub grade_remark: String,
    pub position: usize,
    pub ordinal: String,
    pub class_size: usize,
    pub affective: Traits,
    pub psychomotor: Traits,
    pub attendance: Attendance,
    pub teacher_remark: Option<String>,
    pub head_teacher_remark: Option<String>,
}

/// Full report card for one student. Visibility is the caller's decision.
pub fn build_report_card(
    summary: StudentSummary,
    session: &str,
    term: i64,
    results: &ClassResults,
    doc: Option<&ScoreDocument>,
    policy: &GradingPolicy,
) -> Option<ReportCard> {
    let me = results.student(&summary.id)?;
    let rows = me
        .cells
        .iter()
        .zip(results.subject_stats.iter())
        .filter(|(cell, _)| cell.recorded)
        .map(|(cell, stats)| ReportRow {
            cell: cell.clone(),
            class_average: stats.class_average,
            class_highest: stats.highest,
            class_lowest: stats.lowest,
        })
        .collect();
    let band = grade_for_total(me.average, policy);
    let fields = doc.map(|d| d.fields.clone()).unwrap_or_default();

    Some(ReportCard {
        student: summary,
        session: session.to_string(),
        term,
        is_passed: me.is_passed,
        has_document: me.has_document,
        rows,
        average: me.average,
        average_percent: me.average_percent,
        grade: band.grade.clone(),
        grade_remark: band.remark.clone(),
        position: me.position,
        ordinal: me.ordinal.clone(),
        class_size: results.class_size,
        affective: fields.affective,
        psychomotor: fields.psychomotor,
        attendance: Attendance {
            present: fields.attendance_present,
            total: fields.attendance_total,
        },
        teacher_remark: fields.teacher_remark,
        head_teacher_remark: fields.head_teacher_remark,
    })
}
