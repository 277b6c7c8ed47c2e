use crate::calc::{clamp_component, compute_row};
use crate::curriculum::{self, canonical_subject};
use crate::error::{Error, Result};
use crate::ipc::helpers::{
    conn, patch_f64, patch_text, required_str, respond, session_term, Patch,
};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, EntryPolicy, GradingPolicy};
use crate::store::{self, DocumentKey, StoredRow, Traits};
use serde_json::{json, Value};
use tracing::{debug, info};

const MAX_COMMENT_CHARS: usize = 500;
const MAX_REMARK_CHARS: usize = 1000;
const MAX_TRAITS: usize = 30;
const MAX_TRAIT_NAME_CHARS: usize = 60;

/// Applies the entry policy to one incoming component. Returns the value to
/// store and whether it was clamped.
fn admit_component(
    field: &'static str,
    patch: Patch<f64>,
    max: f64,
    policy: &GradingPolicy,
) -> Result<(Patch<f64>, bool)> {
    let Patch::Set(v) = patch else {
        return Ok((patch, false));
    };
    if !v.is_finite() {
        return Err(Error::bad_params(format!("{} must be a finite number", field)));
    }
    let (clamped, moved) = clamp_component(v, max);
    if moved && policy.entry_policy == EntryPolicy::Reject {
        return Err(Error::OutOfRange {
            field,
            value: v,
            max,
        });
    }
    Ok((Patch::Set(clamped), moved))
}

fn scores_upsert_row(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    let subject_raw = required_str(&req.params, "subject")?;
    let student = store::require_student(conn, &student_id)?;
    let class = store::require_class(conn, &student.class_id)?;
    let (session, term) = session_term(conn, &req.params)?;
    let policy = policy::load_grading(conn)?;

    let subjects = curriculum::load_curriculum(conn)?
        .subjects_for_class(&class.name, class.tier.as_deref());
    let subject = canonical_subject(&subjects, &subject_raw)
        .ok_or_else(|| Error::UnknownSubject {
            subject: subject_raw.clone(),
        })?
        .to_string();

    let mut clamped: Vec<&'static str> = Vec::new();
    let mut admit = |field: &'static str, max: f64| -> Result<Patch<f64>> {
        let (p, moved) = admit_component(field, patch_f64(&req.params, field)?, max, &policy)?;
        if moved {
            clamped.push(field);
        }
        Ok(p)
    };
    let ca1 = admit("ca1", policy.ca1_max)?;
    let ca2 = admit("ca2", policy.ca2_max)?;
    let exam = admit("exam", policy.exam_max)?;
    let comment = patch_text(&req.params, "comment", MAX_COMMENT_CHARS)?;

    let key = DocumentKey {
        student_id: &student.id,
        session: &session,
        term,
    };
    let existing = store::find_document(conn, key)?.and_then(|d| {
        d.rows
            .into_iter()
            .find(|r| r.subject.eq_ignore_ascii_case(&subject))
    });
    let (old_ca1, old_ca2, old_exam, old_comment) = match existing {
        Some(r) => (r.ca1, r.ca2, r.exam, r.comment),
        None => (None, None, None, None),
    };
    let row = StoredRow {
        subject: subject.clone(),
        ca1: ca1.apply(old_ca1),
        ca2: ca2.apply(old_ca2),
        exam: exam.apply(old_exam),
        comment: comment.apply(old_comment),
    };

    let document_id = store::save_row(conn, key, &row)?;

    if !clamped.is_empty() {
        info!(
            student_id = %student.id,
            subject = %subject,
            fields = ?clamped,
            "out-of-range marks clamped on entry"
        );
    }
    debug!(student_id = %student.id, subject = %subject, session = %session, term, "row saved");

    let result = compute_row(row.ca1, row.ca2, row.exam, &policy);
    Ok(json!({
        "documentId": document_id,
        "studentId": student.id,
        "session": session,
        "term": term,
        "subject": subject,
        "recorded": row.has_marks(),
        "ca1": result.ca1,
        "ca2": result.ca2,
        "exam": result.exam,
        "total": result.total,
        "grade": result.grade,
        "remark": result.remark,
        "comment": row.comment,
        "clamped": clamped
    }))
}

fn parse_traits(params: &Value, key: &str) -> Result<Option<Traits>> {
    let raw = match params.get(key) {
        None => return Ok(None),
        Some(Value::Null) => return Ok(Some(Traits::new())),
        Some(v) => v
            .as_object()
            .ok_or_else(|| Error::bad_params(format!("{} must be an object", key)))?,
    };
    if raw.len() > MAX_TRAITS {
        return Err(Error::bad_params(format!(
            "{} may hold at most {} traits",
            key, MAX_TRAITS
        )));
    }
    let mut out = Traits::new();
    for (name, rating) in raw {
        let name = name.trim();
        if name.is_empty() || name.chars().count() > MAX_TRAIT_NAME_CHARS {
            return Err(Error::bad_params(format!(
                "{} trait names must be 1 to {} characters",
                key, MAX_TRAIT_NAME_CHARS
            )));
        }
        let r = rating
            .as_i64()
            .filter(|r| (1..=5).contains(r))
            .ok_or_else(|| {
                Error::bad_params(format!("{}.{} must be an integer from 1 to 5", key, name))
            })?;
        out.insert(name.to_string(), r);
    }
    Ok(Some(out))
}

fn parse_count(params: &Value, key: &str) -> Result<Option<i64>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_i64()
            .filter(|n| *n >= 0)
            .map(Some)
            .ok_or_else(|| Error::bad_params(format!("{} must be a non-negative integer", key))),
    }
}

fn scores_update_document(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    let student = store::require_student(conn, &student_id)?;
    let (session, term) = session_term(conn, &req.params)?;

    let affective = parse_traits(&req.params, "affective")?;
    let psychomotor = parse_traits(&req.params, "psychomotor")?;
    let present = parse_count(&req.params, "attendancePresent")?;
    let total = parse_count(&req.params, "attendanceTotal")?;
    let teacher_remark = patch_text(&req.params, "teacherRemark", MAX_REMARK_CHARS)?;
    let head_teacher_remark = patch_text(&req.params, "headTeacherRemark", MAX_REMARK_CHARS)?;

    let key = DocumentKey {
        student_id: &student.id,
        session: &session,
        term,
    };
    let mut fields = store::find_document(conn, key)?
        .map(|d| d.fields)
        .unwrap_or_default();
    if let Some(t) = affective {
        fields.affective = t;
    }
    if let Some(t) = psychomotor {
        fields.psychomotor = t;
    }
    if let Some(n) = present {
        fields.attendance_present = n;
    }
    if let Some(n) = total {
        fields.attendance_total = n;
    }
    fields.teacher_remark = teacher_remark.apply(fields.teacher_remark.take());
    fields.head_teacher_remark = head_teacher_remark.apply(fields.head_teacher_remark.take());

    if fields.attendance_present > fields.attendance_total {
        return Err(Error::bad_params(format!(
            "attendancePresent ({}) must not exceed attendanceTotal ({})",
            fields.attendance_present, fields.attendance_total
        )));
    }

    let document_id = store::save_document_fields(conn, key, &fields)?;

    Ok(json!({
        "documentId": document_id,
        "studentId": student.id,
        "session": session,
        "term": term,
        "affective": fields.affective,
        "psychomotor": fields.psychomotor,
        "attendance": {
            "present": fields.attendance_present,
            "total": fields.attendance_total
        },
        "teacherRemark": fields.teacher_remark,
        "headTeacherRemark": fields.head_teacher_remark
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "scores.upsertRow" => scores_upsert_row(state, req),
        "scores.updateDocument" => scores_update_document(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
