use crate::db::now_rfc3339;
use crate::error::{Error, Result};
use crate::ipc::helpers::{conn, optional_str, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::store;
use rusqlite::{Connection, OptionalExtension};
use serde_json::{json, Value};
use std::collections::HashSet;
use uuid::Uuid;

const MAX_NAME_CHARS: usize = 80;

fn validate_name_part(key: &str, value: &str) -> Result<()> {
    if value.chars().count() > MAX_NAME_CHARS {
        return Err(Error::bad_params(format!(
            "{} must be at most {} characters",
            key, MAX_NAME_CHARS
        )));
    }
    Ok(())
}

fn ensure_student_no_free(
    conn: &Connection,
    class_id: &str,
    student_no: &str,
    except_id: Option<&str>,
) -> Result<()> {
    let taken: Option<String> = conn
        .query_row(
            "SELECT id FROM students WHERE class_id = ? AND student_no = ?",
            (class_id, student_no),
            |r| r.get(0),
        )
        .optional()
        .map_err(Error::Query)?;
    match taken {
        Some(id) if Some(id.as_str()) != except_id => Err(Error::Conflict(format!(
            "student number {} is already used in this class",
            student_no
        ))),
        _ => Ok(()),
    }
}

fn students_list(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    store::require_class(conn, &class_id)?;
    let students = store::list_students(conn, &class_id)?;
    let out: Vec<Value> = students
        .iter()
        .map(|s| {
            json!({
                "id": s.id,
                "lastName": s.last_name,
                "firstName": s.first_name,
                "displayName": s.display_name(),
                "studentNo": s.student_no,
                "sortOrder": s.sort_order
            })
        })
        .collect();
    Ok(json!({ "students": out }))
}

fn students_create(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let last_name = required_str(&req.params, "lastName")?;
    let first_name = required_str(&req.params, "firstName")?;
    validate_name_part("lastName", &last_name)?;
    validate_name_part("firstName", &first_name)?;
    let student_no = optional_str(&req.params, "studentNo")?.filter(|s| !s.is_empty());

    store::require_class(conn, &class_id)?;
    if let Some(no) = &student_no {
        ensure_student_no_free(conn, &class_id, no, None)?;
    }

    let sort_order: i64 = conn
        .query_row(
            "SELECT COALESCE(MAX(sort_order), -1) + 1 FROM students WHERE class_id = ?",
            [&class_id],
            |r| r.get(0),
        )
        .map_err(Error::Query)?;
    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, class_id, last_name, first_name, student_no, sort_order, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &student_id,
            &class_id,
            &last_name,
            &first_name,
            &student_no,
            sort_order,
            now_rfc3339(),
        ),
    )
    .map_err(Error::Update)?;

    Ok(json!({ "studentId": student_id, "sortOrder": sort_order }))
}

fn students_update(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let student_id = required_str(&req.params, "studentId")?;
    let mut student = store::require_student(conn, &student_id)?;

    if req.params.get("lastName").is_some() {
        student.last_name = required_str(&req.params, "lastName")?;
        validate_name_part("lastName", &student.last_name)?;
    }
    if req.params.get("firstName").is_some() {
        student.first_name = required_str(&req.params, "firstName")?;
        validate_name_part("firstName", &student.first_name)?;
    }
    if req.params.get("studentNo").is_some() {
        student.student_no = optional_str(&req.params, "studentNo")?.filter(|s| !s.is_empty());
        if let Some(no) = &student.student_no {
            ensure_student_no_free(conn, &student.class_id, no, Some(&student.id))?;
        }
    }

    conn.execute(
        "UPDATE students SET last_name = ?, first_name = ?, student_no = ?, updated_at = ?
         WHERE id = ?",
        (
            &student.last_name,
            &student.first_name,
            &student.student_no,
            now_rfc3339(),
            &student.id,
        ),
    )
    .map_err(Error::Update)?;
    Ok(json!({ "studentId": student.id, "displayName": student.display_name() }))
}

/// Roster order drives the default ranking tie-break, so a reorder must name
/// every student of the class exactly once.
fn students_reorder(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let ordered: Vec<String> = req
        .params
        .get("orderedStudentIds")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::bad_params("orderedStudentIds must be an array"))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| Error::bad_params("orderedStudentIds must contain strings"))
        })
        .collect::<Result<Vec<_>>>()?;

    store::require_class(conn, &class_id)?;
    let current: HashSet<String> = store::list_students(conn, &class_id)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    let requested: HashSet<String> = ordered.iter().cloned().collect();
    if requested.len() != ordered.len() || requested != current {
        return Err(Error::bad_params(
            "orderedStudentIds must list every student of the class exactly once",
        ));
    }

    let tx = conn.unchecked_transaction().map_err(Error::Update)?;
    for (i, id) in ordered.iter().enumerate() {
        tx.execute(
            "UPDATE students SET sort_order = ? WHERE id = ?",
            (i as i64, id),
        )
        .map_err(Error::Update)?;
    }
    tx.commit().map_err(Error::Update)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "students.list" => students_list(state, req),
        "students.create" => students_create(state, req),
        "students.update" => students_update(state, req),
        "students.reorder" => students_reorder(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
