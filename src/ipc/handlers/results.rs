use crate::curriculum;
use crate::error::{Error, Result};
use crate::ipc::helpers::{conn, required_role, required_str, respond, session_term};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, GradingPolicy};
use crate::publish::{is_visible, require_staff};
use crate::reports::{build_report_card, compute_class_results, ClassResults, StudentSummary};
use crate::store::{self, ClassRecord, DocumentKey};
use rusqlite::Connection;
use serde_json::{json, Value};
use tracing::debug;

struct ClassView {
    class: ClassRecord,
    session: String,
    term: i64,
    policy: GradingPolicy,
    results: ClassResults,
}

fn load_class_view(conn: &Connection, class_id: &str, params: &Value) -> Result<ClassView> {
    let class = store::require_class(conn, class_id)?;
    let (session, term) = session_term(conn, params)?;
    let policy = policy::load_grading(conn)?;
    let subjects = curriculum::load_curriculum(conn)?
        .subjects_for_class(&class.name, class.tier.as_deref());
    let roster = store::list_students(conn, &class.id)?;
    let docs = store::documents_for_class(conn, &class.id, &session, term)?;
    let results = compute_class_results(&roster, &docs, &subjects, &policy);
    debug!(
        class_id = %class.id,
        session = %session,
        term,
        students = results.class_size,
        documents = docs.len(),
        "class results computed"
    );
    Ok(ClassView {
        class,
        session,
        term,
        policy,
        results,
    })
}

fn ranking_get(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    require_staff(required_role(&req.params, "viewerRole")?)?;
    let class_id = required_str(&req.params, "classId")?;
    let view = load_class_view(conn, &class_id, &req.params)?;

    let ranking: Vec<Value> = view
        .results
        .ranking
        .iter()
        .map(|r| {
            let student = view.results.student(&r.student_id);
            json!({
                "studentId": r.student_id,
                "displayName": student.map(|s| s.display_name.clone()),
                "studentNo": student.and_then(|s| s.student_no.clone()),
                "average": r.average,
                "position": r.position,
                "ordinal": r.ordinal
            })
        })
        .collect();

    Ok(json!({
        "classId": view.class.id,
        "className": view.class.name,
        "session": view.session,
        "term": view.term,
        "classSize": view.results.class_size,
        "ranking": ranking
    }))
}

fn broadsheet_open(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    require_staff(required_role(&req.params, "viewerRole")?)?;
    let class_id = required_str(&req.params, "classId")?;
    let view = load_class_view(conn, &class_id, &req.params)?;

    let results = serde_json::to_value(&view.results).map_err(Error::Encode)?;
    Ok(json!({
        "classId": view.class.id,
        "className": view.class.name,
        "session": view.session,
        "term": view.term,
        "results": results
    }))
}

fn report_card_open(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let viewer = required_role(&req.params, "viewerRole")?;
    let student_id = required_str(&req.params, "studentId")?;
    let student = store::require_student(conn, &student_id)?;
    let (session, term) = session_term(conn, &req.params)?;

    let doc = store::find_document(
        conn,
        DocumentKey {
            student_id: &student.id,
            session: &session,
            term,
        },
    )?;
    let is_passed = doc.as_ref().map(|d| d.is_passed).unwrap_or(false);

    if !is_visible(is_passed, viewer) {
        let class = store::require_class(conn, &student.class_id)?;
        debug!(student_id = %student.id, role = viewer.as_str(), "report card withheld");
        return Ok(json!({
            "visible": false,
            "status": "not_published",
            "student": StudentSummary::new(&student, &class),
            "session": session,
            "term": term
        }));
    }

    let view = load_class_view(conn, &student.class_id, &req.params)?;
    let summary = StudentSummary::new(&student, &view.class);
    let card = build_report_card(
        summary,
        &view.session,
        view.term,
        &view.results,
        doc.as_ref(),
        &view.policy,
    )
    .ok_or(Error::NotFound("student"))?;
    let card = serde_json::to_value(&card).map_err(Error::Encode)?;
    Ok(json!({ "visible": true, "reportCard": card }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "ranking.get" => ranking_get(state, req),
        "broadsheet.open" => broadsheet_open(state, req),
        "reportCard.open" => report_card_open(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
