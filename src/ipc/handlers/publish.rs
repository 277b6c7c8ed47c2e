use crate::error::{Error, Result};
use crate::ipc::helpers::{conn, optional_str, required_bool, required_role, respond, session_term};
use crate::ipc::types::{AppState, Request};
use crate::publish::require_publisher;
use crate::store::{self, DocumentKey};
use serde_json::{json, Value};
use tracing::info;

/// Publishes or unpublishes either a whole class or a single student for one
/// session+term. Exactly one of `classId` / `studentId` must be given.
fn scores_set_published(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let actor = required_role(&req.params, "actorRole")?;
    require_publisher(actor)?;
    let publish = required_bool(&req.params, "published")?;

    let class_id = optional_str(&req.params, "classId")?.filter(|s| !s.is_empty());
    let student_id = optional_str(&req.params, "studentId")?.filter(|s| !s.is_empty());
    let (session, term) = session_term(conn, &req.params)?;

    let (scope, student_ids) = match (class_id, student_id) {
        (Some(class_id), None) => {
            store::require_class(conn, &class_id)?;
            let ids: Vec<String> = store::list_students(conn, &class_id)?
                .into_iter()
                .map(|s| s.id)
                .collect();
            (json!({ "classId": class_id }), ids)
        }
        (None, Some(student_id)) => {
            let student = store::require_student(conn, &student_id)?;
            let key = DocumentKey {
                student_id: &student.id,
                session: &session,
                term,
            };
            if store::find_document(conn, key)?.is_none() {
                return Err(Error::NotFound("score document"));
            }
            (json!({ "studentId": student.id }), vec![student.id])
        }
        _ => {
            return Err(Error::bad_params(
                "provide exactly one of classId or studentId",
            ))
        }
    };

    let outcome = store::set_published(conn, &student_ids, &session, term, publish)?;
    info!(
        role = actor.as_str(),
        scope = %scope,
        session = %session,
        term,
        published = publish,
        changed = outcome.changed,
        total = outcome.total,
        "publish state updated"
    );

    Ok(json!({
        "scope": scope,
        "session": session,
        "term": term,
        "published": publish,
        "changed": outcome.changed,
        "total": outcome.total
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "scores.setPublished" => scores_set_published(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
