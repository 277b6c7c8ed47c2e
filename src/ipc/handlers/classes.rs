use crate::curriculum::{class_tier, Tier};
use crate::error::{Error, Result};
use crate::ipc::helpers::{conn, optional_str, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::{json, Value};
use uuid::Uuid;

const MAX_CLASS_NAME_CHARS: usize = 80;

fn parse_tier_param(params: &Value) -> Result<Option<String>> {
    match optional_str(params, "tier")? {
        None => Ok(None),
        Some(s) if s.is_empty() => Ok(None),
        Some(s) => Tier::parse(&s)
            .map(|t| Some(t.as_str().to_string()))
            .ok_or_else(|| Error::bad_params("tier must be one of: nursery, primary, jss, sss")),
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.chars().count() > MAX_CLASS_NAME_CHARS {
        return Err(Error::bad_params(format!(
            "name must be at most {} characters",
            MAX_CLASS_NAME_CHARS
        )));
    }
    Ok(())
}

fn classes_list(state: &mut AppState) -> Result<Value> {
    let Ok(conn) = conn(state) else {
        return Ok(json!({ "classes": [] }));
    };

    let mut stmt = conn
        .prepare(
            "SELECT
               c.id,
               c.name,
               c.tier,
               (SELECT COUNT(*) FROM students s WHERE s.class_id = c.id) AS student_count
             FROM classes c
             ORDER BY c.name",
        )
        .map_err(Error::Query)?;
    let classes = stmt
        .query_map([], |row| {
            let id: String = row.get(0)?;
            let name: String = row.get(1)?;
            let tier: Option<String> = row.get(2)?;
            let student_count: i64 = row.get(3)?;
            let resolved = class_tier(&name, tier.as_deref()).map(|t| t.as_str());
            Ok(json!({
                "id": id,
                "name": name,
                "tier": tier,
                "resolvedTier": resolved,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<std::result::Result<Vec<_>, _>>())
        .map_err(Error::Query)?;
    Ok(json!({ "classes": classes }))
}

fn classes_create(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let name = required_str(&req.params, "name")?;
    validate_name(&name)?;
    let tier = parse_tier_param(&req.params)?;

    let class_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO classes(id, name, tier) VALUES(?, ?, ?)",
        (&class_id, &name, &tier),
    )
    .map_err(Error::Update)?;

    let resolved = class_tier(&name, tier.as_deref()).map(|t| t.as_str());
    Ok(json!({
        "classId": class_id,
        "name": name,
        "tier": tier,
        "resolvedTier": resolved
    }))
}

fn classes_update(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let mut class = store::require_class(conn, &class_id)?;

    if req.params.get("name").is_some() {
        let name = required_str(&req.params, "name")?;
        validate_name(&name)?;
        class.name = name;
    }
    if req.params.get("tier").is_some() {
        class.tier = parse_tier_param(&req.params)?;
    }

    conn.execute(
        "UPDATE classes SET name = ?, tier = ? WHERE id = ?",
        (&class.name, &class.tier, &class.id),
    )
    .map_err(Error::Update)?;

    let resolved = class_tier(&class.name, class.tier.as_deref()).map(|t| t.as_str());
    Ok(json!({
        "classId": class.id,
        "name": class.name,
        "tier": class.tier,
        "resolvedTier": resolved
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "classes.list" => classes_list(state),
        "classes.create" => classes_create(state, req),
        "classes.update" => classes_update(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
