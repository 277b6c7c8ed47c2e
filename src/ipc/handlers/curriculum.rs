use crate::curriculum::{self, class_tier, normalize_subject_list, Tier};
use crate::db::now_rfc3339;
use crate::error::{Error, Result};
use crate::ipc::helpers::{conn, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::store;
use serde_json::{json, Value};
use tracing::info;

fn required_tier(params: &Value) -> Result<Tier> {
    let raw = required_str(params, "tier")?;
    Tier::parse(&raw)
        .ok_or_else(|| Error::bad_params("tier must be one of: nursery, primary, jss, sss"))
}

fn curriculum_get(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let class_id = required_str(&req.params, "classId")?;
    let class = store::require_class(conn, &class_id)?;
    let curriculum = curriculum::load_curriculum(conn)?;

    let tier = class_tier(&class.name, class.tier.as_deref());
    Ok(json!({
        "classId": class.id,
        "tier": tier.map(|t| t.as_str()),
        "subjects": curriculum.subjects_for(tier),
        "overridden": tier.map(|t| curriculum.is_overridden(t)).unwrap_or(false)
    }))
}

fn curriculum_list(state: &mut AppState) -> Result<Value> {
    let conn = conn(state)?;
    let curriculum = curriculum::load_curriculum(conn)?;
    let tiers: Vec<Value> = Tier::ALL
        .iter()
        .map(|t| {
            json!({
                "tier": t.as_str(),
                "subjects": curriculum.subjects_for(Some(*t)),
                "overridden": curriculum.is_overridden(*t)
            })
        })
        .collect();
    Ok(json!({ "tiers": tiers }))
}

fn curriculum_set(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let tier = required_tier(&req.params)?;
    let raw: Vec<String> = req
        .params
        .get("subjects")
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::bad_params("subjects must be an array"))?
        .iter()
        .map(|v| {
            v.as_str()
                .map(|s| s.to_string())
                .ok_or_else(|| Error::bad_params("subjects must contain strings"))
        })
        .collect::<Result<Vec<_>>>()?;
    let subjects = normalize_subject_list(&raw).map_err(Error::BadParams)?;

    let subjects_json = serde_json::to_string(&subjects).map_err(Error::Encode)?;
    conn.execute(
        "INSERT INTO curricula(tier, subjects_json, updated_at) VALUES(?, ?, ?)
         ON CONFLICT(tier) DO UPDATE SET
           subjects_json = excluded.subjects_json,
           updated_at = excluded.updated_at",
        (tier.as_str(), &subjects_json, now_rfc3339()),
    )
    .map_err(Error::Update)?;
    info!(tier = tier.as_str(), subjects = subjects.len(), "curriculum overridden");

    Ok(json!({ "tier": tier.as_str(), "subjects": subjects }))
}

fn curriculum_reset(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let tier = required_tier(&req.params)?;
    let removed = conn
        .execute("DELETE FROM curricula WHERE tier = ?", [tier.as_str()])
        .map_err(Error::Update)?;
    let curriculum = curriculum::load_curriculum(conn)?;
    Ok(json!({
        "tier": tier.as_str(),
        "removed": removed > 0,
        "subjects": curriculum.subjects_for(Some(tier))
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "curriculum.get" => curriculum_get(state, req),
        "curriculum.list" => curriculum_list(state),
        "curriculum.set" => curriculum_set(state, req),
        "curriculum.reset" => curriculum_reset(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
