use crate::db;
use crate::error::{Error, Result};
use crate::ipc::helpers::{conn, required_str, respond};
use crate::ipc::types::{AppState, Request};
use crate::policy::{self, SettingsSection};
use serde_json::{json, Value};
use tracing::info;

fn settings_get(state: &mut AppState) -> Result<Value> {
    let conn = conn(state)?;
    let school = policy::load_school(conn)?;
    let grading = policy::load_grading(conn)?;
    Ok(json!({
        "school": school,
        "grading": grading
    }))
}

fn settings_update(state: &mut AppState, req: &Request) -> Result<Value> {
    let conn = conn(state)?;
    let section_raw = required_str(&req.params, "section")?;
    let section = SettingsSection::parse(&section_raw)
        .ok_or_else(|| Error::bad_params("section must be one of: school, grading"))?;
    let patch = req
        .params
        .get("patch")
        .and_then(|v| v.as_object())
        .ok_or_else(|| Error::bad_params("patch must be an object"))?;

    let current = match section {
        SettingsSection::School => {
            let mut school = policy::load_school(conn)?;
            school.apply_patch(patch).map_err(Error::BadParams)?;
            serde_json::to_value(&school).map_err(Error::Encode)?
        }
        SettingsSection::Grading => {
            let mut grading = policy::load_grading(conn)?;
            grading.apply_patch(patch).map_err(Error::BadParams)?;
            serde_json::to_value(&grading).map_err(Error::Encode)?
        }
    };

    db::settings_set_json(conn, section.key(), &current)?;
    info!(section = section.key(), "settings updated");
    Ok(json!({ "section": section_raw, "value": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let result = match req.method.as_str() {
        "settings.get" => settings_get(state),
        "settings.update" => settings_update(state, req),
        _ => return None,
    };
    Some(respond(req, result))
}
