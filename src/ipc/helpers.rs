use crate::error::{Error, Result};
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::policy;
use crate::publish::Role;
use rusqlite::Connection;
use serde_json::Value;
use tracing::warn;

/// Turns a handler result into a response line, logging failures.
pub fn respond(req: &Request, result: Result<Value>) -> Value {
    match result {
        Ok(v) => ok(&req.id, v),
        Err(e) => {
            warn!(id = %req.id, method = %req.method, code = e.code(), error = %e, "request failed");
            err(&req.id, e.code(), e.to_string(), e.details())
        }
    }
}

pub fn conn(state: &AppState) -> Result<&Connection> {
    state.db.as_ref().ok_or(Error::NoWorkspace)
}

pub fn required_str(params: &Value, key: &str) -> Result<String> {
    let s = params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| Error::bad_params(format!("missing {}", key)))?;
    if s.is_empty() {
        return Err(Error::bad_params(format!("{} must not be empty", key)));
    }
    Ok(s)
}

pub fn optional_str(params: &Value, key: &str) -> Result<Option<String>> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(_) => Err(Error::bad_params(format!("{} must be a string", key))),
    }
}

pub fn required_bool(params: &Value, key: &str) -> Result<bool> {
    params
        .get(key)
        .and_then(|v| v.as_bool())
        .ok_or_else(|| Error::bad_params(format!("{} must be a boolean", key)))
}

/// Three-state field for partial updates: absent keeps the stored value,
/// `null` clears it, a value replaces it.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch<T> {
    Keep,
    Clear,
    Set(T),
}

impl<T: Clone> Patch<T> {
    pub fn apply(&self, current: Option<T>) -> Option<T> {
        match self {
            Self::Keep => current,
            Self::Clear => None,
            Self::Set(v) => Some(v.clone()),
        }
    }
}

pub fn patch_f64(params: &Value, key: &str) -> Result<Patch<f64>> {
    match params.get(key) {
        None => Ok(Patch::Keep),
        Some(Value::Null) => Ok(Patch::Clear),
        Some(v) => v
            .as_f64()
            .map(Patch::Set)
            .ok_or_else(|| Error::bad_params(format!("{} must be a number or null", key))),
    }
}

pub fn patch_text(params: &Value, key: &str, max_chars: usize) -> Result<Patch<String>> {
    match params.get(key) {
        None => Ok(Patch::Keep),
        Some(Value::Null) => Ok(Patch::Clear),
        Some(Value::String(s)) => {
            let t = s.trim();
            if t.chars().count() > max_chars {
                return Err(Error::bad_params(format!(
                    "{} must be at most {} characters",
                    key, max_chars
                )));
            }
            if t.is_empty() {
                Ok(Patch::Clear)
            } else {
                Ok(Patch::Set(t.to_string()))
            }
        }
        Some(_) => Err(Error::bad_params(format!("{} must be a string or null", key))),
    }
}

pub fn required_role(params: &Value, key: &str) -> Result<Role> {
    let raw = required_str(params, key)?;
    Role::parse(&raw).ok_or_else(|| {
        Error::bad_params(format!(
            "{} must be one of: student, parent, teacher, admin, super_admin",
            key
        ))
    })
}

/// Session and term from the request, falling back to the workspace's
/// current session/term.
pub fn session_term(conn: &Connection, params: &Value) -> Result<(String, i64)> {
    let school = policy::load_school(conn)?;
    let session = match optional_str(params, "session")? {
        Some(s) if !s.is_empty() => s,
        _ => school.current_session.clone(),
    };
    if session.is_empty() {
        return Err(Error::bad_params(
            "missing session and no current session is configured",
        ));
    }
    let term = match params.get("term") {
        None | Some(Value::Null) => school.current_term,
        Some(v) => v
            .as_i64()
            .ok_or_else(|| Error::bad_params("term must be an integer"))?,
    };
    if !(1..=school.terms_per_session).contains(&term) {
        return Err(Error::bad_params(format!(
            "term must be between 1 and {}",
            school.terms_per_session
        )));
    }
    Ok((session, term))
}
