use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Store and request failures. The aggregation core itself never fails;
/// everything here happens at the workspace or IPC boundary.
#[derive(Error, Debug)]
pub enum Error {
    #[error("select a workspace first")]
    NoWorkspace,

    #[error("{0}")]
    BadParams(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("subject {subject:?} is not part of the curriculum for this class")]
    UnknownSubject { subject: String },

    #[error("{field} must be between 0 and {max}, got {value}")]
    OutOfRange {
        field: &'static str,
        value: f64,
        max: f64,
    },

    #[error("role {role} may not {action}")]
    Forbidden { role: String, action: &'static str },

    #[error("{0}")]
    Conflict(String),

    #[error("database query failed: {0}")]
    Query(#[source] rusqlite::Error),

    #[error("database update failed: {0}")]
    Update(#[source] rusqlite::Error),

    #[error("failed to encode {0}")]
    Encode(#[source] serde_json::Error),

    /// Settings or curriculum could not be read from the workspace.
    #[error(transparent)]
    Workspace(#[from] anyhow::Error),
}

impl Error {
    pub fn bad_params(message: impl Into<String>) -> Self {
        Self::BadParams(message.into())
    }

    /// Stable error code surfaced in IPC responses.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NoWorkspace => "no_workspace",
            Self::BadParams(_) => "bad_params",
            Self::NotFound(_) => "not_found",
            Self::UnknownSubject { .. } => "unknown_subject",
            Self::OutOfRange { .. } => "out_of_range",
            Self::Forbidden { .. } => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::Query(_) => "db_query_failed",
            Self::Update(_) => "db_update_failed",
            Self::Encode(_) => "encode_failed",
            Self::Workspace(_) => "workspace_read_failed",
        }
    }

    pub fn details(&self) -> Option<serde_json::Value> {
        match self {
            Self::UnknownSubject { subject } => Some(serde_json::json!({ "subject": subject })),
            Self::OutOfRange { field, value, max } => Some(serde_json::json!({
                "field": field,
                "value": value,
                "max": max
            })),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(Error::NoWorkspace.code(), "no_workspace");
        assert_eq!(Error::bad_params("x").code(), "bad_params");
        assert_eq!(
            Error::Forbidden {
                role: "teacher".into(),
                action: "publish results"
            }
            .code(),
            "forbidden"
        );
        assert_eq!(
            Error::Query(rusqlite::Error::QueryReturnedNoRows).code(),
            "db_query_failed"
        );
    }

    #[test]
    fn out_of_range_carries_details() {
        let e = Error::OutOfRange {
            field: "ca1",
            value: 25.0,
            max: 20.0,
        };
        let d = e.details().expect("details");
        assert_eq!(d["field"], "ca1");
        assert_eq!(d["max"], 20.0);
        assert_eq!(e.to_string(), "ca1 must be between 0 and 20, got 25");
    }

    #[test]
    fn encoding_failures_are_server_side() {
        let json_err = serde_json::from_str::<i64>("x").expect_err("not a number");
        let e = Error::Encode(json_err);
        assert_eq!(e.code(), "encode_failed");
        assert!(e.details().is_none());
    }
}
