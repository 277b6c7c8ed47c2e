use crate::error::{Error, Result};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Student,
    Parent,
    Teacher,
    Admin,
    SuperAdmin,
}

impl Role {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "student" => Some(Self::Student),
            "parent" => Some(Self::Parent),
            "teacher" => Some(Self::Teacher),
            "admin" => Some(Self::Admin),
            "super_admin" | "superadmin" => Some(Self::SuperAdmin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Student => "student",
            Self::Parent => "parent",
            Self::Teacher => "teacher",
            Self::Admin => "admin",
            Self::SuperAdmin => "super_admin",
        }
    }

    pub fn is_learner_facing(self) -> bool {
        matches!(self, Self::Student | Self::Parent)
    }

    pub fn can_publish(self) -> bool {
        matches!(self, Self::Admin | Self::SuperAdmin)
    }
}

/// Learner-facing roles see a score document only once it is published.
/// Staff always see it.
pub fn is_visible(is_passed: bool, viewer: Role) -> bool {
    if viewer.is_learner_facing() {
        is_passed
    } else {
        true
    }
}

pub fn require_publisher(actor: Role) -> Result<()> {
    if actor.can_publish() {
        Ok(())
    } else {
        Err(Error::Forbidden {
            role: actor.as_str().to_string(),
            action: "publish or unpublish results",
        })
    }
}

/// Class-wide views (broadsheet) are staff-only.
pub fn require_staff(viewer: Role) -> Result<()> {
    if viewer.is_learner_facing() {
        Err(Error::Forbidden {
            role: viewer.as_str().to_string(),
            action: "open class-wide results",
        })
    } else {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum PublishState {
    Unpublished,
    Published,
}

impl PublishState {
    pub fn from_flag(is_passed: bool) -> Self {
        if is_passed {
            Self::Published
        } else {
            Self::Unpublished
        }
    }

    pub fn is_passed(self) -> bool {
        self == Self::Published
    }

    /// Returns the next state and whether it differs from the current one.
    pub fn transition(self, publish: bool) -> (Self, bool) {
        let next = Self::from_flag(publish);
        (next, next != self)
    }
}
