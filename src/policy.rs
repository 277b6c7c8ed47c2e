use crate::db;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EntryPolicy {
    /// Out-of-range marks are pulled back into `[0, max]` and accepted.
    Clamp,
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum AverageDivisor {
    /// Divide by the class curriculum size; missing subjects count as zero.
    Expected,
    /// Divide by the number of rows actually recorded.
    Recorded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TieBreak {
    RosterOrder,
    StudentNo,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PositionMode {
    /// 1, 2, 3, 4 even when averages tie.
    Sequential,
    /// Competition ranking: 1, 2, 2, 4.
    Shared,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradeBand {
    /// Lower bound, as a percentage of the subject maximum.
    pub min: f64,
    pub grade: String,
    #[serde(default)]
    pub remark: String,
}

impl GradeBand {
    fn new(min: f64, grade: &str, remark: &str) -> Self {
        Self {
            min,
            grade: grade.to_string(),
            remark: remark.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GradingPolicy {
    pub ca1_max: f64,
    pub ca2_max: f64,
    pub exam_max: f64,
    pub bands: Vec<GradeBand>,
    pub entry_policy: EntryPolicy,
    pub average_divisor: AverageDivisor,
    pub tie_break: TieBreak,
    pub position_mode: PositionMode,
}

impl Default for GradingPolicy {
    fn default() -> Self {
        Self {
            ca1_max: 20.0,
            ca2_max: 20.0,
            exam_max: 60.0,
            bands: vec![
                GradeBand::new(70.0, "A", "Excellent"),
                GradeBand::new(60.0, "B", "Very Good"),
                GradeBand::new(50.0, "C", "Good"),
                GradeBand::new(45.0, "D", "Fair"),
                GradeBand::new(40.0, "E", "Pass"),
                GradeBand::new(0.0, "F", "Fail"),
            ],
            entry_policy: EntryPolicy::Clamp,
            average_divisor: AverageDivisor::Expected,
            tie_break: TieBreak::RosterOrder,
            position_mode: PositionMode::Sequential,
        }
    }
}

impl GradingPolicy {
    pub fn subject_max(&self) -> f64 {
        self.ca1_max + self.ca2_max + self.exam_max
    }

    pub fn validate(&self) -> Result<(), String> {
        for (name, v) in [
            ("ca1Max", self.ca1_max),
            ("ca2Max", self.ca2_max),
            ("examMax", self.exam_max),
        ] {
            if !v.is_finite() || v < 0.0 {
                return Err(format!("{} must be a non-negative number", name));
            }
        }
        if self.subject_max() <= 0.0 {
            return Err("ca1Max + ca2Max + examMax must be > 0".to_string());
        }
        validate_bands(&self.bands)
    }

    /// Applies a partial update. Unknown keys and wrongly typed values are
    /// rejected; on error `self` is left untouched.
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        let mut next = self.clone();
        for (k, v) in patch {
            match k.as_str() {
                "ca1Max" => next.ca1_max = parse_number(v, k)?,
                "ca2Max" => next.ca2_max = parse_number(v, k)?,
                "examMax" => next.exam_max = parse_number(v, k)?,
                "bands" => next.bands = parse_typed(v, k)?,
                "entryPolicy" => next.entry_policy = parse_typed(v, k)?,
                "averageDivisor" => next.average_divisor = parse_typed(v, k)?,
                "tieBreak" => next.tie_break = parse_typed(v, k)?,
                "positionMode" => next.position_mode = parse_typed(v, k)?,
                _ => return Err(format!("unknown grading field: {}", k)),
            }
        }
        next.validate()?;
        *self = next;
        Ok(())
    }
}

/// Bands must be ordered by strictly descending `min`, use distinct letters,
/// and end at 0 so every total lands in exactly one band.
pub fn validate_bands(bands: &[GradeBand]) -> Result<(), String> {
    if bands.is_empty() {
        return Err("bands must not be empty".to_string());
    }
    let mut prev: Option<f64> = None;
    for (i, b) in bands.iter().enumerate() {
        if b.grade.trim().is_empty() {
            return Err(format!("bands[{}].grade must not be empty", i));
        }
        if !b.min.is_finite() || b.min < 0.0 || b.min > 100.0 {
            return Err(format!("bands[{}].min must be between 0 and 100", i));
        }
        if let Some(p) = prev {
            if b.min >= p {
                return Err("bands must be ordered by strictly descending min".to_string());
            }
        }
        if bands[..i].iter().any(|o| o.grade.eq_ignore_ascii_case(&b.grade)) {
            return Err(format!("duplicate grade letter: {}", b.grade));
        }
        prev = Some(b.min);
    }
    if prev != Some(0.0) {
        return Err("the lowest band must start at 0".to_string());
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SchoolSettings {
    pub current_session: String,
    pub current_term: i64,
    pub terms_per_session: i64,
}

impl Default for SchoolSettings {
    fn default() -> Self {
        Self {
            current_session: String::new(),
            current_term: 1,
            terms_per_session: 3,
        }
    }
}

impl SchoolSettings {
    pub fn apply_patch(&mut self, patch: &Map<String, Value>) -> Result<(), String> {
        let mut next = self.clone();
        for (k, v) in patch {
            match k.as_str() {
                "currentSession" => {
                    let s = v
                        .as_str()
                        .ok_or_else(|| format!("{} must be a string", k))?
                        .trim();
                    if s.chars().count() > 40 {
                        return Err(format!("{} must be at most 40 characters", k));
                    }
                    next.current_session = s.to_string();
                }
                "currentTerm" => next.current_term = parse_int(v, k)?,
                "termsPerSession" => {
                    let n = parse_int(v, k)?;
                    if !(1..=4).contains(&n) {
                        return Err(format!("{} must be between 1 and 4", k));
                    }
                    next.terms_per_session = n;
                }
                _ => return Err(format!("unknown school field: {}", k)),
            }
        }
        if !(1..=next.terms_per_session).contains(&next.current_term) {
            return Err(format!(
                "currentTerm must be between 1 and {}",
                next.terms_per_session
            ));
        }
        *self = next;
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SettingsSection {
    School,
    Grading,
}

impl SettingsSection {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "school" => Some(Self::School),
            "grading" => Some(Self::Grading),
            _ => None,
        }
    }

    pub fn key(self) -> &'static str {
        match self {
            Self::School => "settings.school",
            Self::Grading => "settings.grading",
        }
    }
}

fn parse_number(v: &Value, key: &str) -> Result<f64, String> {
    v.as_f64().ok_or_else(|| format!("{} must be a number", key))
}

fn parse_int(v: &Value, key: &str) -> Result<i64, String> {
    v.as_i64().ok_or_else(|| format!("{} must be an integer", key))
}

fn parse_typed<T: serde::de::DeserializeOwned>(v: &Value, key: &str) -> Result<T, String> {
    serde_json::from_value(v.clone()).map_err(|e| format!("invalid {}: {}", key, e))
}

pub fn load_grading(conn: &Connection) -> anyhow::Result<GradingPolicy> {
    let mut policy = GradingPolicy::default();
    if let Some(saved) = db::settings_get_json(conn, SettingsSection::Grading.key())? {
        if let Some(obj) = saved.as_object() {
            // Malformed historical values must not block grading.
            if let Err(e) = policy.apply_patch(obj) {
                warn!(error = %e, "ignoring saved grading settings");
            }
        }
    }
    Ok(policy)
}

pub fn load_school(conn: &Connection) -> anyhow::Result<SchoolSettings> {
    let mut school = SchoolSettings::default();
    if let Some(saved) = db::settings_get_json(conn, SettingsSection::School.key())? {
        if let Some(obj) = saved.as_object() {
            if let Err(e) = school.apply_patch(obj) {
                warn!(error = %e, "ignoring saved school settings");
            }
        }
    }
    Ok(school)
}
