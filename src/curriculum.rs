use rusqlite::Connection;
use std::collections::HashMap;

const MAX_SUBJECTS: usize = 40;
const MAX_SUBJECT_CHARS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Nursery,
    Primary,
    Jss,
    Sss,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Nursery, Tier::Primary, Tier::Jss, Tier::Sss];

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "nursery" => Some(Self::Nursery),
            "primary" => Some(Self::Primary),
            "jss" => Some(Self::Jss),
            "sss" => Some(Self::Sss),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Nursery => "nursery",
            Self::Primary => "primary",
            Self::Jss => "jss",
            Self::Sss => "sss",
        }
    }

    /// Derives a tier from a class name such as "JSS 1", "SS2" or "Primary 4".
    pub fn from_class_name(name: &str) -> Option<Self> {
        let norm: String = name
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();
        // Longer prefixes first: "sss" must win over "ss", "jss" over "js".
        const PREFIXES: [(&str, Tier); 9] = [
            ("nursery", Tier::Nursery),
            ("kg", Tier::Nursery),
            ("pre", Tier::Nursery),
            ("primary", Tier::Primary),
            ("pry", Tier::Primary),
            ("jss", Tier::Jss),
            ("js", Tier::Jss),
            ("sss", Tier::Sss),
            ("ss", Tier::Sss),
        ];
        PREFIXES
            .iter()
            .find(|(p, _)| norm.starts_with(p))
            .map(|(_, t)| *t)
    }

    fn builtin_subjects(self) -> &'static [&'static str] {
        match self {
            Self::Nursery => &[
                "Number Work",
                "Letter Work",
                "Rhymes",
                "Health Habits",
                "Social Habits",
                "Creative Arts",
            ],
            Self::Primary => &[
                "Mathematics",
                "English Language",
                "Basic Science and Technology",
                "Social Studies",
                "Civic Education",
                "Cultural and Creative Arts",
                "Verbal Reasoning",
                "Quantitative Reasoning",
            ],
            Self::Jss => &[
                "Mathematics",
                "English Language",
                "Basic Science",
                "Basic Technology",
                "Social Studies",
                "Civic Education",
                "Business Studies",
                "Computer Studies",
                "Agricultural Science",
                "Cultural and Creative Arts",
            ],
            Self::Sss => &[
                "Mathematics",
                "English Language",
                "Civic Education",
                "Physics",
                "Chemistry",
                "Biology",
                "Further Mathematics",
                "Economics",
                "Government",
                "Geography",
                "Literature in English",
            ],
        }
    }
}

/// Resolves the tier for a class: an explicit tier wins, otherwise the name
/// decides.
pub fn class_tier(name: &str, explicit_tier: Option<&str>) -> Option<Tier> {
    explicit_tier
        .and_then(Tier::parse)
        .or_else(|| Tier::from_class_name(name))
}

/// Built-in subject lists plus per-workspace overrides.
#[derive(Debug, Clone, Default)]
pub struct Curriculum {
    overrides: HashMap<Tier, Vec<String>>,
}

impl Curriculum {
    pub fn with_override(mut self, tier: Tier, subjects: Vec<String>) -> Self {
        self.overrides.insert(tier, subjects);
        self
    }

    pub fn is_overridden(&self, tier: Tier) -> bool {
        self.overrides.contains_key(&tier)
    }

    /// Ordered subjects for a tier. Unknown/absent tier yields an empty list.
    pub fn subjects_for(&self, tier: Option<Tier>) -> Vec<String> {
        let Some(tier) = tier else {
            return Vec::new();
        };
        match self.overrides.get(&tier) {
            Some(list) => list.clone(),
            None => tier
                .builtin_subjects()
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }

    pub fn subjects_for_class(&self, name: &str, explicit_tier: Option<&str>) -> Vec<String> {
        self.subjects_for(class_tier(name, explicit_tier))
    }
}

/// Case-insensitive lookup returning the curriculum's spelling.
pub fn canonical_subject<'a>(subjects: &'a [String], raw: &str) -> Option<&'a str> {
    let needle = raw.trim();
    subjects
        .iter()
        .find(|s| s.eq_ignore_ascii_case(needle))
        .map(|s| s.as_str())
}

pub fn normalize_subject_list(raw: &[String]) -> Result<Vec<String>, String> {
    if raw.is_empty() {
        return Err("subjects must not be empty".to_string());
    }
    if raw.len() > MAX_SUBJECTS {
        return Err(format!("at most {} subjects are allowed", MAX_SUBJECTS));
    }
    let mut out: Vec<String> = Vec::with_capacity(raw.len());
    for s in raw {
        let t = s.trim();
        if t.is_empty() {
            return Err("subject names must not be empty".to_string());
        }
        if t.chars().count() > MAX_SUBJECT_CHARS {
            return Err(format!(
                "subject names must be at most {} characters",
                MAX_SUBJECT_CHARS
            ));
        }
        if out.iter().any(|o| o.eq_ignore_ascii_case(t)) {
            return Err(format!("duplicate subject: {}", t));
        }
        out.push(t.to_string());
    }
    Ok(out)
}

pub fn load_curriculum(conn: &Connection) -> anyhow::Result<Curriculum> {
    let mut stmt = conn.prepare("SELECT tier, subjects_json FROM curricula")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut curriculum = Curriculum::default();
    for (tier_raw, subjects_json) in rows {
        let Some(tier) = Tier::parse(&tier_raw) else {
            continue;
        };
        let subjects: Vec<String> = serde_json::from_str(&subjects_json)?;
        curriculum = curriculum.with_override(tier, subjects);
    }
    Ok(curriculum)
}
