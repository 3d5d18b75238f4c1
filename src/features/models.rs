use serde::{Deserialize, Serialize};

use crate::errors::{Result, TrackerError};

pub const MAX_CATEGORY_LEN: usize = 100;
pub const MAX_NAME_LEN: usize = 255;

pub const DEFAULT_PAGE_LIMIT: i64 = 50;
pub const MAX_PAGE_LIMIT: i64 = 1000;

/// A single trackable pass/fail work item.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    pub id: i64,
    pub priority: i64,
    pub category: String,
    pub name: String,
    pub description: String,
    pub steps: Vec<String>,
    pub passes: bool,
}

/// Creation payload. Text fields default to empty so that a missing field
/// is reported by [`NewFeature::validate`] by name instead of as a decode error.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NewFeature {
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default)]
    pub passes: bool,
}

impl NewFeature {
    pub fn new(category: &str, name: &str, description: &str, steps: &[&str]) -> Self {
        Self {
            category: category.to_string(),
            name: name.to_string(),
            description: description.to_string(),
            steps: steps.iter().map(|s| s.to_string()).collect(),
            priority: None,
            passes: false,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Decode a request payload, naming the field on any type mismatch or
    /// unknown key. `null` counts as absent. Emptiness is left to `validate`.
    pub fn from_json(value: &serde_json::Value, prefix: &str) -> Result<Self> {
        use serde_json::Value;

        let field = |name: &str| format!("{}{}", prefix, name);
        let map = value.as_object().ok_or_else(|| {
            let name = if prefix.is_empty() {
                "body".to_string()
            } else {
                prefix.trim_end_matches('.').to_string()
            };
            TrackerError::invalid_field(name, "feature must be a JSON object")
        })?;

        let mut feature = NewFeature::default();
        for (key, v) in map {
            if v.is_null() {
                continue;
            }
            match (key.as_str(), v) {
                ("category", Value::String(s)) => feature.category = s.clone(),
                ("name", Value::String(s)) => feature.name = s.clone(),
                ("description", Value::String(s)) => feature.description = s.clone(),
                ("steps", Value::Array(items)) => {
                    feature.steps = items
                        .iter()
                        .map(|item| item.as_str().map(str::to_string))
                        .collect::<Option<Vec<_>>>()
                        .ok_or_else(|| {
                            TrackerError::invalid_field(
                                field("steps"),
                                "steps must be a list of strings",
                            )
                        })?;
                }
                ("priority", Value::Number(n)) if n.is_i64() => feature.priority = n.as_i64(),
                ("passes", Value::Bool(false)) => {}
                ("passes", Value::Bool(true)) => {
                    return Err(TrackerError::invalid_field(
                        field(key.as_str()),
                        "new features always start failing; mark them passing with PATCH",
                    ));
                }
                ("category" | "name" | "description", _) => {
                    return Err(TrackerError::invalid_field(
                        field(key.as_str()),
                        format!("{} must be a string", key),
                    ));
                }
                ("steps", _) => {
                    return Err(TrackerError::invalid_field(
                        field(key.as_str()),
                        "steps must be a list of strings",
                    ));
                }
                ("priority", _) => {
                    return Err(TrackerError::invalid_field(
                        field(key.as_str()),
                        "priority must be an integer",
                    ));
                }
                ("passes", _) => {
                    return Err(TrackerError::invalid_field(
                        field(key.as_str()),
                        "passes must be a boolean",
                    ));
                }
                _ => {
                    return Err(TrackerError::invalid_field(
                        field(key.as_str()),
                        format!("unknown field `{}`", key),
                    ));
                }
            }
        }
        Ok(feature)
    }

    pub fn validate(&self) -> Result<()> {
        self.validate_with_prefix("")
    }

    /// Validate every required field, prefixing reported field names
    /// (`features[3].name`) so batch callers can point at the bad element.
    pub fn validate_with_prefix(&self, prefix: &str) -> Result<()> {
        let mut problems: Vec<(String, String)> = Vec::new();
        let mut check = |field: &str, problem: Option<String>| {
            if let Some(p) = problem {
                problems.push((format!("{}{}", prefix, field), p));
            }
        };

        check("category", text_problem(&self.category, Some(MAX_CATEGORY_LEN)));
        check("name", text_problem(&self.name, Some(MAX_NAME_LEN)));
        check("description", text_problem(&self.description, None));
        check(
            "steps",
            self.steps
                .is_empty()
                .then(|| "must contain at least one entry".to_string()),
        );

        if problems.is_empty() {
            return Ok(());
        }

        let message = problems
            .iter()
            .map(|(field, problem)| format!("{} {}", field, problem))
            .collect::<Vec<_>>()
            .join("; ");
        Err(TrackerError::Validation {
            message,
            fields: problems.into_iter().map(|(field, _)| field).collect(),
        })
    }
}

fn text_problem(value: &str, max_len: Option<usize>) -> Option<String> {
    if value.trim().is_empty() {
        return Some("is required and must not be empty".to_string());
    }
    match max_len {
        Some(max) if value.chars().count() > max => {
            Some(format!("must be at most {} characters", max))
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BulkCreateRequest {
    pub features: Vec<NewFeature>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BulkCreated {
    pub created: usize,
}

/// Equality filters accepted by `list`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeatureFilter {
    pub passes: Option<bool>,
    pub category: Option<String>,
}

impl FeatureFilter {
    pub fn passing(passes: bool) -> Self {
        Self {
            passes: Some(passes),
            category: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeaturePage {
    pub features: Vec<Feature>,
    /// Rows matching the filter before pagination.
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
    pub has_more: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct FeatureStats {
    pub passing: i64,
    pub total: i64,
    pub percentage: f64,
}

impl FeatureStats {
    pub fn from_counts(passing: i64, total: i64) -> Self {
        Self {
            passing,
            total,
            percentage: percentage(passing, total),
        }
    }
}

/// `passing / total * 100` rounded to one decimal place, halves to even;
/// `0.0` for an empty set.
pub fn percentage(passing: i64, total: i64) -> f64 {
    if total <= 0 {
        return 0.0;
    }
    let raw = passing as f64 / total as f64 * 100.0;
    (raw * 10.0).round_ties_even() / 10.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Health {
    pub status: String,
    pub database: String,
}

// ── Row mapping ───────────────────────────────────────────────────────

/// Raw row as stored; `steps` is a JSON array in a TEXT column.
pub(crate) struct FeatureRow {
    pub id: i64,
    pub priority: i64,
    pub category: String,
    pub name: String,
    pub description: String,
    pub steps: String,
    pub passes: bool,
}

impl FeatureRow {
    pub(crate) fn into_feature(self) -> Result<Feature> {
        let steps: Vec<String> = serde_json::from_str(&self.steps).map_err(|e| {
            anyhow::anyhow!("Corrupt steps column for feature {}: {}", self.id, e)
        })?;
        Ok(Feature {
            id: self.id,
            priority: self.priority,
            category: self.category,
            name: self.name,
            description: self.description,
            steps,
            passes: self.passes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentage_zero_total_is_zero() {
        assert_eq!(percentage(0, 0), 0.0);
        assert!(!percentage(0, 0).is_nan());
    }

    #[test]
    fn test_percentage_rounds_to_one_decimal() {
        assert_eq!(percentage(1, 3), 33.3);
        assert_eq!(percentage(2, 3), 66.7);
        assert_eq!(percentage(1, 2), 50.0);
        assert_eq!(percentage(5, 5), 100.0);
        // Exact halves go to the even digit.
        assert_eq!(percentage(1, 16), 6.2);
        assert_eq!(percentage(5, 16), 31.2);
        assert_eq!(percentage(3, 16), 18.8);
    }

    #[test]
    fn test_stats_from_counts() {
        let stats = FeatureStats::from_counts(1, 3);
        assert_eq!(stats.passing, 1);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.percentage, 33.3);
    }

    #[test]
    fn test_valid_feature_passes_validation() {
        let f = NewFeature::new("auth", "Login", "User can log in", &["Open page", "Submit"]);
        assert!(f.validate().is_ok());
    }

    #[test]
    fn test_validation_reports_every_missing_field() {
        let f = NewFeature::default();
        let err = f.validate().unwrap_err();
        assert_eq!(err.fields(), ["category", "name", "description", "steps"]);
    }

    #[test]
    fn test_validation_rejects_whitespace_only() {
        let f = NewFeature::new("auth", "   ", "desc", &["step"]);
        let err = f.validate().unwrap_err();
        assert_eq!(err.fields(), ["name"]);
    }

    #[test]
    fn test_validation_enforces_length_limits() {
        let long_category = "c".repeat(MAX_CATEGORY_LEN + 1);
        let f = NewFeature::new(&long_category, "Name", "desc", &["step"]);
        let err = f.validate().unwrap_err();
        assert_eq!(err.fields(), ["category"]);
        assert!(err.to_string().contains("at most 100"));
    }

    #[test]
    fn test_validation_prefix_names_batch_element() {
        let f = NewFeature::new("auth", "Login", "desc", &[]);
        let err = f.validate_with_prefix("features[2].").unwrap_err();
        assert_eq!(err.fields(), ["features[2].steps"]);
    }

    #[test]
    fn test_new_feature_missing_fields_deserialize_to_empty() {
        let f: NewFeature = serde_json::from_str(r#"{"category": "ui"}"#).unwrap();
        assert_eq!(f.category, "ui");
        assert!(f.name.is_empty());
        assert!(f.steps.is_empty());
        assert!(!f.passes);
        assert!(f.priority.is_none());
    }

    #[test]
    fn test_from_json_decodes_known_fields() {
        let value = serde_json::json!({
            "category": "auth",
            "name": "Login",
            "description": "User can log in",
            "steps": ["a", "b"],
            "priority": 7,
            "passes": null
        });
        let f = NewFeature::from_json(&value, "").unwrap();
        assert_eq!(f.priority, Some(7));
        assert_eq!(f.steps.len(), 2);
        assert!(!f.passes);
    }

    #[test]
    fn test_from_json_names_mistyped_field() {
        let value = serde_json::json!({"category": "auth", "steps": "click"});
        let err = NewFeature::from_json(&value, "features[0].").unwrap_err();
        assert_eq!(err.fields(), ["features[0].steps"]);

        let value = serde_json::json!({"name": 5});
        assert_eq!(NewFeature::from_json(&value, "").unwrap_err().fields(), ["name"]);
    }

    #[test]
    fn test_from_json_refuses_passing_on_create() {
        let value = serde_json::json!({"category": "auth", "passes": true});
        let err = NewFeature::from_json(&value, "features[1].").unwrap_err();
        assert_eq!(err.fields(), ["features[1].passes"]);

        let value = serde_json::json!({"category": "auth", "passes": false});
        assert!(!NewFeature::from_json(&value, "").unwrap().passes);
    }

    #[test]
    fn test_from_json_rejects_unknown_field() {
        let value = serde_json::json!({"category": "auth", "id": 3});
        let err = NewFeature::from_json(&value, "").unwrap_err();
        assert_eq!(err.fields(), ["id"]);
    }

    #[test]
    fn test_from_json_rejects_non_object() {
        let err = NewFeature::from_json(&serde_json::json!([1]), "").unwrap_err();
        assert_eq!(err.fields(), ["body"]);
        let err = NewFeature::from_json(&serde_json::json!("x"), "features[4].").unwrap_err();
        assert_eq!(err.fields(), ["features[4]"]);
    }

    #[test]
    fn test_row_into_feature_decodes_steps() {
        let row = FeatureRow {
            id: 4,
            priority: 2,
            category: "ui".into(),
            name: "Button".into(),
            description: "Renders".into(),
            steps: r#"["a","b"]"#.into(),
            passes: true,
        };
        let feature = row.into_feature().unwrap();
        assert_eq!(feature.steps, vec!["a".to_string(), "b".to_string()]);
        assert!(feature.passes);
    }

    #[test]
    fn test_row_with_corrupt_steps_is_an_error() {
        let row = FeatureRow {
            id: 9,
            priority: 1,
            category: "ui".into(),
            name: "Broken".into(),
            description: "x".into(),
            steps: "not json".into(),
            passes: false,
        };
        assert!(row.into_feature().is_err());
    }
}
