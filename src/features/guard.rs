//! The only path that may change an existing feature.
//!
//! The decoded request body is checked against an allow-list before anything
//! is read from it: a payload naming any field besides `passes` is rejected
//! as a whole, never partially applied.

use serde_json::Value;

use super::db::DbHandle;
use super::models::Feature;
use crate::errors::{Result, TrackerError};

pub const MUTABLE_FIELDS: &[&str] = &["passes"];

/// Validate an update payload and extract the new `passes` value.
pub fn parse_update(body: &Value) -> Result<bool> {
    let map = body.as_object().ok_or_else(|| {
        TrackerError::invalid_field("body", "update body must be a JSON object")
    })?;

    let mut forbidden: Vec<String> = map
        .keys()
        .filter(|k| !MUTABLE_FIELDS.contains(&k.as_str()))
        .cloned()
        .collect();
    if !forbidden.is_empty() {
        forbidden.sort();
        return Err(TrackerError::Validation {
            message: format!(
                "only `passes` may be updated; forbidden field(s): {}",
                forbidden.join(", ")
            ),
            fields: forbidden,
        });
    }

    match map.get("passes") {
        Some(Value::Bool(passes)) => Ok(*passes),
        Some(_) => Err(TrackerError::invalid_field("passes", "passes must be a boolean")),
        None => Err(TrackerError::invalid_field("passes", "passes is required")),
    }
}

/// Check the payload, then flip the flag on feature `id`.
pub async fn apply_update(db: &DbHandle, id: i64, body: &Value) -> Result<Feature> {
    let passes = parse_update(body)?;
    db.call(move |db| db.update_passes(id, passes)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::db::FeatureDb;
    use crate::features::models::NewFeature;
    use serde_json::json;

    #[test]
    fn test_accepts_passes_only() {
        assert!(parse_update(&json!({"passes": true})).unwrap());
        assert!(!parse_update(&json!({"passes": false})).unwrap());
    }

    #[test]
    fn test_rejects_extra_fields_even_with_passes() {
        let err = parse_update(&json!({"passes": true, "name": "x", "priority": 1})).unwrap_err();
        assert_eq!(err.fields(), ["name", "priority"]);
        assert!(err.to_string().contains("forbidden"));
    }

    #[test]
    fn test_rejects_missing_or_mistyped_passes() {
        assert_eq!(parse_update(&json!({})).unwrap_err().fields(), ["passes"]);
        assert_eq!(
            parse_update(&json!({"passes": "yes"})).unwrap_err().fields(),
            ["passes"]
        );
        assert_eq!(
            parse_update(&json!({"passes": null})).unwrap_err().fields(),
            ["passes"]
        );
    }

    #[test]
    fn test_rejects_non_object_body() {
        assert_eq!(parse_update(&json!([true])).unwrap_err().fields(), ["body"]);
        assert_eq!(parse_update(&json!(true)).unwrap_err().fields(), ["body"]);
    }

    #[tokio::test]
    async fn test_rejected_update_changes_nothing() -> Result<()> {
        let db = DbHandle::new(FeatureDb::new_in_memory()?);
        let created = db
            .call(|db| db.create_feature(&NewFeature::new("ui", "Original", "desc", &["s"])))
            .await?;

        let err = apply_update(&db, created.id, &json!({"passes": true, "name": "x"}))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackerError::Validation { .. }));

        let after = db.call(move |db| db.get_feature(created.id)).await?;
        assert_eq!(after.name, "Original");
        assert!(!after.passes);
        Ok(())
    }

    #[tokio::test]
    async fn test_apply_update_flips_flag() -> Result<()> {
        let db = DbHandle::new(FeatureDb::new_in_memory()?);
        let created = db
            .call(|db| db.create_feature(&NewFeature::new("ui", "Flip", "desc", &["s"])))
            .await?;

        let updated = apply_update(&db, created.id, &json!({"passes": true})).await?;
        assert!(updated.passes);

        let missing = apply_update(&db, 999, &json!({"passes": true})).await.unwrap_err();
        assert!(missing.is_not_found());
        Ok(())
    }
}
