//! Preset defaults and the deep-merge overlay.
//!
//! Presets are loaded once from an embedded table. They are cloned before
//! every merge; the table itself is never handed out by reference, so one
//! request can never mutate the defaults seen by another.

use std::collections::HashMap;
use std::sync::LazyLock;

use serde_json::{Map, Value};

use crate::error::{MqError, Result};

// Preset bodies keep their on-disk key order so that emitted XML is stable.
type PresetTable = HashMap<String, HashMap<String, Map<String, Value>>>;

static DEFAULTS: LazyLock<PresetTable> = LazyLock::new(|| {
    serde_json::from_str(include_str!("data/default_values.json"))
        .expect("embedded defaults are valid JSON")
});

/// Deep copy of the named preset for a section.
pub fn preset(section: &str, name: &str) -> Result<Value> {
    DEFAULTS
        .get(section)
        .and_then(|presets| presets.get(name))
        .map(|values| Value::Object(values.clone()))
        .ok_or_else(|| {
            MqError::SchemaMismatch(format!(
                "unknown defaults preset '{name}' for section '{section}'"
            ))
        })
}

/// Recursively update `base` with `overlay`.
///
/// Keys unique to either side survive. Keys whose values are both mappings
/// recurse; for everything else the overlay value wins. Lists are replaced
/// atomically, never concatenated.
pub fn rec_update(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Object(base_map), Value::Object(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(slot) if slot.is_object() && value.is_object() => rec_update(slot, value),
                    _ => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base, overlay) => *base = overlay.clone(),
    }
}

/// Overlay a section's user values on top of the preset it names.
///
/// When the user mapping carries a `defaults` key, the named preset is deep
/// copied and the remaining user keys are overlaid on it. Without a
/// `defaults` key the user values pass through unchanged. The result never
/// contains the `defaults` key itself.
pub fn overlay_section(section: &str, user: &Value) -> Result<Value> {
    let user_map = user.as_object().ok_or_else(|| {
        MqError::SchemaMismatch(format!("section '{section}' must be a mapping"))
    })?;

    let mut merged = match user_map.get("defaults") {
        Some(Value::String(name)) => preset(section, name)?,
        Some(other) => {
            return Err(MqError::SchemaMismatch(format!(
                "'defaults' must name a preset, got {other}"
            )))
        }
        None => Value::Object(Map::new()),
    };

    let mut overlay = user_map.clone();
    overlay.remove("defaults");
    rec_update(&mut merged, &Value::Object(overlay));
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_rec_update_merges_nested_mappings() {
        let mut base = json!({"a": 1, "nested": {"x": 1, "y": 2}});
        rec_update(&mut base, &json!({"b": 2, "nested": {"y": 3, "z": 4}}));
        assert_eq!(base, json!({"a": 1, "b": 2, "nested": {"x": 1, "y": 3, "z": 4}}));
    }

    #[test]
    fn test_rec_update_replaces_lists_atomically() {
        let mut base = json!({"mods": ["a", "b"]});
        rec_update(&mut base, &json!({"mods": ["c"]}));
        assert_eq!(base, json!({"mods": ["c"]}));
    }

    #[test]
    fn test_overlay_is_idempotent() {
        let user = json!({"defaults": "default", "matchBetweenRuns": true});
        let merged = overlay_section("globalParams", &user).unwrap();

        let mut again = merged.clone();
        rec_update(&mut again, &json!({"matchBetweenRuns": true}));
        assert_eq!(again, merged);
    }

    #[test]
    fn test_overlay_applies_preset_beneath_user_values() {
        let user = json!({"defaults": "default", "matchBetweenRuns": true});
        let merged = overlay_section("globalParams", &user).unwrap();

        assert_eq!(merged["matchBetweenRuns"], json!(true));
        // untouched preset value survives
        assert_eq!(merged["quantMode"], json!(1));
        // the selector itself is consumed
        assert!(merged.get("defaults").is_none());
    }

    #[test]
    fn test_overlay_without_defaults_passes_user_values_through() {
        let user = json!({"matchBetweenRuns": true});
        let merged = overlay_section("globalParams", &user).unwrap();
        assert_eq!(merged, json!({"matchBetweenRuns": true}));
    }

    #[test]
    fn test_overlay_does_not_alias_the_preset_table() {
        let first = overlay_section("globalParams", &json!({"defaults": "default", "restrictMods": ["only this"]})).unwrap();
        assert_eq!(first["restrictMods"], json!(["only this"]));

        let second = overlay_section("globalParams", &json!({"defaults": "default"})).unwrap();
        assert_eq!(
            second["restrictMods"],
            json!(["Oxidation (M)", "Acetyl (Protein N-term)"])
        );
    }

    #[test]
    fn test_unknown_preset_is_rejected() {
        let err = overlay_section("globalParams", &json!({"defaults": "nope"})).unwrap_err();
        assert!(err.to_string().contains("unknown defaults preset"));
    }
}
