use crate::json_fields::{elements, field, number, string_value};
use crate::node_graph::Rgba;
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;

/// Output levels as authored: two grey RGBA values.
pub type LevelsPair = [Rgba; 2];

/// Named presets a material template offers to the layers using it.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OverrideTable {
    pub color_scale: BTreeMap<String, Rgba>,
    pub normal_strength: BTreeMap<String, f32>,
    pub rough_levels_out: BTreeMap<String, LevelsPair>,
    pub metal_levels_out: BTreeMap<String, LevelsPair>,
}

impl OverrideTable {
    pub fn color_scale(&self, key: Option<&str>) -> Option<Rgba> {
        key.and_then(|k| self.color_scale.get(k)).copied()
    }

    pub fn normal_strength(&self, key: Option<&str>) -> Option<f32> {
        key.and_then(|k| self.normal_strength.get(k)).copied()
    }

    pub fn rough_levels(&self, key: Option<&str>) -> Option<LevelsPair> {
        key.and_then(|k| self.rough_levels_out.get(k)).copied()
    }

    pub fn metal_levels(&self, key: Option<&str>) -> Option<LevelsPair> {
        key.and_then(|k| self.metal_levels_out.get(k)).copied()
    }
}

fn grey(v: f32) -> Rgba {
    [v, v, v, 1.0]
}

fn entries<'a>(overrides: &'a Value, candidates: &[&str]) -> &'a [Value] {
    field(overrides, candidates)
        .and_then(|v| v.as_array())
        .map(|a| a.as_slice())
        .unwrap_or_default()
}

fn entry_name(entry: &Value) -> Option<String> {
    entry.get("n").and_then(string_value).map(|s| s.to_string())
}

/// Builds the override table from a template's root chunk. Unreadable
/// entries are skipped with a warning; a template without overrides yields
/// an empty table.
pub fn resolve(template: &Value) -> OverrideTable {
    let mut out = OverrideTable::default();
    let Some(overrides) = field(template, &["overrides", "Overrides"]) else {
        log::debug!("material template has no overrides table");
        return out;
    };

    for entry in entries(overrides, &["colorScale", "ColorScale"]) {
        let Some(name) = entry_name(entry) else {
            log::warn!("colorScale override without a name skipped");
            continue;
        };
        match entry.get("v").and_then(|v| elements(v, 3)) {
            Some(e) => {
                out.color_scale.insert(name, [e[0], e[1], e[2], 1.0]);
            }
            None => log::warn!("colorScale override '{}' has no readable value", name),
        }
    }

    for entry in entries(overrides, &["normalStrength", "NormalStrength"]) {
        let Some(name) = entry_name(entry) else {
            log::warn!("normalStrength override without a name skipped");
            continue;
        };
        let strength = match entry.get("v").filter(|v| !v.is_null()) {
            None => 0.0,
            Some(v) => number(v).unwrap_or_else(|| {
                log::warn!("normalStrength override '{}' is not a number", name);
                0.0
            }),
        };
        out.normal_strength.insert(name, strength);
    }

    for entry in entries(overrides, &["roughLevelsOut", "RoughLevelsOut"]) {
        let Some(name) = entry_name(entry) else {
            log::warn!("roughLevelsOut override without a name skipped");
            continue;
        };
        match entry.get("v").and_then(|v| elements(v, 2)) {
            Some(e) => {
                out.rough_levels_out.insert(name, [grey(e[0]), grey(e[1])]);
            }
            None => log::warn!("roughLevelsOut override '{}' has no readable value", name),
        }
    }

    for entry in entries(overrides, &["metalLevelsOut", "MetalLevelsOut"]) {
        let Some(name) = entry_name(entry) else {
            log::warn!("metalLevelsOut override without a name skipped");
            continue;
        };
        let pair = match entry.get("v").filter(|v| !v.is_null()) {
            None => [grey(0.0), grey(1.0)],
            Some(v) => match elements(v, 2) {
                Some(e) => [grey(e[0]), grey(e[1])],
                None => {
                    log::warn!("metalLevelsOut override '{}' has no readable value", name);
                    continue;
                }
            },
        };
        out.metal_levels_out.insert(name, pair);
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn template() -> Value {
        json!({
            "overrides": {
                "colorScale": [
                    {"n": {"$value": "red"}, "v": {"Elements": [1.0, 0.0, 0.0]}},
                    {"n": {"$value": "broken"}}
                ],
                "normalStrength": [
                    {"n": {"$value": "strong"}, "v": 2.0},
                    {"n": {"$value": "unset"}}
                ],
                "roughLevelsOut": [
                    {"n": {"$value": "glossy"}, "v": {"Elements": [0.2, 0.05]}}
                ],
                "metalLevelsOut": [
                    {"n": {"$value": "metal"}, "v": {"Elements": [1.0, 0.8]}},
                    {"n": {"$value": "default"}}
                ]
            }
        })
    }

    #[test]
    fn resolves_all_categories() {
        let t = resolve(&template());
        assert_eq!(t.color_scale(Some("red")), Some([1.0, 0.0, 0.0, 1.0]));
        assert!(t.color_scale(Some("broken")).is_none());
        assert_eq!(t.normal_strength(Some("strong")), Some(2.0));
        assert_eq!(t.normal_strength(Some("unset")), Some(0.0));
        assert_eq!(
            t.rough_levels(Some("glossy")),
            Some([[0.2, 0.2, 0.2, 1.0], [0.05, 0.05, 0.05, 1.0]])
        );
        assert_eq!(
            t.metal_levels(Some("default")),
            Some([[0.0, 0.0, 0.0, 1.0], [1.0, 1.0, 1.0, 1.0]])
        );
        assert!(t.metal_levels(Some("missing")).is_none());
        assert!(t.metal_levels(None).is_none());
    }

    #[test]
    fn accepts_pascal_case_tables() {
        let t = resolve(&json!({
            "Overrides": {
                "ColorScale": [{"n": {"$value": "w"}, "v": 0.5}]
            }
        }));
        assert_eq!(t.color_scale(Some("w")), Some([0.5, 0.5, 0.5, 1.0]));
    }

    #[test]
    fn missing_overrides_give_empty_table() {
        assert_eq!(resolve(&json!({})), OverrideTable::default());
    }
}
