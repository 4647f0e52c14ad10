// 设备模板
// Device-type templates: cached defaults, override merge and override detection

use crate::storage::{read_json, write_json, ConfigStore, StoreError, TEMPLATES_PATH};
use crate::types::{DeviceType, EnergyScales, MeterScales, SensorScales, VoltageScales};
use log::{debug, info, warn};
use serde_json::{Map, Value};
use thiserror::Error;

/// JSON object tree used for templates, overrides and materialised configs
pub type Document = Map<String, Value>;

/// Deepest object nesting `merge` will descend into
pub const MAX_MERGE_DEPTH: usize = 10;

#[derive(Error, Debug)]
pub enum TemplateError {
    #[error("No template for device type '{0}'")]
    NotFound(String),
    #[error("Override nesting exceeds {} levels", MAX_MERGE_DEPTH)]
    MergeTooDeep,
    #[error("Template document is not a JSON object")]
    NotAnObject,
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// In-memory cache of `/templates.json`
#[derive(Debug, Default)]
pub struct TemplateStore {
    cache: Option<Document>,
}

impl TemplateStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn templates(&mut self, store: &dyn ConfigStore) -> Result<&Document, TemplateError> {
        if self.cache.is_none() {
            let loaded = match read_json::<Value>(store, TEMPLATES_PATH)? {
                Some(Value::Object(doc)) => doc,
                Some(_) => return Err(TemplateError::NotAnObject),
                None => {
                    warn!("{} not found, using built-in templates", TEMPLATES_PATH);
                    default_templates()
                }
            };
            debug!("Cached {} device templates", loaded.len());
            self.cache = Some(loaded);
        }
        self.cache.as_ref().ok_or(TemplateError::NotAnObject)
    }

    /// Template for `type_name`. Known device types fall back to the built-in defaults.
    pub fn load_template(
        &mut self,
        store: &dyn ConfigStore,
        type_name: &str,
    ) -> Result<Document, TemplateError> {
        if let Some(Value::Object(template)) = self.templates(store)?.get(type_name) {
            return Ok(template.clone());
        }
        match DeviceType::from_type_name(type_name) {
            Some(device_type) => Ok(defaults_for(device_type)),
            None => Err(TemplateError::NotFound(type_name.to_string())),
        }
    }

    /// Drop the cache; the next lookup re-reads the store
    pub fn invalidate(&mut self) {
        self.cache = None;
    }

    pub fn save_templates(
        &mut self,
        store: &mut dyn ConfigStore,
        templates: &Document,
    ) -> Result<(), TemplateError> {
        write_json(store, TEMPLATES_PATH, templates)?;
        self.invalidate();
        Ok(())
    }
}

/// Write the built-in templates if the store has none. Returns whether it wrote.
pub fn ensure_default_templates(store: &mut dyn ConfigStore) -> Result<bool, StoreError> {
    if store.exists(TEMPLATES_PATH) {
        debug!("Templates already exist, skipping creation");
        return Ok(false);
    }
    write_json(store, TEMPLATES_PATH, &default_templates())?;
    info!("Default device templates created");
    Ok(true)
}

/// Built-in template for one device type
pub fn defaults_for(device_type: DeviceType) -> Document {
    let section = match device_type {
        DeviceType::Sensor => serde_json::to_value(SensorScales::default()),
        DeviceType::PowerMeter => serde_json::to_value(MeterScales::default()),
        DeviceType::VoltageMeter => serde_json::to_value(VoltageScales::default()),
        DeviceType::EnergyMeter => serde_json::to_value(EnergyScales::default()),
    }
    .unwrap_or_else(|_| Value::Object(Map::new()));

    let mut template = Map::new();
    template.insert(device_type.section().to_string(), section);
    template
}

/// All built-in templates keyed by device-type name
pub fn default_templates() -> Document {
    DeviceType::ALL
        .into_iter()
        .map(|t| (t.type_name().to_string(), Value::Object(defaults_for(t))))
        .collect()
}

/// Deep merge: objects on both sides recurse, anything else from `overrides` wins.
/// Arrays are replaced whole.
pub fn merge(overrides: &Document, template: &Document) -> Result<Document, TemplateError> {
    let mut merged = template.clone();
    merge_into(&mut merged, overrides, 1)?;
    Ok(merged)
}

fn merge_into(dest: &mut Document, source: &Document, depth: usize) -> Result<(), TemplateError> {
    if depth > MAX_MERGE_DEPTH {
        return Err(TemplateError::MergeTooDeep);
    }
    for (key, value) in source {
        match (dest.get_mut(key), value) {
            (Some(Value::Object(nested_dest)), Value::Object(nested_source)) => {
                merge_into(nested_dest, nested_source, depth + 1)?;
            }
            _ => {
                dest.insert(key.clone(), value.clone());
            }
        }
    }
    Ok(())
}

/// Inverse of [`merge`]: the leaves of `current` that differ from, or are absent in,
/// `template`. Empty objects are pruned.
pub fn diff(current: &Document, template: &Document) -> Document {
    let mut overrides = Map::new();
    for (key, value) in current {
        match (value, template.get(key)) {
            (Value::Object(nested), Some(Value::Object(nested_template))) => {
                let nested_diff = diff(nested, nested_template);
                if !nested_diff.is_empty() {
                    overrides.insert(key.clone(), Value::Object(nested_diff));
                }
            }
            (Value::Object(nested), None) => {
                let pruned = diff(nested, &Map::new());
                if !pruned.is_empty() {
                    overrides.insert(key.clone(), Value::Object(pruned));
                }
            }
            (_, Some(template_value)) if same_value(value, template_value) => {}
            _ => {
                overrides.insert(key.clone(), value.clone());
            }
        }
    }
    overrides
}

/// Structural equality that treats `1000` and `1000.0` as the same number
fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| same_value(x, y))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).is_some_and(|y| same_value(x, y)))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn override_round_trip_through_merge_and_diff() {
        let template = doc(json!({
            "meter": {
                "aActivePower": {"divider": 1000.0},
                "aCurrent": {"divider": 1.0}
            }
        }));
        let overrides = doc(json!({
            "meter": {
                "aActivePower": {"divider": 2000.0},
                "aCurrent": {"divider": 10.0}
            }
        }));

        let merged = merge(&overrides, &template).unwrap();
        assert_eq!(merged["meter"]["aActivePower"]["divider"], json!(2000.0));
        assert_eq!(merged["meter"]["aCurrent"]["divider"], json!(10.0));

        assert_eq!(diff(&merged, &template), overrides);
    }

    #[test]
    fn merge_carries_keys_from_both_sides() {
        let template = doc(json!({"a": {"x": 1}, "b": 2}));
        let overrides = doc(json!({"a": {"y": 3}, "c": 4}));
        let merged = merge(&overrides, &template).unwrap();
        assert_eq!(Value::Object(merged), json!({"a": {"x": 1, "y": 3}, "b": 2, "c": 4}));
    }

    #[test]
    fn merge_replaces_arrays_whole() {
        let template = doc(json!({"list": [1, 2, 3]}));
        let overrides = doc(json!({"list": [9]}));
        let merged = merge(&overrides, &template).unwrap();
        assert_eq!(merged["list"], json!([9]));
    }

    #[test]
    fn merge_rejects_excessive_nesting() {
        let mut deep = json!({"leaf": 1});
        let mut deep_template = json!({"leaf": 0});
        for _ in 0..MAX_MERGE_DEPTH {
            deep = json!({"n": deep});
            deep_template = json!({"n": deep_template});
        }
        assert!(matches!(
            merge(&doc(deep), &doc(deep_template)),
            Err(TemplateError::MergeTooDeep)
        ));

        let shallow = json!({"n": {"n": {"leaf": 1}}});
        let shallow_template = json!({"n": {"n": {"leaf": 0}}});
        assert!(merge(&doc(shallow), &doc(shallow_template)).is_ok());
    }

    #[test]
    fn diff_prunes_unchanged_subtrees() {
        let template = doc(json!({"sensor": {"tempdivider": 1.0, "humiddivider": 1.0}}));
        let current = doc(json!({"sensor": {"tempdivider": 1, "humiddivider": 1.0}, "extra": {}}));
        assert!(diff(&current, &template).is_empty());
    }

    #[test]
    fn diff_keeps_leaves_missing_from_template() {
        let template = doc(json!({"sensor": {"tempdivider": 1.0}}));
        let current = doc(json!({"sensor": {"tempdivider": 1.0, "offset": 0.5}}));
        assert_eq!(
            Value::Object(diff(&current, &template)),
            json!({"sensor": {"offset": 0.5}})
        );
    }

    #[test]
    fn default_templates_carry_normative_dividers() {
        let templates = default_templates();
        assert_eq!(templates["G01S"]["sensor"]["tempdivider"], json!(1.0));
        assert_eq!(templates["HeylaParam"]["meter"]["aActivePower"]["divider"], json!(1000.0));
        assert_eq!(templates["HeylaParam"]["meter"]["totalActivePower"]["divider"], json!(10000.0));
        assert_eq!(templates["HeylaParam"]["meter"]["zeroPhaseCurrent"]["divider"], json!(1.0));
        assert_eq!(templates["HeylaVoltage"]["voltage"]["phaseVoltageMean"]["divider"], json!(1.0));
        assert_eq!(templates["HeylaEnergy"]["energy"]["exportActiveEnergy"]["divider"], json!(1.0));
    }

    #[test]
    fn store_falls_back_to_defaults_and_honours_invalidate() {
        let mut store = MemoryStore::new();
        let mut templates = TemplateStore::new();

        let sensor = templates.load_template(&store, "G01S").unwrap();
        assert_eq!(sensor["sensor"]["humiddivider"], json!(1.0));
        assert!(matches!(
            templates.load_template(&store, "Mystery"),
            Err(TemplateError::NotFound(_))
        ));

        store
            .write(TEMPLATES_PATH, r#"{"G01S":{"sensor":{"tempdivider":2.0}}}"#)
            .unwrap();
        // still cached
        assert_eq!(
            templates.load_template(&store, "G01S").unwrap()["sensor"]["humiddivider"],
            json!(1.0)
        );
        templates.invalidate();
        let reloaded = templates.load_template(&store, "G01S").unwrap();
        assert_eq!(reloaded["sensor"]["tempdivider"], json!(2.0));
        assert!(reloaded["sensor"].get("humiddivider").is_none());
    }

    #[test]
    fn ensure_defaults_writes_once() {
        let mut store = MemoryStore::new();
        assert!(ensure_default_templates(&mut store).unwrap());
        assert!(!ensure_default_templates(&mut store).unwrap());
    }
}
