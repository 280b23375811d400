use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Ms;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    Schedule,
    Ticket,
    Occurrence,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldChange {
    /// Dotted path, array elements by index: `steps.1.dt_end`.
    pub field: String,
    pub old: Value,
    pub new: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeLogEntry {
    pub id: String,
    pub entity: EntityKind,
    pub entity_id: String,
    pub action: String,
    pub actor: String,
    pub at: Ms,
    pub changes: Vec<FieldChange>,
}

/// Field-level diff between two serialized versions of an entity.
/// Objects and arrays are walked; any other differing value is one change.
pub fn diff_values(old: &Value, new: &Value) -> Vec<FieldChange> {
    let mut changes = Vec::new();
    walk(String::new(), old, new, &mut changes);
    changes
}

fn join(prefix: &str, field: &str) -> String {
    if prefix.is_empty() {
        field.to_string()
    } else {
        format!("{prefix}.{field}")
    }
}

fn walk(path: String, old: &Value, new: &Value, out: &mut Vec<FieldChange>) {
    if old == new {
        return;
    }
    match (old, new) {
        (Value::Object(a), Value::Object(b)) => {
            let mut keys: Vec<&String> = a.keys().chain(b.keys()).collect();
            keys.sort();
            keys.dedup();
            for key in keys {
                let before = a.get(key).unwrap_or(&Value::Null);
                let after = b.get(key).unwrap_or(&Value::Null);
                walk(join(&path, key), before, after, out);
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            for i in 0..a.len().max(b.len()) {
                let before = a.get(i).unwrap_or(&Value::Null);
                let after = b.get(i).unwrap_or(&Value::Null);
                walk(join(&path, &i.to_string()), before, after, out);
            }
        }
        _ => out.push(FieldChange {
            field: path,
            old: old.clone(),
            new: new.clone(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identical_values_have_no_changes() {
        let v = json!({"a": 1, "b": [1, 2]});
        assert!(diff_values(&v, &v).is_empty());
    }

    #[test]
    fn nested_fields_use_dotted_paths() {
        let old = json!({"step": "Ticket", "steps": [{"dt_end": null, "latest": true}]});
        let new = json!({
            "step": "Screening",
            "steps": [{"dt_end": 10, "latest": false}, {"dt_end": null, "latest": true}]
        });
        let changes = diff_values(&old, &new);
        let fields: Vec<&str> = changes.iter().map(|c| c.field.as_str()).collect();
        assert_eq!(fields, vec!["step", "steps.0.dt_end", "steps.0.latest", "steps.1"]);
        assert_eq!(changes[0].old, json!("Ticket"));
        assert_eq!(changes[3].old, Value::Null);
    }

    #[test]
    fn removed_key_reports_null() {
        let changes = diff_values(&json!({"a": 1}), &json!({}));
        assert_eq!(changes.len(), 1);
        assert_eq!(changes[0].new, Value::Null);
    }
}
