//! Default-record template and read-path schema migration.
//!
//! Stored records are reconciled against the current template on every
//! fetch: keys the template has and the record lacks are copied in, nested
//! objects are merged recursively, and the version stamp is refreshed.
//! Existing values are never replaced, so migration is additive and
//! idempotent.

use serde_json::{json, Map, Value};

use crate::models::users::UserRecord;

pub const SCHEMA_VERSION: &str = "1.1.0";

/// Stands for "older than any known version"; never equal to
/// [`SCHEMA_VERSION`], so versionless records always migrate.
pub const UNKNOWN_VERSION: &str = "unknown";

const VERSION_FIELD: &str = "schemaVersion";

/// Template a stored record is reconciled against.
pub fn template(address: &str, initial_grant: u64) -> Value {
    // Serializing a UserRecord cannot fail: it is a tree of strings,
    // numbers and maps.
    serde_json::to_value(UserRecord::new(address, initial_grant)).unwrap_or(Value::Null)
}

/// Payload for the schema inspection endpoint.
pub fn describe(initial_grant: u64) -> Value {
    json!({
        "currentVersion": SCHEMA_VERSION,
        "schema": template("0x0000000000000000000000000000000000000000", initial_grant),
        "description": "Default user record template; stored records are reconciled against it on every read",
    })
}

/// Copies keys present in `template` but absent in `target`, recursing into
/// nested objects. Arrays are copied wholesale only when entirely missing.
/// Returns whether anything was added.
fn merge_missing(target: &mut Map<String, Value>, template: &Map<String, Value>) -> bool {
    let mut changed = false;

    for (key, template_value) in template {
        match target.get_mut(key) {
            None => {
                target.insert(key.clone(), template_value.clone());
                changed = true;
            }
            Some(Value::Object(existing)) => {
                if let Value::Object(template_object) = template_value {
                    changed |= merge_missing(existing, template_object);
                }
            }
            Some(_) => {}
        }
    }

    changed
}

/// Brings `doc` up to the current field set and version. Returns whether the
/// document changed and should be persisted back.
pub fn migrate(doc: &mut Value, template: &Value) -> bool {
    let (Value::Object(target), Value::Object(source)) = (doc, template) else {
        return false;
    };

    let mut changed = merge_missing(target, source);

    let version = target
        .get(VERSION_FIELD)
        .and_then(Value::as_str)
        .unwrap_or(UNKNOWN_VERSION);
    if version != SCHEMA_VERSION {
        target.insert(VERSION_FIELD.to_string(), Value::String(SCHEMA_VERSION.to_string()));
        changed = true;
    }

    changed
}
