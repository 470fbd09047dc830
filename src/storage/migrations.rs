use jiff::{Timestamp, civil::Date, tz::TimeZone};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::{models::project::ProjectStatus, storage::StorageError};

type MigrationFn = fn(Value) -> Result<Value, StorageError>;

/// Index `n` migrates from version `n + 1` to `n + 2`.
fn get_migrations() -> Vec<MigrationFn> {
    vec![migrate_v1_to_v2]
}

/// Returns 1 if the version field is missing (the unversioned cache the
/// mobile app wrote, including its bare project array), `None` if it is
/// present but not a number.
pub fn detect_version(value: &Value) -> Option<u32> {
    if value.is_array() {
        return Some(1);
    }
    match value.get("version") {
        Some(v) => v.as_u64().and_then(|n| u32::try_from(n).ok()),
        None => Some(1),
    }
}

/// Migrations are applied sequentially: v1→v2→v3→...→target
pub fn apply_migrations(
    mut data: Value,
    from_version: u32,
    to_version: u32,
) -> Result<Value, StorageError> {
    if from_version == to_version {
        return Ok(data);
    }

    if from_version > to_version {
        return Err(StorageError::FutureVersion(from_version));
    }

    let migrations = get_migrations();

    for version in from_version..to_version {
        let migration = version
            .checked_sub(1)
            .and_then(|idx| migrations.get(idx as usize))
            .ok_or(StorageError::UnsupportedVersion(version))?;

        data = migration(data)?;
    }

    Ok(data)
}

/// Seconds between the unix epoch and 2001-01-01T00:00:00Z, the reference
/// date the mobile app encoded its dates against.
const REFERENCE_DATE_OFFSET: f64 = 978_307_200.0;

/// v1 is the cache the mobile app wrote: either a bare array of camelCase
/// project records, or an object holding them under `projects`. Dates are
/// seconds since the 2001 reference date, ids are arbitrary strings and
/// enum values are display labels ("In Progress", "High"). There is no
/// session or per-user section.
fn migrate_v1_to_v2(value: Value) -> Result<Value, StorageError> {
    let mut obj = match value {
        Value::Array(projects) => {
            let mut obj = Map::new();
            obj.insert("projects".to_string(), Value::Array(projects));
            obj
        }
        Value::Object(obj) => obj,
        _ => return Err(migration_failed("top level is neither an array nor an object")),
    };

    let projects = match obj.remove("projects") {
        Some(Value::Array(projects)) => projects
            .into_iter()
            .map(import_project)
            .collect::<Result<Vec<_>, _>>()?,
        Some(Value::Null) | None => vec![],
        Some(_) => return Err(migration_failed("`projects` is not an array")),
    };
    obj.insert("projects".to_string(), Value::Array(projects));

    obj.entry("session").or_insert(Value::Null);
    obj.entry("users")
        .or_insert_with(|| Value::Object(Map::new()));
    obj.insert("version".to_string(), Value::from(2));

    Ok(Value::Object(obj))
}

fn import_project(value: Value) -> Result<Value, StorageError> {
    let Value::Object(raw) = value else {
        return Err(migration_failed("project is not an object"));
    };
    let mut project = snake_case_keys(raw);

    import_id(&mut project);
    if let Some(status) = project.get_mut("status") {
        relabel(status);
    }
    for key in ["created_at", "updated_at"] {
        let stamp = match project.get(key) {
            Some(v) if !v.is_null() => import_timestamp(v)?,
            _ => Timestamp::now(),
        };
        project.insert(key.to_string(), Value::from(stamp.to_string()));
    }
    let due = match project.get("due_date") {
        Some(v) if !v.is_null() => import_date(v)?,
        _ => Timestamp::now().to_zoned(TimeZone::UTC).date(),
    };
    project.insert("due_date".to_string(), Value::from(due.to_string()));

    if !project.contains_key("progress") {
        let progress = project
            .get("status")
            .cloned()
            .and_then(|s| serde_json::from_value::<ProjectStatus>(s).ok())
            .unwrap_or_default()
            .progress();
        project.insert("progress".to_string(), Value::from(progress));
    }
    for key in ["title", "description", "client_name", "client_email", "client_id"] {
        project
            .entry(key)
            .or_insert_with(|| Value::from(String::new()));
    }
    project.entry("status").or_insert_with(|| Value::from("not_started"));
    project.entry("amount").or_insert_with(|| Value::from(0.0));
    project.entry("invoice_id").or_insert(Value::Null);
    project.entry("is_archived").or_insert(Value::Bool(false));

    let tasks = match project.remove("tasks") {
        Some(Value::Array(tasks)) => tasks
            .into_iter()
            .map(import_task)
            .collect::<Result<Vec<_>, _>>()?,
        _ => vec![],
    };
    project.insert("tasks".to_string(), Value::Array(tasks));

    Ok(Value::Object(project))
}

fn import_task(value: Value) -> Result<Value, StorageError> {
    let Value::Object(raw) = value else {
        return Err(migration_failed("task is not an object"));
    };
    let mut task = snake_case_keys(raw);

    import_id(&mut task);
    if let Some(priority) = task.get_mut("priority") {
        relabel(priority);
    }
    let completed_at = match task.get("completed_at") {
        Some(v) if !v.is_null() => Value::from(import_timestamp(v)?.to_string()),
        _ => Value::Null,
    };
    task.insert("completed_at".to_string(), completed_at);
    task.entry("title").or_insert_with(|| Value::from(String::new()));
    task.entry("description")
        .or_insert_with(|| Value::from(String::new()));
    task.entry("is_completed").or_insert(Value::Bool(false));

    Ok(Value::Object(task))
}

/// "clientName" -> "client_name". Keys that are already snake case pass
/// through untouched.
fn snake_case_keys(raw: Map<String, Value>) -> Map<String, Value> {
    raw.into_iter()
        .map(|(key, value)| {
            let mut snake = String::with_capacity(key.len() + 4);
            for c in key.chars() {
                if c.is_ascii_uppercase() {
                    snake.push('_');
                    snake.push(c.to_ascii_lowercase());
                } else {
                    snake.push(c);
                }
            }
            (snake, value)
        })
        .collect()
}

/// Keeps ids that already are UUIDs (the app used upper-case ones) and
/// gives everything else a fresh one.
fn import_id(record: &mut Map<String, Value>) {
    let parsed = record
        .get("id")
        .and_then(Value::as_str)
        .and_then(|id| Uuid::parse_str(id).ok());
    let id = parsed.unwrap_or_else(Uuid::new_v4);
    record.insert("id".to_string(), Value::from(id.to_string()));
}

/// Accepts reference-date seconds or an RFC 3339 string.
fn import_timestamp(value: &Value) -> Result<Timestamp, StorageError> {
    match value {
        Value::Number(n) => {
            let seconds = n
                .as_f64()
                .ok_or_else(|| migration_failed("date is not a number"))?;
            let nanos = ((seconds + REFERENCE_DATE_OFFSET) * 1e9).round();
            if !nanos.is_finite() {
                return Err(migration_failed("date is out of range"));
            }
            Timestamp::from_nanosecond(nanos as i128)
                .map_err(|e| migration_failed(&format!("date is out of range: {}", e)))
        }
        Value::String(s) => s
            .parse::<Timestamp>()
            .map_err(|e| migration_failed(&format!("invalid date '{}': {}", s, e))),
        _ => Err(migration_failed("date is neither a number nor a string")),
    }
}

/// Due dates were full timestamps in the app; only the UTC day is kept.
fn import_date(value: &Value) -> Result<Date, StorageError> {
    if let Some(day) = value.as_str().and_then(|s| s.parse::<Date>().ok()) {
        return Ok(day);
    }
    Ok(import_timestamp(value)?.to_zoned(TimeZone::UTC).date())
}

/// "Not Started" -> "not_started"
fn relabel(value: &mut Value) {
    if let Some(label) = value.as_str() {
        *value = Value::from(label.trim().to_lowercase().replace(' ', "_"));
    }
}

fn migration_failed(reason: &str) -> StorageError {
    StorageError::MigrationFailed {
        from: 1,
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_version_with_version_field() {
        let json = serde_json::json!({"version": 2, "projects": []});
        assert_eq!(detect_version(&json), Some(2));
    }

    #[test]
    fn test_detect_version_without_version_field() {
        let json = serde_json::json!({"projects": []});
        assert_eq!(detect_version(&json), Some(1));
    }

    #[test]
    fn test_detect_version_malformed() {
        let json = serde_json::json!({"version": "two"});
        assert_eq!(detect_version(&json), None);
    }

    #[test]
    fn test_apply_migrations_same_version() {
        let data = serde_json::json!({"version": 2});
        let result = apply_migrations(data.clone(), 2, 2).unwrap();
        assert_eq!(result, data);
    }

    #[test]
    fn test_apply_migrations_future_version() {
        let data = serde_json::json!({"version": 5});
        let result = apply_migrations(data, 5, 2);
        assert!(matches!(result, Err(StorageError::FutureVersion(5))));
    }

    #[test]
    fn test_v1_labels_are_rewritten() {
        let data = serde_json::json!({
            "projects": [{
                "status": "On Hold",
                "tasks": [{"priority": "Medium"}]
            }]
        });

        let migrated = apply_migrations(data, 1, 2).unwrap();

        assert_eq!(migrated["version"], 2);
        assert_eq!(migrated["projects"][0]["status"], "on_hold");
        assert_eq!(migrated["projects"][0]["tasks"][0]["priority"], "medium");
        assert!(migrated["session"].is_null());
        assert!(migrated["users"].is_object());
    }

    #[test]
    fn test_mobile_cache_array_is_imported() {
        let data = serde_json::json!([{
            "id": "A1",
            "title": "Wedding film",
            "description": "",
            "status": "In Progress",
            "clientName": "Jane",
            "clientEmail": "jane@example.com",
            "amount": 500.0,
            "invoiceId": null,
            "clientId": "auth0|jane",
            "isArchived": false,
            "createdAt": 700000000.0,
            "updatedAt": 700086400.5,
            "dueDate": 700600000.0,
            "progress": 0.5,
            "tasks": [{
                "id": "0B6F7C39-8A1E-4A55-A0F5-52F1A9B44C02",
                "title": "Edit",
                "description": "",
                "isCompleted": true,
                "completedAt": 700000060.0,
                "priority": "High"
            }]
        }]);
        assert_eq!(detect_version(&data), Some(1));

        let migrated = apply_migrations(data, 1, 2).unwrap();

        assert_eq!(migrated["version"], 2);
        let project = &migrated["projects"][0];
        assert!(Uuid::parse_str(project["id"].as_str().unwrap()).is_ok());
        assert_eq!(project["status"], "in_progress");
        assert_eq!(project["client_name"], "Jane");
        assert_eq!(project["is_archived"], false);
        assert!(project.get("clientName").is_none());
        let created: Timestamp = project["created_at"].as_str().unwrap().parse().unwrap();
        assert_eq!(created, "2023-03-08T20:26:40Z".parse::<Timestamp>().unwrap());
        assert_eq!(project["due_date"], "2023-03-15");

        let task = &project["tasks"][0];
        assert_eq!(task["id"], "0b6f7c39-8a1e-4a55-a0f5-52f1a9b44c02");
        assert_eq!(task["priority"], "high");
        assert_eq!(task["is_completed"], true);
        let completed: Timestamp = task["completed_at"].as_str().unwrap().parse().unwrap();
        assert_eq!(completed, "2023-03-08T20:27:40Z".parse::<Timestamp>().unwrap());
    }

    #[test]
    fn test_missing_fields_get_defaults() {
        let data = serde_json::json!([{"id": "x", "title": "Bare", "status": "Completed"}]);

        let migrated = apply_migrations(data, 1, 2).unwrap();
        let project = &migrated["projects"][0];

        assert_eq!(project["progress"], 1.0);
        assert_eq!(project["client_email"], "");
        assert_eq!(project["tasks"], serde_json::json!([]));
        assert!(project["invoice_id"].is_null());
    }

    #[test]
    fn test_unreadable_date_fails_migration() {
        let data = serde_json::json!([{"id": "x", "createdAt": "last tuesday"}]);

        let result = apply_migrations(data, 1, 2);

        assert!(matches!(
            result,
            Err(StorageError::MigrationFailed { from: 1, .. })
        ));
    }
}
