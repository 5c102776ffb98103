//! Payload normalization and validation against the column catalog.

use serde_json::{Map, Number, Value};

use super::rows::Record;
use crate::entity::Entity;
use crate::error::{LedgerError, LedgerResult};
use crate::id::new_uuid_v7;
use crate::ledger::repair::is_date_shaped;
use crate::schema::{Column, ColumnKind};
use crate::time::{normalize_iso, now_iso};

const TIMESTAMPS: [&str; 2] = ["created_at", "updated_at"];

/// `saleId` -> `sale_id`, `customerCPF` -> `customer_cpf`. Snake case passes through.
pub fn normalize_key(key: &str) -> String {
    let chars: Vec<char> = key.trim().chars().collect();
    let mut out = String::with_capacity(chars.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_ascii_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1).copied();
            let boundary = match prev {
                Some(p) if p.is_ascii_lowercase() || p.is_ascii_digit() => true,
                Some(p) if p.is_ascii_uppercase() => next.is_some_and(|n| n.is_ascii_lowercase()),
                _ => false,
            };
            if boundary && !out.ends_with('_') {
                out.push('_');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn coerce(column: &Column, value: Value, issues: &mut Vec<String>) -> Option<Value> {
    let name = column.name;
    if value.is_null() {
        if !column.nullable() {
            issues.push(format!("{name} cannot be null"));
            return None;
        }
        return Some(Value::Null);
    }
    match column.kind {
        ColumnKind::Text => match value {
            Value::String(s) => Some(Value::String(s)),
            Value::Number(n) => Some(Value::String(n.to_string())),
            _ => {
                issues.push(format!("{name} must be a string"));
                None
            }
        },
        ColumnKind::Integer => match value.as_i64() {
            Some(i) => Some(Value::from(i)),
            None => {
                issues.push(format!("{name} must be an integer"));
                None
            }
        },
        ColumnKind::Real => {
            let parsed = match &value {
                Value::Number(n) => n.as_f64(),
                Value::String(s) => s.trim().parse::<f64>().ok(),
                _ => None,
            };
            match parsed.filter(|f| f.is_finite()).and_then(Number::from_f64) {
                Some(n) => Some(Value::Number(n)),
                None => {
                    issues.push(format!("{name} must be a number"));
                    None
                }
            }
        }
        ColumnKind::Flag => match value {
            Value::Bool(b) => Some(Value::from(b as i64)),
            Value::Number(n) if matches!(n.as_i64(), Some(0) | Some(1)) => Some(Value::Number(n)),
            _ => {
                issues.push(format!("{name} must be a boolean"));
                None
            }
        },
        ColumnKind::Timestamp => match value.as_str().and_then(normalize_iso) {
            Some(stored) => Some(Value::String(stored)),
            None => {
                issues.push(format!("{name} must be an ISO-8601 timestamp"));
                None
            }
        },
        ColumnKind::Choice(allowed) => match value {
            Value::String(s) if allowed.contains(&s.as_str()) => Some(Value::String(s)),
            _ => {
                issues.push(format!("{name} must be one of {}", allowed.join(", ")));
                None
            }
        },
    }
}

fn fail(entity: Entity, issues: Vec<String>) -> LedgerResult<Record> {
    Err(LedgerError::validation(entity, issues))
}

/// Normalize keys, reject unknown or ledger-managed columns and coerce values
/// to their storage form. Echoed `created_at`/`updated_at` are dropped.
pub fn normalize_payload(entity: Entity, payload: Map<String, Value>) -> LedgerResult<Record> {
    let mut issues = Vec::new();
    let mut out = Map::new();
    for (key, value) in payload {
        let name = normalize_key(&key);
        let Some(column) = entity.column(&name) else {
            issues.push(format!("unknown column {key}"));
            continue;
        };
        if column.managed {
            if !TIMESTAMPS.contains(&column.name) {
                issues.push(format!("{} is maintained by the ledger", column.name));
            }
            continue;
        }
        if let Some(value) = coerce(column, value, &mut issues) {
            out.insert(column.name.to_string(), value);
        }
    }
    if issues.is_empty() {
        Ok(out)
    } else {
        fail(entity, issues)
    }
}

fn number(record: &Record, column: &str) -> Option<f64> {
    record.get(column).and_then(Value::as_f64)
}

fn text<'a>(record: &'a Record, column: &str) -> Option<&'a str> {
    record.get(column).and_then(Value::as_str)
}

/// Cross-field and range rules, checked on the full row.
pub fn check_rules(entity: Entity, record: &Record) -> Vec<String> {
    let mut issues = Vec::new();
    match entity {
        Entity::User => {
            if text(record, "email").is_some_and(|e| !e.contains('@')) {
                issues.push("email must be an email address".to_string());
            }
        }
        Entity::Sale => {
            if number(record, "sale_price").is_some_and(|p| p < 0.0) {
                issues.push("sale_price must not be negative".to_string());
            }
        }
        Entity::FinancialTransaction => {
            if text(record, "description").is_some_and(is_date_shaped) {
                issues.push("description looks like a timestamp; dates belong in date".to_string());
            }
            let has_id = record.get("related_id").is_some_and(|v| !v.is_null());
            let has_type = record.get("related_type").is_some_and(|v| !v.is_null());
            if has_id && !has_type {
                issues.push("related_type is required when related_id is set".to_string());
            }
        }
        Entity::RecurringExpense => {
            if let Some(day) = record.get("day_of_month").and_then(Value::as_i64) {
                if !(1..=31).contains(&day) {
                    issues.push("day_of_month must be between 1 and 31".to_string());
                }
            }
        }
        Entity::AffiliatePlatform => {
            if number(record, "commission_rate").is_some_and(|r| !(0.0..=100.0).contains(&r)) {
                issues.push("commission_rate must be between 0 and 100".to_string());
            }
        }
        _ => {}
    }
    issues
}

/// Full validation for a new row: id generated when absent, timestamps stamped.
pub fn prepare_create(entity: Entity, payload: Map<String, Value>) -> LedgerResult<Record> {
    let mut record = normalize_payload(entity, payload)?;

    let mut issues = Vec::new();
    for column in entity.columns() {
        if column.required && record.get(column.name).map_or(true, Value::is_null) {
            issues.push(format!("{} is required", column.name));
        }
    }
    issues.extend(check_rules(entity, &record));
    if !issues.is_empty() {
        return fail(entity, issues);
    }

    let has_id = record
        .get("id")
        .and_then(Value::as_str)
        .is_some_and(|id| !id.trim().is_empty());
    if !has_id {
        record.insert("id".into(), Value::String(new_uuid_v7()));
    }
    let now = now_iso();
    record.insert("created_at".into(), Value::String(now.clone()));
    record.insert("updated_at".into(), Value::String(now));
    Ok(record)
}

/// Normalize a partial update. The id may be echoed back but not changed.
pub fn prepare_patch(entity: Entity, id: &str, patch: Map<String, Value>) -> LedgerResult<Record> {
    let mut changes = normalize_payload(entity, patch)?;
    if let Some(echoed) = changes.remove("id") {
        if echoed.as_str() != Some(id) {
            return fail(entity, vec!["id cannot be changed".to_string()]);
        }
    }
    Ok(changes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    fn issues(err: LedgerError) -> Vec<String> {
        match err {
            LedgerError::Validation { issues, .. } => issues,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn camel_case_keys_are_normalized() {
        assert_eq!(normalize_key("saleId"), "sale_id");
        assert_eq!(normalize_key("customerCPF"), "customer_cpf");
        assert_eq!(normalize_key("isPublicProfile"), "is_public_profile");
        assert_eq!(normalize_key("zip_code"), "zip_code");
        assert_eq!(normalize_key("type"), "type");
    }

    #[test]
    fn sale_create_lists_every_problem() {
        let err = prepare_create(
            Entity::Sale,
            payload(json!({ "salePrice": "abc", "discount": 3 })),
        )
        .unwrap_err();
        let issues = issues(err);
        assert!(issues.contains(&"unknown column discount".to_string()));
        assert!(issues.contains(&"sale_price must be a number".to_string()));
    }

    #[test]
    fn sale_create_requires_customer_and_owner() {
        let err = prepare_create(Entity::Sale, payload(json!({ "salePrice": 10 }))).unwrap_err();
        let issues = issues(err);
        assert!(issues.contains(&"user_id is required".to_string()));
        assert!(issues.contains(&"customer_name is required".to_string()));
    }

    #[test]
    fn create_generates_id_and_timestamps() {
        let record = prepare_create(
            Entity::Sale,
            payload(json!({ "userId": "u1", "customerName": "Ana", "salePrice": "19.90" })),
        )
        .unwrap();
        assert_eq!(record["id"].as_str().map(str::len), Some(36));
        assert_eq!(record["sale_price"], json!(19.9));
        assert_eq!(record["created_at"], record["updated_at"]);
    }

    #[test]
    fn flags_and_choices_are_coerced_or_rejected() {
        let record = normalize_payload(
            Entity::Shipment,
            payload(json!({ "labelGenerated": true, "status": "SHIPPED" })),
        )
        .unwrap();
        assert_eq!(record["label_generated"], json!(1));

        let err = normalize_payload(Entity::Shipment, payload(json!({ "status": "LOST" })))
            .unwrap_err();
        assert_eq!(
            issues(err),
            vec!["status must be one of PENDING, LABEL_GENERATED, SHIPPED, DELIVERED"]
        );
    }

    #[test]
    fn counters_cannot_be_written_but_timestamps_are_ignored() {
        let err = normalize_payload(
            Entity::CommunityPost,
            payload(json!({ "likesCount": 99, "createdAt": "2020-01-01T00:00:00Z" })),
        )
        .unwrap_err();
        assert_eq!(issues(err), vec!["likes_count is maintained by the ledger"]);
    }

    #[test]
    fn transaction_guard_rejects_swapped_fields() {
        let err = prepare_create(
            Entity::FinancialTransaction,
            payload(json!({
                "userId": "u1",
                "description": "2025-03-01T00:00:00Z",
                "date": "Office supplies",
                "amount": 12.5,
                "type": "EXPENSE"
            })),
        )
        .unwrap_err();
        let issues = issues(err);
        assert!(issues.contains(&"date must be an ISO-8601 timestamp".to_string()));
    }

    #[test]
    fn description_guard_applies_to_merged_rows() {
        let merged = payload(json!({ "description": "2025-03-01T10:00:00.000Z", "date": "2025-03-01" }));
        assert_eq!(
            check_rules(Entity::FinancialTransaction, &merged),
            vec!["description looks like a timestamp; dates belong in date"]
        );
    }

    #[test]
    fn patch_may_echo_but_not_change_id() {
        let changes = prepare_patch(
            Entity::Company,
            "c1",
            payload(json!({ "id": "c1", "name": "Acme" })),
        )
        .unwrap();
        assert_eq!(changes, payload(json!({ "name": "Acme" })));
        assert!(prepare_patch(Entity::Company, "c1", payload(json!({ "id": "c2" }))).is_err());
    }

    #[test]
    fn range_rules() {
        assert_eq!(
            check_rules(Entity::RecurringExpense, &payload(json!({ "day_of_month": 32 }))),
            vec!["day_of_month must be between 1 and 31"]
        );
        assert_eq!(
            check_rules(Entity::Sale, &payload(json!({ "sale_price": -1.0 }))),
            vec!["sale_price must not be negative"]
        );
        assert!(check_rules(Entity::AffiliatePlatform, &payload(json!({ "commission_rate": 12.5 }))).is_empty());
    }
}
