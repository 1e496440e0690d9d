//! JSON Schema validation for entity rows.
//!
//! The CSV codec only checks shape (header presence, column counts). This
//! module checks what each row must carry to be usable as an entity: a
//! non-empty string `id`, string timestamps, and scalar column values.
//!
//! # Example
//!
//! ```rust,ignore
//! use csvsync::models::EntityType;
//! use csvsync::validation::validate_rows;
//!
//! let rows = csvsync::parser::csv_to_objects("id,name\nkpis-1,Uptime", true);
//! assert!(validate_rows(EntityType::Kpis, &rows).is_ok());
//! ```

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::models::{EntityType, Row};

/// Validation problems found on one row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowIssue {
    /// 1-indexed data row number
    pub row: usize,
    pub errors: Vec<String>,
}

/// Validate a JSON value against a JSON schema (draft 7).
///
/// # Returns
/// * `Ok(())` if valid
/// * `Err(Vec<String>)` with every error message otherwise
pub fn validate(schema: &Value, data: &Value) -> Result<(), Vec<String>> {
    let validator = jsonschema::draft7::new(schema)
        .map_err(|e| vec![format!("Invalid schema: {}", e)])?;

    let errors: Vec<String> = validator
        .iter_errors(data)
        .map(|e| e.to_string())
        .collect();

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Quick true/false check.
pub fn is_valid(schema: &Value, data: &Value) -> bool {
    jsonschema::draft7::is_valid(schema, data)
}

/// Schema for one row of `entity`.
pub fn entity_schema(entity: EntityType) -> Value {
    let scalar = json!({ "type": ["string", "number", "boolean", "null"] });

    let mut properties = Map::new();
    for header in entity.default_headers() {
        properties.insert(header, scalar.clone());
    }
    properties.insert("id".into(), json!({ "type": "string", "minLength": 1 }));
    properties.insert("createdAt".into(), json!({ "type": "string" }));
    properties.insert("updatedAt".into(), json!({ "type": "string" }));

    json!({
        "$schema": "http://json-schema.org/draft-07/schema#",
        "title": entity.as_str(),
        "type": "object",
        "required": ["id"],
        "properties": properties,
        "additionalProperties": scalar,
    })
}

/// Validate every row of `entity`, collecting issues for the invalid ones.
pub fn validate_rows(entity: EntityType, rows: &[Row]) -> Result<(), Vec<RowIssue>> {
    let schema = entity_schema(entity);
    let validator = match jsonschema::draft7::new(&schema) {
        Ok(v) => v,
        Err(e) => {
            return Err(vec![RowIssue {
                row: 0,
                errors: vec![format!("Invalid schema: {}", e)],
            }])
        }
    };

    let issues: Vec<RowIssue> = rows
        .iter()
        .enumerate()
        .filter_map(|(i, row)| {
            let value = Value::Object(row.clone());
            let errors: Vec<String> = validator.iter_errors(&value).map(|e| e.to_string()).collect();
            (!errors.is_empty()).then(|| RowIssue { row: i + 1, errors })
        })
        .collect();

    if issues.is_empty() {
        Ok(())
    } else {
        Err(issues)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(v: Value) -> Row {
        v.as_object().cloned().unwrap()
    }

    #[test]
    fn test_valid_rows() {
        let rows = vec![
            row(json!({ "id": "kpis-1", "name": "Uptime", "target": "99" })),
            row(json!({ "id": "kpis-2", "target": 40, "createdAt": "2024-01-01T00:00:00.000Z" })),
        ];
        assert!(validate_rows(EntityType::Kpis, &rows).is_ok());
    }

    #[test]
    fn test_missing_id_is_reported_with_row_number() {
        let rows = vec![
            row(json!({ "id": "risks-1" })),
            row(json!({ "title": "No id" })),
            row(json!({ "id": "" })),
        ];
        let issues = validate_rows(EntityType::Risks, &rows).unwrap_err();
        assert_eq!(issues.len(), 2);
        assert_eq!(issues[0].row, 2);
        assert_eq!(issues[1].row, 3);
    }

    #[test]
    fn test_nested_values_rejected() {
        let rows = vec![row(json!({ "id": "tasks-1", "assignee": { "name": "Ana" } }))];
        assert!(validate_rows(EntityType::Tasks, &rows).is_err());
    }

    #[test]
    fn test_generic_validate() {
        let schema = json!({
            "type": "object",
            "required": ["name"],
            "properties": { "name": { "type": "string" } }
        });
        assert!(validate(&schema, &json!({ "name": "test" })).is_ok());
        assert!(validate(&schema, &json!({ "age": 42 })).is_err());
        assert!(is_valid(&entity_schema(EntityType::Objectives), &json!({ "id": "objectives-1" })));
    }
}
