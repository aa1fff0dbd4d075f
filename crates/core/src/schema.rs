//! Extraction schemas - the declared numeric fields and payload validation

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;

use crate::{CoreError, EntityFacts, Result};

/// One declared numeric field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct FieldSpec {
    /// Field name as it appears in the structured output
    pub name: String,
    /// Human description, forwarded into the response schema
    pub description: String,
}

/// The fixed set of numeric fields one extraction task asks for.
///
/// Field order is preserved; every field is nullable-number typed. The
/// completion provider's payload is accepted only when each emitted
/// entity carries exactly these keys.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractionSchema {
    fields: Vec<FieldSpec>,
}

impl ExtractionSchema {
    /// Build a schema, rejecting empty field sets, duplicate names, and
    /// names that are not plain identifiers.
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self> {
        if fields.is_empty() {
            return Err(CoreError::InvalidParameter(
                "extraction schema must declare at least one field".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for field in &fields {
            if field.name.is_empty()
                || !field
                    .name
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(CoreError::InvalidParameter(format!(
                    "invalid field name: {:?}",
                    field.name
                )));
            }
            if !seen.insert(field.name.as_str()) {
                return Err(CoreError::InvalidParameter(format!(
                    "duplicate field name: {}",
                    field.name
                )));
            }
        }
        Ok(Self { fields })
    }

    /// Parse a `{ "field_name": "description", ... }` JSON object.
    pub fn from_json(value: &Value) -> Result<Self> {
        let object = value.as_object().ok_or_else(|| {
            CoreError::InvalidParameter("schema definition must be a JSON object".into())
        })?;
        let fields = object
            .iter()
            .map(|(name, description)| {
                let description = description
                    .as_str()
                    .ok_or_else(|| {
                        CoreError::InvalidParameter(format!(
                            "description for {} must be a string",
                            name
                        ))
                    })?
                    .to_string();
                Ok(FieldSpec {
                    name: name.clone(),
                    description,
                })
            })
            .collect::<Result<Vec<_>>>()?;
        Self::new(fields)
    }

    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.name.as_str())
    }

    /// The JSON Schema handed to the completion provider: an object with
    /// a `document_entities` array of objects whose properties are
    /// exactly the declared fields, each a nullable number.
    pub fn response_format(&self) -> Value {
        let mut properties = Map::new();
        for field in &self.fields {
            properties.insert(
                field.name.clone(),
                json!({
                    "type": ["number", "null"],
                    "description": field.description,
                }),
            );
        }
        let required: Vec<&str> = self.field_names().collect();
        json!({
            "type": "object",
            "additionalProperties": false,
            "required": ["document_entities"],
            "properties": {
                "document_entities": {
                    "type": "array",
                    "items": {
                        "type": "object",
                        "additionalProperties": false,
                        "required": required,
                        "properties": Value::Object(properties),
                    }
                }
            }
        })
    }

    /// Validate a structured payload against the declared fields.
    ///
    /// Every entity must carry every declared key (null is a value, an
    /// absent key is not), and no key outside the declaration. Values
    /// must be numbers or null.
    pub fn validate_entities(&self, payload: &Value) -> Result<Vec<EntityFacts>> {
        let entities = payload
            .get("document_entities")
            .ok_or_else(|| {
                CoreError::SchemaViolation("payload is missing document_entities".into())
            })?
            .as_array()
            .ok_or_else(|| {
                CoreError::SchemaViolation("document_entities must be an array".into())
            })?;

        let mut validated = Vec::with_capacity(entities.len());
        for (i, entity) in entities.iter().enumerate() {
            let object = entity.as_object().ok_or_else(|| {
                CoreError::SchemaViolation(format!("entity {} is not an object", i))
            })?;

            for key in object.keys() {
                if !self.fields.iter().any(|f| f.name == *key) {
                    return Err(CoreError::SchemaViolation(format!(
                        "entity {} carries undeclared field {}",
                        i, key
                    )));
                }
            }

            let mut facts: EntityFacts = BTreeMap::new();
            for field in &self.fields {
                let value = object.get(&field.name).ok_or_else(|| {
                    CoreError::SchemaViolation(format!(
                        "entity {} omits declared field {}",
                        i, field.name
                    ))
                })?;
                let number = match value {
                    Value::Null => None,
                    Value::Number(n) => Some(n.as_f64().ok_or_else(|| {
                        CoreError::SchemaViolation(format!(
                            "entity {} field {} is not representable as a number",
                            i, field.name
                        ))
                    })?),
                    other => {
                        return Err(CoreError::SchemaViolation(format!(
                            "entity {} field {} must be a number or null, got {}",
                            i, field.name, other
                        )))
                    }
                };
                facts.insert(field.name.clone(), number);
            }
            validated.push(facts);
        }

        Ok(validated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn annual_report_schema() -> ExtractionSchema {
        ExtractionSchema::from_json(&json!({
            "services_revenue": "Total consolidated service revenue in philippine pesos.",
            "net_income": "Total net income after tax in philippine pesos.",
        }))
        .unwrap()
    }

    #[test]
    fn response_format_declares_every_field() {
        let schema = annual_report_schema();
        let format = schema.response_format();

        let items = &format["properties"]["document_entities"]["items"];
        assert_eq!(items["required"], json!(["net_income", "services_revenue"]));
        assert_eq!(
            items["properties"]["net_income"]["type"],
            json!(["number", "null"])
        );
    }

    #[test]
    fn missing_key_is_a_schema_violation() {
        let schema = annual_report_schema();
        let payload = json!({
            "document_entities": [{"services_revenue": 180_000_000.0}]
        });
        let err = schema.validate_entities(&payload).unwrap_err();
        assert!(matches!(err, CoreError::SchemaViolation(_)));
        assert!(err.to_string().contains("net_income"));
    }

    #[test]
    fn explicit_null_is_accepted() {
        let schema = annual_report_schema();
        let payload = json!({
            "document_entities": [
                {"services_revenue": 180_000_000.0, "net_income": null}
            ]
        });
        let entities = schema.validate_entities(&payload).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0]["services_revenue"], Some(180_000_000.0));
        assert_eq!(entities[0]["net_income"], None);
    }

    #[test]
    fn undeclared_field_is_a_schema_violation() {
        let schema = annual_report_schema();
        let payload = json!({
            "document_entities": [
                {"services_revenue": 1.0, "net_income": 2.0, "ebitda": 3.0}
            ]
        });
        let err = schema.validate_entities(&payload).unwrap_err();
        assert!(err.to_string().contains("ebitda"));
    }

    #[test]
    fn non_numeric_value_is_a_schema_violation() {
        let schema = annual_report_schema();
        let payload = json!({
            "document_entities": [
                {"services_revenue": "lots", "net_income": null}
            ]
        });
        assert!(schema.validate_entities(&payload).is_err());
    }

    #[test]
    fn empty_entities_list_is_valid() {
        let schema = annual_report_schema();
        let payload = json!({"document_entities": []});
        assert!(schema.validate_entities(&payload).unwrap().is_empty());
    }

    #[test]
    fn schema_rejects_bad_field_sets() {
        assert!(ExtractionSchema::new(vec![]).is_err());
        assert!(ExtractionSchema::new(vec![
            FieldSpec {
                name: "x".into(),
                description: String::new()
            },
            FieldSpec {
                name: "x".into(),
                description: String::new()
            },
        ])
        .is_err());
        assert!(ExtractionSchema::new(vec![FieldSpec {
            name: "bad name".into(),
            description: String::new()
        }])
        .is_err());
    }
}
