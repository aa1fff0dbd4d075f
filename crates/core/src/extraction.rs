//! Extraction records - the structured output of one extraction run

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use surrealdb::RecordId;

/// One emitted entity: declared field name to nullable number. Every
/// declared field is present; a fact the model could not find is `None`,
/// never omitted.
pub type EntityFacts = BTreeMap<String, Option<f64>>;

/// The validated result of one retrieval-augmented extraction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionRecord {
    /// Unique identifier (maps to the store's record ID)
    pub id: Option<RecordId>,

    /// Document the extraction was scoped to
    pub source_path: String,

    /// The concatenated retrieval context actually sent to the model
    pub context: String,

    /// Validated entities, schema keys only
    pub document_entities: Vec<EntityFacts>,

    /// When the extraction completed
    #[serde(skip_serializing)]
    pub created_at: DateTime<Utc>,
}

impl ExtractionRecord {
    pub fn new(
        source_path: impl Into<String>,
        context: impl Into<String>,
        document_entities: Vec<EntityFacts>,
    ) -> Self {
        Self {
            id: None,
            source_path: source_path.into(),
            context: context.into(),
            document_entities,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_holds_validated_entities() {
        let mut facts: EntityFacts = BTreeMap::new();
        facts.insert("services_revenue".into(), Some(1.5e9));
        facts.insert("net_income".into(), None);

        let record = ExtractionRecord::new("report.pdf", "chunk a | chunk b", vec![facts]);
        assert_eq!(record.source_path, "report.pdf");
        assert_eq!(record.document_entities.len(), 1);
        assert_eq!(record.document_entities[0]["net_income"], None);
    }
}
