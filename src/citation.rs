//! Citation recognition.
//!
//! Placeholder heuristic: any person or geopolitical entity counts as a
//! citation. It reports every mention of a person or place, and misses
//! citations phrased any other way (books, institutions).

use serde_json::Value;

use crate::types::Entity;

/// Categories treated as citations.
pub const CITATION_LABELS: [&str; 2] = ["PER", "GPE"];

/// Category of an entity, whether it was aggregated (`entity_group`) or not (`entity`).
pub fn entity_label(entity: &Entity) -> Option<&str> {
    entity
        .get("entity_group")
        .or_else(|| entity.get("entity"))
        .and_then(Value::as_str)
}

pub fn filter_citations(entities: Vec<Entity>) -> Vec<Entity> {
    entities
        .into_iter()
        .filter(|entity| entity_label(entity).is_some_and(|label| CITATION_LABELS.contains(&label)))
        .collect()
}
