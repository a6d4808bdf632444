use serde_json::{Map, Value};
use std::collections::HashSet;

use crate::schema::{DEFAULT_ENTITY_TYPE, DEFAULT_RELATION_TYPE, Entity, ExtractionResult, Relation};

/// Counts of what validation had to discard.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ValidationReport {
    pub entities_dropped: usize,
    pub relations_dropped: usize,
}

/// Validate and repair a recovered object.
///
/// Entities need an `id`; a missing `type` becomes "Entity" and a missing
/// `text` becomes the id. Relations need `source_id` and `target_id` that
/// resolve to a validated entity, and are dropped otherwise. Relations never
/// create entities.
pub fn validate(value: &Value) -> ExtractionResult {
    validate_with_report(value).0
}

pub fn validate_with_report(value: &Value) -> (ExtractionResult, ValidationReport) {
    let mut report = ValidationReport::default();
    let object = value.as_object();

    let mut seen = HashSet::new();
    let mut entities = Vec::new();
    for item in list_field(object, "entities") {
        match repair_entity(item) {
            Some(entity) if seen.insert(entity.id.clone()) => entities.push(entity),
            _ => report.entities_dropped += 1,
        }
    }

    let mut relations = Vec::new();
    for item in list_field(object, "relations") {
        match repair_relation(item, &seen) {
            Some(relation) => relations.push(relation),
            None => report.relations_dropped += 1,
        }
    }

    if report != ValidationReport::default() {
        tracing::debug!(
            entities_dropped = report.entities_dropped,
            relations_dropped = report.relations_dropped,
            "Dropped invalid items from extraction"
        );
    }

    (ExtractionResult { entities, relations }, report)
}

/// Re-validate an already typed result. Applying this to the output of
/// [`validate`] returns it unchanged.
pub fn revalidate(result: ExtractionResult) -> ExtractionResult {
    let mut seen = HashSet::new();
    let entities: Vec<Entity> = result
        .entities
        .into_iter()
        .filter(|e| !e.id.is_empty() && seen.insert(e.id.clone()))
        .collect();
    let relations = result
        .relations
        .into_iter()
        .filter(|r| seen.contains(&r.source_id) && seen.contains(&r.target_id))
        .collect();
    ExtractionResult { entities, relations }
}

fn list_field<'a>(object: Option<&'a Map<String, Value>>, key: &str) -> &'a [Value] {
    object
        .and_then(|o| o.get(key))
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or(&[])
}

fn repair_entity(item: &Value) -> Option<Entity> {
    let fields = item.as_object()?;
    let id = id_field(fields, "id")?;
    let entity_type = text_field(fields, "type").unwrap_or_else(|| DEFAULT_ENTITY_TYPE.to_string());
    let text = text_field(fields, "text").unwrap_or_else(|| id.clone());
    Some(Entity { id, entity_type, text })
}

fn repair_relation(item: &Value, entity_ids: &HashSet<String>) -> Option<Relation> {
    let fields = item.as_object()?;
    let source_id = id_field(fields, "source_id")?;
    let target_id = id_field(fields, "target_id")?;
    if !entity_ids.contains(&source_id) || !entity_ids.contains(&target_id) {
        return None;
    }
    let relation_type =
        text_field(fields, "type").unwrap_or_else(|| DEFAULT_RELATION_TYPE.to_string());
    let text = text_field(fields, "text").unwrap_or_else(|| relation_type.replace('_', " "));
    Some(Relation { source_id, target_id, relation_type, text })
}

/// Ids may arrive as strings or numbers; numbers are stringified.
fn id_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    let id = match fields.get(key)? {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    (!id.is_empty()).then_some(id)
}

fn text_field(fields: &Map<String, Value>, key: &str) -> Option<String> {
    fields
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}
