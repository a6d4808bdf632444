use crate::schema::EntityType;

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are an expert in knowledge extraction.";

pub fn build_extraction_prompt(chunk_text: &str, language: &str) -> String {
    let entity_types = EntityType::ALL
        .iter()
        .filter(|t| **t != EntityType::Unknown)
        .map(EntityType::as_str)
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        r#"Extract the main entities and the relationships between them from the text below.

IMPORTANT: Return ONLY a valid JSON object, with no text before or after it. The format must be exactly:

{{
  "entities": [
    {{"id": "ent1", "type": "Person", "text": "John Smith"}},
    {{"id": "ent2", "type": "Organization", "text": "Microsoft"}}
  ],
  "relations": [
    {{"source_id": "ent1", "target_id": "ent2", "type": "works_at", "text": "works at"}}
  ]
}}

RULES:
- Entity types should be one of: {entity_types}
- Every relation must reference ids declared in "entities"
- Write the "text" fields in {language}

TEXT:
"""{chunk_text}"""

JSON:"#
    )
}
