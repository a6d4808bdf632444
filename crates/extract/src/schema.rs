use serde::{Deserialize, Serialize};
use std::fmt;

/// Label used when the model omits an entity type.
pub const DEFAULT_ENTITY_TYPE: &str = "Entity";

/// Label used when the model omits a relation type.
pub const DEFAULT_RELATION_TYPE: &str = "related_to";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: String,
    pub text: String,
}

impl Entity {
    pub fn kind(&self) -> EntityType {
        EntityType::classify(&self.entity_type)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    pub source_id: String,
    pub target_id: String,
    #[serde(rename = "type")]
    pub relation_type: String,
    pub text: String,
}

/// A validated `{entities, relations}` object.
///
/// Every relation endpoint refers to an entity id in the same object once it
/// has passed through [`crate::validate`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionResult {
    pub entities: Vec<Entity>,
    pub relations: Vec<Relation>,
}

impl ExtractionResult {
    /// The canonical empty object that every failure degrades to.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty() && self.relations.is_empty()
    }
}

/// Coarse classification of the free-form entity labels models emit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EntityType {
    Person,
    Organization,
    Location,
    Industry,
    Concept,
    Email,
    Position,
    Role,
    Unknown,
}

impl EntityType {
    pub const ALL: [EntityType; 9] = [
        EntityType::Person,
        EntityType::Organization,
        EntityType::Location,
        EntityType::Industry,
        EntityType::Concept,
        EntityType::Email,
        EntityType::Position,
        EntityType::Role,
        EntityType::Unknown,
    ];

    /// Case-insensitive match on the label; anything unrecognized is `Unknown`.
    pub fn classify(label: &str) -> Self {
        let label = label.trim();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(label))
            .unwrap_or(EntityType::Unknown)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EntityType::Person => "Person",
            EntityType::Organization => "Organization",
            EntityType::Location => "Location",
            EntityType::Industry => "Industry",
            EntityType::Concept => "Concept",
            EntityType::Email => "Email",
            EntityType::Position => "Position",
            EntityType::Role => "Role",
            EntityType::Unknown => "Unknown",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
