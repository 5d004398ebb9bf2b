//! Persisted records. Field names and enum spellings match the stored JSON
//! documents so existing data loads unchanged.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const DRAFT_VERSION: &str = "draft";
pub const DRAFT_STORY: &str = "";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaveType {
    Manual,
    GeneratePre,
    GeneratePost,
}

impl SaveType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Manual => "manual",
            Self::GeneratePre => "generate_pre",
            Self::GeneratePost => "generate_post",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "manual" => Some(Self::Manual),
            "generate_pre" | "pre" => Some(Self::GeneratePre),
            "generate_post" | "post" => Some(Self::GeneratePost),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntityType {
    Mommy,
    Nerd,
    Lore,
}

impl EntityType {
    pub const ALL: [EntityType; 3] = [Self::Mommy, Self::Nerd, Self::Lore];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mommy => "mommy",
            Self::Nerd => "nerd",
            Self::Lore => "lore",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "mommy" => Some(Self::Mommy),
            "nerd" => Some(Self::Nerd),
            "lore" => Some(Self::Lore),
            _ => None,
        }
    }
}

/// Where a history entry or invalidation sits in a story's version DAG.
/// `Draft` means no version existed yet when it was written.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum VersionRef {
    Persisted(String),
    #[default]
    Draft,
}

impl VersionRef {
    pub fn from_current(current: Option<&str>) -> Self {
        match current {
            Some(id) => Self::Persisted(id.to_string()),
            None => Self::Draft,
        }
    }

    pub fn is_draft(&self) -> bool {
        matches!(self, Self::Draft)
    }
}

impl From<String> for VersionRef {
    fn from(value: String) -> Self {
        if value.is_empty() || value == DRAFT_VERSION {
            Self::Draft
        } else {
            Self::Persisted(value)
        }
    }
}

impl From<VersionRef> for String {
    fn from(value: VersionRef) -> Self {
        match value {
            VersionRef::Persisted(id) => id,
            VersionRef::Draft => DRAFT_VERSION.to_string(),
        }
    }
}

impl fmt::Display for VersionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Persisted(id) => f.write_str(id),
            Self::Draft => f.write_str(DRAFT_VERSION),
        }
    }
}

/// The story a history entry belongs to. `Draft` entries were written before
/// the story was first saved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum StoryRef {
    Attached(String),
    #[default]
    Draft,
}

impl StoryRef {
    pub fn from_story(story_id: Option<&str>) -> Self {
        match story_id {
            Some(id) if !id.is_empty() => Self::Attached(id.to_string()),
            _ => Self::Draft,
        }
    }

    pub fn as_attached(&self) -> Option<&str> {
        match self {
            Self::Attached(id) => Some(id),
            Self::Draft => None,
        }
    }

    pub fn is_draft(&self) -> bool {
        matches!(self, Self::Draft)
    }

    /// Draft entries are in scope for every story.
    pub fn in_scope(&self, story_id: &str) -> bool {
        match self {
            Self::Attached(id) => id == story_id,
            Self::Draft => true,
        }
    }
}

impl From<String> for StoryRef {
    fn from(value: String) -> Self {
        if value.is_empty() {
            Self::Draft
        } else {
            Self::Attached(value)
        }
    }
}

impl From<StoryRef> for String {
    fn from(value: StoryRef) -> Self {
        match value {
            StoryRef::Attached(id) => id,
            StoryRef::Draft => DRAFT_STORY.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryVersion {
    pub id: String,
    pub parent_id: Option<String>,
    pub content: String,
    pub saved_at: i64,
    pub save_type: SaveType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_history_generated: Option<bool>,
}

impl StoryVersion {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn history_generated(&self) -> bool {
        self.auto_history_generated.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Story {
    pub id: String,
    pub title: String,
    pub current_version_id: Option<String>,
    #[serde(default)]
    pub versions: Vec<StoryVersion>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl Story {
    pub fn version(&self, id: &str) -> Option<&StoryVersion> {
        self.versions.iter().find(|version| version.id == id)
    }

    pub fn current_version(&self) -> Option<&StoryVersion> {
        self.current_version_id
            .as_deref()
            .and_then(|id| self.version(id))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryLoreRelation {
    pub id: String,
    pub story_id: String,
    pub entity_id: String,
    pub entity_type: EntityType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoryEntityHistory {
    pub id: String,
    #[serde(default)]
    pub story_id: StoryRef,
    #[serde(default)]
    pub version_id: VersionRef,
    pub entity_id: String,
    #[serde(default)]
    pub content: String,
    pub created_at: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryInvalidation {
    pub history_id: String,
    #[serde(default)]
    pub version_id: VersionRef,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinels_round_trip_through_stored_strings() {
        let raw = r#"{"id":"h1","storyId":"","versionId":"draft","entityId":"e1","content":"x","createdAt":1}"#;
        let record: StoryEntityHistory = serde_json::from_str(raw).expect("parse history");
        assert!(record.story_id.is_draft());
        assert!(record.version_id.is_draft());

        let encoded = serde_json::to_string(&record).expect("encode history");
        assert_eq!(encoded, raw);
    }

    #[test]
    fn missing_version_field_reads_as_draft() {
        let raw = r#"{"id":"h1","storyId":"s1","entityId":"e1","createdAt":1}"#;
        let record: StoryEntityHistory = serde_json::from_str(raw).expect("parse history");
        assert_eq!(record.story_id, StoryRef::Attached("s1".to_string()));
        assert_eq!(record.version_id, VersionRef::Draft);
        assert_eq!(record.content, "");
    }

    #[test]
    fn story_uses_camel_case_and_snake_case_save_types() {
        let raw = r#"{"id":"1","title":"Alpha","currentVersionId":"1","versions":[{"id":"1","parentId":null,"content":"Line1","savedAt":1,"saveType":"generate_post"}],"createdAt":1,"updatedAt":2}"#;
        let story: Story = serde_json::from_str(raw).expect("parse story");
        assert_eq!(story.versions[0].save_type, SaveType::GeneratePost);
        assert!(story.versions[0].is_root());
        assert!(!story.versions[0].history_generated());
        assert_eq!(
            story.current_version().map(|v| v.content.as_str()),
            Some("Line1")
        );
    }

    #[test]
    fn draft_story_ref_is_in_scope_everywhere() {
        assert!(StoryRef::Draft.in_scope("s1"));
        assert!(StoryRef::Attached("s1".to_string()).in_scope("s1"));
        assert!(!StoryRef::Attached("s2".to_string()).in_scope("s1"));
    }
}
