use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{EntityType, StoryLoreRelation};

/// Entity ids selected for a story, bucketed by entity type.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveEntities {
    #[serde(default)]
    pub mommy: Vec<String>,
    #[serde(default)]
    pub nerd: Vec<String>,
    #[serde(default)]
    pub lore: Vec<String>,
}

impl ActiveEntities {
    pub fn ids(&self, entity_type: EntityType) -> &[String] {
        match entity_type {
            EntityType::Mommy => &self.mommy,
            EntityType::Nerd => &self.nerd,
            EntityType::Lore => &self.lore,
        }
    }

    pub fn push(&mut self, entity_type: EntityType, entity_id: impl Into<String>) {
        let entity_id = entity_id.into();
        let bucket = match entity_type {
            EntityType::Mommy => &mut self.mommy,
            EntityType::Nerd => &mut self.nerd,
            EntityType::Lore => &mut self.lore,
        };
        if !bucket.contains(&entity_id) {
            bucket.push(entity_id);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (EntityType, &str)> + '_ {
        EntityType::ALL.into_iter().flat_map(move |entity_type| {
            self.ids(entity_type)
                .iter()
                .map(move |id| (entity_type, id.as_str()))
        })
    }

    pub fn is_empty(&self) -> bool {
        self.mommy.is_empty() && self.nerd.is_empty() && self.lore.is_empty()
    }

    pub fn for_story(relations: &[StoryLoreRelation], story_id: &str) -> Self {
        let mut active = Self::default();
        for relation in relations.iter().filter(|r| r.story_id == story_id) {
            active.push(relation.entity_type, relation.entity_id.clone());
        }
        active
    }
}

/// Drops every row for `story_id` and inserts one row per active entity.
pub fn replace_relations(
    relations: &mut Vec<StoryLoreRelation>,
    story_id: &str,
    active: &ActiveEntities,
) {
    remove_story_relations(relations, story_id);
    let mut seen = std::collections::HashSet::new();
    for (entity_type, entity_id) in active.iter() {
        if !seen.insert((entity_type, entity_id)) {
            continue;
        }
        relations.push(StoryLoreRelation {
            id: Uuid::new_v4().to_string(),
            story_id: story_id.to_string(),
            entity_id: entity_id.to_string(),
            entity_type,
        });
    }
}

pub fn remove_story_relations(relations: &mut Vec<StoryLoreRelation>, story_id: &str) -> usize {
    let before = relations.len();
    relations.retain(|relation| relation.story_id != story_id);
    before - relations.len()
}
