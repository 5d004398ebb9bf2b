use std::collections::HashSet;

use serde::Serialize;

use crate::error::StoreError;
use crate::model::VersionRef;
use crate::store::{KvStore, Repository};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Issue {
    DuplicateVersion {
        story_id: String,
        version_id: String,
    },
    DanglingParent {
        story_id: String,
        version_id: String,
        parent_id: String,
    },
    ParentCycle {
        story_id: String,
        version_id: String,
    },
    UnresolvedCurrent {
        story_id: String,
        current_version_id: Option<String>,
    },
    DraftVersionInSavedStory {
        history_id: String,
        story_id: String,
    },
    HistoryForMissingStory {
        history_id: String,
        story_id: String,
    },
    RelationForMissingStory {
        relation_id: String,
        story_id: String,
    },
    ChatForMissingStory {
        story_id: String,
    },
}

/// Read-only consistency pass over everything the store holds.
pub fn check<S: KvStore>(repo: &Repository<S>) -> Result<Vec<Issue>, StoreError> {
    let stories = repo.stories()?;
    let mut issues = Vec::new();

    for story in &stories {
        let mut ids = HashSet::new();
        for version in &story.versions {
            if !ids.insert(version.id.as_str()) {
                issues.push(Issue::DuplicateVersion {
                    story_id: story.id.clone(),
                    version_id: version.id.clone(),
                });
            }
        }

        for version in &story.versions {
            if let Some(parent) = version.parent_id.as_deref()
                && !ids.contains(parent)
            {
                issues.push(Issue::DanglingParent {
                    story_id: story.id.clone(),
                    version_id: version.id.clone(),
                    parent_id: parent.to_string(),
                });
            }
        }

        let mut in_cycle = HashSet::new();
        for version in &story.versions {
            let mut seen = HashSet::new();
            let mut cursor = Some(version);
            while let Some(node) = cursor {
                if !seen.insert(node.id.as_str()) {
                    if !in_cycle.contains(node.id.as_str()) {
                        issues.push(Issue::ParentCycle {
                            story_id: story.id.clone(),
                            version_id: node.id.clone(),
                        });
                        let mut member = Some(node);
                        while let Some(current) = member {
                            if !in_cycle.insert(current.id.as_str()) {
                                break;
                            }
                            member = current
                                .parent_id
                                .as_deref()
                                .and_then(|parent| story.version(parent));
                        }
                    }
                    break;
                }
                cursor = node
                    .parent_id
                    .as_deref()
                    .and_then(|parent| story.version(parent));
            }
        }

        if story.current_version().is_none() {
            issues.push(Issue::UnresolvedCurrent {
                story_id: story.id.clone(),
                current_version_id: story.current_version_id.clone(),
            });
        }
    }

    let story_ids: HashSet<&str> = stories.iter().map(|story| story.id.as_str()).collect();
    for record in repo.history()? {
        let Some(story_id) = record.story_id.as_attached() else {
            continue;
        };
        if !story_ids.contains(story_id) {
            issues.push(Issue::HistoryForMissingStory {
                history_id: record.id.clone(),
                story_id: story_id.to_string(),
            });
        } else if record.version_id == VersionRef::Draft {
            issues.push(Issue::DraftVersionInSavedStory {
                history_id: record.id.clone(),
                story_id: story_id.to_string(),
            });
        }
    }

    for relation in repo.relations()? {
        if !story_ids.contains(relation.story_id.as_str()) {
            issues.push(Issue::RelationForMissingStory {
                relation_id: relation.id,
                story_id: relation.story_id,
            });
        }
    }

    for story_id in repo.chat_story_ids()? {
        if !story_ids.contains(story_id.as_str()) {
            issues.push(Issue::ChatForMissingStory { story_id });
        }
    }

    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{
        EntityType, SaveType, Story, StoryEntityHistory, StoryLoreRelation, StoryRef,
        StoryVersion,
    };
    use crate::store::{Batch, MemoryStore, chat_key};

    fn version(id: &str, parent: Option<&str>) -> StoryVersion {
        StoryVersion {
            id: id.to_string(),
            parent_id: parent.map(ToOwned::to_owned),
            content: String::new(),
            saved_at: 0,
            save_type: SaveType::Manual,
            auto_history_generated: None,
        }
    }

    fn story(id: &str, current: Option<&str>, versions: Vec<StoryVersion>) -> Story {
        Story {
            id: id.to_string(),
            title: id.to_string(),
            current_version_id: current.map(ToOwned::to_owned),
            versions,
            created_at: 0,
            updated_at: 0,
        }
    }

    fn repo_with(stories: &[Story]) -> Repository<MemoryStore> {
        let mut repo = Repository::new(MemoryStore::default());
        let mut batch = Batch::new();
        batch.stories(stories).expect("stage stories");
        repo.commit(batch).expect("commit");
        repo
    }

    #[test]
    fn healthy_forest_has_no_issues() {
        let repo = repo_with(&[story(
            "s1",
            Some("b"),
            vec![version("a", None), version("b", Some("a")), version("c", Some("a"))],
        )]);
        assert!(check(&repo).expect("check").is_empty());
    }

    #[test]
    fn reports_dangling_parents_cycles_and_unresolved_current() {
        let repo = repo_with(&[story(
            "s1",
            Some("missing"),
            vec![
                version("a", Some("gone")),
                version("p", Some("q")),
                version("q", Some("p")),
                version("a", None),
            ],
        )]);
        let issues = check(&repo).expect("check");
        assert!(issues.iter().any(|issue| matches!(
            issue,
            Issue::DuplicateVersion { version_id, .. } if version_id == "a"
        )));
        assert!(issues.iter().any(|issue| matches!(
            issue,
            Issue::DanglingParent { parent_id, .. } if parent_id == "gone"
        )));
        assert_eq!(
            issues
                .iter()
                .filter(|issue| matches!(issue, Issue::ParentCycle { .. }))
                .count(),
            1
        );
        assert!(
            issues
                .iter()
                .any(|issue| matches!(issue, Issue::UnresolvedCurrent { .. }))
        );
    }

    #[test]
    fn reports_rows_left_behind_by_a_missing_story() {
        let mut repo = repo_with(&[story("s1", Some("a"), vec![version("a", None)])]);
        let mut batch = Batch::new();
        batch
            .relations(&[StoryLoreRelation {
                id: "r1".to_string(),
                story_id: "gone".to_string(),
                entity_id: "e1".to_string(),
                entity_type: EntityType::Lore,
            }])
            .expect("stage relations");
        batch
            .history(&[StoryEntityHistory {
                id: "h1".to_string(),
                story_id: StoryRef::Attached("s1".to_string()),
                version_id: VersionRef::Draft,
                entity_id: "e1".to_string(),
                content: "stale".to_string(),
                created_at: 1,
            }])
            .expect("stage history");
        batch.put(&chat_key("gone"), "[]").expect("stage chat");
        batch.put(&chat_key("s1"), "[]").expect("stage chat");
        repo.commit(batch).expect("commit");

        let issues = check(&repo).expect("check");
        assert_eq!(
            issues,
            vec![
                Issue::DraftVersionInSavedStory {
                    history_id: "h1".to_string(),
                    story_id: "s1".to_string(),
                },
                Issue::RelationForMissingStory {
                    relation_id: "r1".to_string(),
                    story_id: "gone".to_string(),
                },
                Issue::ChatForMissingStory {
                    story_id: "gone".to_string(),
                },
            ]
        );
    }
}
