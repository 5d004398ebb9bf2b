//! Save, undo, redo and branch selection over a story's version DAG.
//!
//! Each operation reads the stories document, changes at most one story, and
//! commits in a single batch. References that no longer resolve turn the
//! operation into a no-op.

use serde::Serialize;

use crate::error::StoreError;
use crate::history;
use crate::model::{SaveType, Story, StoryVersion};
use crate::relation::{self, ActiveEntities};
use crate::store::{Batch, KvStore};
use crate::version::{
    VersionIndex, divergence_preview, id_floor, next_timestamp, title_from_content,
};
use crate::workbench::{PendingBranches, Workbench};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveOutcome {
    pub story: Story,
    pub version: StoryVersion,
    /// A new version node was appended.
    pub created_version: bool,
    /// The story did not exist before this save.
    pub created_story: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Restored {
    pub version_id: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BranchCandidate {
    pub version_id: String,
    pub saved_at: i64,
    pub save_type: SaveType,
    pub preview: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Redo {
    /// No child to move to, or nothing resolves.
    Nothing,
    Moved(Restored),
    /// More than one child; state is unchanged until `select_branch`.
    Choose(Vec<BranchCandidate>),
}

impl<S: KvStore> Workbench<S> {
    /// Saves `content` as the new head of `story_id`, creating the story when
    /// it does not exist yet. Identical content only refreshes title and
    /// timestamp. Relations for the story are rewritten from `active` either way.
    pub fn save(
        &mut self,
        story_id: Option<&str>,
        content: &str,
        save_type: SaveType,
        active: &ActiveEntities,
    ) -> Result<SaveOutcome, StoreError> {
        let mut stories = self.repo.stories()?;
        let title = title_from_content(content, self.settings.title_max_chars);
        let position = story_id.and_then(|id| stories.iter().position(|s| s.id == id));

        let mut batch = Batch::new();
        let (story, version, created_version, created_story) = match position {
            None => {
                let floor = stories
                    .iter()
                    .filter_map(|s| s.id.parse::<i64>().ok())
                    .max()
                    .unwrap_or(0);
                let stamp = next_timestamp(floor);
                let id = story_id
                    .filter(|id| !id.is_empty())
                    .map(ToOwned::to_owned)
                    .unwrap_or_else(|| stamp.to_string());
                let version = StoryVersion {
                    id: stamp.to_string(),
                    parent_id: None,
                    content: content.to_string(),
                    saved_at: stamp,
                    save_type,
                    auto_history_generated: None,
                };
                let story = Story {
                    id,
                    title,
                    current_version_id: Some(version.id.clone()),
                    versions: vec![version.clone()],
                    created_at: stamp,
                    updated_at: stamp,
                };

                let mut history = self.repo.history()?;
                let mut invalidations = self.repo.invalidations()?;
                let attached = history::attach_drafts(
                    &mut history,
                    &mut invalidations,
                    &story.id,
                    &version.id,
                );
                if attached > 0 {
                    tracing::warn!(
                        story_id = %story.id,
                        attached,
                        "draft history attached to newly saved story"
                    );
                    batch.history(&history)?;
                    batch.invalidations(&invalidations)?;
                }

                stories.push(story.clone());
                (story, version, true, true)
            }
            Some(position) => {
                let story = &mut stories[position];
                let head = story.current_version().cloned();
                match head {
                    Some(head) if head.content == content => {
                        story.title = title;
                        story.updated_at = next_timestamp(story.updated_at);
                        (story.clone(), head, false, false)
                    }
                    head => {
                        if head.is_none() {
                            tracing::warn!(
                                story_id = %story.id,
                                current = ?story.current_version_id,
                                "current version does not resolve; saving as a new root"
                            );
                        }
                        let floor = id_floor(&story.versions).max(story.updated_at);
                        let stamp = next_timestamp(floor);
                        let version = StoryVersion {
                            id: stamp.to_string(),
                            parent_id: head.map(|head| head.id),
                            content: content.to_string(),
                            saved_at: stamp,
                            save_type,
                            auto_history_generated: None,
                        };
                        story.versions.push(version.clone());
                        story.current_version_id = Some(version.id.clone());
                        story.title = title;
                        story.updated_at = stamp;
                        (story.clone(), version, true, false)
                    }
                }
            }
        };

        let mut relations = self.repo.relations()?;
        relation::replace_relations(&mut relations, &story.id, active);
        batch.stories(&stories)?;
        batch.relations(&relations)?;
        self.repo.commit(batch)?;

        if created_version {
            self.clear_pending(&story.id);
        }
        tracing::debug!(
            story_id = %story.id,
            version_id = %version.id,
            save_type = save_type.as_str(),
            created_version,
            "story saved"
        );
        Ok(SaveOutcome {
            story,
            version,
            created_version,
            created_story,
        })
    }

    /// Moves to the parent of the current version.
    pub fn undo(&mut self, story_id: &str) -> Result<Option<Restored>, StoreError> {
        self.clear_pending(story_id);
        let stories = self.repo.stories()?;
        let Some(position) = stories.iter().position(|s| s.id == story_id) else {
            tracing::debug!(story_id, "undo skipped; story not found");
            return Ok(None);
        };
        let target = {
            let story = &stories[position];
            let index = VersionIndex::build(&story.versions);
            let Some(current) = story.current_version_id.as_deref() else {
                return Ok(None);
            };
            if index.get(current).is_none() {
                tracing::warn!(story_id, current, "undo skipped; current version not found");
                return Ok(None);
            }
            match index.parent(current) {
                Some(parent) => parent.id.clone(),
                None => return Ok(None),
            }
        };
        self.checkout(stories, position, &target).map(Some)
    }

    /// Moves to the only child of the current version, or offers every child
    /// when there are several.
    pub fn redo(&mut self, story_id: &str) -> Result<Redo, StoreError> {
        let stories = self.repo.stories()?;
        let Some(position) = stories.iter().position(|s| s.id == story_id) else {
            tracing::debug!(story_id, "redo skipped; story not found");
            return Ok(Redo::Nothing);
        };
        let (current_id, children, candidates) = {
            let story = &stories[position];
            let index = VersionIndex::build(&story.versions);
            let Some(current) = story.current_version_id.as_deref().and_then(|id| index.get(id))
            else {
                return Ok(Redo::Nothing);
            };
            let children: Vec<String> = index
                .children(&current.id)
                .iter()
                .map(|child| child.id.clone())
                .collect();
            let candidates: Vec<BranchCandidate> = if children.len() > 1 {
                index
                    .children(&current.id)
                    .iter()
                    .map(|child| BranchCandidate {
                        version_id: child.id.clone(),
                        saved_at: child.saved_at,
                        save_type: child.save_type,
                        preview: divergence_preview(
                            &current.content,
                            &child.content,
                            self.settings.preview_before,
                            self.settings.preview_after,
                        ),
                    })
                    .collect()
            } else {
                Vec::new()
            };
            (current.id.clone(), children, candidates)
        };

        match children.as_slice() {
            [] => Ok(Redo::Nothing),
            [only] => {
                self.clear_pending(story_id);
                self.checkout(stories, position, only).map(Redo::Moved)
            }
            _ => {
                tracing::debug!(
                    story_id,
                    branches = candidates.len(),
                    "redo needs a branch choice"
                );
                self.pending = Some(PendingBranches {
                    story_id: story_id.to_string(),
                    from_version: current_id,
                    candidates: candidates.clone(),
                });
                Ok(Redo::Choose(candidates))
            }
        }
    }

    /// Moves to `version_id` if it is a child of the current version.
    pub fn select_branch(
        &mut self,
        story_id: &str,
        version_id: &str,
    ) -> Result<Option<Restored>, StoreError> {
        self.clear_pending(story_id);
        let stories = self.repo.stories()?;
        let Some(position) = stories.iter().position(|s| s.id == story_id) else {
            return Ok(None);
        };
        let story = &stories[position];
        let is_child = story.current_version_id.is_some()
            && story.version(version_id).is_some_and(|candidate| {
                candidate.parent_id.is_some() && candidate.parent_id == story.current_version_id
            });
        if !is_child {
            tracing::warn!(
                story_id,
                version_id,
                "branch selection ignored; not a child of the current version"
            );
            return Ok(None);
        }
        self.checkout(stories, position, version_id).map(Some)
    }

    fn checkout(
        &mut self,
        mut stories: Vec<Story>,
        position: usize,
        version_id: &str,
    ) -> Result<Restored, StoreError> {
        let story = &mut stories[position];
        let content = story
            .version(version_id)
            .map(|version| version.content.clone())
            .unwrap_or_default();
        story.current_version_id = Some(version_id.to_string());
        story.title = title_from_content(&content, self.settings.title_max_chars);

        let mut batch = Batch::new();
        batch.stories(&stories)?;
        self.repo.commit(batch)?;
        tracing::debug!(version_id, "checked out version");
        Ok(Restored {
            version_id: version_id.to_string(),
            content,
        })
    }

    fn clear_pending(&mut self, story_id: &str) {
        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.story_id == story_id)
        {
            self.pending = None;
        }
    }
}
