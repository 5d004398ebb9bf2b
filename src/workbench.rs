use std::collections::HashSet;

use serde::Serialize;

use crate::config::Settings;
use crate::error::StoreError;
use crate::history::{self, DraftPolicy, VisibleHistory};
use crate::lineage::active_lineage;
use crate::model::{Story, StoryRef};
use crate::relation::{self, ActiveEntities};
use crate::store::{Batch, KvStore, Repository, chat_key};
use crate::version::{BranchCandidate, VersionIndex};

/// Redo candidates offered for one story at one version, waiting for the user
/// to pick a branch.
#[derive(Debug, Clone)]
pub(crate) struct PendingBranches {
    pub(crate) story_id: String,
    pub(crate) from_version: String,
    pub(crate) candidates: Vec<BranchCandidate>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Navigation {
    pub story_id: String,
    pub current_version_id: Option<String>,
    pub can_undo: bool,
    pub can_redo: bool,
    pub branch_candidates: Vec<BranchCandidate>,
}

/// The editor-facing core: version navigation, relations, and the history
/// ledger over one store. Nothing read from the store is kept between calls.
pub struct Workbench<S> {
    pub(crate) repo: Repository<S>,
    pub(crate) settings: Settings,
    pub(crate) pending: Option<PendingBranches>,
}

impl<S: KvStore> Workbench<S> {
    pub fn new(kv: S, settings: Settings) -> Self {
        Self {
            repo: Repository::new(kv),
            settings,
            pending: None,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn repository(&self) -> &Repository<S> {
        &self.repo
    }

    fn draft_policy(&self) -> DraftPolicy {
        DraftPolicy::from_strict(self.settings.strict_drafts)
    }

    /// Most recently updated first.
    pub fn stories(&self) -> Result<Vec<Story>, StoreError> {
        let mut stories = self.repo.stories()?;
        stories.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| b.id.cmp(&a.id)));
        Ok(stories)
    }

    pub fn story(&self, story_id: &str) -> Result<Option<Story>, StoreError> {
        self.repo.story(story_id)
    }

    pub fn version_content(
        &self,
        story_id: &str,
        version_id: &str,
    ) -> Result<Option<String>, StoreError> {
        Ok(self
            .repo
            .story(story_id)?
            .and_then(|story| story.version(version_id).map(|v| v.content.clone())))
    }

    /// Current version of a story, if both resolve.
    pub fn current_version_id(&self, story_id: &str) -> Result<Option<String>, StoreError> {
        Ok(self
            .repo
            .story(story_id)?
            .and_then(|story| story.current_version().map(|v| v.id.clone())))
    }

    pub fn lineage(&self, story_id: &str) -> Result<HashSet<String>, StoreError> {
        let Some(story) = self.repo.story(story_id)? else {
            return Ok(HashSet::new());
        };
        Ok(active_lineage(
            story.current_version_id.as_deref(),
            &story.versions,
        ))
    }

    pub fn navigation(&self, story_id: &str) -> Result<Option<Navigation>, StoreError> {
        let Some(story) = self.repo.story(story_id)? else {
            return Ok(None);
        };
        let index = VersionIndex::build(&story.versions);
        let current = story
            .current_version_id
            .as_deref()
            .and_then(|id| index.get(id));
        let can_undo = current.is_some_and(|v| index.parent(&v.id).is_some());
        let can_redo = current.is_some_and(|v| !index.children(&v.id).is_empty());
        let branch_candidates = match (&self.pending, current) {
            (Some(pending), Some(current))
                if pending.story_id == story.id && pending.from_version == current.id =>
            {
                pending.candidates.clone()
            }
            _ => Vec::new(),
        };
        Ok(Some(Navigation {
            story_id: story.id.clone(),
            current_version_id: current.map(|v| v.id.clone()),
            can_undo,
            can_redo,
            branch_candidates,
        }))
    }

    pub fn active_entities(&self, story_id: &str) -> Result<ActiveEntities, StoreError> {
        Ok(ActiveEntities::for_story(&self.repo.relations()?, story_id))
    }

    pub fn replace_relations(
        &mut self,
        story_id: &str,
        active: &ActiveEntities,
    ) -> Result<(), StoreError> {
        let mut relations = self.repo.relations()?;
        relation::replace_relations(&mut relations, story_id, active);
        let mut batch = Batch::new();
        batch.relations(&relations)?;
        self.repo.commit(batch)
    }

    /// Adds an entry for `entity_id` at the story's current version. Without a
    /// saved story the entry is a draft.
    pub fn add_history(
        &mut self,
        story_id: Option<&str>,
        entity_id: &str,
        content: &str,
    ) -> Result<String, StoreError> {
        let (story, version) = self.stamp(story_id)?;
        let policy = self.draft_policy();
        history::add_history(
            &mut self.repo,
            entity_id,
            story.as_deref(),
            version.as_deref(),
            content,
            policy,
        )
    }

    pub fn update_history(
        &mut self,
        story_id: Option<&str>,
        history_id: &str,
        new_content: &str,
    ) -> Result<Option<String>, StoreError> {
        // Attached entries are stamped from their own story.
        let owner = self
            .repo
            .history()?
            .into_iter()
            .find(|record| record.id == history_id)
            .and_then(|record| record.story_id.as_attached().map(ToOwned::to_owned));
        let (_, version) = self.stamp(owner.as_deref().or(story_id))?;
        let policy = self.draft_policy();
        history::update_history(
            &mut self.repo,
            history_id,
            new_content,
            version.as_deref(),
            policy,
        )
    }

    pub fn delete_history(&mut self, history_id: &str) -> Result<bool, StoreError> {
        history::delete_history(&mut self.repo, history_id)
    }

    /// Flips the invalidation of `history_id` at the story's current version.
    /// Returns whether it is invalidated afterwards.
    pub fn toggle_invalidation(
        &mut self,
        story_id: Option<&str>,
        history_id: &str,
    ) -> Result<bool, StoreError> {
        let (_, version) = self.stamp(story_id)?;
        let invalidated = history::is_invalidated_at(&self.repo, history_id, version.as_deref())?;
        history::toggle_invalidation(&mut self.repo, history_id, version.as_deref(), invalidated)
    }

    pub fn visible_history(
        &self,
        story_id: Option<&str>,
        entity_id: &str,
    ) -> Result<Vec<VisibleHistory>, StoreError> {
        let story = match story_id {
            Some(id) => self.repo.story(id)?,
            None => None,
        };
        let current = story.as_ref().and_then(|s| s.current_version_id.clone());
        let lineage = story
            .as_ref()
            .map(|s| active_lineage(current.as_deref(), &s.versions))
            .unwrap_or_default();
        Ok(history::visible_for_entity(
            &self.repo.history()?,
            &self.repo.invalidations()?,
            entity_id,
            story.as_ref().map(|s| s.id.as_str()),
            current.as_deref(),
            &lineage,
        ))
    }

    pub fn discard_drafts(&mut self) -> Result<usize, StoreError> {
        history::discard_drafts(&mut self.repo)
    }

    /// Removes the story with its relations, its history entries and their
    /// invalidation rows, and its chat transcript.
    pub fn delete_story(&mut self, story_id: &str) -> Result<bool, StoreError> {
        let mut stories = self.repo.stories()?;
        let before = stories.len();
        stories.retain(|story| story.id != story_id);
        if stories.len() == before {
            tracing::debug!(story_id, "delete skipped; story not found");
            return Ok(false);
        }

        let mut relations = self.repo.relations()?;
        relation::remove_story_relations(&mut relations, story_id);

        let owner = StoryRef::Attached(story_id.to_string());
        let mut history = self.repo.history()?;
        let removed: HashSet<String> = history
            .iter()
            .filter(|record| record.story_id == owner)
            .map(|record| record.id.clone())
            .collect();
        history.retain(|record| !removed.contains(&record.id));
        let mut invalidations = self.repo.invalidations()?;
        invalidations.retain(|row| !removed.contains(&row.history_id));

        let mut batch = Batch::new();
        batch.stories(&stories)?;
        batch.relations(&relations)?;
        batch.history(&history)?;
        batch.invalidations(&invalidations)?;
        batch.remove(&chat_key(story_id));
        self.repo.commit(batch)?;

        if self
            .pending
            .as_ref()
            .is_some_and(|pending| pending.story_id == story_id)
        {
            self.pending = None;
        }
        tracing::debug!(story_id, history = removed.len(), "story deleted");
        Ok(true)
    }

    /// Story and current version that new history should be stamped with.
    fn stamp(
        &self,
        story_id: Option<&str>,
    ) -> Result<(Option<String>, Option<String>), StoreError> {
        let Some(story_id) = story_id else {
            return Ok((None, None));
        };
        let Some(story) = self.repo.story(story_id)? else {
            tracing::warn!(story_id, "story not saved yet; history stays a draft");
            return Ok((None, None));
        };
        let version = story.current_version().map(|v| v.id.clone());
        Ok((Some(story.id), version))
    }
}
