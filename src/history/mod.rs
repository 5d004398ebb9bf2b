//! Append-only history ledger for lore entities.
//!
//! A logical edit never rewrites a record: it invalidates the old one at the
//! editing version and appends a replacement stamped with that version, so
//! branches that predate the edit keep seeing the original. Deleting is the
//! only destructive operation.

pub mod extract;
pub mod visibility;

use uuid::Uuid;

use crate::error::StoreError;
use crate::model::{HistoryInvalidation, StoryEntityHistory, StoryRef, VersionRef};
use crate::store::{Batch, KvStore, Repository};
use crate::version::next_timestamp;

pub use visibility::{Visibility, VisibleHistory, visibility, visible_for_entity};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DraftPolicy {
    /// Accept draft-scoped entries but log them.
    #[default]
    Warn,
    Reject,
}

impl DraftPolicy {
    pub fn from_strict(strict: bool) -> Self {
        if strict { Self::Reject } else { Self::Warn }
    }
}

/// Entries written before the story or version exists mean the caller wrote
/// history ahead of the first save.
fn check_draft(
    policy: DraftPolicy,
    story: &StoryRef,
    version: &VersionRef,
    entity_id: &str,
) -> Result<(), StoreError> {
    if !story.is_draft() && !version.is_draft() {
        return Ok(());
    }
    tracing::warn!(
        entity_id,
        draft_story = story.is_draft(),
        draft_version = version.is_draft(),
        "history entry written before the story was saved"
    );
    match policy {
        DraftPolicy::Warn => Ok(()),
        DraftPolicy::Reject => Err(StoreError::DraftHistory),
    }
}

pub fn add_history<S: KvStore>(
    repo: &mut Repository<S>,
    entity_id: &str,
    story_id: Option<&str>,
    version_id: Option<&str>,
    content: &str,
    policy: DraftPolicy,
) -> Result<String, StoreError> {
    let story = StoryRef::from_story(story_id);
    let version = VersionRef::from_current(version_id);
    check_draft(policy, &story, &version, entity_id)?;

    let mut history = repo.history()?;
    let record = new_record(entity_id, story, version, content);
    let id = record.id.clone();
    history.push(record);

    let mut batch = Batch::new();
    batch.history(&history)?;
    repo.commit(batch)?;
    tracing::debug!(history_id = %id, entity_id, "history entry added");
    Ok(id)
}

/// Invalidates `history_id` at `current_version` and appends the edited text
/// as a new entry stamped with that version. Returns the new id, or `None`
/// when `history_id` no longer exists.
pub fn update_history<S: KvStore>(
    repo: &mut Repository<S>,
    history_id: &str,
    new_content: &str,
    current_version: Option<&str>,
    policy: DraftPolicy,
) -> Result<Option<String>, StoreError> {
    let mut history = repo.history()?;
    let Some(original) = history.iter().find(|record| record.id == history_id) else {
        tracing::warn!(history_id, "update skipped; history entry not found");
        return Ok(None);
    };

    let version = VersionRef::from_current(current_version);
    check_draft(policy, &original.story_id, &version, &original.entity_id)?;
    let replacement = new_record(
        &original.entity_id,
        original.story_id.clone(),
        version.clone(),
        new_content,
    );
    let new_id = replacement.id.clone();
    history.push(replacement);

    let mut invalidations = repo.invalidations()?;
    let row = HistoryInvalidation {
        history_id: history_id.to_string(),
        version_id: version,
    };
    if !invalidations.contains(&row) {
        invalidations.push(row);
    }

    let mut batch = Batch::new();
    batch.history(&history)?;
    batch.invalidations(&invalidations)?;
    repo.commit(batch)?;
    tracing::debug!(history_id, new_history_id = %new_id, "history entry superseded");
    Ok(Some(new_id))
}

/// Removes the record outright. Invalidation rows that mention it are left in
/// place; filters skip rows whose record is gone.
pub fn delete_history<S: KvStore>(
    repo: &mut Repository<S>,
    history_id: &str,
) -> Result<bool, StoreError> {
    let mut history = repo.history()?;
    let before = history.len();
    history.retain(|record| record.id != history_id);
    if history.len() == before {
        return Ok(false);
    }
    let mut batch = Batch::new();
    batch.history(&history)?;
    repo.commit(batch)?;
    tracing::debug!(history_id, "history entry deleted");
    Ok(true)
}

pub fn is_invalidated_at<S: KvStore>(
    repo: &Repository<S>,
    history_id: &str,
    current_version: Option<&str>,
) -> Result<bool, StoreError> {
    let here = VersionRef::from_current(current_version);
    Ok(repo
        .invalidations()?
        .iter()
        .any(|row| row.history_id == history_id && row.version_id == here))
}

/// Restores when `currently_invalidated`, otherwise invalidates from
/// `current_version` onward. Returns whether the pair is invalidated afterwards.
pub fn toggle_invalidation<S: KvStore>(
    repo: &mut Repository<S>,
    history_id: &str,
    current_version: Option<&str>,
    currently_invalidated: bool,
) -> Result<bool, StoreError> {
    let row = HistoryInvalidation {
        history_id: history_id.to_string(),
        version_id: VersionRef::from_current(current_version),
    };
    let mut invalidations = repo.invalidations()?;
    if currently_invalidated {
        invalidations.retain(|existing| existing != &row);
    } else if !invalidations.contains(&row) {
        invalidations.push(row);
    }

    let mut batch = Batch::new();
    batch.invalidations(&invalidations)?;
    repo.commit(batch)?;
    Ok(!currently_invalidated)
}

/// Moves draft-scoped entries onto a freshly created story. Entries and
/// invalidations without a version are pinned to `root_version`.
pub fn attach_drafts(
    history: &mut [StoryEntityHistory],
    invalidations: &mut [HistoryInvalidation],
    story_id: &str,
    root_version: &str,
) -> usize {
    let mut attached = Vec::new();
    for record in history.iter_mut().filter(|record| record.story_id.is_draft()) {
        record.story_id = StoryRef::Attached(story_id.to_string());
        if record.version_id.is_draft() {
            record.version_id = VersionRef::Persisted(root_version.to_string());
        }
        attached.push(record.id.clone());
    }
    for row in invalidations
        .iter_mut()
        .filter(|row| row.version_id.is_draft() && attached.contains(&row.history_id))
    {
        row.version_id = VersionRef::Persisted(root_version.to_string());
    }
    attached.len()
}

/// Drops every entry that never got attached to a story, along with its
/// invalidation rows.
pub fn discard_drafts<S: KvStore>(repo: &mut Repository<S>) -> Result<usize, StoreError> {
    let mut history = repo.history()?;
    let discarded: Vec<String> = history
        .iter()
        .filter(|record| record.story_id.is_draft())
        .map(|record| record.id.clone())
        .collect();
    if discarded.is_empty() {
        return Ok(0);
    }
    history.retain(|record| !record.story_id.is_draft());
    let mut invalidations = repo.invalidations()?;
    invalidations.retain(|row| !discarded.contains(&row.history_id));

    let mut batch = Batch::new();
    batch.history(&history)?;
    batch.invalidations(&invalidations)?;
    repo.commit(batch)?;
    tracing::debug!(count = discarded.len(), "draft history discarded");
    Ok(discarded.len())
}

pub(crate) fn new_record(
    entity_id: &str,
    story_id: StoryRef,
    version_id: VersionRef,
    content: &str,
) -> StoryEntityHistory {
    StoryEntityHistory {
        id: Uuid::new_v4().to_string(),
        story_id,
        version_id,
        entity_id: entity_id.to_string(),
        content: content.to_string(),
        created_at: next_timestamp(0),
    }
}
