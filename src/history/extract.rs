//! Background history extraction.
//!
//! Saves enqueue "read this version and log what changed" tasks. Tasks run one
//! at a time because each prompt is built from the ledger the previous task
//! left behind. A task carries only ids; everything else is read from the
//! store when the task runs.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::fmt::Write as _;

use serde::Deserialize;

use crate::completion::{ChatMessage, CompletionError, TextCompletion};
use crate::error::StoreError;
use crate::history::{self, visible_for_entity};
use crate::lineage::active_lineage;
use crate::model::{EntityType, StoryRef, VersionRef};
use crate::relation::ActiveEntities;
use crate::store::{Batch, KvStore};
use crate::workbench::Workbench;

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You keep the continuity log for a story. \
Read the passage and what is already recorded for each entity. Reply with a JSON array \
of objects {\"entityId\": string, \"content\": string}, one per new fact the passage \
establishes about a listed entity. Do not repeat recorded facts. Reply with [] when \
nothing new happened.";

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExtractionTask {
    pub story_id: String,
    pub version_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Busy,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    StoryMissing,
    VersionMissing,
    AlreadyGenerated,
    NoActiveEntities,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Extracted { history_ids: Vec<String> },
    Skipped(SkipReason),
}

#[derive(Debug)]
pub enum ExtractionError {
    Store(StoreError),
    Completion(CompletionError),
}

impl fmt::Display for ExtractionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(err) => write!(f, "{err}"),
            Self::Completion(err) => write!(f, "{err}"),
        }
    }
}

impl std::error::Error for ExtractionError {}

impl From<StoreError> for ExtractionError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<CompletionError> for ExtractionError {
    fn from(value: CompletionError) -> Self {
        Self::Completion(value)
    }
}

#[derive(Debug, Default)]
pub struct DrainReport {
    pub completed: Vec<(ExtractionTask, TaskOutcome)>,
    pub failed: Vec<(ExtractionTask, ExtractionError)>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedFact {
    #[serde(alias = "entity_id")]
    pub entity_id: String,
    pub content: String,
}

type StatusListener = Box<dyn FnMut(QueueStatus)>;

#[derive(Default)]
pub struct ExtractionQueue {
    pending: VecDeque<ExtractionTask>,
    listener: Option<StatusListener>,
}

impl ExtractionQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_listener(listener: impl FnMut(QueueStatus) + 'static) -> Self {
        Self {
            pending: VecDeque::new(),
            listener: Some(Box::new(listener)),
        }
    }

    /// Returns false when an identical task is already waiting.
    pub fn enqueue(&mut self, task: ExtractionTask) -> bool {
        if self.pending.contains(&task) {
            return false;
        }
        self.pending.push_back(task);
        true
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Runs queued tasks in order until none remain. A failed task is
    /// reported and the queue moves on.
    pub fn drain<S, C>(&mut self, workbench: &mut Workbench<S>, completion: &C) -> DrainReport
    where
        S: KvStore,
        C: TextCompletion + ?Sized,
    {
        let mut report = DrainReport::default();
        if self.pending.is_empty() {
            return report;
        }
        self.notify(QueueStatus::Busy);
        while let Some(task) = self.pending.pop_front() {
            match run_task(workbench, completion, &task) {
                Ok(outcome) => report.completed.push((task, outcome)),
                Err(err) => {
                    tracing::warn!(
                        story_id = %task.story_id,
                        version_id = %task.version_id,
                        error = %err,
                        "history extraction failed"
                    );
                    report.failed.push((task, err));
                }
            }
        }
        self.notify(QueueStatus::Idle);
        report
    }

    fn notify(&mut self, status: QueueStatus) {
        if let Some(listener) = self.listener.as_mut() {
            listener(status);
        }
    }
}

pub fn run_task<S, C>(
    workbench: &mut Workbench<S>,
    completion: &C,
    task: &ExtractionTask,
) -> Result<TaskOutcome, ExtractionError>
where
    S: KvStore,
    C: TextCompletion + ?Sized,
{
    let Some(story) = workbench.story(&task.story_id)? else {
        return Ok(TaskOutcome::Skipped(SkipReason::StoryMissing));
    };
    let Some(version) = story.version(&task.version_id) else {
        return Ok(TaskOutcome::Skipped(SkipReason::VersionMissing));
    };
    if version.history_generated() {
        return Ok(TaskOutcome::Skipped(SkipReason::AlreadyGenerated));
    }
    let active = workbench.active_entities(&story.id)?;
    if active.is_empty() {
        return Ok(TaskOutcome::Skipped(SkipReason::NoActiveEntities));
    }

    let lineage = active_lineage(Some(version.id.as_str()), &story.versions);
    let ledger = workbench.repo.history()?;
    let invalidations = workbench.repo.invalidations()?;
    let mut known = Vec::new();
    for (entity_type, entity_id) in active.iter() {
        let facts: Vec<String> = visible_for_entity(
            &ledger,
            &invalidations,
            entity_id,
            Some(story.id.as_str()),
            Some(version.id.as_str()),
            &lineage,
        )
        .into_iter()
        .filter(|item| !item.struck)
        .map(|item| item.record.content)
        .collect();
        known.push((entity_type, entity_id.to_string(), facts));
    }

    let messages = vec![ChatMessage::user(build_prompt(&version.content, &known))];
    let response = completion.complete(&messages, EXTRACTION_SYSTEM_PROMPT)?;
    let facts = parse_extraction(&response)?;
    commit_facts(workbench, task, &active, facts)
}

/// Writes the extracted facts and flags the version, re-reading the store
/// first since the completion call may have taken a while.
fn commit_facts<S: KvStore>(
    workbench: &mut Workbench<S>,
    task: &ExtractionTask,
    active: &ActiveEntities,
    facts: Vec<ExtractedFact>,
) -> Result<TaskOutcome, ExtractionError> {
    let mut stories = workbench.repo.stories()?;
    let Some(story) = stories.iter_mut().find(|s| s.id == task.story_id) else {
        return Ok(TaskOutcome::Skipped(SkipReason::StoryMissing));
    };
    let Some(version) = story.versions.iter_mut().find(|v| v.id == task.version_id) else {
        return Ok(TaskOutcome::Skipped(SkipReason::VersionMissing));
    };
    if version.history_generated() {
        return Ok(TaskOutcome::Skipped(SkipReason::AlreadyGenerated));
    }
    version.auto_history_generated = Some(true);

    let allowed: HashSet<&str> = active.iter().map(|(_, id)| id).collect();
    let mut ledger = workbench.repo.history()?;
    let mut history_ids = Vec::new();
    for fact in facts {
        let content = fact.content.trim();
        if content.is_empty() {
            continue;
        }
        if !allowed.contains(fact.entity_id.as_str()) {
            tracing::debug!(entity_id = %fact.entity_id, "extracted fact for inactive entity dropped");
            continue;
        }
        let record = history::new_record(
            &fact.entity_id,
            StoryRef::Attached(task.story_id.clone()),
            VersionRef::Persisted(task.version_id.clone()),
            content,
        );
        history_ids.push(record.id.clone());
        ledger.push(record);
    }

    let mut batch = Batch::new();
    if !history_ids.is_empty() {
        batch.history(&ledger)?;
    }
    batch.stories(&stories)?;
    workbench.repo.commit(batch)?;
    tracing::debug!(
        story_id = %task.story_id,
        version_id = %task.version_id,
        added = history_ids.len(),
        "history extracted"
    );
    Ok(TaskOutcome::Extracted { history_ids })
}

fn build_prompt(content: &str, known: &[(EntityType, String, Vec<String>)]) -> String {
    let mut prompt = String::new();
    let _ = writeln!(prompt, "## Passage\n{content}\n\n## Entities");
    for (entity_type, entity_id, facts) in known {
        let _ = writeln!(prompt, "- {}:{entity_id}", entity_type.as_str());
        for fact in facts {
            let _ = writeln!(prompt, "  - {fact}");
        }
    }
    prompt
}

/// Accepts a bare JSON array or one wrapped in prose or a code fence.
pub fn parse_extraction(response: &str) -> Result<Vec<ExtractedFact>, CompletionError> {
    let (Some(start), Some(end)) = (response.find('['), response.rfind(']')) else {
        return Err(CompletionError::Malformed(
            "expected a JSON array of facts".to_string(),
        ));
    };
    if end < start {
        return Err(CompletionError::Malformed(
            "expected a JSON array of facts".to_string(),
        ));
    }
    serde_json::from_str(&response[start..=end])
        .map_err(|err| CompletionError::Malformed(err.to_string()))
}
