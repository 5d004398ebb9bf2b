use std::collections::HashSet;

use serde::Serialize;

use crate::model::{HistoryInvalidation, StoryEntityHistory, VersionRef};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Normal,
    /// Invalidated at exactly the version being viewed.
    Struck,
    Hidden,
}

impl Visibility {
    pub fn is_visible(self) -> bool {
        !matches!(self, Self::Hidden)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VisibleHistory {
    pub record: StoryEntityHistory,
    pub struck: bool,
}

/// How `record` renders when viewing `story_id` at `current`, given the
/// lineage of `current`. Callers filter by entity first.
pub fn visibility(
    record: &StoryEntityHistory,
    story_id: Option<&str>,
    current: Option<&str>,
    lineage: &HashSet<String>,
    invalidations: &[HistoryInvalidation],
) -> Visibility {
    let in_scope = match story_id {
        Some(story_id) => record.story_id.in_scope(story_id),
        None => record.story_id.is_draft(),
    };
    if !in_scope {
        return Visibility::Hidden;
    }

    let on_lineage = match (current, &record.version_id) {
        (_, VersionRef::Draft) => true,
        (None, VersionRef::Persisted(_)) => false,
        (Some(_), VersionRef::Persisted(id)) => lineage.contains(id),
    };
    if !on_lineage {
        return Visibility::Hidden;
    }

    let here = VersionRef::from_current(current);
    let mut invalidated_here = false;
    for row in invalidations.iter().filter(|row| row.history_id == record.id) {
        let applies = match &row.version_id {
            VersionRef::Draft => true,
            VersionRef::Persisted(id) => lineage.contains(id),
        };
        if !applies {
            continue;
        }
        if row.version_id == here {
            invalidated_here = true;
        } else {
            return Visibility::Hidden;
        }
    }

    if invalidated_here {
        Visibility::Struck
    } else {
        Visibility::Normal
    }
}

pub fn is_visible(
    record: &StoryEntityHistory,
    story_id: Option<&str>,
    current: Option<&str>,
    lineage: &HashSet<String>,
    invalidations: &[HistoryInvalidation],
) -> bool {
    visibility(record, story_id, current, lineage, invalidations).is_visible()
}

/// Visible entries for one entity, oldest first.
pub fn visible_for_entity(
    records: &[StoryEntityHistory],
    invalidations: &[HistoryInvalidation],
    entity_id: &str,
    story_id: Option<&str>,
    current: Option<&str>,
    lineage: &HashSet<String>,
) -> Vec<VisibleHistory> {
    let mut out: Vec<VisibleHistory> = records
        .iter()
        .filter(|record| record.entity_id == entity_id)
        .filter_map(|record| {
            match visibility(record, story_id, current, lineage, invalidations) {
                Visibility::Hidden => None,
                state => Some(VisibleHistory {
                    record: record.clone(),
                    struck: state == Visibility::Struck,
                }),
            }
        })
        .collect();
    out.sort_by(|a, b| {
        a.record
            .created_at
            .cmp(&b.record.created_at)
            .then_with(|| a.record.id.cmp(&b.record.id))
    });
    out
}
