pub mod preview;
pub mod store;

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::Utc;

use crate::model::StoryVersion;

pub use preview::divergence_preview;
pub use store::{BranchCandidate, Redo, Restored, SaveOutcome};

static LAST_ISSUED_MILLIS: AtomicI64 = AtomicI64::new(0);

/// Floors further ahead of the wall clock than this are ignored.
const MAX_FLOOR_LEAD_MILLIS: i64 = 24 * 60 * 60 * 1000;

pub const UNTITLED: &str = "Untitled";

/// Parent → children adjacency over a story's flat version list.
pub struct VersionIndex<'a> {
    by_id: HashMap<&'a str, &'a StoryVersion>,
    children: HashMap<&'a str, Vec<&'a StoryVersion>>,
}

impl<'a> VersionIndex<'a> {
    pub fn build(versions: &'a [StoryVersion]) -> Self {
        let mut by_id = HashMap::with_capacity(versions.len());
        let mut children: HashMap<&str, Vec<&StoryVersion>> = HashMap::new();
        for version in versions {
            by_id.entry(version.id.as_str()).or_insert(version);
            if let Some(parent) = version.parent_id.as_deref() {
                children.entry(parent).or_default().push(version);
            }
        }
        for siblings in children.values_mut() {
            siblings.sort_by(|a, b| a.saved_at.cmp(&b.saved_at).then_with(|| a.id.cmp(&b.id)));
        }
        Self { by_id, children }
    }

    pub fn get(&self, id: &str) -> Option<&'a StoryVersion> {
        self.by_id.get(id).copied()
    }

    /// Children ordered oldest first.
    pub fn children(&self, id: &str) -> &[&'a StoryVersion] {
        self.children.get(id).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn parent(&self, id: &str) -> Option<&'a StoryVersion> {
        self.get(id)
            .and_then(|version| version.parent_id.as_deref())
            .and_then(|parent| self.get(parent))
    }
}

/// Current wall-clock millis, bumped so that no two calls in this process
/// return the same value and every value exceeds `floor`. A floor more than
/// a day ahead of the clock comes from a hand-picked or edited id and is
/// ignored.
pub fn next_timestamp(floor: i64) -> i64 {
    let now = Utc::now().timestamp_millis();
    let floor = if floor > now.saturating_add(MAX_FLOOR_LEAD_MILLIS) {
        tracing::warn!(floor, "ignoring id floor far ahead of the clock");
        0
    } else {
        floor
    };
    let mut last = LAST_ISSUED_MILLIS.load(Ordering::Relaxed);
    loop {
        let candidate = now
            .max(last.saturating_add(1))
            .max(floor.saturating_add(1));
        match LAST_ISSUED_MILLIS.compare_exchange_weak(
            last,
            candidate,
            Ordering::Relaxed,
            Ordering::Relaxed,
        ) {
            Ok(_) => return candidate,
            Err(observed) => last = observed,
        }
    }
}

/// Largest numeric id or timestamp already present, so new ids sort after it.
pub fn id_floor(versions: &[StoryVersion]) -> i64 {
    versions
        .iter()
        .flat_map(|version| [version.id.parse::<i64>().ok(), Some(version.saved_at)])
        .flatten()
        .max()
        .unwrap_or(0)
}

/// First non-blank line of `content`, trimmed and capped at `max_chars`.
pub fn title_from_content(content: &str, max_chars: usize) -> String {
    let Some(line) = content.lines().map(str::trim).find(|line| !line.is_empty()) else {
        return UNTITLED.to_string();
    };
    if line.chars().count() <= max_chars {
        return line.to_string();
    }
    let mut title: String = line.chars().take(max_chars).collect();
    title.push_str("...");
    title
}
