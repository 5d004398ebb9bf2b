use std::collections::{HashMap, HashSet};

use crate::model::StoryVersion;

/// Ids on the path from `current` back to its root, both ends included.
///
/// Only ids that resolve in `versions` are collected: a dangling parent pointer
/// ends the walk, and a parent cycle stops at the first repeated id.
pub fn active_lineage(current: Option<&str>, versions: &[StoryVersion]) -> HashSet<String> {
    let mut lineage = HashSet::new();
    let Some(start) = current else {
        return lineage;
    };

    let parents: HashMap<&str, Option<&str>> = versions
        .iter()
        .map(|version| (version.id.as_str(), version.parent_id.as_deref()))
        .collect();

    let mut cursor = Some(start);
    while let Some(id) = cursor {
        let Some(parent) = parents.get(id) else {
            break;
        };
        if !lineage.insert(id.to_string()) {
            break;
        }
        cursor = *parent;
    }
    lineage
}

/// Number of edges between `version_id` and its root, or `None` if the id is
/// unknown.
pub fn depth(version_id: &str, versions: &[StoryVersion]) -> Option<usize> {
    active_lineage(Some(version_id), versions)
        .len()
        .checked_sub(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SaveType;

    fn version(id: &str, parent: Option<&str>) -> StoryVersion {
        StoryVersion {
            id: id.to_string(),
            parent_id: parent.map(ToOwned::to_owned),
            content: id.to_string(),
            saved_at: 0,
            save_type: SaveType::Manual,
            auto_history_generated: None,
        }
    }

    fn tree() -> Vec<StoryVersion> {
        vec![
            version("a", None),
            version("b", Some("a")),
            version("c", Some("a")),
            version("d", Some("b")),
        ]
    }

    fn ids(items: &[&str]) -> HashSet<String> {
        items.iter().map(|id| id.to_string()).collect()
    }

    #[test]
    fn no_current_version_means_empty_lineage() {
        assert!(active_lineage(None, &tree()).is_empty());
    }

    #[test]
    fn lineage_contains_start_and_every_ancestor_only() {
        let versions = tree();
        assert_eq!(active_lineage(Some("d"), &versions), ids(&["a", "b", "d"]));
        assert_eq!(active_lineage(Some("c"), &versions), ids(&["a", "c"]));
        assert_eq!(active_lineage(Some("a"), &versions), ids(&["a"]));
    }

    #[test]
    fn lineage_size_is_depth_plus_one() {
        let versions = tree();
        for v in &versions {
            let size = active_lineage(Some(v.id.as_str()), &versions).len();
            assert_eq!(size, depth(&v.id, &versions).expect("known id") + 1);
        }
        assert_eq!(depth("missing", &versions), None);
    }

    #[test]
    fn dangling_parent_and_cycles_terminate() {
        let dangling = vec![version("x", Some("gone"))];
        assert_eq!(active_lineage(Some("x"), &dangling), ids(&["x"]));
        assert!(active_lineage(Some("gone"), &dangling).is_empty());

        let cyclic = vec![version("p", Some("q")), version("q", Some("p"))];
        assert_eq!(active_lineage(Some("p"), &cyclic), ids(&["p", "q"]));
    }
}
