use std::collections::HashSet;

use womb::config::Settings;
use womb::lineage::{active_lineage, depth};
use womb::relation::ActiveEntities;
use womb::store::{MemoryStore, SqliteStore};
use womb::version::Redo;
use womb::{KvStore, SaveType, Workbench};

fn workbench() -> Workbench<MemoryStore> {
    Workbench::new(MemoryStore::default(), Settings::default())
}

fn save<S: KvStore>(workbench: &mut Workbench<S>, story: &str, content: &str) -> String {
    workbench
        .save(
            Some(story),
            content,
            SaveType::Manual,
            &ActiveEntities::default(),
        )
        .expect("save")
        .version
        .id
}

fn current_content<S: KvStore>(workbench: &Workbench<S>, story: &str) -> String {
    let current = workbench
        .current_version_id(story)
        .expect("current")
        .expect("current resolves");
    workbench
        .version_content(story, &current)
        .expect("content")
        .expect("version exists")
}

#[test]
fn alpha_branches_after_undo_and_redo_offers_both_children() {
    let mut wb = workbench();
    let a = wb
        .save(Some("alpha"), "Line1", SaveType::Manual, &ActiveEntities::default())
        .expect("save a");
    assert!(a.created_story);
    assert!(a.version.is_root());
    assert_eq!(a.story.title, "Line1");

    let b = wb
        .save(
            Some("alpha"),
            "Line1\nLine2",
            SaveType::GeneratePost,
            &ActiveEntities::default(),
        )
        .expect("save b");
    assert_eq!(b.version.parent_id.as_deref(), Some(a.version.id.as_str()));
    assert_eq!(b.version.save_type, SaveType::GeneratePost);

    let undone = wb.undo("alpha").expect("undo").expect("moved");
    assert_eq!(undone.version_id, a.version.id);
    assert_eq!(undone.content, "Line1");
    assert_eq!(
        wb.current_version_id("alpha").expect("current").as_deref(),
        Some(a.version.id.as_str())
    );

    let c = save(&mut wb, "alpha", "Line1\nLine2b");
    let story = wb.story("alpha").expect("load").expect("story");
    assert_eq!(story.versions.len(), 3);
    assert_eq!(
        story.version(&c).and_then(|v| v.parent_id.as_deref()),
        Some(a.version.id.as_str())
    );

    wb.undo("alpha").expect("undo to a");
    let Redo::Choose(candidates) = wb.redo("alpha").expect("redo") else {
        panic!("redo from a branch point must ask for a choice");
    };
    let ids: Vec<&str> = candidates.iter().map(|c| c.version_id.as_str()).collect();
    assert_eq!(ids, vec![b.version.id.as_str(), c.as_str()]);
    assert_eq!(candidates[0].preview, "...Line1{\nLine2}...");
    assert_eq!(candidates[1].preview, "...Line1{\nLine2b}...");

    let navigation = wb.navigation("alpha").expect("nav").expect("story");
    assert_eq!(navigation.branch_candidates.len(), 2);
    assert_eq!(
        navigation.current_version_id.as_deref(),
        Some(a.version.id.as_str())
    );

    let selected = wb.select_branch("alpha", &c).expect("select").expect("moved");
    assert_eq!(selected.content, "Line1\nLine2b");
    assert_eq!(current_content(&wb, "alpha"), "Line1\nLine2b");
    let navigation = wb.navigation("alpha").expect("nav").expect("story");
    assert!(navigation.branch_candidates.is_empty());
    assert!(navigation.can_undo);
    assert!(!navigation.can_redo);
}

#[test]
fn saving_identical_content_only_touches_updated_at() {
    let mut wb = workbench();
    save(&mut wb, "s", "same text");
    let before = wb.story("s").expect("load").expect("story");

    let outcome = wb
        .save(Some("s"), "same text", SaveType::Manual, &ActiveEntities::default())
        .expect("second save");
    assert!(!outcome.created_version);

    let after = wb.story("s").expect("load").expect("story");
    assert_eq!(after.versions, before.versions);
    assert_eq!(after.current_version_id, before.current_version_id);
    assert!(after.updated_at > before.updated_at);
}

#[test]
fn undo_then_redo_restores_the_newer_content() {
    let mut wb = workbench();
    save(&mut wb, "s", "c1");
    let second = save(&mut wb, "s", "c2");

    wb.undo("s").expect("undo");
    assert_eq!(current_content(&wb, "s"), "c1");

    let Redo::Moved(restored) = wb.redo("s").expect("redo") else {
        panic!("single child redo must move");
    };
    assert_eq!(restored.content, "c2");
    assert_eq!(restored.version_id, second);
    assert_eq!(
        wb.current_version_id("s").expect("current"),
        Some(second)
    );
}

#[test]
fn undo_at_root_and_redo_at_leaf_do_nothing() {
    let mut wb = workbench();
    save(&mut wb, "s", "only");
    assert!(wb.undo("s").expect("undo").is_none());
    assert_eq!(wb.redo("s").expect("redo"), Redo::Nothing);
    assert_eq!(current_content(&wb, "s"), "only");
}

#[test]
fn unknown_story_and_version_references_are_no_ops() {
    let mut wb = workbench();
    save(&mut wb, "s", "one");
    save(&mut wb, "s", "two");
    let before = wb.story("s").expect("load");

    assert!(wb.undo("missing").expect("undo").is_none());
    assert_eq!(wb.redo("missing").expect("redo"), Redo::Nothing);
    assert!(wb.select_branch("s", "nope").expect("select").is_none());
    assert!(wb.navigation("missing").expect("nav").is_none());

    assert_eq!(wb.story("s").expect("load"), before);
}

#[test]
fn selecting_a_version_that_is_not_a_child_is_ignored() {
    let mut wb = workbench();
    let root = save(&mut wb, "s", "root");
    save(&mut wb, "s", "child");
    let grandchild = save(&mut wb, "s", "grandchild");

    wb.undo("s").expect("undo");
    wb.undo("s").expect("undo");
    assert_eq!(wb.current_version_id("s").expect("current"), Some(root));
    assert!(wb.select_branch("s", &grandchild).expect("select").is_none());
    assert_eq!(current_content(&wb, "s"), "root");
}

#[test]
fn every_saved_parent_resolves_within_the_story() {
    let mut wb = workbench();
    save(&mut wb, "s", "a");
    save(&mut wb, "s", "b");
    wb.undo("s").expect("undo");
    save(&mut wb, "s", "b2");
    save(&mut wb, "s", "c2");
    wb.undo("s").expect("undo");
    wb.undo("s").expect("undo");
    save(&mut wb, "s", "b3");

    let story = wb.story("s").expect("load").expect("story");
    let ids: HashSet<&str> = story.versions.iter().map(|v| v.id.as_str()).collect();
    assert_eq!(ids.len(), story.versions.len());
    assert_eq!(story.versions.iter().filter(|v| v.is_root()).count(), 1);
    for version in &story.versions {
        if let Some(parent) = version.parent_id.as_deref() {
            assert!(ids.contains(parent), "dangling parent {parent}");
        }
    }
}

#[test]
fn lineage_is_the_ancestor_chain_of_the_current_version() {
    let mut wb = workbench();
    let a = save(&mut wb, "s", "a");
    let b = save(&mut wb, "s", "b");
    let c = save(&mut wb, "s", "c");
    wb.undo("s").expect("undo");
    wb.undo("s").expect("undo");
    let b2 = save(&mut wb, "s", "b2");

    let story = wb.story("s").expect("load").expect("story");
    for version in &story.versions {
        let lineage = active_lineage(Some(version.id.as_str()), &story.versions);
        assert!(lineage.contains(&version.id));
        let expected_depth = depth(&version.id, &story.versions).expect("depth");
        assert_eq!(lineage.len(), expected_depth + 1);
    }

    let lineage = wb.lineage("s").expect("lineage");
    assert_eq!(lineage, HashSet::from([a, b2]));
    assert!(!lineage.contains(&b));
    assert!(!lineage.contains(&c));
}

#[test]
fn version_ids_increase_within_a_story() {
    let mut wb = workbench();
    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(save(&mut wb, "s", &format!("draft {n}")));
    }
    let numeric: Vec<i64> = ids
        .iter()
        .map(|id| id.parse::<i64>().expect("numeric id"))
        .collect();
    assert!(numeric.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn stories_list_most_recent_first_and_titles_follow_checkout() {
    let mut wb = workbench();
    save(&mut wb, "first", "Opening\nbody");
    save(&mut wb, "second", "   \n  Second story  \nmore");
    save(&mut wb, "first", "Rewritten opening");

    let stories = wb.stories().expect("stories");
    let ids: Vec<&str> = stories.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["first", "second"]);
    assert_eq!(stories[0].title, "Rewritten opening");
    assert_eq!(stories[1].title, "Second story");

    wb.undo("first").expect("undo");
    let first = wb.story("first").expect("load").expect("story");
    assert_eq!(first.title, "Opening");
}

#[test]
fn sqlite_backend_persists_the_dag_across_reopen() {
    let temp = tempfile::tempdir().expect("tempdir");
    let path = temp.path().join("store.sqlite");
    let path = path.to_string_lossy().to_string();

    let (root, child) = {
        let store = SqliteStore::open(&path).expect("open");
        let mut wb = Workbench::new(store, Settings::default());
        let root = save(&mut wb, "s", "root");
        let child = save(&mut wb, "s", "child");
        wb.undo("s").expect("undo");
        (root, child)
    };

    let store = SqliteStore::open(&path).expect("reopen");
    let mut wb = Workbench::new(store, Settings::default());
    assert_eq!(wb.current_version_id("s").expect("current"), Some(root));
    let Redo::Moved(restored) = wb.redo("s").expect("redo") else {
        panic!("single child redo must move");
    };
    assert_eq!(restored.version_id, child);
}

#[test]
fn numeric_story_ids_at_the_integer_limit_do_not_break_new_stories() {
    let mut wb = workbench();
    let max = i64::MAX.to_string();
    save(&mut wb, &max, "a");

    let outcome = wb
        .save(None, "b", SaveType::Manual, &ActiveEntities::default())
        .expect("save new story");
    assert!(outcome.created_story);
    assert_ne!(outcome.story.id, max);
    assert_eq!(wb.stories().expect("stories").len(), 2);
    assert_eq!(current_content(&wb, &max), "a");
}
