use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use tempfile::{tempdir, TempDir};

use super::*;
use crate::auth::StaticAcl;
use crate::branch::{BranchUpdate, Divergence, MergeSettings};
use crate::commit::{ChangeAction, CommitStats, HistoryFilter};
use crate::config::OnBranchDelete;
use crate::error::ErrorKind;
use crate::file::EntryKind;
use crate::path::FilePath;
use crate::project::MAIN_BRANCH;
use crate::reaction::Reaction;

const P: &str = "demo";

fn alice() -> Principal {
    Principal::user("alice")
}

fn setup() -> (TempDir, Store) {
    setup_with(Config::default())
}

fn setup_with(config: Config) -> (TempDir, Store) {
    let dir = tempdir().unwrap();
    Store::init(dir.path()).unwrap();
    let store = Store::open_with_config(dir.path(), config).unwrap();
    store.create_project(&alice(), P, ProjectInit::default()).unwrap();
    (dir, store)
}

fn write(store: &Store, branch: &str, path: &str, body: &str) -> Commit {
    store
        .put_file(&alice(), P, branch, path, body, &format!("write {path}"))
        .unwrap()
        .1
}

fn read(store: &Store, branch: &str, path: &str) -> GroveResult<String> {
    store.get_content(&alice(), P, branch, path).map(|f| f.content)
}

fn default_count(store: &Store) -> usize {
    store
        .list_branches(&alice(), P)
        .unwrap()
        .iter()
        .filter(|b| b.is_default)
        .count()
}

fn history(store: &Store, branch: &str) -> Vec<Commit> {
    store
        .history(&alice(), P, branch, &HistoryFilter::default(), 1, Some(100))
        .unwrap()
        .commits
}

// ---------------------------------------------------------------------
// Store and project lifecycle
// ---------------------------------------------------------------------

#[test]
fn test_init_twice_fails() {
    let dir = tempdir().unwrap();
    Store::init(dir.path()).unwrap();
    assert_eq!(Store::init(dir.path()).unwrap_err().kind(), ErrorKind::Conflict);
}

#[test]
fn test_open_missing_store_fails() {
    let dir = tempdir().unwrap();
    assert_eq!(Store::open(dir.path()).unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_store_debug_shows_location() {
    let (dir, store) = setup();
    let shown = format!("{store:?}");
    assert!(shown.starts_with("Store {"));
    assert!(shown.contains(&dir.path().join(".grove").display().to_string()));
}

#[test]
fn test_create_project_bootstraps_main() {
    let (_dir, store) = setup();
    let branches = store.list_branches(&alice(), P).unwrap();
    assert_eq!(branches.len(), 1);
    assert_eq!(branches[0].name, MAIN_BRANCH);
    assert!(branches[0].is_default);
    assert!(branches[0].is_protected);
    assert_eq!(store.get_tree(&alice(), P, MAIN_BRANCH, "/").unwrap(), Vec::new());

    let project = store.get_project(&alice(), P).unwrap();
    assert_eq!(project.owner, "alice");
    assert_eq!(project.ledger_head, 0);

    let again = store.create_project(&alice(), P, ProjectInit::default());
    assert_eq!(again.unwrap_err().kind(), ErrorKind::Conflict);
}

#[test]
fn test_create_project_with_readme() {
    let (_dir, store) = setup();
    store
        .create_project(&alice(), "seeded", ProjectInit { readme: true })
        .unwrap();

    let file = store.get_content(&alice(), "seeded", MAIN_BRANCH, "/README.md").unwrap();
    assert_eq!(file.content, "# seeded\n");
    assert_eq!(file.record.language.as_deref(), Some("Markdown"));

    let log = store
        .history(&alice(), "seeded", MAIN_BRANCH, &HistoryFilter::default(), 1, None)
        .unwrap();
    assert_eq!(log.total, 1);
    assert_eq!(log.commits[0].message, "Initial commit");
    assert_eq!(log.commits[0].changes[0].action, ChangeAction::Added);
    assert_eq!(file.record.last_commit.as_ref(), Some(&log.commits[0].hash));
}

#[test]
fn test_anonymous_cannot_create_project() {
    let (_dir, store) = setup();
    let err = store
        .create_project(&Principal::Anonymous, "anon", ProjectInit::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}

#[test]
fn test_list_and_delete_projects() {
    let (dir, store) = setup();
    store.create_project(&alice(), "other", ProjectInit::default()).unwrap();
    let ids: Vec<String> = store.list_projects().unwrap().into_iter().map(|p| p.id).collect();
    assert_eq!(ids, vec!["demo".to_string(), "other".to_string()]);

    write(&store, MAIN_BRANCH, "/a.txt", "x");
    store.delete_project(&alice(), P).unwrap();
    assert!(!dir.path().join(".grove/projects/demo").exists());
    assert_eq!(store.get_project(&alice(), P).unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(store.list_projects().unwrap().len(), 1);
}

#[test]
fn test_recreate_after_delete_starts_empty() {
    let (_dir, store) = setup();
    write(&store, MAIN_BRANCH, "/a.txt", "x");
    store.delete_project(&alice(), P).unwrap();

    store.create_project(&alice(), P, ProjectInit::default()).unwrap();
    assert!(history(&store, MAIN_BRANCH).is_empty());
    assert_eq!(read(&store, MAIN_BRANCH, "/a.txt").unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_create_waiting_on_deleted_project_recreates_it() {
    let (_dir, store) = setup();
    let store = Arc::new(store);
    write(&store, MAIN_BRANCH, "/a.txt", "x");

    // Hold the lock the way delete_project does, and remove the tree under it.
    let guard = store.lock(P).unwrap();
    let barrier = Arc::new(Barrier::new(2));
    let creator = {
        let store = Arc::clone(&store);
        let barrier = Arc::clone(&barrier);
        thread::spawn(move || {
            barrier.wait();
            store.create_project(&alice(), P, ProjectInit::default())
        })
    };
    barrier.wait();
    thread::sleep(Duration::from_millis(50));
    fs::remove_dir_all(store.project_dir(P)).unwrap();
    drop(guard);

    let project = creator.join().unwrap().unwrap();
    assert_eq!(project.id, P);
    assert!(store.project_dir(P).join("project.lock").exists());
    assert!(history(&store, MAIN_BRANCH).is_empty());
    assert_eq!(store.list_branches(&alice(), P).unwrap().len(), 1);
}

// ---------------------------------------------------------------------
// File store
// ---------------------------------------------------------------------

#[test]
fn test_write_then_read() {
    let (_dir, store) = setup();
    let (file, commit) = store
        .put_file(&alice(), P, MAIN_BRANCH, "/src/lib.rs", "A", "add lib")
        .unwrap();
    assert_eq!(file.content, "A");
    assert_eq!(file.record.size, 1);
    assert_eq!(file.record.path, "/src");
    assert_eq!(file.record.last_commit, Some(commit.hash.clone()));
    assert_eq!(read(&store, MAIN_BRANCH, "/src/lib.rs").unwrap(), "A");
    assert_eq!(commit.author, "alice");
    assert_eq!(commit.branch, MAIN_BRANCH);
    assert!(commit.parent_commits.is_empty());
}

#[test]
fn test_write_write_delete_history() {
    let (_dir, store) = setup();
    let c1 = write(&store, MAIN_BRANCH, "/notes.txt", "A");
    let c2 = write(&store, MAIN_BRANCH, "/notes.txt", "B");
    let c3 = store
        .remove_file(&alice(), P, MAIN_BRANCH, "/notes.txt", "drop notes")
        .unwrap();

    let tree = store.get_tree(&alice(), P, MAIN_BRANCH, "/").unwrap();
    assert!(tree.iter().all(|e| e.name != "notes.txt"));
    assert_eq!(
        read(&store, MAIN_BRANCH, "/notes.txt").unwrap_err().kind(),
        ErrorKind::NotFound
    );

    let log = history(&store, MAIN_BRANCH);
    let actions: Vec<ChangeAction> = log.iter().rev().map(|c| c.changes[0].action).collect();
    assert_eq!(
        actions,
        vec![ChangeAction::Added, ChangeAction::Modified, ChangeAction::Deleted]
    );
    assert_eq!(log[0].hash, c3.hash);
    assert_eq!(c2.parent_commits, vec![c1.hash.clone()]);
    assert_eq!(c3.parent_commits, vec![c2.hash.clone()]);

    // The tombstone keeps the record and its last body.
    let files = store.load_files(P).unwrap();
    let record = files.get(MAIN_BRANCH, &FilePath::parse("/notes.txt").unwrap()).unwrap();
    assert!(record.is_deleted);
    assert_eq!(store.blobs(P).get(&record.blob).unwrap(), "B");
}

#[test]
fn test_delete_missing_file_is_invalid() {
    let (_dir, store) = setup();
    let err = store
        .remove_file(&alice(), P, MAIN_BRANCH, "/nope.txt", "rm")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);

    write(&store, MAIN_BRANCH, "/once.txt", "x");
    store.remove_file(&alice(), P, MAIN_BRANCH, "/once.txt", "rm").unwrap();
    let again = store.remove_file(&alice(), P, MAIN_BRANCH, "/once.txt", "rm");
    assert_eq!(again.unwrap_err().kind(), ErrorKind::InvalidOperation);
}

#[test]
fn test_rewrite_after_delete_is_added() {
    let (_dir, store) = setup();
    write(&store, MAIN_BRANCH, "/a.txt", "one");
    store.remove_file(&alice(), P, MAIN_BRANCH, "/a.txt", "rm").unwrap();
    let c = write(&store, MAIN_BRANCH, "/a.txt", "two");
    assert_eq!(c.changes[0].action, ChangeAction::Added);
    assert_eq!(read(&store, MAIN_BRANCH, "/a.txt").unwrap(), "two");
    assert_eq!(store.load_files(P).unwrap().record_count(MAIN_BRANCH), 1);
}

#[test]
fn test_empty_message_rejected() {
    let (_dir, store) = setup();
    let err = store
        .put_file(&alice(), P, MAIN_BRANCH, "/a.txt", "x", "  ")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(store.get_project(&alice(), P).unwrap().ledger_head, 0);
}

#[test]
fn test_tree_listing() {
    let (_dir, store) = setup();
    write(&store, MAIN_BRANCH, "/src/main.rs", "fn main() {}");
    write(&store, MAIN_BRANCH, "/README.md", "hi");
    write(&store, MAIN_BRANCH, "/docs/guide/intro.md", "intro");

    let root = store.get_tree(&alice(), P, MAIN_BRANCH, "").unwrap();
    let listed: Vec<(EntryKind, &str)> = root.iter().map(|e| (e.kind, e.name.as_str())).collect();
    assert_eq!(
        listed,
        vec![
            (EntryKind::Directory, "docs"),
            (EntryKind::Directory, "src"),
            (EntryKind::File, "README.md"),
        ]
    );

    let src = store.get_tree(&alice(), P, MAIN_BRANCH, "/src").unwrap();
    assert_eq!(src[0].language.as_deref(), Some("Rust"));
    assert_eq!(src[0].size, Some(12));

    let missing = store.get_tree(&alice(), P, MAIN_BRANCH, "/nowhere");
    assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);
    let no_branch = store.get_tree(&alice(), P, "ghost", "/");
    assert_eq!(no_branch.unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_bad_paths_rejected() {
    let (_dir, store) = setup();
    for bad in ["/", "/a/../b.txt", "/a\\b"] {
        let err = store.put_file(&alice(), P, MAIN_BRANCH, bad, "x", "m").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput, "path {bad:?}");
    }
}

#[test]
fn test_search_files() {
    let (_dir, store) = setup();
    write(&store, MAIN_BRANCH, "/src/Parser.rs", "fn parse() {}");
    write(&store, MAIN_BRANCH, "/docs/notes.md", "the PARSER is fast");
    write(&store, MAIN_BRANCH, "/other.txt", "unrelated");
    write(&store, MAIN_BRANCH, "/old_parser.txt", "gone soon");
    store
        .remove_file(&alice(), P, MAIN_BRANCH, "/old_parser.txt", "rm")
        .unwrap();

    let hits: Vec<String> = store
        .search_files(&alice(), P, MAIN_BRANCH, "parser")
        .unwrap()
        .into_iter()
        .map(|f| f.record.full_path())
        .collect();
    assert_eq!(hits, vec!["/docs/notes.md".to_string(), "/src/Parser.rs".to_string()]);

    let empty = store.search_files(&alice(), P, MAIN_BRANCH, " ");
    assert_eq!(empty.unwrap_err().kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_search_is_bounded() {
    let config = Config {
        search_limit: 3,
        ..Config::default()
    };
    let (_dir, store) = setup_with(config);
    for i in 0..6 {
        write(&store, MAIN_BRANCH, &format!("/f{i}.txt"), "needle");
    }
    let hits = store.search_files(&alice(), P, MAIN_BRANCH, "NEEDLE").unwrap();
    assert_eq!(hits.len(), 3);
}

#[test]
fn test_move_file() {
    let (_dir, store) = setup();
    write(&store, MAIN_BRANCH, "/a.txt", "line\n");
    let id = store.get_content(&alice(), P, MAIN_BRANCH, "/a.txt").unwrap().record.id;

    let (file, commit) = store
        .move_file(&alice(), P, MAIN_BRANCH, "/a.txt", "/docs/a.md", "move a")
        .unwrap();
    assert_eq!(file.record.id, id);
    assert_eq!(file.content, "line\n");
    assert_eq!(file.record.language.as_deref(), Some("Markdown"));

    let change = &commit.changes[0];
    assert_eq!(change.action, ChangeAction::Renamed);
    assert_eq!(change.file_path, "/docs/a.md");
    assert_eq!(change.old_path.as_deref(), Some("/a.txt"));
    assert_eq!((change.lines_added, change.lines_deleted), (0, 0));

    assert_eq!(read(&store, MAIN_BRANCH, "/a.txt").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(read(&store, MAIN_BRANCH, "/docs/a.md").unwrap(), "line\n");

    let diffs = store.diff_commit(&alice(), P, commit.short_hash()).unwrap();
    assert!(diffs[0].hunks.is_empty());
    assert_eq!(diffs[0].old_path.as_deref(), Some("/a.txt"));
}

#[test]
fn test_move_file_errors() {
    let (_dir, store) = setup();
    write(&store, MAIN_BRANCH, "/a.txt", "a");
    write(&store, MAIN_BRANCH, "/b.txt", "b");

    let taken = store.move_file(&alice(), P, MAIN_BRANCH, "/a.txt", "/b.txt", "mv");
    assert_eq!(taken.unwrap_err().kind(), ErrorKind::Conflict);
    let missing = store.move_file(&alice(), P, MAIN_BRANCH, "/zz.txt", "/c.txt", "mv");
    assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);
    let same = store.move_file(&alice(), P, MAIN_BRANCH, "/a.txt", "//a.txt", "mv");
    assert_eq!(same.unwrap_err().kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_commit_not_recorded_keeps_file_change() {
    let (dir, store) = setup();
    let commits = dir.path().join(".grove/projects/demo/commits");
    fs::remove_dir_all(&commits).unwrap();
    fs::write(&commits, "not a directory").unwrap();

    let err = store
        .put_file(&alice(), P, MAIN_BRANCH, "/a.txt", "kept", "add")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CommitNotRecorded);
    assert!(!err.is_retryable());
    assert_eq!(read(&store, MAIN_BRANCH, "/a.txt").unwrap(), "kept");
}

#[test]
fn test_lock_timeout_is_retryable() {
    let config = Config {
        lock_timeout_ms: 30,
        ..Config::default()
    };
    let (dir, store) = setup_with(config);
    let held = ProjectLock::acquire(
        &dir.path().join(".grove/projects/demo"),
        Duration::from_secs(1),
    )
    .unwrap();

    let err = store
        .put_file(&alice(), P, MAIN_BRANCH, "/a.txt", "x", "add")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::StoreUnavailable);
    assert!(err.is_retryable());

    drop(held);
    write(&store, MAIN_BRANCH, "/a.txt", "x");
}

// ---------------------------------------------------------------------
// Ledger
// ---------------------------------------------------------------------

#[test]
fn test_line_stats_from_real_diff() {
    let (_dir, store) = setup();
    write(&store, MAIN_BRANCH, "/a.txt", "one\ntwo\nthree\n");
    let c = write(&store, MAIN_BRANCH, "/a.txt", "one\n2\nthree\nfour\n");
    let change = &c.changes[0];
    assert_eq!((change.lines_added, change.lines_deleted), (2, 1));
    assert!(!change.approximate);
    assert_eq!(
        c.stats,
        CommitStats {
            files_changed: 1,
            total_lines_added: 2,
            total_lines_deleted: 1,
        }
    );

    let rm = store.remove_file(&alice(), P, MAIN_BRANCH, "/a.txt", "rm").unwrap();
    assert_eq!(rm.changes[0].lines_deleted, 4);
}

#[test]
fn test_large_bodies_fall_back_to_line_count() {
    let config = Config {
        max_diff_lines: 2,
        ..Config::default()
    };
    let (_dir, store) = setup_with(config);
    write(&store, MAIN_BRANCH, "/a.txt", "a\nb\nc\n");
    let c = write(&store, MAIN_BRANCH, "/a.txt", "x\ny\nz\nw\n");
    let change = &c.changes[0];
    assert!(change.approximate);
    assert_eq!((change.lines_added, change.lines_deleted), (1, 0));
}

#[test]
fn test_commit_hashes_unique() {
    let (_dir, store) = setup();
    let hashes: HashSet<CommitHash> = (0..20)
        .map(|i| write(&store, MAIN_BRANCH, "/same.txt", &i.to_string()).hash)
        .collect();
    assert_eq!(hashes.len(), 20);

    let seqs: Vec<u64> = history(&store, MAIN_BRANCH).iter().rev().map(|c| c.seq).collect();
    assert_eq!(seqs, (1..=20).collect::<Vec<u64>>());
}

#[test]
fn test_find_commit_by_prefix() {
    let (_dir, store) = setup();
    let c = write(&store, MAIN_BRANCH, "/a.txt", "x");

    let found = store.find_commit(&alice(), P, c.short_hash()).unwrap();
    assert_eq!(found.hash, c.hash);
    let upper = c.short_hash().to_ascii_uppercase();
    assert_eq!(store.find_commit(&alice(), P, &upper).unwrap().hash, c.hash);

    let empty = store.find_commit(&alice(), P, "");
    assert_eq!(empty.unwrap_err().kind(), ErrorKind::InvalidInput);
    let none = store.find_commit(&alice(), P, "zzzzzzz");
    assert_eq!(none.unwrap_err().kind(), ErrorKind::NotFound);
}

#[test]
fn test_ambiguous_prefix() {
    let (_dir, store) = setup();
    for (seq, tail) in [(1u64, '0'), (2, '1')] {
        let hash = CommitHash::from(format!("abc{}", tail.to_string().repeat(61)));
        let commit = Commit {
            hash,
            seq,
            message: "crafted".into(),
            author: "alice".into(),
            branch: MAIN_BRANCH.into(),
            parent_commits: Vec::new(),
            changes: Vec::new(),
            stats: CommitStats::default(),
            created_at: Utc::now(),
        };
        store.save_commit(P, &commit).unwrap();
    }

    match store.find_commit(&alice(), P, "ABC") {
        Err(GroveError::Ambiguous { count, .. }) => assert_eq!(count, 2),
        other => panic!("expected Ambiguous, got {other:?}"),
    }
    assert!(store.find_commit(&alice(), P, "abc1").is_ok());
}

#[test]
fn test_history_page_far_past_end_is_empty() {
    let (_dir, store) = setup();
    write(&store, MAIN_BRANCH, "/a.txt", "a");
    let page = store
        .history(&alice(), P, MAIN_BRANCH, &HistoryFilter::default(), usize::MAX, Some(20))
        .unwrap();
    assert!(page.commits.is_empty());
    assert_eq!(page.total, 1);
    assert!(!page.has_next);
}

#[test]
fn test_history_filter_and_pages() {
    let (_dir, store) = setup();
    let bob = Principal::user("bob");
    for i in 0..5 {
        write(&store, MAIN_BRANCH, "/a.txt", &i.to_string());
    }
    store.put_file(&bob, P, MAIN_BRANCH, "/b.txt", "b", "bob was here").unwrap();

    let page = store
        .history(&alice(), P, MAIN_BRANCH, &HistoryFilter::default(), 2, Some(4))
        .unwrap();
    assert_eq!(page.total, 6);
    assert_eq!(page.total_pages, 2);
    assert_eq!(page.commits.len(), 2);
    assert!(!page.has_next);
    // Newest first: page 2 holds the two oldest.
    assert_eq!(page.commits[1].seq, 1);

    let by_bob = HistoryFilter {
        author: Some("bob".into()),
        ..Default::default()
    };
    let page = store.history(&alice(), P, MAIN_BRANCH, &by_bob, 1, None).unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.commits[0].title(), "bob was here");

    let future = HistoryFilter {
        since: Some(Utc::now() + chrono::Duration::hours(1)),
        ..Default::default()
    };
    assert_eq!(store.history(&alice(), P, MAIN_BRANCH, &future, 1, None).unwrap().total, 0);
}

#[test]
fn test_diff_commit_uses_recorded_bodies() {
    let (_dir, store) = setup();
    let added = write(&store, MAIN_BRANCH, "/a.txt", "a\nb\n");
    let modified = write(&store, MAIN_BRANCH, "/a.txt", "a\nc\n");
    // Later writes must not affect the earlier diff.
    write(&store, MAIN_BRANCH, "/a.txt", "something else\n");
    let deleted = store.remove_file(&alice(), P, MAIN_BRANCH, "/a.txt", "rm").unwrap();

    let d = &store.diff_commit(&alice(), P, modified.hash.as_str()).unwrap()[0];
    assert_eq!(d.action, ChangeAction::Modified);
    assert_eq!(d.before_content.as_deref(), Some("a\nb\n"));
    assert_eq!(d.after_content.as_deref(), Some("a\nc\n"));
    assert_eq!((d.additions, d.deletions), (1, 1));
    assert_eq!(d.hunks.len(), 1);

    let d = &store.diff_commit(&alice(), P, added.short_hash()).unwrap()[0];
    assert_eq!(d.before_content, None);
    assert_eq!(d.additions, 2);

    let d = &store.diff_commit(&alice(), P, deleted.short_hash()).unwrap()[0];
    assert_eq!(d.before_content.as_deref(), Some("something else\n"));
    assert_eq!(d.after_content, None);
    assert_eq!(d.deletions, 1);
}

#[test]
fn test_compare_time_range() {
    let (_dir, store) = setup();
    let mut commits = Vec::new();
    for i in 0..4 {
        commits.push(write(&store, MAIN_BRANCH, &format!("/f{i}.txt"), "one\ntwo\n"));
        thread::sleep(Duration::from_millis(5));
    }

    let cmp = store
        .compare(&alice(), P, commits[0].short_hash(), commits[3].short_hash())
        .unwrap();
    let between: Vec<&CommitHash> = cmp.commits.iter().map(|c| &c.hash).collect();
    assert_eq!(between, vec![&commits[1].hash, &commits[2].hash]);
    assert_eq!(cmp.stats.total_commits, 2);
    assert_eq!(cmp.stats.files_changed, 2);
    assert_eq!(cmp.stats.total_lines_added, 4);

    let reversed = store
        .compare(&alice(), P, commits[3].short_hash(), commits[0].short_hash())
        .unwrap();
    assert!(reversed.commits.is_empty());
}

// ---------------------------------------------------------------------
// Branches
// ---------------------------------------------------------------------

#[test]
fn test_exactly_one_default_through_branch_ops() {
    let (_dir, store) = setup();
    assert_eq!(default_count(&store), 1);

    store.fork_branch(&alice(), P, "feature", MAIN_BRANCH).unwrap();
    assert_eq!(default_count(&store), 1);

    store.set_default_branch(&alice(), P, "feature").unwrap();
    assert_eq!(default_count(&store), 1);
    assert!(store.get_branch(&alice(), P, "feature").unwrap().is_default);
    assert!(!store.get_branch(&alice(), P, MAIN_BRANCH).unwrap().is_default);

    store.protect_branch(&alice(), P, MAIN_BRANCH, false).unwrap();
    store.delete_branch(&alice(), P, MAIN_BRANCH, None).unwrap();
    assert_eq!(default_count(&store), 1);

    let missing = store.set_default_branch(&alice(), P, "ghost");
    assert_eq!(missing.unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(default_count(&store), 1);
}

#[test]
fn test_default_listed_first() {
    let (_dir, store) = setup();
    store.fork_branch(&alice(), P, "aaa", MAIN_BRANCH).unwrap();
    let names: Vec<String> = store
        .list_branches(&alice(), P)
        .unwrap()
        .into_iter()
        .map(|b| b.name)
        .collect();
    assert_eq!(names, vec![MAIN_BRANCH.to_string(), "aaa".to_string()]);
}

#[test]
fn test_fork_isolation() {
    let (_dir, store) = setup();
    write(&store, MAIN_BRANCH, "/shared.txt", "base");
    write(&store, MAIN_BRANCH, "/gone.txt", "x");
    store.remove_file(&alice(), P, MAIN_BRANCH, "/gone.txt", "rm").unwrap();

    let feature = store.fork_branch(&alice(), P, "feature", MAIN_BRANCH).unwrap();
    assert_eq!(feature.parent_branch.as_deref(), Some(MAIN_BRANCH));

    let copy = store.get_content(&alice(), P, "feature", "/shared.txt").unwrap();
    let orig = store.get_content(&alice(), P, MAIN_BRANCH, "/shared.txt").unwrap();
    assert_ne!(copy.record.id, orig.record.id);
    assert!(copy.record.last_commit.is_none());
    assert_eq!(read(&store, "feature", "/gone.txt").unwrap_err().kind(), ErrorKind::NotFound);

    write(&store, MAIN_BRANCH, "/shared.txt", "main edit");
    write(&store, "feature", "/shared.txt", "feature edit");
    write(&store, "feature", "/only-feature.txt", "f");

    assert_eq!(read(&store, MAIN_BRANCH, "/shared.txt").unwrap(), "main edit");
    assert_eq!(read(&store, "feature", "/shared.txt").unwrap(), "feature edit");
    assert!(read(&store, MAIN_BRANCH, "/only-feature.txt").is_err());
}

#[test]
fn test_fork_errors() {
    let (_dir, store) = setup();
    store.fork_branch(&alice(), P, "feature", MAIN_BRANCH).unwrap();

    let dup = store.fork_branch(&alice(), P, "feature", MAIN_BRANCH);
    assert_eq!(dup.unwrap_err().kind(), ErrorKind::Conflict);
    let no_source = store.fork_branch(&alice(), P, "x", "ghost");
    assert_eq!(no_source.unwrap_err().kind(), ErrorKind::NotFound);
    let bad_name = store.fork_branch(&alice(), P, "has space", MAIN_BRANCH);
    assert_eq!(bad_name.unwrap_err().kind(), ErrorKind::InvalidInput);
}

#[test]
fn test_divergence_after_fork() {
    let (_dir, store) = setup();
    write(&store, MAIN_BRANCH, "/README.md", "hello\nworld");
    store.fork_branch(&alice(), P, "feature", MAIN_BRANCH).unwrap();
    write(&store, "feature", "/README.md", "hello\nworld\nmore");

    assert_eq!(
        store.divergence(&alice(), P, "feature", MAIN_BRANCH).unwrap(),
        Divergence { ahead: 1, behind: 0 }
    );
    assert_eq!(
        store.divergence(&alice(), P, MAIN_BRANCH, "feature").unwrap(),
        Divergence { ahead: 0, behind: 1 }
    );
    assert_eq!(read(&store, MAIN_BRANCH, "/README.md").unwrap(), "hello\nworld");

    let feature = store.get_branch(&alice(), P, "feature").unwrap();
    assert_eq!(feature.stats.total_commits, 2);
    assert_eq!(feature.stats.commits_ahead, 1);
    assert_eq!(feature.stats.commits_behind, 0);
    assert_eq!(history(&store, "feature").len(), 2);
}

#[test]
fn test_fork_head_is_parent_of_first_commit() {
    let (_dir, store) = setup();
    let base = write(&store, MAIN_BRANCH, "/a.txt", "a");
    let feature = store.fork_branch(&alice(), P, "feature", MAIN_BRANCH).unwrap();
    assert_eq!(feature.head, Some(base.hash.clone()));
    let c = write(&store, "feature", "/a.txt", "b");
    assert_eq!(c.parent_commits, vec![base.hash]);
}

#[test]
fn test_delete_default_or_protected_fails() {
    let (_dir, store) = setup();
    let err = store.delete_branch(&alice(), P, MAIN_BRANCH, None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);

    store.fork_branch(&alice(), P, "release", MAIN_BRANCH).unwrap();
    store.protect_branch(&alice(), P, "release", true).unwrap();
    let err = store.delete_branch(&alice(), P, "release", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);

    store.fork_branch(&alice(), P, "wip", MAIN_BRANCH).unwrap();
    let err = store.delete_branch(&alice(), P, "wip", Some("wip")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidOperation);
    store.delete_branch(&alice(), P, "wip", Some(MAIN_BRANCH)).unwrap();

    let err = store.delete_branch(&alice(), P, "wip", None).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_delete_branch_retains_files_by_default() {
    let (_dir, store) = setup();
    write(&store, MAIN_BRANCH, "/a.txt", "a");
    store.fork_branch(&alice(), P, "tmp", MAIN_BRANCH).unwrap();
    let c = write(&store, "tmp", "/b.txt", "b");
    store.delete_branch(&alice(), P, "tmp", None).unwrap();

    assert_eq!(store.load_files(P).unwrap().record_count("tmp"), 2);
    assert_eq!(store.find_commit(&alice(), P, c.short_hash()).unwrap().branch, "tmp");
    assert_eq!(store.get_tree(&alice(), P, "tmp", "/").unwrap_err().kind(), ErrorKind::NotFound);

    // Re-forking the name replaces the orphans and ignores the old commits.
    store.fork_branch(&alice(), P, "tmp", MAIN_BRANCH).unwrap();
    assert_eq!(read(&store, "tmp", "/b.txt").unwrap_err().kind(), ErrorKind::NotFound);
    assert_eq!(store.get_branch(&alice(), P, "tmp").unwrap().stats.total_commits, 1);
}

#[test]
fn test_delete_branch_purges_files_when_configured() {
    let config = Config {
        on_branch_delete: OnBranchDelete::Purge,
        ..Config::default()
    };
    let (_dir, store) = setup_with(config);
    write(&store, MAIN_BRANCH, "/a.txt", "a");
    store.fork_branch(&alice(), P, "tmp", MAIN_BRANCH).unwrap();
    store.delete_branch(&alice(), P, "tmp", None).unwrap();
    assert_eq!(store.load_files(P).unwrap().record_count("tmp"), 0);
    assert_eq!(store.load_files(P).unwrap().record_count(MAIN_BRANCH), 1);
}

#[test]
fn test_update_branch() {
    let (_dir, store) = setup();
    store.fork_branch(&alice(), P, "feature", MAIN_BRANCH).unwrap();
    let settings = MergeSettings {
        require_pull_request: true,
        required_approvals: 2,
        ..Default::default()
    };
    let b = store
        .update_branch(
            &alice(),
            P,
            "feature",
            BranchUpdate {
                description: Some(Some("login work".into())),
                merge_settings: Some(settings.clone()),
            },
        )
        .unwrap();
    assert_eq!(b.description.as_deref(), Some("login work"));
    assert_eq!(b.merge_settings, settings);

    let cleared = store
        .update_branch(
            &alice(),
            P,
            "feature",
            BranchUpdate {
                description: Some(None),
                merge_settings: None,
            },
        )
        .unwrap();
    assert!(cleared.description.is_none());
    assert_eq!(cleared.merge_settings, settings);
}

#[test]
fn test_stats_refresh_when_auto_refresh_off() {
    let config = Config {
        auto_refresh_stats: false,
        ..Config::default()
    };
    let (_dir, store) = setup_with(config);
    write(&store, MAIN_BRANCH, "/a.txt", "a");
    write(&store, MAIN_BRANCH, "/a.txt", "b");
    assert_eq!(store.get_branch(&alice(), P, MAIN_BRANCH).unwrap().stats.total_commits, 0);

    let b = store.refresh_stats(&alice(), P, MAIN_BRANCH).unwrap();
    assert_eq!(b.stats.total_commits, 2);
    assert!(b.stats.last_activity.is_some());
    assert_eq!(store.get_branch(&alice(), P, MAIN_BRANCH).unwrap().stats, b.stats);
}

// ---------------------------------------------------------------------
// Sequences, reactions and access control
// ---------------------------------------------------------------------

#[test]
fn test_sequence_numbers_unique_under_concurrency() {
    let (_dir, store) = setup();
    let store = Arc::new(store);
    let threads = 8;
    let per_thread = 10;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|_| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                (0..per_thread)
                    .map(|_| {
                        store
                            .next_sequence_number(&alice(), P, SequenceKind::Issue)
                            .unwrap()
                    })
                    .collect::<Vec<u64>>()
            })
        })
        .collect();

    let mut all: Vec<u64> = handles.into_iter().flat_map(|h| h.join().unwrap()).collect();
    all.sort_unstable();
    assert_eq!(all, (1..=(threads * per_thread) as u64).collect::<Vec<_>>());

    let pr = store
        .next_sequence_number(&alice(), P, SequenceKind::PullRequest)
        .unwrap();
    assert_eq!(pr, 1);
}

#[test]
fn test_concurrent_writes_to_one_path_are_serialized() {
    let (_dir, store) = setup();
    let store = Arc::new(store);
    let threads = 8;
    let barrier = Arc::new(Barrier::new(threads));

    let handles: Vec<_> = (0..threads)
        .map(|i| {
            let store = Arc::clone(&store);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                store
                    .put_file(&alice(), P, MAIN_BRANCH, "/shared.txt", &format!("v{i}\n"), "race")
                    .unwrap()
                    .1
            })
        })
        .collect();
    let written: Vec<Commit> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    let added = written
        .iter()
        .filter(|c| c.changes[0].action == ChangeAction::Added)
        .count();
    assert_eq!(added, 1);

    let log = history(&store, MAIN_BRANCH);
    assert_eq!(log.len(), threads);
    let seqs: HashSet<u64> = log.iter().map(|c| c.seq).collect();
    assert_eq!(seqs.len(), threads);

    // Each commit's parent is the one recorded just before it.
    for pair in log.windows(2) {
        assert_eq!(pair[0].parent_commits, vec![pair[1].hash.clone()]);
    }
    // The surviving body is the newest commit's.
    let body = read(&store, MAIN_BRANCH, "/shared.txt").unwrap();
    let newest = store.diff_commit(&alice(), P, log[0].hash.as_str()).unwrap();
    assert_eq!(newest[0].after_content.as_deref(), Some(body.as_str()));

    let branch = store.get_branch(&alice(), P, MAIN_BRANCH).unwrap();
    assert_eq!(branch.stats.total_commits, threads as u64);
}

#[test]
fn test_reactions_toggle() {
    let (_dir, store) = setup();
    let c = write(&store, MAIN_BRANCH, "/a.txt", "a");
    let bob = Principal::user("bob");

    store.toggle_reaction(&alice(), P, c.short_hash(), Reaction::Rocket).unwrap();
    let r = store.toggle_reaction(&bob, P, c.short_hash(), Reaction::Rocket).unwrap();
    assert_eq!(r.count(Reaction::Rocket), 2);

    store.toggle_reaction(&alice(), P, c.short_hash(), Reaction::Rocket).unwrap();
    let r = store.reactions(&alice(), P, c.short_hash()).unwrap();
    assert_eq!(r.users(Reaction::Rocket).collect::<Vec<_>>(), vec!["bob"]);

    let anon = store.toggle_reaction(&Principal::Anonymous, P, c.short_hash(), Reaction::Eyes);
    assert_eq!(anon.unwrap_err().kind(), ErrorKind::PermissionDenied);
    // The commit document itself is untouched.
    assert_eq!(store.find_commit(&alice(), P, c.short_hash()).unwrap(), c);
}

#[test]
fn test_static_acl_roles() {
    let dir = tempdir().unwrap();
    Store::init(dir.path()).unwrap();
    let acl = Arc::new(StaticAcl::new());
    let store = Store::open(dir.path())
        .unwrap()
        .with_authorizer(acl.clone());
    let bob = Principal::user("bob");

    // The owner is admin without an explicit grant.
    store.create_project(&alice(), P, ProjectInit { readme: true }).unwrap();
    store.fork_branch(&alice(), P, "feature", MAIN_BRANCH).unwrap();

    let denied = store.get_content(&bob, P, MAIN_BRANCH, "/README.md");
    assert_eq!(denied.unwrap_err().kind(), ErrorKind::PermissionDenied);

    acl.grant("bob", P, Role::Viewer);
    assert!(store.get_content(&bob, P, MAIN_BRANCH, "/README.md").is_ok());
    let write_denied = store.put_file(&bob, P, MAIN_BRANCH, "/x.txt", "x", "m");
    assert_eq!(write_denied.unwrap_err().kind(), ErrorKind::PermissionDenied);

    acl.grant("bob", P, Role::Editor);
    store.put_file(&bob, P, "feature", "/x.txt", "x", "m").unwrap();
    let admin_only = store.delete_branch(&bob, P, "feature", None);
    assert_eq!(admin_only.unwrap_err().kind(), ErrorKind::PermissionDenied);
    let admin_only = store.set_default_branch(&bob, P, "feature");
    assert_eq!(admin_only.unwrap_err().kind(), ErrorKind::PermissionDenied);

    acl.grant("bob", P, Role::Admin);
    store.delete_branch(&bob, P, "feature", None).unwrap();
}

#[test]
fn test_anonymous_reads_public_but_never_writes() {
    let dir = tempdir().unwrap();
    Store::init(dir.path()).unwrap();
    let acl = Arc::new(StaticAcl::new());
    let store = Store::open(dir.path())
        .unwrap()
        .with_authorizer(acl.clone());
    store.create_project(&alice(), P, ProjectInit { readme: true }).unwrap();

    let anon = Principal::Anonymous;
    let err = store.get_tree(&anon, P, MAIN_BRANCH, "/").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    acl.make_public(P);
    assert_eq!(store.get_tree(&anon, P, MAIN_BRANCH, "/").unwrap().len(), 1);
    let err = store
        .put_file(&anon, P, MAIN_BRANCH, "/x.txt", "x", "m")
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    // Even an authorizer that allows everything cannot give anonymous an author.
    let open = Store::open(dir.path()).unwrap();
    let err = open.put_file(&anon, P, MAIN_BRANCH, "/x.txt", "x", "m").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);
}
