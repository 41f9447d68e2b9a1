use super::*;
use crate::config::BackendSpec;
use crate::driver::MemoryDriver;
use crate::error::AppError;

fn unversioned() -> Repository {
    Repository::with_drivers("plain", RepoKind::Rep, Arc::new(MemoryDriver::new("plain")), None, None).unwrap()
}

fn versioned() -> Repository {
    Repository::with_drivers("hist", RepoKind::Nrep, Arc::new(MemoryDriver::new("hist")), None, None).unwrap()
}

#[test]
fn versions_start_at_one_and_increase() {
    for repo in [unversioned(), versioned()] {
        let m1 = repo.add_document("a/b", "v1", "alice", "first", false).unwrap();
        let m2 = repo.add_document("a/b", "v2", "bob", "second", false).unwrap();
        assert_eq!(m1.metadata.version, 1);
        assert_eq!(m2.metadata.version, 2);
        assert_eq!(repo.get_document("a/b").unwrap().as_deref(), Some("v2"));
        let meta = repo.get_meta("a/b").unwrap().unwrap();
        assert_eq!(meta.user, "bob");
        assert_eq!(meta.comment, "second");
        assert!(meta.timestamp > 0);
    }
}

#[test]
fn versioned_snapshots_are_addressable() {
    let repo = versioned();
    for i in 1..=3 {
        repo.add_document("doc", &format!("content {}", i), "u", "c", false).unwrap();
    }
    for n in 1..=3u64 {
        assert_eq!(repo.get_document(&format!("doc@{}", n)).unwrap(), Some(format!("content {}", n)));
        assert_eq!(repo.get_meta(&format!("doc@{}", n)).unwrap().unwrap().version, n);
    }
    assert_eq!(repo.get_document("doc@4").unwrap(), None);
    // snapshots do not show up as documents
    assert_eq!(repo.get_children("").unwrap(), vec![FolderInfo::leaf("doc")]);
}

#[test]
fn unversioned_only_serves_latest_version() {
    let repo = unversioned();
    repo.add_document("doc", "one", "u", "c", false).unwrap();
    repo.add_document("doc", "two", "u", "c", false).unwrap();
    assert_eq!(repo.get_document("doc@2").unwrap().as_deref(), Some("two"));
    assert_eq!(repo.get_document("doc@1").unwrap(), None);
    assert!(repo.get_meta("doc@1").unwrap().is_none());
}

#[test]
fn writes_to_versioned_paths_are_rejected() {
    let repo = versioned();
    assert!(matches!(repo.add_document("doc@3", "x", "u", "c", false), Err(AppError::UserInput { .. })));
    assert!(repo.add_document("", "x", "u", "c", false).is_err());
}

#[test]
fn remove_document_keeps_history_when_versioned() {
    let repo = versioned();
    repo.add_document("p/doc", "v1", "u", "c", false).unwrap();
    assert!(repo.remove_document("p/doc", "remover", "gone").unwrap());
    assert_eq!(repo.get_document("p/doc").unwrap(), None);
    assert_eq!(repo.get_document("p/doc@1").unwrap().as_deref(), Some("v1"));
    let meta = repo.get_meta("p/doc").unwrap().unwrap();
    assert!(meta.deleted);
    assert_eq!(meta.version, 2);
    assert_eq!(meta.user, "remover");
    assert!(!repo.remove_document("p/doc", "remover", "again").unwrap());

    // writing again continues the version sequence
    let m = repo.add_document("p/doc", "v3", "u", "c", false).unwrap();
    assert_eq!(m.metadata.version, 3);
}

#[test]
fn remove_document_unversioned_deletes_everything() {
    let repo = unversioned();
    repo.add_document("p/doc", "v1", "u", "c", false).unwrap();
    assert!(repo.remove_document("p/doc", "u", "c").unwrap());
    assert!(repo.get_meta("p/doc").unwrap().is_none());
    assert!(repo.get_children("p").unwrap().is_empty());
    assert!(repo.get_children("").unwrap().is_empty());
    let m = repo.add_document("p/doc", "again", "u", "c", false).unwrap();
    assert_eq!(m.metadata.version, 1);
}

#[test]
fn remove_children_missing_prefix_message() {
    let repo = versioned();
    let err = repo.remove_children("nowhere", true).unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(err.message(), "Folder nowhere does not exist");
}

#[test]
fn remove_children_cleans_metadata() {
    let repo = unversioned();
    repo.add_document("f/a", "1", "u", "c", false).unwrap();
    repo.add_document("f/sub/b", "2", "u", "c", false).unwrap();
    let removed = repo.remove_children("f", true).unwrap();
    assert_eq!(removed.iter().filter(|r| !r.is_folder).count(), 2);
    assert!(repo.get_meta("f/a").unwrap().is_none());
    assert!(repo.get_meta("f/sub/b").unwrap().is_none());

    let hist = versioned();
    hist.add_document("f/a", "1", "u", "c", false).unwrap();
    hist.remove_children("f", false).unwrap();
    let meta = hist.get_meta("f/a").unwrap().unwrap();
    assert!(meta.deleted);
    assert_eq!(meta.user, SYSTEM_USER);
}

#[test]
fn tags_update_latest_meta_and_carry_forward() {
    let repo = versioned();
    repo.add_document("d", "1", "u", "c", false).unwrap();
    let m = repo.add_tag_to_document("d", "state", "draft").unwrap();
    assert_eq!(m.tags.get("state").map(|s| s.as_str()), Some("draft"));
    let more: BTreeMap<String, String> = [("owner".to_string(), "ops".to_string()), ("tier".to_string(), "1".to_string())].into_iter().collect();
    repo.add_tags_to_document("d", &more).unwrap();
    let m = repo.remove_tag_from_document("d", "tier").unwrap();
    assert_eq!(m.tags.len(), 2);

    let next = repo.add_document("d", "2", "u", "c", false).unwrap();
    assert_eq!(next.metadata.tags.get("owner").map(|s| s.as_str()), Some("ops"));
    let m = repo.remove_tags_from_document("d", &["owner".to_string(), "state".to_string()]).unwrap();
    assert!(m.tags.is_empty());
    // the historical record keeps its tags
    assert_eq!(repo.get_meta("d@1").unwrap().unwrap().tags.len(), 2);

    assert!(repo.add_tag_to_document("missing", "a", "b").unwrap_err().is_not_found());
}

#[test]
fn doc_and_meta_together() {
    let repo = versioned();
    assert!(repo.get_doc_and_meta("x").unwrap().is_none());
    repo.add_document("x", "body", "u", "c", false).unwrap();
    let dm = repo.get_doc_and_meta("x@1").unwrap().unwrap();
    assert_eq!(dm.path, "x");
    assert_eq!(dm.content.as_deref(), Some("body"));
    assert_eq!(dm.metadata.version, 1);
}

#[test]
fn index_tracks_writes_and_deletes() {
    let def = IndexDefinition::parse("region($0), qty(qty) as integer").unwrap();
    let repo = Repository::with_drivers("idx", RepoKind::Rep, Arc::new(MemoryDriver::new("idx")), None, Some(def)).unwrap();
    repo.add_document("emea/1", r#"{"qty": 5}"#, "u", "c", false).unwrap();
    repo.add_document("apac/2", r#"{"qty": 7}"#, "u", "c", false).unwrap();
    repo.add_document("emea/3", r#"{"qty": 1}"#, "u", "c", false).unwrap();
    let r = repo.find_index("SELECT region, qty WHERE qty > 2 ORDER BY qty DESC").unwrap();
    assert_eq!(r.rows.len(), 2);
    assert_eq!(r.rows[0][1], crate::index::Value::Integer(7));

    repo.remove_document("apac/2", "u", "c").unwrap();
    let r = repo.find_index("SELECT region WHERE qty > 2").unwrap();
    assert_eq!(r.rows.len(), 1);

    repo.remove_children("emea", true).unwrap();
    assert!(repo.find_index("SELECT region").unwrap().rows.is_empty());
}

#[test]
fn find_index_without_index_is_not_supported() {
    let repo = unversioned();
    assert!(matches!(repo.find_index("SELECT a"), Err(AppError::NotSupported { .. })));
}

#[test]
fn separate_version_backend_and_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let mut settings = crate::config::StorageSettings::default();
    settings.root = tmp.path().to_path_buf();
    let factory = DriverFactory::new(settings);
    let cfg = RepoConfig::versioned(BackendSpec::file("content"))
        .with_separate_versions(BackendSpec::file("history"))
        .with_index("name($0)");
    {
        let repo = Repository::open("sep", &cfg, &factory).unwrap();
        repo.add_document("one", "1", "u", "c", false).unwrap();
        repo.add_document("one", "2", "u", "c", false).unwrap();
        assert!(tmp.path().join("history").join("one@2.doc").is_file());
        assert!(!tmp.path().join("content_version").exists());
    }
    let repo = Repository::open("sep", &cfg, &factory).unwrap();
    assert_eq!(repo.get_document("one@1").unwrap().as_deref(), Some("1"));
    assert_eq!(repo.get_meta("one").unwrap().unwrap().version, 2);
    // index rebuilt from stored content
    assert_eq!(repo.find_index("SELECT name").unwrap().rows.len(), 1);

    repo.drop_repo().unwrap();
    assert!(!tmp.path().join("content").exists());
    assert!(!tmp.path().join("history").exists());
}

#[test]
fn visit_and_list() {
    let repo = unversioned();
    for p in ["r/a", "r/b/c", "s/d"] { repo.add_document(p, p, "u", "c", false).unwrap(); }
    let mut seen = Vec::new();
    repo.visit_all("r", &mut |k, v| { assert_eq!(k, v); seen.push(k.to_string()); ControlFlow::Continue(()) }).unwrap();
    assert_eq!(seen, vec!["r/a", "r/b/c"]);
    assert_eq!(repo.list_docs_by_prefix("r", 1).unwrap(), vec!["r/a", "r/b/"]);
}

#[test]
fn concurrent_writes_get_unique_increasing_versions() {
    for repo in [unversioned(), versioned()] {
        let per_thread: Vec<Vec<u64>> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8)
                .map(|t| {
                    let repo = &repo;
                    s.spawn(move || {
                        (0..10)
                            .map(|i| repo.add_document("hot/doc", &format!("{}-{}", t, i), "u", "c", false).unwrap().metadata.version)
                            .collect::<Vec<u64>>()
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for versions in &per_thread {
            assert!(versions.windows(2).all(|w| w[0] < w[1]), "{:?}", versions);
        }
        let mut all: Vec<u64> = per_thread.into_iter().flatten().collect();
        all.sort_unstable();
        assert_eq!(all, (1..=80).collect::<Vec<u64>>());
        assert_eq!(repo.get_meta("hot/doc").unwrap().unwrap().version, 80);
    }
}

#[test]
fn concurrent_removes_report_one_winner() {
    for repo in [unversioned(), versioned()] {
        repo.add_document("gone/doc", "x", "u", "c", false).unwrap();
        let wins = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8).map(|_| s.spawn(|| repo.remove_document("gone/doc", "u", "rm").unwrap())).collect();
            handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count()
        });
        assert_eq!(wins, 1);
        assert_eq!(repo.get_document("gone/doc").unwrap(), None);
        if repo.is_versioned() {
            // one write plus exactly one deletion event
            let meta = repo.get_meta("gone/doc").unwrap().unwrap();
            assert_eq!((meta.version, meta.deleted), (2, true));
        }
    }
}
