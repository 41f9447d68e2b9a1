use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;

use docrepo::cache::ContentCache;
use docrepo::catalog::RepoCatalog;
use docrepo::config::{BackendSpec, RepoConfig, StorageSettings};
use docrepo::driver::{Driver, DriverFactory, FolderInfo, MemoryDriver};
use docrepo::folders::FolderStore;
use docrepo::index::{ColumnType, Value};
use docrepo::object::{ObjectStorage, Storable, StorableInfo};
use docrepo::table::{ColumnDef, TableStore};
use docrepo::{AppError, AppResult, DocUri};

fn file_factory(tmp: &tempfile::TempDir) -> DriverFactory {
    DriverFactory::new(StorageSettings { root: tmp.path().to_path_buf(), ..StorageSettings::default() })
}

#[test]
fn removing_last_document_removes_parent_folder() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = file_factory(&tmp);
    for cfg in [
        RepoConfig::unversioned(BackendSpec::memory("e2e_parent_mem")),
        RepoConfig::versioned(BackendSpec::file("e2e_parent_file")),
    ] {
        let catalog = RepoCatalog::in_memory(factory.clone());
        let repo = catalog.create_repo("parent", &cfg).unwrap().unwrap();
        repo.add_document("top/mid/doc", "x", "u", "c", false).unwrap();
        assert_eq!(repo.get_children("top").unwrap(), vec![FolderInfo::folder("mid")]);
        assert!(repo.remove_document("top/mid/doc", "u", "c").unwrap());
        assert!(repo.get_children("top").unwrap().is_empty());
        assert!(repo.get_children("").unwrap().is_empty());
        catalog.drop_repo("parent").unwrap();
    }
}

#[test]
fn sub_keys_over_flat_and_native_drivers() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = file_factory(&tmp);
    let drivers: Vec<Arc<dyn Driver>> = vec![
        Arc::new(MemoryDriver::new("e2e_subkeys")),
        factory.open(&BackendSpec::file("e2e_subkeys")).unwrap(),
    ];
    for d in drivers {
        d.put("a/b/c", "1").unwrap();
        d.put("a/b/d", "2").unwrap();
        assert_eq!(d.get_sub_keys("a/b").unwrap(), vec![FolderInfo::leaf("c"), FolderInfo::leaf("d")]);
        assert_eq!(d.get_sub_keys("").unwrap(), vec![FolderInfo::folder("a")]);
        // segment boundaries are respected
        d.put("a/bc", "3").unwrap();
        assert_eq!(d.get_all_sub_keys("a/b").unwrap(), vec!["a/b/c".to_string(), "a/b/d".to_string()]);
    }
}

#[test]
fn trailing_slash_prefix_names_the_same_folder() {
    let tmp = tempfile::tempdir().unwrap();
    let factory = file_factory(&tmp);
    let drivers: Vec<Arc<dyn Driver>> = vec![
        Arc::new(MemoryDriver::new("e2e_slash")),
        factory.open(&BackendSpec::file("e2e_slash")).unwrap(),
    ];
    for d in drivers {
        d.put("a/x", "1").unwrap();
        d.put("a/y", "2").unwrap();
        d.put("b/z", "3").unwrap();
        assert_eq!(d.get_sub_keys("a/").unwrap(), vec![FolderInfo::leaf("x"), FolderInfo::leaf("y")]);
        assert_eq!(d.get_all_sub_keys("a/").unwrap(), d.get_all_sub_keys("a").unwrap());

        let folders = FolderStore::new(d.clone());
        let removed = folders.remove_children("a/", true).unwrap();
        assert_eq!(removed, vec![FolderInfo::leaf("a/x"), FolderInfo::leaf("a/y"), FolderInfo::folder("a")]);
        assert!(d.get("a/x").unwrap().is_none());
        assert!(d.get("a/y").unwrap().is_none());
        assert_eq!(folders.get_children("").unwrap(), vec![FolderInfo::folder("b")]);
        assert!(folders.remove_children("a/", true).unwrap_err().is_not_found());
    }
}

#[test]
fn versions_and_missing_folder() {
    let catalog = RepoCatalog::in_memory(DriverFactory::default());
    let repo = catalog.create_repo("hist", &RepoConfig::versioned(BackendSpec::memory("e2e_hist"))).unwrap().unwrap();
    for i in 1..=4 {
        let dm = repo.add_document("p", &format!("write {}", i), "u", "c", false).unwrap();
        assert_eq!(dm.metadata.version, i);
    }
    for i in 1..=4u64 {
        assert_eq!(repo.get_document(&format!("p@{}", i)).unwrap(), Some(format!("write {}", i)));
    }
    let err = repo.remove_children("q", true).unwrap_err();
    assert!(matches!(err, AppError::NotFound { .. }));
    assert_eq!(err.message(), "Folder q does not exist");
    catalog.drop_repo("hist").unwrap();
}

#[test]
fn table_rows_after_delete() {
    let store = TableStore::new(Arc::new(MemoryDriver::new("e2e_tables")));
    store.create_table("t", vec![ColumnDef::new("id", ColumnType::Integer), ColumnDef::new("name", ColumnType::String)], "id").unwrap();
    for (id, name) in [(42, "A"), (43, "B"), (44, "C")] {
        let row = json!({"id": id, "name": name});
        store.insert_row("t", row.as_object().unwrap().clone()).unwrap();
    }
    store.delete_rows("t", Some("id=42")).unwrap();
    let rows: Vec<serde_json::Value> = store.select_rows("t", &[], None, &[], true, None).unwrap()
        .into_iter().map(serde_json::Value::Object).collect();
    assert_eq!(rows, vec![json!({"id": 43, "name": "B"}), json!({"id": 44, "name": "C"})]);
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Job {
    name: String,
    state: String,
}

impl Storable for Job {
    const TYPE_NAME: &'static str = "Job";
    fn storage_info() -> StorableInfo { StorableInfo::default() }
    fn storage_uri(&self) -> AppResult<DocUri> { DocUri::new("jobs", format!("job/{}", self.name)) }
}

#[test]
fn object_storage_over_indexed_repository() {
    let catalog = Arc::new(RepoCatalog::in_memory(DriverFactory::default()));
    catalog
        .create_repo("jobs", &RepoConfig::versioned(BackendSpec::memory("e2e_jobs")).with_index("name($1), state(state)"))
        .unwrap()
        .unwrap();
    let cache = Arc::new(ContentCache::new(64, None));
    let store = ObjectStorage::new(catalog.clone(), cache.clone());

    for (n, s) in [("build", "done"), ("test", "running"), ("deploy", "queued")] {
        store.write(&Job { name: n.into(), state: s.into() }, "ci", "schedule").unwrap();
    }
    let uri = DocUri::parse("//jobs/job/test").unwrap();
    let job: Job = store.read(&uri).unwrap().unwrap();
    assert_eq!(job.state, "running");
    assert!(cache.stats().hits >= 1);

    let r = store.query_index("jobs", r#"SELECT name WHERE state != "done" ORDER BY name"#).unwrap();
    assert_eq!(r.rows, vec![vec![Value::from("deploy")], vec![Value::from("test")]]);

    store.delete("ci", &uri).unwrap();
    assert!(store.read::<Job>(&uri).unwrap().is_none());
    let previous: Option<Job> = store.read(&uri.with_version(Some(1))).unwrap();
    assert_eq!(previous.map(|j| j.state).as_deref(), Some("running"));
    assert_eq!(store.read_all::<Job>("jobs", "job/", "").unwrap().len(), 2);
}
