use super::*;
use crate::config::BackendSpec;

#[test]
fn flat_emulation_levels() {
    let keys = ["a/b/c", "a/b/d"];
    assert_eq!(sub_keys_from_flat("a/b", keys), vec![FolderInfo::leaf("c"), FolderInfo::leaf("d")]);
    assert_eq!(sub_keys_from_flat("", keys), vec![FolderInfo::folder("a")]);
    assert_eq!(sub_keys_from_flat("a", keys), vec![FolderInfo::folder("b")]);
    assert!(sub_keys_from_flat("a/b/c", keys).is_empty());
}

#[test]
fn flat_emulation_dedups_and_respects_segments() {
    let keys = ["f1/x/1", "f1/x/2", "f1/y", "f10/z"];
    assert_eq!(sub_keys_from_flat("f1", keys), vec![FolderInfo::folder("x"), FolderInfo::leaf("y")]);
}

#[test]
fn factory_opens_available_backends() {
    let tmp = tempfile::tempdir().unwrap();
    let mut settings = StorageSettings::default();
    settings.root = tmp.path().to_path_buf();
    let factory = DriverFactory::new(settings);

    let name = format!("factory-{}", uuid::Uuid::new_v4());
    let m = factory.open(&BackendSpec::memory(&name)).unwrap();
    m.put("k", "v").unwrap();
    let again = factory.open(&BackendSpec::memory(&name)).unwrap();
    assert_eq!(again.get("k").unwrap().as_deref(), Some("v"));
    m.drop_key_store().unwrap();

    let f = factory.open(&BackendSpec::file("files")).unwrap();
    f.put("a/b", "c").unwrap();
    assert!(tmp.path().join("files").join("a").join("b.doc").is_file());

    let err = match factory.open(&BackendSpec::new(BackendKind::Cassandra, "c")) {
        Err(e) => e,
        Ok(_) => panic!("cassandra should not open"),
    };
    assert!(matches!(err, AppError::NotSupported { .. }));
}

#[test]
fn default_count_keys_is_not_supported() {
    struct Bare;
    impl Driver for Bare {
        fn name(&self) -> &str { "bare" }
        fn get(&self, _: &str) -> AppResult<Option<String>> { Ok(None) }
        fn put(&self, _: &str, _: &str) -> AppResult<()> { Ok(()) }
        fn put_if_absent(&self, _: &str, _: &str) -> AppResult<bool> { Ok(true) }
        fn delete(&self, _: &str) -> AppResult<bool> { Ok(false) }
        fn delete_if_equals(&self, _: &str, _: &str) -> AppResult<bool> { Ok(false) }
        fn get_all_sub_keys(&self, _: &str) -> AppResult<Vec<String>> { Ok(vec!["a/b".into()]) }
        fn scan_keys<'a>(&'a self, _: &str) -> AppResult<KeyScan<'a>> { Ok(Box::new(std::iter::empty())) }
        fn drop_key_store(&self) -> AppResult<()> { Ok(()) }
        fn create_related_key_store(&self, _: &str) -> AppResult<Arc<dyn Driver>> { Ok(Arc::new(Bare)) }
    }
    let b = Bare;
    assert!(matches!(b.count_keys(), Err(AppError::NotSupported { .. })));
    assert_eq!(b.get_sub_keys("").unwrap(), vec![FolderInfo::folder("a")]);
}
