use super::*;

#[test]
fn code_and_message_accessors() {
    let e = AppError::not_found("nf", "missing doc");
    assert_eq!(e.code_str(), "nf");
    assert_eq!(e.message(), "missing doc");
    assert_eq!(format!("{}", e), "nf: missing doc");

    let e = AppError::invalid_query("invalid_query", "Invalid query: bad");
    assert!(e.to_string().contains("Invalid query"));
    assert!(!e.is_not_found());
}

#[test]
fn folder_missing_message_is_exact() {
    let e = AppError::folder_missing("a/b");
    assert!(e.is_not_found());
    assert_eq!(e.message(), "Folder a/b does not exist");
}

#[test]
fn decode_failure_names_type_and_content() {
    let e = AppError::decode_failed("WorkOrder", "{not json", "expected value");
    match &e {
        AppError::Serialization { message, .. } => {
            assert!(message.contains("WorkOrder"));
            assert!(message.contains("{not json"));
        }
        other => panic!("unexpected variant: {:?}", other),
    }
}

#[test]
fn io_errors_surface_as_backend_unavailable() {
    let io = std::io::Error::new(std::io::ErrorKind::Other, "disk gone");
    let e: AppError = io.into();
    assert!(matches!(e, AppError::BackendUnavailable { .. }));
    assert!(e.message().contains("disk gone"));
}

#[test]
fn serde_roundtrip_keeps_variant_tag() {
    let e = AppError::conflict("duplicate_key", "row 42 exists");
    let s = serde_json::to_string(&e).unwrap();
    assert!(s.contains("\"type\":\"conflict\""));
    let back: AppError = serde_json::from_str(&s).unwrap();
    assert_eq!(back.code_str(), "duplicate_key");
}
