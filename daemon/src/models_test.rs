use super::*;
use tempfile::TempDir;

#[test]
fn test_format_model_file() {
    assert_eq!(format_model_file("ggml-base.bin"), Some("base".to_string()));
    assert_eq!(
        format_model_file("ggml-base.en.bin"),
        Some("base.en".to_string())
    );
    assert_eq!(
        format_model_file("ggml-large-v3-turbo.bin"),
        Some("large-v3-turbo".to_string())
    );
    assert_eq!(format_model_file("ggml-.bin"), None);
    assert_eq!(format_model_file("README.md"), None);
    assert_eq!(format_model_file("base.bin"), None);
}

#[test]
fn test_model_path_construction() {
    let temp = TempDir::new().unwrap();
    let manager = ModelManager::with_dir(temp.path(), "ggerganov/whisper.cpp");

    assert_eq!(manager.models_dir(), temp.path());
    assert_eq!(
        manager.model_path("base.en"),
        temp.path().join("ggml-base.en.bin")
    );
}

#[test]
fn test_scan_missing_directory_is_empty() {
    let temp = TempDir::new().unwrap();
    let manager = ModelManager::with_dir(temp.path().join("nope"), "ggerganov/whisper.cpp");

    assert!(manager.scan_local().is_empty());
}

#[test]
fn test_scan_local_skips_non_model_files() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("ggml-tiny.bin"), b"x").unwrap();
    std::fs::write(temp.path().join("ggml-base.en.bin"), b"x").unwrap();
    std::fs::write(temp.path().join("notes.txt"), b"x").unwrap();

    let manager = ModelManager::with_dir(temp.path(), "ggerganov/whisper.cpp");
    assert_eq!(manager.scan_local(), vec!["base.en", "tiny"]);
}

#[test]
fn test_available_models_merges_without_duplicates() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("ggml-base.bin"), b"x").unwrap();
    std::fs::write(temp.path().join("ggml-custom-ft.bin"), b"x").unwrap();

    let manager = ModelManager::with_dir(temp.path(), "ggerganov/whisper.cpp");
    let models = manager.available_models();

    // Catalog entry marked local, listed once
    let base: Vec<_> = models.iter().filter(|m| m.name == "base").collect();
    assert_eq!(base.len(), 1);
    assert!(base[0].local);

    // Catalog entry not on disk
    let tiny = models.iter().find(|m| m.name == "tiny").unwrap();
    assert!(!tiny.local);

    // Out-of-catalog local file still offered
    let custom = models.iter().find(|m| m.name == "custom-ft").unwrap();
    assert!(custom.local);
    assert!(!custom.disabled);
}

#[test]
fn test_catalog_marks_disabled_variants() {
    let temp = TempDir::new().unwrap();
    let manager = ModelManager::with_dir(temp.path(), "ggerganov/whisper.cpp");

    let models = manager.available_models();
    let large = models.iter().find(|m| m.name == "large-v3").unwrap();
    assert!(large.disabled);
}

#[tokio::test]
async fn test_ensure_model_short_circuits_on_unknown_cached_variant() {
    let temp = TempDir::new().unwrap();
    // Variant unknown to the catalog: no size validation possible, any
    // cached file is accepted without touching the network.
    std::fs::write(temp.path().join("ggml-custom-ft.bin"), b"weights").unwrap();

    let manager = ModelManager::with_dir(temp.path(), "ggerganov/whisper.cpp");
    let path = manager
        .ensure_model("custom-ft", false, |_| {})
        .await
        .unwrap();
    assert_eq!(path, temp.path().join("ggml-custom-ft.bin"));
}

#[test]
fn test_delete_model() {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("ggml-tiny.bin"), b"x").unwrap();

    let manager = ModelManager::with_dir(temp.path(), "ggerganov/whisper.cpp");
    manager.delete_model("tiny").unwrap();
    assert!(!temp.path().join("ggml-tiny.bin").exists());

    // Deleting a missing model reports FileAccess
    let err = manager.delete_model("tiny").unwrap_err();
    assert!(matches!(err, EngineError::FileAccess { .. }));
}
