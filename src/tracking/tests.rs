//! Tests for the tracking module

#![allow(clippy::unwrap_used)]

use std::collections::BTreeMap;
use std::path::PathBuf;

use super::storage::{
    validate_artifact_path, InMemoryBackend, JsonFileBackend, TrackingBackend,
    TrackingStorageError,
};
use super::{ExperimentTracker, Run, RunStatus, TrackingError, TrackingUri};
use crate::error::ErrorKind;

// ---------------------------------------------------------------------------
// RunStatus tests
// ---------------------------------------------------------------------------

#[test]
fn test_run_status_mlflow_names() {
    for status in [
        RunStatus::Active,
        RunStatus::Completed,
        RunStatus::Failed,
        RunStatus::Cancelled,
    ] {
        assert_eq!(RunStatus::from_mlflow(status.as_mlflow()), Some(status));
    }
    assert_eq!(RunStatus::from_mlflow("BOGUS"), None);
}

#[test]
fn test_run_new_defaults() {
    let run = Run::new("r-1".into(), Some("evaluate".into()), "exp-1".into());
    assert_eq!(run.status, RunStatus::Active);
    assert!(run.params.is_empty());
    assert!(run.metrics.is_empty());
    assert!(run.start_time_ms.is_some());
    assert!(run.end_time_ms.is_none());
}

#[test]
fn test_latest_metric() {
    let mut run = Run::new("r-1".into(), None, "exp".into());
    run.metrics.insert("loss".into(), vec![(0.5, 0), (0.3, 1)]);
    assert_eq!(run.latest_metric("loss"), Some(0.3));
    assert_eq!(run.latest_metric("r2_score"), None);
}

// ---------------------------------------------------------------------------
// TrackingUri tests
// ---------------------------------------------------------------------------

#[test]
fn test_uri_file_scheme_is_local() {
    assert_eq!(
        TrackingUri::parse("file:./mlruns").unwrap(),
        TrackingUri::Local(PathBuf::from("./mlruns"))
    );
    assert_eq!(
        TrackingUri::parse("file:///tmp/mlruns").unwrap(),
        TrackingUri::Local(PathBuf::from("/tmp/mlruns"))
    );
}

#[test]
fn test_uri_bare_path_is_local() {
    let uri = TrackingUri::parse("./mlruns").unwrap();
    assert!(uri.is_local());
    assert_eq!(uri.to_string(), "file:./mlruns");
}

#[test]
fn test_uri_http_is_remote() {
    let uri = TrackingUri::parse("http://tracker:5000/").unwrap();
    assert_eq!(uri, TrackingUri::Remote("http://tracker:5000".to_string()));
    assert!(!uri.is_local());
}

#[test]
fn test_uri_unknown_scheme_rejected() {
    let err = TrackingUri::parse("databricks://profile").unwrap_err();
    assert!(matches!(err, TrackingError::UnsupportedUri(_)));
    assert_eq!(err.kind(), ErrorKind::Configuration);
    assert!(TrackingUri::parse("  ").is_err());
}

#[test]
fn test_open_local_backend_has_no_registry() {
    let dir = tempfile::tempdir().unwrap();
    let backend = TrackingUri::Local(dir.path().to_path_buf()).open().unwrap();
    assert!(!backend.supports_registry());
}

// ---------------------------------------------------------------------------
// ExperimentTracker tests
// ---------------------------------------------------------------------------

#[test]
fn test_start_run_assigns_unique_ids() {
    let mut tracker = ExperimentTracker::new("exp", InMemoryBackend::new());
    let a = tracker.start_run(None).unwrap();
    let b = tracker.start_run(None).unwrap();
    assert_ne!(a, b);
    assert_eq!(a.len(), 32);
}

#[test]
fn test_start_run_inherits_tags() {
    let mut tracker = ExperimentTracker::new("exp", InMemoryBackend::new());
    tracker.add_tag("stage", "evaluation");
    let id = tracker.start_run(Some("evaluate")).unwrap();
    let run = tracker.get_run(&id).unwrap();
    assert_eq!(run.tags.get("stage").map(String::as_str), Some("evaluation"));
    assert_eq!(run.run_name.as_deref(), Some("evaluate"));
    assert_eq!(run.experiment_name, "exp");
}

#[test]
fn test_log_params_and_metrics() {
    let mut tracker = ExperimentTracker::new("exp", InMemoryBackend::new());
    let id = tracker.start_run(None).unwrap();

    let mut params = BTreeMap::new();
    params.insert("alpha".to_string(), "0.5".to_string());
    tracker.log_params(&id, &params).unwrap();
    tracker.log_param(&id, "fit_intercept", "true").unwrap();
    tracker.log_metric(&id, "r2_score", 0.9, 0).unwrap();

    let run = tracker.get_run(&id).unwrap();
    assert_eq!(run.params.len(), 2);
    assert_eq!(run.latest_metric("r2_score"), Some(0.9));
}

#[test]
fn test_cannot_log_after_end() {
    let mut tracker = ExperimentTracker::new("exp", InMemoryBackend::new());
    let id = tracker.start_run(None).unwrap();
    tracker.end_run(&id, RunStatus::Completed).unwrap();

    let err = tracker.log_metric(&id, "r2_score", 0.9, 0).unwrap_err();
    assert!(matches!(err, TrackingError::RunNotActive(_)));
    assert!(matches!(
        tracker.end_run(&id, RunStatus::Completed).unwrap_err(),
        TrackingError::RunNotFound(_)
    ));
}

#[test]
fn test_end_run_persists_status() {
    let mut tracker = ExperimentTracker::new("exp", InMemoryBackend::new());
    let id = tracker.start_run(None).unwrap();
    tracker.end_run(&id, RunStatus::Failed).unwrap();

    let run = tracker.backend().load_run(&id).unwrap();
    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.end_time_ms.is_some());
}

#[test]
fn test_log_model_without_registration() {
    let mut tracker = ExperimentTracker::new("exp", InMemoryBackend::new());
    let id = tracker.start_run(None).unwrap();

    let version = tracker
        .log_model(&id, "model/model.json", b"{}", None)
        .unwrap();
    assert!(version.is_none());
    assert_eq!(
        tracker.backend().artifact(&id, "model/model.json"),
        Some(&b"{}"[..])
    );
    assert_eq!(tracker.get_run(&id).unwrap().artifacts, vec!["model/model.json"]);
}

#[test]
fn test_log_model_registration_requires_registry() {
    let mut tracker = ExperimentTracker::new("exp", InMemoryBackend::new());
    let id = tracker.start_run(None).unwrap();

    let err = tracker
        .log_model(&id, "model/model.json", b"{}", Some("abc"))
        .unwrap_err();
    assert!(matches!(err, TrackingError::RegistryUnsupported(_)));
    assert!(tracker.backend().artifact(&id, "model/model.json").is_none());
}

#[test]
fn test_log_model_registers_versions() {
    let mut tracker = ExperimentTracker::new("exp", InMemoryBackend::with_registry());
    assert!(tracker.supports_registry());

    for expected in ["1", "2"] {
        let id = tracker.start_run(None).unwrap();
        let version = tracker
            .log_model(&id, "model/model.json", b"{}", Some("abc"))
            .unwrap()
            .unwrap();
        assert_eq!(version.name, "abc");
        assert_eq!(version.version, expected);
        assert_eq!(version.source, format!("runs:/{id}/model/model.json"));
        tracker.end_run(&id, RunStatus::Completed).unwrap();
    }
    assert_eq!(tracker.backend().registered_models().len(), 2);
}

#[test]
fn test_list_runs_mixed() {
    let mut tracker = ExperimentTracker::new("exp", InMemoryBackend::new());
    let done = tracker.start_run(None).unwrap();
    tracker.end_run(&done, RunStatus::Completed).unwrap();
    let _active = tracker.start_run(None).unwrap();

    assert_eq!(tracker.list_runs().unwrap().len(), 2);
}

#[test]
fn test_get_run_not_found() {
    let tracker = ExperimentTracker::new("exp", InMemoryBackend::new());
    assert!(matches!(
        tracker.get_run("missing").unwrap_err(),
        TrackingError::RunNotFound(_)
    ));
}

// ---------------------------------------------------------------------------
// Storage tests
// ---------------------------------------------------------------------------

#[test]
fn test_artifact_path_validation() {
    assert!(validate_artifact_path("model/model.json").is_ok());
    assert!(validate_artifact_path("").is_err());
    assert!(validate_artifact_path("../escape.json").is_err());
    assert!(validate_artifact_path("/abs/model.json").is_err());
}

#[test]
fn test_json_file_backend_layout() {
    let dir = tempfile::tempdir().unwrap();
    let mut tracker = ExperimentTracker::new("exp", JsonFileBackend::new(dir.path()));
    let id = tracker.start_run(Some("evaluate")).unwrap();
    tracker.log_metric(&id, "mean_absolute_error", 1.5, 0).unwrap();
    tracker
        .log_model(&id, "model/model.json", b"{\"model_type\":\"Ridge\"}", None)
        .unwrap();
    tracker.end_run(&id, RunStatus::Completed).unwrap();

    assert!(dir.path().join(&id).join("run.json").is_file());
    let artifact = dir.path().join(&id).join("artifacts/model/model.json");
    assert_eq!(
        std::fs::read_to_string(artifact).unwrap(),
        "{\"model_type\":\"Ridge\"}"
    );

    let reopened = JsonFileBackend::new(dir.path());
    let runs = reopened.list_runs().unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].latest_metric("mean_absolute_error"), Some(1.5));
    assert_eq!(runs[0].status, RunStatus::Completed);
}

#[test]
fn test_json_file_backend_missing_run() {
    let dir = tempfile::tempdir().unwrap();
    let backend = JsonFileBackend::new(dir.path().join("absent"));
    assert!(backend.list_runs().unwrap().is_empty());
    assert!(matches!(
        backend.load_run("nope").unwrap_err(),
        TrackingStorageError::RunNotFound(_)
    ));
}

#[test]
fn test_json_file_backend_cannot_register() {
    let dir = tempfile::tempdir().unwrap();
    let mut backend = JsonFileBackend::new(dir.path());
    let run = Run::new("r-1".into(), None, "exp".into());
    assert!(backend.register_model("abc", &run, "model").is_err());
    assert!(backend.describe().starts_with("file:"));
}
