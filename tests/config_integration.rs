//! Integration tests for rewrite plans: loading, validation, application.

mod common;

use class_patcher::config::{
    apply_rewrites, load_from_path, load_from_str, ApplyError, ConfigError, RewriteResult,
    ValidationIssue,
};
use class_patcher::persist::digest;
use class_patcher::{Executor, MatchMode};
use common::hello_world;
use std::fs;
use std::time::Duration;
use tempfile::TempDir;

const PLAN: &str = r#"
[meta]
name = "greetings"
description = "Rename the greeting"

[sandbox]
entry_point = "main"
redirect_to = "demo/Capture"
match_mode = "exact"
max_instructions = 5000
timeout_ms = 1000

[[rewrites]]
id = "greeting"
target = "Hello, world"
replacement = "Howdy, partner"
"#;

#[test]
fn test_load_full_plan() {
    let config = load_from_str(PLAN).unwrap();
    assert_eq!(config.meta.name, "greetings");
    assert_eq!(config.meta.description.as_deref(), Some("Rename the greeting"));
    assert_eq!(config.rewrites.len(), 1);
    assert_eq!(config.rewrites[0].replacement, "Howdy, partner");

    let settings = config.sandbox.executor_settings();
    assert_eq!(settings.redirect_to, "demo/Capture");
    assert_eq!(settings.match_mode, MatchMode::Exact);
    assert_eq!(settings.limits.max_instructions, Some(5000));
    assert_eq!(settings.limits.timeout, Some(Duration::from_secs(1)));
}

#[test]
fn test_plan_drives_execution() {
    let config = load_from_str(PLAN).unwrap();
    let (bytes, results) = apply_rewrites(&config, hello_world("Hello, world"));
    assert!(matches!(
        results[0],
        (ref id, Ok(RewriteResult::Applied { .. })) if id == "greeting"
    ));

    let executor = Executor::new(config.sandbox.executor_settings());
    let output = executor
        .execute(bytes, config.sandbox.entry_point())
        .unwrap();
    assert_eq!(output, "Howdy, partner\n");
}

#[test]
fn test_verify_against_digest() {
    let input = hello_world("Hello, world");
    let plan = format!(
        r#"
[[rewrites]]
id = "pinned"
target = "Hello, world"
replacement = "Pinned"
verify = {{ method = "hash", algorithm = "xxh3", expected = "{}" }}
"#,
        digest(&input)
    );
    let config = load_from_str(&plan).unwrap();

    let (_, results) = apply_rewrites(&config, input);
    assert!(results[0].1.is_ok());

    let (unchanged, results) = apply_rewrites(&config, hello_world("Other"));
    assert_eq!(unchanged, hello_world("Other"));
    assert!(matches!(
        results[0].1,
        Err(ApplyError::VerificationFailed { .. })
    ));
}

#[test]
fn test_validation_lists_every_issue() {
    let err = load_from_str(
        r#"
[sandbox]
max_call_depth = 0

[[rewrites]]
id = "a"
target = ""
replacement = "x"

[[rewrites]]
id = "a"
target = "y"
replacement = "z"
"#,
    )
    .unwrap_err();

    let ConfigError::Validation { source, path } = err else {
        panic!("expected validation error, got {err}");
    };
    assert!(path.is_none());
    assert_eq!(source.issues.len(), 3);
    assert!(source
        .issues
        .contains(&ValidationIssue::DuplicateId("a".to_string())));
}

#[test]
fn test_unknown_match_mode_is_toml_error() {
    let err = load_from_str(
        r#"
[[rewrites]]
id = "a"
target = "t"
replacement = "r"
match_mode = "fuzzy"
"#,
    )
    .unwrap_err();
    let ConfigError::Toml { location, .. } = &err else {
        panic!("expected TOML error, got {err}");
    };
    assert_eq!(location.line, 6);
    assert!(err.to_string().contains("rewrite 'a'"), "{err}");
}

#[test]
fn test_call_depth_above_cap_is_rejected() {
    let err = load_from_str("[sandbox]\nmax_call_depth = 1000000\n").unwrap_err();
    let ConfigError::Validation { source, .. } = &err else {
        panic!("expected validation error, got {err}");
    };
    assert_eq!(source.issues.len(), 1);
    assert!(err.to_string().contains("max_call_depth"), "{err}");
}

#[test]
fn test_load_from_path_reports_path() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plan.toml");
    fs::write(&path, "[[rewrites]]\nid = \"\"\ntarget = \"t\"\nreplacement = \"r\"\n").unwrap();

    let err = load_from_path(&path).unwrap_err();
    assert!(err.to_string().contains("plan.toml"), "{err}");
    assert!(matches!(err, ConfigError::Validation { path: Some(_), .. }));

    let missing = load_from_path(dir.path().join("missing.toml")).unwrap_err();
    assert!(matches!(missing, ConfigError::Io { .. }));
}

#[test]
fn test_load_from_path_ok() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plan.toml");
    fs::write(&path, PLAN).unwrap();
    let config = load_from_path(&path).unwrap();
    assert_eq!(config.sandbox.entry_point(), "main");
}
