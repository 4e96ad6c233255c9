//! Classes compiled by `javac --release 8` from `tests/fixtures/src`.

use class_patcher::{patch_utf8_constant, ExecutionLimits, Executor, ExecutorSettings};
use std::fs;
use std::path::PathBuf;

fn fixture(name: &str) -> Vec<u8> {
    let path = PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests/fixtures")
        .join(format!("{name}.class"));
    fs::read(&path).unwrap_or_else(|e| panic!("cannot read {}: {e}", path.display()))
}

fn run(name: &str) -> String {
    Executor::default().execute(fixture(name), "main").unwrap()
}

#[test]
fn test_greeting() {
    assert_eq!(run("Greeting"), "Hello from javac\n");
}

#[test]
fn test_greeting_with_patched_literal() {
    let patched = patch_utf8_constant(fixture("Greeting"), "Hello from javac", "patched").unwrap();
    assert!(patched.is_replaced());
    let output = Executor::default()
        .execute(patched.into_bytes(), "main")
        .unwrap();
    assert_eq!(output, "patched\n");
}

#[test]
fn test_string_builder_loops() {
    assert_eq!(run("Concat"), "digits: 0,1,2,3,4\n3...2...1...liftoff\n");
}

#[test]
fn test_float_and_double_printing() {
    let expected = "0.1\n\
                    1.0E7\n\
                    1.0E-4\n\
                    0.3333333333333333\n\
                    0.33333334\n\
                    100.0\n\
                    -2.5E-5\n\
                    3.3554432E7\n\
                    sum=0.30000000000000004\n";
    assert_eq!(run("Floats"), expected);
}

#[test]
fn test_recursion_within_default_depth() {
    assert_eq!(run("Recursion"), "500\n");
}

#[test]
fn test_recursion_past_depth_limit_has_line_numbers() {
    let executor = Executor::new(ExecutorSettings {
        limits: ExecutionLimits {
            max_call_depth: 100,
            ..Default::default()
        },
        ..Default::default()
    });
    let output = executor.execute(fixture("Recursion"), "main").unwrap();
    assert!(output.starts_with("java.lang.StackOverflowError"), "{output}");
    assert!(output.contains("\tat Recursion.depth(Recursion.java:3)\n"), "{output}");
    assert!(output.ends_with("\tat Recursion.main(Recursion.java:7)\n"), "{output}");
    assert_eq!(output.matches("\tat ").count(), 100);
}
