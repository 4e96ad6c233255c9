//! Applying a rewrite plan to the bytes of one class file.
//!
//! Rules run in order against the output of the previous rule. A rule that
//! fails leaves the bytes as they were and does not stop later rules.
//! Hash verification always checks the input the plan was applied to.

use crate::config::schema::{parse_hash, RewriteConfig, RewriteRule, Verify};
use crate::constant_pool::{patch_utf8_constant_with, MatchMode, PatchError, Patched};
use log::{debug, info};
use std::fmt;
use xxhash_rust::xxh3::xxh3_64;

/// Outcome of one rule
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "RewriteResult should be checked for success/failure"]
pub enum RewriteResult {
    /// Constant at pool `index`, tag byte at `offset`, was replaced
    Applied { index: u16, offset: usize },
    /// No constant matched the target
    NotFound,
}

impl fmt::Display for RewriteResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RewriteResult::Applied { index, offset } => {
                write!(f, "Replaced constant #{} at offset {}", index, offset)
            }
            RewriteResult::NotFound => write!(f, "Target not found"),
        }
    }
}

#[derive(Debug)]
pub enum ApplyError {
    Patch(PatchError),
    /// Input digest differs from the plan's `verify.expected`
    VerificationFailed { expected: String, actual: String },
    BadHash { value: String },
}

impl fmt::Display for ApplyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyError::Patch(e) => write!(f, "patch error: {}", e),
            ApplyError::VerificationFailed { expected, actual } => write!(
                f,
                "input hash mismatch (expected {}, found {})",
                expected, actual
            ),
            ApplyError::BadHash { value } => write!(f, "invalid hash value: {}", value),
        }
    }
}

impl std::error::Error for ApplyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ApplyError::Patch(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PatchError> for ApplyError {
    fn from(e: PatchError) -> Self {
        ApplyError::Patch(e)
    }
}

/// Apply every rule of `config` to `bytes`.
///
/// Returns the rewritten bytes and one result per rule, in plan order.
pub fn apply_rewrites(
    config: &RewriteConfig,
    bytes: Vec<u8>,
) -> (Vec<u8>, Vec<(String, Result<RewriteResult, ApplyError>)>) {
    let input_hash = xxh3_64(&bytes);
    let default_mode = config.sandbox.match_mode.unwrap_or_default();
    let mut current = bytes;
    let mut results = Vec::with_capacity(config.rewrites.len());

    for rule in &config.rewrites {
        let outcome = verify_input(rule, input_hash).and_then(|()| {
            let mode = rule.match_mode.unwrap_or(default_mode);
            apply_rule(rule, current.clone(), mode)
        });
        let result = match outcome {
            Ok((patched, result)) => {
                current = patched;
                Ok(result)
            }
            Err(e) => {
                debug!("Rewrite '{}' failed: {}", rule.id, e);
                Err(e)
            }
        };
        results.push((rule.id.clone(), result));
    }

    (current, results)
}

fn verify_input(rule: &RewriteRule, input_hash: u64) -> Result<(), ApplyError> {
    let Some(Verify::Hash { expected, .. }) = &rule.verify else {
        return Ok(());
    };
    let want = parse_hash(expected).ok_or_else(|| ApplyError::BadHash {
        value: expected.clone(),
    })?;
    if want != input_hash {
        return Err(ApplyError::VerificationFailed {
            expected: format!("0x{want:016x}"),
            actual: format!("0x{input_hash:016x}"),
        });
    }
    Ok(())
}

fn apply_rule(
    rule: &RewriteRule,
    bytes: Vec<u8>,
    mode: MatchMode,
) -> Result<(Vec<u8>, RewriteResult), ApplyError> {
    match patch_utf8_constant_with(bytes, &rule.target, &rule.replacement, mode)? {
        Patched::Replaced {
            bytes,
            index,
            offset,
        } => {
            info!("Rewrite '{}' replaced constant #{}", rule.id, index);
            Ok((bytes, RewriteResult::Applied { index, offset }))
        }
        Patched::Unchanged(bytes) => Ok((bytes, RewriteResult::NotFound)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::load_from_str;

    /// Header plus a pool of two UTF-8 constants, "Hello" and "World".
    fn two_strings() -> Vec<u8> {
        let mut bytes = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52, 0, 3];
        for text in ["Hello", "World"] {
            bytes.push(1);
            bytes.extend_from_slice(&(text.len() as u16).to_be_bytes());
            bytes.extend_from_slice(text.as_bytes());
        }
        bytes.extend_from_slice(&[0; 6]);
        bytes
    }

    #[test]
    fn test_rules_chain_in_order() {
        let config = load_from_str(
            r#"
[[rewrites]]
id = "first"
target = "Hello"
replacement = "Howdy"

[[rewrites]]
id = "second"
target = "Howdy"
replacement = "Hi"
"#,
        )
        .unwrap();

        let (bytes, results) = apply_rewrites(&config, two_strings());
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[0].1.as_ref().unwrap(),
            &RewriteResult::Applied { index: 1, offset: 10 }
        );
        assert!(results[1].1.is_ok());
        assert!(bytes.windows(2).any(|w| w == b"Hi"));
        assert!(!bytes.windows(5).any(|w| w == b"Hello"));
    }

    #[test]
    fn test_not_found_leaves_bytes() {
        let config = load_from_str(
            r#"
[[rewrites]]
id = "missing"
target = "Absent"
replacement = "x"
"#,
        )
        .unwrap();
        let input = two_strings();
        let (bytes, results) = apply_rewrites(&config, input.clone());
        assert_eq!(bytes, input);
        assert_eq!(results[0].1.as_ref().unwrap(), &RewriteResult::NotFound);
    }

    #[test]
    fn test_exact_mode_from_sandbox_default() {
        let config = load_from_str(
            r#"
[sandbox]
match_mode = "exact"

[[rewrites]]
id = "lower"
target = "hello"
replacement = "x"

[[rewrites]]
id = "override"
target = "world"
replacement = "y"
match_mode = "case-insensitive"
"#,
        )
        .unwrap();
        let (_, results) = apply_rewrites(&config, two_strings());
        assert_eq!(results[0].1.as_ref().unwrap(), &RewriteResult::NotFound);
        assert!(matches!(
            results[1].1.as_ref().unwrap(),
            RewriteResult::Applied { index: 2, .. }
        ));
    }

    #[test]
    fn test_hash_verification() {
        let input = two_strings();
        let good = format!("0x{:016x}", xxh3_64(&input));
        let toml = format!(
            r#"
[[rewrites]]
id = "checked"
target = "Hello"
replacement = "Howdy"
verify = {{ method = "hash", algorithm = "xxh3", expected = "{good}" }}

[[rewrites]]
id = "stale"
target = "World"
replacement = "Earth"
verify = {{ method = "hash", expected = "0x1" }}
"#
        );
        let config = load_from_str(&toml).unwrap();
        let (bytes, results) = apply_rewrites(&config, input);
        assert!(results[0].1.is_ok());
        assert!(matches!(
            results[1].1,
            Err(ApplyError::VerificationFailed { .. })
        ));
        assert!(bytes.windows(5).any(|w| w == b"World"));
    }

    #[test]
    fn test_patch_error_reported_per_rule() {
        let config = load_from_str(
            r#"
[[rewrites]]
id = "a"
target = "Hello"
replacement = "x"
"#,
        )
        .unwrap();
        let (bytes, results) = apply_rewrites(&config, vec![0xCA, 0xFE]);
        assert_eq!(bytes, vec![0xCA, 0xFE]);
        assert!(matches!(results[0].1, Err(ApplyError::Patch(_))));
    }
}
