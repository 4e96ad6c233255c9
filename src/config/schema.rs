use crate::constant_pool::MatchMode;
use crate::executor::ExecutorSettings;
use crate::runtime::interp::{ExecutionLimits, MAX_CALL_DEPTH_LIMIT};
use serde::Deserialize;
use std::collections::HashSet;
use std::fmt;
use std::time::Duration;

/// Largest replacement a UTF-8 constant can hold.
pub const MAX_CONSTANT_LEN: usize = u16::MAX as usize;

#[derive(Debug, Deserialize, Default, Clone)]
pub struct RewriteConfig {
    #[serde(default)]
    pub meta: Metadata,
    #[serde(default)]
    pub sandbox: SandboxSettings,
    #[serde(default)]
    pub rewrites: Vec<RewriteRule>,
}

impl RewriteConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        let mut issues = Vec::new();
        let mut seen = HashSet::new();

        for rule in &self.rewrites {
            if rule.id.trim().is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: None,
                    field: "id",
                });
            } else if !seen.insert(rule.id.as_str()) {
                issues.push(ValidationIssue::DuplicateId(rule.id.clone()));
            }
            if rule.target.is_empty() {
                issues.push(ValidationIssue::MissingField {
                    rule_id: Some(rule.id.clone()),
                    field: "target",
                });
            }
            if rule.replacement.len() > MAX_CONSTANT_LEN {
                issues.push(ValidationIssue::InvalidValue {
                    rule_id: Some(rule.id.clone()),
                    message: format!(
                        "replacement is {} bytes, a constant holds at most {MAX_CONSTANT_LEN}",
                        rule.replacement.len()
                    ),
                });
            }
            if let Some(Verify::Hash { expected, .. }) = &rule.verify {
                if parse_hash(expected).is_none() {
                    issues.push(ValidationIssue::InvalidValue {
                        rule_id: Some(rule.id.clone()),
                        message: format!("invalid hash value: {expected}"),
                    });
                }
            }
        }

        self.sandbox.validate(&mut issues);

        if issues.is_empty() {
            Ok(())
        } else {
            Err(ValidationError { issues })
        }
    }
}

/// Parse a hex digest with or without a `0x` prefix.
pub fn parse_hash(expected: &str) -> Option<u64> {
    u64::from_str_radix(expected.trim().trim_start_matches("0x"), 16).ok()
}

#[derive(Debug, Deserialize, Default, Clone)]
pub struct Metadata {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

/// How `run` executes a class. Every key is optional.
#[derive(Debug, Deserialize, Default, Clone)]
pub struct SandboxSettings {
    #[serde(default)]
    pub entry_point: Option<String>,
    #[serde(default)]
    pub redirect_from: Option<String>,
    #[serde(default)]
    pub redirect_to: Option<String>,
    #[serde(default)]
    pub match_mode: Option<MatchMode>,
    #[serde(default)]
    pub max_instructions: Option<u64>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub max_call_depth: Option<usize>,
    #[serde(default)]
    pub max_heap_elements: Option<u64>,
}

impl SandboxSettings {
    fn validate(&self, issues: &mut Vec<ValidationIssue>) {
        for (field, value) in [
            ("sandbox.entry_point", &self.entry_point),
            ("sandbox.redirect_from", &self.redirect_from),
            ("sandbox.redirect_to", &self.redirect_to),
        ] {
            if value.as_deref().is_some_and(|v| v.trim().is_empty()) {
                issues.push(ValidationIssue::MissingField {
                    rule_id: None,
                    field,
                });
            }
        }
        if self
            .redirect_to
            .as_deref()
            .is_some_and(|to| to.len() > MAX_CONSTANT_LEN)
        {
            issues.push(ValidationIssue::InvalidValue {
                rule_id: None,
                message: "sandbox.redirect_to does not fit in a constant".to_string(),
            });
        }
        if self.max_instructions == Some(0) {
            issues.push(ValidationIssue::InvalidValue {
                rule_id: None,
                message: "sandbox.max_instructions must be positive".to_string(),
            });
        }
        match self.max_call_depth {
            Some(0) => issues.push(ValidationIssue::InvalidValue {
                rule_id: None,
                message: "sandbox.max_call_depth must be positive".to_string(),
            }),
            Some(depth) if depth > MAX_CALL_DEPTH_LIMIT => {
                issues.push(ValidationIssue::InvalidValue {
                    rule_id: None,
                    message: format!(
                        "sandbox.max_call_depth is {depth}, at most {MAX_CALL_DEPTH_LIMIT} is allowed"
                    ),
                })
            }
            _ => {}
        }
        if self.max_heap_elements == Some(0) {
            issues.push(ValidationIssue::InvalidValue {
                rule_id: None,
                message: "sandbox.max_heap_elements must be positive".to_string(),
            });
        }
    }

    pub fn entry_point(&self) -> &str {
        self.entry_point.as_deref().unwrap_or("main")
    }

    /// Overlay the configured values on the executor defaults.
    pub fn executor_settings(&self) -> ExecutorSettings {
        let defaults = ExecutorSettings::default();
        let limits = ExecutionLimits::default();
        ExecutorSettings {
            redirect_from: self.redirect_from.clone().unwrap_or(defaults.redirect_from),
            redirect_to: self.redirect_to.clone().unwrap_or(defaults.redirect_to),
            match_mode: self.match_mode.unwrap_or(defaults.match_mode),
            limits: ExecutionLimits {
                max_instructions: self.max_instructions.or(limits.max_instructions),
                timeout: self.timeout_ms.map(Duration::from_millis).or(limits.timeout),
                max_call_depth: self.max_call_depth.unwrap_or(limits.max_call_depth),
                max_heap_elements: self.max_heap_elements.or(limits.max_heap_elements),
            },
        }
    }
}

/// Replace the first UTF-8 constant equal to `target`.
#[derive(Debug, Deserialize, Clone)]
pub struct RewriteRule {
    pub id: String,
    pub target: String,
    pub replacement: String,
    /// Falls back to `sandbox.match_mode`
    #[serde(default)]
    pub match_mode: Option<MatchMode>,
    #[serde(default)]
    pub verify: Option<Verify>,
}

/// Precondition on the class file a plan is applied to.
#[derive(Debug, Deserialize, Clone)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum Verify {
    Hash {
        algorithm: Option<HashAlgorithm>,
        expected: String,
    },
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum HashAlgorithm {
    Xxh3,
}

#[derive(Debug, Clone)]
pub struct ValidationError {
    pub issues: Vec<ValidationIssue>,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (idx, issue) in self.issues.iter().enumerate() {
            if idx > 0 {
                writeln!(f)?;
            }
            write!(f, "{issue}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ValidationError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationIssue {
    MissingField {
        rule_id: Option<String>,
        field: &'static str,
    },
    DuplicateId(String),
    InvalidValue {
        rule_id: Option<String>,
        message: String,
    },
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationIssue::MissingField { rule_id, field } => match rule_id {
                Some(id) => write!(f, "rewrite '{id}' missing required field '{field}'"),
                None => write!(f, "missing required field '{field}'"),
            },
            ValidationIssue::DuplicateId(id) => write!(f, "rewrite id '{id}' is used more than once"),
            ValidationIssue::InvalidValue { rule_id, message } => match rule_id {
                Some(id) => write!(f, "rewrite '{id}' has invalid configuration: {message}"),
                None => write!(f, "invalid configuration: {message}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, target: &str) -> RewriteRule {
        RewriteRule {
            id: id.to_string(),
            target: target.to_string(),
            replacement: "x".to_string(),
            match_mode: None,
            verify: None,
        }
    }

    #[test]
    fn test_valid_config() {
        let config = RewriteConfig {
            rewrites: vec![rule("a", "Hello")],
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_empty_rewrite_list_is_valid() {
        assert!(RewriteConfig::default().validate().is_ok());
    }

    #[test]
    fn test_all_issues_reported() {
        let mut long = rule("long", "t");
        long.replacement = "a".repeat(MAX_CONSTANT_LEN + 1);
        let config = RewriteConfig {
            rewrites: vec![rule("", "t"), rule("dup", ""), rule("dup", "t"), long],
            sandbox: SandboxSettings {
                redirect_to: Some(" ".to_string()),
                max_instructions: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert_eq!(err.issues.len(), 6, "{err}");
        assert!(err
            .issues
            .contains(&ValidationIssue::DuplicateId("dup".to_string())));
    }

    #[test]
    fn test_call_depth_is_capped() {
        let at_limit = RewriteConfig {
            sandbox: SandboxSettings {
                max_call_depth: Some(MAX_CALL_DEPTH_LIMIT),
                ..Default::default()
            },
            ..Default::default()
        };
        assert!(at_limit.validate().is_ok());

        let over = RewriteConfig {
            sandbox: SandboxSettings {
                max_call_depth: Some(MAX_CALL_DEPTH_LIMIT + 1),
                max_heap_elements: Some(0),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = over.validate().unwrap_err();
        assert_eq!(err.issues.len(), 2, "{err}");
        assert!(err.to_string().contains("sandbox.max_call_depth"));
    }

    #[test]
    fn test_bad_hash_rejected() {
        let mut bad = rule("h", "t");
        bad.verify = Some(Verify::Hash {
            algorithm: None,
            expected: "not-hex".to_string(),
        });
        let config = RewriteConfig {
            rewrites: vec![bad],
            ..Default::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(parse_hash("0xff"), Some(255));
        assert_eq!(parse_hash("FF"), Some(255));
    }

    #[test]
    fn test_executor_settings_overlay() {
        let sandbox = SandboxSettings {
            redirect_to: Some("demo/Capture".to_string()),
            match_mode: Some(MatchMode::Exact),
            timeout_ms: Some(250),
            ..Default::default()
        };
        let settings = sandbox.executor_settings();
        assert_eq!(settings.redirect_from, "java/lang/System");
        assert_eq!(settings.redirect_to, "demo/Capture");
        assert_eq!(settings.match_mode, MatchMode::Exact);
        assert_eq!(settings.limits.timeout, Some(Duration::from_millis(250)));
        assert_eq!(settings.limits.max_call_depth, 512);
        assert_eq!(
            settings.limits.max_heap_elements,
            ExecutionLimits::default().max_heap_elements
        );
        assert_eq!(sandbox.entry_point(), "main");
    }
}
