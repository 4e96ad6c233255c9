//! Reading rewrite plans from TOML.
//!
//! Parse errors carry a [`PlanLocation`] naming the line and the table it
//! sits in (`[sandbox]`, or a `[[rewrites]]` entry by id), so a bad key in
//! a long plan can be found without counting brackets.

use crate::config::schema::{RewriteConfig, ValidationError};
use log::debug;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read rewrite plan {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("rewrite plan{} is not valid at {location}: {message}", in_file(.path))]
    Toml {
        path: Option<PathBuf>,
        location: PlanLocation,
        message: String,
        #[source]
        source: toml_edit::de::Error,
    },

    #[error("rewrite plan{} has {} problem(s):\n{source}", in_file(.path), .source.issues.len())]
    Validation {
        path: Option<PathBuf>,
        #[source]
        source: ValidationError,
    },
}

fn in_file(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map(|p| format!(" {}", p.display()))
        .unwrap_or_default()
}

/// The table a plan line belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanSection {
    TopLevel,
    Table(String),
    /// One `[[rewrites]]` entry, 1-based, with its id once one was seen
    Rewrite { ordinal: usize, id: Option<String> },
}

impl fmt::Display for PlanSection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlanSection::TopLevel => f.write_str("top level"),
            PlanSection::Table(name) => write!(f, "[{name}]"),
            PlanSection::Rewrite { id: Some(id), .. } => write!(f, "rewrite '{id}'"),
            PlanSection::Rewrite { ordinal, id: None } => write!(f, "rewrite #{ordinal}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanLocation {
    /// 1-based; 0 when the parser reported no position
    pub line: usize,
    pub section: PlanSection,
}

impl PlanLocation {
    /// Locate byte `offset` of `input`.
    fn at(input: &str, offset: Option<usize>) -> Self {
        let Some(offset) = offset else {
            return Self {
                line: 0,
                section: PlanSection::TopLevel,
            };
        };
        let end = offset.min(input.len());
        let before = input.get(..end).unwrap_or(input);
        let line = before.matches('\n').count() + 1;

        let mut section = PlanSection::TopLevel;
        let mut rewrites = 0;
        // Scan through the end of the offending line so an id written on
        // it still names the entry.
        let through = input
            .get(end..)
            .and_then(|rest| rest.find('\n'))
            .map_or(input.len(), |n| end + n);
        for text in input.get(..through).unwrap_or(input).lines() {
            let text = text.trim();
            if text.starts_with('[') {
                let name = text.trim_matches(|c| c == '[' || c == ']').trim();
                section = if text.starts_with("[[") && name == "rewrites" {
                    rewrites += 1;
                    PlanSection::Rewrite {
                        ordinal: rewrites,
                        id: None,
                    }
                } else {
                    PlanSection::Table(name.to_string())
                };
            } else if let PlanSection::Rewrite { id, .. } = &mut section {
                if id.is_none() {
                    *id = quoted_value(text, "id");
                }
            }
        }
        Self { line, section }
    }
}

impl fmt::Display for PlanLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.line == 0 {
            write!(f, "{}", self.section)
        } else {
            write!(f, "line {} ({})", self.line, self.section)
        }
    }
}

/// The string value of `key = "..."` on one line.
fn quoted_value(line: &str, key: &str) -> Option<String> {
    let (name, value) = line.split_once('=')?;
    if name.trim() != key {
        return None;
    }
    let value = value.trim();
    let value = value.strip_prefix('"')?;
    value.split_once('"').map(|(inner, _)| inner.to_string())
}

fn parse_plan(input: &str, path: Option<&Path>) -> Result<RewriteConfig, ConfigError> {
    let config: RewriteConfig = toml_edit::de::from_str(input).map_err(|source| {
        let location = PlanLocation::at(input, source.span().map(|span| span.start));
        ConfigError::Toml {
            path: path.map(Path::to_path_buf),
            location,
            message: source.message().to_string(),
            source,
        }
    })?;
    config.validate().map_err(|source| ConfigError::Validation {
        path: path.map(Path::to_path_buf),
        source,
    })?;
    debug!(
        "Loaded rewrite plan {:?} with {} rewrites",
        config.meta.name,
        config.rewrites.len()
    );
    Ok(config)
}

pub fn load_from_str(input: &str) -> Result<RewriteConfig, ConfigError> {
    parse_plan(input, None)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<RewriteConfig, ConfigError> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_plan(&contents, Some(path))
}
