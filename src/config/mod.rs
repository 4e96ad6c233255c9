pub mod applicator;
pub mod loader;
pub mod schema;

pub use applicator::{apply_rewrites, ApplyError, RewriteResult};
pub use loader::{load_from_path, load_from_str, ConfigError, PlanLocation, PlanSection};
pub use schema::{
    HashAlgorithm, Metadata, RewriteConfig, RewriteRule, SandboxSettings, ValidationError,
    ValidationIssue, Verify,
};
