//! Class Patcher: constant-pool rewriting for JVM class files
//!
//! Rewrites UTF-8 constants inside compiled class files and runs the result
//! in an embedded bytecode host whose console output is captured.
//!
//! # Architecture
//!
//! Every modification compiles down to one primitive: [`codec::splice_replace`],
//! a checked byte-range replacement. [`constant_pool`] decides *where* to
//! splice; nothing else writes to class bytes.
//!
//! Execution goes through [`Executor`]: references to `java/lang/System`
//! are patched to name a facility class, the bytes are defined with
//! [`runtime::define_from_bytes`], and the facility's `out`/`err` write into
//! the executor's [`CaptureBuffer`].
//!
//! # Example
//!
//! ```no_run
//! use class_patcher::Executor;
//!
//! let bytes = std::fs::read("Hello.class").unwrap();
//! let executor = Executor::default();
//! match executor.execute(bytes, "main") {
//!     Ok(output) => print!("{output}"),
//!     Err(e) => eprintln!("Could not run class: {e}"),
//! }
//! ```

pub mod class_file;
pub mod codec;
pub mod config;
pub mod constant_pool;
pub mod descriptor;
pub mod executor;
pub mod persist;
pub mod runtime;
pub mod sandbox;

// Re-exports
pub use class_file::{ClassFile, ClassFormatError};
pub use codec::CodecError;
pub use config::{apply_rewrites, load_from_path, load_from_str, ApplyError, ConfigError, RewriteConfig, RewriteResult};
pub use constant_pool::{
    entries, find_utf8, patch_utf8_constant, patch_utf8_constant_with, ConstantPoolEntry,
    MatchMode, PatchError, Patched, Tag,
};
pub use executor::{ExecuteError, Executor, ExecutorSettings};
pub use runtime::{
    define_from_bytes, EntryPoint, ExecutionLimits, HostResolver, InvocationFailure,
    LinkageError, LoadedUnit, Resolver,
};
pub use sandbox::{CaptureBuffer, SandboxResolver, SANDBOX_FACILITY};
