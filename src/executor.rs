//! Patch, load, run, and collect output in one call.

use crate::constant_pool::{patch_utf8_constant_with, MatchMode, PatchError};
use crate::runtime::interp::ExecutionLimits;
use crate::runtime::loader::{define_from_bytes, LinkageError, ENTRY_DESCRIPTORS};
use crate::runtime::resolver::{HostResolver, Resolver, SYSTEM_CLASS};
use crate::sandbox::{CaptureBuffer, SandboxResolver, SANDBOX_FACILITY};
use log::{info, warn};
use std::sync::{Arc, Mutex};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorSettings {
    /// Class name whose references are redirected
    pub redirect_from: String,
    /// Facility class the references are rewritten to
    pub redirect_to: String,
    pub match_mode: MatchMode,
    pub limits: ExecutionLimits,
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self {
            redirect_from: SYSTEM_CLASS.to_string(),
            redirect_to: SANDBOX_FACILITY.to_string(),
            match_mode: MatchMode::default(),
            limits: ExecutionLimits::default(),
        }
    }
}

/// Failures that prevent a class from running at all. Anything the class
/// throws once running ends up in the captured text instead.
#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("Failed to patch class bytes: {0}")]
    Patch(#[from] PatchError),

    #[error("Failed to load class: {0}")]
    Linkage(#[from] LinkageError),
}

/// Runs untrusted class bytes with console output redirected into a
/// private buffer.
///
/// Calls to [`Executor::execute`] on one executor are serialized; separate
/// executors share nothing.
pub struct Executor {
    settings: ExecutorSettings,
    capture: CaptureBuffer,
    parent: Arc<dyn Resolver>,
    gate: Mutex<()>,
}

impl Default for Executor {
    fn default() -> Self {
        Self::new(ExecutorSettings::default())
    }
}

impl Executor {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self::with_parent(settings, Arc::new(HostResolver::new()))
    }

    /// Use `parent` as the standard library seen by loaded classes.
    pub fn with_parent(settings: ExecutorSettings, parent: Arc<dyn Resolver>) -> Self {
        Self {
            settings,
            capture: CaptureBuffer::new(),
            parent,
            gate: Mutex::new(()),
        }
    }

    pub fn settings(&self) -> &ExecutorSettings {
        &self.settings
    }

    pub fn capture(&self) -> &CaptureBuffer {
        &self.capture
    }

    /// Redirect console references in `class_bytes`, load the result, call
    /// `entry_point`, and return everything it printed.
    pub fn execute(&self, class_bytes: Vec<u8>, entry_point: &str) -> Result<String, ExecuteError> {
        let _gate = self.gate.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        self.capture.clear();

        let patched = patch_utf8_constant_with(
            class_bytes,
            &self.settings.redirect_from,
            &self.settings.redirect_to,
            self.settings.match_mode,
        )?;
        if !patched.is_replaced() {
            info!(
                "No reference to {} found; running class unmodified",
                self.settings.redirect_from
            );
        }

        let resolver = Arc::new(SandboxResolver::new(
            self.settings.redirect_to.clone(),
            &self.capture,
            Arc::clone(&self.parent),
        ));
        let unit = define_from_bytes(patched.bytes(), resolver)?;

        match unit.entry_point(entry_point) {
            Some(entry) => {
                if let Err(failure) = entry.invoke(&self.settings.limits) {
                    warn!("{}.{} failed: {}", unit.name(), entry_point, failure);
                    self.capture.write_err(&failure.render());
                }
            }
            None => {
                warn!("{} has no entry point {}", unit.name(), entry_point);
                let descriptor = ENTRY_DESCRIPTORS[0];
                self.capture.write_err(&format!(
                    "java.lang.NoSuchMethodException: {}.{}({})\n",
                    unit.name(),
                    entry_point,
                    &descriptor[1..descriptor.len() - 2].replace('/', ".")
                ));
            }
        }

        Ok(self.capture.read_all())
    }
}
