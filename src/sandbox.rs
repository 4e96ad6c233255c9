//! Output capture for hosted code.
//!
//! A [`CaptureBuffer`] collects whatever a loaded class prints. The class
//! reaches it through a *facility class*: after patching, references to
//! `java/lang/System` name the facility instead, and [`SandboxResolver`]
//! answers for it by binding `out`/`err` to the buffer and forwarding every
//! other static member to the real `System`.

use crate::runtime::host::{PrintStream, Sink};
use crate::runtime::resolver::{JavaException, Resolver, SYSTEM_CLASS};
use crate::runtime::value::Value;
use log::debug;
use std::sync::{Arc, Mutex, MutexGuard};

/// Default internal name of the facility class.
pub const SANDBOX_FACILITY: &str = "patcher/SandboxSystem";

/// Shared, growable text accumulator.
///
/// Clones are handles onto the same buffer. Writes from `out` and `err`
/// interleave in the order they happen.
#[derive(Clone, Default)]
pub struct CaptureBuffer {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl std::fmt::Debug for CaptureBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureBuffer")
            .field("len", &self.lock().len())
            .finish()
    }
}

struct CaptureSink(CaptureBuffer);

impl Sink for CaptureSink {
    fn write_text(&self, text: &str) {
        self.0.lock().extend_from_slice(text.as_bytes());
    }
}

impl CaptureBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    // A panic while holding the lock leaves the bytes intact, so poisoning
    // is ignored.
    fn lock(&self) -> MutexGuard<'_, Vec<u8>> {
        self.bytes.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Discard everything captured so far.
    pub fn clear(&self) {
        self.lock().clear();
    }

    /// Everything captured since the last clear, decoded lossily.
    pub fn read_all(&self) -> String {
        String::from_utf8_lossy(&self.lock()).into_owned()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// A print stream writing into this buffer.
    pub fn stream(&self) -> PrintStream {
        PrintStream::new(Arc::new(CaptureSink(self.clone())))
    }

    /// Append text to the error channel.
    pub fn write_err(&self, text: &str) {
        self.lock().extend_from_slice(text.as_bytes());
    }
}

/// Resolver that answers for the facility class and delegates the rest.
pub struct SandboxResolver {
    facility: String,
    stream: PrintStream,
    parent: Arc<dyn Resolver>,
}

impl SandboxResolver {
    /// `out` and `err` of `facility` are the same stream, so both land in
    /// `capture`.
    pub fn new(facility: impl Into<String>, capture: &CaptureBuffer, parent: Arc<dyn Resolver>) -> Self {
        Self {
            facility: facility.into(),
            stream: capture.stream(),
            parent,
        }
    }

    pub fn facility(&self) -> &str {
        &self.facility
    }
}

impl Resolver for SandboxResolver {
    fn get_static(&self, class: &str, name: &str, descriptor: &str) -> Option<Value> {
        if class != self.facility {
            return self.parent.get_static(class, name, descriptor);
        }
        match (name, descriptor) {
            ("out" | "err", "Ljava/io/PrintStream;") => Some(Value::Stream(self.stream.clone())),
            _ => {
                debug!("Forwarding {}.{} to {}", self.facility, name, SYSTEM_CLASS);
                self.parent.get_static(SYSTEM_CLASS, name, descriptor)
            }
        }
    }

    fn invoke_static(
        &self,
        class: &str,
        name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> Option<Result<Option<Value>, JavaException>> {
        if class == self.facility {
            debug!("Forwarding {}.{}{} to {}", self.facility, name, descriptor, SYSTEM_CLASS);
            self.parent.invoke_static(SYSTEM_CLASS, name, descriptor, args)
        } else {
            self.parent.invoke_static(class, name, descriptor, args)
        }
    }

    fn new_instance(&self, class: &str) -> Option<Value> {
        self.parent.new_instance(class)
    }

    fn knows_class(&self, class: &str) -> bool {
        class == self.facility || self.parent.knows_class(class)
    }
}
