//! Embedded execution of loaded classes.
//!
//! Classes are interpreted rather than handed to a JVM, so a loaded unit
//! only sees the classes its [`Resolver`] chain provides.

pub mod host;
pub mod interp;
pub mod loader;
pub mod resolver;
pub mod value;

pub use host::{Console, PrintStream, Sink, LINE_SEPARATOR};
pub use interp::{ExecutionLimits, InvocationFailure, TraceFrame};
pub use loader::{define_from_bytes, EntryPoint, LinkageError, LoadedUnit};
pub use resolver::{HostResolver, JavaException, Resolver, SYSTEM_CLASS};
pub use value::Value;
