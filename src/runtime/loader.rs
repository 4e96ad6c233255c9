//! Defining a class from raw bytes and invoking its entry points.

use crate::class_file::{ClassFile, ClassFormatError, Method};
use crate::descriptor::MethodDescriptor;
use crate::runtime::interp::{ExecutionLimits, InvocationFailure, Interpreter};
use crate::runtime::resolver::Resolver;
use crate::runtime::value::Value;
use log::{debug, info};
use std::sync::Arc;
use thiserror::Error;

/// Descriptors accepted for an entry point, in lookup order.
pub const ENTRY_DESCRIPTORS: &[&str] = &["([Ljava/lang/String;)V", "()V"];

#[derive(Error, Debug)]
pub enum LinkageError {
    #[error("Class format error: {0}")]
    Format(#[from] ClassFormatError),

    #[error("Superclass {superclass} of {class} cannot be resolved")]
    UnresolvedSuperclass { class: String, superclass: String },

    #[error("Method {class}.{method}{descriptor} has no Code attribute")]
    MissingCode {
        class: String,
        method: String,
        descriptor: String,
    },

    #[error("Method {class}.{method} has a malformed descriptor {descriptor:?}")]
    BadDescriptor {
        class: String,
        method: String,
        descriptor: String,
    },
}

/// A class defined from bytes, linked against a parent resolver.
///
/// The unit is never registered anywhere: dropping it unloads it.
pub struct LoadedUnit {
    class: ClassFile,
    parent: Arc<dyn Resolver>,
}

impl std::fmt::Debug for LoadedUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedUnit")
            .field("class", &self.class.this_class)
            .finish_non_exhaustive()
    }
}

/// Parse, verify, and link `bytes` as a class whose unresolved symbols
/// are looked up in `parent`.
pub fn define_from_bytes(
    bytes: &[u8],
    parent: Arc<dyn Resolver>,
) -> Result<LoadedUnit, LinkageError> {
    let class = ClassFile::parse(bytes)?;

    if let Some(superclass) = &class.super_class {
        if !parent.knows_class(superclass) {
            return Err(LinkageError::UnresolvedSuperclass {
                class: class.binary_name(),
                superclass: superclass.replace('/', "."),
            });
        }
    }

    for method in &class.methods {
        if method.code.is_none() && method.needs_code() {
            return Err(LinkageError::MissingCode {
                class: class.binary_name(),
                method: method.name.clone(),
                descriptor: method.descriptor.clone(),
            });
        }
        if method.descriptor.parse::<MethodDescriptor>().is_err() {
            return Err(LinkageError::BadDescriptor {
                class: class.binary_name(),
                method: method.name.clone(),
                descriptor: method.descriptor.clone(),
            });
        }
    }

    info!(
        "Defined {} ({} methods, class file version {}.{})",
        class.binary_name(),
        class.methods.len(),
        class.major_version,
        class.minor_version
    );
    Ok(LoadedUnit { class, parent })
}

impl LoadedUnit {
    /// Binary name, e.g. `com.example.Hello`.
    pub fn name(&self) -> String {
        self.class.binary_name()
    }

    pub fn class_file(&self) -> &ClassFile {
        &self.class
    }

    /// Look up a public static method usable as an entry point.
    /// Private and package-private methods are not entry points, even when
    /// static.
    pub fn entry_point(&self, name: &str) -> Option<EntryPoint<'_>> {
        ENTRY_DESCRIPTORS.iter().find_map(|descriptor| {
            self.class
                .find_method(name, descriptor)
                .filter(|m| m.is_public() && m.is_static())
                .map(|method| EntryPoint { unit: self, method })
        })
    }
}

/// A typed handle to an invocable static method of a [`LoadedUnit`].
#[derive(Debug, Clone, Copy)]
pub struct EntryPoint<'u> {
    unit: &'u LoadedUnit,
    method: &'u Method,
}

impl<'u> EntryPoint<'u> {
    pub fn name(&self) -> &str {
        &self.method.name
    }

    pub fn descriptor(&self) -> &str {
        &self.method.descriptor
    }

    /// Run static initialisation and then the method. A `String[]`
    /// parameter receives a one-element array holding `null`.
    pub fn invoke(&self, limits: &ExecutionLimits) -> Result<(), InvocationFailure> {
        let mut interp = Interpreter::new(&self.unit.class, self.unit.parent.as_ref(), *limits);
        interp.initialize()?;

        let args = if self.method.descriptor.starts_with("()") {
            Vec::new()
        } else {
            vec![Value::new_array("Ljava/lang/String;", vec![Value::Null])]
        };
        let result = interp.run(self.method, args).map(|_| ());
        debug!(
            "{}.{} finished after {} instructions",
            self.unit.name(),
            self.method.name,
            interp.instructions_executed()
        );
        result
    }
}
