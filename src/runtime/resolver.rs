//! Name resolution for symbols a loaded class does not define itself.
//!
//! A [`LoadedUnit`](crate::runtime::LoadedUnit) resolves its own static
//! methods and fields; everything else goes to the [`Resolver`] it was
//! linked against. [`HostResolver`] is the root of that chain and models
//! the handful of standard-library classes console programs touch.

use crate::descriptor::MethodDescriptor;
use crate::runtime::host::{stringify, Console, PrintStream, Sink, LINE_SEPARATOR};
use crate::runtime::value::{Throwable, Value};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

pub const SYSTEM_CLASS: &str = "java/lang/System";

/// An exception raised by host code, before a stack trace is attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JavaException {
    /// Binary name, e.g. `java.lang.ArithmeticException`
    pub class_name: String,
    pub message: Option<String>,
}

impl JavaException {
    pub fn new(class_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: Some(message.into()),
        }
    }

    pub fn bare(class_name: impl Into<String>) -> Self {
        Self {
            class_name: class_name.into(),
            message: None,
        }
    }
}

impl fmt::Display for JavaException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "{}: {}", self.class_name, message),
            None => f.write_str(&self.class_name),
        }
    }
}

/// Fallback resolution for classes outside the loaded unit.
///
/// Every method returns `None` when the resolver does not know the
/// symbol; the interpreter turns that into the matching linkage error.
pub trait Resolver: Send + Sync {
    fn get_static(&self, class: &str, name: &str, descriptor: &str) -> Option<Value>;

    /// Invoke a static method. The inner `Option` is `None` for `void`.
    fn invoke_static(
        &self,
        class: &str,
        name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> Option<Result<Option<Value>, JavaException>>;

    /// Allocate an uninitialised instance of a host class.
    fn new_instance(&self, class: &str) -> Option<Value>;

    fn knows_class(&self, class: &str) -> bool;
}

const THROWABLE_CLASSES: &[&str] = &[
    "java/lang/Throwable",
    "java/lang/Exception",
    "java/lang/RuntimeException",
    "java/lang/Error",
    "java/lang/IllegalArgumentException",
    "java/lang/IllegalStateException",
    "java/lang/UnsupportedOperationException",
    "java/lang/ArithmeticException",
    "java/lang/NullPointerException",
    "java/lang/ArrayIndexOutOfBoundsException",
];

const LIBRARY_CLASSES: &[&str] = &[
    "java/lang/Object",
    "java/lang/String",
    "java/lang/StringBuilder",
    "java/lang/System",
    "java/lang/Integer",
    "java/lang/Long",
    "java/lang/Math",
    "java/io/PrintStream",
];

/// The standard library as seen by hosted code.
///
/// `System.out` and `System.err` write to the real console unless other
/// sinks are supplied.
pub struct HostResolver {
    out: PrintStream,
    err: PrintStream,
    started: Instant,
}

impl Default for HostResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl HostResolver {
    pub fn new() -> Self {
        Self::with_console(Arc::new(Console::Stdout), Arc::new(Console::Stderr))
    }

    /// Route `System.out`/`System.err` to the given sinks.
    pub fn with_console(out: Arc<dyn Sink>, err: Arc<dyn Sink>) -> Self {
        Self {
            out: PrintStream::new(out),
            err: PrintStream::new(err),
            started: Instant::now(),
        }
    }

    fn system(
        &self,
        name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> Option<Result<Option<Value>, JavaException>> {
        let result = match (name, descriptor) {
            ("currentTimeMillis", "()J") => {
                let millis = SystemTime::now()
                    .duration_since(UNIX_EPOCH)
                    .map(|d| d.as_millis() as i64)
                    .unwrap_or(0);
                Ok(Some(Value::Long(millis)))
            }
            ("nanoTime", "()J") => Ok(Some(Value::Long(self.started.elapsed().as_nanos() as i64))),
            ("identityHashCode", "(Ljava/lang/Object;)I") => Ok(Some(Value::Int(
                args.first().map(Value::identity_hash).unwrap_or(0),
            ))),
            ("lineSeparator", "()Ljava/lang/String;") => Ok(Some(Value::string(LINE_SEPARATOR))),
            ("arraycopy", "(Ljava/lang/Object;ILjava/lang/Object;II)V") => {
                arraycopy(args).map(|_| None)
            }
            ("exit", "(I)V") => Err(JavaException::new(
                "java.lang.SecurityException",
                format!("System.exit({}) is not permitted", args.first().cloned().unwrap_or_default()),
            )),
            _ => return None,
        };
        Some(result)
    }
}

fn arraycopy(args: &[Value]) -> Result<(), JavaException> {
    let [src, Value::Int(src_pos), dest, Value::Int(dest_pos), Value::Int(length)] = args else {
        return Err(JavaException::bare("java.lang.IllegalArgumentException"));
    };
    let (Value::Array(src), Value::Array(dest)) = (src, dest) else {
        if src.is_null() || dest.is_null() {
            return Err(JavaException::bare("java.lang.NullPointerException"));
        }
        return Err(JavaException::new(
            "java.lang.ArrayStoreException",
            "arraycopy: argument is not an array",
        ));
    };

    let out_of_bounds = || {
        JavaException::new(
            "java.lang.ArrayIndexOutOfBoundsException",
            format!(
                "arraycopy: last source index {} out of bounds",
                src_pos.wrapping_add(*length)
            ),
        )
    };
    let (Ok(src_pos), Ok(dest_pos), Ok(length)) = (
        usize::try_from(*src_pos),
        usize::try_from(*dest_pos),
        usize::try_from(*length),
    ) else {
        return Err(out_of_bounds());
    };

    let copied: Vec<Value> = {
        let src = src.borrow();
        src.items
            .get(src_pos..src_pos + length)
            .ok_or_else(out_of_bounds)?
            .to_vec()
    };
    let mut dest = dest.borrow_mut();
    let target = dest
        .items
        .get_mut(dest_pos..dest_pos + length)
        .ok_or_else(out_of_bounds)?;
    target.clone_from_slice(&copied);
    Ok(())
}

fn math(name: &str, args: &[Value]) -> Option<Value> {
    Some(match (name, args) {
        ("abs", [Value::Int(a)]) => Value::Int(a.wrapping_abs()),
        ("abs", [Value::Long(a)]) => Value::Long(a.wrapping_abs()),
        ("abs", [Value::Double(a)]) => Value::Double(a.abs()),
        ("max", [Value::Int(a), Value::Int(b)]) => Value::Int(*a.max(b)),
        ("min", [Value::Int(a), Value::Int(b)]) => Value::Int(*a.min(b)),
        ("max", [Value::Long(a), Value::Long(b)]) => Value::Long(*a.max(b)),
        ("min", [Value::Long(a), Value::Long(b)]) => Value::Long(*a.min(b)),
        ("sqrt", [Value::Double(a)]) => Value::Double(a.sqrt()),
        ("pow", [Value::Double(a), Value::Double(b)]) => Value::Double(a.powf(*b)),
        _ => return None,
    })
}

impl Resolver for HostResolver {
    fn get_static(&self, class: &str, name: &str, descriptor: &str) -> Option<Value> {
        match (class, name, descriptor) {
            (SYSTEM_CLASS, "out", "Ljava/io/PrintStream;") => Some(Value::Stream(self.out.clone())),
            (SYSTEM_CLASS, "err", "Ljava/io/PrintStream;") => Some(Value::Stream(self.err.clone())),
            ("java/lang/Integer", "MAX_VALUE", "I") => Some(Value::Int(i32::MAX)),
            ("java/lang/Integer", "MIN_VALUE", "I") => Some(Value::Int(i32::MIN)),
            ("java/lang/Long", "MAX_VALUE", "J") => Some(Value::Long(i64::MAX)),
            ("java/lang/Long", "MIN_VALUE", "J") => Some(Value::Long(i64::MIN)),
            _ => None,
        }
    }

    fn invoke_static(
        &self,
        class: &str,
        name: &str,
        descriptor: &str,
        args: &[Value],
    ) -> Option<Result<Option<Value>, JavaException>> {
        match class {
            SYSTEM_CLASS => self.system(name, descriptor, args),
            "java/lang/String" if name == "valueOf" => {
                let parsed: MethodDescriptor = descriptor.parse().ok()?;
                let text = match (parsed.params.first(), args.first()) {
                    (Some(ty), Some(value)) => stringify(value, ty),
                    _ => return None,
                };
                Some(Ok(Some(Value::string(&text))))
            }
            "java/lang/Integer" => match (name, args) {
                ("parseInt", [Value::Str(s)]) => Some(
                    s.parse::<i32>()
                        .map(|v| Some(Value::Int(v)))
                        .map_err(|_| {
                            JavaException::new(
                                "java.lang.NumberFormatException",
                                format!("For input string: \"{s}\""),
                            )
                        }),
                ),
                ("toString", [Value::Int(v)]) => Some(Ok(Some(Value::string(&v.to_string())))),
                _ => None,
            },
            "java/lang/Math" => math(name, args).map(|v| Ok(Some(v))),
            _ => None,
        }
    }

    fn new_instance(&self, class: &str) -> Option<Value> {
        if class == "java/lang/StringBuilder" {
            return Some(Value::Builder(Rc::new(RefCell::new(String::new()))));
        }
        THROWABLE_CLASSES.contains(&class).then(|| {
            Value::Throwable(Rc::new(RefCell::new(Throwable {
                class_name: class.replace('/', "."),
                message: None,
            })))
        })
    }

    fn knows_class(&self, class: &str) -> bool {
        LIBRARY_CLASSES.contains(&class) || THROWABLE_CLASSES.contains(&class)
    }
}
