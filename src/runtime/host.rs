//! Host objects: print streams, string builders, strings and throwables.
//!
//! Hosted bytecode never sees a real object model. Instance calls on these
//! few library types are dispatched here by receiver kind.

use crate::descriptor::{FieldType, MethodDescriptor};
use crate::runtime::resolver::JavaException;
use crate::runtime::value::Value;
use std::fmt;
use std::io::Write;
use std::sync::Arc;

pub const LINE_SEPARATOR: &str = "\n";

/// Destination of a [`PrintStream`].
pub trait Sink: Send + Sync {
    fn write_text(&self, text: &str);
}

/// The real process console.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Console {
    Stdout,
    Stderr,
}

impl Sink for Console {
    fn write_text(&self, text: &str) {
        let result = match self {
            Console::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(text.as_bytes()).and_then(|_| out.flush())
            }
            Console::Stderr => std::io::stderr().lock().write_all(text.as_bytes()),
        };
        if let Err(e) = result {
            log::warn!("console write failed: {e}");
        }
    }
}

/// `java.io.PrintStream` bound to a sink.
#[derive(Clone)]
pub struct PrintStream {
    sink: Arc<dyn Sink>,
}

impl PrintStream {
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self { sink }
    }

    pub fn print(&self, text: &str) {
        self.sink.write_text(text);
    }

    pub fn println(&self, text: &str) {
        let mut line = String::with_capacity(text.len() + LINE_SEPARATOR.len());
        line.push_str(text);
        line.push_str(LINE_SEPARATOR);
        self.sink.write_text(&line);
    }

    pub(crate) fn address(&self) -> usize {
        Arc::as_ptr(&self.sink) as *const () as usize
    }

    pub(crate) fn same_stream(&self, other: &PrintStream) -> bool {
        self.address() == other.address()
    }
}

impl fmt::Debug for PrintStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrintStream@{:x}", self.address())
    }
}

/// `String.valueOf` for an argument declared as `ty`.
pub(crate) fn stringify(value: &Value, ty: &FieldType) -> String {
    match (ty, value) {
        (FieldType::Char, Value::Int(c)) => char::from_u32(u32::from(*c as u16))
            .unwrap_or(char::REPLACEMENT_CHARACTER)
            .to_string(),
        (FieldType::Boolean, Value::Int(b)) => (*b != 0).to_string(),
        (FieldType::Array(inner), Value::Array(array)) if **inner == FieldType::Char => {
            let units: Vec<u16> = array
                .borrow()
                .items
                .iter()
                .map(|v| match v {
                    Value::Int(c) => *c as u16,
                    _ => 0,
                })
                .collect();
            String::from_utf16_lossy(&units)
        }
        _ => value.to_string(),
    }
}

fn no_such_method(class: &str, name: &str, descriptor: &str) -> JavaException {
    JavaException::new(
        "java.lang.NoSuchMethodError",
        format!("{}.{}{}", class.replace('/', "."), name, descriptor),
    )
}

fn java_string_hash(s: &str) -> i32 {
    s.encode_utf16()
        .fold(0i32, |h, unit| h.wrapping_mul(31).wrapping_add(i32::from(unit)))
}

/// Dispatch an instance call on a host object.
///
/// Returns `None` for `void` methods.
pub fn invoke_virtual(
    receiver: &Value,
    class: &str,
    name: &str,
    descriptor: &str,
    args: &[Value],
) -> Result<Option<Value>, JavaException> {
    let parsed: MethodDescriptor = descriptor
        .parse()
        .map_err(|_| no_such_method(class, name, descriptor))?;
    let arg_text = || match (parsed.params.first(), args.first()) {
        (Some(ty), Some(value)) => stringify(value, ty),
        _ => String::new(),
    };

    match (receiver, name) {
        (Value::Null, _) => Err(JavaException::new(
            "java.lang.NullPointerException",
            format!(
                "Cannot invoke \"{}.{}()\" because value is null",
                class.replace('/', "."),
                name
            ),
        )),

        (Value::Stream(stream), "println") => {
            stream.println(&arg_text());
            Ok(None)
        }
        (Value::Stream(stream), "print") => {
            stream.print(&arg_text());
            Ok(None)
        }
        (Value::Stream(stream), "write") if descriptor == "(I)V" => {
            let byte = match args.first() {
                Some(Value::Int(b)) => *b as u8,
                _ => 0,
            };
            stream.print(&String::from_utf8_lossy(&[byte]));
            Ok(None)
        }
        (Value::Stream(_), "flush") => Ok(None),

        (Value::Builder(buf), "append") => {
            buf.borrow_mut().push_str(&arg_text());
            Ok(Some(receiver.clone()))
        }
        (Value::Builder(buf), "length") => {
            Ok(Some(Value::Int(buf.borrow().encode_utf16().count() as i32)))
        }
        (Value::Builder(buf), "reverse") => {
            let reversed: String = buf.borrow().chars().rev().collect();
            *buf.borrow_mut() = reversed;
            Ok(Some(receiver.clone()))
        }
        (Value::Builder(buf), "toString") => Ok(Some(Value::string(&buf.borrow()))),

        (Value::Str(s), "length") => Ok(Some(Value::Int(s.encode_utf16().count() as i32))),
        (Value::Str(s), "isEmpty") => Ok(Some(Value::Int(i32::from(s.is_empty())))),
        (Value::Str(s), "charAt") => {
            let index = match args.first() {
                Some(Value::Int(i)) => *i,
                _ => -1,
            };
            let unit = usize::try_from(index)
                .ok()
                .and_then(|i| s.encode_utf16().nth(i));
            match unit {
                Some(unit) => Ok(Some(Value::Int(i32::from(unit)))),
                None => Err(JavaException::new(
                    "java.lang.StringIndexOutOfBoundsException",
                    format!(
                        "index {index}, length {}",
                        s.encode_utf16().count()
                    ),
                )),
            }
        }
        (Value::Str(s), "equals") => {
            let equal = matches!(args.first(), Some(Value::Str(other)) if **other == **s);
            Ok(Some(Value::Int(i32::from(equal))))
        }
        (Value::Str(s), "equalsIgnoreCase") => {
            let equal = matches!(
                args.first(),
                Some(Value::Str(other)) if crate::constant_pool::MatchMode::CaseInsensitive.matches(s, other)
            );
            Ok(Some(Value::Int(i32::from(equal))))
        }
        (Value::Str(s), "concat") => Ok(Some(Value::string(&format!("{s}{}", arg_text())))),
        (Value::Str(s), "toUpperCase") => Ok(Some(Value::string(&s.to_uppercase()))),
        (Value::Str(s), "toLowerCase") => Ok(Some(Value::string(&s.to_lowercase()))),
        (Value::Str(s), "trim") => Ok(Some(Value::string(s.trim()))),
        (Value::Str(s), "hashCode") => Ok(Some(Value::Int(java_string_hash(s)))),
        (Value::Str(_), "toString") => Ok(Some(receiver.clone())),

        (Value::Throwable(t), "getMessage") => Ok(Some(
            t.borrow()
                .message
                .as_deref()
                .map(Value::string)
                .unwrap_or(Value::Null),
        )),

        (_, "toString") if descriptor == "()Ljava/lang/String;" => {
            Ok(Some(Value::string(&receiver.to_string())))
        }
        (_, "hashCode") if descriptor == "()I" => Ok(Some(Value::Int(receiver.identity_hash()))),
        (_, "equals") if descriptor == "(Ljava/lang/Object;)Z" => {
            let same = args.first().is_some_and(|other| receiver.same_reference(other));
            Ok(Some(Value::Int(i32::from(same))))
        }

        _ => Err(no_such_method(class, name, descriptor)),
    }
}

/// Run a constructor on a freshly allocated host object.
pub fn invoke_special(
    receiver: &Value,
    class: &str,
    name: &str,
    descriptor: &str,
    args: &[Value],
) -> Result<(), JavaException> {
    if name != "<init>" {
        return Err(no_such_method(class, name, descriptor));
    }
    match (receiver, descriptor) {
        (_, "()V") => Ok(()),
        (Value::Builder(buf), "(Ljava/lang/String;)V" | "(Ljava/lang/CharSequence;)V") => {
            match args.first() {
                Some(Value::Null) | None => Err(JavaException::new(
                    "java.lang.NullPointerException",
                    "StringBuilder initial value is null",
                )),
                Some(value) => {
                    buf.borrow_mut().push_str(&value.to_string());
                    Ok(())
                }
            }
        }
        (Value::Builder(_), "(I)V") => Ok(()),
        (
            Value::Throwable(t),
            "(Ljava/lang/String;)V" | "(Ljava/lang/String;Ljava/lang/Throwable;)V",
        ) => {
            t.borrow_mut().message = match args.first() {
                Some(Value::Str(s)) => Some(s.to_string()),
                _ => None,
            };
            Ok(())
        }
        _ => Err(no_such_method(class, name, descriptor)),
    }
}
