//! Values on the operand stack and in local variables.

use crate::descriptor::FieldType;
use crate::runtime::host::PrintStream;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

#[derive(Debug, Clone)]
pub struct Array {
    /// Element descriptor, e.g. `Ljava/lang/String;`
    pub element: String,
    pub items: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct Throwable {
    /// Binary name, e.g. `java.lang.RuntimeException`
    pub class_name: String,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub enum Value {
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    #[default]
    Null,
    Str(Rc<str>),
    Array(Rc<RefCell<Array>>),
    Stream(PrintStream),
    Builder(Rc<RefCell<String>>),
    Throwable(Rc<RefCell<Throwable>>),
    /// Unusable slot: upper half of a long/double local, or never written
    Top,
}

impl Value {
    pub fn string(text: &str) -> Value {
        Value::Str(Rc::from(text))
    }

    /// Zero value for a field or array element of type `ty`.
    pub fn default_for(ty: &FieldType) -> Value {
        match ty {
            FieldType::Long => Value::Long(0),
            FieldType::Float => Value::Float(0.0),
            FieldType::Double => Value::Double(0.0),
            FieldType::Object(_) | FieldType::Array(_) => Value::Null,
            _ => Value::Int(0),
        }
    }

    pub fn new_array(element: &str, items: Vec<Value>) -> Value {
        Value::Array(Rc::new(RefCell::new(Array {
            element: element.to_string(),
            items,
        })))
    }

    pub fn is_wide(&self) -> bool {
        matches!(self, Value::Long(_) | Value::Double(_))
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Reference identity as used by `if_acmpeq`.
    pub fn same_reference(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Str(a), Value::Str(b)) => Rc::ptr_eq(a, b),
            (Value::Array(a), Value::Array(b)) => Rc::ptr_eq(a, b),
            (Value::Builder(a), Value::Builder(b)) => Rc::ptr_eq(a, b),
            (Value::Throwable(a), Value::Throwable(b)) => Rc::ptr_eq(a, b),
            (Value::Stream(a), Value::Stream(b)) => a.same_stream(b),
            _ => false,
        }
    }

    /// Binary class name of a reference value.
    pub fn class_name(&self) -> Option<String> {
        Some(match self {
            Value::Str(_) => "java.lang.String".to_string(),
            Value::Array(array) => format!("[{}", array.borrow().element.replace('/', ".")),
            Value::Stream(_) => "java.io.PrintStream".to_string(),
            Value::Builder(_) => "java.lang.StringBuilder".to_string(),
            Value::Throwable(t) => t.borrow().class_name.clone(),
            _ => return None,
        })
    }

    /// Stable per-object hash, as `System.identityHashCode` reports it.
    pub fn identity_hash(&self) -> i32 {
        let addr = match self {
            Value::Str(s) => Rc::as_ptr(s) as *const u8 as usize,
            Value::Array(a) => Rc::as_ptr(a) as usize,
            Value::Builder(b) => Rc::as_ptr(b) as usize,
            Value::Throwable(t) => Rc::as_ptr(t) as usize,
            Value::Stream(s) => s.address(),
            _ => 0,
        };
        (xxhash_rust::xxh3::xxh3_64(&addr.to_le_bytes()) & 0x7FFF_FFFF) as i32
    }
}

/// `Double.toString`: shortest round-trip digits, plain between 1e-3 and
/// 1e7 and `d.dddE±n` outside that range.
pub fn java_double(v: f64) -> String {
    if !v.is_finite() {
        return non_finite(v.is_nan(), v > 0.0);
    }
    let magnitude = v.abs();
    java_decimal(
        v != 0.0 && !(1e-3..1e7).contains(&magnitude),
        format!("{v}"),
        format!("{v:e}"),
    )
}

/// `Float.toString`, formatted from the `f32` digits so `0.1f` stays `0.1`.
pub fn java_float(v: f32) -> String {
    if !v.is_finite() {
        return non_finite(v.is_nan(), v > 0.0);
    }
    let magnitude = v.abs();
    java_decimal(
        v != 0.0 && !(1e-3..1e7).contains(&magnitude),
        format!("{v}"),
        format!("{v:e}"),
    )
}

fn non_finite(nan: bool, positive: bool) -> String {
    match (nan, positive) {
        (true, _) => "NaN",
        (false, true) => "Infinity",
        (false, false) => "-Infinity",
    }
    .to_string()
}

/// Rust's shortest forms (`{}` and `{:e}`) rewritten in Java's shape:
/// at least one fractional digit and an upper-case `E`.
fn java_decimal(scientific: bool, plain: String, exponent_form: String) -> String {
    if !scientific {
        return if plain.contains('.') {
            plain
        } else {
            plain + ".0"
        };
    }
    let (mantissa, exponent) = exponent_form
        .split_once('e')
        .unwrap_or((exponent_form.as_str(), "0"));
    if mantissa.contains('.') {
        format!("{mantissa}E{exponent}")
    } else {
        format!("{mantissa}.0E{exponent}")
    }
}

impl fmt::Display for Value {
    /// `String.valueOf` rendering.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Int(v) => write!(f, "{v}"),
            Value::Long(v) => write!(f, "{v}"),
            Value::Float(v) => f.write_str(&java_float(*v)),
            Value::Double(v) => f.write_str(&java_double(*v)),
            Value::Null | Value::Top => f.write_str("null"),
            Value::Str(s) => f.write_str(s),
            Value::Builder(b) => f.write_str(&b.borrow()),
            Value::Throwable(t) => {
                let t = t.borrow();
                match &t.message {
                    Some(message) => write!(f, "{}: {}", t.class_name, message),
                    None => f.write_str(&t.class_name),
                }
            }
            Value::Array(_) | Value::Stream(_) => write!(
                f,
                "{}@{:x}",
                self.class_name().unwrap_or_default(),
                self.identity_hash()
            ),
        }
    }
}
