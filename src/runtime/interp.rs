//! Bytecode interpreter for a single loaded class.
//!
//! Covers the instruction subset console programs compile to: constants,
//! locals, int/long/float/double arithmetic, branches and switches, static
//! fields and methods of the class itself, arrays, and calls into host
//! objects. Exception handler tables are not consulted; anything thrown
//! unwinds to the caller as an [`InvocationFailure`].

use crate::class_file::{ClassFile, Code, Constant, MemberRef, Method};
use crate::codec::read_uint;
use crate::descriptor::{FieldType, MethodDescriptor};
use crate::runtime::host;
use crate::runtime::resolver::{JavaException, Resolver};
use crate::runtime::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};
use thiserror::Error;

pub const DEFAULT_MAX_INSTRUCTIONS: u64 = 10_000_000;
pub const DEFAULT_MAX_CALL_DEPTH: usize = 512;
pub const DEFAULT_MAX_HEAP_ELEMENTS: u64 = 16 * 1024 * 1024;

/// Largest call depth a plan may ask for. Frames live on the heap, so this
/// only bounds memory.
pub const MAX_CALL_DEPTH_LIMIT: usize = 65_536;

/// How often the wall clock is consulted, in instructions.
const CLOCK_CHECK_INTERVAL: u64 = 1024;

/// Termination policy for one invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionLimits {
    /// `None` runs without an instruction budget
    pub max_instructions: Option<u64>,
    pub timeout: Option<Duration>,
    pub max_call_depth: usize,
    /// Array elements one invocation may allocate in total. `None` leaves
    /// allocation bounded only by the host.
    pub max_heap_elements: Option<u64>,
}

impl Default for ExecutionLimits {
    fn default() -> Self {
        Self {
            max_instructions: Some(DEFAULT_MAX_INSTRUCTIONS),
            timeout: None,
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            max_heap_elements: Some(DEFAULT_MAX_HEAP_ELEMENTS),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    /// Binary class name
    pub class_name: String,
    pub method: String,
    pub source_file: Option<String>,
    pub line: Option<u16>,
    pub pc: usize,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}(", self.class_name, self.method)?;
        match (&self.source_file, self.line) {
            (Some(file), Some(line)) => write!(f, "{file}:{line})"),
            (Some(file), None) => write!(f, "{file})"),
            (None, _) => f.write_str("Unknown Source)"),
        }
    }
}

/// An exception that escaped the invoked entry point, with the frames it
/// unwound through (innermost first).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{exception}")]
pub struct InvocationFailure {
    pub exception: JavaException,
    pub trace: Vec<TraceFrame>,
}

impl InvocationFailure {
    pub fn new(exception: JavaException) -> Self {
        Self {
            exception,
            trace: Vec::new(),
        }
    }

    /// Stack-trace text in the shape `Throwable.printStackTrace` uses.
    pub fn render(&self) -> String {
        let mut out = format!("{}\n", self.exception);
        for frame in &self.trace {
            out.push_str(&format!("\tat {frame}\n"));
        }
        out
    }
}

/// Everything below `run` reports a thrown exception; `run` attaches the
/// frames it unwinds through.
type Step<T> = Result<T, JavaException>;

fn verify_error(message: impl Into<String>) -> JavaException {
    JavaException::new("java.lang.VerifyError", message)
}

fn linkage(e: crate::class_file::ClassFormatError) -> JavaException {
    JavaException::new("java.lang.IncompatibleClassChangeError", e.to_string())
}

struct Frame<'u> {
    method: &'u Method,
    code: &'u Code,
    locals: Vec<Value>,
    stack: Vec<Value>,
    pc: usize,
    /// Start of the instruction being executed
    op_pc: usize,
}

impl<'u> Frame<'u> {
    fn pop(&mut self) -> Step<Value> {
        self.stack
            .pop()
            .ok_or_else(|| verify_error(format!("operand stack underflow in {}", self.method.name)))
    }

    fn pop_int(&mut self) -> Step<i32> {
        match self.pop()? {
            Value::Int(v) => Ok(v),
            other => Err(verify_error(format!("expected int, found {other:?}"))),
        }
    }

    fn pop_long(&mut self) -> Step<i64> {
        match self.pop()? {
            Value::Long(v) => Ok(v),
            other => Err(verify_error(format!("expected long, found {other:?}"))),
        }
    }

    fn pop_float(&mut self) -> Step<f32> {
        match self.pop()? {
            Value::Float(v) => Ok(v),
            other => Err(verify_error(format!("expected float, found {other:?}"))),
        }
    }

    fn pop_double(&mut self) -> Step<f64> {
        match self.pop()? {
            Value::Double(v) => Ok(v),
            other => Err(verify_error(format!("expected double, found {other:?}"))),
        }
    }

    fn pop_args(&mut self, count: usize) -> Step<Vec<Value>> {
        if self.stack.len() < count {
            return Err(verify_error("operand stack underflow while passing arguments"));
        }
        Ok(self.stack.split_off(self.stack.len() - count))
    }

    fn push(&mut self, value: Value) -> Step<()> {
        if self.stack.len() >= usize::from(self.code.max_stack) {
            return Err(verify_error(format!(
                "operand stack overflow in {} (max_stack {})",
                self.method.name, self.code.max_stack
            )));
        }
        self.stack.push(value);
        Ok(())
    }

    fn load(&self, index: usize) -> Step<Value> {
        match self.locals.get(index) {
            Some(Value::Top) | None => Err(verify_error(format!("read of unset local {index}"))),
            Some(value) => Ok(value.clone()),
        }
    }

    fn store(&mut self, index: usize, value: Value) -> Step<()> {
        let wide = value.is_wide();
        let needed = index + if wide { 2 } else { 1 };
        if needed > self.locals.len() {
            return Err(verify_error(format!("local {index} out of range")));
        }
        self.locals[index] = value;
        if wide {
            self.locals[index + 1] = Value::Top;
        }
        Ok(())
    }

    fn u1(&self, at: usize) -> Step<u8> {
        Ok(read_uint(&self.code.bytecode, at, 1).map_err(|_| truncated())? as u8)
    }

    fn u2(&self, at: usize) -> Step<u16> {
        Ok(read_uint(&self.code.bytecode, at, 2).map_err(|_| truncated())? as u16)
    }

    fn i32_at(&self, at: usize) -> Step<i32> {
        Ok(read_uint(&self.code.bytecode, at, 4).map_err(|_| truncated())? as i32)
    }

    fn jump(&mut self, from: usize, offset: i32) -> Step<()> {
        let target = from as i64 + i64::from(offset);
        if target < 0 || target as usize >= self.code.bytecode.len() {
            return Err(verify_error(format!("branch target {target} outside code")));
        }
        self.pc = target as usize;
        Ok(())
    }
}

fn truncated() -> JavaException {
    verify_error("truncated instruction")
}

fn array_index_error(index: i32, len: usize) -> JavaException {
    JavaException::new(
        "java.lang.ArrayIndexOutOfBoundsException",
        format!("Index {index} out of bounds for length {len}"),
    )
}

fn null_pointer(what: &str) -> JavaException {
    JavaException::new(
        "java.lang.NullPointerException",
        format!("Cannot {what} because value is null"),
    )
}

fn divide_by_zero() -> JavaException {
    JavaException::new("java.lang.ArithmeticException", "/ by zero")
}

fn unsupported(opcode: u8) -> JavaException {
    JavaException::new(
        "java.lang.UnsupportedOperationException",
        format!("opcode 0x{opcode:02x} is not supported"),
    )
}

enum Flow<'u> {
    Next,
    /// Push a frame for a method of this class
    Call(&'u Method, Vec<Value>),
    Return(Option<Value>),
}

fn out_of_memory() -> JavaException {
    JavaException::new("java.lang.OutOfMemoryError", "Java heap space")
}

/// Executes methods of one class against a fallback resolver.
///
/// Calls between methods of the class push onto an explicit frame stack,
/// so the depth of Java recursion never touches the native stack. Static
/// fields live for the lifetime of the interpreter, so every invocation
/// starts from a freshly initialised class.
pub(crate) struct Interpreter<'u> {
    class: &'u ClassFile,
    parent: &'u dyn Resolver,
    limits: ExecutionLimits,
    statics: HashMap<String, Value>,
    interned: HashMap<u16, Rc<str>>,
    executed: u64,
    deadline: Option<Instant>,
    /// Array elements allocated plus slots held by live frames
    heap_used: u64,
}

impl<'u> Interpreter<'u> {
    pub(crate) fn new(class: &'u ClassFile, parent: &'u dyn Resolver, limits: ExecutionLimits) -> Self {
        let statics = class
            .fields
            .iter()
            .filter(|f| f.access_flags & crate::class_file::ACC_STATIC != 0)
            .map(|f| {
                let initial = f
                    .descriptor
                    .parse::<FieldType>()
                    .map(|ty| Value::default_for(&ty))
                    .unwrap_or(Value::Null);
                (f.name.clone(), initial)
            })
            .collect();
        Self {
            class,
            parent,
            limits,
            statics,
            interned: HashMap::new(),
            executed: 0,
            deadline: limits.timeout.map(|t| Instant::now() + t),
            heap_used: 0,
        }
    }

    /// Run `<clinit>` if the class has one.
    pub(crate) fn initialize(&mut self) -> Result<(), InvocationFailure> {
        if let Some(clinit) = self.class.find_method("<clinit>", "()V") {
            self.run(clinit, Vec::new())?;
        }
        Ok(())
    }

    pub(crate) fn instructions_executed(&self) -> u64 {
        self.executed
    }

    pub(crate) fn run(
        &mut self,
        method: &'u Method,
        args: Vec<Value>,
    ) -> Result<Option<Value>, InvocationFailure> {
        let mut frames = vec![self.enter(0, method, args).map_err(InvocationFailure::new)?];

        loop {
            let Some(frame) = frames.last_mut() else {
                return Ok(None);
            };
            let outcome = match self.step(frame) {
                Ok(Flow::Next) => Ok(()),
                Ok(Flow::Call(callee, args)) => self
                    .enter(frames.len(), callee, args)
                    .map(|next| frames.push(next)),
                Ok(Flow::Return(value)) => {
                    if let Some(done) = frames.pop() {
                        self.release(&done);
                    }
                    match (frames.last_mut(), value) {
                        (None, value) => return Ok(value),
                        (Some(caller), Some(value)) => caller.push(value),
                        (Some(_), None) => Ok(()),
                    }
                }
                Err(exception) => Err(exception),
            };
            if let Err(exception) = outcome {
                return Err(self.unwind(exception, frames));
            }
        }
    }

    /// Build the frame for a call made at `depth` frames deep.
    fn enter(&mut self, depth: usize, method: &'u Method, args: Vec<Value>) -> Step<Frame<'u>> {
        if depth >= self.limits.max_call_depth {
            return Err(JavaException::new(
                "java.lang.StackOverflowError",
                format!("call depth exceeded {}", self.limits.max_call_depth),
            ));
        }

        let Some(code) = method.code.as_ref() else {
            return Err(JavaException::new(
                "java.lang.UnsatisfiedLinkError",
                format!("{}.{}{}", self.class.binary_name(), method.name, method.descriptor),
            ));
        };

        let needed: usize = args.iter().map(|arg| if arg.is_wide() { 2 } else { 1 }).sum();
        if needed > usize::from(code.max_locals) {
            return Err(verify_error(format!(
                "{} declares fewer locals than arguments",
                method.name
            )));
        }

        let slots = u64::from(code.max_locals) + u64::from(code.max_stack);
        if !self.charge(slots) {
            return Err(JavaException::new(
                "java.lang.StackOverflowError",
                format!("frame storage exhausted at depth {depth}"),
            ));
        }

        let mut locals = vec![Value::Top; usize::from(code.max_locals)];
        let mut slot = 0;
        for arg in args {
            let wide = arg.is_wide();
            locals[slot] = arg;
            slot += if wide { 2 } else { 1 };
        }

        Ok(Frame {
            method,
            code,
            locals,
            stack: Vec::new(),
            pc: 0,
            op_pc: 0,
        })
    }

    fn release(&mut self, frame: &Frame<'u>) {
        let slots = u64::from(frame.code.max_locals) + u64::from(frame.code.max_stack);
        self.heap_used = self.heap_used.saturating_sub(slots);
    }

    /// Account for `elements` more slots, refusing past the heap budget.
    fn charge(&mut self, elements: u64) -> bool {
        let total = self.heap_used.saturating_add(elements);
        if self.limits.max_heap_elements.is_some_and(|max| total > max) {
            return false;
        }
        self.heap_used = total;
        true
    }

    /// Attach every live frame, innermost first, to an escaping exception.
    fn unwind(&mut self, exception: JavaException, mut frames: Vec<Frame<'u>>) -> InvocationFailure {
        let mut failure = InvocationFailure::new(exception);
        while let Some(frame) = frames.pop() {
            failure.trace.push(self.trace_frame(&frame, frame.op_pc));
            self.release(&frame);
        }
        failure
    }

    fn trace_frame(&self, frame: &Frame<'u>, pc: usize) -> TraceFrame {
        TraceFrame {
            class_name: self.class.binary_name(),
            method: frame.method.name.clone(),
            source_file: self.class.source_file.clone(),
            line: frame.code.line_for(pc),
            pc,
        }
    }

    fn tick(&mut self) -> Step<()> {
        self.executed += 1;
        if let Some(max) = self.limits.max_instructions {
            if self.executed > max {
                return Err(JavaException::new(
                    "java.util.concurrent.TimeoutException",
                    format!("instruction budget of {max} exhausted"),
                ));
            }
        }
        if let (Some(deadline), Some(timeout)) = (self.deadline, self.limits.timeout) {
            if self.executed % CLOCK_CHECK_INTERVAL == 0 && Instant::now() >= deadline {
                return Err(JavaException::new(
                    "java.util.concurrent.TimeoutException",
                    format!("timed out after {}ms", timeout.as_millis()),
                ));
            }
        }
        Ok(())
    }

    fn member(&self, index: u16) -> Step<MemberRef<'u>> {
        self.class.constant_pool.member_ref(index).map_err(linkage)
    }

    fn is_own_class(&self, class: &str) -> bool {
        class == self.class.this_class
    }

    fn ldc(&mut self, index: u16) -> Step<Value> {
        match self.class.constant_pool.get(index) {
            Some(Constant::Integer(v)) => Ok(Value::Int(*v)),
            Some(Constant::Float(v)) => Ok(Value::Float(*v)),
            Some(Constant::Long(v)) => Ok(Value::Long(*v)),
            Some(Constant::Double(v)) => Ok(Value::Double(*v)),
            Some(Constant::String(utf8)) => {
                if let Some(s) = self.interned.get(&index) {
                    return Ok(Value::Str(s.clone()));
                }
                let text: Rc<str> =
                    Rc::from(self.class.constant_pool.utf8(*utf8).map_err(linkage)?);
                self.interned.insert(index, text.clone());
                Ok(Value::Str(text))
            }
            _ => Err(verify_error(format!("ldc of unsupported constant #{index}"))),
        }
    }

    fn get_static(&mut self, index: u16) -> Step<Value> {
        let field = self.member(index)?;
        if self.is_own_class(field.class) {
            return self.statics.get(field.name).cloned().ok_or_else(|| {
                JavaException::new("java.lang.NoSuchFieldError", field.name)
            });
        }
        self.parent
            .get_static(field.class, field.name, field.descriptor)
            .ok_or_else(|| {
                JavaException::new(
                    "java.lang.NoSuchFieldError",
                    format!("{}.{}", field.class.replace('/', "."), field.name),
                )
            })
    }

    fn put_static(&mut self, index: u16, value: Value) -> Step<()> {
        let field = self.member(index)?;
        if !self.is_own_class(field.class) {
            return Err(JavaException::new(
                "java.lang.IllegalAccessError",
                format!("cannot assign {}.{}", field.class.replace('/', "."), field.name),
            ));
        }
        match self.statics.get_mut(field.name) {
            Some(slot) => {
                *slot = value;
                Ok(())
            }
            None => Err(JavaException::new(
                "java.lang.NoSuchFieldError",
                field.name,
            )),
        }
    }

    /// Methods of this class become a new frame; everything else is
    /// answered by the parent resolver in place.
    fn invoke_static(&mut self, frame: &mut Frame<'u>, index: u16) -> Step<Flow<'u>> {
        let target = self.member(index)?;
        let descriptor: MethodDescriptor = target
            .descriptor
            .parse()
            .map_err(|e: crate::descriptor::DescriptorError| verify_error(e.to_string()))?;
        let args = frame.pop_args(descriptor.params.len())?;

        if self.is_own_class(target.class) {
            let method = self
                .class
                .find_method(target.name, target.descriptor)
                .filter(|m| m.is_static())
                .ok_or_else(|| {
                    JavaException::new(
                        "java.lang.NoSuchMethodError",
                        format!("{}.{}{}", self.class.binary_name(), target.name, target.descriptor),
                    )
                })?;
            return Ok(Flow::Call(method, args));
        }

        let result = self
            .parent
            .invoke_static(target.class, target.name, target.descriptor, &args)
            .ok_or_else(|| {
                JavaException::new(
                    "java.lang.NoSuchMethodError",
                    format!(
                        "{}.{}{}",
                        target.class.replace('/', "."),
                        target.name,
                        target.descriptor
                    ),
                )
            })??;
        if descriptor.ret.is_some() {
            frame.push(result.unwrap_or_default())?;
        }
        Ok(Flow::Next)
    }

    fn invoke_instance(&mut self, frame: &mut Frame<'u>, index: u16, special: bool) -> Step<()> {
        let target = self.member(index)?;
        let descriptor: MethodDescriptor = target
            .descriptor
            .parse()
            .map_err(|e: crate::descriptor::DescriptorError| verify_error(e.to_string()))?;
        let args = frame.pop_args(descriptor.params.len())?;
        let receiver = frame.pop()?;

        if special {
            if receiver.is_null() {
                return Err(null_pointer("invoke a constructor"));
            }
            host::invoke_special(&receiver, target.class, target.name, target.descriptor, &args)?;
            return Ok(());
        }

        let result =
            host::invoke_virtual(&receiver, target.class, target.name, target.descriptor, &args)?;
        if descriptor.ret.is_some() {
            frame.push(result.unwrap_or_default())?;
        }
        Ok(())
    }

    fn new_array(&mut self, frame: &mut Frame<'u>, element: &str, ty: &FieldType) -> Step<()> {
        let len = frame.pop_int()?;
        let len = usize::try_from(len).map_err(|_| {
            JavaException::new("java.lang.NegativeArraySizeException", len.to_string())
        })?;
        if !self.charge(len as u64) {
            return Err(out_of_memory());
        }
        let mut items = Vec::new();
        items.try_reserve_exact(len).map_err(|_| out_of_memory())?;
        items.resize(len, Value::default_for(ty));
        frame.push(Value::new_array(element, items))
    }

    fn array_load(&mut self, frame: &mut Frame<'u>) -> Step<()> {
        let index = frame.pop_int()?;
        let array = match frame.pop()? {
            Value::Array(array) => array,
            Value::Null => return Err(null_pointer("load from array")),
            other => return Err(verify_error(format!("expected array, found {other:?}"))),
        };
        let array = array.borrow();
        let value = usize::try_from(index)
            .ok()
            .and_then(|i| array.items.get(i))
            .cloned()
            .ok_or_else(|| array_index_error(index, array.items.len()))?;
        frame.push(value)?;
        Ok(())
    }

    fn array_store(&mut self, frame: &mut Frame<'u>, opcode: u8) -> Step<()> {
        let value = match (opcode, frame.pop()?) {
            (0x54, Value::Int(v)) => Value::Int(i32::from(v as i8)),
            (0x55, Value::Int(v)) => Value::Int(i32::from(v as u16)),
            (0x56, Value::Int(v)) => Value::Int(i32::from(v as i16)),
            (_, v) => v,
        };
        let index = frame.pop_int()?;
        let array = match frame.pop()? {
            Value::Array(array) => array,
            Value::Null => return Err(null_pointer("store to array")),
            other => return Err(verify_error(format!("expected array, found {other:?}"))),
        };
        let mut array = array.borrow_mut();
        let len = array.items.len();
        let slot = usize::try_from(index)
            .ok()
            .and_then(|i| array.items.get_mut(i))
            .ok_or_else(|| array_index_error(index, len))?;
        *slot = value;
        Ok(())
    }

    fn branch_if(&mut self, frame: &mut Frame<'u>, op_pc: usize, taken: bool) -> Step<()> {
        let offset = frame.u2(op_pc + 1)? as i16;
        if taken {
            frame.jump(op_pc, i32::from(offset))
        } else {
            frame.pc = op_pc + 3;
            Ok(())
        }
    }

    fn switch(&mut self, frame: &mut Frame<'u>, op_pc: usize, table: bool) -> Step<()> {
        let key = frame.pop_int()?;
        // Operands start at the next 4-byte boundary of the method body
        let mut at = (op_pc + 4) & !3;
        let default = frame.i32_at(at)?;
        at += 4;

        let offset = if table {
            let low = frame.i32_at(at)?;
            let high = frame.i32_at(at + 4)?;
            at += 8;
            if key < low || key > high {
                default
            } else {
                frame.i32_at(at + 4 * key.wrapping_sub(low) as u32 as usize)?
            }
        } else {
            let pairs = frame.i32_at(at)?;
            at += 4;
            let mut found = default;
            for i in 0..usize::try_from(pairs).map_err(|_| truncated())? {
                if frame.i32_at(at + 8 * i)? == key {
                    found = frame.i32_at(at + 8 * i + 4)?;
                    break;
                }
            }
            found
        };
        frame.jump(op_pc, offset)
    }

    fn step(&mut self, frame: &mut Frame<'u>) -> Step<Flow<'u>> {
        self.tick()?;
        let op_pc = frame.pc;
        frame.op_pc = op_pc;
        let opcode = frame.u1(op_pc)?;
        // Default advance for one-byte instructions
        frame.pc = op_pc + 1;

        match opcode {
            0x00 => {}
            0x01 => frame.push(Value::Null)?,
            0x02..=0x08 => frame.push(Value::Int(i32::from(opcode) - 3))?,
            0x09 | 0x0a => frame.push(Value::Long(i64::from(opcode - 0x09)))?,
            0x0b..=0x0d => frame.push(Value::Float(f32::from(opcode - 0x0b)))?,
            0x0e | 0x0f => frame.push(Value::Double(f64::from(opcode - 0x0e)))?,
            0x10 => {
                frame.push(Value::Int(i32::from(frame.u1(op_pc + 1)? as i8)))?;
                frame.pc = op_pc + 2;
            }
            0x11 => {
                frame.push(Value::Int(i32::from(frame.u2(op_pc + 1)? as i16)))?;
                frame.pc = op_pc + 3;
            }
            0x12 => {
                let value = self.ldc(u16::from(frame.u1(op_pc + 1)?))?;
                frame.push(value)?;
                frame.pc = op_pc + 2;
            }
            0x13 | 0x14 => {
                let value = self.ldc(frame.u2(op_pc + 1)?)?;
                frame.push(value)?;
                frame.pc = op_pc + 3;
            }

            // iload, lload, fload, dload, aload
            0x15..=0x19 => {
                let value = frame.load(usize::from(frame.u1(op_pc + 1)?))?;
                frame.push(value)?;
                frame.pc = op_pc + 2;
            }
            // <t>load_<n>
            0x1a..=0x2d => {
                let value = frame.load(usize::from((opcode - 0x1a) % 4))?;
                frame.push(value)?;
            }
            0x2e..=0x35 => self.array_load(frame)?,

            // istore, lstore, fstore, dstore, astore
            0x36..=0x3a => {
                let index = usize::from(frame.u1(op_pc + 1)?);
                let value = frame.pop()?;
                frame.store(index, value)?;
                frame.pc = op_pc + 2;
            }
            // <t>store_<n>
            0x3b..=0x4e => {
                let value = frame.pop()?;
                frame.store(usize::from((opcode - 0x3b) % 4), value)?;
            }
            0x4f..=0x56 => self.array_store(frame, opcode)?,

            0x57 => {
                frame.pop()?;
            }
            0x58 => {
                if !frame.pop()?.is_wide() {
                    frame.pop()?;
                }
            }
            0x59 => {
                let top = frame.pop()?;
                frame.push(top.clone())?;
                frame.push(top)?;
            }
            0x5a => {
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(a.clone())?;
                frame.push(b)?;
                frame.push(a)?;
            }
            0x5c => {
                let a = frame.pop()?;
                if a.is_wide() {
                    frame.push(a.clone())?;
                    frame.push(a)?;
                } else {
                    let b = frame.pop()?;
                    frame.push(b.clone())?;
                    frame.push(a.clone())?;
                    frame.push(b)?;
                    frame.push(a)?;
                }
            }
            0x5f => {
                let a = frame.pop()?;
                let b = frame.pop()?;
                frame.push(a)?;
                frame.push(b)?;
            }

            0x60..=0x73 => self.arithmetic(frame, opcode)?,
            0x74 => {
                let v = frame.pop_int()?;
                frame.push(Value::Int(v.wrapping_neg()))?;
            }
            0x75 => {
                let v = frame.pop_long()?;
                frame.push(Value::Long(v.wrapping_neg()))?;
            }
            0x76 => {
                let v = frame.pop_float()?;
                frame.push(Value::Float(-v))?;
            }
            0x77 => {
                let v = frame.pop_double()?;
                frame.push(Value::Double(-v))?;
            }
            0x78..=0x83 => self.bitwise(frame, opcode)?,
            0x84 => {
                let index = usize::from(frame.u1(op_pc + 1)?);
                let delta = i32::from(frame.u1(op_pc + 2)? as i8);
                let Value::Int(v) = frame.load(index)? else {
                    return Err(verify_error("iinc on non-int local"));
                };
                frame.store(index, Value::Int(v.wrapping_add(delta)))?;
                frame.pc = op_pc + 3;
            }

            0x85..=0x93 => self.convert(frame, opcode)?,

            0x94 => {
                let b = frame.pop_long()?;
                let a = frame.pop_long()?;
                frame.push(Value::Int(a.cmp(&b) as i32))?;
            }
            0x95..=0x98 => {
                let (a, b) = if opcode <= 0x96 {
                    let b = frame.pop_float()?;
                    (f64::from(frame.pop_float()?), f64::from(b))
                } else {
                    let b = frame.pop_double()?;
                    (frame.pop_double()?, b)
                };
                let nan_result = if opcode == 0x95 || opcode == 0x97 { -1 } else { 1 };
                let result = a.partial_cmp(&b).map(|o| o as i32).unwrap_or(nan_result);
                frame.push(Value::Int(result))?;
            }

            0x99..=0x9e => {
                let v = frame.pop_int()?;
                let taken = match opcode {
                    0x99 => v == 0,
                    0x9a => v != 0,
                    0x9b => v < 0,
                    0x9c => v >= 0,
                    0x9d => v > 0,
                    _ => v <= 0,
                };
                self.branch_if(frame, op_pc, taken)?;
            }
            0x9f..=0xa4 => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                let taken = match opcode {
                    0x9f => a == b,
                    0xa0 => a != b,
                    0xa1 => a < b,
                    0xa2 => a >= b,
                    0xa3 => a > b,
                    _ => a <= b,
                };
                self.branch_if(frame, op_pc, taken)?;
            }
            0xa5 | 0xa6 => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let same = a.same_reference(&b);
                self.branch_if(frame, op_pc, same == (opcode == 0xa5))?;
            }
            0xa7 => {
                let offset = frame.u2(op_pc + 1)? as i16;
                frame.jump(op_pc, i32::from(offset))?;
            }
            0xaa => self.switch(frame, op_pc, true)?,
            0xab => self.switch(frame, op_pc, false)?,

            0xac..=0xb0 => return Ok(Flow::Return(Some(frame.pop()?))),
            0xb1 => return Ok(Flow::Return(None)),

            0xb2 => {
                let value = self.get_static(frame.u2(op_pc + 1)?)?;
                frame.push(value)?;
                frame.pc = op_pc + 3;
            }
            0xb3 => {
                let value = frame.pop()?;
                self.put_static(frame.u2(op_pc + 1)?, value)?;
                frame.pc = op_pc + 3;
            }
            0xb6 | 0xb7 => {
                let index = frame.u2(op_pc + 1)?;
                frame.pc = op_pc + 3;
                self.invoke_instance(frame, index, opcode == 0xb7)?;
            }
            0xb8 => {
                let index = frame.u2(op_pc + 1)?;
                frame.pc = op_pc + 3;
                return self.invoke_static(frame, index);
            }
            0xb9 => {
                let index = frame.u2(op_pc + 1)?;
                frame.pc = op_pc + 5;
                self.invoke_instance(frame, index, false)?;
            }
            0xbb => {
                let index = frame.u2(op_pc + 1)?;
                let class = self.class.constant_pool.class_name(index).map_err(linkage)?;
                let instance = self.parent.new_instance(class).ok_or_else(|| {
                    JavaException::new(
                        "java.lang.InstantiationError",
                        class.replace('/', "."),
                    )
                })?;
                frame.push(instance)?;
                frame.pc = op_pc + 3;
            }
            0xbc => {
                let (element, ty) = match frame.u1(op_pc + 1)? {
                    4 => ("Z", FieldType::Boolean),
                    5 => ("C", FieldType::Char),
                    6 => ("F", FieldType::Float),
                    7 => ("D", FieldType::Double),
                    8 => ("B", FieldType::Byte),
                    9 => ("S", FieldType::Short),
                    10 => ("I", FieldType::Int),
                    11 => ("J", FieldType::Long),
                    other => return Err(verify_error(format!("newarray type {other}"))),
                };
                self.new_array(frame, element, &ty)?;
                frame.pc = op_pc + 2;
            }
            0xbd => {
                let index = frame.u2(op_pc + 1)?;
                let class = self.class.constant_pool.class_name(index).map_err(linkage)?;
                let element = if class.starts_with('[') {
                    class.to_string()
                } else {
                    format!("L{class};")
                };
                self.new_array(frame, &element, &FieldType::Object(class.to_string()))?;
                frame.pc = op_pc + 3;
            }
            0xbe => {
                let len = match frame.pop()? {
                    Value::Array(array) => array.borrow().items.len(),
                    Value::Null => return Err(null_pointer("read the array length")),
                    other => return Err(verify_error(format!("expected array, found {other:?}"))),
                };
                frame.push(Value::Int(len as i32))?;
            }
            0xbf => {
                return match frame.pop()? {
                    Value::Throwable(t) => {
                        let t = t.borrow();
                        Err(JavaException {
                            class_name: t.class_name.clone(),
                            message: t.message.clone(),
                        })
                    }
                    Value::Null => Err(null_pointer("throw an exception")),
                    other => Err(verify_error(format!("athrow of {other:?}"))),
                };
            }
            0xc0 => frame.pc = op_pc + 3,
            0xc1 => {
                let index = frame.u2(op_pc + 1)?;
                let class = self.class.constant_pool.class_name(index).map_err(linkage)?;
                let value = frame.pop()?;
                let is_instance = (class == "java/lang/Object" && !value.is_null())
                    || value.class_name().as_deref() == Some(class.replace('/', ".").as_str());
                frame.push(Value::Int(i32::from(is_instance)))?;
                frame.pc = op_pc + 3;
            }
            0xc2 | 0xc3 => {
                if frame.pop()?.is_null() {
                    return Err(null_pointer("enter a monitor"));
                }
            }
            0xc4 => self.wide(frame, op_pc)?,
            0xc6 | 0xc7 => {
                let is_null = frame.pop()?.is_null();
                self.branch_if(frame, op_pc, is_null == (opcode == 0xc6))?;
            }
            0xc8 => {
                let offset = frame.i32_at(op_pc + 1)?;
                frame.jump(op_pc, offset)?;
            }
            other => return Err(unsupported(other)),
        }
        Ok(Flow::Next)
    }

    fn wide(&mut self, frame: &mut Frame<'u>, op_pc: usize) -> Step<()> {
        let opcode = frame.u1(op_pc + 1)?;
        let index = usize::from(frame.u2(op_pc + 2)?);
        match opcode {
            0x15..=0x19 => {
                let value = frame.load(index)?;
                frame.push(value)?;
                frame.pc = op_pc + 4;
            }
            0x36..=0x3a => {
                let value = frame.pop()?;
                frame.store(index, value)?;
                frame.pc = op_pc + 4;
            }
            0x84 => {
                let delta = i32::from(frame.u2(op_pc + 4)? as i16);
                let Value::Int(v) = frame.load(index)? else {
                    return Err(verify_error("iinc on non-int local"));
                };
                frame.store(index, Value::Int(v.wrapping_add(delta)))?;
                frame.pc = op_pc + 6;
            }
            other => return Err(unsupported(other)),
        }
        Ok(())
    }

    fn arithmetic(&mut self, frame: &mut Frame<'u>, opcode: u8) -> Step<()> {
        // Opcodes come in groups of four: int, long, float, double
        let op = (opcode - 0x60) / 4;
        let value = match (opcode - 0x60) % 4 {
            0 => {
                let b = frame.pop_int()?;
                let a = frame.pop_int()?;
                Value::Int(match op {
                    0 => a.wrapping_add(b),
                    1 => a.wrapping_sub(b),
                    2 => a.wrapping_mul(b),
                    3 if b == 0 => return Err(divide_by_zero()),
                    3 => a.wrapping_div(b),
                    _ if b == 0 => return Err(divide_by_zero()),
                    _ => a.wrapping_rem(b),
                })
            }
            1 => {
                let b = frame.pop_long()?;
                let a = frame.pop_long()?;
                Value::Long(match op {
                    0 => a.wrapping_add(b),
                    1 => a.wrapping_sub(b),
                    2 => a.wrapping_mul(b),
                    3 if b == 0 => return Err(divide_by_zero()),
                    3 => a.wrapping_div(b),
                    _ if b == 0 => return Err(divide_by_zero()),
                    _ => a.wrapping_rem(b),
                })
            }
            2 => {
                let b = frame.pop_float()?;
                let a = frame.pop_float()?;
                Value::Float(match op {
                    0 => a + b,
                    1 => a - b,
                    2 => a * b,
                    3 => a / b,
                    _ => a % b,
                })
            }
            _ => {
                let b = frame.pop_double()?;
                let a = frame.pop_double()?;
                Value::Double(match op {
                    0 => a + b,
                    1 => a - b,
                    2 => a * b,
                    3 => a / b,
                    _ => a % b,
                })
            }
        };
        frame.push(value)?;
        Ok(())
    }

    fn bitwise(&mut self, frame: &mut Frame<'u>, opcode: u8) -> Step<()> {
        let value = if opcode % 2 == 0 {
            let b = frame.pop_int()?;
            let a = frame.pop_int()?;
            Value::Int(match opcode {
                0x78 => a.wrapping_shl(b as u32 & 0x1f),
                0x7a => a.wrapping_shr(b as u32 & 0x1f),
                0x7c => ((a as u32) >> (b as u32 & 0x1f)) as i32,
                0x7e => a & b,
                0x80 => a | b,
                _ => a ^ b,
            })
        } else {
            // Long shifts take an int shift distance
            let shifts = opcode <= 0x7d;
            let b = if shifts {
                i64::from(frame.pop_int()?)
            } else {
                frame.pop_long()?
            };
            let a = frame.pop_long()?;
            Value::Long(match opcode {
                0x79 => a.wrapping_shl(b as u32 & 0x3f),
                0x7b => a.wrapping_shr(b as u32 & 0x3f),
                0x7d => ((a as u64) >> (b as u32 & 0x3f)) as i64,
                0x7f => a & b,
                0x81 => a | b,
                _ => a ^ b,
            })
        };
        frame.push(value)?;
        Ok(())
    }

    fn convert(&mut self, frame: &mut Frame<'u>, opcode: u8) -> Step<()> {
        // Float-to-integer `as` casts saturate and map NaN to zero, as the
        // JVM does.
        let value = match opcode {
            0x85 => Value::Long(i64::from(frame.pop_int()?)),
            0x86 => Value::Float(frame.pop_int()? as f32),
            0x87 => Value::Double(f64::from(frame.pop_int()?)),
            0x88 => Value::Int(frame.pop_long()? as i32),
            0x89 => Value::Float(frame.pop_long()? as f32),
            0x8a => Value::Double(frame.pop_long()? as f64),
            0x8b => Value::Int(frame.pop_float()? as i32),
            0x8c => Value::Long(frame.pop_float()? as i64),
            0x8d => Value::Double(f64::from(frame.pop_float()?)),
            0x8e => Value::Int(frame.pop_double()? as i32),
            0x8f => Value::Long(frame.pop_double()? as i64),
            0x90 => Value::Float(frame.pop_double()? as f32),
            0x91 => Value::Int(i32::from(frame.pop_int()? as i8)),
            0x92 => Value::Int(i32::from(frame.pop_int()? as u16)),
            _ => Value::Int(i32::from(frame.pop_int()? as i16)),
        };
        frame.push(value)?;
        Ok(())
    }
}
