//! Hand-assembled class files for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;

pub const ACC_PUBLIC_STATIC: u16 = 0x0009;
pub const MAIN: &str = "([Ljava/lang/String;)V";
pub const PRINT_STREAM: &str = "Ljava/io/PrintStream;";

struct MethodDef {
    flags: u16,
    name: u16,
    descriptor: u16,
    max_stack: u16,
    max_locals: u16,
    code: Vec<u8>,
    lines: Vec<(u16, u16)>,
}

/// Builds a class file constant by constant.
pub struct ClassBuilder {
    pool: Vec<u8>,
    next_index: u16,
    utf8s: HashMap<String, u16>,
    this_class: u16,
    super_class: u16,
    fields: Vec<(u16, u16, u16)>,
    methods: Vec<MethodDef>,
    source_file: Option<u16>,
}

impl ClassBuilder {
    pub fn new(name: &str) -> Self {
        Self::with_super(name, "java/lang/Object")
    }

    pub fn with_super(name: &str, superclass: &str) -> Self {
        let mut builder = Self {
            pool: Vec::new(),
            next_index: 1,
            utf8s: HashMap::new(),
            this_class: 0,
            super_class: 0,
            fields: Vec::new(),
            methods: Vec::new(),
            source_file: None,
        };
        builder.this_class = builder.class(name);
        builder.super_class = builder.class(superclass);
        builder
    }

    fn push(&mut self, record: &[u8], slots: u16) -> u16 {
        let index = self.next_index;
        self.pool.extend_from_slice(record);
        self.next_index += slots;
        index
    }

    pub fn utf8(&mut self, text: &str) -> u16 {
        if let Some(&index) = self.utf8s.get(text) {
            return index;
        }
        let mut record = vec![1];
        record.extend_from_slice(&(text.len() as u16).to_be_bytes());
        record.extend_from_slice(text.as_bytes());
        let index = self.push(&record, 1);
        self.utf8s.insert(text.to_string(), index);
        index
    }

    pub fn class(&mut self, name: &str) -> u16 {
        let name = self.utf8(name);
        let mut record = vec![7];
        record.extend_from_slice(&name.to_be_bytes());
        self.push(&record, 1)
    }

    pub fn string(&mut self, text: &str) -> u16 {
        let utf8 = self.utf8(text);
        let mut record = vec![8];
        record.extend_from_slice(&utf8.to_be_bytes());
        self.push(&record, 1)
    }

    pub fn integer(&mut self, value: i32) -> u16 {
        let mut record = vec![3];
        record.extend_from_slice(&value.to_be_bytes());
        self.push(&record, 1)
    }

    pub fn long(&mut self, value: i64) -> u16 {
        let mut record = vec![5];
        record.extend_from_slice(&value.to_be_bytes());
        self.push(&record, 2)
    }

    pub fn double(&mut self, value: f64) -> u16 {
        let mut record = vec![6];
        record.extend_from_slice(&value.to_bits().to_be_bytes());
        self.push(&record, 2)
    }

    fn name_and_type(&mut self, name: &str, descriptor: &str) -> u16 {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        let mut record = vec![12];
        record.extend_from_slice(&name.to_be_bytes());
        record.extend_from_slice(&descriptor.to_be_bytes());
        self.push(&record, 1)
    }

    fn member_ref(&mut self, tag: u8, class: &str, name: &str, descriptor: &str) -> u16 {
        let class = self.class(class);
        let nat = self.name_and_type(name, descriptor);
        let mut record = vec![tag];
        record.extend_from_slice(&class.to_be_bytes());
        record.extend_from_slice(&nat.to_be_bytes());
        self.push(&record, 1)
    }

    pub fn field_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(9, class, name, descriptor)
    }

    pub fn method_ref(&mut self, class: &str, name: &str, descriptor: &str) -> u16 {
        self.member_ref(10, class, name, descriptor)
    }

    pub fn field(&mut self, flags: u16, name: &str, descriptor: &str) {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.fields.push((flags, name, descriptor));
    }

    pub fn method(&mut self, flags: u16, name: &str, descriptor: &str, max_locals: u16, code: Asm) {
        self.method_with_lines(flags, name, descriptor, max_locals, code, &[]);
    }

    pub fn method_with_lines(
        &mut self,
        flags: u16,
        name: &str,
        descriptor: &str,
        max_locals: u16,
        code: Asm,
        lines: &[(u16, u16)],
    ) {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.utf8("Code");
        if !lines.is_empty() {
            self.utf8("LineNumberTable");
        }
        self.methods.push(MethodDef {
            flags,
            name,
            descriptor,
            max_stack: 8,
            max_locals,
            code: code.finish(),
            lines: lines.to_vec(),
        });
    }

    /// A method with no Code attribute.
    pub fn bodiless_method(&mut self, flags: u16, name: &str, descriptor: &str) {
        let name = self.utf8(name);
        let descriptor = self.utf8(descriptor);
        self.methods.push(MethodDef {
            flags,
            name,
            descriptor,
            max_stack: 0,
            max_locals: 0,
            code: Vec::new(),
            lines: Vec::new(),
        });
    }

    pub fn source_file(&mut self, name: &str) {
        self.utf8("SourceFile");
        self.source_file = Some(self.utf8(name));
    }

    pub fn build(self) -> Vec<u8> {
        let code_name = self.utf8s.get("Code").copied();
        let lines_name = self.utf8s.get("LineNumberTable").copied();
        let source_name = self.utf8s.get("SourceFile").copied();

        let mut out = vec![0xCA, 0xFE, 0xBA, 0xBE, 0, 0, 0, 52];
        out.extend_from_slice(&self.next_index.to_be_bytes());
        out.extend_from_slice(&self.pool);
        out.extend_from_slice(&0x0021u16.to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());

        out.extend_from_slice(&(self.fields.len() as u16).to_be_bytes());
        for (flags, name, descriptor) in &self.fields {
            out.extend_from_slice(&flags.to_be_bytes());
            out.extend_from_slice(&name.to_be_bytes());
            out.extend_from_slice(&descriptor.to_be_bytes());
            out.extend_from_slice(&0u16.to_be_bytes());
        }

        out.extend_from_slice(&(self.methods.len() as u16).to_be_bytes());
        for method in &self.methods {
            out.extend_from_slice(&method.flags.to_be_bytes());
            out.extend_from_slice(&method.name.to_be_bytes());
            out.extend_from_slice(&method.descriptor.to_be_bytes());
            let Some(code_name) = code_name.filter(|_| !method.code.is_empty()) else {
                out.extend_from_slice(&0u16.to_be_bytes());
                continue;
            };

            let mut nested = Vec::new();
            if let (Some(lines_name), false) = (lines_name, method.lines.is_empty()) {
                nested.extend_from_slice(&lines_name.to_be_bytes());
                nested.extend_from_slice(&(2 + 4 * method.lines.len() as u32).to_be_bytes());
                nested.extend_from_slice(&(method.lines.len() as u16).to_be_bytes());
                for (pc, line) in &method.lines {
                    nested.extend_from_slice(&pc.to_be_bytes());
                    nested.extend_from_slice(&line.to_be_bytes());
                }
            }

            let mut info = Vec::new();
            info.extend_from_slice(&method.max_stack.to_be_bytes());
            info.extend_from_slice(&method.max_locals.to_be_bytes());
            info.extend_from_slice(&(method.code.len() as u32).to_be_bytes());
            info.extend_from_slice(&method.code);
            info.extend_from_slice(&0u16.to_be_bytes());
            let nested_count: u16 = if nested.is_empty() { 0 } else { 1 };
            info.extend_from_slice(&nested_count.to_be_bytes());
            info.extend_from_slice(&nested);

            out.extend_from_slice(&1u16.to_be_bytes());
            out.extend_from_slice(&code_name.to_be_bytes());
            out.extend_from_slice(&(info.len() as u32).to_be_bytes());
            out.extend_from_slice(&info);
        }

        match (source_name, self.source_file) {
            (Some(attr), Some(file)) => {
                out.extend_from_slice(&1u16.to_be_bytes());
                out.extend_from_slice(&attr.to_be_bytes());
                out.extend_from_slice(&2u32.to_be_bytes());
                out.extend_from_slice(&file.to_be_bytes());
            }
            _ => out.extend_from_slice(&0u16.to_be_bytes()),
        }
        out
    }
}

/// Minimal bytecode assembler.
#[derive(Default)]
pub struct Asm {
    code: Vec<u8>,
}

impl Asm {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pos(&self) -> usize {
        self.code.len()
    }

    pub fn op(mut self, opcode: u8) -> Self {
        self.code.push(opcode);
        self
    }

    pub fn op1(mut self, opcode: u8, operand: u8) -> Self {
        self.code.extend_from_slice(&[opcode, operand]);
        self
    }

    pub fn op2(mut self, opcode: u8, operand: u16) -> Self {
        self.code.push(opcode);
        self.code.extend_from_slice(&operand.to_be_bytes());
        self
    }

    pub fn raw(mut self, bytes: &[u8]) -> Self {
        self.code.extend_from_slice(bytes);
        self
    }

    pub fn iconst(self, value: i32) -> Self {
        match value {
            -1..=5 => self.op((value + 3) as u8),
            -128..=127 => self.op1(0x10, value as i8 as u8),
            _ => self.op2(0x11, value as i16 as u16),
        }
    }

    pub fn ldc(self, index: u16) -> Self {
        match u8::try_from(index) {
            Ok(small) => self.op1(0x12, small),
            Err(_) => self.op2(0x13, index),
        }
    }

    pub fn getstatic(self, index: u16) -> Self {
        self.op2(0xb2, index)
    }

    pub fn putstatic(self, index: u16) -> Self {
        self.op2(0xb3, index)
    }

    pub fn invokevirtual(self, index: u16) -> Self {
        self.op2(0xb6, index)
    }

    pub fn invokespecial(self, index: u16) -> Self {
        self.op2(0xb7, index)
    }

    pub fn invokestatic(self, index: u16) -> Self {
        self.op2(0xb8, index)
    }

    /// Branch from the current position to absolute `target`.
    pub fn branch(self, opcode: u8, target: usize) -> Self {
        let offset = target as i32 - self.pos() as i32;
        self.op2(opcode, offset as i16 as u16)
    }

    /// Emit a branch whose target is filled in by [`Asm::land`].
    pub fn branch_forward(self, opcode: u8) -> (Self, usize) {
        let at = self.pos();
        (self.op2(opcode, 0), at)
    }

    /// Point the forward branch at `from` to the current position.
    pub fn land(mut self, from: usize) -> Self {
        let offset = (self.pos() - from) as i16;
        self.code[from + 1..from + 3].copy_from_slice(&offset.to_be_bytes());
        self
    }

    pub fn finish(self) -> Vec<u8> {
        self.code
    }
}

/// Pool indices for printing through `System.out`.
pub struct Console {
    pub out: u16,
    pub err: u16,
    pub println_string: u16,
    pub println_int: u16,
    pub println_object: u16,
}

impl Console {
    pub fn new(class: &mut ClassBuilder) -> Self {
        Self {
            out: class.field_ref("java/lang/System", "out", PRINT_STREAM),
            err: class.field_ref("java/lang/System", "err", PRINT_STREAM),
            println_string: class.method_ref(
                "java/io/PrintStream",
                "println",
                "(Ljava/lang/String;)V",
            ),
            println_int: class.method_ref("java/io/PrintStream", "println", "(I)V"),
            println_object: class.method_ref(
                "java/io/PrintStream",
                "println",
                "(Ljava/lang/Object;)V",
            ),
        }
    }
}

/// `public class Hello { public static void main(String[] a) { System.out.println(message); } }`
pub fn hello_world(message: &str) -> Vec<u8> {
    let mut class = ClassBuilder::new("Hello");
    let console = Console::new(&mut class);
    let text = class.string(message);
    let code = Asm::new()
        .getstatic(console.out)
        .ldc(text)
        .invokevirtual(console.println_string)
        .op(0xb1);
    class.method(ACC_PUBLIC_STATIC, "main", MAIN, 1, code);
    class.source_file("Hello.java");
    class.build()
}

/// A `main` whose body is `code`, in a class named `Hello` with a
/// `Hello.java` source file and the given line table.
pub fn with_main(
    build: impl FnOnce(&mut ClassBuilder, &Console) -> Asm,
    max_locals: u16,
    lines: &[(u16, u16)],
) -> Vec<u8> {
    let mut class = ClassBuilder::new("Hello");
    let console = Console::new(&mut class);
    let code = build(&mut class, &console);
    class.method_with_lines(ACC_PUBLIC_STATIC, "main", MAIN, max_locals, code, lines);
    class.source_file("Hello.java");
    class.build()
}
