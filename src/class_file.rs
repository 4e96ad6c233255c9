//! Structured view of a whole class file.
//!
//! The patcher only ever touches the constant pool; the loader needs the
//! rest: names, members and method bodies. Parsing reuses the pool
//! [`Walker`] so both agree on record boundaries, and rejects a file with
//! bytes left over after the class attributes.

use crate::codec::{read_uint, CodecError};
use crate::constant_pool::{PatchError, Tag, Walker};
use log::debug;
use thiserror::Error;

pub const MAGIC: u32 = 0xCAFE_BABE;

pub const ACC_PUBLIC: u16 = 0x0001;
pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_NATIVE: u16 = 0x0100;
pub const ACC_ABSTRACT: u16 = 0x0400;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ClassFormatError {
    #[error("Bad magic number 0x{0:08X}")]
    BadMagic(u32),

    #[error("Truncated class file: {width} bytes needed at offset {offset}, length {len}")]
    Truncated {
        offset: usize,
        width: usize,
        len: usize,
    },

    #[error("Constant pool: {0}")]
    Pool(#[from] PatchError),

    #[error("Constant #{index} is not a valid {expected}")]
    BadConstant { index: u16, expected: &'static str },

    #[error("{count} trailing bytes after offset {offset}")]
    TrailingBytes { offset: usize, count: usize },

    #[error("Malformed {0} attribute")]
    BadAttribute(&'static str),
}

impl From<CodecError> for ClassFormatError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::OutOfBounds { offset, width, len } => {
                ClassFormatError::Truncated { offset, width, len }
            }
            other => ClassFormatError::Pool(other.into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Utf8(String),
    Integer(i32),
    Float(f32),
    Long(i64),
    Double(f64),
    Class(u16),
    String(u16),
    Fieldref { class: u16, name_and_type: u16 },
    Methodref { class: u16, name_and_type: u16 },
    InterfaceMethodref { class: u16, name_and_type: u16 },
    NameAndType { name: u16, descriptor: u16 },
    MethodHandle { kind: u8, reference: u16 },
    MethodType(u16),
    Dynamic { bootstrap: u16, name_and_type: u16 },
    InvokeDynamic { bootstrap: u16, name_and_type: u16 },
    Module(u16),
    Package(u16),
}

/// A field or method reference resolved to its names.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemberRef<'a> {
    pub class: &'a str,
    pub name: &'a str,
    pub descriptor: &'a str,
}

/// Constants by 1-based index. Slot 0 and the upper half of Long/Double
/// entries are empty.
#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    slots: Vec<Option<Constant>>,
}

impl ConstantPool {
    pub fn get(&self, index: u16) -> Option<&Constant> {
        self.slots.get(usize::from(index)).and_then(Option::as_ref)
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.len() <= 1
    }

    pub fn utf8(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index) {
            Some(Constant::Utf8(text)) => Ok(text),
            _ => Err(ClassFormatError::BadConstant {
                index,
                expected: "Utf8",
            }),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.get(index) {
            Some(Constant::Class(name)) => self.utf8(*name),
            _ => Err(ClassFormatError::BadConstant {
                index,
                expected: "Class",
            }),
        }
    }

    pub fn name_and_type(&self, index: u16) -> Result<(&str, &str), ClassFormatError> {
        match self.get(index) {
            Some(Constant::NameAndType { name, descriptor }) => {
                Ok((self.utf8(*name)?, self.utf8(*descriptor)?))
            }
            _ => Err(ClassFormatError::BadConstant {
                index,
                expected: "NameAndType",
            }),
        }
    }

    /// Resolve a Fieldref, Methodref or InterfaceMethodref.
    pub fn member_ref(&self, index: u16) -> Result<MemberRef<'_>, ClassFormatError> {
        match self.get(index) {
            Some(
                Constant::Fieldref {
                    class,
                    name_and_type,
                }
                | Constant::Methodref {
                    class,
                    name_and_type,
                }
                | Constant::InterfaceMethodref {
                    class,
                    name_and_type,
                },
            ) => {
                let (name, descriptor) = self.name_and_type(*name_and_type)?;
                Ok(MemberRef {
                    class: self.class_name(*class)?,
                    name,
                    descriptor,
                })
            }
            _ => Err(ClassFormatError::BadConstant {
                index,
                expected: "member reference",
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name: String,
    pub info: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LineNumber {
    pub start_pc: u16,
    pub line: u16,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Code {
    pub max_stack: u16,
    pub max_locals: u16,
    pub bytecode: Vec<u8>,
    pub line_numbers: Vec<LineNumber>,
}

impl Code {
    /// Source line of the instruction at `pc`, if a LineNumberTable exists.
    pub fn line_for(&self, pc: usize) -> Option<u16> {
        self.line_numbers
            .iter()
            .filter(|entry| usize::from(entry.start_pc) <= pc)
            .max_by_key(|entry| entry.start_pc)
            .map(|entry| entry.line)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Method {
    pub access_flags: u16,
    pub name: String,
    pub descriptor: String,
    pub code: Option<Code>,
}

impl Method {
    pub fn is_public(&self) -> bool {
        self.access_flags & ACC_PUBLIC != 0
    }

    pub fn is_static(&self) -> bool {
        self.access_flags & ACC_STATIC != 0
    }

    pub fn needs_code(&self) -> bool {
        self.access_flags & (ACC_NATIVE | ACC_ABSTRACT) == 0
    }
}

#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub constant_pool: ConstantPool,
    pub access_flags: u16,
    /// Internal name, e.g. `com/example/Hello`
    pub this_class: String,
    pub super_class: Option<String>,
    pub interfaces: Vec<String>,
    pub fields: Vec<Field>,
    pub methods: Vec<Method>,
    pub source_file: Option<String>,
}

impl ClassFile {
    pub fn parse(bytes: &[u8]) -> Result<ClassFile, ClassFormatError> {
        let magic = read_uint(bytes, 0, 4)?;
        if magic != MAGIC {
            return Err(ClassFormatError::BadMagic(magic));
        }
        let minor_version = read_uint(bytes, 4, 2)? as u16;
        let major_version = read_uint(bytes, 6, 2)? as u16;

        let (constant_pool, pool_end) = parse_constant_pool(bytes)?;
        let mut r = Reader::new(bytes, pool_end);

        let access_flags = r.u2()?;
        let this_index = r.u2()?;
        let this_class = constant_pool.class_name(this_index)?.to_string();
        let super_index = r.u2()?;
        let super_class = match super_index {
            0 => None,
            index => Some(constant_pool.class_name(index)?.to_string()),
        };

        let interface_count = r.u2()?;
        let mut interfaces = Vec::with_capacity(usize::from(interface_count));
        for _ in 0..interface_count {
            interfaces.push(constant_pool.class_name(r.u2()?)?.to_string());
        }

        let field_count = r.u2()?;
        let mut fields = Vec::with_capacity(usize::from(field_count));
        for _ in 0..field_count {
            let (access_flags, name, descriptor, _) = read_member(&mut r, &constant_pool)?;
            fields.push(Field {
                access_flags,
                name,
                descriptor,
            });
        }

        let method_count = r.u2()?;
        let mut methods = Vec::with_capacity(usize::from(method_count));
        for _ in 0..method_count {
            let (access_flags, name, descriptor, attributes) =
                read_member(&mut r, &constant_pool)?;
            let code = attributes
                .iter()
                .find(|a| a.name == "Code")
                .map(|a| parse_code(&a.info, &constant_pool))
                .transpose()?;
            methods.push(Method {
                access_flags,
                name,
                descriptor,
                code,
            });
        }

        let attributes = read_attributes(&mut r, &constant_pool)?;
        let source_file = attributes
            .iter()
            .find(|a| a.name == "SourceFile")
            .map(|a| {
                if a.info.len() != 2 {
                    return Err(ClassFormatError::BadAttribute("SourceFile"));
                }
                let index = read_uint(&a.info, 0, 2)? as u16;
                Ok(constant_pool.utf8(index)?.to_string())
            })
            .transpose()?;

        if r.pos != bytes.len() {
            return Err(ClassFormatError::TrailingBytes {
                offset: r.pos,
                count: bytes.len() - r.pos,
            });
        }

        Ok(ClassFile {
            minor_version,
            major_version,
            constant_pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            source_file,
        })
    }

    pub fn find_method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        self.methods
            .iter()
            .find(|m| m.name == name && m.descriptor == descriptor)
    }

    /// Binary name with dots, as shown in stack traces.
    pub fn binary_name(&self) -> String {
        self.this_class.replace('/', ".")
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8], pos: usize) -> Self {
        Self { bytes, pos }
    }

    fn u2(&mut self) -> Result<u16, ClassFormatError> {
        let v = read_uint(self.bytes, self.pos, 2)? as u16;
        self.pos += 2;
        Ok(v)
    }

    fn u4(&mut self) -> Result<u32, ClassFormatError> {
        let v = read_uint(self.bytes, self.pos, 4)?;
        self.pos += 4;
        Ok(v)
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], ClassFormatError> {
        match self.pos.checked_add(len) {
            Some(end) if end <= self.bytes.len() => {
                let slice = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            _ => Err(ClassFormatError::Truncated {
                offset: self.pos,
                width: len,
                len: self.bytes.len(),
            }),
        }
    }
}

fn parse_constant_pool(bytes: &[u8]) -> Result<(ConstantPool, usize), ClassFormatError> {
    let mut walker = Walker::new(bytes)?;
    let mut slots = vec![None; usize::from(walker.declared_count().max(1))];

    for entry in walker.by_ref() {
        let entry = entry?;
        let body = entry.body();
        let u2 = |at: usize| read_uint(body, at, 2).map(|v| v as u16);
        let u4 = |at: usize| read_uint(body, at, 4);

        let constant = match entry.tag {
            Tag::Utf8 => {
                let raw = entry.utf8_bytes().unwrap_or_default();
                match std::str::from_utf8(raw) {
                    Ok(text) => Constant::Utf8(text.to_string()),
                    Err(_) => {
                        debug!("constant #{} is not plain UTF-8, decoding lossily", entry.index);
                        Constant::Utf8(String::from_utf8_lossy(raw).into_owned())
                    }
                }
            }
            Tag::Integer => Constant::Integer(u4(0)? as i32),
            Tag::Float => Constant::Float(f32::from_bits(u4(0)?)),
            Tag::Long => Constant::Long(((u64::from(u4(0)?) << 32) | u64::from(u4(4)?)) as i64),
            Tag::Double => {
                Constant::Double(f64::from_bits((u64::from(u4(0)?) << 32) | u64::from(u4(4)?)))
            }
            Tag::Class => Constant::Class(u2(0)?),
            Tag::String => Constant::String(u2(0)?),
            Tag::Fieldref => Constant::Fieldref {
                class: u2(0)?,
                name_and_type: u2(2)?,
            },
            Tag::Methodref => Constant::Methodref {
                class: u2(0)?,
                name_and_type: u2(2)?,
            },
            Tag::InterfaceMethodref => Constant::InterfaceMethodref {
                class: u2(0)?,
                name_and_type: u2(2)?,
            },
            Tag::NameAndType => Constant::NameAndType {
                name: u2(0)?,
                descriptor: u2(2)?,
            },
            Tag::MethodHandle => Constant::MethodHandle {
                kind: body[0],
                reference: read_uint(body, 1, 2)? as u16,
            },
            Tag::MethodType => Constant::MethodType(u2(0)?),
            Tag::Dynamic => Constant::Dynamic {
                bootstrap: u2(0)?,
                name_and_type: u2(2)?,
            },
            Tag::InvokeDynamic => Constant::InvokeDynamic {
                bootstrap: u2(0)?,
                name_and_type: u2(2)?,
            },
            Tag::Module => Constant::Module(u2(0)?),
            Tag::Package => Constant::Package(u2(0)?),
        };

        slots[usize::from(entry.index)] = Some(constant);
    }

    Ok((ConstantPool { slots }, walker.offset()))
}

fn read_attributes(
    r: &mut Reader<'_>,
    pool: &ConstantPool,
) -> Result<Vec<Attribute>, ClassFormatError> {
    let count = r.u2()?;
    let mut attributes = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let name = pool.utf8(r.u2()?)?.to_string();
        let len = r.u4()? as usize;
        let info = r.take(len)?.to_vec();
        attributes.push(Attribute { name, info });
    }
    Ok(attributes)
}

fn read_member(
    r: &mut Reader<'_>,
    pool: &ConstantPool,
) -> Result<(u16, String, String, Vec<Attribute>), ClassFormatError> {
    let access_flags = r.u2()?;
    let name = pool.utf8(r.u2()?)?.to_string();
    let descriptor = pool.utf8(r.u2()?)?.to_string();
    let attributes = read_attributes(r, pool)?;
    Ok((access_flags, name, descriptor, attributes))
}

fn parse_code(info: &[u8], pool: &ConstantPool) -> Result<Code, ClassFormatError> {
    let mut r = Reader::new(info, 0);
    let max_stack = r.u2()?;
    let max_locals = r.u2()?;
    let code_len = r.u4()? as usize;
    let bytecode = r.take(code_len)?.to_vec();

    // Exception handlers are not honoured by the interpreter
    let handler_count = usize::from(r.u2()?);
    r.take(handler_count * 8)?;

    let mut line_numbers = Vec::new();
    for attribute in read_attributes(&mut r, pool)? {
        if attribute.name != "LineNumberTable" {
            continue;
        }
        let mut lr = Reader::new(&attribute.info, 0);
        let count = lr.u2()?;
        for _ in 0..count {
            line_numbers.push(LineNumber {
                start_pc: lr.u2()?,
                line: lr.u2()?,
            });
        }
        if lr.pos != attribute.info.len() {
            return Err(ClassFormatError::BadAttribute("LineNumberTable"));
        }
    }

    if r.pos != info.len() {
        return Err(ClassFormatError::BadAttribute("Code"));
    }

    Ok(Code {
        max_stack,
        max_locals,
        bytecode,
        line_numbers,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn push_utf8(out: &mut Vec<u8>, text: &str) {
        out.push(1);
        out.extend_from_slice(&(text.len() as u16).to_be_bytes());
        out.extend_from_slice(text.as_bytes());
    }

    /// `Empty extends java/lang/Object` with one abstract-free static method.
    fn minimal_class() -> Vec<u8> {
        let mut b = vec![0xCA, 0xFE, 0xBA, 0xBE, 0x00, 0x00, 0x00, 0x34, 0x00, 0x09];
        push_utf8(&mut b, "Empty"); // 1
        b.extend_from_slice(&[7, 0x00, 0x01]); // 2
        push_utf8(&mut b, "java/lang/Object"); // 3
        b.extend_from_slice(&[7, 0x00, 0x03]); // 4
        push_utf8(&mut b, "run"); // 5
        push_utf8(&mut b, "()V"); // 6
        push_utf8(&mut b, "Code"); // 7
        b.extend_from_slice(&[3, 0xFF, 0xFF, 0xFF, 0xFE]); // 8
        b.extend_from_slice(&[0x00, 0x21, 0x00, 0x02, 0x00, 0x04, 0x00, 0x00]);
        b.extend_from_slice(&[0x00, 0x00]); // fields
        b.extend_from_slice(&[0x00, 0x01]); // methods
        b.extend_from_slice(&[0x00, 0x09, 0x00, 0x05, 0x00, 0x06, 0x00, 0x01]);
        b.extend_from_slice(&[0x00, 0x07, 0x00, 0x00, 0x00, 0x0D]);
        b.extend_from_slice(&[0x00, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x01, 0xB1]);
        b.extend_from_slice(&[0x00, 0x00, 0x00, 0x00]);
        b.extend_from_slice(&[0x00, 0x00]); // class attributes
        b
    }

    #[test]
    fn test_parse_minimal_class() {
        let class = ClassFile::parse(&minimal_class()).unwrap();
        assert_eq!(class.this_class, "Empty");
        assert_eq!(class.super_class.as_deref(), Some("java/lang/Object"));
        assert_eq!(class.major_version, 52);
        assert_eq!(class.constant_pool.get(8), Some(&Constant::Integer(-2)));

        let run = class.find_method("run", "()V").unwrap();
        assert!(run.is_static());
        assert_eq!(run.code.as_ref().unwrap().bytecode, vec![0xB1]);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = minimal_class();
        bytes[0] = 0xCB;
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(ClassFormatError::BadMagic(0xCBFE_BABE))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut bytes = minimal_class();
        let len = bytes.len();
        bytes.push(0);
        assert_eq!(
            ClassFile::parse(&bytes).unwrap_err(),
            ClassFormatError::TrailingBytes {
                offset: len,
                count: 1
            }
        );
    }

    #[test]
    fn test_truncated_rejected() {
        let mut bytes = minimal_class();
        bytes.truncate(bytes.len() - 3);
        assert!(matches!(
            ClassFile::parse(&bytes),
            Err(ClassFormatError::Truncated { .. })
        ));
    }

    #[test]
    fn test_wrong_constant_kind() {
        let mut bytes = minimal_class();
        // this_class points at the Utf8 entry instead of the Class entry
        let this_offset = bytes.len() - 39;
        bytes[this_offset + 1] = 0x01;
        assert_eq!(
            ClassFile::parse(&bytes).unwrap_err(),
            ClassFormatError::BadConstant {
                index: 1,
                expected: "Class"
            }
        );
    }

    #[test]
    fn test_line_for_pc() {
        let code = Code {
            max_stack: 0,
            max_locals: 0,
            bytecode: vec![],
            line_numbers: vec![
                LineNumber {
                    start_pc: 0,
                    line: 3,
                },
                LineNumber {
                    start_pc: 8,
                    line: 4,
                },
            ],
        };
        assert_eq!(code.line_for(0), Some(3));
        assert_eq!(code.line_for(7), Some(3));
        assert_eq!(code.line_for(12), Some(4));
    }
}
