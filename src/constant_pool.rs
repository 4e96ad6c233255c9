//! Constant-pool walking and UTF-8 constant patching.
//!
//! The pool starts right after the 16-bit entry count at offset 8. Each
//! record begins with a tag byte; every tag except UTF-8 has a fixed record
//! length, UTF-8 records carry a 16-bit length prefix. Indices are 1-based
//! and the count field is one greater than the number of usable slots.
//! Long and Double records take two slots.

use crate::codec::{read_uint, read_utf8, splice_replace, write_uint, write_utf8, CodecError};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

pub const CONSTANT_POOL_COUNT_OFFSET: usize = 8;
pub const CONSTANT_POOL_START: usize = CONSTANT_POOL_COUNT_OFFSET + U2;

const U1: usize = 1;
const U2: usize = 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PatchError {
    #[error("Class bytes truncated: {width} bytes needed at offset {offset}, buffer length {len}")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },

    #[error("Malformed constant pool: unrecognized tag {tag} for entry #{index} at offset {offset}")]
    MalformedConstantPool { index: u16, offset: usize, tag: u8 },

    #[error("Replacement is {len} bytes, a UTF-8 constant holds at most 65535")]
    ValueTooLarge { len: usize },

    #[error("Invalid UTF-8 in {len} bytes at offset {offset}")]
    InvalidEncoding { offset: usize, len: usize },
}

impl From<CodecError> for PatchError {
    fn from(e: CodecError) -> Self {
        match e {
            CodecError::OutOfBounds { offset, width, len } => {
                PatchError::OutOfBounds { offset, width, len }
            }
            CodecError::ValueTooLarge { value, .. } => PatchError::ValueTooLarge {
                len: value as usize,
            },
            CodecError::InvalidEncoding { offset, len } => {
                PatchError::InvalidEncoding { offset, len }
            }
            // Widths are constants in this module
            CodecError::UnsupportedWidth(width) => PatchError::OutOfBounds {
                offset: 0,
                width,
                len: 0,
            },
        }
    }
}

/// Constant-pool entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tag {
    Utf8,
    Integer,
    Float,
    Long,
    Double,
    Class,
    String,
    Fieldref,
    Methodref,
    InterfaceMethodref,
    NameAndType,
    MethodHandle,
    MethodType,
    Dynamic,
    InvokeDynamic,
    Module,
    Package,
}

impl Tag {
    pub fn from_byte(byte: u8) -> Option<Tag> {
        Some(match byte {
            1 => Tag::Utf8,
            3 => Tag::Integer,
            4 => Tag::Float,
            5 => Tag::Long,
            6 => Tag::Double,
            7 => Tag::Class,
            8 => Tag::String,
            9 => Tag::Fieldref,
            10 => Tag::Methodref,
            11 => Tag::InterfaceMethodref,
            12 => Tag::NameAndType,
            15 => Tag::MethodHandle,
            16 => Tag::MethodType,
            17 => Tag::Dynamic,
            18 => Tag::InvokeDynamic,
            19 => Tag::Module,
            20 => Tag::Package,
            _ => return None,
        })
    }

    pub fn byte(self) -> u8 {
        match self {
            Tag::Utf8 => 1,
            Tag::Integer => 3,
            Tag::Float => 4,
            Tag::Long => 5,
            Tag::Double => 6,
            Tag::Class => 7,
            Tag::String => 8,
            Tag::Fieldref => 9,
            Tag::Methodref => 10,
            Tag::InterfaceMethodref => 11,
            Tag::NameAndType => 12,
            Tag::MethodHandle => 15,
            Tag::MethodType => 16,
            Tag::Dynamic => 17,
            Tag::InvokeDynamic => 18,
            Tag::Module => 19,
            Tag::Package => 20,
        }
    }

    /// Record length including the tag byte, `None` for UTF-8.
    pub fn fixed_len(self) -> Option<usize> {
        match self {
            Tag::Utf8 => None,
            Tag::Class | Tag::String | Tag::MethodType | Tag::Module | Tag::Package => Some(3),
            Tag::MethodHandle => Some(4),
            Tag::Integer
            | Tag::Float
            | Tag::Fieldref
            | Tag::Methodref
            | Tag::InterfaceMethodref
            | Tag::NameAndType
            | Tag::Dynamic
            | Tag::InvokeDynamic => Some(5),
            Tag::Long | Tag::Double => Some(9),
        }
    }

    /// Number of pool indices the entry occupies.
    pub fn slots(self) -> u32 {
        match self {
            Tag::Long | Tag::Double => 2,
            _ => 1,
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tag::Utf8 => "Utf8",
            Tag::Integer => "Integer",
            Tag::Float => "Float",
            Tag::Long => "Long",
            Tag::Double => "Double",
            Tag::Class => "Class",
            Tag::String => "String",
            Tag::Fieldref => "Fieldref",
            Tag::Methodref => "Methodref",
            Tag::InterfaceMethodref => "InterfaceMethodref",
            Tag::NameAndType => "NameAndType",
            Tag::MethodHandle => "MethodHandle",
            Tag::MethodType => "MethodType",
            Tag::Dynamic => "Dynamic",
            Tag::InvokeDynamic => "InvokeDynamic",
            Tag::Module => "Module",
            Tag::Package => "Package",
        };
        f.write_str(name)
    }
}

/// How a stored UTF-8 constant is compared against a target string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchMode {
    /// Character-wise comparison ignoring case.
    #[default]
    CaseInsensitive,
    Exact,
}

impl MatchMode {
    pub fn matches(self, stored: &str, target: &str) -> bool {
        match self {
            MatchMode::Exact => stored == target,
            MatchMode::CaseInsensitive => eq_ignore_case(stored, target),
        }
    }
}

fn eq_ignore_case(a: &str, b: &str) -> bool {
    if a.chars().count() != b.chars().count() {
        return false;
    }
    a.chars().zip(b.chars()).all(|(x, y)| {
        x == y || x.to_uppercase().eq(y.to_uppercase()) || x.to_lowercase().eq(y.to_lowercase())
    })
}

/// Borrowed view of one constant-pool record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConstantPoolEntry<'a> {
    /// 1-based pool index
    pub index: u16,
    /// Offset of the tag byte
    pub offset: usize,
    pub tag: Tag,
    /// Record length including the tag byte
    pub record_len: usize,
    bytes: &'a [u8],
}

impl<'a> ConstantPoolEntry<'a> {
    /// Offset of the first content byte of a UTF-8 record.
    pub fn content_offset(&self) -> usize {
        self.offset + U1 + U2
    }

    pub fn content_len(&self) -> usize {
        self.record_len - U1 - U2
    }

    /// Raw content of a UTF-8 record.
    pub fn utf8_bytes(&self) -> Option<&'a [u8]> {
        (self.tag == Tag::Utf8)
            .then(|| &self.bytes[self.content_offset()..self.offset + self.record_len])
    }

    /// Decoded content of a UTF-8 record.
    pub fn utf8(&self) -> Option<Result<&'a str, CodecError>> {
        (self.tag == Tag::Utf8)
            .then(|| read_utf8(self.bytes, self.content_offset(), self.content_len()))
    }

    /// Bytes of the record after the tag.
    pub fn body(&self) -> &'a [u8] {
        &self.bytes[self.offset + U1..self.offset + self.record_len]
    }
}

/// Iterator over constant-pool records.
///
/// Stops after the first error; a malformed record leaves every later
/// offset unknown.
#[derive(Debug, Clone)]
pub struct Walker<'a> {
    bytes: &'a [u8],
    count: u16,
    index: u32,
    offset: usize,
    failed: bool,
}

impl<'a> Walker<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self, PatchError> {
        let count = read_uint(bytes, CONSTANT_POOL_COUNT_OFFSET, U2)? as u16;
        Ok(Self {
            bytes,
            count,
            index: 1,
            offset: CONSTANT_POOL_START,
            failed: false,
        })
    }

    /// The raw count field (one more than the number of usable slots).
    pub fn declared_count(&self) -> u16 {
        self.count
    }

    /// Offset of the next unread record, or of the end of the pool once
    /// the iterator is exhausted.
    pub fn offset(&self) -> usize {
        self.offset
    }

    fn read_entry(&self) -> Result<ConstantPoolEntry<'a>, PatchError> {
        let tag_byte = read_uint(self.bytes, self.offset, U1)? as u8;
        let tag = Tag::from_byte(tag_byte).ok_or(PatchError::MalformedConstantPool {
            index: self.index as u16,
            offset: self.offset,
            tag: tag_byte,
        })?;

        let record_len = match tag.fixed_len() {
            Some(len) => len,
            None => U1 + U2 + read_uint(self.bytes, self.offset + U1, U2)? as usize,
        };

        if self.offset + record_len > self.bytes.len() {
            return Err(PatchError::OutOfBounds {
                offset: self.offset,
                width: record_len,
                len: self.bytes.len(),
            });
        }

        Ok(ConstantPoolEntry {
            index: self.index as u16,
            offset: self.offset,
            tag,
            record_len,
            bytes: self.bytes,
        })
    }
}

impl<'a> Iterator for Walker<'a> {
    type Item = Result<ConstantPoolEntry<'a>, PatchError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.index >= u32::from(self.count) {
            return None;
        }
        let result = self.read_entry();
        match &result {
            Ok(entry) => {
                self.offset += entry.record_len;
                self.index += entry.tag.slots();
            }
            Err(_) => self.failed = true,
        }
        Some(result)
    }
}

/// Every record in the pool, in order.
pub fn entries(bytes: &[u8]) -> Result<Vec<ConstantPoolEntry<'_>>, PatchError> {
    Walker::new(bytes)?.collect()
}

/// First UTF-8 record whose text matches `target`.
///
/// Records that are not valid plain UTF-8 never match. The scan stops at
/// the first match, so records after it are not validated.
pub fn find_utf8<'a>(
    bytes: &'a [u8],
    target: &str,
    mode: MatchMode,
) -> Result<Option<ConstantPoolEntry<'a>>, PatchError> {
    for entry in Walker::new(bytes)? {
        let entry = entry?;
        match entry.utf8() {
            Some(Ok(text)) if mode.matches(text, target) => return Ok(Some(entry)),
            Some(Err(e)) => debug!("skipping constant #{}: {}", entry.index, e),
            _ => {}
        }
    }
    Ok(None)
}

/// Outcome of a patch call.
#[derive(Debug, Clone, PartialEq, Eq)]
#[must_use = "Patched owns the resulting class bytes"]
pub enum Patched {
    /// The first matching constant was rewritten
    Replaced {
        bytes: Vec<u8>,
        /// Pool index of the rewritten record
        index: u16,
        /// Offset of its tag byte (unchanged by the patch)
        offset: usize,
    },
    /// No constant matched; the input is returned untouched
    Unchanged(Vec<u8>),
}

impl Patched {
    pub fn is_replaced(&self) -> bool {
        matches!(self, Patched::Replaced { .. })
    }

    pub fn bytes(&self) -> &[u8] {
        match self {
            Patched::Replaced { bytes, .. } | Patched::Unchanged(bytes) => bytes,
        }
    }

    pub fn into_bytes(self) -> Vec<u8> {
        match self {
            Patched::Replaced { bytes, .. } | Patched::Unchanged(bytes) => bytes,
        }
    }
}

/// Replace the first UTF-8 constant equal to `target` ignoring case.
pub fn patch_utf8_constant(
    bytes: Vec<u8>,
    target: &str,
    replacement: &str,
) -> Result<Patched, PatchError> {
    patch_utf8_constant_with(bytes, target, replacement, MatchMode::CaseInsensitive)
}

/// Replace the first UTF-8 constant matching `target` under `mode`.
///
/// The content is spliced before the length field so the length field's
/// offset is still valid for the second splice.
pub fn patch_utf8_constant_with(
    bytes: Vec<u8>,
    target: &str,
    replacement: &str,
    mode: MatchMode,
) -> Result<Patched, PatchError> {
    let new_content = write_utf8(replacement);
    if new_content.len() > usize::from(u16::MAX) {
        return Err(PatchError::ValueTooLarge {
            len: new_content.len(),
        });
    }
    let new_len = write_uint(new_content.len() as u64, U2)?;

    let found = find_utf8(&bytes, target, mode)?
        .map(|entry| (entry.index, entry.offset, entry.content_len()));

    let Some((index, offset, old_len)) = found else {
        debug!("no UTF-8 constant matching {target:?}");
        return Ok(Patched::Unchanged(bytes));
    };

    let bytes = splice_replace(bytes, offset + U1 + U2, old_len, &new_content)?;
    let bytes = splice_replace(bytes, offset + U1, U2, &new_len)?;

    info!(
        "patched constant #{index} at offset {offset}: {target:?} -> {replacement:?} ({old_len} -> {} bytes)",
        new_content.len()
    );

    Ok(Patched::Replaced {
        bytes,
        index,
        offset,
    })
}
