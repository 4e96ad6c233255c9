//! Primitive binary helpers for class-file bytes.
//!
//! Every read is bounds checked and every write produces an exact-width
//! big-endian encoding. [`splice_replace`] is the single primitive used to
//! change class bytes: all higher-level edits compile down to it, the same
//! way text patches compile down to a byte-span replacement.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("Read of {width} bytes at offset {offset} overruns buffer of length {len}")]
    OutOfBounds {
        offset: usize,
        width: usize,
        len: usize,
    },

    #[error("Value {value} does not fit in {width} bytes")]
    ValueTooLarge { value: u64, width: usize },

    #[error("Invalid UTF-8 in {len} bytes at offset {offset}")]
    InvalidEncoding { offset: usize, len: usize },

    #[error("Unsupported integer width: {0}")]
    UnsupportedWidth(usize),
}

fn check_range(buffer: &[u8], offset: usize, width: usize) -> Result<(), CodecError> {
    match offset.checked_add(width) {
        Some(end) if end <= buffer.len() => Ok(()),
        _ => Err(CodecError::OutOfBounds {
            offset,
            width,
            len: buffer.len(),
        }),
    }
}

/// Read `width` bytes at `offset` as an unsigned big-endian integer.
///
/// Widths 1, 2 and 4 are accepted.
pub fn read_uint(buffer: &[u8], offset: usize, width: usize) -> Result<u32, CodecError> {
    if !matches!(width, 1 | 2 | 4) {
        return Err(CodecError::UnsupportedWidth(width));
    }
    check_range(buffer, offset, width)?;
    Ok(buffer[offset..offset + width]
        .iter()
        .fold(0u32, |acc, &b| (acc << 8) | u32::from(b)))
}

/// Encode `value` into exactly `width` big-endian bytes.
pub fn write_uint(value: u64, width: usize) -> Result<Vec<u8>, CodecError> {
    if !matches!(width, 1 | 2 | 4) {
        return Err(CodecError::UnsupportedWidth(width));
    }
    if value >> (width * 8) != 0 {
        return Err(CodecError::ValueTooLarge { value, width });
    }
    Ok((0..width)
        .rev()
        .map(|i| (value >> (i * 8)) as u8)
        .collect())
}

/// Decode `length` bytes at `offset` as UTF-8 text.
///
/// This is plain UTF-8, not the JVM's modified encoding: an embedded NUL
/// written as `C0 80` or a surrogate pair is reported as invalid.
pub fn read_utf8(buffer: &[u8], offset: usize, length: usize) -> Result<&str, CodecError> {
    check_range(buffer, offset, length)?;
    std::str::from_utf8(&buffer[offset..offset + length]).map_err(|_| {
        CodecError::InvalidEncoding {
            offset,
            len: length,
        }
    })
}

pub fn write_utf8(text: &str) -> Vec<u8> {
    text.as_bytes().to_vec()
}

/// Replace `old_length` bytes at `offset` with `new_bytes`.
///
/// Bytes before `offset` are kept verbatim and bytes after the replaced
/// region shift to follow the new content. The returned buffer has length
/// `buffer.len() - old_length + new_bytes.len()`.
pub fn splice_replace(
    buffer: Vec<u8>,
    offset: usize,
    old_length: usize,
    new_bytes: &[u8],
) -> Result<Vec<u8>, CodecError> {
    check_range(&buffer, offset, old_length)?;

    let mut out = Vec::with_capacity(buffer.len() - old_length + new_bytes.len());
    out.extend_from_slice(&buffer[..offset]);
    out.extend_from_slice(new_bytes);
    out.extend_from_slice(&buffer[offset + old_length..]);
    Ok(out)
}
