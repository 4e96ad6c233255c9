//! Field and method descriptors (`I`, `[Ljava/lang/String;`, `(IJ)V`).

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Malformed descriptor {descriptor:?} at position {position}")]
pub struct DescriptorError {
    pub descriptor: String,
    pub position: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldType {
    Byte,
    Char,
    Double,
    Float,
    Int,
    Long,
    Short,
    Boolean,
    Object(String),
    Array(Box<FieldType>),
}

impl FieldType {
    /// Local-variable slots taken by a value of this type.
    pub fn slots(&self) -> usize {
        match self {
            FieldType::Long | FieldType::Double => 2,
            _ => 1,
        }
    }

    /// Parse one type starting at `pos`, returning it and the next position.
    fn parse_at(s: &str, pos: usize) -> Option<(FieldType, usize)> {
        let bytes = s.as_bytes();
        let ty = match *bytes.get(pos)? {
            b'B' => FieldType::Byte,
            b'C' => FieldType::Char,
            b'D' => FieldType::Double,
            b'F' => FieldType::Float,
            b'I' => FieldType::Int,
            b'J' => FieldType::Long,
            b'S' => FieldType::Short,
            b'Z' => FieldType::Boolean,
            b'L' => {
                let end = pos + s[pos..].find(';')?;
                if end == pos + 1 {
                    return None;
                }
                return Some((FieldType::Object(s[pos + 1..end].to_string()), end + 1));
            }
            b'[' => {
                let (inner, next) = FieldType::parse_at(s, pos + 1)?;
                return Some((FieldType::Array(Box::new(inner)), next));
            }
            _ => return None,
        };
        Some((ty, pos + 1))
    }
}

impl FromStr for FieldType {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match FieldType::parse_at(s, 0) {
            Some((ty, end)) if end == s.len() => Ok(ty),
            Some((_, end)) => Err(DescriptorError {
                descriptor: s.to_string(),
                position: end,
            }),
            None => Err(DescriptorError {
                descriptor: s.to_string(),
                position: 0,
            }),
        }
    }
}

impl fmt::Display for FieldType {
    /// Java source spelling, e.g. `java.lang.String[]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FieldType::Byte => f.write_str("byte"),
            FieldType::Char => f.write_str("char"),
            FieldType::Double => f.write_str("double"),
            FieldType::Float => f.write_str("float"),
            FieldType::Int => f.write_str("int"),
            FieldType::Long => f.write_str("long"),
            FieldType::Short => f.write_str("short"),
            FieldType::Boolean => f.write_str("boolean"),
            FieldType::Object(name) => f.write_str(&name.replace('/', ".")),
            FieldType::Array(inner) => write!(f, "{inner}[]"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodDescriptor {
    pub params: Vec<FieldType>,
    /// `None` for `void`
    pub ret: Option<FieldType>,
}

impl MethodDescriptor {
    pub fn arg_slots(&self) -> usize {
        self.params.iter().map(FieldType::slots).sum()
    }
}

impl FromStr for MethodDescriptor {
    type Err = DescriptorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = |position| DescriptorError {
            descriptor: s.to_string(),
            position,
        };

        if !s.starts_with('(') {
            return Err(err(0));
        }
        let mut pos = 1;
        let mut params = Vec::new();
        while s.as_bytes().get(pos) != Some(&b')') {
            let (ty, next) = FieldType::parse_at(s, pos).ok_or_else(|| err(pos))?;
            params.push(ty);
            pos = next;
        }
        pos += 1;

        let ret = if &s[pos..] == "V" {
            None
        } else {
            match FieldType::parse_at(s, pos) {
                Some((ty, end)) if end == s.len() => Some(ty),
                _ => return Err(err(pos)),
            }
        };

        Ok(MethodDescriptor { params, ret })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field_types() {
        assert_eq!("I".parse::<FieldType>().unwrap(), FieldType::Int);
        assert_eq!(
            "[Ljava/lang/String;".parse::<FieldType>().unwrap(),
            FieldType::Array(Box::new(FieldType::Object("java/lang/String".into())))
        );
        assert!("L;".parse::<FieldType>().is_err());
        assert!("II".parse::<FieldType>().is_err());
        assert!("Q".parse::<FieldType>().is_err());
    }

    #[test]
    fn test_method_descriptor() {
        let main: MethodDescriptor = "([Ljava/lang/String;)V".parse().unwrap();
        assert_eq!(main.params.len(), 1);
        assert_eq!(main.ret, None);

        let mixed: MethodDescriptor = "(IJLjava/lang/Object;D)J".parse().unwrap();
        assert_eq!(mixed.params.len(), 4);
        assert_eq!(mixed.arg_slots(), 6);
        assert_eq!(mixed.ret, Some(FieldType::Long));
    }

    #[test]
    fn test_method_descriptor_errors() {
        assert!("V".parse::<MethodDescriptor>().is_err());
        assert!("(I".parse::<MethodDescriptor>().is_err());
        assert!("(I)".parse::<MethodDescriptor>().is_err());
        assert!("(I)VV".parse::<MethodDescriptor>().is_err());
    }

    #[test]
    fn test_display_java_spelling() {
        let ty: FieldType = "[Ljava/lang/String;".parse().unwrap();
        assert_eq!(ty.to_string(), "java.lang.String[]");
    }
}
