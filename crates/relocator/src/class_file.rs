//! Class-file constant pool rewriting.
//!
//! Every symbolic reference in a class file (class names, descriptors,
//! signatures, string literals) bottoms out in a `CONSTANT_Utf8` entry, and
//! all other structures refer to constants by index. Rewriting the UTF-8
//! entries in place and copying everything else verbatim therefore relocates
//! the whole class without parsing fields, methods or attributes.

use thiserror::Error;

use crate::remap::Remapper;

const MAGIC: [u8; 4] = [0xCA, 0xFE, 0xBA, 0xBE];

const TAG_UTF8: u8 = 1;

#[derive(Debug, Error)]
pub(crate) enum ClassFileError {
    #[error("not a class file (bad magic)")]
    BadMagic,

    #[error("truncated at byte {0}")]
    Truncated(usize),

    #[error("unknown constant pool tag {tag} at index {index}")]
    UnknownTag { tag: u8, index: u16 },

    #[error("constant {index} exceeds 65535 bytes after relocation")]
    ConstantTooLong { index: u16 },
}

enum Constant<'a> {
    /// `raw` is the whole entry (tag, length, bytes); `text` just the bytes.
    Utf8 { raw: &'a [u8], text: &'a [u8] },
    Other(&'a [u8]),
}

struct ConstantPool<'a> {
    header: &'a [u8],
    count: u16,
    constants: Vec<(u16, Constant<'a>)>,
    rest: &'a [u8],
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ClassFileError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ClassFileError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ClassFileError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassFileError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }
}

fn parse(bytes: &[u8]) -> Result<ConstantPool<'_>, ClassFileError> {
    let mut reader = ByteReader { bytes, pos: 0 };
    if reader.take(4)? != MAGIC.as_slice() {
        return Err(ClassFileError::BadMagic);
    }
    reader.take(4)?; // minor + major version
    let header = &bytes[..8];
    let count = reader.u16()?;

    let mut constants = Vec::with_capacity(usize::from(count));
    let mut index: u16 = 1;
    while index < count {
        let start = reader.pos;
        let tag = reader.u8()?;
        let mut slots = 1;
        let constant = match tag {
            TAG_UTF8 => {
                let len = reader.u16()?;
                let text = reader.take(usize::from(len))?;
                Constant::Utf8 {
                    raw: &bytes[start..reader.pos],
                    text,
                }
            }
            // Integer, Float
            3 | 4 => {
                reader.take(4)?;
                Constant::Other(&bytes[start..reader.pos])
            }
            // Long, Double take two pool slots
            5 | 6 => {
                reader.take(8)?;
                slots = 2;
                Constant::Other(&bytes[start..reader.pos])
            }
            // Class, String, MethodType, Module, Package
            7 | 8 | 16 | 19 | 20 => {
                reader.take(2)?;
                Constant::Other(&bytes[start..reader.pos])
            }
            // Fieldref, Methodref, InterfaceMethodref, NameAndType, Dynamic, InvokeDynamic
            9 | 10 | 11 | 12 | 17 | 18 => {
                reader.take(4)?;
                Constant::Other(&bytes[start..reader.pos])
            }
            // MethodHandle
            15 => {
                reader.take(3)?;
                Constant::Other(&bytes[start..reader.pos])
            }
            _ => return Err(ClassFileError::UnknownTag { tag, index }),
        };
        constants.push((index, constant));
        index = index.saturating_add(slots);
    }

    Ok(ConstantPool {
        header,
        count,
        constants,
        rest: &bytes[reader.pos..],
    })
}

/// Relocates a class file. Returns `None` when nothing matched.
pub(crate) fn rewrite(bytes: &[u8], remapper: &Remapper<'_>) -> Result<Option<Vec<u8>>, ClassFileError> {
    let pool = parse(bytes)?;
    let mut out = Vec::with_capacity(bytes.len() + 64);
    out.extend_from_slice(pool.header);
    out.extend_from_slice(&pool.count.to_be_bytes());

    let mut changed = false;
    for (index, constant) in &pool.constants {
        match constant {
            Constant::Utf8 { raw, text } => {
                // Modified UTF-8 that is not also plain UTF-8 (embedded NUL,
                // supplementary characters) cannot name a package; keep it.
                let relocated = std::str::from_utf8(text)
                    .ok()
                    .and_then(|value| remapper.constant(value));
                match relocated {
                    Some(value) => {
                        let len = u16::try_from(value.len())
                            .map_err(|_| ClassFileError::ConstantTooLong { index: *index })?;
                        out.push(TAG_UTF8);
                        out.extend_from_slice(&len.to_be_bytes());
                        out.extend_from_slice(value.as_bytes());
                        changed = true;
                    }
                    None => out.extend_from_slice(raw),
                }
            }
            Constant::Other(raw) => out.extend_from_slice(raw),
        }
    }
    out.extend_from_slice(pool.rest);

    Ok(changed.then_some(out))
}

/// Every UTF-8 constant that is valid UTF-8, in pool order.
pub(crate) fn utf8_constants(bytes: &[u8]) -> Result<Vec<String>, ClassFileError> {
    let pool = parse(bytes)?;
    Ok(pool
        .constants
        .iter()
        .filter_map(|(_, constant)| match constant {
            Constant::Utf8 { text, .. } => std::str::from_utf8(text).ok().map(str::to_string),
            Constant::Other(_) => None,
        })
        .collect())
}
