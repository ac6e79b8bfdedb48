//! Class-file codec: full parse and byte-faithful write.
//!
//! The constant pool is append-only. Existing slots keep their index and
//! their raw bytes, so a class that goes through `parse` and `to_bytes`
//! without edits is reproduced exactly.

use std::collections::HashMap;
use thiserror::Error;

pub const TAG_UTF8: u8 = 1;
pub const TAG_CLASS: u8 = 7;
pub const TAG_FIELDREF: u8 = 9;
pub const TAG_METHODREF: u8 = 10;
pub const TAG_INTERFACE_METHODREF: u8 = 11;
pub const TAG_DYNAMIC: u8 = 17;
pub const TAG_INVOKE_DYNAMIC: u8 = 18;

pub const ACC_PRIVATE: u16 = 0x0002;
pub const ACC_STATIC: u16 = 0x0008;

const MAGIC: u32 = 0xCAFEBABE;
const MAX_POOL_SIZE: usize = u16::MAX as usize;

#[derive(Debug, Error)]
pub enum ClassParseError {
    #[error("unexpected end of class file")]
    UnexpectedEof,
    #[error("invalid class file magic header")]
    InvalidMagic,
    #[error("unsupported constant pool tag {tag}")]
    UnsupportedConstant { tag: u8 },
    #[error("invalid constant pool index {index}")]
    InvalidConstantIndex { index: u16 },
    #[error("malformed modified UTF-8 in constant pool entry {index}")]
    Utf8Decode { index: u16 },
    #[error("constant pool would exceed {MAX_POOL_SIZE} entries")]
    ConstantPoolOverflow,
    #[error("{0} bytes of trailing data after class file")]
    TrailingData(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Constant {
    /// Raw modified UTF-8 bytes, kept as read.
    Utf8(Vec<u8>),
    Integer(u32),
    Float(u32),
    Long(u64),
    Double(u64),
    Class { name_index: u16 },
    String { string_index: u16 },
    /// Fieldref, Methodref or InterfaceMethodref.
    MemberRef {
        tag: u8,
        class_index: u16,
        name_and_type_index: u16,
    },
    NameAndType { name_index: u16, descriptor_index: u16 },
    MethodHandle { kind: u8, reference_index: u16 },
    MethodType { descriptor_index: u16 },
    /// Dynamic or InvokeDynamic.
    Dynamic {
        tag: u8,
        bootstrap_index: u16,
        name_and_type_index: u16,
    },
    Module { name_index: u16 },
    Package { name_index: u16 },
    /// Slot 0 and the second slot of Long/Double entries.
    Unusable,
}

#[derive(Debug, Clone, Default)]
pub struct ConstantPool {
    entries: Vec<Constant>,
    utf8_lookup: HashMap<Vec<u8>, u16>,
}

impl ConstantPool {
    pub fn new() -> Self {
        Self {
            entries: vec![Constant::Unusable],
            utf8_lookup: HashMap::new(),
        }
    }

    fn parse(reader: &mut ClassReader<'_>) -> Result<Self, ClassParseError> {
        let count = reader.read_u2()? as usize;
        let mut pool = Self {
            entries: Vec::with_capacity(count),
            utf8_lookup: HashMap::new(),
        };
        pool.entries.push(Constant::Unusable);

        while pool.entries.len() < count {
            let tag = reader.read_u1()?;
            let entry = match tag {
                TAG_UTF8 => {
                    let length = reader.read_u2()? as usize;
                    let bytes = reader.read_slice(length)?.to_vec();
                    let index = pool.entries.len() as u16;
                    pool.utf8_lookup.entry(bytes.clone()).or_insert(index);
                    Constant::Utf8(bytes)
                }
                3 => Constant::Integer(reader.read_u4()?),
                4 => Constant::Float(reader.read_u4()?),
                5 | 6 => {
                    let high = reader.read_u4()? as u64;
                    let low = reader.read_u4()? as u64;
                    let value = (high << 32) | low;
                    let entry = if tag == 5 {
                        Constant::Long(value)
                    } else {
                        Constant::Double(value)
                    };
                    pool.entries.push(entry);
                    Constant::Unusable
                }
                TAG_CLASS => Constant::Class {
                    name_index: reader.read_u2()?,
                },
                8 => Constant::String {
                    string_index: reader.read_u2()?,
                },
                TAG_FIELDREF | TAG_METHODREF | TAG_INTERFACE_METHODREF => Constant::MemberRef {
                    tag,
                    class_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                12 => Constant::NameAndType {
                    name_index: reader.read_u2()?,
                    descriptor_index: reader.read_u2()?,
                },
                15 => Constant::MethodHandle {
                    kind: reader.read_u1()?,
                    reference_index: reader.read_u2()?,
                },
                16 => Constant::MethodType {
                    descriptor_index: reader.read_u2()?,
                },
                TAG_DYNAMIC | TAG_INVOKE_DYNAMIC => Constant::Dynamic {
                    tag,
                    bootstrap_index: reader.read_u2()?,
                    name_and_type_index: reader.read_u2()?,
                },
                19 => Constant::Module {
                    name_index: reader.read_u2()?,
                },
                20 => Constant::Package {
                    name_index: reader.read_u2()?,
                },
                other => return Err(ClassParseError::UnsupportedConstant { tag: other }),
            };
            pool.entries.push(entry);
        }

        Ok(pool)
    }

    fn write(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&(self.entries.len() as u16).to_be_bytes());
        for entry in self.entries.iter().skip(1) {
            match entry {
                Constant::Utf8(bytes) => {
                    out.push(TAG_UTF8);
                    out.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
                    out.extend_from_slice(bytes);
                }
                Constant::Integer(value) => {
                    out.push(3);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                Constant::Float(value) => {
                    out.push(4);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                Constant::Long(value) => {
                    out.push(5);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                Constant::Double(value) => {
                    out.push(6);
                    out.extend_from_slice(&value.to_be_bytes());
                }
                Constant::Class { name_index } => write_u1_u2(out, TAG_CLASS, *name_index),
                Constant::String { string_index } => write_u1_u2(out, 8, *string_index),
                Constant::MemberRef {
                    tag,
                    class_index,
                    name_and_type_index,
                } => {
                    write_u1_u2(out, *tag, *class_index);
                    out.extend_from_slice(&name_and_type_index.to_be_bytes());
                }
                Constant::NameAndType {
                    name_index,
                    descriptor_index,
                } => {
                    write_u1_u2(out, 12, *name_index);
                    out.extend_from_slice(&descriptor_index.to_be_bytes());
                }
                Constant::MethodHandle {
                    kind,
                    reference_index,
                } => {
                    out.push(15);
                    out.push(*kind);
                    out.extend_from_slice(&reference_index.to_be_bytes());
                }
                Constant::MethodType { descriptor_index } => {
                    write_u1_u2(out, 16, *descriptor_index)
                }
                Constant::Dynamic {
                    tag,
                    bootstrap_index,
                    name_and_type_index,
                } => {
                    write_u1_u2(out, *tag, *bootstrap_index);
                    out.extend_from_slice(&name_and_type_index.to_be_bytes());
                }
                Constant::Module { name_index } => write_u1_u2(out, 19, *name_index),
                Constant::Package { name_index } => write_u1_u2(out, 20, *name_index),
                // second half of a Long/Double, nothing on disk
                Constant::Unusable => {}
            }
        }
    }

    /// Number of slots, including the unused slot 0.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.len() <= 1
    }

    pub fn get(&self, index: u16) -> Result<&Constant, ClassParseError> {
        self.entries
            .get(index as usize)
            .ok_or(ClassParseError::InvalidConstantIndex { index })
    }

    /// Replaces the entry in an existing slot.
    pub fn set(&mut self, index: u16, constant: Constant) -> Result<(), ClassParseError> {
        let slot = self
            .entries
            .get_mut(index as usize)
            .ok_or(ClassParseError::InvalidConstantIndex { index })?;
        *slot = constant;
        Ok(())
    }

    pub fn utf8(&self, index: u16) -> Result<String, ClassParseError> {
        match self.get(index)? {
            Constant::Utf8(bytes) => {
                decode_modified_utf8(bytes).ok_or(ClassParseError::Utf8Decode { index })
            }
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    pub fn class_name(&self, index: u16) -> Result<String, ClassParseError> {
        match self.get(index)? {
            Constant::Class { name_index } => self.utf8(*name_index),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    /// `(name, descriptor)` of a NameAndType entry.
    pub fn name_and_type(&self, index: u16) -> Result<(String, String), ClassParseError> {
        match self.get(index)? {
            Constant::NameAndType {
                name_index,
                descriptor_index,
            } => Ok((self.utf8(*name_index)?, self.utf8(*descriptor_index)?)),
            _ => Err(ClassParseError::InvalidConstantIndex { index }),
        }
    }

    pub fn push(&mut self, constant: Constant) -> Result<u16, ClassParseError> {
        let wide = matches!(constant, Constant::Long(_) | Constant::Double(_));
        let needed = if wide { 2 } else { 1 };
        if self.entries.len() + needed > MAX_POOL_SIZE {
            return Err(ClassParseError::ConstantPoolOverflow);
        }
        let index = self.entries.len() as u16;
        self.entries.push(constant);
        if wide {
            self.entries.push(Constant::Unusable);
        }
        Ok(index)
    }

    /// Index of a Utf8 entry holding `value`, appending one when absent.
    pub fn intern_utf8(&mut self, value: &str) -> Result<u16, ClassParseError> {
        let bytes = encode_modified_utf8(value);
        if let Some(index) = self.utf8_lookup.get(&bytes) {
            return Ok(*index);
        }
        let index = self.push(Constant::Utf8(bytes.clone()))?;
        self.utf8_lookup.insert(bytes, index);
        Ok(index)
    }

    pub fn intern_class(&mut self, name: &str) -> Result<u16, ClassParseError> {
        let name_index = self.intern_utf8(name)?;
        let existing = self
            .entries
            .iter()
            .position(|entry| *entry == Constant::Class { name_index });
        match existing {
            Some(index) => Ok(index as u16),
            None => self.push(Constant::Class { name_index }),
        }
    }

    pub fn intern_name_and_type(&mut self, name: &str, descriptor: &str) -> Result<u16, ClassParseError> {
        let name_index = self.intern_utf8(name)?;
        let descriptor_index = self.intern_utf8(descriptor)?;
        let wanted = Constant::NameAndType {
            name_index,
            descriptor_index,
        };
        match self.entries.iter().position(|entry| *entry == wanted) {
            Some(index) => Ok(index as u16),
            None => self.push(wanted),
        }
    }

    #[cfg(test)]
    pub(crate) fn intern_member_ref(
        &mut self,
        tag: u8,
        owner: &str,
        name: &str,
        descriptor: &str,
    ) -> Result<u16, ClassParseError> {
        let class_index = self.intern_class(owner)?;
        let name_and_type_index = self.intern_name_and_type(name, descriptor)?;
        self.push(Constant::MemberRef {
            tag,
            class_index,
            name_and_type_index,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attribute {
    pub name_index: u16,
    pub info: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    pub access_flags: u16,
    pub name_index: u16,
    pub descriptor_index: u16,
    pub attributes: Vec<Attribute>,
}

#[derive(Debug, Clone)]
pub struct ClassFile {
    pub minor_version: u16,
    pub major_version: u16,
    pub pool: ConstantPool,
    pub access_flags: u16,
    pub this_class: u16,
    pub super_class: u16,
    pub interfaces: Vec<u16>,
    pub fields: Vec<MemberInfo>,
    pub methods: Vec<MemberInfo>,
    pub attributes: Vec<Attribute>,
}

/// The part of a class the inheritance walk needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassHeader {
    pub name: String,
    pub super_name: Option<String>,
    pub interfaces: Vec<String>,
}

impl ClassFile {
    /// Empty public class, Java 8 format.
    pub fn new(name: &str, super_name: Option<&str>) -> Result<Self, ClassParseError> {
        let mut pool = ConstantPool::new();
        let this_class = pool.intern_class(name)?;
        let super_class = match super_name {
            Some(super_name) => pool.intern_class(super_name)?,
            None => 0,
        };
        Ok(Self {
            minor_version: 0,
            major_version: 52,
            pool,
            access_flags: 0x0021,
            this_class,
            super_class,
            interfaces: Vec::new(),
            fields: Vec::new(),
            methods: Vec::new(),
            attributes: Vec::new(),
        })
    }

    pub fn parse(bytes: &[u8]) -> Result<Self, ClassParseError> {
        let mut reader = ClassReader::new(bytes);
        reader.expect_magic()?;
        let minor_version = reader.read_u2()?;
        let major_version = reader.read_u2()?;
        let pool = ConstantPool::parse(&mut reader)?;

        let access_flags = reader.read_u2()?;
        let this_class = reader.read_u2()?;
        let super_class = reader.read_u2()?;
        let interfaces_count = reader.read_u2()?;
        let mut interfaces = Vec::with_capacity(interfaces_count as usize);
        for _ in 0..interfaces_count {
            interfaces.push(reader.read_u2()?);
        }

        let fields = read_members(&mut reader)?;
        let methods = read_members(&mut reader)?;
        let attributes = read_attributes(&mut reader)?;

        if reader.remaining() != 0 {
            return Err(ClassParseError::TrailingData(reader.remaining()));
        }

        Ok(Self {
            minor_version,
            major_version,
            pool,
            access_flags,
            this_class,
            super_class,
            interfaces,
            fields,
            methods,
            attributes,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1024);
        out.extend_from_slice(&MAGIC.to_be_bytes());
        out.extend_from_slice(&self.minor_version.to_be_bytes());
        out.extend_from_slice(&self.major_version.to_be_bytes());
        self.pool.write(&mut out);
        out.extend_from_slice(&self.access_flags.to_be_bytes());
        out.extend_from_slice(&self.this_class.to_be_bytes());
        out.extend_from_slice(&self.super_class.to_be_bytes());
        out.extend_from_slice(&(self.interfaces.len() as u16).to_be_bytes());
        for interface in &self.interfaces {
            out.extend_from_slice(&interface.to_be_bytes());
        }
        write_members(&mut out, &self.fields);
        write_members(&mut out, &self.methods);
        write_attributes(&mut out, &self.attributes);
        out
    }

    pub fn name(&self) -> Result<String, ClassParseError> {
        self.pool.class_name(self.this_class)
    }

    pub fn header(&self) -> Result<ClassHeader, ClassParseError> {
        header_from(&self.pool, self.this_class, self.super_class, &self.interfaces)
    }

    pub fn add_interface(&mut self, name: &str) -> Result<(), ClassParseError> {
        let index = self.pool.intern_class(name)?;
        self.interfaces.push(index);
        Ok(())
    }

    /// Appends a field and returns its position in `fields`.
    pub fn add_field(&mut self, access_flags: u16, name: &str, descriptor: &str) -> Result<usize, ClassParseError> {
        let member = new_member(&mut self.pool, access_flags, name, descriptor)?;
        self.fields.push(member);
        Ok(self.fields.len() - 1)
    }

    /// Appends a method and returns its position in `methods`.
    pub fn add_method(&mut self, access_flags: u16, name: &str, descriptor: &str) -> Result<usize, ClassParseError> {
        let member = new_member(&mut self.pool, access_flags, name, descriptor)?;
        self.methods.push(member);
        Ok(self.methods.len() - 1)
    }

    /// Builds a `Signature` attribute for the class or one of its members.
    pub fn signature_attribute(&mut self, signature: &str) -> Result<Attribute, ClassParseError> {
        let name_index = self.pool.intern_utf8("Signature")?;
        let signature_index = self.pool.intern_utf8(signature)?;
        Ok(Attribute {
            name_index,
            info: signature_index.to_be_bytes().to_vec(),
        })
    }
}

/// Reads only what precedes the field table: pool, access flags, this,
/// super and interfaces. Anything after that is never touched.
pub fn parse_header(bytes: &[u8]) -> Result<ClassHeader, ClassParseError> {
    let mut reader = ClassReader::new(bytes);
    reader.expect_magic()?;
    let _minor_version = reader.read_u2()?;
    let _major_version = reader.read_u2()?;
    let pool = ConstantPool::parse(&mut reader)?;

    let _access_flags = reader.read_u2()?;
    let this_class = reader.read_u2()?;
    let super_class = reader.read_u2()?;
    let interfaces_count = reader.read_u2()?;
    let mut interfaces = Vec::with_capacity(interfaces_count as usize);
    for _ in 0..interfaces_count {
        interfaces.push(reader.read_u2()?);
    }

    header_from(&pool, this_class, super_class, &interfaces)
}

fn header_from(
    pool: &ConstantPool,
    this_class: u16,
    super_class: u16,
    interfaces: &[u16],
) -> Result<ClassHeader, ClassParseError> {
    let super_name = if super_class == 0 {
        None
    } else {
        Some(pool.class_name(super_class)?)
    };
    Ok(ClassHeader {
        name: pool.class_name(this_class)?,
        super_name,
        interfaces: interfaces
            .iter()
            .map(|index| pool.class_name(*index))
            .collect::<Result<_, _>>()?,
    })
}

fn new_member(
    pool: &mut ConstantPool,
    access_flags: u16,
    name: &str,
    descriptor: &str,
) -> Result<MemberInfo, ClassParseError> {
    Ok(MemberInfo {
        access_flags,
        name_index: pool.intern_utf8(name)?,
        descriptor_index: pool.intern_utf8(descriptor)?,
        attributes: Vec::new(),
    })
}

fn read_members(reader: &mut ClassReader<'_>) -> Result<Vec<MemberInfo>, ClassParseError> {
    let count = reader.read_u2()?;
    let mut members = Vec::with_capacity(count as usize);
    for _ in 0..count {
        members.push(MemberInfo {
            access_flags: reader.read_u2()?,
            name_index: reader.read_u2()?,
            descriptor_index: reader.read_u2()?,
            attributes: read_attributes(reader)?,
        });
    }
    Ok(members)
}

fn read_attributes(reader: &mut ClassReader<'_>) -> Result<Vec<Attribute>, ClassParseError> {
    let count = reader.read_u2()?;
    let mut attributes = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let name_index = reader.read_u2()?;
        let length = reader.read_u4()? as usize;
        let info = reader.read_slice(length)?.to_vec();
        attributes.push(Attribute { name_index, info });
    }
    Ok(attributes)
}

fn write_members(out: &mut Vec<u8>, members: &[MemberInfo]) {
    out.extend_from_slice(&(members.len() as u16).to_be_bytes());
    for member in members {
        out.extend_from_slice(&member.access_flags.to_be_bytes());
        out.extend_from_slice(&member.name_index.to_be_bytes());
        out.extend_from_slice(&member.descriptor_index.to_be_bytes());
        write_attributes(out, &member.attributes);
    }
}

fn write_attributes(out: &mut Vec<u8>, attributes: &[Attribute]) {
    out.extend_from_slice(&(attributes.len() as u16).to_be_bytes());
    for attribute in attributes {
        out.extend_from_slice(&attribute.name_index.to_be_bytes());
        out.extend_from_slice(&(attribute.info.len() as u32).to_be_bytes());
        out.extend_from_slice(&attribute.info);
    }
}

fn write_u1_u2(out: &mut Vec<u8>, tag: u8, value: u16) {
    out.push(tag);
    out.extend_from_slice(&value.to_be_bytes());
}

/// Modified UTF-8: `\0` as two bytes, supplementary characters as surrogate
/// pairs of three-byte sequences.
fn decode_modified_utf8(bytes: &[u8]) -> Option<String> {
    let mut units: Vec<u16> = Vec::with_capacity(bytes.len());
    let mut pos = 0;
    while pos < bytes.len() {
        let first = bytes[pos];
        if first & 0x80 == 0 {
            units.push(first as u16);
            pos += 1;
        } else if first & 0xE0 == 0xC0 {
            let second = *bytes.get(pos + 1)?;
            units.push(((first as u16 & 0x1F) << 6) | (second as u16 & 0x3F));
            pos += 2;
        } else if first & 0xF0 == 0xE0 {
            let second = *bytes.get(pos + 1)?;
            let third = *bytes.get(pos + 2)?;
            units.push(
                ((first as u16 & 0x0F) << 12)
                    | ((second as u16 & 0x3F) << 6)
                    | (third as u16 & 0x3F),
            );
            pos += 3;
        } else {
            return None;
        }
    }
    String::from_utf16(&units).ok()
}

fn encode_modified_utf8(value: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(value.len());
    for unit in value.encode_utf16() {
        match unit {
            0x0001..=0x007F => out.push(unit as u8),
            0x0000 | 0x0080..=0x07FF => {
                out.push(0xC0 | (unit >> 6) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
            _ => {
                out.push(0xE0 | (unit >> 12) as u8);
                out.push(0x80 | ((unit >> 6) & 0x3F) as u8);
                out.push(0x80 | (unit & 0x3F) as u8);
            }
        }
    }
    out
}

pub(crate) struct ClassReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> ClassReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn expect_magic(&mut self) -> Result<(), ClassParseError> {
        let magic = self.read_u4()?;
        if magic != MAGIC {
            return Err(ClassParseError::InvalidMagic);
        }
        Ok(())
    }

    pub(crate) fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    pub(crate) fn position(&self) -> usize {
        self.pos
    }

    pub(crate) fn read_u1(&mut self) -> Result<u8, ClassParseError> {
        if self.pos >= self.data.len() {
            return Err(ClassParseError::UnexpectedEof);
        }
        let value = self.data[self.pos];
        self.pos += 1;
        Ok(value)
    }

    pub(crate) fn read_u2(&mut self) -> Result<u16, ClassParseError> {
        if self.pos + 2 > self.data.len() {
            return Err(ClassParseError::UnexpectedEof);
        }
        let value = u16::from_be_bytes([self.data[self.pos], self.data[self.pos + 1]]);
        self.pos += 2;
        Ok(value)
    }

    pub(crate) fn read_u4(&mut self) -> Result<u32, ClassParseError> {
        if self.pos + 4 > self.data.len() {
            return Err(ClassParseError::UnexpectedEof);
        }
        let value = u32::from_be_bytes([
            self.data[self.pos],
            self.data[self.pos + 1],
            self.data[self.pos + 2],
            self.data[self.pos + 3],
        ]);
        self.pos += 4;
        Ok(value)
    }

    pub(crate) fn read_slice(&mut self, len: usize) -> Result<&'a [u8], ClassParseError> {
        if self.pos + len > self.data.len() {
            return Err(ClassParseError::UnexpectedEof);
        }
        let slice = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub(crate) fn skip(&mut self, len: usize) -> Result<(), ClassParseError> {
        if self.pos + len > self.data.len() {
            return Err(ClassParseError::UnexpectedEof);
        }
        self.pos += len;
        Ok(())
    }
}
