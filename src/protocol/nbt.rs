//! Binary-tag (NBT) reader and writer.
//!
//! Covers the tag set the dimension codec and damage-type registries need:
//! primitives, strings, lists, compounds and the int/long arrays. Compounds
//! preserve insertion order so prepared packet images are byte-stable.

use flate2::read::GzDecoder;
use std::io::Read;

pub const TAG_END: u8 = 0;
pub const TAG_BYTE: u8 = 1;
pub const TAG_SHORT: u8 = 2;
pub const TAG_INT: u8 = 3;
pub const TAG_LONG: u8 = 4;
pub const TAG_FLOAT: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_BYTE_ARRAY: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_LIST: u8 = 9;
pub const TAG_COMPOUND: u8 = 10;
pub const TAG_INT_ARRAY: u8 = 11;
pub const TAG_LONG_ARRAY: u8 = 12;

#[derive(Debug, thiserror::Error)]
pub enum NbtError {
    #[error("unexpected end of tag data")]
    EndOfStream,
    #[error("unknown tag id {0}")]
    UnknownTagId(u8),
    #[error("root tag must be a compound, found id {0}")]
    RootNotCompound(u8),
    #[error("tag string is not valid utf-8")]
    InvalidString,
    #[error("negative length {0}")]
    NegativeLength(i32),
    #[error("gzip: {0}")]
    Gzip(#[from] std::io::Error),
}

pub type Result<T, E = NbtError> = std::result::Result<T, E>;

/// A single binary tag value.
#[derive(Debug, Clone, PartialEq)]
pub enum Tag {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(Vec<Tag>),
    Compound(CompoundTag),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl Tag {
    fn id(&self) -> u8 {
        match self {
            Tag::Byte(_) => TAG_BYTE,
            Tag::Short(_) => TAG_SHORT,
            Tag::Int(_) => TAG_INT,
            Tag::Long(_) => TAG_LONG,
            Tag::Float(_) => TAG_FLOAT,
            Tag::Double(_) => TAG_DOUBLE,
            Tag::ByteArray(_) => TAG_BYTE_ARRAY,
            Tag::String(_) => TAG_STRING,
            Tag::List(_) => TAG_LIST,
            Tag::Compound(_) => TAG_COMPOUND,
            Tag::IntArray(_) => TAG_INT_ARRAY,
            Tag::LongArray(_) => TAG_LONG_ARRAY,
        }
    }
}

/// An ordered compound of named tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CompoundTag {
    entries: Vec<(String, Tag)>,
}

impl CompoundTag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a tag, replacing any previous tag with the same name.
    pub fn put(&mut self, name: impl Into<String>, tag: Tag) -> &mut Self {
        let name = name.into();
        if let Some(entry) = self.entries.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = tag;
        } else {
            self.entries.push((name, tag));
        }
        self
    }

    pub fn put_bool(&mut self, name: impl Into<String>, value: bool) -> &mut Self {
        self.put(name, Tag::Byte(value as i8))
    }

    pub fn put_byte(&mut self, name: impl Into<String>, value: i8) -> &mut Self {
        self.put(name, Tag::Byte(value))
    }

    pub fn put_int(&mut self, name: impl Into<String>, value: i32) -> &mut Self {
        self.put(name, Tag::Int(value))
    }

    pub fn put_long(&mut self, name: impl Into<String>, value: i64) -> &mut Self {
        self.put(name, Tag::Long(value))
    }

    pub fn put_float(&mut self, name: impl Into<String>, value: f32) -> &mut Self {
        self.put(name, Tag::Float(value))
    }

    pub fn put_double(&mut self, name: impl Into<String>, value: f64) -> &mut Self {
        self.put(name, Tag::Double(value))
    }

    pub fn put_string(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.put(name, Tag::String(value.into()))
    }

    pub fn put_compound(&mut self, name: impl Into<String>, value: CompoundTag) -> &mut Self {
        self.put(name, Tag::Compound(value))
    }

    pub fn put_list(&mut self, name: impl Into<String>, value: Vec<Tag>) -> &mut Self {
        self.put(name, Tag::List(value))
    }

    pub fn put_long_array(&mut self, name: impl Into<String>, value: Vec<i64>) -> &mut Self {
        self.put(name, Tag::LongArray(value))
    }

    pub fn get(&self, name: &str) -> Option<&Tag> {
        self.entries
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, tag)| tag)
    }

    pub fn get_compound(&self, name: &str) -> Option<&CompoundTag> {
        match self.get(name) {
            Some(Tag::Compound(compound)) => Some(compound),
            _ => None,
        }
    }

    pub fn get_list(&self, name: &str) -> Option<&[Tag]> {
        match self.get(name) {
            Some(Tag::List(list)) => Some(list),
            _ => None,
        }
    }

    pub fn get_string(&self, name: &str) -> Option<&str> {
        match self.get(name) {
            Some(Tag::String(s)) => Some(s),
            _ => None,
        }
    }

    pub fn get_int(&self, name: &str) -> Option<i32> {
        match self.get(name) {
            Some(Tag::Int(x)) => Some(*x),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Writes a compound as a named root tag (empty name). This is the on-disk
/// form and the network form for < 1.20.2.
pub fn write_named(compound: &CompoundTag, buf: &mut Vec<u8>) {
    buf.push(TAG_COMPOUND);
    write_string_payload("", buf);
    write_compound_payload(compound, buf);
}

/// Writes a compound as a nameless root tag, the network form since 1.20.2.
pub fn write_nameless(compound: &CompoundTag, buf: &mut Vec<u8>) {
    buf.push(TAG_COMPOUND);
    write_compound_payload(compound, buf);
}

fn write_string_payload(s: &str, buf: &mut Vec<u8>) {
    let length = u16::try_from(s.len()).unwrap_or(u16::MAX);
    buf.extend(length.to_be_bytes());
    buf.extend_from_slice(&s.as_bytes()[..length as usize]);
}

fn write_compound_payload(compound: &CompoundTag, buf: &mut Vec<u8>) {
    for (name, tag) in &compound.entries {
        buf.push(tag.id());
        write_string_payload(name, buf);
        write_tag_payload(tag, buf);
    }
    buf.push(TAG_END);
}

fn write_tag_payload(tag: &Tag, buf: &mut Vec<u8>) {
    match tag {
        Tag::Byte(x) => buf.push(bytemuck::cast(*x)),
        Tag::Short(x) => buf.extend(x.to_be_bytes()),
        Tag::Int(x) => buf.extend(x.to_be_bytes()),
        Tag::Long(x) => buf.extend(x.to_be_bytes()),
        Tag::Float(x) => buf.extend(x.to_be_bytes()),
        Tag::Double(x) => buf.extend(x.to_be_bytes()),
        Tag::ByteArray(xs) => {
            buf.extend((xs.len() as i32).to_be_bytes());
            buf.extend(xs.iter().map(|x| bytemuck::cast::<i8, u8>(*x)));
        }
        Tag::String(s) => write_string_payload(s, buf),
        Tag::List(items) => {
            let element_id = items.first().map_or(TAG_END, Tag::id);
            buf.push(element_id);
            buf.extend((items.len() as i32).to_be_bytes());
            for item in items {
                write_tag_payload(item, buf);
            }
        }
        Tag::Compound(compound) => write_compound_payload(compound, buf),
        Tag::IntArray(xs) => {
            buf.extend((xs.len() as i32).to_be_bytes());
            for x in xs {
                buf.extend(x.to_be_bytes());
            }
        }
        Tag::LongArray(xs) => {
            buf.extend((xs.len() as i32).to_be_bytes());
            for x in xs {
                buf.extend(x.to_be_bytes());
            }
        }
    }
}

struct Reader<'a> {
    buffer: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if n <= self.buffer.len() {
            let (data, rest) = self.buffer.split_at(n);
            self.buffer = rest;
            Ok(data)
        } else {
            Err(NbtError::EndOfStream)
        }
    }

    fn read_u8(&mut self) -> Result<u8> {
        self.take(1).map(|b| b[0])
    }

    fn read_i16(&mut self) -> Result<i16> {
        self.take(2).map(|b| i16::from_be_bytes(b.try_into().unwrap()))
    }

    fn read_i32(&mut self) -> Result<i32> {
        self.take(4).map(|b| i32::from_be_bytes(b.try_into().unwrap()))
    }

    fn read_i64(&mut self) -> Result<i64> {
        self.take(8).map(|b| i64::from_be_bytes(b.try_into().unwrap()))
    }

    fn read_length(&mut self) -> Result<usize> {
        let length = self.read_i32()?;
        usize::try_from(length).map_err(|_| NbtError::NegativeLength(length))
    }

    fn read_string(&mut self) -> Result<String> {
        let length = self.read_i16()? as u16 as usize;
        let bytes = self.take(length)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| NbtError::InvalidString)
    }

    fn read_compound_payload(&mut self) -> Result<CompoundTag> {
        let mut compound = CompoundTag::new();
        loop {
            let id = self.read_u8()?;
            if id == TAG_END {
                return Ok(compound);
            }
            let name = self.read_string()?;
            let tag = self.read_tag_payload(id)?;
            compound.put(name, tag);
        }
    }

    fn read_tag_payload(&mut self, id: u8) -> Result<Tag> {
        Ok(match id {
            TAG_BYTE => Tag::Byte(bytemuck::cast(self.read_u8()?)),
            TAG_SHORT => Tag::Short(self.read_i16()?),
            TAG_INT => Tag::Int(self.read_i32()?),
            TAG_LONG => Tag::Long(self.read_i64()?),
            TAG_FLOAT => Tag::Float(f32::from_be_bytes(self.take(4)?.try_into().unwrap())),
            TAG_DOUBLE => Tag::Double(f64::from_be_bytes(self.take(8)?.try_into().unwrap())),
            TAG_BYTE_ARRAY => {
                let length = self.read_length()?;
                let bytes = self.take(length)?;
                Tag::ByteArray(bytes.iter().map(|b| bytemuck::cast::<u8, i8>(*b)).collect())
            }
            TAG_STRING => Tag::String(self.read_string()?),
            TAG_LIST => {
                let element_id = self.read_u8()?;
                let length = self.read_length()?;
                if element_id == TAG_END && length > 0 {
                    return Err(NbtError::UnknownTagId(TAG_END));
                }
                let mut items = Vec::with_capacity(length.min(1024));
                for _ in 0..length {
                    items.push(self.read_tag_payload(element_id)?);
                }
                Tag::List(items)
            }
            TAG_COMPOUND => Tag::Compound(self.read_compound_payload()?),
            TAG_INT_ARRAY => {
                let length = self.read_length()?;
                let mut xs = Vec::with_capacity(length.min(1024));
                for _ in 0..length {
                    xs.push(self.read_i32()?);
                }
                Tag::IntArray(xs)
            }
            TAG_LONG_ARRAY => {
                let length = self.read_length()?;
                let mut xs = Vec::with_capacity(length.min(1024));
                for _ in 0..length {
                    xs.push(self.read_i64()?);
                }
                Tag::LongArray(xs)
            }
            other => return Err(NbtError::UnknownTagId(other)),
        })
    }
}

/// Reads a named root compound (the on-disk form).
pub fn read_named(bytes: &[u8]) -> Result<CompoundTag> {
    let mut reader = Reader { buffer: bytes };
    let id = reader.read_u8()?;
    if id != TAG_COMPOUND {
        return Err(NbtError::RootNotCompound(id));
    }
    reader.read_string()?;
    reader.read_compound_payload()
}

/// Reads a nameless root compound (the 1.20.2+ network form).
pub fn read_nameless(bytes: &[u8]) -> Result<CompoundTag> {
    let mut reader = Reader { buffer: bytes };
    let id = reader.read_u8()?;
    if id != TAG_COMPOUND {
        return Err(NbtError::RootNotCompound(id));
    }
    reader.read_compound_payload()
}

/// Reads a GZIP-compressed named root compound, the format of the shipped
/// damage-type registry blobs.
pub fn read_gzipped(bytes: &[u8]) -> Result<CompoundTag> {
    let mut inflated = Vec::new();
    GzDecoder::new(bytes).read_to_end(&mut inflated)?;
    read_named(&inflated)
}
