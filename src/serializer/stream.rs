//! Versioned byte-stream reader/writer traits plus a string-deduplication
//! scope that wraps any writer/reader pair to cut repeated string
//! payloads down to a single index.

use std::collections::HashMap;
use std::io::{Cursor, Read, Write};

use uuid::Uuid;

use crate::error::{Result, SerializerError};
use crate::reflection::variant::{Color, Time, Transform, TypedObject, Variant, VariantMap, VariantType};
use crate::reflection::HashedString;

/// Anything values can be serialized onto. Kept trait-object friendly
/// (`&mut dyn StreamWriter`) so callers don't need to know the concrete
/// sink (memory buffer, file, network channel).
pub trait StreamWriter {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()>;

    fn write_u8(&mut self, v: u8) -> Result<()> {
        self.write_bytes(&[v])
    }
    fn write_u16(&mut self, v: u16) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }
    fn write_u32(&mut self, v: u32) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }
    fn write_u64(&mut self, v: u64) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }
    fn write_i8(&mut self, v: i8) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }
    fn write_i16(&mut self, v: i16) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }
    fn write_i32(&mut self, v: i32) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }
    fn write_i64(&mut self, v: i64) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }
    fn write_f32(&mut self, v: f32) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }
    fn write_f64(&mut self, v: f64) -> Result<()> {
        self.write_bytes(&v.to_le_bytes())
    }
    fn write_bool(&mut self, v: bool) -> Result<()> {
        self.write_u8(v as u8)
    }

    /// Length-prefixed (`u32`), not null-terminated: payloads may embed
    /// arbitrary UTF-8 including interior nulls.
    fn write_string(&mut self, s: &str) -> Result<()> {
        self.write_u32(s.len() as u32)?;
        self.write_bytes(s.as_bytes())
    }

    fn write_uuid(&mut self, id: &Uuid) -> Result<()> {
        self.write_bytes(id.as_bytes())
    }

    fn write_variant(&mut self, v: &Variant) -> Result<()> {
        write_variant(self, v)
    }
}

pub trait StreamReader {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()>;

    fn read_u8(&mut self) -> Result<u8> {
        let mut b = [0u8; 1];
        self.read_bytes(&mut b)?;
        Ok(b[0])
    }
    fn read_u16(&mut self) -> Result<u16> {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b)?;
        Ok(u16::from_le_bytes(b))
    }
    fn read_u32(&mut self) -> Result<u32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b)?;
        Ok(u32::from_le_bytes(b))
    }
    fn read_u64(&mut self) -> Result<u64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(u64::from_le_bytes(b))
    }
    fn read_i8(&mut self) -> Result<i8> {
        let mut b = [0u8; 1];
        self.read_bytes(&mut b)?;
        Ok(i8::from_le_bytes(b))
    }
    fn read_i16(&mut self) -> Result<i16> {
        let mut b = [0u8; 2];
        self.read_bytes(&mut b)?;
        Ok(i16::from_le_bytes(b))
    }
    fn read_i32(&mut self) -> Result<i32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b)?;
        Ok(i32::from_le_bytes(b))
    }
    fn read_i64(&mut self) -> Result<i64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(i64::from_le_bytes(b))
    }
    fn read_f32(&mut self) -> Result<f32> {
        let mut b = [0u8; 4];
        self.read_bytes(&mut b)?;
        Ok(f32::from_le_bytes(b))
    }
    fn read_f64(&mut self) -> Result<f64> {
        let mut b = [0u8; 8];
        self.read_bytes(&mut b)?;
        Ok(f64::from_le_bytes(b))
    }
    fn read_bool(&mut self) -> Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    fn read_string(&mut self) -> Result<String> {
        let len = self.read_u32()? as usize;
        let mut buf = vec![0u8; len];
        self.read_bytes(&mut buf)?;
        String::from_utf8(buf).map_err(|_| SerializerError::UnexpectedEof.into())
    }

    fn read_uuid(&mut self) -> Result<Uuid> {
        let mut buf = [0u8; 16];
        self.read_bytes(&mut buf)?;
        Ok(Uuid::from_bytes(buf))
    }

    fn read_variant(&mut self) -> Result<Variant> {
        read_variant(self)
    }
}

/// An in-memory `StreamWriter`, the common case for graph serialization
/// before the bytes are handed to whatever transport or file API the
/// embedder supplies.
#[derive(Default)]
pub struct MemoryStreamWriter {
    buf: Vec<u8>,
}

impl MemoryStreamWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

impl StreamWriter for MemoryStreamWriter {
    fn write_bytes(&mut self, bytes: &[u8]) -> Result<()> {
        self.buf.write_all(bytes).map_err(|e| SerializerError::PatchFailed {
            type_name: "<stream>".into(),
            reason: e.to_string(),
        })?;
        Ok(())
    }
}

pub struct MemoryStreamReader<'a> {
    cursor: Cursor<&'a [u8]>,
}

impl<'a> MemoryStreamReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        MemoryStreamReader { cursor: Cursor::new(bytes) }
    }
}

impl<'a> StreamReader for MemoryStreamReader<'a> {
    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<()> {
        self.cursor.read_exact(buf).map_err(|_| SerializerError::UnexpectedEof)?;
        Ok(())
    }
}

/// Wraps a [`StreamWriter`] so that repeated strings (property names,
/// type names, tag strings) are written once and referenced by index
/// afterward. Every `write_string` call writes only a `u32` index into
/// the body; the strings themselves accumulate in `seen` and are only
/// flushed, as a small header of `count` + strings, once `end` is
/// called — so the table always lands before the body it indexes into,
/// letting the read side load the whole table up front with `begin`
/// and then resolve every index in one forward pass.
#[derive(Default)]
pub struct StringDeduplicationWriteContext {
    seen: Vec<String>,
    index_of: HashMap<String, u32>,
}

impl StringDeduplicationWriteContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write_string<W: StreamWriter + ?Sized>(&mut self, writer: &mut W, s: &str) -> Result<()> {
        let idx = match self.index_of.get(s) {
            Some(&idx) => idx,
            None => {
                let idx = self.seen.len() as u32;
                self.seen.push(s.to_string());
                self.index_of.insert(s.to_string(), idx);
                idx
            }
        };
        writer.write_u32(idx)
    }

    /// Flushes the accumulated string table to `writer`. Must be called
    /// after every `write_string` call for this context, and before any
    /// reader tries to resolve the indices written against it.
    pub fn end<W: StreamWriter + ?Sized>(self, writer: &mut W) -> Result<()> {
        writer.write_u32(self.seen.len() as u32)?;
        for s in &self.seen {
            writer.write_string(s)?;
        }
        Ok(())
    }
}

/// The read-side counterpart: `begin` loads the whole string table up
/// front, so every subsequent `read_string` call is a plain index
/// lookup with no further stream reads.
pub struct StringDeduplicationReadContext {
    table: Vec<String>,
}

impl StringDeduplicationReadContext {
    pub fn begin<R: StreamReader + ?Sized>(reader: &mut R) -> Result<Self> {
        let count = reader.read_u32()? as usize;
        let mut table = Vec::with_capacity(count);
        for _ in 0..count {
            table.push(reader.read_string()?);
        }
        Ok(StringDeduplicationReadContext { table })
    }

    pub fn read_string<R: StreamReader + ?Sized>(&self, reader: &mut R) -> Result<String> {
        let idx = reader.read_u32()? as usize;
        self.table.get(idx).cloned().ok_or_else(|| SerializerError::UnexpectedEof.into())
    }
}

fn variant_type_tag(t: VariantType) -> u8 {
    use VariantType::*;
    match t {
        Invalid => 0,
        Bool => 1,
        Int8 => 2,
        Int16 => 3,
        Int32 => 4,
        Int64 => 5,
        UInt8 => 6,
        UInt16 => 7,
        UInt32 => 8,
        UInt64 => 9,
        Float => 10,
        Double => 11,
        Color => 12,
        ColorGamma => 13,
        Vec2 => 14,
        Vec3 => 15,
        Vec4 => 16,
        Vec2I => 17,
        Vec3I => 18,
        Vec4I => 19,
        Quat => 20,
        Mat3 => 21,
        Mat4 => 22,
        Transform => 23,
        String => 24,
        StringView => 25,
        DataBuffer => 26,
        Time => 27,
        Uuid => 28,
        Angle => 29,
        HashedString => 30,
        TempHashedString => 31,
        VariantArray => 32,
        VariantMap => 33,
        TypedPointer => 34,
        TypedObject => 35,
    }
}

fn write_variant<W: StreamWriter + ?Sized>(w: &mut W, v: &Variant) -> Result<()> {
    w.write_u8(variant_type_tag(v.variant_type()))?;
    match v {
        Variant::Invalid => {}
        Variant::Bool(b) => w.write_bool(*b)?,
        Variant::Int8(x) => w.write_i8(*x)?,
        Variant::Int16(x) => w.write_i16(*x)?,
        Variant::Int32(x) => w.write_i32(*x)?,
        Variant::Int64(x) => w.write_i64(*x)?,
        Variant::UInt8(x) => w.write_u8(*x)?,
        Variant::UInt16(x) => w.write_u16(*x)?,
        Variant::UInt32(x) => w.write_u32(*x)?,
        Variant::UInt64(x) => w.write_u64(*x)?,
        Variant::Float(x) => w.write_f32(*x)?,
        Variant::Double(x) => w.write_f64(*x)?,
        Variant::Color(c) | Variant::ColorGamma(c) => {
            w.write_f32(c.r)?;
            w.write_f32(c.g)?;
            w.write_f32(c.b)?;
            w.write_f32(c.a)?;
        }
        Variant::Vec2(v2) => {
            w.write_f32(v2.x)?;
            w.write_f32(v2.y)?;
        }
        Variant::Vec3(v3) => {
            w.write_f32(v3.x)?;
            w.write_f32(v3.y)?;
            w.write_f32(v3.z)?;
        }
        Variant::Vec4(v4) => {
            w.write_f32(v4.x)?;
            w.write_f32(v4.y)?;
            w.write_f32(v4.z)?;
            w.write_f32(v4.w)?;
        }
        Variant::Vec2I(a, b) => {
            w.write_i32(*a)?;
            w.write_i32(*b)?;
        }
        Variant::Vec3I(a, b, c) => {
            w.write_i32(*a)?;
            w.write_i32(*b)?;
            w.write_i32(*c)?;
        }
        Variant::Vec4I(a, b, c, d) => {
            w.write_i32(*a)?;
            w.write_i32(*b)?;
            w.write_i32(*c)?;
            w.write_i32(*d)?;
        }
        Variant::Quat(q) => {
            w.write_f32(q.x)?;
            w.write_f32(q.y)?;
            w.write_f32(q.z)?;
            w.write_f32(q.w)?;
        }
        Variant::Mat3(m) => {
            for col in m.to_cols_array() {
                w.write_f32(col)?;
            }
        }
        Variant::Mat4(m) => {
            for col in m.to_cols_array() {
                w.write_f32(col)?;
            }
        }
        Variant::Transform(t) => {
            write_variant(w, &Variant::Vec3(t.translation))?;
            write_variant(w, &Variant::Quat(t.rotation))?;
            write_variant(w, &Variant::Vec3(t.scale))?;
        }
        Variant::String(s) | Variant::StringView(s) => w.write_string(s)?,
        Variant::DataBuffer(bytes) => {
            w.write_u32(bytes.len() as u32)?;
            w.write_bytes(bytes)?;
        }
        Variant::Time(t) => w.write_i64(t.micros)?,
        Variant::Uuid(id) => w.write_uuid(id)?,
        Variant::Angle(a) => w.write_f32(a.radians)?,
        Variant::HashedString(h) => w.write_string(h.as_str())?,
        Variant::TempHashedString(h) => w.write_u64(h.hash())?,
        Variant::VariantArray(arr) => {
            w.write_u32(arr.len() as u32)?;
            for item in arr {
                write_variant(w, item)?;
            }
        }
        Variant::VariantMap(map) => {
            w.write_u32(map.len() as u32)?;
            for (k, v) in map {
                w.write_string(k)?;
                write_variant(w, v)?;
            }
        }
        Variant::TypedPointer(_) => {
            return Err(SerializerError::PatchFailed {
                type_name: "TypedPointer".into(),
                reason: "a raw pointer variant cannot be serialized".into(),
            }
            .into())
        }
        Variant::TypedObject(obj) => {
            w.write_string(&obj.type_name)?;
            w.write_u32(obj.properties.len() as u32)?;
            for (k, v) in &obj.properties {
                w.write_string(k)?;
                write_variant(w, v)?;
            }
        }
    }
    Ok(())
}

fn variant_type_from_tag(tag: u8) -> Result<VariantType> {
    use VariantType::*;
    Ok(match tag {
        0 => Invalid,
        1 => Bool,
        2 => Int8,
        3 => Int16,
        4 => Int32,
        5 => Int64,
        6 => UInt8,
        7 => UInt16,
        8 => UInt32,
        9 => UInt64,
        10 => Float,
        11 => Double,
        12 => Color,
        13 => ColorGamma,
        14 => Vec2,
        15 => Vec3,
        16 => Vec4,
        17 => Vec2I,
        18 => Vec3I,
        19 => Vec4I,
        20 => Quat,
        21 => Mat3,
        22 => Mat4,
        23 => Transform,
        24 => String,
        25 => StringView,
        26 => DataBuffer,
        27 => Time,
        28 => Uuid,
        29 => Angle,
        30 => HashedString,
        31 => TempHashedString,
        32 => VariantArray,
        33 => VariantMap,
        34 => TypedPointer,
        35 => TypedObject,
        _ => return Err(SerializerError::UnexpectedEof.into()),
    })
}

fn read_variant<R: StreamReader + ?Sized>(r: &mut R) -> Result<Variant> {
    let tag = variant_type_from_tag(r.read_u8()?)?;
    Ok(match tag {
        VariantType::Invalid => Variant::Invalid,
        VariantType::Bool => Variant::Bool(r.read_bool()?),
        VariantType::Int8 => Variant::Int8(r.read_i8()?),
        VariantType::Int16 => Variant::Int16(r.read_i16()?),
        VariantType::Int32 => Variant::Int32(r.read_i32()?),
        VariantType::Int64 => Variant::Int64(r.read_i64()?),
        VariantType::UInt8 => Variant::UInt8(r.read_u8()?),
        VariantType::UInt16 => Variant::UInt16(r.read_u16()?),
        VariantType::UInt32 => Variant::UInt32(r.read_u32()?),
        VariantType::UInt64 => Variant::UInt64(r.read_u64()?),
        VariantType::Float => Variant::Float(r.read_f32()?),
        VariantType::Double => Variant::Double(r.read_f64()?),
        VariantType::Color => Variant::Color(Color {
            r: r.read_f32()?,
            g: r.read_f32()?,
            b: r.read_f32()?,
            a: r.read_f32()?,
        }),
        VariantType::ColorGamma => Variant::ColorGamma(Color {
            r: r.read_f32()?,
            g: r.read_f32()?,
            b: r.read_f32()?,
            a: r.read_f32()?,
        }),
        VariantType::Vec2 => Variant::Vec2(glam::Vec2::new(r.read_f32()?, r.read_f32()?)),
        VariantType::Vec3 => Variant::Vec3(glam::Vec3::new(r.read_f32()?, r.read_f32()?, r.read_f32()?)),
        VariantType::Vec4 => Variant::Vec4(glam::Vec4::new(r.read_f32()?, r.read_f32()?, r.read_f32()?, r.read_f32()?)),
        VariantType::Vec2I => Variant::Vec2I(r.read_i32()?, r.read_i32()?),
        VariantType::Vec3I => Variant::Vec3I(r.read_i32()?, r.read_i32()?, r.read_i32()?),
        VariantType::Vec4I => Variant::Vec4I(r.read_i32()?, r.read_i32()?, r.read_i32()?, r.read_i32()?),
        VariantType::Quat => Variant::Quat(glam::Quat::from_xyzw(r.read_f32()?, r.read_f32()?, r.read_f32()?, r.read_f32()?)),
        VariantType::Mat3 => {
            let mut cols = [0f32; 9];
            for c in cols.iter_mut() {
                *c = r.read_f32()?;
            }
            Variant::Mat3(glam::Mat3::from_cols_array(&cols))
        }
        VariantType::Mat4 => {
            let mut cols = [0f32; 16];
            for c in cols.iter_mut() {
                *c = r.read_f32()?;
            }
            Variant::Mat4(glam::Mat4::from_cols_array(&cols))
        }
        VariantType::Transform => {
            let translation = match read_variant(r)? {
                Variant::Vec3(v) => v,
                _ => return Err(SerializerError::UnexpectedEof.into()),
            };
            let rotation = match read_variant(r)? {
                Variant::Quat(q) => q,
                _ => return Err(SerializerError::UnexpectedEof.into()),
            };
            let scale = match read_variant(r)? {
                Variant::Vec3(v) => v,
                _ => return Err(SerializerError::UnexpectedEof.into()),
            };
            Variant::Transform(Transform { translation, rotation, scale })
        }
        VariantType::String => Variant::String(r.read_string()?),
        VariantType::StringView => Variant::StringView(r.read_string()?),
        VariantType::DataBuffer => {
            let len = r.read_u32()? as usize;
            let mut buf = vec![0u8; len];
            r.read_bytes(&mut buf)?;
            Variant::DataBuffer(buf)
        }
        VariantType::Time => Variant::Time(Time { micros: r.read_i64()? }),
        VariantType::Uuid => Variant::Uuid(r.read_uuid()?),
        VariantType::Angle => Variant::Angle(crate::reflection::variant::Angle { radians: r.read_f32()? }),
        VariantType::HashedString => Variant::HashedString(HashedString::new(r.read_string()?)),
        VariantType::TempHashedString => {
            Variant::TempHashedString(crate::reflection::TempHashedString::from_hash(r.read_u64()?))
        }
        VariantType::VariantArray => {
            let len = r.read_u32()? as usize;
            let mut arr = Vec::with_capacity(len);
            for _ in 0..len {
                arr.push(read_variant(r)?);
            }
            Variant::VariantArray(arr)
        }
        VariantType::VariantMap => {
            let len = r.read_u32()? as usize;
            let mut map = VariantMap::with_capacity(len);
            for _ in 0..len {
                let k = r.read_string()?;
                map.insert(k, read_variant(r)?);
            }
            Variant::VariantMap(map)
        }
        VariantType::TypedPointer => {
            return Err(SerializerError::UnexpectedEof.into());
        }
        VariantType::TypedObject => {
            let type_name = r.read_string()?;
            let len = r.read_u32()? as usize;
            let mut properties = VariantMap::with_capacity(len);
            for _ in 0..len {
                let k = r.read_string()?;
                properties.insert(k, read_variant(r)?);
            }
            Variant::TypedObject(TypedObject { type_name, properties })
        }
    })
}
