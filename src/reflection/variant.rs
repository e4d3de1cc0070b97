//! `Variant`: a tagged union over the closed set of value types that can
//! cross a reflected property, message, or blackboard boundary.

use std::collections::HashMap;
use std::fmt;

use glam::{Mat3, Mat4, Quat, Vec2, Vec3, Vec4};
use uuid::Uuid;

use super::hashed_string::{HashedString, TempHashedString};
use crate::error::{ReflectionError, Result};

pub type VariantArray = Vec<Variant>;
pub type VariantMap = HashMap<String, Variant>;

/// An opaque, non-owning reference to an out-of-crate instance (a script
/// object, a resource handle stored by a foreign loader, etc).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedPointer {
    pub type_name: &'static str,
    pub ptr: *const (),
}

// SAFETY: `TypedPointer` never dereferences the pointer itself; holders
// are expected to know the pointed-to type's own thread-safety.
unsafe impl Send for TypedPointer {}
unsafe impl Sync for TypedPointer {}

/// An instance of a reflected type, stored inline as raw name + a sibling
/// property map rather than a boxed trait object, since the `Variant`
/// itself must stay `Clone`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedObject {
    pub type_name: String,
    pub properties: VariantMap,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Transform {
    pub translation: Vec3,
    pub rotation: Quat,
    pub scale: Vec3,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Angle {
    pub radians: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Time {
    pub micros: i64,
}

/// The type tag a `Variant` carries. One entry per closed-set member;
/// this is also what `Variant::type_name()` reports for error messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VariantType {
    Invalid,
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    UInt8,
    UInt16,
    UInt32,
    UInt64,
    Float,
    Double,
    Color,
    ColorGamma,
    Vec2,
    Vec3,
    Vec4,
    Vec2I,
    Vec3I,
    Vec4I,
    Quat,
    Mat3,
    Mat4,
    Transform,
    String,
    StringView,
    DataBuffer,
    Time,
    Uuid,
    Angle,
    HashedString,
    TempHashedString,
    VariantArray,
    VariantMap,
    TypedPointer,
    TypedObject,
}

impl VariantType {
    pub fn name(&self) -> &'static str {
        match self {
            VariantType::Invalid => "Invalid",
            VariantType::Bool => "Bool",
            VariantType::Int8 => "Int8",
            VariantType::Int16 => "Int16",
            VariantType::Int32 => "Int32",
            VariantType::Int64 => "Int64",
            VariantType::UInt8 => "UInt8",
            VariantType::UInt16 => "UInt16",
            VariantType::UInt32 => "UInt32",
            VariantType::UInt64 => "UInt64",
            VariantType::Float => "Float",
            VariantType::Double => "Double",
            VariantType::Color => "Color",
            VariantType::ColorGamma => "ColorGamma",
            VariantType::Vec2 => "Vec2",
            VariantType::Vec3 => "Vec3",
            VariantType::Vec4 => "Vec4",
            VariantType::Vec2I => "Vec2I",
            VariantType::Vec3I => "Vec3I",
            VariantType::Vec4I => "Vec4I",
            VariantType::Quat => "Quat",
            VariantType::Mat3 => "Mat3",
            VariantType::Mat4 => "Mat4",
            VariantType::Transform => "Transform",
            VariantType::String => "String",
            VariantType::StringView => "StringView",
            VariantType::DataBuffer => "DataBuffer",
            VariantType::Time => "Time",
            VariantType::Uuid => "Uuid",
            VariantType::Angle => "Angle",
            VariantType::HashedString => "HashedString",
            VariantType::TempHashedString => "TempHashedString",
            VariantType::VariantArray => "VariantArray",
            VariantType::VariantMap => "VariantMap",
            VariantType::TypedPointer => "TypedPointer",
            VariantType::TypedObject => "TypedObject",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Variant {
    Invalid,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    UInt8(u8),
    UInt16(u16),
    UInt32(u32),
    UInt64(u64),
    Float(f32),
    Double(f64),
    Color(Color),
    ColorGamma(Color),
    Vec2(Vec2),
    Vec3(Vec3),
    Vec4(Vec4),
    Vec2I(i32, i32),
    Vec3I(i32, i32, i32),
    Vec4I(i32, i32, i32, i32),
    Quat(Quat),
    Mat3(Mat3),
    Mat4(Mat4),
    Transform(Transform),
    String(String),
    StringView(String),
    DataBuffer(Vec<u8>),
    Time(Time),
    Uuid(Uuid),
    Angle(Angle),
    HashedString(HashedString),
    TempHashedString(TempHashedString),
    VariantArray(VariantArray),
    VariantMap(VariantMap),
    TypedPointer(TypedPointer),
    TypedObject(TypedObject),
}

impl Variant {
    pub fn variant_type(&self) -> VariantType {
        match self {
            Variant::Invalid => VariantType::Invalid,
            Variant::Bool(_) => VariantType::Bool,
            Variant::Int8(_) => VariantType::Int8,
            Variant::Int16(_) => VariantType::Int16,
            Variant::Int32(_) => VariantType::Int32,
            Variant::Int64(_) => VariantType::Int64,
            Variant::UInt8(_) => VariantType::UInt8,
            Variant::UInt16(_) => VariantType::UInt16,
            Variant::UInt32(_) => VariantType::UInt32,
            Variant::UInt64(_) => VariantType::UInt64,
            Variant::Float(_) => VariantType::Float,
            Variant::Double(_) => VariantType::Double,
            Variant::Color(_) => VariantType::Color,
            Variant::ColorGamma(_) => VariantType::ColorGamma,
            Variant::Vec2(_) => VariantType::Vec2,
            Variant::Vec3(_) => VariantType::Vec3,
            Variant::Vec4(_) => VariantType::Vec4,
            Variant::Vec2I(..) => VariantType::Vec2I,
            Variant::Vec3I(..) => VariantType::Vec3I,
            Variant::Vec4I(..) => VariantType::Vec4I,
            Variant::Quat(_) => VariantType::Quat,
            Variant::Mat3(_) => VariantType::Mat3,
            Variant::Mat4(_) => VariantType::Mat4,
            Variant::Transform(_) => VariantType::Transform,
            Variant::String(_) => VariantType::String,
            Variant::StringView(_) => VariantType::StringView,
            Variant::DataBuffer(_) => VariantType::DataBuffer,
            Variant::Time(_) => VariantType::Time,
            Variant::Uuid(_) => VariantType::Uuid,
            Variant::Angle(_) => VariantType::Angle,
            Variant::HashedString(_) => VariantType::HashedString,
            Variant::TempHashedString(_) => VariantType::TempHashedString,
            Variant::VariantArray(_) => VariantType::VariantArray,
            Variant::VariantMap(_) => VariantType::VariantMap,
            Variant::TypedPointer(_) => VariantType::TypedPointer,
            Variant::TypedObject(_) => VariantType::TypedObject,
        }
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        !matches!(self, Variant::Invalid)
    }

    #[inline]
    pub fn is<T: VariantGet>(&self) -> bool {
        T::get(self).is_some()
    }

    /// Returns the contained value if `self` already holds exactly `T`,
    /// with no conversion attempted.
    pub fn get<T: VariantGet>(&self) -> Option<T> {
        T::get(self)
    }

    /// True for every numeric variant, used to gate blackboard
    /// increment/decrement and arithmetic conversions.
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Variant::Int8(_)
                | Variant::Int16(_)
                | Variant::Int32(_)
                | Variant::Int64(_)
                | Variant::UInt8(_)
                | Variant::UInt16(_)
                | Variant::UInt32(_)
                | Variant::UInt64(_)
                | Variant::Float(_)
                | Variant::Double(_)
        )
    }

    /// Widens any numeric variant to `f64`. Used by arithmetic
    /// conversions and by blackboard increment/decrement. `Bool` widens
    /// to `0.0`/`1.0` so it can feed the same numeric conversion path.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Variant::Bool(v) => Some(if *v { 1.0 } else { 0.0 }),
            Variant::Int8(v) => Some(*v as f64),
            Variant::Int16(v) => Some(*v as f64),
            Variant::Int32(v) => Some(*v as f64),
            Variant::Int64(v) => Some(*v as f64),
            Variant::UInt8(v) => Some(*v as f64),
            Variant::UInt16(v) => Some(*v as f64),
            Variant::UInt32(v) => Some(*v as f64),
            Variant::UInt64(v) => Some(*v as f64),
            Variant::Float(v) => Some(*v as f64),
            Variant::Double(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns a new variant of the same concrete numeric type as `self`
    /// holding `value`, used to write an incremented/decremented amount
    /// back without widening the stored type.
    pub fn with_f64(&self, value: f64) -> Option<Variant> {
        match self {
            Variant::Int8(_) => Some(Variant::Int8(value as i8)),
            Variant::Int16(_) => Some(Variant::Int16(value as i16)),
            Variant::Int32(_) => Some(Variant::Int32(value as i32)),
            Variant::Int64(_) => Some(Variant::Int64(value as i64)),
            Variant::UInt8(_) => Some(Variant::UInt8(value as u8)),
            Variant::UInt16(_) => Some(Variant::UInt16(value as u16)),
            Variant::UInt32(_) => Some(Variant::UInt32(value as u32)),
            Variant::UInt64(_) => Some(Variant::UInt64(value as u64)),
            Variant::Float(_) => Some(Variant::Float(value as f32)),
            Variant::Double(_) => Some(Variant::Double(value)),
            _ => None,
        }
    }

    /// Whether `self` can be converted to `target` per the compatibility
    /// matrix: any numeric-to-numeric conversion (including `Bool` via
    /// 0/1), any type to its `String` representation and back (`String`
    /// parses to any numeric type, `Uuid`, `HashedString`, or
    /// `TempHashedString`), `HashedString <-> TempHashedString`, and
    /// `Angle <-> Float`; everything else requires an exact match.
    pub fn can_convert_to(&self, target: VariantType) -> bool {
        if self.variant_type() == target {
            return true;
        }
        use VariantType::*;
        let numeric = |t: VariantType| {
            matches!(
                t,
                Bool | Int8 | Int16 | Int32 | Int64 | UInt8 | UInt16 | UInt32 | UInt64 | Float | Double
            )
        };
        if numeric(self.variant_type()) && numeric(target) {
            return true;
        }
        match (self.variant_type(), target) {
            (_, String) => true,
            (String, Bool | Int8 | Int16 | Int32 | Int64 | UInt8 | UInt16 | UInt32 | UInt64 | Float | Double | Uuid | HashedString | TempHashedString) => true,
            (HashedString, TempHashedString) | (TempHashedString, HashedString) => true,
            (Angle, Float) | (Float, Angle) => true,
            _ => false,
        }
    }

    /// Converts `self` to `target`, per [`Self::can_convert_to`].
    pub fn convert_to(&self, target: VariantType) -> Result<Variant> {
        if self.variant_type() == target {
            return Ok(self.clone());
        }
        if !self.can_convert_to(target) {
            return Err(ReflectionError::IncompatibleType {
                from: self.variant_type().name(),
                to: target.name(),
            }
            .into());
        }
        use VariantType::*;
        if target == String {
            return Ok(Variant::String(self.to_string()));
        }
        if self.variant_type() == VariantType::String {
            let s = match self {
                Variant::String(s) => s.clone(),
                _ => unreachable!(),
            };
            return parse_string_as(&s, target);
        }
        if let (HashedString, Some(h)) = (target, self.get::<HashedString>()) {
            return Ok(Variant::HashedString(h));
        }
        if let (TempHashedString, Variant::HashedString(h)) = (target, self) {
            return Ok(Variant::TempHashedString(h.to_temp()));
        }
        if let (Angle, Variant::Float(v)) = (target, self) {
            return Ok(Variant::Angle(Angle { radians: *v }));
        }
        if let (Float, Variant::Angle(a)) = (target, self) {
            return Ok(Variant::Float(a.radians));
        }
        if let Some(v) = self.as_f64() {
            return Ok(numeric_from_f64(target, v));
        }
        Err(ReflectionError::IncompatibleType {
            from: self.variant_type().name(),
            to: target.name(),
        }
        .into())
    }
}

/// A destination for [`Variant::dispatch_to`]: one method per tag, each
/// with a default no-op, so a caller that only cares about a handful of
/// tags doesn't have to implement all of them. Mirrors the
/// optional-override shape of `serde::de::Visitor`.
pub trait VariantVisitor {
    fn visit_invalid(&mut self) {}
    fn visit_bool(&mut self, _v: bool) {}
    fn visit_i8(&mut self, _v: i8) {}
    fn visit_i16(&mut self, _v: i16) {}
    fn visit_i32(&mut self, _v: i32) {}
    fn visit_i64(&mut self, _v: i64) {}
    fn visit_u8(&mut self, _v: u8) {}
    fn visit_u16(&mut self, _v: u16) {}
    fn visit_u32(&mut self, _v: u32) {}
    fn visit_u64(&mut self, _v: u64) {}
    fn visit_f32(&mut self, _v: f32) {}
    fn visit_f64(&mut self, _v: f64) {}
    fn visit_string(&mut self, _v: &str) {}
    fn visit_uuid(&mut self, _v: Uuid) {}
    fn visit_hashed_string(&mut self, _v: &HashedString) {}
    fn visit_array(&mut self, _v: &VariantArray) {}
    fn visit_map(&mut self, _v: &VariantMap) {}
    fn visit_typed_object(&mut self, _v: &TypedObject) {}
    /// Catch-all for every tag without a dedicated method above, and for
    /// a `type_tag` that doesn't match `self`'s own tag.
    fn visit_other(&mut self, _v: &Variant) {}
}

impl Variant {
    /// Type-dispatched invocation: calls the one `visitor` method
    /// matching `self`'s tag, used by the serializer so writing a node's
    /// properties doesn't need its own full match over every `Variant`
    /// arm. `type_tag` must equal `self.variant_type()`; a mismatch
    /// dispatches to `visit_other` rather than panicking, since it
    /// signals the caller read the wrong tag for this value.
    pub fn dispatch_to(&self, visitor: &mut dyn VariantVisitor, type_tag: VariantType) {
        if type_tag != self.variant_type() {
            visitor.visit_other(self);
            return;
        }
        match self {
            Variant::Invalid => visitor.visit_invalid(),
            Variant::Bool(v) => visitor.visit_bool(*v),
            Variant::Int8(v) => visitor.visit_i8(*v),
            Variant::Int16(v) => visitor.visit_i16(*v),
            Variant::Int32(v) => visitor.visit_i32(*v),
            Variant::Int64(v) => visitor.visit_i64(*v),
            Variant::UInt8(v) => visitor.visit_u8(*v),
            Variant::UInt16(v) => visitor.visit_u16(*v),
            Variant::UInt32(v) => visitor.visit_u32(*v),
            Variant::UInt64(v) => visitor.visit_u64(*v),
            Variant::Float(v) => visitor.visit_f32(*v),
            Variant::Double(v) => visitor.visit_f64(*v),
            Variant::String(v) | Variant::StringView(v) => visitor.visit_string(v),
            Variant::Uuid(v) => visitor.visit_uuid(*v),
            Variant::HashedString(v) => visitor.visit_hashed_string(v),
            Variant::VariantArray(v) => visitor.visit_array(v),
            Variant::VariantMap(v) => visitor.visit_map(v),
            Variant::TypedObject(v) => visitor.visit_typed_object(v),
            other => visitor.visit_other(other),
        }
    }
}

fn numeric_from_f64(target: VariantType, v: f64) -> Variant {
    use VariantType::*;
    match target {
        Bool => Variant::Bool(v != 0.0),
        Int8 => Variant::Int8(v as i8),
        Int16 => Variant::Int16(v as i16),
        Int32 => Variant::Int32(v as i32),
        Int64 => Variant::Int64(v as i64),
        UInt8 => Variant::UInt8(v as u8),
        UInt16 => Variant::UInt16(v as u16),
        UInt32 => Variant::UInt32(v as u32),
        UInt64 => Variant::UInt64(v as u64),
        Float => Variant::Float(v as f32),
        Double => Variant::Double(v),
        _ => Variant::Invalid,
    }
}

fn parse_string_as(s: &str, target: VariantType) -> Result<Variant> {
    use VariantType::*;
    fn incompatible(target: VariantType) -> ReflectionError {
        ReflectionError::IncompatibleType {
            from: "String",
            to: target.name(),
        }
    }
    Ok(match target {
        Bool => Variant::Bool(s.parse().map_err(|_| incompatible(target))?),
        Int8 => Variant::Int8(s.parse().map_err(|_| incompatible(target))?),
        Int16 => Variant::Int16(s.parse().map_err(|_| incompatible(target))?),
        Int32 => Variant::Int32(s.parse().map_err(|_| incompatible(target))?),
        Int64 => Variant::Int64(s.parse().map_err(|_| incompatible(target))?),
        UInt8 => Variant::UInt8(s.parse().map_err(|_| incompatible(target))?),
        UInt16 => Variant::UInt16(s.parse().map_err(|_| incompatible(target))?),
        UInt32 => Variant::UInt32(s.parse().map_err(|_| incompatible(target))?),
        UInt64 => Variant::UInt64(s.parse().map_err(|_| incompatible(target))?),
        Float => Variant::Float(s.parse().map_err(|_| incompatible(target))?),
        Double => Variant::Double(s.parse().map_err(|_| incompatible(target))?),
        Uuid => Variant::Uuid(Uuid::parse_str(s).map_err(|_| incompatible(target))?),
        HashedString => Variant::HashedString(HashedString::new(s)),
        TempHashedString => Variant::TempHashedString(TempHashedString::new(s)),
        _ => return Err(incompatible(target).into()),
    })
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Variant::Invalid => write!(f, ""),
            Variant::Bool(v) => write!(f, "{v}"),
            Variant::Int8(v) => write!(f, "{v}"),
            Variant::Int16(v) => write!(f, "{v}"),
            Variant::Int32(v) => write!(f, "{v}"),
            Variant::Int64(v) => write!(f, "{v}"),
            Variant::UInt8(v) => write!(f, "{v}"),
            Variant::UInt16(v) => write!(f, "{v}"),
            Variant::UInt32(v) => write!(f, "{v}"),
            Variant::UInt64(v) => write!(f, "{v}"),
            Variant::Float(v) => write!(f, "{v}"),
            Variant::Double(v) => write!(f, "{v}"),
            Variant::String(v) | Variant::StringView(v) => write!(f, "{v}"),
            Variant::HashedString(v) => write!(f, "{v}"),
            Variant::Uuid(v) => write!(f, "{v}"),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Implemented for each concrete type a `Variant` can hold, so
/// `Variant::get::<T>()` resolves at compile time instead of via a
/// runtime type tag match at every call site.
pub trait VariantGet: Sized {
    fn get(v: &Variant) -> Option<Self>;
}

macro_rules! impl_variant_get {
    ($t:ty, $variant:ident) => {
        impl VariantGet for $t {
            fn get(v: &Variant) -> Option<Self> {
                match v {
                    Variant::$variant(x) => Some(x.clone()),
                    _ => None,
                }
            }
        }
    };
}

impl_variant_get!(bool, Bool);
impl_variant_get!(i8, Int8);
impl_variant_get!(i16, Int16);
impl_variant_get!(i32, Int32);
impl_variant_get!(i64, Int64);
impl_variant_get!(u8, UInt8);
impl_variant_get!(u16, UInt16);
impl_variant_get!(u32, UInt32);
impl_variant_get!(u64, UInt64);
impl_variant_get!(f32, Float);
impl_variant_get!(f64, Double);
impl_variant_get!(String, String);
impl_variant_get!(Uuid, Uuid);
impl_variant_get!(HashedString, HashedString);
impl_variant_get!(TempHashedString, TempHashedString);
impl_variant_get!(VariantArray, VariantArray);
impl_variant_get!(VariantMap, VariantMap);
impl_variant_get!(TypedObject, TypedObject);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_conversion_matrix() {
        let v = Variant::Int32(42);
        assert!(v.can_convert_to(VariantType::Double));
        assert_eq!(v.convert_to(VariantType::Double).unwrap(), Variant::Double(42.0));
    }

    #[test]
    fn string_round_trip() {
        let v = Variant::Int32(7);
        let s = v.convert_to(VariantType::String).unwrap();
        assert_eq!(s, Variant::String("7".into()));
        let back = s.convert_to(VariantType::Int32).unwrap();
        assert_eq!(back, Variant::Int32(7));
    }

    #[test]
    fn incompatible_conversion_fails() {
        let v = Variant::Bool(true);
        assert!(!v.can_convert_to(VariantType::Uuid));
        assert!(v.convert_to(VariantType::Uuid).is_err());
    }

    #[test]
    fn hashed_and_temp_interconvert() {
        let h = Variant::HashedString(HashedString::new("tag.enemy"));
        let t = h.convert_to(VariantType::TempHashedString).unwrap();
        assert_eq!(t, Variant::TempHashedString(TempHashedString::new("tag.enemy")));
    }

    #[test]
    fn get_returns_none_on_type_mismatch() {
        let v = Variant::Int32(1);
        assert_eq!(v.get::<String>(), None);
        assert_eq!(v.get::<i32>(), Some(1));
    }

    #[test]
    fn bool_converts_to_and_from_integer_via_zero_one() {
        let t = Variant::Bool(true);
        assert!(t.can_convert_to(VariantType::Int32));
        assert_eq!(t.convert_to(VariantType::Int32).unwrap(), Variant::Int32(1));

        let f = Variant::Bool(false);
        assert_eq!(f.convert_to(VariantType::UInt8).unwrap(), Variant::UInt8(0));

        let zero = Variant::Int32(0);
        assert_eq!(zero.convert_to(VariantType::Bool).unwrap(), Variant::Bool(false));
        let nonzero = Variant::Int32(5);
        assert_eq!(nonzero.convert_to(VariantType::Bool).unwrap(), Variant::Bool(true));
    }

    #[test]
    fn string_converts_to_uuid() {
        let uuid = Uuid::new_v4();
        let v = Variant::String(uuid.to_string());
        assert!(v.can_convert_to(VariantType::Uuid));
        assert_eq!(v.convert_to(VariantType::Uuid).unwrap(), Variant::Uuid(uuid));
    }

    #[test]
    fn string_converts_to_hashed_string_and_temp_hashed_string() {
        let v = Variant::String("tag.enemy".to_string());
        let hashed = v.convert_to(VariantType::HashedString).unwrap();
        assert_eq!(hashed, Variant::HashedString(HashedString::new("tag.enemy")));
        let temp = v.convert_to(VariantType::TempHashedString).unwrap();
        assert_eq!(temp, Variant::TempHashedString(TempHashedString::new("tag.enemy")));
    }

    #[test]
    fn angle_and_float_interconvert() {
        let a = Variant::Angle(Angle { radians: 1.5 });
        assert!(a.can_convert_to(VariantType::Float));
        assert_eq!(a.convert_to(VariantType::Float).unwrap(), Variant::Float(1.5));

        let f = Variant::Float(0.25);
        assert_eq!(f.convert_to(VariantType::Angle).unwrap(), Variant::Angle(Angle { radians: 0.25 }));

        assert!(!a.can_convert_to(VariantType::Int32), "Angle only interconverts with Float, not the general numeric set");
    }

    #[test]
    fn dispatch_to_calls_the_matching_visitor_method() {
        #[derive(Default)]
        struct Recorder {
            seen: Vec<String>,
        }
        impl VariantVisitor for Recorder {
            fn visit_i32(&mut self, v: i32) {
                self.seen.push(format!("i32:{v}"));
            }
            fn visit_string(&mut self, v: &str) {
                self.seen.push(format!("string:{v}"));
            }
            fn visit_other(&mut self, v: &Variant) {
                self.seen.push(format!("other:{:?}", v.variant_type()));
            }
        }

        let mut r = Recorder::default();
        Variant::Int32(7).dispatch_to(&mut r, VariantType::Int32);
        Variant::String("hi".into()).dispatch_to(&mut r, VariantType::String);
        Variant::Bool(true).dispatch_to(&mut r, VariantType::Bool);
        assert_eq!(r.seen, vec!["i32:7", "string:hi", "other:Bool"]);
    }

    #[test]
    fn dispatch_to_with_mismatched_tag_falls_through_to_other() {
        #[derive(Default)]
        struct Recorder {
            other_calls: u32,
        }
        impl VariantVisitor for Recorder {
            fn visit_i32(&mut self, _v: i32) {
                panic!("should not be called for a mismatched tag");
            }
            fn visit_other(&mut self, _v: &Variant) {
                self.other_calls += 1;
            }
        }
        let mut r = Recorder::default();
        Variant::Int32(1).dispatch_to(&mut r, VariantType::String);
        assert_eq!(r.other_calls, 1);
    }
}
