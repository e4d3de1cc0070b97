//! Reflection & Variant layer (L0): type descriptors, properties,
//! functions, and the tagged-union value type every other subsystem
//! passes values through.

pub mod hashed_string;
pub mod rtti;
pub mod variant;

pub use hashed_string::{HashedString, TempHashedString};
pub use rtti::{
    registry, Attribute, ContainerIndex, ContainerPropertyInfo, FunctionInfo, PropertyFlags, PropertyInfo, PropertyKind, Rtti,
    RttiEvent, RttiRegistry,
};
pub use variant::{
    Angle, Color, Time, Transform, TypedObject, TypedPointer, Variant, VariantArray, VariantGet, VariantMap, VariantType,
    VariantVisitor,
};
