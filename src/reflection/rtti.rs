//! Runtime type descriptors: the registry every reflected type publishes
//! itself into, and the property/function metadata the serializer and
//! editor-facing tooling walk.

use std::sync::{Arc, OnceLock, RwLock};

use super::variant::{Variant, VariantType};
use crate::error::{ReflectionError, Result};

bitflags::bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PropertyFlags: u16 {
        const STANDARD_TYPE = 1 << 0;
        const READ_ONLY      = 1 << 1;
        const POINTER        = 1 << 2;
        const REFERENCE      = 1 << 3;
        const CLASS          = 1 << 4;
        const BITFLAGS       = 1 << 5;
        const IS_ENUM        = 1 << 6;
        const PHANTOM        = 1 << 7;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PropertyKind {
    Constant,
    Member,
    Array,
    Set,
    Map,
    Function,
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub name: &'static str,
    pub value: Variant,
}

/// Position into an Array/Set-kind property, or a key into a Map-kind
/// one. Which variant a given property accepts is determined by its
/// `PropertyKind`.
#[derive(Debug, Clone)]
pub enum ContainerIndex {
    Position(usize),
    Key(String),
}

/// The dynamic operations a reflected Array/Set/Map property supports,
/// over a type-erased instance pointer. Mirrors `PropertyInfo`'s
/// getter/setter split: each operation is a small closure rather than a
/// trait object, so registration can close over the concrete container
/// type without `PropertyInfo` itself being generic.
pub struct ContainerPropertyInfo {
    pub count: Box<dyn Fn(*const ()) -> usize + Send + Sync>,
    pub get: Box<dyn Fn(*const (), &ContainerIndex) -> Result<Variant> + Send + Sync>,
    pub set: Box<dyn Fn(*mut (), &ContainerIndex, &Variant) -> Result<()> + Send + Sync>,
    pub insert: Box<dyn Fn(*mut (), &ContainerIndex, Variant) -> Result<()> + Send + Sync>,
    pub remove: Box<dyn Fn(*mut (), &ContainerIndex) -> Result<()> + Send + Sync>,
    pub move_element: Box<dyn Fn(*mut (), usize, usize) -> Result<()> + Send + Sync>,
}

/// Describes one reflected property of a type. `getter`/`setter` are
/// dynamic accessors over a type-erased instance pointer, mirroring the
/// reflected-property-as-function-pair pattern the property system
/// needs to stay decoupled from any specific in-memory layout.
/// Array/Set/Map properties additionally carry a `container`, since a
/// single getter/setter pair can't express indexed or keyed access.
pub struct PropertyInfo {
    pub name: &'static str,
    pub kind: PropertyKind,
    pub value_type: VariantType,
    pub flags: PropertyFlags,
    pub attributes: Vec<Attribute>,
    pub getter: Box<dyn Fn(*const ()) -> Variant + Send + Sync>,
    pub setter: Option<Box<dyn Fn(*mut (), &Variant) -> Result<()> + Send + Sync>>,
    pub container: Option<ContainerPropertyInfo>,
}

impl PropertyInfo {
    pub fn set(&self, instance: *mut (), value: &Variant) -> Result<()> {
        match &self.setter {
            Some(setter) => setter(instance, value),
            None => Err(ReflectionError::ConstantWrite(self.name.to_string()).into()),
        }
    }

    pub fn get(&self, instance: *const ()) -> Variant {
        (self.getter)(instance)
    }

    fn container(&self, type_name: &str) -> Result<&ContainerPropertyInfo> {
        self.container.as_ref().ok_or_else(|| {
            ReflectionError::NotAContainer {
                type_name: type_name.to_string(),
                property: self.name.to_string(),
            }
            .into()
        })
    }

    /// Number of elements in an Array/Set/Map property.
    pub fn count(&self, type_name: &str, instance: *const ()) -> Result<usize> {
        Ok((self.container(type_name)?.count)(instance))
    }

    /// Reads one element by position (Array/Set) or key (Map).
    pub fn get_at(&self, type_name: &str, instance: *const (), index: &ContainerIndex) -> Result<Variant> {
        (self.container(type_name)?.get)(instance, index)
    }

    /// Overwrites one existing element by position or key.
    pub fn set_at(&self, type_name: &str, instance: *mut (), index: &ContainerIndex, value: &Variant) -> Result<()> {
        (self.container(type_name)?.set)(instance, index, value)
    }

    /// Inserts a new element at a position (Array) or under a key (Map);
    /// for a Set, `index` is ignored and `value` is added if not already
    /// present.
    pub fn insert_at(&self, type_name: &str, instance: *mut (), index: &ContainerIndex, value: Variant) -> Result<()> {
        (self.container(type_name)?.insert)(instance, index, value)
    }

    /// Removes the element at a position or key.
    pub fn remove_at(&self, type_name: &str, instance: *mut (), index: &ContainerIndex) -> Result<()> {
        (self.container(type_name)?.remove)(instance, index)
    }

    /// Relocates an Array element from one position to another, shifting
    /// the elements between them.
    pub fn move_element(&self, type_name: &str, instance: *mut (), from: usize, to: usize) -> Result<()> {
        (self.container(type_name)?.move_element)(instance, from, to)
    }
}

/// Describes one reflected function of a type, invoked with a
/// type-erased instance pointer and a slice of `Variant` arguments.
pub struct FunctionInfo {
    pub name: &'static str,
    pub invoke: Box<dyn Fn(*mut (), &[Variant]) -> Result<Variant> + Send + Sync>,
}

/// A type's full reflection descriptor. Registered once at startup (or,
/// for phantom types discovered purely from a serialized graph, lazily
/// at load time) and never mutated afterward.
pub struct Rtti {
    pub type_name: &'static str,
    pub parent: Option<&'static str>,
    pub version: u32,
    pub allocator: Option<Box<dyn Fn() -> Variant + Send + Sync>>,
    pub properties: Vec<PropertyInfo>,
    pub functions: Vec<FunctionInfo>,
    pub attributes: Vec<Attribute>,
    /// Set for types registered only because they appeared in a loaded
    /// graph whose concrete type is unknown to this binary.
    pub phantom: bool,
}

impl Rtti {
    pub fn property(&self, name: &str) -> Option<&PropertyInfo> {
        self.properties.iter().find(|p| p.name == name)
    }

    pub fn function(&self, name: &str) -> Option<&FunctionInfo> {
        self.functions.iter().find(|f| f.name == name)
    }

    /// Walks the base-class chain, most-derived type first, following
    /// `parent` through the registry. Used by graph patching to build
    /// the bottom-up version key chain.
    pub fn base_chain<'a>(registry: &'a RttiRegistry, type_name: &str) -> Vec<Arc<Rtti>> {
        let mut chain = Vec::new();
        let mut current = registry.get(type_name);
        while let Some(rtti) = current {
            let parent = rtti.parent;
            chain.push(rtti.clone());
            current = parent.and_then(|p| registry.get(p));
        }
        chain
    }
}

/// Fired by [`RttiRegistry`] around registration and unregistration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RttiEvent {
    AfterRegistration(&'static str),
    AfterUnregistration(&'static str),
}

type RttiListener = Box<dyn Fn(RttiEvent) + Send + Sync>;

/// Process-wide registry of `Rtti` descriptors, keyed by type name.
/// Registration happens once at module init (write-once-then-append);
/// reads after startup never contend on a lock in the common case
/// because `RwLock` readers don't block each other.
pub struct RttiRegistry {
    types: RwLock<std::collections::HashMap<&'static str, Arc<Rtti>>>,
    listeners: RwLock<Vec<RttiListener>>,
}

impl RttiRegistry {
    fn new() -> Self {
        RttiRegistry {
            types: RwLock::new(std::collections::HashMap::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    /// Subscribes to every future `AfterRegistration`/`AfterUnregistration`
    /// event. There is no unsubscribe; listeners are expected to live for
    /// the process's lifetime, same as the registry itself.
    pub fn on_event(&self, listener: impl Fn(RttiEvent) + Send + Sync + 'static) {
        self.listeners.write().unwrap().push(Box::new(listener));
    }

    fn fire(&self, event: RttiEvent) {
        for listener in self.listeners.read().unwrap().iter() {
            listener(event);
        }
    }

    pub fn register(&self, rtti: Rtti) -> Arc<Rtti> {
        let name = rtti.type_name;
        let arc = Arc::new(rtti);
        self.types.write().unwrap().insert(name, arc.clone());
        self.fire(RttiEvent::AfterRegistration(name));
        arc
    }

    /// Removes a type's descriptor. Symmetrical with `register`: fires
    /// `AfterUnregistration` once the entry is gone. A no-op, without
    /// firing, if `type_name` was never registered.
    pub fn unregister(&self, type_name: &str) -> Option<Arc<Rtti>> {
        let removed = self.types.write().unwrap().remove(type_name);
        if let Some(rtti) = &removed {
            self.fire(RttiEvent::AfterUnregistration(rtti.type_name));
        }
        removed
    }

    /// Registers a phantom type discovered in a loaded graph whose real
    /// type isn't compiled into this binary. Lets the serializer keep
    /// the node round-trippable instead of discarding its properties.
    pub fn register_phantom(&self, type_name: String, version: u32) -> Arc<Rtti> {
        let leaked: &'static str = Box::leak(type_name.into_boxed_str());
        self.register(Rtti {
            type_name: leaked,
            parent: None,
            version,
            allocator: None,
            properties: Vec::new(),
            functions: Vec::new(),
            attributes: Vec::new(),
            phantom: true,
        })
    }

    pub fn get(&self, type_name: &str) -> Option<Arc<Rtti>> {
        self.types.read().unwrap().get(type_name).cloned()
    }

    pub fn require(&self, type_name: &str) -> Result<Arc<Rtti>> {
        self.get(type_name)
            .ok_or_else(|| ReflectionError::TypeNotRegistered(type_name.to_string()).into())
    }

    pub fn max_version(&self, type_name: &str) -> Option<u32> {
        self.get(type_name).map(|r| r.version)
    }

    pub fn is_registered(&self, type_name: &str) -> bool {
        self.types.read().unwrap().contains_key(type_name)
    }

    pub fn all_type_names(&self) -> Vec<&'static str> {
        self.types.read().unwrap().keys().copied().collect()
    }
}

static REGISTRY: OnceLock<RttiRegistry> = OnceLock::new();

pub fn registry() -> &'static RttiRegistry {
    REGISTRY.get_or_init(RttiRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_and_lookup() {
        registry().register(Rtti {
            type_name: "TestWidget",
            parent: None,
            version: 1,
            allocator: None,
            properties: Vec::new(),
            functions: Vec::new(),
            attributes: Vec::new(),
            phantom: false,
        });
        assert!(registry().is_registered("TestWidget"));
        assert_eq!(registry().max_version("TestWidget"), Some(1));
    }

    #[test]
    fn base_chain_follows_parent_links() {
        registry().register(Rtti {
            type_name: "TestBase",
            parent: None,
            version: 1,
            allocator: None,
            properties: Vec::new(),
            functions: Vec::new(),
            attributes: Vec::new(),
            phantom: false,
        });
        registry().register(Rtti {
            type_name: "TestDerived",
            parent: Some("TestBase"),
            version: 1,
            allocator: None,
            properties: Vec::new(),
            functions: Vec::new(),
            attributes: Vec::new(),
            phantom: false,
        });
        let chain = Rtti::base_chain(registry(), "TestDerived");
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].type_name, "TestDerived");
        assert_eq!(chain[1].type_name, "TestBase");
    }

    #[test]
    fn unknown_type_not_registered() {
        assert!(registry().get("NoSuchType").is_none());
        assert!(registry().require("NoSuchType").is_err());
    }

    #[test]
    fn register_and_unregister_fire_their_events() {
        let reg = RttiRegistry::new();
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let s = seen.clone();
        reg.on_event(move |e| s.lock().unwrap().push(e));

        reg.register(Rtti {
            type_name: "EventWidget",
            parent: None,
            version: 1,
            allocator: None,
            properties: Vec::new(),
            functions: Vec::new(),
            attributes: Vec::new(),
            phantom: false,
        });
        reg.unregister("EventWidget");
        reg.unregister("NeverRegistered");

        let events = seen.lock().unwrap();
        assert_eq!(*events, vec![RttiEvent::AfterRegistration("EventWidget"), RttiEvent::AfterUnregistration("EventWidget")]);
    }

    #[test]
    fn array_property_container_ops_round_trip() {
        use std::cell::RefCell;

        thread_local! {
            static STORE: RefCell<Vec<Variant>> = RefCell::new(vec![Variant::Int32(1), Variant::Int32(2)]);
        }

        let property = PropertyInfo {
            name: "items",
            kind: PropertyKind::Array,
            value_type: VariantType::Int32,
            flags: PropertyFlags::empty(),
            attributes: Vec::new(),
            getter: Box::new(|_| Variant::Invalid),
            setter: None,
            container: Some(ContainerPropertyInfo {
                count: Box::new(|_| STORE.with(|s| s.borrow().len())),
                get: Box::new(|_, idx| {
                    let ContainerIndex::Position(i) = idx else { unreachable!() };
                    STORE.with(|s| {
                        let s = s.borrow();
                        let len = s.len();
                        s.get(*i).cloned().ok_or_else(|| ReflectionError::IndexOutOfBounds { index: *i, len }.into())
                    })
                }),
                set: Box::new(|_, idx, value| {
                    let ContainerIndex::Position(i) = idx else { unreachable!() };
                    STORE.with(|s| {
                        let mut s = s.borrow_mut();
                        let len = s.len();
                        match s.get_mut(*i) {
                            Some(slot) => {
                                *slot = value.clone();
                                Ok(())
                            }
                            None => Err(ReflectionError::IndexOutOfBounds { index: *i, len }.into()),
                        }
                    })
                }),
                insert: Box::new(|_, idx, value| {
                    let ContainerIndex::Position(i) = idx else { unreachable!() };
                    STORE.with(|s| s.borrow_mut().insert(*i, value));
                    Ok(())
                }),
                remove: Box::new(|_, idx| {
                    let ContainerIndex::Position(i) = idx else { unreachable!() };
                    STORE.with(|s| s.borrow_mut().remove(*i));
                    Ok(())
                }),
                move_element: Box::new(|_, from, to| {
                    STORE.with(|s| {
                        let mut s = s.borrow_mut();
                        let v = s.remove(from);
                        s.insert(to, v);
                    });
                    Ok(())
                }),
            }),
        };

        let instance_mut: *mut () = std::ptr::null_mut();
        let instance: *const () = instance_mut;
        assert_eq!(property.count("ArrayHolder", instance).unwrap(), 2);
        property.insert_at("ArrayHolder", instance_mut, &ContainerIndex::Position(2), Variant::Int32(3)).unwrap();
        assert_eq!(property.count("ArrayHolder", instance).unwrap(), 3);
        assert_eq!(property.get_at("ArrayHolder", instance, &ContainerIndex::Position(2)).unwrap(), Variant::Int32(3));
        property.set_at("ArrayHolder", instance_mut, &ContainerIndex::Position(0), &Variant::Int32(100)).unwrap();
        assert_eq!(property.get_at("ArrayHolder", instance, &ContainerIndex::Position(0)).unwrap(), Variant::Int32(100));
        property.remove_at("ArrayHolder", instance_mut, &ContainerIndex::Position(1)).unwrap();
        assert_eq!(property.count("ArrayHolder", instance).unwrap(), 2);
    }

    #[test]
    fn non_container_property_reports_not_a_container() {
        let property = PropertyInfo {
            name: "hp",
            kind: PropertyKind::Member,
            value_type: VariantType::Int32,
            flags: PropertyFlags::empty(),
            attributes: Vec::new(),
            getter: Box::new(|_| Variant::Int32(1)),
            setter: None,
            container: None,
        };
        assert!(property.count("Health", std::ptr::null()).is_err());
    }
}
