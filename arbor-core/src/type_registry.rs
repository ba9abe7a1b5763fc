//! TypeRegistry - alias strings to type descriptors
//!
//! Uses factory-table registration: every view and value type the engine can
//! name is a [`TypeHandle`] registered under one or more aliases. Lookups of
//! unknown names fall through to an injectable dynamic resolver; successes
//! are cached permanently, failures are hard errors.
//!
//! The map is append-only with insert-if-absent semantics, so concurrent
//! registration of the same alias converges on a single mapping.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock, RwLock};

/// Whether a handle names a view (access interface) or a value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    View,
    Value,
}

/// An interned descriptor for a named type.
///
/// Handles are cheap to clone and compare by canonical name and kind, so a
/// handle resolved through an alias equals one constructed directly.
#[derive(Debug, Clone)]
pub struct TypeHandle(Arc<TypeInfo>);

#[derive(Debug)]
struct TypeInfo {
    name: String,
    kind: TypeKind,
}

impl TypeHandle {
    /// Create a view-type handle with the given canonical name.
    pub fn view(name: impl Into<String>) -> Self {
        Self(Arc::new(TypeInfo { name: name.into(), kind: TypeKind::View }))
    }

    /// Create a value-type handle with the given canonical name.
    pub fn value(name: impl Into<String>) -> Self {
        Self(Arc::new(TypeInfo { name: name.into(), kind: TypeKind::Value }))
    }

    /// Canonical type name.
    pub fn name(&self) -> &str {
        &self.0.name
    }

    pub fn kind(&self) -> TypeKind {
        self.0.kind
    }
}

impl PartialEq for TypeHandle {
    fn eq(&self, other: &Self) -> bool {
        self.0.name == other.0.name && self.0.kind == other.0.kind
    }
}

impl Eq for TypeHandle {}

impl std::fmt::Display for TypeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Lookup failure for a name no alias or resolver covers.
#[derive(Debug, Clone, thiserror::Error)]
#[error("unknown type name: {0}")]
pub struct UnknownType(pub String);

/// Fallback lookup consulted for names missing from the alias map.
/// Returning `Some` caches the handle under the queried name permanently.
pub type DynamicResolver = Box<dyn Fn(&str) -> Option<TypeHandle> + Send + Sync>;

/// Registry mapping alias strings to type handles.
pub struct TypeRegistry {
    aliases: RwLock<HashMap<String, TypeHandle>>,
    resolver: RwLock<Option<DynamicResolver>>,
}

impl TypeRegistry {
    /// Create an empty registry with no aliases and no resolver.
    pub fn new() -> Self {
        Self { aliases: RwLock::new(HashMap::new()), resolver: RwLock::new(None) }
    }

    /// Create a registry seeded with the built-in view and value aliases.
    pub fn with_builtins() -> Self {
        let registry = Self::new();
        registry.register_alias(builtin::map_view(), "Map");
        registry.register_alias(builtin::entry_set_view(), "EntrySet");
        registry.register_alias(builtin::key_set_view(), "KeySet");
        registry.register_alias(builtin::values_view(), "Values");
        registry.register_alias(builtin::set_view(), "Set");
        registry.register_alias(builtin::publisher(), "Publisher, Pub");
        registry.register_alias(builtin::topic_publisher(), "TopicPublisher, TopicPub");
        registry.register_alias(builtin::reference(), "Reference, Ref");
        registry.register_alias(builtin::string(), "String");
        registry.register_alias(builtin::bytes(), "Bytes, Byte, int8");
        registry.register_alias(builtin::character(), "Char, Character");
        registry.register_alias(builtin::int32(), "Int32, Integer, int32");
        registry.register_alias(builtin::int64(), "Int64, Long, Int, int64");
        registry.register_alias(builtin::float32(), "Float32, Float");
        registry.register_alias(builtin::float64(), "Float64, Double");
        registry
    }

    /// The process-wide registry, seeded with built-ins on first use.
    pub fn global() -> &'static TypeRegistry {
        static GLOBAL: OnceLock<TypeRegistry> = OnceLock::new();
        GLOBAL.get_or_init(TypeRegistry::with_builtins)
    }

    /// Register a handle under a comma-separated alias list.
    ///
    /// Each alias is inserted in three case variants (exact,
    /// first-letter-lowercased, fully-lowercased) so conventionally-cased
    /// lookups are case-insensitive. Existing entries are never replaced.
    pub fn register_alias(&self, handle: TypeHandle, aliases: &str) {
        let Ok(mut map) = self.aliases.write() else { return };
        for alias in aliases.split(',').map(str::trim).filter(|a| !a.is_empty()) {
            for variant in [alias.to_string(), lower_first(alias), alias.to_lowercase()] {
                map.entry(variant).or_insert_with(|| handle.clone());
            }
        }
    }

    /// Install the dynamic resolver consulted for unknown names.
    pub fn set_dynamic_resolver(&self, resolver: DynamicResolver) {
        if let Ok(mut slot) = self.resolver.write() {
            *slot = Some(resolver);
        }
    }

    /// Resolve a name to a handle.
    ///
    /// Checks the alias map first; on a miss, consults the dynamic resolver
    /// and caches a success under the queried name. A name neither covers is
    /// a hard [`UnknownType`] error and nothing is cached.
    pub fn resolve(&self, name: &str) -> Result<TypeHandle, UnknownType> {
        if let Ok(map) = self.aliases.read() {
            if let Some(handle) = map.get(name) {
                return Ok(handle.clone());
            }
        }

        let resolved = match self.resolver.read() {
            Ok(slot) => slot.as_ref().and_then(|r| r(name)),
            Err(_) => None,
        };

        match resolved {
            Some(handle) => {
                if let Ok(mut map) = self.aliases.write() {
                    // Racing resolutions of one name converge on the first insert.
                    return Ok(map.entry(name.to_string()).or_insert(handle).clone());
                }
                Ok(handle)
            }
            None => Err(UnknownType(name.to_string())),
        }
    }

    /// Number of alias entries, cache entries included.
    pub fn len(&self) -> usize {
        self.aliases.read().map(|m| m.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Canonical handles for the built-in types.
pub mod builtin {
    use super::TypeHandle;

    pub fn map_view() -> TypeHandle {
        TypeHandle::view("MapView")
    }

    pub fn entry_set_view() -> TypeHandle {
        TypeHandle::view("EntrySetView")
    }

    pub fn key_set_view() -> TypeHandle {
        TypeHandle::view("KeySetView")
    }

    pub fn values_view() -> TypeHandle {
        TypeHandle::view("ValuesView")
    }

    pub fn set_view() -> TypeHandle {
        TypeHandle::view("SetView")
    }

    pub fn publisher() -> TypeHandle {
        TypeHandle::view("Publisher")
    }

    pub fn topic_publisher() -> TypeHandle {
        TypeHandle::view("TopicPublisher")
    }

    pub fn reference() -> TypeHandle {
        TypeHandle::view("Reference")
    }

    pub fn string() -> TypeHandle {
        TypeHandle::value("String")
    }

    pub fn bytes() -> TypeHandle {
        TypeHandle::value("Bytes")
    }

    pub fn character() -> TypeHandle {
        TypeHandle::value("Char")
    }

    pub fn int32() -> TypeHandle {
        TypeHandle::value("Int32")
    }

    pub fn int64() -> TypeHandle {
        TypeHandle::value("Int64")
    }

    pub fn float32() -> TypeHandle {
        TypeHandle::value("Float32")
    }

    pub fn float64() -> TypeHandle {
        TypeHandle::value("Float64")
    }
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_lowercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}
