//! RequestContext - parsed description of one request
//!
//! A URI-like string (`path/to/asset?view=Map&keyType=String`) resolves to a
//! typed, validated description of the storage or view to create or attach
//! to. The context is built once per request and read by the store and
//! client factories; the fluent setters stay available for programmatic
//! construction.

use std::path::{Path, PathBuf};

use arbor_model::WireFormat;

use crate::query;
use crate::type_registry::{TypeHandle, TypeRegistry, UnknownType};

/// Milliseconds before a remote operation is abandoned.
const DEFAULT_TIMEOUT_MS: u64 = 1000;
/// Socket buffer size handed to the transport.
const DEFAULT_TCP_BUFFER_SIZE: usize = 1024;

/// Failure while resolving a URI into a context.
///
/// Resolution never partially applies: on error the whole parse is failed
/// and no context is produced.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ParseError {
    #[error("unknown view name: {0}")]
    UnknownView(String),

    #[error("unknown type name: {0}")]
    UnknownType(String),

    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

impl From<UnknownType> for ParseError {
    fn from(err: UnknownType) -> Self {
        Self::UnknownType(err.0)
    }
}

/// Parsed, typed description of a single request.
#[derive(Debug, Clone)]
pub struct RequestContext {
    path_name: String,
    name: String,
    view_type: Option<TypeHandle>,
    key_type: Option<TypeHandle>,
    value_type: Option<TypeHandle>,
    base_path: Option<PathBuf>,
    wire: WireFormat,
    put_returns_null: Option<bool>,
    remove_returns_null: Option<bool>,
    bootstrap: Option<bool>,
    average_value_size: f64,
    entries: u64,
    host: String,
    port: u16,
    timeout_ms: u64,
    tcp_buffer_size: usize,
}

impl Default for RequestContext {
    fn default() -> Self {
        Self {
            path_name: String::new(),
            name: String::new(),
            view_type: None,
            key_type: None,
            value_type: None,
            base_path: None,
            wire: WireFormat::default(),
            put_returns_null: None,
            remove_returns_null: None,
            bootstrap: None,
            average_value_size: 0.0,
            entries: 0,
            host: String::new(),
            port: 0,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            tcp_buffer_size: DEFAULT_TCP_BUFFER_SIZE,
        }
    }
}

impl RequestContext {
    /// Create a context for the given path and leaf name.
    pub fn new(path_name: impl Into<String>, name: impl Into<String>) -> Self {
        Self { path_name: path_name.into(), name: name.into(), ..Self::default() }
    }

    /// Parse a URI against the process-wide type registry.
    pub fn parse(uri: &str) -> Result<Self, ParseError> {
        Self::parse_with(uri, TypeRegistry::global())
    }

    /// Parse a URI against an explicit registry.
    ///
    /// The part before the first `?` is the full path; one trailing slash is
    /// stripped before the last `/` splits it into path and leaf name. The
    /// rest is the query string.
    pub fn parse_with(uri: &str, registry: &TypeRegistry) -> Result<Self, ParseError> {
        let (full_path, query) = match uri.split_once('?') {
            Some((p, q)) => (p, q),
            None => (uri, ""),
        };
        let full_path = full_path.strip_suffix('/').unwrap_or(full_path);
        let (path_name, name) = match full_path.rsplit_once('/') {
            Some((p, n)) => (p, n),
            None => ("", full_path),
        };
        Self::new(path_name, name).query_string(query, registry)
    }

    /// Apply a query string to this context. No-op on empty input.
    ///
    /// Recognized keys map to typed setters; unrecognized keys are
    /// discarded; duplicate keys last-wins.
    pub fn query_string(self, query: &str, registry: &TypeRegistry) -> Result<Self, ParseError> {
        if query.is_empty() {
            return Ok(self);
        }
        query::apply(self, query, registry)
    }

    // ==================== Getters ====================

    /// Path and name joined with `/`; just the name when the path is empty.
    pub fn full_name(&self) -> String {
        if self.path_name.is_empty() {
            self.name.clone()
        } else {
            format!("{}/{}", self.path_name, self.name)
        }
    }

    pub fn path_name(&self) -> &str {
        &self.path_name
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn view_type(&self) -> Option<&TypeHandle> {
        self.view_type.as_ref()
    }

    pub fn key_type(&self) -> Option<&TypeHandle> {
        self.key_type.as_ref()
    }

    /// Alias for [`key_type`](Self::key_type); collection views call the
    /// same slot their element type.
    pub fn element_type(&self) -> Option<&TypeHandle> {
        self.key_type.as_ref()
    }

    pub fn value_type(&self) -> Option<&TypeHandle> {
        self.value_type.as_ref()
    }

    /// Filesystem root for persisted stores; `None` means memory-only.
    pub fn base_path(&self) -> Option<&Path> {
        self.base_path.as_deref()
    }

    pub fn wire(&self) -> WireFormat {
        self.wire
    }

    /// Tri-state: `None` means the default policy applies.
    pub fn put_returns_null(&self) -> Option<bool> {
        self.put_returns_null
    }

    pub fn remove_returns_null(&self) -> Option<bool> {
        self.remove_returns_null
    }

    pub fn bootstrap(&self) -> Option<bool> {
        self.bootstrap
    }

    /// Sizing hint; `0.0` means unset, let the backend choose.
    pub fn average_value_size(&self) -> f64 {
        self.average_value_size
    }

    /// Sizing hint; `0` means unset, let the backend choose.
    pub fn entries(&self) -> u64 {
        self.entries
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    pub fn tcp_buffer_size(&self) -> usize {
        self.tcp_buffer_size
    }

    // ==================== Fluent setters ====================

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_path_name(mut self, path_name: impl Into<String>) -> Self {
        self.path_name = path_name.into();
        self
    }

    /// Set path and name from a joined full name, splitting on the last `/`.
    pub fn with_full_name(mut self, full_name: &str) -> Self {
        match full_name.rsplit_once('/') {
            Some((path, name)) => {
                self.path_name = path.to_string();
                self.name = name.to_string();
            }
            None => {
                self.path_name = String::new();
                self.name = full_name.to_string();
            }
        }
        self
    }

    pub fn with_view_type(mut self, view_type: TypeHandle) -> Self {
        self.view_type = Some(view_type);
        self
    }

    pub fn with_key_type(mut self, key_type: TypeHandle) -> Self {
        self.key_type = Some(key_type);
        self
    }

    pub fn with_value_type(mut self, value_type: TypeHandle) -> Self {
        self.value_type = Some(value_type);
        self
    }

    pub fn with_base_path(mut self, base_path: impl Into<PathBuf>) -> Self {
        self.base_path = Some(base_path.into());
        self
    }

    pub fn with_wire(mut self, wire: WireFormat) -> Self {
        self.wire = wire;
        self
    }

    pub fn with_put_returns_null(mut self, value: bool) -> Self {
        self.put_returns_null = Some(value);
        self
    }

    pub fn with_remove_returns_null(mut self, value: bool) -> Self {
        self.remove_returns_null = Some(value);
        self
    }

    pub fn with_bootstrap(mut self, value: bool) -> Self {
        self.bootstrap = Some(value);
        self
    }

    pub fn with_average_value_size(mut self, size: f64) -> Self {
        self.average_value_size = size;
        self
    }

    pub fn with_entries(mut self, entries: u64) -> Self {
        self.entries = entries;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn with_tcp_buffer_size(mut self, size: usize) -> Self {
        self.tcp_buffer_size = size;
        self
    }

    /// Resolve a view name through the registry, mapping failure to
    /// [`ParseError::UnknownView`].
    pub(crate) fn with_view_name(
        mut self,
        view_name: &str,
        registry: &TypeRegistry,
    ) -> Result<Self, ParseError> {
        match registry.resolve(view_name) {
            Ok(handle) => {
                self.view_type = Some(handle);
                Ok(self)
            }
            Err(_) => Err(ParseError::UnknownView(view_name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> TypeRegistry {
        TypeRegistry::with_builtins()
    }

    #[test]
    fn test_parse_path_and_name() {
        let ctx = RequestContext::parse_with("a/b/c", &registry()).unwrap();
        assert_eq!(ctx.path_name(), "a/b");
        assert_eq!(ctx.name(), "c");
        assert_eq!(ctx.full_name(), "a/b/c");
    }

    #[test]
    fn test_parse_no_slash() {
        let ctx = RequestContext::parse_with("solo", &registry()).unwrap();
        assert_eq!(ctx.path_name(), "");
        assert_eq!(ctx.name(), "solo");
        assert_eq!(ctx.full_name(), "solo");
    }

    #[test]
    fn test_parse_empty() {
        let ctx = RequestContext::parse_with("", &registry()).unwrap();
        assert_eq!(ctx.path_name(), "");
        assert_eq!(ctx.name(), "");
        assert_eq!(ctx.full_name(), "");
    }

    #[test]
    fn test_parse_strips_one_trailing_slash() {
        let ctx = RequestContext::parse_with("a/b/c/", &registry()).unwrap();
        assert_eq!(ctx.full_name(), "a/b/c");
        // Only one slash is stripped; the second becomes an empty leaf name.
        let ctx = RequestContext::parse_with("a/b/c//", &registry()).unwrap();
        assert_eq!(ctx.path_name(), "a/b/c");
        assert_eq!(ctx.name(), "");
    }

    #[test]
    fn test_full_name_round_trip() {
        for uri in ["a/b/c", "solo", "x/y", "deep/er/and/deeper"] {
            let ctx = RequestContext::parse_with(uri, &registry()).unwrap();
            assert_eq!(ctx.full_name(), uri);
        }
    }

    #[test]
    fn test_parse_view_query() {
        let ctx = RequestContext::parse_with("a/b/c?view=Map", &registry()).unwrap();
        assert_eq!(ctx.view_type().unwrap().name(), "MapView");
    }

    #[test]
    fn test_parse_unknown_view_fails() {
        let err = RequestContext::parse_with("a/b/c?view=bogus", &registry()).unwrap_err();
        assert!(matches!(err, ParseError::UnknownView(name) if name == "bogus"));
    }

    #[test]
    fn test_defaults() {
        let ctx = RequestContext::default();
        assert_eq!(ctx.timeout_ms(), 1000);
        assert_eq!(ctx.tcp_buffer_size(), 1024);
        assert_eq!(ctx.entries(), 0);
        assert_eq!(ctx.average_value_size(), 0.0);
        assert_eq!(ctx.put_returns_null(), None);
        assert_eq!(ctx.bootstrap(), None);
        assert!(ctx.base_path().is_none());
        assert_eq!(ctx.wire(), WireFormat::Text);
    }

    #[test]
    fn test_with_full_name_resplits() {
        let ctx = RequestContext::new("a", "b").with_full_name("x/y/z");
        assert_eq!(ctx.path_name(), "x/y");
        assert_eq!(ctx.name(), "z");

        let ctx = RequestContext::new("a", "b").with_full_name("plain");
        assert_eq!(ctx.path_name(), "");
        assert_eq!(ctx.full_name(), "plain");
    }

    #[test]
    fn test_mutating_name_changes_next_full_name() {
        let ctx = RequestContext::parse_with("a/b/c", &registry()).unwrap();
        let ctx = ctx.with_name("renamed");
        assert_eq!(ctx.full_name(), "a/b/renamed");
    }
}
