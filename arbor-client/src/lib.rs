//! Arbor Client
//!
//! The transport seam and the remote service locator. The engine core never
//! does network I/O itself; everything byte-level lives behind the
//! [`Transport`] trait. Production supplies a real transport; test and
//! simulation harnesses provide in-memory implementations.

use std::future::Future;
use std::sync::Arc;

use tracing::info;

use arbor_core::type_registry::builtin;
use arbor_core::{RequestContext, TypeHandle};
use arbor_model::WireFormat;

/// Error type for transport operations.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("connection failed: {0}")]
    Connect(String),
    #[error("stream error: {0}")]
    Stream(String),
}

/// Connection parameters derived from a request context.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Identifier byte this client presents to the remote node.
    pub identifier: u8,
    /// Milliseconds before an attempt is abandoned.
    pub timeout_ms: u64,
    /// Socket buffer size.
    pub tcp_buffer_size: usize,
    /// Wire encoding for the connection.
    pub wire: WireFormat,
    /// Whether to run the protocol handshake after connecting.
    pub handshake: bool,
}

impl ConnectOptions {
    /// Derive options from a context. Handshaking is off unless requested.
    pub fn from_context(ctx: &RequestContext, identifier: u8) -> Self {
        Self {
            identifier,
            timeout_ms: ctx.timeout_ms(),
            tcp_buffer_size: ctx.tcp_buffer_size(),
            wire: ctx.wire(),
            handshake: false,
        }
    }
}

/// An established connection to a remote node.
pub trait RemoteConnection: Send + Sync + 'static {
    /// Close the connection. Idempotent.
    fn close(&self);

    /// Whether the connection is still usable.
    fn is_open(&self) -> bool;
}

/// Transport layer abstraction.
///
/// The primary seam for swapping the production stack with in-memory
/// channels in tests and simulation.
pub trait Transport: Send + Sync + 'static {
    type Connection: RemoteConnection;

    /// Connect to `host:port` with the given options.
    fn connect(
        &self,
        host: &str,
        port: u16,
        options: &ConnectOptions,
    ) -> impl Future<Output = Result<Self::Connection, TransportError>> + Send;
}

/// Error type for service lookup.
#[derive(Debug, thiserror::Error)]
pub enum LocatorError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The requested view has no remote service implementation.
    #[error("service type not supported: {0}")]
    Unsupported(String),
}

/// Typed handle to a remote map service.
///
/// Carries everything the transport layer needs to address the map: the hub
/// connection, the asset's full name, and its declared key/value types.
pub struct RemoteMapService<C: RemoteConnection> {
    connection: Arc<C>,
    full_name: String,
    key_type: Option<TypeHandle>,
    value_type: Option<TypeHandle>,
}

impl<C: RemoteConnection> std::fmt::Debug for RemoteMapService<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteMapService")
            .field("full_name", &self.full_name)
            .field("key_type", &self.key_type)
            .field("value_type", &self.value_type)
            .finish_non_exhaustive()
    }
}

impl<C: RemoteConnection> RemoteMapService<C> {
    pub fn connection(&self) -> &Arc<C> {
        &self.connection
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn key_type(&self) -> Option<&TypeHandle> {
        self.key_type.as_ref()
    }

    pub fn value_type(&self) -> Option<&TypeHandle> {
        self.value_type.as_ref()
    }
}

/// Locates typed services on a remote node over a single hub connection.
pub struct RemoteServiceLocator<T: Transport> {
    hub: Arc<T::Connection>,
}

impl<T: Transport> std::fmt::Debug for RemoteServiceLocator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteServiceLocator").finish_non_exhaustive()
    }
}

impl<T: Transport> RemoteServiceLocator<T> {
    /// Establish the hub connection described by the context's host, port,
    /// timeout, and buffer fields.
    pub async fn connect(
        transport: &T,
        ctx: &RequestContext,
        identifier: u8,
    ) -> Result<Self, TransportError> {
        let options = ConnectOptions::from_context(ctx, identifier);
        let hub = transport.connect(ctx.host(), ctx.port(), &options).await?;
        info!(host = ctx.host(), port = ctx.port(), identifier, "service locator connected");
        Ok(Self { hub: Arc::new(hub) })
    }

    /// Look up the typed service a context asks for.
    ///
    /// Map views resolve to a [`RemoteMapService`] bound to the context's
    /// full name and key/value types; any other view type is an explicit
    /// unsupported error.
    pub fn service(&self, ctx: &RequestContext) -> Result<RemoteMapService<T::Connection>, LocatorError> {
        match ctx.view_type() {
            Some(view) if *view == builtin::map_view() => Ok(RemoteMapService {
                connection: Arc::clone(&self.hub),
                full_name: ctx.full_name(),
                key_type: ctx.key_type().cloned(),
                value_type: ctx.value_type().cloned(),
            }),
            Some(view) => Err(LocatorError::Unsupported(view.name().to_string())),
            None => Err(LocatorError::Unsupported("<no view>".to_string())),
        }
    }

    /// Close the hub connection.
    pub fn close(&self) {
        self.hub.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use arbor_core::TypeRegistry;

    struct MockConnection {
        host: String,
        port: u16,
        options: ConnectOptions,
        open: AtomicBool,
    }

    impl RemoteConnection for MockConnection {
        fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    /// In-memory transport recording connect attempts.
    #[derive(Default)]
    struct MockTransport {
        refuse: bool,
        attempts: Mutex<Vec<(String, u16)>>,
    }

    impl Transport for MockTransport {
        type Connection = MockConnection;

        async fn connect(
            &self,
            host: &str,
            port: u16,
            options: &ConnectOptions,
        ) -> Result<MockConnection, TransportError> {
            self.attempts.lock().unwrap().push((host.to_string(), port));
            if self.refuse {
                return Err(TransportError::Connect(format!("{host}:{port} refused")));
            }
            Ok(MockConnection {
                host: host.to_string(),
                port,
                options: options.clone(),
                open: AtomicBool::new(true),
            })
        }
    }

    fn parse(uri: &str) -> RequestContext {
        RequestContext::parse_with(uri, &TypeRegistry::with_builtins()).unwrap()
    }

    #[tokio::test]
    async fn test_connect_uses_context_fields() {
        let transport = MockTransport::default();
        let ctx = parse("grid/prices?view=Map&host=node7&port=9090&timeout=250");
        let locator = RemoteServiceLocator::connect(&transport, &ctx, 3).await.unwrap();

        assert_eq!(transport.attempts.lock().unwrap().as_slice(), &[("node7".to_string(), 9090)]);
        assert_eq!(locator.hub.host, "node7");
        assert_eq!(locator.hub.port, 9090);
        assert_eq!(locator.hub.options.identifier, 3);
        assert_eq!(locator.hub.options.timeout_ms, 250);
        assert_eq!(locator.hub.options.tcp_buffer_size, 1024);
        assert!(!locator.hub.options.handshake);
    }

    #[tokio::test]
    async fn test_connect_failure_propagates() {
        let transport = MockTransport { refuse: true, ..Default::default() };
        let ctx = parse("a?host=down&port=1");
        let err = RemoteServiceLocator::connect(&transport, &ctx, 0).await.unwrap_err();
        assert!(matches!(err, TransportError::Connect(msg) if msg.contains("down:1")));
    }

    #[tokio::test]
    async fn test_map_view_service_lookup() {
        let transport = MockTransport::default();
        let ctx = parse("grid/prices?view=Map&keyType=String&valueType=int64&host=n&port=1");
        let locator = RemoteServiceLocator::connect(&transport, &ctx, 0).await.unwrap();

        let service = locator.service(&ctx).unwrap();
        assert_eq!(service.full_name(), "grid/prices");
        assert_eq!(service.key_type().unwrap().name(), "String");
        assert_eq!(service.value_type().unwrap().name(), "Int64");
        assert!(service.connection().is_open());
    }

    #[tokio::test]
    async fn test_non_map_view_unsupported() {
        let transport = MockTransport::default();
        let ctx = parse("grid/feed?view=Publisher&host=n&port=1");
        let locator = RemoteServiceLocator::connect(&transport, &ctx, 0).await.unwrap();

        let err = locator.service(&ctx).unwrap_err();
        assert!(matches!(err, LocatorError::Unsupported(name) if name == "Publisher"));

        let untyped = parse("grid/feed?host=n&port=1");
        assert!(matches!(locator.service(&untyped), Err(LocatorError::Unsupported(_))));
    }

    #[tokio::test]
    async fn test_close_releases_hub() {
        let transport = MockTransport::default();
        let ctx = parse("a?host=n&port=1");
        let locator = RemoteServiceLocator::connect(&transport, &ctx, 0).await.unwrap();
        assert!(locator.hub.is_open());
        locator.close();
        assert!(!locator.hub.is_open());
    }
}
