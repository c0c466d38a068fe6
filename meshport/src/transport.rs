//! C4 — Transport Registry.
//!
//! A name → capability lookup, populated at process start from whatever the
//! embedding application registers. Every transport — including the
//! `registry` and `injvm` entries the pipeline treats specially — is an
//! ordinary entry in the same map; there is no extension-loading machinery,
//! just a name and a value satisfying [`Transport`].

use crate::descriptor::Descriptor;
use crate::error::TransportError;
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

/// What the export pipeline needs from a user reference in order to hand it
/// to a transport: enough to identify the service and carry its
/// implementation opaquely. The pipeline never inspects `reference`
/// directly — only a [`Transport`] does, and only insofar as its own
/// implementation requires. The descriptor carries the flattened config
/// (`spec.md` §4.2) as its parameter map, which doubles as the "metadata
/// snapshot" `spec.md` §4.5 step 6 says rides along with the invoker — there
/// is no separate polymorphic delegate type for it (`spec.md` §9).
#[derive(Clone)]
pub struct Invoker {
    pub interface: String,
    pub descriptor: Descriptor,
    pub reference: Arc<dyn Any + Send + Sync>,
}

/// The proxy factory capability from `spec.md` §6: wraps a user reference
/// into an [`Invoker`] bound to a descriptor. The framework's actual dynamic
/// proxy machinery is an external collaborator (`spec.md` §1, out of scope)
/// — the pipeline only needs this narrow capability to turn the three
/// ingredients it already holds into one value.
pub trait ProxyFactory: Send + Sync {
    fn get_invoker(&self, reference: Arc<dyn Any + Send + Sync>, interface: &str, descriptor: Descriptor) -> Invoker;
}

/// The default proxy factory: builds the [`Invoker`] directly, with no
/// dynamic-dispatch layer of its own. Sufficient for every transport this
/// crate ships with; an embedding application that needs real proxy
/// generation supplies its own [`ProxyFactory`] instead.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectProxyFactory;

impl ProxyFactory for DirectProxyFactory {
    fn get_invoker(&self, reference: Arc<dyn Any + Send + Sync>, interface: &str, descriptor: Descriptor) -> Invoker {
        Invoker { interface: interface.to_string(), descriptor, reference }
    }
}

/// A configurator rewrites a descriptor based on its protocol before export,
/// the `ConfiguratorFactory` capability of `spec.md` §6. Most protocols have
/// none registered, in which case the descriptor passes through unchanged.
pub trait Configurator: Send + Sync {
    fn configure(&self, descriptor: Descriptor) -> Descriptor;
}

/// Protocol name → [`Configurator`], consulted once per built service
/// descriptor. Empty by default — nothing in this crate needs to rewrite a
/// descriptor, so the hook is a no-op unless an embedder registers one.
#[derive(Clone, Default)]
pub struct ConfiguratorRegistry {
    configurators: HashMap<String, Arc<dyn Configurator>>,
}

impl ConfiguratorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, protocol: impl Into<String>, configurator: Arc<dyn Configurator>) -> &mut Self {
        self.configurators.insert(protocol.into(), configurator);
        self
    }

    /// Applies the configurator registered for `descriptor`'s protocol, if
    /// any; otherwise returns `descriptor` unchanged.
    pub fn apply(&self, descriptor: Descriptor) -> Descriptor {
        match self.configurators.get(descriptor.protocol()) {
            Some(configurator) => configurator.configure(descriptor),
            None => descriptor,
        }
    }
}

/// Opaque handle to a live export. `unexport` must be idempotent — the
/// pipeline may call it more than once during cleanup races.
pub trait ExporterHandle: Send + Sync {
    fn unexport(&self) -> Result<(), TransportError>;
}

/// The capability every transport entry in the registry must provide:
/// bind-and-serve, and (optionally, via a non-zero return) a default port
/// used when no other source names one.
pub trait Transport: Send + Sync {
    fn export(&self, invoker: &Invoker) -> Result<Arc<dyn ExporterHandle>, TransportError>;
    fn default_port(&self) -> u16 {
        0
    }
}

/// Protocol name → transport capability. Unknown names are
/// [`TransportError::UnknownProtocol`].
#[derive(Clone, Default)]
pub struct TransportRegistry {
    transports: HashMap<String, Arc<dyn Transport>>,
}

impl TransportRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, protocol: impl Into<String>, transport: Arc<dyn Transport>) -> &mut Self {
        self.transports.insert(protocol.into(), transport);
        self
    }

    pub fn get(&self, protocol: &str) -> Result<Arc<dyn Transport>, TransportError> {
        self.transports
            .get(protocol)
            .cloned()
            .ok_or_else(|| TransportError::UnknownProtocol(protocol.to_string()))
    }

    pub fn default_port(&self, protocol: &str) -> Result<u16, TransportError> {
        Ok(self.get(protocol)?.default_port())
    }
}

/// The "registry" transport: re-dispatches `export` to whichever transport
/// is named by the `export=` parameter embedded in its own descriptor. This
/// is how one pipeline drives both registration and direct export — the
/// registry transport does not know or care that it is being used for
/// discovery rather than plain RPC.
pub struct RegistryTransport {
    registry: Arc<TransportRegistry>,
}

impl RegistryTransport {
    pub fn new(registry: Arc<TransportRegistry>) -> Self {
        Self { registry }
    }
}

impl Transport for RegistryTransport {
    fn export(&self, invoker: &Invoker) -> Result<Arc<dyn ExporterHandle>, TransportError> {
        let exported = invoker.descriptor.parameter("export", "");
        let inner = Descriptor::parse(&exported)
            .map_err(|e| TransportError::ExportFailed {
                protocol: invoker.descriptor.protocol().to_string(),
                registry: invoker.descriptor.host().to_string(),
                source: Box::new(e),
            })?;
        let target = self.registry.get(inner.protocol())?;
        let inner_invoker = Invoker {
            interface: invoker.interface.clone(),
            descriptor: inner,
            reference: invoker.reference.clone(),
        };
        target.export(&inner_invoker)
    }
}
