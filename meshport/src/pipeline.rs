//! C5 — Exporter Pipeline.
//!
//! The orchestrator: one call, [`Exporter::export`], walks validation,
//! defaulting, per-protocol scope decisions, local/remote dispatch and
//! bookkeeping for one [`ServiceDefinition`]. Everything else in this crate
//! (C1–C4, C6, C7) exists to be called from here.

use crate::address::{AddressInputs, RegistryProbeTarget};
use crate::config::{ConfigScopes, InterfaceMethod};
use crate::descriptor::Descriptor;
use crate::error::{ConfigError, Error, TransportError};
use crate::ports::PortCache;
use crate::transport::{
    ConfiguratorRegistry, DirectProxyFactory, ExporterHandle, Invoker, ProxyFactory, TransportRegistry,
};
use once_cell::sync::Lazy;
use std::any::Any;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

/// `local`/`remote`/`none`/unset — `spec.md` §4.5 step 4.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportScope {
    Both,
    Local,
    Remote,
    None,
}

impl ExportScope {
    fn from_param(value: &str) -> Self {
        match value {
            "local" => ExportScope::Local,
            "remote" => ExportScope::Remote,
            "none" => ExportScope::None,
            _ => ExportScope::Both,
        }
    }
}

/// One `protocol { ... }` block of the service definition: a name, an
/// explicit host/port (either may be unset), and protocol-scoped
/// parameters (which may include `scope`).
#[derive(Debug, Clone, Default)]
pub struct ProtocolConfig {
    pub name: String,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub parameters: Vec<(String, String)>,
}

/// One registry this service should (also) be published to.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    pub host: String,
    pub port: u16,
    pub multicast: bool,
    /// Parameters declared directly on the registry (e.g. `dynamic`).
    pub parameters: Vec<(String, String)>,
}

impl RegistryConfig {
    fn get(&self, key: &str) -> Option<&str> {
        self.parameters.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Either a concrete, statically-typed reference, or the generic-service
/// sentinel (`spec.md` glossary: "a service whose interface is not
/// statically known").
#[derive(Clone)]
pub enum Reference {
    Concrete { implements_interface: bool, value: Arc<dyn Any + Send + Sync> },
    Generic { flavour: String },
}

/// Optional stub/local implementation class, validated against the
/// interface the same way the primary reference is.
#[derive(Debug, Clone)]
pub struct ClassRef {
    pub name: String,
    pub implements_interface: bool,
}

/// Everything needed to export one service: `spec.md` §3 "Service
/// Definition".
#[derive(Clone)]
pub struct ServiceDefinition {
    pub interface: String,
    pub reference: Reference,
    pub protocols: Vec<ProtocolConfig>,
    pub registries: Vec<RegistryConfig>,
    pub config: ConfigScopes,
    pub interface_methods: Vec<InterfaceMethod>,
    pub stub: Option<ClassRef>,
    pub local: Option<ClassRef>,
    pub delay_ms: u64,
}

impl ServiceDefinition {
    fn is_generic(&self) -> bool {
        matches!(self.reference, Reference::Generic { .. })
    }
}

/// The three-state lifecycle from `spec.md` §3 "Lifecycle".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServiceState {
    New,
    Exported,
    Unexported,
}

struct ExporterInner {
    state: ServiceState,
    handles: Vec<Arc<dyn ExporterHandle>>,
    exported_urls: Vec<Descriptor>,
}

/// Runs the single-threaded delay executor lazily, once per process, the
/// way the rest of this codebase lazily stands up process-wide singletons
/// behind `once_cell::sync::Lazy`.
struct DelayExecutor {
    handle: tokio::runtime::Handle,
    // Keeps the background thread (and therefore the runtime) alive for the
    // life of the process; never joined.
    _thread: std::thread::JoinHandle<()>,
}

static DELAY_EXECUTOR: Lazy<DelayExecutor> = Lazy::new(|| {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .expect("failed to build delay executor runtime");
    let handle = runtime.handle().clone();
    let thread = std::thread::Builder::new()
        .name("export-delay".to_string())
        .spawn(move || runtime.block_on(std::future::pending::<()>()))
        .expect("failed to spawn delay executor thread");
    DelayExecutor { handle, _thread: thread }
});

/// Owns the lifecycle and installed exporter handles for one service.
/// Export is serialised per instance by `inner`'s mutex: two concurrent
/// `export()` calls see one winner proceed while the loser blocks, then
/// observes `Exported` and returns as a no-op (`spec.md` §5 "Ordering
/// guarantees").
pub struct Exporter {
    inner: Mutex<ExporterInner>,
    transports: Arc<TransportRegistry>,
    ports: Arc<PortCache>,
    proxy_factory: Arc<dyn ProxyFactory>,
    configurators: Arc<ConfiguratorRegistry>,
}

impl Exporter {
    /// Builds an exporter with the default [`DirectProxyFactory`] and an
    /// empty [`ConfiguratorRegistry`] — the right choice unless the embedder
    /// needs one of those two collaborator capabilities (`spec.md` §6).
    pub fn new(transports: Arc<TransportRegistry>, ports: Arc<PortCache>) -> Arc<Self> {
        Self::with_collaborators(transports, ports, Arc::new(DirectProxyFactory), Arc::new(ConfiguratorRegistry::new()))
    }

    pub fn with_collaborators(
        transports: Arc<TransportRegistry>,
        ports: Arc<PortCache>,
        proxy_factory: Arc<dyn ProxyFactory>,
        configurators: Arc<ConfiguratorRegistry>,
    ) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(ExporterInner { state: ServiceState::New, handles: Vec::new(), exported_urls: Vec::new() }),
            transports,
            ports,
            proxy_factory,
            configurators,
        })
    }

    /// The service descriptors produced so far (one per processed protocol
    /// config, appended once per `export()` call per `spec.md` §4.5 step 7).
    pub fn exported_urls(&self) -> Vec<Descriptor> {
        self.inner.lock().unwrap().exported_urls.clone()
    }

    pub fn handle_count(&self) -> usize {
        self.inner.lock().unwrap().handles.len()
    }

    fn validate(service: &ServiceDefinition) -> Result<(), ConfigError> {
        if service.interface.is_empty() {
            return Err(ConfigError::EmptyInterface);
        }
        match &service.reference {
            Reference::Concrete { implements_interface, .. } if !*implements_interface => {
                return Err(ConfigError::ReferenceMismatch(service.interface.clone()));
            }
            Reference::Generic { flavour } => {
                if !["true", "nativejava", "bean"].contains(&flavour.as_str()) {
                    return Err(ConfigError::UnknownGeneric(flavour.clone()));
                }
            }
            _ => {}
        }
        for class in [&service.stub, &service.local].into_iter().flatten() {
            if !class.implements_interface {
                return Err(ConfigError::StubMismatch(class.name.clone()));
            }
        }
        Ok(())
    }

    /// Builds the public-facing service descriptor for one protocol config:
    /// resolves addresses, attaches `side`/`methods`/etc.
    fn build_service_descriptor(
        &self,
        service: &ServiceDefinition,
        protocol: &ProtocolConfig,
        effective: &crate::descriptor::Parameters,
    ) -> Result<Descriptor, Error> {
        let provider_host = effective.get("bind.host");
        let provider_port = effective.get("bind.port").and_then(|p| p.parse::<u16>().ok());
        let default_port = self.transports.default_port(&protocol.name).unwrap_or(0);

        let registry_targets: Vec<RegistryProbeTarget> = service
            .registries
            .iter()
            .map(|r| RegistryProbeTarget { host: r.host.clone(), port: r.port, multicast: r.multicast })
            .collect();

        let inputs = AddressInputs {
            protocol: &protocol.name,
            protocol_config_host: protocol.host.as_deref(),
            provider_config_host: provider_host,
            protocol_config_port: protocol.port,
            provider_config_port: provider_port,
            default_port,
            registries: &registry_targets,
            local_host_probe: None,
        };
        let resolved = crate::address::resolve(&inputs, &self.ports)?;

        let mut descriptor =
            Descriptor::new(protocol.name.as_str(), resolved.advertise_host, resolved.advertise_port, service.interface.as_str());
        descriptor = descriptor.with_parameter("side", "provider");
        if resolved.anyhost {
            descriptor = descriptor.with_parameter("anyhost", "true");
        }
        descriptor = descriptor
            .with_parameter("bind.ip", resolved.bind_host)
            .with_parameter("bind.port", resolved.bind_port.to_string());

        let methods = if service.is_generic() {
            "*".to_string()
        } else {
            let mut names: Vec<&str> = service.interface_methods.iter().map(|m| m.name.as_str()).collect();
            names.sort_unstable();
            names.join(",")
        };
        descriptor = descriptor.with_parameter("methods", methods);

        for (k, v) in effective.iter() {
            if k == "bind.host" || k == "bind.port" {
                continue;
            }
            descriptor = descriptor.with_parameter(k.to_string(), v.to_string());
        }
        for (k, v) in &protocol.parameters {
            descriptor = descriptor.with_parameter(k.clone(), v.clone());
        }

        Ok(self.configurators.apply(descriptor))
    }

    fn local_export(&self, inner: &mut ExporterInner, service: &ServiceDefinition, service_descriptor: &Descriptor) -> Result<(), Error> {
        let local_descriptor = service_descriptor
            .clone()
            .with_protocol("injvm")
            .with_host("127.0.0.1")
            .with_port(0)
            .with_parameter("register", "false")
            .with_parameter("notify", "false");
        let invoker = self.make_invoker(service, local_descriptor);
        let transport = self.transports.get("injvm")?;
        let handle = transport.export(&invoker).map_err(|e| wrap_export_failure("injvm", "local", e))?;
        inner.handles.push(handle);
        info!(interface = %service.interface, "exported locally via injvm");
        Ok(())
    }

    fn remote_export(
        &self,
        inner: &mut ExporterInner,
        service: &ServiceDefinition,
        service_descriptor: &Descriptor,
    ) -> Result<(), Error> {
        if service.registries.is_empty() {
            // Direct-connect mode: development only, no registry fan-out.
            let invoker = self.make_invoker(service, service_descriptor.clone());
            let transport = self.transports.get(service_descriptor.protocol())?;
            let handle = transport
                .export(&invoker)
                .map_err(|e| wrap_export_failure(service_descriptor.protocol(), "direct", e))?;
            inner.handles.push(handle);
            warn!(interface = %service.interface, "no registries configured, exporting in direct-connect (development) mode");
            return Ok(());
        }

        for registry in &service.registries {
            let mut registry_descriptor = Descriptor::new("registry", registry.host.clone(), registry.port, "RegistryService");
            if let Some(dynamic) = registry.get("dynamic") {
                registry_descriptor = registry_descriptor.with_parameter_if_absent("dynamic", dynamic);
            }
            if let Some(monitor) = service_descriptor.parameters().get("monitor") {
                registry_descriptor = registry_descriptor.with_encoded_parameter("monitor", monitor);
            }
            if let Some(proxy) = service_descriptor.parameters().get("proxy") {
                registry_descriptor = registry_descriptor.with_parameter("proxy", proxy.to_string());
            }
            registry_descriptor = registry_descriptor.with_encoded_parameter("export", &service_descriptor.format());

            let invoker = self.make_invoker(service, registry_descriptor);
            let transport = self.transports.get("registry")?;
            let handle = transport
                .export(&invoker)
                .map_err(|e| wrap_export_failure("registry", &registry.host, e))?;
            inner.handles.push(handle);
            debug!(interface = %service.interface, registry = %registry.host, "exported to registry");
        }
        Ok(())
    }

    /// Wraps the user reference in an [`Invoker`] via the configured
    /// [`ProxyFactory`] (`spec.md` §4.5 step 6).
    fn make_invoker(&self, service: &ServiceDefinition, descriptor: Descriptor) -> Invoker {
        let reference: Arc<dyn Any + Send + Sync> = match &service.reference {
            Reference::Concrete { value, .. } => value.clone(),
            Reference::Generic { .. } => Arc::new(()),
        };
        self.proxy_factory.get_invoker(reference, &service.interface, descriptor)
    }

    /// Runs the actual export work: steps 4-7 of `spec.md` §4.5, given the
    /// already-resolved effective config. Called either synchronously from
    /// `export()`, or from the delay executor if `delay_ms > 0`. Re-checks
    /// the lifecycle state before installing anything: a `delay_ms > 0`
    /// export that loses a race with a concurrent `unexport()` must not
    /// resurrect a service that is supposed to be permanently unexported.
    fn run(self: &Arc<Self>, service: &ServiceDefinition, effective: &crate::descriptor::Parameters) -> Result<(), Error> {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == ServiceState::Unexported {
            return Ok(());
        }

        for protocol in &service.protocols {
            let service_descriptor = self.build_service_descriptor(service, protocol, effective)?;
            let scope = ExportScope::from_param(&service_descriptor.parameter("scope", ""));

            match scope {
                ExportScope::None => {
                    inner.exported_urls.push(service_descriptor);
                    continue;
                }
                ExportScope::Local => {
                    self.local_export(&mut inner, service, &service_descriptor)?;
                }
                ExportScope::Remote => {
                    self.remote_export(&mut inner, service, &service_descriptor)?;
                }
                ExportScope::Both => {
                    self.local_export(&mut inner, service, &service_descriptor)?;
                    self.remote_export(&mut inner, service, &service_descriptor)?;
                }
            }
            inner.exported_urls.push(service_descriptor);
        }
        Ok(())
    }

    /// `spec.md` §4.5: validate and default, decide delay, then run the
    /// per-protocol export. Idempotent per `spec.md` §3 "Lifecycle" and §8
    /// invariant 2.
    ///
    /// Step 2 "Defaulting and validation" — which includes building the
    /// effective config via [`crate::config::resolve`] — completes
    /// synchronously here, before step 3 "Delay" ever schedules anything.
    /// A bad method/argument override surfaces as an error from this call
    /// immediately, the same as with `delay_ms == 0`; only the transport
    /// dispatch in step 4 onward is ever deferred to the delay executor.
    pub fn export(self: &Arc<Self>, service: ServiceDefinition) -> Result<(), Error> {
        {
            let inner = self.inner.lock().unwrap();
            match inner.state {
                ServiceState::Exported => return Ok(()),
                ServiceState::Unexported => return Err(Error::AlreadyUnexported),
                ServiceState::New => {}
            }
        }

        Self::validate(&service)?;
        let effective = crate::config::resolve(&service.config, &service.interface_methods)?;

        if service.delay_ms > 0 {
            {
                let mut inner = self.inner.lock().unwrap();
                inner.state = ServiceState::Exported;
            }
            let this = self.clone();
            let delay = std::time::Duration::from_millis(service.delay_ms);
            DELAY_EXECUTOR.handle.spawn(async move {
                tokio::time::sleep(delay).await;
                if let Err(e) = this.run(&service, &effective) {
                    warn!(error = %e, "delayed export failed");
                }
            });
            return Ok(());
        }

        {
            let mut inner = self.inner.lock().unwrap();
            inner.state = ServiceState::Exported;
        }
        self.run(&service, &effective)
    }

    /// Unexports every installed handle, in order. Individual handle
    /// failures are logged and skipped, never abort the remaining handles
    /// (`spec.md` §4.5 "Unexport"). Idempotent: repeated calls after the
    /// handle list has been drained do nothing.
    pub fn unexport(&self) {
        let mut inner = self.inner.lock().unwrap();
        for handle in inner.handles.drain(..) {
            if let Err(e) = handle.unexport() {
                warn!(error = %e, "unexport failed for one handle, continuing");
            }
        }
        inner.state = ServiceState::Unexported;
    }
}

fn wrap_export_failure(protocol: &str, registry: &str, source: TransportError) -> Error {
    Error::Transport(TransportError::ExportFailed {
        protocol: protocol.to_string(),
        registry: registry.to_string(),
        source: Box::new(source),
    })
}
