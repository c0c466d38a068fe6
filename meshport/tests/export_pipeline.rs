//! End-to-end coverage of the export pipeline against an in-memory
//! transport double — no real sockets, no real registry client.

use meshport::error::TransportError;
use meshport::{
    Configurator, ConfiguratorRegistry, ConfigScopes, Descriptor, DirectProxyFactory, Exporter,
    ExporterHandle, Invoker, MethodOverride, PortCache, ProtocolConfig, Reference, RegistryConfig,
    RegistryTransport, ServiceDefinition, Transport, TransportRegistry,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct RecordingHandle {
    label: String,
}

impl ExporterHandle for RecordingHandle {
    fn unexport(&self) -> Result<(), TransportError> {
        let _ = &self.label;
        Ok(())
    }
}

#[derive(Default)]
struct RecordingTransport {
    exports: Mutex<Vec<Descriptor>>,
    fail: Mutex<bool>,
}

impl RecordingTransport {
    fn exported(&self) -> Vec<Descriptor> {
        self.exports.lock().unwrap().clone()
    }

    fn set_fail(&self, fail: bool) {
        *self.fail.lock().unwrap() = fail;
    }
}

impl Transport for RecordingTransport {
    fn export(&self, invoker: &Invoker) -> Result<Arc<dyn ExporterHandle>, TransportError> {
        if *self.fail.lock().unwrap() {
            return Err(TransportError::ExportFailed {
                protocol: invoker.descriptor.protocol().to_string(),
                registry: invoker.descriptor.host().to_string(),
                source: "simulated backend failure".into(),
            });
        }
        self.exports.lock().unwrap().push(invoker.descriptor.clone());
        Ok(Arc::new(RecordingHandle { label: invoker.descriptor.protocol().to_string() }))
    }

    fn default_port(&self) -> u16 {
        20880
    }
}

fn concrete_reference() -> Reference {
    Reference::Concrete { implements_interface: true, value: Arc::new(()) }
}

fn base_service(protocols: Vec<ProtocolConfig>, registries: Vec<RegistryConfig>) -> ServiceDefinition {
    ServiceDefinition {
        interface: "demo.Greeter".to_string(),
        reference: concrete_reference(),
        protocols,
        registries,
        config: ConfigScopes::default(),
        interface_methods: vec![],
        stub: None,
        local: None,
        delay_ms: 0,
    }
}

fn scoped_protocol(name: &str, scope: &str) -> ProtocolConfig {
    ProtocolConfig {
        name: name.to_string(),
        host: Some("10.0.0.5".to_string()),
        port: Some(20880),
        parameters: vec![("scope".to_string(), scope.to_string())],
    }
}

#[test]
fn direct_remote_export_reaches_registry_backend() {
    let dubbo = Arc::new(RecordingTransport::default());
    let mut backend = TransportRegistry::new();
    backend.register("dubbo", dubbo.clone() as Arc<dyn Transport>);
    let backend = Arc::new(backend);

    let mut outer = TransportRegistry::new();
    outer.register("registry", Arc::new(RegistryTransport::new(backend)) as Arc<dyn Transport>);
    let outer = Arc::new(outer);

    let service = base_service(
        vec![scoped_protocol("dubbo", "remote")],
        vec![RegistryConfig { host: "127.0.0.1".to_string(), port: 2181, multicast: false, parameters: vec![] }],
    );

    let exporter = Exporter::new(outer, Arc::new(PortCache::new()));
    exporter.export(service).unwrap();

    let exported = dubbo.exported();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].protocol(), "dubbo");
    assert_eq!(exported[0].parameter("side", ""), "provider");

    let urls = exporter.exported_urls();
    assert_eq!(urls.len(), 1);
    assert_eq!(urls[0].protocol(), "dubbo");
    assert_eq!(urls[0].path(), "demo.Greeter");
}

#[test]
fn local_only_export_uses_injvm_and_skips_registries() {
    let injvm = Arc::new(RecordingTransport::default());
    let mut transports = TransportRegistry::new();
    transports.register("injvm", injvm.clone() as Arc<dyn Transport>);
    let transports = Arc::new(transports);

    let service = base_service(vec![scoped_protocol("dubbo", "local")], vec![]);
    let exporter = Exporter::new(transports, Arc::new(PortCache::new()));
    exporter.export(service).unwrap();

    let exported = injvm.exported();
    assert_eq!(exported.len(), 1);
    assert_eq!(exported[0].protocol(), "injvm");
    assert_eq!(exported[0].host(), "127.0.0.1");
    assert_eq!(exported[0].parameter("register", ""), "false");
    assert_eq!(exported[0].parameter("notify", ""), "false");
}

#[test]
fn delayed_export_runs_once_after_the_delay() {
    let dubbo = Arc::new(RecordingTransport::default());
    let mut transports = TransportRegistry::new();
    transports.register("dubbo", dubbo.clone() as Arc<dyn Transport>);
    let transports = Arc::new(transports);

    let mut service = base_service(vec![scoped_protocol("dubbo", "remote")], vec![]);
    service.delay_ms = 30;

    let exporter = Exporter::new(transports, Arc::new(PortCache::new()));
    exporter.export(service).unwrap();

    // export() must return before the transport has been invoked.
    assert_eq!(dubbo.exported().len(), 0);

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(dubbo.exported().len(), 1);
}

#[test]
fn invalid_method_override_with_delay_fails_synchronously() {
    let dubbo = Arc::new(RecordingTransport::default());
    let mut transports = TransportRegistry::new();
    transports.register("dubbo", dubbo.clone() as Arc<dyn Transport>);
    let transports = Arc::new(transports);

    let mut service = base_service(vec![scoped_protocol("dubbo", "remote")], vec![]);
    service.delay_ms = 30;
    service.config = ConfigScopes { methods: vec![MethodOverride::new("noSuchMethod")], ..Default::default() };

    let exporter = Exporter::new(transports, Arc::new(PortCache::new()));
    let result = exporter.export(service);
    assert!(result.is_err(), "a bad method override must be rejected before the delay is ever scheduled");

    std::thread::sleep(Duration::from_millis(100));
    assert_eq!(dubbo.exported().len(), 0, "nothing should export once validation failed up front");
}

#[test]
fn unexport_during_pending_delay_prevents_the_delayed_export_from_installing_handles() {
    let dubbo = Arc::new(RecordingTransport::default());
    let mut transports = TransportRegistry::new();
    transports.register("dubbo", dubbo.clone() as Arc<dyn Transport>);
    let transports = Arc::new(transports);

    let mut service = base_service(vec![scoped_protocol("dubbo", "remote")], vec![]);
    service.delay_ms = 50;

    let exporter = Exporter::new(transports, Arc::new(PortCache::new()));
    exporter.export(service).unwrap();

    // unexport races the pending delayed export.
    exporter.unexport();
    assert_eq!(exporter.handle_count(), 0);

    std::thread::sleep(Duration::from_millis(200));
    assert_eq!(dubbo.exported().len(), 0, "delayed export must not run against an unexported service");
    assert_eq!(exporter.handle_count(), 0);
}

#[test]
fn export_is_idempotent_once_exported() {
    let dubbo = Arc::new(RecordingTransport::default());
    let mut transports = TransportRegistry::new();
    transports.register("dubbo", dubbo.clone() as Arc<dyn Transport>);
    let transports = Arc::new(transports);

    let service = base_service(vec![scoped_protocol("dubbo", "remote")], vec![]);
    let exporter = Exporter::new(transports, Arc::new(PortCache::new()));

    exporter.export(service.clone()).unwrap();
    exporter.export(service).unwrap();

    assert_eq!(dubbo.exported().len(), 1, "second export() must be a no-op");
    assert_eq!(exporter.handle_count(), 1);
}

#[test]
fn partial_failure_is_not_rolled_back_and_export_becomes_a_no_op() {
    let good = Arc::new(RecordingTransport::default());
    let bad = Arc::new(RecordingTransport::default());
    bad.set_fail(true);

    let mut transports = TransportRegistry::new();
    transports.register("dubbo", good.clone() as Arc<dyn Transport>);
    transports.register("rest", bad.clone() as Arc<dyn Transport>);
    let transports = Arc::new(transports);

    let service = base_service(
        vec![scoped_protocol("dubbo", "remote"), scoped_protocol("rest", "remote")],
        vec![],
    );

    let exporter = Exporter::new(transports, Arc::new(PortCache::new()));
    let result = exporter.export(service.clone());
    assert!(result.is_err());

    // The first protocol's handle survives the second protocol's failure.
    assert_eq!(good.exported().len(), 1);
    assert_eq!(exporter.handle_count(), 1);

    // A second export() call is now a no-op, not a retry.
    assert!(exporter.export(service).is_ok());
    assert_eq!(good.exported().len(), 1);
    assert_eq!(bad.exported().len(), 0);
}

#[test]
fn unexport_drains_handles_and_blocks_further_export() {
    let dubbo = Arc::new(RecordingTransport::default());
    let mut transports = TransportRegistry::new();
    transports.register("dubbo", dubbo.clone() as Arc<dyn Transport>);
    let transports = Arc::new(transports);

    let service = base_service(vec![scoped_protocol("dubbo", "remote")], vec![]);
    let exporter = Exporter::new(transports, Arc::new(PortCache::new()));
    exporter.export(service.clone()).unwrap();
    assert_eq!(exporter.handle_count(), 1);

    exporter.unexport();
    assert_eq!(exporter.handle_count(), 0);
    // Calling unexport again is a harmless no-op.
    exporter.unexport();

    assert!(exporter.export(service).is_err());
}

struct TaggingConfigurator;
impl Configurator for TaggingConfigurator {
    fn configure(&self, descriptor: Descriptor) -> Descriptor {
        descriptor.with_parameter("rewritten-by", "configurator")
    }
}

#[test]
fn registered_configurator_rewrites_descriptor_by_protocol() {
    let dubbo = Arc::new(RecordingTransport::default());
    let mut transports = TransportRegistry::new();
    transports.register("dubbo", dubbo.clone() as Arc<dyn Transport>);
    let transports = Arc::new(transports);

    let mut configurators = ConfiguratorRegistry::new();
    configurators.register("dubbo", Arc::new(TaggingConfigurator));

    let service = base_service(vec![scoped_protocol("dubbo", "remote")], vec![]);
    let exporter =
        Exporter::with_collaborators(transports, Arc::new(PortCache::new()), Arc::new(DirectProxyFactory), Arc::new(configurators));
    exporter.export(service).unwrap();

    let exported = dubbo.exported();
    assert_eq!(exported[0].parameter("rewritten-by", ""), "configurator");
}

#[test]
fn empty_interface_is_rejected_before_any_transport_is_touched() {
    let transports = Arc::new(TransportRegistry::new());
    let mut service = base_service(vec![scoped_protocol("dubbo", "remote")], vec![]);
    service.interface = String::new();

    let exporter = Exporter::new(transports, Arc::new(PortCache::new()));
    assert!(exporter.export(service).is_err());
    assert_eq!(exporter.handle_count(), 0);
}
