//! Demo driver for the export pipeline: reads a YAML service definition,
//! wires up logging-only transport stubs for whatever protocols it names,
//! runs the export, and prints the resulting public descriptors.
//!
//! There is no real wire protocol or registry client behind these stubs —
//! those are capabilities an embedding application supplies. This binary
//! exists to exercise the pipeline end to end and to double as a worked
//! example of how to wire one up.

use anyhow::{bail, Context};
use clap::Parser;
use meshport::error::TransportError;
use meshport::{
    ConfigScopes, Descriptor, Exporter, ExporterHandle, Invoker, PortCache, ProtocolConfig,
    Reference, RegistryConfig, RegistryTransport, ServiceDefinition, Transport, TransportRegistry,
};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(about = "Export a service definition against stub transports", long_about = None)]
struct Args {
    /// YAML file describing the service to export.
    #[arg(short, long, value_name = "file")]
    file: PathBuf,

    /// Parse and validate the file without running the export.
    #[arg(long)]
    validate_only: bool,
}

#[derive(Debug, serde::Deserialize)]
struct ServiceFile {
    interface: String,
    #[serde(default)]
    protocols: Vec<ProtocolFile>,
    #[serde(default)]
    registries: Vec<RegistryFile>,
    #[serde(default)]
    delay_ms: u64,
}

#[derive(Debug, serde::Deserialize)]
struct ProtocolFile {
    name: String,
    #[serde(default)]
    host: Option<String>,
    #[serde(default)]
    port: Option<u16>,
    #[serde(default)]
    scope: Option<String>,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
}

#[derive(Debug, serde::Deserialize)]
struct RegistryFile {
    host: String,
    port: u16,
    #[serde(default)]
    multicast: bool,
    #[serde(default)]
    parameters: BTreeMap<String, String>,
}

fn into_service(file: ServiceFile) -> anyhow::Result<ServiceDefinition> {
    if file.interface.is_empty() {
        bail!("interface must not be empty");
    }
    if file.protocols.is_empty() {
        bail!("at least one protocol must be configured");
    }

    let protocols = file
        .protocols
        .iter()
        .map(|p| {
            let mut parameters: Vec<(String, String)> = p.parameters.clone().into_iter().collect();
            if let Some(scope) = &p.scope {
                parameters.push(("scope".to_string(), scope.clone()));
            }
            ProtocolConfig { name: p.name.clone(), host: p.host.clone(), port: p.port, parameters }
        })
        .collect();

    let registries = file
        .registries
        .iter()
        .map(|r| RegistryConfig {
            host: r.host.clone(),
            port: r.port,
            multicast: r.multicast,
            parameters: r.parameters.clone().into_iter().collect(),
        })
        .collect();

    Ok(ServiceDefinition {
        interface: file.interface,
        reference: Reference::Generic { flavour: "true".to_string() },
        protocols,
        registries,
        config: ConfigScopes::default(),
        interface_methods: vec![],
        stub: None,
        local: None,
        delay_ms: file.delay_ms,
    })
}

/// Accepts any export and logs it; never fails, never actually binds a
/// socket or talks to a registry.
struct LoggingTransport {
    name: String,
}

struct LoggingHandle {
    descriptor: String,
}

impl ExporterHandle for LoggingHandle {
    fn unexport(&self) -> Result<(), TransportError> {
        info!(descriptor = %self.descriptor, "unexported");
        Ok(())
    }
}

impl Transport for LoggingTransport {
    fn export(&self, invoker: &Invoker) -> Result<Arc<dyn ExporterHandle>, TransportError> {
        info!(transport = %self.name, descriptor = %invoker.descriptor, "exported");
        Ok(Arc::new(LoggingHandle { descriptor: invoker.descriptor.format() }))
    }

    fn default_port(&self) -> u16 {
        0
    }
}

fn build_transports(service: &ServiceDefinition) -> Arc<TransportRegistry> {
    let mut backend = TransportRegistry::new();
    backend.register("injvm", Arc::new(LoggingTransport { name: "injvm".to_string() }) as Arc<dyn Transport>);
    for protocol in &service.protocols {
        backend.register(protocol.name.clone(), Arc::new(LoggingTransport { name: protocol.name.clone() }) as Arc<dyn Transport>);
    }
    let backend = Arc::new(backend);

    let mut transports = TransportRegistry::new();
    transports.register("injvm", Arc::new(LoggingTransport { name: "injvm".to_string() }) as Arc<dyn Transport>);
    for protocol in &service.protocols {
        transports.register(protocol.name.clone(), Arc::new(LoggingTransport { name: protocol.name.clone() }) as Arc<dyn Transport>);
    }
    transports.register("registry", Arc::new(RegistryTransport::new(backend)) as Arc<dyn Transport>);
    Arc::new(transports)
}

fn describe(descriptor: &Descriptor) -> String {
    descriptor.to_string()
}

fn main() -> anyhow::Result<()> {
    meshport_core::init_tracing();

    let args = Args::parse();
    let contents = std::fs::read_to_string(&args.file).with_context(|| format!("reading {:?}", args.file))?;
    let is_json = args.file.extension().and_then(|e| e.to_str()) == Some("json");
    let file: ServiceFile = if is_json {
        serde_json::from_str(&contents).with_context(|| format!("parsing {:?}", args.file))?
    } else {
        serde_yaml::from_str(&contents).with_context(|| format!("parsing {:?}", args.file))?
    };
    let service = into_service(file)?;

    if args.validate_only {
        println!("Configuration is valid!");
        return Ok(());
    }

    let transports = build_transports(&service);
    let exporter = Exporter::new(transports, Arc::new(PortCache::new()));
    exporter.export(service).map_err(|e| anyhow::anyhow!(e))?;

    for url in exporter.exported_urls() {
        println!("{}", describe(&url));
    }
    Ok(())
}
