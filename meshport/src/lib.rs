//! Service-export pipeline and weighted round-robin selector.
//!
//! [`pipeline::Exporter`] is the entry point: build a
//! [`pipeline::ServiceDefinition`], register [`transport::Transport`]
//! capabilities for whatever protocols it names, and call `export`.
//! [`balancer::WeightedRoundRobinSelector`] is independent of the export
//! path — it picks among already-discovered endpoints on the caller side.

pub mod address;
pub mod balancer;
pub mod config;
pub mod descriptor;
pub mod error;
pub mod pipeline;
pub mod ports;
pub mod transport;

pub use balancer::{SelectorKey, Weighted, WeightedRoundRobinSelector};
pub use config::{ArgumentOverride, ConfigScopes, InterfaceMethod, MethodOverride, Scope};
pub use descriptor::{Descriptor, Parameters};
pub use error::Error;
pub use pipeline::{ClassRef, Exporter, ProtocolConfig, Reference, RegistryConfig, ServiceDefinition};
pub use ports::PortCache;
pub use transport::{
    Configurator, ConfiguratorRegistry, DirectProxyFactory, ExporterHandle, Invoker, ProxyFactory,
    RegistryTransport, Transport, TransportRegistry,
};
