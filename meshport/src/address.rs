//! C3 — Address Resolver.
//!
//! Computes the bind address/port and the advertised address/port for one
//! export, walking the priority chains from `spec.md` §4.3: environment
//! variables first, then configuration, then network probes, then a
//! fallback. Socket probes are best-effort — a failure there is logged and
//! the search continues, never aborts resolution (see `spec.md` §7).

use crate::error::AddressError;
use crate::ports::PortCache;
use std::env;
use std::net::{IpAddr, Ipv4Addr, TcpStream};
use std::time::Duration;
use tracing::warn;

/// Values that are never a usable bind/advertise address even when an env
/// var or config explicitly names them.
const KNOWN_INVALID_HOSTS: &[&str] = &["0.0.0.0", "localhost", "::"];

/// Registry coordinates consulted only for the socket-probe fallback step —
/// deliberately narrow so the resolver doesn't need the full registry
/// descriptor type.
#[derive(Debug, Clone)]
pub struct RegistryProbeTarget {
    pub host: String,
    pub port: u16,
    pub multicast: bool,
}

/// Inputs the resolver needs beyond the environment: the protocol name (used
/// to build the `<PROTOCOL>_` env prefix), any explicit host/port from the
/// protocol and provider configs, the transport's default port, and the
/// registries to probe as a last resort.
#[derive(Debug, Clone, Default)]
pub struct AddressInputs<'a> {
    pub protocol: &'a str,
    pub protocol_config_host: Option<&'a str>,
    pub provider_config_host: Option<&'a str>,
    pub protocol_config_port: Option<u16>,
    pub provider_config_port: Option<u16>,
    pub default_port: u16,
    pub registries: &'a [RegistryProbeTarget],
    /// Test-only override for the real local-interface probe below.
    /// Production callers leave this `None` so `probe_local_interface_address`
    /// actually runs; tests set it to get a deterministic host without a
    /// live network.
    pub local_host_probe: Option<&'a str>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAddress {
    pub bind_host: String,
    pub bind_port: u16,
    pub advertise_host: String,
    pub advertise_port: u16,
    /// Set when the bind host came from a network probe rather than an
    /// explicit source (env var or config).
    pub anyhost: bool,
}

fn env_prefixed(protocol: &str, suffix: &str) -> Option<String> {
    let prefixed = format!("{}_{}", protocol.to_uppercase(), suffix);
    env::var(&prefixed).ok().filter(|v| !v.is_empty())
}

fn env_unprefixed(suffix: &str) -> Option<String> {
    env::var(suffix).ok().filter(|v| !v.is_empty())
}

fn env_var_chain(protocol: &str, suffix: &str) -> Option<String> {
    env_prefixed(protocol, suffix).or_else(|| env_unprefixed(suffix))
}

fn reject_known_invalid_bind(host: &str) -> Result<(), AddressError> {
    if KNOWN_INVALID_HOSTS.contains(&host) {
        Err(AddressError::InvalidBindAddress(host.to_string()))
    } else {
        Ok(())
    }
}

fn reject_known_invalid_advertise(host: &str) -> Result<(), AddressError> {
    if KNOWN_INVALID_HOSTS.contains(&host) {
        Err(AddressError::InvalidAdvertiseAddress(host.to_string()))
    } else {
        Ok(())
    }
}

/// Opens a short-lived TCP connection to `(host, port)` with a 1-second
/// connect timeout and returns the local address of that connection,
/// closing immediately on every exit path. Best-effort: failures are not
/// propagated, only logged.
fn probe_local_address_via(host: &str, port: u16) -> Option<IpAddr> {
    let addr = format!("{host}:{port}");
    let socket_addr = std::net::ToSocketAddrs::to_socket_addrs(&addr).ok()?.next()?;
    match TcpStream::connect_timeout(&socket_addr, Duration::from_secs(1)) {
        Ok(stream) => {
            let local = stream.local_addr().ok().map(|a| a.ip());
            drop(stream);
            local
        }
        Err(e) => {
            warn!(registry = %addr, error = %e, "registry socket probe failed, continuing");
            None
        }
    }
}

fn fallback_local_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

/// Discovers this host's outbound-facing local interface address by opening
/// a UDP socket and "connecting" it to a well-known public address — no
/// packet is actually sent, but the kernel picks the interface and source
/// address a real connection would use. Mirrors Apache Dubbo's
/// `NetUtils.getLocalAddress0()`. Best-effort: failures are logged, not
/// propagated.
fn probe_local_interface_address() -> Option<IpAddr> {
    use std::net::UdpSocket;
    let socket = UdpSocket::bind(("0.0.0.0", 0)).ok()?;
    match socket.connect(("114.114.114.114", 53)) {
        Ok(()) => socket.local_addr().ok().map(|a| a.ip()),
        Err(e) => {
            warn!(error = %e, "local interface probe failed, continuing");
            None
        }
    }
}

/// Resolves the bind host, per `spec.md` §4.3 "Bind address" priority list.
/// Returns `(host, probed)` where `probed` is true iff the value came from
/// steps (d)-(f) (network discovery rather than an explicit source).
fn resolve_bind_host(inputs: &AddressInputs) -> Result<(String, bool), AddressError> {
    if let Some(env_host) = env_var_chain(inputs.protocol, "DUBBO_IP_TO_BIND") {
        reject_known_invalid_bind(&env_host)?;
        return Ok((env_host, false));
    }
    if let Some(host) = inputs.protocol_config_host.filter(|h| !h.is_empty()) {
        return Ok((host.to_string(), false));
    }
    if let Some(host) = inputs.provider_config_host.filter(|h| !h.is_empty()) {
        return Ok((host.to_string(), false));
    }
    if let Some(host) = inputs.local_host_probe {
        return Ok((host.to_string(), true));
    }
    if let Some(addr) = probe_local_interface_address() {
        return Ok((addr.to_string(), true));
    }
    for registry in inputs.registries.iter().filter(|r| !r.multicast) {
        if let Some(addr) = probe_local_address_via(&registry.host, registry.port) {
            return Ok((addr.to_string(), true));
        }
    }
    Ok((fallback_local_host().to_string(), true))
}

/// Resolves the advertised host, per `spec.md` §4.3 "Advertised address".
fn resolve_advertise_host(inputs: &AddressInputs, bind_host: &str) -> Result<String, AddressError> {
    if let Some(env_host) = env_var_chain(inputs.protocol, "DUBBO_IP_TO_REGISTRY") {
        reject_known_invalid_advertise(&env_host)?;
        return Ok(env_host);
    }
    Ok(bind_host.to_string())
}

fn parse_port_env(value: &str) -> Result<u16, AddressError> {
    let port: u16 = value.parse().map_err(|_| AddressError::InvalidPort(value.to_string()))?;
    if port == 0 {
        return Err(AddressError::InvalidPort(value.to_string()));
    }
    Ok(port)
}

/// Resolves the bind port per `spec.md` §4.3 "Ports": env override, protocol
/// config, provider config, transport default, the port cache, or a freshly
/// allocated free port (recorded into the cache on first use). The transport
/// default is its own priority step ahead of the cache: a transport that
/// names a fixed default port always binds there, and never consults or
/// seeds the cache.
fn resolve_bind_port(inputs: &AddressInputs, ports: &PortCache) -> Result<u16, AddressError> {
    if let Some(env_port) = env_var_chain(inputs.protocol, "DUBBO_PORT_TO_BIND") {
        return parse_port_env(&env_port);
    }
    if let Some(port) = inputs.protocol_config_port {
        return Ok(port);
    }
    if let Some(port) = inputs.provider_config_port {
        return Ok(port);
    }
    if inputs.default_port != 0 {
        return Ok(inputs.default_port);
    }
    if let Some(cached) = ports.get(inputs.protocol) {
        return Ok(cached);
    }
    let allocated = allocate_free_port(inputs.default_port);
    ports.record_first(inputs.protocol, allocated);
    Ok(allocated)
}

/// Picks a free ephemeral port starting the search at `default_port`,
/// falling back to asking the OS for any free port. Kept deliberately
/// simple: the cache in [`PortCache`] is what makes repeated exports of the
/// same protocol stable, not the search strategy here.
fn allocate_free_port(default_port: u16) -> u16 {
    use std::net::TcpListener;
    if default_port != 0 {
        if let Ok(listener) = TcpListener::bind(("127.0.0.1", default_port)) {
            return listener.local_addr().map(|a| a.port()).unwrap_or(default_port);
        }
    }
    TcpListener::bind(("127.0.0.1", 0))
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap_or(default_port)
}

fn resolve_advertise_port(inputs: &AddressInputs, bind_port: u16) -> Result<u16, AddressError> {
    if let Some(env_port) = env_var_chain(inputs.protocol, "DUBBO_PORT_TO_REGISTRY") {
        return parse_port_env(&env_port);
    }
    Ok(bind_port)
}

/// Resolves both addresses for one export, per `spec.md` §4.3.
pub fn resolve(inputs: &AddressInputs, ports: &PortCache) -> Result<ResolvedAddress, AddressError> {
    let (bind_host, probed) = resolve_bind_host(inputs)?;
    let advertise_host = resolve_advertise_host(inputs, &bind_host)?;
    let bind_port = resolve_bind_port(inputs, ports)?;
    let advertise_port = resolve_advertise_port(inputs, bind_port)?;
    Ok(ResolvedAddress {
        bind_host,
        bind_port,
        advertise_host,
        advertise_port,
        anyhost: probed,
    })
}
