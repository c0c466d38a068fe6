//! Error taxonomy for the export pipeline. Each concern gets its own variant
//! set, composed into one top-level [`Error`] the way the wider codebase
//! composes a single response error out of several narrower ones.

use crate::descriptor::ParseError;
use std::fmt;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("interface identifier is empty")]
    EmptyInterface,
    #[error("reference does not implement interface {0}")]
    ReferenceMismatch(String),
    #[error("method override refers to unknown method {0:?}")]
    UnknownMethod(String),
    #[error("argument override index {index} does not match declared type {ty:?}")]
    ArgIndexTypeMismatch { index: usize, ty: String },
    #[error("argument override for type {0:?} could not be resolved to an index")]
    ArgTypeUnresolved(String),
    #[error("argument override needs an explicit index or a type")]
    ArgOverrideUnspecified,
    #[error("stub/local class {0} does not implement interface")]
    StubMismatch(String),
    #[error("unknown generic flavour {0:?}")]
    UnknownGeneric(String),
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),
    #[error("invalid advertised address {0:?}")]
    InvalidAdvertiseAddress(String),
    #[error("invalid port {0:?}")]
    InvalidPort(String),
}

#[derive(thiserror::Error, Debug)]
pub enum TransportError {
    #[error("unknown protocol {0:?}")]
    UnknownProtocol(String),
    #[error("export to {protocol}://{registry} failed: {source}")]
    ExportFailed {
        protocol: String,
        registry: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

/// Top-level error returned by the exporter pipeline.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("address resolution error: {0}")]
    Address(#[from] AddressError),
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error("service already unexported")]
    AlreadyUnexported,
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Load-balancer programming error: the call site handed the selector an
/// empty candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectorEmpty;

impl fmt::Display for SelectorEmpty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("load balancer selector called with an empty candidate list")
    }
}

impl std::error::Error for SelectorEmpty {}
