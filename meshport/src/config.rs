//! C2 — Config Resolver.
//!
//! Flattens five ordered, immutable configuration scopes plus per-method and
//! per-argument overrides into one `side=provider` parameter map. Precedence
//! (highest wins) is method > service > provider > module > application, so
//! the resolver walks scopes from lowest to highest precedence and lets each
//! later write shadow the earlier one — exactly the "append in increasing
//! precedence order" shape the rest of the pipeline expects from a resolved
//! config (see [`crate::pipeline`]).

use crate::descriptor::Parameters;
use crate::error::ConfigError;

/// One configuration scope: a flat bag of declared attributes plus the key
/// prefix `appendParameters` uses when copying them into the resolved map.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    attributes: Vec<(String, String)>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    fn append_into(&self, dst: &mut Parameters, prefix: &str) {
        for (k, v) in &self.attributes {
            if prefix.is_empty() {
                dst.set(k.clone(), v.clone());
            } else {
                dst.set(format!("{prefix}{k}"), v.clone());
            }
        }
    }
}

/// An interface method signature, used only to resolve argument-override
/// `type` references to a concrete index.
#[derive(Debug, Clone)]
pub struct InterfaceMethod {
    pub name: String,
    pub argument_types: Vec<String>,
}

/// One `index.<attr>` or `type.<attr>` argument-level override.
#[derive(Debug, Clone, Default)]
pub struct ArgumentOverride {
    pub index: Option<usize>,
    pub arg_type: Option<String>,
    attributes: Vec<(String, String)>,
}

impl ArgumentOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_index(mut self, index: usize) -> Self {
        self.index = Some(index);
        self
    }

    pub fn with_type(mut self, ty: impl Into<String>) -> Self {
        self.arg_type = Some(ty.into());
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    /// Resolves this override's effective argument index against the
    /// interface's declared signature for `method`, enforcing that an
    /// explicit `index` and `type` (if both given) agree.
    fn resolve_index(&self, method: &str, methods: &[InterfaceMethod]) -> Result<usize, ConfigError> {
        let sig = methods.iter().find(|m| m.name == method);
        match (self.index, &self.arg_type) {
            (Some(idx), None) => Ok(idx),
            (None, Some(ty)) => sig
                .and_then(|s| s.argument_types.iter().position(|t| t == ty))
                .ok_or_else(|| ConfigError::ArgTypeUnresolved(ty.clone())),
            (Some(idx), Some(ty)) => {
                let matches = sig
                    .map(|s| s.argument_types.get(idx).map(|t| t == ty).unwrap_or(false))
                    .unwrap_or(false);
                if matches {
                    Ok(idx)
                } else {
                    Err(ConfigError::ArgIndexTypeMismatch { index: idx, ty: ty.clone() })
                }
            }
            (None, None) => Err(ConfigError::ArgOverrideUnspecified),
        }
    }
}

/// One method-level override: attributes keyed `<method>.<attr>`, plus any
/// argument-level overrides nested under it.
#[derive(Debug, Clone, Default)]
pub struct MethodOverride {
    pub name: String,
    attributes: Vec<(String, String)>,
    pub arguments: Vec<ArgumentOverride>,
}

impl MethodOverride {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), attributes: Vec::new(), arguments: Vec::new() }
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.push((key.into(), value.into()));
        self
    }

    pub fn with_argument(mut self, arg: ArgumentOverride) -> Self {
        self.arguments.push(arg);
        self
    }

    fn append_into(&self, dst: &mut Parameters, prefix: &str) {
        for (k, v) in &self.attributes {
            dst.set(format!("{prefix}{k}"), v.clone());
        }
    }
}

/// The five ordered scopes plus method/argument overrides that together
/// describe one export's configuration.
#[derive(Debug, Clone, Default)]
pub struct ConfigScopes {
    pub application: Scope,
    pub module: Scope,
    pub provider: Scope,
    pub service: Scope,
    pub methods: Vec<MethodOverride>,
}

/// Rewrites the Dubbo-style `retry=false` shorthand: presence of
/// `<m>.retry=false` in the resolved map is replaced with `<m>.retries=0`,
/// removing the original key.
fn apply_retry_rewrite(map: &mut Parameters, method: &str) {
    let retry_key = format!("{method}.retry");
    if map.get(&retry_key) == Some("false") {
        map.remove(&retry_key);
        map.set(format!("{method}.retries"), "0");
    }
}

/// Resolves `scopes` into one flat `side=provider` parameter map, as
/// described in `spec.md` §4.2.
pub fn resolve(
    scopes: &ConfigScopes,
    interface_methods: &[InterfaceMethod],
) -> Result<Parameters, ConfigError> {
    let mut map = Parameters::new();

    // Lowest to highest precedence: application, module, provider, service, method.
    scopes.application.append_into(&mut map, "");
    scopes.module.append_into(&mut map, "");
    // Provider contributes twice: as itself, and — in its role as the
    // defaults source for method-level settings that go unset — under a
    // `default.` prefix. See DESIGN.md for why both copies are kept.
    scopes.provider.append_into(&mut map, "");
    scopes.provider.append_into(&mut map, "default.");
    scopes.service.append_into(&mut map, "");

    for method in &scopes.methods {
        if !interface_methods.is_empty() && !interface_methods.iter().any(|m| m.name == method.name) {
            return Err(ConfigError::UnknownMethod(method.name.clone()));
        }
        let prefix = format!("{}.", method.name);
        method.append_into(&mut map, &prefix);
        apply_retry_rewrite(&mut map, &method.name);

        for arg in &method.arguments {
            let idx = arg.resolve_index(&method.name, interface_methods)?;
            let arg_prefix = format!("{}.{}.", method.name, idx);
            for (k, v) in &arg.attributes {
                map.set(format!("{arg_prefix}{k}"), v.clone());
            }
        }
    }

    map.set("side", "provider");
    Ok(map)
}
