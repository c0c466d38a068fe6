//! C1 — Endpoint Descriptor.
//!
//! An immutable value identifying one service endpoint: protocol, optional
//! credentials, host, port, path and an insertion-ordered parameter map.
//! `parse(format(d)) == d` is the load-bearing invariant — every other
//! component builds descriptors and hands their string form to a transport,
//! so round-tripping has to be exact.

use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use std::fmt;

/// Characters that force percent-encoding in a parameter value: those with
/// special meaning in the query grammar (`&`, `=`, `%`) plus whitespace.
const VALUE_ENCODE_SET: &AsciiSet = &CONTROLS.add(b'&').add(b'=').add(b'%').add(b' ');

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("missing protocol in {0:?}")]
    MissingProtocol(String),
    #[error("missing host in {0:?}")]
    MissingHost(String),
    #[error("invalid port {port:?} in {input:?}")]
    InvalidPort { input: String, port: String },
    #[error("invalid percent-escape in {0:?}")]
    InvalidEscape(String),
}

/// An ordered, map-like collection of string parameters. A `Vec` rather than
/// a hash map: descriptors carry only a handful of entries, and formatting
/// must preserve first-occurrence order, which a hash map can't do for free.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Parameters(Vec<(String, String)>);

impl Parameters {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn contains_non_empty(&self, key: &str) -> bool {
        matches!(self.get(key), Some(v) if !v.is_empty())
    }

    /// Insert or overwrite `key`. Preserves the position of first occurrence.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let key = key.into();
        let value = value.into();
        if let Some(slot) = self.0.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            self.0.push((key, value));
        }
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        let pos = self.0.iter().position(|(k, _)| k == key)?;
        Some(self.0.remove(pos).1)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, String)> for Parameters {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut params = Parameters::new();
        for (k, v) in iter {
            params.set(k, v);
        }
        params
    }
}

/// The immutable endpoint descriptor itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Descriptor {
    protocol: String,
    username: Option<String>,
    password: Option<String>,
    host: String,
    port: u16,
    path: String,
    parameters: Parameters,
}

impl Descriptor {
    pub fn new(protocol: impl Into<String>, host: impl Into<String>, port: u16, path: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            username: None,
            password: None,
            host: host.into(),
            port,
            path: path.into(),
            parameters: Parameters::new(),
        }
    }

    pub fn protocol(&self) -> &str {
        &self.protocol
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn parameters(&self) -> &Parameters {
        &self.parameters
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.protocol = protocol.into();
        self
    }

    /// Returns a new descriptor with `key` set to `value`, unconditionally.
    pub fn with_parameter(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        next.parameters.set(key, value);
        next
    }

    /// Returns a new descriptor with `key` set to `value` only if `key` is
    /// currently absent or present with an empty value.
    pub fn with_parameter_if_absent(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let key = key.into();
        if self.parameters.contains_non_empty(&key) {
            self.clone()
        } else {
            self.with_parameter(key, value)
        }
    }

    /// Like [`Self::with_parameter`], but documents that `raw` is itself the
    /// full string form of an inner descriptor (or another payload that must
    /// survive being embedded in a query string) rather than a plain scalar.
    /// Storage is identical to `with_parameter` — every value is kept in
    /// decoded form and percent-encoded once, at [`Self::format`] time — so
    /// this does not pre-encode `raw` itself; doing so would encode it twice
    /// over once `format()` runs. `parameter()` returns the decoded value.
    pub fn with_encoded_parameter(&self, key: impl Into<String>, raw: &str) -> Self {
        self.with_parameter(key, raw)
    }

    pub fn parameter<'a>(&'a self, key: &str, default: &'a str) -> std::borrow::Cow<'a, str> {
        match self.parameters.get(key) {
            Some(v) => percent_decode_str(v)
                .decode_utf8()
                .unwrap_or(std::borrow::Cow::Borrowed(v)),
            None => std::borrow::Cow::Borrowed(default),
        }
    }

    pub fn parameter_as_int(&self, key: &str, default: i64) -> i64 {
        self.parameters
            .get(key)
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(default)
    }

    /// Truthy parsing: `true`/`1`/`yes`, case-insensitive.
    pub fn parameter_as_bool(&self, key: &str, default: bool) -> bool {
        match self.parameters.get(key) {
            None => default,
            Some(v) => matches!(v.to_ascii_lowercase().as_str(), "true" | "1" | "yes"),
        }
    }

    /// The stable full-string form: `protocol://[user[:pass]@]host[:port]/path?k=v&k=v`.
    /// Parameter values containing `&`, `=`, `%` or whitespace are
    /// percent-encoded; keys never are.
    pub fn format(&self) -> String {
        let mut s = String::new();
        s.push_str(&self.protocol);
        s.push_str("://");
        if let Some(u) = &self.username {
            s.push_str(u);
            if let Some(p) = &self.password {
                s.push(':');
                s.push_str(p);
            }
            s.push('@');
        }
        s.push_str(&self.host);
        if self.port != 0 {
            s.push(':');
            s.push_str(&self.port.to_string());
        }
        s.push('/');
        s.push_str(self.path.trim_start_matches('/'));
        if !self.parameters.is_empty() {
            s.push('?');
            let mut first = true;
            for (k, v) in self.parameters.iter() {
                if !first {
                    s.push('&');
                }
                first = false;
                s.push_str(k);
                s.push('=');
                s.push_str(&utf8_percent_encode(v, VALUE_ENCODE_SET).to_string());
            }
        }
        s
    }

    /// Parses `protocol://[user[:pass]@]host[:port]/path?k=v&k=v`.
    /// Duplicate keys: last occurrence wins, but the parameter keeps the
    /// position of its *first* occurrence, so re-formatting is stable.
    pub fn parse(s: &str) -> Result<Self, ParseError> {
        let (protocol, rest) = s
            .split_once("://")
            .ok_or_else(|| ParseError::MissingProtocol(s.to_string()))?;
        if protocol.is_empty() {
            return Err(ParseError::MissingProtocol(s.to_string()));
        }

        let (authority_and_path, query) = match rest.split_once('?') {
            Some((a, q)) => (a, Some(q)),
            None => (rest, None),
        };
        let (authority, path) = match authority_and_path.split_once('/') {
            Some((a, p)) => (a, p),
            None => (authority_and_path, ""),
        };

        let (userinfo, hostport) = match authority.split_once('@') {
            Some((u, h)) => (Some(u), h),
            None => (None, authority),
        };
        let (username, password) = match userinfo {
            None => (None, None),
            Some(u) => match u.split_once(':') {
                Some((user, pass)) => (Some(user.to_string()), Some(pass.to_string())),
                None => (Some(u.to_string()), None),
            },
        };

        if hostport.is_empty() {
            return Err(ParseError::MissingHost(s.to_string()));
        }
        let (host, port) = match hostport.split_once(':') {
            Some((h, p)) => {
                let port: u16 = p.parse().map_err(|_| ParseError::InvalidPort {
                    input: s.to_string(),
                    port: p.to_string(),
                })?;
                if port == 0 {
                    return Err(ParseError::InvalidPort { input: s.to_string(), port: p.to_string() });
                }
                (h.to_string(), port)
            }
            None => (hostport.to_string(), 0),
        };

        let mut parameters = Parameters::new();
        if let Some(query) = query {
            if !query.is_empty() {
                for pair in query.split('&') {
                    if pair.is_empty() {
                        continue;
                    }
                    let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
                    let decoded = percent_decode_str(v)
                        .decode_utf8()
                        .map_err(|_| ParseError::InvalidEscape(s.to_string()))?
                        .into_owned();
                    parameters.set(k.to_string(), decoded);
                }
            }
        }

        Ok(Descriptor {
            protocol: protocol.to_string(),
            username,
            password,
            host,
            port,
            path: path.to_string(),
            parameters,
        })
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.format())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_basic() {
        let d = Descriptor::new("dubbo", "127.0.0.1", 20880, "demo.Greeter")
            .with_parameter("side", "provider")
            .with_parameter("methods", "sayHello,sayGoodbye");
        let formatted = d.format();
        let parsed = Descriptor::parse(&formatted).unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn round_trip_with_encoded_parameter() {
        let inner = Descriptor::new("dubbo", "127.0.0.1", 20880, "demo.Greeter");
        let outer = Descriptor::new("registry", "127.0.0.1", 2181, "RegistryService")
            .with_encoded_parameter("export", &inner.format());
        let formatted = outer.format();
        let parsed = Descriptor::parse(&formatted).unwrap();
        assert_eq!(outer, parsed);
        assert_eq!(parsed.parameter("export", ""), inner.format());
    }

    /// A realistic nested descriptor carries its own query string (`&`/`=`),
    /// which must survive exactly one round of percent-encoding, not two.
    #[test]
    fn encoded_parameter_with_query_string_does_not_double_encode() {
        let inner = Descriptor::new("dubbo", "127.0.0.1", 20880, "demo.Greeter")
            .with_parameter("side", "provider")
            .with_parameter("methods", "sayGoodbye,sayHello");
        let outer = Descriptor::new("registry", "127.0.0.1", 2181, "RegistryService")
            .with_encoded_parameter("export", &inner.format());
        let formatted = outer.format();
        assert!(!formatted.contains("%25"), "value was double-encoded: {formatted}");
        let parsed = Descriptor::parse(&formatted).unwrap();
        assert_eq!(parsed.parameter("export", ""), inner.format());
    }

    #[test]
    fn duplicate_keys_last_wins_first_position() {
        let parsed = Descriptor::parse("dubbo://localhost:20880/p?a=1&b=2&a=3").unwrap();
        assert_eq!(parsed.parameter("a", ""), "3");
        // first-occurrence order preserved: a, then b
        let mut keys = parsed.parameters().iter().map(|(k, _)| k);
        assert_eq!(keys.next(), Some("a"));
        assert_eq!(keys.next(), Some("b"));
    }

    #[test]
    fn invalid_port_is_parse_error() {
        assert!(Descriptor::parse("dubbo://localhost:notaport/p").is_err());
    }

    #[test]
    fn explicit_zero_port_is_parse_error() {
        assert!(matches!(
            Descriptor::parse("dubbo://localhost:0/p"),
            Err(ParseError::InvalidPort { .. })
        ));
    }

    #[test]
    fn missing_port_defaults_to_unbound_zero() {
        let d = Descriptor::parse("dubbo://localhost/p").unwrap();
        assert_eq!(d.port(), 0);
    }

    #[test]
    fn with_parameter_if_absent_noop_when_present() {
        let d = Descriptor::new("dubbo", "h", 1, "p").with_parameter("k", "v1");
        let d2 = d.with_parameter_if_absent("k", "v2");
        assert_eq!(d2.parameter("k", ""), "v1");
    }

    #[test]
    fn parameter_as_bool_truthy() {
        let d = Descriptor::new("dubbo", "h", 1, "p").with_parameter("dynamic", "TRUE");
        assert!(d.parameter_as_bool("dynamic", false));
        let d = d.with_parameter("dynamic", "0");
        assert!(!d.parameter_as_bool("dynamic", true));
    }

    #[test]
    fn value_with_special_chars_round_trips() {
        let d = Descriptor::new("dubbo", "h", 1, "p").with_parameter("monitor", "a=b&c%d e");
        let parsed = Descriptor::parse(&d.format()).unwrap();
        assert_eq!(parsed.parameter("monitor", ""), "a=b&c%d e");
    }
}
