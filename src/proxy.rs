//! Proxy addresses and their quality record.

use crate::error::AddressError;

use std::fmt;
use std::str::FromStr;
use url::Url;

/// Protocol spoken by a proxy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyKind {
    /// Plain HTTP proxy (CONNECT for https targets).
    Http,
    /// SOCKS4 proxy.
    Socks4,
    /// SOCKS5 proxy.
    Socks5,
}

impl ProxyKind {
    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Socks4 => "socks4",
            Self::Socks5 => "socks5",
        }
    }

    fn from_scheme(scheme: &str) -> Option<Self> {
        match scheme.to_ascii_lowercase().as_str() {
            "http" => Some(Self::Http),
            "socks4" => Some(Self::Socks4),
            "socks5" | "socks5h" => Some(Self::Socks5),
            _ => None,
        }
    }
}

/// A proxy endpoint, e.g. `http://10.0.0.1:8080`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyAddress {
    kind: ProxyKind,
    host: String,
    port: u16,
}

impl ProxyAddress {
    /// Parse `kind://host:port`, or a bare `host:port` taken to be of `default_kind`.
    pub fn parse_with_default(input: &str, default_kind: ProxyKind) -> Result<Self, AddressError> {
        let input = input.trim();
        let (kind, rest) = match input.split_once("://") {
            Some((scheme, rest)) => {
                let kind = ProxyKind::from_scheme(scheme)
                    .ok_or_else(|| AddressError::UnsupportedScheme(scheme.to_string()))?;
                (kind, rest)
            }
            None => (default_kind, input),
        };

        let url = Url::parse(&format!("{}://{}", kind.scheme(), rest))
            .map_err(|_| AddressError::Malformed(input.to_string()))?;

        let host = match url.host_str() {
            Some(host) if !host.is_empty() => host.to_string(),
            _ => return Err(AddressError::Malformed(input.to_string())),
        };
        // `Url` drops the port when it equals the scheme default, so only
        // accept addresses that spell one out.
        let port = url
            .port_or_known_default()
            .filter(|_| has_explicit_port(rest))
            .ok_or_else(|| AddressError::Malformed(input.to_string()))?;

        Ok(Self { kind, host, port })
    }

    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Convert the address to a reqwest::Proxy routing all traffic through it.
    pub fn to_reqwest_proxy(&self) -> Result<reqwest::Proxy, reqwest::Error> {
        reqwest::Proxy::all(self.to_string())
    }
}

fn has_explicit_port(authority: &str) -> bool {
    let authority = authority.trim_end_matches('/');
    // skip the colons of a bracketed IPv6 host
    let tail = authority.rsplit(']').next().unwrap_or(authority);
    tail.contains(':')
}

impl FromStr for ProxyAddress {
    type Err = AddressError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_with_default(s, ProxyKind::Http)
    }
}

impl fmt::Display for ProxyAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.kind.scheme(), self.host, self.port)
    }
}

/// Identifier of a record inside one pool. Addresses may repeat, ids do not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProxyId(pub(crate) u64);

/// A proxy together with the outcomes observed through it.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyRecord {
    pub id: ProxyId,
    pub address: ProxyAddress,
    /// Attempts made through this proxy.
    pub total_uses: u64,
    /// Attempts whose response matched the validity policy.
    pub successes: u64,
}

impl ProxyRecord {
    pub(crate) fn new(id: ProxyId, address: ProxyAddress) -> Self {
        Self {
            id,
            address,
            total_uses: 0,
            successes: 0,
        }
    }

    /// Fraction of attempts that failed, 0.0 for an unused proxy.
    pub fn failure_rate(&self) -> f64 {
        if self.total_uses == 0 {
            return 0.0;
        }
        1.0 - self.successes as f64 / self.total_uses as f64
    }

    pub(crate) fn record(&mut self, was_valid: bool) {
        self.total_uses += 1;
        if was_valid {
            self.successes += 1;
        }
    }
}
