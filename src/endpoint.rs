use crate::container::{ContainerHandle, ContainerState};
use crate::Error;
use std::fmt;
use std::str::FromStr;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Scheme {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Ok(Scheme::Http),
            "https" => Ok(Scheme::Https),
            other => Err(Error::Configuration(format!(
                "Unsupported scheme `{}`, expected `http` or `https`",
                other
            ))),
        }
    }
}

/// Where test code can reach the mock server from outside the container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    scheme: Scheme,
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(scheme: Scheme, host: impl Into<String>, port: u16) -> Self {
        Self {
            scheme,
            host: host.into(),
            port,
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// The base uri, e.g. `http://localhost:49153`.
    pub fn uri(&self) -> String {
        self.to_string()
    }

    /// The uri of `path` on this endpoint. `hello` and `/hello` are equivalent.
    pub fn url(&self, path: &str) -> String {
        format!("{}/{}", self, path.trim_start_matches('/'))
    }

    /// Same as [`Endpoint::uri`], parsed.
    pub fn to_url(&self) -> Result<Url, Error> {
        Url::parse(&self.uri())
            .map_err(|e| Error::Configuration(format!("Invalid endpoint `{}`: {}", self, e)))
    }

    /// `host:port`, as used for the `Host` header.
    pub(crate) fn authority(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.scheme, self.authority())
    }
}

/// Derives [`Endpoint`]s from the port bindings of a running [`ContainerHandle`].
///
/// Nothing is cached: every call reads the bindings the handle currently holds, which are only
/// final once it is running.
pub struct EndpointResolver<'a> {
    handle: &'a ContainerHandle,
}

impl<'a> EndpointResolver<'a> {
    pub fn new(handle: &'a ContainerHandle) -> Self {
        Self { handle }
    }

    /// The endpoint `container_port` is published on.
    ///
    /// It fails with [`Error::NotReady`] unless the container is running, and with
    /// [`Error::PortNotExposed`] if the port has no host binding.
    pub fn base_url(&self, container_port: u16, scheme: Scheme) -> Result<Endpoint, Error> {
        let state = self.handle.state();
        if state != ContainerState::Running {
            return Err(Error::NotReady { state });
        }
        let host = self.handle.host().ok_or(Error::NotReady { state })?;
        let port = self
            .handle
            .port_bindings()
            .get(&container_port)
            .copied()
            .ok_or(Error::PortNotExposed(container_port))?;
        Ok(Endpoint::new(scheme, host, port))
    }
}
