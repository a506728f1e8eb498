use std::fmt;
use std::net::SocketAddr;

/// Validated `host:port` pair a connector opens sessions against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Target {
    host: String,
    port: u16,
}

impl Target {
    pub fn new<H: Into<String>>(host: H, port: u16) -> crate::Result<Self> {
        let host = host.into();
        if host.trim().is_empty() {
            return Err(crate::Error::ConfigError("host must not be empty".to_string()));
        }
        if port == 0 {
            return Err(crate::Error::ConfigError(format!(
                "invalid port 0 for host {}",
                host
            )));
        }
        Ok(Self { host, port })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

pub trait TryIntoTarget {
    /// `default_port` is used when the value carries no port of its own.
    fn try_into_target(&self, default_port: u16) -> crate::Result<Target>;
}

impl TryIntoTarget for Target {
    fn try_into_target(&self, _default_port: u16) -> crate::Result<Target> {
        Ok(self.clone())
    }
}

impl TryIntoTarget for SocketAddr {
    fn try_into_target(&self, _default_port: u16) -> crate::Result<Target> {
        Target::new(self.ip().to_string(), self.port())
    }
}

impl TryIntoTarget for &str {
    fn try_into_target(&self, default_port: u16) -> crate::Result<Target> {
        if let Ok(addr) = self.parse::<SocketAddr>() {
            return addr.try_into_target(default_port);
        }
        // bare IPv6 literal, no port
        if self.parse::<std::net::Ipv6Addr>().is_ok() {
            return Target::new(*self, default_port);
        }
        match self.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| {
                    crate::Error::ConfigError(format!("Error Parsing Port in '{}'", self))
                })?;
                Target::new(host, port)
            }
            None => Target::new(*self, default_port),
        }
    }
}

impl TryIntoTarget for String {
    fn try_into_target(&self, default_port: u16) -> crate::Result<Target> {
        self.as_str().try_into_target(default_port)
    }
}

impl<H: AsRef<str>> TryIntoTarget for (H, u16) {
    fn try_into_target(&self, _default_port: u16) -> crate::Result<Target> {
        Target::new(self.0.as_ref(), self.1)
    }
}
