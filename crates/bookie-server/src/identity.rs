//! Bookie identity resolution
//!
//! A bookie is known to clients by an address (`host:port`) and registered
//! under an id. The address comes from, in order:
//! 1. the configured advertised address, taken verbatim
//! 2. the first usable address of the configured listening interface
//! 3. the addresses the local hostname resolves to
//!
//! The id is the configured bookie id when set, otherwise the address.

use bookie_common::{BookieId, Error, HostPort, Result, ServerConfig};
use std::net::{IpAddr, ToSocketAddrs};
use tracing::{debug, warn};

/// Interface name meaning "use the host's default address"
pub const DEFAULT_INTERFACE: &str = "default";

/// Source of the host's network facts
pub trait NetworkEnvironment: Send + Sync {
    /// Addresses bound to interface `name`, `None` if no such interface
    fn interface_addresses(&self, name: &str) -> Option<Vec<IpAddr>>;

    /// Addresses the local hostname resolves to
    fn default_addresses(&self) -> Vec<IpAddr>;

    /// Fully qualified hostname of this host
    fn hostname(&self) -> Option<String>;
}

/// Reads interfaces with `getifaddrs` and resolves the system hostname
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemNetwork;

impl NetworkEnvironment for SystemNetwork {
    fn interface_addresses(&self, name: &str) -> Option<Vec<IpAddr>> {
        let interfaces = match nix::ifaddrs::getifaddrs() {
            Ok(interfaces) => interfaces,
            Err(e) => {
                warn!("Failed to list network interfaces: {}", e);
                return None;
            }
        };

        let mut found = false;
        let mut addrs = Vec::new();
        for ifaddr in interfaces.filter(|ifaddr| ifaddr.interface_name == name) {
            found = true;
            let Some(address) = ifaddr.address else {
                continue;
            };
            if let Some(v4) = address.as_sockaddr_in() {
                addrs.push(IpAddr::V4(v4.ip()));
            } else if let Some(v6) = address.as_sockaddr_in6() {
                addrs.push(IpAddr::V6(v6.ip()));
            }
        }
        found.then_some(addrs)
    }

    fn default_addresses(&self) -> Vec<IpAddr> {
        let Some(hostname) = self.hostname() else {
            return Vec::new();
        };
        match (hostname.as_str(), 0).to_socket_addrs() {
            Ok(addrs) => addrs.map(|addr| addr.ip()).collect(),
            Err(e) => {
                warn!("Failed to resolve hostname {}: {}", hostname, e);
                Vec::new()
            }
        }
    }

    fn hostname(&self) -> Option<String> {
        gethostname::gethostname().into_string().ok()
    }
}

/// Resolved identity of a bookie
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BookieIdentity {
    /// Network address; absent only when an explicit id is configured and
    /// no address could be resolved
    pub address: Option<HostPort>,
    pub id: BookieId,
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// Resolve the address the bookie advertises to clients
pub fn resolve_address(config: &ServerConfig, env: &dyn NetworkEnvironment) -> Result<HostPort> {
    let port = config.bookie_port;

    if let Some(advertised) = non_blank(config.advertised_address.as_deref()) {
        debug!("Using advertised address {}", advertised);
        return Ok(HostPort::new(advertised, port));
    }

    let interface = non_blank(config.listening_interface.as_deref())
        .filter(|name| *name != DEFAULT_INTERFACE);
    let candidates = match interface {
        Some(name) => env.interface_addresses(name).unwrap_or_else(|| {
            warn!(
                "Listening interface {} not found, falling back to the default address",
                name
            );
            env.default_addresses()
        }),
        None => env.default_addresses(),
    };

    let ip = pick_address(&candidates, config.allow_loopback)?;

    let host = if config.use_host_name_as_bookie_id {
        let hostname = env.hostname().ok_or_else(|| {
            Error::AddressResolution("hostname of this host is unavailable".to_string())
        })?;
        if config.use_short_host_name {
            hostname
                .split('.')
                .next()
                .unwrap_or(hostname.as_str())
                .to_string()
        } else {
            hostname
        }
    } else {
        ip.to_string()
    };

    Ok(HostPort::new(host, port))
}

/// First non-loopback address, IPv4 preferred; loopback only when allowed
fn pick_address(candidates: &[IpAddr], allow_loopback: bool) -> Result<IpAddr> {
    let routable = candidates
        .iter()
        .filter(|ip| !ip.is_loopback() && !ip.is_unspecified());
    if let Some(ip) = routable.clone().find(|ip| ip.is_ipv4()).or_else(|| routable.clone().next()) {
        return Ok(*ip);
    }

    match candidates.iter().find(|ip| ip.is_loopback()) {
        Some(ip) if allow_loopback => Ok(*ip),
        Some(ip) => Err(Error::AddressResolution(format!(
            "only loopback address {ip} is available; set allow_loopback to use it"
        ))),
        None => Err(Error::AddressResolution(
            "no usable network address found".to_string(),
        )),
    }
}

/// Resolve the id the bookie registers under
///
/// A configured id is returned verbatim, even when empty.
pub fn resolve_id(config: &ServerConfig, env: &dyn NetworkEnvironment) -> Result<BookieId> {
    if let Some(id) = &config.bookie_id {
        return Ok(BookieId::new(id.clone()));
    }
    resolve_address(config, env).map(|addr| BookieId::from(&addr))
}

/// Resolve both address and id
///
/// Fails only when no address can be resolved and no id is configured.
pub fn resolve(config: &ServerConfig, env: &dyn NetworkEnvironment) -> Result<BookieIdentity> {
    match (resolve_address(config, env), &config.bookie_id) {
        (Ok(address), Some(id)) => Ok(BookieIdentity {
            address: Some(address),
            id: BookieId::new(id.clone()),
        }),
        (Ok(address), None) => Ok(BookieIdentity {
            id: BookieId::from(&address),
            address: Some(address),
        }),
        (Err(e), Some(id)) => {
            warn!("Using configured bookie id {:?} without an address: {}", id, e);
            Ok(BookieIdentity {
                address: None,
                id: BookieId::new(id.clone()),
            })
        }
        (Err(e), None) => Err(e),
    }
}

#[cfg(test)]
pub(crate) mod test_network {
    use super::*;
    use std::collections::HashMap;

    /// Network environment with fixed answers
    #[derive(Default)]
    pub struct FakeNetwork {
        pub interfaces: HashMap<String, Vec<IpAddr>>,
        pub defaults: Vec<IpAddr>,
        pub hostname: Option<String>,
    }

    impl FakeNetwork {
        pub fn host(ip: &str, hostname: &str) -> Self {
            Self {
                interfaces: HashMap::from([
                    ("eth0".to_string(), vec![ip.parse().unwrap()]),
                    ("lo".to_string(), vec!["127.0.0.1".parse().unwrap()]),
                ]),
                defaults: vec![ip.parse().unwrap()],
                hostname: Some(hostname.to_string()),
            }
        }
    }

    impl NetworkEnvironment for FakeNetwork {
        fn interface_addresses(&self, name: &str) -> Option<Vec<IpAddr>> {
            self.interfaces.get(name).cloned()
        }

        fn default_addresses(&self) -> Vec<IpAddr> {
            self.defaults.clone()
        }

        fn hostname(&self) -> Option<String> {
            self.hostname.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_network::FakeNetwork;
    use super::*;

    fn base_config() -> ServerConfig {
        ServerConfig {
            bookie_port: 3181,
            ..ServerConfig::default()
        }
    }

    #[test]
    fn test_advertised_address_is_verbatim() {
        let env = FakeNetwork::default();
        for interface in [None, Some("eth0"), Some("no-such-iface"), Some("default")] {
            let config = ServerConfig {
                advertised_address: Some("127.0.0.1".to_string()),
                listening_interface: interface.map(str::to_string),
                ..base_config()
            };
            let identity = resolve(&config, &env).unwrap();
            assert_eq!(identity.address, Some(HostPort::new("127.0.0.1", 3181)));
            assert_eq!(identity.id.as_str(), "127.0.0.1:3181");
        }

        // Not validated as an IP address
        let config = ServerConfig {
            advertised_address: Some(" 256.256.256.256 ".to_string()),
            ..base_config()
        };
        assert_eq!(
            resolve_address(&config, &env).unwrap().to_string(),
            "256.256.256.256:3181"
        );
    }

    #[test]
    fn test_interface_address() {
        let mut env = FakeNetwork::host("10.0.0.5", "bookie1.example.com");
        env.interfaces
            .insert("eth1".to_string(), vec!["fe80::1".parse().unwrap(), "10.1.0.9".parse().unwrap()]);
        let config = ServerConfig {
            listening_interface: Some("eth1".to_string()),
            ..base_config()
        };
        assert_eq!(resolve_address(&config, &env).unwrap(), HostPort::new("10.1.0.9", 3181));
    }

    #[test]
    fn test_unknown_interface_falls_back_to_default() {
        let env = FakeNetwork::host("10.0.0.5", "bookie1.example.com");
        let config = ServerConfig {
            listening_interface: Some("no-such-iface".to_string()),
            ..base_config()
        };
        assert_eq!(resolve_address(&config, &env).unwrap(), HostPort::new("10.0.0.5", 3181));
    }

    #[test]
    fn test_loopback_requires_permission() {
        let env = FakeNetwork::host("10.0.0.5", "bookie1.example.com");
        let config = ServerConfig {
            listening_interface: Some("lo".to_string()),
            ..base_config()
        };
        assert!(matches!(
            resolve_address(&config, &env),
            Err(Error::AddressResolution(_))
        ));

        let config = ServerConfig {
            allow_loopback: true,
            ..config
        };
        assert_eq!(resolve_address(&config, &env).unwrap(), HostPort::new("127.0.0.1", 3181));
    }

    #[test]
    fn test_hostname_as_address() {
        let env = FakeNetwork::host("10.0.0.5", "bookie1.example.com");
        let config = ServerConfig {
            use_host_name_as_bookie_id: true,
            ..base_config()
        };
        assert_eq!(
            resolve_id(&config, &env).unwrap().as_str(),
            "bookie1.example.com:3181"
        );

        let config = ServerConfig {
            use_short_host_name: true,
            ..config
        };
        assert_eq!(resolve_id(&config, &env).unwrap().as_str(), "bookie1:3181");
    }

    #[test]
    fn test_explicit_id() {
        let env = FakeNetwork::host("10.0.0.5", "bookie1.example.com");
        let config = ServerConfig {
            bookie_id: Some("my-bookie".to_string()),
            ..base_config()
        };
        let identity = resolve(&config, &env).unwrap();
        assert_eq!(identity.id.as_str(), "my-bookie");
        assert_eq!(identity.address, Some(HostPort::new("10.0.0.5", 3181)));

        // Empty ids are accepted as given
        let config = ServerConfig {
            bookie_id: Some(String::new()),
            ..base_config()
        };
        assert_eq!(resolve_id(&config, &env).unwrap().as_str(), "");
    }

    #[test]
    fn test_resolution_fails_only_without_any_source() {
        let env = FakeNetwork::default();
        assert!(matches!(
            resolve(&base_config(), &env),
            Err(Error::AddressResolution(_))
        ));

        let config = ServerConfig {
            bookie_id: Some("standalone".to_string()),
            ..base_config()
        };
        let identity = resolve(&config, &env).unwrap();
        assert_eq!(identity.address, None);
        assert_eq!(identity.id.as_str(), "standalone");
    }

    #[test]
    fn test_system_network_unknown_interface() {
        assert_eq!(SystemNetwork.interface_addresses("no-such-iface-0"), None);
    }
}
