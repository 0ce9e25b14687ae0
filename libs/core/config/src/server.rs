//! HTTP listener address.
//!
//! Every service listens on `HOST:PORT`. Each one passes its own default
//! port so the five services can run side by side on one machine with no
//! environment set; `PORT` overrides it in containers.

use crate::{env_parse_or_default, ConfigError};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};

/// Where a service's HTTP listener binds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

impl ServerConfig {
    /// Read `HOST` and `PORT`.
    ///
    /// `HOST` must be an IP address and defaults to all interfaces.
    /// `PORT` defaults to `default_port`.
    pub fn load(default_port: u16) -> Result<Self, ConfigError> {
        let host = env_parse_or_default("HOST", IpAddr::V4(Ipv4Addr::UNSPECIFIED))?;
        let port = env_parse_or_default("PORT", default_port)?;

        Ok(Self {
            addr: SocketAddr::new(host, port),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_env_binds_all_interfaces_on_service_port() {
        temp_env::with_vars_unset(["HOST", "PORT"], || {
            let auth = ServerConfig::load(3001).unwrap();
            let agenda = ServerConfig::load(3003).unwrap();

            assert_eq!(auth.addr.to_string(), "0.0.0.0:3001");
            assert_eq!(agenda.addr.port(), 3003);
        });
    }

    #[test]
    fn test_port_env_wins_over_service_default() {
        temp_env::with_vars([("HOST", None), ("PORT", Some("8080"))], || {
            let config = ServerConfig::load(3001).unwrap();
            assert_eq!(config.addr.port(), 8080);
        });
    }

    #[test]
    fn test_ipv6_host() {
        temp_env::with_vars([("HOST", Some("::1")), ("PORT", Some("3004"))], || {
            let config = ServerConfig::load(3000).unwrap();
            assert_eq!(config.addr.to_string(), "[::1]:3004");
        });
    }

    #[test]
    fn test_hostname_is_rejected() {
        temp_env::with_vars([("HOST", Some("localhost")), ("PORT", None)], || {
            let err = ServerConfig::load(3000).unwrap_err();
            assert!(err.to_string().contains("'HOST'"));
        });
    }

    #[test]
    fn test_bad_port_is_an_error_not_the_default() {
        for port in ["http", "70000", "-1"] {
            temp_env::with_vars([("HOST", None), ("PORT", Some(port))], || {
                let err = ServerConfig::load(3000).unwrap_err();
                assert!(matches!(err, ConfigError::ParseError { ref key, .. } if key == "PORT"));
            });
        }
    }
}
