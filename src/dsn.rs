//! Connection options for the MySQL driver.
//!
//! [`build_opts`] turns a resolved [`ProviderConfig`] into `mysql_async`
//! options. [`MaskedDsn`] renders the same settings as a classic
//! `user:pass@tcp(host:port)/?params` string with the password hidden, which
//! is what ends up in logs.

use std::fmt;
use std::net::SocketAddr;

use mysql_async::{Opts, OptsBuilder, PoolConstraints, PoolOpts, SslOpts};

use crate::config::{AuthPlugin, ProviderConfig, TlsMode};
use crate::error::ProviderError;

/// Port used when the endpoint does not name one.
pub const DEFAULT_PORT: u16 = 3306;

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Network {
    /// TCP host and port.
    Tcp {
        /// Hostname or IP address, without IPv6 brackets.
        host: String,
        /// TCP port.
        port: u16,
    },
    /// Unix domain socket path.
    Unix(String),
}

impl Network {
    /// Parse an endpoint.
    ///
    /// Accepts `host`, `host:port`, `[v6]`, `[v6]:port`, a bare IPv6
    /// address, or an absolute socket path.
    pub fn parse(endpoint: &str) -> Result<Self, ProviderError> {
        let endpoint = endpoint.trim();
        if endpoint.is_empty() {
            return Err(ProviderError::Configuration(
                "Mysql endpoint url must not be an empty string".to_string(),
            ));
        }
        if endpoint.starts_with('/') {
            return Ok(Self::Unix(endpoint.to_string()));
        }

        let (host, port) = if let Some(rest) = endpoint.strip_prefix('[') {
            let (host, tail) = rest.split_once(']').ok_or_else(|| {
                ProviderError::Configuration(format!("Unterminated IPv6 address in {}", endpoint))
            })?;
            match tail {
                "" => (host, None),
                tail => match tail.strip_prefix(':') {
                    Some(port) => (host, Some(port)),
                    None => {
                        return Err(ProviderError::Configuration(format!(
                            "Unexpected text after IPv6 address in {}",
                            endpoint
                        )))
                    },
                },
            }
        } else {
            match endpoint.matches(':').count() {
                0 => (endpoint, None),
                1 => match endpoint.split_once(':') {
                    Some((host, port)) => (host, Some(port)),
                    None => (endpoint, None),
                },
                // More than one colon without brackets: a bare IPv6 address.
                _ => (endpoint, None),
            }
        };

        if host.is_empty() {
            return Err(ProviderError::Configuration(format!(
                "Missing host in endpoint {}",
                endpoint
            )));
        }

        let port = match port {
            None => DEFAULT_PORT,
            Some(port) => port.parse().map_err(|_| {
                ProviderError::Configuration(format!("Invalid port {:?} in endpoint", port))
            })?,
        };

        Ok(Self::Tcp {
            host: host.to_string(),
            port,
        })
    }

    /// The `host:port` (or socket path) form, brackets restored for IPv6.
    pub fn address(&self) -> String {
        match self {
            Self::Tcp { host, port } if host.contains(':') => format!("[{}]:{}", host, port),
            Self::Tcp { host, port } => format!("{}:{}", host, port),
            Self::Unix(path) => path.clone(),
        }
    }

    fn protocol(&self) -> &'static str {
        match self {
            Self::Tcp { .. } => "tcp",
            Self::Unix(_) => "unix",
        }
    }
}

/// `SET` statements run on every new connection, one per `conn_params` entry.
pub fn setup_statements(config: &ProviderConfig) -> Vec<String> {
    config
        .conn_params
        .iter()
        .map(|(name, value)| format!("SET {} = {}", name, value))
        .collect()
}

fn ssl_opts(tls: TlsMode, relayed: bool) -> Option<SslOpts> {
    match tls {
        TlsMode::Disabled => None,
        // Through the relay the driver only knows 127.0.0.1, so the server
        // name can never match; the chain is still verified.
        TlsMode::Verify => {
            Some(SslOpts::default().with_danger_skip_domain_validation(relayed))
        },
        TlsMode::SkipVerify => Some(
            SslOpts::default()
                .with_danger_accept_invalid_certs(true)
                .with_danger_skip_domain_validation(true),
        ),
    }
}

fn pool_opts(config: &ProviderConfig) -> Result<PoolOpts, ProviderError> {
    let mut opts = PoolOpts::default();
    if config.max_open_conns > 0 {
        let constraints = PoolConstraints::new(0, config.max_open_conns).ok_or_else(|| {
            ProviderError::Configuration(format!(
                "Invalid max_open_conns {}",
                config.max_open_conns
            ))
        })?;
        opts = opts.with_constraints(constraints);
    }
    if !config.max_conn_lifetime.is_zero() {
        opts = opts.with_abs_conn_ttl(Some(config.max_conn_lifetime));
    }
    Ok(opts)
}

/// Build driver options.
///
/// When `relay` is set the driver is pointed at the local proxy relay
/// instead of the real server.
pub fn build_opts(
    config: &ProviderConfig,
    relay: Option<SocketAddr>,
) -> Result<Opts, ProviderError> {
    let network = Network::parse(&config.endpoint)?;

    let builder = OptsBuilder::default()
        .user(Some(config.username.clone()))
        .pass(Some(config.password.clone()))
        .prefer_socket(false)
        .enable_cleartext_plugin(config.authentication_plugin == AuthPlugin::Cleartext)
        .setup(setup_statements(config))
        .pool_opts(pool_opts(config)?);

    let builder = match (&network, relay) {
        (Network::Unix(path), _) => builder.socket(Some(path.clone())),
        (Network::Tcp { .. }, Some(relay)) => builder
            .ip_or_hostname(relay.ip().to_string())
            .tcp_port(relay.port())
            .ssl_opts(ssl_opts(config.tls, true)),
        (Network::Tcp { host, port }, None) => builder
            .ip_or_hostname(host.clone())
            .tcp_port(*port)
            .ssl_opts(ssl_opts(config.tls, false)),
    };

    Ok(Opts::from(builder))
}

/// A DSN for logging, password replaced with `***`.
pub struct MaskedDsn<'a>(pub &'a ProviderConfig);

impl fmt::Display for MaskedDsn<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let config = self.0;
        let (protocol, address) = match Network::parse(&config.endpoint) {
            Ok(network) => (network.protocol(), network.address()),
            Err(_) => ("tcp", config.endpoint.clone()),
        };
        write!(
            f,
            "{}:***@{}({})/?tls={}&allowCleartextPasswords={}",
            config.username,
            protocol,
            address,
            config.tls.as_str(),
            config.authentication_plugin == AuthPlugin::Cleartext,
        )?;
        for (name, value) in &config.conn_params {
            write!(f, "&{}={}", name, value)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    fn config(overrides: serde_json::Value) -> ProviderConfig {
        let mut base = json!({"endpoint": "db.internal:3307", "username": "app", "password": "hunter2"});
        if let (Some(base), Some(overrides)) = (base.as_object_mut(), overrides.as_object()) {
            for (k, v) in overrides {
                base.insert(k.clone(), v.clone());
            }
        }
        ProviderConfig::resolve(&base, |_| None).unwrap()
    }

    #[test]
    fn test_parse_network() {
        assert_eq!(
            Network::parse("db:3307").unwrap(),
            Network::Tcp {
                host: "db".to_string(),
                port: 3307
            }
        );
        assert_eq!(
            Network::parse("db").unwrap(),
            Network::Tcp {
                host: "db".to_string(),
                port: DEFAULT_PORT
            }
        );
        assert_eq!(
            Network::parse("[::1]:3310").unwrap(),
            Network::Tcp {
                host: "::1".to_string(),
                port: 3310
            }
        );
        assert_eq!(
            Network::parse("fe80::1").unwrap(),
            Network::Tcp {
                host: "fe80::1".to_string(),
                port: DEFAULT_PORT
            }
        );
        assert_eq!(
            Network::parse("/tmp/mysql.sock").unwrap(),
            Network::Unix("/tmp/mysql.sock".to_string())
        );
    }

    #[test]
    fn test_parse_network_errors() {
        assert!(Network::parse("").is_err());
        assert!(Network::parse("db:port").is_err());
        assert!(Network::parse("db:70000").is_err());
        assert!(Network::parse("[::1").is_err());
        assert!(Network::parse("[::1]x").is_err());
        assert!(Network::parse(":3306").is_err());
    }

    #[test]
    fn test_network_address() {
        assert_eq!(Network::parse("db").unwrap().address(), "db:3306");
        assert_eq!(Network::parse("[::1]").unwrap().address(), "[::1]:3306");
    }

    #[test]
    fn test_build_opts_tcp() {
        let opts = build_opts(&config(json!({})), None).unwrap();
        assert_eq!(opts.ip_or_hostname(), "db.internal");
        assert_eq!(opts.tcp_port(), 3307);
        assert_eq!(opts.user(), Some("app"));
        assert_eq!(opts.pass(), Some("hunter2"));
        assert!(opts.ssl_opts().is_none());
        assert!(!opts.prefer_socket());
        assert!(opts.socket().is_none());
    }

    #[test]
    fn test_build_opts_unix_socket() {
        let opts = build_opts(&config(json!({"endpoint": "/run/mysqld.sock"})), None).unwrap();
        assert_eq!(opts.socket(), Some("/run/mysqld.sock"));
    }

    #[test]
    fn test_build_opts_relay() {
        let relay: SocketAddr = "127.0.0.1:40001".parse().unwrap();
        let opts = build_opts(&config(json!({"tls": "true"})), Some(relay)).unwrap();
        assert_eq!(opts.ip_or_hostname(), "127.0.0.1");
        assert_eq!(opts.tcp_port(), 40001);
        let ssl = opts.ssl_opts().unwrap();
        assert!(ssl.skip_domain_validation());
        assert!(!ssl.accept_invalid_certs());
    }

    #[test]
    fn test_build_opts_tls_modes() {
        let opts = build_opts(&config(json!({"tls": "true"})), None).unwrap();
        let ssl = opts.ssl_opts().unwrap();
        assert!(!ssl.skip_domain_validation());
        assert!(!ssl.accept_invalid_certs());

        let opts = build_opts(&config(json!({"tls": "skip-verify"})), None).unwrap();
        let ssl = opts.ssl_opts().unwrap();
        assert!(ssl.skip_domain_validation());
        assert!(ssl.accept_invalid_certs());
    }

    #[test]
    fn test_build_opts_pool_and_setup() {
        let opts = build_opts(
            &config(json!({
                "max_open_conns": 4,
                "max_conn_lifetime_sec": 30,
                "conn_params": {"sql_mode": "'TRADITIONAL'", "wait_timeout": "60"}
            })),
            None,
        )
        .unwrap();
        assert_eq!(opts.pool_opts().constraints().max(), 4);
        assert_eq!(opts.pool_opts().abs_conn_ttl(), Some(Duration::from_secs(30)));
        assert_eq!(
            opts.setup(),
            &[
                "SET sql_mode = 'TRADITIONAL'".to_string(),
                "SET wait_timeout = 60".to_string()
            ]
        );
    }

    #[test]
    fn test_masked_dsn() {
        let config = config(json!({
            "authentication_plugin": "cleartext",
            "conn_params": {"sql_mode": "'ANSI'"}
        }));
        let dsn = MaskedDsn(&config).to_string();
        assert_eq!(
            dsn,
            "app:***@tcp(db.internal:3307)/?tls=false&allowCleartextPasswords=true&sql_mode='ANSI'"
        );
        assert!(!dsn.contains("hunter2"));
    }
}
