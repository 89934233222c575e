//! Provider configuration: schema, environment fallbacks and resolution.
//!
//! The engine hands `configure` a JSON object. Attributes that are absent or
//! `null` fall back to environment variables first and to defaults second,
//! then the result is validated and turned into a [`ProviderConfig`].

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};

use crate::error::ProviderError;
use crate::schema::{Attribute, Diagnostic, Schema};
use crate::validation;

/// `authentication_plugin` value enabling the cleartext client plugin.
pub const CLEARTEXT_PASSWORDS: &str = "cleartext";
/// `authentication_plugin` value for `mysql_native_password`.
pub const NATIVE_PASSWORDS: &str = "native";

/// Default for `connect_retry_timeout_sec`.
pub const DEFAULT_CONNECT_RETRY_TIMEOUT_SEC: u64 = 300;

const PROXY_PATTERN: &str = r"^socks5h?://.*:\d+$";
const CONN_PARAM_NAME_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

/// Environment variables consulted for attributes left unset, in order.
/// The `proxy` fallback lives in [`crate::proxy`] next to `NO_PROXY`.
const ENV_FALLBACKS: &[(&str, &[&str])] = &[
    ("endpoint", &["MYSQL_ENDPOINT"]),
    ("username", &["MYSQL_USERNAME"]),
    ("password", &["MYSQL_PASSWORD"]),
    ("tls", &["MYSQL_TLS_CONFIG"]),
];

pub(crate) fn proxy_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(PROXY_PATTERN).expect("proxy pattern is valid"))
}

fn conn_param_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(CONN_PARAM_NAME_PATTERN).expect("param pattern is valid"))
}

/// TLS mode for the server connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TlsMode {
    /// Plain TCP (`"false"`).
    #[default]
    Disabled,
    /// TLS with certificate and hostname verification (`"true"`).
    Verify,
    /// TLS without verification (`"skip-verify"`).
    SkipVerify,
}

impl TlsMode {
    /// Accepted configuration spellings.
    pub const VALUES: [&'static str; 3] = ["true", "false", "skip-verify"];

    /// The configuration spelling of this mode.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "false",
            Self::Verify => "true",
            Self::SkipVerify => "skip-verify",
        }
    }
}

impl FromStr for TlsMode {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "false" => Ok(Self::Disabled),
            "true" => Ok(Self::Verify),
            "skip-verify" => Ok(Self::SkipVerify),
            other => Err(ProviderError::Configuration(format!(
                "tls must be one of {:?}, got {}",
                Self::VALUES,
                other
            ))),
        }
    }
}

/// Client authentication plugin allowed for the login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthPlugin {
    /// `mysql_native_password`.
    #[default]
    Native,
    /// `mysql_clear_password`, needed for PAM/LDAP backed accounts.
    Cleartext,
}

impl FromStr for AuthPlugin {
    type Err = ProviderError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case(NATIVE_PASSWORDS) {
            Ok(Self::Native)
        } else if s.eq_ignore_ascii_case(CLEARTEXT_PASSWORDS) {
            Ok(Self::Cleartext)
        } else {
            Err(ProviderError::Configuration(format!(
                "authentication_plugin must be {} or {}, got {}",
                CLEARTEXT_PASSWORDS, NATIVE_PASSWORDS, s
            )))
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawProviderConfig {
    endpoint: Option<String>,
    username: Option<String>,
    password: Option<String>,
    proxy: Option<String>,
    tls: Option<String>,
    max_conn_lifetime_sec: Option<i64>,
    max_open_conns: Option<i64>,
    conn_params: Option<BTreeMap<String, String>>,
    authentication_plugin: Option<String>,
    connect_retry_timeout_sec: Option<i64>,
}

/// Fully resolved provider configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct ProviderConfig {
    /// `host:port`, `host`, `[v6]:port` or an absolute unix socket path.
    pub endpoint: String,
    /// Login user.
    pub username: String,
    /// Login password.
    pub password: String,
    /// SOCKS5 proxy URL set in configuration, if any.
    pub proxy: Option<String>,
    /// TLS mode.
    pub tls: TlsMode,
    /// Maximum lifetime of a pooled connection; zero means unlimited.
    pub max_conn_lifetime: Duration,
    /// Maximum open connections; zero means the driver default.
    pub max_open_conns: usize,
    /// Session variables set on every new connection.
    pub conn_params: BTreeMap<String, String>,
    /// Authentication plugin.
    pub authentication_plugin: AuthPlugin,
    /// How long to keep retrying the initial connection.
    pub connect_retry_timeout: Duration,
}

impl fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &"***")
            .field("proxy", &self.proxy)
            .field("tls", &self.tls)
            .field("max_conn_lifetime", &self.max_conn_lifetime)
            .field("max_open_conns", &self.max_open_conns)
            .field("conn_params", &self.conn_params)
            .field("authentication_plugin", &self.authentication_plugin)
            .field("connect_retry_timeout", &self.connect_retry_timeout)
            .finish()
    }
}

impl ProviderConfig {
    /// Resolve a configuration from the engine's JSON plus the process
    /// environment.
    pub fn from_json(config: &Value) -> Result<Self, ProviderError> {
        Self::resolve(config, process_env)
    }

    /// Resolve a configuration with an explicit environment lookup.
    pub fn resolve(
        config: &Value,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ProviderError> {
        let config = with_env_defaults(config, env);
        let raw: RawProviderConfig = serde_json::from_value(config)?;

        let endpoint = required(raw.endpoint, "endpoint")?;
        if endpoint.trim().is_empty() {
            return Err(ProviderError::Configuration(
                "Mysql endpoint url must not be an empty string".to_string(),
            ));
        }

        let proxy = raw.proxy.filter(|p| !p.is_empty());
        if let Some(proxy) = &proxy {
            if !proxy_regex().is_match(proxy) {
                return Err(ProviderError::Configuration(
                    "The proxy URL is not a valid socks url.".to_string(),
                ));
            }
        }

        let conn_params = raw.conn_params.unwrap_or_default();
        if let Some(bad) = conn_params.keys().find(|k| !conn_param_regex().is_match(k)) {
            return Err(ProviderError::Configuration(format!(
                "conn_params key {:?} is not a valid variable name",
                bad
            )));
        }

        Ok(Self {
            endpoint,
            username: required(raw.username, "username")?,
            password: required(raw.password, "password")?,
            proxy,
            tls: raw.tls.as_deref().unwrap_or("false").parse()?,
            max_conn_lifetime: Duration::from_secs(non_negative(
                raw.max_conn_lifetime_sec,
                "max_conn_lifetime_sec",
            )?),
            max_open_conns: non_negative(raw.max_open_conns, "max_open_conns")? as usize,
            conn_params,
            authentication_plugin: raw
                .authentication_plugin
                .as_deref()
                .unwrap_or(NATIVE_PASSWORDS)
                .parse()?,
            connect_retry_timeout: Duration::from_secs(
                raw.connect_retry_timeout_sec
                    .map(|v| non_negative(Some(v), "connect_retry_timeout_sec"))
                    .transpose()?
                    .unwrap_or(DEFAULT_CONNECT_RETRY_TIMEOUT_SEC),
            ),
        })
    }
}

fn required(value: Option<String>, name: &str) -> Result<String, ProviderError> {
    value.ok_or_else(|| {
        ProviderError::Configuration(format!("Missing required attribute '{}'", name))
    })
}

fn non_negative(value: Option<i64>, name: &str) -> Result<u64, ProviderError> {
    let value = value.unwrap_or(0);
    u64::try_from(value).map_err(|_| {
        ProviderError::Configuration(format!("{} must not be negative, got {}", name, value))
    })
}

/// Read a non-empty environment variable from the process.
pub fn process_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

/// Fill unset attributes from the environment and apply the `tls` default.
pub fn with_env_defaults(config: &Value, env: impl Fn(&str) -> Option<String>) -> Value {
    let mut map = match config {
        Value::Object(map) => map.clone(),
        _ => serde_json::Map::new(),
    };

    for (attribute, vars) in ENV_FALLBACKS {
        let unset = map.get(*attribute).is_none_or(Value::is_null);
        if !unset {
            continue;
        }
        if let Some(value) = vars.iter().find_map(|var| env(var)) {
            map.insert((*attribute).to_string(), Value::String(value));
        }
    }

    if map.get("tls").is_none_or(Value::is_null) {
        map.insert("tls".to_string(), json!(TlsMode::Disabled.as_str()));
    }

    Value::Object(map)
}

/// Schema of the provider configuration block.
pub fn provider_config_schema() -> Schema {
    Schema::v0()
        .with_description("Connection settings for the MySQL server")
        .with_attribute(
            "endpoint",
            Attribute::required_string().with_description(
                "Server address as host:port, or an absolute unix socket path (env MYSQL_ENDPOINT)",
            ),
        )
        .with_attribute(
            "username",
            Attribute::required_string().with_description("Login user (env MYSQL_USERNAME)"),
        )
        .with_attribute(
            "password",
            Attribute::required_string()
                .sensitive()
                .with_description("Login password (env MYSQL_PASSWORD)"),
        )
        .with_attribute(
            "proxy",
            Attribute::optional_string()
                .with_description("SOCKS5 proxy URL (env ALL_PROXY, all_proxy)"),
        )
        .with_attribute(
            "tls",
            Attribute::optional_string()
                .with_default(json!("false"))
                .with_description("true, false or skip-verify (env MYSQL_TLS_CONFIG)"),
        )
        .with_attribute("max_conn_lifetime_sec", Attribute::optional_int64())
        .with_attribute("max_open_conns", Attribute::optional_int64())
        .with_attribute(
            "conn_params",
            Attribute::optional_string_map()
                .with_description("Session variables set on each new connection"),
        )
        .with_attribute(
            "authentication_plugin",
            Attribute::optional_string()
                .with_default(json!(NATIVE_PASSWORDS))
                .with_description("native or cleartext"),
        )
        .with_attribute(
            "connect_retry_timeout_sec",
            Attribute::optional_int64().with_default(json!(DEFAULT_CONNECT_RETRY_TIMEOUT_SEC)),
        )
}

/// Validate a provider configuration, environment fallbacks applied.
pub fn validate_config(config: &Value, env: impl Fn(&str) -> Option<String>) -> Vec<Diagnostic> {
    let config = with_env_defaults(config, env);
    let mut diagnostics = validation::validate(&provider_config_schema(), &config);

    diagnostics.extend(validation::string_not_empty(config.get("endpoint"), "endpoint"));
    diagnostics.extend(validation::string_matches(
        config.get("proxy").filter(|p| p.as_str() != Some("")),
        proxy_regex(),
        "The proxy URL is not a valid socks url.",
        "proxy",
    ));
    diagnostics.extend(validation::string_in_slice(
        config.get("tls"),
        &TlsMode::VALUES,
        false,
        "tls",
    ));
    diagnostics.extend(validation::string_in_slice(
        config.get("authentication_plugin"),
        &[CLEARTEXT_PASSWORDS, NATIVE_PASSWORDS],
        true,
        "authentication_plugin",
    ));
    for name in ["max_conn_lifetime_sec", "max_open_conns", "connect_retry_timeout_sec"] {
        diagnostics.extend(validation::int_at_least(config.get(name), 0, name));
    }
    if let Some(params) = config.get("conn_params").and_then(Value::as_object) {
        for key in params.keys().filter(|k| !conn_param_regex().is_match(k)) {
            diagnostics.push(
                Diagnostic::error(format!("Invalid connection parameter name {:?}", key))
                    .with_attribute(format!("conn_params.{}", key)),
            );
        }
    }

    diagnostics
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn minimal() -> Value {
        json!({"endpoint": "db.internal:3306", "username": "root", "password": "s3cret"})
    }

    #[test]
    fn test_defaults() {
        let config = ProviderConfig::resolve(&minimal(), no_env).unwrap();
        assert_eq!(config.endpoint, "db.internal:3306");
        assert_eq!(config.tls, TlsMode::Disabled);
        assert_eq!(config.authentication_plugin, AuthPlugin::Native);
        assert_eq!(config.connect_retry_timeout, Duration::from_secs(300));
        assert_eq!(config.max_conn_lifetime, Duration::ZERO);
        assert_eq!(config.max_open_conns, 0);
        assert!(config.proxy.is_none());
        assert!(config.conn_params.is_empty());
    }

    #[test]
    fn test_env_fallbacks() {
        let env = env_from(&[
            ("MYSQL_ENDPOINT", "/var/run/mysqld/mysqld.sock"),
            ("MYSQL_USERNAME", "admin"),
            ("MYSQL_PASSWORD", "pw"),
            ("MYSQL_TLS_CONFIG", "skip-verify"),
            ("ALL_PROXY", "socks5://proxy:1080"),
        ]);
        let config = ProviderConfig::resolve(&json!({}), env).unwrap();
        assert_eq!(config.endpoint, "/var/run/mysqld/mysqld.sock");
        assert_eq!(
            crate::dsn::Network::parse(&config.endpoint).unwrap(),
            crate::dsn::Network::Unix("/var/run/mysqld/mysqld.sock".to_string())
        );
        assert_eq!(config.username, "admin");
        assert_eq!(config.tls, TlsMode::SkipVerify);
        assert!(config.proxy.is_none());
    }

    #[test]
    fn test_explicit_values_win_over_env() {
        let env = env_from(&[("MYSQL_USERNAME", "from-env")]);
        let mut config = minimal();
        config["username"] = json!("explicit");
        config["proxy"] = json!("socks5h://bastion:1080");
        let resolved = ProviderConfig::resolve(&config, env).unwrap();
        assert_eq!(resolved.username, "explicit");
        assert_eq!(resolved.proxy.as_deref(), Some("socks5h://bastion:1080"));
    }

    #[test]
    fn test_null_attributes_take_env() {
        let env = env_from(&[("MYSQL_PASSWORD", "from-env")]);
        let mut config = minimal();
        config["password"] = Value::Null;
        let resolved = ProviderConfig::resolve(&config, env).unwrap();
        assert_eq!(resolved.password, "from-env");
    }

    #[test]
    fn test_full_config() {
        let config = json!({
            "endpoint": "db:3306",
            "username": "root",
            "password": "pw",
            "tls": "true",
            "max_conn_lifetime_sec": 60,
            "max_open_conns": 5,
            "conn_params": {"sql_mode": "'ANSI_QUOTES'"},
            "authentication_plugin": "CLEARTEXT",
            "connect_retry_timeout_sec": 10
        });
        let resolved = ProviderConfig::resolve(&config, no_env).unwrap();
        assert_eq!(resolved.tls, TlsMode::Verify);
        assert_eq!(resolved.max_conn_lifetime, Duration::from_secs(60));
        assert_eq!(resolved.max_open_conns, 5);
        assert_eq!(resolved.conn_params["sql_mode"], "'ANSI_QUOTES'");
        assert_eq!(resolved.authentication_plugin, AuthPlugin::Cleartext);
        assert_eq!(resolved.connect_retry_timeout, Duration::from_secs(10));
    }

    #[test]
    fn test_missing_required() {
        let err = ProviderConfig::resolve(&json!({"endpoint": "db"}), no_env).unwrap_err();
        assert!(err.to_string().contains("username"));
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = minimal();
        config["tls"] = json!("maybe");
        assert!(ProviderConfig::resolve(&config, no_env).is_err());

        let mut config = minimal();
        config["proxy"] = json!("http://proxy:8080");
        let err = ProviderConfig::resolve(&config, no_env).unwrap_err();
        assert!(err.to_string().contains("not a valid socks url"));

        let mut config = minimal();
        config["endpoint"] = json!("");
        assert!(ProviderConfig::resolve(&config, no_env).is_err());

        let mut config = minimal();
        config["max_open_conns"] = json!(-1);
        assert!(ProviderConfig::resolve(&config, no_env).is_err());

        let mut config = minimal();
        config["conn_params"] = json!({"x; DROP DATABASE y": "1"});
        assert!(ProviderConfig::resolve(&config, no_env).is_err());
    }

    #[test]
    fn test_debug_masks_password() {
        let config = ProviderConfig::resolve(&minimal(), no_env).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("***"));
    }

    #[test]
    fn test_validate_config_diagnostics() {
        assert!(validate_config(&minimal(), no_env).is_empty());

        let diagnostics = validate_config(&json!({"endpoint": "db"}), no_env);
        let attrs: Vec<_> = diagnostics
            .iter()
            .filter_map(|d| d.attribute.as_deref())
            .collect();
        assert!(attrs.contains(&"username"));
        assert!(attrs.contains(&"password"));

        let mut config = minimal();
        config["tls"] = json!("yes");
        config["authentication_plugin"] = json!("kerberos");
        config["proxy"] = json!("socks4://p:1");
        let diagnostics = validate_config(&config, no_env);
        assert_eq!(diagnostics.len(), 3);
    }

    #[test]
    fn test_validate_config_uses_env() {
        let env = env_from(&[("MYSQL_USERNAME", "u"), ("MYSQL_PASSWORD", "p")]);
        assert!(validate_config(&json!({"endpoint": "db"}), env).is_empty());
    }

    #[test]
    fn test_tls_mode_round_trip() {
        for value in TlsMode::VALUES {
            let mode: TlsMode = value.parse().unwrap();
            assert_eq!(mode.as_str(), value);
        }
    }
}
