//! Server configuration.
//!
//! Loaded once at startup from a TOML file. Validation failures are fatal
//! here; request handling never sees a half-configured server.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

pub const DEFAULT_USER_FILTER: &str = "(sAMAccountName=%s)";
pub const DEFAULT_USERNAME_ATTR: &str = "sAMAccountName";
pub const DEFAULT_EMAIL_ATTR: &str = "mail";
pub const DEFAULT_LDAP_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// SQLite database file. Empty selects the in-memory store (demo
    /// deployments only; nothing survives a restart).
    pub path: String,
}

/// One entry of the hosted-zone allow-list.
#[derive(Debug, Clone, Deserialize)]
pub struct ZoneEntry {
    pub id: String,
    #[serde(default)]
    pub label: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// Provider backend. `memory` is the only built-in; vendor backends
    /// plug in behind the `DnsProvider` trait.
    pub backend: String,
    /// Zones the console may touch. Empty means every zone the provider
    /// account can see.
    pub zones: Vec<ZoneEntry>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            backend: "memory".to_string(),
            zones: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LdapConfig {
    pub enabled: bool,
    pub url: String,
    pub bind_dn: String,
    pub bind_password: String,
    pub base_dn: String,
    pub user_filter: String,
    pub username_attr: String,
    pub email_attr: String,
    pub starttls: bool,
    pub skip_verify: bool,
    /// Fallback group search filter; `%s` is replaced with the user's DN
    /// and `%u` with the login attribute value.
    pub group_filter: String,
    pub timeout_secs: u64,
    /// role name ("admin"/"editor") -> group DN
    pub group_mapping: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub provider: ProviderConfig,
    pub ldap: LdapConfig,
}

impl Config {
    /// Load and validate the configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let raw = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!(
                "failed to read configuration file {}",
                path.as_ref().display()
            )
        })?;
        let mut config: Config =
            toml::from_str(&raw).context("failed to parse the configuration file")?;
        config.validate()?;
        Ok(config)
    }

    /// Apply defaults and reject incomplete configuration.
    pub fn validate(&mut self) -> Result<()> {
        if self.provider.backend != "memory" {
            bail!("unknown provider backend: {}", self.provider.backend);
        }

        if self.ldap.enabled {
            if self.ldap.url.is_empty() {
                bail!("ldap.url is required when LDAP is enabled");
            }
            if self.ldap.bind_dn.is_empty() || self.ldap.bind_password.is_empty() {
                bail!("ldap.bind_dn and ldap.bind_password are required");
            }
            if self.ldap.base_dn.is_empty() {
                bail!("ldap.base_dn is required");
            }
            if self.ldap.group_mapping.is_empty() {
                bail!("ldap.group_mapping must define at least one role");
            }
            if self.ldap.user_filter.is_empty() {
                self.ldap.user_filter = DEFAULT_USER_FILTER.to_string();
            }
            if self.ldap.username_attr.is_empty() {
                self.ldap.username_attr = DEFAULT_USERNAME_ATTR.to_string();
            }
            if self.ldap.email_attr.is_empty() {
                self.ldap.email_attr = DEFAULT_EMAIL_ATTR.to_string();
            }
            if self.ldap.timeout_secs == 0 {
                self.ldap.timeout_secs = DEFAULT_LDAP_TIMEOUT_SECS;
            }
            if self.ldap.url.starts_with("ldap://") && !self.ldap.starttls {
                warn!(
                    "LDAP is configured with ldap:// and StartTLS disabled; \
                     credentials will cross the network in cleartext"
                );
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml: &str) -> Result<Config> {
        let mut config: Config = toml::from_str(toml).unwrap();
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn empty_config_gets_defaults() {
        let config = parse("").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.provider.backend, "memory");
        assert!(!config.ldap.enabled);
        assert!(config.database.path.is_empty());
    }

    #[test]
    fn ldap_defaults_applied_when_enabled() {
        let config = parse(
            r#"
            [ldap]
            enabled = true
            url = "ldaps://directory.example.com"
            bind_dn = "cn=svc,dc=example,dc=com"
            bind_password = "secret"
            base_dn = "dc=example,dc=com"

            [ldap.group_mapping]
            admin = "cn=dns-admins,dc=example,dc=com"
            "#,
        )
        .unwrap();
        assert_eq!(config.ldap.user_filter, DEFAULT_USER_FILTER);
        assert_eq!(config.ldap.username_attr, DEFAULT_USERNAME_ATTR);
        assert_eq!(config.ldap.email_attr, DEFAULT_EMAIL_ATTR);
        assert_eq!(config.ldap.timeout_secs, DEFAULT_LDAP_TIMEOUT_SECS);
    }

    #[test]
    fn ldap_requires_url() {
        let err = parse("[ldap]\nenabled = true\n").unwrap_err();
        assert!(err.to_string().contains("ldap.url"));
    }

    #[test]
    fn ldap_requires_service_account() {
        let err = parse(
            r#"
            [ldap]
            enabled = true
            url = "ldaps://directory.example.com"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("bind_dn"));
    }

    #[test]
    fn ldap_requires_group_mapping() {
        let err = parse(
            r#"
            [ldap]
            enabled = true
            url = "ldaps://directory.example.com"
            bind_dn = "cn=svc,dc=example,dc=com"
            bind_password = "secret"
            base_dn = "dc=example,dc=com"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("group_mapping"));
    }

    #[test]
    fn unknown_provider_backend_is_rejected() {
        let err = parse("[provider]\nbackend = \"route53\"\n").unwrap_err();
        assert!(err.to_string().contains("provider backend"));
    }

    #[test]
    fn zone_allow_list_parses() {
        let config = parse(
            r#"
            [provider]
            zones = [
                { id = "Z123", label = "production" },
                { id = "Z456" },
            ]
            "#,
        )
        .unwrap();
        assert_eq!(config.provider.zones.len(), 2);
        assert_eq!(config.provider.zones[0].label, "production");
        assert_eq!(config.provider.zones[1].label, "");
    }
}
