//! Directory-service authentication.
//!
//! Two-phase bind: a service account binds to search for exactly one
//! entry matching the user filter, then the connection re-binds with the
//! found entry's DN and the supplied password. Group membership comes
//! from `memberOf` or, when that is empty, a fallback group search. Every
//! network phase carries a bounded timeout.

use crate::config::LdapConfig;
use crate::store::Role;
use async_trait::async_trait;
use ldap3::{ldap_escape, Ldap, LdapConnAsync, LdapConnSettings, Scope, SearchEntry};
use std::collections::HashMap;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_GROUP_FILTER: &str = "(|(member=%s)(uniqueMember=%s))";

const MEMBER_OF_ATTR: &str = "memberOf";

/// The transient result of one successful directory authentication.
#[derive(Debug, Clone)]
pub struct DirectoryUser {
    pub username: String,
    pub email: String,
    pub groups: Vec<String>,
}

/// Errors from the directory client. The policy layer collapses all of
/// these to an opaque authentication failure before anything reaches the
/// browser.
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error("directory connect failed: {0}")]
    Connect(#[source] ldap3::LdapError),

    #[error("service bind failed: {0}")]
    ServiceBind(#[source] ldap3::LdapError),

    #[error("user search failed: {0}")]
    Search(#[source] ldap3::LdapError),

    #[error("user not found or ambiguous: {0} results")]
    AmbiguousIdentity(usize),

    #[error("invalid credentials")]
    InvalidCredentials,
}

/// Seam between the login policy and the directory protocol, so the
/// policy can be exercised against a mock.
#[async_trait]
pub trait DirectoryAuthenticator: Send + Sync {
    /// Verify a username/password pair and resolve the user's groups.
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<DirectoryUser, DirectoryError>;

    /// Map resolved groups to an application role.
    fn resolve_role(&self, groups: &[String]) -> Option<Role>;
}

/// Priority-ordered group-to-role mapping: the admin mapping is tested
/// first, then editor; comparisons are case-insensitive. An
/// authenticated-but-unmapped user gets no role.
pub fn resolve_role(mapping: &HashMap<String, String>, groups: &[String]) -> Option<Role> {
    for role in [Role::Admin, Role::Editor] {
        if let Some(mapped) = mapping.get(role.as_str()) {
            if groups.iter().any(|g| g.eq_ignore_ascii_case(mapped)) {
                return Some(role);
            }
        }
    }
    None
}

/// LDAP client over the configured directory endpoint.
pub struct LdapClient {
    config: LdapConfig,
}

impl LdapClient {
    pub fn new(config: LdapConfig) -> Self {
        Self { config }
    }

    fn op_timeout(&self) -> Duration {
        Duration::from_secs(self.config.timeout_secs)
    }

    /// Interpolate the escaped username into the user filter template.
    fn user_filter(&self, username: &str) -> String {
        self.config.user_filter.replace("%s", &ldap_escape(username))
    }

    /// Build the fallback group filter: `%s` takes the user's DN, `%u` the
    /// user's login attribute value, both escaped against filter injection.
    fn group_filter(&self, user_dn: &str, login: &str) -> String {
        let template = if self.config.group_filter.is_empty() {
            DEFAULT_GROUP_FILTER
        } else {
            self.config.group_filter.as_str()
        };
        template
            .replace("%s", &ldap_escape(user_dn))
            .replace("%u", &ldap_escape(login))
    }

    /// Connect to the directory. `ldaps://` negotiates TLS at connect
    /// time; otherwise an explicit StartTLS upgrade is performed when
    /// configured, and its failure aborts the attempt.
    async fn connect(&self) -> Result<Ldap, DirectoryError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.op_timeout())
            .set_starttls(self.config.starttls)
            .set_no_tls_verify(self.config.skip_verify);
        let (conn, ldap) = LdapConnAsync::with_settings(settings, &self.config.url)
            .await
            .map_err(DirectoryError::Connect)?;
        ldap3::drive!(conn);
        Ok(ldap)
    }
}

#[async_trait]
impl DirectoryAuthenticator for LdapClient {
    async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<DirectoryUser, DirectoryError> {
        let mut ldap = self.connect().await?;

        // Phase one: service account bind and user search.
        ldap.with_timeout(self.op_timeout())
            .simple_bind(&self.config.bind_dn, &self.config.bind_password)
            .await
            .map_err(DirectoryError::ServiceBind)?
            .success()
            .map_err(DirectoryError::ServiceBind)?;

        let filter = self.user_filter(username);
        let attrs = vec![
            "dn".to_string(),
            self.config.username_attr.clone(),
            self.config.email_attr.clone(),
            MEMBER_OF_ATTR.to_string(),
        ];
        let (mut entries, _) = ldap
            .with_timeout(self.op_timeout())
            .search(&self.config.base_dn, Scope::Subtree, &filter, attrs)
            .await
            .map_err(DirectoryError::Search)?
            .success()
            .map_err(DirectoryError::Search)?;

        if entries.len() != 1 {
            let _ = ldap.unbind().await;
            return Err(DirectoryError::AmbiguousIdentity(entries.len()));
        }
        let entry = SearchEntry::construct(entries.remove(0));
        let user_dn = entry.dn.clone();

        // Phase two: re-bind with the entry DN and the supplied password.
        // This, not the service bind, is the credential check.
        let user_bind = ldap
            .with_timeout(self.op_timeout())
            .simple_bind(&user_dn, password)
            .await;
        let bound = match user_bind {
            Ok(result) => result.success().is_ok(),
            Err(_) => false,
        };
        if !bound {
            debug!("User bind failed for {}", user_dn);
            let _ = ldap.unbind().await;
            return Err(DirectoryError::InvalidCredentials);
        }

        let login = entry
            .attrs
            .get(&self.config.username_attr)
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_else(|| username.to_string());
        let email = entry
            .attrs
            .get(&self.config.email_attr)
            .and_then(|values| values.first())
            .cloned()
            .unwrap_or_default();

        let mut groups = entry.attrs.get(MEMBER_OF_ATTR).cloned().unwrap_or_default();
        if groups.is_empty() {
            // Fallback group search. A failure here does not invalidate an
            // already-proven password.
            let filter = self.group_filter(&user_dn, &login);
            let result = ldap
                .with_timeout(self.op_timeout())
                .search(&self.config.base_dn, Scope::Subtree, &filter, vec!["dn"])
                .await
                .and_then(|r| r.success());
            match result {
                Ok((group_entries, _)) => {
                    groups.extend(
                        group_entries
                            .into_iter()
                            .map(|e| SearchEntry::construct(e).dn),
                    );
                }
                Err(e) => warn!("Group search failed, treating as no groups: {}", e),
            }
        }

        let _ = ldap.unbind().await;
        Ok(DirectoryUser {
            username: login,
            email,
            groups,
        })
    }

    fn resolve_role(&self, groups: &[String]) -> Option<Role> {
        resolve_role(&self.config.group_mapping, groups)
    }
}
