//! Login decision procedure.
//!
//! Directory authentication runs first when a directory is configured;
//! local password authentication is the fallback. Once a directory is in
//! play, local accounts below admin are locked out, which forces every
//! non-admin operator through the directory. Failure detail never reaches
//! the caller beyond the three coarse outcomes below.

use crate::auth::directory::{DirectoryAuthenticator, DirectoryError};
use crate::store::{Role, Store, User};
use argon2::password_hash::{PasswordHash, SaltString};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use rand::rngs::OsRng;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, warn};

/// Which path authenticated the user; tagged into the audit log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    Ldap,
    Local,
}

impl AuthMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuthMethod::Ldap => "ldap",
            AuthMethod::Local => "local",
        }
    }
}

/// A successful login outcome.
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user: User,
    pub method: AuthMethod,
}

/// The three outcomes a failed login may surface. The messages are the
/// user-facing text; anything more specific stays in the logs.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum LoginError {
    /// Correct directory password, but no mapped group.
    #[error("Access denied: you are not in an authorized group")]
    NotAuthorized,

    /// Correct local password for a non-admin while the directory is
    /// enabled.
    #[error("Local login is disabled. Use LDAP credentials.")]
    LocalLoginDisabled,

    /// Everything else.
    #[error("Invalid credentials")]
    InvalidCredentials,
}

/// Hash a password into a PHC string.
pub fn hash_password(password: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    Ok(Argon2::default()
        .hash_password(password.as_bytes(), &salt)?
        .to_string())
}

/// Verify a password against a stored PHC hash on a blocking thread.
async fn verify_password(hash: String, password: String) -> bool {
    let result = tokio::task::spawn_blocking(move || match PasswordHash::new(&hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(e) => {
            error!("Stored password hash is unparseable: {}", e);
            false
        }
    })
    .await;
    result.unwrap_or(false)
}

/// Run the login decision procedure. First success wins; a directory
/// user with no mapped role is rejected outright rather than falling
/// through to local authentication.
pub async fn login(
    store: &Arc<dyn Store>,
    directory: Option<&Arc<dyn DirectoryAuthenticator>>,
    username: &str,
    password: &str,
) -> Result<AuthenticatedUser, LoginError> {
    if let Some(dir) = directory {
        match dir.authenticate(username, password).await {
            Ok(result) => {
                let Some(role) = dir.resolve_role(&result.groups) else {
                    debug!(
                        "Directory user '{}' authenticated but belongs to no mapped group",
                        result.username
                    );
                    return Err(LoginError::NotAuthorized);
                };

                // The directory is the source of truth: role and auth
                // source are overwritten on every successful login.
                if let Err(e) = store.upsert_directory_user(&result.username, role).await {
                    error!(
                        "Failed to provision directory user '{}': {}",
                        result.username, e
                    );
                    return Err(LoginError::InvalidCredentials);
                }
                return match store.get_user_by_username(&result.username).await {
                    Ok(Some(user)) => Ok(AuthenticatedUser {
                        user,
                        method: AuthMethod::Ldap,
                    }),
                    Ok(None) => {
                        error!(
                            "Directory user '{}' missing after provisioning",
                            result.username
                        );
                        Err(LoginError::InvalidCredentials)
                    }
                    Err(e) => {
                        error!("User lookup failed after provisioning: {}", e);
                        Err(LoginError::InvalidCredentials)
                    }
                };
            }
            Err(DirectoryError::InvalidCredentials) => {
                debug!("Directory rejected credentials for '{}'", username);
            }
            Err(e) => {
                warn!("Directory authentication unavailable: {}", e);
            }
        }
    }

    let user = match store.get_user_by_username(username).await {
        Ok(Some(user)) => user,
        Ok(None) => return Err(LoginError::InvalidCredentials),
        Err(e) => {
            error!("User lookup failed: {}", e);
            return Err(LoginError::InvalidCredentials);
        }
    };

    if !user.active || user.password_hash.is_empty() {
        return Err(LoginError::InvalidCredentials);
    }
    if !verify_password(user.password_hash.clone(), password.to_string()).await {
        return Err(LoginError::InvalidCredentials);
    }
    if directory.is_some() && user.role != Role::Admin {
        return Err(LoginError::LocalLoginDisabled);
    }

    Ok(AuthenticatedUser {
        user,
        method: AuthMethod::Local,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::directory::DirectoryUser;
    use crate::store::{AuthSource, MemoryStore};
    use async_trait::async_trait;
    use std::collections::HashMap;

    /// Scripted directory outcomes for policy tests.
    enum MockOutcome {
        Success(DirectoryUser),
        BadCredentials,
        NotFound,
    }

    struct MockDirectory {
        outcome: MockOutcome,
        mapping: HashMap<String, String>,
    }

    impl MockDirectory {
        fn succeeding(username: &str, groups: &[&str]) -> Self {
            Self {
                outcome: MockOutcome::Success(DirectoryUser {
                    username: username.to_string(),
                    email: format!("{}@example.com", username),
                    groups: groups.iter().map(|g| g.to_string()).collect(),
                }),
                mapping: default_mapping(),
            }
        }

        fn failing(outcome: MockOutcome) -> Self {
            Self {
                outcome,
                mapping: default_mapping(),
            }
        }
    }

    fn default_mapping() -> HashMap<String, String> {
        [
            ("admin".to_string(), "cn=dns-admins".to_string()),
            ("editor".to_string(), "cn=dns-editors".to_string()),
        ]
        .into_iter()
        .collect()
    }

    #[async_trait]
    impl DirectoryAuthenticator for MockDirectory {
        async fn authenticate(
            &self,
            _username: &str,
            _password: &str,
        ) -> Result<DirectoryUser, DirectoryError> {
            match &self.outcome {
                MockOutcome::Success(user) => Ok(user.clone()),
                MockOutcome::BadCredentials => Err(DirectoryError::InvalidCredentials),
                MockOutcome::NotFound => Err(DirectoryError::AmbiguousIdentity(0)),
            }
        }

        fn resolve_role(&self, groups: &[String]) -> Option<Role> {
            crate::auth::directory::resolve_role(&self.mapping, groups)
        }
    }

    async fn store_with_local_user(
        username: &str,
        password: &str,
        role: Role,
    ) -> Arc<dyn Store> {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let hash = hash_password(password).unwrap();
        store.create_user(username, &hash, role).await.unwrap();
        store
    }

    fn dir(mock: MockDirectory) -> Arc<dyn DirectoryAuthenticator> {
        Arc::new(mock)
    }

    #[tokio::test]
    async fn directory_login_provisions_and_wins() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let directory = dir(MockDirectory::succeeding("alice", &["cn=dns-editors"]));

        let auth = login(&store, Some(&directory), "alice", "pw")
            .await
            .unwrap();
        assert_eq!(auth.method, AuthMethod::Ldap);
        assert_eq!(auth.user.role, Role::Editor);
        assert_eq!(auth.user.auth_source, AuthSource::Ldap);
        assert!(auth.user.password_hash.is_empty());
    }

    #[tokio::test]
    async fn directory_role_overwrites_on_every_login() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store
            .upsert_directory_user("alice", Role::Admin)
            .await
            .unwrap();

        let directory = dir(MockDirectory::succeeding("alice", &["cn=dns-editors"]));
        let auth = login(&store, Some(&directory), "alice", "pw")
            .await
            .unwrap();
        assert_eq!(auth.user.role, Role::Editor);
    }

    #[tokio::test]
    async fn unmapped_directory_user_is_denied_without_local_fallthrough() {
        // The same username also has a valid local admin password; the
        // directory denial must win.
        let store = store_with_local_user("alice", "localpw", Role::Admin).await;
        let directory = dir(MockDirectory::succeeding("alice", &["cn=everyone"]));

        let err = login(&store, Some(&directory), "alice", "localpw")
            .await
            .unwrap_err();
        assert_eq!(err, LoginError::NotAuthorized);
    }

    #[tokio::test]
    async fn directory_failure_falls_through_to_local_admin() {
        let store = store_with_local_user("root", "breakglass", Role::Admin).await;
        let directory = dir(MockDirectory::failing(MockOutcome::BadCredentials));

        let auth = login(&store, Some(&directory), "root", "breakglass")
            .await
            .unwrap();
        assert_eq!(auth.method, AuthMethod::Local);
        assert_eq!(auth.user.role, Role::Admin);
    }

    #[tokio::test]
    async fn ambiguous_directory_identity_falls_through_like_any_failure() {
        let store = store_with_local_user("root", "breakglass", Role::Admin).await;
        let directory = dir(MockDirectory::failing(MockOutcome::NotFound));

        let auth = login(&store, Some(&directory), "root", "breakglass")
            .await
            .unwrap();
        assert_eq!(auth.method, AuthMethod::Local);
    }

    #[tokio::test]
    async fn non_admin_local_login_is_locked_out_when_directory_enabled() {
        let store = store_with_local_user("bob", "bobpw", Role::Editor).await;
        let directory = dir(MockDirectory::failing(MockOutcome::BadCredentials));

        let err = login(&store, Some(&directory), "bob", "bobpw")
            .await
            .unwrap_err();
        assert_eq!(err, LoginError::LocalLoginDisabled);
    }

    #[tokio::test]
    async fn non_admin_local_login_works_without_directory() {
        let store = store_with_local_user("bob", "bobpw", Role::Editor).await;
        let auth = login(&store, None, "bob", "bobpw").await.unwrap();
        assert_eq!(auth.method, AuthMethod::Local);
        assert_eq!(auth.user.role, Role::Editor);
    }

    #[tokio::test]
    async fn wrong_password_is_invalid_credentials() {
        let store = store_with_local_user("bob", "bobpw", Role::Editor).await;
        let err = login(&store, None, "bob", "wrong").await.unwrap_err();
        assert_eq!(err, LoginError::InvalidCredentials);
    }

    #[tokio::test]
    async fn unknown_user_is_invalid_credentials() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let err = login(&store, None, "ghost", "pw").await.unwrap_err();
        assert_eq!(err, LoginError::InvalidCredentials);
    }

    #[tokio::test]
    async fn inactive_user_is_rejected() {
        let store = store_with_local_user("bob", "bobpw", Role::Admin).await;
        store.set_user_active("bob", false).await.unwrap();
        let err = login(&store, None, "bob", "bobpw").await.unwrap_err();
        assert_eq!(err, LoginError::InvalidCredentials);
    }

    #[tokio::test]
    async fn directory_managed_user_has_no_local_password() {
        // Empty hash means directory-managed; no password can match it.
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        store
            .upsert_directory_user("alice", Role::Editor)
            .await
            .unwrap();
        let err = login(&store, None, "alice", "").await.unwrap_err();
        assert_eq!(err, LoginError::InvalidCredentials);
    }

    #[tokio::test]
    async fn hash_roundtrip() {
        let hash = hash_password("s3cret").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password(hash.clone(), "s3cret".to_string()).await);
        assert!(!verify_password(hash, "other".to_string()).await);
    }
}
