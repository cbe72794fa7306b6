//! Cookie-based session protocol.
//!
//! Sessions are bearer credentials: a random token is HMAC-signed with a
//! store-held secret, and only the signed value travels in the cookie and
//! keys the session row. A separate CSRF token is minted once per session
//! and never rotates. Expiry is absolute; reads never refresh it.

use crate::store::{Store, StoreError};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tower_cookies::cookie::time::Duration as CookieDuration;
use tower_cookies::cookie::SameSite;
use tower_cookies::{Cookie, Cookies};
use tracing::warn;

pub const SESSION_COOKIE: &str = "zonegate_session";

const SESSION_LIFETIME_HOURS: i64 = 24;

type HmacSha256 = Hmac<Sha256>;

/// The resolved state of a valid session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    pub username: String,
    pub csrf_token: String,
}

/// Issues, validates and revokes sessions.
pub struct SessionManager {
    secret: Vec<u8>,
    store: Arc<dyn Store>,
}

impl SessionManager {
    /// Build a session manager, bootstrapping the signing secret in the
    /// store on first use.
    pub async fn new(store: Arc<dyn Store>) -> Result<Self, StoreError> {
        let secret = store.ensure_session_secret().await?;
        Ok(Self {
            secret: secret.into_bytes(),
            store,
        })
    }

    /// 32 bytes from the OS CSPRNG, hex-encoded.
    pub fn generate_token() -> String {
        let mut buf = [0u8; 32];
        OsRng.fill_bytes(&mut buf);
        hex::encode(buf)
    }

    /// HMAC-SHA256 over the raw token, hex-encoded. The signed value is
    /// what the cookie carries and what the store is keyed by.
    pub fn sign(&self, token: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(&self.secret).expect("HMAC accepts any key length");
        mac.update(token.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Mint and persist a session, returning the signed token and the CSRF
    /// token. The session row must land before anything else happens; a
    /// store failure rejects the whole login.
    pub async fn issue(&self, username: &str) -> Result<(String, String), StoreError> {
        let token = Self::generate_token();
        let csrf_token = Self::generate_token();
        let signed = self.sign(&token);
        let expires_at = Utc::now() + Duration::hours(SESSION_LIFETIME_HOURS);
        self.store
            .create_session(&signed, &csrf_token, username, expires_at)
            .await?;
        Ok((signed, csrf_token))
    }

    /// Issue a session and set the response cookie. Returns the CSRF token
    /// for embedding in the rendered page.
    pub async fn create_session(
        &self,
        cookies: &Cookies,
        username: &str,
    ) -> Result<String, StoreError> {
        let (signed, csrf_token) = self.issue(username).await?;
        let cookie = Cookie::build((SESSION_COOKIE, signed))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Strict)
            .max_age(CookieDuration::hours(SESSION_LIFETIME_HOURS))
            .build();
        cookies.add(cookie);
        Ok(csrf_token)
    }

    /// Delete the session row (best-effort) and clear the cookie. A missing
    /// cookie makes this a no-op apart from the clearing.
    pub async fn destroy_session(&self, cookies: &Cookies) {
        if let Some(cookie) = cookies.get(SESSION_COOKIE) {
            if let Err(e) = self.store.delete_session(cookie.value()).await {
                warn!("Failed to delete session record: {}", e);
            }
        }
        let expired = Cookie::build((SESSION_COOKIE, ""))
            .path("/")
            .http_only(true)
            .same_site(SameSite::Strict)
            .max_age(CookieDuration::ZERO)
            .build();
        cookies.add(expired);
    }

    /// Resolve a signed token to session state. Invalid when the store has
    /// no matching row, the row's username is empty, or the expiry instant
    /// has been reached.
    pub async fn session_info_for_token(&self, signed: &str) -> Option<SessionInfo> {
        match self.store.get_session(signed).await {
            Ok(Some(record)) => {
                if record.username.is_empty() || Utc::now() >= record.expires_at {
                    return None;
                }
                Some(SessionInfo {
                    username: record.username,
                    csrf_token: record.csrf_token,
                })
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Session lookup failed: {}", e);
                None
            }
        }
    }

    /// Resolve the request's session cookie to session state.
    pub async fn session_info(&self, cookies: &Cookies) -> Option<SessionInfo> {
        let cookie = cookies.get(SESSION_COOKIE)?;
        self.session_info_for_token(cookie.value()).await
    }

    /// Convenience reduction of [`SessionManager::session_info`].
    pub async fn username(&self, cookies: &Cookies) -> Option<String> {
        self.session_info(cookies).await.map(|info| info.username)
    }

    /// Constant-time CSRF token comparison. An empty expected token never
    /// matches.
    pub fn csrf_matches(expected: &str, submitted: &str) -> bool {
        !expected.is_empty() && bool::from(expected.as_bytes().ct_eq(submitted.as_bytes()))
    }
}
