//! Login, logout and the login page.

use super::{audit, client_ip};
use crate::auth::policy;
use crate::store::AuditEntry;
use crate::ui::render;
use crate::AppState;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;
use serde::{Deserialize, Serialize};
use tower_cookies::Cookies;
use tracing::{error, info};

#[derive(Serialize)]
struct LoginTemplate {
    error: Option<String>,
    ldap_enabled: bool,
}

#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

fn login_error(state: &AppState, message: String) -> Response {
    render(
        &state.templates,
        "login.html",
        LoginTemplate {
            error: Some(message),
            ldap_enabled: state.directory.is_some(),
        },
    )
}

pub async fn login_page(State(state): State<AppState>, cookies: Cookies) -> Response {
    if state.sessions.username(&cookies).await.is_some() {
        return Redirect::to("/zones").into_response();
    }
    render(
        &state.templates,
        "login.html",
        LoginTemplate {
            error: None,
            ldap_enabled: state.directory.is_some(),
        },
    )
}

pub async fn login_submit(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
    Form(form): Form<LoginForm>,
) -> Response {
    let outcome = policy::login(
        &state.store,
        state.directory.as_ref(),
        &form.username,
        &form.password,
    )
    .await;

    let authenticated = match outcome {
        Ok(authenticated) => authenticated,
        Err(e) => return login_error(&state, e.to_string()),
    };

    // A session the store does not know about is worse than a failed
    // login; reject outright when the write fails.
    if let Err(e) = state
        .sessions
        .create_session(&cookies, &authenticated.user.username)
        .await
    {
        error!("Failed to persist session: {}", e);
        return login_error(&state, "Login failed. Please try again.".to_string());
    }

    info!(
        "User '{}' logged in via {}",
        authenticated.user.username,
        authenticated.method.as_str()
    );
    audit(
        &state.store,
        AuditEntry {
            username: authenticated.user.username.clone(),
            action: "login".to_string(),
            detail: format!("auth={}", authenticated.method.as_str()),
            ip_address: client_ip(&headers),
            ..Default::default()
        },
    )
    .await;

    Redirect::to("/zones").into_response()
}

pub async fn logout(
    State(state): State<AppState>,
    cookies: Cookies,
    headers: HeaderMap,
) -> Response {
    let username = state.sessions.username(&cookies).await;

    state.sessions.destroy_session(&cookies).await;

    if let Some(username) = username {
        audit(
            &state.store,
            AuditEntry {
                username,
                action: "logout".to_string(),
                ip_address: client_ip(&headers),
                ..Default::default()
            },
        )
        .await;
    }

    Redirect::to("/login").into_response()
}
