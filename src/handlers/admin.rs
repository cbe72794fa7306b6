//! Admin-only pages: user management and the audit log.

use super::{audit, client_ip, role_of};
use crate::auth::policy;
use crate::auth::SessionInfo;
use crate::store::{AuditEntry, Role, User};
use crate::ui::render;
use crate::AppState;
use axum::extract::{Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Redirect, Response};
use axum::{Extension, Form};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::error;

const AUDIT_PAGE_SIZE: i64 = 50;

#[derive(Serialize)]
struct UsersTemplate {
    title: String,
    username: String,
    role: String,
    csrf_token: String,
    error: Option<String>,
    flash: Option<String>,
    users: Vec<User>,
}

#[derive(Serialize)]
struct AuditTemplate {
    title: String,
    username: String,
    role: String,
    csrf_token: String,
    error: Option<String>,
    flash: Option<String>,
    entries: Vec<AuditEntry>,
    page: i64,
    total_pages: i64,
    total: i64,
}

#[derive(Debug, Deserialize)]
pub struct CreateUserForm {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub role: String,
}

#[derive(Debug, Deserialize)]
pub struct DeleteUserForm {
    pub username: String,
}

fn users_url(msg: &str) -> String {
    format!("/admin/users?msg={}", urlencoding::encode(msg))
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(session): Extension<SessionInfo>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let role = role_of(&state.store, &session.username).await;

    let (users, error) = match state.store.list_users().await {
        Ok(users) => (users, None),
        Err(e) => (Vec::new(), Some(format!("Failed to load users: {}", e))),
    };

    render(
        &state.templates,
        "admin_users.html",
        UsersTemplate {
            title: "Users".to_string(),
            username: session.username,
            role,
            csrf_token: session.csrf_token,
            error,
            flash: params.get("msg").cloned(),
            users,
        },
    )
}

pub async fn create_user(
    State(state): State<AppState>,
    Extension(session): Extension<SessionInfo>,
    headers: HeaderMap,
    Form(form): Form<CreateUserForm>,
) -> Response {
    // Bad role input degrades to editor rather than failing the form.
    let role = form.role.parse().unwrap_or(Role::Editor);

    let msg = match policy::hash_password(&form.password) {
        Ok(hash) => match state.store.create_user(&form.username, &hash, role).await {
            Ok(()) => {
                audit(
                    &state.store,
                    AuditEntry {
                        username: session.username,
                        action: "create_user".to_string(),
                        detail: format!("created user={} role={}", form.username, role),
                        ip_address: client_ip(&headers),
                        ..Default::default()
                    },
                )
                .await;
                format!("User '{}' created successfully", form.username)
            }
            Err(e) => format!("Error: {}", e),
        },
        Err(e) => {
            error!("Password hashing failed: {}", e);
            "Error: failed to hash password".to_string()
        }
    };

    Redirect::to(&users_url(&msg)).into_response()
}

pub async fn delete_user(
    State(state): State<AppState>,
    Extension(session): Extension<SessionInfo>,
    headers: HeaderMap,
    Form(form): Form<DeleteUserForm>,
) -> Response {
    if form.username == session.username {
        return Redirect::to(&users_url("Cannot delete yourself")).into_response();
    }

    let msg = match state.store.delete_user(&form.username).await {
        Ok(()) => {
            audit(
                &state.store,
                AuditEntry {
                    username: session.username,
                    action: "delete_user".to_string(),
                    detail: format!("deleted user={}", form.username),
                    ip_address: client_ip(&headers),
                    ..Default::default()
                },
            )
            .await;
            format!("User '{}' deleted", form.username)
        }
        Err(e) => format!("Error: {}", e),
    };

    Redirect::to(&users_url(&msg)).into_response()
}

pub async fn audit_log(
    State(state): State<AppState>,
    Extension(session): Extension<SessionInfo>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let role = role_of(&state.store, &session.username).await;

    let page = params
        .get("page")
        .and_then(|p| p.parse::<i64>().ok())
        .filter(|p| *p >= 1)
        .unwrap_or(1);
    let offset = (page - 1) * AUDIT_PAGE_SIZE;

    let (entries, total, error) = match state.store.list_audit(AUDIT_PAGE_SIZE, offset).await {
        Ok((entries, total)) => (entries, total, None),
        Err(e) => (
            Vec::new(),
            0,
            Some(format!("Failed to load audit log: {}", e)),
        ),
    };
    let total_pages = ((total + AUDIT_PAGE_SIZE - 1) / AUDIT_PAGE_SIZE).max(1);

    render(
        &state.templates,
        "admin_audit.html",
        AuditTemplate {
            title: "Audit Log".to_string(),
            username: session.username,
            role,
            csrf_token: session.csrf_token,
            error,
            flash: None,
            entries,
            page,
            total_pages,
            total,
        },
    )
}
