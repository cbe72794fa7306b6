//! First-run setup: create the initial administrator.
//!
//! Returns 404 once any user exists so the flow cannot be replayed.

use crate::auth::policy;
use crate::store::Role;
use crate::ui::render;
use crate::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Form;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

const MIN_PASSWORD_LEN: usize = 6;

#[derive(Serialize)]
struct SetupTemplate {
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SetupForm {
    pub username: String,
    pub password: String,
    pub confirm_password: String,
}

fn setup_error(state: &AppState, message: &str) -> Response {
    render(
        &state.templates,
        "setup.html",
        SetupTemplate {
            error: Some(message.to_string()),
        },
    )
}

pub async fn setup_page(State(state): State<AppState>) -> Response {
    if state.store.has_users().await.unwrap_or(false) {
        return StatusCode::NOT_FOUND.into_response();
    }
    render(&state.templates, "setup.html", SetupTemplate { error: None })
}

pub async fn setup_submit(
    State(state): State<AppState>,
    Form(form): Form<SetupForm>,
) -> Response {
    if state.store.has_users().await.unwrap_or(false) {
        return StatusCode::NOT_FOUND.into_response();
    }

    if form.username.is_empty() {
        return setup_error(&state, "Username is required");
    }
    if form.password.len() < MIN_PASSWORD_LEN {
        return setup_error(&state, "Password must be at least 6 characters");
    }
    if form.password != form.confirm_password {
        return setup_error(&state, "Passwords do not match");
    }

    let hash = match policy::hash_password(&form.password) {
        Ok(hash) => hash,
        Err(e) => {
            error!("Password hashing failed during setup: {}", e);
            return setup_error(&state, "Failed to create user");
        }
    };
    if let Err(e) = state
        .store
        .create_user(&form.username, &hash, Role::Admin)
        .await
    {
        error!("Failed to create initial administrator: {}", e);
        return setup_error(&state, "Failed to create user");
    }

    info!("Initial administrator '{}' created", form.username);
    Redirect::to("/login").into_response()
}
