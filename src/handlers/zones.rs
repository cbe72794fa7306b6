//! Hosted-zone listing.

use super::role_of;
use crate::auth::SessionInfo;
use crate::dns::Zone;
use crate::ui::render;
use crate::AppState;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Extension;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Serialize)]
struct ZonesTemplate {
    title: String,
    username: String,
    role: String,
    csrf_token: String,
    error: Option<String>,
    flash: Option<String>,
    zones: Vec<Zone>,
}

pub async fn list_zones(
    State(state): State<AppState>,
    Extension(session): Extension<SessionInfo>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let role = role_of(&state.store, &session.username).await;

    let (zones, error) = match state.zones.list_zones().await {
        Ok(zones) => (zones, None),
        Err(e) => (Vec::new(), Some(format!("Failed to load zones: {}", e))),
    };

    render(
        &state.templates,
        "zones.html",
        ZonesTemplate {
            title: "Hosted Zones".to_string(),
            username: session.username,
            role,
            csrf_token: session.csrf_token,
            error,
            flash: params.get("msg").cloned(),
            zones,
        },
    )
}

pub async fn refresh_zones(State(state): State<AppState>) -> Response {
    state.zones.refresh_all().await;
    Redirect::to("/zones").into_response()
}
