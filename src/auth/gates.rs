//! Request gates layered in front of protected routes.
//!
//! Each gate is an independent axum middleware making one pass or
//! short-circuit decision, composed in a fixed order ahead of the route
//! handler: authentication, then CSRF, then admin. Browser-navigation
//! failures redirect to the login page; CSRF and role failures are
//! forbidden responses.

use crate::auth::session::{SessionInfo, SessionManager};
use crate::store::Role;
use crate::AppState;
use axum::body::{to_bytes, Body};
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use tower_cookies::Cookies;
use tracing::{error, warn};

const CSRF_FORM_FIELD: &str = "csrf_token";
const CSRF_HEADER: &str = "x-csrf-token";

/// Mutation bodies are small HTML forms; anything larger is refused
/// before the CSRF check buffers it.
const FORM_BODY_LIMIT: usize = 64 * 1024;

fn is_mutation(method: &Method) -> bool {
    method == Method::POST
        || method == Method::PUT
        || method == Method::DELETE
        || method == Method::PATCH
}

async fn session_from(
    state: &AppState,
    cookies: &Cookies,
    cached: Option<SessionInfo>,
) -> Option<SessionInfo> {
    if let Some(info) = cached {
        return Some(info);
    }
    state.sessions.session_info(cookies).await
}

/// Require a valid session; redirect browser navigation to the login
/// entry point otherwise. The resolved session state is stashed in the
/// request extensions for downstream gates and handlers.
pub async fn require_auth(
    State(state): State<AppState>,
    cookies: Cookies,
    mut req: Request,
    next: Next,
) -> Response {
    match state.sessions.session_info(&cookies).await {
        Some(info) => {
            req.extensions_mut().insert(info);
            next.run(req).await
        }
        None => Redirect::to("/login").into_response(),
    }
}

/// Require a valid session whose user resolves to the admin role. Auth
/// source is not consulted; a directory admin and a local admin pass
/// identically.
pub async fn require_admin(
    State(state): State<AppState>,
    cookies: Cookies,
    req: Request,
    next: Next,
) -> Response {
    let cached = req.extensions().get::<SessionInfo>().cloned();
    let Some(info) = session_from(&state, &cookies, cached).await else {
        return Redirect::to("/login").into_response();
    };
    match state.store.get_user_by_username(&info.username).await {
        Ok(Some(user)) if user.role == Role::Admin => next.run(req).await,
        Ok(_) => (StatusCode::FORBIDDEN, "Forbidden").into_response(),
        Err(e) => {
            error!("User lookup failed in admin gate: {}", e);
            (StatusCode::FORBIDDEN, "Forbidden").into_response()
        }
    }
}

/// CSRF check for state-changing methods. The submitted token is read
/// from the `csrf_token` form field first, then the `X-CSRF-Token`
/// header, and compared in constant time against the session's token.
/// Safe methods pass through untouched.
pub async fn require_csrf(
    State(state): State<AppState>,
    cookies: Cookies,
    req: Request,
    next: Next,
) -> Response {
    if !is_mutation(req.method()) {
        return next.run(req).await;
    }

    let cached = req.extensions().get::<SessionInfo>().cloned();
    let Some(info) = session_from(&state, &cookies, cached).await else {
        return (StatusCode::FORBIDDEN, "Forbidden: no session").into_response();
    };

    // Buffer the form body to read the token, then hand the handler an
    // identical request.
    let (parts, body) = req.into_parts();
    let bytes = match to_bytes(body, FORM_BODY_LIMIT).await {
        Ok(bytes) => bytes,
        Err(e) => {
            warn!("Failed to buffer request body for CSRF check: {}", e);
            return (StatusCode::BAD_REQUEST, "Bad request").into_response();
        }
    };

    let is_form = parts
        .headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.starts_with("application/x-www-form-urlencoded"))
        .unwrap_or(false);
    let mut submitted = if is_form {
        form_urlencoded::parse(&bytes)
            .find(|(key, _)| key == CSRF_FORM_FIELD)
            .map(|(_, value)| value.into_owned())
    } else {
        None
    };
    if submitted.as_deref().unwrap_or("").is_empty() {
        submitted = parts
            .headers
            .get(CSRF_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
    }

    let matches = submitted
        .as_deref()
        .map(|s| SessionManager::csrf_matches(&info.csrf_token, s))
        .unwrap_or(false);
    if !matches {
        warn!("Rejected {} {} with missing or invalid CSRF token", parts.method, parts.uri);
        return (StatusCode::FORBIDDEN, "Forbidden: invalid CSRF token").into_response();
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    next.run(req).await
}

/// Redirect everything to first-run setup until at least one user exists.
pub async fn require_setup_complete(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    match state.store.has_users().await {
        Ok(true) => next.run(req).await,
        Ok(false) => Redirect::to("/setup").into_response(),
        Err(e) => {
            error!("Setup check failed: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Store unavailable").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{create_test_app_state, seed_session, seed_user};
    use axum::body::Body;
    use axum::http::{header, Request as HttpRequest};
    use axum::middleware::from_fn_with_state;
    use axum::routing::post;
    use axum::Router;
    use tower::ServiceExt;

    /// Router with only the CSRF gate in front of a trivial handler, so
    /// the gate's own session handling is visible without the auth gate
    /// running first.
    fn csrf_only_router(state: AppState) -> Router {
        Router::new()
            .route("/mutate", post(|| async { "ok" }).get(|| async { "ok" }))
            .route_layer(from_fn_with_state(state.clone(), require_csrf))
            .layer(tower_cookies::CookieManagerLayer::new())
            .with_state(state)
    }

    #[tokio::test]
    async fn csrf_gate_alone_forbids_missing_session() {
        let state = create_test_app_state().await;
        let app = csrf_only_router(state);

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/mutate")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from("csrf_token=anything"))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn csrf_gate_alone_lets_safe_methods_through() {
        let state = create_test_app_state().await;
        let app = csrf_only_router(state);

        let request = HttpRequest::builder()
            .uri("/mutate")
            .body(Body::empty())
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn csrf_gate_alone_accepts_the_session_token() {
        let state = create_test_app_state().await;
        seed_user(&state, "alice", "password-123", crate::store::Role::Editor).await;
        let (cookie, csrf) = seed_session(&state, "alice").await;
        let app = csrf_only_router(state);

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/mutate")
            .header(header::COOKIE, &cookie)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("csrf_token={}", csrf)))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn csrf_gate_alone_rejects_a_foreign_token() {
        let state = create_test_app_state().await;
        seed_user(&state, "alice", "password-123", crate::store::Role::Editor).await;
        let (cookie, _) = seed_session(&state, "alice").await;
        // A second session's token is not interchangeable.
        let (_, other_csrf) = seed_session(&state, "alice").await;
        let (cookie_a, csrf_a) = (cookie, other_csrf);
        let app = csrf_only_router(state);

        let request = HttpRequest::builder()
            .method("POST")
            .uri("/mutate")
            .header(header::COOKIE, &cookie_a)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("csrf_token={}", csrf_a)))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
    }
}
