//! End-to-end console flow tests over the full router.
//!
//! Drives login, setup, the gates and record mutations through `oneshot`
//! requests against in-memory state.

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;
use zonegate::store::Role;
use zonegate::test_helpers::{create_test_app_state, seed_session, seed_user};
use zonegate::{router, AppState};

const FORM: &str = "application/x-www-form-urlencoded";

async fn state_with_user(username: &str, password: &str, role: Role) -> AppState {
    let state = create_test_app_state().await;
    seed_user(&state, username, password, role).await;
    state
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn get_with_cookie(uri: &str, cookie: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header::COOKIE, cookie)
        .body(Body::empty())
        .unwrap()
}

fn post_form(uri: &str, cookie: Option<&str>, body: &str) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, FORM);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    builder.body(Body::from(body.to_string())).unwrap()
}

fn location(response: &axum::response::Response) -> &str {
    response
        .headers()
        .get(header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
}

async fn body_text(response: axum::response::Response) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8_lossy(&bytes).to_string()
}

/// Extract the session cookie pair from a login response.
fn session_cookie(response: &axum::response::Response) -> String {
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .and_then(|v| v.to_str().ok())
        .expect("login response sets a cookie");
    set_cookie
        .split(';')
        .next()
        .expect("cookie pair")
        .to_string()
}

#[tokio::test]
async fn everything_redirects_to_setup_until_a_user_exists() {
    let state = create_test_app_state().await;
    let app = router(state);

    let response = app.clone().oneshot(get("/zones")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/setup");

    let response = app.oneshot(get("/login")).await.unwrap();
    assert_eq!(location(&response), "/setup");
}

#[tokio::test]
async fn setup_creates_the_first_admin_once() {
    let state = create_test_app_state().await;
    let app = router(state.clone());

    let response = app
        .clone()
        .oneshot(post_form(
            "/setup",
            None,
            "username=root&password=changeme&confirm_password=changeme",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");

    let user = state
        .store
        .get_user_by_username("root")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.role, Role::Admin);
    assert!(user.password_hash.starts_with("$argon2"));

    // The flow cannot be replayed.
    let response = app.clone().oneshot(get("/setup")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let response = app
        .oneshot(post_form(
            "/setup",
            None,
            "username=evil&password=changeme&confirm_password=changeme",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn setup_validates_the_form() {
    let state = create_test_app_state().await;
    let app = router(state);

    let response = app
        .clone()
        .oneshot(post_form(
            "/setup",
            None,
            "username=root&password=short&confirm_password=short",
        ))
        .await
        .unwrap();
    assert!(body_text(response).await.contains("at least 6 characters"));

    let response = app
        .oneshot(post_form(
            "/setup",
            None,
            "username=root&password=changeme&confirm_password=different",
        ))
        .await
        .unwrap();
    assert!(body_text(response).await.contains("do not match"));
}

#[tokio::test]
async fn login_sets_a_hardened_cookie_and_grants_access() {
    let state = state_with_user("admin", "hunter2hunter2", Role::Admin).await;
    let app = router(state.clone());

    let response = app
        .clone()
        .oneshot(post_form(
            "/login",
            None,
            "username=admin&password=hunter2hunter2",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/zones");

    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(set_cookie.starts_with("zonegate_session="));
    assert!(set_cookie.contains("HttpOnly"));
    assert!(set_cookie.contains("SameSite=Strict"));
    assert!(set_cookie.contains("Path=/"));

    let cookie = session_cookie(&response);
    let response = app.oneshot(get_with_cookie("/zones", &cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(body_text(response).await.contains("Hosted Zones"));

    // Login was audited with the method tag.
    let (entries, _) = state.store.list_audit(10, 0).await.unwrap();
    assert_eq!(entries[0].action, "login");
    assert_eq!(entries[0].detail, "auth=local");
}

#[tokio::test]
async fn bad_credentials_render_a_generic_error() {
    let state = state_with_user("admin", "hunter2hunter2", Role::Admin).await;
    let app = router(state);

    let response = app
        .clone()
        .oneshot(post_form("/login", None, "username=admin&password=wrong"))
        .await
        .unwrap();
    assert!(body_text(response).await.contains("Invalid credentials"));

    // Unknown user gets the identical message.
    let response = app
        .oneshot(post_form("/login", None, "username=ghost&password=wrong"))
        .await
        .unwrap();
    assert!(body_text(response).await.contains("Invalid credentials"));
}

#[tokio::test]
async fn protected_pages_redirect_anonymous_browsers_to_login() {
    let state = state_with_user("admin", "hunter2hunter2", Role::Admin).await;
    let app = router(state);

    for uri in ["/zones", "/zones/Z1/records", "/admin/users", "/"] {
        let response = app.clone().oneshot(get(uri)).await.unwrap();
        assert_eq!(response.status(), StatusCode::SEE_OTHER, "{}", uri);
        assert_eq!(location(&response), "/login", "{}", uri);
    }
}

#[tokio::test]
async fn csrf_gate_rejects_missing_empty_and_wrong_tokens() {
    let state = state_with_user("admin", "pw-long-enough", Role::Admin).await;
    let (cookie, csrf) = seed_session(&state, "admin").await;
    let app = router(state);

    // No token at all.
    let response = app
        .clone()
        .oneshot(post_form("/zones/refresh", Some(&cookie), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Empty form token.
    let response = app
        .clone()
        .oneshot(post_form("/zones/refresh", Some(&cookie), "csrf_token="))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Wrong token.
    let response = app
        .clone()
        .oneshot(post_form(
            "/zones/refresh",
            Some(&cookie),
            "csrf_token=not-the-token",
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    // Correct token in the form field.
    let response = app
        .clone()
        .oneshot(post_form(
            "/zones/refresh",
            Some(&cookie),
            &format!("csrf_token={}", csrf),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    // Correct token in the header, no form body.
    let request = Request::builder()
        .method("POST")
        .uri("/zones/refresh")
        .header(header::COOKIE, &cookie)
        .header("x-csrf-token", &csrf)
        .body(Body::empty())
        .unwrap();
    let response = app.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    // Safe method needs no token.
    let response = app.oneshot(get_with_cookie("/zones", &cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn csrf_gate_without_a_session_is_forbidden() {
    let state = state_with_user("admin", "pw-long-enough", Role::Admin).await;
    let app = router(state);

    let response = app
        .oneshot(post_form("/zones/refresh", None, "csrf_token=whatever"))
        .await
        .unwrap();
    // The auth gate runs first for browser routes and redirects.
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn admin_gate_forbids_editors_and_admits_admins() {
    let state = state_with_user("admin", "pw-long-enough", Role::Admin).await;
    seed_user(&state, "bob", "editor-pw-123", Role::Editor).await;
    let (admin_cookie, _) = seed_session(&state, "admin").await;
    let (editor_cookie, _) = seed_session(&state, "bob").await;
    let app = router(state);

    let response = app
        .clone()
        .oneshot(get_with_cookie("/admin/users", &editor_cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = app
        .clone()
        .oneshot(get_with_cookie("/admin/users", &admin_cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // Editors keep their access to the zone pages.
    let response = app
        .oneshot(get_with_cookie("/zones", &editor_cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn directory_admins_pass_the_admin_gate() {
    // Gate treats a directory-provisioned admin exactly like a local one.
    let state = state_with_user("admin", "pw-long-enough", Role::Admin).await;
    state
        .store
        .upsert_directory_user("alice", Role::Admin)
        .await
        .unwrap();
    let (cookie, _) = seed_session(&state, "alice").await;
    let app = router(state);

    let response = app
        .oneshot(get_with_cookie("/admin/users", &cookie))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn logout_destroys_the_session_and_clears_the_cookie() {
    let state = state_with_user("admin", "pw-long-enough", Role::Admin).await;
    let (cookie, _) = seed_session(&state, "admin").await;
    let app = router(state);

    let response = app
        .clone()
        .oneshot(post_form("/logout", Some(&cookie), ""))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
    let set_cookie = response
        .headers()
        .get(header::SET_COOKIE)
        .unwrap()
        .to_str()
        .unwrap();
    assert!(set_cookie.starts_with("zonegate_session="));
    assert!(set_cookie.contains("Max-Age=0"));

    // The old cookie no longer resolves.
    let response = app.oneshot(get_with_cookie("/zones", &cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn logout_without_a_session_is_a_clean_no_op() {
    let state = state_with_user("admin", "pw-long-enough", Role::Admin).await;
    let app = router(state);

    let response = app.oneshot(post_form("/logout", None, "")).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
}

#[tokio::test]
async fn record_create_flows_through_csrf_and_lands_in_the_zone() {
    let state = state_with_user("admin", "pw-long-enough", Role::Admin).await;
    let (cookie, csrf) = seed_session(&state, "admin").await;
    let app = router(state.clone());

    let body = format!(
        "csrf_token={}&name=mail&type=A&ttl=600&value=192.0.2.25&value=192.0.2.26",
        csrf
    );
    let response = app
        .oneshot(post_form("/zones/Z1/records/create", Some(&cookie), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert!(location(&response).starts_with("/zones/Z1/records?msg="));

    let records = state.zones.list_records("Z1").await.unwrap();
    let created = records
        .iter()
        .find(|r| r.name == "mail.example.com.")
        .expect("created record is qualified against the zone domain");
    assert_eq!(created.ttl, 600);
    assert_eq!(created.values, vec!["192.0.2.25", "192.0.2.26"]);

    let (entries, _) = state.store.list_audit(10, 0).await.unwrap();
    assert_eq!(entries[0].action, "create_record");
    assert_eq!(entries[0].zone_id, "Z1");
    assert_eq!(entries[0].record_name, "mail.example.com.");
}

#[tokio::test]
async fn record_edit_rename_deletes_then_creates() {
    let state = state_with_user("admin", "pw-long-enough", Role::Admin).await;
    let (cookie, csrf) = seed_session(&state, "admin").await;
    let app = router(state.clone());

    let body = format!(
        "csrf_token={}&original_name=www.example.com.&original_type=A&original_ttl=300\
         &original_value=192.0.2.10&name=web&type=A&ttl=300&value=192.0.2.10",
        csrf
    );
    let response = app
        .oneshot(post_form("/zones/Z1/records/edit", Some(&cookie), &body))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);

    let records = state.zones.list_records("Z1").await.unwrap();
    assert!(records.iter().all(|r| r.name != "www.example.com."));
    assert!(records.iter().any(|r| r.name == "web.example.com."));
}

#[tokio::test]
async fn expired_session_is_rejected_at_the_gate() {
    let state = state_with_user("admin", "pw-long-enough", Role::Admin).await;
    // Plant an already-expired session row directly.
    state
        .store
        .create_session(
            "expired-token",
            "csrf",
            "admin",
            chrono::Utc::now() - chrono::Duration::minutes(1),
        )
        .await
        .unwrap();
    let cookie = "zonegate_session=expired-token";
    let app = router(state);

    let response = app.oneshot(get_with_cookie("/zones", cookie)).await.unwrap();
    assert_eq!(response.status(), StatusCode::SEE_OTHER);
    assert_eq!(location(&response), "/login");
}
