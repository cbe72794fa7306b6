//! Template environment and rendering.
//!
//! Templates are embedded at compile time so the binary carries its own
//! UI. Context structs live next to the handlers that render them.

use axum::http::StatusCode;
use axum::response::{Html, IntoResponse, Response};
use minijinja::Environment;
use serde::Serialize;
use tracing::error;

/// Build the template environment. Template parse failures abort startup.
pub fn build_env() -> Environment<'static> {
    let mut env = Environment::new();
    let templates = [
        ("layout.html", include_str!("../templates/layout.html")),
        ("login.html", include_str!("../templates/login.html")),
        ("setup.html", include_str!("../templates/setup.html")),
        ("zones.html", include_str!("../templates/zones.html")),
        ("records.html", include_str!("../templates/records.html")),
        (
            "admin_users.html",
            include_str!("../templates/admin_users.html"),
        ),
        (
            "admin_audit.html",
            include_str!("../templates/admin_audit.html"),
        ),
    ];
    for (name, source) in templates {
        env.add_template(name, source)
            .unwrap_or_else(|e| panic!("failed to parse embedded template {}: {}", name, e));
    }
    env
}

/// Render a template to a response, logging and returning a generic 500
/// on failure.
pub fn render(env: &Environment<'static>, name: &str, ctx: impl Serialize) -> Response {
    match env.get_template(name).and_then(|tmpl| tmpl.render(ctx)) {
        Ok(html) => Html(html).into_response(),
        Err(e) => {
            error!("Template render failed for {}: {}", name, e);
            (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embedded_templates_parse() {
        let env = build_env();
        assert!(env.get_template("layout.html").is_ok());
        assert!(env.get_template("login.html").is_ok());
        assert!(env.get_template("records.html").is_ok());
    }
}
