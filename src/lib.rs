//! zonegate — a web console for managing hosted DNS zones.
//!
//! Assembly lives here: shared application state, the router with its
//! gate layering, and the startup sequence.

use anyhow::Context;
use axum::middleware::from_fn_with_state;
use axum::response::Redirect;
use axum::routing::{get, post};
use axum::Router;
use minijinja::Environment;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_cookies::CookieManagerLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

pub mod auth;
pub mod config;
pub mod dns;
pub mod handlers;
pub mod store;
pub mod test_helpers;
pub mod ui;

use auth::directory::DirectoryAuthenticator;
use auth::gates;
use auth::session::SessionManager;
use auth::LdapClient;
use config::Config;
use dns::{DnsProvider, MemoryProvider, ZoneService};
use store::{Store, StoreConfig};

/// Shared application state handed to every handler and gate.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<dyn Store>,
    pub sessions: Arc<SessionManager>,
    pub directory: Option<Arc<dyn DirectoryAuthenticator>>,
    pub zones: Arc<ZoneService>,
    pub templates: Arc<Environment<'static>>,
}

/// Build the application router. Gate layering runs outermost-first:
/// authentication, then CSRF, then admin, ahead of every protected
/// handler; the whole console sits behind the first-run setup gate.
pub fn router(state: AppState) -> Router {
    let session_routes = Router::new()
        .route(
            "/login",
            get(handlers::auth::login_page).post(handlers::auth::login_submit),
        )
        .route("/logout", post(handlers::auth::logout));

    let pages = Router::new()
        .route("/", get(|| async { Redirect::to("/zones") }))
        .route("/zones", get(handlers::zones::list_zones))
        .route(
            "/zones/{zone_id}/records",
            get(handlers::records::list_records),
        )
        .route_layer(from_fn_with_state(state.clone(), gates::require_auth));

    let mutations = Router::new()
        .route("/zones/refresh", post(handlers::zones::refresh_zones))
        .route(
            "/zones/{zone_id}/records/refresh",
            post(handlers::records::refresh_records),
        )
        .route(
            "/zones/{zone_id}/records/create",
            post(handlers::records::create_record),
        )
        .route(
            "/zones/{zone_id}/records/edit",
            post(handlers::records::edit_record),
        )
        .route(
            "/zones/{zone_id}/records/delete",
            post(handlers::records::delete_record),
        )
        .route_layer(from_fn_with_state(state.clone(), gates::require_csrf))
        .route_layer(from_fn_with_state(state.clone(), gates::require_auth));

    let admin_pages = Router::new()
        .route("/admin/users", get(handlers::admin::list_users))
        .route("/admin/audit", get(handlers::admin::audit_log))
        .route_layer(from_fn_with_state(state.clone(), gates::require_admin))
        .route_layer(from_fn_with_state(state.clone(), gates::require_auth));

    let admin_mutations = Router::new()
        .route("/admin/users/create", post(handlers::admin::create_user))
        .route("/admin/users/delete", post(handlers::admin::delete_user))
        .route_layer(from_fn_with_state(state.clone(), gates::require_admin))
        .route_layer(from_fn_with_state(state.clone(), gates::require_csrf))
        .route_layer(from_fn_with_state(state.clone(), gates::require_auth));

    let console = Router::new()
        .merge(session_routes)
        .merge(pages)
        .merge(mutations)
        .merge(admin_pages)
        .merge(admin_mutations)
        .layer(from_fn_with_state(
            state.clone(),
            gates::require_setup_complete,
        ));

    let setup_routes = Router::new().route(
        "/setup",
        get(handlers::setup::setup_page).post(handlers::setup::setup_submit),
    );

    Router::new()
        .merge(setup_routes)
        .merge(console)
        .layer(CookieManagerLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Build the application state from loaded configuration.
pub async fn build_state(config: Config) -> anyhow::Result<AppState> {
    let store_config = if config.database.path.is_empty() {
        warn!("No database path configured; using the in-memory store");
        StoreConfig::Memory
    } else {
        StoreConfig::Sqlite {
            path: config.database.path.clone(),
        }
    };
    let store = store::create_store(&store_config)
        .await
        .context("failed to open the store")?;

    // Opportunistic sweep; expiry is otherwise enforced lazily on read.
    match store.purge_expired_sessions().await {
        Ok(purged) if purged > 0 => info!("Purged {} expired session(s)", purged),
        Ok(_) => {}
        Err(e) => warn!("Expired-session purge failed: {}", e),
    }

    let sessions = Arc::new(
        SessionManager::new(store.clone())
            .await
            .context("failed to initialize the session manager")?,
    );

    let directory: Option<Arc<dyn DirectoryAuthenticator>> = if config.ldap.enabled {
        info!("LDAP authentication enabled");
        info!("LDAP server: {}", config.ldap.url);
        info!("LDAP groups mapped: {} role(s)", config.ldap.group_mapping.len());
        Some(Arc::new(LdapClient::new(config.ldap.clone())))
    } else {
        None
    };

    let provider: Arc<dyn DnsProvider> = Arc::new(MemoryProvider::new());
    let allowed: HashMap<String, String> = config
        .provider
        .zones
        .iter()
        .map(|zone| (zone.id.clone(), zone.label.clone()))
        .collect();
    let zones = Arc::new(ZoneService::new(provider, store.clone(), allowed));

    Ok(AppState {
        config: Arc::new(config),
        store,
        sessions,
        directory,
        zones,
        templates: Arc::new(ui::build_env()),
    })
}

/// Start the server and run until the listener fails.
pub async fn run(config: Config) -> anyhow::Result<()> {
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid listen address")?;

    let state = build_state(config).await?;
    let app = router(state);

    info!("zonegate server starting on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("failed to bind the listen address")?;
    axum::serve(listener, app)
        .await
        .context("server terminated")?;
    Ok(())
}
