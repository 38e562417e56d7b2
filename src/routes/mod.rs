use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post},
    Router,
};
use tower_http::{services::ServeDir, trace::TraceLayer};

use crate::{auth::AdminKey, state::AppState};

pub mod assets;
pub mod collections;
pub mod cors;
pub mod documents;
pub mod health;
pub mod search;
pub mod sessions;
pub mod sites;
pub mod stats;
pub mod widget;

/// Upper bound on request bodies, uploads included.
pub const MAX_BODY_BYTES: usize = 100 * 1024 * 1024;

pub fn create_router(state: AppState) -> Router<()> {
    let collections_routes = Router::new()
        .route(
            "/",
            get(collections::list_collections).post(collections::create_collection),
        )
        .route(
            "/:id",
            get(collections::get_collection)
                .put(collections::update_collection)
                .delete(collections::delete_collection),
        )
        .route(
            "/:id/documents",
            get(documents::list_documents).post(documents::upload_document),
        );

    let documents_routes = Router::new().route(
        "/:id",
        get(documents::get_document).delete(documents::delete_document),
    );

    let sites_routes = Router::new()
        .route("/", get(sites::list_sites).post(sites::create_site))
        .route(
            "/:id",
            get(sites::get_site)
                .put(sites::update_site)
                .delete(sites::delete_site),
        );

    let admin_routes = Router::new()
        .nest("/collections", collections_routes)
        .nest("/documents", documents_routes)
        .nest("/sites", sites_routes)
        .route("/stats", get(stats::get_stats))
        .route("/sessions/:id/messages", get(sessions::list_messages))
        .route("/search", get(search::search))
        .layer(middleware::from_extractor_with_state::<AdminKey, _>(
            state.clone(),
        ));

    let widget_routes = Router::new()
        .route("/config/:site_id", get(widget::get_config))
        .route("/chat/:site_id", post(widget::chat))
        .route("/chat/:site_id/stream", post(widget::chat_stream));

    let admin_ui = ServeDir::new(state.config.static_dir.join("admin"));

    Router::new()
        .nest("/api/admin", admin_routes)
        .nest("/api/widget", widget_routes)
        .route("/health", get(health::health_check))
        .route("/sdk.js", get(assets::sdk_js))
        .nest_service("/admin", admin_ui)
        .with_state(state.clone())
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(state, cors::cors))
}
