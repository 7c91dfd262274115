use axum::routing::{delete, get, post};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::routes::{collections, health, history, logs, runs};
use crate::state::SharedState;

pub fn build_router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        // Health
        .route("/health", get(health::health))
        // Runs
        .route("/api/runs", post(runs::submit_run))
        .route("/api/runs/{run_id}/{kind}", get(runs::poll_result))
        .route("/api/workers", get(runs::list_workers))
        .route(
            "/api/recent-urls",
            get(runs::recent_urls).delete(runs::clear_recent_urls),
        )
        // History
        .route(
            "/api/history",
            get(history::list_history)
                .post(history::save_history)
                .delete(history::clear_history),
        )
        .route("/api/history/export", get(history::export_history))
        .route("/api/history/import", post(history::import_history))
        .route("/api/history/prune", post(history::prune_history))
        .route("/api/history/{id}", delete(history::delete_history_item))
        // API tester
        .route(
            "/api/collections",
            get(collections::list_collections).post(collections::create_collection),
        )
        .route(
            "/api/collections/{id}",
            delete(collections::delete_collection),
        )
        .route("/api/collections/{id}/items", post(collections::add_item))
        .route(
            "/api/collections/{id}/items/{item_id}",
            delete(collections::remove_item),
        )
        .route("/api/requests/send", post(collections::send_request))
        // Logs
        .route("/logs/history", get(logs::log_history))
        .route("/logs/stream", get(logs::log_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CatchPanicLayer::new())
        .layer(cors)
        .with_state(state)
}
