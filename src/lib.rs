pub mod api;
pub mod app_state;
pub mod config;
pub mod db;
pub mod middleware;
pub mod utils;
pub mod workflow;

use axum::{middleware::from_fn_with_state, Router};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa_rapidoc::RapiDoc;
use utoipa_swagger_ui::SwaggerUi;

use crate::app_state::AppState;
use crate::middleware::auth::jwt_middleware;

/// The full HTTP surface: public health checks and API docs, everything else
/// behind bearer authentication.
pub fn app(state: AppState) -> Router {
    let merged_doc = api::openapi();

    let private_routes = Router::new()
        .merge(api::requests::request_routes())
        .merge(api::settings::settings_routes())
        .merge(api::events::event_routes())
        .route_layer(from_fn_with_state(state.clone(), jwt_middleware));

    Router::new()
        .merge(api::health::health_routes())
        .merge(private_routes)
        .with_state(state)
        .merge(SwaggerUi::new("/swagger").url("/api-docs/openapi.json", merged_doc.clone()))
        .merge(RapiDoc::with_openapi("/api-docs/rapidoc.json", merged_doc).path("/rapidoc"))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
