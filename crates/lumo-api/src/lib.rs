pub mod auth;
pub mod conversations;
pub mod deliveries;
pub mod error;
pub mod files;
pub mod intake;
pub mod messages;
pub mod middleware;
pub mod orders;
pub mod profiles;
pub mod state;

use axum::{
    Router,
    extract::DefaultBodyLimit,
    middleware::from_fn_with_state,
    routing::{get, post},
};

use crate::deliveries::MAX_FILES_PER_DELIVERY;
use crate::middleware::require_auth;
use crate::state::AppState;

/// Room for multipart boundaries and the text fields of a delivery.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

/// All HTTP routes. Logging and CORS layers are added by the binary.
pub fn router(state: AppState) -> Router {
    let delivery_limit = usize::try_from(state.max_file_bytes)
        .unwrap_or(usize::MAX)
        .saturating_mul(MAX_FILES_PER_DELIVERY)
        .saturating_add(MULTIPART_OVERHEAD);

    let public_routes = Router::new()
        .route("/health", get(health))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/waitlist", post(intake::waitlist_form))
        .route("/signup", post(intake::signup_form))
        .route("/api/waitlist", post(intake::waitlist_json))
        .route("/api/signup", post(intake::signup_json));

    let protected_routes = Router::new()
        .route("/me", get(profiles::get_me).put(profiles::update_me))
        .route(
            "/conversations",
            get(conversations::list_conversations).post(conversations::start_conversation),
        )
        .route(
            "/conversations/{conversation_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/orders", get(orders::list_orders).post(orders::create_order))
        .route("/orders/{order_id}", get(orders::get_order))
        .route("/orders/{order_id}/accept", post(orders::accept_order))
        .route("/orders/{order_id}/complete", post(orders::complete_order))
        .route("/orders/{order_id}/cancel", post(orders::cancel_order))
        .route(
            "/orders/{order_id}/delivery",
            get(deliveries::get_delivery)
                .post(deliveries::submit_delivery)
                .layer(DefaultBodyLimit::max(delivery_limit)),
        )
        .route("/files/{*key}", get(files::download_file))
        .layer(from_fn_with_state(state.clone(), require_auth));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}
