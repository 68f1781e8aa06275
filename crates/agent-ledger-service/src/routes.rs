//! Router configuration.
//!
//! This module sets up the Axum router with all routes and middleware.

use std::sync::Arc;
use std::time::Duration;

use axum::routing::{get, post, put};
use axum::Router;
use tower::limit::ConcurrencyLimitLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::handlers::{accounts, events, health, skills, spend, transactions};
use crate::state::AppState;

/// Maximum concurrent requests for the billing hook and skill admission.
/// Agent runtimes call these on every paid action.
const SERVICE_MAX_CONCURRENT_REQUESTS: usize = 100;

/// Maximum concurrent requests for the admin credit API.
const ADMIN_MAX_CONCURRENT_REQUESTS: usize = 50;

/// Create the service router with all routes and middleware.
///
/// # Routes
///
/// ## Public
/// - `GET /health` - Health check
///
/// ## Credit admin (admin bearer token when enabled)
/// - `GET /v1/credit/accounts/:owner_type/:owner_id` - Get or create an account
/// - `POST /v1/credit/recharge` - Add purchased credits
/// - `POST /v1/credit/reward` - Add reward credits
/// - `PUT /v1/credit/users/:user_id/daily-quota` - Change quota and refill
/// - `POST /v1/credit/refill` - Refill free credits for the current hour
/// - `GET /v1/credit/agents/:agent_id/statistics` - Agent income statistics
/// - `GET /v1/credit/users/:user_id/events` - A user's events
/// - `GET /v1/credit/event/users/:user_id/expense` - A user's expense events
/// - `GET /v1/credit/event/users/:user_id/income` - A user's income events
/// - `GET /v1/credit/event/agents/:agent_id/income` - Events that paid an agent
/// - `GET /v1/credit/transactions` - A user's postings
/// - `GET /v1/credit/event` - Event by upstream transaction id
/// - `GET /v1/credit/events/:event_id` - Event by id
/// - `PATCH /v1/credit/events/:event_id` - Change an event note
/// - `GET /v1/credit/events` - Event feed
///
/// ## Service (API key auth)
/// - `POST /v1/credit/spend` - Bill a paid agent action
/// - `POST /v1/skills/admit` - Skill admission and rate limiting
pub fn create_router(state: AppState) -> Router {
    let cors_origins = state.config.cors_origins.clone();
    let max_body_bytes = state.config.max_body_bytes;
    let request_timeout_seconds = state.config.request_timeout_seconds;

    let cors = build_cors_layer(&cors_origins);

    let state = Arc::new(state);

    let service_routes = Router::new()
        .route("/v1/credit/spend", post(spend::spend))
        .route("/v1/skills/admit", post(skills::admit_skill))
        .layer(ConcurrencyLimitLayer::new(SERVICE_MAX_CONCURRENT_REQUESTS));

    let credit_routes = Router::new()
        // Accounts
        .route(
            "/accounts/:owner_type/:owner_id",
            get(accounts::get_account),
        )
        .route(
            "/users/:user_id/daily-quota",
            put(accounts::update_daily_quota),
        )
        .route(
            "/agents/:agent_id/statistics",
            get(accounts::agent_statistics),
        )
        .route("/recharge", post(accounts::recharge))
        .route("/reward", post(accounts::reward))
        .route("/refill", post(accounts::refill))
        // Events
        .route("/users/:user_id/events", get(events::list_user_events))
        .route(
            "/event/users/:user_id/expense",
            get(events::list_user_expense_events),
        )
        .route(
            "/event/users/:user_id/income",
            get(events::list_user_income_events),
        )
        .route(
            "/event/agents/:agent_id/income",
            get(events::list_agent_income_events),
        )
        .route("/event", get(events::fetch_event_by_upstream_tx_id))
        .route("/events", get(events::list_events))
        .route(
            "/events/:event_id",
            get(events::fetch_event).patch(events::update_event_note),
        )
        // Transactions
        .route("/transactions", get(transactions::list_transactions))
        .layer(ConcurrencyLimitLayer::new(ADMIN_MAX_CONCURRENT_REQUESTS));

    Router::new()
        .route("/health", get(health::health))
        .nest("/v1/credit", credit_routes)
        .merge(service_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(RequestBodyLimitLayer::new(max_body_bytes))
        .layer(TimeoutLayer::new(Duration::from_secs(
            request_timeout_seconds,
        )))
        .with_state(state)
}

/// Build the CORS layer from configured origins.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    if origins.iter().any(|o| o == "*") {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        let origins: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();

        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods(Any)
            .allow_headers(Any)
    }
}
