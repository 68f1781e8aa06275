//! Credit event handlers: lookups, note updates and the listings.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use agent_ledger_core::{
    AgentId, CreditEvent, Direction, EventId, EventType, Order, OwnerId, Page, PageRequest,
};
use agent_ledger_store::EventFilter;

use crate::auth::AdminAuth;
use crate::error::ApiError;
use crate::handlers::{parse_id, PageQuery};
use crate::state::AppState;

/// Query of the per-user listings.
#[derive(Debug, Deserialize)]
pub struct UserEventsQuery {
    /// Only events of this type.
    pub event_type: Option<EventType>,
    /// Id of the last item seen.
    pub cursor: Option<String>,
    /// Maximum number of items.
    pub limit: Option<usize>,
}

impl UserEventsQuery {
    fn split(self, direction: Option<Direction>) -> (EventFilter, PageRequest) {
        let filter = EventFilter {
            direction,
            event_type: self.event_type,
            ..EventFilter::default()
        };
        let page = PageQuery {
            cursor: self.cursor,
            limit: self.limit,
        };
        (filter, page.into_request())
    }
}

/// Query of the global event feed.
#[derive(Debug, Deserialize)]
pub struct FeedQuery {
    /// Only events with this direction; `expense` when omitted.
    #[serde(default = "expense")]
    pub direction: Direction,
    /// Only events of this type.
    pub event_type: Option<EventType>,
    /// Inclusive lower bound on `created_at`.
    pub start_at: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub end_at: Option<DateTime<Utc>>,
    /// `desc` (default) or `asc` for polling consumers.
    #[serde(default)]
    pub order: Order,
    /// Id of the last item seen.
    pub cursor: Option<String>,
    /// Maximum number of items.
    pub limit: Option<usize>,
}

const fn expense() -> Direction {
    Direction::Expense
}

/// Lookup by idempotency key.
#[derive(Debug, Deserialize)]
pub struct UpstreamQuery {
    /// Upstream transaction ID.
    pub upstream_tx_id: String,
}

/// Optional ownership check.
#[derive(Debug, Default, Deserialize)]
pub struct OwnerQuery {
    /// When set, the event must belong to this user.
    pub user_id: Option<String>,
}

/// Note update request.
#[derive(Debug, Deserialize)]
pub struct UpdateEventNoteRequest {
    /// New note; `null` clears it.
    #[serde(default)]
    pub note: Option<String>,
    /// When set, the event must belong to this user.
    #[serde(default)]
    pub user_id: Option<String>,
}

fn claimed_owner(user_id: Option<&str>) -> Result<Option<OwnerId>, ApiError> {
    user_id
        .filter(|id| !id.is_empty())
        .map(parse_id::<OwnerId>)
        .transpose()
}

async fn list_user(
    state: &AppState,
    user_id: &str,
    filter: EventFilter,
    page: PageRequest,
) -> Result<Json<Page<CreditEvent>>, ApiError> {
    let user_id: OwnerId = parse_id(user_id)?;
    let events = state
        .run(move |ledger| ledger.list_credit_events_by_user(&user_id, filter, &page))
        .await?;
    Ok(Json(events))
}

/// All events of a user.
pub async fn list_user_events(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(user_id): Path<String>,
    Query(query): Query<UserEventsQuery>,
) -> Result<Json<Page<CreditEvent>>, ApiError> {
    let (filter, page) = query.split(None);
    list_user(&state, &user_id, filter, page).await
}

/// Expense events of a user.
pub async fn list_user_expense_events(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(user_id): Path<String>,
    Query(query): Query<UserEventsQuery>,
) -> Result<Json<Page<CreditEvent>>, ApiError> {
    let (filter, page) = query.split(Some(Direction::Expense));
    list_user(&state, &user_id, filter, page).await
}

/// Income events of a user.
pub async fn list_user_income_events(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(user_id): Path<String>,
    Query(query): Query<UserEventsQuery>,
) -> Result<Json<Page<CreditEvent>>, ApiError> {
    let (filter, page) = query.split(Some(Direction::Income));
    list_user(&state, &user_id, filter, page).await
}

/// Events that paid an agent a fee.
pub async fn list_agent_income_events(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(agent_id): Path<String>,
    Query(query): Query<PageQuery>,
) -> Result<Json<Page<CreditEvent>>, ApiError> {
    let agent_id: AgentId = parse_id(&agent_id)?;
    let page = query.into_request();
    let events = state
        .run(move |ledger| {
            ledger.list_fee_events_by_agent(&agent_id, EventFilter::default(), &page)
        })
        .await?;
    Ok(Json(events))
}

/// The global event feed.
///
/// An empty page still carries the caller's cursor, so a consumer can keep polling with
/// `order=asc` and pick up new events as they are written.
pub async fn list_events(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<FeedQuery>,
) -> Result<Json<Page<CreditEvent>>, ApiError> {
    let filter = EventFilter {
        direction: Some(query.direction),
        event_type: query.event_type,
        start_at: query.start_at,
        end_at: query.end_at,
    };
    let order = query.order;
    let page = PageQuery {
        cursor: query.cursor,
        limit: query.limit,
    }
    .into_request();

    let events = state
        .run(move |ledger| ledger.list_credit_events(filter, order, &page))
        .await?;
    Ok(Json(events))
}

/// Event by idempotency key.
pub async fn fetch_event_by_upstream_tx_id(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Query(query): Query<UpstreamQuery>,
) -> Result<Json<CreditEvent>, ApiError> {
    let event = state
        .run(move |ledger| ledger.fetch_event_by_upstream_tx_id(&query.upstream_tx_id))
        .await?;
    Ok(Json(event))
}

/// Event by id, optionally checked against a user.
pub async fn fetch_event(
    State(state): State<Arc<AppState>>,
    _admin: AdminAuth,
    Path(event_id): Path<String>,
    Query(query): Query<OwnerQuery>,
) -> Result<Json<CreditEvent>, ApiError> {
    let event_id: EventId = parse_id(&event_id)?;
    let claimed = claimed_owner(query.user_id.as_deref())?;

    let event = state
        .run(move |ledger| ledger.fetch_event_by_id(&event_id, claimed.as_ref()))
        .await?;
    Ok(Json(event))
}

/// Replace the note of an event.
pub async fn update_event_note(
    State(state): State<Arc<AppState>>,
    admin: AdminAuth,
    Path(event_id): Path<String>,
    Json(body): Json<UpdateEventNoteRequest>,
) -> Result<Json<CreditEvent>, ApiError> {
    let event_id: EventId = parse_id(&event_id)?;
    let claimed = claimed_owner(body.user_id.as_deref())?;

    let event = state
        .run(move |ledger| ledger.update_event_note(&event_id, body.note, claimed.as_ref()))
        .await?;

    tracing::info!(admin_id = %admin.admin_id, event_id = %event.id, "Event note changed");
    Ok(Json(event))
}
