use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::Utc;
use tracing::info;
use uuid::Uuid;

use lumo_types::api::{Claims, CreateOrderRequest};
use lumo_types::models::{Order, OrderStatus, Role};

use crate::error::ApiError;
use crate::profiles::load_user;
use crate::state::{AppState, run_db};

const MAX_TITLE: usize = 200;
const MAX_DESCRIPTION: usize = 5000;

pub async fn create_order(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<impl IntoResponse, ApiError> {
    if claims.role != Role::Brand {
        return Err(ApiError::Forbidden("only brands can place orders".into()));
    }

    let title = req.title.trim().to_string();
    if title.is_empty() || title.chars().count() > MAX_TITLE {
        return Err(ApiError::BadRequest("title must be 1-200 characters".into()));
    }
    let description = req.description.trim().to_string();
    if description.chars().count() > MAX_DESCRIPTION {
        return Err(ApiError::BadRequest("description is too long".into()));
    }
    if req.amount_cents <= 0 {
        return Err(ApiError::BadRequest("amount_cents must be positive".into()));
    }
    let currency = req.currency.trim();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ApiError::BadRequest("currency must be a 3-letter code".into()));
    }

    match load_user(&state, req.creator_id).await? {
        Some(p) if p.role == Role::Creator => {}
        Some(_) => return Err(ApiError::BadRequest("orders must target a creator".into())),
        None => return Err(ApiError::NotFound("creator not found".into())),
    }

    let now = Utc::now();
    let order = Order {
        id: Uuid::new_v4(),
        brand_id: claims.sub,
        creator_id: req.creator_id,
        title,
        description,
        amount_cents: req.amount_cents,
        currency: currency.to_ascii_uppercase(),
        status: OrderStatus::Pending,
        created_at: now,
        updated_at: now,
    };

    let stored = order.clone();
    run_db(&state, move |db| db.insert_order(&stored)).await?;

    info!("Order {} placed by {} for {}", order.id, claims.username, order.creator_id);
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let (user_id, role) = (claims.sub, claims.role);
    let orders = run_db(&state, move |db| db.list_orders_for(user_id, role)).await?;
    Ok(Json(orders))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(load_order_for(&state, order_id, &claims).await?))
}

pub async fn accept_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let order = load_order_for(&state, order_id, &claims).await?;
    if order.creator_id != claims.sub {
        return Err(ApiError::Forbidden("only the creator can accept".into()));
    }
    transition(&state, order_id, OrderStatus::InProgress, &claims).await
}

pub async fn complete_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    let order = load_order_for(&state, order_id, &claims).await?;
    if order.brand_id != claims.sub {
        return Err(ApiError::Forbidden("only the brand can complete".into()));
    }
    transition(&state, order_id, OrderStatus::Completed, &claims).await
}

pub async fn cancel_order(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    load_order_for(&state, order_id, &claims).await?;
    transition(&state, order_id, OrderStatus::Cancelled, &claims).await
}

async fn transition(
    state: &AppState,
    order_id: Uuid,
    next: OrderStatus,
    claims: &Claims,
) -> Result<Json<Order>, ApiError> {
    let order = run_db(state, move |db| db.set_order_status(order_id, next)).await?;
    info!("Order {} -> {} by {}", order_id, next, claims.username);
    Ok(Json(order))
}

/// Orders are invisible to anyone but their brand and creator.
pub(crate) async fn load_order_for(
    state: &AppState,
    order_id: Uuid,
    claims: &Claims,
) -> Result<Order, ApiError> {
    let order = run_db(state, move |db| db.get_order(order_id)).await?;
    match order {
        Some(o) if o.is_participant(claims.sub) => Ok(o),
        _ => Err(ApiError::NotFound("order not found".into())),
    }
}
