use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Multipart, Path, State, multipart::MultipartError},
    http::StatusCode,
    response::IntoResponse,
};
use bytes::BytesMut;
use chrono::Utc;
use tracing::{debug, info};
use uuid::Uuid;

use lumo_storage::{PendingUpload, ProgressCallback, UploadProgress};
use lumo_types::api::Claims;
use lumo_types::models::{Delivery, OrderStatus};

use crate::error::ApiError;
use crate::orders::load_order_for;
use crate::state::{AppState, run_db};

pub const MAX_FILES_PER_DELIVERY: usize = 20;
const MAX_NOTE: usize = 5000;
const MAX_LINKS: usize = 20;

/// Parsed multipart body of a delivery submission.
struct DeliveryForm {
    files: Vec<PendingUpload>,
    note: Option<String>,
    links: Vec<String>,
}

/// POST /orders/{order_id}/delivery: upload the files, then record the
/// delivery and mark the order delivered in one transaction.
pub async fn submit_delivery(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    multipart: Multipart,
) -> Result<impl IntoResponse, ApiError> {
    let order = load_order_for(&state, order_id, &claims).await?;
    if order.creator_id != claims.sub {
        return Err(ApiError::Forbidden("only the creator can deliver".into()));
    }
    if !matches!(order.status, OrderStatus::InProgress | OrderStatus::Delivered) {
        return Err(ApiError::Conflict(format!(
            "cannot deliver an order that is {}",
            order.status
        )));
    }

    let form = read_form(multipart, state.max_file_bytes).await?;
    if form.files.is_empty() {
        return Err(ApiError::BadRequest("at least one file is required".into()));
    }

    let on_progress: ProgressCallback = Arc::new(move |p: UploadProgress| {
        debug!(
            "Delivery {} file {} ({}): {:.0}%",
            order_id,
            p.index,
            p.name,
            p.fraction() * 100.0
        );
    });
    let cancel = state.shutdown.child_token();
    let files = state
        .uploads
        .upload_all(&format!("deliveries/{}", order_id), form.files, &cancel, on_progress)
        .await?;

    let delivery = Delivery {
        order_id,
        files,
        note: form.note,
        links: form.links,
        delivered_at: Utc::now(),
        status: OrderStatus::Delivered,
    };
    let stored = delivery.clone();
    run_db(&state, move |db| db.commit_delivery(&stored)).await?;

    info!(
        "Order {} delivered by {} ({} files)",
        order_id,
        claims.username,
        delivery.files.len()
    );
    Ok((StatusCode::CREATED, Json(delivery)))
}

pub async fn get_delivery(
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<impl IntoResponse, ApiError> {
    load_order_for(&state, order_id, &claims).await?;
    let delivery = run_db(&state, move |db| db.get_delivery(order_id))
        .await?
        .ok_or_else(|| ApiError::NotFound("no delivery yet".into()))?;
    Ok(Json(delivery))
}

async fn read_form(mut multipart: Multipart, max_file_bytes: u64) -> Result<DeliveryForm, ApiError> {
    let mut form = DeliveryForm {
        files: Vec::new(),
        note: None,
        links: Vec::new(),
    };

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("files") => {
                if form.files.len() == MAX_FILES_PER_DELIVERY {
                    return Err(ApiError::BadRequest("too many files".into()));
                }
                let name = field.file_name().unwrap_or("file").to_string();
                let content_type = field
                    .content_type()
                    .unwrap_or("application/octet-stream")
                    .to_string();

                let mut data = BytesMut::new();
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    if (data.len() + chunk.len()) as u64 > max_file_bytes {
                        return Err(ApiError::PayloadTooLarge(format!("{} is too large", name)));
                    }
                    data.extend_from_slice(&chunk);
                }

                form.files.push(PendingUpload {
                    name,
                    content_type,
                    data: data.freeze(),
                });
            }
            Some("note") => {
                let note = field.text().await.map_err(multipart_error)?.trim().to_string();
                if note.chars().count() > MAX_NOTE {
                    return Err(ApiError::BadRequest("note is too long".into()));
                }
                form.note = (!note.is_empty()).then_some(note);
            }
            Some("links") => {
                let link = field.text().await.map_err(multipart_error)?.trim().to_string();
                if link.is_empty() {
                    continue;
                }
                if !(link.starts_with("https://") || link.starts_with("http://")) {
                    return Err(ApiError::BadRequest("links must be http(s) URLs".into()));
                }
                if form.links.len() == MAX_LINKS {
                    return Err(ApiError::BadRequest("too many links".into()));
                }
                form.links.push(link);
            }
            _ => {}
        }
    }

    Ok(form)
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(e.body_text())
    }
}
