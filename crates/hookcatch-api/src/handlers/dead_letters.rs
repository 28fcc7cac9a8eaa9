//! Admin view of dead-lettered deliveries.

use axum::{
    extract::{Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use hookcatch_core::{DeadLetterId, DeadLetterRecord, DeliveryId};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use super::{
    deliveries::{page_request, DeliverySummary, PageMeta, PageParams},
    ApiError,
};
use crate::AppState;

/// One dead letter with its delivery.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeadLetterView {
    /// Dead letter identifier.
    pub id: DeadLetterId,
    /// Owning delivery.
    pub webhook_delivery_id: DeliveryId,
    /// Error class of the final failure.
    pub error_class: String,
    /// Message of the final failure.
    pub error_message: String,
    /// Bounded trace.
    pub backtrace: Option<String>,
    /// When the delivery died.
    pub failed_at: DateTime<Utc>,
    /// Delivery summary.
    pub delivery: DeliverySummary,
}

impl From<&DeadLetterRecord> for DeadLetterView {
    fn from(record: &DeadLetterRecord) -> Self {
        let dead_letter = &record.dead_letter;
        Self {
            id: dead_letter.id,
            webhook_delivery_id: dead_letter.webhook_delivery_id,
            error_class: dead_letter.error_class.clone(),
            error_message: dead_letter.error_message.clone(),
            backtrace: dead_letter.backtrace.clone(),
            failed_at: dead_letter.failed_at,
            delivery: DeliverySummary::from(&record.delivery),
        }
    }
}

/// Body of `GET /webhooks/dead_letters`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeadLetterList {
    /// Dead letters, most recent failure first.
    pub dead_letters: Vec<DeadLetterView>,
    /// Pagination.
    pub meta: PageMeta,
}

/// `GET /webhooks/dead_letters`.
#[instrument(name = "list_dead_letters", skip(state))]
pub async fn list_dead_letters(
    State(state): State<AppState>,
    Query(params): Query<PageParams>,
) -> Result<Json<DeadLetterList>, ApiError> {
    let page = state.store.list_dead_letters(page_request(params.page.as_deref())).await?;

    Ok(Json(DeadLetterList {
        meta: PageMeta::from(&page),
        dead_letters: page.items.iter().map(DeadLetterView::from).collect(),
    }))
}
