//! Admin endpoints for inspecting and replaying deliveries.

use std::collections::HashMap;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use chrono::{DateTime, Utc};
use hookcatch_core::{
    CoreError, Delivery, DeliveryFilter, DeliveryId, DeliveryStatus, HookCatchError, Page,
    PageRequest, ProviderKind, PER_PAGE,
};
use hookcatch_delivery::DeliveryError;
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use super::ApiError;
use crate::AppState;

/// Query string for `GET /webhooks/deliveries`.
///
/// Empty values behave as absent; an unparseable `page` means page 1.
#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    /// Provider key filter.
    pub provider: Option<String>,
    /// Status filter.
    pub status: Option<String>,
    /// 1-based page number.
    pub page: Option<String>,
}

impl ListParams {
    fn filter(&self) -> Result<DeliveryFilter, HookCatchError> {
        let provider = present(self.provider.as_deref())
            .map(|value| {
                value.parse::<ProviderKind>().map_err(|_| HookCatchError::InvalidQuery {
                    reason: format!("Unknown provider filter: {value}"),
                })
            })
            .transpose()?;

        let status = present(self.status.as_deref())
            .map(|value| {
                value.parse::<DeliveryStatus>().map_err(|_| HookCatchError::InvalidQuery {
                    reason: format!("Unknown status filter: {value}"),
                })
            })
            .transpose()?;

        Ok(DeliveryFilter { provider, status })
    }
}

/// Query string carrying only a page number.
#[derive(Debug, Default, Deserialize)]
pub struct PageParams {
    /// 1-based page number.
    pub page: Option<String>,
}

fn present(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|value| !value.is_empty())
}

pub(crate) fn page_request(page: Option<&str>) -> PageRequest {
    PageRequest::new(present(page).and_then(|page| page.parse().ok()).unwrap_or(1))
}

/// Delivery fields shown in listings.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliverySummary {
    /// Internal identifier.
    pub id: DeliveryId,
    /// Source provider.
    pub provider: ProviderKind,
    /// Provider-assigned identifier.
    pub delivery_id: String,
    /// Event type.
    pub event_type: String,
    /// Lifecycle status.
    pub status: DeliveryStatus,
    /// Attempts started.
    pub attempts: i32,
    /// Last failure.
    pub error_message: Option<String>,
    /// Completion time.
    pub processed_at: Option<DateTime<Utc>>,
    /// Intake time.
    pub created_at: DateTime<Utc>,
}

impl From<&Delivery> for DeliverySummary {
    fn from(delivery: &Delivery) -> Self {
        Self {
            id: delivery.id,
            provider: delivery.provider,
            delivery_id: delivery.delivery_id.clone(),
            event_type: delivery.event_type.clone(),
            status: delivery.status,
            attempts: delivery.attempts,
            error_message: delivery.error_message.clone(),
            processed_at: delivery.processed_at,
            created_at: delivery.created_at,
        }
    }
}

/// Summary plus stored payload and headers.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryDetail {
    /// Listing fields.
    #[serde(flatten)]
    pub summary: DeliverySummary,
    /// Parsed request body.
    pub payload: serde_json::Value,
    /// Stored request headers.
    pub headers: HashMap<String, String>,
}

/// Pagination block of list responses.
#[derive(Debug, Serialize, Deserialize)]
pub struct PageMeta {
    /// 1-based page returned.
    pub current_page: u32,
    /// Matching rows across all pages.
    pub total_count: i64,
    /// Page size.
    pub per_page: u32,
}

impl<T> From<&Page<T>> for PageMeta {
    fn from(page: &Page<T>) -> Self {
        Self { current_page: page.current_page, total_count: page.total_count, per_page: PER_PAGE }
    }
}

/// Body of `GET /webhooks/deliveries`.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeliveryList {
    /// Deliveries on this page, newest first.
    pub deliveries: Vec<DeliverySummary>,
    /// Pagination.
    pub meta: PageMeta,
}

/// Body of a successful replay.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplayResponse {
    /// Always `"replayed"`.
    pub status: String,
    /// Provider-assigned identifier.
    pub delivery_id: String,
}

/// `GET /webhooks/deliveries`.
///
/// # Errors
///
/// Returns 400 for an unknown `provider` or `status` filter.
#[instrument(name = "list_deliveries", skip(state))]
pub async fn list_deliveries(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<DeliveryList>, ApiError> {
    let filter = params.filter()?;
    let page = state.store.list_deliveries(filter, page_request(params.page.as_deref())).await?;

    Ok(Json(DeliveryList {
        meta: PageMeta::from(&page),
        deliveries: page.items.iter().map(DeliverySummary::from).collect(),
    }))
}

/// `GET /webhooks/deliveries/{id}`.
///
/// # Errors
///
/// Returns 404 when no delivery has that id, including ids that are not
/// UUIDs.
#[instrument(name = "show_delivery", skip(state))]
pub async fn show_delivery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<DeliveryDetail>, ApiError> {
    let delivery_id: DeliveryId = id.parse()?;
    let delivery = state
        .store
        .find_delivery(delivery_id)
        .await?
        .ok_or_else(|| HookCatchError::delivery_not_found(&id))?;

    Ok(Json(DeliveryDetail {
        summary: DeliverySummary::from(&delivery),
        payload: delivery.payload.0,
        headers: delivery.headers.0,
    }))
}

/// `POST /webhooks/deliveries/{id}/replay`.
///
/// Resets the delivery to `pending` with zero attempts and queues it. Works
/// from any status. Replaying an in-flight delivery revokes the running
/// attempt: its handler may still be executing, but whatever it returns is
/// discarded and the row follows only the replayed attempt.
///
/// # Errors
///
/// Returns 404 for an unknown id, 503 if the queue rejects the job.
#[instrument(name = "replay_delivery", skip(state))]
pub async fn replay_delivery(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ReplayResponse>, ApiError> {
    let delivery_id: DeliveryId = id.parse()?;
    let delivery = state.scheduler.replay(delivery_id).await.map_err(|err| match err {
        DeliveryError::NotFound { .. } => HookCatchError::delivery_not_found(&id),
        DeliveryError::Queue { message } => HookCatchError::QueueUnavailable(message),
        other => HookCatchError::Database(CoreError::Database(other.to_string())),
    })?;

    info!(id = %delivery.id, delivery_id = %delivery.delivery_id, "operator replay");
    Ok(Json(ReplayResponse { status: "replayed".to_string(), delivery_id: delivery.delivery_id }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_filters_are_ignored() {
        let params = ListParams {
            provider: Some(String::new()),
            status: Some("  ".into()),
            page: Some(String::new()),
        };
        let filter = params.filter().unwrap();
        assert!(filter.provider.is_none());
        assert!(filter.status.is_none());
        assert_eq!(page_request(params.page.as_deref()).page(), 1);
    }

    #[test]
    fn filters_parse_known_values() {
        let params = ListParams {
            provider: Some("stripe".into()),
            status: Some("dead".into()),
            page: Some("3".into()),
        };
        let filter = params.filter().unwrap();
        assert_eq!(filter.provider, Some(ProviderKind::Stripe));
        assert_eq!(filter.status, Some(DeliveryStatus::Dead));
        assert_eq!(page_request(params.page.as_deref()).page(), 3);
    }

    #[test]
    fn unknown_filter_is_invalid_query() {
        let params = ListParams { status: Some("exploded".into()), ..ListParams::default() };
        let err = params.filter().unwrap_err();
        assert_eq!(err.code(), "E1006");
        assert_eq!(err.to_string(), "Unknown status filter: exploded");
    }

    #[test]
    fn garbage_page_means_first_page() {
        assert_eq!(page_request(Some("abc")).page(), 1);
        assert_eq!(page_request(Some("0")).page(), 1);
        assert_eq!(page_request(None).page(), 1);
    }
}
