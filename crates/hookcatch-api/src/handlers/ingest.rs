//! Webhook intake endpoint.

use axum::{
    extract::{Path, State},
    http::HeaderMap,
    Json,
};
use bytes::Bytes;
use tracing::instrument;

use super::ApiError;
use crate::{intake::IntakeOutcome, AppState};

/// `POST /webhooks/{provider}`.
///
/// Unauthenticated: the provider signature is the credential. The body is
/// taken as raw bytes so verification sees exactly what was signed.
///
/// # Errors
///
/// - 404: unknown provider
/// - 401: signature rejected
/// - 400: body is not JSON
/// - 500: store failure
#[instrument(
    name = "receive_webhook",
    skip(state, headers, body),
    fields(
        provider = %provider,
        content_length = body.len(),
    )
)]
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<IntakeOutcome>, ApiError> {
    let outcome = state.intake.receive(&provider, &body, &headers).await?;
    Ok(Json(outcome))
}
