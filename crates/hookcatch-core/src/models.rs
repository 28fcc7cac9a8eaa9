//! Domain models and strongly-typed identifiers.
//!
//! A [`Delivery`] is one accepted webhook tracked from intake through its
//! processing lifecycle. A [`DeadLetter`] is the permanent failure record
//! attached to a delivery that exhausted its attempts.

use std::{collections::HashMap, fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::types::Json;
use uuid::Uuid;

use crate::error::{CoreError, HookCatchError};

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Deliveries returned per page by list queries.
pub const PER_PAGE: u32 = 25;

/// Primary key of a stored delivery.
///
/// Distinct from the provider-assigned `delivery_id` string, which is the
/// idempotency key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DeliveryId(pub Uuid);

impl DeliveryId {
    /// Creates a new random delivery ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeliveryId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeliveryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for DeliveryId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl FromStr for DeliveryId {
    type Err = HookCatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self).map_err(|_| HookCatchError::delivery_not_found(s))
    }
}

impl sqlx::Type<PgDb> for DeliveryId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for DeliveryId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Primary key of a dead letter record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeadLetterId(pub Uuid);

impl DeadLetterId {
    /// Creates a new random dead letter ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for DeadLetterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for DeadLetterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl sqlx::Type<PgDb> for DeadLetterId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeadLetterId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for DeadLetterId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Webhook source.
///
/// Closed set: adding a provider means adding a variant here and a registry
/// entry in the intake layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// GitHub repository and organisation webhooks.
    GitHub,
    /// Stripe event notifications.
    Stripe,
    /// Any sender using the plain `sha256=` HMAC scheme.
    Generic,
}

impl ProviderKind {
    /// All supported providers.
    pub const ALL: [Self; 3] = [Self::GitHub, Self::Stripe, Self::Generic];

    /// Path and storage key.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::GitHub => "github",
            Self::Stripe => "stripe",
            Self::Generic => "generic",
        }
    }
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = HookCatchError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| HookCatchError::UnknownProvider { provider: s.to_string() })
    }
}

impl sqlx::Type<PgDb> for ProviderKind {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for ProviderKind {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(|_| format!("invalid provider: {s}").into())
    }
}

/// Processing status of a delivery.
///
/// ```text
/// pending ──▶ processing ──▶ completed
///                 │
///                 ├──▶ failed ──▶ processing (after backoff)
///                 └──▶ dead
/// ```
///
/// `completed` and `dead` are terminal; only an operator replay moves a
/// delivery out of them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Accepted and waiting for its first attempt.
    Pending,
    /// A worker is running an attempt.
    Processing,
    /// Handler succeeded.
    Completed,
    /// Last attempt failed; another is scheduled.
    Failed,
    /// Attempts exhausted; a dead letter exists.
    Dead,
}

impl DeliveryStatus {
    /// Whether automatic processing must leave this delivery alone.
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Dead)
    }

    /// Storage key.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Dead => "dead",
        }
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeliveryStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "dead" => Ok(Self::Dead),
            _ => Err(CoreError::InvalidInput(format!("invalid delivery status: {s}"))),
        }
    }
}

impl sqlx::Type<PgDb> for DeliveryStatus {
    fn type_info() -> PgTypeInfo {
        <&str as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for DeliveryStatus {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let s = <&str as sqlx::Decode<PgDb>>::decode(value)?;
        s.parse().map_err(|err: CoreError| err.to_string().into())
    }
}

/// Identity and routing key derived from a verified request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryMetadata {
    /// Provider-assigned unique identifier, the idempotency key.
    pub delivery_id: String,
    /// Routing key, `"unknown"` when the request does not say.
    pub event_type: String,
}

/// Fields needed to persist a freshly accepted delivery.
#[derive(Debug, Clone)]
pub struct NewDelivery {
    /// Originating provider.
    pub provider: ProviderKind,
    /// Provider-assigned unique identifier.
    pub delivery_id: String,
    /// Routing key.
    pub event_type: String,
    /// Parsed body.
    pub payload: serde_json::Value,
    /// Transport headers kept for audit.
    pub headers: HashMap<String, String>,
}

/// One inbound webhook and its processing state.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Delivery {
    /// Storage identity.
    pub id: DeliveryId,

    /// Originating provider.
    pub provider: ProviderKind,

    /// Provider-assigned identifier, unique across all deliveries.
    pub delivery_id: String,

    /// Routing key combined with `provider` for handler dispatch.
    pub event_type: String,

    /// Parsed body, opaque to the pipeline.
    pub payload: Json<serde_json::Value>,

    /// Transport headers captured at intake.
    pub headers: Json<HashMap<String, String>>,

    /// Lifecycle position.
    pub status: DeliveryStatus,

    /// Attempts started so far.
    ///
    /// Incremented once when an attempt begins, before the handler runs.
    pub attempts: i32,

    /// Summary of the most recent failure.
    pub error_message: Option<String>,

    /// Set when the delivery completes.
    pub processed_at: Option<DateTime<Utc>>,

    /// Earliest time the next attempt may start.
    pub next_attempt_at: Option<DateTime<Utc>>,

    /// Intake time.
    pub created_at: DateTime<Utc>,

    /// Last state change.
    pub updated_at: DateTime<Utc>,

    /// Bumped by every claim and every replay, never reset.
    #[serde(skip)]
    pub generation: i64,
}

impl Delivery {
    /// Materialises a pending delivery from intake data.
    pub fn from_new(id: DeliveryId, new: NewDelivery, now: DateTime<Utc>) -> Self {
        Self {
            id,
            provider: new.provider,
            delivery_id: new.delivery_id,
            event_type: new.event_type,
            payload: Json(new.payload),
            headers: Json(new.headers),
            status: DeliveryStatus::Pending,
            attempts: 0,
            error_message: None,
            processed_at: None,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
            generation: 0,
        }
    }

    /// `"{provider}:{event_type}"`, the handler lookup key.
    pub fn event_key(&self) -> String {
        format!("{}:{}", self.provider, self.event_type)
    }

    /// Attempts as an unsigned count.
    pub fn attempt_count(&self) -> u32 {
        u32::try_from(self.attempts).unwrap_or(0)
    }

    /// Whether an attempt may start at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_none_or(|at| at <= now)
    }

    /// Lease held by the attempt that claimed this row.
    ///
    /// Only meaningful on a `processing` row returned by a claim.
    pub fn lease(&self) -> AttemptLease {
        AttemptLease { id: self.id, generation: self.generation }
    }
}

/// Ownership of one claimed attempt.
///
/// Transitions out of `processing` apply only while the row still carries
/// the lease generation. Replay and every later claim bump the generation,
/// so a worker that finishes late finds its lease lost and writes nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttemptLease {
    /// Delivery the attempt belongs to.
    pub id: DeliveryId,
    /// `generation` stamped by the claim.
    pub generation: i64,
}

impl AttemptLease {
    /// Whether `delivery` is still held by this lease.
    pub fn holds(&self, delivery: &Delivery) -> bool {
        delivery.id == self.id
            && delivery.status == DeliveryStatus::Processing
            && delivery.generation == self.generation
    }
}

/// Failure context captured when a delivery is dead-lettered.
#[derive(Debug, Clone)]
pub struct NewDeadLetter {
    /// Failure category.
    pub error_class: String,
    /// Failure message without the delivery context suffix.
    pub error_message: String,
    /// Truncated diagnostic trace.
    pub backtrace: Option<String>,
    /// When the final attempt failed.
    pub failed_at: DateTime<Utc>,
}

/// Permanent failure record, one per dead delivery.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct DeadLetter {
    /// Storage identity.
    pub id: DeadLetterId,
    /// Owning delivery.
    pub webhook_delivery_id: DeliveryId,
    /// Failure category.
    pub error_class: String,
    /// Failure message.
    pub error_message: String,
    /// Truncated diagnostic trace.
    pub backtrace: Option<String>,
    /// When the final attempt failed.
    pub failed_at: DateTime<Utc>,
    /// First time this delivery died.
    pub created_at: DateTime<Utc>,
    /// Last time the failure context was written.
    pub updated_at: DateTime<Utc>,
}

impl DeadLetter {
    /// Builds the stored record for `delivery`.
    pub fn from_new(delivery: DeliveryId, new: NewDeadLetter, now: DateTime<Utc>) -> Self {
        Self {
            id: DeadLetterId::new(),
            webhook_delivery_id: delivery,
            error_class: new.error_class,
            error_message: new.error_message,
            backtrace: new.backtrace,
            failed_at: new.failed_at,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A dead letter with the delivery it belongs to.
#[derive(Debug, Clone, Serialize)]
pub struct DeadLetterRecord {
    /// Failure record.
    pub dead_letter: DeadLetter,
    /// Owning delivery.
    pub delivery: Delivery,
}

/// Optional filters for delivery listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeliveryFilter {
    /// Only deliveries from this provider.
    pub provider: Option<ProviderKind>,
    /// Only deliveries in this status.
    pub status: Option<DeliveryStatus>,
}

impl DeliveryFilter {
    /// Whether `delivery` passes every set filter.
    pub fn matches(&self, delivery: &Delivery) -> bool {
        self.provider.is_none_or(|p| p == delivery.provider)
            && self.status.is_none_or(|s| s == delivery.status)
    }
}

/// 1-based page selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    page: u32,
}

impl PageRequest {
    /// Clamps `page` to at least 1.
    pub fn new(page: u32) -> Self {
        Self { page: page.max(1) }
    }

    /// Current page number.
    pub const fn page(self) -> u32 {
        self.page
    }

    /// Rows to skip.
    pub fn offset(self) -> i64 {
        i64::from(self.page - 1) * i64::from(PER_PAGE)
    }

    /// Rows per page.
    pub fn limit(self) -> i64 {
        i64::from(PER_PAGE)
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1)
    }
}

/// One page of results plus the unpaged total.
#[derive(Debug, Clone, Serialize)]
pub struct Page<T> {
    /// Rows on this page.
    pub items: Vec<T>,
    /// Page number, 1-based.
    pub current_page: u32,
    /// Rows matching the query across all pages.
    pub total_count: i64,
}
