//! Core domain types for the hookcatch webhook pipeline.
//!
//! Provides the delivery and dead letter models, the error taxonomy, the
//! clock abstraction and the Postgres repositories. Every other crate in the
//! workspace builds on these types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, HookCatchError, Result};
pub use models::{
    AttemptLease, DeadLetter, DeadLetterId, DeadLetterRecord, Delivery, DeliveryFilter,
    DeliveryId, DeliveryMetadata, DeliveryStatus, NewDeadLetter, NewDelivery, Page, PageRequest,
    ProviderKind, PER_PAGE,
};
pub use time::{Clock, RealClock, TestClock};
