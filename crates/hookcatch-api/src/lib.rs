//! hookcatch HTTP API.
//!
//! Webhook intake (`POST /webhooks/{provider}`), the JWT-protected admin
//! endpoints and the health probes, plus the layered [`Config`].

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod crypto;
pub mod handlers;
pub mod intake;
pub mod middleware;
pub mod providers;
pub mod server;

pub use config::Config;
pub use intake::{IntakeOutcome, IntakeService};
pub use providers::{ProviderRegistry, ProviderSecrets, WebhookProvider};
pub use server::{create_router, create_router_with_timeout, start_server, AppState};
