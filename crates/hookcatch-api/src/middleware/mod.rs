//! HTTP middleware for admin authentication and request tagging.
pub mod auth;
pub mod request_id;
