//! HTTP request handlers
//!
//! - `api` - Health check endpoint
//! - `token` - Short-lived credential issuance for browser clients

pub mod api;
pub mod token;

pub use token::{issue_token, method_not_allowed, preflight};
