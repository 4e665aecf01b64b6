//! HTTP surface of the relay.
//!
//! - **[`handlers`]**: Axum route handlers
//!
//! # API Structure
//!
//! - **Uploads** (`/upload`, `/upload/{category}`): multipart file relay to the asset host
//!
//! Request and response bodies are shared with the client widget and live in [`crate::types`].

pub mod handlers;
