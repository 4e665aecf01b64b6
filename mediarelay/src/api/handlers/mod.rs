//! HTTP request handlers.
//!
//! - [`uploads`]: File relay into upload categories
//!
//! # Error Handling
//!
//! Handlers return [`crate::errors::Error`], which converts to the matching HTTP status and a
//! JSON body with a `message` field.

pub mod uploads;
