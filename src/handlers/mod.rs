//! HTTP request handlers (route handlers).
//!
//! Each handler is an async function that:
//! 1. Receives HTTP request data (JSON body, URL params, etc.)
//! 2. Delegates to a service
//! 3. Returns HTTP response (JSON, status code)

/// Liveness and database connectivity
pub mod health;
/// School invoice numbering administration
pub mod invoice_formats;
/// Internal reconciliation, cancel and refund endpoints
pub mod reconciliation;
/// Fee payments and donations
pub mod transactions;
/// Gateway payment notifications
pub mod webhooks;
