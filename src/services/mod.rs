//! Business logic services.
//!
//! Services contain core business logic separated from HTTP handlers.
//! They validate input, enforce capabilities and drive the repository and
//! the payment gateway.

pub mod fee_service;
pub mod invoice_service;
pub mod notification_service;
pub mod reconciliation_service;
pub mod transaction_service;
pub mod webhook_service;
