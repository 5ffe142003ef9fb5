//! School fee payment and settlement engine.
//!
//! Parents pay school fees and donations through a hosted payment gateway.
//! The engine prices each payment, issues sequential invoice numbers per
//! school, opens the charge at the gateway and reconciles asynchronous
//! status notifications back into billing records.

pub mod app;
pub mod config;
pub mod db;
pub mod error;
pub mod gateway;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod repository;
pub mod services;
