//! HTTP middleware for the gateway.
//!
//! The Axum adapter here handles request/response manipulation and status
//! codes while delegating every admission decision to
//! `ethgate_core::gatekeeper`.

pub mod gatekeeper;

pub use gatekeeper::{gatekeeper_middleware, AdmittedKey};
