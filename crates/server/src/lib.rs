//! HTTP layer for the ethgate gateway.
//!
//! Wraps the business logic in `ethgate-core` with Axum adapters: the
//! gatekeeper middleware, the public query handlers, and the admin
//! key-management handlers.

pub mod handlers;
pub mod middleware;
pub mod router;
pub mod state;

pub use state::AppState;
