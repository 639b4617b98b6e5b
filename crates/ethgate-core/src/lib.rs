//! # ethgate-core
//!
//! Core library for the ethgate authenticated Ethereum RPC gateway.
//!
//! This crate provides the foundational components for:
//!
//! - **[`keystore`]**: Durable API key registry with JSON file persistence,
//!   key generation, validation, and lifecycle management.
//!
//! - **[`ratelimit`]**: In-memory, per-key, multi-window rate limiting with
//!   lazy window expiry and shortest-window-first precedence.
//!
//! - **[`gatekeeper`]**: The per-request admission decision composing path
//!   classification, admin secret checking, key validation, and rate
//!   limiting into a single outcome value.
//!
//! - **[`upstream`]**: Thin JSON-RPC client for the fronted Ethereum node.
//!
//! - **[`config`]**: Layered TOML + environment configuration.
//!
//! ## Request Flow
//!
//! ```text
//! Client Request
//!       │
//!       ▼
//! ┌──────────────┐   non-API or health
//! │  Gatekeeper  │ ──────────────────────► pass through
//! │              │   admin path
//! │              │ ──► constant-time secret check ──► 401 or pass
//! └──────┬───────┘
//!        │ API path
//!        ▼
//! ┌──────────────┐
//! │   KeyStore   │ ─── missing/unknown/deactivated ──► 401
//! └──────┬───────┘
//!        │ valid
//!        ▼
//! ┌──────────────┐
//! │ RateLimiter  │ ─── window exhausted ──► 429 + Retry-After
//! └──────┬───────┘
//!        │ admitted (all windows incremented)
//!        ▼
//! Downstream handler + X-RateLimit-* response headers
//! ```
//!
//! HTTP adapters (Axum middleware and handlers) live in the `server` crate;
//! this crate contains only the business logic so it can be tested without
//! HTTP machinery.

pub mod config;
pub mod gatekeeper;
pub mod keystore;
pub mod ratelimit;
pub mod upstream;

pub use config::AppConfig;
pub use gatekeeper::{DenyReason, GateOutcome, Gatekeeper};
pub use keystore::{ApiKeyRecord, KeyStore, KeyStoreError};
pub use ratelimit::{CustomLimits, RateLimitDecision, RateLimitEngine, RateWindow};
pub use upstream::{EthClient, UpstreamError};
