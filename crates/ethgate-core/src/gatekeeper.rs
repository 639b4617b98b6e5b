//! Per-request admission decisions.
//!
//! Every inbound request is classified here before any handler runs:
//! non-API paths and the health check pass straight through, admin paths are
//! checked against the shared admin secret, and everything else goes through
//! key validation and rate limiting. The outcome is a plain value so the
//! HTTP layer can map it to a response in one place.

use crate::{
    keystore::{ApiKeyRecord, KeyStore, KeyStoreError},
    ratelimit::{RateLimitDecision, RateLimitEngine},
};
use std::sync::Arc;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Path prefix for everything the gatekeeper protects.
pub const API_PREFIX: &str = "/api/";
/// Unauthenticated liveness probe; must never block on the gatekeeper.
pub const HEALTH_PATH: &str = "/api/health";
/// Admin surface, guarded by the shared secret instead of API keys.
pub const ADMIN_PREFIX: &str = "/api/admin/";

/// Why a request was turned away before reaching rate limiting.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DenyReason {
    #[error("Invalid admin secret")]
    BadAdminSecret,

    #[error("API key required. Pass it via x-api-key header.")]
    MissingKey,

    #[error("Invalid API key")]
    UnknownKey,

    #[error("API key is deactivated")]
    Deactivated,

    /// The key store could not complete the validation-side write.
    #[error("key store unavailable: {0}")]
    Store(String),
}

impl From<KeyStoreError> for DenyReason {
    fn from(err: KeyStoreError) -> Self {
        match err {
            KeyStoreError::MissingKey => Self::MissingKey,
            KeyStoreError::UnknownKey => Self::UnknownKey,
            KeyStoreError::Deactivated => Self::Deactivated,
            other => Self::Store(other.to_string()),
        }
    }
}

/// Result of evaluating one request.
#[derive(Debug)]
pub enum GateOutcome {
    /// Outside the protected prefix, or the health check.
    Bypass,
    /// Admin path with a matching secret; store and engine untouched.
    AdminGranted,
    /// Terminal 401.
    Denied(DenyReason),
    /// Valid key, quota exhausted. Terminal 429.
    Throttled(RateLimitDecision),
    /// Admitted; counters for every window were incremented.
    Admitted { record: ApiKeyRecord, decision: RateLimitDecision },
}

/// The request gatekeeper: path classification, admin secret check, key
/// validation, and rate limiting in one pass.
pub struct Gatekeeper {
    store: Arc<KeyStore>,
    engine: Arc<RateLimitEngine>,
    admin_secret: String,
}

impl Gatekeeper {
    #[must_use]
    pub fn new(store: Arc<KeyStore>, engine: Arc<RateLimitEngine>, admin_secret: String) -> Self {
        Self { store, engine, admin_secret }
    }

    /// Evaluates one request.
    ///
    /// Exactly one rate-limit check runs per protected API request, whether
    /// or not it is admitted; admin and health paths never touch the key
    /// store or the engine.
    #[must_use]
    pub fn evaluate(
        &self,
        path: &str,
        api_key: Option<&str>,
        admin_secret: Option<&str>,
    ) -> GateOutcome {
        if !path.starts_with(API_PREFIX) || path == HEALTH_PATH {
            return GateOutcome::Bypass;
        }

        if path.starts_with(ADMIN_PREFIX) {
            return if admin_secret.is_some_and(|s| self.admin_secret_matches(s)) {
                GateOutcome::AdminGranted
            } else {
                GateOutcome::Denied(DenyReason::BadAdminSecret)
            };
        }

        let Some(key) = api_key else {
            return GateOutcome::Denied(DenyReason::MissingKey);
        };

        let record = match self.store.validate(key) {
            Ok(record) => record,
            Err(e) => return GateOutcome::Denied(e.into()),
        };

        let decision = self.engine.check_and_admit(key, record.custom_limits.as_ref());
        if decision.allowed {
            GateOutcome::Admitted { record, decision }
        } else {
            GateOutcome::Throttled(decision)
        }
    }

    /// Comparison time does not depend on how much of a wrong secret
    /// matches.
    fn admin_secret_matches(&self, provided: &str) -> bool {
        provided.as_bytes().ct_eq(self.admin_secret.as_bytes()).into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ratelimit::{RateWindow, WindowConfig};

    fn test_gatekeeper(per_10min: u64) -> (tempfile::TempDir, Gatekeeper, Arc<KeyStore>, Arc<RateLimitEngine>) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = Arc::new(KeyStore::load(dir.path().join("api-keys.json")));
        let engine = Arc::new(RateLimitEngine::new(vec![
            WindowConfig { window: RateWindow::Per10Min, default_limit: per_10min },
            WindowConfig { window: RateWindow::PerDay, default_limit: 10_000 },
            WindowConfig { window: RateWindow::PerMonth, default_limit: 300_000 },
        ]));
        let gatekeeper =
            Gatekeeper::new(store.clone(), engine.clone(), "hunter2".to_string());
        (dir, gatekeeper, store, engine)
    }

    #[test]
    fn test_non_api_and_health_paths_bypass() {
        let (_dir, gk, _store, engine) = test_gatekeeper(100);

        assert!(matches!(gk.evaluate("/", None, None), GateOutcome::Bypass));
        assert!(matches!(gk.evaluate("/favicon.ico", None, None), GateOutcome::Bypass));
        assert!(matches!(gk.evaluate("/api/health", None, None), GateOutcome::Bypass));

        // Bypass never touches the engine.
        assert_eq!(engine.usage("anything"), vec![
            (RateWindow::Per10Min, 0),
            (RateWindow::PerDay, 0),
            (RateWindow::PerMonth, 0),
        ]);
    }

    #[test]
    fn test_admin_secret_check() {
        let (_dir, gk, _store, _engine) = test_gatekeeper(100);

        assert!(matches!(
            gk.evaluate("/api/admin/keys", None, Some("hunter2")),
            GateOutcome::AdminGranted
        ));
        assert!(matches!(
            gk.evaluate("/api/admin/keys", None, Some("wrong")),
            GateOutcome::Denied(DenyReason::BadAdminSecret)
        ));
        assert!(matches!(
            gk.evaluate("/api/admin/keys", None, None),
            GateOutcome::Denied(DenyReason::BadAdminSecret)
        ));
    }

    #[test]
    fn test_admin_path_ignores_api_key_state() {
        let (_dir, gk, _store, engine) = test_gatekeeper(0);

        // Zero limit everywhere, yet admin passes: the engine is never
        // consulted on admin paths.
        assert!(matches!(
            gk.evaluate("/api/admin/keys", Some("eth_whatever"), Some("hunter2")),
            GateOutcome::AdminGranted
        ));
        assert_eq!(engine.usage("eth_whatever")[0].1, 0);
    }

    #[test]
    fn test_missing_unknown_and_deactivated_keys() {
        let (_dir, gk, store, _engine) = test_gatekeeper(100);

        assert!(matches!(
            gk.evaluate("/api/v1/block", None, None),
            GateOutcome::Denied(DenyReason::MissingKey)
        ));
        assert!(matches!(
            gk.evaluate("/api/v1/block", Some("eth_nope"), None),
            GateOutcome::Denied(DenyReason::UnknownKey)
        ));

        let record = store.create("alice", None, None).expect("create");
        store.deactivate(&record.key).expect("deactivate");
        assert!(matches!(
            gk.evaluate("/api/v1/block", Some(&record.key), None),
            GateOutcome::Denied(DenyReason::Deactivated)
        ));
    }

    #[test]
    fn test_admission_counts_exactly_once() {
        let (_dir, gk, store, engine) = test_gatekeeper(100);
        let record = store.create("alice", None, None).expect("create");

        match gk.evaluate("/api/v1/block", Some(&record.key), None) {
            GateOutcome::Admitted { decision, .. } => {
                assert_eq!(decision.remaining_for(RateWindow::Per10Min), Some(99));
            }
            other => panic!("expected admission, got {other:?}"),
        }

        assert_eq!(engine.usage(&record.key)[0], (RateWindow::Per10Min, 1));
    }

    #[test]
    fn test_throttled_after_limit() {
        let (_dir, gk, store, _engine) = test_gatekeeper(2);
        let record = store.create("alice", None, None).expect("create");

        for _ in 0..2 {
            assert!(matches!(
                gk.evaluate("/api/v1/block", Some(&record.key), None),
                GateOutcome::Admitted { .. }
            ));
        }

        match gk.evaluate("/api/v1/block", Some(&record.key), None) {
            GateOutcome::Throttled(decision) => {
                assert_eq!(decision.exceeded, Some(RateWindow::Per10Min));
                assert_eq!(decision.remaining_for(RateWindow::Per10Min), Some(0));
            }
            other => panic!("expected throttle, got {other:?}"),
        }
    }

    #[test]
    fn test_custom_limits_flow_through() {
        let (_dir, gk, store, _engine) = test_gatekeeper(100);
        let record = store
            .create(
                "alice",
                Some(crate::ratelimit::CustomLimits {
                    per_10min: Some(1),
                    ..Default::default()
                }),
                None,
            )
            .expect("create");

        assert!(matches!(
            gk.evaluate("/api/v1/block", Some(&record.key), None),
            GateOutcome::Admitted { .. }
        ));

        match gk.evaluate("/api/v1/block", Some(&record.key), None) {
            GateOutcome::Throttled(decision) => {
                assert_eq!(decision.exceeded, Some(RateWindow::Per10Min));
                // Full 10-minute window to wait out, reported as a ceiling.
                assert_eq!(decision.retry_after_secs(), Some(600));
            }
            other => panic!("expected throttle, got {other:?}"),
        }
    }
}
