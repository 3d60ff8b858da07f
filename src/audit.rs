//! Security audit log.
//!
//! Every event is written twice: as JSON into the shared store with a fixed
//! retention, and as a structured `tracing` line. The stored event keeps the
//! raw client address for correlation; the log line only ever carries the
//! masked form produced by [`mask_ip`].
//!
//! # Events
//!
//! | Event | Level | Flagged |
//! |-------|-------|---------|
//! | `LOGIN_SUCCESS` | info | |
//! | `LOGIN_FAILURE` | warn | yes |
//! | `LOGOUT` | info | |
//! | `TOKEN_INVALIDATION` | warn | |
//! | `RATE_LIMIT_EXCEEDED` | warn | yes |
//! | `ACCESS_DENIED` | warn | yes |
//! | `PASSWORD_CHANGE` | info | |
//! | `ACCOUNT_LOCKED` | error | |
//! | `SUSPICIOUS_ACTIVITY` | error | |
//!
//! Flagged events feed a windowed counter per `(identity, address)`. The
//! occurrence that first crosses the threshold raises one
//! `SUSPICIOUS_ACTIVITY` event for that window.
//!
//! Recording never fails the caller. Store errors are logged and dropped.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::config::AuditConfig;
use crate::store::KvStore;

/// Key namespace for stored events: `security:event:{TYPE}:{millis}:{id}`.
pub const EVENT_PREFIX: &str = "security:event:";

/// Key namespace for suspicious-activity counters.
pub const SUSPICIOUS_PREFIX: &str = "security:suspicious:";

/// Audit event category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    /// Credentials accepted
    LoginSuccess,
    /// Credentials rejected
    LoginFailure,
    /// Session ended by the user
    Logout,
    /// Token revoked before expiry
    TokenInvalidation,
    /// Request rejected by the rate limiter
    RateLimitExceeded,
    /// Authenticated caller lacked the required role
    AccessDenied,
    /// Password changed
    PasswordChange,
    /// Login attempted on a disabled account
    AccountLocked,
    /// Flagged events crossed the escalation threshold
    SuspiciousActivity,
}

impl AuditEventType {
    /// Name used in keys and logs.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LoginSuccess => "LOGIN_SUCCESS",
            Self::LoginFailure => "LOGIN_FAILURE",
            Self::Logout => "LOGOUT",
            Self::TokenInvalidation => "TOKEN_INVALIDATION",
            Self::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            Self::AccessDenied => "ACCESS_DENIED",
            Self::PasswordChange => "PASSWORD_CHANGE",
            Self::AccountLocked => "ACCOUNT_LOCKED",
            Self::SuspiciousActivity => "SUSPICIOUS_ACTIVITY",
        }
    }

    /// Whether this category counts toward suspicious-activity escalation.
    #[must_use]
    pub fn is_flagged(self) -> bool {
        matches!(
            self,
            Self::LoginFailure | Self::RateLimitExceeded | Self::AccessDenied
        )
    }
}

/// Where a request came from.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClientInfo {
    /// Resolved client address, or `"unknown"`
    pub ip: String,
    /// `User-Agent` header, if sent
    pub user_agent: Option<String>,
}

impl ClientInfo {
    /// Client with an address and no user agent.
    pub fn from_ip(ip: impl Into<String>) -> Self {
        Self {
            ip: ip.into(),
            user_agent: None,
        }
    }
}

/// Immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditEvent {
    /// Unique event id
    pub id: Uuid,
    /// Category
    pub event_type: AuditEventType,
    /// Username or other identifier of the actor
    pub identity: String,
    /// Unmasked client address
    pub ip_address: String,
    /// Client user agent
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    /// When the event was recorded
    pub timestamp: DateTime<Utc>,
    /// Free-form detail fields
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub details: BTreeMap<String, Value>,
}

/// Aggregate counts for the monitoring endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditStats {
    /// Stored events within retention
    pub total_events: usize,
    /// Open suspicious-activity windows
    pub suspicious_activities: usize,
}

/// Mask an address for human-readable logs.
///
/// IPv4 keeps the first two octets (`203.0.*.*`), IPv6 keeps the first two
/// groups. Anything that is not an address is replaced entirely.
#[must_use]
pub fn mask_ip(ip: &str) -> String {
    if ip.is_empty() || ip == "unknown" {
        return "unknown".to_string();
    }
    match ip.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) => {
            let [a, b, _, _] = v4.octets();
            format!("{a}.{b}.*.*")
        }
        Ok(IpAddr::V6(v6)) => {
            let segments = v6.segments();
            format!("{:x}:{:x}:*:*:*:*:*:*", segments[0], segments[1])
        }
        Err(_) => "***".to_string(),
    }
}

/// Audit log over the shared store.
pub struct AuditLog {
    store: Arc<dyn KvStore>,
    config: AuditConfig,
    clock: Arc<dyn Clock>,
}

impl AuditLog {
    /// Create an audit log writing into `store`.
    #[must_use]
    pub fn new(store: Arc<dyn KvStore>, config: AuditConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    fn retention(&self) -> Duration {
        Duration::from_secs(self.config.retention_days.saturating_mul(24 * 3600))
    }

    /// Record an event and return it.
    ///
    /// Does not run suspicious-activity accounting; the typed helpers do.
    pub async fn record(
        &self,
        event_type: AuditEventType,
        identity: &str,
        client: &ClientInfo,
        details: BTreeMap<String, Value>,
    ) -> AuditEvent {
        let now_ms = self.clock.now_millis();
        let event = AuditEvent {
            id: Uuid::new_v4(),
            event_type,
            identity: identity.to_string(),
            ip_address: client.ip.clone(),
            user_agent: client.user_agent.clone(),
            timestamp: DateTime::from_timestamp_millis(i64::try_from(now_ms).unwrap_or(i64::MAX))
                .unwrap_or_default(),
            details,
        };

        self.persist(&event, now_ms).await;
        log_event(&event);
        event
    }

    async fn persist(&self, event: &AuditEvent, now_ms: u64) {
        let key = format!(
            "{EVENT_PREFIX}{}:{now_ms}:{}",
            event.event_type.as_str(),
            event.id
        );
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %e, "Failed to serialize audit event");
                return;
            }
        };
        if let Err(e) = self.store.set(&key, json, self.retention()).await {
            error!(error = %e, event_type = event.event_type.as_str(), "Failed to store audit event");
        }
    }

    async fn record_flagged(
        &self,
        event_type: AuditEventType,
        identity: &str,
        client: &ClientInfo,
        details: BTreeMap<String, Value>,
    ) {
        self.record(event_type, identity, client, details).await;
        self.check_suspicious_activity(identity, &client.ip, event_type)
            .await;
    }

    /// Count a flagged action for `(identity, ip)` and escalate once per
    /// window when the count first exceeds the threshold.
    ///
    /// Returns the escalation event when one was raised.
    pub async fn check_suspicious_activity(
        &self,
        identity: &str,
        ip: &str,
        activity: AuditEventType,
    ) -> Option<AuditEvent> {
        let key = format!("{SUSPICIOUS_PREFIX}{identity}:{ip}");
        let window = Duration::from_secs(self.config.suspicious_window_secs);
        let counter = match self.store.increment(&key, window).await {
            Ok(counter) => counter,
            Err(e) => {
                error!(error = %e, "Suspicious activity check failed");
                return None;
            }
        };

        if counter.count != self.config.suspicious_threshold.saturating_add(1) {
            return None;
        }

        let details = BTreeMap::from([
            ("activityType".to_string(), Value::from(activity.as_str())),
            ("count".to_string(), Value::from(counter.count)),
        ]);
        let client = ClientInfo::from_ip(ip);
        Some(
            self.record(AuditEventType::SuspiciousActivity, identity, &client, details)
                .await,
        )
    }

    /// Number of stored events of one category.
    pub async fn count_events(&self, event_type: AuditEventType) -> usize {
        let prefix = format!("{EVENT_PREFIX}{}:", event_type.as_str());
        self.store.count_prefix(&prefix).await.unwrap_or_else(|e| {
            error!(error = %e, "Failed to count audit events");
            0
        })
    }

    /// Aggregate counts. Zeroes when the store is unavailable.
    pub async fn stats(&self) -> AuditStats {
        let total_events = self.store.count_prefix(EVENT_PREFIX).await;
        let suspicious = self.store.count_prefix(SUSPICIOUS_PREFIX).await;
        match (total_events, suspicious) {
            (Ok(total_events), Ok(suspicious_activities)) => AuditStats {
                total_events,
                suspicious_activities,
            },
            (Err(e), _) | (_, Err(e)) => {
                error!(error = %e, "Failed to read audit statistics");
                AuditStats {
                    total_events: 0,
                    suspicious_activities: 0,
                }
            }
        }
    }

    /// Credentials accepted.
    pub async fn login_success(&self, username: &str, client: &ClientInfo) {
        self.record(AuditEventType::LoginSuccess, username, client, BTreeMap::new())
            .await;
    }

    /// Credentials rejected. Flagged.
    pub async fn login_failure(&self, username: &str, client: &ClientInfo, reason: &str) {
        let details = BTreeMap::from([("reason".to_string(), Value::from(reason))]);
        self.record_flagged(AuditEventType::LoginFailure, username, client, details)
            .await;
    }

    /// Session ended.
    pub async fn logout(&self, username: &str, client: &ClientInfo) {
        self.record(AuditEventType::Logout, username, client, BTreeMap::new())
            .await;
    }

    /// Token revoked before its expiry.
    pub async fn token_invalidation(&self, username: &str, client: &ClientInfo, reason: &str) {
        let details = BTreeMap::from([("reason".to_string(), Value::from(reason))]);
        self.record(AuditEventType::TokenInvalidation, username, client, details)
            .await;
    }

    /// Request rejected by the rate limiter. Flagged.
    ///
    /// `identifier` is the IP for IP-scoped breaches and the username otherwise.
    pub async fn rate_limit_exceeded(
        &self,
        identifier: &str,
        client: &ClientInfo,
        endpoint: &str,
        scope_kind: &str,
    ) {
        let details = BTreeMap::from([
            ("endpoint".to_string(), Value::from(endpoint)),
            ("type".to_string(), Value::from(scope_kind)),
        ]);
        self.record_flagged(AuditEventType::RateLimitExceeded, identifier, client, details)
            .await;
    }

    /// Caller lacked the role for `resource`. Flagged.
    pub async fn access_denied(&self, username: &str, client: &ClientInfo, resource: &str) {
        let details = BTreeMap::from([("resource".to_string(), Value::from(resource))]);
        self.record_flagged(AuditEventType::AccessDenied, username, client, details)
            .await;
    }

    /// Password changed.
    pub async fn password_change(&self, username: &str, client: &ClientInfo) {
        self.record(AuditEventType::PasswordChange, username, client, BTreeMap::new())
            .await;
    }

    /// Login attempted on a disabled account.
    pub async fn account_locked(&self, username: &str, client: &ClientInfo, reason: &str) {
        let details = BTreeMap::from([("reason".to_string(), Value::from(reason))]);
        self.record(AuditEventType::AccountLocked, username, client, details)
            .await;
    }
}

fn log_event(event: &AuditEvent) {
    let event_type = event.event_type.as_str();
    let identity = event.identity.as_str();
    let ip = mask_ip(&event.ip_address);
    let details = serde_json::to_string(&event.details).unwrap_or_default();

    match event.event_type {
        AuditEventType::LoginSuccess | AuditEventType::Logout | AuditEventType::PasswordChange => {
            info!(target: "security_audit", event_type, identity, ip = %ip, details = %details, "Security audit event");
        }
        AuditEventType::AccountLocked | AuditEventType::SuspiciousActivity => {
            error!(target: "security_audit", event_type, identity, ip = %ip, details = %details, "Security audit event");
        }
        _ => {
            warn!(target: "security_audit", event_type, identity, ip = %ip, details = %details, "Security audit event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::InMemoryStore;

    fn audit() -> (Arc<ManualClock>, Arc<InMemoryStore>, AuditLog) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        let log = AuditLog::new(store.clone(), AuditConfig::default(), clock.clone());
        (clock, store, log)
    }

    #[test]
    fn masks_ipv4_last_two_octets() {
        assert_eq!(mask_ip("203.0.113.42"), "203.0.*.*");
        assert_eq!(mask_ip("10.1.2.3"), "10.1.*.*");
    }

    #[test]
    fn masks_ipv6_and_garbage() {
        assert_eq!(mask_ip("2001:db8::1"), "2001:db8:*:*:*:*:*:*");
        assert_eq!(mask_ip("not-an-ip"), "***");
        assert_eq!(mask_ip(""), "unknown");
        assert_eq!(mask_ip("unknown"), "unknown");
    }

    #[test]
    fn event_types_serialize_screaming_snake() {
        let json = serde_json::to_string(&AuditEventType::RateLimitExceeded).unwrap();
        assert_eq!(json, "\"RATE_LIMIT_EXCEEDED\"");
        assert!(AuditEventType::AccessDenied.is_flagged());
        assert!(!AuditEventType::Logout.is_flagged());
    }

    #[tokio::test]
    async fn record_stores_unmasked_event_with_retention() {
        // GIVEN: an audit log
        let (clock, store, log) = audit();
        let client = ClientInfo {
            ip: "203.0.113.42".to_string(),
            user_agent: Some("curl/8.0".to_string()),
        };

        // WHEN: a login success is recorded
        let event = log
            .record(AuditEventType::LoginSuccess, "alice", &client, BTreeMap::new())
            .await;

        // THEN: the stored copy keeps the raw address
        assert_eq!(event.ip_address, "203.0.113.42");
        assert_eq!(event.timestamp.timestamp_millis(), 1_700_000_000_000);
        let key = format!("{EVENT_PREFIX}LOGIN_SUCCESS:1700000000000:{}", event.id);
        let stored: AuditEvent =
            serde_json::from_str(&store.get(&key).await.unwrap().unwrap()).unwrap();
        assert_eq!(stored, event);

        // AND: it expires after 30 days
        clock.advance(Duration::from_secs(30 * 24 * 3600));
        assert_eq!(log.count_events(AuditEventType::LoginSuccess).await, 0);
    }

    #[tokio::test]
    async fn escalates_exactly_once_on_sixth_flagged_event() {
        // GIVEN: five login failures from the same identity and address
        let (_clock, _store, log) = audit();
        let client = ClientInfo::from_ip("198.51.100.7");
        for _ in 0..5 {
            log.login_failure("bob", &client, "Bad credentials").await;
        }

        // THEN: no escalation yet
        assert_eq!(log.count_events(AuditEventType::SuspiciousActivity).await, 0);

        // WHEN: the sixth and seventh arrive
        log.login_failure("bob", &client, "Bad credentials").await;
        log.login_failure("bob", &client, "Bad credentials").await;

        // THEN: exactly one escalation
        assert_eq!(log.count_events(AuditEventType::SuspiciousActivity).await, 1);
        assert_eq!(log.count_events(AuditEventType::LoginFailure).await, 7);
    }

    #[tokio::test]
    async fn escalation_window_resets_after_an_hour() {
        let (clock, _store, log) = audit();
        let client = ClientInfo::from_ip("198.51.100.8");
        for _ in 0..6 {
            log.access_denied("carol", &client, "/api/security/blacklist/status").await;
        }
        assert_eq!(log.count_events(AuditEventType::SuspiciousActivity).await, 1);

        clock.advance(Duration::from_secs(3600));
        for _ in 0..5 {
            log.access_denied("carol", &client, "/api/security/blacklist/status").await;
        }
        assert_eq!(log.count_events(AuditEventType::SuspiciousActivity).await, 1);

        log.access_denied("carol", &client, "/api/security/blacklist/status").await;
        assert_eq!(log.count_events(AuditEventType::SuspiciousActivity).await, 2);
    }

    #[tokio::test]
    async fn counters_are_per_identity_and_address() {
        let (_clock, _store, log) = audit();
        for i in 0..6 {
            let client = ClientInfo::from_ip(format!("10.0.0.{i}"));
            log.login_failure("dave", &client, "Bad credentials").await;
        }
        assert_eq!(log.count_events(AuditEventType::SuspiciousActivity).await, 0);
        assert_eq!(log.stats().await.suspicious_activities, 6);
    }

    #[tokio::test]
    async fn unflagged_events_do_not_count() {
        let (_clock, _store, log) = audit();
        let client = ClientInfo::from_ip("10.0.0.9");
        for _ in 0..10 {
            log.logout("erin", &client).await;
            log.password_change("erin", &client).await;
        }
        let stats = log.stats().await;
        assert_eq!(stats.total_events, 20);
        assert_eq!(stats.suspicious_activities, 0);
    }

    #[tokio::test]
    async fn rate_limit_event_carries_endpoint_and_type() {
        let (_clock, _store, log) = audit();
        let client = ClientInfo::from_ip("10.0.0.10");
        let event = log
            .check_suspicious_activity("10.0.0.10", &client.ip, AuditEventType::RateLimitExceeded)
            .await;
        assert!(event.is_none());

        log.rate_limit_exceeded("10.0.0.10", &client, "login", "IP").await;
        assert_eq!(log.count_events(AuditEventType::RateLimitExceeded).await, 1);
    }
}
