//! Route-based authorization.
//!
//! An ordered table maps path patterns to the access they require; the first
//! matching rule wins. Runs after the filter chain has resolved the identity.
//!
//! Patterns are `/`-separated. `*` matches one segment, a trailing `**`
//! matches any remainder including nothing.

use std::sync::Arc;

use axum::{
    body::Body,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};
use tracing::debug;

use crate::Error;
use crate::audit::AuditLog;
use crate::filter::{AuthenticatedUser, Filter, client_info};
use crate::users::Role;

/// What a route requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    /// Anyone
    Public,
    /// Any authenticated identity
    Authenticated,
    /// An identity holding the role
    Role(Role),
}

/// One row of the route table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteRule {
    pattern: Vec<String>,
    access: Access,
}

impl RouteRule {
    /// Rule for `pattern`.
    #[must_use]
    pub fn new(pattern: &str, access: Access) -> Self {
        Self {
            pattern: segments(pattern).map(ToString::to_string).collect(),
            access,
        }
    }

    /// Whether `path` matches this rule's pattern.
    #[must_use]
    pub fn matches(&self, path: &str) -> bool {
        let mut path = segments(path);
        for (i, part) in self.pattern.iter().enumerate() {
            if part == "**" && i + 1 == self.pattern.len() {
                return true;
            }
            match path.next() {
                Some(seg) if part == "*" || part == seg => {}
                _ => return false,
            }
        }
        path.next().is_none()
    }
}

fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Canonical form of a request path: empty segments dropped, so a trailing
/// or doubled `/` is ignored. Every path comparison in the chain uses it.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let mut normalized = String::with_capacity(path.len());
    for seg in segments(path) {
        normalized.push('/');
        normalized.push_str(seg);
    }
    if normalized.is_empty() {
        normalized.push('/');
    }
    normalized
}

/// Outcome of a policy check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Proceed to the handler
    Allow,
    /// No identity on a protected route
    Unauthenticated,
    /// Identity lacks the required role
    Forbidden,
}

/// Ordered route table.
pub struct RoutePolicy {
    rules: Vec<RouteRule>,
    fallback: Access,
    audit: Arc<AuditLog>,
}

impl RoutePolicy {
    /// Policy from explicit rules. Unmatched paths require `fallback`.
    #[must_use]
    pub fn new(rules: Vec<RouteRule>, fallback: Access, audit: Arc<AuditLog>) -> Self {
        Self {
            rules,
            fallback,
            audit,
        }
    }

    /// The blog API route table.
    #[must_use]
    pub fn blog_api(audit: Arc<AuditLog>) -> Self {
        let rules = vec![
            RouteRule::new("/api/auth/signup", Access::Public),
            RouteRule::new("/api/auth/login", Access::Public),
            RouteRule::new("/api/auth/refresh", Access::Public),
            RouteRule::new("/api/auth/users/**", Access::Role(Role::Admin)),
            RouteRule::new("/api/auth/**", Access::Authenticated),
            RouteRule::new("/api/security/**", Access::Role(Role::Admin)),
            RouteRule::new("/actuator/health", Access::Public),
            RouteRule::new("/actuator/info", Access::Public),
        ];
        Self::new(rules, Access::Authenticated, audit)
    }

    /// Access required for `path`.
    #[must_use]
    pub fn required(&self, path: &str) -> Access {
        self.rules
            .iter()
            .find(|rule| rule.matches(path))
            .map_or(self.fallback, |rule| rule.access)
    }

    /// Decide whether `user` may reach `path`.
    #[must_use]
    pub fn decide(&self, path: &str, user: Option<&AuthenticatedUser>) -> Decision {
        match (self.required(path), user) {
            (Access::Public, _) => Decision::Allow,
            (_, None) => Decision::Unauthenticated,
            (Access::Authenticated, Some(_)) => Decision::Allow,
            (Access::Role(role), Some(user)) if user.has_role(role) => Decision::Allow,
            (Access::Role(_), Some(_)) => Decision::Forbidden,
        }
    }
}

#[async_trait::async_trait]
impl Filter for RoutePolicy {
    async fn handle(&self, request: Request<Body>, next: Next) -> Response {
        let path = request.uri().path().to_string();
        let user = request.extensions().get::<AuthenticatedUser>().cloned();

        match self.decide(&path, user.as_ref()) {
            Decision::Allow => next.run(request).await,
            Decision::Unauthenticated => {
                debug!(path = %path, "Anonymous request to protected route");
                Error::Unauthorized(format!("authentication required for {path}")).into_response()
            }
            Decision::Forbidden => {
                let username = user.map(|u| u.username).unwrap_or_default();
                self.audit
                    .access_denied(&username, &client_info(&request), &path)
                    .await;
                Error::Forbidden(format!("{username} may not access {path}")).into_response()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::AuditConfig;
    use crate::store::InMemoryStore;

    fn policy() -> RoutePolicy {
        let clock = Arc::new(ManualClock::new(0));
        let store = Arc::new(InMemoryStore::new(clock.clone()));
        RoutePolicy::blog_api(Arc::new(AuditLog::new(store, AuditConfig::default(), clock)))
    }

    fn user(role: Role) -> AuthenticatedUser {
        AuthenticatedUser {
            id: 1,
            username: "alice".to_string(),
            role,
            authorities: vec![role.authority()],
            token: "t".to_string(),
        }
    }

    #[test]
    fn pattern_matching() {
        let rule = RouteRule::new("/api/auth/users/**", Access::Public);
        assert!(rule.matches("/api/auth/users/7/deactivate"));
        assert!(rule.matches("/api/auth/users"));
        assert!(!rule.matches("/api/auth/me"));

        let single = RouteRule::new("/api/*/status", Access::Public);
        assert!(single.matches("/api/blacklist/status"));
        assert!(!single.matches("/api/a/b/status"));

        let exact = RouteRule::new("/actuator/health", Access::Public);
        assert!(exact.matches("/actuator/health/"));
        assert!(!exact.matches("/actuator/health/db"));
    }

    #[test]
    fn normalized_paths() {
        assert_eq!(normalize_path("/actuator/health/"), "/actuator/health");
        assert_eq!(normalize_path("//api//auth/login"), "/api/auth/login");
        assert_eq!(normalize_path("/"), "/");
        assert_eq!(normalize_path(""), "/");

        let exact = RouteRule::new("/actuator/health", Access::Public);
        for path in ["/actuator/health/", "//actuator/health"] {
            assert_eq!(exact.matches(path), exact.matches(&normalize_path(path)));
        }
    }

    #[test]
    fn first_match_wins() {
        let p = policy();
        assert_eq!(p.required("/api/auth/login"), Access::Public);
        assert_eq!(p.required("/api/auth/users/3/activate"), Access::Role(Role::Admin));
        assert_eq!(p.required("/api/auth/me"), Access::Authenticated);
        assert_eq!(p.required("/api/security/blacklist/status"), Access::Role(Role::Admin));
        assert_eq!(p.required("/api/posts"), Access::Authenticated);
    }

    #[test]
    fn decisions() {
        let p = policy();
        let admin = user(Role::Admin);
        let regular = user(Role::User);

        assert_eq!(p.decide("/api/auth/login", None), Decision::Allow);
        assert_eq!(p.decide("/api/auth/me", None), Decision::Unauthenticated);
        assert_eq!(p.decide("/api/auth/me", Some(&regular)), Decision::Allow);
        assert_eq!(p.decide("/api/security/headers/test", None), Decision::Unauthenticated);
        assert_eq!(p.decide("/api/security/headers/test", Some(&regular)), Decision::Forbidden);
        assert_eq!(p.decide("/api/security/headers/test", Some(&admin)), Decision::Allow);
    }
}
