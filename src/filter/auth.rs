//! Bearer token authentication filter.
//!
//! Never rejects. A request with no token, a bad token, a refresh token or an
//! account that cannot be resolved continues unauthenticated and the
//! authorization stage decides.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::FromRequestParts,
    http::{Request, request::Parts},
    middleware::Next,
    response::Response,
};
use tracing::{debug, error};

use super::Filter;
use crate::Error;
use crate::token::{TokenKind, TokenService, bearer_token};
use crate::users::{Role, User, UserDirectory};

/// Identity attached to an authenticated request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    /// User id
    pub id: u64,
    /// Username (token subject)
    pub username: String,
    /// Role
    pub role: Role,
    /// Capabilities derived from the role
    pub authorities: Vec<String>,
    /// The access token presented with the request
    pub token: String,
}

impl AuthenticatedUser {
    fn new(user: &User, token: &str) -> Self {
        Self {
            id: user.id,
            username: user.username.clone(),
            role: user.role,
            authorities: user.authorities(),
            token: token.to_string(),
        }
    }

    /// Whether the identity holds `role`.
    #[must_use]
    pub fn has_role(&self, role: Role) -> bool {
        let authority = role.authority();
        self.authorities.iter().any(|a| *a == authority)
    }
}

impl<S: Send + Sync> FromRequestParts<S> for AuthenticatedUser {
    type Rejection = Error;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Self>()
            .cloned()
            .ok_or_else(|| Error::Unauthorized("no authenticated identity".to_string()))
    }
}

/// Resolves bearer tokens to identities.
pub struct TokenAuthFilter {
    tokens: Arc<TokenService>,
    users: Arc<dyn UserDirectory>,
}

impl TokenAuthFilter {
    /// Create the filter.
    #[must_use]
    pub fn new(tokens: Arc<TokenService>, users: Arc<dyn UserDirectory>) -> Self {
        Self { tokens, users }
    }

    async fn authenticate(&self, token: &str) -> Option<AuthenticatedUser> {
        if !self.tokens.validate(token).await {
            return None;
        }
        if self.tokens.kind_of(token) != Some(TokenKind::Access) {
            debug!("Non-access token presented as bearer credential");
            return None;
        }
        let username = self.tokens.subject_of(token)?;
        match self.users.find_by_username(&username).await {
            Ok(Some(user)) if user.active => {
                debug!(user = %user.username, "Authenticated request");
                Some(AuthenticatedUser::new(&user, token))
            }
            Ok(Some(_)) => {
                debug!(user = %username, "Token belongs to a disabled account");
                None
            }
            Ok(None) => {
                debug!(user = %username, "Token subject not found");
                None
            }
            Err(e) => {
                error!(error = %e, "User lookup failed, continuing unauthenticated");
                None
            }
        }
    }
}

#[async_trait::async_trait]
impl Filter for TokenAuthFilter {
    async fn handle(&self, mut request: Request<Body>, next: Next) -> Response {
        let token = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(bearer_token)
            .map(ToString::to_string);

        if let Some(token) = token {
            if let Some(user) = self.authenticate(&token).await {
                request.extensions_mut().insert(user);
            }
        }
        next.run(request).await
    }
}
