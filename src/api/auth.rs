//! `/api/auth/*` handlers.

use std::sync::Arc;

use axum::{
    Json,
    body::Bytes,
    extract::{Path, State},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::{AppState, MessageResponse};
use crate::filter::{AuthenticatedUser, Client};
use crate::token::TokenKind;
use crate::users::{
    MAX_NICKNAME_LEN, NewUser, Role, User, validate_password, validate_signup,
};
use crate::{Error, Result};

/// Public view of a user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserResponse {
    /// User id
    pub id: u64,
    /// Login name
    pub username: String,
    /// Email address
    pub email: String,
    /// Display name
    pub nickname: String,
    /// Avatar URL
    pub profile_image: Option<String>,
    /// Role
    pub role: Role,
    /// Whether the account is enabled
    pub active: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct SignupRequest {
    username: String,
    email: String,
    password: String,
    nickname: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct LoginRequest {
    username: String,
    password: String,
}

/// Tokens issued on login.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    /// Short-lived access token
    pub access_token: String,
    /// Long-lived refresh token
    pub refresh_token: String,
    /// Always `"Bearer"`
    pub token_type: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
    /// The logged-in user
    pub user_info: UserResponse,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RefreshRequest {
    refresh_token: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct RefreshResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: u64,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LogoutRequest {
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct UpdateProfileRequest {
    nickname: Option<String>,
    profile_image: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct ChangePasswordRequest {
    current_password: String,
    new_password: String,
}

const BAD_CREDENTIALS: &str = "Invalid username or password";

async fn load_user(state: &AppState, username: &str) -> Result<User> {
    state
        .users
        .find_by_username(username)
        .await?
        .ok_or_else(|| Error::NotFound("User".to_string()))
}

/// `POST /api/auth/signup`
pub(super) async fn signup(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SignupRequest>,
) -> Result<Json<UserResponse>> {
    validate_signup(&body.username, &body.email, &body.password, body.nickname.as_deref())?;
    let password_hash = state.hash_password(&body.password).await?;

    let user = state
        .users
        .create(NewUser {
            username: body.username,
            email: body.email,
            password_hash,
            nickname: body.nickname,
            role: Role::User,
        })
        .await?;

    info!(user = %user.username, "User signed up");
    Ok(Json(UserResponse::from(&user)))
}

/// `POST /api/auth/login`
pub(super) async fn login(
    State(state): State<Arc<AppState>>,
    Client(client): Client,
    Json(body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>> {
    let Some(user) = state.users.find_by_username(&body.username).await? else {
        state.verify_decoy(&body.password).await;
        state
            .audit
            .login_failure(&body.username, &client, "unknown user")
            .await;
        return Err(Error::Unauthorized(BAD_CREDENTIALS.to_string()));
    };

    if !state.verify_password(&body.password, &user.password_hash).await {
        state
            .audit
            .login_failure(&user.username, &client, "bad credentials")
            .await;
        return Err(Error::Unauthorized(BAD_CREDENTIALS.to_string()));
    }

    if !user.active {
        state
            .audit
            .account_locked(&user.username, &client, "account disabled")
            .await;
        return Err(Error::Unauthorized("account disabled".to_string()));
    }

    let access_token = state.tokens.issue_access_token(&user.username)?;
    let refresh_token = state.tokens.issue_refresh_token(&user.username)?;
    state.audit.login_success(&user.username, &client).await;

    Ok(Json(LoginResponse {
        access_token,
        refresh_token,
        token_type: "Bearer".to_string(),
        expires_in: state.tokens.access_ttl().as_secs(),
        user_info: UserResponse::from(&user),
    }))
}

/// `POST /api/auth/refresh`
pub(super) async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<RefreshResponse>> {
    let token = body.refresh_token.as_str();
    if !state.tokens.validate(token).await || state.tokens.kind_of(token) != Some(TokenKind::Refresh) {
        return Err(Error::Unauthorized("invalid refresh token".to_string()));
    }
    let username = state
        .tokens
        .subject_of(token)
        .ok_or_else(|| Error::Unauthorized("invalid refresh token".to_string()))?;

    match state.users.find_by_username(&username).await? {
        Some(user) if user.active => {}
        _ => return Err(Error::Unauthorized("refresh for unusable account".to_string())),
    }

    Ok(Json(RefreshResponse {
        access_token: state.tokens.issue_access_token(&username)?,
        token_type: "Bearer",
        expires_in: state.tokens.access_ttl().as_secs(),
    }))
}

/// `POST /api/auth/logout`
///
/// The body is optional; when it names a refresh token belonging to the
/// caller, that token is revoked too.
pub(super) async fn logout(
    State(state): State<Arc<AppState>>,
    Client(client): Client,
    user: AuthenticatedUser,
    body: Bytes,
) -> Result<Json<MessageResponse>> {
    let request: LogoutRequest = if body.is_empty() {
        LogoutRequest::default()
    } else {
        serde_json::from_slice(&body)?
    };

    state.tokens.invalidate(&user.token).await;
    if let Some(refresh) = request.refresh_token.as_deref() {
        if state.tokens.subject_of(refresh).as_deref() == Some(user.username.as_str()) {
            state.tokens.invalidate(refresh).await;
        } else {
            warn!(user = %user.username, "Logout named a refresh token of another subject");
        }
    }

    state.audit.logout(&user.username, &client).await;
    state
        .audit
        .token_invalidation(&user.username, &client, "logout")
        .await;
    Ok(Json(MessageResponse::new("Logged out")))
}

/// `GET /api/auth/me`
pub(super) async fn me(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
) -> Result<Json<UserResponse>> {
    let record = load_user(&state, &user.username).await?;
    Ok(Json(UserResponse::from(&record)))
}

/// `PUT /api/auth/profile`
pub(super) async fn update_profile(
    State(state): State<Arc<AppState>>,
    user: AuthenticatedUser,
    Json(body): Json<UpdateProfileRequest>,
) -> Result<Json<UserResponse>> {
    let mut record = load_user(&state, &user.username).await?;
    if let Some(nickname) = body.nickname {
        if nickname.chars().count() > MAX_NICKNAME_LEN {
            return Err(Error::bad_request(
                "INVALID_NICKNAME",
                format!("Nickname must be at most {MAX_NICKNAME_LEN} characters"),
            ));
        }
        record.nickname = nickname;
    }
    if let Some(profile_image) = body.profile_image {
        record.profile_image = Some(profile_image);
    }
    let updated = state.users.update(record).await?;
    Ok(Json(UserResponse::from(&updated)))
}

/// `PUT /api/auth/password`
///
/// Revokes the access token used for the request.
pub(super) async fn change_password(
    State(state): State<Arc<AppState>>,
    Client(client): Client,
    user: AuthenticatedUser,
    Json(body): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>> {
    let mut record = load_user(&state, &user.username).await?;
    if !state
        .verify_password(&body.current_password, &record.password_hash)
        .await
    {
        return Err(Error::bad_request(
            "INVALID_PASSWORD",
            "Current password does not match",
        ));
    }
    validate_password(&body.new_password)?;

    record.password_hash = state.hash_password(&body.new_password).await?;
    state.users.update(record).await?;
    state.tokens.invalidate(&user.token).await;

    state.audit.password_change(&user.username, &client).await;
    state
        .audit
        .token_invalidation(&user.username, &client, "password change")
        .await;
    Ok(Json(MessageResponse::new("Password changed")))
}

async fn set_active(state: &AppState, id: u64, active: bool) -> Result<UserResponse> {
    let mut record = state
        .users
        .find_by_id(id)
        .await?
        .ok_or_else(|| Error::NotFound("User".to_string()))?;
    record.active = active;
    let updated = state.users.update(record).await?;
    info!(user = %updated.username, active, "Account status changed");
    Ok(UserResponse::from(&updated))
}

/// `PUT /api/auth/users/{id}/deactivate`
pub(super) async fn deactivate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<UserResponse>> {
    set_active(&state, id, false).await.map(Json)
}

/// `PUT /api/auth/users/{id}/activate`
pub(super) async fn activate(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> Result<Json<UserResponse>> {
    set_active(&state, id, true).await.map(Json)
}

/// `GET /api/auth/admin/check`
pub(super) async fn admin_check(user: AuthenticatedUser) -> Json<bool> {
    Json(user.has_role(Role::Admin))
}
