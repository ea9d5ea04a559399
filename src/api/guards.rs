use async_trait::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

use crate::api::errors::ApiError;
use crate::core::{security, state::AppState};
use crate::db::types::UserRole;

/// Identity asserted by the auth service's bearer token.
#[derive(Debug, Clone)]
pub(crate) struct AuthUser {
    pub(crate) id: String,
    pub(crate) role: UserRole,
}

pub(crate) struct CurrentUser(pub(crate) AuthUser);
pub(crate) struct CurrentStudent(pub(crate) AuthUser);
pub(crate) struct CurrentGrader(pub(crate) AuthUser);
pub(crate) struct CurrentAdmin(pub(crate) AuthUser);

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        const REJECTED: ApiError = ApiError::Unauthorized("Invalid authentication credentials");

        let token = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .ok_or(REJECTED)?;

        let claims = security::verify_token(token, state.settings()).map_err(|_| REJECTED)?;
        if claims.sub.trim().is_empty() {
            return Err(REJECTED);
        }

        Ok(CurrentUser(AuthUser { id: claims.sub, role: claims.role }))
    }
}

async fn with_role(
    parts: &mut Parts,
    state: &AppState,
    allowed: fn(UserRole) -> bool,
    denied: &'static str,
) -> Result<AuthUser, ApiError> {
    let CurrentUser(user) = CurrentUser::from_request_parts(parts, state).await?;
    if allowed(user.role) {
        Ok(user)
    } else {
        Err(ApiError::Forbidden(denied))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentStudent {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let allowed = |role: UserRole| role == UserRole::Student;
        with_role(parts, state, allowed, "Only students can take exams").await.map(CurrentStudent)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentGrader {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        with_role(parts, state, UserRole::is_grader, "Grader access required")
            .await
            .map(CurrentGrader)
    }
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentAdmin {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let allowed = |role: UserRole| role == UserRole::Admin;
        with_role(parts, state, allowed, "Admin access required").await.map(CurrentAdmin)
    }
}
