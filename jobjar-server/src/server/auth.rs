use axum::http::{Request, header};
use axum::middleware::Next;
use axum::response::Response;
use chrono::{Duration, Utc};
use jobjar_shared::auth::Role;
use jobjar_shared::jwt::{self, JwtClaims};
use tracing::{error, warn};

use super::{AppError, AppState};
use crate::storage::models::User;

/// How many hours before mandatory re-login.
const TOKEN_TTL_HOURS: i64 = 24;

#[derive(Clone, Debug)]
pub struct AuthCtx {
    pub claims: JwtClaims,
}

impl AuthCtx {
    pub fn is_parent(&self) -> bool {
        self.claims.role == Role::Parent
    }
}

pub async fn require_bearer(
    axum::extract::State(state): axum::extract::State<AppState>,
    mut req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AppError> {
    let unauthorized = || Err(AppError::unauthorized());
    let header_val = match req.headers().get(header::AUTHORIZATION) {
        Some(v) => v,
        None => return unauthorized(),
    };
    let header_str = header_val.to_str().map_err(|_| AppError::unauthorized())?;
    let Some(token) = header_str.strip_prefix("Bearer ") else {
        return unauthorized();
    };

    let claims = match jwt::decode_and_verify(token, state.config.jwt_secret.as_bytes()) {
        Ok(c) => c,
        Err(e) => {
            warn!(error=%e, "auth: jwt decode failed");
            return unauthorized();
        }
    };

    // The user may have been removed since the token was issued
    match state.store.get_user(claims.user_id).await {
        Ok(Some(user)) if user.family_id == claims.family_id => {}
        Ok(_) => {
            warn!(user_id = claims.user_id, username = %claims.sub, "auth: token user no longer exists");
            return unauthorized();
        }
        Err(e) => {
            error!(user_id = claims.user_id, error=%e, "auth: user lookup failed");
            return Err(AppError::internal(e));
        }
    }

    let auth = AuthCtx { claims };
    req.extensions_mut().insert(auth);
    Ok(next.run(req).await)
}

pub async fn issue_jwt_for_user(state: &AppState, user: &User) -> Result<String, AppError> {
    let role: Role = user.role.parse().map_err(|e: String| {
        error!(username = %user.username, error = %e, "login: stored role is invalid");
        AppError::internal(e)
    })?;
    let child_id = match role {
        Role::Parent => None,
        Role::Child => {
            let child = state
                .store
                .get_child_by_user(user.id)
                .await?
                .ok_or_else(|| {
                    error!(username = %user.username, "login: child user has no child profile");
                    AppError::internal("child user missing child profile")
                })?;
            Some(child.id)
        }
    };
    let exp = (Utc::now() + Duration::hours(TOKEN_TTL_HOURS)).timestamp();
    let claims = JwtClaims {
        sub: user.username.clone(),
        jti: uuid::Uuid::new_v4().to_string(),
        exp,
        user_id: user.id,
        role,
        family_id: user.family_id,
        child_id,
    };
    let token = jwt::encode(&claims, state.config.jwt_secret.as_bytes()).map_err(|e| {
        error!(username = %user.username, error=%e, "login: jwt encode failed");
        AppError::internal(e)
    })?;
    Ok(token)
}
