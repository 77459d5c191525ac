use super::{AppError, auth::AuthCtx};
use axum::response::Response;
use axum::{
    extract::OriginalUri,
    http::{Method, Request},
    middleware::Next,
};
use jobjar_shared::auth::Role;
use jobjar_shared::jwt::JwtClaims;
use percent_encoding::percent_decode_str;

/// Route-level role rules. Family scoping and ownership of ids that are
/// not in the path (job assignee, payment owner) are checked by handlers.
pub async fn enforce_acl(req: Request<axum::body::Body>, next: Next) -> Result<Response, AppError> {
    let path = req
        .extensions()
        .get::<OriginalUri>()
        .map(|orig| orig.0.path().to_string())
        .unwrap_or_else(|| req.uri().path().to_string());
    let method = req.method().clone();
    let Some(auth) = req.extensions().get::<AuthCtx>() else {
        return Err(AppError::unauthorized());
    };
    let claims = &auth.claims;

    let segs = segmented(&path);
    let api_prefix = ["api", "v1"];
    if !segs.as_slice().starts_with(&api_prefix) {
        tracing::warn!(?segs, "ACL: path outside api scope");
        return Err(AppError::forbidden());
    }
    let rest = &segs[api_prefix.len()..];

    let decision = match claims.role {
        Role::Parent => allow_parent(&method, rest),
        Role::Child => allow_child(&method, rest, claims),
    };

    if let Err(err) = decision {
        tracing::warn!(
            method = %method,
            path = %path,
            username = %claims.sub,
            role = ?claims.role,
            token_child = ?claims.child_id,
            "ACL: no rule matched; denying"
        );
        return Err(err);
    }

    Ok(next.run(req).await)
}

fn allow_parent(method: &Method, rest: &[&str]) -> Result<(), AppError> {
    let get = *method == Method::GET;
    match rest {
        ["auth", "me"] if get => Ok(()),
        ["children"] if get || *method == Method::POST => Ok(()),
        ["children", id]
            if (get || *method == Method::PATCH || *method == Method::DELETE) && is_id(id) =>
        {
            Ok(())
        }
        ["jobs"] if get || *method == Method::POST => Ok(()),
        ["jobs", id]
            if (get || *method == Method::PATCH || *method == Method::DELETE) && is_id(id) =>
        {
            Ok(())
        }
        ["payments"] if get => Ok(()),
        ["payments", "job", id] if (get || *method == Method::PATCH) && is_id(id) => Ok(()),
        ["account-types", id] if (get || *method == Method::PUT) && is_id(id) => Ok(()),
        ["allocation", id] if (get || *method == Method::PATCH) && is_id(id) => Ok(()),
        ["lessons"] if get || *method == Method::POST => Ok(()),
        ["lessons", id, "quizzes"] if get && is_id(id) => Ok(()),
        ["learning-progress"] if get => Ok(()),
        ["achievements"] if get || *method == Method::POST => Ok(()),
        ["dashboard-stats"] if get => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn allow_child(method: &Method, rest: &[&str], claims: &JwtClaims) -> Result<(), AppError> {
    let get = *method == Method::GET;
    match rest {
        ["auth", "me"] if get => Ok(()),
        ["children"] if get => Ok(()),
        ["children", child] if get => ensure_child(claims, child),
        ["jobs"] if get => Ok(()),
        ["jobs", id] if (get || *method == Method::PATCH) && is_id(id) => Ok(()),
        ["payments"] if get => Ok(()),
        ["payments", "job", id] if get && is_id(id) => Ok(()),
        ["account-types", id] if get && is_id(id) => Ok(()),
        ["allocation", child] if get => ensure_child(claims, child),
        ["lessons"] if get => Ok(()),
        ["lessons", id, "quizzes"] if get && is_id(id) => Ok(()),
        ["lessons", id, "progress"] if *method == Method::POST && is_id(id) => Ok(()),
        ["learning-progress"] if get => Ok(()),
        ["achievements"] if get => Ok(()),
        ["dashboard-stats"] if get => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}

fn segmented(path: &str) -> Vec<&str> {
    path.split('/').filter(|s| !s.is_empty()).collect()
}

fn decode(seg: &str) -> String {
    percent_decode_str(seg).decode_utf8_lossy().to_string()
}

fn is_id(seg: &str) -> bool {
    decode(seg).parse::<i32>().is_ok()
}

fn ensure_child(claims: &JwtClaims, seg: &str) -> Result<(), AppError> {
    let expected = claims.child_id.ok_or_else(AppError::forbidden)?;
    match decode(seg).parse::<i32>() {
        Ok(provided) if provided == expected => Ok(()),
        _ => Err(AppError::forbidden()),
    }
}
