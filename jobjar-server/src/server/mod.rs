mod acl;
pub mod auth;
mod config;

use std::collections::HashMap;
use std::sync::Arc;

use crate::server::auth::AuthCtx;
use crate::storage::models::{
    AccountTypes, Achievement, AllocationSettings, Child, Job, LearningProgress, Lesson, Payment,
    Quiz, User,
};
use crate::storage::{JobPatch, NewChildInput, NewJobInput, StorageError, Store};
use axum::http::{HeaderName, HeaderValue};
use axum::middleware;
use axum::response::Response as AxumResponse;
use axum::{
    Json, Router,
    extract::{Extension, FromRequest, Path, Query, Request, State, rejection::JsonRejection},
    http::{Method, StatusCode, header},
    routing::{get, post},
};
use bcrypt::verify;
use chrono::NaiveDateTime;
pub use config::{AppConfig, ConfigError, DEFAULT_LISTEN_PORT};
use jobjar_shared::api;
use jobjar_shared::auth::Role;
use jobjar_shared::domain::{AccountSet, JobStatus, Percentages, Split};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{Span, info, info_span, warn};
use uuid::Uuid;

type ChildLockMap = Arc<Mutex<HashMap<i32, Arc<Mutex<()>>>>>;

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub store: Store,
    // Serialises balance-changing requests per child
    child_locks: ChildLockMap,
    shutdown: CancellationToken,
}

impl AppState {
    pub fn new(config: AppConfig, store: Store) -> Self {
        Self {
            config,
            store,
            child_locks: Default::default(),
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    async fn child_lock(&self, child_id: i32) -> Arc<Mutex<()>> {
        let mut map = self.child_locks.lock().await;
        map.entry(child_id).or_default().clone()
    }
}

#[derive(Clone, Debug)]
struct ReqId(pub String);

pub fn router(state: AppState) -> Router {
    let private = Router::new()
        .route("/api/v1/auth/me", get(api_auth_me))
        .route(
            "/api/v1/children",
            get(api_list_children).post(api_create_child),
        )
        .route(
            "/api/v1/children/{id}",
            get(api_get_child)
                .patch(api_update_child)
                .delete(api_delete_child),
        )
        .route("/api/v1/jobs", get(api_list_jobs).post(api_create_job))
        .route(
            "/api/v1/jobs/{id}",
            get(api_get_job).patch(api_update_job).delete(api_delete_job),
        )
        .route("/api/v1/payments", get(api_list_payments))
        .route(
            "/api/v1/payments/job/{job_id}",
            get(api_get_job_payment).patch(api_update_job_payment),
        )
        .route(
            "/api/v1/account-types/{family_id}",
            get(api_get_account_types).put(api_put_account_types),
        )
        .route(
            "/api/v1/allocation/{child_id}",
            get(api_get_allocation).patch(api_update_allocation),
        )
        .route(
            "/api/v1/lessons",
            get(api_list_lessons).post(api_create_lesson),
        )
        .route("/api/v1/lessons/{id}/quizzes", get(api_list_quizzes))
        .route("/api/v1/lessons/{id}/progress", post(api_complete_lesson))
        .route("/api/v1/learning-progress", get(api_learning_progress))
        .route(
            "/api/v1/achievements",
            get(api_list_achievements).post(api_create_achievement),
        )
        .route("/api/v1/dashboard-stats", get(api_dashboard_stats))
        .with_state(state.clone())
        .layer(middleware::from_fn(acl::enforce_acl))
        .layer(middleware::from_fn(set_auth_span_fields))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_bearer,
        ));

    // Trace with request context (method, path, request_id)
    let trace = TraceLayer::new_for_http().make_span_with(|req: &axum::http::Request<_>| {
        let request_id = req
            .extensions()
            .get::<ReqId>()
            .map(|r| r.0.clone())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        info_span!(
            "request",
            method = %req.method(),
            path = %req.uri().path(),
            request_id = %request_id,
            username = tracing::field::Empty,
            role = tracing::field::Empty,
            family_id = tracing::field::Empty,
            child_id = tracing::field::Empty
        )
    });

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/api/version", get(api_version))
        .route("/api/v1/auth/login", post(api_auth_login))
        .merge(private)
        .with_state(state.clone())
        .layer(trace)
        .layer(middleware::from_fn(add_security_headers))
        .layer(middleware::from_fn(add_request_id));

    // Optionally add CORS for dev if configured
    if let Some(origin) = &state.config.dev_cors_origin {
        let hv = header::HeaderValue::from_str(origin)
            .unwrap_or(header::HeaderValue::from_static("http://localhost:5173"));
        let cors = CorsLayer::new()
            .allow_origin(hv)
            .allow_methods([
                Method::GET,
                Method::POST,
                Method::PUT,
                Method::PATCH,
                Method::DELETE,
                Method::OPTIONS,
            ])
            .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);
        app.layer(cors)
    } else {
        app
    }
}

async fn health() -> &'static str {
    "ok"
}

async fn api_version() -> Json<api::VersionDto> {
    Json(api::VersionDto {
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

async fn add_request_id(
    mut req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let hdr = HeaderName::from_static("x-request-id");
    // Use provided x-request-id if present, else generate
    let rid = req
        .headers()
        .get(&hdr)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .unwrap_or_else(|| Uuid::new_v4().to_string());
    req.extensions_mut().insert(ReqId(rid.clone()));
    let mut resp = next.run(req).await;
    if let Ok(hv) = HeaderValue::from_str(&rid) {
        resp.headers_mut().insert(hdr, hv);
    }
    Ok(resp)
}

async fn add_security_headers(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    let path = req.uri().path().to_string();
    let mut resp = next.run(req).await;

    let headers = resp.headers_mut();
    headers.insert(
        HeaderName::from_static("x-content-type-options"),
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(
        HeaderName::from_static("x-frame-options"),
        HeaderValue::from_static("SAMEORIGIN"),
    );
    headers.insert(
        HeaderName::from_static("referrer-policy"),
        HeaderValue::from_static("no-referrer"),
    );

    // Balances change underneath clients; never cache API answers
    if path == "/healthz" || path.starts_with("/api/") {
        headers.insert(
            HeaderName::from_static("cache-control"),
            HeaderValue::from_static("no-store, no-cache, must-revalidate, private"),
        );
        headers.insert(
            HeaderName::from_static("pragma"),
            HeaderValue::from_static("no-cache"),
        );
    }

    Ok(resp)
}

async fn set_auth_span_fields(
    req: axum::http::Request<axum::body::Body>,
    next: axum::middleware::Next,
) -> Result<AxumResponse, AppError> {
    if let Some(auth) = req.extensions().get::<AuthCtx>() {
        let span = Span::current();
        span.record("username", tracing::field::display(&auth.claims.sub));
        span.record("role", tracing::field::debug(&auth.claims.role));
        span.record("family_id", auth.claims.family_id);
        if let Some(cid) = auth.claims.child_id {
            span.record("child_id", cid);
        }
    }
    Ok(next.run(req).await)
}

/// `Json` whose rejection is reported as a coded 400 instead of axum's
/// plain-text 415/422.
struct JsonBody<T>(T);

impl<S, T> FromRequest<S> for JsonBody<T>
where
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(JsonBody(value))
    }
}

// Auth

async fn api_auth_login(
    State(state): State<AppState>,
    JsonBody(body): JsonBody<api::AuthReq>,
) -> Result<Json<api::AuthResp>, AppError> {
    let user = state
        .store
        .find_user_by_username(&body.username)
        .await?
        .ok_or_else(|| {
            warn!(username=%body.username, "login: unknown username");
            AppError::unauthorized()
        })?;
    if !verify(&body.password, &user.password_hash).map_err(|e| {
        tracing::error!(username=%body.username, error=%e, "login: bcrypt verify failed");
        AppError::internal(e)
    })? {
        warn!(username=%body.username, "login: invalid password");
        return Err(AppError::unauthorized());
    }
    let token = auth::issue_jwt_for_user(&state, &user).await?;
    info!(username = %user.username, role = %user.role, "login: token issued");
    Ok(Json(api::AuthResp {
        token,
        user: user_dto(user)?,
    }))
}

async fn api_auth_me(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<api::UserDto>, AppError> {
    let user = state
        .store
        .get_user(auth.claims.user_id)
        .await?
        .ok_or_else(|| AppError::not_found("user not found"))?;
    Ok(Json(user_dto(user)?))
}

// Children

async fn api_list_children(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::ChildDto>>, AppError> {
    let rows = state.store.list_children(auth.claims.family_id).await?;
    Ok(Json(rows.into_iter().map(child_dto).collect()))
}

async fn api_create_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    JsonBody(body): JsonBody<api::CreateChildReq>,
) -> Result<(StatusCode, Json<api::ChildDto>), AppError> {
    let name = body.name.trim().to_string();
    if name.is_empty() {
        return Err(AppError::bad_request("name is required"));
    }
    if body.age <= 0 {
        return Err(AppError::bad_request("age must be positive"));
    }
    let username = match body.username {
        Some(u) if !u.trim().is_empty() => u.trim().to_string(),
        _ => default_username(&name),
    };
    if username.is_empty() {
        return Err(AppError::bad_request("username is required"));
    }
    let password = body
        .password
        .unwrap_or_else(|| state.config.default_child_password.clone());
    let password_hash = hash_password(password).await?;

    let child = state
        .store
        .create_child(NewChildInput {
            family_id: auth.claims.family_id,
            name,
            age: body.age,
            username,
            password_hash,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(child_dto(child))))
}

async fn api_get_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<api::ChildDto>, AppError> {
    let child = family_child(&state, &auth, id).await?;
    Ok(Json(child_dto(child)))
}

async fn api_update_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
    JsonBody(body): JsonBody<api::UpdateChildReq>,
) -> Result<Json<api::ChildDto>, AppError> {
    family_child(&state, &auth, id).await?;
    let name = match body.name {
        Some(n) if n.trim().is_empty() => return Err(AppError::bad_request("name is required")),
        Some(n) => Some(n.trim().to_string()),
        None => None,
    };
    if body.age.is_some_and(|a| a <= 0) {
        return Err(AppError::bad_request("age must be positive"));
    }
    let child = state.store.update_child(id, name, body.age).await?;
    Ok(Json(child_dto(child)))
}

async fn api_delete_child(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    family_child(&state, &auth, id).await?;
    let lock = state.child_lock(id).await;
    let _guard = lock.lock().await;
    if !state.store.delete_child(id).await? {
        return Err(AppError::not_found(format!("child not found: {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// Jobs

async fn api_list_jobs(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::JobDto>>, AppError> {
    let rows = match auth.claims.role {
        Role::Parent => state.store.list_jobs_for_family(auth.claims.family_id).await?,
        Role::Child => state.store.list_jobs_for_child(own_child_id(&auth)?).await?,
    };
    Ok(Json(
        rows.into_iter()
            .map(job_dto)
            .collect::<Result<Vec<_>, _>>()?,
    ))
}

async fn api_create_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    JsonBody(body): JsonBody<api::CreateJobReq>,
) -> Result<(StatusCode, Json<api::JobDto>), AppError> {
    let title = body.title.trim().to_string();
    if title.is_empty() {
        return Err(AppError::bad_request("title is required"));
    }
    // Surfaces a foreign child as 404 before touching the jobs table
    family_child(&state, &auth, body.assigned_to_id).await?;
    let job = state
        .store
        .create_job(NewJobInput {
            family_id: auth.claims.family_id,
            title,
            description: body.description,
            amount: body.amount,
            recurrence: body.recurrence,
            assigned_to_id: body.assigned_to_id,
            icon: body.icon,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(job_dto(job)?)))
}

async fn api_get_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<api::JobDto>, AppError> {
    let job = family_job(&state, &auth, id).await?;
    Ok(Json(job_dto(job)?))
}

async fn api_update_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
    JsonBody(body): JsonBody<api::UpdateJobReq>,
) -> Result<Json<api::JobDto>, AppError> {
    let job = family_job(&state, &auth, id).await?;
    if !auth.is_parent() {
        // Children only report progress on their own jobs
        let allowed = matches!(
            body.status,
            Some(JobStatus::InProgress) | Some(JobStatus::Completed)
        );
        if !allowed || body.edits_fields() || body.custom_allocation.is_some() {
            warn!(job_id = id, username = %auth.claims.sub, "update_job: child attempted a parent-only change");
            return Err(AppError::forbidden());
        }
    }
    if body.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
        return Err(AppError::bad_request("title cannot be empty"));
    }

    let lock = state.child_lock(job.assigned_to_id).await;
    let _guard = lock.lock().await;
    let (job, payment) = state
        .store
        .patch_job(
            id,
            JobPatch {
                title: body.title.map(|t| t.trim().to_string()),
                description: body.description,
                amount: body.amount,
                recurrence: body.recurrence,
                icon: body.icon,
                status: body.status,
                custom_allocation: body.custom_allocation,
            },
        )
        .await?;
    if let Some(p) = &payment {
        info!(job_id = id, payment_id = p.id, by = %auth.claims.sub, "update_job: approved");
    }
    Ok(Json(job_dto(job)?))
}

async fn api_delete_job(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<StatusCode, AppError> {
    let job = family_job(&state, &auth, id).await?;
    let lock = state.child_lock(job.assigned_to_id).await;
    let _guard = lock.lock().await;
    if !state.store.delete_job(id).await? {
        return Err(AppError::not_found(format!("job not found: {id}")));
    }
    Ok(StatusCode::NO_CONTENT)
}

// Payments

async fn api_list_payments(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
) -> Result<Json<Vec<api::PaymentDto>>, AppError> {
    let rows = match auth.claims.role {
        Role::Parent => {
            state
                .store
                .list_payments_for_family(auth.claims.family_id)
                .await?
        }
        Role::Child => {
            state
                .store
                .list_payments_for_child(own_child_id(&auth)?)
                .await?
        }
    };
    Ok(Json(rows.into_iter().map(payment_dto).collect()))
}

async fn api_get_job_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(job_id): Path<i32>,
) -> Result<Json<api::PaymentDto>, AppError> {
    family_job(&state, &auth, job_id).await?;
    let payment = state
        .store
        .get_payment_for_job(job_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("no payment for job {job_id}")))?;
    Ok(Json(payment_dto(payment)))
}

async fn api_update_job_payment(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(job_id): Path<i32>,
    JsonBody(body): JsonBody<Split>,
) -> Result<Json<api::PaymentDto>, AppError> {
    let job = family_job(&state, &auth, job_id).await?;
    let lock = state.child_lock(job.assigned_to_id).await;
    let _guard = lock.lock().await;
    let payment = state.store.update_payment_split(job_id, body).await?;
    Ok(Json(payment_dto(payment)))
}

// Account types & allocation

async fn api_get_account_types(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(family_id): Path<i32>,
) -> Result<Json<api::AccountTypesDto>, AppError> {
    ensure_family(&auth, family_id)?;
    let row = state.store.get_or_create_account_types(family_id).await?;
    Ok(Json(account_types_dto(row)))
}

async fn api_put_account_types(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(family_id): Path<i32>,
    JsonBody(body): JsonBody<AccountSet>,
) -> Result<Json<api::AccountTypesDto>, AppError> {
    ensure_family(&auth, family_id)?;
    let row = state.store.put_account_types(family_id, body).await?;
    Ok(Json(account_types_dto(row)))
}

async fn api_get_allocation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(child_id): Path<i32>,
) -> Result<Json<api::AllocationDto>, AppError> {
    family_child(&state, &auth, child_id).await?;
    let row = state
        .store
        .get_allocation(child_id)
        .await?
        .ok_or_else(|| AppError::not_found(format!("allocation for child {child_id}")))?;
    Ok(Json(allocation_dto(row)))
}

async fn api_update_allocation(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(child_id): Path<i32>,
    JsonBody(body): JsonBody<Percentages>,
) -> Result<Json<api::AllocationDto>, AppError> {
    family_child(&state, &auth, child_id).await?;
    let row = state.store.update_allocation(child_id, body).await?;
    Ok(Json(allocation_dto(row)))
}

// Learning

async fn api_list_lessons(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Query(q): Query<api::LessonQuery>,
) -> Result<Json<Vec<api::LessonDto>>, AppError> {
    let rows = state
        .store
        .list_lessons(auth.claims.family_id, q.category)
        .await?;
    Ok(Json(
        rows.into_iter()
            .map(lesson_dto)
            .collect::<Result<Vec<_>, _>>()?,
    ))
}

async fn api_create_lesson(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    JsonBody(body): JsonBody<api::CreateLessonReq>,
) -> Result<(StatusCode, Json<api::LessonDto>), AppError> {
    if body.title.trim().is_empty() || body.content.trim().is_empty() {
        return Err(AppError::bad_request("title and content are required"));
    }
    let lesson = state
        .store
        .create_lesson(
            auth.claims.family_id,
            body.category,
            body.title.trim().to_string(),
            body.content,
            body.video_url,
        )
        .await?;
    Ok((StatusCode::CREATED, Json(lesson_dto(lesson)?)))
}

async fn api_list_quizzes(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
) -> Result<Json<Vec<api::QuizDto>>, AppError> {
    visible_lesson(&state, &auth, id).await?;
    let rows = state.store.list_quizzes(id).await?;
    Ok(Json(
        rows.into_iter()
            .map(quiz_dto)
            .collect::<Result<Vec<_>, _>>()?,
    ))
}

async fn api_complete_lesson(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Path(id): Path<i32>,
    JsonBody(body): JsonBody<api::CompleteLessonReq>,
) -> Result<Json<api::LearningProgressDto>, AppError> {
    let child_id = own_child_id(&auth)?;
    let score = body.quiz_score;
    if score.is_some_and(|s| !(0..=100).contains(&s)) {
        return Err(AppError::bad_request("quizScore must be between 0 and 100"));
    }
    visible_lesson(&state, &auth, id).await?;
    let row = state
        .store
        .record_lesson_completion(child_id, id, score)
        .await?;
    Ok(Json(progress_dto(row)))
}

async fn api_learning_progress(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Query(q): Query<api::ChildQuery>,
) -> Result<Json<Vec<api::LearningProgressDto>>, AppError> {
    let child_id = requested_child(&state, &auth, q.child_id).await?;
    let rows = state.store.list_learning_progress(child_id).await?;
    Ok(Json(rows.into_iter().map(progress_dto).collect()))
}

async fn api_list_achievements(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Query(q): Query<api::ChildQuery>,
) -> Result<Json<Vec<api::AchievementDto>>, AppError> {
    let child_id = requested_child(&state, &auth, q.child_id).await?;
    let rows = state.store.list_achievements(child_id).await?;
    Ok(Json(rows.into_iter().map(achievement_dto).collect()))
}

async fn api_create_achievement(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    JsonBody(body): JsonBody<api::CreateAchievementReq>,
) -> Result<(StatusCode, Json<api::AchievementDto>), AppError> {
    if body.title.trim().is_empty() {
        return Err(AppError::bad_request("title is required"));
    }
    family_child(&state, &auth, body.child_id).await?;
    let row = state
        .store
        .create_achievement(body.child_id, body.title, body.description, body.icon)
        .await?;
    Ok((StatusCode::CREATED, Json(achievement_dto(row))))
}

async fn api_dashboard_stats(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthCtx>,
    Query(q): Query<api::ChildQuery>,
) -> Result<Json<api::DashboardStatsDto>, AppError> {
    let child = match (auth.claims.role, q.child_id) {
        (Role::Parent, None) => state
            .store
            .list_children(auth.claims.family_id)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::not_found("family has no children"))?,
        (_, requested) => {
            let id = requested_child(&state, &auth, requested).await?;
            family_child(&state, &auth, id).await?
        }
    };
    let allocation = state.store.get_allocation(child.id).await?.map(allocation_dto);
    let active_jobs = state
        .store
        .list_jobs_for_child(child.id)
        .await?
        .into_iter()
        .map(job_dto)
        .filter(|j| !matches!(j, Ok(dto) if dto.status == JobStatus::Approved))
        .collect::<Result<Vec<_>, _>>()?;
    let achievements = state
        .store
        .list_achievements(child.id)
        .await?
        .into_iter()
        .take(3)
        .map(achievement_dto)
        .collect();
    let learning_progress = state
        .store
        .list_learning_progress(child.id)
        .await?
        .into_iter()
        .map(progress_dto)
        .collect();
    let child = child_dto(child);
    Ok(Json(api::DashboardStatsDto {
        total_earned: child.total_earned,
        completed_jobs: child.completed_jobs,
        learning_streak: child.learning_streak,
        child,
        allocation,
        active_jobs,
        achievements,
        learning_progress,
    }))
}

// Ownership checks

fn own_child_id(auth: &AuthCtx) -> Result<i32, AppError> {
    auth.claims.child_id.ok_or_else(AppError::forbidden)
}

fn ensure_family(auth: &AuthCtx, family_id: i32) -> Result<(), AppError> {
    if auth.claims.family_id == family_id {
        Ok(())
    } else {
        warn!(requested = family_id, token_family = auth.claims.family_id, "family mismatch");
        Err(AppError::forbidden())
    }
}

/// Loads a child of the caller's family; children may only load themselves.
async fn family_child(state: &AppState, auth: &AuthCtx, id: i32) -> Result<Child, AppError> {
    let child = state
        .store
        .get_child(id)
        .await?
        .filter(|c| c.family_id == auth.claims.family_id)
        .ok_or_else(|| AppError::not_found(format!("child not found: {id}")))?;
    if !auth.is_parent() && auth.claims.child_id != Some(child.id) {
        return Err(AppError::forbidden());
    }
    Ok(child)
}

/// Loads a job of the caller's family; children may only load their own.
async fn family_job(state: &AppState, auth: &AuthCtx, id: i32) -> Result<Job, AppError> {
    let job = state
        .store
        .get_job(id)
        .await?
        .filter(|j| j.family_id == auth.claims.family_id)
        .ok_or_else(|| AppError::not_found(format!("job not found: {id}")))?;
    if !auth.is_parent() && auth.claims.child_id != Some(job.assigned_to_id) {
        return Err(AppError::forbidden());
    }
    Ok(job)
}

async fn visible_lesson(state: &AppState, auth: &AuthCtx, id: i32) -> Result<Lesson, AppError> {
    state
        .store
        .get_lesson(id)
        .await?
        .filter(|l| l.family_id.is_none_or(|f| f == auth.claims.family_id))
        .ok_or_else(|| AppError::not_found(format!("lesson not found: {id}")))
}

/// Child whose learning data is requested: the caller for children, the
/// `childId` query parameter for parents.
async fn requested_child(
    state: &AppState,
    auth: &AuthCtx,
    requested: Option<i32>,
) -> Result<i32, AppError> {
    match auth.claims.role {
        Role::Child => {
            let own = own_child_id(auth)?;
            match requested {
                Some(id) if id != own => Err(AppError::forbidden()),
                _ => Ok(own),
            }
        }
        Role::Parent => {
            let id = requested.ok_or_else(|| AppError::bad_request("childId is required"))?;
            Ok(family_child(state, auth, id).await?.id)
        }
    }
}

// DTO conversion

fn rfc3339(ts: NaiveDateTime) -> String {
    chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(ts, chrono::Utc).to_rfc3339()
}

fn user_dto(user: User) -> Result<api::UserDto, AppError> {
    let role = user.role.parse::<Role>().map_err(AppError::internal)?;
    Ok(api::UserDto {
        id: user.id,
        username: user.username,
        role,
        family_id: user.family_id,
        name: user.name,
        age: user.age,
    })
}

fn child_dto(c: Child) -> api::ChildDto {
    api::ChildDto {
        id: c.id,
        user_id: c.user_id,
        family_id: c.family_id,
        name: c.name,
        age: c.age,
        total_earned: c.total_earned.0,
        completed_jobs: c.completed_jobs,
        learning_streak: c.learning_streak,
        spending_balance: c.spending_balance.0,
        savings_balance: c.savings_balance.0,
        roth_ira_balance: c.roth_ira_balance.0,
        brokerage_balance: c.brokerage_balance.0,
    }
}

fn job_dto(j: Job) -> Result<api::JobDto, AppError> {
    Ok(api::JobDto {
        id: j.id,
        status: j.status.parse().map_err(AppError::internal)?,
        recurrence: j.recurrence.parse().map_err(AppError::internal)?,
        title: j.title,
        description: j.description,
        amount: j.amount.0,
        assigned_to_id: j.assigned_to_id,
        family_id: j.family_id,
        icon: j.icon,
        created_at: rfc3339(j.created_at),
    })
}

fn payment_dto(p: Payment) -> api::PaymentDto {
    api::PaymentDto {
        id: p.id,
        job_id: p.job_id,
        child_id: p.child_id,
        amount: p.amount.0,
        split: p.split(),
        created_at: rfc3339(p.created_at),
    }
}

fn allocation_dto(a: AllocationSettings) -> api::AllocationDto {
    api::AllocationDto {
        id: a.id,
        child_id: a.child_id,
        percentages: a.percentages(),
    }
}

fn account_types_dto(a: AccountTypes) -> api::AccountTypesDto {
    api::AccountTypesDto {
        id: a.id,
        family_id: a.family_id,
        accounts: a.accounts(),
    }
}

fn lesson_dto(l: Lesson) -> Result<api::LessonDto, AppError> {
    Ok(api::LessonDto {
        id: l.id,
        category: l.category.parse().map_err(AppError::internal)?,
        title: l.title,
        content: l.content,
        video_url: l.video_url,
        is_custom: l.is_custom,
        family_id: l.family_id,
    })
}

fn quiz_dto(q: Quiz) -> Result<api::QuizDto, AppError> {
    let options: Vec<String> = serde_json::from_str(&q.options).map_err(AppError::internal)?;
    Ok(api::QuizDto {
        id: q.id,
        lesson_id: q.lesson_id,
        question: q.question,
        options,
        correct_answer: q.correct_answer,
    })
}

fn progress_dto(p: LearningProgress) -> api::LearningProgressDto {
    api::LearningProgressDto {
        id: p.id,
        child_id: p.child_id,
        lesson_id: p.lesson_id,
        completed: p.completed,
        quiz_score: p.quiz_score,
    }
}

fn achievement_dto(a: Achievement) -> api::AchievementDto {
    api::AchievementDto {
        id: a.id,
        child_id: a.child_id,
        title: a.title,
        description: a.description,
        icon: a.icon,
        earned_at: rfc3339(a.earned_at),
    }
}

/// Login name derived from a display name: lowercased, whitespace removed.
fn default_username(name: &str) -> String {
    name.split_whitespace().collect::<String>().to_lowercase()
}

async fn hash_password(password: String) -> Result<String, AppError> {
    tokio::task::spawn_blocking(move || bcrypt::hash(password, bcrypt::DEFAULT_COST))
        .await
        .map_err(AppError::internal)?
        .map_err(AppError::internal)
}

// Errors

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    code: Option<&'static str>,
}

#[derive(Debug)]
pub enum AppError {
    /// A bookkeeping rule rejected the request; carries a stable code.
    Validation { code: &'static str, message: String },
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(String),
    Internal(String),
}

impl AppError {
    fn bad_request<T: Into<String>>(msg: T) -> Self {
        Self::BadRequest(msg.into())
    }
    fn unauthorized() -> Self {
        Self::Unauthorized
    }
    fn forbidden() -> Self {
        Self::Forbidden
    }
    fn not_found<T: Into<String>>(msg: T) -> Self {
        Self::NotFound(msg.into())
    }
    fn internal<E: std::fmt::Display>(e: E) -> Self {
        Self::Internal(e.to_string())
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation {
            code: "INVALID_BODY",
            message: rejection.body_text(),
        }
    }
}

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        use diesel::result::{DatabaseErrorKind, Error as DieselError};
        match e {
            StorageError::Ledger(err) => AppError::Validation {
                code: err.code(),
                message: err.to_string(),
            },
            StorageError::Rejected { code, message } => AppError::Validation { code, message },
            StorageError::NotFound(what) => AppError::NotFound(format!("{what} not found")),
            StorageError::InvalidInput(msg) => AppError::BadRequest(msg),
            StorageError::Database(DieselError::DatabaseError(
                DatabaseErrorKind::UniqueViolation,
                info,
            )) => AppError::BadRequest(format!("already exists: {}", info.message())),
            other => AppError::internal(other),
        }
    }
}

impl axum::response::IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, msg, kind, code, detail) = match self {
            AppError::Validation { code, message } => (
                StatusCode::BAD_REQUEST,
                message,
                "validation",
                Some(code),
                None,
            ),
            AppError::BadRequest(m) => (StatusCode::BAD_REQUEST, m, "bad_request", None, None),
            AppError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized".into(),
                "unauthorized",
                None,
                None,
            ),
            AppError::Forbidden => (
                StatusCode::FORBIDDEN,
                "forbidden".into(),
                "forbidden",
                None,
                None,
            ),
            AppError::NotFound(m) => (StatusCode::NOT_FOUND, m, "not_found", None, None),
            // Do not leak internal error details to clients, but log them
            AppError::Internal(m) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal server error".into(),
                "internal",
                None,
                Some(m),
            ),
        };
        if let Some(detail) = detail {
            tracing::error!(status = %status, kind = kind, message = %msg, detail = %detail, "request failed");
        } else {
            tracing::warn!(status = %status, kind = kind, code = ?code, message = %msg, "request failed");
        }
        let body = axum::Json(ErrorBody { error: msg, code });
        (status, body).into_response()
    }
}
