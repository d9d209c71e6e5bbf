//! API service routes

use std::time::Duration;

use auth::Confirmation;
use auth::validation::{validate_email, validate_password, validate_username};
use axum::{
    Extension, Json, Router,
    extract::{DefaultBodyLimit, Multipart, Path, State},
    http::{StatusCode, header},
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;
use tracing::error;

use crate::{
    error::{ApiError, ApiResult},
    middleware::{SessionClaims, require_session},
    state::AppState,
    workflow::{Caller, sharing::ShareRequest},
};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub password_confirmation: String,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct ResetRequest {
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct NewPasswordRequest {
    pub password: String,
    pub password_confirmation: String,
}

/// Create the router for the API service
pub fn create_router(state: AppState) -> Router {
    let protected_routes = Router::new()
        .route("/auth/logout", post(logout))
        .route("/auth/confirm/resend", post(resend_confirmation))
        .route("/files", get(list_files).post(upload_file))
        .route("/files/*key", get(download_file).delete(delete_file))
        .route("/shares", post(share_file))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_session,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/confirm/:token", get(confirm_email))
        .route("/auth/password-reset", post(request_password_reset))
        .route("/auth/password-reset/:token", post(reset_password))
        .merge(protected_routes)
        .layer(DefaultBodyLimit::max(state.max_upload_bytes))
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match &state.db_pool {
        None => "not_configured",
        Some(pool) => match common::database::health_check(pool).await {
            Ok(true) => "ok",
            Ok(false) => "unreachable",
            Err(e) => {
                error!("Database health check failed: {}", e);
                "unreachable"
            }
        },
    };

    let (status, overall) = if database == "unreachable" {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    } else {
        (StatusCode::OK, "ok")
    };

    (
        status,
        Json(json!({
            "status": overall,
            "service": "filevault-api",
            "database": database,
        })),
    )
}

pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_username(&payload.username).map_err(ApiError::BadRequest)?;
    validate_email(&payload.email).map_err(ApiError::BadRequest)?;
    validate_password(&payload.password, &payload.password_confirmation)
        .map_err(ApiError::BadRequest)?;

    let user = state
        .workflows
        .register(&payload.username, &payload.email, &payload.password)
        .await?;

    Ok((StatusCode::CREATED, Json(user)))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> ApiResult<impl IntoResponse> {
    let session = state
        .workflows
        .login(&payload.username, &payload.password)
        .await?;

    Ok(Json(session))
}

pub async fn logout(
    State(state): State<AppState>,
    Extension(SessionClaims(claims)): Extension<SessionClaims>,
) -> ApiResult<impl IntoResponse> {
    let remaining = (claims.exp as i64 - Utc::now().timestamp()).max(1) as u64;

    state
        .revocations
        .revoke(claims.jti, Duration::from_secs(remaining))
        .await
        .map_err(|e| {
            error!("Failed to revoke session {}: {}", claims.jti, e);
            ApiError::Internal(e.to_string())
        })?;

    Ok(StatusCode::NO_CONTENT)
}

pub async fn confirm_email(
    State(state): State<AppState>,
    Path(token): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.workflows.confirm_email(&token).await?;

    let status = match outcome {
        Confirmation::Confirmed(_) => "confirmed",
        Confirmation::AlreadyConfirmed(_) => "already_confirmed",
    };

    Ok(Json(json!({
        "status": status,
        "user": outcome.user(),
    })))
}

pub async fn resend_confirmation(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<impl IntoResponse> {
    let outcome = state.workflows.resend_confirmation(caller).await?;
    Ok(Json(json!({ "status": outcome })))
}

pub async fn request_password_reset(
    State(state): State<AppState>,
    Json(payload): Json<ResetRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_email(&payload.email).map_err(ApiError::BadRequest)?;
    state.workflows.request_password_reset(&payload.email).await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({
            "status": "If the address belongs to an account, a reset link is on its way",
        })),
    ))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Path(token): Path<String>,
    Json(payload): Json<NewPasswordRequest>,
) -> ApiResult<impl IntoResponse> {
    validate_password(&payload.password, &payload.password_confirmation)
        .map_err(ApiError::BadRequest)?;
    state
        .workflows
        .reset_password(&token, &payload.password)
        .await?;

    Ok(Json(json!({ "status": "password_updated" })))
}

pub async fn list_files(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.workflows.list_files(caller).await?))
}

/// Upload the multipart field named `file`
pub async fn upload_file(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    mut multipart: Multipart,
) -> ApiResult<impl IntoResponse> {
    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field
            .file_name()
            .map(str::to_string)
            .ok_or_else(|| ApiError::BadRequest("File part has no filename".to_string()))?;
        let data = field.bytes().await?;

        let record = state.workflows.upload_file(caller, &filename, data).await?;
        return Ok((StatusCode::CREATED, Json(record)));
    }

    Err(ApiError::BadRequest("No file part in the request".to_string()))
}

pub async fn download_file(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let (record, data) = state.workflows.download_file(caller, &key).await?;

    Ok((
        [
            (header::CONTENT_TYPE, "application/octet-stream".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", record.filename),
            ),
        ],
        data,
    ))
}

pub async fn delete_file(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Path(key): Path<String>,
) -> ApiResult<impl IntoResponse> {
    state.workflows.delete_file(caller, &key).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn share_file(
    State(state): State<AppState>,
    Extension(caller): Extension<Caller>,
    Json(payload): Json<ShareRequest>,
) -> ApiResult<impl IntoResponse> {
    let receipt = state.workflows.share_file(caller, payload).await?;
    Ok((StatusCode::CREATED, Json(receipt)))
}
