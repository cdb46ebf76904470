//! HTTP surface. Handlers authenticate, collect request provenance, call
//! into [`ConsentService`] and map [`CustodianError`] onto status codes.
use crate::auth::{self, Caller};
use crate::categories::AcceptPayload;
use crate::errors::CustodianError;
use crate::jobs;
use crate::lifecycle::{ConsentRequest, ConsentService, DataAccessRequest, LoginRequest, RegisterRequest};
use crate::settings::Settings;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use miette::IntoDiagnostic;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

const JOB_HISTORY_LIMIT: u64 = 50;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub service: ConsentService,
}

impl IntoResponse for CustodianError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            CustodianError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            CustodianError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            CustodianError::Conflict(m) | CustodianError::InvalidInput(m) => {
                (StatusCode::BAD_REQUEST, m.clone())
            }
            CustodianError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            _ => {
                tracing::error!(error = %self, "Request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        (
            status,
            Json(json!({"error": self.code(), "message": message})),
        )
            .into_response()
    }
}

pub fn router(state: AppState) -> Router {
    let mut router = Router::new()
        .route("/healthz", get(healthz))
        .route("/api/auth/login", post(login))
        .route("/api/auth/profile", get(profile))
        .route("/api/consents/request", post(request_consent))
        .route("/api/consents/pending-requests", get(pending_requests))
        .route("/api/consents/accept/{id}", put(accept_consent))
        .route("/api/consents/decline/{id}", put(decline_consent))
        .route("/api/consents/revoke/{id}", put(revoke_consent))
        .route("/api/consents/my-consents", get(my_consents))
        .route("/api/consents/granted-consents", get(granted_consents))
        .route("/api/consents/request-data", post(request_data))
        .route("/api/consents/{id}", get(get_consent))
        .route("/api/audit/my-logs", get(my_logs))
        .route("/api/audit/all-logs", get(all_logs))
        .route("/api/admin/jobs", get(list_jobs))
        .route("/api/admin/jobs/{name}", post(trigger_job));

    // Conditionally add public registration route
    if state.settings.auth.allow_public_registration {
        tracing::info!("Public user registration is ENABLED");
        router = router.route("/api/auth/register", post(register));
    } else {
        tracing::info!("Public user registration is DISABLED - use --sync-users");
    }

    router
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(settings: Settings, service: ConsentService) -> miette::Result<()> {
    let state = AppState {
        settings: Arc::new(settings),
        service,
    };

    let addr: SocketAddr = state
        .settings
        .listen_addr()
        .parse()
        .map_err(|e| miette::miette!("bad listen addr: {e}"))?;

    let app = router(state);

    tracing::info!(%addr, "Consent API listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .into_diagnostic()?;
    axum::serve(listener, app).await.into_diagnostic()?;
    Ok(())
}

async fn require_admin(state: &AppState, headers: &HeaderMap) -> Result<Caller, CustodianError> {
    let caller = state.service.authenticate(headers).await?;
    if !caller.is_admin {
        return Err(CustodianError::Forbidden(
            "Administrator privileges required".to_string(),
        ));
    }
    Ok(caller)
}

async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, Json(json!({"status": "ok"})))
}

// Identity

async fn register(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<RegisterRequest>,
) -> Result<Response, CustodianError> {
    let session = state
        .service
        .register(req, &auth::provenance(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(session)).into_response())
}

async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, CustodianError> {
    let session = state.service.login(req).await?;
    Ok(Json(session).into_response())
}

async fn profile(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, CustodianError> {
    let caller = state.service.authenticate(&headers).await?;
    let profile = state.service.profile(&caller).await?;
    Ok(Json(profile).into_response())
}

// Consent lifecycle

async fn request_consent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ConsentRequest>,
) -> Result<Response, CustodianError> {
    let caller = state.service.authenticate(&headers).await?;
    let consent = state
        .service
        .request_consent(&caller, req, &auth::provenance(&headers))
        .await?;
    Ok((StatusCode::CREATED, Json(consent)).into_response())
}

async fn accept_consent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    payload: Option<Json<AcceptPayload>>,
) -> Result<Response, CustodianError> {
    let caller = state.service.authenticate(&headers).await?;
    let payload = payload.map(|Json(p)| p).unwrap_or_default();
    let consent = state
        .service
        .accept(&caller, &id, &payload, &auth::provenance(&headers))
        .await?;
    Ok(Json(json!({"message": "Consent request accepted", "consent": consent})).into_response())
}

async fn decline_consent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, CustodianError> {
    let caller = state.service.authenticate(&headers).await?;
    let consent = state
        .service
        .decline(&caller, &id, &auth::provenance(&headers))
        .await?;
    Ok(Json(json!({"message": "Consent request declined", "consent": consent})).into_response())
}

async fn revoke_consent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, CustodianError> {
    let caller = state.service.authenticate(&headers).await?;
    let consent = state
        .service
        .revoke(&caller, &id, &auth::provenance(&headers))
        .await?;
    Ok(Json(json!({"message": "Consent revoked successfully", "consent": consent})).into_response())
}

// Listings

async fn pending_requests(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, CustodianError> {
    let caller = state.service.authenticate(&headers).await?;
    Ok(Json(state.service.pending_requests(&caller).await?).into_response())
}

async fn my_consents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, CustodianError> {
    let caller = state.service.authenticate(&headers).await?;
    Ok(Json(state.service.my_consents(&caller).await?).into_response())
}

async fn granted_consents(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, CustodianError> {
    let caller = state.service.authenticate(&headers).await?;
    Ok(Json(state.service.granted_consents(&caller).await?).into_response())
}

async fn get_consent(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> Result<Response, CustodianError> {
    let caller = state.service.authenticate(&headers).await?;
    Ok(Json(state.service.get_consent(&caller, &id).await?).into_response())
}

// Data access

async fn request_data(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<DataAccessRequest>,
) -> Result<Response, CustodianError> {
    let caller = state.service.authenticate(&headers).await?;
    let release = state
        .service
        .request_data(&caller, &req, &auth::provenance(&headers))
        .await?;
    Ok(Json(json!({
        "message": "Data access granted",
        "consentId": release.consent_id,
        "dataType": release.data_type,
        "data": release.data,
    }))
    .into_response())
}

// Audit

async fn my_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, CustodianError> {
    let caller = state.service.authenticate(&headers).await?;
    Ok(Json(state.service.my_logs(&caller).await?).into_response())
}

async fn all_logs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, CustodianError> {
    let caller = state.service.authenticate(&headers).await?;
    Ok(Json(state.service.all_logs(&caller).await?).into_response())
}

// Admin jobs

async fn list_jobs(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Response, CustodianError> {
    require_admin(&state, &headers).await?;
    let executions = jobs::list_job_executions(state.service.db(), JOB_HISTORY_LIMIT).await?;
    Ok(Json(json!({"jobs": jobs::JOB_NAMES, "executions": executions})).into_response())
}

async fn trigger_job(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
) -> Result<Response, CustodianError> {
    let caller = require_admin(&state, &headers).await?;
    tracing::info!(subject = %caller.subject, job = %name, "Admin triggered job");
    let execution = jobs::trigger_job_manually(state.service.db(), &name).await?;
    Ok(Json(execution).into_response())
}
