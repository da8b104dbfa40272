//! The network API.
//!
//! Every `/api` and `/frontend` route sits behind the X-API-Key
//! middleware; `/health` is open. Handlers take the store lock only
//! for the read-modify-write itself and fire the reload side effect
//! after releasing it.

use crate::config::AppConfig;
use crate::engine::{check_duration, validate_credential, ConversationEngine};
use crate::engine::notify::ReplyBroadcaster;
use crate::backup::BackupRestoreManager;
use crate::error::{AppError, AppResult};
use crate::ipinfo::IpInfoClient;
use crate::reload::SharedControl;
use crate::store::{read_domain, SharedCore};
use crate::sweeper::ExpirySweeper;
use axum::{
    body::Bytes,
    extract::{Path, Request, State},
    http::{header, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Json, Response},
    routing::{delete, get, post},
    Router,
};
use chrono::Utc;
use keywarden_types::{
    AccountInfo, ApiResponse, CreateCredentialRequest, CredentialInfo, FrontendEvent,
    FrontendReplies, RenewCredentialRequest, SweepReport, SystemInfo,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state for web handlers
#[derive(Clone)]
pub struct AppState {
    pub core: SharedCore,
    pub engine: Arc<ConversationEngine>,
    pub sweeper: Arc<ExpirySweeper>,
    pub backup: Arc<BackupRestoreManager>,
    pub broadcaster: Arc<ReplyBroadcaster>,
    pub control: SharedControl,
    pub ipinfo: Arc<IpInfoClient>,
}

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// API key middleware for everything except /health
pub async fn require_api_key(req: Request, next: Next) -> Response {
    let expected = &AppConfig::get().server.api_key;
    let presented = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok());
    match presented {
        Some(key) if key == expected => next.run(req).await,
        _ => AppError::AuthRequired.into_response(),
    }
}

/// GET /api/credentials
pub async fn list_credentials(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<Vec<CredentialInfo>>>> {
    let today = Utc::now().date_naive();
    let listing = state.core.lock().await.list(today);
    Ok(Json(ApiResponse::ok("Credential list", listing)))
}

/// POST /api/credentials
pub async fn create_credential(
    State(state): State<AppState>,
    Json(req): Json<CreateCredentialRequest>,
) -> AppResult<Json<ApiResponse<AccountInfo>>> {
    validate_credential(&req.credential)?;
    let days = check_duration(req.days, crate::engine::policy::ADMIN_MAX_DAYS)?;

    let today = Utc::now().date_naive();
    let (record, roster_changed) = {
        let mut core = state.core.lock().await;
        core.provision(&req.credential, days, today)?
    };
    if roster_changed {
        if let Err(e) = state.control.reload().await {
            tracing::warn!("service reload after create failed: {}", e);
        }
    }
    info!(credential = %record.credential, "credential created via API");

    Ok(Json(ApiResponse::ok(
        "Credential created",
        AccountInfo {
            credential: record.credential,
            expires_on: record.expires_on,
            domain: read_domain(&AppConfig::get().paths.domain),
        },
    )))
}

/// POST /api/credentials/{name}/renew
pub async fn renew_credential(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(req): Json<RenewCredentialRequest>,
) -> AppResult<Json<ApiResponse<AccountInfo>>> {
    let days = check_duration(req.days, crate::engine::policy::ADMIN_MAX_DAYS)?;

    let today = Utc::now().date_naive();
    let (record, roster_changed) = {
        let mut core = state.core.lock().await;
        core.extend(&name, days, today)?
    };
    if roster_changed {
        if let Err(e) = state.control.reload().await {
            tracing::warn!("service reload after renew failed: {}", e);
        }
    }
    info!(credential = %record.credential, "credential renewed via API");

    Ok(Json(ApiResponse::ok(
        "Credential renewed",
        AccountInfo {
            credential: record.credential,
            expires_on: record.expires_on,
            domain: read_domain(&AppConfig::get().paths.domain),
        },
    )))
}

/// DELETE /api/credentials/{name}
pub async fn delete_credential(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> AppResult<Json<ApiResponse<()>>> {
    let roster_changed = {
        let mut core = state.core.lock().await;
        core.remove(&name)?
    };
    if roster_changed {
        if let Err(e) = state.control.reload().await {
            tracing::warn!("service reload after delete failed: {}", e);
        }
    }
    info!(credential = %name, "credential deleted via API");

    Ok(Json(ApiResponse::ok_empty("Credential deleted")))
}

/// GET /api/info
pub async fn system_info(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<SystemInfo>>> {
    let config = AppConfig::get();
    let enrichment = state.ipinfo.lookup().await;
    Ok(Json(ApiResponse::ok(
        "System info",
        SystemInfo {
            domain: read_domain(&config.paths.domain),
            public_ip: enrichment.public_ip,
            city: enrichment.city,
            isp: enrichment.isp,
            service: config.service.name.clone(),
            port: config.service.port,
        },
    )))
}

/// POST /api/sweep
pub async fn run_sweep(
    State(state): State<AppState>,
) -> AppResult<Json<ApiResponse<SweepReport>>> {
    let revoked = state.sweeper.sweep_once().await?;
    let message = format!("Expiration check complete. Revoked: {}", revoked.len());
    Ok(Json(ApiResponse::ok(message, SweepReport { revoked })))
}

/// GET /api/backup
pub async fn download_backup(State(state): State<AppState>) -> AppResult<Response> {
    let bytes = state.backup.backup().await?;
    let filename = format!(
        "keywarden-backup-{}.zip",
        Utc::now().format("%Y%m%d-%H%M%S")
    );
    Ok((
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, "application/zip".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{}\"", filename),
            ),
        ],
        bytes,
    )
        .into_response())
}

/// POST /api/restore
pub async fn upload_restore(
    State(state): State<AppState>,
    body: Bytes,
) -> AppResult<Json<ApiResponse<Vec<String>>>> {
    let outcome = state.backup.restore(&body).await?;
    let message = if outcome.applied.is_empty() {
        "Archive contained no recognized resources".to_string()
    } else if outcome.reload_ok {
        "Restore applied, service reloaded".to_string()
    } else {
        "Restore applied, but the service reload failed".to_string()
    };
    Ok(Json(ApiResponse::ok(message, outcome.applied)))
}

/// POST /frontend/event — one inbound actor event, immediate replies.
pub async fn frontend_event(
    State(state): State<AppState>,
    Json(event): Json<FrontendEvent>,
) -> Json<FrontendReplies> {
    let replies = state.engine.handle(&event.actor, event.inbound).await;
    Json(FrontendReplies { replies })
}

/// Create the web router
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let guarded = Router::new()
        .route(
            "/api/credentials",
            get(list_credentials).post(create_credential),
        )
        .route("/api/credentials/{name}", delete(delete_credential))
        .route("/api/credentials/{name}/renew", post(renew_credential))
        .route("/api/info", get(system_info))
        .route("/api/sweep", post(run_sweep))
        .route("/api/backup", get(download_backup))
        .route("/api/restore", post(upload_restore))
        .route("/frontend/event", post(frontend_event))
        .route("/frontend/stream", get(crate::web::stream::ws_handler))
        .layer(middleware::from_fn(require_api_key))
        .with_state(state);

    Router::new()
        .route("/health", get(health))
        .merge(guarded)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
