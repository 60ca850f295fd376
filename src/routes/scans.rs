//! Scan routes: start, list with live reconciliation, status, abort,
//! and per-scan findings.

use axum::{
    extract::{Path, Query, State},
    Json,
};
use uuid::Uuid;

use crate::errors::{ApiResponse, AppError};
use crate::middleware::auth::CurrentUser;
use crate::middleware::rbac::RequireOperator;
use crate::models::finding::Finding;
use crate::models::pagination::{PagedResult, Pagination};
use crate::models::scan::{CreateScanRequest, Scan, ScanView};
use crate::services::lifecycle::ScanProgress;
use crate::services::{reconcile, scan as scan_service};
use crate::AppState;

/// POST /api/v1/scans — create a scan and launch its lifecycle (operator+).
pub async fn create(
    State(state): State<AppState>,
    RequireOperator(operator): RequireOperator,
    Json(body): Json<CreateScanRequest>,
) -> Result<Json<ApiResponse<Scan>>, AppError> {
    let scan = scan_service::create(
        state.scans.as_ref(),
        operator.company_id,
        operator.id,
        &body,
    )
    .await?;

    let runner = state.lifecycle_runner(scan.kind)?;
    let cancel = state.running.register(scan.id);
    let running = state.running.clone();
    let scan_id = scan.id;

    // One sequential task per scan lifecycle; the record is returned
    // immediately while the phases run in the background.
    tokio::spawn(async move {
        match runner.run(scan_id, cancel).await {
            Ok(finished) => {
                tracing::info!(%scan_id, status = %finished.status, "Scan lifecycle finished")
            }
            Err(e) => tracing::error!(%scan_id, error = %e, "Scan lifecycle errored"),
        }
        running.remove(scan_id);
    });

    Ok(ApiResponse::success(scan))
}

/// GET /api/v1/scans — company scan list with live status overlay.
pub async fn list(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Query(pagination): Query<Pagination>,
) -> Result<Json<ApiResponse<PagedResult<ScanView>>>, AppError> {
    let (scans, total) =
        scan_service::list(state.scans.as_ref(), current_user.company_id, &pagination).await?;
    let views = reconcile::reconcile_scans(&state.scanners, scans).await;
    Ok(ApiResponse::success(PagedResult::new(
        views, total, &pagination,
    )))
}

/// GET /api/v1/scans/{id} — single scan record.
pub async fn get_by_id(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<Scan>>, AppError> {
    let scan = scan_service::get(state.scans.as_ref(), id, current_user.company_id).await?;
    Ok(ApiResponse::success(scan))
}

/// GET /api/v1/scans/{id}/status — stored record plus one live progress
/// read; terminal scans are answered without any external call.
pub async fn status(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<ScanProgress>>, AppError> {
    let scan = scan_service::get(state.scans.as_ref(), id, current_user.company_id).await?;
    let runner = state.lifecycle_runner(scan.kind)?;
    let progress = runner.check(scan.id).await?;
    Ok(ApiResponse::success(progress))
}

/// POST /api/v1/scans/{id}/abort — cancel an in-flight lifecycle (operator+).
pub async fn abort(
    State(state): State<AppState>,
    RequireOperator(operator): RequireOperator,
    Path(id): Path<Uuid>,
) -> Result<Json<ApiResponse<&'static str>>, AppError> {
    let scan = scan_service::get(state.scans.as_ref(), id, operator.company_id).await?;
    if scan.status.is_terminal() {
        return Err(AppError::Conflict("Scan already finished".to_string()));
    }
    if !state.running.cancel(scan.id) {
        return Err(AppError::NotFound(
            "Scan has no running lifecycle task".to_string(),
        ));
    }
    tracing::info!(scan_id = %scan.id, aborted_by = %operator.username, "Scan abort requested");
    Ok(ApiResponse::success("Abort requested"))
}

/// GET /api/v1/scans/{id}/findings — paged findings for one scan.
pub async fn findings(
    State(state): State<AppState>,
    current_user: CurrentUser,
    Path(id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
) -> Result<Json<ApiResponse<PagedResult<Finding>>>, AppError> {
    let page = scan_service::list_findings(
        state.scans.as_ref(),
        state.findings.as_ref(),
        id,
        current_user.company_id,
        &pagination,
    )
    .await?;
    Ok(ApiResponse::success(page))
}
