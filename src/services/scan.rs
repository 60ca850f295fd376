//! Scan CRUD: creation with target validation, company-scoped reads.

use uuid::Uuid;
use validator::Validate;

use crate::errors::AppError;
use crate::models::finding::Finding;
use crate::models::pagination::{PagedResult, Pagination};
use crate::models::scan::{CreateScan, CreateScanRequest, Scan, ScannerKind};
use crate::store::{FindingStore, ScanStore};

/// Validate and insert a new pending scan record.
pub async fn create(
    store: &dyn ScanStore,
    company_id: Uuid,
    created_by: Uuid,
    request: &CreateScanRequest,
) -> Result<Scan, AppError> {
    request
        .validate()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    validate_target(request.kind, &request.target)?;

    let scan = store
        .insert(&CreateScan {
            company_id,
            kind: request.kind,
            target: request.target.trim().to_string(),
            created_by,
        })
        .await?;
    tracing::info!(scan_id = %scan.id, kind = %scan.kind, "Scan record created");
    Ok(scan)
}

/// DAST targets must be web origins; SAST targets are repository slugs.
fn validate_target(kind: ScannerKind, target: &str) -> Result<(), AppError> {
    let target = target.trim();
    if target.is_empty() {
        return Err(AppError::Validation("target must not be empty".to_string()));
    }
    match kind {
        ScannerKind::DastA | ScannerKind::DastB => {
            if !target.starts_with("http://") && !target.starts_with("https://") {
                return Err(AppError::Validation(
                    "dynamic scan target must be an http(s) URL".to_string(),
                ));
            }
        }
        ScannerKind::Sast => {}
    }
    Ok(())
}

/// Company-scoped single read.
pub async fn get(store: &dyn ScanStore, id: Uuid, company_id: Uuid) -> Result<Scan, AppError> {
    store
        .get_for_company(id, company_id)
        .await?
        .ok_or_else(|| AppError::NotFound("Scan not found".to_string()))
}

/// Company-scoped paged listing, newest first.
pub async fn list(
    store: &dyn ScanStore,
    company_id: Uuid,
    pagination: &Pagination,
) -> Result<(Vec<Scan>, i64), AppError> {
    let total = store.count_for_company(company_id).await?;
    let scans = store
        .list_for_company(company_id, pagination.limit(), pagination.offset())
        .await?;
    Ok((scans, total))
}

/// Paged findings for a scan the caller's company owns.
pub async fn list_findings(
    scans: &dyn ScanStore,
    findings: &dyn FindingStore,
    scan_id: Uuid,
    company_id: Uuid,
    pagination: &Pagination,
) -> Result<PagedResult<Finding>, AppError> {
    // Ownership check before exposing finding rows.
    get(scans, scan_id, company_id).await?;

    let total = findings.count_for_scan(scan_id).await?;
    let rows = findings
        .list_for_scan(scan_id, pagination.limit(), pagination.offset())
        .await?;
    Ok(PagedResult::new(rows, total, pagination))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;

    fn request(kind: ScannerKind, target: &str) -> CreateScanRequest {
        CreateScanRequest {
            kind,
            target: target.to_string(),
        }
    }

    #[tokio::test]
    async fn create_accepts_https_dast_target() {
        let store = MemoryStore::new();
        let scan = create(
            &store,
            Uuid::new_v4(),
            Uuid::new_v4(),
            &request(ScannerKind::DastA, "https://example.test"),
        )
        .await
        .unwrap();
        assert_eq!(scan.target, "https://example.test");
    }

    #[tokio::test]
    async fn create_rejects_non_url_dast_target() {
        let store = MemoryStore::new();
        let err = create(
            &store,
            Uuid::new_v4(),
            Uuid::new_v4(),
            &request(ScannerKind::DastB, "example.test"),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn create_accepts_repository_slug_for_sast() {
        let store = MemoryStore::new();
        let scan = create(
            &store,
            Uuid::new_v4(),
            Uuid::new_v4(),
            &request(ScannerKind::Sast, "git.example.test/acme/shop"),
        )
        .await
        .unwrap();
        assert_eq!(scan.kind, ScannerKind::Sast);
    }

    #[tokio::test]
    async fn create_rejects_blank_target() {
        let store = MemoryStore::new();
        let err = create(
            &store,
            Uuid::new_v4(),
            Uuid::new_v4(),
            &request(ScannerKind::Sast, "   "),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn get_is_company_scoped() {
        let store = MemoryStore::new();
        let company = Uuid::new_v4();
        let scan = create(
            &store,
            company,
            Uuid::new_v4(),
            &request(ScannerKind::DastA, "https://example.test"),
        )
        .await
        .unwrap();

        assert!(get(&store, scan.id, company).await.is_ok());
        let err = get(&store, scan.id, Uuid::new_v4()).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn list_findings_checks_scan_ownership() {
        let store = MemoryStore::new();
        let company = Uuid::new_v4();
        let scan = create(
            &store,
            company,
            Uuid::new_v4(),
            &request(ScannerKind::DastA, "https://example.test"),
        )
        .await
        .unwrap();

        let err = list_findings(
            &store,
            &store,
            scan.id,
            Uuid::new_v4(),
            &Pagination::default(),
        )
        .await
        .unwrap_err();
        assert!(err.is_not_found());

        let page = list_findings(&store, &store, scan.id, company, &Pagination::default())
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }
}
