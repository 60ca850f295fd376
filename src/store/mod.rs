//! Persistence ports for scans and findings.
//!
//! The lifecycle, sync, and reconciliation services depend on these traits
//! rather than on a concrete database, so the scan engine can be exercised
//! against the in-memory store while production runs on PostgreSQL.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::finding::{Finding, NewFinding};
use crate::models::scan::{CreateScan, Scan, ScanStatus};

/// Scan record persistence.
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn insert(&self, scan: &CreateScan) -> Result<Scan, AppError>;

    async fn get(&self, id: Uuid) -> Result<Option<Scan>, AppError>;

    /// Company-scoped read; `None` when the scan does not exist or belongs
    /// to another company.
    async fn get_for_company(&self, id: Uuid, company_id: Uuid)
        -> Result<Option<Scan>, AppError>;

    async fn list_for_company(
        &self,
        company_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Scan>, AppError>;

    async fn count_for_company(&self, company_id: Uuid) -> Result<i64, AppError>;

    /// Record the discovery phase id and move the scan to phase1_running.
    async fn set_phase1_started(&self, id: Uuid, external_id: &str) -> Result<(), AppError>;

    /// Record the analysis phase id and move the scan to phase2_running.
    async fn set_phase2_started(&self, id: Uuid, external_id: &str) -> Result<(), AppError>;

    async fn set_status(&self, id: Uuid, status: ScanStatus) -> Result<(), AppError>;

    /// Terminal success: persist the confirmed finding count.
    async fn mark_completed(&self, id: Uuid, finding_count: i64) -> Result<(), AppError>;

    /// Terminal failure with cause. `reset_finding_count` zeroes the
    /// denormalized count when a finalize-stage failure means no confirmed
    /// results exist.
    async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
        reset_finding_count: bool,
    ) -> Result<(), AppError>;
}

/// Finding persistence, scoped to a single owning scan.
#[async_trait]
pub trait FindingStore: Send + Sync {
    /// Atomically swap the finding set for a scan: delete the prior
    /// generation and insert the new one as one all-or-nothing unit of
    /// work. On failure the prior set must remain fully visible.
    async fn replace_for_scan(
        &self,
        scan_id: Uuid,
        findings: &[NewFinding],
    ) -> Result<u64, AppError>;

    async fn list_for_scan(
        &self,
        scan_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Finding>, AppError>;

    async fn count_for_scan(&self, scan_id: Uuid) -> Result<i64, AppError>;
}
