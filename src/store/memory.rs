//! In-memory implementations of the persistence ports.
//!
//! Used by the scan-engine tests and for local development without a
//! database. The replace operation builds the new generation fully before
//! swapping it in, matching the all-or-nothing contract.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::finding::{Finding, NewFinding};
use crate::models::scan::{CreateScan, Scan, ScanStatus};

use super::{FindingStore, ScanStore};

#[derive(Debug, Default)]
pub struct MemoryStore {
    scans: Mutex<HashMap<Uuid, Scan>>,
    findings: Mutex<HashMap<Uuid, Vec<Finding>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn update_scan<F>(&self, id: Uuid, apply: F) -> Result<(), AppError>
    where
        F: FnOnce(&mut Scan),
    {
        let mut scans = self.scans.lock().expect("scan map poisoned");
        let scan = scans
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound("Scan not found".to_string()))?;
        apply(scan);
        scan.updated_at = Utc::now();
        Ok(())
    }
}

#[async_trait]
impl ScanStore for MemoryStore {
    async fn insert(&self, scan: &CreateScan) -> Result<Scan, AppError> {
        let now = Utc::now();
        let row = Scan {
            id: Uuid::new_v4(),
            company_id: scan.company_id,
            kind: scan.kind,
            target: scan.target.clone(),
            status: ScanStatus::Pending,
            phase1_external_id: None,
            phase2_external_id: None,
            finding_count: 0,
            failure_reason: None,
            created_by: scan.created_by,
            created_at: now,
            updated_at: now,
        };
        self.scans
            .lock()
            .expect("scan map poisoned")
            .insert(row.id, row.clone());
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Scan>, AppError> {
        Ok(self.scans.lock().expect("scan map poisoned").get(&id).cloned())
    }

    async fn get_for_company(
        &self,
        id: Uuid,
        company_id: Uuid,
    ) -> Result<Option<Scan>, AppError> {
        Ok(self
            .get(id)
            .await?
            .filter(|scan| scan.company_id == company_id))
    }

    async fn list_for_company(
        &self,
        company_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Scan>, AppError> {
        let mut rows: Vec<Scan> = self
            .scans
            .lock()
            .expect("scan map poisoned")
            .values()
            .filter(|scan| scan.company_id == company_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_for_company(&self, company_id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .scans
            .lock()
            .expect("scan map poisoned")
            .values()
            .filter(|scan| scan.company_id == company_id)
            .count() as i64)
    }

    async fn set_phase1_started(&self, id: Uuid, external_id: &str) -> Result<(), AppError> {
        self.update_scan(id, |scan| {
            scan.status = ScanStatus::Phase1Running;
            scan.phase1_external_id = Some(external_id.to_string());
        })
    }

    async fn set_phase2_started(&self, id: Uuid, external_id: &str) -> Result<(), AppError> {
        self.update_scan(id, |scan| {
            scan.status = ScanStatus::Phase2Running;
            scan.phase2_external_id = Some(external_id.to_string());
        })
    }

    async fn set_status(&self, id: Uuid, status: ScanStatus) -> Result<(), AppError> {
        self.update_scan(id, |scan| scan.status = status)
    }

    async fn mark_completed(&self, id: Uuid, finding_count: i64) -> Result<(), AppError> {
        self.update_scan(id, |scan| {
            scan.status = ScanStatus::Completed;
            scan.finding_count = finding_count as i32;
            scan.failure_reason = None;
        })
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
        reset_finding_count: bool,
    ) -> Result<(), AppError> {
        self.update_scan(id, |scan| {
            scan.status = ScanStatus::Failed;
            scan.failure_reason = Some(reason.to_string());
            if reset_finding_count {
                scan.finding_count = 0;
            }
        })
    }
}

#[async_trait]
impl FindingStore for MemoryStore {
    async fn replace_for_scan(
        &self,
        scan_id: Uuid,
        findings: &[NewFinding],
    ) -> Result<u64, AppError> {
        let now = Utc::now();
        // Build the full new generation first; the swap below is atomic.
        let rows: Vec<Finding> = findings
            .iter()
            .map(|f| Finding {
                id: Uuid::new_v4(),
                scan_id: f.scan_id,
                url: f.url.clone(),
                risk: f.risk.clone(),
                name: f.name.clone(),
                location: f.location.clone(),
                created_at: now,
            })
            .collect();
        let count = rows.len() as u64;
        self.findings
            .lock()
            .expect("finding map poisoned")
            .insert(scan_id, rows);
        Ok(count)
    }

    async fn list_for_scan(
        &self,
        scan_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Finding>, AppError> {
        Ok(self
            .findings
            .lock()
            .expect("finding map poisoned")
            .get(&scan_id)
            .map(|rows| {
                rows.iter()
                    .skip(offset.max(0) as usize)
                    .take(limit.max(0) as usize)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn count_for_scan(&self, scan_id: Uuid) -> Result<i64, AppError> {
        Ok(self
            .findings
            .lock()
            .expect("finding map poisoned")
            .get(&scan_id)
            .map(|rows| rows.len() as i64)
            .unwrap_or(0))
    }
}
