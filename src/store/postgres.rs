//! PostgreSQL implementations of the persistence ports.

use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::finding::{Finding, NewFinding};
use crate::models::scan::{CreateScan, Scan, ScanStatus};

use super::{FindingStore, ScanStore};

#[derive(Debug, Clone)]
pub struct PgScanStore {
    pool: PgPool,
}

impl PgScanStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ScanStore for PgScanStore {
    async fn insert(&self, scan: &CreateScan) -> Result<Scan, AppError> {
        let row = sqlx::query_as::<_, Scan>(
            r#"
            INSERT INTO scans (company_id, kind, target, created_by)
            VALUES ($1, $2, $3, $4)
            RETURNING *
            "#,
        )
        .bind(scan.company_id)
        .bind(scan.kind)
        .bind(&scan.target)
        .bind(scan.created_by)
        .fetch_one(&self.pool)
        .await?;
        Ok(row)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Scan>, AppError> {
        let row = sqlx::query_as::<_, Scan>("SELECT * FROM scans WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn get_for_company(
        &self,
        id: Uuid,
        company_id: Uuid,
    ) -> Result<Option<Scan>, AppError> {
        let row = sqlx::query_as::<_, Scan>(
            "SELECT * FROM scans WHERE id = $1 AND company_id = $2",
        )
        .bind(id)
        .bind(company_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_for_company(
        &self,
        company_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Scan>, AppError> {
        let rows = sqlx::query_as::<_, Scan>(
            r#"
            SELECT * FROM scans
            WHERE company_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(company_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_for_company(&self, company_id: Uuid) -> Result<i64, AppError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM scans WHERE company_id = $1")
                .bind(company_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }

    async fn set_phase1_started(&self, id: Uuid, external_id: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE scans
            SET status = 'phase1_running', phase1_external_id = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(external_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_phase2_started(&self, id: Uuid, external_id: &str) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE scans
            SET status = 'phase2_running', phase2_external_id = $1, updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(external_id)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: ScanStatus) -> Result<(), AppError> {
        sqlx::query("UPDATE scans SET status = $1, updated_at = NOW() WHERE id = $2")
            .bind(status)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_completed(&self, id: Uuid, finding_count: i64) -> Result<(), AppError> {
        sqlx::query(
            r#"
            UPDATE scans
            SET status = 'completed', finding_count = $1, failure_reason = NULL,
                updated_at = NOW()
            WHERE id = $2
            "#,
        )
        .bind(finding_count as i32)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_failed(
        &self,
        id: Uuid,
        reason: &str,
        reset_finding_count: bool,
    ) -> Result<(), AppError> {
        if reset_finding_count {
            sqlx::query(
                r#"
                UPDATE scans
                SET status = 'failed', failure_reason = $1, finding_count = 0,
                    updated_at = NOW()
                WHERE id = $2
                "#,
            )
            .bind(reason)
            .bind(id)
            .execute(&self.pool)
            .await?;
        } else {
            sqlx::query(
                r#"
                UPDATE scans
                SET status = 'failed', failure_reason = $1, updated_at = NOW()
                WHERE id = $2
                "#,
            )
            .bind(reason)
            .bind(id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PgFindingStore {
    pool: PgPool,
}

impl PgFindingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl FindingStore for PgFindingStore {
    async fn replace_for_scan(
        &self,
        scan_id: Uuid,
        findings: &[NewFinding],
    ) -> Result<u64, AppError> {
        // Delete-then-insert inside one transaction: a re-run scan must end
        // up with exactly the latest fetch generation, and an interrupted
        // sync must leave the prior generation fully intact.
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM findings WHERE scan_id = $1")
            .bind(scan_id)
            .execute(&mut *tx)
            .await?;

        for finding in findings {
            sqlx::query(
                r#"
                INSERT INTO findings (scan_id, url, risk, name, location)
                VALUES ($1, $2, $3, $4, $5)
                "#,
            )
            .bind(finding.scan_id)
            .bind(&finding.url)
            .bind(&finding.risk)
            .bind(&finding.name)
            .bind(&finding.location)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(findings.len() as u64)
    }

    async fn list_for_scan(
        &self,
        scan_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Finding>, AppError> {
        let rows = sqlx::query_as::<_, Finding>(
            r#"
            SELECT * FROM findings
            WHERE scan_id = $1
            ORDER BY created_at, id
            LIMIT $2 OFFSET $3
            "#,
        )
        .bind(scan_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn count_for_scan(&self, scan_id: Uuid) -> Result<i64, AppError> {
        let count =
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM findings WHERE scan_id = $1")
                .bind(scan_id)
                .fetch_one(&self.pool)
                .await?;
        Ok(count)
    }
}
