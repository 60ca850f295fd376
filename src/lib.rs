pub mod config;
pub mod db;
pub mod errors;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod scanners;
pub mod services;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use sqlx::PgPool;

use crate::errors::AppError;
use crate::models::scan::ScannerKind;
use crate::scanners::{ScannerError, ScannerRegistry};
use crate::services::lifecycle::{LifecycleRunner, RunningScans};
use crate::store::postgres::{PgFindingStore, PgScanStore};
use crate::store::{FindingStore, ScanStore};

/// Shared application state passed to all Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: PgPool,
    pub config: config::AppConfig,
    pub scans: Arc<dyn ScanStore>,
    pub findings: Arc<dyn FindingStore>,
    pub scanners: ScannerRegistry,
    pub running: RunningScans,
}

impl AppState {
    pub fn new(db: PgPool, config: config::AppConfig) -> Result<Self, ScannerError> {
        let scanners = ScannerRegistry::from_config(&config)?;
        Ok(Self {
            scans: Arc::new(PgScanStore::new(db.clone())),
            findings: Arc::new(PgFindingStore::new(db.clone())),
            scanners,
            running: RunningScans::new(),
            db,
            config,
        })
    }

    /// Build a lifecycle runner for one scanner backend.
    pub fn lifecycle_runner(&self, kind: ScannerKind) -> Result<LifecycleRunner, AppError> {
        let adapter = self
            .scanners
            .get(kind)
            .ok_or_else(|| AppError::Internal(format!("no adapter configured for {kind}")))?;
        Ok(LifecycleRunner::new(
            self.scans.clone(),
            self.findings.clone(),
            adapter,
            Duration::from_secs(self.config.poll_interval_secs),
            Duration::from_secs(self.config.scan_timeout_secs),
        ))
    }
}
