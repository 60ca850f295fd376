//! Scan lifecycle controller.
//!
//! Drives one scan through its phases as a single sequential task:
//! submit discovery, poll to completion, submit analysis, poll again,
//! fetch results, sync findings, finalize. Vendor-side failures move the
//! scan to `failed` with a persisted reason; only infrastructure faults
//! (store writes on the happy path) surface as errors.
//!
//! Each poll wait is cancellable and the whole lifecycle is bounded by a
//! timeout, so an operator can abort a stuck scan and a wedged vendor
//! cannot hold a task forever.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::scan::{Scan, ScanStatus};
use crate::scanners::{PhaseKind, PhaseProgress, ScannerAdapter, SubmitParams};
use crate::services::sync;
use crate::store::{FindingStore, ScanStore};

pub struct LifecycleRunner {
    scans: Arc<dyn ScanStore>,
    findings: Arc<dyn FindingStore>,
    adapter: Arc<dyn ScannerAdapter>,
    poll_interval: Duration,
    max_duration: Duration,
}

/// A scan plus best-effort live progress for status checks.
#[derive(Debug, Serialize)]
pub struct ScanProgress {
    #[serde(flatten)]
    pub scan: Scan,
    pub live_progress: Option<u8>,
}

/// Cancellation tokens for in-flight lifecycle tasks, keyed by scan id.
///
/// Carried in application state so an operator can abort a stuck scan
/// without killing the process. Entries are removed when the task finishes.
#[derive(Debug, Clone, Default)]
pub struct RunningScans {
    inner: Arc<Mutex<HashMap<Uuid, CancellationToken>>>,
}

impl RunningScans {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a fresh token for a scan about to run.
    pub fn register(&self, scan_id: Uuid) -> CancellationToken {
        let token = CancellationToken::new();
        self.inner
            .lock()
            .expect("running-scan map poisoned")
            .insert(scan_id, token.clone());
        token
    }

    /// Cancel a running scan. Returns false when the scan has no in-flight
    /// lifecycle task.
    pub fn cancel(&self, scan_id: Uuid) -> bool {
        match self
            .inner
            .lock()
            .expect("running-scan map poisoned")
            .get(&scan_id)
        {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, scan_id: Uuid) {
        self.inner
            .lock()
            .expect("running-scan map poisoned")
            .remove(&scan_id);
    }
}

/// How a poll loop ended.
enum PollEnd {
    Complete,
    VendorFailed(String),
    PollError(String),
    Aborted,
}

impl LifecycleRunner {
    pub fn new(
        scans: Arc<dyn ScanStore>,
        findings: Arc<dyn FindingStore>,
        adapter: Arc<dyn ScannerAdapter>,
        poll_interval: Duration,
        max_duration: Duration,
    ) -> Self {
        Self {
            scans,
            findings,
            adapter,
            poll_interval,
            max_duration,
        }
    }

    /// Drive the scan from its persisted state to a terminal state.
    ///
    /// A scan already in a terminal state is returned unchanged without any
    /// external call, so finished scans are never re-finalized or re-polled.
    pub async fn run(&self, scan_id: Uuid, cancel: CancellationToken) -> Result<Scan, AppError> {
        let scan = self
            .scans
            .get(scan_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Scan not found".to_string()))?;

        if scan.status.is_terminal() {
            return Ok(scan);
        }

        match tokio::time::timeout(self.max_duration, self.drive(scan, &cancel)).await {
            Ok(result) => result,
            Err(_) => {
                let scan = self
                    .scans
                    .get(scan_id)
                    .await?
                    .ok_or_else(|| AppError::NotFound("Scan not found".to_string()))?;
                Ok(self
                    .fail_scan(scan, "lifecycle timed out".to_string(), false)
                    .await)
            }
        }
    }

    /// Report the stored record, augmented with one live progress read for
    /// non-terminal scans. Terminal scans short-circuit with zero external
    /// calls.
    pub async fn check(&self, scan_id: Uuid) -> Result<ScanProgress, AppError> {
        let scan = self
            .scans
            .get(scan_id)
            .await?
            .ok_or_else(|| AppError::NotFound("Scan not found".to_string()))?;

        if scan.status.is_terminal() || scan.status == ScanStatus::Pending {
            return Ok(ScanProgress {
                scan,
                live_progress: None,
            });
        }

        let external_id = match scan.status {
            ScanStatus::Phase1Running => scan.phase1_external_id.clone(),
            _ => scan.phase2_external_id.clone(),
        };
        let Some(external_id) = external_id else {
            let scan = self
                .fail_scan(scan, "missing external phase id".to_string(), false)
                .await;
            return Ok(ScanProgress {
                scan,
                live_progress: None,
            });
        };

        // Best-effort read; the stored status stays authoritative and the
        // live value is never persisted here.
        let live_progress = match self.adapter.poll_phase(&external_id).await {
            Ok(PhaseProgress::Running(progress)) => Some(progress),
            Ok(PhaseProgress::Complete) => Some(100),
            Ok(PhaseProgress::Failed(_)) => None,
            Err(e) => {
                tracing::warn!(%scan_id, error = %e, "Live progress read failed");
                None
            }
        };

        Ok(ScanProgress {
            scan,
            live_progress,
        })
    }

    async fn drive(&self, mut scan: Scan, cancel: &CancellationToken) -> Result<Scan, AppError> {
        loop {
            scan = match scan.status {
                ScanStatus::Pending => self.start_discovery(scan).await?,
                ScanStatus::Phase1Running => self.finish_discovery(scan, cancel).await?,
                ScanStatus::Phase2Running => self.finish_analysis(scan, cancel).await?,
                ScanStatus::Finalizing => self.finalize(scan).await?,
                ScanStatus::Completed | ScanStatus::Failed => return Ok(scan),
            };
        }
    }

    async fn start_discovery(&self, mut scan: Scan) -> Result<Scan, AppError> {
        tracing::info!(
            scan_id = %scan.id,
            kind = %scan.kind,
            target = %scan.target,
            "Submitting discovery phase"
        );
        match self
            .adapter
            .submit_phase(&scan.target, PhaseKind::Discovery, &SubmitParams::default())
            .await
        {
            Ok(external_id) => {
                self.scans.set_phase1_started(scan.id, &external_id).await?;
                scan.status = ScanStatus::Phase1Running;
                scan.phase1_external_id = Some(external_id);
                Ok(scan)
            }
            // Not retried here; resubmission is the caller's decision.
            Err(e) => Ok(self
                .fail_scan(scan, format!("discovery submission failed: {e}"), false)
                .await),
        }
    }

    async fn finish_discovery(
        &self,
        mut scan: Scan,
        cancel: &CancellationToken,
    ) -> Result<Scan, AppError> {
        let Some(phase1_id) = scan.phase1_external_id.clone() else {
            return Ok(self
                .fail_scan(scan, "missing discovery phase id".to_string(), false)
                .await);
        };

        match self.poll_until_complete(scan.id, &phase1_id, cancel).await {
            PollEnd::Complete => {}
            end => return Ok(self.fail_from_poll(scan, end).await),
        }

        tracing::info!(scan_id = %scan.id, "Discovery complete, submitting analysis phase");
        let params = SubmitParams {
            discovery_external_id: Some(phase1_id),
        };
        match self
            .adapter
            .submit_phase(&scan.target, PhaseKind::Analysis, &params)
            .await
        {
            Ok(external_id) => {
                self.scans.set_phase2_started(scan.id, &external_id).await?;
                scan.status = ScanStatus::Phase2Running;
                scan.phase2_external_id = Some(external_id);
                Ok(scan)
            }
            Err(e) => Ok(self
                .fail_scan(scan, format!("analysis submission failed: {e}"), false)
                .await),
        }
    }

    async fn finish_analysis(
        &self,
        mut scan: Scan,
        cancel: &CancellationToken,
    ) -> Result<Scan, AppError> {
        let Some(phase2_id) = scan.phase2_external_id.clone() else {
            return Ok(self
                .fail_scan(scan, "missing analysis phase id".to_string(), false)
                .await);
        };

        match self.poll_until_complete(scan.id, &phase2_id, cancel).await {
            PollEnd::Complete => {}
            end => return Ok(self.fail_from_poll(scan, end).await),
        }

        self.scans.set_status(scan.id, ScanStatus::Finalizing).await?;
        scan.status = ScanStatus::Finalizing;
        Ok(scan)
    }

    async fn finalize(&self, mut scan: Scan) -> Result<Scan, AppError> {
        let Some(phase2_id) = scan.phase2_external_id.clone() else {
            return Ok(self
                .fail_scan(scan, "missing analysis phase id".to_string(), false)
                .await);
        };

        tracing::info!(scan_id = %scan.id, "Fetching scan results");
        let raw = match self.adapter.fetch_results(&phase2_id, &scan.target).await {
            Ok(raw) => raw,
            // No confirmed results exist, so the stale count is zeroed.
            Err(e) => {
                return Ok(self
                    .fail_scan(scan, format!("result fetch failed: {e}"), true)
                    .await)
            }
        };

        let saved = match sync::replace(self.findings.as_ref(), scan.id, &raw).await {
            Ok(saved) => saved,
            Err(e) => {
                return Ok(self
                    .fail_scan(scan, format!("finding sync failed: {e}"), true)
                    .await)
            }
        };

        self.scans.mark_completed(scan.id, saved as i64).await?;
        tracing::info!(scan_id = %scan.id, finding_count = saved, "Scan completed");
        scan.status = ScanStatus::Completed;
        scan.finding_count = saved as i32;
        scan.failure_reason = None;
        Ok(scan)
    }

    /// Poll one phase until it reaches its terminal progress value, waiting
    /// `poll_interval` between reads. The wait races against cancellation.
    async fn poll_until_complete(
        &self,
        scan_id: Uuid,
        external_id: &str,
        cancel: &CancellationToken,
    ) -> PollEnd {
        loop {
            match self.adapter.poll_phase(external_id).await {
                Ok(PhaseProgress::Complete) => return PollEnd::Complete,
                Ok(PhaseProgress::Running(progress)) => {
                    tracing::debug!(%scan_id, external_id, progress, "Phase in progress");
                }
                Ok(PhaseProgress::Failed(reason)) => return PollEnd::VendorFailed(reason),
                Err(e) => return PollEnd::PollError(e.to_string()),
            }

            tokio::select! {
                _ = cancel.cancelled() => return PollEnd::Aborted,
                _ = tokio::time::sleep(self.poll_interval) => {}
            }
        }
    }

    async fn fail_from_poll(&self, scan: Scan, end: PollEnd) -> Scan {
        let reason = match end {
            PollEnd::Complete => unreachable!("complete polls do not fail a scan"),
            PollEnd::VendorFailed(reason) => format!("scanner reported phase failure: {reason}"),
            PollEnd::PollError(reason) => format!("phase poll failed: {reason}"),
            PollEnd::Aborted => "aborted by operator".to_string(),
        };
        self.fail_scan(scan, reason, false).await
    }

    /// Persist the failed transition. A status-write failure is logged but
    /// never masks the original failure reason.
    async fn fail_scan(&self, mut scan: Scan, reason: String, reset_finding_count: bool) -> Scan {
        tracing::warn!(scan_id = %scan.id, %reason, "Scan moved to failed");
        if let Err(write_err) = self
            .scans
            .mark_failed(scan.id, &reason, reset_finding_count)
            .await
        {
            tracing::error!(
                scan_id = %scan.id,
                error = %write_err,
                "Could not persist failed status"
            );
        }
        scan.status = ScanStatus::Failed;
        if reset_finding_count {
            scan.finding_count = 0;
        }
        scan.failure_reason = Some(reason);
        scan
    }
}
