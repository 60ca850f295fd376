//! Scanner backend adapters normalizing three vendor HTTP protocols.
//!
//! Each adapter implements the `ScannerAdapter` trait, hiding its vendor's
//! authentication header, endpoint shapes, and JSON field names. No other
//! module inspects vendor payloads directly.

pub mod dast_a;
pub mod dast_b;
pub mod sast;
pub mod walker;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AppConfig;
use crate::models::scan::{ScanStatus, ScannerKind};

/// Failure taxonomy for scanner backend calls.
#[derive(Debug, thiserror::Error)]
pub enum ScannerError {
    /// Network, TLS, or timeout failure reaching the vendor.
    #[error("transport failure: {0}")]
    Transport(String),

    /// Vendor rejected our credentials (401/403).
    #[error("scanner rejected credentials")]
    Auth,

    /// Vendor payload could not be decoded.
    #[error("malformed scanner payload: {0}")]
    Decode(String),

    /// Vendor returned a non-success status for a submitted operation.
    #[error("scanner rejected request: {0}")]
    Rejected(String),

    /// Cursor pagination never terminated within the page bound.
    #[error("pagination did not terminate within {0} pages")]
    PaginationExhausted(u32),
}

impl From<reqwest::Error> for ScannerError {
    fn from(e: reqwest::Error) -> Self {
        Self::Transport(e.to_string())
    }
}

/// One page of a cursor-paginated vendor collection.
#[derive(Debug, Clone)]
pub struct Page<T> {
    pub items: Vec<T>,
    /// Opaque token for the next page; `None` means this was the last page.
    pub next_cursor: Option<String>,
}

/// Paged vendor collections addressable through `fetch_page`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Targets,
    Scans,
    Vulnerabilities,
    Projects,
    Findings,
}

/// Vendor-defined stage of a scan.
///
/// Every backend runs a Discovery phase (target registration, crawl, or
/// source snapshot) followed by an Analysis phase, each with its own
/// external identifier and independent progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseKind {
    Discovery,
    Analysis,
}

impl std::fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discovery => write!(f, "discovery"),
            Self::Analysis => write!(f, "analysis"),
        }
    }
}

/// Outcome of polling a phase.
#[derive(Debug, Clone, PartialEq)]
pub enum PhaseProgress {
    /// Phase still running, with vendor-reported percentage (0-99).
    Running(u8),
    /// Phase reached its terminal progress value.
    Complete,
    /// Vendor reports the phase itself failed.
    Failed(String),
}

impl PhaseProgress {
    /// Interpret a percentage where 100 means terminal.
    pub fn from_percent(percent: u8) -> Self {
        if percent >= 100 {
            Self::Complete
        } else {
            Self::Running(percent)
        }
    }
}

/// Extra inputs for a phase submission.
#[derive(Debug, Clone, Default)]
pub struct SubmitParams {
    /// External id returned by the Discovery submission, required by
    /// backends whose Analysis phase references it.
    pub discovery_external_id: Option<String>,
}

/// A finding as reported by a vendor, before validation.
///
/// Fields are optional because partial vendor data is expected; mandatory
/// field enforcement happens at sync time, per item.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawFinding {
    /// Affected URL, or repository URL for static analysis.
    pub url: Option<String>,
    /// Vulnerability or rule name.
    pub name: Option<String>,
    /// Vendor severity label, verbatim.
    pub risk: Option<String>,
    /// Path, line, parameter, or evidence detail.
    pub location: Option<String>,
}

/// One row of a vendor's bulk live-status listing.
#[derive(Debug, Clone)]
pub struct LiveStatus {
    pub external_id: String,
    /// Vendor status string, verbatim.
    pub status: String,
    pub progress: u8,
}

/// Contract implemented once per vendor.
///
/// All methods that reach the network are idempotent reads except
/// `submit_phase`. Errors follow the `ScannerError` taxonomy.
#[async_trait]
pub trait ScannerAdapter: Send + Sync {
    fn kind(&self) -> ScannerKind;

    /// Fetch one page of a paged vendor collection.
    async fn fetch_page(
        &self,
        resource: ResourceKind,
        cursor: Option<&str>,
    ) -> Result<Page<serde_json::Value>, ScannerError>;

    /// Begin a phase against a target, returning the vendor's identifier
    /// for the started phase.
    async fn submit_phase(
        &self,
        target: &str,
        phase: PhaseKind,
        params: &SubmitParams,
    ) -> Result<String, ScannerError>;

    /// Read the current progress of a previously submitted phase.
    /// Safe to call repeatedly.
    async fn poll_phase(&self, external_id: &str) -> Result<PhaseProgress, ScannerError>;

    /// Fetch the finding set produced by a finished analysis phase.
    async fn fetch_results(
        &self,
        external_id: &str,
        target: &str,
    ) -> Result<Vec<RawFinding>, ScannerError>;

    /// One bulk call returning live statuses for every scan the vendor
    /// currently knows about.
    async fn fetch_live_statuses(&self) -> Result<Vec<LiveStatus>, ScannerError>;

    /// Map a vendor status string to the internal enum. `None` means the
    /// string is unmapped and must be passed through verbatim with a
    /// warning, never silently dropped.
    fn map_status(&self, vendor_status: &str) -> Option<ScanStatus>;
}

/// Adapter lookup carried in application state.
///
/// Built once from configuration; concurrent requests share it immutably,
/// so no cross-organization state can leak between calls.
#[derive(Clone)]
pub struct ScannerRegistry {
    adapters: HashMap<ScannerKind, Arc<dyn ScannerAdapter>>,
}

impl ScannerRegistry {
    pub fn from_config(config: &AppConfig) -> Result<Self, ScannerError> {
        let client = http_client(config.scanner_http_timeout_secs)?;
        let adapters: Vec<Arc<dyn ScannerAdapter>> = vec![
            Arc::new(dast_a::DastAAdapter::new(
                client.clone(),
                config.dast_a_base_url.clone(),
                config.dast_a_api_key.clone(),
            )),
            Arc::new(dast_b::DastBAdapter::new(
                client.clone(),
                config.dast_b_base_url.clone(),
                config.dast_b_api_key.clone(),
            )),
            Arc::new(sast::SastAdapter::new(
                client,
                config.sast_base_url.clone(),
                config.sast_api_token.clone(),
            )),
        ];
        Ok(Self::with_adapters(adapters))
    }

    /// Build a registry from explicit adapters (tests, alternate wiring).
    pub fn with_adapters(adapters: Vec<Arc<dyn ScannerAdapter>>) -> Self {
        Self {
            adapters: adapters.into_iter().map(|a| (a.kind(), a)).collect(),
        }
    }

    pub fn get(&self, kind: ScannerKind) -> Option<Arc<dyn ScannerAdapter>> {
        self.adapters.get(&kind).cloned()
    }
}

impl std::fmt::Debug for ScannerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScannerRegistry")
            .field("kinds", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Shared HTTP client for all vendor calls.
pub fn http_client(timeout_secs: u64) -> Result<reqwest::Client, ScannerError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| ScannerError::Transport(e.to_string()))
}

/// Decode a read response, classifying auth and transport failures.
pub(crate) async fn read_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ScannerError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ScannerError::Auth);
    }
    if !status.is_success() {
        return Err(ScannerError::Transport(format!(
            "vendor returned HTTP {status}"
        )));
    }
    resp.json::<T>()
        .await
        .map_err(|e| ScannerError::Decode(e.to_string()))
}

/// Decode a submission response; a non-success status is a rejection by
/// the vendor, not a transport fault.
pub(crate) async fn read_submit_json<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ScannerError> {
    let status = resp.status();
    if status == reqwest::StatusCode::UNAUTHORIZED || status == reqwest::StatusCode::FORBIDDEN {
        return Err(ScannerError::Auth);
    }
    if !status.is_success() {
        return Err(ScannerError::Rejected(format!(
            "vendor returned HTTP {status}"
        )));
    }
    resp.json::<T>()
        .await
        .map_err(|e| ScannerError::Decode(e.to_string()))
}
