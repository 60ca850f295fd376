//! DAST-A backend adapter.
//!
//! Vendor protocol: `X-Auth` header, REST-ish JSON endpoints, and
//! cursor-paginated list responses shaped
//! `{items: [...], pagination: {cursors: [...]}}` where a second cursor
//! entry signals that more pages exist.
//!
//! Phase mapping: Discovery registers the target (synchronous — the first
//! poll reports complete), Analysis runs a scan session with numeric
//! progress.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::models::scan::{ScanStatus, ScannerKind};

use super::{
    read_json, read_submit_json, walker, LiveStatus, Page, PhaseKind, PhaseProgress, RawFinding,
    ResourceKind, ScannerAdapter, ScannerError, SubmitParams,
};

/// Scan profile submitted with every analysis session.
const FULL_SCAN_PROFILE: &str = "11111111-1111-1111-1111-111111111111";

/// External ids are prefixed so `poll_phase` can route them to the right
/// endpoint; the rest of the system treats them as opaque strings.
const TARGET_PREFIX: &str = "target:";
const SESSION_PREFIX: &str = "session:";

pub struct DastAAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl DastAAdapter {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .header("X-Auth", &self.api_key)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .header("X-Auth", &self.api_key)
    }

    /// One page of the scan-scoped vulnerability listing.
    async fn vulnerability_page(
        &self,
        session_id: &str,
        cursor: Option<&str>,
    ) -> Result<Page<VulnerabilityItem>, ScannerError> {
        let mut req = self
            .get("/api/v1/vulnerabilities")
            .query(&[("q", format!("scan_session_id:{session_id}"))]);
        if let Some(c) = cursor {
            req = req.query(&[("c", c)]);
        }
        let body: PageBody<VulnerabilityItem> = read_json(req.send().await?).await?;
        Ok(body.into_page())
    }
}

#[async_trait]
impl ScannerAdapter for DastAAdapter {
    fn kind(&self) -> ScannerKind {
        ScannerKind::DastA
    }

    async fn fetch_page(
        &self,
        resource: ResourceKind,
        cursor: Option<&str>,
    ) -> Result<Page<serde_json::Value>, ScannerError> {
        let path = match resource {
            ResourceKind::Targets => "/api/v1/targets",
            ResourceKind::Scans => "/api/v1/scans",
            ResourceKind::Vulnerabilities => "/api/v1/vulnerabilities",
            other => {
                return Err(ScannerError::Rejected(format!(
                    "resource {other:?} is not exposed by this backend"
                )))
            }
        };
        let mut req = self.get(path);
        if let Some(c) = cursor {
            req = req.query(&[("c", c)]);
        }
        let body: PageBody<serde_json::Value> = read_json(req.send().await?).await?;
        Ok(body.into_page())
    }

    async fn submit_phase(
        &self,
        target: &str,
        phase: PhaseKind,
        params: &SubmitParams,
    ) -> Result<String, ScannerError> {
        match phase {
            PhaseKind::Discovery => {
                let resp = self
                    .post("/api/v1/targets")
                    .json(&json!({ "address": target, "criticality": 10 }))
                    .send()
                    .await?;
                let body: TargetCreated = read_submit_json(resp).await?;
                Ok(format!("{TARGET_PREFIX}{}", body.target_id))
            }
            PhaseKind::Analysis => {
                let target_id = params
                    .discovery_external_id
                    .as_deref()
                    .and_then(|id| id.strip_prefix(TARGET_PREFIX))
                    .ok_or_else(|| {
                        ScannerError::Rejected(
                            "analysis submission requires the discovery phase id".to_string(),
                        )
                    })?;
                let resp = self
                    .post("/api/v1/scans")
                    .json(&json!({
                        "target_id": target_id,
                        "profile_id": FULL_SCAN_PROFILE,
                    }))
                    .send()
                    .await?;
                let body: SessionCreated = read_submit_json(resp).await?;
                Ok(format!("{SESSION_PREFIX}{}", body.scan_session_id))
            }
        }
    }

    async fn poll_phase(&self, external_id: &str) -> Result<PhaseProgress, ScannerError> {
        if let Some(target_id) = external_id.strip_prefix(TARGET_PREFIX) {
            // Target registration is synchronous; a readable target means
            // the discovery phase is done.
            let resp = self.get(&format!("/api/v1/targets/{target_id}")).send().await?;
            let _: serde_json::Value = read_json(resp).await?;
            return Ok(PhaseProgress::Complete);
        }

        let session_id = external_id
            .strip_prefix(SESSION_PREFIX)
            .ok_or_else(|| ScannerError::Decode(format!("unknown phase id: {external_id}")))?;
        let resp = self.get(&format!("/api/v1/scans/{session_id}")).send().await?;
        let body: SessionDetail = read_json(resp).await?;
        Ok(session_progress(
            &body.current_session.status,
            body.current_session.progress,
        ))
    }

    async fn fetch_results(
        &self,
        external_id: &str,
        _target: &str,
    ) -> Result<Vec<RawFinding>, ScannerError> {
        let session_id = external_id
            .strip_prefix(SESSION_PREFIX)
            .ok_or_else(|| ScannerError::Decode(format!("unknown phase id: {external_id}")))?;

        let items = walker::walk(|cursor| async move {
            self.vulnerability_page(session_id, cursor.as_deref()).await
        })
        .await?;

        Ok(items
            .into_iter()
            .map(|v| RawFinding {
                url: v.affects_url,
                name: v.vt_name,
                risk: v.severity,
                location: v.affects_detail,
            })
            .collect())
    }

    async fn fetch_live_statuses(&self) -> Result<Vec<LiveStatus>, ScannerError> {
        // One page is the bulk view: the vendor orders sessions by recency
        // and every in-flight session appears on the first page.
        let page = self.fetch_page(ResourceKind::Scans, None).await?;
        let mut statuses = Vec::with_capacity(page.items.len());
        for item in page.items {
            let Ok(detail) = serde_json::from_value::<SessionListItem>(item) else {
                continue;
            };
            statuses.push(LiveStatus {
                external_id: format!("{SESSION_PREFIX}{}", detail.scan_session_id),
                status: detail.current_session.status,
                progress: detail.current_session.progress.unwrap_or(0).min(100) as u8,
            });
        }
        Ok(statuses)
    }

    fn map_status(&self, vendor_status: &str) -> Option<ScanStatus> {
        match vendor_status {
            "queued" | "starting" | "processing" => Some(ScanStatus::Phase2Running),
            "completed" => Some(ScanStatus::Completed),
            "failed" | "aborted" => Some(ScanStatus::Failed),
            _ => None,
        }
    }
}

fn session_progress(status: &str, progress: Option<i64>) -> PhaseProgress {
    match status {
        "completed" => PhaseProgress::Complete,
        "failed" | "aborted" => PhaseProgress::Failed(format!("session {status}")),
        _ => PhaseProgress::from_percent(progress.unwrap_or(0).clamp(0, 100) as u8),
    }
}

// -- Vendor payload shapes (private to this adapter) --

#[derive(Debug, Deserialize)]
struct PageBody<T> {
    items: Vec<T>,
    pagination: PaginationBody,
}

#[derive(Debug, Deserialize)]
struct PaginationBody {
    cursors: Vec<serde_json::Value>,
}

impl<T> PageBody<T> {
    /// Vendor convention: a second cursor entry signals more pages exist,
    /// and that entry is the next cursor.
    fn into_page(self) -> Page<T> {
        let next_cursor = if self.pagination.cursors.len() > 1 {
            self.pagination.cursors[1].as_str().map(String::from)
        } else {
            None
        };
        Page {
            items: self.items,
            next_cursor,
        }
    }
}

#[derive(Debug, Deserialize)]
struct TargetCreated {
    target_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    scan_session_id: String,
}

#[derive(Debug, Deserialize)]
struct SessionDetail {
    current_session: SessionState,
}

#[derive(Debug, Deserialize)]
struct SessionListItem {
    scan_session_id: String,
    current_session: SessionState,
}

#[derive(Debug, Deserialize)]
struct SessionState {
    status: String,
    progress: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct VulnerabilityItem {
    affects_url: Option<String>,
    vt_name: Option<String>,
    severity: Option<String>,
    affects_detail: Option<String>,
}
