//! SAST backend adapter.
//!
//! Vendor protocol: bearer-token SaaS API where every listing is a JSON
//! POST search body carrying `cursor` + `limit` fields and answering with
//! `{items, next_cursor}`. Findings carry repository URL, rule name,
//! severity, file path, and line number.
//!
//! Phase mapping: Discovery snapshots the repository source, Analysis runs
//! the analysis job over that snapshot.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use crate::models::scan::{ScanStatus, ScannerKind};

use super::{
    read_json, read_submit_json, walker, LiveStatus, Page, PhaseKind, PhaseProgress, RawFinding,
    ResourceKind, ScannerAdapter, ScannerError, SubmitParams,
};

const SNAPSHOT_PREFIX: &str = "snapshot:";
const ANALYSIS_PREFIX: &str = "analysis:";

/// Items requested per search page.
const SEARCH_LIMIT: usize = 100;

pub struct SastAdapter {
    client: reqwest::Client,
    base_url: String,
    api_token: String,
}

impl SastAdapter {
    pub fn new(client: reqwest::Client, base_url: String, api_token: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_token,
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_token)
    }

    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        self.client
            .post(format!("{}{path}", self.base_url))
            .bearer_auth(&self.api_token)
    }

    /// Run one search-body page request against a listing endpoint.
    async fn search_page<T: serde::de::DeserializeOwned>(
        &self,
        path: &str,
        filter: serde_json::Value,
        cursor: Option<&str>,
    ) -> Result<Page<T>, ScannerError> {
        let mut body = filter;
        body["limit"] = json!(SEARCH_LIMIT);
        if let Some(c) = cursor {
            body["cursor"] = json!(c);
        }
        let resp = self.post(path).json(&body).send().await?;
        let body: SearchBody<T> = read_json(resp).await?;
        Ok(Page {
            items: body.items,
            next_cursor: body.next_cursor,
        })
    }
}

#[async_trait]
impl ScannerAdapter for SastAdapter {
    fn kind(&self) -> ScannerKind {
        ScannerKind::Sast
    }

    async fn fetch_page(
        &self,
        resource: ResourceKind,
        cursor: Option<&str>,
    ) -> Result<Page<serde_json::Value>, ScannerError> {
        let path = match resource {
            ResourceKind::Projects => "/v2/projects/search",
            ResourceKind::Scans => "/v2/scans/search",
            ResourceKind::Findings => "/v2/findings/search",
            other => {
                return Err(ScannerError::Rejected(format!(
                    "resource {other:?} is not exposed by this backend"
                )))
            }
        };
        self.search_page(path, json!({}), cursor).await
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
                    .post("/v2/snapshots")
                    .json(&json!({ "repository": target }))
                    .send()
                    .await?;
                let body: JobCreated = read_submit_json(resp).await?;
                Ok(format!("{SNAPSHOT_PREFIX}{}", body.job_id))
            }
            PhaseKind::Analysis => {
                let snapshot_job = params
                    .discovery_external_id
                    .as_deref()
                    .and_then(|id| id.strip_prefix(SNAPSHOT_PREFIX))
                    .ok_or_else(|| {
                        ScannerError::Rejected(
                            "analysis submission requires the snapshot job id".to_string(),
                        )
                    })?;
                let resp = self
                    .post("/v2/scans")
                    .json(&json!({
                        "repository": target,
                        "snapshot_job_id": snapshot_job,
                    }))
                    .send()
                    .await?;
                let body: ScanCreated = read_submit_json(resp).await?;
                Ok(format!("{ANALYSIS_PREFIX}{}", body.scan_id))
            }
        }
    }

    async fn poll_phase(&self, external_id: &str) -> Result<PhaseProgress, ScannerError> {
        let path = if let Some(job_id) = external_id.strip_prefix(SNAPSHOT_PREFIX) {
            format!("/v2/jobs/{job_id}")
        } else if let Some(scan_id) = external_id.strip_prefix(ANALYSIS_PREFIX) {
            format!("/v2/scans/{scan_id}")
        } else {
            return Err(ScannerError::Decode(format!(
                "unknown phase id: {external_id}"
            )));
        };

        let body: JobState = read_json(self.get(&path).send().await?).await?;
        Ok(job_progress(&body.state, body.percent))
    }

    async fn fetch_results(
        &self,
        external_id: &str,
        _target: &str,
    ) -> Result<Vec<RawFinding>, ScannerError> {
        let scan_id = external_id
            .strip_prefix(ANALYSIS_PREFIX)
            .ok_or_else(|| ScannerError::Decode(format!("unknown phase id: {external_id}")))?;

        let items: Vec<FindingItem> = walker::walk(|cursor| async move {
            self.search_page(
                "/v2/findings/search",
                json!({ "scan_id": scan_id }),
                cursor.as_deref(),
            )
            .await
        })
        .await?;

        Ok(items
            .into_iter()
            .map(|f| RawFinding {
                url: f.repository_url,
                name: f.rule_name,
                risk: f.severity,
                location: file_location(f.file_path, f.line),
            })
            .collect())
    }

    async fn fetch_live_statuses(&self) -> Result<Vec<LiveStatus>, ScannerError> {
        // First search page doubles as the bulk status view.
        let page: Page<ScanListItem> = self
            .search_page("/v2/scans/search", json!({}), None)
            .await?;
        Ok(page
            .items
            .into_iter()
            .map(|s| LiveStatus {
                external_id: format!("{ANALYSIS_PREFIX}{}", s.scan_id),
                status: s.state,
                progress: s.percent.unwrap_or(0).clamp(0, 100) as u8,
            })
            .collect())
    }

    fn map_status(&self, vendor_status: &str) -> Option<ScanStatus> {
        match vendor_status {
            "queued" | "running" => Some(ScanStatus::Phase2Running),
            "done" => Some(ScanStatus::Completed),
            "error" | "canceled" => Some(ScanStatus::Failed),
            _ => None,
        }
    }
}

fn job_progress(state: &str, percent: Option<i64>) -> PhaseProgress {
    match state {
        "done" => PhaseProgress::Complete,
        "error" | "canceled" => PhaseProgress::Failed(format!("job {state}")),
        _ => PhaseProgress::from_percent(percent.unwrap_or(0).clamp(0, 100) as u8),
    }
}

/// Render `path:line` the way the vendor reports source locations.
fn file_location(path: Option<String>, line: Option<i64>) -> Option<String> {
    let path = path?;
    Some(match line {
        Some(line) => format!("{path}:{line}"),
        None => path,
    })
}

// -- Vendor payload shapes (private to this adapter) --

#[derive(Debug, Deserialize)]
struct SearchBody<T> {
    items: Vec<T>,
    next_cursor: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobCreated {
    job_id: String,
}

#[derive(Debug, Deserialize)]
struct ScanCreated {
    scan_id: String,
}

#[derive(Debug, Deserialize)]
struct JobState {
    state: String,
    percent: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct ScanListItem {
    scan_id: String,
    state: String,
    percent: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FindingItem {
    repository_url: Option<String>,
    rule_name: Option<String>,
    severity: Option<String>,
    file_path: Option<String>,
    line: Option<i64>,
}
