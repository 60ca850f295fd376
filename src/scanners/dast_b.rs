//! DAST-B backend adapter.
//!
//! Vendor protocol: JSON-RPC-over-HTTP-GET action/view endpoints with an
//! `apikey` query parameter. Progress is reported as a decimal-string
//! percentage (`"0"`-`"100"`). Alert listings page by numeric offset, which
//! this adapter carries as the opaque cursor.
//!
//! Phase mapping: Discovery is the crawl, Analysis is the active scan.

use async_trait::async_trait;
use serde::Deserialize;

use crate::models::scan::{ScanStatus, ScannerKind};

use super::{
    read_json, read_submit_json, walker, LiveStatus, Page, PhaseKind, PhaseProgress, RawFinding,
    ResourceKind, ScannerAdapter, ScannerError, SubmitParams,
};

const CRAWL_PREFIX: &str = "crawl:";
const ATTACK_PREFIX: &str = "attack:";

/// Alerts fetched per offset page.
const ALERT_PAGE_SIZE: usize = 500;

pub struct DastBAdapter {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl DastBAdapter {
    pub fn new(client: reqwest::Client, base_url: String, api_key: String) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn view(&self, component: &str, name: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}/JSON/{component}/view/{name}/", self.base_url))
            .query(&[("apikey", self.api_key.as_str())])
    }

    fn action(&self, component: &str, name: &str) -> reqwest::RequestBuilder {
        self.client
            .get(format!("{}/JSON/{component}/action/{name}/", self.base_url))
            .query(&[("apikey", self.api_key.as_str())])
    }

    async fn alert_page(
        &self,
        base_url_filter: Option<&str>,
        cursor: Option<&str>,
    ) -> Result<Page<AlertItem>, ScannerError> {
        let start = parse_offset(cursor)?;
        let mut req = self.view("core", "alerts").query(&[
            ("start", start.to_string()),
            ("count", ALERT_PAGE_SIZE.to_string()),
        ]);
        if let Some(base) = base_url_filter {
            req = req.query(&[("baseurl", base)]);
        }
        let body: AlertsBody = read_json(req.send().await?).await?;
        let next_cursor = next_offset(body.alerts.len(), start);
        Ok(Page {
            items: body.alerts,
            next_cursor,
        })
    }
}

#[async_trait]
impl ScannerAdapter for DastBAdapter {
    fn kind(&self) -> ScannerKind {
        ScannerKind::DastB
    }

    async fn fetch_page(
        &self,
        resource: ResourceKind,
        cursor: Option<&str>,
    ) -> Result<Page<serde_json::Value>, ScannerError> {
        if resource != ResourceKind::Vulnerabilities {
            return Err(ScannerError::Rejected(format!(
                "resource {resource:?} is not exposed by this backend"
            )));
        }
        let page = self.alert_page(None, cursor).await?;
        Ok(Page {
            items: page
                .items
                .into_iter()
                .map(|a| serde_json::to_value(a).unwrap_or_default())
                .collect(),
            next_cursor: page.next_cursor,
        })
    }

    async fn submit_phase(
        &self,
        target: &str,
        phase: PhaseKind,
        _params: &SubmitParams,
    ) -> Result<String, ScannerError> {
        let (component, prefix) = match phase {
            PhaseKind::Discovery => ("spider", CRAWL_PREFIX),
            PhaseKind::Analysis => ("ascan", ATTACK_PREFIX),
        };
        let resp = self
            .action(component, "scan")
            .query(&[("url", target)])
            .send()
            .await?;
        let body: ScanStarted = read_submit_json(resp).await?;
        Ok(format!("{prefix}{}", body.scan))
    }

    async fn poll_phase(&self, external_id: &str) -> Result<PhaseProgress, ScannerError> {
        let (component, scan_id) = if let Some(id) = external_id.strip_prefix(CRAWL_PREFIX) {
            ("spider", id)
        } else if let Some(id) = external_id.strip_prefix(ATTACK_PREFIX) {
            ("ascan", id)
        } else {
            return Err(ScannerError::Decode(format!(
                "unknown phase id: {external_id}"
            )));
        };

        let resp = self
            .view(component, "status")
            .query(&[("scanId", scan_id)])
            .send()
            .await?;
        let body: StatusBody = read_json(resp).await?;
        let percent = parse_percent(&body.status)?;
        Ok(PhaseProgress::from_percent(percent))
    }

    async fn fetch_results(
        &self,
        _external_id: &str,
        target: &str,
    ) -> Result<Vec<RawFinding>, ScannerError> {
        let alerts = walker::walk(|cursor| async move {
            self.alert_page(Some(target), cursor.as_deref()).await
        })
        .await?;

        Ok(alerts
            .into_iter()
            .map(|a| RawFinding {
                url: a.url,
                name: a.alert,
                risk: a.risk,
                location: a.param.filter(|p| !p.is_empty()).or(a.evidence),
            })
            .collect())
    }

    async fn fetch_live_statuses(&self) -> Result<Vec<LiveStatus>, ScannerError> {
        // The attack phase is the long-running one; its scans view is the
        // vendor's bulk status listing.
        let resp = self.view("ascan", "scans").send().await?;
        let body: ScansBody = read_json(resp).await?;
        Ok(body
            .scans
            .into_iter()
            .map(|s| LiveStatus {
                external_id: format!("{ATTACK_PREFIX}{}", s.id),
                progress: parse_percent(&s.progress).unwrap_or(0),
                status: s.state,
            })
            .collect())
    }

    fn map_status(&self, vendor_status: &str) -> Option<ScanStatus> {
        match vendor_status {
            "NOT_STARTED" | "PENDING" | "RUNNING" | "PAUSED" => Some(ScanStatus::Phase2Running),
            "FINISHED" => Some(ScanStatus::Completed),
            "STOPPED" => Some(ScanStatus::Failed),
            _ => None,
        }
    }
}

/// Parse the vendor's decimal-string percentage, clamping overshoot.
fn parse_percent(raw: &str) -> Result<u8, ScannerError> {
    raw.trim()
        .parse::<u32>()
        .map(|p| p.min(100) as u8)
        .map_err(|_| ScannerError::Decode(format!("progress percentage not decimal: {raw:?}")))
}

fn parse_offset(cursor: Option<&str>) -> Result<usize, ScannerError> {
    match cursor {
        None => Ok(0),
        Some(raw) => raw
            .parse::<usize>()
            .map_err(|_| ScannerError::Decode(format!("offset cursor not decimal: {raw:?}"))),
    }
}

/// A full page means another may follow; a short page is the last one.
fn next_offset(items_len: usize, start: usize) -> Option<String> {
    (items_len == ALERT_PAGE_SIZE).then(|| (start + ALERT_PAGE_SIZE).to_string())
}

// -- Vendor payload shapes (private to this adapter) --

#[derive(Debug, Deserialize)]
struct ScanStarted {
    scan: String,
}

#[derive(Debug, Deserialize)]
struct StatusBody {
    status: String,
}

#[derive(Debug, Deserialize)]
struct AlertsBody {
    alerts: Vec<AlertItem>,
}

#[derive(Debug, Deserialize, serde::Serialize)]
struct AlertItem {
    url: Option<String>,
    alert: Option<String>,
    risk: Option<String>,
    param: Option<String>,
    evidence: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScansBody {
    scans: Vec<ScanListItem>,
}

#[derive(Debug, Deserialize)]
struct ScanListItem {
    id: String,
    state: String,
    progress: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn adapter(server: &MockServer) -> DastBAdapter {
        DastBAdapter::new(reqwest::Client::new(), server.uri(), "zkey".to_string())
    }

    #[tokio::test]
    async fn crawl_submission_returns_prefixed_id() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/JSON/spider/action/scan/"))
            .and(query_param("url", "https://example.test"))
            .and(query_param("apikey", "zkey"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"scan": "3"})))
            .mount(&server)
            .await;

        let id = adapter(&server)
            .submit_phase(
                "https://example.test",
                PhaseKind::Discovery,
                &SubmitParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(id, "crawl:3");
    }

    #[tokio::test]
    async fn attack_submission_uses_ascan_component() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/JSON/ascan/action/scan/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"scan": "2"})))
            .mount(&server)
            .await;

        let id = adapter(&server)
            .submit_phase(
                "https://example.test",
                PhaseKind::Analysis,
                &SubmitParams::default(),
            )
            .await
            .unwrap();
        assert_eq!(id, "attack:2");
    }

    #[tokio::test]
    async fn poll_parses_decimal_string_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/JSON/spider/view/status/"))
            .and(query_param("scanId", "3"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "45"})))
            .mount(&server)
            .await;

        let progress = adapter(&server).poll_phase("crawl:3").await.unwrap();
        assert_eq!(progress, PhaseProgress::Running(45));
    }

    #[tokio::test]
    async fn poll_full_progress_is_complete() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/JSON/ascan/view/status/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "100"})))
            .mount(&server)
            .await;

        let progress = adapter(&server).poll_phase("attack:2").await.unwrap();
        assert_eq!(progress, PhaseProgress::Complete);
    }

    #[tokio::test]
    async fn poll_rejects_non_decimal_progress() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/JSON/ascan/view/status/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "soon"})))
            .mount(&server)
            .await;

        let err = adapter(&server).poll_phase("attack:2").await.unwrap_err();
        assert!(matches!(err, ScannerError::Decode(_)));
    }

    #[tokio::test]
    async fn unknown_phase_id_is_a_decode_error() {
        let server = MockServer::start().await;
        let err = adapter(&server).poll_phase("bogus:9").await.unwrap_err();
        assert!(matches!(err, ScannerError::Decode(_)));
    }

    #[tokio::test]
    async fn fetch_results_normalizes_alerts() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/JSON/core/view/alerts/"))
            .and(query_param("baseurl", "https://example.test"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "alerts": [
                    {"url": "https://example.test/login", "alert": "X-Frame-Options Header Not Set",
                     "risk": "Medium", "param": "", "evidence": "<html>"},
                    {"url": "https://example.test/search", "alert": "Cross Site Scripting",
                     "risk": "High", "param": "q"}
                ]
            })))
            .mount(&server)
            .await;

        let findings = adapter(&server)
            .fetch_results("attack:2", "https://example.test")
            .await
            .unwrap();
        assert_eq!(findings.len(), 2);
        // Empty param falls back to evidence.
        assert_eq!(findings[0].location.as_deref(), Some("<html>"));
        assert_eq!(findings[1].location.as_deref(), Some("q"));
    }

    #[tokio::test]
    async fn live_statuses_keep_vendor_state_verbatim() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/JSON/ascan/view/scans/"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "scans": [
                    {"id": "1", "state": "RUNNING", "progress": "45"},
                    {"id": "2", "state": "REBALANCING", "progress": "10"}
                ]
            })))
            .mount(&server)
            .await;

        let statuses = adapter(&server).fetch_live_statuses().await.unwrap();
        assert_eq!(statuses[0].external_id, "attack:1");
        assert_eq!(statuses[0].status, "RUNNING");
        assert_eq!(statuses[1].status, "REBALANCING");
        assert_eq!(statuses[1].progress, 10);
    }

    #[test]
    fn status_mapping_table() {
        let a = DastBAdapter::new(reqwest::Client::new(), String::new(), String::new());
        assert_eq!(a.map_status("RUNNING"), Some(ScanStatus::Phase2Running));
        assert_eq!(a.map_status("FINISHED"), Some(ScanStatus::Completed));
        assert_eq!(a.map_status("STOPPED"), Some(ScanStatus::Failed));
        assert_eq!(a.map_status("REBALANCING"), None);
    }

    #[test]
    fn offset_paging_convention() {
        assert_eq!(next_offset(ALERT_PAGE_SIZE, 0).as_deref(), Some("500"));
        assert_eq!(next_offset(ALERT_PAGE_SIZE, 500).as_deref(), Some("1000"));
        assert_eq!(next_offset(12, 0), None);
        assert!(parse_offset(Some("500")).is_ok());
        assert!(parse_offset(Some("half")).is_err());
    }

    #[test]
    fn percent_parsing_clamps_overshoot() {
        assert_eq!(parse_percent("0").unwrap(), 0);
        assert_eq!(parse_percent("100").unwrap(), 100);
        assert_eq!(parse_percent("250").unwrap(), 100);
        assert!(parse_percent("-1").is_err());
    }
}
